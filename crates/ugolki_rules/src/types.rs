//! Core domain types for ugolki.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of the board.
pub const BOARD_SIZE: usize = 8;

/// Side length of each home quadrant.
pub const HOME_SIZE: usize = 4;

/// Pieces each side owns for the whole game.
pub const PIECES_PER_SIDE: usize = HOME_SIZE * HOME_SIZE;

/// Side in the game.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Color {
    /// White (moves first, starts in the top-left quadrant).
    White,
    /// Black (starts in the bottom-right quadrant).
    Black,
}

impl Color {
    /// Returns the opposing side.
    pub fn opponent(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// First row and column of this side's home quadrant.
    pub fn home_origin(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => BOARD_SIZE - HOME_SIZE,
        }
    }

    /// First row and column of the quadrant this side must fill to win.
    pub fn target_origin(self) -> usize {
        self.opponent().home_origin()
    }
}

/// A cell on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cell {
    /// No piece.
    #[default]
    Empty,
    /// Cell holds a piece of the given side.
    Occupied(Color),
}

impl Cell {
    /// Integer encoding used on the wire and in storage: `1` white, `-1` black, `0` empty.
    pub fn to_i8(self) -> i8 {
        match self {
            Cell::Empty => 0,
            Cell::Occupied(Color::White) => 1,
            Cell::Occupied(Color::Black) => -1,
        }
    }

    /// Decodes the integer encoding, `None` for anything outside `{-1, 0, 1}`.
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(Cell::Empty),
            1 => Some(Cell::Occupied(Color::White)),
            -1 => Some(Cell::Occupied(Color::Black)),
            _ => None,
        }
    }

    /// Returns `true` when a piece of either side sits here.
    pub fn is_occupied(self) -> bool {
        !matches!(self, Cell::Empty)
    }
}

/// Errors raised when building boards or coordinates from untrusted data.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum BoardError {
    /// Coordinate outside the 8×8 grid.
    #[display("Coordinate ({row}, {col}) is off the board")]
    OutOfBounds {
        /// Offending row.
        row: usize,
        /// Offending column.
        col: usize,
    },

    /// Cell value other than -1, 0 or 1.
    #[display("Invalid cell value {value} at ({row}, {col})")]
    InvalidCell {
        /// Row of the cell.
        row: usize,
        /// Column of the cell.
        col: usize,
        /// Value found.
        value: i8,
    },
}

impl std::error::Error for BoardError {}

/// A square on the board, `(row, col)` with both in `[0, 8)`.
///
/// Serialized as a two-element array `[row, col]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "[u8; 2]", try_from = "[u8; 2]")]
pub struct Coord {
    row: u8,
    col: u8,
}

impl Coord {
    /// Creates a coordinate, `None` if it falls off the board.
    pub fn new(row: usize, col: usize) -> Option<Self> {
        (row < BOARD_SIZE && col < BOARD_SIZE).then_some(Self {
            row: row as u8,
            col: col as u8,
        })
    }

    /// Row index.
    pub fn row(self) -> usize {
        self.row as usize
    }

    /// Column index.
    pub fn col(self) -> usize {
        self.col as usize
    }

    /// The square `distance` steps away in `direction`, if still on the board.
    pub fn offset(self, direction: Direction, distance: usize) -> Option<Self> {
        let (dr, dc) = direction.delta();
        let row = self.row as isize + dr * distance as isize;
        let col = self.col as isize + dc * distance as isize;
        if row < 0 || col < 0 {
            return None;
        }
        Self::new(row as usize, col as usize)
    }

    /// Iterates every square in row-major order.
    pub fn all() -> impl Iterator<Item = Coord> {
        (0..BOARD_SIZE).flat_map(|row| {
            (0..BOARD_SIZE).map(move |col| Coord {
                row: row as u8,
                col: col as u8,
            })
        })
    }
}

impl From<Coord> for [u8; 2] {
    fn from(coord: Coord) -> Self {
        [coord.row, coord.col]
    }
}

impl TryFrom<[u8; 2]> for Coord {
    type Error = BoardError;

    fn try_from([row, col]: [u8; 2]) -> Result<Self, Self::Error> {
        Coord::new(row as usize, col as usize).ok_or(BoardError::OutOfBounds {
            row: row as usize,
            col: col as usize,
        })
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Orthogonal movement directions. Diagonals are never legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards row 0.
    North,
    /// Towards column 7.
    East,
    /// Towards row 7.
    South,
    /// Towards column 0.
    West,
}

impl Direction {
    /// All four directions in N, E, S, W order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// `(row, col)` delta of a single step.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::North => (-1, 0),
            Direction::East => (0, 1),
            Direction::South => (1, 0),
            Direction::West => (0, -1),
        }
    }
}

/// Wire and storage form of a board: 8×8 matrix of `{1, -1, 0}`.
pub type BoardRows = [[i8; BOARD_SIZE]; BOARD_SIZE];

/// 8×8 ugolki board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "BoardRows", try_from = "BoardRows")]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    /// Creates a board with no pieces.
    pub fn empty() -> Self {
        Self {
            cells: [[Cell::Empty; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    /// Starting position: white fills rows 0–3 × cols 0–3, black rows 4–7 × cols 4–7.
    pub fn initial() -> Self {
        let mut board = Self::empty();
        for color in [Color::White, Color::Black] {
            let origin = color.home_origin();
            for row in origin..origin + HOME_SIZE {
                for col in origin..origin + HOME_SIZE {
                    board.cells[row][col] = Cell::Occupied(color);
                }
            }
        }
        board
    }

    /// Gets the cell at a coordinate.
    pub fn get(&self, coord: Coord) -> Cell {
        self.cells[coord.row()][coord.col()]
    }

    /// Sets the cell at a coordinate.
    pub fn set(&mut self, coord: Coord, cell: Cell) {
        self.cells[coord.row()][coord.col()] = cell;
    }

    /// Checks if a cell is empty.
    pub fn is_empty(&self, coord: Coord) -> bool {
        self.get(coord) == Cell::Empty
    }

    /// Squares holding a piece of `color`, row-major.
    pub fn pieces(&self, color: Color) -> impl Iterator<Item = Coord> + '_ {
        Coord::all().filter(move |coord| self.get(*coord) == Cell::Occupied(color))
    }

    /// Number of pieces `color` has on the board.
    pub fn count(&self, color: Color) -> usize {
        self.pieces(color).count()
    }

    /// Integer matrix form (`1` white, `-1` black, `0` empty).
    pub fn to_rows(&self) -> BoardRows {
        let mut rows = [[0; BOARD_SIZE]; BOARD_SIZE];
        for (row, cells) in self.cells.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                rows[row][col] = cell.to_i8();
            }
        }
        rows
    }

    /// Builds a board from its integer matrix form.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::InvalidCell`] for any value outside `{-1, 0, 1}`.
    pub fn from_rows(rows: BoardRows) -> Result<Self, BoardError> {
        let mut board = Self::empty();
        for (row, values) in rows.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                board.cells[row][col] =
                    Cell::from_i8(*value).ok_or(BoardError::InvalidCell {
                        row,
                        col,
                        value: *value,
                    })?;
            }
        }
        Ok(board)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl From<Board> for BoardRows {
    fn from(board: Board) -> Self {
        board.to_rows()
    }
}

impl TryFrom<BoardRows> for Board {
    type Error = BoardError;

    fn try_from(rows: BoardRows) -> Result<Self, Self::Error> {
        Board::from_rows(rows)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "   ")?;
        for col in 0..BOARD_SIZE {
            write!(f, " {col}")?;
        }
        writeln!(f)?;
        for (row, cells) in self.cells.iter().enumerate() {
            write!(f, "{row}  ")?;
            for cell in cells {
                let symbol = match cell {
                    Cell::Empty => '·',
                    Cell::Occupied(Color::White) => 'W',
                    Cell::Occupied(Color::Black) => 'B',
                };
                write!(f, " {symbol}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
