//! Win detection logic for ugolki.

use crate::types::{Board, Cell, Color, Coord, HOME_SIZE};
use tracing::instrument;

/// Checks whether `color` occupies every square of its target quadrant.
///
/// Pieces are never removed, so a full target quadrant means all sixteen
/// pieces of that side have arrived.
pub fn fills_target(board: &Board, color: Color) -> bool {
    let origin = color.target_origin();
    (origin..origin + HOME_SIZE).all(|row| {
        (origin..origin + HOME_SIZE).all(|col| {
            Coord::new(row, col).is_some_and(|coord| board.get(coord) == Cell::Occupied(color))
        })
    })
}

/// Checks if there is a winner on the board.
///
/// White wins by filling rows 4–7 × cols 4–7, black by filling
/// rows 0–3 × cols 0–3. There is no other way to end the game.
#[instrument(skip(board))]
pub fn check_winner(board: &Board) -> Option<Color> {
    [Color::White, Color::Black]
        .into_iter()
        .find(|color| fills_target(board, *color))
}
