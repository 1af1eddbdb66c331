//! Move generation and application.

use crate::action::Action;
use crate::types::{BOARD_SIZE, Board, Cell, Color, Coord, Direction};
use std::collections::VecDeque;
use tracing::{instrument, trace};

/// Empty orthogonal neighbours of `from`, in N, E, S, W order.
pub fn step_destinations(board: &Board, from: Coord) -> Vec<Coord> {
    Direction::ALL
        .iter()
        .filter_map(|direction| from.offset(*direction, 1))
        .filter(|to| board.is_empty(*to))
        .collect()
}

/// Every square reachable from `from` by one or more jumps, in discovery order.
///
/// A jump passes over an adjacent piece of either colour onto the empty
/// square directly behind it. Each landing square is also a new starting
/// point, so chains may turn at every hop. The board is not modified while
/// searching, so `from` stays occupied and is never offered.
pub fn jump_destinations(board: &Board, from: Coord) -> Vec<Coord> {
    let mut reached = [[false; BOARD_SIZE]; BOARD_SIZE];
    reached[from.row()][from.col()] = true;

    let mut frontier = VecDeque::from([from]);
    let mut destinations = Vec::new();

    while let Some(square) = frontier.pop_front() {
        for direction in Direction::ALL {
            let Some(over) = square.offset(direction, 1) else {
                continue;
            };
            let Some(landing) = square.offset(direction, 2) else {
                continue;
            };

            if board.get(over).is_occupied()
                && board.is_empty(landing)
                && !reached[landing.row()][landing.col()]
            {
                reached[landing.row()][landing.col()] = true;
                destinations.push(landing);
                frontier.push_back(landing);
            }
        }
    }

    destinations
}

/// All legal actions for the side to move.
///
/// Pieces are visited row-major; for each piece its simple steps come first,
/// then its jump destinations.
#[instrument(skip(board))]
pub fn legal_actions(board: &Board, turn: Color) -> Vec<Action> {
    let mut actions = Vec::new();

    for from in board.pieces(turn) {
        actions.extend(
            step_destinations(board, from)
                .into_iter()
                .map(|to| Action::new(from, to)),
        );
        actions.extend(
            jump_destinations(board, from)
                .into_iter()
                .map(|to| Action::new(from, to)),
        );
    }

    trace!(count = actions.len(), "Generated legal actions");
    actions
}

/// Moves the piece at `action.from` to `action.to`.
///
/// Performs no legality check; callers validate against [`legal_actions`].
pub fn apply_action(board: &Board, action: Action) -> Board {
    let mut next = board.clone();
    let piece = next.get(action.from);
    next.set(action.from, Cell::Empty);
    next.set(action.to, piece);
    next
}
