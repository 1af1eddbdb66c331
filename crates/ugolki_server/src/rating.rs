//! Elo rating updates for finished player-vs-player matches.

use crate::db::DbError;
use crate::session::UserId;
use crate::store::GameStore;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Rating change scale per match.
pub const K_FACTOR: f64 = 32.0;

/// Rating of a newly registered participant.
pub const DEFAULT_RATING: f64 = 1200.0;

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// New ratings of `(first, second)` after a decisive match.
pub fn elo_change(first: f64, second: f64, first_won: bool) -> (f64, f64) {
    let (first_score, second_score) = if first_won { (1.0, 0.0) } else { (0.0, 1.0) };
    (
        first + K_FACTOR * (first_score - expected_score(first, second)),
        second + K_FACTOR * (second_score - expected_score(second, first)),
    )
}

/// Updates ratings after a match.
#[async_trait]
pub trait RatingService: Send + Sync + fmt::Debug {
    /// Records a decisive result and returns the new `(first, second)` ratings.
    async fn record_result(
        &self,
        first: UserId,
        second: UserId,
        first_won: bool,
    ) -> Result<(f64, f64), DbError>;
}

/// Elo over ratings held in a [`GameStore`].
#[derive(Debug, Clone)]
pub struct EloRating {
    store: Arc<dyn GameStore>,
}

impl EloRating {
    /// Rates participants stored in `store`.
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }

    async fn rating_of(&self, user_id: UserId) -> Result<f64, DbError> {
        Ok(self
            .store
            .get_user(user_id)
            .await?
            .map_or(DEFAULT_RATING, |user| *user.elo()))
    }
}

#[async_trait]
impl RatingService for EloRating {
    #[instrument(skip(self))]
    async fn record_result(
        &self,
        first: UserId,
        second: UserId,
        first_won: bool,
    ) -> Result<(f64, f64), DbError> {
        let before = (self.rating_of(first).await?, self.rating_of(second).await?);
        let after = elo_change(before.0, before.1, first_won);

        self.store.set_rating(first, after.0).await?;
        self.store.set_rating(second, after.1).await?;

        info!(
            first_before = before.0,
            first_after = after.0,
            second_before = before.1,
            second_after = after.1,
            "Ratings updated"
        );
        Ok(after)
    }
}
