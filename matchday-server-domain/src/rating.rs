use std::sync::Arc;

use matchday_core::{SportId, UserId, rating::SportRating};

use crate::ServiceResult;

/// A rating write produced by the finish computation, applied inside the
/// same transaction as the game update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatingUpdate {
    pub user: UserId,
    pub elo: i32,
    pub change: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub elo: i32,
    pub games_played: u32,
}

pub type ArcRatingRepository = Arc<Box<dyn RatingRepository + Send + Sync + 'static>>;

#[async_trait::async_trait]
pub trait RatingRepository {
    /// All of a user's per-sport ratings with full event history, highest
    /// rating first.
    async fn get_user_ratings(&self, user: UserId) -> ServiceResult<Vec<SportRating>>;

    async fn get_leaderboard(
        &self,
        sport: SportId,
        limit: u32,
    ) -> ServiceResult<Vec<LeaderboardEntry>>;
}
