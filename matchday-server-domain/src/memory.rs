use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use matchday_core::{
    GameId, PlaceId, SportId, UserId,
    game::Game,
    rating::{PlayerStanding, SportRating},
};

use crate::{
    ServiceError, ServiceResult,
    game::{CatalogRepository, FinishComputation, GameQuery, GameRepository, SortOrder},
    rating::{LeaderboardEntry, RatingRepository},
};

/// In-memory implementation of all storage ports, with the same guard
/// semantics as the sqlite implementation. Used by the service tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    games: Arc<DashMap<GameId, Game>>,
    ratings: Arc<Mutex<HashMap<(UserId, SportId), SportRating>>>,
    sports: Arc<DashSet<SportId>>,
    places: Arc<DashSet<PlaceId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sport(&self, sport: SportId) {
        self.sports.insert(sport);
    }

    pub fn add_place(&self, place: PlaceId) {
        self.places.insert(place);
    }

    fn matches(query: &GameQuery, game: &Game) -> bool {
        if query.sport.is_some_and(|s| s != game.sport) {
            return false;
        }
        if query.place.is_some_and(|p| p != game.place) {
            return false;
        }
        if query.creator.is_some_and(|c| c != game.creator) {
            return false;
        }
        if let Some(participant) = &query.participant {
            if !game.has_participant(participant) {
                return false;
            }
        }
        if query.is_finished.is_some_and(|f| f != game.is_finished) {
            return false;
        }
        if query.starts_after.is_some_and(|t| game.scheduled_at < t) {
            return false;
        }
        if query.starts_before.is_some_and(|t| game.scheduled_at > t) {
            return false;
        }
        true
    }
}

#[async_trait::async_trait]
impl GameRepository for MemoryStore {
    async fn create_game(&self, game: &Game) -> ServiceResult<()> {
        self.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn get_game(&self, id: GameId) -> ServiceResult<Option<Game>> {
        Ok(self.games.get(&id).map(|g| g.value().clone()))
    }

    async fn query_games(&self, query: &GameQuery) -> ServiceResult<Vec<Game>> {
        let mut games: Vec<Game> = self
            .games
            .iter()
            .filter(|entry| Self::matches(query, entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        games.sort_by_key(|g| g.scheduled_at);
        if query.sort == Some(SortOrder::Descending) {
            games.reverse();
        }
        if let Some(limit) = query.limit {
            games.truncate(limit as usize);
        }
        Ok(games)
    }

    async fn count_games(&self, query: &GameQuery) -> ServiceResult<u64> {
        let count = self
            .games
            .iter()
            .filter(|entry| Self::matches(query, entry.value()))
            .count();
        Ok(count as u64)
    }

    async fn add_participant(&self, id: GameId, user: UserId) -> ServiceResult<Game> {
        let Some(mut game_ref) = self.games.get_mut(&id) else {
            return ServiceError::not_found("Game not found");
        };
        game_ref
            .join(user)
            .map_err(|e| ServiceError::NotPossible(e.to_string()))?;
        Ok(game_ref.value().clone())
    }

    async fn finish_game(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        apply: FinishComputation,
    ) -> ServiceResult<Game> {
        let Some(mut game_ref) = self.games.get_mut(&id) else {
            return ServiceError::not_found("Game not found");
        };
        let mut ratings = self.ratings.lock().unwrap();

        // run the computation on a copy so a failed finish changes nothing
        let mut game = game_ref.value().clone();
        let sport = game.sport;
        let standings: HashMap<UserId, PlayerStanding> = game
            .participants
            .iter()
            .map(|p| {
                let standing = ratings
                    .get(&(p.user, sport))
                    .map(|r| PlayerStanding {
                        elo: r.elo,
                        games_played: r.games_played(),
                    })
                    .unwrap_or_default();
                (p.user, standing)
            })
            .collect();
        let updates = apply(&mut game, &standings)?;

        for update in updates {
            let rating = ratings
                .entry((update.user, sport))
                .or_insert_with(|| SportRating::new(sport));
            rating.record(update.elo, now);
        }
        *game_ref.value_mut() = game.clone();
        Ok(game)
    }

    async fn delete_game(&self, id: GameId) -> ServiceResult<()> {
        if self.games.remove(&id).is_none() {
            return ServiceError::not_found("Game not found");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RatingRepository for MemoryStore {
    async fn get_user_ratings(&self, user: UserId) -> ServiceResult<Vec<SportRating>> {
        let ratings = self.ratings.lock().unwrap();
        let mut out: Vec<SportRating> = ratings
            .iter()
            .filter(|((u, _), _)| *u == user)
            .map(|(_, rating)| rating.clone())
            .collect();
        out.sort_by(|a, b| b.elo.cmp(&a.elo));
        Ok(out)
    }

    async fn get_leaderboard(
        &self,
        sport: SportId,
        limit: u32,
    ) -> ServiceResult<Vec<LeaderboardEntry>> {
        let ratings = self.ratings.lock().unwrap();
        let mut entries: Vec<LeaderboardEntry> = ratings
            .iter()
            .filter(|((_, s), _)| *s == sport)
            .map(|((user, _), rating)| LeaderboardEntry {
                user: *user,
                elo: rating.elo,
                games_played: rating.games_played(),
            })
            .collect();
        entries.sort_by(|a, b| b.elo.cmp(&a.elo));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl CatalogRepository for MemoryStore {
    async fn sport_exists(&self, sport: SportId) -> ServiceResult<bool> {
        Ok(self.sports.contains(&sport))
    }

    async fn place_exists(&self, place: PlaceId) -> ServiceResult<bool> {
        Ok(self.places.contains(&place))
    }
}
