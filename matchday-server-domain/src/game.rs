use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use matchday_core::{
    GameId, PlaceId, SportId, UserId,
    game::{FinishError, FinishOutcome, Game, NewGame},
    rating::{self, PlayerStanding},
};

use crate::{ServiceError, ServiceResult, rating::RatingUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default)]
pub struct GameQuery {
    pub sport: Option<SportId>,
    pub place: Option<PlaceId>,
    pub creator: Option<UserId>,
    pub participant: Option<UserId>,
    pub is_finished: Option<bool>,
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
    pub sort: Option<SortOrder>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct CreateGameRequest {
    pub sport: SportId,
    pub place: PlaceId,
    pub scheduled_at: DateTime<Utc>,
    pub note: String,
    pub max_participants: u32,
}

/// Finish computation run by the repository inside its transaction. It
/// receives the stored game and a rating snapshot of every participant, and
/// returns the rating writes to apply. Any error rolls the whole finish
/// back.
pub type FinishComputation = Box<
    dyn FnOnce(&mut Game, &HashMap<UserId, PlayerStanding>) -> ServiceResult<Vec<RatingUpdate>>
        + Send,
>;

pub type ArcGameRepository = Arc<Box<dyn GameRepository + Send + Sync + 'static>>;

#[async_trait::async_trait]
pub trait GameRepository {
    async fn create_game(&self, game: &Game) -> ServiceResult<()>;
    async fn get_game(&self, id: GameId) -> ServiceResult<Option<Game>>;
    async fn query_games(&self, query: &GameQuery) -> ServiceResult<Vec<Game>>;
    async fn count_games(&self, query: &GameQuery) -> ServiceResult<u64>;
    /// Appends the user to the roster. Implementations must re-check the
    /// join guards under their own write lock so concurrent joins cannot
    /// overfill a game.
    async fn add_participant(&self, id: GameId, user: UserId) -> ServiceResult<Game>;
    /// Runs `apply` on the stored game and persists the finished game
    /// together with all rating updates as one unit. `now` stamps the
    /// rating events.
    async fn finish_game(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        apply: FinishComputation,
    ) -> ServiceResult<Game>;
    async fn delete_game(&self, id: GameId) -> ServiceResult<()>;
}

pub type ArcCatalogRepository = Arc<Box<dyn CatalogRepository + Send + Sync + 'static>>;

/// Existence checks against the sport/place catalog. Catalog management
/// itself lives outside this service.
#[async_trait::async_trait]
pub trait CatalogRepository {
    async fn sport_exists(&self, sport: SportId) -> ServiceResult<bool>;
    async fn place_exists(&self, place: PlaceId) -> ServiceResult<bool>;
}

pub type ArcGameLifecycleService = Arc<Box<dyn GameLifecycleService + Send + Sync + 'static>>;

#[async_trait::async_trait]
pub trait GameLifecycleService {
    async fn create_game(
        &self,
        creator: UserId,
        request: CreateGameRequest,
    ) -> ServiceResult<Game>;
    async fn get_game(&self, id: GameId) -> ServiceResult<Game>;
    async fn query_games(&self, query: GameQuery) -> ServiceResult<Vec<Game>>;
    async fn count_games(&self, query: GameQuery) -> ServiceResult<u64>;
    async fn join_game(&self, id: GameId, user: UserId) -> ServiceResult<Game>;
    async fn finish_game(
        &self,
        id: GameId,
        initiator: UserId,
        winner_ids: HashSet<UserId>,
    ) -> ServiceResult<Game>;
    async fn delete_game(&self, id: GameId, initiator: UserId) -> ServiceResult<()>;
}

#[derive(Clone)]
pub struct GameLifecycleServiceImpl {
    game_repository: ArcGameRepository,
    catalog_repository: ArcCatalogRepository,
}

impl GameLifecycleServiceImpl {
    pub fn new(
        game_repository: ArcGameRepository,
        catalog_repository: ArcCatalogRepository,
    ) -> Self {
        Self {
            game_repository,
            catalog_repository,
        }
    }

    fn map_finish_error(e: FinishError) -> ServiceError {
        match e {
            FinishError::NotCreator => ServiceError::Forbidden(e.to_string()),
            FinishError::AlreadyFinished | FinishError::TooEarly => {
                ServiceError::NotPossible(e.to_string())
            }
            FinishError::UnknownWinner(_) => ServiceError::BadRequest(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl GameLifecycleService for GameLifecycleServiceImpl {
    async fn create_game(
        &self,
        creator: UserId,
        request: CreateGameRequest,
    ) -> ServiceResult<Game> {
        if !self.catalog_repository.sport_exists(request.sport).await? {
            return ServiceError::bad_request("Unknown sport");
        }
        if !self.catalog_repository.place_exists(request.place).await? {
            return ServiceError::bad_request("Unknown place");
        }
        let game = Game::create(
            GameId::new(),
            NewGame {
                sport: request.sport,
                place: request.place,
                creator,
                scheduled_at: request.scheduled_at,
                note: request.note,
                max_participants: request.max_participants,
            },
        )
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        self.game_repository.create_game(&game).await?;

        info!("Game {} created by {}", game.id, creator);
        Ok(game)
    }

    async fn get_game(&self, id: GameId) -> ServiceResult<Game> {
        match self.game_repository.get_game(id).await? {
            Some(game) => Ok(game),
            None => ServiceError::not_found("Game not found"),
        }
    }

    async fn query_games(&self, query: GameQuery) -> ServiceResult<Vec<Game>> {
        self.game_repository.query_games(&query).await
    }

    async fn count_games(&self, query: GameQuery) -> ServiceResult<u64> {
        self.game_repository.count_games(&query).await
    }

    async fn join_game(&self, id: GameId, user: UserId) -> ServiceResult<Game> {
        let mut game = self.get_game(id).await?;
        game.join(user)
            .map_err(|e| ServiceError::NotPossible(e.to_string()))?;
        let game = self.game_repository.add_participant(id, user).await?;

        info!("User {} joined game {}", user, id);
        Ok(game)
    }

    async fn finish_game(
        &self,
        id: GameId,
        initiator: UserId,
        winner_ids: HashSet<UserId>,
    ) -> ServiceResult<Game> {
        let now = Utc::now();
        let game = self
            .game_repository
            .finish_game(
                id,
                now,
                Box::new(move |game, standings| {
                    let outcome = game
                        .finish(&initiator, &winner_ids, now)
                        .map_err(Self::map_finish_error)?;
                    match outcome {
                        FinishOutcome::NoContest => Ok(Vec::new()),
                        FinishOutcome::Decisive { winners, losers } => {
                            let standing_of =
                                |user: &UserId| standings.get(user).copied().unwrap_or_default();
                            let winner_standings: Vec<PlayerStanding> =
                                winners.iter().map(standing_of).collect();
                            let loser_standings: Vec<PlayerStanding> =
                                losers.iter().map(standing_of).collect();
                            let (winner_changes, loser_changes) =
                                rating::rate_groups(&winner_standings, &loser_standings)
                                    .map_err(|e| ServiceError::Internal(e.to_string()))?;
                            Ok(winners
                                .iter()
                                .zip(winner_changes)
                                .chain(losers.iter().zip(loser_changes))
                                .map(|(user, change)| RatingUpdate {
                                    user: *user,
                                    elo: change.elo,
                                    change: change.change,
                                })
                                .collect())
                        }
                    }
                }),
            )
            .await?;

        info!("Game {} finished by {}", id, initiator);
        Ok(game)
    }

    async fn delete_game(&self, id: GameId, initiator: UserId) -> ServiceResult<()> {
        let game = self.get_game(id).await?;
        if !game.is_creator(&initiator) {
            return ServiceError::forbidden("Only the creator can delete this game");
        }
        self.game_repository.delete_game(id).await?;

        info!("Game {} deleted by {}", id, initiator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryStore, rating::RatingRepository};
    use chrono::Duration;
    use matchday_core::game::GamePhase;

    fn setup() -> (GameLifecycleServiceImpl, MemoryStore, SportId, PlaceId) {
        let store = MemoryStore::new();
        let sport = SportId::new();
        let place = PlaceId::new();
        store.add_sport(sport);
        store.add_place(place);
        let service = GameLifecycleServiceImpl::new(
            Arc::new(Box::new(store.clone())),
            Arc::new(Box::new(store.clone())),
        );
        (service, store, sport, place)
    }

    fn request(sport: SportId, place: PlaceId, capacity: u32) -> CreateGameRequest {
        CreateGameRequest {
            sport,
            place,
            scheduled_at: Utc::now() - Duration::hours(1),
            note: String::new(),
            max_participants: capacity,
        }
    }

    async fn elo_of(store: &MemoryStore, user: UserId) -> Option<i32> {
        let ratings = store.get_user_ratings(user).await.unwrap();
        ratings.first().map(|r| r.elo)
    }

    #[tokio::test]
    async fn test_create_game_validates_inputs() {
        let (service, _store, sport, place) = setup();
        let creator = UserId::new();

        let game = service
            .create_game(creator, request(sport, place, 4))
            .await
            .expect("Failed to create game");
        assert_eq!(game.creator, creator);
        assert_eq!(game.participants.len(), 1);
        assert_eq!(game.phase(), GamePhase::Open);

        let too_small = service.create_game(creator, request(sport, place, 1)).await;
        assert!(matches!(too_small, Err(ServiceError::BadRequest(_))));

        let unknown_sport = service
            .create_game(creator, request(SportId::new(), place, 4))
            .await;
        assert!(matches!(unknown_sport, Err(ServiceError::BadRequest(_))));

        let unknown_place = service
            .create_game(creator, request(sport, PlaceId::new(), 4))
            .await;
        assert!(matches!(unknown_place, Err(ServiceError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_join_guards() {
        let (service, _store, sport, place) = setup();
        let creator = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();

        let missing = service.join_game(GameId::new(), UserId::new()).await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        let joiner = UserId::new();
        let joined = service.join_game(game.id, joiner).await.unwrap();
        assert_eq!(joined.participants.len(), 2);
        assert_eq!(joined.phase(), GamePhase::Full);

        let duplicate = service.join_game(game.id, joiner).await;
        assert!(matches!(duplicate, Err(ServiceError::NotPossible(_))));

        let full = service.join_game(game.id, UserId::new()).await;
        assert!(matches!(full, Err(ServiceError::NotPossible(_))));
    }

    #[tokio::test]
    async fn test_finish_applies_ratings() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        let finished = service
            .finish_game(game.id, creator, HashSet::from([creator]))
            .await
            .expect("Failed to finish game");
        assert!(finished.is_finished);
        assert!(finished.participants[0].winner);
        assert!(!finished.participants[1].winner);

        assert_eq!(elo_of(&store, creator).await, Some(1240));
        assert_eq!(elo_of(&store, opponent).await, Some(1160));

        let history = &store.get_user_ratings(creator).await.unwrap()[0];
        assert_eq!(history.sport, sport);
        assert_eq!(history.history.len(), 1);
        assert_eq!(history.history[0].change, 40);
    }

    #[tokio::test]
    async fn test_finish_without_decisive_outcome_skips_ratings() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        let finished = service
            .finish_game(game.id, creator, HashSet::from([creator, opponent]))
            .await
            .unwrap();
        assert!(finished.is_finished);
        assert!(finished.participants.iter().all(|p| !p.winner));
        assert_eq!(elo_of(&store, creator).await, None);
        assert_eq!(elo_of(&store, opponent).await, None);
    }

    #[tokio::test]
    async fn test_finish_authorization() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        let not_creator = service
            .finish_game(game.id, opponent, HashSet::new())
            .await;
        assert!(matches!(not_creator, Err(ServiceError::Forbidden(_))));
        assert_eq!(elo_of(&store, opponent).await, None);

        service
            .finish_game(game.id, creator, HashSet::new())
            .await
            .unwrap();

        // still a 403 once the game is finished
        let after_finish = service
            .finish_game(game.id, opponent, HashSet::new())
            .await;
        assert!(matches!(after_finish, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_finish_before_start_is_rejected() {
        let (service, _store, sport, place) = setup();
        let creator = UserId::new();
        let mut req = request(sport, place, 2);
        req.scheduled_at = Utc::now() + Duration::hours(1);
        let game = service.create_game(creator, req).await.unwrap();

        let result = service.finish_game(game.id, creator, HashSet::new()).await;
        assert!(matches!(result, Err(ServiceError::NotPossible(_))));

        let stored = service.get_game(game.id).await.unwrap();
        assert!(!stored.is_finished);
    }

    #[tokio::test]
    async fn test_finish_rejects_winner_outside_roster() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        let result = service
            .finish_game(game.id, creator, HashSet::from([UserId::new()]))
            .await;
        assert!(matches!(result, Err(ServiceError::BadRequest(_))));

        // nothing was written
        let stored = service.get_game(game.id).await.unwrap();
        assert!(!stored.is_finished);
        assert!(stored.participants.iter().all(|p| !p.winner));
        assert_eq!(elo_of(&store, creator).await, None);
    }

    #[tokio::test]
    async fn test_second_finish_is_rejected() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        service
            .finish_game(game.id, creator, HashSet::from([creator]))
            .await
            .unwrap();
        let again = service
            .finish_game(game.id, creator, HashSet::from([opponent]))
            .await;
        assert!(matches!(again, Err(ServiceError::NotPossible(_))));

        // ratings were applied exactly once and kept their first outcome
        assert_eq!(elo_of(&store, creator).await, Some(1240));
        assert_eq!(elo_of(&store, opponent).await, Some(1160));
        let history = &store.get_user_ratings(creator).await.unwrap()[0];
        assert_eq!(history.history.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_finishes_apply_once() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        let (first, second) = tokio::join!(
            service.finish_game(game.id, creator, HashSet::from([creator])),
            service.finish_game(game.id, creator, HashSet::from([opponent])),
        );
        let succeeded = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);

        let history = &store.get_user_ratings(creator).await.unwrap()[0];
        assert_eq!(history.history.len(), 1);
    }

    #[tokio::test]
    async fn test_sequential_games_accumulate_history() {
        let (service, store, sport, place) = setup();
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();

        let first = service.create_game(a, request(sport, place, 2)).await.unwrap();
        service.join_game(first.id, b).await.unwrap();
        service
            .finish_game(first.id, a, HashSet::from([a]))
            .await
            .unwrap();

        let second = service.create_game(a, request(sport, place, 2)).await.unwrap();
        service.join_game(second.id, c).await.unwrap();
        service
            .finish_game(second.id, a, HashSet::from([c]))
            .await
            .unwrap();

        // a went 1200 -> 1240 -> 1195, c beat an established 1240
        assert_eq!(elo_of(&store, a).await, Some(1195));
        assert_eq!(elo_of(&store, c).await, Some(1245));
        let history = &store.get_user_ratings(a).await.unwrap()[0];
        let changes: Vec<i32> = history.history.iter().map(|e| e.change).collect();
        assert_eq!(changes, vec![40, -45]);

        let board = store.get_leaderboard(sport, 50).await.unwrap();
        let order: Vec<UserId> = board.iter().map(|e| e.user).collect();
        assert_eq!(order, vec![c, a, b]);
        assert_eq!(board[0].elo, 1245);
        assert_eq!(board[0].games_played, 1);

        let top_two = store.get_leaderboard(sport, 2).await.unwrap();
        assert_eq!(top_two.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_game() {
        let (service, store, sport, place) = setup();
        let creator = UserId::new();
        let opponent = UserId::new();
        let game = service
            .create_game(creator, request(sport, place, 2))
            .await
            .unwrap();
        service.join_game(game.id, opponent).await.unwrap();

        let not_creator = service.delete_game(game.id, opponent).await;
        assert!(matches!(not_creator, Err(ServiceError::Forbidden(_))));

        service
            .finish_game(game.id, creator, HashSet::from([creator]))
            .await
            .unwrap();
        service.delete_game(game.id, creator).await.unwrap();

        let gone = service.get_game(game.id).await;
        assert!(matches!(gone, Err(ServiceError::NotFound(_))));
        let missing = service.delete_game(game.id, creator).await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        // applied ratings survive the deletion
        assert_eq!(elo_of(&store, creator).await, Some(1240));
        assert_eq!(elo_of(&store, opponent).await, Some(1160));
    }

    #[tokio::test]
    async fn test_query_games() {
        let (service, store, sport, place) = setup();
        let other_sport = SportId::new();
        store.add_sport(other_sport);
        let a = UserId::new();
        let b = UserId::new();

        let mut req = request(sport, place, 4);
        req.scheduled_at = Utc::now() - Duration::hours(3);
        let oldest = service.create_game(a, req).await.unwrap();
        service.join_game(oldest.id, b).await.unwrap();

        let middle = service
            .create_game(b, request(other_sport, place, 4))
            .await
            .unwrap();

        let mut req = request(sport, place, 4);
        req.scheduled_at = Utc::now() + Duration::hours(3);
        let newest = service.create_game(a, req).await.unwrap();

        service
            .finish_game(oldest.id, a, HashSet::new())
            .await
            .unwrap();

        let by_sport = service
            .query_games(GameQuery {
                sport: Some(sport),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_sport.len(), 2);

        let open_only = service
            .query_games(GameQuery {
                is_finished: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(open_only.iter().all(|g| !g.is_finished));
        assert_eq!(open_only.len(), 2);

        let with_b = service
            .query_games(GameQuery {
                participant: Some(b),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(with_b.len(), 2);

        let newest_first = service
            .query_games(GameQuery {
                sort: Some(SortOrder::Descending),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(newest_first[0].id, newest.id);

        let upcoming = service
            .query_games(GameQuery {
                starts_after: Some(Utc::now()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, newest.id);

        let total = service
            .count_games(GameQuery {
                sport: Some(sport),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);

        assert_eq!(middle.sport, other_sport);
    }
}
