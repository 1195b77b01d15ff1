use std::collections::HashMap;

use chrono::{DateTime, Utc};
use matchday_core::{
    GameId, PlaceId, SportId, UserId,
    game::{Game, JoinError, Participation},
    rating::{DEFAULT_ELO, PlayerStanding},
};
use matchday_server_domain::{
    ServiceError, ServiceResult,
    game::{FinishComputation, GameQuery, GameRepository, SortOrder},
};
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};

pub struct SqliteGameRepository {
    pool: Pool<Sqlite>,
}

impl SqliteGameRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn game_from_row(row: &SqliteRow) -> sqlx::Result<Game> {
        Ok(Game {
            id: GameId(parse_uuid(row.try_get("id")?, "id")?),
            sport: SportId(parse_uuid(row.try_get("sport_id")?, "sport_id")?),
            place: PlaceId(parse_uuid(row.try_get("place_id")?, "place_id")?),
            creator: UserId(parse_uuid(row.try_get("creator_id")?, "creator_id")?),
            scheduled_at: parse_timestamp(row.try_get("scheduled_at")?, "scheduled_at")?,
            note: row.try_get("note")?,
            max_participants: row.try_get("max_participants")?,
            is_finished: row.try_get("is_finished")?,
            participants: Vec::new(),
        })
    }

    fn participations_from_rows(rows: &[SqliteRow]) -> sqlx::Result<Vec<Participation>> {
        rows.iter()
            .map(|row| {
                Ok(Participation {
                    user: UserId(parse_uuid(row.try_get("user_id")?, "user_id")?),
                    winner: row.try_get("winner")?,
                })
            })
            .collect()
    }

    fn filter_sql(query: &GameQuery) -> String {
        let mut conditions = Vec::new();
        if query.sport.is_some() {
            conditions.push("sport_id = ?");
        }
        if query.place.is_some() {
            conditions.push("place_id = ?");
        }
        if query.creator.is_some() {
            conditions.push("creator_id = ?");
        }
        if query.participant.is_some() {
            conditions.push("id IN (SELECT game_id FROM participations WHERE user_id = ?)");
        }
        if query.is_finished.is_some() {
            conditions.push("is_finished = ?");
        }
        if query.starts_after.is_some() {
            conditions.push("scheduled_at >= ?");
        }
        if query.starts_before.is_some() {
            conditions.push("scheduled_at <= ?");
        }
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }
}

pub(crate) fn parse_uuid(value: String, column: &str) -> sqlx::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(&value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn parse_timestamp(value: i64, column: &str) -> sqlx::Result<DateTime<Utc>> {
    DateTime::from_timestamp(value, 0).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: "timestamp out of range".into(),
    })
}

#[async_trait::async_trait]
impl GameRepository for SqliteGameRepository {
    async fn create_game(&self, game: &Game) -> ServiceResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        sqlx::query(
            "INSERT INTO games (id, sport_id, place_id, creator_id, scheduled_at, note, max_participants, is_finished) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(game.id.to_string())
        .bind(game.sport.to_string())
        .bind(game.place.to_string())
        .bind(game.creator.to_string())
        .bind(game.scheduled_at.timestamp())
        .bind(&game.note)
        .bind(game.max_participants)
        .bind(game.is_finished)
        .execute(&mut *tx)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

        for (position, p) in game.participants.iter().enumerate() {
            sqlx::query(
                "INSERT INTO participations (game_id, user_id, winner, position) VALUES (?, ?, ?, ?)",
            )
            .bind(game.id.to_string())
            .bind(p.user.to_string())
            .bind(p.winner)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn get_game(&self, id: GameId) -> ServiceResult<Option<Game>> {
        let row = sqlx::query("SELECT * FROM games WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut game =
            Self::game_from_row(&row).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let rows = sqlx::query(
            "SELECT user_id, winner FROM participations WHERE game_id = ? ORDER BY position",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
        game.participants = Self::participations_from_rows(&rows)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(Some(game))
    }

    async fn query_games(&self, query: &GameQuery) -> ServiceResult<Vec<Game>> {
        let order = match query.sort {
            Some(SortOrder::Descending) => "DESC",
            _ => "ASC",
        };
        let mut sql = format!(
            "SELECT * FROM games{} ORDER BY scheduled_at {}",
            Self::filter_sql(query),
            order
        );
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql);
        if let Some(sport) = query.sport {
            q = q.bind(sport.to_string());
        }
        if let Some(place) = query.place {
            q = q.bind(place.to_string());
        }
        if let Some(creator) = query.creator {
            q = q.bind(creator.to_string());
        }
        if let Some(participant) = query.participant {
            q = q.bind(participant.to_string());
        }
        if let Some(is_finished) = query.is_finished {
            q = q.bind(is_finished);
        }
        if let Some(starts_after) = query.starts_after {
            q = q.bind(starts_after.timestamp());
        }
        if let Some(starts_before) = query.starts_before {
            q = q.bind(starts_before.timestamp());
        }
        if let Some(limit) = query.limit {
            q = q.bind(limit as i64);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let mut games = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut game =
                Self::game_from_row(row).map_err(|e| ServiceError::Internal(e.to_string()))?;
            let participant_rows = sqlx::query(
                "SELECT user_id, winner FROM participations WHERE game_id = ? ORDER BY position",
            )
            .bind(game.id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
            game.participants = Self::participations_from_rows(&participant_rows)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
            games.push(game);
        }
        Ok(games)
    }

    async fn count_games(&self, query: &GameQuery) -> ServiceResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM games{}", Self::filter_sql(query));
        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(sport) = query.sport {
            q = q.bind(sport.to_string());
        }
        if let Some(place) = query.place {
            q = q.bind(place.to_string());
        }
        if let Some(creator) = query.creator {
            q = q.bind(creator.to_string());
        }
        if let Some(participant) = query.participant {
            q = q.bind(participant.to_string());
        }
        if let Some(is_finished) = query.is_finished {
            q = q.bind(is_finished);
        }
        if let Some(starts_after) = query.starts_after {
            q = q.bind(starts_after.timestamp());
        }
        if let Some(starts_before) = query.starts_before {
            q = q.bind(starts_before.timestamp());
        }
        let count = q
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(count as u64)
    }

    async fn add_participant(&self, id: GameId, user: UserId) -> ServiceResult<Game> {
        // The capacity and state guards run inside the insert itself so two
        // concurrent joins cannot overfill the roster.
        let result = sqlx::query(
            "INSERT INTO participations (game_id, user_id, winner, position)
             SELECT ?1, ?2, 0, COUNT(*) FROM participations WHERE game_id = ?1
             HAVING COUNT(*) < (SELECT max_participants FROM games WHERE id = ?1 AND is_finished = 0)",
        )
        .bind(id.to_string())
        .bind(user.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(res) if res.rows_affected() == 1 => {}
            Ok(_) => {
                let Some(game) = self.get_game(id).await? else {
                    return ServiceError::not_found("Game not found");
                };
                let reason = if game.is_finished {
                    JoinError::AlreadyFinished
                } else if game.has_participant(&user) {
                    JoinError::AlreadyJoined
                } else {
                    JoinError::GameFull
                };
                return ServiceError::not_possible(reason.to_string());
            }
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                return ServiceError::not_possible(JoinError::AlreadyJoined.to_string());
            }
            Err(e) => return ServiceError::internal(e.to_string()),
        }

        match self.get_game(id).await? {
            Some(game) => Ok(game),
            None => ServiceError::not_found("Game not found"),
        }
    }

    async fn finish_game(
        &self,
        id: GameId,
        now: DateTime<Utc>,
        apply: FinishComputation,
    ) -> ServiceResult<Game> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        // Flag first: the write lock serializes concurrent finishes, and a
        // transaction that loses the race sees zero affected rows.
        let flagged = sqlx::query("UPDATE games SET is_finished = 1 WHERE id = ? AND is_finished = 0")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?
            .rows_affected()
            == 1;

        let row = sqlx::query("SELECT * FROM games WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let Some(row) = row else {
            return ServiceError::not_found("Game not found");
        };
        let mut game =
            Self::game_from_row(&row).map_err(|e| ServiceError::Internal(e.to_string()))?;
        // the row now always reads finished; the state guards need the value
        // this transaction started from
        game.is_finished = !flagged;

        let rows = sqlx::query(
            "SELECT user_id, winner FROM participations WHERE game_id = ? ORDER BY position",
        )
        .bind(id.to_string())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
        game.participants = Self::participations_from_rows(&rows)
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let mut standings = HashMap::new();
        for p in &game.participants {
            let elo = sqlx::query_scalar::<_, i32>(
                "SELECT elo FROM sport_ratings WHERE user_id = ? AND sport_id = ?",
            )
            .bind(p.user.to_string())
            .bind(game.sport.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?
            .unwrap_or(DEFAULT_ELO);
            let events = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM rating_events WHERE user_id = ? AND sport_id = ?",
            )
            .bind(p.user.to_string())
            .bind(game.sport.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
            standings.insert(
                p.user,
                PlayerStanding {
                    elo,
                    games_played: events as u32,
                },
            );
        }

        // Any error drops the transaction and rolls the finish flag back, so
        // a rejected finish leaves no partial writes behind.
        let updates = apply(&mut game, &standings)?;

        for p in &game.participants {
            sqlx::query("UPDATE participations SET winner = ? WHERE game_id = ? AND user_id = ?")
                .bind(p.winner)
                .bind(id.to_string())
                .bind(p.user.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
        }
        for update in &updates {
            let Some(standing) = standings.get(&update.user) else {
                return ServiceError::internal("Rating update for a user outside the game");
            };
            sqlx::query(
                "INSERT INTO sport_ratings (user_id, sport_id, elo) VALUES (?, ?, ?)
                 ON CONFLICT (user_id, sport_id) DO UPDATE SET elo = excluded.elo",
            )
            .bind(update.user.to_string())
            .bind(game.sport.to_string())
            .bind(update.elo)
            .execute(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
            sqlx::query(
                "INSERT INTO rating_events (user_id, sport_id, seq, elo, change, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(update.user.to_string())
            .bind(game.sport.to_string())
            .bind(standing.games_played + 1)
            .bind(update.elo)
            .bind(update.change)
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(game)
    }

    async fn delete_game(&self, id: GameId) -> ServiceResult<()> {
        let res = sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if res.rows_affected() == 0 {
            return ServiceError::not_found("Game not found");
        }
        Ok(())
    }
}
