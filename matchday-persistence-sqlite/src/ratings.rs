use std::collections::HashMap;

use matchday_core::{
    SportId, UserId,
    rating::{RatingEvent, SportRating},
};
use matchday_server_domain::{
    ServiceError, ServiceResult,
    rating::{LeaderboardEntry, RatingRepository},
};
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};

use crate::games::{parse_timestamp, parse_uuid};

pub struct SqliteRatingRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRatingRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn ratings_from_rows(rows: &[SqliteRow]) -> sqlx::Result<Vec<SportRating>> {
        let mut by_sport: HashMap<SportId, SportRating> = HashMap::new();
        // rows arrive ordered by (sport, seq), so pushes keep the history
        // in event order and the last elo per sport is the current one
        for row in rows {
            let sport = SportId(parse_uuid(row.try_get("sport_id")?, "sport_id")?);
            let elo: i32 = row.try_get("elo")?;
            let change: i32 = row.try_get("change")?;
            let at = parse_timestamp(row.try_get("created_at")?, "created_at")?;
            let rating = by_sport
                .entry(sport)
                .or_insert_with(|| SportRating::new(sport));
            rating.elo = elo;
            rating.history.push(RatingEvent { elo, change, at });
        }
        let mut ratings: Vec<SportRating> = by_sport.into_values().collect();
        ratings.sort_by(|a, b| b.elo.cmp(&a.elo));
        Ok(ratings)
    }

    fn entry_from_row(row: &SqliteRow) -> sqlx::Result<LeaderboardEntry> {
        Ok(LeaderboardEntry {
            user: UserId(parse_uuid(row.try_get("user_id")?, "user_id")?),
            elo: row.try_get("elo")?,
            games_played: row.try_get::<i64, _>("games_played")? as u32,
        })
    }
}

#[async_trait::async_trait]
impl RatingRepository for SqliteRatingRepository {
    async fn get_user_ratings(&self, user: UserId) -> ServiceResult<Vec<SportRating>> {
        let rows = sqlx::query(
            "SELECT sport_id, elo, change, created_at FROM rating_events WHERE user_id = ? ORDER BY sport_id, seq",
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Self::ratings_from_rows(&rows).map_err(|e| ServiceError::Internal(e.to_string()))
    }

    async fn get_leaderboard(
        &self,
        sport: SportId,
        limit: u32,
    ) -> ServiceResult<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            "SELECT r.user_id, r.elo, COUNT(e.seq) AS games_played
             FROM sport_ratings r
             LEFT JOIN rating_events e ON e.user_id = r.user_id AND e.sport_id = r.sport_id
             WHERE r.sport_id = ?
             GROUP BY r.user_id, r.elo
             ORDER BY r.elo DESC
             LIMIT ?",
        )
        .bind(sport.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
        rows.iter()
            .map(|row| {
                Self::entry_from_row(row).map_err(|e| ServiceError::Internal(e.to_string()))
            })
            .collect::<ServiceResult<Vec<LeaderboardEntry>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_test_pool;

    async fn seed_sport(pool: &Pool<Sqlite>, name: &str) -> SportId {
        let sport = SportId::new();
        sqlx::query("INSERT INTO sports (id, name) VALUES (?, ?)")
            .bind(sport.to_string())
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
        sport
    }

    async fn seed_event(
        pool: &Pool<Sqlite>,
        user: UserId,
        sport: SportId,
        seq: i64,
        elo: i32,
        change: i32,
    ) {
        sqlx::query(
            "INSERT INTO rating_events (user_id, sport_id, seq, elo, change, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.to_string())
        .bind(sport.to_string())
        .bind(seq)
        .bind(elo)
        .bind(change)
        .bind(1_770_000_000_i64 + seq)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO sport_ratings (user_id, sport_id, elo) VALUES (?, ?, ?)
             ON CONFLICT (user_id, sport_id) DO UPDATE SET elo = excluded.elo",
        )
        .bind(user.to_string())
        .bind(sport.to_string())
        .bind(elo)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_user_ratings_group_by_sport() {
        let pool = create_test_pool().await;
        let football = seed_sport(&pool, "Football").await;
        let tennis = seed_sport(&pool, "Tennis").await;
        let user = UserId::new();

        seed_event(&pool, user, football, 1, 1240, 40).await;
        seed_event(&pool, user, football, 2, 1216, -24).await;
        seed_event(&pool, user, tennis, 1, 1280, 80).await;

        let repo = SqliteRatingRepository::new(pool);
        let ratings = repo.get_user_ratings(user).await.unwrap();
        assert_eq!(ratings.len(), 2);
        // highest current elo first
        assert_eq!(ratings[0].sport, tennis);
        assert_eq!(ratings[0].elo, 1280);
        assert_eq!(ratings[1].sport, football);
        assert_eq!(ratings[1].elo, 1216);
        let changes: Vec<i32> = ratings[1].history.iter().map(|e| e.change).collect();
        assert_eq!(changes, vec![40, -24]);
        assert_eq!(ratings[1].games_played(), 2);

        assert!(repo.get_user_ratings(UserId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leaderboard_orders_and_limits() {
        let pool = create_test_pool().await;
        let football = seed_sport(&pool, "Football").await;
        let tennis = seed_sport(&pool, "Tennis").await;
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        seed_event(&pool, a, football, 1, 1240, 40).await;
        seed_event(&pool, a, football, 2, 1272, 32).await;
        seed_event(&pool, b, football, 1, 1160, -40).await;
        seed_event(&pool, c, football, 1, 1310, 110).await;
        seed_event(&pool, b, tennis, 1, 1400, 200).await;

        let repo = SqliteRatingRepository::new(pool);
        let board = repo.get_leaderboard(football, 50).await.unwrap();
        let users: Vec<UserId> = board.iter().map(|e| e.user).collect();
        assert_eq!(users, vec![c, a, b]);
        assert_eq!(board[1].elo, 1272);
        assert_eq!(board[1].games_played, 2);

        let top_two = repo.get_leaderboard(football, 2).await.unwrap();
        assert_eq!(top_two.len(), 2);

        assert!(repo.get_leaderboard(SportId::new(), 50).await.unwrap().is_empty());
    }
}
