pub mod catalog;
pub mod games;
pub mod ratings;

use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

/// All tables live in one database file so a finish can commit the game and
/// its rating writes in a single transaction.
pub const SCHEMA_SQL: &str = "
CREATE TABLE sports (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE places (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE games (
    id TEXT PRIMARY KEY,
    sport_id TEXT NOT NULL REFERENCES sports (id),
    place_id TEXT NOT NULL REFERENCES places (id),
    creator_id TEXT NOT NULL,
    scheduled_at INTEGER NOT NULL,
    note TEXT NOT NULL DEFAULT '',
    max_participants INTEGER NOT NULL,
    is_finished INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE participations (
    game_id TEXT NOT NULL REFERENCES games (id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    winner INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL,
    PRIMARY KEY (game_id, user_id)
);
CREATE TABLE sport_ratings (
    user_id TEXT NOT NULL,
    sport_id TEXT NOT NULL REFERENCES sports (id),
    elo INTEGER NOT NULL DEFAULT 1200,
    PRIMARY KEY (user_id, sport_id)
);
CREATE TABLE rating_events (
    user_id TEXT NOT NULL,
    sport_id TEXT NOT NULL REFERENCES sports (id),
    seq INTEGER NOT NULL,
    elo INTEGER NOT NULL,
    change INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, sport_id, seq)
);
";

pub fn create_db_pool() -> Pool<Sqlite> {
    let db_path = std::env::var("MATCHDAY_DB").expect("MATCHDAY_DB env var not set");

    let conn_options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(false)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_lazy_with(conn_options)
}

#[cfg(test)]
pub(crate) async fn create_test_pool() -> Pool<Sqlite> {
    // a single connection keeps the in-memory database alive and shared
    let conn_options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(conn_options)
        .await
        .expect("Failed to create pool");
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .expect("Failed to create schema");
    pool
}
