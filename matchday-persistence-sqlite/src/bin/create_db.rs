use matchday_persistence_sqlite::SCHEMA_SQL;
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let db_path = std::env::var("MATCHDAY_DB").expect("MATCHDAY_DB env var not set");

    let parent = std::path::Path::new(&db_path)
        .parent()
        .expect("Failed to get parent directory of DB path");
    if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory for DB");
        println!("Created parent directory for DB at {}", parent.display());
    }
    if std::path::Path::new(&db_path).exists() {
        std::fs::remove_file(&db_path).expect("Failed to remove existing DB");
        println!("Removed existing DB at {}", db_path);
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .expect("Failed to create pool");

    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .expect("Failed to create tables");
    println!("Created new DB at {}", db_path);

    for name in ["Football", "Basketball", "Tennis", "Volleyball"] {
        seed_row(&pool, "sports", name).await;
    }
    for name in ["Central Park", "Riverside Courts", "South Side Gym"] {
        seed_row(&pool, "places", name).await;
    }
}

async fn seed_row(pool: &Pool<Sqlite>, table: &str, name: &str) {
    let id = uuid::Uuid::new_v4();
    sqlx::query(&format!("INSERT INTO {} (id, name) VALUES (?, ?)", table))
        .bind(id.to_string())
        .bind(name)
        .execute(pool)
        .await
        .expect("Failed to seed row");
    println!("Seeded {} [{}] with id {}", &table[..table.len() - 1], name, id);
}
