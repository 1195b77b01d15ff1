use matchday_core::{PlaceId, SportId};
use matchday_server_domain::{ServiceError, ServiceResult, game::CatalogRepository};
use sqlx::{Pool, Sqlite};

pub struct SqliteCatalogRepository {
    pool: Pool<Sqlite>,
}

impl SqliteCatalogRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn sport_exists(&self, sport: SportId) -> ServiceResult<bool> {
        let row = sqlx::query("SELECT id FROM sports WHERE id = ?")
            .bind(sport.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn place_exists(&self, place: PlaceId) -> ServiceResult<bool> {
        let row = sqlx::query("SELECT id FROM places WHERE id = ?")
            .bind(place.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(row.is_some())
    }
}
