use axum::{
    Json,
    extract::{Path, Query, State},
};
use matchday_core::{SportId, UserId, rating::SportRating};
use matchday_server_domain::ServiceError;

use crate::{app::ApiError, http::AppState, http::games::parse_id};

#[derive(serde::Serialize)]
pub struct RatingEventResponse {
    pub elo: i32,
    pub change: i32,
    pub at: i64,
}

#[derive(serde::Serialize)]
pub struct SportRatingResponse {
    pub sport_id: String,
    pub elo: i32,
    pub games_played: u32,
    pub history: Vec<RatingEventResponse>,
}

impl SportRatingResponse {
    fn from_rating(rating: &SportRating) -> Self {
        Self {
            sport_id: rating.sport.to_string(),
            elo: rating.elo,
            games_played: rating.games_played(),
            history: rating
                .history
                .iter()
                .map(|event| RatingEventResponse {
                    elo: event.elo,
                    change: event.change,
                    at: event.at.timestamp(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
pub struct LeaderboardEntryResponse {
    pub user_id: String,
    pub elo: i32,
    pub games_played: u32,
}

pub async fn get_by_user(
    Path(user): Path<String>,
    State(app_state): State<AppState>,
) -> Result<Json<Vec<SportRatingResponse>>, ApiError> {
    let user = UserId(parse_id(&user, "user")?);
    let ratings = app_state.ratings.get_user_ratings(user).await?;
    Ok(Json(
        ratings.iter().map(SportRatingResponse::from_rating).collect(),
    ))
}

#[derive(serde::Deserialize)]
pub struct LeaderboardParams {
    sport: Option<String>,
    limit: Option<u32>,
}

pub async fn get_leaderboard(
    State(app_state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<Vec<LeaderboardEntryResponse>>, ApiError> {
    let sport = params
        .sport
        .as_ref()
        .ok_or_else(|| ServiceError::BadRequest("Missing sport parameter".to_string()))?;
    let sport = SportId(parse_id(sport, "sport")?);
    let limit = params.limit.filter(|&l| l > 0).unwrap_or(50);
    let entries = app_state.ratings.get_leaderboard(sport, limit).await?;
    Ok(Json(
        entries
            .iter()
            .map(|entry| LeaderboardEntryResponse {
                user_id: entry.user.to_string(),
                elo: entry.elo,
                games_played: entry.games_played,
            })
            .collect(),
    ))
}
