use std::collections::HashSet;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use matchday_core::{
    GameId, PlaceId, SportId, UserId,
    game::{Game, GamePhase},
};
use matchday_server_domain::{
    ServiceError,
    game::{CreateGameRequest, GameQuery, SortOrder},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{app::ApiError, auth::AuthUser, http::AppState};

pub(crate) fn parse_id(value: &str, what: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(value.trim())
        .map_err(|e| ServiceError::BadRequest(format!("Invalid {} ID: {}", what, e)))
}

fn parse_datetime(value: i64) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::from_timestamp(value, 0)
        .ok_or_else(|| ServiceError::BadRequest("Invalid timestamp".to_string()))
}

#[derive(serde::Deserialize, Validate)]
pub struct CreateGameBody {
    pub sport_id: String,
    pub place_id: String,
    pub scheduled_at: i64,
    #[serde(default)]
    pub note: String,
    #[validate(range(min = 2, message = "a game needs room for at least 2 players"))]
    pub max_participants: u32,
}

#[derive(serde::Deserialize)]
pub struct FinishGameBody {
    pub winner_ids: Vec<String>,
}

#[derive(serde::Serialize)]
pub struct ParticipantResponse {
    pub user_id: String,
    pub winner: bool,
}

#[derive(serde::Serialize)]
pub struct GameResponse {
    pub id: String,
    pub sport_id: String,
    pub place_id: String,
    pub creator_id: String,
    pub scheduled_at: i64,
    pub note: String,
    pub max_participants: u32,
    pub phase: String,
    pub is_finished: bool,
    pub participants: Vec<ParticipantResponse>,
}

impl GameResponse {
    fn from_game(game: &Game) -> Self {
        let phase = match game.phase() {
            GamePhase::Open => "open",
            GamePhase::Full => "full",
            GamePhase::Finished => "finished",
        };
        Self {
            id: game.id.to_string(),
            sport_id: game.sport.to_string(),
            place_id: game.place.to_string(),
            creator_id: game.creator.to_string(),
            scheduled_at: game.scheduled_at.timestamp(),
            note: game.note.clone(),
            max_participants: game.max_participants,
            phase: phase.to_string(),
            is_finished: game.is_finished,
            participants: game
                .participants
                .iter()
                .map(|p| ParticipantResponse {
                    user_id: p.user.to_string(),
                    winner: p.winner,
                })
                .collect(),
        }
    }
}

#[axum::debug_handler]
pub async fn create_game(
    State(app_state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateGameBody>,
) -> Result<(StatusCode, Json<GameResponse>), ApiError> {
    body.validate()
        .map_err(|e| ServiceError::BadRequest(format!("Invalid game settings: {}", e)))?;
    let request = CreateGameRequest {
        sport: SportId(parse_id(&body.sport_id, "sport")?),
        place: PlaceId(parse_id(&body.place_id, "place")?),
        scheduled_at: parse_datetime(body.scheduled_at)?,
        note: body.note,
        max_participants: body.max_participants,
    };
    let game = app_state.games.create_game(user, request).await?;
    Ok((StatusCode::CREATED, Json(GameResponse::from_game(&game))))
}

#[derive(serde::Deserialize)]
pub struct GameListParams {
    sport: Option<String>,
    place: Option<String>,
    creator: Option<String>,
    participant: Option<String>,
    is_finished: Option<bool>,
    starts_after: Option<i64>,
    starts_before: Option<i64>,
    order: Option<String>,
    limit: Option<u32>,
    #[serde(default)]
    count: bool,
}

pub async fn get_all(
    State(app_state): State<AppState>,
    Query(filter): Query<GameListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut query = GameQuery::default();
    if let Some(sport) = &filter.sport {
        query.sport = Some(SportId(parse_id(sport, "sport")?));
    }
    if let Some(place) = &filter.place {
        query.place = Some(PlaceId(parse_id(place, "place")?));
    }
    if let Some(creator) = &filter.creator {
        query.creator = Some(UserId(parse_id(creator, "creator")?));
    }
    if let Some(participant) = &filter.participant {
        query.participant = Some(UserId(parse_id(participant, "participant")?));
    }
    query.is_finished = filter.is_finished;
    if let Some(after) = filter.starts_after {
        query.starts_after = Some(parse_datetime(after)?);
    }
    if let Some(before) = filter.starts_before {
        query.starts_before = Some(parse_datetime(before)?);
    }
    query.sort = filter
        .order
        .as_ref()
        .and_then(|order_str| match order_str.trim().to_lowercase().as_str() {
            "asc" => Some(Ok(SortOrder::Ascending)),
            "desc" => Some(Ok(SortOrder::Descending)),
            "" => None,
            _ => Some(Err(ServiceError::BadRequest(
                "Invalid sort order".to_string(),
            ))),
        })
        .transpose()?;

    if filter.count {
        let count = app_state.games.count_games(query).await?;
        return Ok(Json(json!({ "count": count })));
    }

    query.limit = Some(filter.limit.filter(|&l| l > 0).unwrap_or(50));
    let games = app_state.games.query_games(query).await?;
    let games: Vec<GameResponse> = games.iter().map(GameResponse::from_game).collect();
    let value = serde_json::to_value(games)
        .map_err(|e| ServiceError::Internal(format!("Failed to serialize games: {}", e)))?;
    Ok(Json(value))
}

pub async fn get_by_id(
    Path(game_id): Path<String>,
    State(app_state): State<AppState>,
) -> Result<Json<GameResponse>, ApiError> {
    let id = GameId(parse_id(&game_id, "game")?);
    let game = app_state.games.get_game(id).await?;
    Ok(Json(GameResponse::from_game(&game)))
}

pub async fn join_game(
    Path(game_id): Path<String>,
    State(app_state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<GameResponse>, ApiError> {
    let id = GameId(parse_id(&game_id, "game")?);
    let game = app_state.games.join_game(id, user).await?;
    Ok(Json(GameResponse::from_game(&game)))
}

pub async fn finish_game(
    Path(game_id): Path<String>,
    State(app_state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<FinishGameBody>,
) -> Result<Json<GameResponse>, ApiError> {
    let id = GameId(parse_id(&game_id, "game")?);
    let mut winner_ids = HashSet::new();
    for raw in &body.winner_ids {
        winner_ids.insert(UserId(parse_id(raw, "winner")?));
    }
    let game = app_state.games.finish_game(id, user, winner_ids).await?;
    Ok(Json(GameResponse::from_game(&game)))
}

pub async fn delete_game(
    Path(game_id): Path<String>,
    State(app_state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, ApiError> {
    let id = GameId(parse_id(&game_id, "game")?);
    app_state.games.delete_game(id, user).await?;
    Ok(StatusCode::OK)
}
