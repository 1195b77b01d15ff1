use axum::{
    Router,
    routing::{get, patch, post},
};
use log::info;
use matchday_server_domain::{game::ArcGameLifecycleService, rating::ArcRatingRepository};

mod games;
mod ratings;

#[derive(Clone)]
pub struct AppState {
    pub games: ArcGameLifecycleService,
    pub ratings: ArcRatingRepository,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .route("/games", post(games::create_game).get(games::get_all))
                .route("/games/{id}", get(games::get_by_id).delete(games::delete_game))
                .route("/games/{id}/join", post(games::join_game))
                .route("/games/{id}/finish", patch(games::finish_game))
                .route("/ratings/leaderboard", get(ratings::get_leaderboard))
                .route("/ratings/{user}", get(ratings::get_by_user)),
        )
        .with_state(state)
}

pub async fn run(
    state: AppState,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) {
    let router = build_router(state);

    let port = std::env::var("MATCHDAY_HTTP_PORT")
        .expect("MATCHDAY_HTTP_PORT must be set")
        .parse::<u16>()
        .expect("MATCHDAY_HTTP_PORT must be a valid u16");

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .unwrap();

    info!("API server listening on port {}", port);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .unwrap();

    info!("HTTP API shut down gracefully");
}
