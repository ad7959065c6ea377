pub mod media;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new().merge(media::router())
}
