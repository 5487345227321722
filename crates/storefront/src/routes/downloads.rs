//! Download route handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::error::Result;
use crate::middleware::CurrentUser;
use crate::models::Download;
use crate::services::DownloadService;
use crate::state::AppState;

/// `GET /downloads` - the user's entitlements, newest first.
pub async fn index(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<Download>>> {
    let downloads = DownloadService::new(state.store()).list(user.id).await?;
    Ok(Json(downloads))
}

/// `GET /download/{token}` - redeem one use of a token.
///
/// The token is the whole capability; no session is required. Unknown,
/// expired, and deactivated tokens all answer 404, an exhausted one 403
/// with its counter.
pub async fn redeem(State(state): State<AppState>, Path(token): Path<String>) -> Result<Response> {
    let (_download, product) = DownloadService::new(state.store()).redeem(&token).await?;
    let artifact = state.content().generate(&product);

    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.filename),
            ),
        ],
        artifact.bytes,
    )
        .into_response())
}
