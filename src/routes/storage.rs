use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::AppResult;
use crate::state::AppState;
use crate::storage::resolve_under;

/// GET /storage/{*path} - serve an uploaded file
pub async fn serve(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Response> {
    let Some(file) = resolve_under(&state.config.uploads_path(), &path) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if !tokio::fs::metadata(&file).await.map(|m| m.is_file()).unwrap_or(false) {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    match tokio::fs::read(&file).await {
        Ok(data) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    // Stored names are never reused
                    (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
                ],
                data,
            )
                .into_response())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(StatusCode::NOT_FOUND.into_response())
        }
        Err(e) => Err(e.into()),
    }
}
