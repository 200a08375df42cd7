use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::requests::{self, CreateCommentRequest};
use crate::social::comments::{self, NewComment};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/comments", get(index))
        .route("/comments", post(create))
        .route("/comments/{id}", delete(destroy))
}

/// GET /posts/{id}/comments - the thread as nested replies
async fn index(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let thread = comments::list_comments(&conn, id)?;
    Ok(Json(json!({ "comments": thread })))
}

/// POST /comments
async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(mut req): Json<CreateCommentRequest>,
) -> AppResult<impl IntoResponse> {
    req.content = requests::trimmed(req.content);
    requests::validate(&req)?;

    let conn = state.db.get()?;
    let comment = comments::create_comment(
        &conn,
        &user.actor(),
        NewComment {
            post_id: req.post_id,
            content: req.content,
            parent_id: req.parent_id,
        },
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "comment": comment }))))
}

/// DELETE /comments/{id} - removes the comment and its replies
async fn destroy(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    comments::delete_comment(&conn, &user.actor(), id)?;
    Ok(Json(json!({ "message": "Comment deleted." })))
}
