use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::{AppResult, ValidationFailure};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::requests::{PostForm, IMAGE_RULES};
use crate::routes::form::{FeedParams, FormData};
use crate::social::likes;
use crate::social::posts::{self, FeedQuery, NewPost, PostChanges};
use crate::state::AppState;
use crate::storage::MediaUpload;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(feed).post(create))
        .route("/posts/{id}", get(show).put(update).post(update).delete(destroy))
        .route("/posts/{id}/likes", get(likes_index))
        .route("/posts/{id}/like", post(like).delete(unlike))
        .route("/likes/{id}", delete(remove_like))
}

/// Text fields and images of a post form, validated together.
fn read_post_form(
    form: &mut FormData,
    content_required: bool,
) -> AppResult<(PostForm, Vec<MediaUpload>)> {
    let fields = PostForm {
        content: form.raw_text("content"),
        video_url: form.text("video_url"),
    };
    let uploads = form.take_files("media");

    let mut failure = ValidationFailure::default();
    if content_required && fields.content.is_none() {
        failure.add("content", "The content field is required.");
    }
    if let Err(e) = validator::Validate::validate(&fields) {
        failure.merge(e.into());
    }
    failure.merge(IMAGE_RULES.check("media", &uploads));
    failure.into_result()?;

    Ok((fields, uploads))
}

/// GET /posts - newest posts first
async fn feed(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Query(params): Query<FeedParams>,
) -> AppResult<impl IntoResponse> {
    let query = FeedQuery {
        before: params.before_millis()?,
        page_size: state.config.feed.page_size(params.limit()?),
        author_id: None,
    };
    let conn = state.db.get()?;
    let page = posts::list_feed(&conn, viewer.actor().as_ref(), &query)?;
    Ok(Json(page))
}

/// POST /posts - publish a post with optional images and video link
async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = FormData::read(multipart).await?;
    let (fields, uploads) = read_post_form(&mut form, true)?;

    let mut conn = state.db.get()?;
    let post = posts::create_post(
        &mut conn,
        state.blobs.as_ref(),
        &user.actor(),
        NewPost {
            content: fields.content.unwrap_or_default(),
            video_url: fields.video_url,
        },
        &uploads,
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "post": post }))))
}

/// GET /posts/{id}
async fn show(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let post = posts::get_post(&conn, id, viewer.actor().as_ref())?;
    Ok(Json(json!({ "post": post })))
}

/// PUT|POST /posts/{id} - edit content, replace the video link, add images
async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = FormData::read(multipart).await?;
    let (fields, uploads) = read_post_form(&mut form, false)?;

    let mut conn = state.db.get()?;
    let post = posts::update_post(
        &mut conn,
        state.blobs.as_ref(),
        &user.actor(),
        id,
        PostChanges {
            content: fields.content,
            video_url: fields.video_url,
        },
        &uploads,
    )?;
    Ok(Json(json!({ "post": post })))
}

/// DELETE /posts/{id}
async fn destroy(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    posts::delete_post(&conn, state.blobs.as_ref(), &user.actor(), id)?;
    Ok(Json(json!({ "message": "Post deleted." })))
}

/// GET /posts/{id}/likes
async fn likes_index(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let likes = likes::list_likes(&conn, id)?;
    Ok(Json(json!({ "likes": likes })))
}

/// POST /posts/{id}/like - idempotent
async fn like(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let like = likes::like(&conn, &user.actor(), id)?;
    Ok(Json(json!({ "like": like })))
}

/// DELETE /posts/{id}/like - remove the caller's own like
async fn unlike(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    likes::unlike(&conn, &user.actor(), id)?;
    Ok(Json(json!({ "message": "Post unliked." })))
}

/// DELETE /likes/{id}
async fn remove_like(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    likes::remove_like(&conn, &user.actor(), id)?;
    Ok(Json(json!({ "message": "Like removed." })))
}
