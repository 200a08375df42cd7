use axum::extract::{Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::error::{AppResult, ValidationFailure};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::requests::{ProfileForm, AVATAR_RULES};
use crate::routes::form::{FeedParams, FormData};
use crate::social::posts::{self, FeedQuery};
use crate::social::users::{self, ProfileChanges};
use crate::social::Actor;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me).put(update_me).post(update_me))
        .route("/me/posts", get(my_posts))
        .route("/users/{id}", get(show))
        .route("/users/{id}/posts", get(user_posts))
}

/// GET /me - the caller's profile with their images
async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let profile = users::profile(&conn, user.id)?;
    Ok(Json(json!({ "user": profile })))
}

/// PUT|POST /me - change name or bio, upload a new avatar
async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = FormData::read(multipart).await?;
    let fields = ProfileForm {
        name: form.raw_text("name"),
        bio: form.raw_text("bio"),
    };
    let avatar = form.take_files("avatar");

    let mut failure = ValidationFailure::default();
    if let Err(e) = validator::Validate::validate(&fields) {
        failure.merge(e.into());
    }
    failure.merge(AVATAR_RULES.check("avatar", &avatar));
    failure.into_result()?;

    let mut conn = state.db.get()?;
    let profile = users::update_profile(
        &mut conn,
        state.blobs.as_ref(),
        &user.actor(),
        ProfileChanges {
            name: fields.name,
            bio: fields.bio,
        },
        avatar.first(),
    )?;
    Ok(Json(json!({ "user": profile })))
}

/// GET /users/{id}
async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let profile = users::profile(&conn, id)?;
    Ok(Json(json!({ "user": profile })))
}

/// GET /me/posts
async fn my_posts(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<FeedParams>,
) -> AppResult<impl IntoResponse> {
    author_feed(&state, user.id, Some(user.actor()), &params)
}

/// GET /users/{id}/posts
async fn user_posts(
    State(state): State<AppState>,
    viewer: MaybeUser,
    Path(id): Path<i64>,
    Query(params): Query<FeedParams>,
) -> AppResult<impl IntoResponse> {
    author_feed(&state, id, viewer.actor(), &params)
}

fn author_feed(
    state: &AppState,
    author_id: i64,
    viewer: Option<Actor>,
    params: &FeedParams,
) -> AppResult<impl IntoResponse> {
    let query = FeedQuery {
        before: params.before_millis()?,
        page_size: state.config.feed.page_size(params.limit()?),
        author_id: Some(author_id),
    };
    let conn = state.db.get()?;
    users::find_user(&conn, author_id)?;
    let page = posts::list_feed(&conn, viewer.as_ref(), &query)?;
    Ok(Json(page))
}
