//! The post aggregate: a post with its media, video link and counted
//! comments and likes.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{FeedPage, Post};
use crate::db::{self, in_transaction};
use crate::error::{AppError, AppResult};
use crate::social::media::{self, ImageOwner};
use crate::social::policy::{authorize, Action, Actor, Target};
use crate::social::users;
use crate::storage::{BlobStore, MediaKind, MediaUpload, PendingBlobs};

#[derive(Debug, Clone)]
pub struct NewPost {
    pub content: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub content: Option<String>,
    pub video_url: Option<String>,
}

/// Cursor query over posts, newest first.
#[derive(Debug, Clone, Copy)]
pub struct FeedQuery {
    /// Only posts created strictly before this instant (epoch millis).
    pub before: Option<i64>,
    pub page_size: u32,
    /// Restrict to a single author.
    pub author_id: Option<i64>,
}

/// Flat post row plus the counters computed alongside it.
struct PostRow {
    id: i64,
    author_id: i64,
    content: String,
    created_at: i64,
    updated_at: i64,
    comments_count: i64,
    likes_count: i64,
    liked: bool,
}

const POST_SELECT: &str = "
    SELECT p.id, p.author_id, p.content, p.created_at, p.updated_at,
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count,
           (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS likes_count,
           EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.author_id = ?1) AS liked
    FROM posts p";

fn post_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        comments_count: row.get(5)?,
        likes_count: row.get(6)?,
        liked: row.get(7)?,
    })
}

/// Attach author, images and video to a row.
fn hydrate(conn: &Connection, row: PostRow) -> AppResult<Post> {
    Ok(Post {
        author: users::load_author(conn, row.author_id)?,
        images: media::images_for_post(conn, row.id)?,
        video: media::video_for_post(conn, row.id)?,
        id: row.id,
        author_id: row.author_id,
        content: row.content,
        created_at: db::from_millis(row.created_at),
        updated_at: db::from_millis(row.updated_at),
        comments_count: row.comments_count,
        likes_count: row.likes_count,
        liked: row.liked,
    })
}

pub fn get_post(conn: &Connection, id: i64, viewer: Option<&Actor>) -> AppResult<Post> {
    let row = conn
        .query_row(
            &format!("{} WHERE p.id = ?2", POST_SELECT),
            params![viewer.map(|v| v.id), id],
            post_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    hydrate(conn, row)
}

/// Author of a post, or `NotFound`.
pub fn post_author(conn: &Connection, id: i64) -> AppResult<i64> {
    conn.query_row(
        "SELECT author_id FROM posts WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

/// One page of posts older than `query.before`. `has_more` reports whether
/// another, older page exists.
pub fn list_feed(
    conn: &Connection,
    viewer: Option<&Actor>,
    query: &FeedQuery,
) -> AppResult<FeedPage> {
    let page_size = query.page_size.max(1) as usize;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE p.created_at < ?2 AND (?3 IS NULL OR p.author_id = ?3)
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT ?4",
        POST_SELECT
    ))?;
    let mut rows = stmt
        .query_map(
            params![
                viewer.map(|v| v.id),
                query.before.unwrap_or(i64::MAX),
                query.author_id,
                (page_size + 1) as i64,
            ],
            post_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let has_more = rows.len() > page_size;
    rows.truncate(page_size);

    let posts = rows
        .into_iter()
        .map(|row| hydrate(conn, row))
        .collect::<AppResult<Vec<_>>>()?;
    let next_before = if has_more {
        posts.last().map(|p| p.created_at.timestamp_millis())
    } else {
        None
    };

    Ok(FeedPage {
        posts,
        has_more,
        next_before,
    })
}

/// Insert a post with its media and video link. Either every row and file
/// is kept or none are.
pub fn create_post(
    conn: &mut Connection,
    blobs: &dyn BlobStore,
    actor: &Actor,
    new: NewPost,
    uploads: &[MediaUpload],
) -> AppResult<Post> {
    let mut pending = PendingBlobs::new(blobs, MediaKind::PostImage);
    let post_id = in_transaction(conn, |tx| {
        let now = db::now().timestamp_millis();
        tx.execute(
            "INSERT INTO posts (author_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![actor.id, new.content, now],
        )?;
        let post_id = tx.last_insert_rowid();

        attach_media(tx, &mut pending, post_id, uploads)?;
        if let Some(url) = new.video_url.as_deref() {
            media::set_video(tx, post_id, url)?;
        }
        Ok(post_id)
    })?;
    pending.commit();

    tracing::info!(
        post = post_id,
        author = actor.id,
        media = uploads.len(),
        "Created post"
    );
    get_post(conn, post_id, Some(actor))
}

pub fn update_post(
    conn: &mut Connection,
    blobs: &dyn BlobStore,
    actor: &Actor,
    id: i64,
    changes: PostChanges,
    uploads: &[MediaUpload],
) -> AppResult<Post> {
    let author_id = post_author(conn, id)?;
    authorize(actor, Action::Update, Target::Post { author_id })?;

    let mut pending = PendingBlobs::new(blobs, MediaKind::PostImage);
    in_transaction(conn, |tx| {
        let now = db::now().timestamp_millis();
        tx.execute(
            "UPDATE posts SET content = COALESCE(?1, content), updated_at = ?2 WHERE id = ?3",
            params![changes.content, now, id],
        )?;

        attach_media(tx, &mut pending, id, uploads)?;
        if let Some(url) = changes.video_url.as_deref() {
            media::set_video(tx, id, url)?;
        }
        Ok(())
    })?;
    pending.commit();

    tracing::info!(post = id, media = uploads.len(), "Updated post");
    get_post(conn, id, Some(actor))
}

/// Delete a post. Images, video, comments (with replies) and likes go with
/// it through the foreign-key cascades; image files are removed afterwards.
pub fn delete_post(
    conn: &Connection,
    blobs: &dyn BlobStore,
    actor: &Actor,
    id: i64,
) -> AppResult<()> {
    let author_id = post_author(conn, id)?;
    authorize(actor, Action::Delete, Target::Post { author_id })?;

    let images = media::images_for_post(conn, id)?;
    conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;

    for image in images {
        if let Err(e) = blobs.remove(MediaKind::PostImage, &image.name) {
            tracing::warn!("Failed to remove image file {}: {}", image.name, e);
        }
    }

    tracing::info!(post = id, "Deleted post");
    Ok(())
}

fn attach_media(
    conn: &Connection,
    pending: &mut PendingBlobs<'_>,
    post_id: i64,
    uploads: &[MediaUpload],
) -> AppResult<()> {
    for upload in uploads {
        let blob = pending.store(upload)?;
        media::insert_image(conn, ImageOwner::Post(post_id), &blob, upload)?;
    }
    Ok(())
}
