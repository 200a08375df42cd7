use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{self, models::Like};
use crate::error::{AppError, AppResult};
use crate::social::policy::{authorize, Action, Actor, Target};
use crate::social::{posts, users};

const LIKE_COLUMNS: &str = "id, author_id, post_id, created_at";

fn like_from_row(row: &Row<'_>) -> rusqlite::Result<Like> {
    Ok(Like {
        id: row.get(0)?,
        author_id: row.get(1)?,
        post_id: row.get(2)?,
        created_at: db::from_millis(row.get(3)?),
        author: None,
    })
}

pub fn find_like(conn: &Connection, author_id: i64, post_id: i64) -> AppResult<Option<Like>> {
    let like = conn
        .query_row(
            &format!(
                "SELECT {} FROM likes WHERE author_id = ?1 AND post_id = ?2",
                LIKE_COLUMNS
            ),
            params![author_id, post_id],
            like_from_row,
        )
        .optional()?;
    Ok(like)
}

/// Like a post. Liking twice returns the existing like; the unique
/// constraint absorbs concurrent duplicates.
pub fn like(conn: &Connection, actor: &Actor, post_id: i64) -> AppResult<Like> {
    posts::post_author(conn, post_id)?;

    let inserted = conn.execute(
        "INSERT INTO likes (author_id, post_id, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(author_id, post_id) DO NOTHING",
        params![actor.id, post_id, db::now().timestamp_millis()],
    )?;
    if inserted > 0 {
        tracing::info!(post = post_id, user = actor.id, "Liked post");
    }

    // The post may have been deleted between the insert and this read.
    find_like(conn, actor.id, post_id)?.ok_or(AppError::NotFound)
}

/// Remove the actor's like on a post.
pub fn unlike(conn: &Connection, actor: &Actor, post_id: i64) -> AppResult<()> {
    let like = find_like(conn, actor.id, post_id)?.ok_or(AppError::NotFound)?;
    delete_like(conn, actor, &like)
}

/// Remove a like by id. Someone else's like is `Forbidden` and stays put.
pub fn remove_like(conn: &Connection, actor: &Actor, like_id: i64) -> AppResult<()> {
    let like = conn
        .query_row(
            &format!("SELECT {} FROM likes WHERE id = ?1", LIKE_COLUMNS),
            params![like_id],
            like_from_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    delete_like(conn, actor, &like)
}

fn delete_like(conn: &Connection, actor: &Actor, like: &Like) -> AppResult<()> {
    authorize(
        actor,
        Action::Unlike,
        Target::Like {
            author_id: like.author_id,
        },
    )?;
    conn.execute("DELETE FROM likes WHERE id = ?1", params![like.id])?;
    tracing::info!(post = like.post_id, user = actor.id, "Unliked post");
    Ok(())
}

pub fn list_likes(conn: &Connection, post_id: i64) -> AppResult<Vec<Like>> {
    posts::post_author(conn, post_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM likes WHERE post_id = ?1 ORDER BY created_at DESC, id DESC",
        LIKE_COLUMNS
    ))?;
    let mut likes = stmt
        .query_map(params![post_id], like_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for like in &mut likes {
        like.author = Some(users::load_author(conn, like.author_id)?);
    }
    Ok(likes)
}
