use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{self, models::Image, models::Video};
use crate::error::AppResult;
use crate::storage::{MediaUpload, StoredBlob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOwner {
    Post(i64),
    User(i64),
}

const IMAGE_COLUMNS: &str = "id, post_id, user_id, path, name, mime, size, created_at";

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        path: row.get(3)?,
        name: row.get(4)?,
        mime: row.get(5)?,
        size: row.get(6)?,
        created_at: db::from_millis(row.get(7)?),
    })
}

/// Record a stored blob. Image rows are never updated afterwards.
pub fn insert_image(
    conn: &Connection,
    owner: ImageOwner,
    blob: &StoredBlob,
    upload: &MediaUpload,
) -> AppResult<Image> {
    let (post_id, user_id) = match owner {
        ImageOwner::Post(id) => (Some(id), None),
        ImageOwner::User(id) => (None, Some(id)),
    };
    let created_at = db::now();

    conn.execute(
        "INSERT INTO images (post_id, user_id, path, name, mime, size, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            post_id,
            user_id,
            blob.path,
            blob.name,
            upload.mime,
            upload.size() as i64,
            created_at.timestamp_millis(),
        ],
    )?;

    Ok(Image {
        id: conn.last_insert_rowid(),
        post_id,
        user_id,
        path: blob.path.clone(),
        name: blob.name.clone(),
        mime: upload.mime.clone(),
        size: upload.size() as i64,
        created_at,
    })
}

pub fn images_for_post(conn: &Connection, post_id: i64) -> AppResult<Vec<Image>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM images WHERE post_id = ?1 ORDER BY id ASC",
        IMAGE_COLUMNS
    ))?;
    let images = stmt
        .query_map(params![post_id], image_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

pub fn images_for_user(conn: &Connection, user_id: i64) -> AppResult<Vec<Image>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM images WHERE user_id = ?1 ORDER BY id DESC",
        IMAGE_COLUMNS
    ))?;
    let images = stmt
        .query_map(params![user_id], image_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

/// The avatar is the most recently uploaded image owned by the user.
pub fn avatar_for(conn: &Connection, user_id: i64) -> AppResult<Option<Image>> {
    let avatar = conn
        .query_row(
            &format!(
                "SELECT {} FROM images WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                IMAGE_COLUMNS
            ),
            params![user_id],
            image_from_row,
        )
        .optional()?;
    Ok(avatar)
}

pub fn set_video(conn: &Connection, post_id: i64, url: &str) -> AppResult<Video> {
    conn.execute(
        "INSERT INTO videos (post_id, url) VALUES (?1, ?2)
         ON CONFLICT(post_id) DO UPDATE SET url = excluded.url",
        params![post_id, url],
    )?;
    let video = conn.query_row(
        "SELECT id, post_id, url FROM videos WHERE post_id = ?1",
        params![post_id],
        |row| {
            Ok(Video {
                id: row.get(0)?,
                post_id: row.get(1)?,
                url: row.get(2)?,
            })
        },
    )?;
    Ok(video)
}

pub fn video_for_post(conn: &Connection, post_id: i64) -> AppResult<Option<Video>> {
    let video = conn
        .query_row(
            "SELECT id, post_id, url FROM videos WHERE post_id = ?1",
            params![post_id],
            |row| {
                Ok(Video {
                    id: row.get(0)?,
                    post_id: row.get(1)?,
                    url: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(video)
}
