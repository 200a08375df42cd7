use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::db::models::{Author, Profile, User};
use crate::db::{self, in_transaction};
use crate::error::{AppError, AppResult};
use crate::social::media::{self, ImageOwner};
use crate::social::policy::Actor;
use crate::storage::{BlobStore, MediaKind, MediaUpload, PendingBlobs};

const USER_COLUMNS: &str = "id, name, email, bio, password_hash, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        bio: row.get(3)?,
        password_hash: row.get(4)?,
        avatar: None,
        created_at: db::from_millis(row.get(5)?),
        updated_at: db::from_millis(row.get(6)?),
    })
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub bio: Option<String>,
}

pub fn create_user(conn: &Connection, new: &NewUser) -> AppResult<User> {
    let now = db::now().timestamp_millis();
    let inserted = conn.execute(
        "INSERT INTO users (name, email, password_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![new.name, new.email, new.password_hash, now],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(AppError::validation(
                "email",
                "The email has already been taken.",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    let id = conn.last_insert_rowid();
    tracing::info!(user = id, "Registered user");
    find_user(conn, id)
}

pub fn find_user(conn: &Connection, id: i64) -> AppResult<User> {
    let mut user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            user_from_row,
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    user.avatar = media::avatar_for(conn, id)?;
    Ok(user)
}

pub fn find_by_email(conn: &Connection, email: &str) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            params![email],
            user_from_row,
        )
        .optional()?;

    match user {
        Some(mut user) => {
            user.avatar = media::avatar_for(conn, user.id)?;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}

pub fn profile(conn: &Connection, id: i64) -> AppResult<Profile> {
    let user = find_user(conn, id)?;
    let images = media::images_for_user(conn, id)?;
    Ok(Profile { user, images })
}

pub fn load_author(conn: &Connection, id: i64) -> AppResult<Author> {
    let name: String = conn
        .query_row("SELECT name FROM users WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(AppError::NotFound)?;
    Ok(Author {
        id,
        name,
        avatar: media::avatar_for(conn, id)?,
    })
}

/// Apply profile field changes and store a new avatar in one transaction.
pub fn update_profile(
    conn: &mut Connection,
    blobs: &dyn BlobStore,
    actor: &Actor,
    changes: ProfileChanges,
    avatar: Option<&MediaUpload>,
) -> AppResult<Profile> {
    // Resolves NotFound before anything is written
    find_user(conn, actor.id)?;

    let mut pending = PendingBlobs::new(blobs, MediaKind::Avatar);
    in_transaction(conn, |tx| {
        if let Some(upload) = avatar {
            let blob = pending.store(upload)?;
            media::insert_image(tx, ImageOwner::User(actor.id), &blob, upload)?;
        }

        let now = db::now().timestamp_millis();
        tx.execute(
            "UPDATE users SET
                name = COALESCE(?1, name),
                bio = COALESCE(?2, bio),
                updated_at = ?3
             WHERE id = ?4",
            params![changes.name, changes.bio, now, actor.id],
        )?;
        Ok(())
    })?;
    pending.commit();

    tracing::info!(user = actor.id, avatar = avatar.is_some(), "Updated profile");
    profile(conn, actor.id)
}
