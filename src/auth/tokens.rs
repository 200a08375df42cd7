use chrono::Duration;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db;
use crate::error::AppResult;

/// Issue a bearer token for a user, valid for `hours`.
pub fn issue_token(conn: &Connection, user_id: i64, name: &str, hours: u64) -> AppResult<String> {
    let token = generate_token();
    let now = db::now();
    let expires_at = now + Duration::hours(hours as i64);

    conn.execute(
        "INSERT INTO api_tokens (user_id, name, token, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            name,
            token,
            expires_at.timestamp_millis(),
            now.timestamp_millis()
        ],
    )?;
    tracing::info!(user = user_id, client = name, "Issued API token");

    Ok(token)
}

/// The user a live token belongs to. Unknown and expired tokens give `None`.
pub fn user_for_token(conn: &Connection, token: &str) -> AppResult<Option<i64>> {
    let user_id = conn
        .query_row(
            "SELECT user_id FROM api_tokens WHERE token = ?1 AND expires_at > ?2",
            params![token, db::now().timestamp_millis()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id)
}

pub fn revoke_token(conn: &Connection, token: &str) -> AppResult<()> {
    conn.execute("DELETE FROM api_tokens WHERE token = ?1", params![token])?;
    Ok(())
}

/// Cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
