//! Row fixtures shared by the aggregate tests.

use rusqlite::{params, Connection};

use super::policy::Actor;

pub fn insert_user(conn: &Connection, name: &str) -> i64 {
    conn.execute(
        "INSERT INTO users (name, email, password_hash, created_at, updated_at)
         VALUES (?1, ?2, 'not-a-hash', 0, 0)",
        params![name, format!("{}@example.com", name)],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn insert_post_at(conn: &Connection, author_id: i64, created_at: i64) -> i64 {
    conn.execute(
        "INSERT INTO posts (author_id, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![author_id, format!("post at {}", created_at), created_at],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

pub fn actor(id: i64) -> Actor {
    Actor { id }
}
