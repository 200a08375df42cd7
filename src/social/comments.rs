//! Comments on a post, nested through an optional parent.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::ser::{Serialize, Serializer};

use crate::db::{self, models::{Author, Comment}};
use crate::error::{AppError, AppResult, ValidationFailure};
use crate::social::policy::{authorize, Action, Actor, Target};
use crate::social::{posts, users};

pub const MAX_COMMENT_LENGTH: usize = 1000;

/// Deepest nesting a reply can have; roots sit at depth 0. Replies to a
/// comment at this depth are attached to its parent instead.
pub const MAX_REPLY_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i64,
    pub content: String,
    pub parent_id: Option<i64>,
}

fn check_content(content: &str) -> Result<(), ValidationFailure> {
    if content.trim().is_empty() {
        return Err(ValidationFailure::field(
            "content",
            "The content field is required.",
        ));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ValidationFailure::field(
            "content",
            format!(
                "The content may not be greater than {} characters.",
                MAX_COMMENT_LENGTH
            ),
        ));
    }
    Ok(())
}

pub fn create_comment(conn: &Connection, actor: &Actor, new: NewComment) -> AppResult<Comment> {
    check_content(&new.content).map_err(AppError::Validation)?;
    posts::post_author(conn, new.post_id)?;

    // A foreign key cannot say "on the same post", so check it here.
    let parent_id = match new.parent_id {
        Some(parent_id) => Some(reply_target(conn, new.post_id, parent_id)?),
        None => None,
    };

    let created_at = db::now();
    conn.execute(
        "INSERT INTO comments (author_id, post_id, parent_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            actor.id,
            new.post_id,
            parent_id,
            new.content,
            created_at.timestamp_millis()
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(comment = id, post = new.post_id, user = actor.id, "Created comment");

    Ok(Comment {
        id,
        author_id: actor.id,
        post_id: new.post_id,
        parent_id,
        content: new.content,
        created_at,
        author: users::load_author(conn, actor.id)?,
    })
}

/// The comment a reply to `parent_id` hangs under: the parent itself, or
/// its ancestor at `MAX_REPLY_DEPTH - 1` when the parent is already at the
/// depth limit.
fn reply_target(conn: &Connection, post_id: i64, parent_id: i64) -> AppResult<i64> {
    let parent_post: Option<i64> = conn
        .query_row(
            "SELECT post_id FROM comments WHERE id = ?1",
            params![parent_id],
            |row| row.get(0),
        )
        .optional()?;
    match parent_post {
        None => {
            return Err(AppError::validation(
                "parent_id",
                "The selected parent id is invalid.",
            ))
        }
        Some(other) if other != post_id => {
            return Err(AppError::validation(
                "parent_id",
                "The parent comment belongs to a different post.",
            ))
        }
        Some(_) => {}
    }

    // Parent first, root last
    let mut stmt = conn.prepare(
        "WITH RECURSIVE chain(id, parent_id, depth) AS (
             SELECT id, parent_id, 0 FROM comments WHERE id = ?1
             UNION ALL
             SELECT c.id, c.parent_id, chain.depth + 1
             FROM comments c JOIN chain ON c.id = chain.parent_id
         )
         SELECT id FROM chain ORDER BY depth",
    )?;
    let chain = stmt
        .query_map(params![parent_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let parent_depth = chain.len().saturating_sub(1);
    if parent_depth < MAX_REPLY_DEPTH {
        return Ok(parent_id);
    }
    Ok(chain[parent_depth + 1 - MAX_REPLY_DEPTH])
}

/// Delete a comment and, through the parent cascade, every reply under it.
pub fn delete_comment(conn: &Connection, actor: &Actor, id: i64) -> AppResult<()> {
    let author_id: i64 = conn
        .query_row(
            "SELECT author_id FROM comments WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(AppError::NotFound)?;
    authorize(actor, Action::Delete, Target::Comment { author_id })?;

    conn.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
    tracing::info!(comment = id, "Deleted comment");
    Ok(())
}

pub fn list_comments(conn: &Connection, post_id: i64) -> AppResult<CommentThread> {
    posts::post_author(conn, post_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, author_id, post_id, parent_id, content, created_at
         FROM comments
         WHERE post_id = ?1
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![post_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut authors: HashMap<i64, Author> = HashMap::new();
    let mut comments = Vec::with_capacity(rows.len());
    for (id, author_id, post_id, parent_id, content, created_at) in rows {
        let author = match authors.get(&author_id) {
            Some(author) => author.clone(),
            None => {
                let author = users::load_author(conn, author_id)?;
                authors.insert(author_id, author.clone());
                author
            }
        };
        comments.push(Comment {
            id,
            author_id,
            post_id,
            parent_id,
            content,
            created_at: db::from_millis(created_at),
            author,
        });
    }

    let thread = CommentThread::new(comments);
    tracing::debug!(post = post_id, comments = thread.len(), "Loaded comment thread");
    Ok(thread)
}

/// Comments of one post arranged as a forest. Comments live in a flat
/// arena; parent links are resolved through an id index instead of owned
/// child pointers. Nesting never exceeds `MAX_REPLY_DEPTH`.
#[derive(Debug, Clone)]
pub struct CommentThread {
    comments: Vec<Comment>,
    roots: Vec<usize>,
    children: HashMap<usize, Vec<usize>>,
}

impl CommentThread {
    /// Comments must be in display order. A comment whose parent is not in
    /// the set is treated as a root; one nested deeper than
    /// `MAX_REPLY_DEPTH` is attached to its ancestor one level above the
    /// limit.
    pub fn new(comments: Vec<Comment>) -> Self {
        let positions: HashMap<i64, usize> = comments
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.id, idx))
            .collect();

        let mut roots = Vec::new();
        let mut stored: HashMap<usize, Vec<usize>> = HashMap::new();
        for (idx, comment) in comments.iter().enumerate() {
            match comment.parent_id.and_then(|p| positions.get(&p)) {
                Some(&parent) => stored.entry(parent).or_default().push(idx),
                None => roots.push(idx),
            }
        }

        // Walk the stored links with an explicit stack, re-parenting
        // anything past the depth limit. `anchor` is the ancestor at
        // MAX_REPLY_DEPTH - 1 once one exists.
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut stack: Vec<(usize, usize, Option<usize>)> =
            roots.iter().map(|&idx| (idx, 0, None)).collect();
        while let Some((idx, depth, anchor)) = stack.pop() {
            let anchor = if depth + 1 == MAX_REPLY_DEPTH {
                Some(idx)
            } else {
                anchor
            };
            for &child in stored.get(&idx).into_iter().flatten() {
                let (parent, child_depth) = match anchor {
                    Some(a) if depth >= MAX_REPLY_DEPTH => (a, MAX_REPLY_DEPTH),
                    _ => (idx, depth + 1),
                };
                children.entry(parent).or_default().push(child);
                stack.push((child, child_depth, anchor));
            }
        }
        for kids in children.values_mut() {
            kids.sort_unstable();
        }

        Self {
            comments,
            roots,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    fn node(&self, idx: usize) -> CommentNode<'_> {
        CommentNode {
            comment: &self.comments[idx],
            replies: self
                .children
                .get(&idx)
                .map(|kids| kids.iter().map(|&k| self.node(k)).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(serde::Serialize)]
struct CommentNode<'a> {
    #[serde(flatten)]
    comment: &'a Comment,
    replies: Vec<CommentNode<'a>>,
}

impl Serialize for CommentThread {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let nodes: Vec<CommentNode<'_>> = self.roots.iter().map(|&idx| self.node(idx)).collect();
        nodes.serialize(serializer)
    }
}
