//! Ownership rules checked before every mutation.

use crate::error::{AppError, AppResult};

/// The authenticated user an operation runs on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Update,
    Delete,
    Unlike,
}

/// The entity an action is aimed at, reduced to what the rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Post { author_id: i64 },
    Comment { author_id: i64 },
    Like { author_id: i64 },
}

pub fn can_perform(actor: &Actor, action: Action, target: Target) -> bool {
    match (action, target) {
        (Action::Update | Action::Delete, Target::Post { author_id }) => actor.id == author_id,
        (Action::Delete, Target::Comment { author_id }) => actor.id == author_id,
        (Action::Unlike, Target::Like { author_id }) => actor.id == author_id,
        _ => false,
    }
}

pub fn authorize(actor: &Actor, action: Action, target: Target) -> AppResult<()> {
    if can_perform(actor, action, target) {
        Ok(())
    } else {
        tracing::warn!(actor = actor.id, ?action, entity = ?target, "Authorization denied");
        Err(AppError::Forbidden)
    }
}
