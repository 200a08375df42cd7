//! Password accounts and opaque bearer tokens.

pub mod handlers;
pub mod password;
pub mod tokens;
