//! Users, posts, media, likes and comments, and the rules tying them
//! together. Every operation takes the acting user explicitly.

pub mod comments;
pub mod likes;
pub mod media;
pub mod policy;
pub mod posts;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

pub use policy::Actor;
