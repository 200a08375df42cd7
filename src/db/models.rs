use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub bio: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar: Option<Image>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user together with every image they own.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub images: Vec<Image>,
}

/// Public view of a user embedded in posts and comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub avatar: Option<Image>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Author,
    pub images: Vec<Image>,
    pub video: Option<Video>,
    pub comments_count: i64,
    pub likes_count: i64,
    /// Whether the viewing user has liked this post.
    pub liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: i64,
    pub post_id: Option<i64>,
    pub user_id: Option<i64>,
    pub path: String,
    pub name: String,
    pub mime: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Video {
    pub id: i64,
    pub post_id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i64,
    pub author_id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: Author,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Like {
    pub id: i64,
    pub author_id: i64,
    pub post_id: i64,
    pub created_at: DateTime<Utc>,
    /// Loaded for listings only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
}

/// One page of a reverse-chronological post listing.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub has_more: bool,
    /// Cursor for the next page (epoch millis of the oldest post returned).
    pub next_before: Option<i64>,
}
