//! HTTP tests driving the full router in-process.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use rusqlite::params;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use piazza::config::Config;
use piazza::db;
use piazza::state::{AppState, DbPool};
use piazza::storage::LocalDiskStore;

const BOUNDARY: &str = "piazza-test-boundary";
const PUBLIC_URL: &str = "http://localhost:3000";

struct TestApp {
    app: Router,
    db: DbPool,
    uploads: PathBuf,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.path = Some(dir.path().join("test.db"));
    config.storage.path = Some(dir.path().join("uploads"));
    config.storage.public_url = PUBLIC_URL.to_string();
    config.auth.bcrypt_cost = 4;

    let pool = db::create_pool(&config.db_path()).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");
    let blobs = LocalDiskStore::new(config.uploads_path(), PUBLIC_URL).unwrap();

    let uploads = config.uploads_path();
    let state = AppState {
        db: pool.clone(),
        config,
        blobs: Arc::new(blobs),
    };
    TestApp {
        app: piazza::app(state),
        db: pool,
        uploads,
        _dir: dir,
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, mime, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, file_name, mime
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.json(Method::DELETE, uri, Some(token), Value::Null).await
    }

    async fn multipart(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        parts: &[Part<'_>],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(multipart_body(parts))).unwrap())
            .await
    }

    /// Register a user and return (id, token).
    async fn register(&self, name: &str) -> (i64, String) {
        let (status, body) = self
            .json(
                Method::POST,
                "/auth/register",
                None,
                json!({
                    "name": name,
                    "email": format!("{}@example.com", name),
                    "password": "password123",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_post(&self, token: &str, content: &str) -> i64 {
        let (status, body) = self
            .multipart(
                Method::POST,
                "/posts",
                Some(token),
                &[Part::Text("content", content)],
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create post failed: {}", body);
        body["post"]["id"].as_i64().unwrap()
    }

    fn count(&self, table: &str) -> i64 {
        let conn = self.db.get().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn files_in(&self, dir: &str) -> usize {
        std::fs::read_dir(self.uploads.join("upload").join(dir))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png";

#[tokio::test]
async fn health_check() {
    let app = test_app();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn register_me_and_logout() {
    let app = test_app();
    let (id, token) = app.register("ada").await;

    let (status, body) = app.get("/auth/me", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], id);
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert!(body["user"].get("password_hash").is_none());

    let (status, _) = app.json(Method::POST, "/auth/logout", Some(token.as_str()), Value::Null).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/auth/me", Some(token.as_str())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthenticated.");
}

#[tokio::test]
async fn duplicate_email_is_a_validation_error() {
    let app = test_app();
    app.register("ada").await;

    let (status, body) = app
        .json(
            Method::POST,
            "/auth/register",
            None,
            json!({ "name": "Other", "email": "ADA@example.com", "password": "password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["email"].is_array());
}

#[tokio::test]
async fn login_checks_password() {
    let app = test_app();
    app.register("ada").await;

    let (status, body) = app
        .json(
            Method::POST,
            "/auth/login",
            None,
            json!({ "email": "ada@example.com", "password": "wrong-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["password"].is_array());

    let (status, body) = app
        .json(
            Method::POST,
            "/auth/login",
            None,
            json!({ "email": "ada@example.com", "password": "password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    let (status, _) = app.get("/auth/me", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn creating_a_post_requires_auth() {
    let app = test_app();
    let (status, body) = app
        .multipart(Method::POST, "/posts", None, &[Part::Text("content", "hi")])
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthenticated.");
    assert_eq!(app.count("posts"), 0);
}

#[tokio::test]
async fn post_with_image_and_video_is_served_back() {
    let app = test_app();
    let (_, token) = app.register("ada").await;

    let (status, body) = app
        .multipart(
            Method::POST,
            "/posts",
            Some(token.as_str()),
            &[
                Part::Text("content", "Sunset"),
                Part::Text("video_url", "https://video.example/sunset"),
                Part::File("media[]", "sunset.png", "image/png", PNG),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let post = &body["post"];
    assert_eq!(post["content"], "Sunset");
    assert_eq!(post["video"]["url"], "https://video.example/sunset");
    assert_eq!(post["images"].as_array().unwrap().len(), 1);
    assert_eq!(post["likes_count"], 0);
    assert_eq!(app.files_in("postImages"), 1);

    let url = post["images"][0]["path"].as_str().unwrap();
    let uri = url.strip_prefix(PUBLIC_URL).unwrap();
    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], PNG);
}

#[tokio::test]
async fn invalid_post_writes_nothing() {
    let app = test_app();
    let (_, token) = app.register("ada").await;

    let (status, body) = app
        .multipart(Method::POST, "/posts", Some(token.as_str()), &[])
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["content"].is_array());

    let (status, body) = app
        .multipart(
            Method::POST,
            "/posts",
            Some(token.as_str()),
            &[
                Part::Text("content", "clip"),
                Part::File("media[]", "clip.mp4", "video/mp4", b"mp4"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["media.0"].is_array());

    let (status, body) = app
        .multipart(
            Method::POST,
            "/posts",
            Some(token.as_str()),
            &[
                Part::Text("content", "disguised"),
                Part::File("media[]", "cat.png", "image/png", b"<?php echo 1; ?>"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["media.0"].is_array());

    let six: Vec<Part<'_>> = std::iter::once(Part::Text("content", "many"))
        .chain((0..6).map(|_| Part::File("media[]", "a.png", "image/png", PNG)))
        .collect();
    let (status, body) = app
        .multipart(Method::POST, "/posts", Some(token.as_str()), &six)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["media"].is_array());

    assert_eq!(app.count("posts"), 0);
    assert_eq!(app.count("images"), 0);
    assert_eq!(app.files_in("postImages"), 0);
}

#[tokio::test]
async fn only_the_author_can_edit_or_delete() {
    let app = test_app();
    let (_, ada) = app.register("ada").await;
    let (_, bob) = app.register("bob").await;
    let post = app.create_post(&ada, "original").await;
    let uri = format!("/posts/{}", post);

    let (status, body) = app
        .multipart(Method::PUT, &uri, Some(bob.as_str()), &[Part::Text("content", "hijacked")])
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This action is unauthorized.");

    let (status, _) = app.delete(&uri, &bob).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .multipart(Method::POST, &uri, Some(ada.as_str()), &[Part::Text("content", "edited")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["post"]["content"], "edited");

    let (status, _) = app.delete(&uri, &ada).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.get(&uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Not found");
}

#[tokio::test]
async fn like_flow() {
    let app = test_app();
    let (_, ada) = app.register("ada").await;
    let (_, bob) = app.register("bob").await;
    let post = app.create_post(&ada, "likeable").await;
    let like_uri = format!("/posts/{}/like", post);

    let (status, first) = app.json(Method::POST, &like_uri, Some(bob.as_str()), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = app.json(Method::POST, &like_uri, Some(bob.as_str()), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["like"]["id"], second["like"]["id"]);
    assert_eq!(app.count("likes"), 1);

    let (_, body) = app.get(&format!("/posts/{}", post), Some(bob.as_str())).await;
    assert_eq!(body["post"]["likes_count"], 1);
    assert_eq!(body["post"]["liked"], true);
    let (_, body) = app.get(&format!("/posts/{}", post), Some(ada.as_str())).await;
    assert_eq!(body["post"]["liked"], false);

    let (_, body) = app.get(&format!("/posts/{}/likes", post), None).await;
    assert_eq!(body["likes"].as_array().unwrap().len(), 1);

    // Someone else's like stays put
    let like_id = first["like"]["id"].as_i64().unwrap();
    let (status, _) = app.delete(&format!("/likes/{}", like_id), &ada).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.count("likes"), 1);

    let (status, _) = app.delete(&like_uri, &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.count("likes"), 0);

    let (status, _) = app.json(Method::POST, "/posts/9999/like", Some(bob.as_str()), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comment_threads() {
    let app = test_app();
    let (_, ada) = app.register("ada").await;
    let (_, bob) = app.register("bob").await;
    let post = app.create_post(&ada, "discuss").await;
    let other = app.create_post(&ada, "elsewhere").await;

    let (status, root) = app
        .json(
            Method::POST,
            "/comments",
            Some(bob.as_str()),
            json!({ "post_id": post, "content": "first" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", root);
    let root_id = root["comment"]["id"].as_i64().unwrap();

    let (status, _) = app
        .json(
            Method::POST,
            "/comments",
            Some(ada.as_str()),
            json!({ "post_id": post, "description": "reply", "parent_id": root_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(
            Method::POST,
            "/comments",
            Some(ada.as_str()),
            json!({ "post_id": other, "content": "misplaced", "parent_id": root_id }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["parent_id"].is_array());
    assert_eq!(app.count("comments"), 2);

    let (status, body) = app.get(&format!("/posts/{}/comments", post), None).await;
    assert_eq!(status, StatusCode::OK);
    let thread = body["comments"].as_array().unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0]["content"], "first");
    assert_eq!(thread[0]["replies"][0]["content"], "reply");

    let (_, body) = app.get(&format!("/posts/{}", post), None).await;
    assert_eq!(body["post"]["comments_count"], 2);

    let (status, _) = app.delete(&format!("/comments/{}", root_id), &ada).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.delete(&format!("/comments/{}", root_id), &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.count("comments"), 0);
}

#[tokio::test]
async fn deleting_a_post_removes_everything_attached() {
    let app = test_app();
    let (_, ada) = app.register("ada").await;
    let (_, bob) = app.register("bob").await;

    let (_, body) = app
        .multipart(
            Method::POST,
            "/posts",
            Some(ada.as_str()),
            &[
                Part::Text("content", "doomed"),
                Part::File("media[]", "a.png", "image/png", PNG),
                Part::File("media[]", "b.gif", "image/gif", b"GIF89a"),
            ],
        )
        .await;
    let post = body["post"]["id"].as_i64().unwrap();
    app.json(Method::POST, &format!("/posts/{}/like", post), Some(bob.as_str()), Value::Null)
        .await;
    app.json(
        Method::POST,
        "/comments",
        Some(bob.as_str()),
        json!({ "post_id": post, "content": "bye" }),
    )
    .await;
    assert_eq!(app.files_in("postImages"), 2);

    let (status, _) = app.delete(&format!("/posts/{}", post), &ada).await;
    assert_eq!(status, StatusCode::OK);
    for table in ["posts", "images", "likes", "comments"] {
        assert_eq!(app.count(table), 0, "{} not emptied", table);
    }
    assert_eq!(app.files_in("postImages"), 0);
}

#[tokio::test]
async fn feed_pages_backwards_in_time() {
    let app = test_app();
    let (ada_id, ada) = app.register("ada").await;
    {
        let conn = app.db.get().unwrap();
        for ts in 1..=5i64 {
            conn.execute(
                "INSERT INTO posts (author_id, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![ada_id, format!("post {}", ts), ts * 1000],
            )
            .unwrap();
        }
    }

    let (status, page) = app.get("/posts?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = page["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, ["post 5", "post 4"]);
    assert_eq!(page["has_more"], true);
    assert_eq!(page["next_before"], 4000);

    let (_, page) = app.get("/posts?limit=3&before=4000", None).await;
    assert_eq!(page["posts"].as_array().unwrap().len(), 3);
    assert_eq!(page["has_more"], false);
    assert!(page["next_before"].is_null());

    let (_, page) = app.get("/me/posts?before=1970-01-01T00:00:03Z", Some(ada.as_str())).await;
    assert_eq!(page["posts"].as_array().unwrap().len(), 2);

    let (status, _) = app.get("/posts?before=soon", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/posts?limit=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid limit: abc");

    let (status, body) = app.get("/posts?limit=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, page) = app.get("/posts?limit=", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["posts"].as_array().unwrap().len(), 5);

    let (status, _) = app.get("/users/9999/posts", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_update_with_avatar() {
    let app = test_app();
    let (id, token) = app.register("ada").await;

    let (status, body) = app
        .multipart(
            Method::PUT,
            "/me",
            Some(token.as_str()),
            &[
                Part::Text("bio", "Counts things."),
                Part::File("avatar", "me.png", "image/png", PNG),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["user"]["bio"], "Counts things.");
    assert_eq!(body["user"]["name"], "ada");
    assert!(body["user"]["avatar"]["path"].is_string());
    assert_eq!(app.files_in("avatars"), 1);

    let (status, body) = app.get(&format!("/users/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["images"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .multipart(
            Method::POST,
            "/me",
            Some(token.as_str()),
            &[Part::File("avatar", "me.txt", "text/plain", b"hello")],
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["avatar.0"].is_array());
}

#[tokio::test]
async fn storage_refuses_traversal() {
    let app = test_app();
    let (status, _) = app.get("/storage/../test.db", None).await;
    assert_ne!(status, StatusCode::OK);
    let (status, _) = app.get("/storage/upload/avatars/missing.png", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
