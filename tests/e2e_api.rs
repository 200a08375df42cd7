/// E2E tests against a running server
/// Start one with `piazza --data-dir /tmp/piazza-e2e` first
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:3000";

/// Register a throwaway account and return its bearer token.
async fn register(client: &Client) -> Result<String, Box<dyn std::error::Error>> {
    let email = format!("e2e-{}@example.com", uuid::Uuid::now_v7().simple());
    let body: Value = client
        .post(format!("{}/auth/register", BASE_URL))
        .json(&json!({ "name": "E2E", "email": email, "password": "password123" }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    body["token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| "No token returned".into())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test e2e_api -- --ignored
async fn test_health() -> Result<(), Box<dyn std::error::Error>> {
    let response = reqwest::get(format!("{}/health", BASE_URL)).await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "ok");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_post_like_and_comment() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let token = register(&client).await?;

    let form = Form::new().text("content", "Hello from e2e").part(
        "media[]",
        Part::bytes(b"\x89PNG\r\n\x1a\n".to_vec())
            .file_name("hello.png")
            .mime_str("image/png")?,
    );
    let response = client
        .post(format!("{}/posts", BASE_URL))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await?;
    let post_id = body["post"]["id"].as_i64().ok_or("missing post id")?;

    let image_url = body["post"]["images"][0]["path"]
        .as_str()
        .ok_or("missing image path")?;
    let image = client.get(image_url).send().await?;
    assert_eq!(image.status(), 200);

    for _ in 0..2 {
        let response = client
            .post(format!("{}/posts/{}/like", BASE_URL, post_id))
            .bearer_auth(&token)
            .send()
            .await?;
        assert_eq!(response.status(), 200);
    }

    let response = client
        .post(format!("{}/comments", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "post_id": post_id, "content": "first!" }))
        .send()
        .await?;
    assert_eq!(response.status(), 201);

    let body: Value = client
        .get(format!("{}/posts/{}", BASE_URL, post_id))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["post"]["likes_count"], 1);
    assert_eq!(body["post"]["comments_count"], 1);
    assert_eq!(body["post"]["liked"], true);

    let response = client
        .delete(format!("{}/posts/{}", BASE_URL, post_id))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_unauthenticated_requests_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let response = client.get(format!("{}/me", BASE_URL)).send().await?;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await?;
    assert_eq!(body["message"], "Unauthenticated.");
    Ok(())
}
