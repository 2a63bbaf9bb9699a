/// End-to-end tests for the REST surface: requests go through the full
/// router (auth middleware included) against an in-memory store.
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use parley_api::{AppStateInner, AuthSettings, router};
use parley_db::Database;
use parley_gateway::Dispatcher;

struct TestApp {
    router: Router,
    dispatcher: Dispatcher,
}

fn app(max_login_attempts: u32) -> TestApp {
    let dispatcher = Dispatcher::new();
    let state = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        dispatcher: dispatcher.clone(),
        auth: AuthSettings {
            jwt_secret: "test-secret".into(),
            token_ttl: chrono::Duration::hours(1),
            max_login_attempts,
            admin_emails: vec!["root@example.com".into()],
        },
    });
    TestApp {
        router: router(state),
        dispatcher,
    }
}

struct Reply {
    status: StatusCode,
    body: Value,
    set_cookie: Option<String>,
}

async fn call(app: &TestApp, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    Reply {
        status,
        body,
        set_cookie,
    }
}

/// Register and return (user_id, token).
async fn register(app: &TestApp, email: &str, name: &str) -> (String, String) {
    let reply = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": email, "display_name": name, "password": "correct horse" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    (
        reply.body["user"]["id"].as_str().unwrap().to_string(),
        reply.body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn register_sets_cookie_and_me_accepts_it() {
    let app = app(5);
    let reply = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "Ana@Example.com", "display_name": "Ana", "password": "correct horse" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["user"]["email"], "ana@example.com");
    assert_eq!(reply.body["user"]["is_admin"], false);

    let cookie = reply.set_cookie.expect("session cookie");
    assert!(cookie.starts_with("parley_token="));
    assert!(cookie.contains("HttpOnly"));
    let pair = cookie.split(';').next().unwrap().to_string();

    let request = Request::builder()
        .uri("/auth/me")
        .header(header::COOKIE, pair)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicate_email_conflicts_and_bad_input_is_rejected() {
    let app = app(5);
    register(&app, "bo@example.com", "Bo").await;

    let dup = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "BO@example.com", "display_name": "Bo 2", "password": "correct horse" })),
    )
    .await;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    assert!(dup.body["error"].as_str().unwrap().contains("already exists"));

    let short = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "cy@example.com", "display_name": "Cy", "password": "short" })),
    )
    .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = app(5);
    assert_eq!(call(&app, "GET", "/channels", None, None).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        call(&app, "GET", "/channels", Some("not-a-jwt"), None).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(call(&app, "GET", "/health", None, None).await.status, StatusCode::OK);
}

#[tokio::test]
async fn repeated_failures_lock_the_account_until_an_admin_unlocks_it() {
    let app = app(3);
    let (user_id, _) = register(&app, "dee@example.com", "Dee").await;
    let (_, admin_token) = register(&app, "root@example.com", "Root").await;

    let wrong = json!({ "email": "dee@example.com", "password": "wrong password" });
    let right = json!({ "email": "dee@example.com", "password": "correct horse" });

    for _ in 0..3 {
        let reply = call(&app, "POST", "/auth/login", None, Some(wrong.clone())).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    let locked = call(&app, "POST", "/auth/login", None, Some(right.clone())).await;
    assert_eq!(locked.status, StatusCode::TOO_MANY_REQUESTS);

    let (_, eve_token) = register(&app, "eve@example.com", "Eve").await;
    let denied = call(&app, "POST", &format!("/users/{user_id}/unlock"), Some(&eve_token), None).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let unlocked = call(&app, "POST", &format!("/users/{user_id}/unlock"), Some(&admin_token), None).await;
    assert_eq!(unlocked.status, StatusCode::OK);

    let ok = call(&app, "POST", "/auth/login", None, Some(right)).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert!(ok.set_cookie.is_some());
}

#[tokio::test]
async fn posting_requires_membership_and_broadcasts() {
    let app = app(5);
    let (_, owner) = register(&app, "owner@example.com", "Owner").await;
    let (_, guest) = register(&app, "guest@example.com", "Guest").await;
    let mut events = app.dispatcher.subscribe();

    let created = call(&app, "POST", "/channels", Some(&owner), Some(json!({ "name": "general" }))).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let channel_id = created.body["id"].as_str().unwrap().to_string();
    let messages_uri = format!("/channels/{channel_id}/messages");

    let hello = json!({ "content": "hello" });
    let refused = call(&app, "POST", &messages_uri, Some(&guest), Some(hello.clone())).await;
    assert_eq!(refused.status, StatusCode::FORBIDDEN);
    assert_eq!(
        call(&app, "GET", &messages_uri, Some(&guest), None).await.status,
        StatusCode::FORBIDDEN
    );

    let joined = call(&app, "POST", &format!("/channels/{channel_id}/join"), Some(&guest), None).await;
    assert_eq!(joined.body["joined"], true);

    let posted = call(&app, "POST", &messages_uri, Some(&guest), Some(hello)).await;
    assert_eq!(posted.status, StatusCode::CREATED);
    assert_eq!(posted.body["sender_name"], "Guest");
    assert_eq!(posted.body["conversation"]["channel_id"], channel_id.as_str());

    let mut kinds = Vec::new();
    while let Ok(msg) = events.try_recv() {
        let value: Value = serde_json::from_str(&msg.json).unwrap();
        kinds.push(value["type"].as_str().unwrap().to_string());
    }
    assert_eq!(kinds, vec!["ChannelCreate", "MemberJoin", "MessageCreate"]);

    let listed = call(&app, "GET", &messages_uri, Some(&owner), None).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
    assert_eq!(listed.body[0]["content"], "hello");

    let members = call(&app, "GET", &format!("/channels/{channel_id}/members"), Some(&owner), None).await;
    assert_eq!(members.body.as_array().unwrap().len(), 2);

    call(&app, "POST", &messages_uri, Some(&owner), Some(json!({ "content": "again" }))).await;
    let newest = call(&app, "GET", &format!("{messages_uri}?limit=1"), Some(&owner), None).await;
    assert_eq!(newest.body[0]["content"], "again");
    let cursor = newest.body[0]["id"].as_str().unwrap();
    let older = call(&app, "GET", &format!("{messages_uri}?limit=1&before={cursor}"), Some(&owner), None).await;
    assert_eq!(older.body[0]["content"], "hello");
}

#[tokio::test]
async fn reactions_are_idempotent_and_removable() {
    let app = app(5);
    let (_, owner) = register(&app, "r1@example.com", "R1").await;
    let (_, outsider) = register(&app, "r2@example.com", "R2").await;

    let channel = call(&app, "POST", "/channels", Some(&owner), Some(json!({ "name": "fun" }))).await;
    let channel_id = channel.body["id"].as_str().unwrap();
    let message = call(
        &app,
        "POST",
        &format!("/channels/{channel_id}/messages"),
        Some(&owner),
        Some(json!({ "content": "ship it" })),
    )
    .await;
    let message_id = message.body["id"].as_str().unwrap();
    let reactions_uri = format!("/messages/{message_id}/reactions");

    let first = call(&app, "POST", &reactions_uri, Some(&owner), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(first.body["added"], true);
    let again = call(&app, "POST", &reactions_uri, Some(&owner), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(again.body["added"], false);

    let outsider_reply =
        call(&app, "POST", &reactions_uri, Some(&outsider), Some(json!({ "emoji": "🎉" }))).await;
    assert_eq!(outsider_reply.status, StatusCode::FORBIDDEN);

    let listed = call(&app, "GET", &format!("/channels/{channel_id}/messages"), Some(&owner), None).await;
    assert_eq!(listed.body[0]["reactions"][0]["count"], 1);

    let removed = call(
        &app,
        "DELETE",
        &format!("{reactions_uri}/%F0%9F%8E%89"),
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(removed.body["removed"], true);

    let missing = call(
        &app,
        "POST",
        &format!("/messages/{}/reactions", uuid::Uuid::new_v4()),
        Some(&owner),
        Some(json!({ "emoji": "🎉" })),
    )
    .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn direct_messages_form_one_thread_per_pair() {
    let app = app(5);
    let (ana_id, ana) = register(&app, "ana@example.com", "Ana").await;
    let (bo_id, bo) = register(&app, "bo@example.com", "Bo").await;

    let sent = call(
        &app,
        "POST",
        &format!("/dms/{bo_id}/messages"),
        Some(&ana),
        Some(json!({ "content": "hey bo" })),
    )
    .await;
    assert_eq!(sent.status, StatusCode::CREATED);
    assert_eq!(sent.body["conversation"]["kind"], "direct");

    call(
        &app,
        "POST",
        &format!("/dms/{ana_id}/messages"),
        Some(&bo),
        Some(json!({ "content": "hey ana" })),
    )
    .await;

    let thread = call(&app, "GET", &format!("/dms/{ana_id}/messages"), Some(&bo), None).await;
    let contents: Vec<&str> = thread
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["hey ana", "hey bo"]);

    let peers = call(&app, "GET", "/dms", Some(&bo), None).await;
    assert_eq!(peers.body[0]["user"]["id"], ana_id.as_str());
    assert_eq!(peers.body[0]["message_count"], 2);

    let nobody = call(
        &app,
        "POST",
        &format!("/dms/{}/messages", uuid::Uuid::new_v4()),
        Some(&ana),
        Some(json!({ "content": "hello?" })),
    )
    .await;
    assert_eq!(nobody.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_creator_or_admin_deletes_channels() {
    let app = app(5);
    let (_, creator) = register(&app, "maker@example.com", "Maker").await;
    let (_, other) = register(&app, "other@example.com", "Other").await;
    let (_, admin) = register(&app, "root@example.com", "Root").await;

    let channel = call(&app, "POST", "/channels", Some(&creator), Some(json!({ "name": "tmp" }))).await;
    let uri = format!("/channels/{}", channel.body["id"].as_str().unwrap());

    assert_eq!(call(&app, "DELETE", &uri, Some(&other), None).await.status, StatusCode::FORBIDDEN);
    assert_eq!(call(&app, "DELETE", &uri, Some(&admin), None).await.status, StatusCode::NO_CONTENT);
    assert_eq!(call(&app, "GET", &uri, Some(&creator), None).await.status, StatusCode::NOT_FOUND);
}
