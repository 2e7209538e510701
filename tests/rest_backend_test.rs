//! Managed backend client against an in-process stub of the auth, table and
//! storage endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use url::Url;

use metasocial::backend::rest::RestBackend;
use metasocial::backend::{AuthEvent, AuthService, BackendError, DataStore, Query};
use metasocial::data::{likes, uploads};
use metasocial::error::AppError;
use metasocial::timeline::Timeline;

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Clone, Default)]
struct Stub {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Stub {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn last(&self, method: Method, path: &str) -> Recorded {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.method == method && r.path == path)
            .unwrap_or_else(|| panic!("no {} {} request", method, path))
    }
}

async fn handle(
    State(stub): State<Stub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: body.clone(),
    };
    stub.requests.lock().unwrap().push(recorded);

    match (method.as_str(), uri.path()) {
        ("POST", "/auth/v1/token") => {
            let creds: Value = serde_json::from_slice(&body).unwrap_or_default();
            if creds["password"] == "secret123" {
                Json(json!({
                    "access_token": "access-1",
                    "refresh_token": "refresh-1",
                    "expires_in": 3600,
                    "token_type": "bearer",
                    "user": { "id": "u1", "email": creds["email"] }
                }))
                .into_response()
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "Invalid login credentials"
                    })),
                )
                    .into_response()
            }
        }
        ("POST", "/auth/v1/logout") => StatusCode::NO_CONTENT.into_response(),
        ("GET", "/rest/v1/posts") => Json(json!([{
            "id": "p1",
            "content": "hello from the plaza",
            "created_at": "2024-05-01T10:00:00+00:00",
            "metaverse_tags": ["VRChat"],
            "image_url": null,
            "author": { "id": "u2", "username": "bob", "avatar_url": null },
            "likes": [{ "count": 2 }]
        }]))
        .into_response(),
        ("GET", "/rest/v1/likes") => Json(json!([{ "post_id": "p1" }])).into_response(),
        ("POST", "/rest/v1/likes") => (
            StatusCode::CONFLICT,
            Json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"likes_pkey\""
            })),
        )
            .into_response(),
        ("POST", path) if path.starts_with("/storage/v1/object/") => {
            Json(json!({ "Key": path.trim_start_matches("/storage/v1/object/") })).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_stub() -> (Stub, RestBackend) {
    let stub = Stub::default();
    let app = Router::new().fallback(handle).with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = Url::parse(&format!("http://{}", addr)).unwrap();
    (stub, RestBackend::new(url, "anon"))
}

#[tokio::test]
async fn password_grant_signs_in_and_announces_it() {
    let (stub, backend) = start_stub().await;
    let mut events = backend.subscribe();

    let session = backend.sign_in("alice@example.com", "secret123").await.unwrap();
    assert_eq!(session.user.id, "u1");
    assert_eq!(session.access_token, "access-1");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
    assert!(!session.is_expired(chrono::Utc::now()));

    match events.recv().await {
        Some(AuthEvent::SignedIn(s)) => assert_eq!(s.user.id, "u1"),
        other => panic!("expected SignedIn, got {:?}", other),
    }
    assert_eq!(
        backend.current_session().await.unwrap().map(|s| s.user.id),
        Some("u1".to_string())
    );

    let grant = stub.last(Method::POST, "/auth/v1/token");
    assert_eq!(grant.query, "grant_type=password");
    assert_eq!(grant.header("apikey"), Some("anon"));
}

#[tokio::test]
async fn rejected_password_is_invalid_credentials() {
    let (_stub, backend) = start_stub().await;
    let err = backend
        .sign_in("alice@example.com", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidCredentials));
    assert_eq!(backend.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn selects_carry_postgrest_params_and_bearer() {
    let (stub, backend) = start_stub().await;

    backend
        .select(&Query::from("posts").field("id").eq("user_id", "u2").range(0, 19))
        .await
        .unwrap();
    let anonymous = stub.last(Method::GET, "/rest/v1/posts");
    assert_eq!(anonymous.query, "select=id&user_id=eq.u2&offset=0&limit=20");
    assert_eq!(anonymous.header("authorization"), Some("Bearer anon"));
    assert_eq!(anonymous.header("apikey"), Some("anon"));

    backend.sign_in("alice@example.com", "secret123").await.unwrap();
    backend.select(&Query::from("posts")).await.unwrap();
    let signed_in = stub.last(Method::GET, "/rest/v1/posts");
    assert_eq!(signed_in.query, "select=*");
    assert_eq!(signed_in.header("authorization"), Some("Bearer access-1"));
}

#[tokio::test]
async fn timeline_reads_embedded_authors_and_counts() {
    let (stub, backend) = start_stub().await;
    backend.sign_in("alice@example.com", "secret123").await.unwrap();

    let mut feed = Timeline::new(Some("u1".into()));
    assert!(feed.load_next(&backend).await);
    assert!(!feed.has_more());

    let post = &feed.posts()[0];
    assert_eq!(post.author.username, "bob");
    assert_eq!(post.likes_count, 2);
    assert!(post.is_liked);

    let likes_lookup = stub.last(Method::GET, "/rest/v1/likes");
    assert_eq!(likes_lookup.query, "select=post_id&user_id=eq.u1");
}

#[tokio::test]
async fn duplicate_like_is_a_conflict() {
    let (stub, backend) = start_stub().await;
    backend.sign_in("alice@example.com", "secret123").await.unwrap();

    let err = likes::like_post(&backend, "u1", "p1").await.unwrap_err();
    match err {
        AppError::Backend(BackendError::Conflict(message)) => {
            assert!(message.starts_with("duplicate key"))
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    let insert = stub.last(Method::POST, "/rest/v1/likes");
    assert_eq!(insert.header("prefer"), Some("return=representation"));
    let row: Value = serde_json::from_slice(&insert.body).unwrap();
    assert_eq!(row, json!({ "user_id": "u1", "post_id": "p1" }));
}

#[tokio::test]
async fn avatar_upload_sends_storage_headers() {
    let (stub, backend) = start_stub().await;
    backend.sign_in("alice@example.com", "secret123").await.unwrap();

    let jpeg = bytes::Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]);
    let url = uploads::upload_avatar(&backend, &uploads::UploadTarget::default(), "u1", jpeg)
        .await
        .unwrap();
    assert!(url.ends_with("/storage/v1/object/public/avatars/u1/profile.jpg"));

    let upload = stub.last(Method::POST, "/storage/v1/object/avatars/u1/profile.jpg");
    assert_eq!(upload.header("cache-control"), Some("max-age=3600"));
    assert_eq!(upload.header("x-upsert"), Some("true"));
    assert_eq!(upload.header("content-type"), Some("image/jpeg"));
    assert_eq!(upload.header("authorization"), Some("Bearer access-1"));
    assert_eq!(upload.body.len(), 4);
}

#[tokio::test]
async fn sign_out_revokes_and_clears() {
    let (stub, backend) = start_stub().await;
    backend.sign_in("alice@example.com", "secret123").await.unwrap();
    let mut events = backend.subscribe();

    backend.sign_out().await.unwrap();
    assert!(matches!(events.recv().await, Some(AuthEvent::SignedOut)));
    assert_eq!(backend.current_session().await.unwrap(), None);

    let logout = stub.last(Method::POST, "/auth/v1/logout");
    assert_eq!(logout.header("authorization"), Some("Bearer access-1"));
}
