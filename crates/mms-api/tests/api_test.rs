//! Router-level tests against scripted and embedded stores.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use mms_api::{router, AppState, Authenticator, JwtConfig, ServerConfig};
use mms_engine::testing::{RecordingScheduler, ScriptedStore};
use mms_engine::{Engine, EngineConfig};
use mms_store::MemorySparqlStore;

const SECRET: &str = "test-secret";

fn app(store: Arc<ScriptedStore>) -> (Router, String) {
    let engine = Arc::new(Engine::new(
        store,
        Arc::new(RecordingScheduler::default()),
        EngineConfig::default().with_root_context("http://mms.test"),
    ));
    let auth = Authenticator::new(&JwtConfig::new(SECRET));
    let token = auth.issue("alice", &[], 300).unwrap();
    (router(AppState::new(engine, auth), &ServerConfig::default()), token)
}

/// Router over an embedded store, with a token for a bootstrapped admin.
async fn live_app() -> (Router, String) {
    let engine = Arc::new(Engine::new(
        Arc::new(MemorySparqlStore::new().unwrap()),
        Arc::new(RecordingScheduler::default()),
        EngineConfig::default()
            .with_root_context("http://mms.test")
            .with_root_groups(["admins"]),
    ));
    engine.bootstrap().await.unwrap();
    let auth = Authenticator::new(&JwtConfig::new(SECRET));
    let token = auth.issue("alice", &["admins".to_string()], 300).unwrap();
    (router(AppState::new(engine, auth), &ServerConfig::default()), token)
}

fn request(method: &str, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match token {
        Some(t) => builder.header(header::AUTHORIZATION, format!("Bearer {}", t)),
        None => builder,
    }
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn put_org(token: &str) -> axum::http::request::Builder {
    request("PUT", "/orgs/acme", Some(token)).header(header::CONTENT_TYPE, "text/turtle")
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let (app, _) = app(Arc::new(ScriptedStore::new()));
    let response = app
        .oneshot(request("GET", "/health", None).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let store = Arc::new(ScriptedStore::new());
    let (app, _) = app(store.clone());
    let response = app
        .clone()
        .oneshot(request("GET", "/orgs", None).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = Authenticator::new(&JwtConfig::new("other")).issue("mallory", &[], 300).unwrap();
    let response = app
        .oneshot(request("GET", "/orgs", Some(&forged)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_create_org_returns_created_with_location_and_etag() {
    let (app, token) = live_app().await;
    let response = app
        .oneshot(
            request("PUT", "/orgs/acme", Some(&token))
                .header(header::CONTENT_TYPE, "text/turtle")
                .header(header::IF_NONE_MATCH, "*")
                .body(Body::from(r#"<> <http://purl.org/dc/terms/title> "Acme" ."#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LOCATION], "/orgs/acme");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/turtle");
    let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.len() > 2);

    let body = body_text(response).await;
    assert!(body.contains("<http://mms.test/orgs/acme>"), "{body}");
    assert!(body.contains("a mms:Org"), "{body}");
    assert!(body.contains(r#"mms:id "acme""#), "{body}");
    assert!(body.contains(&format!("mms:etag {}", etag)), "{body}");
    assert!(body.contains(r#""Acme""#), "{body}");
}

#[tokio::test]
async fn test_stale_if_match_is_precondition_failed() {
    let store = Arc::new(ScriptedStore::new().on_construct(|q| {
        if ScriptedStore::is_validation(q) {
            ScriptedStore::validation_failure("etagMatches")
        } else {
            String::new()
        }
    }));
    let (app, token) = app(store);
    let response = app
        .oneshot(
            request("PUT", "/orgs/acme", Some(&token))
                .header(header::IF_MATCH, "\"stale\"")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let json = body_json(response).await;
    assert_eq!(json["condition"], "etagMatches");
}

#[tokio::test]
async fn test_unreadable_org_is_not_found_with_empty_body() {
    let (app, _) = app(Arc::new(ScriptedStore::new()));
    let mallory = Authenticator::new(&JwtConfig::new(SECRET)).issue("mallory", &[], 300).unwrap();
    let response = app
        .oneshot(request("GET", "/orgs/acme", Some(&mallory)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty(), "concealed 404 leaked {:?}", bytes);
}

#[tokio::test]
async fn test_unsupported_media_types() {
    let store = Arc::new(ScriptedStore::new());
    let (app, token) = app(store.clone());

    let response = app
        .clone()
        .oneshot(
            request("GET", "/orgs/acme", Some(&token))
                .header(header::ACCEPT, "application/ld+json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    let response = app
        .oneshot(
            request("PUT", "/orgs/acme", Some(&token))
                .header(header::CONTENT_TYPE, "application/rdf+xml")
                .body(Body::from("<rdf:RDF/>"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_store_failure_status_passes_through() {
    let (app, token) = app(Arc::new(ScriptedStore::new().fail_updates(503)));
    let response = app
        .oneshot(
            request("PUT", "/orgs/acme", Some(&token))
                .header(header::IF_NONE_MATCH, "*")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_malformed_query_rejected_before_store() {
    let store = Arc::new(ScriptedStore::new());
    let (app, token) = app(store.clone());
    let response = app
        .oneshot(
            request("POST", "/orgs/acme/repos/models/branches/master/query", Some(&token))
                .header(header::CONTENT_TYPE, "application/sparql-query")
                .body(Body::from("SELEC ?s WHERE"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_update_with_wrong_content_type() {
    let (app, token) = app(Arc::new(ScriptedStore::new()));
    let response = app
        .oneshot(
            request("POST", "/orgs/acme/repos/models/branches/master/update", Some(&token))
                .header(header::CONTENT_TYPE, "application/sparql-query")
                .body(Body::from("INSERT DATA { <urn:a> <urn:b> <urn:c> }"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_put_stale_if_match_delete_then_get() {
    let (app, token) = live_app().await;
    let send = |req: Request<Body>| {
        let app = app.clone();
        async move { app.oneshot(req).await.unwrap() }
    };
    let title = |t: &str| Body::from(format!("<> <http://purl.org/dc/terms/title> \"{}\" .", t));

    let created = send(
        put_org(&token)
            .header(header::IF_NONE_MATCH, "*")
            .body(title("A"))
            .unwrap(),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let e1 = created.headers()[header::ETAG].to_str().unwrap().to_string();

    let replaced = send(
        put_org(&token)
            .header(header::IF_MATCH, e1.as_str())
            .body(title("B"))
            .unwrap(),
    )
    .await;
    assert_eq!(replaced.status(), StatusCode::OK);
    let e2 = replaced.headers()[header::ETAG].to_str().unwrap().to_string();
    assert_ne!(e1, e2);

    let stale = send(
        put_org(&token)
            .header(header::IF_MATCH, e1.as_str())
            .body(title("C"))
            .unwrap(),
    )
    .await;
    assert_eq!(stale.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(body_json(stale).await["condition"], "etagMatches");

    let current = send(request("GET", "/orgs/acme", Some(&token)).body(Body::empty()).unwrap()).await;
    assert_eq!(current.status(), StatusCode::OK);
    assert_eq!(current.headers()[header::ETAG].to_str().unwrap(), e2);
    let body = body_text(current).await;
    assert!(body.contains(r#""B""#) && !body.contains(r#""C""#), "{body}");

    let deleted = send(
        request("DELETE", "/orgs/acme", Some(&token))
            .header(header::IF_MATCH, e2.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert!(deleted.headers().contains_key(header::ETAG));

    let gone = send(request("GET", "/orgs/acme", Some(&token)).body(Body::empty()).unwrap()).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert!(body_text(gone).await.is_empty());
}
