use std::collections::HashMap;

use googletest::{
    assert_that,
    prelude::{eq, none, some},
};
use http::header::SET_COOKIE;
use http::{HeaderMap, StatusCode};
use keel_session::{CookieSigner, SessionId, SessionMiddleware, store::errors::CreateError};
use secrecy::SecretString;

use crate::fixtures::{
    BrokenBackend, SECRET, config, conflicting_create_error, middleware, spy_middleware,
    transient_create_error,
};
use crate::helpers::{SetCookie, cookie_header};

/// Run a request without a session cookie through the middleware and
/// return the `Set-Cookie` header it produced.
async fn new_session(middleware: &SessionMiddleware) -> SetCookie {
    let context = middleware.on_request(&HeaderMap::new()).await;
    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    SetCookie::single(&headers)
}

fn signer() -> CookieSigner {
    CookieSigner::new(&SecretString::from(SECRET.to_owned())).unwrap()
}

#[tokio::test]
async fn requests_without_a_cookie_get_a_new_session() {
    let (middleware, call_tracker) = spy_middleware(config());

    let context = middleware.on_request(&HeaderMap::new()).await;
    assert!(!context.is_active());
    assert_that!(context.id(), none());
    call_tracker.assert_never_loaded().await;

    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    let cookie = SetCookie::single(&headers);
    assert_eq!(cookie.name, "session");

    let id = signer().verify(&cookie.value, None).unwrap();
    let record = middleware.store().load(&id).await.unwrap().unwrap();
    assert!(record.state.is_empty());
    assert_eq!(
        call_tracker.operation_log().await,
        vec![format!("create {id}"), format!("load {id}")]
    );
}

#[tokio::test]
async fn the_session_cookie_is_recognized_on_the_next_request() {
    let (middleware, call_tracker) = spy_middleware(config());
    let cookie = new_session(&middleware).await;
    let id = signer().verify(&cookie.value, None).unwrap();

    let context = middleware
        .on_request(&cookie_header(&cookie.name, &cookie.value))
        .await;
    assert!(context.is_active());
    assert_that!(context.id(), some(eq(id)));
    assert_that!(context.record().map(|r| r.state.len()), some(eq(0)));

    // No new record, no new cookie.
    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    assert!(headers.get(SET_COOKIE).is_none());
    assert_eq!(
        call_tracker.operation_log().await,
        vec![format!("create {id}"), format!("load {id}")]
    );
}

#[tokio::test]
async fn the_session_cookie_is_found_among_other_cookies() {
    let middleware = middleware(config());
    let cookie = new_session(&middleware).await;

    let mut headers = HeaderMap::new();
    headers.append(http::header::COOKIE, "theme=dark".parse().unwrap());
    headers.append(
        http::header::COOKIE,
        format!("lang=en; {}={}", cookie.name, cookie.value)
            .parse()
            .unwrap(),
    );
    let context = middleware.on_request(&headers).await;
    assert!(context.is_active());
}

#[tokio::test]
async fn tampered_cookies_are_ignored() {
    let (middleware, call_tracker) = spy_middleware(config());
    let cookie = new_session(&middleware).await;

    let mut forged = cookie.value.clone();
    let last = forged.pop().unwrap();
    forged.push(if last == 'A' { 'B' } else { 'A' });

    let context = middleware
        .on_request(&cookie_header(&cookie.name, &forged))
        .await;
    assert!(!context.is_active());
    call_tracker.assert_never_loaded().await;
}

#[tokio::test]
async fn cookies_signed_with_another_secret_are_ignored() {
    let (middleware, call_tracker) = spy_middleware(config());
    let other = CookieSigner::new(&SecretString::from("another-secret".to_owned())).unwrap();
    let token = other.sign(&SessionId::random());

    let context = middleware.on_request(&cookie_header("session", &token)).await;
    assert!(!context.is_active());
    call_tracker.assert_never_loaded().await;
}

#[tokio::test]
async fn a_valid_cookie_without_a_record_starts_over() {
    let middleware = middleware(config());
    let stale_id = SessionId::random();
    let token = signer().sign(&stale_id);

    let context = middleware.on_request(&cookie_header("session", &token)).await;
    assert!(!context.is_active());

    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    let new_id = signer()
        .verify(&SetCookie::single(&headers).value, None)
        .unwrap();
    assert_ne!(new_id, stale_id);
}

#[tokio::test]
async fn store_failures_on_load_are_treated_as_a_missing_session() {
    let middleware = BrokenBackend::new(transient_create_error).middleware(config());
    let token = signer().sign(&SessionId::random());

    let context = middleware.on_request(&cookie_header("session", &token)).await;
    assert!(!context.is_active());
}

#[tokio::test]
async fn the_initial_state_is_stored_with_the_new_session() {
    let middleware = middleware(config());
    let mut context = middleware.on_request(&HeaderMap::new()).await;
    context
        .initial_state_mut()
        .unwrap()
        .insert("username".into(), "alice".into());

    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    let id = signer()
        .verify(&SetCookie::single(&headers).value, None)
        .unwrap();
    let record = middleware.store().load(&id).await.unwrap().unwrap();
    assert_eq!(record.state["username"], "alice");
    assert_eq!(record.ttl.as_secs() / 86400, 13);
}

#[tokio::test]
async fn active_sessions_have_no_initial_state() {
    let middleware = middleware(config());
    let cookie = new_session(&middleware).await;
    let mut context = middleware
        .on_request(&cookie_header(&cookie.name, &cookie.value))
        .await;
    assert!(context.initial_state_mut().is_none());
}

#[tokio::test]
async fn create_failures_are_surfaced_by_finalize() {
    let middleware = BrokenBackend::new(conflicting_create_error).middleware(config());
    let context = middleware.on_request(&HeaderMap::new()).await;

    let mut headers = HeaderMap::new();
    let err = middleware.finalize(&context, &mut headers).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
    insta::assert_snapshot!(err, @"Failed to create a new session record");
    assert!(headers.is_empty());

    let middleware = BrokenBackend::new(transient_create_error).middleware(config());
    let err = middleware
        .finalize(&context, &mut HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn create_failures_are_swallowed_by_on_response() {
    let middleware = BrokenBackend::new(|| {
        CreateError::Store(keel_session::store::errors::StoreError::Fatal(
            anyhow::anyhow!("Permission denied"),
        ))
    })
    .middleware(config());
    let context = middleware.on_request(&HeaderMap::new()).await;

    let response = http::Response::builder()
        .status(StatusCode::OK)
        .body("hello")
        .unwrap();
    let response = middleware.on_response(&context, response).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert_eq!(*response.body(), "hello");
}

#[tokio::test]
async fn on_response_attaches_the_session_cookie() {
    let middleware = middleware(config());
    let context = middleware.on_request(&HeaderMap::new()).await;

    let mut response = http::Response::new(());
    response
        .headers_mut()
        .append(SET_COOKIE, "theme=dark".parse().unwrap());
    let response = middleware.on_response(&context, response).await;

    let cookies: Vec<_> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(SetCookie::parse)
        .collect();
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.name == "session"));
}

#[tokio::test]
async fn ending_a_session_removes_the_record_and_the_cookie() {
    let (middleware, call_tracker) = spy_middleware(config());
    let cookie = new_session(&middleware).await;
    let id = signer().verify(&cookie.value, None).unwrap();

    let mut context = middleware
        .on_request(&cookie_header(&cookie.name, &cookie.value))
        .await;
    middleware.end_session(&mut context).await.unwrap();
    assert!(!context.is_active());
    assert_that!(context.id(), none());
    assert_eq!(context.ended_id(), Some(id));

    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    let removal = SetCookie::single(&headers);
    assert_eq!(removal.name, "session");
    assert!(removal.is_removal(), "{removal:?}");

    assert_that!(middleware.store().load(&id).await.unwrap(), none());
    assert_eq!(
        call_tracker.operation_log().await,
        vec![
            format!("create {id}"),
            format!("load {id}"),
            format!("delete {id}"),
            format!("load {id}"),
        ]
    );
}

#[tokio::test]
async fn ending_a_missing_session_is_a_no_op() {
    let (middleware, call_tracker) = spy_middleware(config());
    let mut context = middleware.on_request(&HeaderMap::new()).await;
    middleware.end_session(&mut context).await.unwrap();
    assert_that!(context.ended_id(), none());
    assert!(call_tracker.operation_log().await.is_empty());
}

#[test]
fn an_empty_secret_is_rejected() {
    let config = keel_session::SessionConfig::new(SecretString::from(String::new()));
    let store = keel_session::SessionStore::new(
        keel_session_memory_store::InMemorySessionStore::default(),
    );
    let err = SessionMiddleware::new(store, config).unwrap_err();
    insta::assert_snapshot!(err, @"The secret used to sign session cookies can't be empty");
}

#[tokio::test]
async fn handlers_persist_changes_explicitly() {
    let middleware = middleware(config());
    let cookie = new_session(&middleware).await;
    let context = middleware
        .on_request(&cookie_header(&cookie.name, &cookie.value))
        .await;

    let id = context.id().unwrap();
    let mut state: HashMap<String, serde_json::Value> = context.record().unwrap().state.clone();
    state.insert("visits".into(), 1.into());
    middleware
        .store()
        .update(
            &id,
            keel_session::store::SessionRecordRef {
                state: std::borrow::Cow::Owned(state),
                ttl: middleware.config().state.ttl,
            },
        )
        .await
        .unwrap();

    let context = middleware
        .on_request(&cookie_header(&cookie.name, &cookie.value))
        .await;
    assert_eq!(context.record().unwrap().state["visits"], 1);
}
