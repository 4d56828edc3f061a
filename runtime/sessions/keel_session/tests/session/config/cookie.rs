//! Verify that all cookie settings behave as expected.
use biscotti::SameSite;
use googletest::{
    expect_that,
    prelude::{eq, none, some},
};
use http::HeaderMap;
use keel_session::config::SessionCookieConfig;

use crate::fixtures::{config, middleware};
use crate::helpers::{SetCookie, cookie_header};

async fn finalized_cookie(config: keel_session::SessionConfig) -> SetCookie {
    let middleware = middleware(config);
    let context = middleware.on_request(&HeaderMap::new()).await;
    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    SetCookie::single(&headers)
}

#[tokio::test]
#[googletest::test]
async fn default_cookie_settings() {
    let cookie = finalized_cookie(config()).await;
    expect_that!(cookie.name.as_str(), eq("session"));
    expect_that!(cookie.attribute("path"), some(eq("/")));
    expect_that!(cookie.attribute("domain"), none());
    expect_that!(cookie.has_flag("httponly"), eq(true));
    expect_that!(cookie.has_flag("secure"), eq(false));
    expect_that!(cookie.attribute("samesite"), some(eq("Lax")));
    expect_that!(cookie.attribute("max-age"), some(eq("1209600")));
}

#[tokio::test]
#[googletest::test]
async fn cookie_attributes_can_be_changed() {
    let mut config = config();
    config.cookie.name = "my-custom-cookie-name".into();
    config.cookie.domain = Some("my-domain.com".into());
    config.cookie.path = Some("/custom-path".into());
    config.cookie.secure = true;
    config.cookie.http_only = false;
    config.cookie.same_site = Some(SameSite::Strict);
    config.cookie.max_age = None;

    let cookie = finalized_cookie(config).await;
    expect_that!(cookie.name.as_str(), eq("my-custom-cookie-name"));
    expect_that!(cookie.attribute("domain"), some(eq("my-domain.com")));
    expect_that!(cookie.attribute("path"), some(eq("/custom-path")));
    expect_that!(cookie.has_flag("secure"), eq(true));
    expect_that!(cookie.has_flag("httponly"), eq(false));
    expect_that!(cookie.attribute("samesite"), some(eq("Strict")));
    expect_that!(cookie.attribute("max-age"), none());
}

#[tokio::test]
async fn a_custom_cookie_name_is_used_to_find_the_session() {
    let mut config = config();
    config.cookie.name = "sid".into();
    let middleware = middleware(config);

    let context = middleware.on_request(&HeaderMap::new()).await;
    let mut headers = HeaderMap::new();
    middleware.finalize(&context, &mut headers).await.unwrap();
    let cookie = SetCookie::single(&headers);

    let context = middleware
        .on_request(&cookie_header("session", &cookie.value))
        .await;
    assert!(!context.is_active());
    let context = middleware
        .on_request(&cookie_header("sid", &cookie.value))
        .await;
    assert!(context.is_active());
}

#[test]
fn https_only_is_an_alias_for_secure() {
    let config: SessionCookieConfig = serde_json::from_str(r#"{"https_only": true}"#).unwrap();
    assert!(config.secure);
}

#[test]
fn same_site_accepts_both_spellings_and_null() {
    for (raw, expected) in [
        (r#""strict""#, Some(SameSite::Strict)),
        (r#""Lax""#, Some(SameSite::Lax)),
        (r#""none""#, Some(SameSite::None)),
        ("null", None),
    ] {
        let config: SessionCookieConfig =
            serde_json::from_str(&format!(r#"{{"same_site": {raw}}}"#)).unwrap();
        assert_eq!(config.same_site, expected, "{raw}");
    }
    assert!(serde_json::from_str::<SessionCookieConfig>(r#"{"same_site": "sometimes"}"#).is_err());
}

#[test]
fn max_age_is_parsed_from_a_human_readable_duration() {
    let config: SessionCookieConfig = serde_json::from_str(r#"{"max_age": "1h"}"#).unwrap();
    assert_eq!(config.max_age, Some(std::time::Duration::from_secs(3600)));
    let config: SessionCookieConfig = serde_json::from_str(r#"{"max_age": null}"#).unwrap();
    assert_eq!(config.max_age, None);
}
