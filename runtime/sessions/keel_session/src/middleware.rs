use std::borrow::Cow;

use biscotti::{Processor, ProcessorConfig, RemovalCookie, ResponseCookie, ResponseCookies};
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use jiff::SignedDuration;
use tracing_log_error::log_error;

use crate::context::ContextState;
use crate::signer::EmptySecretError;
use crate::store::SessionRecordRef;
use crate::store::errors::DeleteError;
use crate::{CookieSigner, IncomingSession, SessionConfig, SessionContext, SessionId, SessionStore};

/// Attach sessions to requests and session cookies to responses.
///
/// The host framework calls [`on_request`](Self::on_request) before invoking the
/// request handler and [`on_response`](Self::on_response) (or
/// [`finalize`](Self::finalize)) once the response is ready.
///
/// Changes to the state of an existing session are never persisted implicitly:
/// use [`SessionStore::update`] from the request handler.
pub struct SessionMiddleware {
    store: SessionStore,
    config: SessionConfig,
    signer: CookieSigner,
    processor: Processor,
}

impl std::fmt::Debug for SessionMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionMiddleware {
    /// Build the middleware on top of the given store.
    ///
    /// It fails if the signing secret in `config` is empty.
    pub fn new(store: SessionStore, config: SessionConfig) -> Result<Self, EmptySecretError> {
        let signer = CookieSigner::new(&config.secret_key)?;
        Ok(Self {
            store,
            config,
            signer,
            processor: ProcessorConfig::default().into(),
        })
    }

    /// The store that holds server-side session records.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The configuration this middleware was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolve the session attached to an incoming request.
    ///
    /// It never fails: a missing, tampered or expired cookie, as well as a
    /// session record that can't be found or loaded, all result in a
    /// session-less context.
    #[tracing::instrument(name = "Resolve incoming session", level = tracing::Level::DEBUG, skip_all)]
    pub async fn on_request(&self, headers: &HeaderMap) -> SessionContext {
        let Some(incoming) =
            IncomingSession::extract(headers, &self.config.cookie, &self.signer, &self.processor)
        else {
            return SessionContext::anonymous();
        };
        match self.store.load(&incoming.id).await {
            Ok(Some(record)) => SessionContext::active(incoming.id, record),
            Ok(None) => {
                tracing::debug!(
                    session.id = %incoming.id,
                    "The session cookie is valid, but there is no matching record. \
                    Treating the request as session-less."
                );
                SessionContext::anonymous()
            }
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "Failed to load the server-side session record. \
                    Treating the request as session-less."
                );
                SessionContext::anonymous()
            }
        }
    }

    /// Attach the session cookie to the outgoing response, if needed.
    ///
    /// If creating the session record fails, the failure is logged and the response
    /// goes out without a session cookie.
    /// Use [`finalize`](Self::finalize) if you want to handle the error yourself.
    pub async fn on_response<B>(
        &self,
        context: &SessionContext,
        mut response: http::Response<B>,
    ) -> http::Response<B> {
        if let Err(e) = self.finalize(context, response.headers_mut()).await {
            log_error!(
                e,
                "Failed to finalize the session, the response won't carry a session cookie"
            );
        }
        response
    }

    /// Sync the session with the store and add the matching `Set-Cookie` header, if any.
    ///
    /// - Requests without a session get a brand-new session record and a signed cookie.
    /// - Requests with an active session are left alone.
    /// - Sessions ended via [`end_session`](Self::end_session) get a removal cookie.
    #[tracing::instrument(name = "Finalize session", level = tracing::Level::DEBUG, skip_all)]
    pub async fn finalize(
        &self,
        context: &SessionContext,
        headers: &mut HeaderMap,
    ) -> Result<(), errors::FinalizeError> {
        let cookie = match &context.state {
            ContextState::Active { .. } => return Ok(()),
            ContextState::Ended { id } => {
                tracing::debug!(session.id = %id, "Removing the session cookie");
                self.removal_cookie()
            }
            ContextState::Anonymous { initial_state } => {
                let id = SessionId::random();
                let record = SessionRecordRef {
                    state: Cow::Borrowed(initial_state),
                    ttl: self.config.state.ttl,
                };
                self.store.create(&id, record).await?;
                self.session_cookie(&id)
            }
        };

        let mut response_cookies = ResponseCookies::new();
        response_cookies.insert(cookie);
        for value in response_cookies.header_values(&self.processor) {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| errors::FinalizeError::InvalidHeaderValue { value })?;
            headers.append(SET_COOKIE, value);
        }
        Ok(())
    }

    /// Delete the server-side record of the current session.
    ///
    /// Finalizing the context afterwards sends a removal cookie to the client.
    /// It's a no-op if the request has no active session.
    pub async fn end_session(&self, context: &mut SessionContext) -> Result<(), DeleteError> {
        let Some(id) = context.id() else {
            return Ok(());
        };
        self.store.delete(&id).await?;
        context.end();
        Ok(())
    }

    fn session_cookie(&self, id: &SessionId) -> ResponseCookie<'static> {
        let cookie_config = &self.config.cookie;
        let mut cookie = ResponseCookie::new(cookie_config.name.clone(), self.signer.sign(id));
        if let Some(domain) = cookie_config.domain.as_deref() {
            cookie = cookie.set_domain(domain.to_owned());
        }
        if let Some(path) = cookie_config.path.as_deref() {
            cookie = cookie.set_path(path.to_owned());
        }
        if let Some(same_site) = cookie_config.same_site {
            cookie = cookie.set_same_site(same_site);
        }
        if cookie_config.secure {
            cookie = cookie.set_secure(true);
        }
        if cookie_config.http_only {
            cookie = cookie.set_http_only(true);
        }
        if let Some(max_age) = cookie_config.max_age {
            let max_age = SignedDuration::try_from(max_age).unwrap_or(SignedDuration::MAX);
            cookie = cookie.set_max_age(max_age);
        }
        cookie
    }

    fn removal_cookie(&self) -> ResponseCookie<'static> {
        let cookie_config = &self.config.cookie;
        let mut cookie = RemovalCookie::new(cookie_config.name.clone());
        if let Some(domain) = cookie_config.domain.as_deref() {
            cookie = cookie.set_domain(domain.to_owned());
        }
        if let Some(path) = cookie_config.path.as_deref() {
            cookie = cookie.set_path(path.to_owned());
        }
        cookie.into()
    }
}

/// Errors that can occur when finalizing a session.
pub mod errors {
    use crate::store::errors::CreateError;

    /// The error returned by [`SessionMiddleware::finalize`][super::SessionMiddleware::finalize].
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum FinalizeError {
        #[error("Failed to create a new session record")]
        CreateError(#[from] CreateError),
        #[error("The session cookie can't be encoded as a header value")]
        InvalidHeaderValue { value: String },
    }

    impl FinalizeError {
        /// The HTTP status code that best describes the failure.
        pub fn status_code(&self) -> http::StatusCode {
            match self {
                FinalizeError::CreateError(CreateError::UniqueConflict(_)) => {
                    http::StatusCode::CONFLICT
                }
                FinalizeError::CreateError(CreateError::Store(e)) if e.is_transient() => {
                    http::StatusCode::SERVICE_UNAVAILABLE
                }
                _ => http::StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }
}
