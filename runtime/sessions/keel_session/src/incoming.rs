use crate::{CookieSigner, SessionId, config::SessionCookieConfig};
use biscotti::{Processor, RequestCookies};
use http::HeaderMap;
use http::header::COOKIE;
use tracing_log_error::log_error;

/// The session ID carried by the incoming request, if any.
///
/// Built using [`IncomingSession::extract`].
#[derive(Debug, Clone, Copy)]
pub struct IncomingSession {
    pub(crate) id: SessionId,
}

impl IncomingSession {
    /// Extract the session cookie from the request headers and verify its signature.
    ///
    /// If the cookie is not found, or if the cookie is invalid, this method will return `None`.
    /// Invalid cookies are logged, but the reason is never surfaced to the caller:
    /// from the client's perspective, a bad cookie and a missing cookie are the same thing.
    pub fn extract(
        headers: &HeaderMap,
        config: &SessionCookieConfig,
        signer: &CookieSigner,
        processor: &Processor,
    ) -> Option<Self> {
        let mut cookies = RequestCookies::new();
        for header in headers.get_all(COOKIE) {
            let header = match header.to_str() {
                Ok(h) => h,
                Err(e) => {
                    log_error!(
                        e,
                        level: tracing::Level::WARN,
                        "A `Cookie` header contains non-printable characters, ignoring it"
                    );
                    continue;
                }
            };
            // Skip the broken header, keep whatever we parsed from the others.
            if let Err(e) = cookies.extend_from_header(header, processor) {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "A request cookie is invalid, ignoring it"
                );
            }
        }

        let cookie = cookies.get(&config.name)?;
        match signer.verify(cookie.value(), config.max_age) {
            Ok(id) => Some(Self { id }),
            Err(e) => {
                log_error!(
                    e,
                    level: tracing::Level::WARN,
                    "Invalid session cookie, treating the request as session-less."
                );
                None
            }
        }
    }

    /// Build an [`IncomingSession`] for a session ID you already verified.
    pub fn from_id(id: SessionId) -> Self {
        Self { id }
    }

    /// The session ID attached to the request.
    pub fn id(&self) -> SessionId {
        self.id
    }
}
