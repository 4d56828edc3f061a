/*!
Session management for HTTP services.

# Why do we need sessions?

The HTTP protocol is stateless: the client sends a request, the server
parses its content, performs some processing and returns a response.
That's not enough to, for example, keep a user logged in: they would be forced
to authenticate **for every single request**.

**Sessions** are the solution. They allow the server to attach state to a set of requests coming
from the same client. They are built on top of cookies: the server sets a
cookie in the HTTP response (`Set-Cookie` header), the client (e.g. the browser) stores the
cookie and sends it back to the server whenever it issues new requests (using the `Cookie` header).

# Anatomy of a session

The session cookie only contains a signed **session ID**.
The session state lives on the server, inside a **session storage backend**: any type
that implements [`SessionStorageBackend`][store::SessionStorageBackend].
`keel_session_memory_store` is geared towards tests, `keel_session_dynamodb` towards production.
The cookie is a capability: it references server-side state, it never carries it.

# Request lifecycle

1. [`SessionMiddleware::on_request`] verifies the session cookie and loads the matching
   record into a [`SessionContext`].
2. Your handler reads the context and, if needed, writes through [`SessionStore`].
3. [`SessionMiddleware::on_response`] creates a record and attaches a fresh session cookie
   if the request didn't have a valid session.

## References

Further reading on sessions:
- [RFC 6265](https://datatracker.ietf.org/doc/html/rfc6265);
- [OWASP's session management cheat-sheet](https://cheatsheetseries.owasp.org/cheatsheets/Session_Management_Cheat_Sheet.html).
*/
pub mod config;
mod context;
mod id;
mod incoming;
mod middleware;
mod signer;
mod store_;

pub use context::SessionContext;
pub use id::{InvalidSessionId, SessionId};
pub use incoming::IncomingSession;
pub use middleware::SessionMiddleware;
pub use signer::{CookieSigner, EmptySecretError, VerificationError};
pub use store_::SessionStore;

pub mod store {
    //! Types and traits related to [`SessionStore`][super::SessionStore].
    pub use crate::store_::errors;
    pub use crate::store_::{SessionRecord, SessionRecordRef, SessionStorageBackend};
}

pub mod errors {
    //! Errors raised while attaching sessions to responses.
    pub use crate::middleware::errors::FinalizeError;
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how sessions are managed.
pub struct SessionConfig {
    /// The secret used to sign session cookies.
    ///
    /// Rotating it invalidates every outstanding session cookie.
    pub secret_key: secrecy::SecretString,
    #[serde(default)]
    /// Configure the session cookie.
    pub cookie: crate::config::SessionCookieConfig,
    #[serde(default)]
    /// Configure how the server-side session state should behave.
    pub state: crate::config::SessionStateConfig,
}

impl SessionConfig {
    /// Default settings, signing cookies with the given secret.
    pub fn new(secret_key: secrecy::SecretString) -> Self {
        Self {
            secret_key,
            cookie: Default::default(),
            state: Default::default(),
        }
    }
}
