//! Tamper-evident session cookies.
//!
//! A session cookie only carries the session ID, the server-side record
//! holds everything else. The ID is signed with HMAC-SHA256 together with
//! the time it was issued at:
//!
//! ```text
//! base64url(id) "." base64url(issued_at) "." base64url(hmac(secret, base64url(id) "." base64url(issued_at)))
//! ```
use crate::SessionId;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use jiff::Timestamp;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
/// Signs session IDs into cookie values and verifies them on the way back in.
pub struct CookieSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner").finish_non_exhaustive()
    }
}

impl CookieSigner {
    /// Build a signer keyed with the given secret.
    ///
    /// An empty secret is rejected.
    pub fn new(secret: &SecretString) -> Result<Self, EmptySecretError> {
        let secret = secret.expose_secret().as_bytes();
        if secret.is_empty() {
            return Err(EmptySecretError);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| EmptySecretError)?;
        Ok(Self { mac })
    }

    /// Sign the session ID, stamping it with the current time.
    pub fn sign(&self, id: &SessionId) -> String {
        self.sign_at(id, Timestamp::now())
    }

    /// Verify a cookie value and extract the session ID it carries.
    ///
    /// If `max_age` is set, tokens issued longer than `max_age` ago are rejected.
    pub fn verify(
        &self,
        token: &str,
        max_age: Option<std::time::Duration>,
    ) -> Result<SessionId, VerificationError> {
        self.verify_at(token, max_age, Timestamp::now())
    }

    fn sign_at(&self, id: &SessionId, issued_at: Timestamp) -> String {
        let payload = URL_SAFE_NO_PAD.encode(id.cookie_payload());
        let issued_at = URL_SAFE_NO_PAD.encode(issued_at.as_second().max(0).to_be_bytes());
        let signed = format!("{payload}.{issued_at}");
        let signature = URL_SAFE_NO_PAD.encode(self.signature(&signed));
        format!("{signed}.{signature}")
    }

    fn verify_at(
        &self,
        token: &str,
        max_age: Option<std::time::Duration>,
        now: Timestamp,
    ) -> Result<SessionId, VerificationError> {
        let Some((signed, signature)) = token.rsplit_once('.') else {
            return Err(VerificationError::Malformed("missing signature"));
        };
        let Some((payload, issued_at)) = signed.split_once('.') else {
            return Err(VerificationError::Malformed("missing timestamp"));
        };
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| VerificationError::Malformed("signature is not valid base64"))?;

        let mut mac = self.mac.clone();
        mac.update(signed.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| VerificationError::BadSignature)?;

        let issued_at = URL_SAFE_NO_PAD
            .decode(issued_at)
            .ok()
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(i64::from_be_bytes)
            .ok_or(VerificationError::Malformed("invalid timestamp"))?;
        if let Some(max_age) = max_age {
            let age = now.as_second().saturating_sub(issued_at);
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            if age > max_age {
                return Err(VerificationError::Expired {
                    age: std::time::Duration::from_secs(age.unsigned_abs()),
                });
            }
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| VerificationError::Malformed("payload is not valid base64"))?;
        std::str::from_utf8(&payload)
            .ok()
            .and_then(|p| p.parse::<SessionId>().ok())
            .ok_or(VerificationError::Malformed("payload is not a session id"))
    }

    fn signature(&self, signed: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(signed.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The secret used to sign session cookies can't be empty")]
/// The error returned by [`CookieSigner::new`] when the secret is empty.
pub struct EmptySecretError;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
/// Why a session cookie was rejected.
///
/// The reason is meant for server-side logs: clients are never told
/// why their cookie was ignored.
pub enum VerificationError {
    #[error("The session cookie is malformed: {0}")]
    Malformed(&'static str),
    #[error("The session cookie signature doesn't match")]
    BadSignature,
    #[error("The session cookie expired ({age:?} old)")]
    Expired { age: std::time::Duration },
}
