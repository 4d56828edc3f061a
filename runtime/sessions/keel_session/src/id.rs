use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
/// The identifier for a session.
///
/// # Format stability
///
/// From an API perspective, a session id is an opaque sequence of bytes.
/// Do **not** depend on the specifics of the underlying representation.
/// It may change between versions and those changes will not be considered
/// breaking changes.
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Generate a new random identifier using the random number generator
    /// provided by the underlying operating system.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn inner(&self) -> uuid::Uuid {
        self.0
    }

    /// The representation used as the primary key in storage backends,
    /// e.g. `67e55044-10b1-426f-9247-bb680e5fe0c8`.
    pub fn storage_key(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// The compact representation embedded in session cookies,
    /// e.g. `67e5504410b1426f9247bb680e5fe0c8`.
    pub(crate) fn cookie_payload(&self) -> String {
        self.0.simple().to_string()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    /// Accepts both the hyphenated and the simple (hex-only) forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| InvalidSessionId)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The value is not a valid session id")]
/// The error returned when parsing a [`SessionId`] fails.
pub struct InvalidSessionId;
