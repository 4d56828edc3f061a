#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the way server-side session state is stored.
pub struct SessionStateConfig {
    /// The time-to-live of the server-side session state, i.e.
    /// how long to keep a session record in the storage backend you chose
    /// after it was last written.
    ///
    /// Backends turn it into an absolute deadline at write time; expiring the
    /// record past that deadline is the backend's job (e.g. DynamoDB's native TTL).
    ///
    /// # Default
    ///
    /// The default value is 14 days.
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: std::time::Duration,
}

impl Default for SessionStateConfig {
    fn default() -> Self {
        Self { ttl: default_ttl() }
    }
}

fn default_ttl() -> std::time::Duration {
    super::FOURTEEN_DAYS
}
