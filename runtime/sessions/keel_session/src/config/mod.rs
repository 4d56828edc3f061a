//! Types related to [`SessionConfig`][crate::SessionConfig].
mod cookie;
mod state;

pub use cookie::SessionCookieConfig;
pub use state::SessionStateConfig;

pub(crate) const FOURTEEN_DAYS: std::time::Duration = std::time::Duration::from_secs(14 * 24 * 60 * 60);
