use keel_session::{SessionMiddleware, SessionStore};

mod config;
mod fixtures;
mod middleware;

static_assertions::assert_impl_all!(SessionStore: Send, Sync);
static_assertions::assert_impl_all!(SessionMiddleware: Send, Sync);
