//! Operator authentication: Google sign-in behind an email allowlist,
//! with a JWT session cookie.
//!
//! This is separate from the connect flow in `oauth`: signing in grants
//! access to the dashboard API, it does not connect any data source.

mod handlers;
mod jwt;
mod middleware;
pub mod types;

pub use handlers::{auth_callback, auth_login, auth_logout, auth_me};
pub use middleware::{build_auth_cookie, extract_auth_user, require_auth};
