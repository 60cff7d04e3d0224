//! OAuth2 connect flows and token lifecycle for external providers.
//!
//! This module owns:
//! - the per-provider endpoint/scope catalog (`provider`)
//! - the versioned `state` parameter codec (`state`)
//! - code exchange, identity lookup and refresh-on-expiry (`token`)
//! - the authorize/callback HTTP handlers (`handlers`)

pub mod handlers;
pub mod provider;
pub mod state;
pub mod token;

pub use handlers::{oauth_authorize, oauth_callback};
pub use state::ConnectState;
pub use token::{get_valid_token, TokenError};
