//! The provider-adapter seam for the sync engine.
//!
//! Gmail and Microsoft Graph expose near-identical capabilities behind
//! different wire formats and pagination schemes; one trait keeps the
//! orchestrator provider-agnostic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{NormalizedCalendarEvent, NormalizedEmail, Provider};

/// One page of normalized items from a provider list API.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque continuation: a `pageToken` for Google, a full
    /// `@odata.nextLink` URL for Microsoft. `None` ends the listing.
    pub next_page: Option<String>,
    /// Items dropped during normalization (malformed, under the
    /// minimum-viable-meeting filter, all-day). Logged, never fatal.
    pub skipped: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            next_page: None,
            skipped: 0,
        }
    }
}

/// A provider's message/event list APIs, normalized.
///
/// Implementations are internally sequential; concurrency happens across
/// adapters, not within one.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether `list_emails` pages arrive in ascending `received_at` order.
    /// The orchestrator only advances the timestamp cursor page-by-page for
    /// ascending listings; a newest-first listing must finish the whole run
    /// before the cursor may move.
    fn emails_oldest_first(&self) -> bool;

    /// One page of messages received at or after `since`.
    async fn list_emails(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> anyhow::Result<Page<NormalizedEmail>>;

    /// One page of calendar events in the window starting at `since`.
    async fn list_events(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> anyhow::Result<Page<NormalizedCalendarEvent>>;
}

/// Maximum characters of body text/html kept per email.
pub const BODY_CAP_CHARS: usize = 10_000;

/// Truncate on a char boundary at the body cap.
pub fn cap_body(body: String) -> String {
    if body.chars().count() <= BODY_CAP_CHARS {
        return body;
    }
    body.chars().take(BODY_CAP_CHARS).collect()
}

/// The minimum-viable-meeting filter: an event is only worth persisting
/// when at least two people are involved.
pub fn has_enough_attendees(attendees: &[String]) -> bool {
    attendees.len() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_body_truncates_on_char_boundary() {
        let long = "é".repeat(BODY_CAP_CHARS + 5);
        let capped = cap_body(long);
        assert_eq!(capped.chars().count(), BODY_CAP_CHARS);
    }

    #[test]
    fn cap_body_leaves_short_bodies_alone() {
        assert_eq!(cap_body("hello".to_string()), "hello");
    }

    #[test]
    fn attendee_filter_requires_two() {
        assert!(!has_enough_attendees(&[]));
        assert!(!has_enough_attendees(&["solo@example.com".to_string()]));
        assert!(has_enough_attendees(&[
            "a@example.com".to_string(),
            "b@example.com".to_string()
        ]));
    }
}
