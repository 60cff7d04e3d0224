use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod meeting_link;

pub use meeting_link::{extract_meeting_link, resolve_meeting_link};

/// An external OAuth2 provider that accounts can connect.
///
/// Wire names are lowercase and stored as VARCHAR in `oauth_tokens.provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Hubspot,
    Pipedrive,
    Salesforce,
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Hubspot => "hubspot",
            Provider::Pipedrive => "pipedrive",
            Provider::Salesforce => "salesforce",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "microsoft" => Some(Provider::Microsoft),
            "hubspot" => Some(Provider::Hubspot),
            "pipedrive" => Some(Provider::Pipedrive),
            "salesforce" => Some(Provider::Salesforce),
            _ => None,
        }
    }

    /// Whether email/calendar sync is implemented for this provider.
    ///
    /// CRM providers (HubSpot, Pipedrive, Salesforce) only participate in the
    /// token lifecycle; their data import runs elsewhere.
    pub fn syncable(&self) -> bool {
        matches!(self, Provider::Google | Provider::Microsoft)
    }

    pub fn all() -> [Provider; 5] {
        [
            Provider::Google,
            Provider::Microsoft,
            Provider::Hubspot,
            Provider::Pipedrive,
            Provider::Salesforce,
        ]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one sync run.
///
/// Transitions within a run are monotonic:
/// `not_started|pending -> in_progress -> completed|failed`.
/// A new run resets the connection back to `in_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    NotStarted,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &str {
        match self {
            SyncState::NotStarted => "not_started",
            SyncState::Pending => "pending",
            SyncState::InProgress => "in_progress",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(SyncState::NotStarted),
            "pending" => Some(SyncState::Pending),
            "in_progress" | "syncing" => Some(SyncState::InProgress),
            "completed" => Some(SyncState::Completed),
            "failed" => Some(SyncState::Failed),
            _ => None,
        }
    }

    /// Whether `next` is a legal transition from `self` within one run.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        match (self, next) {
            (SyncState::NotStarted | SyncState::Pending, SyncState::InProgress) => true,
            (SyncState::InProgress, SyncState::Completed | SyncState::Failed) => true,
            // A new run may reclaim a finished (or stuck) connection.
            (SyncState::Completed | SyncState::Failed | SyncState::InProgress, SyncState::InProgress) => {
                true
            }
            _ => false,
        }
    }
}

/// Which calendar backend a normalized event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    GoogleCalendar,
    MicrosoftCalendar,
}

impl EventSource {
    pub fn as_str(&self) -> &str {
        match self {
            EventSource::GoogleCalendar => "google_calendar",
            EventSource::MicrosoftCalendar => "microsoft_calendar",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "google_calendar" => Some(EventSource::GoogleCalendar),
            "microsoft_calendar" => Some(EventSource::MicrosoftCalendar),
            _ => None,
        }
    }
}

/// Canonical email record merged from Gmail/Microsoft message formats.
///
/// `(account_id, provider_message_id)` is the dedup key; re-syncing the same
/// message must never produce a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEmail {
    pub account_id: String,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
    pub labels: Vec<String>,
    pub is_read: bool,
    pub has_attachments: bool,
}

/// Canonical calendar event merged from Google Calendar / Microsoft Graph.
///
/// `calendar_event_id` is provider-prefixed (`google_<id>` / `microsoft_<id>`)
/// so ids from different backends can never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedCalendarEvent {
    pub account_id: String,
    pub calendar_event_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attendees: Vec<String>,
    pub organizer_email: Option<String>,
    pub meeting_link: Option<String>,
    pub source: EventSource,
}

/// Placeholder meeting id used until the bot assigns a real one.
pub fn placeholder_meeting_id(calendar_event_id: &str) -> String {
    format!("cal_{}", calendar_event_id)
}

/// Whether a meeting id is still the synthetic placeholder.
pub fn is_placeholder_meeting_id(meeting_id: &str) -> bool {
    meeting_id.starts_with("cal_")
}

// ============================================================================
// API request/response types
// ============================================================================

/// A connected provider account, as exposed over the API (secrets stripped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub id: Uuid,
    pub account_id: String,
    pub provider: String,
    pub email_address: String,
    pub scope: Option<String>,
    pub is_active: bool,
    pub sync_status: String,
    pub last_synced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Body for `POST /api/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub account_id: String,
    /// Restrict the run to one connected mailbox when set.
    pub email: Option<String>,
}

/// Outcome of one provider connection's sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub provider: String,
    pub processed: usize,
    pub saved: usize,
    pub failed: usize,
}

/// One row of `GET /api/sync/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunResponse {
    pub id: Uuid,
    pub account_id: String,
    pub provider: String,
    pub status: String,
    pub emails_synced: i32,
    pub events_synced: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Response from `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInitResponse {
    pub auth_url: String,
}

/// Current authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserResponse {
    pub email: String,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trip() {
        for p in Provider::all() {
            assert_eq!(Provider::from_str(p.as_str()), Some(p));
        }
        assert_eq!(Provider::from_str("gmail"), None);
    }

    #[test]
    fn only_mail_providers_are_syncable() {
        assert!(Provider::Google.syncable());
        assert!(Provider::Microsoft.syncable());
        assert!(!Provider::Hubspot.syncable());
        assert!(!Provider::Pipedrive.syncable());
        assert!(!Provider::Salesforce.syncable());
    }

    #[test]
    fn sync_state_transitions_are_monotonic_within_a_run() {
        assert!(SyncState::Pending.can_transition_to(SyncState::InProgress));
        assert!(SyncState::InProgress.can_transition_to(SyncState::Completed));
        assert!(SyncState::InProgress.can_transition_to(SyncState::Failed));
        assert!(!SyncState::Completed.can_transition_to(SyncState::Failed));
        assert!(!SyncState::Failed.can_transition_to(SyncState::Completed));
        // A fresh run may reclaim a finished or stuck connection.
        assert!(SyncState::Failed.can_transition_to(SyncState::InProgress));
        assert!(SyncState::InProgress.can_transition_to(SyncState::InProgress));
    }

    #[test]
    fn legacy_syncing_status_maps_to_in_progress() {
        assert_eq!(SyncState::from_str("syncing"), Some(SyncState::InProgress));
    }

    #[test]
    fn placeholder_meeting_ids() {
        let id = placeholder_meeting_id("google_abc123");
        assert_eq!(id, "cal_google_abc123");
        assert!(is_placeholder_meeting_id(&id));
        assert!(!is_placeholder_meeting_id("mg_789"));
    }
}
