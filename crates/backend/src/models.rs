//! Database row types and their conversions to API/domain types.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared_types::{ConnectionResponse, Provider, SyncRunResponse};
use uuid::Uuid;

/// Stored OAuth credentials for one (account, provider, mailbox) tuple.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::oauth_tokens)]
pub struct OAuthTokenRow {
    pub id: Uuid,
    pub account_id: String,
    pub provider: String,
    pub email_address: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
    pub api_domain: Option<String>,
    pub is_active: bool,
    pub sync_status: String,
    pub last_synced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthTokenRow {
    pub fn provider_kind(&self) -> Option<Provider> {
        Provider::from_str(&self.provider)
    }
}

impl From<OAuthTokenRow> for ConnectionResponse {
    fn from(row: OAuthTokenRow) -> Self {
        ConnectionResponse {
            id: row.id,
            account_id: row.account_id,
            provider: row.provider,
            email_address: row.email_address,
            scope: row.scope,
            is_active: row.is_active,
            sync_status: row.sync_status,
            last_synced: row.last_synced,
            created_at: row.created_at,
        }
    }
}

/// Insert payload for `oauth_tokens`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::oauth_tokens)]
pub struct NewOAuthToken {
    pub account_id: String,
    pub provider: String,
    pub email_address: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
    pub api_domain: Option<String>,
    pub is_active: bool,
    pub sync_status: String,
}

/// One sync run's bookkeeping row.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::sync_runs)]
pub struct SyncRunRow {
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

impl From<SyncRunRow> for SyncRunResponse {
    fn from(row: SyncRunRow) -> Self {
        SyncRunResponse {
            id: row.id,
            account_id: row.account_id,
            provider: row.provider,
            status: row.status,
            emails_synced: row.emails_synced,
            events_synced: row.events_synced,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        }
    }
}

/// Insert payload for `emails`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::emails)]
pub struct NewEmail {
    pub account_id: String,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<Option<String>>,
    pub cc_addresses: Option<Vec<Option<String>>>,
    pub bcc_addresses: Option<Vec<Option<String>>>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
    pub labels: Option<Vec<Option<String>>>,
    pub is_read: bool,
    pub has_attachments: bool,
}

impl From<&shared_types::NormalizedEmail> for NewEmail {
    fn from(email: &shared_types::NormalizedEmail) -> Self {
        let wrap = |items: &[String]| -> Vec<Option<String>> {
            items.iter().map(|s| Some(s.clone())).collect()
        };
        let wrap_opt = |items: &[String]| -> Option<Vec<Option<String>>> {
            if items.is_empty() {
                None
            } else {
                Some(wrap(items))
            }
        };

        NewEmail {
            account_id: email.account_id.clone(),
            provider_message_id: email.provider_message_id.clone(),
            thread_id: email.thread_id.clone(),
            from_address: email.from_address.clone(),
            to_addresses: wrap(&email.to_addresses),
            cc_addresses: wrap_opt(&email.cc_addresses),
            bcc_addresses: wrap_opt(&email.bcc_addresses),
            subject: email.subject.clone(),
            body_text: email.body_text.clone(),
            body_html: email.body_html.clone(),
            received_at: email.received_at,
            labels: wrap_opt(&email.labels),
            is_read: email.is_read,
            has_attachments: email.has_attachments,
        }
    }
}

/// Insert payload for `calendar_events`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::calendar_events)]
pub struct NewCalendarEvent {
    pub account_id: String,
    pub calendar_event_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attendees: Vec<Option<String>>,
    pub organizer_email: Option<String>,
    pub meeting_link: Option<String>,
    pub source: String,
}

impl From<&shared_types::NormalizedCalendarEvent> for NewCalendarEvent {
    fn from(event: &shared_types::NormalizedCalendarEvent) -> Self {
        NewCalendarEvent {
            account_id: event.account_id.clone(),
            calendar_event_id: event.calendar_event_id.clone(),
            title: event.title.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            attendees: event.attendees.iter().map(|a| Some(a.clone())).collect(),
            organizer_email: event.organizer_email.clone(),
            meeting_link: event.meeting_link.clone(),
            source: event.source.as_str().to_string(),
        }
    }
}

/// A meeting row: a calendar event (or bot-joined session) with an optional
/// deal link. `meeting_id` starts as a `cal_` placeholder and is replaced in
/// place once the bot assigns a real id.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::meetings)]
pub struct MeetingRow {
    pub id: Uuid,
    pub account_id: String,
    pub meeting_id: String,
    pub deal_id: Option<String>,
    pub calendar_event_id: String,
    pub title: String,
    pub host_email: Option<String>,
    pub participant_emails: Vec<Option<String>>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `meetings`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::meetings)]
pub struct NewMeeting {
    pub account_id: String,
    pub meeting_id: String,
    pub deal_id: Option<String>,
    pub calendar_event_id: String,
    pub title: String,
    pub host_email: Option<String>,
    pub participant_emails: Vec<Option<String>>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub source: String,
}
