//! Gmail and Google Calendar adapter over the REST APIs.
//!
//! Gmail listing is two-phase: the list endpoint only returns message ids,
//! so each page is followed by per-id detail fetches. A single message that
//! fails to fetch or parse is skipped, not fatal.

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use shared_types::{
    resolve_meeting_link, EventSource, NormalizedCalendarEvent, NormalizedEmail, Provider,
};

use super::adapter::{cap_body, has_enough_attendees, Page, ProviderAdapter};

const GMAIL_MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";
const CALENDAR_EVENTS_URL: &str =
    "https://www.googleapis.com/calendar/v3/calendars/primary/events";

const EMAIL_PAGE_SIZE: u32 = 100;
const EVENT_PAGE_SIZE: u32 = 250;

/// How far into the future the calendar window extends.
const EVENT_WINDOW_DAYS: i64 = 365;

pub struct GoogleAdapter {
    http: reqwest::Client,
    account_id: String,
}

impl GoogleAdapter {
    pub fn new(http: reqwest::Client, account_id: impl Into<String>) -> Self {
        Self {
            http,
            account_id: account_id.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    /// Gmail's `messages.list` has no order parameter and returns newest
    /// messages first.
    fn emails_oldest_first(&self) -> bool {
        false
    }

    async fn list_emails(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> anyhow::Result<Page<NormalizedEmail>> {
        // Gmail's `after:` search operator takes epoch seconds.
        let query = format!("after:{}", since.timestamp());
        let max_results = EMAIL_PAGE_SIZE.to_string();

        let mut request = self
            .http
            .get(GMAIL_MESSAGES_URL)
            .bearer_auth(access_token)
            .query(&[
                ("q", query.as_str()),
                ("maxResults", max_results.as_str()),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?.error_for_status()?;
        let list: MessageListResponse = response.json().await?;

        let mut page = Page::empty();
        page.next_page = list.next_page_token;

        for message_ref in list.messages {
            match self.fetch_message(access_token, &message_ref.id).await {
                Ok(message) => match normalize_message(&self.account_id, message) {
                    Some(email) => page.items.push(email),
                    None => {
                        tracing::debug!("Skipping unparseable Gmail message {}", message_ref.id);
                        page.skipped += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to fetch Gmail message {}: {}", message_ref.id, e);
                    page.skipped += 1;
                }
            }
        }

        Ok(page)
    }

    async fn list_events(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> anyhow::Result<Page<NormalizedCalendarEvent>> {
        let time_min = since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let time_max = (Utc::now() + Duration::days(EVENT_WINDOW_DAYS))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let max_results = EVENT_PAGE_SIZE.to_string();

        let mut request = self
            .http
            .get(CALENDAR_EVENTS_URL)
            .bearer_auth(access_token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                // Expand recurring series into individual instances.
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", max_results.as_str()),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?.error_for_status()?;
        let list: EventListResponse = response.json().await?;

        let mut page = Page::empty();
        page.next_page = list.next_page_token;

        for event in list.items {
            match normalize_event(&self.account_id, event) {
                Some(normalized) => page.items.push(normalized),
                None => page.skipped += 1,
            }
        }

        Ok(page)
    }
}

impl GoogleAdapter {
    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> anyhow::Result<GmailMessage> {
        let url = format!("{}/{}", GMAIL_MESSAGES_URL, message_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

// ---------------------------------------------------------------------------
// Gmail wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    /// Epoch milliseconds, as a string.
    internal_date: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<GmailHeader>,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

// ---------------------------------------------------------------------------
// Message normalization
// ---------------------------------------------------------------------------

fn normalize_message(account_id: &str, message: GmailMessage) -> Option<NormalizedEmail> {
    let payload = message.payload?;

    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| DateTime::from_timestamp_millis(ms))?;

    let from_address = parse_from_header(&header(&payload, "From").unwrap_or_default());
    let subject = header(&payload, "Subject").unwrap_or_default();
    let to_addresses = parse_address_list(header(&payload, "To").as_deref());
    let cc_addresses = parse_address_list(header(&payload, "Cc").as_deref());
    let bcc_addresses = parse_address_list(header(&payload, "Bcc").as_deref());

    let (body_text, body_html) = extract_bodies(&payload);
    let has_attachments = has_attachment_parts(&payload);
    let is_read = !message.label_ids.iter().any(|l| l == "UNREAD");

    Some(NormalizedEmail {
        account_id: account_id.to_string(),
        provider_message_id: message.id,
        thread_id: message.thread_id,
        from_address,
        to_addresses,
        cc_addresses,
        bcc_addresses,
        subject,
        body_text: body_text.map(cap_body),
        body_html: body_html.map(cap_body),
        received_at,
        labels: message.label_ids,
        is_read,
        has_attachments,
    })
}

/// First header with the given name, case-insensitive.
fn header(payload: &GmailPart, name: &str) -> Option<String> {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// Extract the bare address from an RFC 5322 mailbox
/// (`Display Name <user@host>` or just `user@host`).
fn parse_from_header(raw: &str) -> String {
    if let (Some(open), Some(close)) = (raw.find('<'), raw.rfind('>')) {
        if open < close {
            return raw[open + 1..close].trim().to_string();
        }
    }
    raw.trim().to_string()
}

fn parse_address_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(parse_from_header)
            .filter(|a| !a.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Walk the MIME tree collecting the first text/plain and text/html bodies.
fn extract_bodies(part: &GmailPart) -> (Option<String>, Option<String>) {
    let mut text = None;
    let mut html = None;
    collect_bodies(part, &mut text, &mut html);
    (text, html)
}

fn collect_bodies(part: &GmailPart, text: &mut Option<String>, html: &mut Option<String>) {
    if text.is_some() && html.is_some() {
        return;
    }

    if part.mime_type == "text/plain" && text.is_none() {
        if let Some(decoded) = part.body.as_ref().and_then(decode_body) {
            *text = Some(decoded);
        }
    } else if part.mime_type == "text/html" && html.is_none() {
        if let Some(decoded) = part.body.as_ref().and_then(decode_body) {
            *html = Some(decoded);
        }
    }

    for child in &part.parts {
        collect_bodies(child, text, html);
    }
}

/// Gmail body data is URL-safe base64; padding varies by part.
fn decode_body(body: &GmailBody) -> Option<String> {
    let data = body.data.as_deref()?;
    let bytes = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn has_attachment_parts(part: &GmailPart) -> bool {
    if !part.filename.is_empty() {
        return true;
    }
    part.parts.iter().any(has_attachment_parts)
}

// ---------------------------------------------------------------------------
// Calendar wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
    #[serde(default)]
    attendees: Vec<EventAttendee>,
    organizer: Option<EventAttendee>,
    hangout_link: Option<String>,
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    /// Present for timed events; all-day events carry only `date`.
    date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EventAttendee {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    entry_point_type: Option<String>,
    uri: Option<String>,
}

// ---------------------------------------------------------------------------
// Event normalization
// ---------------------------------------------------------------------------

fn normalize_event(account_id: &str, event: GoogleEvent) -> Option<NormalizedCalendarEvent> {
    // All-day events only carry a `date`; they are not meetings.
    let start_time = event.start.as_ref().and_then(|t| t.date_time)?;
    let end_time = event.end.as_ref().and_then(|t| t.date_time)?;

    let attendees: Vec<String> = event
        .attendees
        .iter()
        .filter_map(|a| a.email.clone())
        .collect();
    if !has_enough_attendees(&attendees) {
        return None;
    }

    let structured = structured_link(&event);
    let fallback = format!(
        "{} {}",
        event.description.as_deref().unwrap_or_default(),
        event.location.as_deref().unwrap_or_default()
    );
    let meeting_link = resolve_meeting_link(structured.as_deref(), &fallback);

    Some(NormalizedCalendarEvent {
        account_id: account_id.to_string(),
        calendar_event_id: format!("google_{}", event.id),
        title: event.summary.unwrap_or_else(|| "(no title)".to_string()),
        start_time,
        end_time,
        attendees,
        organizer_email: event.organizer.and_then(|o| o.email),
        meeting_link,
        source: EventSource::GoogleCalendar,
    })
}

/// The structured conference URI: `hangoutLink`, else the first video
/// entry point.
fn structured_link(event: &GoogleEvent) -> Option<String> {
    if let Some(link) = &event.hangout_link {
        return Some(link.clone());
    }
    event.conference_data.as_ref().and_then(|c| {
        c.entry_points
            .iter()
            .find(|e| e.entry_point_type.as_deref() == Some("video"))
            .and_then(|e| e.uri.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_name_mailbox() {
        assert_eq!(
            parse_from_header("Jane Doe <jane@example.com>"),
            "jane@example.com"
        );
        assert_eq!(parse_from_header("jane@example.com"), "jane@example.com");
        assert_eq!(
            parse_from_header("  <spaced@example.com>  "),
            "spaced@example.com"
        );
    }

    #[test]
    fn splits_recipient_lists() {
        let parsed = parse_address_list(Some("A <a@x.com>, b@y.com"));
        assert_eq!(parsed, vec!["a@x.com".to_string(), "b@y.com".to_string()]);
        assert!(parse_address_list(None).is_empty());
    }

    #[test]
    fn normalizes_full_message() {
        let body = r#"{
            "id": "msg1",
            "threadId": "thr1",
            "labelIds": ["INBOX", "UNREAD"],
            "internalDate": "1714000000000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "Jane <jane@example.com>"},
                    {"name": "To", "value": "bob@example.com"},
                    {"name": "Subject", "value": "Q3 pipeline"}
                ],
                "parts": [
                    {
                        "mimeType": "text/plain",
                        "body": {"data": "aGVsbG8gd29ybGQ="}
                    },
                    {
                        "mimeType": "application/pdf",
                        "filename": "deck.pdf",
                        "body": {}
                    }
                ]
            }
        }"#;
        let message: GmailMessage = serde_json::from_str(body).unwrap();
        let email = normalize_message("acc1", message).unwrap();

        assert_eq!(email.provider_message_id, "msg1");
        assert_eq!(email.from_address, "jane@example.com");
        assert_eq!(email.subject, "Q3 pipeline");
        assert_eq!(email.body_text.as_deref(), Some("hello world"));
        assert!(!email.is_read);
        assert!(email.has_attachments);
        assert_eq!(email.received_at.timestamp(), 1_714_000_000);
    }

    #[test]
    fn message_without_payload_is_skipped() {
        let message: GmailMessage =
            serde_json::from_str(r#"{"id": "m", "internalDate": "1714000000000"}"#).unwrap();
        assert!(normalize_message("acc1", message).is_none());
    }

    #[test]
    fn all_day_event_is_filtered() {
        let body = r#"{
            "id": "ev1",
            "summary": "Offsite",
            "start": {"date": "2024-05-01"},
            "end": {"date": "2024-05-02"},
            "attendees": [{"email": "a@x.com"}, {"email": "b@x.com"}]
        }"#;
        let event: GoogleEvent = serde_json::from_str(body).unwrap();
        assert!(normalize_event("acc1", event).is_none());
    }

    #[test]
    fn solo_event_is_filtered() {
        let body = r#"{
            "id": "ev2",
            "summary": "Focus time",
            "start": {"dateTime": "2024-05-01T10:00:00Z"},
            "end": {"dateTime": "2024-05-01T11:00:00Z"},
            "attendees": [{"email": "a@x.com"}]
        }"#;
        let event: GoogleEvent = serde_json::from_str(body).unwrap();
        assert!(normalize_event("acc1", event).is_none());
    }

    #[test]
    fn event_id_is_provider_prefixed_and_link_resolved() {
        let body = r#"{
            "id": "ev3",
            "summary": "Demo call",
            "description": "Join at https://zoom.us/j/123456789",
            "start": {"dateTime": "2024-05-01T10:00:00Z"},
            "end": {"dateTime": "2024-05-01T11:00:00Z"},
            "attendees": [{"email": "a@x.com"}, {"email": "b@y.com"}],
            "organizer": {"email": "a@x.com"},
            "hangoutLink": "https://meet.google.com/abc-defg-hij"
        }"#;
        let event: GoogleEvent = serde_json::from_str(body).unwrap();
        let normalized = normalize_event("acc1", event).unwrap();

        assert_eq!(normalized.calendar_event_id, "google_ev3");
        // The structured hangoutLink wins over the description's Zoom link.
        assert_eq!(
            normalized.meeting_link.as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
        assert_eq!(normalized.source, EventSource::GoogleCalendar);
    }
}
