//! Microsoft Graph adapter for Outlook mail and calendar.
//!
//! Graph paginates with `@odata.nextLink`: a full URL that must be followed
//! verbatim, so the continuation token here is the whole link.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use shared_types::{
    resolve_meeting_link, EventSource, NormalizedCalendarEvent, NormalizedEmail, Provider,
};

use super::adapter::{cap_body, has_enough_attendees, Page, ProviderAdapter};

const GRAPH_MESSAGES_URL: &str = "https://graph.microsoft.com/v1.0/me/messages";
const GRAPH_CALENDAR_VIEW_URL: &str = "https://graph.microsoft.com/v1.0/me/calendarView";

const PAGE_SIZE: u32 = 50;
const EVENT_WINDOW_DAYS: i64 = 365;

pub struct MicrosoftAdapter {
    http: reqwest::Client,
    account_id: String,
}

impl MicrosoftAdapter {
    pub fn new(http: reqwest::Client, account_id: impl Into<String>) -> Self {
        Self {
            http,
            account_id: account_id.into(),
        }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        first_page_url: String,
        page_token: Option<&str>,
    ) -> anyhow::Result<GraphList<T>> {
        // A continuation is a complete URL; follow it as-is.
        let url = page_token.map(str::to_string).unwrap_or(first_page_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            // Graph returns event times in the requested zone.
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftAdapter {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    /// Message pages are requested with `$orderby=receivedDateTime asc`.
    fn emails_oldest_first(&self) -> bool {
        true
    }

    async fn list_emails(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> anyhow::Result<Page<NormalizedEmail>> {
        let first_page = format!(
            "{}?$filter=receivedDateTime ge {}&$orderby=receivedDateTime asc&$top={}",
            GRAPH_MESSAGES_URL,
            since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            PAGE_SIZE,
        );

        let list: GraphList<GraphMessage> =
            self.get_page(access_token, first_page, page_token).await?;

        let mut page = Page::empty();
        page.next_page = list.next_link;

        for message in list.value {
            match normalize_message(&self.account_id, message) {
                Some(email) => page.items.push(email),
                None => page.skipped += 1,
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
        let window_end = Utc::now() + Duration::days(EVENT_WINDOW_DAYS);
        let first_page = format!(
            "{}?startDateTime={}&endDateTime={}&$top={}",
            GRAPH_CALENDAR_VIEW_URL,
            since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            window_end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            PAGE_SIZE,
        );

        let list: GraphList<GraphEvent> =
            self.get_page(access_token, first_page, page_token).await?;

        let mut page = Page::empty();
        page.next_page = list.next_link;

        for event in list.value {
            match normalize_event(&self.account_id, event) {
                Some(normalized) => page.items.push(normalized),
                None => page.skipped += 1,
            }
        }

        Ok(page)
    }
}

// ---------------------------------------------------------------------------
// Graph wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct GraphList<T> {
    #[serde(default)]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    conversation_id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    #[serde(default)]
    to_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    cc_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    bcc_recipients: Vec<GraphRecipient>,
    received_date_time: Option<DateTime<Utc>>,
    body: Option<GraphItemBody>,
    is_read: Option<bool>,
    has_attachments: Option<bool>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphItemBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    is_all_day: Option<bool>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    #[serde(default)]
    attendees: Vec<GraphAttendee>,
    organizer: Option<GraphRecipient>,
    online_meeting: Option<GraphOnlineMeeting>,
    body: Option<GraphItemBody>,
    location: Option<GraphLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendee {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphOnlineMeeting {
    join_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn recipient_address(recipient: &GraphRecipient) -> Option<String> {
    recipient
        .email_address
        .as_ref()
        .and_then(|e| e.address.clone())
}

fn normalize_message(account_id: &str, message: GraphMessage) -> Option<NormalizedEmail> {
    let received_at = message.received_date_time?;
    let from_address = message.from.as_ref().and_then(recipient_address)?;

    let collect = |recipients: &[GraphRecipient]| -> Vec<String> {
        recipients.iter().filter_map(recipient_address).collect()
    };

    let (body_text, body_html) = match message.body {
        Some(body) => {
            let content = body.content.unwrap_or_default();
            if body.content_type.as_deref() == Some("html") {
                (None, Some(cap_body(content)))
            } else {
                (Some(cap_body(content)), None)
            }
        }
        None => (None, None),
    };

    Some(NormalizedEmail {
        account_id: account_id.to_string(),
        provider_message_id: message.id,
        thread_id: message.conversation_id,
        from_address,
        to_addresses: collect(&message.to_recipients),
        cc_addresses: collect(&message.cc_recipients),
        bcc_addresses: collect(&message.bcc_recipients),
        subject: message.subject.unwrap_or_default(),
        body_text,
        body_html,
        received_at,
        labels: message.categories,
        is_read: message.is_read.unwrap_or(false),
        has_attachments: message.has_attachments.unwrap_or(false),
    })
}

/// Graph sends event times as `2024-05-01T10:00:00.0000000` without an
/// offset, in the zone requested via the `Prefer` header (UTC here).
fn parse_graph_time(value: &GraphDateTime) -> Option<DateTime<Utc>> {
    let raw = value.date_time.as_deref()?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn normalize_event(account_id: &str, event: GraphEvent) -> Option<NormalizedCalendarEvent> {
    if event.is_all_day.unwrap_or(false) {
        return None;
    }

    let start_time = event.start.as_ref().and_then(parse_graph_time)?;
    let end_time = event.end.as_ref().and_then(parse_graph_time)?;

    let attendees: Vec<String> = event
        .attendees
        .iter()
        .filter_map(|a| a.email_address.as_ref().and_then(|e| e.address.clone()))
        .collect();
    if !has_enough_attendees(&attendees) {
        return None;
    }

    let structured = event
        .online_meeting
        .as_ref()
        .and_then(|m| m.join_url.clone());
    let fallback = format!(
        "{} {}",
        event
            .body
            .as_ref()
            .and_then(|b| b.content.as_deref())
            .unwrap_or_default(),
        event
            .location
            .as_ref()
            .and_then(|l| l.display_name.as_deref())
            .unwrap_or_default()
    );
    let meeting_link = resolve_meeting_link(structured.as_deref(), &fallback);

    Some(NormalizedCalendarEvent {
        account_id: account_id.to_string(),
        calendar_event_id: format!("microsoft_{}", event.id),
        title: event.subject.unwrap_or_else(|| "(no title)".to_string()),
        start_time,
        end_time,
        attendees,
        organizer_email: event.organizer.as_ref().and_then(recipient_address),
        meeting_link,
        source: EventSource::MicrosoftCalendar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_is_carried_through() {
        let body = r#"{
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/me/messages?$skip=50",
            "value": []
        }"#;
        let list: GraphList<GraphMessage> = serde_json::from_str(body).unwrap();
        assert_eq!(
            list.next_link.as_deref(),
            Some("https://graph.microsoft.com/v1.0/me/messages?$skip=50")
        );
    }

    #[test]
    fn normalizes_html_message() {
        let body = r#"{
            "id": "AAMk1",
            "conversationId": "conv1",
            "subject": "Renewal discussion",
            "from": {"emailAddress": {"address": "jane@example.com"}},
            "toRecipients": [{"emailAddress": {"address": "bob@example.com"}}],
            "receivedDateTime": "2024-05-01T10:00:00Z",
            "body": {"contentType": "html", "content": "<p>hi</p>"},
            "isRead": true,
            "hasAttachments": false,
            "categories": ["Deals"]
        }"#;
        let message: GraphMessage = serde_json::from_str(body).unwrap();
        let email = normalize_message("acc1", message).unwrap();

        assert_eq!(email.provider_message_id, "AAMk1");
        assert_eq!(email.from_address, "jane@example.com");
        assert_eq!(email.body_html.as_deref(), Some("<p>hi</p>"));
        assert!(email.body_text.is_none());
        assert!(email.is_read);
        assert_eq!(email.labels, vec!["Deals".to_string()]);
    }

    #[test]
    fn message_without_sender_is_skipped() {
        let message: GraphMessage = serde_json::from_str(
            r#"{"id": "m", "receivedDateTime": "2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(normalize_message("acc1", message).is_none());
    }

    #[test]
    fn parses_offsetless_graph_times_as_utc() {
        let value = GraphDateTime {
            date_time: Some("2024-05-01T10:30:00.0000000".to_string()),
        };
        let parsed = parse_graph_time(&value).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn all_day_event_is_filtered() {
        let body = r#"{
            "id": "ev1",
            "subject": "Conference",
            "isAllDay": true,
            "start": {"dateTime": "2024-05-01T00:00:00.0000000"},
            "end": {"dateTime": "2024-05-02T00:00:00.0000000"},
            "attendees": [
                {"emailAddress": {"address": "a@x.com"}},
                {"emailAddress": {"address": "b@x.com"}}
            ]
        }"#;
        let event: GraphEvent = serde_json::from_str(body).unwrap();
        assert!(normalize_event("acc1", event).is_none());
    }

    #[test]
    fn teams_join_url_wins_over_body_text() {
        let body = r#"{
            "id": "ev2",
            "subject": "Pilot kickoff",
            "start": {"dateTime": "2024-05-01T10:00:00.0000000"},
            "end": {"dateTime": "2024-05-01T11:00:00.0000000"},
            "attendees": [
                {"emailAddress": {"address": "a@x.com"}},
                {"emailAddress": {"address": "b@y.com"}}
            ],
            "organizer": {"emailAddress": {"address": "a@x.com"}},
            "onlineMeeting": {"joinUrl": "https://teams.microsoft.com/l/meetup-join/19%3ameeting_x/0"},
            "body": {"contentType": "text", "content": "backup: https://zoom.us/j/987654321"}
        }"#;
        let event: GraphEvent = serde_json::from_str(body).unwrap();
        let normalized = normalize_event("acc1", event).unwrap();

        assert_eq!(normalized.calendar_event_id, "microsoft_ev2");
        assert!(normalized
            .meeting_link
            .as_deref()
            .unwrap()
            .starts_with("https://teams.microsoft.com/l/meetup-join/"));
        assert_eq!(normalized.source, EventSource::MicrosoftCalendar);
    }
}
