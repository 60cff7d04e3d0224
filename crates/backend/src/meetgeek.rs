//! MeetGeek notetaker-bot invitations.
//!
//! Inviting the bot is best-effort: any failure (plan limits, malformed
//! responses, network errors) is logged and the sync run continues. The only
//! durable effect of success is the returned external meeting id, which
//! replaces the `cal_` placeholder on the meeting row.

const MEETGEEK_JOIN_URL: &str = "https://api.meetgeek.ai/v1/meetings/join";

/// Ask MeetGeek to join a meeting. Returns the bot's meeting id on success,
/// `None` on any failure.
pub async fn invite_bot(
    http: &reqwest::Client,
    api_key: &str,
    meeting_link: &str,
    meeting_name: &str,
) -> Option<String> {
    let payload = serde_json::json!({
        "join_url": meeting_link,
        "name": meeting_name,
    });

    let response = match http
        .post(MEETGEEK_JOIN_URL)
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("MeetGeek invite request failed for '{}': {}", meeting_name, e);
            return None;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // A 403 mentioning the subscription means the account's plan does
        // not include API bot invites; worth distinguishing from real errors.
        if status == reqwest::StatusCode::FORBIDDEN && body.contains("paid subscription") {
            tracing::info!(
                "MeetGeek bot not invited to '{}': plan does not include API invites",
                meeting_name
            );
        } else {
            tracing::warn!(
                "MeetGeek invite rejected for '{}': {} - {}",
                meeting_name,
                status,
                body
            );
        }
        return None;
    }

    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Unreadable MeetGeek response for '{}': {}", meeting_name, e);
            return None;
        }
    };

    match pick_meeting_id(&body) {
        Some(id) => {
            tracing::info!("MeetGeek bot invited to '{}' as meeting {}", meeting_name, id);
            Some(id)
        }
        None => {
            tracing::warn!(
                "MeetGeek accepted the invite for '{}' but returned no meeting id",
                meeting_name
            );
            None
        }
    }
}

/// The meeting id field has shifted across MeetGeek API revisions; try the
/// known spellings in order.
pub fn pick_meeting_id(body: &serde_json::Value) -> Option<String> {
    for key in ["meeting_id", "id", "meetingId"] {
        if let Some(id) = body.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_snake_case_meeting_id() {
        let body = json!({"meeting_id": "mg_1", "id": "other", "meetingId": "camel"});
        assert_eq!(pick_meeting_id(&body), Some("mg_1".to_string()));
    }

    #[test]
    fn falls_back_through_known_spellings() {
        assert_eq!(
            pick_meeting_id(&json!({"id": "mg_2"})),
            Some("mg_2".to_string())
        );
        assert_eq!(
            pick_meeting_id(&json!({"meetingId": "mg_3"})),
            Some("mg_3".to_string())
        );
    }

    #[test]
    fn rejects_missing_or_non_string_ids() {
        assert_eq!(pick_meeting_id(&json!({})), None);
        assert_eq!(pick_meeting_id(&json!({"meeting_id": 42})), None);
        assert_eq!(pick_meeting_id(&json!({"meeting_id": ""})), None);
    }
}
