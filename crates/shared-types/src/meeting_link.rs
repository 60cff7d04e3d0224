//! Conference-link detection for calendar events.
//!
//! Providers expose join links in two places: a structured conference field
//! (Google `conferenceData`, Graph `onlineMeeting.joinUrl`) and free text in
//! the event description. The structured field wins when it contains a
//! recognizable link; the description is the fallback.

use regex::Regex;
use std::sync::OnceLock;

fn teams_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https://teams\.microsoft\.com/l/meetup-join/[^\s<>"']+"#).unwrap()
    })
}

fn meet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https://meet\.google\.com/[a-z0-9\-]+").unwrap())
}

fn zoom_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https://[A-Za-z0-9.\-]*zoom\.us/j/\d+[^\s<>"']*"#).unwrap()
    })
}

/// Extract the first recognized meeting link from free text.
///
/// Patterns are tried in a fixed precedence order (Teams, then Meet, then
/// Zoom), not by position in the text: when a Teams and a Zoom link appear in
/// the same description, the Teams link wins.
pub fn extract_meeting_link(text: &str) -> Option<String> {
    for re in [teams_re(), meet_re(), zoom_re()] {
        if let Some(m) = re.find(text) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

/// Resolve an event's meeting link, preferring the structured conference
/// field over description text.
pub fn resolve_meeting_link(structured: Option<&str>, fallback_text: &str) -> Option<String> {
    if let Some(uri) = structured {
        if let Some(link) = extract_meeting_link(uri) {
            return Some(link);
        }
    }
    extract_meeting_link(fallback_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_teams_link() {
        let text = "Join: https://teams.microsoft.com/l/meetup-join/19%3ameeting_abc%40thread.v2/0?context=%7b%22Tid%22%3a%22x%22%7d";
        let link = extract_meeting_link(text).unwrap();
        assert!(link.starts_with("https://teams.microsoft.com/l/meetup-join/"));
    }

    #[test]
    fn extracts_meet_link() {
        let text = "Video call: https://meet.google.com/abc-defg-hij\nAgenda follows.";
        assert_eq!(
            extract_meeting_link(text).as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[test]
    fn extracts_zoom_link_with_subdomain() {
        let text = "https://company.zoom.us/j/123456789?pwd=secret";
        assert_eq!(
            extract_meeting_link(text).as_deref(),
            Some("https://company.zoom.us/j/123456789?pwd=secret")
        );
    }

    #[test]
    fn teams_beats_zoom_regardless_of_text_order() {
        let text = "zoom first https://zoom.us/j/111222333 but also \
                    https://teams.microsoft.com/l/meetup-join/19:meeting@thread.v2/0";
        let link = extract_meeting_link(text).unwrap();
        assert!(link.contains("teams.microsoft.com"));
    }

    #[test]
    fn zoom_requires_join_path() {
        assert_eq!(extract_meeting_link("https://zoom.us/about"), None);
    }

    #[test]
    fn no_link_in_plain_text() {
        assert_eq!(extract_meeting_link("quarterly pipeline review"), None);
    }

    #[test]
    fn structured_field_preferred_over_description() {
        let link = resolve_meeting_link(
            Some("https://meet.google.com/xyz-structured"),
            "fallback https://zoom.us/j/999888777",
        );
        assert_eq!(link.as_deref(), Some("https://meet.google.com/xyz-structured"));
    }

    #[test]
    fn falls_back_to_description_when_structured_unrecognized() {
        let link = resolve_meeting_link(
            Some("tel:+1-555-0100"),
            "join at https://zoom.us/j/999888777",
        );
        assert_eq!(link.as_deref(), Some("https://zoom.us/j/999888777"));
    }
}
