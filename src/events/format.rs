//! Card formatter: renders an inbound event as Telegram HTML.
//!
//! Pure: the output depends only on the event, never on stored state or time.

use super::model::{InboundEvent, OutboundCard};

/// Maximum message length for Telegram's sendMessage API.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Caps on each field's escaped length. The title takes whatever is left.
const MAX_HEADER_FIELD: usize = 128;
const MAX_STATUS: usize = 512;
const MAX_ACTOR: usize = 256;
const MAX_URL: usize = 1024;

/// Build the status card for an event.
///
/// Fields are clipped on their raw text before markup is added, so a long
/// event never leaves a tag open or an entity cut in half.
pub fn format_card(event: &InboundEvent) -> OutboundCard {
    let mut lines = Vec::new();

    lines.push(format!(
        "{} <b>{}</b> · {} #{}",
        action_icon(&event.action),
        clip_escaped(&event.source, MAX_HEADER_FIELD),
        clip_escaped(&event.action, MAX_HEADER_FIELD),
        event.subject_id
    ));

    if let Some(status) = &event.status {
        lines.push(format!("Status: <i>{}</i>", clip_escaped(status, MAX_STATUS)));
    }
    if let Some(actor) = &event.actor {
        lines.push(format!("By {}", clip_escaped(actor, MAX_ACTOR)));
    }
    // A clipped URL is a broken link; leave it out instead.
    if let Some(url) = event.url.as_deref().map(escape_html) {
        if url.chars().count() <= MAX_URL {
            lines.push(format!("<a href=\"{url}\">Open</a>"));
        }
    }

    if let Some(title) = &event.title {
        let used: usize = lines.iter().map(|l| l.chars().count() + 1).sum::<usize>() - 1;
        let budget = TELEGRAM_MAX_MESSAGE_LENGTH.saturating_sub(used + 1);
        if budget > 0 {
            lines.insert(1, clip_escaped(title, budget));
        }
    }

    OutboundCard {
        text: lines.join("\n"),
    }
}

fn action_icon(action: &str) -> &'static str {
    match action.to_ascii_lowercase().as_str() {
        "opened" | "created" => "🆕",
        "review" | "review_requested" | "submitted" => "👀",
        "push" | "synchronize" => "⬆️",
        "merged" | "approved" | "succeeded" | "success" => "✅",
        "closed" | "failed" | "failure" | "rejected" => "❌",
        "released" | "published" => "🚀",
        _ => "🔔",
    }
}

/// Escape the characters Telegram's HTML parse mode treats specially.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `s`, keeping the result within `max_chars`. When text has to be
/// dropped the result ends in `…`, counted against the limit.
fn clip_escaped(s: &str, max_chars: usize) -> String {
    let escaped = escape_html(s);
    if escaped.chars().count() <= max_chars {
        return escaped;
    }

    let budget = max_chars.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let piece = escape_html(c.encode_utf8(&mut [0; 4]));
        let len = piece.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(&piece);
        used += len;
    }
    if max_chars > 0 {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::model::{EventPayload, StreamKey, Topic};

    fn event(body: &str) -> InboundEvent {
        InboundEvent::new(
            StreamKey::new("mobile-app"),
            Topic::new("-100123", Some(9)),
            EventPayload::parse(body.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn minimal_card_has_header_only() {
        let card = format_card(&event(r#"{"action":"review","subject_id":42,"source":"github"}"#));
        assert_eq!(card.text, "👀 <b>github</b> · review #42");
    }

    #[test]
    fn full_card_lists_optional_fields_in_order() {
        let card = format_card(&event(
            r#"{"action":"push","subject_id":42,"source":"github","title":"Fix login",
                "status":"checks running","actor":"sam","url":"https://example.com/pr/42"}"#,
        ));
        let lines: Vec<&str> = card.text.lines().collect();
        assert_eq!(lines[0], "⬆️ <b>github</b> · push #42");
        assert_eq!(lines[1], "Fix login");
        assert_eq!(lines[2], "Status: <i>checks running</i>");
        assert_eq!(lines[3], "By sam");
        assert_eq!(lines[4], "<a href=\"https://example.com/pr/42\">Open</a>");
    }

    #[test]
    fn user_text_is_escaped() {
        let card = format_card(&event(
            r#"{"action":"<x>","subject_id":1,"source":"a&b","title":"\"quoted\""}"#,
        ));
        assert!(card.text.contains("<b>a&amp;b</b>"));
        assert!(card.text.contains("&lt;x&gt;"));
        assert!(card.text.contains("&quot;quoted&quot;"));
    }

    #[test]
    fn same_event_formats_identically() {
        let body = r#"{"action":"merged","subject_id":3,"source":"github","title":"t"}"#;
        assert_eq!(format_card(&event(body)), format_card(&event(body)));
    }

    /// Every `&` starts a whole entity and every tag is closed.
    fn assert_well_formed(text: &str) {
        for (i, _) in text.match_indices('&') {
            let rest = &text[i..];
            assert!(
                ["&amp;", "&lt;", "&gt;", "&quot;"]
                    .iter()
                    .any(|e| rest.starts_with(e)),
                "cut entity at {i}: {:?}",
                &rest[..rest.len().min(8)]
            );
        }
        for (open, close) in [("<b>", "</b>"), ("<i>", "</i>"), ("<a ", "</a>")] {
            assert_eq!(
                text.matches(open).count(),
                text.matches(close).count(),
                "unbalanced {open}"
            );
        }
    }

    fn body_with(fields: &str) -> String {
        format!(r#"{{"action":"push","subject_id":1,"source":"ci",{fields}}}"#)
    }

    #[test]
    fn long_titles_are_truncated_to_limit() {
        let title = "é".repeat(5000);
        let card = format_card(&event(&body_with(&format!(r#""title":"{title}""#))));
        assert_eq!(card.text.chars().count(), TELEGRAM_MAX_MESSAGE_LENGTH);
        assert!(card.text.ends_with('…'));
        assert_well_formed(&card.text);
    }

    #[test]
    fn truncation_never_cuts_an_entity() {
        let title = "&".repeat(2000);
        let card = format_card(&event(&body_with(&format!(r#""title":"{title}""#))));
        assert!(card.text.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH);
        assert!(card.text.ends_with("&amp;…"));
        assert_well_formed(&card.text);
    }

    #[test]
    fn truncation_keeps_tags_closed() {
        let title = "x".repeat(4060);
        let card = format_card(&event(&body_with(&format!(
            r#""title":"{title}","status":"checks running""#
        ))));
        assert!(card.text.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH);
        assert!(card.text.contains("Status: <i>checks running</i>"));
        assert_well_formed(&card.text);
    }

    #[test]
    fn every_field_oversized_stays_within_limit() {
        let huge = "<&>\\\"".repeat(3000);
        let url = format!("https://example.com/{}", "a".repeat(2000));
        let body = format!(
            r#"{{"action":"{huge}","subject_id":1,"source":"{huge}","title":"{huge}",
                "status":"{huge}","actor":"{huge}","url":"{url}"}}"#
        );
        let card = format_card(&event(&body));
        assert!(card.text.chars().count() <= TELEGRAM_MAX_MESSAGE_LENGTH);
        assert!(!card.text.contains("href"));
        assert_well_formed(&card.text);
    }

    #[test]
    fn clip_counts_escaped_length() {
        assert_eq!(clip_escaped("a&b", 7), "a&amp;b");
        assert_eq!(clip_escaped("a&bc", 7), "a&amp;…");
        assert_eq!(clip_escaped("a&b", 6), "a…");
        assert_eq!(clip_escaped("abc", 0), "");
    }

    #[test]
    fn unknown_action_gets_default_icon() {
        let card = format_card(&event(r#"{"action":"labeled","subject_id":5,"source":"github"}"#));
        assert!(card.text.starts_with("🔔"));
    }
}
