//! Per-header canonicalization.
//!
//! Transport hops rewrite headers in ways that defeat byte-equality: list
//! servers stack `[tag]` prefixes on `Subject`, munge `Content-Type`
//! parameters, and `Date` precision drifts between copies. Canonicalization
//! removes that incidental variation before hashing, so two copies of one
//! mail land on the same identity.

use std::sync::LazyLock;

use regex::Regex;

use crate::parser::date::parse_date;
use crate::parser::header::decode_encoded_words;

/// Headers carrying addresses, where quoting of display names varies between
/// copies of the same mail.
const QUOTE_DISCARD_HEADERS: [&str; 6] = ["from", "to", "cc", "bcc", "reply-to", "message-id"];

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Leading reply markers and mailing-list tags, stripped in a loop since a
/// mail cc'd to several lists stacks one tag per list.
static SUBJECT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[Rr]e: )+|^(?:\[\w[\w_-]+\w\] )+").unwrap());

/// A whole value of the form `<token>` with no nested brackets or commas.
static ANGLE_WRAPPED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<[^<>,]+>$").unwrap());

/// Normalize a header value into its canonical, comparable form.
///
/// Pure and deterministic. `header_name` is expected lowercased. The result
/// is stable under re-application.
pub fn canonicalize(header_name: &str, raw_value: &str) -> String {
    // Encoded-words first, then whitespace: a decoded word may contain runs.
    let decoded = decode_encoded_words(raw_value);
    let mut value = WHITESPACE_RUN
        .replace_all(&decoded, " ")
        .trim()
        .to_string();

    match header_name {
        "subject" => {
            // Strip reply markers and list tags until none remain.
            loop {
                let stripped = SUBJECT_PREFIX.replace(&value, "");
                if stripped == value {
                    break;
                }
                value = stripped.into_owned();
            }
            value
        }

        "content-type" => {
            // List servers munge the parameter list (charset quoting,
            // per-recipient boundaries); only the media type is stable.
            match value.find(';') {
                Some(pos) => value[..pos].trim_end().to_string(),
                None => value,
            }
        }

        "date" => {
            // Timestamps differ by seconds or hours between copies; honour
            // the day only, in UTC. Unparseable values pass through.
            match parse_date(&value) {
                Some(dt) => dt.format("%Y-%m-%d").to_string(),
                None => value,
            }
        }

        _ => {
            if QUOTE_DISCARD_HEADERS.contains(&header_name) {
                // A quoted display name must hash like its unquoted twin.
                value = value.replace('"', "");
            }
            if matches!(header_name, "to" | "message-id") && ANGLE_WRAPPED.is_match(&value) {
                // Some parsers strip the brackets around a lone address;
                // strip them always so both renditions agree.
                value = value[1..value.len() - 1].to_string();
            }
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(
            canonicalize("x-priority", "  3 \t (Normal)  "),
            "3 (Normal)"
        );
    }

    #[test]
    fn test_subject_reply_marker_stripped() {
        assert_eq!(canonicalize("subject", "Re: Hello"), "Hello");
        assert_eq!(canonicalize("subject", "re: Re: Hello"), "Hello");
    }

    #[test]
    fn test_subject_stacked_list_tags_stripped() {
        assert_eq!(
            canonicalize("subject", "[list-a] [list_b] Re: [list-c] Hello"),
            "Hello"
        );
    }

    #[test]
    fn test_subject_tag_mid_value_kept() {
        assert_eq!(
            canonicalize("subject", "Hello [not-a-prefix] world"),
            "Hello [not-a-prefix] world"
        );
    }

    #[test]
    fn test_subject_encoded_word_decoded_before_stripping() {
        // "Re: Hola" base64-encoded
        assert_eq!(
            canonicalize("subject", "=?UTF-8?B?UmU6IEhvbGE=?="),
            "Hola"
        );
    }

    #[test]
    fn test_content_type_parameters_dropped() {
        assert_eq!(
            canonicalize("content-type", "text/plain; charset=\"us-ascii\""),
            "text/plain"
        );
        assert_eq!(
            canonicalize(
                "content-type",
                "multipart/mixed; boundary=\"=_next_part_42\""
            ),
            "multipart/mixed"
        );
        assert_eq!(canonicalize("content-type", "text/html"), "text/html");
    }

    #[test]
    fn test_date_day_granularity_utc() {
        assert_eq!(
            canonicalize("date", "Thu, 04 Jan 2024 10:22:31 +0000"),
            "2024-01-04"
        );
        // 23:30 at -0300 rolls over to the next UTC day
        assert_eq!(
            canonicalize("date", "Fri, 05 Jan 2024 23:30:00 -0300"),
            "2024-01-06"
        );
    }

    #[test]
    fn test_unparseable_date_passes_through() {
        assert_eq!(
            canonicalize("date", "Thu, 13 Dec 101 15:30 WET"),
            "Thu, 13 Dec 101 15:30 WET"
        );
    }

    #[test]
    fn test_message_id_brackets_stripped() {
        assert_eq!(
            canonicalize("message-id", "<201111231111.abcdef101@mail.nohost.com>"),
            "201111231111.abcdef101@mail.nohost.com"
        );
    }

    #[test]
    fn test_to_brackets_kept_on_multiple_addresses() {
        assert_eq!(
            canonicalize("to", "<a@b.com>, <c@d.com>"),
            "<a@b.com>, <c@d.com>"
        );
    }

    #[test]
    fn test_address_quotes_dropped() {
        assert_eq!(
            canonicalize("from", "\"Foo Bar\" <foo@bar.com>"),
            "Foo Bar <foo@bar.com>"
        );
    }

    #[test]
    fn test_other_headers_pass_through() {
        assert_eq!(canonicalize("user-agent", "Mutt/2.2.9"), "Mutt/2.2.9");
    }

    #[test]
    fn test_idempotence() {
        let cases = [
            ("subject", "Re: [list] Re: Hello  world"),
            ("content-type", "text/plain; charset=utf-8"),
            ("date", "Thu, 04 Jan 2024 10:22:31 +0200"),
            ("date", "utter garbage"),
            ("message-id", "<id@host>"),
            ("to", "\"Name\" <a@b.com>"),
            ("from", "foo@bar.com"),
        ];
        for (name, value) in cases {
            let once = canonicalize(name, value);
            let twice = canonicalize(name, &once);
            assert_eq!(once, twice, "canonicalize not idempotent for {name}: {value:?}");
        }
    }
}
