//! The parsed mail and its derived attributes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use crate::canonical::canonicalize;
use crate::config::{Config, TimeSource};
use crate::parser::{body, date, header};

/// One mail, immutable after load.
///
/// Every derived attribute (timestamp, size, body lines, canonical headers)
/// is computed eagerly by [`Message::from_raw`]: messages are parsed once
/// per run and never change afterwards, so there is nothing to invalidate.
///
/// Identity is the `(source_path, mail_id)` pair: equality, hashing and
/// ordering all go through it, which lets containers of messages deduplicate
/// references to the same physical record naturally.
pub struct Message {
    source_path: PathBuf,
    mail_id: String,
    path: PathBuf,
    raw: Vec<u8>,
    headers: Vec<(String, String)>,
    body_lines: Vec<String>,
    decode_errors: bool,
    timestamp: Option<DateTime<Utc>>,
    size: u64,
    canonical_headers: Vec<(String, String)>,
}

impl Message {
    /// Parse a raw message and compute its derived attributes.
    ///
    /// `path` is the individual mail file for folder-structured containers,
    /// or the whole container file for file-structured ones.
    pub fn from_raw(
        source_path: impl Into<PathBuf>,
        mail_id: impl Into<String>,
        path: impl Into<PathBuf>,
        raw: Vec<u8>,
        conf: &Config,
    ) -> Self {
        let path = path.into();

        let (header_bytes, body_bytes) = header::split_message(&raw);
        let text = header::decode_header_bytes(header_bytes);
        let headers = header::unfold_headers(&text);
        let body = body::extract_body_lines(&headers, body_bytes);

        let timestamp = match conf.time_source {
            Some(TimeSource::Ctime) => file_ctime(&path),
            _ => header::get_header(&headers, "date").and_then(date::parse_date),
        };

        // Payload size, not file size: headers accumulate across transport
        // hops and must not count.
        let size = body.lines.iter().map(|l| l.len() as u64).sum();

        let canonical_headers = build_canonical_headers(&headers, conf);

        Self {
            source_path: source_path.into(),
            mail_id: mail_id.into(),
            path,
            raw,
            headers,
            body_lines: body.lines,
            decode_errors: body.decode_errors,
            timestamp,
            size,
            canonical_headers,
        }
    }

    /// Path of the container this mail came from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Identifier of this mail within its container.
    pub fn mail_id(&self) -> &str {
        &self.mail_id
    }

    /// Filesystem location used by path-based strategies.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw message bytes as read from the container.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Unfolded `(lowercase name, value)` header pairs, in order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Decoded body lines, terminators preserved.
    pub fn body_lines(&self) -> &[String] {
        &self.body_lines
    }

    /// Whether part of the body resisted every decoding attempt.
    pub fn decode_errors(&self) -> bool {
        self.decode_errors
    }

    /// Reference time, when the configured source could provide one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Payload size in bytes (UTF-8 length of the decoded body lines).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Canonical `(name, value)` pairs over the configured header list.
    pub fn canonical_headers(&self) -> &[(String, String)] {
        &self.canonical_headers
    }

    /// Render the canonical headers as a table, for the hash diagnostic.
    pub fn pretty_canonical_headers(&self) -> String {
        let name_width = self
            .canonical_headers
            .iter()
            .map(|(n, _)| n.len())
            .max()
            .unwrap_or(0)
            .max("Header".len());

        let mut out = format!("  {:<name_width$}  Value\n", "Header");
        out.push_str(&format!("  {}\n", "-".repeat(name_width + 40)));
        for (name, value) in &self.canonical_headers {
            for (i, line) in value.split('\n').enumerate() {
                if i == 0 {
                    out.push_str(&format!("  {name:<name_width$}  {line}\n"));
                } else {
                    out.push_str(&format!("  {:<name_width$}  {line}\n", ""));
                }
            }
        }
        out
    }
}

/// Build the ordered canonical header list for hashing.
///
/// Iterates the configured header names; every occurrence of a header is
/// canonicalized, whitespace-only values are dropped, and the survivors are
/// joined with a newline. Headers absent or left with nothing are skipped.
fn build_canonical_headers(
    headers: &[(String, String)],
    conf: &Config,
) -> Vec<(String, String)> {
    let mut result = Vec::new();
    for name in &conf.hash_headers {
        let values: Vec<String> = header::get_all(headers, name)
            .map(|v| canonicalize(name, v))
            .filter(|v| v.chars().any(|c| !c.is_whitespace()))
            .collect();
        if values.is_empty() {
            continue;
        }
        result.push((name.clone(), values.join("\n")));
    }
    result
}

/// Filesystem change time of a mail's file.
fn file_ctime(path: &Path) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Utc.timestamp_opt(meta.ctime(), meta.ctime_nsec() as u32)
            .single()
    }
    #[cfg(not(unix))]
    {
        meta.modified().ok().map(DateTime::<Utc>::from)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.source_path == other.source_path && self.mail_id == other.mail_id
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_path.hash(state);
        self.mail_id.hash(state);
    }
}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Message {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.source_path, &self.mail_id).cmp(&(&other.source_path, &other.mail_id))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message({}:{})",
            self.source_path.display(),
            self.mail_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_mail(date: &str, body: &str) -> Vec<u8> {
        format!(
            "Date: {date}\n\
             From: foo@bar.com\n\
             To: <baz@qux.com>\n\
             Subject: A duplicate mail\n\
             Mime-Version: 1.0\n\
             Content-Type: text/plain; charset=\"utf-8\"\n\
             Message-Id: <201111231111.abcdef101@mail.nohost.com>\n\
             \n\
             {body}"
        )
        .into_bytes()
    }

    fn make(conf: &Config, raw: Vec<u8>) -> Message {
        Message::from_raw("/tmp/box", "0", "/tmp/box", raw, conf)
    }

    #[test]
    fn test_timestamp_from_date_header() {
        let conf = Config {
            time_source: Some(TimeSource::DateHeader),
            ..Config::default()
        };
        let mail = make(&conf, raw_mail("Thu, 04 Jan 2024 10:00:00 +0000", "x\n"));
        let ts = mail.timestamp().unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M").to_string(), "2024-01-04 10:00");
    }

    #[test]
    fn test_timestamp_undefined_on_unparseable_date() {
        let conf = Config {
            time_source: Some(TimeSource::DateHeader),
            ..Config::default()
        };
        let mail = make(&conf, raw_mail("Thu, 13 Dec 101 15:30 WET", "x\n"));
        assert!(mail.timestamp().is_none());
    }

    #[test]
    fn test_size_counts_utf8_bytes_of_body_only() {
        let conf = Config::default();
        let mail = make(&conf, raw_mail("Thu, 04 Jan 2024 10:00:00 +0000", "héllo\n"));
        // 'é' is two bytes in UTF-8
        assert_eq!(mail.size(), 7);
    }

    #[test]
    fn test_canonical_headers_follow_configured_order() {
        let conf = Config::default();
        let mail = make(&conf, raw_mail("Thu, 04 Jan 2024 10:00:00 +0000", "x\n"));
        let names: Vec<&str> = mail
            .canonical_headers()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        // Absent headers (content-disposition, user-agent, x-priority) skipped
        assert_eq!(
            names,
            vec![
                "date",
                "from",
                "to",
                "subject",
                "mime-version",
                "content-type",
                "message-id"
            ]
        );
        let date = &mail.canonical_headers()[0].1;
        assert_eq!(date, "2024-01-04");
    }

    #[test]
    fn test_identity_is_source_and_id() {
        let conf = Config::default();
        let a = Message::from_raw("/box", "1", "/box", raw_mail("x", "a\n"), &conf);
        let b = Message::from_raw("/box", "1", "/box", raw_mail("y", "b\n"), &conf);
        let c = Message::from_raw("/box", "2", "/box", raw_mail("x", "a\n"), &conf);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }
}
