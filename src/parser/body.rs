//! Body extraction: MIME part walk, transfer-encoding and charset decoding.
//!
//! Produces the normalized line list used for sizing, diffing and body
//! hashing. The walk visits every non-multipart leaf part; text parts are
//! decoded from their transfer encoding and charset, anything else is taken
//! raw. Preamble and epilogue text around the outermost MIME boundaries is
//! included.

use encoding_rs::Encoding;

use super::header::{decode_header_bytes, get_header, unfold_headers};

/// Decoded body content of one message.
#[derive(Debug, Clone)]
pub struct BodyContent {
    /// Body lines, terminators preserved.
    pub lines: Vec<String>,
    /// Set when a part's declared charset failed every decoding attempt.
    pub decode_errors: bool,
}

/// Walk the MIME structure under `headers`/`body` and collect decoded lines.
pub fn extract_body_lines(headers: &[(String, String)], body: &[u8]) -> BodyContent {
    let mut content = BodyContent {
        lines: Vec::new(),
        decode_errors: false,
    };
    walk_part(headers, body, true, &mut content);
    content
}

fn walk_part(headers: &[(String, String)], body: &[u8], top_level: bool, out: &mut BodyContent) {
    if let Some((mime_type, params)) = content_type(headers) {
        if mime_type.starts_with("multipart/") {
            if let Some(boundary) = param(&params, "boundary") {
                let (preamble, parts, epilogue) = split_multipart(body, boundary);
                // Text around the boundaries only counts at the outermost level.
                if top_level && !preamble.is_empty() {
                    push_lossy_lines(preamble, out);
                }
                for (part_header_bytes, part_body) in parts {
                    let text = decode_header_bytes(part_header_bytes);
                    let part_headers = unfold_headers(&text);
                    walk_part(&part_headers, part_body, false, out);
                }
                if top_level && !epilogue.is_empty() {
                    push_lossy_lines(epilogue, out);
                }
                return;
            }
            // Multipart without a boundary cannot be split; treat as a leaf.
        }
    }
    leaf_lines(headers, body, out);
}

/// Decode a single leaf part into lines.
fn leaf_lines(headers: &[(String, String)], body: &[u8], out: &mut BodyContent) {
    let mime_type = content_type(headers).map(|(t, _)| t);
    let cte = get_header(headers, "content-transfer-encoding")
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_default();

    // Non-text parts and 8-bit payloads are opaque: no decoding attempted.
    let opaque = mime_type
        .as_ref()
        .is_some_and(|t| !t.starts_with("text"))
        || cte == "8bit";
    if opaque {
        push_lossy_lines(body, out);
        return;
    }

    let payload: Vec<u8> = match cte.as_str() {
        "base64" => decode_base64(body),
        "quoted-printable" => decode_quoted_printable(body),
        _ => body.to_vec(),
    };

    let charset = content_type(headers)
        .and_then(|(_, params)| param(&params, "charset").map(str::to_string));

    match decode_text(&payload, charset.as_deref()) {
        Some(text) => push_lines(&text, out),
        None => {
            // All decodings failed: keep the raw undecoded payload and flag
            // the message for the encoding skip category.
            out.decode_errors = true;
            push_lossy_lines(body, out);
        }
    }
}

/// Decode part bytes with the declared charset, or ASCII → UTF-8 when none
/// is declared. `None` means every attempt failed.
fn decode_text(bytes: &[u8], declared: Option<&str>) -> Option<String> {
    match declared {
        Some(label) if !label.is_empty() => {
            let encoding = Encoding::for_label(label.as_bytes())?;
            let (decoded, _, had_errors) = encoding.decode(bytes);
            if had_errors {
                None
            } else {
                Some(decoded.into_owned())
            }
        }
        _ => {
            if bytes.is_ascii() {
                return Some(String::from_utf8_lossy(bytes).into_owned());
            }
            std::str::from_utf8(bytes).ok().map(str::to_string)
        }
    }
}

/// Split text into lines, keeping the terminators.
fn push_lines(text: &str, out: &mut BodyContent) {
    for line in text.split_inclusive('\n') {
        out.lines.push(line.to_string());
    }
}

fn push_lossy_lines(bytes: &[u8], out: &mut BodyContent) {
    let text = String::from_utf8_lossy(bytes);
    push_lines(&text, out);
}

/// Parse the `Content-Type` header into a lowercase mime type and parameters.
fn content_type(headers: &[(String, String)]) -> Option<(String, Vec<(String, String)>)> {
    let value = get_header(headers, "content-type")?;
    let mut segments = value.split(';');
    let mime_type = segments.next()?.trim().to_lowercase();

    let mut params = Vec::new();
    for segment in segments {
        if let Some((key, val)) = segment.split_once('=') {
            let val = val.trim().trim_matches('"').to_string();
            params.push((key.trim().to_lowercase(), val));
        }
    }
    Some((mime_type, params))
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Split a multipart body on its boundary delimiter lines.
///
/// Returns `(preamble, parts, epilogue)` where each part is a
/// `(header_bytes, body_bytes)` pair.
fn split_multipart<'a>(
    body: &'a [u8],
    boundary: &str,
) -> (&'a [u8], Vec<(&'a [u8], &'a [u8])>, &'a [u8]) {
    let delimiter = format!("--{boundary}");
    let closing = format!("--{boundary}--");

    let mut sections: Vec<(usize, usize)> = Vec::new(); // (start, end) byte ranges
    let mut preamble_end = 0;
    let mut epilogue_start = body.len();
    let mut section_start: Option<usize> = None;
    let mut closed = false;

    let mut pos = 0;
    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| pos + p + 1)
            .unwrap_or(body.len());
        let line = String::from_utf8_lossy(&body[pos..line_end]);
        let trimmed = line.trim_end();

        if trimmed == closing && !closed {
            if let Some(start) = section_start.take() {
                sections.push((start, pos));
            } else {
                preamble_end = pos;
            }
            epilogue_start = line_end;
            closed = true;
        } else if trimmed == delimiter && !closed {
            if let Some(start) = section_start.take() {
                sections.push((start, pos));
            } else {
                preamble_end = pos;
            }
            section_start = Some(line_end);
        }
        pos = line_end;
    }
    // Tolerate a missing closing delimiter.
    if let Some(start) = section_start {
        sections.push((start, body.len()));
        epilogue_start = body.len();
    }

    let parts = sections
        .iter()
        .map(|&(start, end)| {
            let section = &body[start..end];
            split_part(section)
        })
        .collect();

    (&body[..preamble_end], parts, &body[epilogue_start..])
}

/// Split one MIME part into header bytes and body bytes.
fn split_part(section: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while pos < section.len() {
        let line_end = section[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| pos + p + 1)
            .unwrap_or(section.len());
        let line = &section[pos..line_end];
        if line == b"\n" || line == b"\r\n" {
            return (&section[..pos], &section[line_end..]);
        }
        pos = line_end;
    }
    (section, &[])
}

// ── Transfer-encoding decoders ──────────────────────────────────

/// Decode base64 content, skipping whitespace and tolerating bad padding.
pub(crate) fn decode_base64(input: &[u8]) -> Vec<u8> {
    fn val(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut quad = [0u8; 4];
    let mut qi = 0;
    let mut pad = 0;

    for &b in input {
        if b == b'=' {
            quad[qi] = 0;
            qi += 1;
            pad += 1;
        } else if let Some(v) = val(b) {
            quad[qi] = v;
            qi += 1;
        } else {
            continue; // whitespace and stray bytes
        }

        if qi == 4 {
            out.push(quad[0] << 2 | quad[1] >> 4);
            if pad < 2 {
                out.push(quad[1] << 4 | quad[2] >> 2);
            }
            if pad < 1 {
                out.push(quad[2] << 6 | quad[3]);
            }
            qi = 0;
            pad = 0;
        }
    }
    out
}

/// Decode quoted-printable content: `=XX` → byte, soft line breaks removed.
fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'=' if i + 1 < input.len() && input[i + 1] == b'\n' => i += 2, // soft break
            b'=' if i + 2 < input.len() && input[i + 1] == b'\r' && input[i + 2] == b'\n' => i += 3,
            b'=' if i + 2 < input.len() => {
                if let Ok(byte) = u8::from_str_radix(
                    std::str::from_utf8(&input[i + 1..i + 3]).unwrap_or("00"),
                    16,
                ) {
                    result.push(byte);
                    i += 3;
                } else {
                    result.push(b'=');
                    i += 1;
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}
