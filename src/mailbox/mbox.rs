//! mbox adapter: `From ` separator framing over a single file.
//!
//! The file is scanned once at open time to record the byte span of every
//! message; iteration then reads spans individually so a large archive is
//! never held in memory whole. Removals are deferred and applied on
//! [`MailBox::close`] by rewriting the retained spans to a temporary file
//! swapped into place.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use super::{strip_mbox_separator, BoxFormat, MailBox, RawMail};
use crate::error::{DedupError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 128 * 1024;

/// An mbox file opened for deduplication.
#[derive(Debug)]
pub struct MboxBox {
    path: PathBuf,
    spans: Vec<(u64, u64)>,
    removals: HashSet<usize>,
}

impl MboxBox {
    /// Open an existing mbox and scan its message spans.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(DedupError::SourceNotFound(path));
        }
        let spans = scan_spans(&path)?;
        debug!(path = %path.display(), count = spans.len(), "mbox scanned");
        Ok(Self {
            path,
            spans,
            removals: HashSet::new(),
        })
    }

    /// Create (or open for append) an mbox used as an export destination.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DedupError::io(&path, e))?;
        Self::open(&path)
    }

    fn span(&self, id: &str) -> Result<usize> {
        let index: usize = id.parse().map_err(|_| DedupError::UnknownMailId {
            path: self.path.clone(),
            id: id.to_string(),
        })?;
        if index >= self.spans.len() {
            return Err(DedupError::UnknownMailId {
                path: self.path.clone(),
                id: id.to_string(),
            });
        }
        Ok(index)
    }
}

impl MailBox for MboxBox {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> BoxFormat {
        BoxFormat::Mbox
    }

    fn len(&self) -> usize {
        self.spans.len()
    }

    fn iterate(&mut self) -> Result<Box<dyn Iterator<Item = Result<RawMail>> + '_>> {
        let mut file = File::open(&self.path).map_err(|e| DedupError::io(&self.path, e))?;
        let path = self.path.clone();
        let spans = self.spans.clone();
        let iter = spans.into_iter().enumerate().map(move |(index, (offset, length))| {
            let mut buffer = vec![0u8; length as usize];
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(&mut buffer))
                .map_err(|e| DedupError::io(&path, e))?;
            Ok(RawMail {
                id: index.to_string(),
                path: path.clone(),
                raw: buffer,
            })
        });
        Ok(Box::new(iter))
    }

    fn add(&mut self, raw: &[u8]) -> Result<String> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| DedupError::io(&self.path, e))?;
        let offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| DedupError::io(&self.path, e))?;

        let separator = format!(
            "From MAILER-DAEMON {}\n",
            Utc::now().format("%a %b %e %H:%M:%S %Y")
        );
        let framed = frame_message(&separator, strip_mbox_separator(raw));
        file.write_all(&framed)
            .map_err(|e| DedupError::io(&self.path, e))?;

        let index = self.spans.len();
        self.spans.push((offset, framed.len() as u64));
        Ok(index.to_string())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        let index = self.span(id)?;
        if !self.removals.insert(index) {
            warn!(id, "Message already scheduled for removal");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.removals.is_empty() {
            return Ok(());
        }

        // Rewrite retained spans to a sibling file, then swap it in.
        let tmp_path = self.path.with_extension("maildedup.tmp");
        {
            let mut source =
                File::open(&self.path).map_err(|e| DedupError::io(&self.path, e))?;
            let mut target =
                File::create(&tmp_path).map_err(|e| DedupError::io(&tmp_path, e))?;
            for (index, &(offset, length)) in self.spans.iter().enumerate() {
                if self.removals.contains(&index) {
                    continue;
                }
                let mut buffer = vec![0u8; length as usize];
                source
                    .seek(SeekFrom::Start(offset))
                    .and_then(|_| source.read_exact(&mut buffer))
                    .map_err(|e| DedupError::io(&self.path, e))?;
                target
                    .write_all(&buffer)
                    .map_err(|e| DedupError::io(&tmp_path, e))?;
            }
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|e| DedupError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            removed = self.removals.len(),
            "mbox rewritten"
        );
        let removals = std::mem::take(&mut self.removals);
        self.spans = self
            .spans
            .iter()
            .enumerate()
            .filter(|(index, _)| !removals.contains(index))
            .map(|(_, span)| *span)
            .collect();
        Ok(())
    }
}

/// Frame a message for mbox storage: separator line, `From ` quoting, and a
/// terminating blank line.
fn frame_message(separator: &str, raw: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(separator.len() + raw.len() + 2);
    framed.extend_from_slice(separator.as_bytes());

    let mut pos = 0;
    while pos < raw.len() {
        let line_end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| pos + p + 1)
            .unwrap_or(raw.len());
        let line = &raw[pos..line_end];
        if is_quotable_from_line(line) {
            framed.push(b'>');
        }
        framed.extend_from_slice(line);
        pos = line_end;
    }

    if !framed.ends_with(b"\n") {
        framed.push(b'\n');
    }
    framed.push(b'\n');
    framed
}

/// Body lines matching `^>*From ` need one more quoting level.
fn is_quotable_from_line(line: &[u8]) -> bool {
    let unquoted = {
        let mut rest = line;
        while let Some(stripped) = rest.strip_prefix(b">") {
            rest = stripped;
        }
        rest
    };
    unquoted.starts_with(b"From ")
}

/// Scan the message spans of an mbox file.
///
/// A `From ` line at the start of the file or after a blank line opens a new
/// message. A `From ` line without a preceding blank line is tolerated with
/// a warning, matching what damaged archives contain in practice.
fn scan_spans(path: &Path) -> Result<Vec<(u64, u64)>> {
    let file = File::open(path).map_err(|e| DedupError::io(path, e))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let mut spans = Vec::new();
    let mut current_offset: u64 = 0;
    let mut message_start: Option<u64> = None;
    let mut prev_line_was_empty = true;
    let mut first_line = true;
    let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

    loop {
        line_buf.clear();
        let line_len = {
            let buf = reader.fill_buf().map_err(|e| DedupError::io(path, e))?;
            if buf.is_empty() {
                break; // EOF
            }
            let consume_len = match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => pos + 1,
                None => buf.len(),
            };
            line_buf.extend_from_slice(&buf[..consume_len]);
            reader.consume(consume_len);
            consume_len as u64
        };

        if is_mbox_separator(&line_buf) {
            if !first_line && !prev_line_was_empty {
                warn!(
                    offset = current_offset,
                    "'From ' separator without preceding blank line"
                );
            }
            if let Some(start) = message_start {
                spans.push((start, current_offset - start));
            }
            message_start = Some(current_offset);
        }

        prev_line_was_empty = is_blank_line(&line_buf);
        first_line = false;
        current_offset += line_len;
    }

    if let Some(start) = message_start {
        spans.push((start, current_offset - start));
    }

    Ok(spans)
}

/// Check whether a line is an mbox separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    let line = if line.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &line[3..]
    } else {
        line
    };
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
