//! Mail container adapters.
//!
//! The engine is format-agnostic: it consumes `(id, raw bytes, file path)`
//! triples from a closed set of adapters behind the [`MailBox`] trait. Two
//! structures exist, file-based (mbox) and folder-based (maildir), and that
//! distinction is all the deduplication layer ever relies on.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{DedupError, Result};

pub mod maildir;
pub mod mbox;

/// Sub-folders defining a properly structured maildir.
pub const MAILDIR_SUBDIRS: [&str; 3] = ["cur", "new", "tmp"];

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BoxFormat {
    /// Single file, `From ` separator framing.
    Mbox,
    /// One file per message under `cur`/`new`/`tmp`.
    Maildir,
}

impl BoxFormat {
    /// Whether messages live in individual files.
    pub fn is_folder_structured(self) -> bool {
        matches!(self, BoxFormat::Maildir)
    }
}

impl fmt::Display for BoxFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = clap::ValueEnum::to_possible_value(self).expect("no skipped variants");
        f.write_str(value.get_name())
    }
}

/// One message as read from a container.
pub struct RawMail {
    /// Identifier of the message within its container.
    pub id: String,
    /// Filesystem location: the message file for folder-structured boxes,
    /// the container file otherwise.
    pub path: PathBuf,
    /// Raw message bytes.
    pub raw: Vec<u8>,
}

/// Read/write access to one mail container.
pub trait MailBox: fmt::Debug {
    /// Normalized path of the container.
    fn path(&self) -> &Path;

    /// Format of the container.
    fn format(&self) -> BoxFormat;

    /// Number of messages found at open time.
    fn len(&self) -> usize;

    /// Whether the container held no messages at open time.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all messages in container order.
    fn iterate(&mut self) -> Result<Box<dyn Iterator<Item = Result<RawMail>> + '_>>;

    /// Append a message, returning its new identifier.
    fn add(&mut self, raw: &[u8]) -> Result<String>;

    /// Remove a message in place.
    fn remove(&mut self, id: &str) -> Result<()>;

    /// Flush pending changes and release the container.
    fn close(&mut self) -> Result<()>;
}

/// Auto-detect the format of the container at `path`.
///
/// A folder carrying the maildir sub-directories is a maildir, a file is an
/// mbox; anything else is unrecognized.
pub fn autodetect_box_type(path: &Path) -> Result<BoxFormat> {
    if path.is_dir() {
        for subdir in MAILDIR_SUBDIRS {
            if !path.join(subdir).is_dir() {
                return Err(DedupError::InvalidMaildir {
                    path: path.to_path_buf(),
                    subdir,
                });
            }
        }
        return Ok(BoxFormat::Maildir);
    }
    if path.is_file() {
        return Ok(BoxFormat::Mbox);
    }
    if !path.exists() {
        return Err(DedupError::SourceNotFound(path.to_path_buf()));
    }
    Err(DedupError::UnknownBoxFormat(path.to_path_buf()))
}

/// Open the container at `path`, returning one box per (sub)folder.
///
/// Maildir subfolders (`.Name` directories with their own maildir structure)
/// are opened as their own boxes. A forced format skips autodetection.
pub fn open_box(path: &Path, forced: Option<BoxFormat>) -> Result<Vec<Box<dyn MailBox>>> {
    info!(path = %path.display(), "Opening box");
    let format = match forced {
        Some(format) => {
            warn!(%format, "Forcing box format");
            format
        }
        None => {
            let format = autodetect_box_type(path)?;
            info!(%format, "Box format detected");
            format
        }
    };

    match format {
        BoxFormat::Mbox => Ok(vec![Box::new(mbox::MboxBox::open(path)?)]),
        BoxFormat::Maildir => maildir::open_with_subfolders(path),
    }
}

/// Create a brand new container for exports.
///
/// Refuses to touch an existing path unless `append` is set.
pub fn create_box(path: &Path, format: BoxFormat, append: bool) -> Result<Box<dyn MailBox>> {
    info!(path = %path.display(), %format, "Creating box");
    if path.exists() && !append {
        return Err(DedupError::ExportExists(path.to_path_buf()));
    }
    match format {
        BoxFormat::Mbox => Ok(Box::new(mbox::MboxBox::create(path)?)),
        BoxFormat::Maildir => Ok(Box::new(maildir::MaildirBox::create(path)?)),
    }
}

/// Drop the leading mbox `From ` separator line, if any.
///
/// Used when writing a message into a container: mbox adds its own separator
/// and maildir files carry none.
pub(crate) fn strip_mbox_separator(raw: &[u8]) -> &[u8] {
    if raw.starts_with(b"From ") {
        if let Some(pos) = raw.iter().position(|&b| b == b'\n') {
            return &raw[pos + 1..];
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autodetect_missing_path() {
        let err = autodetect_box_type(Path::new("/nonexistent/box")).unwrap_err();
        assert!(matches!(err, DedupError::SourceNotFound(_)));
    }

    #[test]
    fn test_autodetect_maildir_and_mbox() {
        let dir = tempfile::tempdir().unwrap();

        let maildir = dir.path().join("md");
        for subdir in MAILDIR_SUBDIRS {
            std::fs::create_dir_all(maildir.join(subdir)).unwrap();
        }
        assert_eq!(autodetect_box_type(&maildir).unwrap(), BoxFormat::Maildir);

        let mbox_path = dir.path().join("box.mbox");
        std::fs::write(&mbox_path, b"").unwrap();
        assert_eq!(autodetect_box_type(&mbox_path).unwrap(), BoxFormat::Mbox);

        let plain_dir = dir.path().join("plain");
        std::fs::create_dir_all(&plain_dir).unwrap();
        assert!(matches!(
            autodetect_box_type(&plain_dir).unwrap_err(),
            DedupError::InvalidMaildir { .. }
        ));
    }

    #[test]
    fn test_create_box_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.mbox");
        std::fs::write(&target, b"").unwrap();
        assert!(matches!(
            create_box(&target, BoxFormat::Mbox, false).unwrap_err(),
            DedupError::ExportExists(_)
        ));
        assert!(create_box(&target, BoxFormat::Mbox, true).is_ok());
    }

    #[test]
    fn test_strip_mbox_separator() {
        let raw = b"From a@b.com Thu Jan 01 00:00:00 2024\nSubject: x\n\nbody\n";
        assert_eq!(
            strip_mbox_separator(raw),
            b"Subject: x\n\nbody\n"
        );
        let bare = b"Subject: x\n\nbody\n";
        assert_eq!(strip_mbox_separator(bare), bare.as_slice());
    }
}
