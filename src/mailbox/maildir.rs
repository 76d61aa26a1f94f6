//! maildir adapter: one file per message under `cur`/`new`/`tmp`.
//!
//! Iteration covers `cur` and `new`; `tmp` holds deliveries in flight and is
//! never read. Writes go through `tmp` and are renamed into `new`, the
//! atomic delivery dance every maildir tool performs. `.Name` sub-folders
//! with their own maildir structure are opened as separate boxes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::{strip_mbox_separator, BoxFormat, MailBox, RawMail, MAILDIR_SUBDIRS};
use crate::error::{DedupError, Result};

/// Monotonic counter making delivery file names unique within the process.
static DELIVERY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A maildir folder opened for deduplication.
#[derive(Debug)]
pub struct MaildirBox {
    path: PathBuf,
    entries: Vec<PathBuf>,
}

impl MaildirBox {
    /// Open an existing maildir, scanning `cur` and `new`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        for subdir in MAILDIR_SUBDIRS {
            if !path.join(subdir).is_dir() {
                return Err(DedupError::InvalidMaildir {
                    path: path.clone(),
                    subdir,
                });
            }
        }

        let mut entries = Vec::new();
        for subdir in ["cur", "new"] {
            let dir = path.join(subdir);
            let listing = std::fs::read_dir(&dir).map_err(|e| DedupError::io(&dir, e))?;
            for entry in listing {
                let entry = entry.map_err(|e| DedupError::io(&dir, e))?;
                if entry.path().is_file() {
                    entries.push(entry.path());
                }
            }
        }
        entries.sort();
        debug!(path = %path.display(), count = entries.len(), "maildir scanned");
        Ok(Self { path, entries })
    }

    /// Create a fresh maildir (or open an existing one for append).
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        for subdir in MAILDIR_SUBDIRS {
            let dir = path.join(subdir);
            std::fs::create_dir_all(&dir).map_err(|e| DedupError::io(&dir, e))?;
        }
        Self::open(&path)
    }

    fn entry(&self, id: &str) -> Result<&PathBuf> {
        self.entries
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == id))
            .ok_or_else(|| DedupError::UnknownMailId {
                path: self.path.clone(),
                id: id.to_string(),
            })
    }
}

impl MailBox for MaildirBox {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> BoxFormat {
        BoxFormat::Maildir
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn iterate(&mut self) -> Result<Box<dyn Iterator<Item = Result<RawMail>> + '_>> {
        let iter = self.entries.clone().into_iter().map(|file_path| {
            let raw = std::fs::read(&file_path).map_err(|e| DedupError::io(&file_path, e))?;
            let id = file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(RawMail {
                id,
                path: file_path,
                raw,
            })
        });
        Ok(Box::new(iter))
    }

    fn add(&mut self, raw: &[u8]) -> Result<String> {
        let name = format!(
            "{}.{}_{}.maildedup",
            chrono::Utc::now().timestamp(),
            std::process::id(),
            DELIVERY_COUNTER.fetch_add(1, Ordering::Relaxed),
        );

        let tmp_path = self.path.join("tmp").join(&name);
        std::fs::write(&tmp_path, strip_mbox_separator(raw))
            .map_err(|e| DedupError::io(&tmp_path, e))?;

        let new_path = self.path.join("new").join(&name);
        std::fs::rename(&tmp_path, &new_path).map_err(|e| DedupError::io(&new_path, e))?;

        self.entries.push(new_path);
        Ok(name)
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        let file_path = self.entry(id)?.clone();
        std::fs::remove_file(&file_path).map_err(|e| DedupError::io(&file_path, e))?;
        self.entries.retain(|p| p != &file_path);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open a maildir and every `.Name` sub-folder carrying maildir structure.
pub fn open_with_subfolders(path: &Path) -> Result<Vec<Box<dyn MailBox>>> {
    let mut boxes: Vec<Box<dyn MailBox>> = vec![Box::new(MaildirBox::open(path)?)];

    let listing = std::fs::read_dir(path).map_err(|e| DedupError::io(path, e))?;
    let mut subfolders: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('.'))
                && MAILDIR_SUBDIRS.iter().all(|s| p.join(s).is_dir())
        })
        .collect();
    subfolders.sort();

    for subfolder in subfolders {
        info!(path = %subfolder.display(), "Opening subfolder");
        boxes.extend(open_with_subfolders(&subfolder)?);
    }
    Ok(boxes)
}
