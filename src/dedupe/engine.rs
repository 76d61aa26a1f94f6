//! The deduplication orchestrator.
//!
//! Three strictly ordered phases: register sources, hash every mail, then
//! categorize one duplicate set per distinct hash. Hashing completes before
//! any set is built so the quadratic pairwise checks stay bounded to one
//! group at a time.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dedupe::set::DuplicateSet;
use crate::dedupe::stats::Stats;
use crate::error::{DedupError, Result};
use crate::hash;
use crate::mailbox::{open_box, MailBox};
use crate::model::message::Message;

/// Progress callback: `(processed, total)`.
pub type Progress<'a> = &'a dyn Fn(u64, u64);

/// Drives a whole deduplication run.
pub struct Deduplicate {
    /// Run configuration, validated by the caller.
    pub conf: Config,
    /// Open sources, keyed by their normalized path.
    pub(crate) sources: BTreeMap<PathBuf, Box<dyn MailBox>>,
    /// Mails grouped by identity hash.
    mails: BTreeMap<String, HashSet<Rc<Message>>>,
    /// Union of every categorized set's selection.
    pub selection: HashSet<Rc<Message>>,
    /// Union of every categorized set's discard side.
    pub discard: HashSet<Rc<Message>>,
    /// Running totals.
    pub stats: Stats,
}

impl Deduplicate {
    /// Create an engine over a validated configuration.
    pub fn new(conf: Config) -> Self {
        Self {
            conf,
            sources: BTreeMap::new(),
            mails: BTreeMap::new(),
            selection: HashSet::new(),
            discard: HashSet::new(),
            stats: Stats::default(),
        }
    }

    /// Register, validate and open a source of mails.
    ///
    /// The normalized path keys the source so a mail can be tied back to its
    /// container at action time; registering the same source twice is a
    /// user error. A maildir contributes one box per sub-folder.
    pub fn add_source(&mut self, source_path: impl AsRef<Path>) -> Result<()> {
        let path = std::fs::canonicalize(source_path.as_ref())
            .map_err(|_| DedupError::SourceNotFound(source_path.as_ref().to_path_buf()))?;
        if self.sources.contains_key(&path) {
            return Err(DedupError::DuplicateSource(path));
        }

        for source in open_box(&path, self.conf.input_format)? {
            let found = source.len() as u64;
            info!(path = %source.path().display(), count = found, "Mails found");
            self.stats.mail_found += found;
            self.sources.insert(source.path().to_path_buf(), source);
        }
        Ok(())
    }

    /// Browse all mails from all sources, compute hashes and group by hash.
    ///
    /// Mails without enough canonical header signal are rejected here,
    /// individually, and never reach a duplicate set.
    pub fn hash_all(&mut self, progress: Option<Progress>) -> Result<()> {
        info!(
            headers = ?self.conf.hash_headers,
            body = ?self.conf.hash_body,
            "Computing identity hashes"
        );

        let total = self.stats.mail_found;
        let mut processed: u64 = 0;

        for (box_path, source) in self.sources.iter_mut() {
            for item in source.iterate()? {
                let raw_mail = item?;
                let mail = Rc::new(Message::from_raw(
                    box_path,
                    raw_mail.id,
                    raw_mail.path,
                    raw_mail.raw,
                    &self.conf,
                ));

                match hash::identity_hash(&mail, &self.conf) {
                    Ok(key) => {
                        debug!(mail = ?mail, hash = %key, "Hashed");
                        // Set semantics deduplicate entries pointing at the
                        // same physical record.
                        self.mails.entry(key).or_default().insert(mail);
                        self.stats.mail_retained += 1;
                    }
                    Err(DedupError::TooFewHeaders { found }) => {
                        warn!(mail = ?mail, found, "Rejecting mail: too few headers");
                        self.stats.mail_rejected += 1;
                    }
                    Err(other) => return Err(other),
                }

                processed += 1;
                if let Some(callback) = progress {
                    callback(processed, total);
                }
            }
        }

        self.stats.mail_hashes = self.mails.len() as u64;
        Ok(())
    }

    /// Build one duplicate set per hash and categorize it.
    ///
    /// Sets are processed one at a time; their stats, selection and discard
    /// sides are merged into the run totals and the set is dropped.
    pub fn build_sets(&mut self) {
        match self.conf.strategy {
            Some(strategy) => {
                info!(%strategy, "Strategy will be applied on each duplicate set")
            }
            None => warn!("No strategy configured, skipping selection"),
        }

        self.stats.set_total = self.mails.len() as u64;

        for (hash_key, mail_set) in std::mem::take(&mut self.mails) {
            let count = mail_set.len();
            if count > 1 {
                info!(hash = %hash_key, count, "Duplicate set");
            }

            let mut duplicates = DuplicateSet::new(hash_key, mail_set);
            duplicates.categorize(&self.conf);

            self.stats.merge(&duplicates.stats);
            self.selection.extend(duplicates.selection.iter().cloned());
            self.discard.extend(duplicates.discard.iter().cloned());
        }
    }

    /// Flush and release every open source.
    pub fn close_all(&mut self) -> Result<()> {
        for (path, source) in self.sources.iter_mut() {
            debug!(path = %path.display(), "Closing box");
            source.close()?;
        }
        Ok(())
    }

    /// Human-readable statistics tables.
    pub fn report(&self) -> String {
        self.stats.report()
    }

    /// Audit the run counters; a failure is a pipeline bug.
    pub fn check_stats(&self) -> Result<()> {
        self.stats.check(self.conf.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::strategy::Strategy;
    use crate::mailbox::MAILDIR_SUBDIRS;

    fn render(date: &str, subject: &str, body: &str) -> String {
        format!(
            "Date: {date}\n\
             From: foo@bar.com\n\
             To: baz@qux.com\n\
             Subject: {subject}\n\
             Message-Id: <id-{subject}@host>\n\
             \n\
             {body}"
        )
    }

    fn make_maildir(dir: &Path, mails: &[String]) -> PathBuf {
        let root = dir.join("box");
        for subdir in MAILDIR_SUBDIRS {
            std::fs::create_dir_all(root.join(subdir)).unwrap();
        }
        for (index, raw) in mails.iter().enumerate() {
            std::fs::write(root.join("cur").join(format!("mail-{index:02}")), raw).unwrap();
        }
        root
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = make_maildir(dir.path(), &[]);
        let mut dedup = Deduplicate::new(Config::default());
        dedup.add_source(&root).unwrap();
        assert!(matches!(
            dedup.add_source(&root).unwrap_err(),
            DedupError::DuplicateSource(_)
        ));
    }

    #[test]
    fn test_full_run_groups_and_selects() {
        let dir = tempfile::tempdir().unwrap();
        let date = "Thu, 04 Jan 2024 10:00:00 +0000";
        let root = make_maildir(
            dir.path(),
            &[
                render(date, "dup", "short body\n"),
                render(date, "dup", "short body, but longer\n"),
                render(date, "other", "unrelated\n"),
            ],
        );

        let conf = Config {
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut dedup = Deduplicate::new(conf);
        dedup.add_source(&root).unwrap();
        dedup.hash_all(None).unwrap();
        dedup.build_sets();
        dedup.close_all().unwrap();

        assert_eq!(dedup.stats.mail_found, 3);
        assert_eq!(dedup.stats.mail_retained, 3);
        assert_eq!(dedup.stats.mail_hashes, 2);
        assert_eq!(dedup.stats.set_total, 2);
        assert_eq!(dedup.stats.set_single, 1);
        assert_eq!(dedup.stats.set_deduplicated, 1);
        assert_eq!(dedup.selection.len(), 1);
        assert_eq!(dedup.discard.len(), 1);
        dedup.check_stats().unwrap();
    }

    #[test]
    fn test_progress_reaches_total() {
        let dir = tempfile::tempdir().unwrap();
        let date = "Thu, 04 Jan 2024 10:00:00 +0000";
        let root = make_maildir(
            dir.path(),
            &[render(date, "a", "x\n"), render(date, "b", "y\n")],
        );

        let mut dedup = Deduplicate::new(Config::default());
        dedup.add_source(&root).unwrap();
        let seen = std::cell::Cell::new(0u64);
        let callback = |current: u64, _total: u64| seen.set(current);
        dedup.hash_all(Some(&callback)).unwrap();
        assert_eq!(seen.get(), 2);
    }
}
