//! Duplicate sets: the pool of mails sharing one identity hash.
//!
//! A set owns the safety checks that decide whether its members are close
//! enough to be acted on, and the categorization that splits them into a
//! selection and a discard side. Both are all-or-nothing: a single pair over
//! a threshold, or a strategy unable to discriminate, skips the whole set.

use std::collections::HashSet;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dedupe::stats::Stats;
use crate::error::{DedupError, Result};
use crate::model::message::Message;

/// Why a whole set was left out of the selection process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A member's body resisted decoding.
    Encoding,
    /// Two members diverge in size beyond the threshold.
    Size,
    /// Two members diverge in content beyond the threshold.
    Content,
    /// No strategy configured, or the strategy selected everything/nothing.
    Strategy,
}

/// Lifecycle of a duplicate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetState {
    /// Created, not yet categorized.
    Pending,
    /// Single-member set: nothing to deduplicate.
    Unique,
    /// Left fully unprocessed.
    Skipped(SkipReason),
    /// Split into selection and discard.
    Categorized,
}

/// All mails sharing one identity hash.
///
/// The pool is frozen at construction (sorted by uid, deduplicated); only
/// the derived `selection` and `discard` sets are ever produced from it.
pub struct DuplicateSet {
    hash_key: String,
    pool: Vec<Rc<Message>>,
    /// Mails selected by the strategy, targets of the action.
    pub selection: HashSet<Rc<Message>>,
    /// Mails discarded from the final selection.
    pub discard: HashSet<Rc<Message>>,
    /// Counters to merge into the run totals.
    pub stats: Stats,
    state: SetState,
}

impl DuplicateSet {
    /// Freeze a pool of mails under their shared hash.
    pub fn new(hash_key: impl Into<String>, mails: impl IntoIterator<Item = Rc<Message>>) -> Self {
        let mut pool: Vec<Rc<Message>> = mails.into_iter().collect();
        pool.sort();
        pool.dedup();
        let set = Self {
            hash_key: hash_key.into(),
            pool,
            selection: HashSet::new(),
            discard: HashSet::new(),
            stats: Stats::default(),
            state: SetState::Pending,
        };
        debug!(hash = %set.hash_key, size = set.len(), "Duplicate set created");
        set
    }

    /// The identity hash shared by every pool member.
    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    /// Number of mails in the pool.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The frozen pool, sorted by uid.
    pub fn pool(&self) -> &[Rc<Message>] {
        &self.pool
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SetState {
        self.state
    }

    /// The newest timestamp among pool members carrying one.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.pool.iter().filter_map(|m| m.timestamp()).max()
    }

    /// The oldest timestamp among pool members carrying one.
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.pool.iter().filter_map(|m| m.timestamp()).min()
    }

    /// The biggest payload size in the pool.
    pub fn biggest_size(&self) -> Option<u64> {
        self.pool.iter().map(|m| m.size()).max()
    }

    /// The smallest payload size in the pool.
    pub fn smallest_size(&self) -> Option<u64> {
        self.pool.iter().map(|m| m.size()).min()
    }

    /// Ensure all mails differ within the configured size and content limits.
    ///
    /// Compares every unordered pair, stopping at the first violation. A
    /// negative threshold disables that axis of comparison entirely.
    pub fn check_differences(&self, conf: &Config) -> Result<()> {
        if conf.size_threshold < 0 {
            debug!("Skip checking for size differences");
        }
        if conf.content_threshold < 0 {
            debug!("Skip checking for content differences");
        }
        if conf.size_threshold < 0 && conf.content_threshold < 0 {
            return Ok(());
        }

        // A mail whose body resisted decoding cannot be compared fairly.
        if let Some(mail) = self.pool.iter().find(|m| m.decode_errors()) {
            return Err(DedupError::Encoding(format!("{mail:?}")));
        }

        for (index, mail_a) in self.pool.iter().enumerate() {
            for mail_b in &self.pool[index + 1..] {
                if conf.size_threshold >= 0 {
                    let size_difference = mail_a.size().abs_diff(mail_b.size());
                    debug!(
                        a = ?mail_a,
                        b = ?mail_b,
                        bytes = size_difference,
                        "Size difference"
                    );
                    if size_difference as i64 > conf.size_threshold {
                        return Err(DedupError::SizeDiffAboveThreshold);
                    }
                }

                if conf.content_threshold >= 0 {
                    let content_difference = Self::diff(mail_a, mail_b);
                    debug!(
                        a = ?mail_a,
                        b = ?mail_b,
                        bytes = content_difference,
                        "Content difference"
                    );
                    if content_difference as i64 > conf.content_threshold {
                        if conf.show_diff {
                            info!("\n{}", Self::pretty_diff(mail_a, mail_b));
                        }
                        return Err(DedupError::ContentDiffAboveThreshold);
                    }
                }
            }
        }
        Ok(())
    }

    /// Size in bytes of the zero-context unified diff between two bodies.
    ///
    /// File names in the diff header are blanked to `a` / `b` and dates
    /// omitted so they never pollute the byte count.
    pub fn diff(mail_a: &Message, mail_b: &Message) -> usize {
        let body_a = mail_a.body_lines().concat();
        let body_b = mail_b.body_lines().concat();
        let diff = TextDiff::from_lines(body_a.as_str(), body_b.as_str());
        let mut unified = diff.unified_diff();
        unified.context_radius(0).header("a", "b");
        unified.to_string().len()
    }

    /// Verbose unified diff between two bodies, for logging.
    pub fn pretty_diff(mail_a: &Message, mail_b: &Message) -> String {
        let body_a = mail_a.body_lines().concat();
        let body_b = mail_b.body_lines().concat();
        let diff = TextDiff::from_lines(body_a.as_str(), body_b.as_str());
        let mut unified = diff.unified_diff();
        unified.context_radius(0).header(
            &format!("Normalized body of {mail_a:?}"),
            &format!("Normalized body of {mail_b:?}"),
        );
        unified.to_string()
    }

    /// Run the safety checks, then the strategy, and split the pool.
    ///
    /// State transitions, in order: a single-member pool is `Unique`; a
    /// safety-check failure skips the whole set under its reason; no
    /// configured strategy skips it; a strategy selecting everything or
    /// nothing achieved no discrimination and skips it; otherwise the set is
    /// `Categorized` with `selection ∪ discard == pool`.
    pub fn categorize(&mut self, conf: &Config) {
        let size = self.len() as u64;

        if self.len() == 1 {
            debug!(hash = %self.hash_key, "Single mail, nothing to deduplicate");
            self.stats.set_single += 1;
            self.stats.mail_unique += 1;
            self.state = SetState::Unique;
            return;
        }

        self.stats.mail_duplicates += size;

        if let Err(err) = self.check_differences(conf) {
            let reason = match err {
                DedupError::SizeDiffAboveThreshold => {
                    warn!("Skip set: mails are too dissimilar in size");
                    SkipReason::Size
                }
                DedupError::ContentDiffAboveThreshold => {
                    warn!("Skip set: mails are too dissimilar in content");
                    SkipReason::Content
                }
                _ => {
                    warn!("Skip set: unparsable mails due to bad encoding");
                    SkipReason::Encoding
                }
            };
            self.skip(reason, size);
            return;
        }

        let Some(strategy) = conf.strategy else {
            warn!("Skip set: no strategy to apply");
            self.skip(SkipReason::Strategy, size);
            return;
        };

        let selected = strategy.apply(self, conf);

        // A strategy that selects the whole pool or none of it achieved no
        // discrimination; acting on such a set would be arbitrary.
        if selected.len() == self.len() {
            warn!(
                count = selected.len(),
                "Skip set: all mails were selected, none discarded"
            );
            self.skip(SkipReason::Strategy, size);
            return;
        }
        if selected.is_empty() {
            warn!("Skip set: no mail was selected");
            self.skip(SkipReason::Strategy, size);
            return;
        }

        info!(count = selected.len(), "Mail candidates selected for action");
        self.stats.mail_selected += selected.len() as u64;
        self.stats.mail_discarded += size - selected.len() as u64;
        self.stats.set_deduplicated += 1;
        self.discard = self
            .pool
            .iter()
            .filter(|m| !selected.contains(*m))
            .cloned()
            .collect();
        self.selection = selected;
        self.state = SetState::Categorized;
    }

    fn skip(&mut self, reason: SkipReason, size: u64) {
        self.stats.mail_skipped += size;
        match reason {
            SkipReason::Encoding => self.stats.set_skipped_encoding += 1,
            SkipReason::Size => self.stats.set_skipped_size += 1,
            SkipReason::Content => self.stats.set_skipped_content += 1,
            SkipReason::Strategy => self.stats.set_skipped_strategy += 1,
        }
        self.state = SetState::Skipped(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::strategy::Strategy;
    use crate::testutil::{date_mail, mail_with_conf, render_mail, sized_mail};

    #[test]
    fn test_pool_is_frozen_sorted_and_deduplicated() {
        let set = DuplicateSet::new(
            "k",
            vec![sized_mail("b", 10), sized_mail("a", 12), sized_mail("b", 10)],
        );
        assert_eq!(set.len(), 2);
        let ids: Vec<&str> = set.pool().iter().map(|m| m.mail_id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_single_mail_set_is_unique() {
        let conf = Config::default();
        let mut set = DuplicateSet::new("k", vec![sized_mail("a", 10)]);
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Unique);
        assert_eq!(set.stats.set_single, 1);
        assert_eq!(set.stats.mail_unique, 1);
        assert_eq!(set.stats.mail_duplicates, 0);
        assert!(set.selection.is_empty());
        assert!(set.discard.is_empty());
    }

    #[test]
    fn test_size_threshold_violation_skips_whole_set() {
        // Pair extremes differ by 20 bytes; threshold one byte short.
        let conf = Config {
            size_threshold: 19,
            content_threshold: -1,
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut set = DuplicateSet::new(
            "k",
            vec![sized_mail("a", 10), sized_mail("b", 20), sized_mail("c", 30)],
        );
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Skipped(SkipReason::Size));
        assert_eq!(set.stats.set_skipped_size, 1);
        assert_eq!(set.stats.mail_skipped, 3);
        assert!(set.selection.is_empty());
        assert!(set.discard.is_empty());
    }

    #[test]
    fn test_size_threshold_exactly_met_passes() {
        let conf = Config {
            size_threshold: 20,
            content_threshold: -1,
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut set = DuplicateSet::new(
            "k",
            vec![sized_mail("a", 10), sized_mail("b", 20), sized_mail("c", 30)],
        );
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Categorized);
    }

    #[test]
    fn test_negative_thresholds_disable_checks() {
        let conf = Config {
            size_threshold: -1,
            content_threshold: -1,
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut set = DuplicateSet::new(
            "k",
            vec![sized_mail("a", 10), sized_mail("b", 5000)],
        );
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Categorized);
    }

    #[test]
    fn test_content_threshold_violation_skips_whole_set() {
        let conf = Config {
            size_threshold: -1,
            content_threshold: 5,
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut set = DuplicateSet::new(
            "k",
            vec![sized_mail("a", 10), sized_mail("b", 200)],
        );
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Skipped(SkipReason::Content));
        assert_eq!(set.stats.set_skipped_content, 1);
    }

    #[test]
    fn test_no_strategy_skips_set() {
        let conf = Config::default();
        let mut set = DuplicateSet::new("k", vec![sized_mail("a", 10), sized_mail("b", 10)]);
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Skipped(SkipReason::Strategy));
        assert_eq!(set.stats.set_skipped_strategy, 1);
        assert_eq!(set.stats.mail_skipped, 2);
    }

    #[test]
    fn test_select_all_skips_set() {
        // All mails share the same size: select-smallest selects everything.
        let conf = Config {
            strategy: Some(Strategy::SelectSmallest),
            ..Config::default()
        };
        let mut set = DuplicateSet::new("k", vec![sized_mail("a", 10), sized_mail("b", 10)]);
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Skipped(SkipReason::Strategy));
    }

    #[test]
    fn test_select_none_skips_set() {
        // All mails share the same size: select-smaller selects nothing.
        let conf = Config {
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut set = DuplicateSet::new("k", vec![sized_mail("a", 10), sized_mail("b", 10)]);
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Skipped(SkipReason::Strategy));
    }

    #[test]
    fn test_partition_invariant() {
        let conf = Config {
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        let mut set = DuplicateSet::new(
            "k",
            vec![sized_mail("a", 10), sized_mail("b", 10), sized_mail("c", 30)],
        );
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Categorized);
        assert_eq!(set.stats.set_deduplicated, 1);
        assert_eq!(set.stats.mail_selected, 2);
        assert_eq!(set.stats.mail_discarded, 1);

        assert!(set.selection.is_disjoint(&set.discard));
        let union: HashSet<_> = set.selection.union(&set.discard).cloned().collect();
        let pool: HashSet<_> = set.pool().iter().cloned().collect();
        assert_eq!(union, pool);
    }

    #[test]
    fn test_undecodable_mail_skips_set_as_encoding() {
        let conf = Config {
            strategy: Some(Strategy::SelectSmaller),
            ..Config::default()
        };
        // Body claims UTF-8 but carries invalid bytes via base64.
        let broken = "Date: Thu, 04 Jan 2024 10:00:00 +0000\n\
             From: foo@bar.com\n\
             To: baz@qux.com\n\
             Subject: x\n\
             Content-Type: text/plain; charset=\"utf-8\"\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             /v8=\n"
            .to_string()
            .into_bytes();
        let mut set = DuplicateSet::new(
            "k",
            vec![
                mail_with_conf("a", broken, &Config::default()),
                sized_mail("b", 10),
            ],
        );
        set.categorize(&conf);
        assert_eq!(set.state(), SetState::Skipped(SkipReason::Encoding));
        assert_eq!(set.stats.set_skipped_encoding, 1);
    }

    #[test]
    fn test_diff_of_identical_bodies_is_empty() {
        let conf = Config::default();
        let a = mail_with_conf("a", render_mail("Thu, 04 Jan 2024 10:00:00 +0000", "same\n"), &conf);
        let b = mail_with_conf("b", render_mail("Fri, 05 Jan 2024 10:00:00 +0000", "same\n"), &conf);
        assert_eq!(DuplicateSet::diff(&a, &b), 0);
    }

    #[test]
    fn test_diff_grows_with_divergence() {
        let conf = Config::default();
        let a = mail_with_conf(
            "a",
            render_mail("Thu, 04 Jan 2024 10:00:00 +0000", "one\ntwo\nthree\n"),
            &conf,
        );
        let b = mail_with_conf(
            "b",
            render_mail("Thu, 04 Jan 2024 10:00:00 +0000", "one\nTWO\nthree\n"),
            &conf,
        );
        let delta = DuplicateSet::diff(&a, &b);
        assert!(delta > 0);
        // Header lines + one removed + one added line
        assert!(delta < 60, "unexpectedly large diff: {delta}");
    }
}
