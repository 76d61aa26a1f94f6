//! Run statistics and their consistency audit.

use serde::Serialize;

use crate::action::Action;
use crate::error::{DedupError, Result};

/// Counters accumulated over a deduplication run.
///
/// `mail_*` counters track individual mails through the pipeline, `set_*`
/// counters track duplicate sets. [`Stats::check`] audits the relationships
/// between them after a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Total number of mails encountered from all mail sources.
    pub mail_found: u64,
    /// Mails rejected individually, lacking the metadata to compute a hash.
    pub mail_rejected: u64,
    /// Valid mails parsed and retained for deduplication.
    pub mail_retained: u64,
    /// Number of distinct identity hashes.
    pub mail_hashes: u64,
    /// Mails that are the only member of their set.
    pub mail_unique: u64,
    /// Mails sharing their identity hash with at least one other mail.
    pub mail_duplicates: u64,
    /// Mails ignored because the whole set they belong to was skipped.
    pub mail_skipped: u64,
    /// Mails discarded from the final selection.
    pub mail_discarded: u64,
    /// Mails kept in the final selection, on which the action is performed.
    pub mail_selected: u64,
    /// Mails copied from their original container to another.
    pub mail_copied: u64,
    /// Mails moved from their original container to another.
    pub mail_moved: u64,
    /// Mails deleted from their container in place.
    pub mail_deleted: u64,
    /// Total number of duplicate sets.
    pub set_total: u64,
    /// Sets containing a single mail, excluded from selection.
    pub set_single: u64,
    /// Sets skipped because of encoding issues.
    pub set_skipped_encoding: u64,
    /// Sets skipped because members were too dissimilar in size.
    pub set_skipped_size: u64,
    /// Sets skipped because members were too dissimilar in content.
    pub set_skipped_content: u64,
    /// Sets skipped because the strategy could not discriminate.
    pub set_skipped_strategy: u64,
    /// Sets on which the selection strategy was successfully applied.
    pub set_deduplicated: u64,
}

/// Labels and descriptions for the report, in display order.
const MAIL_ROWS: [(&str, &str); 12] = [
    (
        "Found",
        "Total number of mails encountered from all mail sources.",
    ),
    (
        "Rejected",
        "Mails rejected individually, lacking the metadata to compute a hash.",
    ),
    (
        "Retained",
        "Valid mails parsed and retained for deduplication.",
    ),
    ("Hashes", "Number of distinct identity hashes."),
    ("Unique", "Mails that are the only member of their set."),
    (
        "Duplicates",
        "Mails sharing their identity hash with at least one other mail.",
    ),
    (
        "Skipped",
        "Mails ignored because the whole set they belong to was skipped.",
    ),
    ("Discarded", "Mails discarded from the final selection."),
    (
        "Selected",
        "Mails kept in the final selection, on which the action is performed.",
    ),
    ("Copied", "Mails copied from their original container to another."),
    ("Moved", "Mails moved from their original container to another."),
    ("Deleted", "Mails deleted from their container in place."),
];

const SET_ROWS: [(&str, &str); 7] = [
    ("Total", "Total number of duplicate sets."),
    ("Single", "Sets containing a single mail, excluded from selection."),
    (
        "Skipped encoding",
        "Sets skipped because of encoding issues.",
    ),
    (
        "Skipped size",
        "Sets skipped because members were too dissimilar in size.",
    ),
    (
        "Skipped content",
        "Sets skipped because members were too dissimilar in content.",
    ),
    (
        "Skipped strategy",
        "Sets skipped because the strategy could not discriminate.",
    ),
    (
        "Deduplicated",
        "Sets on which the selection strategy was successfully applied.",
    ),
];

impl Stats {
    /// Add another statistics block into this one.
    pub fn merge(&mut self, other: &Stats) {
        self.mail_found += other.mail_found;
        self.mail_rejected += other.mail_rejected;
        self.mail_retained += other.mail_retained;
        self.mail_hashes += other.mail_hashes;
        self.mail_unique += other.mail_unique;
        self.mail_duplicates += other.mail_duplicates;
        self.mail_skipped += other.mail_skipped;
        self.mail_discarded += other.mail_discarded;
        self.mail_selected += other.mail_selected;
        self.mail_copied += other.mail_copied;
        self.mail_moved += other.mail_moved;
        self.mail_deleted += other.mail_deleted;
        self.set_total += other.set_total;
        self.set_single += other.set_single;
        self.set_skipped_encoding += other.set_skipped_encoding;
        self.set_skipped_size += other.set_skipped_size;
        self.set_skipped_content += other.set_skipped_content;
        self.set_skipped_strategy += other.set_skipped_strategy;
        self.set_deduplicated += other.set_deduplicated;
    }

    fn mail_values(&self) -> [u64; 12] {
        [
            self.mail_found,
            self.mail_rejected,
            self.mail_retained,
            self.mail_hashes,
            self.mail_unique,
            self.mail_duplicates,
            self.mail_skipped,
            self.mail_discarded,
            self.mail_selected,
            self.mail_copied,
            self.mail_moved,
            self.mail_deleted,
        ]
    }

    fn set_values(&self) -> [u64; 7] {
        [
            self.set_total,
            self.set_single,
            self.set_skipped_encoding,
            self.set_skipped_size,
            self.set_skipped_content,
            self.set_skipped_strategy,
            self.set_deduplicated,
        ]
    }

    /// Render the counters as two human-readable tables.
    pub fn report(&self) -> String {
        let mut out = String::new();

        for (title, labels, values) in [
            ("Mails", &MAIL_ROWS[..], &self.mail_values()[..]),
            ("Duplicate sets", &SET_ROWS[..], &self.set_values()[..]),
        ] {
            out.push('\n');
            out.push_str(&format!("  {title}\n"));
            out.push_str(&format!("  {}\n", "-".repeat(78)));
            for ((label, desc), value) in labels.iter().zip(values) {
                out.push_str(&format!("  {label:<17} {value:>8}  {desc}\n"));
            }
        }
        out.push('\n');
        out
    }

    /// Audit the relationships between counters.
    ///
    /// A failure here is a bug in the pipeline, not a user error; it is
    /// surfaced loudly so tricky edge cases get reported.
    pub fn check(&self, action: Option<Action>) -> Result<()> {
        self.ensure(
            self.mail_found == self.mail_rejected + self.mail_retained,
            "mail_found == mail_rejected + mail_retained",
        )?;
        self.ensure(
            self.mail_retained == self.mail_unique + self.mail_duplicates,
            "mail_retained == mail_unique + mail_duplicates",
        )?;
        self.ensure(
            self.mail_duplicates == self.mail_skipped + self.mail_discarded + self.mail_selected,
            "mail_duplicates == mail_skipped + mail_discarded + mail_selected",
        )?;
        self.ensure(
            self.set_total == self.mail_hashes,
            "set_total == mail_hashes",
        )?;
        self.ensure(
            self.set_single == self.mail_unique,
            "set_single == mail_unique",
        )?;
        self.ensure(
            self.set_total
                == self.set_single
                    + self.set_skipped_encoding
                    + self.set_skipped_size
                    + self.set_skipped_content
                    + self.set_skipped_strategy
                    + self.set_deduplicated,
            "set_total == set_single + set_skipped_* + set_deduplicated",
        )?;
        self.ensure(
            self.mail_copied <= self.mail_selected,
            "mail_copied <= mail_selected",
        )?;
        self.ensure(
            self.mail_deleted <= self.mail_selected,
            "mail_deleted <= mail_selected",
        )?;
        // move-discarded moves the discarded side, so the moved count is
        // bounded by it instead.
        if action == Some(Action::MoveDiscarded) {
            self.ensure(
                self.mail_moved <= self.mail_discarded,
                "mail_moved <= mail_discarded",
            )?;
        } else {
            self.ensure(
                self.mail_moved <= self.mail_selected,
                "mail_moved <= mail_selected",
            )?;
        }
        Ok(())
    }

    fn ensure(&self, condition: bool, invariant: &str) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(DedupError::StatsInconsistency(format!(
                "{invariant} does not hold in {self:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_all_counters() {
        let mut a = Stats {
            mail_found: 3,
            set_total: 1,
            ..Stats::default()
        };
        let b = Stats {
            mail_found: 2,
            set_skipped_size: 1,
            ..Stats::default()
        };
        a.merge(&b);
        assert_eq!(a.mail_found, 5);
        assert_eq!(a.set_total, 1);
        assert_eq!(a.set_skipped_size, 1);
    }

    #[test]
    fn test_check_accepts_consistent_stats() {
        let stats = Stats {
            mail_found: 10,
            mail_rejected: 1,
            mail_retained: 9,
            mail_hashes: 4,
            mail_unique: 1,
            mail_duplicates: 8,
            mail_skipped: 2,
            mail_discarded: 4,
            mail_selected: 2,
            set_total: 4,
            set_single: 1,
            set_skipped_size: 1,
            set_deduplicated: 2,
            ..Stats::default()
        };
        assert!(stats.check(None).is_ok());
    }

    #[test]
    fn test_check_rejects_broken_accounting() {
        let stats = Stats {
            mail_found: 10,
            mail_rejected: 1,
            mail_retained: 8,
            ..Stats::default()
        };
        let err = stats.check(None).unwrap_err();
        assert!(matches!(err, DedupError::StatsInconsistency(_)));
    }

    #[test]
    fn test_report_contains_every_counter_label() {
        let report = Stats::default().report();
        for (label, _) in MAIL_ROWS.iter().chain(SET_ROWS.iter()) {
            assert!(report.contains(label), "missing {label} in report");
        }
    }
}
