//! Selection strategies and their aliasing relationship.
//!
//! Each strategy is a pure function from a duplicate set to the subset of
//! *selected* mails (the ones the action will run on). Every strategy exists
//! under two names: `select-newest` and `discard-older` are the same
//! behavior seen from the two mental models users reason in. The aliasing is
//! encoded as data in [`STRATEGY_ALIASES`] rather than by name mangling.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use sha2::{Digest, Sha224};
use tracing::debug;

use crate::config::Config;
use crate::dedupe::set::DuplicateSet;
use crate::model::message::Message;

/// All selection strategy identifiers.
///
/// Kebab-case names (`select-newest`, `discard-one`, …) are derived from the
/// variant names for both CLI parsing and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Strategy {
    // Time-based.
    DiscardOlder,
    DiscardOldest,
    DiscardNewer,
    DiscardNewest,
    SelectOlder,
    SelectOldest,
    SelectNewer,
    SelectNewest,
    // Size-based.
    DiscardSmaller,
    DiscardSmallest,
    DiscardBigger,
    DiscardBiggest,
    SelectSmaller,
    SelectSmallest,
    SelectBigger,
    SelectBiggest,
    // Path-based.
    DiscardMatchingPath,
    DiscardNonMatchingPath,
    SelectMatchingPath,
    SelectNonMatchingPath,
    // Quantity-based.
    DiscardOne,
    DiscardAllButOne,
    SelectOne,
    SelectAllButOne,
}

/// Pairs of identifiers resolving to the same selection behavior.
///
/// The left member is the carrier: applying the right member runs the left
/// member's function. Complementarity between `select-X` and `discard-X`
/// follows from this table (`discard-older` keeps everything that is not
/// older, which is exactly `select-newest`).
pub const STRATEGY_ALIASES: [(Strategy, Strategy); 12] = [
    (Strategy::SelectNewest, Strategy::DiscardOlder),
    (Strategy::SelectNewer, Strategy::DiscardOldest),
    (Strategy::SelectOldest, Strategy::DiscardNewer),
    (Strategy::SelectOlder, Strategy::DiscardNewest),
    (Strategy::SelectBiggest, Strategy::DiscardSmaller),
    (Strategy::SelectBigger, Strategy::DiscardSmallest),
    (Strategy::SelectSmallest, Strategy::DiscardBigger),
    (Strategy::SelectSmaller, Strategy::DiscardBiggest),
    (Strategy::SelectNonMatchingPath, Strategy::DiscardMatchingPath),
    (Strategy::SelectMatchingPath, Strategy::DiscardNonMatchingPath),
    (Strategy::SelectAllButOne, Strategy::DiscardOne),
    (Strategy::SelectOne, Strategy::DiscardAllButOne),
];

impl Strategy {
    /// Resolve an alias to its carrier `select-*` identifier.
    pub fn canonical(self) -> Strategy {
        for (carrier, alias) in STRATEGY_ALIASES {
            if alias == self {
                return carrier;
            }
        }
        self
    }

    /// The identifier selecting this strategy's set-complement.
    pub fn complement(self) -> Strategy {
        self.flipped().canonical()
    }

    /// Swap the `select-`/`discard-` prefix, keeping the criterion.
    fn flipped(self) -> Strategy {
        use Strategy::*;
        match self {
            DiscardOlder => SelectOlder,
            DiscardOldest => SelectOldest,
            DiscardNewer => SelectNewer,
            DiscardNewest => SelectNewest,
            SelectOlder => DiscardOlder,
            SelectOldest => DiscardOldest,
            SelectNewer => DiscardNewer,
            SelectNewest => DiscardNewest,
            DiscardSmaller => SelectSmaller,
            DiscardSmallest => SelectSmallest,
            DiscardBigger => SelectBigger,
            DiscardBiggest => SelectBiggest,
            SelectSmaller => DiscardSmaller,
            SelectSmallest => DiscardSmallest,
            SelectBigger => DiscardBigger,
            SelectBiggest => DiscardBiggest,
            DiscardMatchingPath => SelectMatchingPath,
            DiscardNonMatchingPath => SelectNonMatchingPath,
            SelectMatchingPath => DiscardMatchingPath,
            SelectNonMatchingPath => DiscardNonMatchingPath,
            DiscardOne => SelectOne,
            DiscardAllButOne => SelectAllButOne,
            SelectOne => DiscardOne,
            SelectAllButOne => DiscardAllButOne,
        }
    }

    /// Whether this strategy compares mail timestamps.
    pub fn is_time_based(self) -> bool {
        use Strategy::*;
        matches!(
            self,
            DiscardOlder
                | DiscardOldest
                | DiscardNewer
                | DiscardNewest
                | SelectOlder
                | SelectOldest
                | SelectNewer
                | SelectNewest
        )
    }

    /// Whether this strategy tests mail paths against the configured regexp.
    pub fn is_path_based(self) -> bool {
        use Strategy::*;
        matches!(
            self,
            DiscardMatchingPath
                | DiscardNonMatchingPath
                | SelectMatchingPath
                | SelectNonMatchingPath
        )
    }

    /// Run the selection on a duplicate set, returning the selected subset.
    pub fn apply(self, duplicates: &DuplicateSet, conf: &Config) -> HashSet<Rc<Message>> {
        use Strategy::*;
        let carrier = self.canonical();
        debug!(strategy = %self, carrier = %carrier, "Apply strategy");
        match carrier {
            SelectOlder => select_older(duplicates),
            SelectOldest => select_oldest(duplicates),
            SelectNewer => select_newer(duplicates),
            SelectNewest => select_newest(duplicates),
            SelectSmaller => select_smaller(duplicates),
            SelectSmallest => select_smallest(duplicates),
            SelectBigger => select_bigger(duplicates),
            SelectBiggest => select_biggest(duplicates),
            SelectMatchingPath => select_path(duplicates, conf, true),
            SelectNonMatchingPath => select_path(duplicates, conf, false),
            SelectOne => select_one(duplicates, conf),
            SelectAllButOne => select_all_but_one(duplicates, conf),
            _ => unreachable!("canonical() always resolves to a carrier"),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = clap::ValueEnum::to_possible_value(self).expect("no skipped variants");
        f.write_str(value.get_name())
    }
}

/// Select all mails strictly older than the newest timestamp.
///
/// Mails without a timestamp are never selected and do not contribute to the
/// extremes: they count as neither oldest nor newest.
fn select_older(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(newest) = duplicates.newest_timestamp() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.timestamp().is_some_and(|t| t < newest))
        .cloned()
        .collect()
}

/// Select all mails sharing the oldest timestamp, ties included.
fn select_oldest(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(oldest) = duplicates.oldest_timestamp() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.timestamp().is_some_and(|t| t == oldest))
        .cloned()
        .collect()
}

/// Select all mails strictly newer than the oldest timestamp.
fn select_newer(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(oldest) = duplicates.oldest_timestamp() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.timestamp().is_some_and(|t| t > oldest))
        .cloned()
        .collect()
}

/// Select all mails sharing the newest timestamp, ties included.
fn select_newest(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(newest) = duplicates.newest_timestamp() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.timestamp().is_some_and(|t| t == newest))
        .cloned()
        .collect()
}

/// Select all mails strictly smaller than the biggest size.
fn select_smaller(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(biggest) = duplicates.biggest_size() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.size() < biggest)
        .cloned()
        .collect()
}

/// Select all mails sharing the smallest size, ties included.
fn select_smallest(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(smallest) = duplicates.smallest_size() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.size() == smallest)
        .cloned()
        .collect()
}

/// Select all mails strictly bigger than the smallest size.
fn select_bigger(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(smallest) = duplicates.smallest_size() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.size() > smallest)
        .cloned()
        .collect()
}

/// Select all mails sharing the biggest size, ties included.
fn select_biggest(duplicates: &DuplicateSet) -> HashSet<Rc<Message>> {
    let Some(biggest) = duplicates.biggest_size() else {
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| m.size() == biggest)
        .cloned()
        .collect()
}

/// Select mails whose path matches (or does not match) the configured regexp.
///
/// The tested path is the individual mail file for folder-structured
/// containers and the whole container file otherwise.
fn select_path(duplicates: &DuplicateSet, conf: &Config, matching: bool) -> HashSet<Rc<Message>> {
    let Some(ref regexp) = conf.regexp else {
        // Validation enforces the regexp; an empty selection is the safe
        // outcome if this is ever reached.
        return HashSet::new();
    };
    duplicates
        .pool()
        .iter()
        .filter(|m| regexp.is_match(&m.path().to_string_lossy()) == matching)
        .cloned()
        .collect()
}

/// Select exactly one pool member, pseudo-randomly.
fn select_one(duplicates: &DuplicateSet, conf: &Config) -> HashSet<Rc<Message>> {
    let index = pick_index(conf.seed, duplicates.hash_key(), duplicates.len());
    std::iter::once(duplicates.pool()[index].clone()).collect()
}

/// Select everything but one pool member, pseudo-randomly.
fn select_all_but_one(duplicates: &DuplicateSet, conf: &Config) -> HashSet<Rc<Message>> {
    let index = pick_index(conf.seed, duplicates.hash_key(), duplicates.len());
    duplicates
        .pool()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, m)| m.clone())
        .collect()
}

/// Deterministic pick over the uid-sorted pool.
///
/// Derived from a digest of the seed and the set's hash key, so the outcome
/// is reproducible for a given seed and independent of arrival order, and
/// `select-one` / `discard-one` agree on the excluded member.
fn pick_index(seed: u64, hash_key: &str, len: usize) -> usize {
    let mut hasher = Sha224::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(hash_key.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % len as u64) as usize
}
