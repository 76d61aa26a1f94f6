//! Terminal actions on the selected mails.
//!
//! Everything before this point only computes sets; actions are where mail
//! is physically copied, moved or deleted. Dry-run keeps the accounting and
//! skips every mutation.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::dedupe::engine::Deduplicate;
use crate::error::{DedupError, Result};
use crate::mailbox::create_box;
use crate::model::message::Message;

/// All available action identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    /// Copy selected mails to the export container.
    CopySelected,
    /// Copy discarded mails to the export container.
    CopyDiscarded,
    /// Move selected mails out of their sources into the export container.
    MoveSelected,
    /// Move discarded mails out of their sources into the export container.
    MoveDiscarded,
    /// Delete selected mails from their sources in place.
    DeleteSelected,
    /// Delete discarded mails from their sources in place.
    DeleteDiscarded,
}

impl Action {
    /// Whether this action writes to an export container.
    pub fn needs_export(self) -> bool {
        !matches!(self, Action::DeleteSelected | Action::DeleteDiscarded)
    }

    /// Whether this action operates on the discarded side.
    fn targets_discarded(self) -> bool {
        matches!(
            self,
            Action::CopyDiscarded | Action::MoveDiscarded | Action::DeleteDiscarded
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = clap::ValueEnum::to_possible_value(self).expect("no skipped variants");
        f.write_str(value.get_name())
    }
}

/// Perform the configured action on the final selection.
///
/// Nothing selected is a no-op, not an error: a run without duplicates to
/// act on is a perfectly normal outcome.
pub fn perform_action(dedup: &mut Deduplicate) -> Result<()> {
    let Some(action) = dedup.conf.action else {
        debug!("No action configured");
        return Ok(());
    };
    info!(%action, "Performing action");

    if dedup.selection.is_empty() {
        warn!("No mail selected to perform action on");
        return Ok(());
    }
    info!(count = dedup.selection.len(), "Mails selected for action");

    let targets = if action.targets_discarded() {
        sorted(&dedup.discard)
    } else {
        sorted(&dedup.selection)
    };

    match action {
        Action::CopySelected | Action::CopyDiscarded => copy_mails(dedup, &targets, false),
        Action::MoveSelected | Action::MoveDiscarded => copy_mails(dedup, &targets, true),
        Action::DeleteSelected | Action::DeleteDiscarded => delete_mails(dedup, &targets),
    }
}

/// Deterministic processing order regardless of set iteration.
fn sorted(mails: &std::collections::HashSet<Rc<Message>>) -> Vec<Rc<Message>> {
    let mut mails: Vec<Rc<Message>> = mails.iter().cloned().collect();
    mails.sort();
    mails
}

/// Copy mails into the export container, removing the originals when
/// `remove_original` turns the copy into a move.
fn copy_mails(dedup: &mut Deduplicate, mails: &[Rc<Message>], remove_original: bool) -> Result<()> {
    let export = dedup
        .conf
        .export
        .clone()
        .ok_or_else(|| DedupError::Config("action requires an export destination".into()))?;

    let mut export_box = if dedup.conf.dry_run {
        None
    } else {
        Some(create_box(
            &export,
            dedup.conf.export_format,
            dedup.conf.export_append,
        )?)
    };

    for mail in mails {
        debug!(mail = ?mail, target = %export.display(), "Copying");
        if remove_original {
            dedup.stats.mail_moved += 1;
        } else {
            dedup.stats.mail_copied += 1;
        }

        if dedup.conf.dry_run {
            warn!(mail = ?mail, "DRY RUN: skip action");
            continue;
        }

        if let Some(ref mut target) = export_box {
            target.add(mail.raw())?;
        }
        if remove_original {
            remove_from_source(dedup, mail)?;
        }
    }

    if let Some(ref mut target) = export_box {
        target.close()?;
    }
    Ok(())
}

/// Delete mails from their original containers in place.
fn delete_mails(dedup: &mut Deduplicate, mails: &[Rc<Message>]) -> Result<()> {
    for mail in mails {
        debug!(mail = ?mail, "Deleting in place");
        dedup.stats.mail_deleted += 1;

        if dedup.conf.dry_run {
            warn!(mail = ?mail, "DRY RUN: skip action");
            continue;
        }
        remove_from_source(dedup, mail)?;
    }
    Ok(())
}

fn remove_from_source(dedup: &mut Deduplicate, mail: &Message) -> Result<()> {
    let source = dedup
        .sources
        .get_mut(mail.source_path())
        .ok_or_else(|| DedupError::UnknownMailId {
            path: mail.source_path().to_path_buf(),
            id: mail.mail_id().to_string(),
        })?;
    source.remove(mail.mail_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_export() {
        assert!(Action::CopySelected.needs_export());
        assert!(Action::MoveDiscarded.needs_export());
        assert!(!Action::DeleteSelected.needs_export());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Action::CopySelected.to_string(), "copy-selected");
        assert_eq!(Action::DeleteDiscarded.to_string(), "delete-discarded");
    }
}
