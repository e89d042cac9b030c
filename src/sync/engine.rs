use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::audio::rendition::RenditionManager;
use crate::model::identifier::Identifier;
use crate::tiers::file_tier::FileTier;
use crate::tiers::{now_millis, EditKind, EditLogEntry, SyncSource, Tier, FREE_FORM_HEADERS};
use crate::{DepotError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub target: PathBuf,
    pub created: bool,
    /// False when the sync found nothing to apply.
    pub committed: bool,
    pub added: usize,
    pub removed: usize,
    pub last_update: i64,
}

/// Advances a committed or published tier to the state of its source by
/// replaying the source's edit log since the target's last commit.
pub struct SyncEngine {
    format_version: String,
    renditions: RenditionManager,
}

impl SyncEngine {
    pub fn new(format_version: impl Into<String>, renditions: RenditionManager) -> Self {
        Self {
            format_version: format_version.into(),
            renditions,
        }
    }

    pub fn sync<S: SyncSource + ?Sized>(&self, target_path: &Path, source: &S) -> Result<SyncReport> {
        let created = !target_path.exists();
        let mut target = if created {
            FileTier::create(target_path, source.id())?
        } else {
            let target = FileTier::open(target_path)?;
            self.check_target(&target, source.id())?;
            target
        };

        for key in FREE_FORM_HEADERS {
            match source.header(key) {
                Ok(value) => target.set_header(key, value)?,
                Err(DepotError::HeaderNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let had_history = target.has_commit_history();
        let checkpoint = target.last_update()?;
        let log = source.edit_log_since(checkpoint)?;
        let changes = net_changes(&log, |id| target.contains(id));
        log::debug!(
            "{} log entries since {} fold into {} changes",
            log.len(),
            checkpoint,
            changes.len()
        );

        let mut added = 0;
        let mut removed = 0;
        for (kind, id) in changes {
            match kind {
                EditKind::Add => {
                    target.queue_add(source.fetch_item(&id)?)?;
                    added += 1;
                }
                EditKind::Remove => {
                    target.queue_remove(id);
                    removed += 1;
                }
            }
        }

        let committed = match target.commit(&self.renditions) {
            Ok(_) => true,
            Err(DepotError::NoChanges(_)) if created || had_history => {
                log::info!("{} is already up to date", target_path.display());
                false
            }
            Err(e) => return Err(e),
        };

        Ok(SyncReport {
            target: target_path.to_path_buf(),
            created,
            committed,
            added,
            removed,
            last_update: target.last_update()?,
        })
    }

    /// Guards run before anything touches the target.
    fn check_target(&self, target: &FileTier, source_id: Identifier) -> Result<()> {
        if target.id() != source_id {
            return Err(DepotError::IdentityMismatch {
                target: target.id().to_string(),
                source_id: source_id.to_string(),
            });
        }
        if compare_versions(target.version(), &self.format_version) == Ordering::Greater {
            return Err(DepotError::IncompatibleVersion {
                found: target.version().to_string(),
                supported: self.format_version.clone(),
            });
        }
        let last_update = target.last_update()?;
        let now = now_millis();
        if last_update > now {
            return Err(DepotError::FutureTimestamp { last_update, now });
        }
        Ok(())
    }
}

/// Folds an oldest-first log into the edits to replay, oldest first. The
/// newest entry for an id decides its fate; removals of ids the target never
/// received are dropped.
pub fn net_changes(
    log: &[EditLogEntry],
    target_has: impl Fn(&Identifier) -> bool,
) -> Vec<(EditKind, Identifier)> {
    let mut decided = HashSet::new();
    let mut changes = Vec::new();

    for entry in log.iter().rev() {
        if !decided.insert(entry.item_id) {
            continue;
        }
        match entry.kind {
            EditKind::Add => changes.push((EditKind::Add, entry.item_id)),
            EditKind::Remove if target_has(&entry.item_id) => {
                changes.push((EditKind::Remove, entry.item_id))
            }
            EditKind::Remove => log::debug!("Skipping removal of unsynced {}", entry.item_id),
        }
    }

    changes.reverse();
    changes
}

/// Dotted versions compare numerically part by part; missing parts count as 0.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<String> { v.split('.').map(|p| p.trim().to_string()).collect() };
    let (a, b) = (parts(a), parts(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).map_or("0", String::as_str);
        let y = b.get(i).map_or("0", String::as_str);
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(kind: EditKind, id: Identifier, timestamp: i64) -> EditLogEntry {
        EditLogEntry {
            kind,
            item_id: id,
            timestamp,
        }
    }

    #[test]
    fn later_removal_cancels_earlier_add() {
        let (a, b) = (Identifier::from_u128(1), Identifier::from_u128(2));
        let log = [
            entry(EditKind::Add, a, 1),
            entry(EditKind::Add, b, 2),
            entry(EditKind::Remove, a, 3),
        ];
        assert_eq!(net_changes(&log, |_| false), vec![(EditKind::Add, b)]);
        assert_eq!(
            net_changes(&log, |id| *id == a),
            vec![(EditKind::Add, b), (EditKind::Remove, a)]
        );
    }

    #[test]
    fn readd_after_removal_is_an_add() {
        let a = Identifier::from_u128(1);
        let log = [
            entry(EditKind::Add, a, 1),
            entry(EditKind::Remove, a, 2),
            entry(EditKind::Add, a, 3),
        ];
        assert_eq!(net_changes(&log, |_| true), vec![(EditKind::Add, a)]);
    }

    #[test]
    fn repeated_adds_collapse() {
        let a = Identifier::from_u128(1);
        let log = [entry(EditKind::Add, a, 1), entry(EditKind::Add, a, 2)];
        assert_eq!(net_changes(&log, |_| false), vec![(EditKind::Add, a)]);
    }

    #[test]
    fn versions_compare_numerically() {
        assert_eq!(compare_versions("0.1", "0.1"), Ordering::Equal);
        assert_eq!(compare_versions("0.10", "0.9"), Ordering::Greater);
        assert_eq!(compare_versions("1", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.1", "0.2"), Ordering::Less);
        assert_eq!(compare_versions("1.0b", "1.0a"), Ordering::Greater);
    }
}
