use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::model::identifier::Identifier;
use crate::model::item::MediaItem;
use crate::{DepotError, Result};

pub mod file_tier;
pub mod staging;

/// Header keys fixed at creation.
pub const PROTECTED_HEADERS: [&str; 2] = ["id", "version"];

/// Free-form header keys carried from a source tier to its target on sync.
pub const FREE_FORM_HEADERS: [&str; 3] = ["name", "maintainer", "description"];

pub fn is_protected(key: &str) -> bool {
    PROTECTED_HEADERS.contains(&key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EditKind {
    Add,
    Remove,
}

impl EditKind {
    pub fn code(&self) -> i64 {
        match self {
            EditKind::Add => 0,
            EditKind::Remove => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EditKind::Add),
            1 => Some(EditKind::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EditLogEntry {
    pub kind: EditKind,
    pub item_id: Identifier,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// One row of a tier listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub id: Identifier,
    pub title: String,
    pub artist: Vec<String>,
}

impl TryFrom<&MediaItem> for ItemSummary {
    type Error = DepotError;

    /// Fails for an item that was never stored.
    fn try_from(item: &MediaItem) -> Result<Self> {
        Ok(Self {
            id: item.require_id()?,
            title: item.title_or_empty().to_string(),
            artist: item.artist.clone(),
        })
    }
}

/// Capabilities every tier shares, whatever its storage.
pub trait Tier {
    fn id(&self) -> Identifier;

    fn path(&self) -> &Path;

    /// `HeaderNotFound` when the key was never set; `Ok(None)` when it is set
    /// without a value.
    fn header(&self, key: &str) -> Result<Option<String>>;

    /// Rejects protected keys with `ProtectedHeader`.
    fn set_header(&mut self, key: &str, value: Option<String>) -> Result<()>;

    fn list_items(&self) -> Result<Vec<ItemSummary>>;

    fn item(&self, id: &Identifier) -> Result<MediaItem>;
}

/// A tier whose history can be replayed into another tier.
pub trait SyncSource: Tier {
    /// Entries strictly after `timestamp`, oldest first.
    fn edit_log_since(&self, timestamp: i64) -> Result<Vec<EditLogEntry>>;

    /// The item as it should be promoted. Defaults to `item`.
    fn fetch_item(&self, id: &Identifier) -> Result<MediaItem> {
        self.item(id)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Blocks until the wall clock is strictly past `timestamp`, so nothing
/// recorded afterwards can share a commit's millisecond. Gives up on
/// timestamps more than a second ahead.
pub fn wait_past(timestamp: i64) {
    if timestamp - now_millis() > 1_000 {
        log::warn!("Not waiting for far-future timestamp {timestamp}");
        return;
    }
    while now_millis() <= timestamp {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_needs_an_assigned_id() {
        let mut item = MediaItem::new("Song");
        item.artist = vec!["A".into()];
        assert!(matches!(
            ItemSummary::try_from(&item),
            Err(DepotError::ItemNotFound(_))
        ));

        let id = Identifier::from_u128(7);
        item.id = Some(id);
        assert_eq!(
            ItemSummary::try_from(&item).unwrap(),
            ItemSummary {
                id,
                title: "Song".into(),
                artist: vec!["A".into()],
            }
        );
    }
}
