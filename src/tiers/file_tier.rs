//! Committed and published tiers: compressed manifests plus a directory
//! per item.
//!
//! ```text
//! meta/header           header block
//! meta/list/all         every current item, one block each
//! meta/list/{millis}    what one commit added or removed
//! music/{id}/cover/     cover image
//! music/{id}/files/     {quality}.{ext} renditions and .{quality}.{ext}.md5 sidecars
//! music/{id}/lyrics/    {language}.lyric tracks
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::rendition::RenditionManager;
use crate::codec::record::{check_entry, read_document, write_document, Record};
use crate::model::identifier::Identifier;
use crate::model::item::{Cover, MediaItem, Quality, RenditionLadder};
use crate::model::lyric::{check_language_tag, LyricTrack, LYRIC_EXTENSION};
use crate::tiers::{
    is_protected, now_millis, wait_past, EditKind, EditLogEntry, ItemSummary, SyncSource, Tier,
};
use crate::utils::file_ops::{is_sidecar, verify_checksum, FileManager};
use crate::{DepotError, Result, FORMAT_VERSION};

const HEADER_FILE: &str = "meta/header";
const LIST_DIR: &str = "meta/list";
const MANIFEST_NAME: &str = "all";
const MUSIC_DIR: &str = "music";
const COVER_NAME: &str = "cover";
const REMOVE_KEY: &str = "remove";

enum PendingEdit {
    Add(MediaItem),
    Remove(Identifier),
}

/// What a successful `write_commit` leaves for `commit` to install.
struct CommitPlan {
    items: Vec<MediaItem>,
    header: Record,
    touched: Vec<Identifier>,
}

/// Where an item is written before the commit swaps it in.
fn staged_dir_name(id: &Identifier) -> String {
    format!(".{id}.new")
}

/// A tier stored as flat compressed files. Committed and published tiers
/// are the same kind of object; they differ only in what feeds them.
pub struct FileTier {
    root: PathBuf,
    id: Identifier,
    header: Record,
    items: Vec<MediaItem>,
    pending: Vec<PendingEdit>,
    header_dirty: bool,
}

pub type CommittedTier = FileTier;
pub type PublishedTier = FileTier;

impl FileTier {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let invalid = |reason: String| DepotError::InvalidTier {
            path: root.clone(),
            reason,
        };
        if !root.is_dir() {
            return Err(invalid("not a directory".into()));
        }

        let header = read_meta(&root.join(HEADER_FILE))
            .map_err(|e| invalid(format!("unreadable header: {e}")))?
            .into_iter()
            .next()
            .unwrap_or_default();
        let id = header
            .get("id")
            .ok_or_else(|| invalid("header has no id".into()))
            .and_then(Identifier::parse)?;
        for key in ["version", "last_update"] {
            if header.get(key).is_none() {
                return Err(invalid(format!("header has no {key}")));
            }
        }

        let manifest_path = root.join(LIST_DIR).join(MANIFEST_NAME);
        let blocks = read_meta(&manifest_path)
            .map_err(|e| invalid(format!("unreadable manifest: {e}")))?;

        let mut tier = Self {
            root,
            id,
            header,
            items: Vec::with_capacity(blocks.len()),
            pending: Vec::new(),
            header_dirty: false,
        };
        let mut seen = HashSet::new();
        for block in &blocks {
            let item = tier.parse_block(block, &manifest_path)?;
            let item_id = item.require_id()?;
            if !seen.insert(item_id) {
                return Err(DepotError::CorruptStoreData {
                    path: manifest_path,
                    reason: format!("duplicate id {item_id}"),
                });
            }
            tier.items.push(item);
        }
        log::debug!(
            "Opened tier {} at {} with {} items",
            tier.id,
            tier.root.display(),
            tier.items.len()
        );
        Ok(tier)
    }

    /// Creates an empty tier. Fails if anything exists at `path`.
    pub fn create(path: impl AsRef<Path>, identity: Identifier) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.exists() {
            return Err(DepotError::AlreadyExists(root));
        }
        fs::create_dir_all(root.join(LIST_DIR))?;
        fs::create_dir_all(root.join(MUSIC_DIR))?;

        let mut header = Record::new();
        header.set("id", Some(identity.to_string()));
        header.set("last_update", Some("0".into()));
        header.set("version", Some(FORMAT_VERSION.into()));
        header.set("list", Some(MANIFEST_NAME.into()));
        write_document(&root.join(HEADER_FILE), &[header])?;
        write_document(&root.join(LIST_DIR).join(MANIFEST_NAME), &[])?;

        log::info!("Created tier {} at {}", identity, root.display());
        Self::open(root)
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.items.iter().any(|i| i.id.as_ref() == Some(id))
    }

    pub fn version(&self) -> &str {
        self.header.get("version").unwrap_or("0")
    }

    /// Milliseconds of the last item commit, 0 before the first one.
    pub fn last_update(&self) -> Result<i64> {
        let raw = self.header.get("last_update").unwrap_or("0");
        raw.parse().map_err(|_| DepotError::CorruptStoreData {
            path: self.root.join(HEADER_FILE),
            reason: format!("bad last_update {raw:?}"),
        })
    }

    /// Commit timestamps in order, oldest first.
    pub fn delta_timestamps(&self) -> Vec<i64> {
        self.header
            .get("list")
            .unwrap_or("")
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty() || self.header_dirty
    }

    pub fn queue_add(&mut self, item: MediaItem) -> Result<()> {
        item.require_id()?;
        self.pending.push(PendingEdit::Add(item));
        Ok(())
    }

    pub fn queue_remove(&mut self, id: Identifier) {
        self.pending.push(PendingEdit::Remove(id));
    }

    pub fn remove_header(&mut self, key: &str) -> Result<()> {
        if is_protected(key) {
            return Err(DepotError::ProtectedHeader(key.to_string()));
        }
        if self.header.remove(key).is_none() {
            return Err(DepotError::HeaderNotFound(key.to_string()));
        }
        self.header_dirty = true;
        Ok(())
    }

    /// Applies the queued edits and header changes and returns the new
    /// `last_update`. Items are written beside their final directory and only
    /// swapped in once the manifest and header are on disk, so a failed commit
    /// leaves the tier as it was and keeps the queue.
    pub fn commit(&mut self, renditions: &RenditionManager) -> Result<i64> {
        if !self.has_pending_changes() {
            return Err(DepotError::NoChanges(self.root.clone()));
        }

        let timestamp = now_millis().max(self.last_update()? + 1);
        let files = FileManager::new(self.root.join(MUSIC_DIR));
        let mut staged = Vec::new();

        let outcome = self.write_commit(timestamp, renditions, &mut staged);
        let plan = match outcome {
            Ok(plan) => plan,
            Err(e) => {
                for id in &staged {
                    if let Err(cleanup) = files.remove_tree(staged_dir_name(id)) {
                        log::warn!("Could not clean up staged {}: {}", id, cleanup);
                    }
                }
                return Err(e);
            }
        };

        for id in &plan.touched {
            if plan.items.iter().any(|i| i.id.as_ref() == Some(id)) {
                files.replace_tree(staged_dir_name(id), id.as_str())?;
            } else {
                files.remove_tree(staged_dir_name(id))?;
                files.remove_tree(id.as_str())?;
            }
        }

        self.items = plan.items;
        self.header = plan.header;
        self.pending.clear();
        self.header_dirty = false;

        log::info!(
            "Committed {} at {} ({} items)",
            self.root.display(),
            timestamp,
            self.items.len()
        );
        wait_past(timestamp);
        Ok(timestamp)
    }

    /// True once any commit, item or header-only, has landed.
    pub fn has_commit_history(&self) -> bool {
        !self.delta_timestamps().is_empty()
    }

    /// Writes staged item directories, the manifest, the delta and the header.
    /// `staged` collects every id whose staged directory exists, for cleanup.
    fn write_commit(
        &self,
        timestamp: i64,
        renditions: &RenditionManager,
        staged: &mut Vec<Identifier>,
    ) -> Result<CommitPlan> {
        let mut items = self.items.clone();
        let mut touched = Vec::new();
        let mut added: Vec<(Identifier, Record)> = Vec::new();
        let mut delta = Vec::new();

        for edit in &self.pending {
            match edit {
                PendingEdit::Add(item) => {
                    let id = item.require_id()?;
                    if !staged.contains(&id) {
                        staged.push(id);
                    }
                    let (stored, block) = self.materialize(item, renditions)?;
                    items.retain(|i| i.id != Some(id));
                    items.push(stored);
                    added.retain(|(a, _)| *a != id);
                    added.push((id, block.clone()));
                    delta.push(block);
                    if !touched.contains(&id) {
                        touched.push(id);
                    }
                }
                PendingEdit::Remove(id) => {
                    if !items.iter().any(|i| i.id.as_ref() == Some(id)) {
                        return Err(DepotError::ItemNotFound(id.to_string()));
                    }
                    log::debug!("Removing {} from {}", id, self.root.display());
                    items.retain(|i| i.id.as_ref() != Some(id));
                    added.retain(|(a, _)| a != id);
                    let mut marker = Record::new();
                    marker.set(REMOVE_KEY, Some(id.to_string()));
                    delta.push(marker);
                    if !touched.contains(id) {
                        touched.push(*id);
                    }
                }
            }
        }

        if !touched.is_empty() {
            let manifest_path = self.root.join(LIST_DIR).join(MANIFEST_NAME);
            let mut manifest: Vec<Record> = read_document(&manifest_path)?
                .into_iter()
                .filter(|block| {
                    block
                        .get("id")
                        .and_then(|raw| Identifier::parse(raw).ok())
                        .map_or(true, |id| !touched.contains(&id))
                })
                .collect();
            manifest.extend(added.into_iter().map(|(_, block)| block));
            write_document(&manifest_path, &manifest)?;
        }
        write_document(&self.root.join(LIST_DIR).join(timestamp.to_string()), &delta)?;

        let mut header = self.header.clone();
        let list = match header.get("list") {
            Some(list) if !list.is_empty() => format!("{list},{timestamp}"),
            _ => format!("{MANIFEST_NAME},{timestamp}"),
        };
        header.set("list", Some(list));
        header.set("last_update", Some(timestamp.to_string()));
        write_document(&self.root.join(HEADER_FILE), &[header.clone()])?;

        Ok(CommitPlan {
            items,
            header,
            touched,
        })
    }

    /// Re-hashes every rendition in the tier against its sidecar. Returns the
    /// number of files checked.
    pub fn verify(&self) -> Result<usize> {
        let mut checked = 0;
        // staged directories of an interrupted commit are not part of the tier
        let walker = walkdir::WalkDir::new(self.root.join(MUSIC_DIR))
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| DepotError::CorruptStoreData {
                path: self.root.join(MUSIC_DIR),
                reason: e.to_string(),
            })?;
            let path = entry.path();
            let in_files_dir = path
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|n| n == "files");
            if entry.file_type().is_file() && in_files_dir && !is_sidecar(path) {
                verify_checksum(path)?;
                checked += 1;
            }
        }
        log::info!("Verified {} renditions in {}", checked, self.root.display());
        Ok(checked)
    }

    fn item_dir(&self, id: &Identifier) -> PathBuf {
        self.root.join(MUSIC_DIR).join(id.as_str())
    }

    /// Writes one item's directory and returns the re-rooted item with its
    /// manifest block.
    fn materialize(
        &self,
        item: &MediaItem,
        renditions: &RenditionManager,
    ) -> Result<(MediaItem, Record)> {
        let id = item.require_id()?;
        item.validate()?;
        log::debug!("Processing {}: {}", item.title_or_empty(), id);

        let files = FileManager::new(self.root.join(MUSIC_DIR));
        let staged_name = staged_dir_name(&id);
        files.remove_tree(&staged_name)?;
        let dir = files.root().join(&staged_name);
        for sub in ["cover", "files", "lyrics"] {
            files.ensure_directory(Path::new(&staged_name).join(sub))?;
        }

        let mut block = Record::new();
        block.set("id", Some(id.to_string()));
        block.set("title", item.title.clone());
        if !item.artist.is_empty() {
            block.set("artist", Some(serde_json::to_string(&item.artist)?));
        }
        if let Some(album) = &item.album {
            block.set("album", Some(album.clone()));
        }
        if let Some(kind) = &item.kind {
            block.set("type", Some(kind.clone()));
        }
        if let Some(num) = item.track_num {
            block.set("num", Some(num.to_string()));
        }
        if let Some(description) = &item.description {
            block.set("description", Some(description.clone()));
        }

        let mut stored = item.clone();
        if let Some(data) = item.cover.data.as_ref().filter(|_| item.cover.is_present()) {
            fs::write(dir.join("cover").join(COVER_NAME), data)?;
            block.set("cover", Some(COVER_NAME.into()));
            block.set("cover_mime", item.cover.mime.clone());
        } else {
            stored.cover = Cover::default();
        }

        let final_dir = self.item_dir(&id);
        let written = renditions.materialize(&item.renditions, &dir.join("files"))?;
        stored.renditions = RenditionLadder::new();
        for (quality, path) in written.iter() {
            let rel = path.strip_prefix(&dir).unwrap_or(path);
            stored.renditions.set(quality, final_dir.join(rel));
        }
        if let Some(highest) = stored.renditions.highest() {
            block.set("quality", Some(highest.to_string()));
        }

        let mut languages = Vec::new();
        for track in &item.lyrics {
            track.save(&dir.join("lyrics").join(lyric_file_name(&track.language)))?;
            languages.push(track.language.as_str());
        }
        block.set("lyriclang", Some(languages.join(",")));

        Ok((stored, block))
    }

    fn parse_block(&self, block: &Record, origin: &Path) -> Result<MediaItem> {
        let corrupt = |reason: String| DepotError::CorruptStoreData {
            path: origin.to_path_buf(),
            reason,
        };
        let id = block
            .get("id")
            .ok_or_else(|| corrupt("block without id".into()))
            .and_then(Identifier::parse)?;
        let dir = self.item_dir(&id);

        let mut item = MediaItem {
            id: Some(id),
            ..MediaItem::default()
        };
        for (key, value) in block.iter() {
            let Some(value) = value else { continue };
            match key {
                "id" => {}
                "title" => item.title = Some(value.to_string()),
                "artist" => item.artist = serde_json::from_str(value)?,
                "album" => item.album = Some(value.to_string()),
                "type" => item.kind = Some(value.to_string()),
                "num" => {
                    item.track_num = Some(
                        value
                            .parse()
                            .map_err(|_| corrupt(format!("bad num {value:?} for {id}")))?,
                    )
                }
                "description" => item.description = Some(value.to_string()),
                "cover_mime" => item.cover.mime = Some(value.to_string()),
                "cover" => item.cover.data = Some(fs::read(dir.join("cover").join(value))?),
                "quality" => item.renditions = reconstruct_ladder(&dir.join("files"), value.parse()?)?,
                "lyriclang" => {
                    for language in value.split(',').map(str::trim).filter(|l| !l.is_empty()) {
                        check_language_tag(language)?;
                        let path = dir.join("lyrics").join(lyric_file_name(language));
                        item.lyrics.push(LyricTrack::load(&path)?);
                    }
                }
                other => log::debug!("Ignoring manifest key {other:?} for {id}"),
            }
        }
        Ok(item)
    }
}

fn lyric_file_name(language: &str) -> String {
    format!("{language}.{LYRIC_EXTENSION}")
}

fn read_meta(path: &Path) -> Result<Vec<Record>> {
    if !path.is_file() {
        return Err(DepotError::CorruptStoreData {
            path: path.to_path_buf(),
            reason: "missing".into(),
        });
    }
    read_document(path)
}

/// A recorded quality implies every rung up to it. `best` may be missing
/// under an `original`, since it is never derived.
fn reconstruct_ladder(files_dir: &Path, highest: Quality) -> Result<RenditionLadder> {
    let mut ladder = RenditionLadder::new();
    for quality in highest.up_to() {
        match find_rendition(files_dir, quality)? {
            Some(path) => {
                ladder.set(quality, path);
            }
            None if quality == Quality::Best && highest == Quality::Original => {}
            None => {
                return Err(DepotError::CorruptStoreData {
                    path: files_dir.to_path_buf(),
                    reason: format!("missing {quality} rendition"),
                })
            }
        }
    }
    Ok(ladder)
}

fn find_rendition(files_dir: &Path, quality: Quality) -> Result<Option<PathBuf>> {
    let conventional = files_dir.join(format!("{quality}.{}", quality.default_extension()));
    if conventional.is_file() {
        return Ok(Some(conventional));
    }
    if !files_dir.is_dir() {
        return Ok(None);
    }
    for entry in fs::read_dir(files_dir)? {
        let path = entry?.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some(quality.as_str()) && !is_sidecar(&path)
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

impl Tier for FileTier {
    fn id(&self) -> Identifier {
        self.id
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn header(&self, key: &str) -> Result<Option<String>> {
        if !self.header.contains_key(key) {
            return Err(DepotError::HeaderNotFound(key.to_string()));
        }
        Ok(self.header.get(key).map(str::to_string))
    }

    /// Only marks the header dirty when the value actually changes.
    fn set_header(&mut self, key: &str, value: Option<String>) -> Result<()> {
        if is_protected(key) {
            return Err(DepotError::ProtectedHeader(key.to_string()));
        }
        check_entry(key, value.as_deref())?;
        let unchanged = self.header.contains_key(key)
            && self.header.get(key) == value.as_deref().filter(|v| !v.is_empty());
        if !unchanged {
            self.header.set(key, value);
            self.header_dirty = true;
        }
        Ok(())
    }

    fn list_items(&self) -> Result<Vec<ItemSummary>> {
        self.items.iter().map(ItemSummary::try_from).collect()
    }

    fn item(&self, id: &Identifier) -> Result<MediaItem> {
        self.items
            .iter()
            .find(|i| i.id.as_ref() == Some(id))
            .cloned()
            .ok_or_else(|| DepotError::ItemNotFound(id.to_string()))
    }
}

impl SyncSource for FileTier {
    /// Rebuilt from the delta manifests: item blocks are adds, `remove`
    /// blocks are removals, all stamped with their commit's time.
    fn edit_log_since(&self, timestamp: i64) -> Result<Vec<EditLogEntry>> {
        let mut entries = Vec::new();
        for commit in self.delta_timestamps().into_iter().filter(|t| *t > timestamp) {
            let path = self.root.join(LIST_DIR).join(commit.to_string());
            for block in read_meta(&path)? {
                let (kind, raw) = match (block.get(REMOVE_KEY), block.get("id")) {
                    (Some(raw), _) => (EditKind::Remove, raw),
                    (None, Some(raw)) => (EditKind::Add, raw),
                    (None, None) => {
                        return Err(DepotError::CorruptStoreData {
                            path,
                            reason: "delta block without id".into(),
                        })
                    }
                };
                entries.push(EditLogEntry {
                    kind,
                    item_id: Identifier::parse(raw)?,
                    timestamp: commit,
                });
            }
        }
        Ok(entries)
    }

    /// Verifies every rendition checksum before handing the item out.
    fn fetch_item(&self, id: &Identifier) -> Result<MediaItem> {
        let item = self.item(id)?;
        for (_, path) in item.renditions.iter() {
            verify_checksum(path)?;
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::rendition::tests::CopyTranscoder;
    use crate::audio::transcode::Transcoder;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn manager() -> RenditionManager {
        RenditionManager::new(Arc::new(CopyTranscoder::default()))
    }

    struct FailingTranscoder;

    impl Transcoder for FailingTranscoder {
        fn transcode(&self, _input: &Path, _output: &Path, _quality: Quality) -> Result<()> {
            Err(DepotError::Transcode("encoder crashed".into()))
        }
    }

    fn song(dir: &Path, title: &str, quality: Quality) -> MediaItem {
        let source = dir.join(format!("{title}.{}", quality.default_extension()));
        fs::write(&source, title.as_bytes()).unwrap();
        let mut item = MediaItem::new(title);
        item.id = Some(Identifier::generate());
        item.artist = vec!["X".into(), "Y: the band".into()];
        item.album = Some("Album".into());
        item.kind = Some("Rock".into());
        item.track_num = Some(3);
        item.description = Some("multi: colon".into());
        item.cover = Cover {
            mime: Some("image/jpeg".into()),
            data: Some(vec![9, 9, 9]),
        };
        item.renditions = RenditionLadder::single(quality, source);
        let mut lyric = LyricTrack::new("en");
        lyric.lines.push((500, "la".into()));
        item.lyrics.push(lyric);
        item
    }

    #[test]
    fn create_writes_an_empty_openable_tier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let id = Identifier::generate();
        let tier = FileTier::create(&path, id).unwrap();
        assert_eq!(tier.id(), id);
        assert_eq!(tier.last_update().unwrap(), 0);
        assert_eq!(tier.version(), FORMAT_VERSION);
        assert!(tier.items().is_empty());
        assert!(path.join("meta/header").is_file());
        assert!(path.join("meta/list/all").is_file());

        assert!(matches!(
            FileTier::create(&path, id),
            Err(DepotError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_rejects_missing_or_corrupt_meta() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileTier::open(dir.path().join("nothing")),
            Err(DepotError::InvalidTier { .. })
        ));

        let path = dir.path().join("store");
        FileTier::create(&path, Identifier::generate()).unwrap();
        fs::write(path.join("meta/list/all"), b"garbage").unwrap();
        assert!(matches!(FileTier::open(&path), Err(DepotError::InvalidTier { .. })));

        fs::remove_file(path.join("meta/header")).unwrap();
        assert!(matches!(FileTier::open(&path), Err(DepotError::InvalidTier { .. })));
    }

    #[test]
    fn empty_commit_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FileTier::create(dir.path().join("s"), Identifier::generate()).unwrap();
        assert!(matches!(
            tier.commit(&manager()),
            Err(DepotError::NoChanges(_))
        ));
    }

    #[test]
    fn committed_item_reloads_with_full_ladder() {
        let src = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let mut tier = FileTier::create(&path, Identifier::generate()).unwrap();

        let item = song(src.path(), "song", Quality::Best);
        let id = item.id.unwrap();
        tier.queue_add(item.clone()).unwrap();
        let ts = tier.commit(&manager()).unwrap();
        assert!(ts > 0);
        assert!(path.join(format!("meta/list/{ts}")).is_file());
        assert!(path.join(format!("music/{id}/files/.best.mp3.md5")).is_file());

        let reopened = FileTier::open(&path).unwrap();
        assert_eq!(reopened.last_update().unwrap(), ts);
        assert_eq!(reopened.delta_timestamps(), vec![ts]);
        let loaded = reopened.item(&id).unwrap();
        assert_eq!(loaded.renditions.highest(), Some(Quality::Best));
        for q in [Quality::Normal, Quality::Better, Quality::High] {
            assert!(loaded.renditions.contains(q), "{q} should be derived");
        }
        assert!(!loaded.renditions.contains(Quality::Original));
        assert_eq!(loaded.artist, item.artist);
        assert_eq!(loaded.description, item.description);
        assert_eq!(loaded.track_num, Some(3));
        assert_eq!(loaded.cover, item.cover);
        assert_eq!(loaded.lyrics, item.lyrics);
        assert_eq!(loaded, tier.item(&id).unwrap());
        assert_eq!(reopened.verify().unwrap(), 4);
    }

    #[test]
    fn removal_drops_block_and_directory() {
        let src = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let mut tier = FileTier::create(&path, Identifier::generate()).unwrap();
        let a = song(src.path(), "a", Quality::Normal);
        let b = song(src.path(), "b", Quality::High);
        let (a_id, b_id) = (a.id.unwrap(), b.id.unwrap());
        tier.queue_add(a).unwrap();
        tier.queue_add(b).unwrap();
        tier.commit(&manager()).unwrap();

        tier.queue_remove(a_id);
        let ts = tier.commit(&manager()).unwrap();
        assert!(!path.join("music").join(a_id.as_str()).exists());

        let reopened = FileTier::open(&path).unwrap();
        let ids: Vec<_> = reopened.items().iter().filter_map(|i| i.id).collect();
        assert_eq!(ids, vec![b_id]);

        let log = reopened.edit_log_since(0).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(
            log[2],
            EditLogEntry {
                kind: EditKind::Remove,
                item_id: a_id,
                timestamp: ts
            }
        );
        assert!(reopened.edit_log_since(ts).unwrap().is_empty());
    }

    #[test]
    fn removing_an_unknown_item_keeps_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FileTier::create(dir.path().join("s"), Identifier::generate()).unwrap();
        tier.queue_remove(Identifier::generate());
        assert!(matches!(
            tier.commit(&manager()),
            Err(DepotError::ItemNotFound(_))
        ));
        assert!(tier.has_pending_changes());
        assert_eq!(tier.last_update().unwrap(), 0);
    }

    #[test]
    fn re_adding_replaces_the_block() {
        let src = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let mut tier = FileTier::create(&path, Identifier::generate()).unwrap();
        let mut item = song(src.path(), "a", Quality::Normal);
        tier.queue_add(item.clone()).unwrap();
        tier.commit(&manager()).unwrap();

        item.title = Some("a (remaster)".into());
        tier.queue_add(item.clone()).unwrap();
        tier.commit(&manager()).unwrap();

        let reopened = FileTier::open(&path).unwrap();
        assert_eq!(reopened.items().len(), 1);
        assert_eq!(reopened.items()[0].title.as_deref(), Some("a (remaster)"));
    }

    #[test]
    fn header_only_change_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let mut tier = FileTier::create(&path, Identifier::generate()).unwrap();

        assert!(!tier.has_commit_history());
        tier.set_header("name", Some("Depot".into())).unwrap();
        let ts = tier.commit(&manager()).unwrap();
        assert!(ts > 0);
        assert!(tier.has_commit_history());
        let reopened = FileTier::open(&path).unwrap();
        assert_eq!(reopened.header("name").unwrap().as_deref(), Some("Depot"));
        assert_eq!(reopened.last_update().unwrap(), ts);
        assert_eq!(reopened.delta_timestamps(), vec![ts]);
        assert!(reopened.edit_log_since(0).unwrap().is_empty());

        tier.set_header("name", Some("Depot".into())).unwrap();
        assert!(matches!(tier.commit(&manager()), Err(DepotError::NoChanges(_))));

        tier.remove_header("name").unwrap();
        tier.commit(&manager()).unwrap();
        assert!(matches!(
            FileTier::open(&path).unwrap().header("name"),
            Err(DepotError::HeaderNotFound(_))
        ));
        assert!(matches!(
            tier.remove_header("name"),
            Err(DepotError::HeaderNotFound(_))
        ));
    }

    #[test]
    fn protected_headers_cannot_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FileTier::create(dir.path().join("s"), Identifier::generate()).unwrap();
        for key in ["id", "version"] {
            assert!(matches!(
                tier.set_header(key, Some("x".into())),
                Err(DepotError::ProtectedHeader(_))
            ));
            assert!(matches!(
                tier.remove_header(key),
                Err(DepotError::ProtectedHeader(_))
            ));
        }
    }

    #[test]
    fn duplicate_ids_in_manifest_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        FileTier::create(&path, Identifier::generate()).unwrap();
        let id = Identifier::generate();
        fs::create_dir_all(path.join("music").join(id.as_str())).unwrap();
        let mut block = Record::new();
        block.set("id", Some(id.to_string()));
        block.set("title", Some("dup".into()));
        write_document(&path.join("meta/list/all"), &[block.clone(), block]).unwrap();

        assert!(matches!(
            FileTier::open(&path),
            Err(DepotError::CorruptStoreData { .. })
        ));
    }

    #[test]
    fn tampered_rendition_fails_fetch() {
        let src = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FileTier::create(dir.path().join("s"), Identifier::generate()).unwrap();
        let item = song(src.path(), "a", Quality::Normal);
        let id = item.id.unwrap();
        tier.queue_add(item).unwrap();
        tier.commit(&manager()).unwrap();

        let file = tier.item(&id).unwrap().renditions.get(Quality::Normal).unwrap().to_path_buf();
        fs::write(&file, b"tampered").unwrap();
        assert!(matches!(
            tier.fetch_item(&id),
            Err(DepotError::ChecksumMismatch { .. })
        ));
        assert!(tier.verify().is_err());
    }

    #[test]
    fn failed_commit_leaves_the_tier_as_it_was() {
        let src = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let mut tier = FileTier::create(&path, Identifier::generate()).unwrap();
        let item = song(src.path(), "a", Quality::Best);
        let id = item.id.unwrap();
        tier.queue_add(item.clone()).unwrap();
        let ts = tier.commit(&manager()).unwrap();
        let manifest = fs::read(path.join("meta/list/all")).unwrap();
        let header = fs::read(path.join("meta/header")).unwrap();

        let mut remaster = item;
        remaster.title = Some("a (remaster)".into());
        tier.queue_add(remaster).unwrap();
        let failing = RenditionManager::new(Arc::new(FailingTranscoder));
        assert!(matches!(tier.commit(&failing), Err(DepotError::Transcode(_))));

        assert!(tier.has_pending_changes());
        assert_eq!(fs::read(path.join("meta/list/all")).unwrap(), manifest);
        assert_eq!(fs::read(path.join("meta/header")).unwrap(), header);
        assert_eq!(fs::read_dir(path.join("meta/list")).unwrap().count(), 2);
        assert!(!path.join("music").join(format!(".{id}.new")).exists());

        let reopened = FileTier::open(&path).unwrap();
        assert_eq!(reopened.last_update().unwrap(), ts);
        assert_eq!(reopened.item(&id).unwrap().title.as_deref(), Some("a"));
        assert_eq!(reopened.verify().unwrap(), 4);

        // the queue survived, so a working transcoder finishes it
        tier.commit(&manager()).unwrap();
        let reopened = FileTier::open(&path).unwrap();
        assert_eq!(reopened.item(&id).unwrap().title.as_deref(), Some("a (remaster)"));
        assert_eq!(reopened.verify().unwrap(), 4);
        assert!(!path.join("music").join(format!(".{id}.new")).exists());
    }

    #[test]
    fn multi_line_values_never_reach_disk() {
        let src = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let mut tier = FileTier::create(&path, Identifier::generate()).unwrap();

        let mut item = song(src.path(), "a", Quality::Normal);
        item.description = Some("line one\nline two".into());
        tier.queue_add(item).unwrap();
        match tier.commit(&manager()) {
            Err(DepotError::InvalidValue { key, .. }) => assert_eq!(key, "description"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            tier.set_header("description", Some("a\nb".into())),
            Err(DepotError::InvalidValue { .. })
        ));

        let reopened = FileTier::open(&path).unwrap();
        assert!(reopened.items().is_empty());
        assert_eq!(reopened.last_update().unwrap(), 0);
    }
}
