//! Staging tier: the mutable working area, backed by SQLite.
//!
//! Layout: `{root}/staging.db` holds item records, free-form configuration
//! and the edit log; `{root}/files/` holds the copied renditions
//! (`{id}_{quality}.{ext}`) and lyric tracks (`{id}_lyric-{language}.lyric`).

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::model::identifier::Identifier;
use crate::model::item::{Cover, MediaItem};
use crate::codec::record::check_entry;
use crate::model::lyric::{check_language_tag, LyricTrack, LYRIC_EXTENSION};
use crate::tiers::{
    is_protected, now_millis, EditKind, EditLogEntry, ItemSummary, SyncSource, Tier,
};
use crate::utils::file_ops::FileManager;
use crate::{DepotError, Result, FORMAT_VERSION};

const DATABASE_FILE: &str = "staging.db";
const FILES_DIR: &str = "files";

pub struct StagingTier {
    root: PathBuf,
    conn: Connection,
    files: FileManager,
    id: Identifier,
}

impl StagingTier {
    /// Creates a new staging tier. The directory may exist only if empty.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let root = absolute(path.as_ref())?;
        if root.exists() && fs::read_dir(&root)?.next().is_some() {
            return Err(DepotError::AlreadyExists(root));
        }
        fs::create_dir_all(root.join(FILES_DIR))?;

        let conn = Connection::open(root.join(DATABASE_FILE))?;
        init_schema(&conn)?;

        let id = Identifier::generate();
        let now = now_millis().to_string();
        for (key, value) in [
            ("id", id.to_string()),
            ("version", FORMAT_VERSION.to_string()),
            ("create_time", now),
        ] {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        log::info!("Created staging tier {} at {}", id, root.display());

        Ok(Self {
            files: FileManager::new(root.join(FILES_DIR)),
            root,
            conn,
            id,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = absolute(path.as_ref())?;
        let invalid = |reason: &str| DepotError::InvalidTier {
            path: root.clone(),
            reason: reason.to_string(),
        };
        if !root.join(DATABASE_FILE).is_file() {
            return Err(invalid("no staging database"));
        }

        let conn = Connection::open(root.join(DATABASE_FILE))?;
        init_schema(&conn)?;
        let raw_id: Option<Option<String>> = conn
            .query_row("SELECT value FROM config WHERE key = 'id'", [], |row| row.get(0))
            .optional()?;
        let id = raw_id
            .flatten()
            .ok_or_else(|| invalid("staging database has no id"))
            .and_then(|s| Identifier::parse(&s))?;

        fs::create_dir_all(root.join(FILES_DIR))?;
        Ok(Self {
            files: FileManager::new(root.join(FILES_DIR)),
            root,
            conn,
            id,
        })
    }

    /// Stores a copy of `item`, assigning an id when it has none and copying
    /// its renditions and lyric tracks into the staging area. Replaces any
    /// record with the same id and logs one `Add`.
    pub fn commit_item(&mut self, item: &MediaItem) -> Result<MediaItem> {
        item.validate()?;
        let id = item.id.unwrap_or_else(Identifier::generate);

        let mut copy_error = None;
        let mut stored = item.rebased(|quality, source| {
            let extension = source
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_else(|| quality.default_extension());
            match self.files.copy_in(source, &format!("{id}_{quality}.{extension}")) {
                Ok(path) => path,
                Err(e) => {
                    copy_error.get_or_insert(e);
                    source.to_path_buf()
                }
            }
        });
        if let Some(e) = copy_error {
            return Err(e);
        }
        stored.id = Some(id);

        let previous_languages = self.lyric_languages(&id)?.unwrap_or_default();
        for track in &stored.lyrics {
            track.save(&self.lyric_path(&id, &track.language))?;
        }
        for language in previous_languages {
            if !stored.lyrics.iter().any(|t| t.language == language) {
                let stale = self.lyric_path(&id, &language);
                if stale.exists() {
                    fs::remove_file(stale)?;
                }
            }
        }

        let languages: Vec<&str> = stored.lyrics.iter().map(|t| t.language.as_str()).collect();
        let mut record = stored.clone();
        record.lyrics.clear();
        record.cover = Cover::default();

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![id.as_str()])?;
        tx.execute(
            "INSERT INTO items (id, title, record, cover_mime, cover, lyric_langs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_str(),
                stored.title,
                serde_json::to_string(&record)?,
                stored.cover.mime,
                stored.cover.data,
                serde_json::to_string(&languages)?,
            ],
        )?;
        append_edit(&tx, EditKind::Add, &id)?;
        tx.commit()?;

        log::info!("Staged {} ({})", id, stored.title_or_empty());
        Ok(stored)
    }

    pub fn get_item(&self, id: &Identifier) -> Result<MediaItem> {
        let row = self
            .conn
            .query_row(
                "SELECT record, cover_mime, cover, lyric_langs FROM items WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let (record, cover_mime, cover, languages) =
            row.ok_or_else(|| DepotError::ItemNotFound(id.to_string()))?;

        let mut item: MediaItem = serde_json::from_str(&record)?;
        item.cover = Cover {
            mime: cover_mime,
            data: cover,
        };
        let languages: Vec<String> = serde_json::from_str(&languages)?;
        for language in languages {
            check_language_tag(&language)?;
            item.lyrics.push(LyricTrack::load(&self.lyric_path(id, &language))?);
        }
        Ok(item)
    }

    /// Removes the record and its files, logging one `Remove`.
    pub fn delete_item(&mut self, id: &Identifier) -> Result<()> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM items WHERE id = ?1", params![id.as_str()])?;
        if removed == 0 {
            return Err(DepotError::ItemNotFound(id.to_string()));
        }
        append_edit(&tx, EditKind::Remove, id)?;
        tx.commit()?;

        let prefix = format!("{id}_");
        for entry in fs::read_dir(self.files.root())? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())?;
            }
        }
        log::info!("Removed {} from staging", id);
        Ok(())
    }

    pub fn get_header(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        value.ok_or_else(|| DepotError::HeaderNotFound(key.to_string()))
    }

    pub fn remove_header(&mut self, key: &str) -> Result<()> {
        if is_protected(key) {
            return Err(DepotError::ProtectedHeader(key.to_string()));
        }
        let removed = self
            .conn
            .execute("DELETE FROM config WHERE key = ?1", params![key])?;
        if removed == 0 {
            return Err(DepotError::HeaderNotFound(key.to_string()));
        }
        Ok(())
    }

    fn lyric_path(&self, id: &Identifier, language: &str) -> PathBuf {
        self.files
            .root()
            .join(format!("{id}_lyric-{language}.{LYRIC_EXTENSION}"))
    }

    fn lyric_languages(&self, id: &Identifier) -> Result<Option<Vec<String>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT lyric_langs FROM items WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| serde_json::from_str(&r).map_err(DepotError::from))
            .transpose()
    }
}

impl Tier for StagingTier {
    fn id(&self) -> Identifier {
        self.id
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn header(&self, key: &str) -> Result<Option<String>> {
        self.get_header(key)
    }

    fn set_header(&mut self, key: &str, value: Option<String>) -> Result<()> {
        if is_protected(key) {
            return Err(DepotError::ProtectedHeader(key.to_string()));
        }
        check_entry(key, value.as_deref())?;
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn list_items(&self) -> Result<Vec<ItemSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, record FROM items ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, title, record) = row?;
            let record: MediaItem = serde_json::from_str(&record)?;
            items.push(ItemSummary {
                id: Identifier::parse(&id)?,
                title: title.unwrap_or_default(),
                artist: record.artist,
            });
        }
        Ok(items)
    }

    fn item(&self, id: &Identifier) -> Result<MediaItem> {
        self.get_item(id)
    }
}

impl SyncSource for StagingTier {
    fn edit_log_since(&self, timestamp: i64) -> Result<Vec<EditLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, item_id, time FROM edit_log WHERE time > ?1 ORDER BY time, seq",
        )?;
        let rows = stmt.query_map(params![timestamp], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (kind, item_id, time) = row?;
            let kind = EditKind::from_code(kind).ok_or_else(|| DepotError::CorruptStoreData {
                path: self.root.join(DATABASE_FILE),
                reason: format!("unknown edit kind {kind}"),
            })?;
            entries.push(EditLogEntry {
                kind,
                item_id: Identifier::parse(&item_id)?,
                timestamp: time,
            });
        }
        Ok(entries)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS items (
            id          TEXT PRIMARY KEY,
            title       TEXT,
            record      TEXT NOT NULL,
            cover_mime  TEXT,
            cover       BLOB,
            lyric_langs TEXT NOT NULL DEFAULT '[]'
        );
        CREATE TABLE IF NOT EXISTS config (
            key   TEXT PRIMARY KEY,
            value TEXT
        );
        CREATE TABLE IF NOT EXISTS edit_log (
            seq     INTEGER PRIMARY KEY AUTOINCREMENT,
            kind    INTEGER NOT NULL,
            item_id TEXT NOT NULL,
            time    INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_edit_log_time ON edit_log(time);",
    )?;
    Ok(())
}

/// Edit log times never go backwards; equal times are ordered by `seq`.
fn append_edit(tx: &Transaction<'_>, kind: EditKind, id: &Identifier) -> Result<()> {
    let last: Option<i64> = tx.query_row("SELECT MAX(time) FROM edit_log", [], |row| row.get(0))?;
    let time = last.map_or(now_millis(), |last| last.max(now_millis()));
    tx.execute(
        "INSERT INTO edit_log (kind, item_id, time) VALUES (?1, ?2, ?3)",
        params![kind.code(), id.as_str(), time],
    )?;
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
