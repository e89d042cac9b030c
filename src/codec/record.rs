//! Line-oriented `key:value` records, grouped into blank-line separated
//! blocks and stored LZMA (xz) compressed.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::{DepotError, Result};

const DELIMITER: char = ':';
const BLOCK_SEPARATOR: &str = "\n\n";
const COMPRESSION_LEVEL: u32 = 6;

/// Ordered mapping of keys to optional values. Keys may repeat, which lyric
/// line blocks rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    entries: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Replaces the first entry for `key`, or appends one.
    pub fn set(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Appends without looking for an existing entry.
    pub fn push(&mut self, key: impl Into<String>, value: Option<String>) {
        self.entries.push((key.into(), value));
    }

    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails on the first entry that would not decode back unchanged.
    pub fn check(&self) -> Result<()> {
        self.entries
            .iter()
            .try_for_each(|(k, v)| check_entry(k, v.as_deref()))
    }

    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}{DELIMITER}{}", v.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parses one block. `origin` only feeds error messages.
    pub fn decode(text: &str, origin: &Path) -> Result<Self> {
        let mut record = Record::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            let (key, value) = line.split_once(DELIMITER).ok_or_else(|| {
                DepotError::CorruptStoreData {
                    path: origin.to_path_buf(),
                    reason: format!("line without delimiter: {line:?}"),
                }
            })?;
            let value = (!value.is_empty()).then(|| value.to_string());
            record.push(key, value);
        }
        Ok(record)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Option<V>)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.push(k, v.map(Into::into));
        }
        record
    }
}

/// Keys may not contain the delimiter, and neither side may break a line.
pub fn check_entry(key: &str, value: Option<&str>) -> Result<()> {
    let invalid = |reason: &str| DepotError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() || key.contains(DELIMITER) {
        return Err(invalid("key is empty or contains ':'"));
    }
    if key.contains(is_line_break) {
        return Err(invalid("key contains a line break"));
    }
    if value.is_some_and(|v| v.contains(is_line_break)) {
        return Err(invalid("value contains a line break"));
    }
    Ok(())
}

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

pub fn encode_document(blocks: &[Record]) -> String {
    blocks
        .iter()
        .filter(|b| !b.is_empty())
        .map(Record::encode)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

pub fn decode_document(text: &str, origin: &Path) -> Result<Vec<Record>> {
    text.split(BLOCK_SEPARATOR)
        .filter(|block| !block.trim().is_empty())
        .map(|block| Record::decode(block, origin))
        .collect()
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = XzEncoder::new(Vec::new(), COMPRESSION_LEVEL);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8], origin: &Path) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    XzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| DepotError::CorruptStoreData {
            path: origin.to_path_buf(),
            reason: format!("cannot decompress: {e}"),
        })?;
    Ok(out)
}

/// Writes the blocks as one compressed document.
pub fn write_document(path: &Path, blocks: &[Record]) -> Result<()> {
    blocks.iter().try_for_each(Record::check)?;
    let packed = compress(encode_document(blocks).as_bytes())?;
    fs::write(path, packed)?;
    Ok(())
}

pub fn read_document(path: &Path) -> Result<Vec<Record>> {
    let packed = fs::read(path)?;
    let raw = decompress(&packed, path)?;
    let text = String::from_utf8(raw).map_err(|e| DepotError::CorruptStoreData {
        path: path.to_path_buf(),
        reason: format!("not UTF-8: {e}"),
    })?;
    decode_document(&text, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn origin() -> PathBuf {
        PathBuf::from("test")
    }

    fn header() -> Record {
        [
            ("id", Some("aB3dE5gH7jK9mN1p")),
            ("last_update", Some("0")),
            ("name", None),
            ("url", Some("https://example.org:8080/x")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn absent_values_encode_as_empty() {
        assert_eq!(
            header().encode(),
            "id:aB3dE5gH7jK9mN1p\nlast_update:0\nname:\nurl:https://example.org:8080/x"
        );
    }

    #[test]
    fn value_keeps_later_delimiters() {
        let record = Record::decode("url:https://example.org:8080/x", &origin()).unwrap();
        assert_eq!(record.get("url"), Some("https://example.org:8080/x"));
    }

    #[test]
    fn documents_round_trip_through_compression() {
        let mut second = Record::new();
        second.set("id", Some("0000000000000000".into()));
        second.set("artist", Some(r#"["A","B"]"#.into()));
        let blocks = vec![header(), second];

        let packed = compress(encode_document(&blocks).as_bytes()).unwrap();
        let text = String::from_utf8(decompress(&packed, &origin()).unwrap()).unwrap();
        assert_eq!(decode_document(&text, &origin()).unwrap(), blocks);
    }

    #[test]
    fn empty_document_has_no_blocks() {
        assert!(decode_document("", &origin()).unwrap().is_empty());
        assert_eq!(encode_document(&[]), "");
    }

    #[test]
    fn set_replaces_in_place() {
        let mut record = header();
        record.set("last_update", Some("42".into()));
        assert_eq!(record.iter().nth(1), Some(("last_update", Some("42"))));
        assert_eq!(record.len(), 4);
    }

    #[test]
    fn corrupt_stream_is_reported_as_store_corruption() {
        let mut packed = compress(b"id:x").unwrap();
        packed.truncate(packed.len() / 2);
        assert!(matches!(
            decompress(&packed, &origin()),
            Err(DepotError::CorruptStoreData { .. })
        ));
        assert!(matches!(
            decompress(b"definitely not xz", &origin()),
            Err(DepotError::CorruptStoreData { .. })
        ));
    }

    #[test]
    fn line_breaks_are_refused_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc");
        let mut record = header();
        record.set("description", Some("line one\nline two".into()));

        match write_document(&path, &[record]) {
            Err(DepotError::InvalidValue { key, .. }) => assert_eq!(key, "description"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!path.exists());
        assert!(check_entry("a:b", None).is_err());
        assert!(check_entry("title", Some("carriage\rreturn")).is_err());
        assert!(check_entry("url", Some("https://example.org:8080/x")).is_ok());
    }

    #[test]
    fn line_without_delimiter_is_corrupt() {
        assert!(matches!(
            Record::decode("id:x\nbroken", &origin()),
            Err(DepotError::CorruptStoreData { .. })
        ));
    }
}
