use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::codec::record::{read_document, write_document, Record};
use crate::{DepotError, Result};

pub const LYRIC_FORMAT_VERSION: u32 = 1;
pub const LYRIC_EXTENSION: &str = "lyric";

fn time_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(\d+):(\d{1,2})(?:[.:](\d{1,3}))?\]").expect("valid regex"))
}

fn word_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\d+:\d{1,2}(?:[.:]\d{1,3})?>").expect("valid regex"))
}

fn id_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([A-Za-z#]+):(.*)\]$").expect("valid regex"))
}

/// Language tags name files on disk, so only ASCII letters, digits and `-`
/// are allowed.
pub fn check_language_tag(tag: &str) -> Result<()> {
    if !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Ok(())
    } else {
        Err(DepotError::InvalidLanguageTag(tag.to_string()))
    }
}

/// A timed lyric text for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricTrack {
    pub artist: Option<String>,
    pub creator: Option<String>,
    pub offset_ms: i64,
    pub is_original: Option<bool>,
    pub language: String,
    /// `(milliseconds from start, text)`, in playback order.
    pub lines: Vec<(u64, String)>,
    pub format_version: u32,
}

impl LyricTrack {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            artist: None,
            creator: None,
            offset_ms: 0,
            is_original: None,
            language: language.into(),
            lines: Vec::new(),
            format_version: LYRIC_FORMAT_VERSION,
        }
    }

    /// Imports an LRC file. Word-level time tags of enhanced LRC are dropped.
    pub fn from_lrc(path: &Path, is_original: Option<bool>, language: &str) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse_lrc(&text, path, is_original, language)
    }

    pub fn parse_lrc(
        text: &str,
        origin: &Path,
        is_original: Option<bool>,
        language: &str,
    ) -> Result<Self> {
        check_language_tag(language)?;
        let mut track = Self::new(language);
        track.is_original = is_original;

        let invalid = |line: &str| DepotError::InvalidLyricLine {
            line: line.to_string(),
            path: origin.to_path_buf(),
        };

        for line in text.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }

            let mut rest = line;
            let mut stamps = Vec::new();
            while let Some(caps) = time_tag().captures(rest) {
                let minutes: u64 = caps[1].parse().map_err(|_| invalid(line))?;
                let seconds: u64 = caps[2].parse().map_err(|_| invalid(line))?;
                let fraction = caps.get(3).map_or(0, |m| fraction_to_millis(m.as_str()));
                stamps.push(minutes * 60_000 + seconds * 1_000 + fraction);
                rest = &rest[caps[0].len()..];
            }
            if !stamps.is_empty() {
                let text = if word_tag().is_match(rest) {
                    let stripped = word_tag().replace_all(rest, "");
                    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
                } else {
                    rest.to_string()
                };
                for stamp in stamps {
                    track.lines.push((stamp, text.clone()));
                }
                continue;
            }

            let caps = id_tag().captures(line).ok_or_else(|| invalid(line))?;
            let value = caps[2].trim();
            match caps[1].trim() {
                "ar" => track.artist = Some(value.to_string()),
                "au" | "by" => track.creator = Some(value.to_string()),
                "offset" => track.offset_ms = value.parse().map_err(|_| invalid(line))?,
                other => log::debug!("Ignoring LRC tag [{other}] in {}", origin.display()),
            }
        }

        track.lines.sort_by_key(|(stamp, _)| *stamp);
        Ok(track)
    }

    pub fn to_records(&self) -> Vec<Record> {
        let mut header = Record::new();
        header.set("artist", self.artist.clone());
        header.set("creator", self.creator.clone());
        header.set("offset", Some(self.offset_ms.to_string()));
        header.set("original", self.is_original.map(|b| b.to_string()));
        header.set("language", Some(self.language.clone()));
        header.set("version", Some(self.format_version.to_string()));

        let mut lines = Record::new();
        for (stamp, text) in &self.lines {
            lines.push(stamp.to_string(), (!text.is_empty()).then(|| text.clone()));
        }
        vec![header, lines]
    }

    pub fn from_records(records: &[Record], origin: &Path) -> Result<Self> {
        let corrupt = |reason: String| DepotError::CorruptStoreData {
            path: origin.to_path_buf(),
            reason,
        };
        let header = records
            .first()
            .ok_or_else(|| corrupt("empty lyric document".into()))?;
        let language = header
            .get("language")
            .ok_or_else(|| corrupt("lyric without language".into()))?;
        check_language_tag(language)?;

        let mut track = Self::new(language);
        track.artist = header.get("artist").map(str::to_string);
        track.creator = header.get("creator").map(str::to_string);
        if let Some(offset) = header.get("offset") {
            track.offset_ms = offset
                .parse()
                .map_err(|_| corrupt(format!("bad offset {offset:?}")))?;
        }
        if let Some(original) = header.get("original") {
            track.is_original = Some(
                original
                    .parse()
                    .map_err(|_| corrupt(format!("bad original flag {original:?}")))?,
            );
        }
        if let Some(version) = header.get("version") {
            track.format_version = version
                .parse()
                .map_err(|_| corrupt(format!("bad version {version:?}")))?;
        }

        if let Some(lines) = records.get(1) {
            for (stamp, text) in lines.iter() {
                let stamp = stamp
                    .parse()
                    .map_err(|_| corrupt(format!("bad timestamp {stamp:?}")))?;
                track.lines.push((stamp, text.unwrap_or("").to_string()));
            }
        }
        Ok(track)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_document(path, &self.to_records())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_records(&read_document(path)?, path)
    }
}

fn fraction_to_millis(digits: &str) -> u64 {
    let value: u64 = digits.parse().unwrap_or(0);
    match digits.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const SAMPLE: &str = "[ar:Some Band]\n[by:someone]\n[offset:-250]\n[ti:ignored]\n\n\
                          [00:01.50]first\n[00:12.345]second\n[01:00.00][00:30.00]chorus\n[00:40.00]\n";

    #[test]
    fn parses_tags_and_lines() {
        let track = LyricTrack::parse_lrc(SAMPLE, Path::new("a.lrc"), Some(true), "en").unwrap();
        assert_eq!(track.artist.as_deref(), Some("Some Band"));
        assert_eq!(track.creator.as_deref(), Some("someone"));
        assert_eq!(track.offset_ms, -250);
        assert_eq!(track.is_original, Some(true));
        assert_eq!(
            track.lines,
            vec![
                (1_500, "first".to_string()),
                (12_345, "second".to_string()),
                (30_000, "chorus".to_string()),
                (40_000, String::new()),
                (60_000, "chorus".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_untimed_text() {
        let err = LyricTrack::parse_lrc("[00:01.00]ok\njust words", Path::new("b.lrc"), None, "en")
            .unwrap_err();
        match err {
            DepotError::InvalidLyricLine { line, path } => {
                assert_eq!(line, "just words");
                assert_eq!(path, PathBuf::from("b.lrc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn enhanced_word_tags_are_dropped() {
        let track = LyricTrack::parse_lrc(
            "[00:05.00]<00:05.00> Hello <00:05.80> world",
            Path::new("c.lrc"),
            None,
            "en",
        )
        .unwrap();
        assert_eq!(track.lines, vec![(5_000, "Hello world".to_string())]);
    }

    #[test]
    fn language_tags_must_be_plain() {
        assert!(check_language_tag("zh-Hant").is_ok());
        for bad in ["", "../../x", "en/us", "ja jp"] {
            assert!(matches!(
                LyricTrack::parse_lrc("[00:01.00]a", Path::new("d.lrc"), None, bad),
                Err(DepotError::InvalidLanguageTag(_))
            ));
        }
    }

    #[test]
    fn saved_track_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ja.lyric");
        let track = LyricTrack::parse_lrc(SAMPLE, Path::new("a.lrc"), Some(false), "ja").unwrap();
        track.save(&path).unwrap();
        assert_eq!(LyricTrack::load(&path).unwrap(), track);
    }
}
