use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::record::check_entry;
use crate::model::identifier::Identifier;
use crate::model::lyric::{check_language_tag, LyricTrack};
use crate::{DepotError, Result};

/// The five rungs of the rendition ladder, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Normal,
    Better,
    High,
    Best,
    Original,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Normal,
        Quality::Better,
        Quality::High,
        Quality::Best,
        Quality::Original,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Normal => "normal",
            Quality::Better => "better",
            Quality::High => "high",
            Quality::Best => "best",
            Quality::Original => "original",
        }
    }

    /// Fixed bitrate (kbps) a rung is derived at. `best` and `original` are
    /// copy-only and have none.
    pub fn target_bitrate(&self) -> Option<u32> {
        match self {
            Quality::Normal => Some(128),
            Quality::Better => Some(192),
            Quality::High => Some(320),
            Quality::Best | Quality::Original => None,
        }
    }

    /// Extension a rung gets when nothing better is known about its file.
    pub fn default_extension(&self) -> &'static str {
        match self {
            Quality::Original => "flac",
            _ => "mp3",
        }
    }

    /// All rungs from the bottom of the ladder up to and including `self`.
    pub fn up_to(self) -> impl Iterator<Item = Quality> {
        Quality::ALL.into_iter().filter(move |q| *q <= self)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Quality::Normal),
            "better" => Ok(Quality::Better),
            "high" => Ok(Quality::High),
            "best" => Ok(Quality::Best),
            "original" => Ok(Quality::Original),
            other => Err(DepotError::UnsupportedQuality(other.to_string())),
        }
    }
}

/// Sparse ladder of rendition files, at most one per quality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenditionLadder(BTreeMap<Quality, PathBuf>);

impl RenditionLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(quality: Quality, path: impl Into<PathBuf>) -> Self {
        let mut ladder = Self::new();
        ladder.set(quality, path);
        ladder
    }

    pub fn set(&mut self, quality: Quality, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.0.insert(quality, path.into())
    }

    pub fn get(&self, quality: Quality) -> Option<&Path> {
        self.0.get(&quality).map(PathBuf::as_path)
    }

    pub fn contains(&self, quality: Quality) -> bool {
        self.0.contains_key(&quality)
    }

    pub fn highest(&self) -> Option<Quality> {
        self.0.keys().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Quality, &Path)> {
        self.0.iter().map(|(q, p)| (*q, p.as_path()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cover {
    pub mime: Option<String>,
    pub data: Option<Vec<u8>>,
}

impl Cover {
    pub fn is_present(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// One song with its metadata, renditions and lyric tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: Option<Identifier>,
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Vec<String>,
    pub album: Option<String>,
    pub kind: Option<String>,
    pub track_num: Option<u32>,
    pub description: Option<String>,
    #[serde(default)]
    pub cover: Cover,
    #[serde(default)]
    pub renditions: RenditionLadder,
    #[serde(default)]
    pub lyrics: Vec<LyricTrack>,
}

impl MediaItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// The id, or `ItemNotFound` naming the title when the item was never stored.
    pub fn require_id(&self) -> Result<Identifier> {
        self.id.ok_or_else(|| {
            DepotError::ItemNotFound(format!(
                "<unassigned: {}>",
                self.title.as_deref().unwrap_or("untitled")
            ))
        })
    }

    pub fn title_or_empty(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// Deep copy whose rendition paths are re-rooted through `rebase`.
    pub fn rebased(&self, mut rebase: impl FnMut(Quality, &Path) -> PathBuf) -> Self {
        let mut copy = self.clone();
        let mut ladder = RenditionLadder::new();
        for (quality, path) in self.renditions.iter() {
            ladder.set(quality, rebase(quality, path));
        }
        copy.renditions = ladder;
        copy
    }

    /// Checks everything a tier has to write before it writes any of it.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("title", &self.title),
            ("album", &self.album),
            ("type", &self.kind),
            ("description", &self.description),
            ("cover_mime", &self.cover.mime),
        ] {
            check_entry(key, value.as_deref())?;
        }
        self.check_lyric_languages()
    }

    /// Fails on a malformed language tag or when two lyric tracks share one.
    pub fn check_lyric_languages(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for track in &self.lyrics {
            check_language_tag(&track.language)?;
            if !seen.insert(track.language.as_str()) {
                return Err(DepotError::DuplicateLyricLanguage {
                    id: self.id.map(|i| i.to_string()).unwrap_or_default(),
                    language: track.language.clone(),
                });
            }
        }
        Ok(())
    }
}
