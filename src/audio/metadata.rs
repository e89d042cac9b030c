use std::path::{Path, PathBuf};

use rayon::prelude::*;
use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_VORBIS};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use crate::analyzers::bitrate::BitrateAnalyzer;
use crate::model::item::{Cover, MediaItem, RenditionLadder};
use crate::utils::parallel::ParallelProcessor;
use crate::{DepotError, Result};

const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "flac", "ogg"];

/// The two tag schemes the importer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFamily {
    Id3,
    Vorbis,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Vec<String>,
    pub album: Option<String>,
    pub cover: Option<Cover>,
    pub genre: Option<String>,
    pub track_num: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ProbedAudio {
    pub path: PathBuf,
    pub family: TagFamily,
    pub tags: Tags,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
    pub bitrate: Option<u32>,
}

impl ProbedAudio {
    pub fn is_lossless(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("flac"))
    }
}

pub trait TagReader: Send + Sync {
    /// Fails with `UnknownTagFormat` for anything but ID3 or Vorbis tagged audio.
    fn read(&self, path: &Path) -> Result<ProbedAudio>;
}

pub struct SymphoniaTagReader;

impl ParallelProcessor for SymphoniaTagReader {}

impl TagReader for SymphoniaTagReader {
    fn read(&self, path: &Path) -> Result<ProbedAudio> {
        let file = std::fs::File::open(path)?;
        let size_bytes = file.metadata()?.len();

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|_| DepotError::UnknownTagFormat {
                path: path.to_path_buf(),
            })?;

        let mut format = probed.format;
        let mut probed_metadata = probed.metadata;

        let track = format.default_track().ok_or_else(|| DepotError::UnknownTagFormat {
            path: path.to_path_buf(),
        })?;
        let params = &track.codec_params;
        let family = match params.codec {
            CODEC_TYPE_MP3 => TagFamily::Id3,
            CODEC_TYPE_FLAC | CODEC_TYPE_VORBIS => TagFamily::Vorbis,
            _ => {
                return Err(DepotError::UnknownTagFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        let mut duration_secs = None;
        if let (Some(time_base), Some(n_frames)) = (params.time_base, params.n_frames) {
            let time = time_base.calc_time(n_frames);
            duration_secs = Some(time.seconds as f64 + time.frac);
        }
        let bitrate = duration_secs
            .filter(|d| *d > 0.0)
            .map(|d| ((size_bytes * 8) as f64 / d / 1000.0) as u32);

        // ID3v2 is found while probing, Vorbis comments inside the stream
        let mut tags = Tags::default();
        if let Some(metadata) = probed_metadata.get() {
            if let Some(revision) = metadata.current() {
                apply_revision(revision, &mut tags);
            }
        }
        if let Some(revision) = format.metadata().current() {
            apply_revision(revision, &mut tags);
        }

        Ok(ProbedAudio {
            path: path.to_path_buf(),
            family,
            tags,
            size_bytes,
            duration_secs,
            bitrate,
        })
    }
}

fn apply_revision(revision: &MetadataRevision, tags: &mut Tags) {
    for tag in revision.tags() {
        let value = tag.value.to_string();
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => tags.title = Some(value),
            Some(StandardTagKey::Artist) => {
                if !tags.artist.contains(&value) {
                    tags.artist.push(value);
                }
            }
            Some(StandardTagKey::Album) => tags.album = Some(value),
            Some(StandardTagKey::Genre) => tags.genre = Some(value),
            Some(StandardTagKey::TrackNumber) => {
                // "3/12" style numbers keep the position only
                tags.track_num = value.split('/').next().and_then(|n| n.trim().parse().ok());
            }
            _ => {}
        }
    }
    if let Some(visual) = revision.visuals().first() {
        tags.cover = Some(Cover {
            mime: Some(visual.media_type.clone()),
            data: Some(visual.data.to_vec()),
        });
    }
}

/// Builds an unsaved item from an audio file: tags fill the metadata and the
/// file becomes the single rung its bitrate classifies it as.
pub fn item_from_file(reader: &dyn TagReader, path: &Path) -> Result<MediaItem> {
    let probed = reader.read(path)?;
    let quality = BitrateAnalyzer::classify(probed.bitrate, probed.is_lossless());
    log::debug!(
        "Imported {} ({:?} kbps) as {} rendition",
        path.display(),
        probed.bitrate,
        quality
    );

    let tags = probed.tags;
    Ok(MediaItem {
        id: None,
        title: tags.title.or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        }),
        artist: tags.artist,
        album: tags.album,
        kind: tags.genre,
        track_num: tags.track_num,
        description: None,
        cover: tags.cover.unwrap_or_default(),
        renditions: RenditionLadder::single(quality, probed.path),
        lyrics: Vec::new(),
    })
}

fn collect_audio_files(dir_path: &Path) -> Vec<walkdir::DirEntry> {
    walkdir::WalkDir::new(dir_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Error accessing entry: {}", err);
                None
            }
        })
        .filter(|e| {
            let is_file = e.file_type().is_file();
            let has_valid_ext = e
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
            if is_file && !has_valid_ext {
                log::debug!("Skipping non-audio file: {}", e.path().display());
            }
            is_file && has_valid_ext
        })
        .collect()
}

/// Reads every audio file under `dir` in parallel. Unreadable files are
/// logged and left out.
pub fn items_from_directory(reader: &dyn TagReader, dir: &Path) -> Vec<MediaItem> {
    SymphoniaTagReader::init_parallel_processing();
    let mut entries = collect_audio_files(dir);
    entries.sort_by(|a, b| a.path().cmp(b.path()));
    log::info!("Found {} audio files in {}", entries.len(), dir.display());

    entries
        .par_iter()
        .filter_map(|entry| match item_from_file(reader, entry.path()) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("Error importing {}: {}", entry.path().display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::Quality;
    use pretty_assertions::assert_eq;

    struct FixedReader;

    impl TagReader for FixedReader {
        fn read(&self, path: &Path) -> Result<ProbedAudio> {
            if path.extension().and_then(|e| e.to_str()) == Some("ogg") {
                return Err(DepotError::UnknownTagFormat {
                    path: path.to_path_buf(),
                });
            }
            Ok(ProbedAudio {
                path: path.to_path_buf(),
                family: TagFamily::Id3,
                tags: Tags {
                    title: None,
                    artist: vec!["A".into(), "B".into()],
                    genre: Some("Pop".into()),
                    track_num: Some(4),
                    ..Tags::default()
                },
                size_bytes: 1,
                duration_secs: Some(1.0),
                bitrate: Some(190),
            })
        }
    }

    #[test]
    fn item_takes_tags_and_classified_rung() {
        let item = item_from_file(&FixedReader, Path::new("/music/Track One.mp3")).unwrap();
        assert_eq!(item.title.as_deref(), Some("Track One"));
        assert_eq!(item.artist, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(item.kind.as_deref(), Some("Pop"));
        assert_eq!(item.track_num, Some(4));
        assert_eq!(item.renditions.highest(), Some(Quality::Better));
        assert!(item.id.is_none());
    }

    #[test]
    fn directory_import_skips_failures_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["a.mp3", "sub/b.flac", "c.ogg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let mut titles: Vec<_> = items_from_directory(&FixedReader, dir.path())
            .into_iter()
            .filter_map(|i| i.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn garbage_is_an_unknown_tag_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"not audio at all").unwrap();
        assert!(matches!(
            SymphoniaTagReader.read(&path),
            Err(DepotError::UnknownTagFormat { .. })
        ));
    }
}
