use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::transcode::Transcoder;
use crate::model::item::{Quality, RenditionLadder};
use crate::utils::file_ops::write_checksum;
use crate::utils::parallel::ParallelProcessor;
use crate::{DepotError, Result};

enum Job<'a> {
    Copy { quality: Quality, source: &'a Path },
    Derive { quality: Quality, source: &'a Path },
}

/// Writes an item's renditions into a tier, filling the gaps below the
/// highest rung through the transcoder.
#[derive(Clone)]
pub struct RenditionManager {
    transcoder: Arc<dyn Transcoder>,
}

impl ParallelProcessor for RenditionManager {}

impl RenditionManager {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self::init_parallel_processing();
        Self { transcoder }
    }

    /// Copies every populated rung up to the highest one into `dest_dir` and
    /// derives the missing lower rungs from the highest file. Each written
    /// file gets a checksum sidecar. Returns the ladder rooted in `dest_dir`.
    pub fn materialize(&self, ladder: &RenditionLadder, dest_dir: &Path) -> Result<RenditionLadder> {
        let Some(highest) = ladder.highest() else {
            return Ok(RenditionLadder::new());
        };
        let top = ladder
            .get(highest)
            .ok_or_else(|| DepotError::UnsupportedQuality(highest.to_string()))?;

        let mut jobs = Vec::new();
        for quality in highest.up_to() {
            match ladder.get(quality) {
                Some(source) => jobs.push(Job::Copy { quality, source }),
                None if quality.target_bitrate().is_some() => {
                    jobs.push(Job::Derive { quality, source: top })
                }
                None => log::debug!("No {quality} rendition to copy, leaving it empty"),
            }
        }

        fs::create_dir_all(dest_dir)?;
        let written = Self::try_map_parallel(&jobs, |job| match job {
            Job::Copy { quality, source } => {
                let target = dest_dir.join(file_name(*quality, extension_of(source, *quality)));
                fs::copy(source, &target)?;
                write_checksum(&target)?;
                Ok((*quality, target))
            }
            Job::Derive { quality, source } => {
                let target = self.synthesize(source, dest_dir, *quality)?;
                Ok((*quality, target))
            }
        })?;

        let mut result = RenditionLadder::new();
        for (quality, path) in written {
            result.set(quality, path);
        }
        Ok(result)
    }

    /// Derives one rung at its fixed bitrate. Only normal, better and high
    /// can be derived.
    pub fn synthesize(&self, source: &Path, dest_dir: &Path, quality: Quality) -> Result<PathBuf> {
        if quality.target_bitrate().is_none() {
            return Err(DepotError::UnsupportedQuality(quality.to_string()));
        }
        let target = dest_dir.join(file_name(quality, self.transcoder.output_extension()));
        self.transcoder.transcode(source, &target, quality)?;
        if !target.is_file() {
            return Err(DepotError::Transcode(format!(
                "transcoder produced no file at {}",
                target.display()
            )));
        }
        write_checksum(&target)?;
        log::info!("Derived {} rendition {}", quality, target.display());
        Ok(target)
    }
}

fn file_name(quality: Quality, extension: &str) -> String {
    format!("{quality}.{extension}")
}

fn extension_of(path: &Path, quality: Quality) -> &str {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_else(|| quality.default_extension())
}
