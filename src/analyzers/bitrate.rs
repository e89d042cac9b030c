use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::item::{MediaItem, Quality};

#[derive(Debug, Serialize)]
pub struct LadderStats {
    pub item_count: usize,
    /// Items per highest populated rung.
    pub distribution: BTreeMap<Quality, usize>,
    pub without_renditions: usize,
}

impl LadderStats {
    pub fn percentage(&self, quality: Quality) -> f64 {
        if self.item_count == 0 {
            return 0.0;
        }
        let count = self.distribution.get(&quality).copied().unwrap_or(0);
        count as f64 / self.item_count as f64 * 100.0
    }
}

pub struct BitrateAnalyzer;

impl BitrateAnalyzer {
    /// Places a file on the ladder from its measured bitrate (kbps). Files
    /// above 320 kbps, or of unknown bitrate, are `best` when lossy and
    /// `original` when lossless.
    pub fn classify(bitrate: Option<u32>, lossless: bool) -> Quality {
        match bitrate {
            Some(1..=128) => Quality::Normal,
            Some(129..=192) => Quality::Better,
            Some(193..=320) => Quality::High,
            _ if lossless => Quality::Original,
            _ => Quality::Best,
        }
    }

    pub fn analyze<'a>(items: impl IntoIterator<Item = &'a MediaItem>) -> LadderStats {
        let mut distribution = BTreeMap::new();
        let mut item_count = 0;
        let mut without_renditions = 0;

        for item in items {
            item_count += 1;
            match item.renditions.highest() {
                Some(quality) => *distribution.entry(quality).or_insert(0) += 1,
                None => without_renditions += 1,
            }
        }

        log::debug!("Analyzed ladders of {} items", item_count);
        LadderStats {
            item_count,
            distribution,
            without_renditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::RenditionLadder;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_by_bitrate_boundaries() {
        assert_eq!(BitrateAnalyzer::classify(Some(96), false), Quality::Normal);
        assert_eq!(BitrateAnalyzer::classify(Some(128), false), Quality::Normal);
        assert_eq!(BitrateAnalyzer::classify(Some(129), false), Quality::Better);
        assert_eq!(BitrateAnalyzer::classify(Some(320), false), Quality::High);
        assert_eq!(BitrateAnalyzer::classify(Some(321), false), Quality::Best);
        assert_eq!(BitrateAnalyzer::classify(Some(900), true), Quality::Original);
        assert_eq!(BitrateAnalyzer::classify(None, true), Quality::Original);
        assert_eq!(BitrateAnalyzer::classify(Some(0), false), Quality::Best);
    }

    #[test]
    fn distribution_counts_highest_rungs() {
        let mut a = MediaItem::new("a");
        a.renditions = RenditionLadder::single(Quality::Best, "a.mp3");
        let mut b = MediaItem::new("b");
        b.renditions = RenditionLadder::single(Quality::Best, "b.mp3");
        b.renditions.set(Quality::Normal, "b-low.mp3");
        let c = MediaItem::new("c");

        let stats = BitrateAnalyzer::analyze([&a, &b, &c]);
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.distribution.get(&Quality::Best), Some(&2));
        assert_eq!(stats.without_renditions, 1);
        assert!((stats.percentage(Quality::Best) - 66.666).abs() < 0.01);
    }
}
