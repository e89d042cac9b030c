use std::io::Write;
use std::path::Path;

use csv::Writer;

use crate::analyzers::bitrate::LadderStats;
use crate::model::item::Quality;
use crate::tiers::ItemSummary;
use crate::Result;

/// Writes tier listings and ladder statistics as CSV.
pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn write_listing<W: Write>(&self, items: &[ItemSummary], out: W) -> Result<()> {
        let mut writer = Writer::from_writer(out);
        writer.write_record(["id", "title", "artists"])?;

        for item in items {
            writer.write_record([item.id.as_str(), &item.title, &item.artist.join("; ")])?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn write_listing_to(&self, items: &[ItemSummary], output_path: impl AsRef<Path>) -> Result<()> {
        let output_path = output_path.as_ref();
        let file = std::fs::File::create(output_path)?;
        self.write_listing(items, file)?;
        log::info!("Listing written to {}", output_path.display());
        Ok(())
    }

    pub fn write_ladder_stats<W: Write>(&self, stats: &LadderStats, out: W) -> Result<()> {
        let mut writer = Writer::from_writer(out);
        writer.write_record(["Quality", "Item Count", "Percentage"])?;

        for quality in Quality::ALL {
            let count = stats.distribution.get(&quality).copied().unwrap_or(0);
            writer.write_record([
                quality.to_string(),
                count.to_string(),
                format!("{:.1}%", stats.percentage(quality)),
            ])?;
        }

        writer.write_record(["none", &stats.without_renditions.to_string(), ""])?;
        writer.write_record(["total", &stats.item_count.to_string(), ""])?;

        writer.flush()?;
        Ok(())
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
