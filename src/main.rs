use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use audio_depot::{
    analyzers::bitrate::BitrateAnalyzer,
    audio::metadata::{item_from_file, items_from_directory},
    cli::commands::{Cli, Commands, EditField, LyricAction},
    tiers::{Tier, FREE_FORM_HEADERS},
    utils::reporting::Reporter,
    Cover, DepotError, FfmpegTranscoder, FileTier, Identifier, LyricTrack, MediaItem,
    RenditionManager, Result, StagingTier, SymphoniaTagReader, SyncEngine, SyncReport,
    FORMAT_VERSION,
};

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let staging_path = cli.staging;
    let engine = || {
        let transcoder = Arc::new(FfmpegTranscoder::new(&cli.ffmpeg));
        SyncEngine::new(FORMAT_VERSION, RenditionManager::new(transcoder))
    };

    match cli.command {
        Commands::Create => {
            let staging = StagingTier::create(&staging_path)?;
            println!("{}", staging.id());
        }

        Commands::Add { paths } => {
            let mut staging = StagingTier::open(&staging_path)?;
            let reader = SymphoniaTagReader;
            for path in paths {
                let items = if path.is_dir() {
                    items_from_directory(&reader, &path)
                } else {
                    vec![item_from_file(&reader, &path)?]
                };
                for item in items {
                    let stored = staging.commit_item(&item)?;
                    println!("{}\t{}", stored.require_id()?, stored.title_or_empty());
                }
            }
        }

        Commands::Remove { ids } => {
            let mut staging = StagingTier::open(&staging_path)?;
            for id in ids {
                staging.delete_item(&Identifier::parse(&id)?)?;
            }
        }

        Commands::List { output } => {
            let staging = StagingTier::open(&staging_path)?;
            let items = staging.list_items()?;
            match output {
                Some(path) => Reporter::new().write_listing_to(&items, path)?,
                None => {
                    for item in &items {
                        println!("{}\t{}\t{}", item.id, item.title, item.artist.join(", "));
                    }
                }
            }
        }

        Commands::Configure { key, value } => {
            let mut staging = StagingTier::open(&staging_path)?;
            staging.set_header(&key, Some(value))?;
        }

        Commands::Unset { key } => {
            let mut staging = StagingTier::open(&staging_path)?;
            staging.remove_header(&key)?;
        }

        Commands::Detail { id } => {
            let staging = StagingTier::open(&staging_path)?;
            match id {
                Some(id) => print_item(&staging.get_item(&Identifier::parse(&id)?)?),
                None => print_tier(&staging)?,
            }
        }

        Commands::Edit { id, field, value } => {
            let mut staging = StagingTier::open(&staging_path)?;
            let mut item = staging.get_item(&Identifier::parse(&id)?)?;
            apply_edit(&mut item, field, value)?;
            staging.commit_item(&item)?;
        }

        Commands::Commit { store } => {
            let staging = StagingTier::open(&staging_path)?;
            let report = engine().sync(&store, &staging)?;
            print_report(&report);
        }

        Commands::Publish { store, repository } => {
            let store = FileTier::open(&store)?;
            let report = engine().sync(&repository, &store)?;
            print_report(&report);
        }

        Commands::Lyric { action } => {
            let mut staging = StagingTier::open(&staging_path)?;
            match action {
                LyricAction::Add {
                    id,
                    file,
                    language,
                    original,
                } => {
                    let mut item = staging.get_item(&Identifier::parse(&id)?)?;
                    let track = LyricTrack::from_lrc(&file, original, &language)?;
                    item.lyrics.retain(|l| l.language != language);
                    item.lyrics.push(track);
                    staging.commit_item(&item)?;
                }
                LyricAction::Remove { id, language } => {
                    let mut item = staging.get_item(&Identifier::parse(&id)?)?;
                    let before = item.lyrics.len();
                    item.lyrics.retain(|l| l.language != language);
                    if item.lyrics.len() == before {
                        return Err(DepotError::ItemNotFound(format!("{id} lyric {language}")));
                    }
                    staging.commit_item(&item)?;
                }
                LyricAction::List { id } => {
                    let item = staging.get_item(&Identifier::parse(&id)?)?;
                    for track in &item.lyrics {
                        let original = match track.is_original {
                            Some(true) => "original",
                            Some(false) => "translation",
                            None => "",
                        };
                        println!("{}\t{} lines\t{}", track.language, track.lines.len(), original);
                    }
                }
            }
        }

        Commands::Verify { tier } => {
            let checked = FileTier::open(&tier)?.verify()?;
            println!("{} renditions verified", checked);
        }

        Commands::Version => {
            println!("depot {}", env!("CARGO_PKG_VERSION"));
            println!("format {}", FORMAT_VERSION);
        }
    }

    Ok(())
}

fn apply_edit(item: &mut MediaItem, field: EditField, value: String) -> Result<()> {
    let text = Some(value.clone()).filter(|v| !v.is_empty());
    match field {
        EditField::Title => item.title = text,
        EditField::Album => item.album = text,
        EditField::Kind => item.kind = text,
        EditField::Description => item.description = text,
        EditField::Artist => {
            item.artist = value
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        EditField::Num => {
            item.track_num = match text {
                Some(num) => Some(num.parse().map_err(|_| {
                    DepotError::Metadata(format!("invalid track number {num:?}"))
                })?),
                None => None,
            };
        }
        EditField::Cover => item.cover = read_cover(Path::new(&value))?,
    }
    Ok(())
}

fn read_cover(path: &Path) -> Result<Cover> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let mime = match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => {
            return Err(DepotError::Metadata(format!(
                "unsupported cover image {}",
                path.display()
            )))
        }
    };
    Ok(Cover {
        mime: Some(mime.to_string()),
        data: Some(fs::read(path)?),
    })
}

fn print_item(item: &MediaItem) {
    let field = |value: &Option<String>| value.clone().unwrap_or_default();
    println!("id:          {}", item.id.map(|i| i.to_string()).unwrap_or_default());
    println!("title:       {}", item.title_or_empty());
    println!("artist:      {}", item.artist.join(", "));
    println!("album:       {}", field(&item.album));
    println!("type:        {}", field(&item.kind));
    println!("num:         {}", item.track_num.map(|n| n.to_string()).unwrap_or_default());
    println!("description: {}", field(&item.description));
    println!("cover:       {}", field(&item.cover.mime));
    for (quality, path) in item.renditions.iter() {
        println!("{:<12} {}", format!("{quality}:"), path.display());
    }
    let languages: Vec<&str> = item.lyrics.iter().map(|l| l.language.as_str()).collect();
    println!("lyrics:      {}", languages.join(", "));
}

fn print_tier(staging: &StagingTier) -> Result<()> {
    for key in ["id", "version", "create_time"].into_iter().chain(FREE_FORM_HEADERS) {
        match staging.header(key) {
            Ok(value) => println!("{}: {}", key, value.unwrap_or_default()),
            Err(DepotError::HeaderNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let items = staging
        .list_items()?
        .iter()
        .map(|summary| staging.get_item(&summary.id))
        .collect::<Result<Vec<_>>>()?;
    let stats = BitrateAnalyzer::analyze(&items);
    println!();
    Reporter::new().write_ladder_stats(&stats, std::io::stdout())?;
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.created {
        println!("Created {}", report.target.display());
    }
    if report.committed {
        println!(
            "Committed {} additions and {} removals at {}",
            report.added, report.removed, report.last_update
        );
    } else {
        println!("{} is up to date", report.target.display());
    }
}
