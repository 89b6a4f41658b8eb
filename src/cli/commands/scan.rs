//! Loudness scanning and tool check commands.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde::Serialize;
use tracing::info;

use super::{MeasureArgs, OutputFormat, describe, exit_code};
use crate::config::Config;
use crate::loudness::FfmpegLoudness;
use crate::metadata::LoftyTagWriter;
use crate::scanner::{ScanOrchestrator, ScanResult, walk};

/// Measurements of one album, as printed
#[derive(Serialize)]
struct AlbumScan {
    directory: Option<PathBuf>,
    #[serde(flatten)]
    result: ScanResult,
}

/// Measure files and print their loudness
pub fn cmd_scan(args: &MeasureArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let source = args.analyzer(config);
    if !source.is_available() {
        anyhow::bail!(
            "{} cannot be run, see `r128tag check-tools`",
            source.program().display()
        );
    }

    let orchestrator = ScanOrchestrator::new(source, LoftyTagWriter::default(), args.threads(config))?;
    info!(target: "scanner", threads = orchestrator.threads(), "Measuring");

    let albums: Vec<AlbumScan> = if args.recursive {
        orchestrator
            .scan_recursive(&args.paths, args.album_gain)
            .into_iter()
            .map(|(dir, result)| AlbumScan {
                directory: Some(dir),
                result,
            })
            .collect()
    } else {
        let files = walk::collect_files(&args.paths, false);
        if files.is_empty() {
            println!("No audio files found.");
            return Ok(ExitCode::SUCCESS);
        }
        vec![AlbumScan {
            directory: None,
            result: orchestrator.scan(&files, args.album_gain),
        }]
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&albums)?),
        OutputFormat::Text => print_albums(&albums),
    }

    let failed = albums.iter().any(|a| !a.result.failures.is_empty());
    Ok(exit_code(failed))
}

fn print_albums(albums: &[AlbumScan]) {
    for album in albums {
        if let Some(dir) = &album.directory {
            println!("{}", dir.display());
        }
        for (path, m) in album.result.tracks() {
            println!("  {}: {}", path.display(), describe(m));
        }
        if let Some(m) = album.result.album() {
            println!("  Album: {}", describe(m));
        }
        for failure in &album.result.failures {
            eprintln!("✗ {}: {}", failure.path.display(), failure.message);
        }
    }
}

/// Check if the loudness analyzer is installed
pub fn cmd_check_tools(ffmpeg: &Path) -> anyhow::Result<ExitCode> {
    println!("Checking loudness tools...\n");

    let source = FfmpegLoudness::new(ffmpeg);
    if let Some(version) = source.version() {
        println!("✓ ffmpeg ({}): {}", ffmpeg.display(), version);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("✗ ffmpeg ({}): NOT FOUND", ffmpeg.display());
        print_ffmpeg_install_instructions();
        Ok(ExitCode::FAILURE)
    }
}

fn print_ffmpeg_install_instructions() {
    println!("  Install ffmpeg:");
    println!("    Windows: winget install Gyan.FFmpeg");
    println!("    macOS:   brew install ffmpeg");
    println!("    Linux:   apt install ffmpeg (or your distribution's package)");
    println!("  or point [analyzer] ffmpeg_path in the config file at it.");
}
