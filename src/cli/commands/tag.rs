//! Gain tagging command.

use std::process::ExitCode;

use tracing::info;

use super::{MeasureArgs, OutputFormat, describe, exit_code};
use crate::config::Config;
use crate::metadata::LoftyTagWriter;
use crate::scanner::{ProcessOptions, ProcessReport, ScanOrchestrator, walk};

/// Measure files and write their gain tags
pub fn cmd_tag(
    args: &MeasureArgs,
    options: ProcessOptions,
    opus_output_gain: bool,
    config: &Config,
) -> anyhow::Result<ExitCode> {
    let source = args.analyzer(config);
    if !source.is_available() {
        anyhow::bail!(
            "{} cannot be run, see `r128tag check-tools`",
            source.program().display()
        );
    }

    let writer = LoftyTagWriter::new(opus_output_gain);
    let orchestrator = ScanOrchestrator::new(source, writer, args.threads(config))?;
    info!(
        target: "scanner",
        threads = orchestrator.threads(),
        album_gain = options.album_gain,
        skip_tagged = options.skip_tagged,
        opus_output_gain,
        "Tagging"
    );

    let reports = if args.recursive {
        orchestrator.process_recursive(&args.paths, options)
    } else {
        let files = walk::collect_files(&args.paths, false);
        if files.is_empty() {
            println!("No audio files found.");
            return Ok(ExitCode::SUCCESS);
        }
        vec![orchestrator.process(&files, options)]
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => print_reports(&reports, options.dry_run),
    }

    Ok(exit_code(reports.iter().any(ProcessReport::has_failures)))
}

fn print_reports(reports: &[ProcessReport], dry_run: bool) {
    if dry_run {
        println!("DRY RUN - no changes were made\n");
    }

    let mut written = 0;
    let mut skipped = 0;
    let mut failed = 0;
    for report in reports {
        if let Some(dir) = &report.directory {
            println!("{}", dir.display());
        }
        for (path, m) in report.result.tracks() {
            println!("  {}: {}", path.display(), describe(m));
        }
        if let Some(m) = report.result.album() {
            println!("  Album: {}", describe(m));
        }
        for failure in report.failures() {
            eprintln!(
                "✗ {} ({:?}): {}",
                failure.path.display(),
                failure.stage,
                failure.message
            );
        }
        written += report.written.len();
        skipped += report.skipped.len();
        failed += report.failures().count();
    }

    println!(
        "\nTagged {} file(s), skipped {} already tagged, {} failed.",
        written, skipped, failed
    );
}
