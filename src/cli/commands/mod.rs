//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `scan`: measure loudness and print it, and tool checks
//! - `tag`: measure and write gain tags
//! - `opus`: read or set the raw OpusHead output gain

mod opus;
mod scan;
mod tag;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::Config;
use crate::loudness::{FfmpegLoudness, LoudnessMeasurement};
use crate::scanner::ProcessOptions;

pub use opus::cmd_opus_gain;
pub use scan::{cmd_check_tools, cmd_scan};
pub use tag::cmd_tag;

/// Measure loudness and write ReplayGain 2.0 / R128 tags
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level
    #[arg(short, long, value_enum, default_value_t = LogLevel::Warning, global = true)]
    pub verbosity: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Measure loudness and print the results
    Scan(MeasureArgs),
    /// Measure loudness and write gain tags
    Tag {
        #[command(flatten)]
        measure: MeasureArgs,
        /// Do not re-tag files that already carry gain tags
        #[arg(short, long)]
        skip_tagged: bool,
        /// Write Opus track gain into the OpusHead output gain field
        #[arg(short, long)]
        opus_output_gain: bool,
        /// Measure and report, but do not modify any file
        #[arg(short, long)]
        dry_run: bool,
    },
    /// Print or set the raw output gain of an Opus file (Q7.8 units)
    OpusGain {
        /// Path to the Opus file
        file: PathBuf,
        /// New output gain, in 1/256 dB
        #[arg(long, allow_hyphen_values = true)]
        set: Option<i16>,
    },
    /// Check if the loudness analyzer is installed
    CheckTools {
        /// ffmpeg executable
        #[arg(short, long, env = "R128TAG_FFMPEG")]
        ffmpeg_path: Option<PathBuf>,
    },
}

/// Arguments shared by commands that measure loudness
#[derive(Args, Debug, Clone)]
pub struct MeasureArgs {
    /// Audio files or directories
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Also compute album gain (each invocation or directory is one album)
    #[arg(short, long)]
    pub album_gain: bool,
    /// Descend into directories, treating each one as an album
    #[arg(short, long)]
    pub recursive: bool,
    /// Parallel measurements (default: config, then one per CPU)
    #[arg(short = 'c', long)]
    pub thread_count: Option<usize>,
    /// ffmpeg executable
    #[arg(short, long, env = "R128TAG_FFMPEG")]
    pub ffmpeg_path: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl MeasureArgs {
    fn analyzer(&self, config: &Config) -> FfmpegLoudness {
        FfmpegLoudness::new(ffmpeg_path(self.ffmpeg_path.as_ref(), config))
    }

    fn threads(&self, config: &Config) -> usize {
        self.thread_count.unwrap_or(config.analyzer.threads)
    }
}

/// Verbosity of the log output on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Warning,
    Normal,
    Debug,
}

impl LogLevel {
    /// Level used in the default `tracing` filter directive.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Warning => "warn",
            Self::Normal => "info",
            Self::Debug => "debug",
        }
    }
}

/// How results are printed on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Run the specified CLI command.
///
/// The exit code is a failure when any file could not be processed.
pub fn run_command(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Scan(args) => cmd_scan(args, config),
        Commands::Tag {
            measure,
            skip_tagged,
            opus_output_gain,
            dry_run,
        } => {
            let options = ProcessOptions {
                album_gain: measure.album_gain || config.tagging.album_gain,
                skip_tagged: *skip_tagged || config.tagging.skip_tagged,
                dry_run: *dry_run || config.tagging.dry_run,
            };
            let opus_output_gain = *opus_output_gain || config.tagging.opus_output_gain;
            cmd_tag(measure, options, opus_output_gain, config)
        }
        Commands::OpusGain { file, set } => cmd_opus_gain(file, *set),
        Commands::CheckTools { ffmpeg_path: path } => {
            cmd_check_tools(&ffmpeg_path(path.as_ref(), config))
        }
    }
}

fn ffmpeg_path(flag: Option<&PathBuf>, config: &Config) -> PathBuf {
    flag.cloned()
        .unwrap_or_else(|| config.analyzer.ffmpeg_path.clone())
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// One line summary of a measurement.
fn describe(m: &LoudnessMeasurement) -> String {
    match m.true_peak_dbtp {
        Some(peak) => format!("{:.1} LUFS, peak {:.1} dBTP", m.loudness_lufs, peak),
        None => format!("{:.1} LUFS", m.loudness_lufs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tag_flags() {
        let cli = Cli::try_parse_from([
            "r128tag", "-v", "debug", "tag", "-a", "-r", "-s", "-o", "-c", "3", "music/",
        ])
        .unwrap();
        assert_eq!(cli.verbosity, LogLevel::Debug);
        let Commands::Tag {
            measure,
            skip_tagged,
            opus_output_gain,
            dry_run,
        } = cli.command
        else {
            panic!("expected tag command");
        };
        assert!(measure.album_gain && measure.recursive);
        assert!(skip_tagged && opus_output_gain && !dry_run);
        assert_eq!(measure.thread_count, Some(3));
        assert_eq!(measure.paths, vec![PathBuf::from("music/")]);
        assert_eq!(measure.format, OutputFormat::Text);
    }

    #[test]
    fn test_parse_negative_opus_gain() {
        let cli = Cli::try_parse_from(["r128tag", "opus-gain", "f.opus", "--set", "-2125"]).unwrap();
        let Commands::OpusGain { set, .. } = cli.command else {
            panic!("expected opus-gain command");
        };
        assert_eq!(set, Some(-2125));
    }

    #[test]
    fn test_scan_requires_paths() {
        assert!(Cli::try_parse_from(["r128tag", "scan"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        config.analyzer.threads = 6;
        config.analyzer.ffmpeg_path = PathBuf::from("/opt/ffmpeg");

        let cli = Cli::try_parse_from(["r128tag", "scan", "--format", "json", "a.flac"]).unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.threads(&config), 6);
        assert_eq!(args.analyzer(&config).program(), PathBuf::from("/opt/ffmpeg"));
        assert_eq!(args.format, OutputFormat::Json);

        let cli = Cli::try_parse_from(["r128tag", "scan", "-c", "2", "-f", "ff", "a.flac"]).unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.threads(&config), 2);
        assert_eq!(args.analyzer(&config).program(), PathBuf::from("ff"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(&LoudnessMeasurement::new(-20.6, Some(0.1))),
            "-20.6 LUFS, peak 0.1 dBTP"
        );
        assert_eq!(describe(&LoudnessMeasurement::new(-14.7, None)), "-14.7 LUFS");
    }
}
