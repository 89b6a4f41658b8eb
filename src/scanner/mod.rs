//! Measuring albums and writing their gain tags.
//!
//! [`ScanOrchestrator`] ties the other modules together: it measures files on
//! a worker pool through a [`LoudnessSource`], aggregates the album, and hands
//! the resulting [`GainTagSet`]s to a [`TagWriter`].
//!
//! # Skip policy
//!
//! With `skip_tagged` set:
//! - without album gain, files already carrying a track gain tag are neither
//!   measured nor written
//! - with album gain, nothing is measured when every file carries both track
//!   and album tags; otherwise every file is measured, because tags only hold
//!   relative gains and the album needs absolute loudness. Track tags are then
//!   written only where missing, album tags everywhere.

pub mod walk;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::album;
use crate::error::{Error, Result};
use crate::loudness::{LoudnessMeasurement, LoudnessSource};
use crate::metadata::{GainTagSet, TagFamily, TagPresence, TagWriter};

/// Key of a [`ScanResult`] entry.
///
/// The album entry has its own variant, so it can never collide with a file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanKey {
    Track(PathBuf),
    Album,
}

impl Serialize for ScanKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Track(path) => serializer.serialize_str(&path.to_string_lossy()),
            Self::Album => serializer.serialize_str("<album>"),
        }
    }
}

/// Step at which a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Format detection or reading existing tags
    Inspect,
    Measure,
    Write,
}

/// One file that could not be processed. Siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub stage: FailureStage,
    pub message: String,
}

impl FileFailure {
    fn new(path: &Path, stage: FailureStage, error: &Error) -> Self {
        Self {
            path: path.to_path_buf(),
            stage,
            message: error.to_string(),
        }
    }
}

/// Measurements of one batch, plus the album aggregate when requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    measurements: BTreeMap<ScanKey, LoudnessMeasurement>,
    /// Files whose inspection or measurement failed
    pub failures: Vec<FileFailure>,
}

impl ScanResult {
    pub fn track(&self, path: &Path) -> Option<&LoudnessMeasurement> {
        self.measurements.get(&ScanKey::Track(path.to_path_buf()))
    }

    pub fn album(&self) -> Option<&LoudnessMeasurement> {
        self.measurements.get(&ScanKey::Album)
    }

    /// Per-file measurements, sorted by path.
    pub fn tracks(&self) -> impl Iterator<Item = (&Path, &LoudnessMeasurement)> {
        self.measurements.iter().filter_map(|(key, m)| match key {
            ScanKey::Track(path) => Some((path.as_path(), m)),
            ScanKey::Album => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &ScanKey> {
        self.measurements.keys()
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    fn insert_track(&mut self, path: PathBuf, measurement: LoudnessMeasurement) {
        self.measurements.insert(ScanKey::Track(path), measurement);
    }

    /// Aggregate every track measurement into the album entry.
    fn aggregate_album(&mut self) -> Result<()> {
        let tracks: Vec<LoudnessMeasurement> = self.tracks().map(|(_, m)| *m).collect();
        let album = album::aggregate(&tracks)?;
        self.measurements.insert(ScanKey::Album, album);
        Ok(())
    }
}

impl Serialize for ScanResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Tracks<'a>(&'a ScanResult);

        impl Serialize for Tracks<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(None)?;
                for (path, m) in self.0.tracks() {
                    map.serialize_entry(&path.to_string_lossy(), m)?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("ScanResult", 3)?;
        state.serialize_field("tracks", &Tracks(self))?;
        state.serialize_field("album", &self.album())?;
        state.serialize_field("failures", &self.failures)?;
        state.end()
    }
}

/// Switches for [`ScanOrchestrator::process`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Aggregate and write album gain
    pub album_gain: bool,
    /// Leave files that are already tagged alone
    pub skip_tagged: bool,
    /// Measure and report, but write nothing
    pub dry_run: bool,
}

/// Outcome of processing one album.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    /// Directory the album was read from, in recursive mode
    pub directory: Option<PathBuf>,
    pub result: ScanResult,
    /// Files whose tags were written
    pub written: Vec<PathBuf>,
    /// Files left untouched because they were already tagged
    pub skipped: Vec<PathBuf>,
    /// Files that failed to tag
    pub write_failures: Vec<FileFailure>,
}

impl ProcessReport {
    /// Every failure of this album, in stage order.
    pub fn failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.result.failures.iter().chain(&self.write_failures)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Per-file state gathered before measuring.
struct Candidate {
    path: PathBuf,
    family: TagFamily,
    presence: TagPresence,
}

/// Drives measurement, album aggregation and tag writing.
pub struct ScanOrchestrator<S, W> {
    source: S,
    writer: W,
    pool: ThreadPool,
}

impl<S: LoudnessSource, W: TagWriter> ScanOrchestrator<S, W> {
    /// Create an orchestrator measuring on `threads` workers (0 = one per CPU).
    pub fn new(source: S, writer: W, threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("r128tag-measure-{}", i))
            .build()
            .map_err(|e| Error::config(format!("failed to build measurement pool: {}", e)))?;
        Ok(Self {
            source,
            writer,
            pool,
        })
    }

    /// Number of measurement workers.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Measure `files` as one batch without touching any tags.
    ///
    /// Duplicate paths are measured once. A file that fails to measure is
    /// reported in [`ScanResult::failures`] and does not stop the others.
    pub fn scan(&self, files: &[PathBuf], album_gain: bool) -> ScanResult {
        let files = unique(files);
        let mut result = self.measure_all(&files);
        if album_gain {
            self.aggregate(&mut result);
        }
        result
    }

    /// Measure every album found under `roots`, one directory per album.
    pub fn scan_recursive(&self, roots: &[PathBuf], album_gain: bool) -> Vec<(PathBuf, ScanResult)> {
        walk::album_groups(roots)
            .into_iter()
            .map(|(dir, files)| {
                debug!(target: "scanner", dir = %dir.display(), files = files.len(), "Scanning album");
                let result = self.scan(&files, album_gain);
                (dir, result)
            })
            .collect()
    }

    /// Measure `files` as one album and write their gain tags.
    pub fn process(&self, files: &[PathBuf], options: ProcessOptions) -> ProcessReport {
        let files = unique(files);
        let mut report = ProcessReport::default();

        let mut failures = Vec::new();
        let candidates: Vec<Candidate> = files
            .iter()
            .filter_map(|path| match self.inspect(path, options.skip_tagged) {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    warn!(target: "scanner", path = %path.display(), error = %e, "Cannot inspect file");
                    failures.push(FileFailure::new(path, FailureStage::Inspect, &e));
                    None
                }
            })
            .collect();

        let to_measure = select_for_measurement(&candidates, options);
        for candidate in &candidates {
            if !to_measure.contains(&candidate.path) {
                debug!(target: "scanner", path = %candidate.path.display(), "Already tagged, skipping");
                report.skipped.push(candidate.path.clone());
            }
        }

        let mut result = self.measure_all(&to_measure);
        if options.album_gain {
            self.aggregate(&mut result);
        }
        failures.append(&mut result.failures);
        result.failures = failures;

        for candidate in &candidates {
            let Some(track) = result.track(&candidate.path) else {
                continue;
            };
            let track = (!options.skip_tagged || !candidate.presence.track).then_some(track);
            let gains = GainTagSet::compute(candidate.family, track, result.album());
            if gains.is_empty() {
                report.skipped.push(candidate.path.clone());
                continue;
            }

            if options.dry_run {
                info!(
                    target: "scanner",
                    path = %candidate.path.display(),
                    track = ?gains.track,
                    album = ?gains.album,
                    "Dry run, not writing"
                );
                continue;
            }

            match self.writer.write(&candidate.path, candidate.family, &gains) {
                Ok(()) => report.written.push(candidate.path.clone()),
                Err(e) => {
                    warn!(target: "scanner", path = %candidate.path.display(), error = %e, "Tag write failed");
                    report
                        .write_failures
                        .push(FileFailure::new(&candidate.path, FailureStage::Write, &e));
                }
            }
        }

        report.skipped.sort();
        report.result = result;
        info!(
            target: "scanner",
            measured = report.result.tracks().count(),
            written = report.written.len(),
            skipped = report.skipped.len(),
            failed = report.failures().count(),
            "Album processed"
        );
        report
    }

    /// Process every album found under `roots`, one directory per album.
    pub fn process_recursive(&self, roots: &[PathBuf], options: ProcessOptions) -> Vec<ProcessReport> {
        walk::album_groups(roots)
            .into_iter()
            .map(|(dir, files)| {
                debug!(target: "scanner", dir = %dir.display(), files = files.len(), "Processing album");
                let mut report = self.process(&files, options);
                report.directory = Some(dir);
                report
            })
            .collect()
    }

    fn inspect(&self, path: &Path, skip_tagged: bool) -> Result<Candidate> {
        let family = self
            .writer
            .family(path)?
            .ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))?;
        let presence = if skip_tagged {
            self.writer.has_tags(path)?
        } else {
            TagPresence::default()
        };
        Ok(Candidate {
            path: path.to_path_buf(),
            family,
            presence,
        })
    }

    /// Measure `files` in parallel.
    fn measure_all(&self, files: &[PathBuf]) -> ScanResult {
        let outcomes: Vec<(&PathBuf, Result<LoudnessMeasurement>)> = self.pool.install(|| {
            files
                .par_iter()
                .map(|path| (path, self.source.measure(path)))
                .collect()
        });

        let mut result = ScanResult::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(measurement) => result.insert_track(path.clone(), measurement),
                Err(e) => {
                    warn!(target: "scanner", path = %path.display(), error = %e, "Measurement failed");
                    result
                        .failures
                        .push(FileFailure::new(path, FailureStage::Measure, &e));
                }
            }
        }
        result
    }

    fn aggregate(&self, result: &mut ScanResult) {
        if result.tracks().next().is_none() {
            debug!(target: "scanner::album", "No measurements, no album gain");
            return;
        }
        if !result.failures.is_empty() {
            warn!(
                target: "scanner::album",
                failed = result.failures.len(),
                "Album gain computed without the files that failed"
            );
        }
        match result.aggregate_album() {
            Ok(()) => {
                if let Some(album) = result.album() {
                    debug!(
                        target: "scanner::album",
                        loudness = album.loudness_lufs,
                        peak = ?album.true_peak_dbtp,
                        "Album aggregated"
                    );
                }
            }
            Err(e) => warn!(target: "scanner::album", error = %e, "Album aggregation failed"),
        }
    }
}

/// Files that need a fresh measurement under `options`.
fn select_for_measurement(candidates: &[Candidate], options: ProcessOptions) -> Vec<PathBuf> {
    let needs_measurement = |c: &Candidate| {
        if !options.skip_tagged {
            return true;
        }
        if options.album_gain {
            // Album loudness needs every track once any album tag is missing
            !candidates.iter().all(|c| c.presence.track && c.presence.album)
        } else {
            !c.presence.track
        }
    };
    candidates
        .iter()
        .filter(|c| needs_measurement(c))
        .map(|c| c.path.clone())
        .collect()
}

/// Sorted, deduplicated copy of `files`.
fn unique(files: &[PathBuf]) -> Vec<PathBuf> {
    files
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
