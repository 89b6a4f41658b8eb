//! Raw OpusHead output gain command.

use std::path::Path;
use std::process::ExitCode;

use super::exit_code;
use crate::gain::q7dot8_to_float;
use crate::opus;

/// Print the output gain of an Opus file, or set it to `set`
pub fn cmd_opus_gain(path: &Path, set: Option<i16>) -> anyhow::Result<ExitCode> {
    if let Some(gain) = set {
        let written = set_output_gain(path, gain)?;
        return Ok(exit_code(!written));
    }

    match opus::read_file_output_gain(path)? {
        Some(gain) => {
            println!(
                "{}: output gain {} ({:+.2} dB)",
                path.display(),
                gain,
                q7dot8_to_float(gain)
            );
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("{} is not an Ogg Opus file", path.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Write `gain`, returning `false` when the file was left alone as damaged.
fn set_output_gain(path: &Path, gain: i16) -> anyhow::Result<bool> {
    match opus::write_file_output_gain(path, gain) {
        Ok(()) => {
            println!(
                "{}: output gain set to {} ({:+.2} dB)",
                path.display(),
                gain,
                q7dot8_to_float(gain)
            );
            Ok(true)
        }
        Err(e) if e.is_malformed() => {
            eprintln!("{}: output gain not changed", path.display());
            eprintln!("  {}", e);
            eprintln!(
                "  The first Ogg page failed its checksum before any edit, so the file \
                 may be damaged. Re-encode or repair it first."
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
