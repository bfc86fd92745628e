use std::ffi::OsStr;
use std::process::{Command, Stdio};

use anyhow::Context;

use crate::{event::FfmpegEvent, log_parser::FfmpegLogParser};

/// Run `<path> -version`, parsing the version number and returning it. Fails
/// if the binary cannot be spawned or exits unsuccessfully.
pub fn ffmpeg_version_with_path<S: AsRef<OsStr>>(path: S) -> anyhow::Result<String> {
  let mut cmd = Command::new(&path)
    .arg("-version")
    .stdin(Stdio::null())
    .stderr(Stdio::null())
    .stdout(Stdio::piped()) // not stderr when calling `-version`
    .spawn()
    .with_context(|| format!("Failed to spawn {}", path.as_ref().to_string_lossy()))?;
  let stdout = cmd.stdout.take().context("No standard output channel")?;
  let mut parser = FfmpegLogParser::new(stdout);

  let mut version: Option<String> = None;
  while let Ok(event) = parser.parse_next_event() {
    match event {
      FfmpegEvent::ParsedVersion(v) => version = Some(v.version),
      FfmpegEvent::LogEOF => break,
      _ => {}
    }
  }
  let exit_status = cmd.wait()?;
  anyhow::ensure!(exit_status.success(), "ffmpeg -version exited with {exit_status}");
  version.context("Failed to parse ffmpeg version")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_binary_is_reported() {
    let err = ffmpeg_version_with_path("/nonexistent/bin/ffmpeg-shorts").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/bin/ffmpeg-shorts"));
  }
}
