//! Events parsed from a running FFmpeg render.

use crate::log_parser::parse_time_str;

#[derive(Debug, Clone, PartialEq)]
pub enum FfmpegEvent {
  ParsedVersion(FfmpegVersion),
  ParsedInput(FfmpegInput),
  ParsedDuration(FfmpegDuration),
  ParsedOutput(FfmpegOutput),
  Progress(FfmpegProgress),
  Log(LogLevel, String),
  LogEOF,
  /// An error that didn't originate from the ffmpeg logs
  Error(String),
}

/// Severity prefix FFmpeg writes when run with `-loglevel level+info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
  Info,
  Warning,
  Error,
  Fatal,
  Unknown,
}

impl LogLevel {
  pub fn is_error(self) -> bool {
    matches!(self, LogLevel::Error | LogLevel::Fatal)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegVersion {
  pub version: String,
  pub raw_log_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegInput {
  pub index: u32,
  pub raw_log_message: String,
}

/// `Duration:` line of an input section, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegDuration {
  pub input_index: u32,
  pub duration: f64,
  pub raw_log_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegOutput {
  pub to: String,
  pub index: u32,
  pub raw_log_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegProgress {
  /// index of the current output frame
  pub frame: u32,

  /// frames per second
  pub fps: f32,

  /// Current total size of the output in kilobytes
  pub size_kb: u32,

  /// The raw time string in a format like `00:03:29.04`
  pub time: String,

  /// Processing speed as a ratio of the input duration
  ///
  /// - 1x is realtime
  /// - 2x means 2 seconds of input are processed in 1 second of wall clock time
  pub speed: f32,

  /// The line that this progress was parsed from
  pub raw_log_message: String,
}

impl FfmpegProgress {
  /// Output position in seconds; `None` for the placeholder values FFmpeg
  /// prints before the first frame (`N/A`, negative times).
  pub fn time_secs(&self) -> Option<f64> {
    parse_time_str(&self.time).filter(|t| *t >= 0.0)
  }
}
