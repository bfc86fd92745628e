//! Parsing of FFmpeg's stderr while a Short is rendering.

use std::io::{BufRead, BufReader, ErrorKind, Read};

use crate::event::{
  FfmpegDuration, FfmpegEvent, FfmpegInput, FfmpegOutput, FfmpegProgress, FfmpegVersion, LogLevel,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum LogSection {
  Input(u32),
  Output(u32),
  Other,
}

pub struct FfmpegLogParser<R: Read> {
  reader: BufReader<R>,
  cur_section: LogSection,
}

impl<R: Read> FfmpegLogParser<R> {
  /// Consume one line from the inner reader and classify it.
  ///
  /// Lines end at `\n`, `\r\n`, or a bare `\r` (progress updates overwrite
  /// the previous line that way). Blank lines are skipped.
  pub fn parse_next_event(&mut self) -> anyhow::Result<FfmpegEvent> {
    let mut buf = Vec::<u8>::new();
    let bytes_read = read_log_line(&mut self.reader, &mut buf)?;
    if bytes_read == 0 {
      return Ok(FfmpegEvent::LogEOF);
    }

    // Titles and paths can carry any bytes; never stop draining stderr over them.
    let text = String::from_utf8_lossy(&buf);
    let line = text.trim();
    let raw_log_message = line.to_string();

    if let Some(index) = try_parse_input(line) {
      self.cur_section = LogSection::Input(index);
      return Ok(FfmpegEvent::ParsedInput(FfmpegInput {
        index,
        raw_log_message,
      }));
    }
    if let Some(output) = try_parse_output(line) {
      self.cur_section = LogSection::Output(output.index);
      return Ok(FfmpegEvent::ParsedOutput(output));
    }

    if let Some(version) = try_parse_version(line) {
      return Ok(FfmpegEvent::ParsedVersion(FfmpegVersion {
        version,
        raw_log_message,
      }));
    }
    if let Some(duration) = try_parse_duration(line) {
      if let LogSection::Input(input_index) = self.cur_section {
        return Ok(FfmpegEvent::ParsedDuration(FfmpegDuration {
          input_index,
          duration,
          raw_log_message,
        }));
      }
    }
    if let Some(progress) = try_parse_progress(line) {
      self.cur_section = LogSection::Other;
      return Ok(FfmpegEvent::Progress(progress));
    }

    Ok(FfmpegEvent::Log(try_parse_level(line), raw_log_message))
  }

  pub fn new(inner: R) -> Self {
    Self {
      reader: BufReader::new(inner),
      cur_section: LogSection::Other,
    }
  }
}

/// Read one non-empty line into `buf`, without its terminator. Returns the
/// number of bytes stored; `0` means end of stream.
fn read_log_line<R: BufRead + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize> {
  loop {
    let available = match reader.fill_buf() {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    };
    if available.is_empty() {
      return Ok(buf.len());
    }

    let mut used = 0;
    let mut done = false;
    for &byte in available {
      used += 1;
      if byte == b'\n' || byte == b'\r' {
        if buf.is_empty() {
          continue;
        }
        done = true;
        break;
      }
      buf.push(byte);
    }
    reader.consume(used);

    if done {
      return Ok(buf.len());
    }
  }
}

/// Severity from the `[level]` prefix produced by `-loglevel level+info`.
///
/// ```rust
/// use shorts_uploader::{event::LogLevel, log_parser::try_parse_level};
/// assert_eq!(try_parse_level("[error] No such file or directory"), LogLevel::Error);
/// assert_eq!(try_parse_level("[fontconfig @ 0x1] [warning] fallback font"), LogLevel::Warning);
/// assert_eq!(try_parse_level("plain text"), LogLevel::Unknown);
/// ```
pub fn try_parse_level(line: &str) -> LogLevel {
  if line.contains("[fatal]") {
    LogLevel::Fatal
  } else if line.contains("[error]") {
    LogLevel::Error
  } else if line.contains("[warning]") {
    LogLevel::Warning
  } else if line.contains("[info]") {
    LogLevel::Info
  } else {
    LogLevel::Unknown
  }
}

/// Parses the ffmpeg version string, typically the very first line of output:
///
/// ```rust
/// use shorts_uploader::log_parser::try_parse_version;
///
/// let line = "[info] ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers\n";
/// assert_eq!(try_parse_version(line).unwrap(), "6.1.1-3ubuntu5");
/// ```
pub fn try_parse_version(string: &str) -> Option<String> {
  string
    .strip_prefix("[info]")
    .unwrap_or(string)
    .trim()
    .strip_prefix("ffmpeg version ")?
    .split_whitespace()
    .next()
    .map(|s| s.to_string())
}

/// Index of an input section header.
///
/// ```rust
/// use shorts_uploader::log_parser::try_parse_input;
/// let line = "[info] Input #1, mp3, from 'media/music/to_process/track.mp3':\n";
/// assert_eq!(try_parse_input(line), Some(1));
/// ```
pub fn try_parse_input(string: &str) -> Option<u32> {
  string
    .strip_prefix("[info]")
    .unwrap_or(string)
    .trim()
    .strip_prefix("Input #")?
    .split(',')
    .next()
    .and_then(|s| s.trim().parse::<u32>().ok())
}

/// Duration of the current input, in seconds.
///
/// ```rust
/// use shorts_uploader::log_parser::try_parse_duration;
/// let line = "[info]   Duration: 00:03:12.50, start: 0.025057, bitrate: 320 kb/s\n";
/// assert_eq!(try_parse_duration(line), Some(192.5));
///
/// let unknown = "[info]   Duration: N/A, start: 0.000000, bitrate: N/A\n";
/// assert_eq!(try_parse_duration(unknown), None);
/// ```
pub fn try_parse_duration(string: &str) -> Option<f64> {
  string
    .strip_prefix("[info]")
    .unwrap_or(string)
    .trim()
    .strip_prefix("Duration:")?
    .trim()
    .split(',')
    .next()
    .and_then(parse_time_str)
}

/// Parse an output section header.
///
/// ```rust
/// use shorts_uploader::log_parser::try_parse_output;
/// let line = "[info] Output #0, mp4, to 'media/music/processed/track_short.mp4':\n";
/// let output = try_parse_output(line).unwrap();
/// assert_eq!(output.index, 0);
/// assert_eq!(output.to, "media/music/processed/track_short.mp4");
/// ```
pub fn try_parse_output(mut string: &str) -> Option<FfmpegOutput> {
  let raw_log_message = string.to_string();

  string = string
    .strip_prefix("[info]")
    .unwrap_or(string)
    .trim()
    .strip_prefix("Output #")?;

  let index = string
    .split(',')
    .next()
    .and_then(|s| s.trim().parse::<u32>().ok())?;

  let to = string.split(" to '").nth(1)?.rsplit_once('\'')?.0.to_string();

  Some(FfmpegOutput {
    index,
    to,
    raw_log_message,
  })
}

/// Parse a progress update line from ffmpeg.
///
/// ```rust
/// use shorts_uploader::log_parser::try_parse_progress;
/// let line = "[info] frame=  912 fps= 61 q=29.0 size=    2304KiB time=00:00:30.33 bitrate= 622.3kbits/s speed=2.02x\n";
/// let progress = try_parse_progress(line).unwrap();
/// assert_eq!(progress.frame, 912);
/// assert_eq!(progress.fps, 61.0);
/// assert_eq!(progress.size_kb, 2304);
/// assert_eq!(progress.time, "00:00:30.33");
/// assert_eq!(progress.speed, 2.02);
/// ```
pub fn try_parse_progress(mut string: &str) -> Option<FfmpegProgress> {
  let raw_log_message = string.to_string();

  string = string.strip_prefix("[info]").unwrap_or(string).trim();

  let frame = value_after(string, "frame=")?.parse::<u32>().ok()?;
  let fps = value_after(string, "fps=")?.parse::<f32>().ok()?;
  let size_kb = value_after(string, "size=") // captures "Lsize=" AND "size="
    .and_then(|s| {
      s.strip_suffix("KiB") // FFmpeg v7.0 and later
        .or_else(|| s.strip_suffix("kB")) // FFmpeg v6.0 and prior
    })?
    .parse::<u32>()
    .ok()?;
  let time = value_after(string, "time=")?.to_string();
  let speed = value_after(string, "speed=")?
    .strip_suffix('x')
    .and_then(|s| s.parse::<f32>().ok())
    .unwrap_or(0.0); // handles "N/A"

  Some(FfmpegProgress {
    frame,
    fps,
    size_kb,
    time,
    speed,
    raw_log_message,
  })
}

/// First whitespace-delimited token after `key`, skipping the padding FFmpeg
/// puts between `=` and the value.
fn value_after<'a>(string: &'a str, key: &str) -> Option<&'a str> {
  string.split(key).nth(1)?.split_whitespace().next()
}

/// Parse a time string in the format `HOURS:MM:SS.MILLISECONDS` into a number of seconds.
///
/// <https://trac.ffmpeg.org/wiki/Seeking#Timeunitsyntax>
///
/// ```rust
/// use shorts_uploader::log_parser::parse_time_str;
/// assert_eq!(parse_time_str("00:00:00.00"), Some(0.0));
/// assert_eq!(parse_time_str("5"), Some(5.0));
/// assert_eq!(parse_time_str("1:01.0"), Some(61.0));
/// assert_eq!(parse_time_str("1:01:01.5"), Some(3661.5));
/// assert_eq!(parse_time_str("N/A"), None);
/// ```
pub fn parse_time_str(str: &str) -> Option<f64> {
  let mut seconds = 0.0;
  let mut scale = 1.0;
  for part in str.split(':').rev().take(3) {
    seconds += part.parse::<f64>().ok()? * scale;
    scale *= 60.0;
  }
  Some(seconds)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn parse_all(stderr: &str) -> Vec<FfmpegEvent> {
    let mut parser = FfmpegLogParser::new(Cursor::new(stderr.as_bytes().to_vec()));
    let mut events = Vec::new();
    loop {
      match parser.parse_next_event().unwrap() {
        FfmpegEvent::LogEOF => break,
        event => events.push(event),
      }
    }
    events
  }

  #[test]
  fn test_render_log_sections() {
    let stderr = "[info] ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers\n\
      [info] Input #0, image2, from '/tmp/.tmpX1y2Z3.jpg':\n\
      [info]   Duration: 00:00:00.04, start: 0.000000, bitrate: 40960 kb/s\n\
      [info] Input #1, mp3, from 'media/music/to_process/track.mp3':\n\
      [info]   Duration: 00:02:14.50, start: 0.025057, bitrate: 192 kb/s\n\
      [info] Output #0, mp4, to 'media/music/processed/track_short.mp4':\n\
      [info] frame=   45 fps=0.0 q=29.0 size=       0KiB time=00:00:01.43 bitrate=   0.3kbits/s speed=2.85x\r\
      [info] frame=  120 fps=118 q=29.0 size=     256KiB time=00:00:03.93 bitrate= 533.1kbits/s speed=3.87x\r\
      [warning] deprecated pixel format used\n";

    let events = parse_all(stderr);
    assert!(matches!(&events[0], FfmpegEvent::ParsedVersion(v) if v.version == "6.1.1"));
    assert!(matches!(&events[1], FfmpegEvent::ParsedInput(i) if i.index == 0));
    assert!(matches!(&events[2], FfmpegEvent::ParsedDuration(d) if d.input_index == 0));
    assert!(matches!(&events[3], FfmpegEvent::ParsedInput(i) if i.index == 1));
    assert!(matches!(
      &events[4],
      FfmpegEvent::ParsedDuration(d) if d.input_index == 1 && d.duration == 134.5
    ));
    assert!(matches!(&events[5], FfmpegEvent::ParsedOutput(o) if o.index == 0));
    assert!(matches!(&events[6], FfmpegEvent::Progress(p) if p.frame == 45));
    assert!(matches!(&events[7], FfmpegEvent::Progress(p) if p.frame == 120));
    assert!(matches!(&events[8], FfmpegEvent::Log(LogLevel::Warning, _)));
    assert_eq!(events.len(), 9);
  }

  #[test]
  fn test_failed_render_surfaces_errors() {
    let stderr = "[info] ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers\r\n\
      [error] media/music/to_process/gone.mp3: No such file or directory\r\n";

    let errors: Vec<String> = parse_all(stderr)
      .into_iter()
      .filter_map(|event| match event {
        FfmpegEvent::Log(level, msg) if level.is_error() => Some(msg),
        _ => None,
      })
      .collect();
    assert_eq!(
      errors,
      vec!["[error] media/music/to_process/gone.mp3: No such file or directory"]
    );
  }

  #[test]
  fn test_duration_outside_input_section_is_plain_log() {
    let events = parse_all("[info]   Duration: 00:00:05.00, start: 0.000000\n");
    assert!(matches!(&events[0], FfmpegEvent::Log(LogLevel::Info, _)));
  }

  #[test]
  fn test_blank_lines_and_mixed_endings() {
    let mut reader = Cursor::new(b"\r\n\r\nfirst\r\rsecond\nthird".to_vec());
    let mut lines = Vec::new();
    loop {
      let mut buf = Vec::new();
      if read_log_line(&mut reader, &mut buf).unwrap() == 0 {
        break;
      }
      lines.push(String::from_utf8(buf).unwrap());
    }
    assert_eq!(lines, vec!["first", "second", "third"]);
  }

  /// The string format for `Lsize` units went from `kB` to `KiB` in FFmpeg 7.0
  #[test]
  fn test_parse_progress_v7() {
    let line = "[info] frame=    5 fps=0.0 q=-1.0 Lsize=      10KiB time=00:00:03.00 bitrate=  27.2kbits/s speed= 283x\n";
    let progress = try_parse_progress(line).unwrap();
    assert_eq!(progress.frame, 5);
    assert_eq!(progress.size_kb, 10);
    assert_eq!(progress.time_secs(), Some(3.0));
    assert_eq!(progress.speed, 283.0);
  }

  /// First progress message can carry `bitrate=N/A` and `speed=N/A`
  #[test]
  fn test_parse_progress_empty() {
    let line =
      "[info] frame=    0 fps=0.0 q=-0.0 size=       0kB time=-577014:32:22.77 bitrate=N/A speed=N/A\n";
    let progress = try_parse_progress(line).unwrap();
    assert_eq!(progress.frame, 0);
    assert_eq!(progress.size_kb, 0);
    assert_eq!(progress.speed, 0.0);
    assert_eq!(progress.time_secs(), None);
  }
}
