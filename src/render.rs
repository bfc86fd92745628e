//! Turn an audio track into a vertical Short with FFmpeg.

use std::{
  fs,
  io::{self, Write},
  path::{Path, PathBuf},
};

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info, warn};

use crate::{
  background::{prepare_background, write_jpeg, JPEG_QUALITY},
  command::FfmpegCommand,
  config::RenderConfig,
  error::{Error, Result},
  event::{FfmpegEvent, LogLevel},
};

/// Widest the title block may get, in pixels.
pub const TITLE_WRAP_PX: u32 = 1000;
/// Widest the caption block may get, in pixels.
pub const CAPTION_WRAP_PX: u32 = 900;
/// Rough advance of one glyph relative to the font size.
const GLYPH_WIDTH_RATIO: f32 = 0.55;

/// Everything needed to render one Short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
  pub audio: PathBuf,
  pub output: PathBuf,
  pub title: String,
  pub caption: String,
}

/// Produces a video file for a [`RenderRequest`].
pub trait Renderer: Send {
  /// Render the request, returning the path of the finished video.
  fn render(&self, request: &RenderRequest) -> Result<PathBuf>;
}

/// Renders with a static background, a title near the top and a caption near
/// the bottom, trimmed to the configured maximum length.
#[derive(Debug, Clone)]
pub struct ShortsRenderer {
  config: RenderConfig,
  background: PathBuf,
}

impl ShortsRenderer {
  pub fn new(config: RenderConfig, background: impl Into<PathBuf>) -> Self {
    Self {
      config,
      background: background.into(),
    }
  }

  pub fn background(&self) -> &Path {
    &self.background
  }

  fn build_command(
    &self,
    background: &Path,
    audio: &Path,
    filtergraph: &str,
    output: &Path,
  ) -> FfmpegCommand {
    let config = &self.config;
    let mut command = FfmpegCommand::new_with_exe(config.ffmpeg_exe());
    command
      .hide_banner()
      .no_stdin()
      .loop_image()
      .framerate(config.fps)
      .input(background)
      .input(audio)
      .filter_complex(filtergraph)
      .map("[v]")
      .map("1:a")
      .codec_video(&config.video_codec)
      .preset(&config.preset)
      .pix_fmt("yuv420p")
      .codec_audio(&config.audio_codec)
      .rate(config.fps)
      .duration(config.max_duration_secs)
      .shortest()
      .faststart()
      .overwrite()
      .arg(output);
    command
  }

  /// Spawn FFmpeg and drain its events until it exits.
  fn run(&self, mut command: FfmpegCommand, output: &Path) -> Result<()> {
    let exe = command.as_inner().get_program().to_string_lossy().into_owned();
    let mut child = command
      .spawn()
      .map_err(|e| Error::Render(format!("failed to start {exe}: {e}")))?;
    let iter = child.iter().map_err(|e| Error::Render(e.to_string()))?;

    let max = self.config.max_duration_secs as f64;
    let mut total: Option<f64> = None;
    let mut next_milestone = 25;
    let mut errors: Vec<String> = Vec::new();

    // Drained to the end so the stderr thread never blocks on a full channel.
    for event in iter {
      match event {
        FfmpegEvent::ParsedDuration(d) if d.input_index == 1 => {
          total = Some(d.duration.min(max));
        }
        FfmpegEvent::ParsedOutput(out) => debug!(to = %out.to, "FFmpeg opened output"),
        FfmpegEvent::Progress(progress) => {
          let Some(done) = progress.time_secs() else {
            continue;
          };
          let percent = total
            .filter(|t| *t > 0.0)
            .map(|t| ((done / t) * 100.0).min(100.0) as u32);
          debug!(
            frame = progress.frame,
            fps = progress.fps,
            size_kb = progress.size_kb,
            time = %progress.time,
            speed = progress.speed,
            ?percent,
            "Render progress"
          );
          if let Some(percent) = percent {
            while next_milestone <= 75 && percent >= next_milestone {
              info!(output = %output.display(), "Rendering {next_milestone}%");
              next_milestone += 25;
            }
          }
        }
        FfmpegEvent::Log(LogLevel::Warning, msg) => warn!("[ffmpeg] {msg}"),
        FfmpegEvent::Log(level, msg) if level.is_error() => {
          warn!("[ffmpeg] {msg}");
          errors.push(msg);
        }
        FfmpegEvent::Error(e) => errors.push(e),
        _ => {}
      }
    }

    let status = child
      .wait()
      .map_err(|e| Error::Render(format!("failed to wait for ffmpeg: {e}")))?;
    if !status.success() {
      let detail = if errors.is_empty() {
        String::from("no error output")
      } else {
        errors.join("; ")
      };
      return Err(Error::Render(format!("ffmpeg exited with {status}: {detail}")));
    }
    if !output.is_file() {
      return Err(Error::Render(format!(
        "ffmpeg reported success but {} was not written",
        output.display()
      )));
    }
    Ok(())
  }
}

impl Renderer for ShortsRenderer {
  fn render(&self, request: &RenderRequest) -> Result<PathBuf> {
    if !request.audio.is_file() {
      return Err(Error::missing("Audio file", &request.audio));
    }
    if !self.background.is_file() {
      return Err(Error::missing("Background image", &self.background));
    }
    if let Some(parent) = request.output.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent)?;
    }

    let config = &self.config;
    let prepared = prepare_background(&self.background, config.width, config.height)?;
    let background = Builder::new()
      .prefix("shorts_bg_")
      .suffix(".jpg")
      .tempfile()?;
    write_jpeg(&prepared, background.path(), JPEG_QUALITY)?;

    let title = text_file(&request.title, TITLE_WRAP_PX, config.title_size)?;
    let caption = text_file(&request.caption, CAPTION_WRAP_PX, config.caption_size)?;
    let filtergraph = build_filtergraph(
      config,
      title.as_ref().map(|f| f.path()),
      caption.as_ref().map(|f| f.path()),
    );

    let command = self.build_command(background.path(), &request.audio, &filtergraph, &request.output);
    info!(
      audio = %request.audio.display(),
      output = %request.output.display(),
      "Rendering short"
    );

    // Temporary files are removed when their guards drop, on every path out.
    if let Err(e) = self.run(command, &request.output) {
      match fs::remove_file(&request.output) {
        Ok(()) => debug!(output = %request.output.display(), "Removed partial output"),
        Err(rm) if rm.kind() == io::ErrorKind::NotFound => {}
        Err(rm) => warn!(output = %request.output.display(), error = %rm, "Could not remove partial output"),
      }
      return Err(e);
    }
    info!(output = %request.output.display(), "Render finished");
    Ok(request.output.clone())
  }
}

/// Write wrapped `text` to a temporary file for `drawtext=textfile=`, which
/// sidesteps escaping arbitrary titles inside the filtergraph. Blank text
/// produces no file and no overlay.
fn text_file(text: &str, max_px: u32, font_size: u32) -> Result<Option<NamedTempFile>> {
  if text.trim().is_empty() {
    return Ok(None);
  }
  let mut file = Builder::new().prefix("shorts_text_").suffix(".txt").tempfile()?;
  file.write_all(wrap_text(text, max_px, font_size).as_bytes())?;
  file.flush()?;
  Ok(Some(file))
}

/// The `-filter_complex` graph: scale the looping background to the frame
/// and draw the optional title and caption, labelled `[v]`.
pub fn build_filtergraph(
  config: &RenderConfig,
  title_file: Option<&Path>,
  caption_file: Option<&Path>,
) -> String {
  let mut graph = format!("[0:v]scale={}:{},setsar=1", config.width, config.height);
  if let Some(path) = title_file {
    graph.push(',');
    graph.push_str(&drawtext(config, path, config.title_size, 2, 0.1));
  }
  if let Some(path) = caption_file {
    graph.push(',');
    graph.push_str(&drawtext(config, path, config.caption_size, 1, 0.85));
  }
  graph.push_str("[v]");
  graph
}

fn drawtext(config: &RenderConfig, textfile: &Path, size: u32, border: u32, y_ratio: f32) -> String {
  let font = match &config.font_file {
    Some(file) => format!("fontfile={}", escape_ffmpeg_filter_path(file)),
    None => format!("font={}", config.font),
  };
  format!(
    "drawtext={font}:textfile={}:fontsize={size}:fontcolor=white:borderw={border}:bordercolor=black:x=(w-text_w)/2:y=h*{y_ratio}",
    escape_ffmpeg_filter_path(textfile)
  )
}

/// Escape a filesystem path for use as a filter option value inside a
/// `-filter_complex` graph. Two levels apply: the option value (`\ ' :`),
/// then the graph description (`\ ' [ ] , ;`).
///
/// ```rust
/// use shorts_uploader::render::escape_ffmpeg_filter_path;
/// use std::path::Path;
///
/// assert_eq!(
///   escape_ffmpeg_filter_path(Path::new(r"C:\tmp\it's [a],b;c")),
///   r"C\\:/tmp/it\\\'s \[a\]\,b\;c"
/// );
/// ```
pub fn escape_ffmpeg_filter_path(path: &Path) -> String {
  let normalized = path.to_string_lossy().replace('\\', "/");
  let option_value = escape_chars(&normalized, &['\\', '\'', ':']);
  escape_chars(&option_value, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(value: &str, special: &[char]) -> String {
  let mut escaped = String::with_capacity(value.len() + 8);
  for ch in value.chars() {
    if special.contains(&ch) {
      escaped.push('\\');
    }
    escaped.push(ch);
  }
  escaped
}

/// Greedy word wrap so that a line of `font_size` text stays within roughly
/// `max_px` pixels. Words longer than a line are kept whole.
///
/// ```rust
/// use shorts_uploader::render::wrap_text;
/// // 900px at size 50 fits 32 characters per line
/// assert_eq!(
///   wrap_text("#shorts #shorts #viral #trending #music #lofi", 900, 50),
///   "#shorts #shorts #viral #trending\n#music #lofi"
/// );
/// ```
pub fn wrap_text(text: &str, max_px: u32, font_size: u32) -> String {
  let per_line = ((max_px as f32 / (font_size.max(1) as f32 * GLYPH_WIDTH_RATIO)) as usize).max(1);
  let mut lines: Vec<String> = Vec::new();
  let mut line = String::new();
  for word in text.split_whitespace() {
    if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > per_line {
      lines.push(std::mem::take(&mut line));
    }
    if !line.is_empty() {
      line.push(' ');
    }
    line.push_str(word);
  }
  if !line.is_empty() {
    lines.push(line);
  }
  lines.join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::background::create_gradient_background;

  fn request(dir: &Path) -> RenderRequest {
    RenderRequest {
      audio: dir.join("track.wav"),
      output: dir.join("out").join("track_short.mp4"),
      title: "track".to_string(),
      caption: "#shorts #shorts #viral #trending".to_string(),
    }
  }

  fn write_tone(path: &Path, seconds: u32) {
    let spec = hound::WavSpec {
      channels: 1,
      sample_rate: 8000,
      bits_per_sample: 16,
      sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for t in 0..(8000 * seconds) {
      let sample = ((t as f32 * 440.0 * 2.0 * std::f32::consts::PI / 8000.0).sin() * 8000.0) as i16;
      writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
  }

  #[test]
  fn test_filtergraph_layout() {
    let config = RenderConfig::default();
    let graph = build_filtergraph(
      &config,
      Some(Path::new("/tmp/title.txt")),
      Some(Path::new("/tmp/caption.txt")),
    );
    assert!(graph.starts_with("[0:v]scale=1080:1920,setsar=1,drawtext=font=Arial:textfile=/tmp/title.txt:fontsize=80:"));
    assert!(graph.contains("borderw=2:bordercolor=black:x=(w-text_w)/2:y=h*0.1,"));
    assert!(graph.contains("textfile=/tmp/caption.txt:fontsize=50:fontcolor=white:borderw=1:"));
    assert!(graph.contains("y=h*0.85"));
    assert!(graph.ends_with("[v]"));
  }

  #[test]
  fn test_filtergraph_without_text() {
    let mut config = RenderConfig::default();
    config.font_file = Some(PathBuf::from("C:\\Fonts\\arial.ttf"));
    assert_eq!(build_filtergraph(&config, None, None), "[0:v]scale=1080:1920,setsar=1[v]");

    let graph = build_filtergraph(&config, Some(Path::new("t.txt")), None);
    assert!(graph.contains(r"drawtext=fontfile=C\\:/Fonts/arial.ttf:textfile=t.txt"));
  }

  #[test]
  fn test_filter_path_escaping_is_two_level() {
    // `'` is escaped for the option value, and that escape again for the graph.
    assert_eq!(
      escape_ffmpeg_filter_path(Path::new("/tmp/it's/x.txt")),
      r"/tmp/it\\\'s/x.txt"
    );
    assert_eq!(
      escape_ffmpeg_filter_path(Path::new("/tmp/a:b/x.txt")),
      r"/tmp/a\\:b/x.txt"
    );
    assert_eq!(
      escape_ffmpeg_filter_path(Path::new("/tmp/[v],x;y.txt")),
      r"/tmp/\[v\]\,x\;y.txt"
    );
    assert_eq!(escape_ffmpeg_filter_path(Path::new("/tmp/plain.txt")), "/tmp/plain.txt");
  }

  #[test]
  fn test_wrap_text_keeps_long_words() {
    assert_eq!(wrap_text("", 1000, 80), "");
    assert_eq!(wrap_text("supercalifragilisticexpialidocious", 200, 80), "supercalifragilisticexpialidocious");
    // 1000px at size 80 fits 22 characters per line
    assert_eq!(
      wrap_text("A Really Quite Long Song Title", 1000, 80),
      "A Really Quite Long\nSong Title"
    );
  }

  #[test]
  fn test_blank_text_has_no_file() {
    assert!(text_file("   ", 1000, 80).unwrap().is_none());
    let file = text_file("Hello world", 1000, 80).unwrap().unwrap();
    assert_eq!(fs::read_to_string(file.path()).unwrap(), "Hello world");
  }

  #[test]
  fn test_command_arguments() {
    let renderer = ShortsRenderer::new(RenderConfig::default(), "bg.jpg");
    let command = renderer.build_command(
      Path::new("/tmp/bg.jpg"),
      Path::new("track.mp3"),
      "[0:v]null[v]",
      Path::new("out.mp4"),
    );
    let args: Vec<String> = command
      .get_args()
      .map(|a| a.to_string_lossy().into_owned())
      .collect();
    let joined = args.join(" ");
    assert!(joined.contains("-loop 1 -framerate 30 -i /tmp/bg.jpg -i track.mp3"));
    assert!(joined.contains("-map [v] -map 1:a -c:v libx264 -preset medium -pix_fmt yuv420p -c:a aac"));
    assert!(joined.contains("-r 30 -t 60 -shortest"));
    assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
  }

  #[test]
  fn test_missing_audio_fails_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = ShortsRenderer::new(RenderConfig::default(), dir.path().join("bg.jpg"));
    let err = renderer.render(&request(dir.path())).unwrap_err();
    assert!(matches!(err, Error::InputMissing { what: "Audio file", .. }));
  }

  #[test]
  fn test_missing_background_fails_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("track.wav"), 1);
    let renderer = ShortsRenderer::new(RenderConfig::default(), dir.path().join("bg.jpg"));
    let err = renderer.render(&request(dir.path())).unwrap_err();
    assert!(matches!(err, Error::InputMissing { what: "Background image", .. }));
    assert!(!dir.path().join("out").exists());
  }

  #[test]
  fn test_unstartable_ffmpeg_is_a_render_error() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("track.wav"), 1);
    let bg = dir.path().join("bg.jpg");
    create_gradient_background(&bg).unwrap();

    let config = RenderConfig {
      ffmpeg: Some(dir.path().join("no-such-ffmpeg")),
      ..RenderConfig::default()
    };
    let err = ShortsRenderer::new(config, bg).render(&request(dir.path())).unwrap_err();
    assert!(matches!(err, Error::Render(_)), "{err}");
    assert!(!dir.path().join("out").join("track_short.mp4").exists());
  }

  #[test]
  #[ignore = "requires ffmpeg on PATH"]
  fn test_renders_real_short() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("track.wav"), 2);
    let bg = dir.path().join("bg.jpg");
    create_gradient_background(&bg).unwrap();

    let config = RenderConfig {
      preset: "ultrafast".to_string(),
      ..RenderConfig::default()
    };
    let output = ShortsRenderer::new(config, bg).render(&request(dir.path())).unwrap();
    assert!(fs::metadata(output).unwrap().len() > 0);
  }
}
