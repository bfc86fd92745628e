//! Runtime configuration.
//!
//! Values are resolved in this order, highest priority first:
//! 1. Command-line flags
//! 2. Environment variables (wired up by the CLI)
//! 3. TOML config file (`--config`, or `shorts.toml` in the working directory)
//! 4. Compiled defaults

use std::{
  fs,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  paths::ffmpeg_path,
  retry::RetryPolicy,
};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "shorts.toml";

/// File name of the background image inside the backgrounds directory.
pub const DEFAULT_BACKGROUND: &str = "default_bg.jpg";

/// The resumable upload protocol requires chunks in multiples of 256 KiB.
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub paths: PathsConfig,
  pub render: RenderConfig,
  pub upload: UploadConfig,
  pub watch: WatchConfig,
  pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
  pub media_root: PathBuf,
  /// Watched directory. Defaults to `<media_root>/music/to_process`.
  pub to_process: Option<PathBuf>,
  /// Archive for finished audio. Defaults to `<media_root>/music/processed`.
  pub processed: Option<PathBuf>,
  /// Where rendered videos are written. Defaults to the archive directory.
  pub output_dir: Option<PathBuf>,
  /// Defaults to `<media_root>/backgrounds`.
  pub backgrounds: Option<PathBuf>,
  /// Defaults to `<backgrounds>/default_bg.jpg`.
  pub background: Option<PathBuf>,
  pub history_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
  /// Explicit FFmpeg binary; see [`crate::paths::ffmpeg_path`] for the fallback.
  pub ffmpeg: Option<PathBuf>,
  pub width: u32,
  pub height: u32,
  pub fps: u32,
  /// Audio longer than this is cut off.
  pub max_duration_secs: u32,
  pub video_codec: String,
  pub audio_codec: String,
  pub preset: String,
  /// Fontconfig family name, used when `font_file` is not set.
  pub font: String,
  pub font_file: Option<PathBuf>,
  pub title_size: u32,
  pub caption_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
  pub api_base: String,
  pub token_file: PathBuf,
  pub privacy_status: String,
  pub category_id: String,
  pub notify_subscribers: bool,
  pub made_for_kids: bool,
  /// Bytes per resumable-upload request, rounded down to [`CHUNK_GRANULARITY`].
  pub chunk_size: u64,
  pub timeout_secs: u64,
  pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// How long a new file's size must stay unchanged before it is picked up.
  pub settle_ms: u64,
  /// Queue files already sitting in the watched directory at startup.
  pub scan_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
  pub default_description: String,
  pub default_tags: Vec<String>,
}

impl Default for PathsConfig {
  fn default() -> Self {
    Self {
      media_root: PathBuf::from("media"),
      to_process: None,
      processed: None,
      output_dir: None,
      backgrounds: None,
      background: None,
      history_file: PathBuf::from("upload_log.json"),
    }
  }
}

impl Default for RenderConfig {
  fn default() -> Self {
    Self {
      ffmpeg: None,
      width: 1080,
      height: 1920,
      fps: 30,
      max_duration_secs: 60,
      video_codec: "libx264".to_string(),
      audio_codec: "aac".to_string(),
      preset: "medium".to_string(),
      font: "Arial".to_string(),
      font_file: None,
      title_size: 80,
      caption_size: 50,
    }
  }
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self {
      api_base: "https://www.googleapis.com".to_string(),
      token_file: PathBuf::from("token.json"),
      privacy_status: "private".to_string(),
      category_id: "10".to_string(),
      notify_subscribers: true,
      made_for_kids: false,
      chunk_size: 32 * CHUNK_GRANULARITY,
      timeout_secs: 300,
      retry: RetryPolicy::default(),
    }
  }
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self {
      settle_ms: 500,
      scan_existing: false,
    }
  }
}

impl Default for MetadataConfig {
  fn default() -> Self {
    Self {
      default_description: "Check out this awesome Short! #shorts".to_string(),
      default_tags: ["shorts", "viral", "trending"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

impl PathsConfig {
  fn music_dir(&self) -> PathBuf {
    self.media_root.join("music")
  }

  pub fn to_process_dir(&self) -> PathBuf {
    self
      .to_process
      .clone()
      .unwrap_or_else(|| self.music_dir().join("to_process"))
  }

  pub fn processed_dir(&self) -> PathBuf {
    self
      .processed
      .clone()
      .unwrap_or_else(|| self.music_dir().join("processed"))
  }

  pub fn output_dir(&self) -> PathBuf {
    self
      .output_dir
      .clone()
      .unwrap_or_else(|| self.processed_dir())
  }

  pub fn backgrounds_dir(&self) -> PathBuf {
    self
      .backgrounds
      .clone()
      .unwrap_or_else(|| self.media_root.join("backgrounds"))
  }

  pub fn background_path(&self) -> PathBuf {
    self
      .background
      .clone()
      .unwrap_or_else(|| self.backgrounds_dir().join(DEFAULT_BACKGROUND))
  }
}

impl RenderConfig {
  /// The FFmpeg executable to spawn.
  pub fn ffmpeg_exe(&self) -> PathBuf {
    self.ffmpeg.clone().unwrap_or_else(ffmpeg_path)
  }
}

impl UploadConfig {
  /// Chunk size actually used on the wire.
  pub fn effective_chunk_size(&self) -> u64 {
    (self.chunk_size / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
  }
}

impl Config {
  /// Parse a TOML config file. Missing sections and keys keep their defaults.
  pub fn from_file(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path)
      .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
  }

  /// Load the explicit config file if one was given, else `shorts.toml` if it
  /// exists, else the defaults.
  pub fn load(explicit: Option<&Path>) -> Result<Self> {
    match explicit {
      Some(path) => Self::from_file(path),
      None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
        Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
      }
      None => Ok(Self::default()),
    }
  }

  /// Reject values FFmpeg or the upload service would refuse later on.
  pub fn validate(&self) -> Result<()> {
    let render = &self.render;
    if render.width == 0 || render.height == 0 {
      return Err(Error::Config("render size must be non-zero".into()));
    }
    // yuv420p needs even dimensions
    if render.width % 2 != 0 || render.height % 2 != 0 {
      return Err(Error::Config(format!(
        "render size {}x{} must have even dimensions",
        render.width, render.height
      )));
    }
    if render.fps == 0 {
      return Err(Error::Config("fps must be positive".into()));
    }
    if render.max_duration_secs == 0 {
      return Err(Error::Config("max_duration_secs must be positive".into()));
    }
    if self.upload.retry.max_attempts == 0 {
      return Err(Error::Config("retry.max_attempts must be at least 1".into()));
    }
    if self.upload.retry.multiplier < 1.0 {
      return Err(Error::Config("retry.multiplier must be >= 1.0".into()));
    }
    Ok(())
  }
}
