//! Title, description and tags for a track, read from its embedded tags.
//!
//! Tag reading never fails the pipeline: an unreadable file, a format without
//! tags or a blank field all fall back to values derived from the filename.

use std::path::Path;

use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::debug;

use crate::config::MetadataConfig;

/// Extensions the watcher accepts. Matched case-sensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["mp3", "wav", "m4a"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
  pub title: String,
  pub description: String,
  pub tags: Vec<String>,
}

impl Metadata {
  /// Metadata for a track with no usable tags: the file stem as title plus
  /// the configured placeholder description and tags.
  ///
  /// ```rust
  /// use shorts_uploader::{config::MetadataConfig, metadata::Metadata};
  /// use std::path::Path;
  ///
  /// let meta = Metadata::from_filename(Path::new("music/to_process/track.mp3"), &MetadataConfig::default());
  /// assert_eq!(meta.title, "track");
  /// assert_eq!(meta.description, "Check out this awesome Short! #shorts");
  /// assert_eq!(meta.tags, vec!["shorts", "viral", "trending"]);
  /// ```
  pub fn from_filename(path: &Path, defaults: &MetadataConfig) -> Self {
    Self {
      title: file_stem(path),
      description: defaults.default_description.clone(),
      tags: defaults.default_tags.clone(),
    }
  }

  /// Caption burned into the video: `#shorts` followed by every tag as a
  /// hashtag.
  ///
  /// ```rust
  /// use shorts_uploader::{config::MetadataConfig, metadata::Metadata};
  /// use std::path::Path;
  ///
  /// let meta = Metadata::from_filename(Path::new("track.mp3"), &MetadataConfig::default());
  /// assert_eq!(meta.caption(), "#shorts #shorts #viral #trending");
  /// ```
  pub fn caption(&self) -> String {
    let hashtags: Vec<String> = self.tags.iter().map(|tag| format!("#{tag}")).collect();
    format!("#shorts {}", hashtags.join(" "))
  }

  /// Title sent to the platform, which is what makes it list as a Short.
  pub fn upload_title(&self) -> String {
    format!("{} #shorts", self.title)
  }
}

/// Reads embedded tags with `lofty`.
#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor {
  defaults: MetadataConfig,
}

impl MetadataExtractor {
  pub fn new(defaults: MetadataConfig) -> Self {
    Self { defaults }
  }

  /// Extract metadata for `path`. A non-blank title tag wins over the file
  /// stem and a non-blank comment tag over the placeholder description; the
  /// tags are always the configured defaults.
  pub fn extract(&self, path: &Path) -> Metadata {
    let mut metadata = Metadata::from_filename(path, &self.defaults);

    let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
      Ok(file) => file,
      Err(e) => {
        debug!(path = %path.display(), error = %e, "No readable tags, using filename");
        return metadata;
      }
    };

    let Some(tag) = tagged_file
      .primary_tag()
      .or_else(|| tagged_file.first_tag())
    else {
      debug!(path = %path.display(), "File has no tags, using filename");
      return metadata;
    };

    if let Some(title) = non_blank(tag.title()) {
      metadata.title = title;
    }
    if let Some(comment) = non_blank(tag.comment()) {
      metadata.description = comment;
    }
    metadata
  }
}

fn non_blank<S: AsRef<str>>(value: Option<S>) -> Option<String> {
  value
    .map(|v| v.as_ref().trim().to_string())
    .filter(|v| !v.is_empty())
}

fn file_stem(path: &Path) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_default()
}

/// Whether `path` names a file the pipeline should pick up, judged by its
/// extension alone.
///
/// ```rust
/// use shorts_uploader::metadata::is_supported_audio;
/// use std::path::Path;
///
/// assert!(is_supported_audio(Path::new("a/track.m4a")));
/// assert!(!is_supported_audio(Path::new("a/TRACK.MP3")));
/// assert!(!is_supported_audio(Path::new("a/cover.jpg")));
/// assert!(!is_supported_audio(Path::new("a/mp3")));
/// ```
pub fn is_supported_audio(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn write_silent_wav(path: &Path) {
    let spec = hound::WavSpec {
      channels: 1,
      sample_rate: 8000,
      bits_per_sample: 16,
      sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..800 {
      writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
  }

  #[test]
  fn test_untagged_wav_uses_filename_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("night drive.wav");
    write_silent_wav(&path);

    let meta = MetadataExtractor::default().extract(&path);
    assert_eq!(meta.title, "night drive");
    assert_eq!(meta.description, "Check out this awesome Short! #shorts");
    assert_eq!(meta.tags, vec!["shorts", "viral", "trending"]);
  }

  #[test]
  fn test_garbage_file_does_not_fail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.mp3");
    fs::write(&path, b"definitely not an mpeg stream").unwrap();

    let meta = MetadataExtractor::default().extract(&path);
    assert_eq!(meta.title, "track");
  }

  #[test]
  fn test_missing_file_does_not_fail() {
    let meta = MetadataExtractor::default().extract(Path::new("/nonexistent/track.mp3"));
    assert_eq!(meta.title, "track");
  }

  #[test]
  fn test_configured_defaults_are_used() {
    let extractor = MetadataExtractor::new(MetadataConfig {
      default_description: "New upload".to_string(),
      default_tags: vec!["lofi".to_string()],
    });
    let meta = extractor.extract(Path::new("/nonexistent/beat.wav"));
    assert_eq!(meta.description, "New upload");
    assert_eq!(meta.caption(), "#shorts #lofi");
    assert_eq!(meta.upload_title(), "beat #shorts");
  }

  #[test]
  fn test_non_blank() {
    assert_eq!(non_blank(Some("  ")), None);
    assert_eq!(non_blank(Some(" Song ")), Some("Song".to_string()));
    assert_eq!(non_blank::<&str>(None), None);
  }
}
