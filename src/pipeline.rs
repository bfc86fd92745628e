//! Per-file coordination: skip, describe, render, upload, record, archive.

use std::{
  any::Any,
  fmt, fs,
  panic::{self, AssertUnwindSafe},
  path::{Path, PathBuf},
};

use tracing::{debug, error, info, warn};

use crate::{
  config::{Config, PathsConfig},
  error::{Error, Result},
  history::{HistoryRecord, HistoryStore},
  metadata::{is_supported_audio, MetadataExtractor},
  render::{RenderRequest, Renderer, ShortsRenderer},
  upload::{UploadRequest, Uploader, YouTubeUploader},
};

/// The step a failed file got stuck at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Rendering,
  Uploading,
  Recording,
  Archiving,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Rendering => "rendering",
      Stage::Uploading => "uploading",
      Stage::Recording => "recording history",
      Stage::Archiving => "archiving",
    };
    f.write_str(name)
  }
}

/// How a single file's trip through the pipeline ended.
#[derive(Debug)]
pub enum Outcome {
  /// Not an audio file the pipeline handles.
  Ignored,
  /// Already uploaded according to the history.
  Skipped,
  Failed { stage: Stage, error: Error },
  Done {
    video_id: String,
    video: PathBuf,
    archived: PathBuf,
  },
}

impl Outcome {
  pub fn is_done(&self) -> bool {
    matches!(self, Outcome::Done { .. })
  }
}

pub struct ShortsPipeline {
  renderer: Box<dyn Renderer>,
  uploader: Box<dyn Uploader>,
  history: HistoryStore,
  extractor: MetadataExtractor,
  processed_dir: PathBuf,
  output_dir: PathBuf,
  made_for_kids: bool,
}

impl ShortsPipeline {
  /// Assemble a pipeline around the given renderer and uploader. Loads the
  /// history and creates the watched, archive and output directories.
  pub fn new(config: &Config, renderer: Box<dyn Renderer>, uploader: Box<dyn Uploader>) -> Result<Self> {
    let paths = &config.paths;
    create_dirs(paths)?;
    let history = HistoryStore::load(&paths.history_file)?;
    info!(
      history = %history.path().display(),
      entries = history.len(),
      "Pipeline ready"
    );
    Ok(Self {
      renderer,
      uploader,
      history,
      extractor: MetadataExtractor::new(config.metadata.clone()),
      processed_dir: paths.processed_dir(),
      output_dir: paths.output_dir(),
      made_for_kids: config.upload.made_for_kids,
    })
  }

  /// The production pipeline: FFmpeg rendering and resumable uploads.
  pub fn from_config(config: &Config) -> Result<Self> {
    let renderer = ShortsRenderer::new(config.render.clone(), config.paths.background_path());
    let uploader = YouTubeUploader::new(config.upload.clone())?;
    Self::new(config, Box::new(renderer), Box::new(uploader))
  }

  pub fn history(&self) -> &HistoryStore {
    &self.history
  }

  /// Process one newly discovered file. Never returns an error, and a panic
  /// in any stage is caught here: failures are logged and reported in the
  /// [`Outcome`], leaving the source file where it was.
  pub fn handle_new_file(&mut self, path: &Path) -> Outcome {
    if path.is_dir() || !is_supported_audio(path) {
      debug!(path = %path.display(), "Ignoring unsupported file");
      return Outcome::Ignored;
    }
    let Some(name) = path.file_name() else {
      return Outcome::Ignored;
    };
    // History keys must map one-to-one onto file names.
    let Some(filename) = name.to_str().map(str::to_string) else {
      warn!(path = %path.display(), "Ignoring file with a non UTF-8 name");
      return Outcome::Ignored;
    };

    if self.history.contains(&filename) {
      info!(file = %filename, "Already processed, skipping");
      return Outcome::Skipped;
    }

    let mut stage = Stage::Rendering;
    let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(path, &filename, &mut stage)));
    let failure = match result {
      Ok(Ok(outcome)) => return outcome,
      Ok(Err(failure)) => failure,
      Err(payload) => (stage, Error::Panicked(panic_message(payload.as_ref()))),
    };
    let (stage, error) = failure;
    error!(file = %filename, %stage, error = %error, "Failed to process file");
    Outcome::Failed { stage, error }
  }

  /// Run every stage for one file, keeping `stage` at the step in progress.
  fn process(
    &mut self,
    path: &Path,
    filename: &str,
    stage: &mut Stage,
  ) -> std::result::Result<Outcome, (Stage, Error)> {
    *stage = Stage::Rendering;
    let metadata = self.extractor.extract(path);
    debug!(file = %filename, title = %metadata.title, "Extracted metadata");

    let stem = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let request = RenderRequest {
      audio: path.to_path_buf(),
      output: self.output_dir.join(format!("{stem}_short.mp4")),
      title: metadata.title.clone(),
      caption: metadata.caption(),
    };
    info!(file = %filename, "Creating short");
    let video = self
      .renderer
      .render(&request)
      .map_err(|e| (Stage::Rendering, e))?;

    *stage = Stage::Uploading;
    info!(file = %filename, video = %video.display(), "Uploading short");
    let upload = UploadRequest {
      title: metadata.upload_title(),
      description: metadata.description.clone(),
      tags: metadata.tags.clone(),
      made_for_kids: self.made_for_kids,
    };
    let video_id = self
      .uploader
      .upload(&video, &upload)
      .map_err(|e| (Stage::Uploading, e))?;
    if video_id.trim().is_empty() {
      return Err((
        Stage::Uploading,
        Error::Protocol("uploader returned an empty video id".into()),
      ));
    }

    *stage = Stage::Recording;
    self
      .history
      .record(filename, HistoryRecord::now(&video_id, &metadata.title))
      .map_err(|e| (Stage::Recording, e))?;

    *stage = Stage::Archiving;
    let archived = self.processed_dir.join(filename);
    move_file(path, &archived).map_err(|e| (Stage::Archiving, e))?;

    info!(
      file = %filename,
      video_id = %video_id,
      title = %metadata.title,
      "Successfully uploaded short"
    );
    Ok(Outcome::Done {
      video_id,
      video,
      archived,
    })
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    msg.to_string()
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    msg.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

fn create_dirs(paths: &PathsConfig) -> Result<()> {
  for dir in [paths.to_process_dir(), paths.processed_dir(), paths.output_dir()] {
    fs::create_dir_all(&dir)
      .map_err(|e| Error::Config(format!("cannot create {}: {e}", dir.display())))?;
  }
  Ok(())
}

/// Rename `from` to `to`, falling back to copy and delete when the two are
/// on different filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
  if let Err(e) = fs::rename(from, to) {
    debug!(from = %from.display(), to = %to.display(), error = %e, "Rename failed, copying instead");
    fs::copy(from, to)?;
    if let Err(e) = fs::remove_file(from) {
      warn!(path = %from.display(), error = %e, "Copied but could not remove source");
      return Err(e.into());
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_move_file() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("track.mp3");
    let to = dir.path().join("processed").join("track.mp3");
    fs::create_dir_all(to.parent().unwrap()).unwrap();
    fs::write(&from, b"ID3 audio").unwrap();

    move_file(&from, &to).unwrap();
    assert!(!from.exists());
    assert_eq!(fs::read(&to).unwrap(), b"ID3 audio");
  }

  #[test]
  fn test_move_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(move_file(&dir.path().join("a.mp3"), &dir.path().join("b.mp3")).is_err());
  }

  #[test]
  fn test_panic_message() {
    assert_eq!(panic_message(&"boom"), "boom");
    assert_eq!(panic_message(&String::from("bang")), "bang");
    assert_eq!(panic_message(&42u8), "unknown panic payload");
  }

  #[test]
  fn test_stage_names() {
    assert_eq!(Stage::Recording.to_string(), "recording history");
    assert_eq!(Stage::Rendering.to_string(), "rendering");
  }
}
