//! Feed files dropped into the watched directory to the pipeline, one at a
//! time, until asked to stop.

use std::{
  fs,
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{channel, RecvTimeoutError, Sender},
    Arc,
  },
  thread,
  time::Duration,
};

use notify::{
  event::{ModifyKind, RenameMode},
  Event, EventKind, RecursiveMode, Watcher,
};
use tracing::{debug, info, warn};

use crate::{
  config::WatchConfig,
  error::Result,
  metadata::is_supported_audio,
  pipeline::{Outcome, ShortsPipeline},
};

/// How often the loop wakes up to check for a stop request.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cooperative cancellation shared between the watch loop and whoever wants
/// it to end. The file being processed when the stop arrives is finished
/// first.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Counts of what happened to the files seen during one watch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
  pub done: usize,
  pub skipped: usize,
  pub failed: usize,
}

impl WatchSummary {
  pub fn add(&mut self, outcome: &Outcome) {
    match outcome {
      Outcome::Done { .. } => self.done += 1,
      Outcome::Skipped => self.skipped += 1,
      Outcome::Failed { .. } => self.failed += 1,
      Outcome::Ignored => {}
    }
  }
}

pub struct FolderWatcher {
  dir: PathBuf,
  settle: Duration,
  scan_existing: bool,
}

impl FolderWatcher {
  pub fn new(dir: impl Into<PathBuf>, config: &WatchConfig) -> Self {
    Self {
      dir: dir.into(),
      settle: Duration::from_millis(config.settle_ms),
      scan_existing: config.scan_existing,
    }
  }

  pub fn scan_existing(mut self, scan: bool) -> Self {
    self.scan_existing = scan;
    self
  }

  /// Watch until `stop` fires or the watcher goes away. Files are handled
  /// sequentially in the order their events arrive.
  pub fn run(&self, pipeline: &mut ShortsPipeline, stop: &StopSignal) -> Result<WatchSummary> {
    let (tx, rx) = channel();
    let mut watcher = notify::recommended_watcher(move |res| match res {
      Ok(event) => forward_event(&event, &tx),
      Err(e) => warn!(error = %e, "Watch error"),
    })?;
    watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
    info!(dir = %self.dir.display(), "Watching for new audio files");

    let mut summary = WatchSummary::default();
    if self.scan_existing {
      let existing = pending_files(&self.dir)?;
      info!(count = existing.len(), "Queueing files already in the watched directory");
      for path in existing {
        if stop.is_stopped() {
          break;
        }
        summary.add(&pipeline.handle_new_file(&path));
      }
    }

    while !stop.is_stopped() {
      let path = match rx.recv_timeout(POLL_INTERVAL) {
        Ok(path) => path,
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => {
          warn!("Watcher channel closed");
          break;
        }
      };
      if !wait_until_settled(&path, self.settle, stop) {
        debug!(path = %path.display(), "File vanished before it settled");
        continue;
      }
      summary.add(&pipeline.handle_new_file(&path));
    }

    info!(
      done = summary.done,
      skipped = summary.skipped,
      failed = summary.failed,
      "Stopped watching"
    );
    Ok(summary)
  }
}

/// Paths an event announces as newly present in the directory: created
/// files and rename destinations. A paired `Both` rename is always preceded
/// by its own `To` event. FSEvents reports both sides of a move as `Any`;
/// the source side fails the settle check.
pub fn new_file_paths(event: &Event) -> Vec<PathBuf> {
  match event.kind {
    EventKind::Create(_)
    | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths.clone(),
    _ => Vec::new(),
  }
}

fn forward_event(event: &Event, tx: &Sender<PathBuf>) {
  for path in new_file_paths(event) {
    if !is_supported_audio(&path) {
      continue;
    }
    debug!(path = %path.display(), "File created, adding to queue");
    if let Err(e) = tx.send(path) {
      debug!(error = %e, "Pipeline no longer listening");
    }
  }
}

/// Supported audio files directly inside `dir`, sorted by name.
pub fn pending_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for entry in fs::read_dir(dir)? {
    let path = entry?.path();
    if path.is_file() && is_supported_audio(&path) {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// Block until the size of `path` stops changing for `settle`. Returns
/// false if the file disappears or a stop is requested meanwhile.
fn wait_until_settled(path: &Path, settle: Duration, stop: &StopSignal) -> bool {
  let size = |p: &Path| fs::metadata(p).ok().map(|m| m.len());
  let Some(mut last) = size(path) else {
    return false;
  };
  if settle.is_zero() {
    return true;
  }
  loop {
    thread::sleep(settle);
    if stop.is_stopped() {
      return false;
    }
    match size(path) {
      None => return false,
      Some(now) if now == last => return true,
      Some(now) => {
        debug!(path = %path.display(), bytes = now, "Still being written");
        last = now;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use notify::event::{CreateKind, RemoveKind};

  #[test]
  fn test_new_file_paths() {
    let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/in/a.mp3".into());
    assert_eq!(new_file_paths(&created), vec![PathBuf::from("/in/a.mp3")]);

    let moved_in = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path("/in/b.wav".into());
    assert_eq!(new_file_paths(&moved_in), vec![PathBuf::from("/in/b.wav")]);

    let paired = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
      .add_path("/in/c.part".into())
      .add_path("/in/c.m4a".into());
    assert!(new_file_paths(&paired).is_empty());

    let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/in/a.mp3".into());
    assert!(new_file_paths(&removed).is_empty());
  }

  #[test]
  fn test_pending_files_are_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.wav", "a.mp3", "c.M4A", "notes.txt", "d.m4a"] {
      fs::write(dir.path().join(name), b"x").unwrap();
    }
    fs::create_dir(dir.path().join("folder.mp3")).unwrap();

    let names: Vec<String> = pending_files(dir.path())
      .unwrap()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec!["a.mp3", "b.wav", "d.m4a"]);
  }

  #[test]
  fn test_settled_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.mp3");
    fs::write(&path, b"audio").unwrap();
    let stop = StopSignal::new();
    assert!(wait_until_settled(&path, Duration::from_millis(10), &stop));
    assert!(!wait_until_settled(&dir.path().join("gone.mp3"), Duration::ZERO, &stop));

    stop.stop();
    assert!(!wait_until_settled(&path, Duration::from_millis(10), &stop));
  }

  #[test]
  fn test_stop_signal_is_shared() {
    let stop = StopSignal::new();
    let other = stop.clone();
    assert!(!other.is_stopped());
    stop.stop();
    assert!(other.is_stopped());
  }
}
