use std::{
  io,
  process::{Child, ChildStderr, ExitStatus},
};

use crate::iter::FfmpegIterator;

/// A wrapper around [`std::process::Child`] containing a spawned FFmpeg render.
/// Provides access to parsed progress updates, warnings and errors.
pub struct FfmpegChild {
  inner: Child,
}

impl FfmpegChild {
  /// Creates an iterator over events emitted by FFmpeg on stderr. Can only
  /// be called once, since it takes ownership of the stderr pipe.
  pub fn iter(&mut self) -> anyhow::Result<FfmpegIterator> {
    FfmpegIterator::new(self)
  }

  /// Escape hatch to manually take ownership of the stderr handle.
  pub fn take_stderr(&mut self) -> Option<ChildStderr> {
    self.inner.stderr.take()
  }

  /// Wait for the render to exit. Stdin is closed first so FFmpeg never sits
  /// on an interactive prompt.
  pub fn wait(&mut self) -> io::Result<ExitStatus> {
    drop(self.inner.stdin.take());
    self.inner.wait()
  }

  pub(crate) fn from_inner(inner: Child) -> Self {
    Self { inner }
  }
}
