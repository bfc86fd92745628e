use std::{
  io::BufReader,
  process::ChildStderr,
  sync::mpsc::{sync_channel, Receiver, SyncSender},
  thread::JoinHandle,
};

use anyhow::Context;
use tracing::warn;

use crate::{
  child::FfmpegChild,
  event::FfmpegEvent,
  log_parser::FfmpegLogParser,
};

/// An iterator over events from an FFmpeg render: parsed inputs and outputs,
/// progress updates and log lines. Ends after the stderr pipe closes.
pub struct FfmpegIterator {
  rx: Receiver<FfmpegEvent>,
}

impl FfmpegIterator {
  pub fn new(child: &mut FfmpegChild) -> anyhow::Result<Self> {
    let stderr = child.take_stderr().context("No stderr channel\n - Did you call `take_stderr` elsewhere?\n - Did you forget to call `.stderr(Stdio::piped)` on the `ChildProcess`?")?;
    let (tx, rx) = sync_channel::<FfmpegEvent>(0);
    spawn_stderr_thread(stderr, tx);
    Ok(Self { rx })
  }
}

impl Iterator for FfmpegIterator {
  type Item = FfmpegEvent;

  fn next(&mut self) -> Option<Self::Item> {
    self.rx.recv().ok()
  }
}

/// Spawn a thread which reads and parses lines from ffmpeg's stderr channel.
/// The cadence is controlled by the synchronous `tx` channel, which blocks
/// until a receiver is ready to receive the next event.
pub fn spawn_stderr_thread(stderr: ChildStderr, tx: SyncSender<FfmpegEvent>) -> JoinHandle<()> {
  std::thread::spawn(move || {
    let reader = BufReader::new(stderr);
    let mut parser = FfmpegLogParser::new(reader);
    loop {
      match parser.parse_next_event() {
        Ok(FfmpegEvent::LogEOF) => {
          tx.send(FfmpegEvent::LogEOF).ok();
          break;
        }
        Ok(event) => {
          if tx.send(event).is_err() {
            break;
          }
        }
        Err(e) => {
          warn!(error = %e, "Error parsing ffmpeg output");
          tx.send(FfmpegEvent::Error(e.to_string())).ok();
          break;
        }
      };
    }
  })
}
