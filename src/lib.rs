//! Turn audio tracks dropped into a folder into vertical Shorts and upload
//! them.
//!
//! Each new `.mp3`, `.wav` or `.m4a` file in the watched directory goes
//! through the same steps: look it up in the upload history, read its tags,
//! render a 1080x1920 video with FFmpeg, upload it with the resumable upload
//! protocol, record the result, and move the track into the archive.
//!
//! ## Example
//!
//! ```rust,no_run
//! use shorts_uploader::{
//!   config::Config,
//!   error::Result,
//!   pipeline::ShortsPipeline,
//!   watch::{FolderWatcher, StopSignal},
//! };
//!
//! fn main() -> Result<()> {
//!   let config = Config::load(None)?; // <- `shorts.toml`, or the defaults
//!   let mut pipeline = ShortsPipeline::from_config(&config)?;
//!   let stop = StopSignal::new(); // <- call `stop()` from another thread to finish
//!   FolderWatcher::new(config.paths.to_process_dir(), &config.watch)
//!     .run(&mut pipeline, &stop)?;
//!   Ok(())
//! }
//! ```
//!
//! The FFmpeg side follows the sidecar pattern: [`command::FfmpegCommand`]
//! builds the invocation, and [`child::FfmpegChild::iter`] parses stderr into
//! [`event::FfmpegEvent`]s on a background thread.


pub mod auth;
pub mod background;
pub mod child;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod iter;
pub mod log_parser;
pub mod metadata;
pub mod paths;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod upload;
pub mod version;
pub mod watch;
