use std::{
  path::{Path, PathBuf},
  thread,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use shorts_uploader::{
  background::create_gradient_background,
  config::Config,
  history::HistoryStore,
  pipeline::{Outcome, ShortsPipeline},
  upload::{UploadRequest, Uploader, YouTubeUploader},
  version::ffmpeg_version_with_path,
  watch::{FolderWatcher, StopSignal, WatchSummary},
};
use tokio::{runtime, signal, sync::oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Render audio tracks into vertical Shorts and upload them.
#[derive(Parser, Debug)]
#[command(name = "shorts-uploader", version, about)]
struct Cli {
  /// TOML config file (defaults to ./shorts.toml when present)
  #[arg(short, long, env = "SHORTS_CONFIG", global = true)]
  config: Option<PathBuf>,

  /// Root of the media/ layout; overrides `paths.media_root`
  #[arg(long, env = "SHORTS_MEDIA_ROOT", global = true)]
  media_root: Option<PathBuf>,

  #[command(subcommand)]
  action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
  /// Watch the to_process directory and handle new tracks (default)
  Watch {
    /// Also handle tracks already waiting in the directory
    #[arg(long)]
    scan_existing: bool,
  },
  /// Run the pipeline on specific files, then exit
  Process {
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },
  /// Upload an already rendered video
  Upload {
    video: PathBuf,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Comma separated; defaults to `metadata.default_tags`
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
  },
  /// Show upload and processing status of a video
  Status { video_id: String },
  /// Generate the default gradient background image
  Background {
    /// Defaults to `paths.background`
    #[arg(long)]
    output: Option<PathBuf>,
  },
  /// List recorded uploads
  History,
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let cli = Cli::parse();
  let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
  if let Some(root) = cli.media_root {
    config.paths.media_root = root;
  }

  match cli.action.unwrap_or(Action::Watch {
    scan_existing: false,
  }) {
    Action::Watch { scan_existing } => watch(config, scan_existing),
    Action::Process { files } => process(&config, &files),
    Action::Upload {
      video,
      title,
      description,
      tags,
    } => upload(&config, &video, title, description, tags),
    Action::Status { video_id } => status(&config, &video_id),
    Action::Background { output } => {
      let path = output.unwrap_or_else(|| config.paths.background_path());
      create_gradient_background(&path)
        .with_context(|| format!("Failed to create background at {}", path.display()))?;
      println!("{}", path.display());
      Ok(())
    }
    Action::History => history(&config),
  }
}

fn check_ffmpeg(config: &Config) -> Result<()> {
  let exe = config.render.ffmpeg_exe();
  let version = ffmpeg_version_with_path(&exe).with_context(|| {
    format!(
      "FFmpeg is not available at `{}`; install it or set `render.ffmpeg`",
      exe.display()
    )
  })?;
  info!(%version, exe = %exe.display(), "Found FFmpeg");

  let background = config.paths.background_path();
  if !background.is_file() {
    warn!(
      path = %background.display(),
      "Background image missing; renders will fail until `shorts-uploader background` creates it"
    );
  }
  Ok(())
}

fn watch(config: Config, scan_existing: bool) -> Result<()> {
  check_ffmpeg(&config)?;
  let mut pipeline = ShortsPipeline::from_config(&config).context("Failed to start the pipeline")?;
  let watcher = FolderWatcher::new(config.paths.to_process_dir(), &config.watch)
    .scan_existing(scan_existing || config.watch.scan_existing);

  let stop = StopSignal::new();
  let (done_tx, done_rx) = oneshot::channel::<()>();
  let worker_stop = stop.clone();
  let worker = thread::Builder::new()
    .name("pipeline".into())
    .spawn(move || {
      let result = watcher.run(&mut pipeline, &worker_stop);
      done_tx.send(()).ok();
      result
    })
    .context("Failed to spawn the pipeline thread")?;

  wait_for_interrupt(&stop, done_rx)?;

  let summary: WatchSummary = worker
    .join()
    .map_err(|_| anyhow!("pipeline thread panicked"))?
    .context("Watching failed")?;
  info!(
    done = summary.done,
    skipped = summary.skipped,
    failed = summary.failed,
    "Shut down"
  );
  Ok(())
}

/// Block until the pipeline thread ends. The first Ctrl-C lets the current
/// file finish; a second one exits immediately.
fn wait_for_interrupt(stop: &StopSignal, mut done: oneshot::Receiver<()>) -> Result<()> {
  let rt = runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("Failed to start the signal runtime")?;

  rt.block_on(async {
    tokio::select! {
      _ = &mut done => return Ok(()),
      res = signal::ctrl_c() => res.context("Failed to install Ctrl-C handler")?,
    }
    info!("Interrupt received, finishing the current file (Ctrl-C again to quit now)");
    stop.stop();

    tokio::select! {
      _ = &mut done => {}
      _ = signal::ctrl_c() => {
        warn!("Second interrupt, exiting");
        std::process::exit(130);
      }
    }
    Ok::<(), anyhow::Error>(())
  })
}

fn process(config: &Config, files: &[PathBuf]) -> Result<()> {
  check_ffmpeg(config)?;
  let mut pipeline = ShortsPipeline::from_config(config).context("Failed to start the pipeline")?;

  let mut summary = WatchSummary::default();
  for file in files {
    let outcome = pipeline.handle_new_file(file);
    match &outcome {
      Outcome::Ignored => warn!(path = %file.display(), "Not a supported audio file"),
      Outcome::Done { video_id, .. } => println!("{}\t{video_id}", file.display()),
      Outcome::Skipped | Outcome::Failed { .. } => {}
    }
    summary.add(&outcome);
  }

  if summary.failed > 0 {
    bail!("{} of {} files failed", summary.failed, files.len());
  }
  Ok(())
}

fn upload(
  config: &Config,
  video: &Path,
  title: String,
  description: String,
  tags: Vec<String>,
) -> Result<()> {
  let mut uploader = YouTubeUploader::new(config.upload.clone())?;
  let request = UploadRequest {
    title,
    description,
    tags: if tags.is_empty() {
      config.metadata.default_tags.clone()
    } else {
      tags
    },
    made_for_kids: config.upload.made_for_kids,
  };
  let video_id = uploader
    .upload(video, &request)
    .with_context(|| format!("Failed to upload {}", video.display()))?;
  println!("{video_id}");
  Ok(())
}

fn status(config: &Config, video_id: &str) -> Result<()> {
  let uploader = YouTubeUploader::new(config.upload.clone())?;
  match uploader.video_status(video_id)? {
    Some(status) => {
      println!("{}", serde_json::to_string_pretty(&status)?);
      Ok(())
    }
    None => {
      error!(video_id, "Unknown video");
      bail!("no video with id {video_id}")
    }
  }
}

fn history(config: &Config) -> Result<()> {
  let store = HistoryStore::load(&config.paths.history_file)?;
  if store.is_empty() {
    println!("No uploads recorded in {}", store.path().display());
    return Ok(());
  }
  for (filename, record) in store.iter() {
    println!(
      "{}\t{}\t{}\t{}",
      record.upload_time.format("%Y-%m-%d %H:%M:%S"),
      record.video_id,
      filename,
      record.title
    );
  }
  Ok(())
}
