use std::{
  ffi::OsStr,
  fmt, io,
  process::{Command, CommandArgs, Stdio},
};

use tracing::debug;

use crate::child::FfmpegChild;

/// A wrapper around [`std::process::Command`] with the argument aliases the
/// Shorts renderer needs.
///
/// The `rustdoc` on each method includes relevant information from the FFmpeg
/// documentation: <https://ffmpeg.org/ffmpeg.html>. Refer there for the
/// exhaustive list of possible arguments.
pub struct FfmpegCommand {
  inner: Command,
}

impl FfmpegCommand {
  //// Generic option aliases
  //// https://ffmpeg.org/ffmpeg.html#Generic-options

  /// alias for `-hide_banner` argument.
  ///
  /// Suppress printing banner.
  pub fn hide_banner(&mut self) -> &mut Self {
    self.arg("-hide_banner");
    self
  }

  //// Main option aliases
  //// https://ffmpeg.org/ffmpeg.html#Main-options

  /// Alias for `-i` argument, the input file path or URL.
  pub fn input<S: AsRef<OsStr>>(&mut self, path_or_url: S) -> &mut Self {
    self.arg("-i");
    self.arg(path_or_url);
    self
  }

  /// Alias for `-loop 1` placed before an image input: repeat the single
  /// frame forever. Pair it with [`Self::shortest`] or [`Self::duration`].
  pub fn loop_image(&mut self) -> &mut Self {
    self.args(["-loop", "1"]);
    self
  }

  /// Alias for `-framerate` argument (input option for image sequences).
  pub fn framerate(&mut self, fps: u32) -> &mut Self {
    self.arg("-framerate");
    self.arg(fps.to_string());
    self
  }

  /// Alias for `-y` argument: overwrite output files without asking.
  pub fn overwrite(&mut self) -> &mut Self {
    self.arg("-y");
    self
  }

  /// Alias for `-c:v` argument.
  ///
  /// Select an encoder (when used before an output file) or a decoder (when
  /// used before an input file) for the video streams.
  pub fn codec_video<S: AsRef<str>>(&mut self, codec: S) -> &mut Self {
    self.arg("-c:v");
    self.arg(codec.as_ref());
    self
  }

  /// Alias for `-c:a` argument.
  pub fn codec_audio<S: AsRef<str>>(&mut self, codec: S) -> &mut Self {
    self.arg("-c:a");
    self.arg(codec.as_ref());
    self
  }

  /// Alias for `-preset`, the x264 speed/size trade-off.
  pub fn preset<S: AsRef<str>>(&mut self, preset: S) -> &mut Self {
    self.arg("-preset");
    self.arg(preset.as_ref());
    self
  }

  /// Alias for `-pix_fmt`.
  pub fn pix_fmt<S: AsRef<str>>(&mut self, format: S) -> &mut Self {
    self.arg("-pix_fmt");
    self.arg(format.as_ref());
    self
  }

  /// Alias for `-r` as an output option: the output frame rate.
  pub fn rate(&mut self, fps: u32) -> &mut Self {
    self.arg("-r");
    self.arg(fps.to_string());
    self
  }

  /// Alias for `-t` argument.
  ///
  /// As an output option, stop writing the output after its duration reaches
  /// `seconds`.
  pub fn duration(&mut self, seconds: u32) -> &mut Self {
    self.arg("-t");
    self.arg(seconds.to_string());
    self
  }

  /// Alias for `-shortest`: finish encoding when the shortest input stream
  /// ends (here, the audio track rather than the looping background).
  pub fn shortest(&mut self) -> &mut Self {
    self.arg("-shortest");
    self
  }

  /// Alias for `-filter_complex` argument.
  ///
  /// Define a complex filtergraph, i.e. one with arbitrary number of inputs
  /// and/or outputs. Labelled outputs are selected with [`Self::map`].
  pub fn filter_complex<S: AsRef<str>>(&mut self, filtergraph: S) -> &mut Self {
    self.arg("-filter_complex");
    self.arg(filtergraph.as_ref());
    self
  }

  /// Alias for `-map` argument: route a stream or filtergraph label to the
  /// output.
  pub fn map<S: AsRef<str>>(&mut self, stream: S) -> &mut Self {
    self.arg("-map");
    self.arg(stream.as_ref());
    self
  }

  /// Alias for `-movflags +faststart`: put the index at the front of the MP4
  /// so the platform can start processing before the whole file arrives.
  pub fn faststart(&mut self) -> &mut Self {
    self.args(["-movflags", "+faststart"]);
    self
  }

  /// Alias for `-nostdin`: never read interactive commands from stdin.
  pub fn no_stdin(&mut self) -> &mut Self {
    self.arg("-nostdin");
    self
  }

  /// Automatically applied in the constructor of `FfmpegCommand`.
  /// Configures logging with a level and format expected by the log parser.
  ///
  /// Equivalent to `ffmpeg -loglevel level+info`.
  ///
  /// The `level` flag adds a prefix to all log messages with the log level in square brackets,
  /// allowing the parser to distinguish between ambiguous messages like
  /// warnings vs errors.
  fn set_expected_loglevel(&mut self) -> &mut Self {
    self.args(["-loglevel", "level+info"]);
    self
  }

  //// `std::process::Command` passthrough methods
  ///
  /// Adds an argument to pass to the program.
  ///
  /// Identical to `arg` in [`std::process::Command`].
  pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
    self.inner.arg(arg.as_ref());
    self
  }

  /// Adds multiple arguments to pass to the program.
  ///
  /// Identical to `args` in [`std::process::Command`].
  pub fn args<I, S>(&mut self, args: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    for arg in args {
      self.arg(arg.as_ref());
    }
    self
  }

  /// Returns an iterator of the arguments that will be passed to the program.
  ///
  /// Identical to `get_args` in [`std::process::Command`].
  pub fn get_args(&self) -> CommandArgs<'_> {
    self.inner.get_args()
  }

  /// Spawn the ffmpeg command as a child process, wrapping it in a
  /// `FfmpegChild` interface.
  pub fn spawn(&mut self) -> io::Result<FfmpegChild> {
    debug!(command = ?self.inner, "Spawning ffmpeg");
    self.inner.spawn().map(FfmpegChild::from_inner)
  }

  //// Constructors
  pub fn new() -> Self {
    Self::new_with_exe("ffmpeg")
  }

  pub fn new_with_exe<S: AsRef<OsStr>>(exe: S) -> Self {
    // Only stderr is read; an unread stdout pipe could stall the render.
    let mut inner = Command::new(&exe);
    inner.stdin(Stdio::null());
    inner.stderr(Stdio::piped());
    inner.stdout(Stdio::null());

    let mut ffmpeg_command = Self { inner };
    ffmpeg_command.set_expected_loglevel();
    ffmpeg_command
  }

  //// Escape hatches
  /// Escape hatch to access the inner `Command`.
  pub fn as_inner(&self) -> &Command {
    &self.inner
  }
}

impl Default for FfmpegCommand {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for FfmpegCommand {
  /// Format the program and arguments of a Command for display. Any
  /// non-utf8 data is lossily converted using the utf8 replacement
  /// character.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.inner.fmt(f)
  }
}
