use std::{
  env::current_exe,
  path::{Path, PathBuf},
};

/// Returns the default path of the FFmpeg executable, used when the config
/// does not name one. An FFmpeg binary sitting next to our own executable
/// wins; otherwise `ffmpeg` is resolved through the system `PATH` when the
/// command is actually run.
pub fn ffmpeg_path() -> PathBuf {
  match sidecar_path() {
    Some(path) if path.exists() => path,
    _ => Path::new("ffmpeg").to_path_buf(),
  }
}

/// The (expected) path to an FFmpeg binary adjacent to the Rust binary.
///
/// Windows builds look for `ffmpeg.exe`, everything else for plain `ffmpeg`.
pub fn sidecar_path() -> Option<PathBuf> {
  let mut path = current_exe().ok()?.parent()?.join("ffmpeg");
  if cfg!(windows) {
    path.set_extension("exe");
  }
  Some(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sidecar_lives_next_to_executable() {
    let sidecar = sidecar_path().unwrap();
    let exe_dir = current_exe().unwrap().parent().unwrap().to_path_buf();
    assert_eq!(sidecar.parent().unwrap(), exe_dir);
    assert!(sidecar
      .file_stem()
      .is_some_and(|stem| stem == "ffmpeg"));
  }

  #[test]
  fn test_ffmpeg_path_falls_back_to_system_path() {
    let path = ffmpeg_path();
    let sidecar_present = sidecar_path().is_some_and(|p| p.exists());
    if !sidecar_present {
      assert_eq!(path, PathBuf::from("ffmpeg"));
    }
  }
}
