use std::io;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

/// Shorthand alias for `Result<T, Error>` using the `shorts_uploader` error type.
pub type Result<T> = StdResult<T, Error>;

/// HTTP statuses the upload service uses for "try again later".
pub const TRANSIENT_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Every failure the pipeline can report.
///
/// Stage-specific variants (`Render`, `Http`, `RetriesExhausted`, ...) let the
/// coordinator log something useful; none of them are fatal to the watch loop.
#[derive(Debug, ThisError)]
pub enum Error {
  /// An input file (audio track or background image) is not where it should be.
  #[error("{what} not found at {}", path.display())]
  InputMissing { what: &'static str, path: PathBuf },

  /// FFmpeg could not be spawned, or exited unsuccessfully.
  #[error("render failed: {0}")]
  Render(String),

  /// No usable access token.
  #[error("authentication failed: {0}")]
  Auth(String),

  /// The upload service answered with a status we do not continue from.
  #[error("upload service returned HTTP {status}: {message}")]
  Http { status: u16, message: String },

  /// The upload service answered, but not in the shape the protocol promises.
  #[error("unexpected upload response: {0}")]
  Protocol(String),

  /// Transport-level failure talking to the upload service.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// Transient failures kept happening past the retry budget.
  #[error("giving up after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: u32, last: Box<Error> },

  /// The history file exists but does not hold a valid history mapping.
  #[error("history file {} is corrupt: {source}", path.display())]
  HistoryCorrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("configuration error: {0}")]
  Config(String),

  /// A stage panicked while handling one file.
  #[error("panicked: {0}")]
  Panicked(String),

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("image error: {0}")]
  Image(#[from] image::ImageError),

  #[error("watch error: {0}")]
  Watch(#[from] notify::Error),
}

impl Error {
  /// Create an `InputMissing` error for `path`.
  pub fn missing<P: Into<PathBuf>>(what: &'static str, path: P) -> Self {
    Error::InputMissing {
      what,
      path: path.into(),
    }
  }

  /// Whether the upload loop may back off and try again after this error.
  pub fn is_transient(&self) -> bool {
    match self {
      Error::Http { status, .. } => TRANSIENT_STATUSES.contains(status),
      Error::Network(e) => e.is_timeout() || e.is_connect(),
      _ => false,
    }
  }
}

impl From<toml::de::Error> for Error {
  fn from(e: toml::de::Error) -> Self {
    Error::Config(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_statuses() {
    for status in [500, 502, 503, 504] {
      let err = Error::Http {
        status,
        message: String::new(),
      };
      assert!(err.is_transient(), "{status} should be retried");
    }
    for status in [400, 401, 403, 404, 501] {
      let err = Error::Http {
        status,
        message: String::new(),
      };
      assert!(!err.is_transient(), "{status} should not be retried");
    }
  }

  #[test]
  fn test_missing_message_names_the_input() {
    let err = Error::missing("Audio file", "/music/to_process/track.mp3");
    assert_eq!(
      err.to_string(),
      "Audio file not found at /music/to_process/track.mp3"
    );
    assert!(!err.is_transient());
  }
}
