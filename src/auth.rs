//! Access tokens for the upload service.
//!
//! Tokens are issued out of band (for example by an OAuth helper that writes
//! `token.json`); this module only reads them and refuses expired ones.

use std::{env, fs, io, path::Path};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable that overrides the token file.
pub const TOKEN_ENV: &str = "SHORTS_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
  pub access_token: String,
  #[serde(default)]
  pub expiry: Option<DateTime<Utc>>,
}

impl AccessToken {
  pub fn is_expired(&self) -> bool {
    self.expiry.is_some_and(|expiry| expiry <= Utc::now())
  }
}

/// Resolve the bearer token: `SHORTS_ACCESS_TOKEN` if set, else
/// `token_file`.
pub fn load_token(token_file: &Path) -> Result<String> {
  if let Ok(token) = env::var(TOKEN_ENV) {
    if !token.trim().is_empty() {
      debug!("Using access token from {TOKEN_ENV}");
      return Ok(token.trim().to_string());
    }
  }
  read_token_file(token_file)
}

/// Read and check a token file of the form
/// `{"access_token": "...", "expiry": "2024-05-01T12:00:00Z"}`.
pub fn read_token_file(path: &Path) -> Result<String> {
  let text = match fs::read_to_string(path) {
    Ok(text) => text,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      return Err(Error::Auth(format!(
        "no access token: set {TOKEN_ENV} or create {}",
        path.display()
      )))
    }
    Err(e) => return Err(e.into()),
  };
  let token: AccessToken = serde_json::from_str(&text)
    .map_err(|e| Error::Auth(format!("invalid token file {}: {e}", path.display())))?;

  if token.access_token.trim().is_empty() {
    return Err(Error::Auth(format!("{} has an empty access_token", path.display())));
  }
  if token.is_expired() {
    return Err(Error::Auth(format!(
      "access token in {} expired; refresh it and try again",
      path.display()
    )));
  }
  debug!(path = %path.display(), "Loaded access token");
  Ok(token.access_token)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_valid_token_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    fs::write(
      &path,
      r#"{"access_token": "ya29.abc", "expiry": "2999-01-01T00:00:00Z", "refresh_token": "ignored"}"#,
    )
    .unwrap();
    assert_eq!(read_token_file(&path).unwrap(), "ya29.abc");

    fs::write(&path, r#"{"access_token": "no-expiry"}"#).unwrap();
    assert_eq!(read_token_file(&path).unwrap(), "no-expiry");
  }

  #[test]
  fn test_expired_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    fs::write(
      &path,
      r#"{"access_token": "ya29.abc", "expiry": "2000-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    assert!(matches!(read_token_file(&path), Err(Error::Auth(_))));
  }

  #[test]
  fn test_missing_or_malformed_token_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    assert!(matches!(read_token_file(&path), Err(Error::Auth(_))));

    fs::write(&path, "not json").unwrap();
    assert!(matches!(read_token_file(&path), Err(Error::Auth(_))));

    fs::write(&path, r#"{"access_token": "  "}"#).unwrap();
    assert!(matches!(read_token_file(&path), Err(Error::Auth(_))));
  }
}
