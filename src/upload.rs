//! Video upload over the YouTube Data API v3 resumable-upload protocol.
//!
//! A session is opened with a metadata-only `POST`; the returned session URI
//! then receives the file in `PUT` chunks. The server acknowledges partial
//! progress with `308 Resume Incomplete` and a `Range` header, and answers
//! the final chunk with the created video resource.

use std::{
  fs::File,
  io::{Read, Seek, SeekFrom},
  path::Path,
  thread,
  time::Duration,
};

use reqwest::{
  blocking::{Client, Response},
  header::{CONTENT_RANGE, LOCATION, RANGE},
  redirect::Policy,
  StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
  auth::load_token,
  config::UploadConfig,
  error::{Error, Result},
};

/// What to publish alongside the video file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
  pub title: String,
  pub description: String,
  pub tags: Vec<String>,
  pub made_for_kids: bool,
}

/// Publishes a rendered video and returns its platform id.
pub trait Uploader: Send {
  fn upload(&mut self, video: &Path, request: &UploadRequest) -> Result<String>;
}

/// Processing state of an uploaded video, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
  pub upload_status: String,
  pub privacy_status: String,
  pub processing_status: Option<String>,
  pub processing_progress: Option<ProcessingProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingProgress {
  pub parts_total: Option<String>,
  pub parts_processed: Option<String>,
  pub time_left_ms: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource<'a> {
  snippet: Snippet<'a>,
  status: StatusPart<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
  title: &'a str,
  description: &'a str,
  tags: &'a [String],
  category_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPart<'a> {
  privacy_status: &'a str,
  self_declared_made_for_kids: bool,
  notify_subscribers: bool,
}

#[derive(Deserialize)]
struct UploadedVideo {
  #[serde(default)]
  id: String,
}

#[derive(Deserialize)]
struct VideoList {
  #[serde(default)]
  items: Vec<VideoItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
  status: RawStatus,
  #[serde(default)]
  processing_details: Option<RawProcessing>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
  upload_status: String,
  privacy_status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProcessing {
  processing_status: Option<String>,
  processing_progress: Option<ProcessingProgress>,
}

/// Where a transfer stands after one exchange with the session URI.
#[derive(Debug, PartialEq, Eq)]
enum Transfer {
  /// The server holds this many bytes and wants the rest.
  Incomplete(u64),
  Complete(String),
}

pub struct YouTubeUploader {
  client: Client,
  config: UploadConfig,
  fixed_token: Option<String>,
}

impl YouTubeUploader {
  pub fn new(config: UploadConfig) -> Result<Self> {
    // 308 is a protocol status here, never a redirect to follow.
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .redirect(Policy::none())
      .build()?;
    Ok(Self {
      client,
      config,
      fixed_token: None,
    })
  }

  /// Use `token` instead of reading one from the environment or token file.
  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.fixed_token = Some(token.into());
    self
  }

  /// Resolved again for every request batch: the token file is refreshed out
  /// of band while `watch` keeps running.
  fn token(&self) -> Result<String> {
    match &self.fixed_token {
      Some(token) => Ok(token.clone()),
      None => load_token(&self.config.token_file),
    }
  }

  fn api_url(&self, path: &str) -> String {
    format!("{}{path}", self.config.api_base.trim_end_matches('/'))
  }

  /// Open a resumable session and return its URI.
  fn start_session(&self, token: &str, size: u64, request: &UploadRequest) -> Result<String> {
    let body = VideoResource {
      snippet: Snippet {
        title: &request.title,
        description: &request.description,
        tags: &request.tags,
        category_id: &self.config.category_id,
      },
      status: StatusPart {
        privacy_status: &self.config.privacy_status,
        self_declared_made_for_kids: request.made_for_kids,
        notify_subscribers: self.config.notify_subscribers,
      },
    };
    let response = self
      .client
      .post(self.api_url("/upload/youtube/v3/videos"))
      .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
      .bearer_auth(token)
      .header("X-Upload-Content-Type", "video/mp4")
      .header("X-Upload-Content-Length", size.to_string())
      .json(&body)
      .send()?;

    let status = response.status();
    if !status.is_success() {
      return Err(status_error(response));
    }
    response
      .headers()
      .get(LOCATION)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string)
      .ok_or_else(|| Error::Protocol("session response has no Location header".into()))
  }

  /// Send the bytes of `file` starting at `offset`, up to one chunk.
  fn put_chunk(&self, session: &str, token: &str, file: &mut File, offset: u64, total: u64) -> Result<Transfer> {
    let len = self.config.effective_chunk_size().min(total - offset);
    let mut chunk = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(offset))?;
    file.by_ref().take(len).read_to_end(&mut chunk)?;
    if chunk.len() as u64 != len {
      return Err(Error::Protocol(format!(
        "video file shrank during upload: wanted {len} bytes at offset {offset}"
      )));
    }

    let range = format!("bytes {}-{}/{}", offset, offset + len - 1, total);
    debug!(%range, "Uploading chunk");
    let response = self
      .client
      .put(session)
      .bearer_auth(token)
      .header(CONTENT_RANGE, range)
      .body(chunk)
      .send()?;
    interpret(response)
  }

  /// Ask the server how many bytes it holds.
  fn query_offset(&self, session: &str, token: &str, total: u64) -> Result<Transfer> {
    let response = self
      .client
      .put(session)
      .bearer_auth(token)
      .header(CONTENT_RANGE, format!("bytes */{total}"))
      .body(Vec::new())
      .send()?;
    interpret(response)
  }

  /// Count one more transient failure; sleep if the policy allows another
  /// try, otherwise give up with the error that ended the run.
  fn back_off(&self, failures: &mut u32, error: Error, what: &str) -> Result<()> {
    let policy = &self.config.retry;
    *failures += 1;
    if !policy.allows_retry(*failures) {
      return Err(Error::RetriesExhausted {
        attempts: *failures,
        last: Box::new(error),
      });
    }
    let delay = policy.backoff(*failures);
    warn!(error = %error, attempt = *failures, ?delay, "{what} failed, retrying");
    thread::sleep(delay);
    Ok(())
  }

  fn open_session(&self, token: &str, size: u64, request: &UploadRequest) -> Result<String> {
    let mut failures = 0;
    loop {
      match self.start_session(token, size, request) {
        Err(e) if e.is_transient() => self.back_off(&mut failures, e, "Opening upload session")?,
        result => return result,
      }
    }
  }

  fn transfer(&self, session: &str, token: &str, video: &Path, total: u64) -> Result<String> {
    let mut file = File::open(video)?;
    let mut offset = 0;
    let mut failures = 0;
    let mut resync = false;

    loop {
      let step = if resync {
        self.query_offset(session, token, total)
      } else {
        self.put_chunk(session, token, &mut file, offset, total)
      };
      match step {
        Ok(Transfer::Complete(id)) => return Ok(id),
        Ok(Transfer::Incomplete(received)) => {
          if received >= total {
            return Err(Error::Protocol(format!(
              "server holds all {total} bytes but did not finish the upload"
            )));
          }
          let progressed = received > offset;
          let after_resync = std::mem::replace(&mut resync, false);
          offset = received;
          if progressed {
            failures = 0;
          } else if !after_resync {
            // A chunk the server did not keep counts against the retry budget.
            let e = Error::Protocol(format!("server kept no bytes past offset {offset}"));
            self.back_off(&mut failures, e, "Chunk upload")?;
            continue;
          }
          info!(
            video = %video.display(),
            "Uploaded {}%",
            offset * 100 / total
          );
        }
        Err(e) if e.is_transient() => {
          self.back_off(&mut failures, e, "Chunk upload")?;
          resync = true;
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Upload and processing status for `video_id`, or `None` if the platform
  /// does not know the id.
  pub fn video_status(&self, video_id: &str) -> Result<Option<VideoStatus>> {
    let token = self.token()?;
    let response = self
      .client
      .get(self.api_url("/youtube/v3/videos"))
      .query(&[("part", "status,processingDetails"), ("id", video_id)])
      .bearer_auth(token)
      .send()?;
    if !response.status().is_success() {
      return Err(status_error(response));
    }
    let list: VideoList = response.json()?;
    Ok(list.items.into_iter().next().map(|item| {
      let processing = item.processing_details;
      VideoStatus {
        upload_status: item.status.upload_status,
        privacy_status: item.status.privacy_status,
        processing_status: processing.as_ref().and_then(|p| p.processing_status.clone()),
        processing_progress: processing.and_then(|p| p.processing_progress),
      }
    }))
  }
}

impl Uploader for YouTubeUploader {
  fn upload(&mut self, video: &Path, request: &UploadRequest) -> Result<String> {
    if !video.is_file() {
      return Err(Error::missing("Video file", video));
    }
    let total = video.metadata()?.len();
    if total == 0 {
      return Err(Error::Protocol(format!("{} is empty", video.display())));
    }
    let token = self.token()?;

    info!(video = %video.display(), bytes = total, title = %request.title, "Starting upload");
    let session = self.open_session(&token, total, request)?;
    let id = self.transfer(&session, &token, video, total)?;
    info!(video = %video.display(), video_id = %id, "Upload complete");
    Ok(id)
  }
}

/// Classify a response from the session URI.
fn interpret(response: Response) -> Result<Transfer> {
  match response.status() {
    StatusCode::OK | StatusCode::CREATED => {
      let video: UploadedVideo = response
        .json()
        .map_err(|e| Error::Protocol(format!("unreadable upload response: {e}")))?;
      if video.id.is_empty() {
        return Err(Error::Protocol("upload response has no video id".into()));
      }
      Ok(Transfer::Complete(video.id))
    }
    StatusCode::PERMANENT_REDIRECT => {
      let received = response
        .headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
          parse_range_end(v)
            .map(|end| end + 1)
            .ok_or_else(|| Error::Protocol(format!("malformed Range header `{v}`")))
        })
        .transpose()?
        .unwrap_or(0);
      Ok(Transfer::Incomplete(received))
    }
    _ => Err(status_error(response)),
  }
}

fn status_error(response: Response) -> Error {
  let status = response.status().as_u16();
  let message = response.text().unwrap_or_default();
  if status == 401 {
    return Error::Auth(format!("access token rejected: {message}"));
  }
  Error::Http { status, message }
}

/// Last byte index from a `Range: bytes=0-N` header.
///
/// ```rust
/// use shorts_uploader::upload::parse_range_end;
/// assert_eq!(parse_range_end("bytes=0-524287"), Some(524287));
/// assert_eq!(parse_range_end("bytes=0-"), None);
/// assert_eq!(parse_range_end("items=0-10"), None);
/// ```
pub fn parse_range_end(header: &str) -> Option<u64> {
  let (_, end) = header.trim().strip_prefix("bytes=")?.split_once('-')?;
  end.trim().parse().ok()
}
