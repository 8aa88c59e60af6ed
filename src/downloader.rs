//! Article downloader task
//!
//! One task fetches one article on one leased connection: walk the file's
//! groups, request the article, stream the body through the yEnc decoder
//! while metering bytes, and persist the decoded part — either a per-article
//! partial under the temp directory or a positional write into the file's
//! shared output (direct-write mode), guarded by the file's output lock.
//!
//! The task classifies what happened and returns; all retry policy lives in
//! the scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_native_tls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::error::ArticleError;
use crate::nntp::{Lease, NntpConnection};
use crate::queue::ArticleAssignment;
use crate::speedmeter::SpeedMeter;
use crate::yenc::{DecodeResult, YencDecoder};

/// Throttle polling step while the rate limit is exceeded.
const THROTTLE_STEP: Duration = Duration::from_millis(200);

/// Cross-platform positional file write, equivalent to Unix `pwrite`.
#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

/// Cross-platform positional file write, equivalent to Unix `pwrite`.
#[cfg(windows)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        written += n;
    }
    Ok(())
}

/// Behavior knobs a task needs, captured once at spawn time.
#[derive(Clone)]
pub(crate) struct TaskSettings {
    /// Decode yEnc bodies (false = raw mode)
    pub decode: bool,
    /// Write decoded bytes into the shared output at the part offset
    pub direct_write: bool,
    /// Short-circuit when the result file already exists
    pub continue_partial: bool,
    /// Root temp directory
    pub temp_dir: PathBuf,
    /// Per-read socket timeout
    pub read_timeout: Duration,
    /// Global rate limit in bytes/sec (0 = unlimited)
    pub rate_limit: Arc<AtomicU64>,
    /// Shared speed meter
    pub speed: SpeedMeter,
    /// Shared TLS connector
    pub tls: Option<Arc<TlsConnector>>,
}

/// Successful article outcome.
pub(crate) struct FinishedArticle {
    /// Decoded (or raw) byte count persisted
    pub bytes: u64,
    /// Partial file on disk (None in direct-write mode)
    pub result_path: Option<PathBuf>,
    /// Filename announced by the yEnc header
    pub yenc_filename: Option<String>,
}

/// Everything a finished task hands back to the scheduler.
pub(crate) struct TaskOutput {
    /// What happened
    pub result: Result<FinishedArticle, ArticleError>,
    /// The connection, if it survived
    pub connection: Option<NntpConnection>,
    /// Whether the connection is healthy enough to pool
    pub reusable: bool,
}

/// Per-article partial location in non-direct-write mode.
pub(crate) fn partial_path(temp_dir: &Path, assignment: &ArticleAssignment) -> PathBuf {
    temp_dir
        .join(format!("j{}", assignment.job_id))
        .join(format!("f{}.{:03}.part", assignment.file_id, assignment.part_number))
}

/// Shared direct-write output location (renamed into place by the assembler).
pub(crate) fn direct_output_path(temp_dir: &Path, job_id: crate::types::JobId, file_id: crate::types::FileId) -> PathBuf {
    temp_dir
        .join(format!("j{job_id}"))
        .join(format!("f{file_id}.out"))
}

/// Execute one article fetch. Never panics; every failure classifies into
/// [`ArticleError`].
pub(crate) async fn run_article_task(
    assignment: &ArticleAssignment,
    lease: Lease,
    settings: &TaskSettings,
    cancel: &CancellationToken,
    last_activity: &Arc<AtomicU64>,
) -> TaskOutput {
    touch(last_activity);

    // continue-partial: the part already sits on disk from an earlier session
    let partial = partial_path(&settings.temp_dir, assignment);
    if settings.continue_partial && !settings.direct_write && partial.exists() {
        tracing::debug!(
            file_id = assignment.file_id.get(),
            part = assignment.part_number,
            "partial already on disk, skipping fetch"
        );
        return TaskOutput {
            result: Ok(FinishedArticle {
                bytes: assignment.size,
                result_path: Some(partial),
                yenc_filename: None,
            }),
            connection: lease.connection,
            reusable: true,
        };
    }

    let server = lease.server.clone();
    let mut conn = match lease.connection {
        Some(conn) => conn,
        None => {
            let connected = tokio::select! {
                result = NntpConnection::connect(&server, settings.read_timeout, settings.tls.clone()) => result,
                _ = cancel.cancelled() => Err(ArticleError::Cancelled),
            };
            let mut conn = match connected {
                Ok(conn) => conn,
                Err(e) => {
                    return TaskOutput {
                        result: Err(e),
                        connection: None,
                        reusable: false,
                    };
                }
            };
            if let Err(e) = conn.authenticate(&server).await {
                return TaskOutput {
                    result: Err(e),
                    connection: None,
                    reusable: false,
                };
            }
            conn
        }
    };

    match fetch_article(assignment, &mut conn, settings, cancel, last_activity).await {
        Ok(finished) => TaskOutput {
            result: Ok(finished),
            connection: Some(conn),
            reusable: true,
        },
        Err(e) => {
            // a clean 4xx refusal leaves the protocol state intact; anything
            // else (mismatch mid-body, timeouts) may have desynchronized the
            // conversation
            let reusable = matches!(e, ArticleError::NotFound(_)) && !conn.is_cancelled();
            TaskOutput {
                result: Err(e),
                connection: Some(conn),
                reusable,
            }
        }
    }
}

async fn fetch_article(
    assignment: &ArticleAssignment,
    conn: &mut NntpConnection,
    settings: &TaskSettings,
    cancel: &CancellationToken,
    last_activity: &Arc<AtomicU64>,
) -> Result<FinishedArticle, ArticleError> {
    // walk the file's groups until one joins
    let mut joined = false;
    let mut last_error = ArticleError::NotFound("no groups".to_string());
    for group in &assignment.groups {
        if cancel.is_cancelled() {
            return Err(ArticleError::Cancelled);
        }
        match conn.join_group(group).await {
            Ok(()) => {
                joined = true;
                break;
            }
            Err(e @ ArticleError::NotFound(_)) => last_error = e,
            Err(e) => return Err(e),
        }
    }
    if !joined {
        return Err(last_error);
    }

    // the first 2xx starts body streaming; plain failures get re-asked
    let mut attempts = 0;
    loop {
        attempts += 1;
        match conn.request_article(&assignment.message_id).await {
            Ok(()) => break,
            Err(ArticleError::Failed(msg)) if attempts < 3 => {
                tracing::debug!(
                    message_id = %assignment.message_id,
                    attempt = attempts,
                    error = %msg,
                    "ARTICLE refused, asking again"
                );
            }
            Err(e) => return Err(e),
        }
    }

    read_body(assignment, conn, settings, cancel, last_activity).await
}

async fn read_body(
    assignment: &ArticleAssignment,
    conn: &mut NntpConnection,
    settings: &TaskSettings,
    cancel: &CancellationToken,
    last_activity: &Arc<AtomicU64>,
) -> Result<FinishedArticle, ArticleError> {
    let mut decoder = YencDecoder::new();
    let mut decoded: Vec<u8> = Vec::with_capacity(assignment.size as usize + 128);
    let mut raw: Vec<u8> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            conn.cancel();
            return Err(ArticleError::Cancelled);
        }
        throttle(settings).await;

        // the cancel arm must not touch `conn` while the read future
        // borrows it; resolve to an Option first
        let read = tokio::select! {
            result = conn.read_body_line() => Some(result),
            _ = cancel.cancelled() => None,
        };
        let line = match read {
            Some(result) => result?,
            None => {
                conn.cancel();
                return Err(ArticleError::Cancelled);
            }
        };
        match line {
            crate::nntp::BodyLine::End => break,
            crate::nntp::BodyLine::Data { line, raw_len } => {
                settings.speed.add_bytes(raw_len as u64);
                touch(last_activity);
                if settings.decode {
                    decoder.feed_line(&line, &mut decoded);
                } else {
                    raw.extend_from_slice(&line);
                    raw.extend_from_slice(b"\r\n");
                }
            }
        }
    }

    if !settings.decode {
        let path = partial_path(&settings.temp_dir, assignment);
        persist(&path, &raw)?;
        return Ok(FinishedArticle {
            bytes: raw.len() as u64,
            result_path: Some(path),
            yenc_filename: None,
        });
    }

    let yenc_filename = decoder.filename().map(|s| s.to_string());
    let offset = decoder.write_offset();
    let header_size = decoder.file_size();
    let emitted = decoder.emitted();

    match decoder.finish() {
        DecodeResult::Finished => {}
        DecodeResult::CrcError { expected, calculated } => {
            return Err(ArticleError::CrcError { expected, calculated });
        }
        DecodeResult::ArticleIncomplete => {
            return Err(ArticleError::Incomplete(format!(
                "yEnc part short: {emitted} bytes decoded"
            )));
        }
        DecodeResult::InvalidData => {
            return Err(ArticleError::Failed("article body is not yEnc".to_string()));
        }
    }

    if settings.direct_write {
        // positional write into the shared output, under the file's lock
        let mut guard = assignment.output_lock.lock().await;
        if guard.is_none() {
            let path = direct_output_path(&settings.temp_dir, assignment.job_id, assignment.file_id);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ArticleError::Fatal(format!("creating {}: {e}", parent.display())))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| ArticleError::Fatal(format!("opening {}: {e}", path.display())))?;
            let full_size = if header_size > 0 {
                header_size
            } else {
                assignment.file_total_size
            };
            if full_size > 0 {
                file.set_len(full_size)
                    .map_err(|e| ArticleError::Fatal(format!("pre-allocating: {e}")))?;
            }
            *guard = Some(file);
        }
        let file = guard
            .as_ref()
            .ok_or_else(|| ArticleError::Fatal("output file vanished".to_string()))?;
        write_all_at(file, &decoded, offset)
            .map_err(|e| ArticleError::Fatal(format!("writing at offset {offset}: {e}")))?;
        Ok(FinishedArticle {
            bytes: decoded.len() as u64,
            result_path: None,
            yenc_filename,
        })
    } else {
        let path = partial_path(&settings.temp_dir, assignment);
        persist(&path, &decoded)?;
        Ok(FinishedArticle {
            bytes: decoded.len() as u64,
            result_path: Some(path),
            yenc_filename,
        })
    }
}

/// Wait in small steps while the global byte-rate limit is exceeded.
async fn throttle(settings: &TaskSettings) {
    loop {
        let limit = settings.rate_limit.load(Ordering::Relaxed);
        if limit == 0 || settings.speed.speed_bps() < limit {
            return;
        }
        tokio::time::sleep(THROTTLE_STEP).await;
    }
}

fn persist(path: &Path, data: &[u8]) -> Result<(), ArticleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ArticleError::Fatal(format!("creating {}: {e}", parent.display())))?;
    }
    std::fs::write(path, data)
        .map_err(|e| ArticleError::Fatal(format!("writing {}: {e}", path.display())))
}

/// Update the watchdog heartbeat (seconds on a shared monotonic scale).
pub(crate) fn touch(last_activity: &Arc<AtomicU64>) {
    last_activity.store(monotonic_secs(), Ordering::Relaxed);
}

/// Seconds since a process-wide monotonic epoch, shared with the watchdog.
pub(crate) fn monotonic_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}
