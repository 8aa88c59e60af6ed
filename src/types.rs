//! Core types for usenet-engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a job (one NZB collection or one URL)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for a file within the queue
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl FileId {
    /// Create a new FileId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for FileId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FileId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Kind of a queue job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A parsed NZB collection with files and articles
    NzbCollection,
    /// A URL still waiting to be fetched and resolved into an NZB
    Url,
}

/// Why a job was (or is being) deleted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    /// Not deleted
    #[default]
    None,
    /// Deleted by the operator
    Manual,
    /// Deleted by the health gate
    Health,
    /// Deleted as a duplicate
    Dupe,
    /// Deleted as unrecoverable
    Bad,
}

/// Duplicate handling mode carried on jobs and feed items
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupeMode {
    /// Keep the best-scored copy
    #[default]
    Score,
    /// Keep all copies
    All,
    /// Download even if a duplicate exists
    Force,
}

impl DupeMode {
    /// Convert integer wire code to DupeMode
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => DupeMode::All,
            2 => DupeMode::Force,
            _ => DupeMode::Score,
        }
    }

    /// Convert DupeMode to integer wire code
    pub fn to_i32(&self) -> i32 {
        match self {
            DupeMode::Score => 0,
            DupeMode::All => 1,
            DupeMode::Force => 2,
        }
    }
}

/// Download state of one article
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    /// Not yet attempted (or re-queued for retry)
    #[default]
    Undefined,
    /// Held by exactly one downloader task
    Running,
    /// Decoded and written to disk
    Finished,
    /// Permanently failed (all levels or retries exhausted)
    Failed,
}

/// Severity of a log message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Debug detail
    Debug,
    /// Fine-grained progress detail
    Detail,
}

impl MessageKind {
    /// Convert integer wire code to MessageKind
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => MessageKind::Info,
            1 => MessageKind::Warning,
            2 => MessageKind::Error,
            3 => MessageKind::Debug,
            _ => MessageKind::Detail,
        }
    }

    /// Convert MessageKind to integer wire code
    pub fn to_i32(&self) -> i32 {
        match self {
            MessageKind::Info => 0,
            MessageKind::Warning => 1,
            MessageKind::Error => 2,
            MessageKind::Debug => 3,
            MessageKind::Detail => 4,
        }
    }
}

/// One entry of the engine or job message log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Monotonically increasing id
    pub id: u32,
    /// Severity
    pub kind: MessageKind,
    /// When the message was logged
    pub time: DateTime<Utc>,
    /// Message text
    pub text: String,
}

/// Which pause register a pause/resume targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseTarget {
    /// The download queue (no new article fetches start)
    Download,
    /// The post-processing collaborator queue
    PostProcess,
    /// Scanning of the incoming NZB directory
    Scan,
}

/// Event emitted during engine lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job added to the queue
    JobQueued {
        /// Job ID
        id: JobId,
        /// Job display name
        name: String,
    },

    /// Job removed from the queue
    JobRemoved {
        /// Job ID
        id: JobId,
    },

    /// One file finished article accounting and was assembled (or marked broken)
    FileCompleted {
        /// Owning job ID
        job_id: JobId,
        /// File ID
        file_id: FileId,
        /// Output filename
        filename: String,
        /// Whether every article decoded successfully
        complete: bool,
    },

    /// All files of a job resolved; the job is leaving the queue
    JobCompleted {
        /// Job ID
        id: JobId,
        /// Successful article count across the job
        success_articles: u32,
        /// Failed article count across the job
        failed_articles: u32,
    },

    /// A job fell below critical health and the configured policy fired
    HealthCritical {
        /// Job ID
        id: JobId,
        /// Health in permille (0..=1000)
        health: u32,
        /// Critical threshold in permille
        critical: u32,
        /// Whether the job was deleted (true) or paused (false)
        deleted: bool,
    },

    /// A pause register flipped
    PauseChanged {
        /// The register that changed
        target: PauseTarget,
        /// New state
        paused: bool,
    },

    /// The download rate limit changed
    RateLimitChanged {
        /// New limit in bytes per second (None = unlimited)
        limit_bps: Option<u64>,
    },

    /// A feed fetch pass finished
    FeedFetched {
        /// Feed name
        name: String,
        /// Items classified as new in this pass
        new_items: usize,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

/// Point-in-time view of one article (borne out of a queue snapshot)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArticleSnapshot {
    /// 1-based part number
    pub part_number: u32,
    /// Message id without angle brackets
    pub message_id: String,
    /// Decoded size from the NZB
    pub size: u64,
    /// Current status
    pub status: ArticleStatus,
}

/// Point-in-time view of one file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// File ID
    pub id: FileId,
    /// Owning job ID
    pub job_id: JobId,
    /// Raw subject line
    pub subject: String,
    /// Current filename (possibly still unconfirmed)
    pub filename: String,
    /// Whether the filename came from a yEnc header
    pub filename_confirmed: bool,
    /// Total size of all articles
    pub total_size: u64,
    /// Remaining (not yet finished) size
    pub remaining_size: u64,
    /// Paused flag
    pub paused: bool,
    /// Number of downloader tasks currently holding articles of this file
    pub active_downloads: u32,
    /// Articles in part order
    pub articles: Vec<ArticleSnapshot>,
}

/// Point-in-time view of one job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job ID
    pub id: JobId,
    /// Display name
    pub name: String,
    /// Source NZB filename
    pub source_filename: String,
    /// Destination directory
    pub dest_dir: PathBuf,
    /// Category
    pub category: String,
    /// Job kind
    pub kind: JobKind,
    /// Priority (larger = earlier)
    pub priority: i32,
    /// Total size in bytes
    pub size: u64,
    /// Remaining size in bytes
    pub remaining_size: u64,
    /// Remaining size of paused files
    pub paused_size: u64,
    /// Number of files still in the queue
    pub file_count: u32,
    /// Number of paused files
    pub paused_file_count: u32,
    /// Number of remaining par files
    pub remaining_par_count: u32,
    /// Delete status
    pub delete_status: DeleteStatus,
    /// Duplicate key
    pub dupe_key: String,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: DupeMode,
    /// Successful article count
    pub success_articles: u32,
    /// Failed article count
    pub failed_articles: u32,
    /// Files in queue order
    pub files: Vec<FileSnapshot>,
}
