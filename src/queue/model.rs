//! Queue entity model: jobs, files, articles
//!
//! The queue exclusively owns all jobs; files reference their job by id and
//! downloader tasks hold snapshots of `(job-id, file-id, part-number)` plus
//! the data they need. Deletion is "mark + drain": a deleted file stays
//! reachable until its active downloads reach zero.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::{
    ArticleSnapshot, ArticleStatus, DeleteStatus, DupeMode, FileId, FileSnapshot, JobId, JobKind,
    JobSnapshot, Message, MessageKind,
};
use crate::utils::is_par_filename;

/// Cap on per-job message logs
const JOB_LOG_CAP: usize = 100;

/// Shared handle to a file's single direct-write output.
///
/// The `Option<std::fs::File>` starts `None`; the first writing downloader
/// opens the file inside the mutex so no I/O ever happens under the queue
/// lock. The mutex itself is the file's output lock from the concurrency
/// model.
pub type OutputFileLock = Arc<tokio::sync::Mutex<Option<std::fs::File>>>;

/// One article (one Usenet message holding one part of one file).
#[derive(Debug, Clone)]
pub struct Article {
    /// 1-based part number
    pub part_number: u32,
    /// Message id without angle brackets
    pub message_id: String,
    /// Decoded size from the NZB segment
    pub size: u64,
    /// Download state
    pub status: ArticleStatus,
    /// On-disk partial when finished in non-direct-write mode
    pub result_path: Option<PathBuf>,
    /// Failover level the next attempt should lease at
    pub level: u32,
    /// Remaining download attempts
    pub retries_left: u32,
    /// Remaining connect-class attempts
    pub connect_retries_left: u32,
    /// Failed because the article was missing at every level
    pub missed: bool,
}

impl Article {
    /// Create a fresh article from NZB segment data.
    pub fn new(part_number: u32, message_id: String, size: u64, retries: u32, connect_retries: u32) -> Self {
        Self {
            part_number,
            message_id,
            size,
            status: ArticleStatus::Undefined,
            result_path: None,
            level: 0,
            retries_left: retries,
            connect_retries_left: connect_retries,
            missed: false,
        }
    }
}

/// One file inside a job (one Subject thread).
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Stable identifier
    pub id: FileId,
    /// Owning job
    pub job_id: JobId,
    /// Raw subject line
    pub subject: String,
    /// Filename (unconfirmed until a yEnc header names it)
    pub filename: String,
    /// Whether the filename came from a yEnc header
    pub filename_confirmed: bool,
    /// Derived from the filename extension
    pub is_par: bool,
    /// Newsgroups to try for GROUP selection
    pub groups: Vec<String>,
    /// Articles ordered by part number
    pub articles: Vec<Article>,
    /// Σ articles.size
    pub total_size: u64,
    /// Shrinks as articles complete (success or fail)
    pub remaining_size: u64,
    /// Bytes of articles missing at every level
    pub missed_size: u64,
    /// Bytes of successfully decoded articles
    pub success_size: u64,
    /// Bytes of failed articles (includes missed)
    pub failed_size: u64,
    /// Article counters
    pub success_articles: u32,
    /// Failed article count (includes missed)
    pub failed_articles: u32,
    /// Missed article count
    pub missed_articles: u32,
    /// success + failed (+ missed already included in failed)
    pub completed_articles: u32,
    /// Paused flag
    pub paused: bool,
    /// Deleted flag (mark + drain)
    pub deleted: bool,
    /// Forces this file ahead of priority comparisons
    pub extra_priority: bool,
    /// Downloader tasks currently holding articles of this file
    pub active_downloads: u32,
    /// Final on-disk name decided by the assembler
    pub output_filename: Option<String>,
    /// Direct-write output handle; created lazily on first active download
    pub output_lock: Option<OutputFileLock>,
}

impl FileInfo {
    /// Whether any article still awaits a first attempt.
    pub fn has_undefined_article(&self) -> bool {
        self.articles
            .iter()
            .any(|a| a.status == ArticleStatus::Undefined)
    }

    /// Whether article accounting is complete.
    pub fn is_complete(&self) -> bool {
        self.completed_articles as usize == self.articles.len()
    }

    /// Lazily create the shared output lock (cheap, no I/O).
    pub fn output_lock(&mut self) -> OutputFileLock {
        self.output_lock
            .get_or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    pub(crate) fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.id,
            job_id: self.job_id,
            subject: self.subject.clone(),
            filename: self.filename.clone(),
            filename_confirmed: self.filename_confirmed,
            total_size: self.total_size,
            remaining_size: self.remaining_size,
            paused: self.paused,
            active_downloads: self.active_downloads,
            articles: self
                .articles
                .iter()
                .map(|a| ArticleSnapshot {
                    part_number: a.part_number,
                    message_id: a.message_id.clone(),
                    size: a.size,
                    status: a.status,
                })
                .collect(),
        }
    }
}

/// One job: an NZB collection or a URL resolving to one.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stable monotonically-assigned identifier
    pub id: JobId,
    /// Display name
    pub name: String,
    /// Source NZB filename
    pub source_filename: String,
    /// Destination directory (category already applied)
    pub dest_dir: PathBuf,
    /// Category
    pub category: String,
    /// Priority, larger = earlier
    pub priority: i32,
    /// Job kind
    pub kind: JobKind,
    /// Source URL for url jobs
    pub url: Option<String>,
    /// Σ files.size
    pub size: u64,
    /// Σ files.remaining_size
    pub remaining_size: u64,
    /// Σ remaining_size over paused files
    pub paused_size: u64,
    /// Files still in the queue
    pub file_count: u32,
    /// Paused files
    pub paused_file_count: u32,
    /// Files whose name matches `*.par2`
    pub remaining_par_count: u32,
    /// Σ size over par files (for health)
    pub par_size: u64,
    /// Σ failed bytes within par files (for health)
    pub par_failed_size: u64,
    /// Σ failed bytes across the job
    pub failed_size: u64,
    /// Delete status
    pub delete_status: DeleteStatus,
    /// Duplicate key
    pub dupe_key: String,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: DupeMode,
    /// Many files legitimately share names inside this job
    pub many_dupe_files: bool,
    /// SHA-256 of the full NZB document
    pub content_hash: Option<String>,
    /// SHA-256 of the NZB with volatile parts stripped
    pub filtered_content_hash: Option<String>,
    /// Names of files the assembler has written
    pub completed_files: Vec<String>,
    /// Parameter map for post-processing collaborators
    pub parameters: BTreeMap<String, String>,
    /// Capped per-job message log
    pub messages: VecDeque<Message>,
    /// Successful article count across the job
    pub success_articles: u32,
    /// Failed article count across the job
    pub failed_articles: u32,
    /// When the job entered the queue
    pub queued_at: DateTime<Utc>,
    /// Files in queue order
    pub files: Vec<FileInfo>,
    next_message_id: u32,
}

impl Job {
    /// Create an empty job shell; the parser attaches files afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        name: String,
        source_filename: String,
        dest_dir: PathBuf,
        category: String,
        kind: JobKind,
        priority: i32,
    ) -> Self {
        Self {
            id,
            name,
            source_filename,
            dest_dir,
            category,
            priority,
            kind,
            url: None,
            size: 0,
            remaining_size: 0,
            paused_size: 0,
            file_count: 0,
            paused_file_count: 0,
            remaining_par_count: 0,
            par_size: 0,
            par_failed_size: 0,
            failed_size: 0,
            delete_status: DeleteStatus::None,
            dupe_key: String::new(),
            dupe_score: 0,
            dupe_mode: DupeMode::Score,
            many_dupe_files: false,
            content_hash: None,
            filtered_content_hash: None,
            completed_files: Vec::new(),
            parameters: BTreeMap::new(),
            messages: VecDeque::new(),
            success_articles: 0,
            failed_articles: 0,
            queued_at: Utc::now(),
            files: Vec::new(),
            next_message_id: 1,
        }
    }

    /// Attach a file and fold its sizes into the job aggregates.
    pub fn attach_file(&mut self, mut file: FileInfo) {
        file.job_id = self.id;
        self.size += file.total_size;
        self.remaining_size += file.remaining_size;
        self.file_count += 1;
        if file.paused {
            self.paused_size += file.remaining_size;
            self.paused_file_count += 1;
        }
        if file.is_par {
            self.remaining_par_count += 1;
            self.par_size += file.total_size;
        }
        self.files.push(file);
    }

    /// Detach a file, unfolding its contribution from the aggregates
    /// (the "partial delete" rules: size totals shrink).
    pub fn detach_file(&mut self, file_id: FileId) -> Option<FileInfo> {
        let idx = self.files.iter().position(|f| f.id == file_id)?;
        let file = self.files.remove(idx);
        self.size = self.size.saturating_sub(file.total_size);
        self.remaining_size = self.remaining_size.saturating_sub(file.remaining_size);
        self.file_count = self.file_count.saturating_sub(1);
        if file.paused {
            self.paused_size = self.paused_size.saturating_sub(file.remaining_size);
            self.paused_file_count = self.paused_file_count.saturating_sub(1);
        }
        if file.is_par {
            self.remaining_par_count = self.remaining_par_count.saturating_sub(1);
            self.par_size = self.par_size.saturating_sub(file.total_size);
            self.par_failed_size = self.par_failed_size.saturating_sub(file.failed_size);
        }
        self.failed_size = self.failed_size.saturating_sub(file.failed_size);
        Some(file)
    }

    /// Append to the capped per-job message log.
    pub fn log(&mut self, kind: MessageKind, text: impl Into<String>) {
        let message = Message {
            id: self.next_message_id,
            kind,
            time: Utc::now(),
            text: text.into(),
        };
        self.next_message_id += 1;
        self.messages.push_back(message);
        while self.messages.len() > JOB_LOG_CAP {
            self.messages.pop_front();
        }
    }

    /// Health in permille over the non-par payload:
    /// `(size − par_size − (failed − par_failed)) * 1000 / (size − par_size)`.
    pub fn health(&self) -> u32 {
        let payload = self.size.saturating_sub(self.par_size);
        if payload == 0 {
            return 1000;
        }
        let payload_failed = self.failed_size.saturating_sub(self.par_failed_size);
        let healthy = payload.saturating_sub(payload_failed);
        ((healthy as u128 * 1000) / payload as u128) as u32
    }

    /// Health floor below which the job is unrecoverable even with full par
    /// usage. Only par bytes that have not themselves failed count as
    /// recovery budget. Without any par data the floor is an empirical 850,
    /// avoiding false alarms for downloads with renamed par-files.
    pub fn critical_health(&self) -> u32 {
        if self.size == 0 {
            return 0;
        }
        let good_par_size = self.par_size.saturating_sub(self.par_failed_size);
        if good_par_size * 2 > self.size {
            return 0;
        }
        let mut critical = ((self.size - good_par_size * 2) as u128 * 1000
            / (self.size - good_par_size) as u128) as u32;
        if critical == 1000 && self.par_size > 0 {
            critical = 999;
        }
        if critical == 1000 {
            critical = 850;
        }
        critical
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            source_filename: self.source_filename.clone(),
            dest_dir: self.dest_dir.clone(),
            category: self.category.clone(),
            kind: self.kind,
            priority: self.priority,
            size: self.size,
            remaining_size: self.remaining_size,
            paused_size: self.paused_size,
            file_count: self.file_count,
            paused_file_count: self.paused_file_count,
            remaining_par_count: self.remaining_par_count,
            delete_status: self.delete_status,
            dupe_key: self.dupe_key.clone(),
            dupe_score: self.dupe_score,
            dupe_mode: self.dupe_mode,
            success_articles: self.success_articles,
            failed_articles: self.failed_articles,
            files: self.files.iter().map(|f| f.snapshot()).collect(),
        }
    }
}

/// Build a [`FileInfo`] from parsed NZB data.
#[allow(clippy::too_many_arguments)]
pub fn build_file(
    id: FileId,
    subject: String,
    filename: String,
    groups: Vec<String>,
    articles: Vec<Article>,
) -> FileInfo {
    let total_size: u64 = articles.iter().map(|a| a.size).sum();
    let is_par = is_par_filename(&filename);
    FileInfo {
        id,
        job_id: JobId::new(0),
        subject,
        filename,
        filename_confirmed: false,
        is_par,
        groups,
        articles,
        total_size,
        remaining_size: total_size,
        missed_size: 0,
        success_size: 0,
        failed_size: 0,
        success_articles: 0,
        failed_articles: 0,
        missed_articles: 0,
        completed_articles: 0,
        paused: false,
        deleted: false,
        extra_priority: false,
        active_downloads: 0,
        output_filename: None,
        output_lock: None,
    }
}
