//! Completed/deleted job history
//!
//! History entries are one tagged enum with the per-kind data inline: a
//! retired NZB collection, a URL job that never resolved, or a hidden dupe
//! record kept only for duplicate scoring.

use chrono::{DateTime, Utc};

use crate::types::{DeleteStatus, DupeMode, JobId};

/// One history record.
#[derive(Debug, Clone)]
pub enum HistoryEntry {
    /// A retired NZB collection
    Nzb {
        /// Job id the entry came from
        id: JobId,
        /// Display name
        name: String,
        /// When the entry was added
        time: DateTime<Utc>,
        /// Total size in bytes
        size: u64,
        /// Initial number of files
        file_count: u32,
        /// Successful article count
        success_articles: u32,
        /// Failed article count
        failed_articles: u32,
        /// Why the job left the queue (None = completed)
        delete_status: DeleteStatus,
        /// Par collaborator status slot (opaque to the core)
        par_status: i32,
        /// Script collaborator status slot (opaque to the core)
        script_status: i32,
    },
    /// A URL job that was fetched (or failed to fetch)
    Url {
        /// Job id the entry came from
        id: JobId,
        /// Display name
        name: String,
        /// When the entry was added
        time: DateTime<Utc>,
        /// The source URL
        url: String,
        /// Collaborator-visible URL status slot
        url_status: i32,
    },
    /// A hidden record kept for duplicate scoring
    Dupe {
        /// Job id the entry came from
        id: JobId,
        /// Display name
        name: String,
        /// When the entry was added
        time: DateTime<Utc>,
        /// Total size in bytes
        size: u64,
        /// Duplicate key
        dupe_key: String,
        /// Duplicate score
        dupe_score: i32,
        /// Duplicate mode
        dupe_mode: DupeMode,
    },
}

impl HistoryEntry {
    /// Wire kind: 1 = collection, 2 = url, 3 = dupe (hidden).
    pub fn kind(&self) -> i32 {
        match self {
            HistoryEntry::Nzb { .. } => 1,
            HistoryEntry::Url { .. } => 2,
            HistoryEntry::Dupe { .. } => 3,
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        match self {
            HistoryEntry::Nzb { name, .. }
            | HistoryEntry::Url { name, .. }
            | HistoryEntry::Dupe { name, .. } => name,
        }
    }

    /// When the entry was added.
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            HistoryEntry::Nzb { time, .. }
            | HistoryEntry::Url { time, .. }
            | HistoryEntry::Dupe { time, .. } => *time,
        }
    }

    /// Whether this record is hidden from normal listings.
    pub fn hidden(&self) -> bool {
        matches!(self, HistoryEntry::Dupe { .. })
    }

    /// Build the collection variant from a retired job.
    pub fn from_job(job: &crate::queue::Job) -> Self {
        match job.kind {
            crate::types::JobKind::Url => HistoryEntry::Url {
                id: job.id,
                name: job.name.clone(),
                time: Utc::now(),
                url: job.url.clone().unwrap_or_default(),
                url_status: 0,
            },
            crate::types::JobKind::NzbCollection => HistoryEntry::Nzb {
                id: job.id,
                name: job.name.clone(),
                time: Utc::now(),
                size: job.size,
                file_count: job.completed_files.len() as u32,
                success_articles: job.success_articles,
                failed_articles: job.failed_articles,
                delete_status: job.delete_status,
                par_status: 0,
                script_status: 0,
            },
        }
    }
}
