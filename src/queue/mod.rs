//! The prioritized download queue
//!
//! All jobs, files and articles live behind one async mutex. Every reader and
//! writer takes that mutex; aggregate counters on the owning job are
//! maintained incrementally on every file mutation so reads stay O(1), and no
//! operation performs I/O while holding the lock. Expensive work (decoding,
//! joining, disk writes) happens outside against data captured under the
//! lock.

mod model;

pub use model::{Article, FileInfo, Job, OutputFileLock, build_file};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{
    ArticleStatus, DeleteStatus, DupeMode, FileId, JobId, JobSnapshot, MessageKind,
};

/// Where to move a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    /// Relative move by signed offset
    Offset(i32),
    /// To the front of the queue
    Top,
    /// To the back of the queue
    Bottom,
}

/// Everything a downloader task needs to fetch one article, captured under
/// the queue lock so the task never touches shared state mid-flight.
#[derive(Clone)]
pub struct ArticleAssignment {
    /// Owning job
    pub job_id: JobId,
    /// Owning file
    pub file_id: FileId,
    /// 1-based part number
    pub part_number: u32,
    /// Message id without angle brackets
    pub message_id: String,
    /// Decoded size from the NZB
    pub size: u64,
    /// Failover level to lease at
    pub level: u32,
    /// Remaining download attempts
    pub retries_left: u32,
    /// Remaining connect-class attempts
    pub connect_retries_left: u32,
    /// Newsgroups to try for GROUP selection
    pub groups: Vec<String>,
    /// Current filename of the file
    pub filename: String,
    /// Destination directory of the job
    pub dest_dir: PathBuf,
    /// Total file size (for direct-write pre-allocation)
    pub file_total_size: u64,
    /// Shared direct-write output lock
    pub output_lock: OutputFileLock,
}

/// One article's final standing handed to the assembler.
#[derive(Debug, Clone)]
pub struct ArticlePart {
    /// 1-based part number
    pub part_number: u32,
    /// Final status
    pub status: ArticleStatus,
    /// Partial file on disk (non-direct-write mode)
    pub result_path: Option<PathBuf>,
    /// Decoded size
    pub size: u64,
}

/// Data the assembler needs for one completed file, captured under the lock.
#[derive(Clone)]
pub struct FileCompletion {
    /// Owning job
    pub job_id: JobId,
    /// The file
    pub file_id: FileId,
    /// Filename to write
    pub filename: String,
    /// Destination directory
    pub dest_dir: PathBuf,
    /// Article standings in part order
    pub articles: Vec<ArticlePart>,
    /// Successful article count
    pub success_articles: u32,
    /// Failed article count
    pub failed_articles: u32,
    /// Total article count
    pub total_articles: u32,
    /// Shared direct-write output handle
    pub output_lock: OutputFileLock,
    /// Owning job's delete status (assembly is skipped for deleted jobs)
    pub job_delete_status: DeleteStatus,
    /// Owning job's dupe mode (force disables filename dedupe)
    pub dupe_mode: DupeMode,
    /// Job legitimately contains many same-named files
    pub many_dupe_files: bool,
}

/// Side effects of completing or cancelling an article.
#[derive(Default)]
pub struct CompletionEffect {
    /// File finished article accounting; run the assembler
    pub file_completed: Option<FileCompletion>,
    /// Files whose deferred delete drained
    pub removed_files: Vec<FileInfo>,
    /// The job emptied out and left the queue
    pub removed_job: Option<Job>,
}

/// Health verdict for a job after a file completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Above the critical threshold
    Ok,
    /// Below the critical threshold; policy must fire
    Critical {
        /// Current health in permille
        health: u32,
        /// Critical threshold in permille
        critical: u32,
    },
}

/// Outcome of retiring a file after assembly.
#[derive(Default)]
pub struct RetireEffect {
    /// The job finished its last file and left the queue
    pub completed_job: Option<Job>,
    /// Health verdict for the (still queued) job
    pub health: Option<HealthVerdict>,
}

struct QueueInner {
    jobs: Vec<Job>,
    next_job_id: i64,
    next_file_id: i64,
    article_retries: u32,
    article_connect_retries: u32,
}

impl QueueInner {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    fn job(&self, id: JobId) -> Result<&Job> {
        self.jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    fn locate_file(&self, id: FileId) -> Result<(usize, usize)> {
        for (ji, job) in self.jobs.iter().enumerate() {
            if let Some(fi) = job.files.iter().position(|f| f.id == id) {
                return Ok((ji, fi));
            }
        }
        Err(Error::NotFound(format!("file {id}")))
    }

    /// Fold one completed article into file and job counters.
    fn account_completion(job: &mut Job, file_idx: usize, part_idx: usize, finished: bool, missed: bool) {
        let file = &mut job.files[file_idx];
        let size = file.articles[part_idx].size;
        file.completed_articles += 1;
        file.remaining_size = file.remaining_size.saturating_sub(size);
        if finished {
            file.success_articles += 1;
            file.success_size += size;
        } else {
            file.failed_articles += 1;
            file.failed_size += size;
            if missed {
                file.missed_articles += 1;
                file.missed_size += size;
            }
        }
        let file_paused = file.paused;
        let file_is_par = file.is_par;
        job.remaining_size = job.remaining_size.saturating_sub(size);
        if file_paused {
            job.paused_size = job.paused_size.saturating_sub(size);
        }
        if finished {
            job.success_articles += 1;
        } else {
            job.failed_articles += 1;
            job.failed_size += size;
            if file_is_par {
                job.par_failed_size += size;
            }
        }
    }

    fn completion_for(job: &Job, file_idx: usize) -> FileCompletion {
        let file = &job.files[file_idx];
        FileCompletion {
            job_id: job.id,
            file_id: file.id,
            filename: file.filename.clone(),
            dest_dir: job.dest_dir.clone(),
            articles: file
                .articles
                .iter()
                .map(|a| ArticlePart {
                    part_number: a.part_number,
                    status: a.status,
                    result_path: a.result_path.clone(),
                    size: a.size,
                })
                .collect(),
            success_articles: file.success_articles,
            failed_articles: file.failed_articles,
            total_articles: file.articles.len() as u32,
            output_lock: file
                .output_lock
                .clone()
                .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(None))),
            job_delete_status: job.delete_status,
            dupe_mode: job.dupe_mode,
            many_dupe_files: job.many_dupe_files,
        }
    }

    /// Drop drained deleted files and, if the job emptied, the job itself.
    fn drain_deleted(&mut self, job_idx: usize) -> (Vec<FileInfo>, Option<Job>) {
        let job = &mut self.jobs[job_idx];
        let drained: Vec<FileId> = job
            .files
            .iter()
            .filter(|f| f.deleted && f.active_downloads == 0)
            .map(|f| f.id)
            .collect();
        let mut removed = Vec::new();
        for id in drained {
            if let Some(file) = job.detach_file(id) {
                removed.push(file);
            }
        }
        let removed_job = if job.files.is_empty() && (job.delete_status != DeleteStatus::None || !removed.is_empty()) {
            Some(self.jobs.remove(job_idx))
        } else {
            None
        };
        (removed, removed_job)
    }
}

/// Handle to the shared download queue. Clones observe the same state.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl DownloadQueue {
    /// Create an empty queue. `article_retries` / `connect_retries` seed the
    /// per-article retry budgets.
    pub fn new(article_retries: u32, article_connect_retries: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                jobs: Vec::new(),
                next_job_id: 1,
                next_file_id: 1,
                article_retries,
                article_connect_retries,
            })),
        }
    }

    /// Insert a parsed job, assigning fresh job and file ids. Returns the id.
    pub async fn add_job(&self, mut job: Job) -> JobId {
        let mut inner = self.inner.lock().await;
        let job_id = JobId::new(inner.next_job_id);
        inner.next_job_id += 1;
        job.id = job_id;
        for file in &mut job.files {
            file.id = FileId::new(inner.next_file_id);
            inner.next_file_id += 1;
            file.job_id = job_id;
            for article in &mut file.articles {
                article.retries_left = inner.article_retries;
                article.connect_retries_left = inner.article_connect_retries;
            }
        }
        inner.jobs.push(job);
        job_id
    }

    /// Attach parsed files to a placeholder URL job, turning it into a
    /// regular collection. Used when the URL fetch resolves.
    pub async fn resolve_url_job(
        &self,
        id: JobId,
        files: Vec<FileInfo>,
        name: Option<String>,
        content_hash: String,
        filtered_content_hash: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let retries = inner.article_retries;
        let connect_retries = inner.article_connect_retries;
        let mut next_file_id = inner.next_file_id;
        let job = inner.job_mut(id)?;
        if job.kind != crate::types::JobKind::Url {
            return Err(Error::InvalidState {
                operation: "resolve".to_string(),
                reason: format!("job {id} is not a URL job"),
            });
        }
        job.kind = crate::types::JobKind::NzbCollection;
        job.content_hash = Some(content_hash);
        job.filtered_content_hash = Some(filtered_content_hash);
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            job.name = name;
        }
        for mut file in files {
            file.id = FileId::new(next_file_id);
            next_file_id += 1;
            for article in &mut file.articles {
                article.retries_left = retries;
                article.connect_retries_left = connect_retries;
            }
            job.attach_file(file);
        }
        inner.next_file_id = next_file_id;
        Ok(())
    }

    /// Point-in-time view of every job.
    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let inner = self.inner.lock().await;
        inner.jobs.iter().map(|j| j.snapshot()).collect()
    }

    /// Point-in-time view of one job.
    pub async fn job_snapshot(&self, id: JobId) -> Result<JobSnapshot> {
        let inner = self.inner.lock().await;
        Ok(inner.job(id)?.snapshot())
    }

    /// Whether the queue holds no jobs.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }

    /// Total remaining bytes over unpaused files (for the RPC List header).
    pub async fn remaining_size(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .iter()
            .map(|j| j.remaining_size.saturating_sub(j.paused_size))
            .sum()
    }

    /// Append to a job's message log.
    pub async fn log_job(&self, id: JobId, kind: MessageKind, text: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if let Ok(job) = inner.job_mut(id) {
            job.log(kind, text);
        }
    }

    /// Whether any queued job carries this dupe key.
    pub async fn has_dupe_key(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let inner = self.inner.lock().await;
        inner.jobs.iter().any(|j| j.dupe_key == key)
    }

    // ---- file / job flag operations -------------------------------------

    /// Pause or resume one file, maintaining the owning job's paused
    /// aggregates.
    pub async fn pause_file(&self, id: FileId, paused: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        let job = &mut inner.jobs[ji];
        let file = &mut job.files[fi];
        if file.paused == paused {
            return Ok(());
        }
        file.paused = paused;
        let remaining = file.remaining_size;
        if paused {
            job.paused_size += remaining;
            job.paused_file_count += 1;
        } else {
            job.paused_size = job.paused_size.saturating_sub(remaining);
            job.paused_file_count = job.paused_file_count.saturating_sub(1);
        }
        Ok(())
    }

    /// Pause or resume every file of a job.
    pub async fn pause_job(&self, id: JobId, paused: bool) -> Result<()> {
        let file_ids: Vec<FileId> = {
            let mut inner = self.inner.lock().await;
            inner.job_mut(id)?.files.iter().map(|f| f.id).collect()
        };
        for fid in file_ids {
            self.pause_file(fid, paused).await?;
        }
        Ok(())
    }

    /// Pause par files of a job: all of them, or only the larger recovery
    /// volumes (the smallest par set stays live for verification).
    pub async fn pause_pars(&self, id: JobId, extra_only: bool) -> Result<()> {
        let targets: Vec<FileId> = {
            let mut inner = self.inner.lock().await;
            let job = inner.job_mut(id)?;
            let mut pars: Vec<(FileId, u64)> = job
                .files
                .iter()
                .filter(|f| f.is_par && !f.paused)
                .map(|f| (f.id, f.total_size))
                .collect();
            if extra_only && !pars.is_empty() {
                // keep the smallest par file unpaused
                pars.sort_by_key(|(_, size)| *size);
                pars.remove(0);
            }
            pars.into_iter().map(|(id, _)| id).collect()
        };
        for fid in targets {
            self.pause_file(fid, true).await?;
        }
        Ok(())
    }

    /// Flag a file for par-recovery unpause: resumed and scheduled ahead of
    /// every priority comparison.
    pub async fn set_extra_priority(&self, id: FileId, extra: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        inner.jobs[ji].files[fi].extra_priority = extra;
        Ok(())
    }

    /// Mark one file deleted (mark + drain). Files with no active downloads
    /// are detached immediately.
    pub async fn delete_file(&self, id: FileId) -> Result<CompletionEffect> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        inner.jobs[ji].files[fi].deleted = true;
        let (removed_files, removed_job) = inner.drain_deleted(ji);
        Ok(CompletionEffect {
            file_completed: None,
            removed_files,
            removed_job,
        })
    }

    /// Mark a whole job deleted with the given status.
    pub async fn delete_job(&self, id: JobId, status: DeleteStatus) -> Result<CompletionEffect> {
        let mut inner = self.inner.lock().await;
        let ji = inner
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        let job = &mut inner.jobs[ji];
        job.delete_status = status;
        for file in &mut job.files {
            file.deleted = true;
        }
        let (removed_files, removed_job) = inner.drain_deleted(ji);
        Ok(CompletionEffect {
            file_completed: None,
            removed_files,
            removed_job,
        })
    }

    /// File ids of a job that are currently running (for task cancellation).
    pub async fn running_files(&self, id: JobId) -> Vec<FileId> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .iter()
            .find(|j| j.id == id)
            .map(|j| {
                j.files
                    .iter()
                    .filter(|f| f.active_downloads > 0)
                    .map(|f| f.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ---- ordering -------------------------------------------------------

    /// Reorder a job within the queue.
    pub async fn move_job(&self, id: JobId, target: MoveTarget) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let from = inner
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        let job = inner.jobs.remove(from);
        let len = inner.jobs.len();
        let to = match target {
            MoveTarget::Top => 0,
            MoveTarget::Bottom => len,
            MoveTarget::Offset(delta) => {
                let idx = from as i64 + delta as i64;
                idx.clamp(0, len as i64) as usize
            }
        };
        inner.jobs.insert(to, job);
        Ok(())
    }

    /// Reorder a file within its job.
    pub async fn move_file(&self, id: FileId, target: MoveTarget) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let (ji, from) = inner.locate_file(id)?;
        let job = &mut inner.jobs[ji];
        let file = job.files.remove(from);
        let len = job.files.len();
        let to = match target {
            MoveTarget::Top => 0,
            MoveTarget::Bottom => len,
            MoveTarget::Offset(delta) => {
                let idx = from as i64 + delta as i64;
                idx.clamp(0, len as i64) as usize
            }
        };
        job.files.insert(to, file);
        Ok(())
    }

    // ---- group surgery --------------------------------------------------

    /// Move the listed files into a new job named `name`. The source job is
    /// removed if it becomes empty. Returns the new job id.
    pub async fn split_job(&self, name: &str, file_ids: &[FileId]) -> Result<JobId> {
        if name.trim().is_empty() {
            return Err(Error::InvalidState {
                operation: "split".to_string(),
                reason: "new group name must not be empty".to_string(),
            });
        }
        let mut inner = self.inner.lock().await;
        let Some(&first) = file_ids.first() else {
            return Err(Error::InvalidState {
                operation: "split".to_string(),
                reason: "no files selected".to_string(),
            });
        };
        let (src_idx, _) = inner.locate_file(first)?;

        let new_id = JobId::new(inner.next_job_id);
        inner.next_job_id += 1;

        let src = &mut inner.jobs[src_idx];
        let mut new_job = Job::new(
            new_id,
            name.to_string(),
            src.source_filename.clone(),
            src.dest_dir.clone(),
            src.category.clone(),
            src.kind,
            src.priority,
        );
        for &fid in file_ids {
            if let Some(file) = src.detach_file(fid) {
                new_job.attach_file(file);
            }
        }
        if new_job.files.is_empty() {
            return Err(Error::InvalidState {
                operation: "split".to_string(),
                reason: "selected files not found in one group".to_string(),
            });
        }
        let src_empty = src.files.is_empty();
        if src_empty {
            inner.jobs.remove(src_idx);
        }
        inner.jobs.push(new_job);
        Ok(new_id)
    }

    /// Splice every file of `src` into `dest`, dropping `src`.
    pub async fn merge_jobs(&self, dest: JobId, src: JobId) -> Result<()> {
        if dest == src {
            return Err(Error::InvalidState {
                operation: "merge".to_string(),
                reason: "cannot merge a group into itself".to_string(),
            });
        }
        let mut inner = self.inner.lock().await;
        let src_idx = inner
            .jobs
            .iter()
            .position(|j| j.id == src)
            .ok_or_else(|| Error::NotFound(format!("job {src}")))?;
        // detach all source files first to keep borrowck happy
        let file_ids: Vec<FileId> = inner.jobs[src_idx].files.iter().map(|f| f.id).collect();
        let mut moved = Vec::with_capacity(file_ids.len());
        for fid in file_ids {
            if let Some(f) = inner.jobs[src_idx].detach_file(fid) {
                moved.push(f);
            }
        }
        inner.jobs.remove(src_idx);
        let dest_job = inner.job_mut(dest)?;
        for file in moved {
            dest_job.attach_file(file);
        }
        Ok(())
    }

    // ---- metadata -------------------------------------------------------

    /// Rewrite the category and destination directory.
    pub async fn set_category(&self, id: JobId, category: &str, dest_dir: PathBuf) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        job.category = category.to_string();
        job.dest_dir = dest_dir;
        Ok(())
    }

    /// Rename a job (validates non-empty).
    pub async fn rename_job(&self, id: JobId, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidState {
                operation: "rename".to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        let mut inner = self.inner.lock().await;
        inner.job_mut(id)?.name = name.trim().to_string();
        Ok(())
    }

    /// Reset a job's priority.
    pub async fn set_priority(&self, id: JobId, priority: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.job_mut(id)?.priority = priority;
        Ok(())
    }

    /// Update the post-processing parameter map (`key=value`; empty value
    /// removes the key).
    pub async fn set_parameter(&self, id: JobId, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        if value.is_empty() {
            job.parameters.remove(key);
        } else {
            job.parameters.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Set duplicate bookkeeping fields.
    pub async fn set_dupe(&self, id: JobId, key: &str, score: i32, mode: DupeMode) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        job.dupe_key = key.to_string();
        job.dupe_score = score;
        job.dupe_mode = mode;
        Ok(())
    }

    // ---- scheduler interface --------------------------------------------

    /// Pick the next article to download: the file with the greatest
    /// `(extra_priority, priority)` among unpaused, undeleted files with an
    /// undefined article, skipping files in `skip` (exhausted this tick).
    /// The chosen article transitions to `Running`.
    pub async fn next_assignment(&self, skip: &HashSet<FileId>) -> Option<ArticleAssignment> {
        let mut inner = self.inner.lock().await;
        let mut best: Option<(usize, usize, bool, i32)> = None;
        for (ji, job) in inner.jobs.iter().enumerate() {
            if job.delete_status != DeleteStatus::None {
                continue;
            }
            for (fi, file) in job.files.iter().enumerate() {
                if file.paused || file.deleted || skip.contains(&file.id) {
                    continue;
                }
                if !file.has_undefined_article() {
                    continue;
                }
                let key = (file.extra_priority, job.priority);
                match best {
                    Some((_, _, be, bp)) if (be, bp) >= key => {}
                    _ => best = Some((ji, fi, file.extra_priority, job.priority)),
                }
            }
        }
        let (ji, fi, _, _) = best?;
        let job = &mut inner.jobs[ji];
        let job_id = job.id;
        let dest_dir = job.dest_dir.clone();
        let file = &mut job.files[fi];
        let output_lock = file.output_lock();
        let pi = file
            .articles
            .iter()
            .position(|a| a.status == ArticleStatus::Undefined)?;
        file.articles[pi].status = ArticleStatus::Running;
        file.active_downloads += 1;
        let article = &file.articles[pi];
        Some(ArticleAssignment {
            job_id,
            file_id: file.id,
            part_number: article.part_number,
            message_id: article.message_id.clone(),
            size: article.size,
            level: article.level,
            retries_left: article.retries_left,
            connect_retries_left: article.connect_retries_left,
            groups: file.groups.clone(),
            filename: file.filename.clone(),
            dest_dir,
            file_total_size: file.total_size,
            output_lock,
        })
    }

    /// Confirm a filename from the first decoded yEnc header. Returns the
    /// previous name when it actually changed.
    pub async fn confirm_filename(&self, id: FileId, name: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id).ok()?;
        let file = &mut inner.jobs[ji].files[fi];
        if file.filename_confirmed || name.is_empty() {
            return None;
        }
        file.filename_confirmed = true;
        if file.filename != name {
            let old = std::mem::replace(&mut file.filename, name.to_string());
            return Some(old);
        }
        None
    }

    /// Record a finished article. Returns completion side effects.
    pub async fn finish_article(
        &self,
        id: FileId,
        part_number: u32,
        result_path: Option<PathBuf>,
    ) -> Result<CompletionEffect> {
        self.complete_article(id, part_number, true, false, result_path)
            .await
    }

    /// Record a permanently failed article (`missed` = gone at every level).
    pub async fn fail_article(
        &self,
        id: FileId,
        part_number: u32,
        missed: bool,
    ) -> Result<CompletionEffect> {
        self.complete_article(id, part_number, false, missed, None)
            .await
    }

    async fn complete_article(
        &self,
        id: FileId,
        part_number: u32,
        finished: bool,
        missed: bool,
        result_path: Option<PathBuf>,
    ) -> Result<CompletionEffect> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        let job = &mut inner.jobs[ji];
        let pi = job.files[fi]
            .articles
            .iter()
            .position(|a| a.part_number == part_number)
            .ok_or_else(|| Error::NotFound(format!("article {part_number} of file {id}")))?;
        {
            let file = &mut job.files[fi];
            let article = &mut file.articles[pi];
            article.status = if finished {
                ArticleStatus::Finished
            } else {
                ArticleStatus::Failed
            };
            article.missed = missed;
            article.result_path = result_path;
            file.active_downloads = file.active_downloads.saturating_sub(1);
        }
        QueueInner::account_completion(job, fi, pi, finished, missed);

        let file = &job.files[fi];
        let file_completed = if file.is_complete() && !file.deleted {
            Some(QueueInner::completion_for(job, fi))
        } else {
            None
        };
        let (removed_files, removed_job) = inner.drain_deleted(ji);
        Ok(CompletionEffect {
            file_completed,
            removed_files,
            removed_job,
        })
    }

    /// Put a running article back to `Undefined` for another attempt,
    /// optionally at a new level, with updated retry budgets.
    pub async fn requeue_article(
        &self,
        id: FileId,
        part_number: u32,
        new_level: u32,
        retries_left: u32,
        connect_retries_left: u32,
    ) -> Result<CompletionEffect> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        {
            let file = &mut inner.jobs[ji].files[fi];
            if let Some(article) = file
                .articles
                .iter_mut()
                .find(|a| a.part_number == part_number)
            {
                article.status = ArticleStatus::Undefined;
                article.level = new_level;
                article.retries_left = retries_left;
                article.connect_retries_left = connect_retries_left;
            }
            file.active_downloads = file.active_downloads.saturating_sub(1);
        }
        let (removed_files, removed_job) = inner.drain_deleted(ji);
        Ok(CompletionEffect {
            file_completed: None,
            removed_files,
            removed_job,
        })
    }

    /// Return a cancelled article to `Undefined` without burning a retry.
    pub async fn article_cancelled(&self, id: FileId, part_number: u32) -> Result<CompletionEffect> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        {
            let file = &mut inner.jobs[ji].files[fi];
            if let Some(article) = file
                .articles
                .iter_mut()
                .find(|a| a.part_number == part_number)
            {
                if article.status == ArticleStatus::Running {
                    article.status = ArticleStatus::Undefined;
                }
            }
            file.active_downloads = file.active_downloads.saturating_sub(1);
        }
        let (removed_files, removed_job) = inner.drain_deleted(ji);
        Ok(CompletionEffect {
            file_completed: None,
            removed_files,
            removed_job,
        })
    }

    // ---- assembler interface --------------------------------------------

    /// Remove an assembled (or auto-deleted) file from the queue, keeping the
    /// job's size and failure aggregates for health and history. Returns the
    /// completed job when this was the last file.
    pub async fn retire_file(
        &self,
        id: FileId,
        written_name: Option<String>,
        auto_deleted: bool,
    ) -> Result<RetireEffect> {
        let mut inner = self.inner.lock().await;
        let (ji, fi) = inner.locate_file(id)?;
        let job = &mut inner.jobs[ji];
        let file = job.files.remove(fi);
        job.file_count = job.file_count.saturating_sub(1);
        if file.paused {
            job.paused_file_count = job.paused_file_count.saturating_sub(1);
            job.paused_size = job.paused_size.saturating_sub(file.remaining_size);
        }
        if file.is_par {
            job.remaining_par_count = job.remaining_par_count.saturating_sub(1);
        }
        if auto_deleted {
            // dedupe victim: its bytes do not count toward successful size
            job.success_articles = job.success_articles.saturating_sub(file.success_articles);
        } else if let Some(name) = written_name {
            job.completed_files.push(name);
        }

        let health = if job.delete_status == DeleteStatus::None {
            Some(match job.health() {
                h if h < job.critical_health() => HealthVerdict::Critical {
                    health: h,
                    critical: job.critical_health(),
                },
                _ => HealthVerdict::Ok,
            })
        } else {
            None
        };

        let completed_job = if job.files.is_empty() {
            Some(inner.jobs.remove(ji))
        } else {
            None
        };
        Ok(RetireEffect {
            completed_job,
            health,
        })
    }

    /// Resolve `"<jobname>/<filename>"` or `"<jobname>"` names to ids for the
    /// RPC name match mode.
    pub async fn resolve_name(&self, name: &str) -> Option<(JobId, Option<FileId>)> {
        let inner = self.inner.lock().await;
        if let Some((job_name, file_name)) = name.split_once('/') {
            for job in &inner.jobs {
                if job.name == job_name {
                    for file in &job.files {
                        if file.filename == file_name {
                            return Some((job.id, Some(file.id)));
                        }
                    }
                }
            }
            None
        } else {
            inner
                .jobs
                .iter()
                .find(|j| j.name == name)
                .map(|j| (j.id, None))
        }
    }

    /// Owning job of a file.
    pub async fn job_of_file(&self, id: FileId) -> Option<JobId> {
        let inner = self.inner.lock().await;
        inner.locate_file(id).ok().map(|(ji, _)| inner.jobs[ji].id)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
