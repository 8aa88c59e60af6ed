//! Article scheduler
//!
//! The selection loop keeps up to `downloads_limit` article fetches in
//! flight: pick the best (file, article) pair from the queue, lease a
//! connection at the article's failover level, and spawn a downloader task.
//! Task outcomes come back here, where all retry policy lives — connect
//! errors retry at the same level, not-found advances the level, CRC errors
//! obey `retry_on_crc_error`, and exhausted budgets mark the article failed.
//!
//! A once-per-second pass corrects the speed meter and runs the
//! hanging-download watchdog: a task silent past `connection_timeout + 1`
//! seconds is asked to stop; past `terminate_timeout` its socket is shut
//! down outright.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::assembler::{self, AssemblyOutcome};
use crate::downloader::{self, TaskSettings, monotonic_secs};
use crate::engine::{RunningTask, Shared};
use crate::error::ArticleError;
use crate::nntp::Lease;
use crate::queue::{ArticleAssignment, CompletionEffect, HealthVerdict};
use crate::types::{DeleteStatus, Event, FileId, MessageKind};

/// Tick interval when work was started last round.
const TICK_BUSY: Duration = Duration::from_millis(5);

/// Tick interval when idle.
const TICK_IDLE: Duration = Duration::from_millis(100);

/// Run the scheduler until shutdown. Spawned once by the engine.
pub(crate) async fn run(shared: Arc<Shared>) {
    let mut downloads_limit = compute_downloads_limit(&shared).await;
    let mut pool_generation = shared.pool().generation();
    let mut last_second_pass = monotonic_secs();

    tracing::info!(downloads_limit, "scheduler started");

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        // thread budget follows the pool configuration
        let generation = shared.pool().generation();
        if generation != pool_generation {
            pool_generation = generation;
            downloads_limit = compute_downloads_limit(&shared).await;
            tracing::info!(downloads_limit, "connection budget recomputed");
        }

        let now = monotonic_secs();
        if now != last_second_pass {
            last_second_pass = now;
            shared.speed.correct();
            run_watchdog(&shared).await;
            accrue_download_time(&shared);
            let expired = shared.pool().sweep_idle().await;
            futures::future::join_all(expired.into_iter().map(|mut conn| async move {
                conn.disconnect().await;
            }))
            .await;
        }

        let mut started_any = false;
        if !shared.pause_download.load(Ordering::SeqCst) {
            started_any = fill_slots(&shared, downloads_limit).await;
        }

        // standby: no task has been in flight this tick
        let in_flight = shared.tasks.lock().await.len();
        shared
            .standby
            .store(in_flight == 0, Ordering::SeqCst);

        let tick = if started_any { TICK_BUSY } else { TICK_IDLE };
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shared.shutdown.cancelled() => break,
        }
    }

    // shutdown: stop every downloader; the engine waits for the drain
    let tasks = shared.tasks.lock().await;
    for task in tasks.values() {
        task.cancel.cancel();
    }
    tracing::info!("scheduler stopped");
}

/// `downloads_limit` = 2 + Σ max_connections over active level-0/1 servers.
async fn compute_downloads_limit(shared: &Arc<Shared>) -> u32 {
    2 + shared.pool().primary_connection_budget().await
}

/// Start tasks until the limit is reached or the queue has nothing eligible.
/// Returns whether anything was started.
async fn fill_slots(shared: &Arc<Shared>, downloads_limit: u32) -> bool {
    let mut started_any = false;
    // files that could not be served this tick (saturated level, no server)
    let mut skip: HashSet<FileId> = HashSet::new();

    loop {
        let in_flight = shared.tasks.lock().await.len() as u32;
        if in_flight >= downloads_limit {
            break;
        }
        let Some(assignment) = shared.queue.next_assignment(&skip).await else {
            break;
        };

        let pool = shared.pool();
        match pool.lease(assignment.level, &assignment.groups).await {
            Some(lease) => {
                spawn_task(shared.clone(), assignment, lease).await;
                started_any = true;
            }
            None => {
                // nothing free at this level right now; put the article back
                // and skip the file for the rest of this tick
                skip.insert(assignment.file_id);
                let _ = shared
                    .queue
                    .article_cancelled(assignment.file_id, assignment.part_number)
                    .await;
            }
        }
    }
    started_any
}

async fn spawn_task(shared: Arc<Shared>, assignment: ArticleAssignment, lease: Lease) {
    let cancel = shared.shutdown.child_token();
    let last_activity = Arc::new(AtomicU64::new(monotonic_secs()));

    {
        let mut tasks = shared.tasks.lock().await;
        tasks.insert(
            (assignment.file_id, assignment.part_number),
            RunningTask {
                cancel: cancel.clone(),
                last_activity: last_activity.clone(),
                soft_stopped: false,
            },
        );
    }

    let config = shared.config();
    let settings = TaskSettings {
        decode: config.download.decode,
        direct_write: config.download.direct_write,
        continue_partial: config.download.continue_partial,
        temp_dir: config.download.temp_dir.clone(),
        read_timeout: config.download.connection_timeout,
        rate_limit: shared.rate_limit.clone(),
        speed: shared.speed.clone(),
        tls: shared.tls.clone(),
    };

    tokio::spawn(async move {
        let server_id = lease.server.id;
        let output =
            downloader::run_article_task(&assignment, lease, &settings, &cancel, &last_activity)
                .await;

        // the downloader already judged protocol health (a clean 430 leaves
        // the conversation reusable even though the attempt failed)
        shared
            .pool()
            .release(server_id, output.connection, output.reusable)
            .await;

        handle_outcome(&shared, &assignment, server_id, output.result).await;

        shared
            .tasks
            .lock()
            .await
            .remove(&(assignment.file_id, assignment.part_number));
    });
}

/// Apply the retry/failover policy to one task outcome.
async fn handle_outcome(
    shared: &Arc<Shared>,
    assignment: &ArticleAssignment,
    server_id: u32,
    result: Result<downloader::FinishedArticle, ArticleError>,
) {
    let config = shared.config();
    let retry_on_crc = config.download.retry_on_crc_error;
    let max_level = shared.pool().max_level();

    match result {
        Ok(finished) => {
            shared.pool().record_success(server_id);
            if let Some(name) = &finished.yenc_filename
                && let Some(old) = shared.queue.confirm_filename(assignment.file_id, name).await
            {
                tracing::debug!(
                    file_id = assignment.file_id.get(),
                    old,
                    new = %name,
                    "filename confirmed from yEnc header"
                );
            }
            let effect = shared
                .queue
                .finish_article(assignment.file_id, assignment.part_number, finished.result_path)
                .await;
            if let Ok(effect) = effect {
                apply_effect(shared, effect).await;
            }
        }
        Err(ArticleError::Cancelled) => {
            // cooperative stop: no retry, no reporting
            let effect = shared
                .queue
                .article_cancelled(assignment.file_id, assignment.part_number)
                .await;
            if let Ok(effect) = effect {
                apply_effect(shared, effect).await;
            }
        }
        Err(error) => {
            shared.pool().record_failure(server_id);
            let decision = retry_decision(assignment, &error, retry_on_crc, max_level);
            match decision {
                RetryDecision::Requeue {
                    level,
                    retries_left,
                    connect_retries_left,
                    sleep_first,
                } => {
                    tracing::debug!(
                        message_id = %assignment.message_id,
                        level,
                        error = %error,
                        "article re-queued"
                    );
                    if sleep_first {
                        let interval = config.download.retry_interval;
                        tokio::select! {
                            _ = tokio::time::sleep(interval) => {}
                            _ = shared.shutdown.cancelled() => {}
                        }
                    }
                    let effect = shared
                        .queue
                        .requeue_article(
                            assignment.file_id,
                            assignment.part_number,
                            level,
                            retries_left,
                            connect_retries_left,
                        )
                        .await;
                    if let Ok(effect) = effect {
                        apply_effect(shared, effect).await;
                    }
                }
                RetryDecision::Fail { missed } => {
                    shared
                        .log_message(
                            MessageKind::Error,
                            format!(
                                "article <{}> failed permanently: {error}",
                                assignment.message_id
                            ),
                        )
                        .await;
                    let effect = shared
                        .queue
                        .fail_article(assignment.file_id, assignment.part_number, missed)
                        .await;
                    if let Ok(effect) = effect {
                        apply_effect(shared, effect).await;
                    }
                }
            }
        }
    }
}

enum RetryDecision {
    Requeue {
        level: u32,
        retries_left: u32,
        connect_retries_left: u32,
        sleep_first: bool,
    },
    Fail {
        missed: bool,
    },
}

/// The retry table:
/// - connect errors do not burn a level; they consume a connect-retry
/// - not-found advances the level; exhausted at every level = missed
/// - CRC errors retry only when configured
/// - plain failures and short bodies consume a download retry
/// - fatal errors never retry
fn retry_decision(
    assignment: &ArticleAssignment,
    error: &ArticleError,
    retry_on_crc: bool,
    max_level: u32,
) -> RetryDecision {
    match error {
        ArticleError::ConnectError(_) => {
            if assignment.connect_retries_left <= 1 {
                RetryDecision::Fail { missed: false }
            } else {
                RetryDecision::Requeue {
                    level: assignment.level,
                    retries_left: assignment.retries_left,
                    connect_retries_left: assignment.connect_retries_left - 1,
                    sleep_first: true,
                }
            }
        }
        ArticleError::NotFound(_) => {
            if assignment.level >= max_level {
                RetryDecision::Fail { missed: true }
            } else {
                RetryDecision::Requeue {
                    level: assignment.level + 1,
                    retries_left: assignment.retries_left,
                    connect_retries_left: assignment.connect_retries_left,
                    sleep_first: false,
                }
            }
        }
        ArticleError::CrcError { .. } => {
            if retry_on_crc && assignment.retries_left > 1 {
                RetryDecision::Requeue {
                    level: assignment.level,
                    retries_left: assignment.retries_left - 1,
                    connect_retries_left: assignment.connect_retries_left,
                    sleep_first: false,
                }
            } else {
                RetryDecision::Fail { missed: false }
            }
        }
        ArticleError::Incomplete(_) | ArticleError::Failed(_) => {
            if assignment.retries_left <= 1 {
                RetryDecision::Fail { missed: false }
            } else {
                RetryDecision::Requeue {
                    level: assignment.level,
                    retries_left: assignment.retries_left - 1,
                    connect_retries_left: assignment.connect_retries_left,
                    sleep_first: true,
                }
            }
        }
        ArticleError::Fatal(_) => RetryDecision::Fail { missed: false },
        ArticleError::Cancelled => RetryDecision::Fail { missed: false },
    }
}

/// Fold queue side effects: run the assembler on completed files, retire
/// drained jobs, apply the health policy.
async fn apply_effect(shared: &Arc<Shared>, effect: CompletionEffect) {
    for file in &effect.removed_files {
        tracing::debug!(file_id = file.id.get(), "deleted file drained out");
    }
    if let Some(job) = effect.removed_job {
        shared.retire_job(job).await;
    }
    let Some(completion) = effect.file_completed else {
        return;
    };

    let config = shared.config();
    let file_id = completion.file_id;
    let job_id = completion.job_id;

    let outcome = assembler::assemble(&completion, &config.download).await;
    let (written_name, auto_deleted) = match outcome {
        Ok(AssemblyOutcome::Written {
            path,
            filename,
            complete,
        }) => {
            shared.hooks.on_file_completed(job_id, file_id, &path).await;
            shared.emit(Event::FileCompleted {
                job_id,
                file_id,
                filename: filename.clone(),
                complete,
            });
            shared
                .queue
                .log_job(
                    job_id,
                    if complete {
                        MessageKind::Info
                    } else {
                        MessageKind::Warning
                    },
                    format!(
                        "{filename}: {}/{} articles",
                        completion.success_articles, completion.total_articles
                    ),
                )
                .await;
            (Some(filename), false)
        }
        Ok(AssemblyOutcome::AutoDeleted) => (None, true),
        Ok(AssemblyOutcome::Skipped) => (None, false),
        Err(e) => {
            // partial output stays on disk; health and broken policies apply
            shared
                .log_message(
                    MessageKind::Error,
                    format!("assembly failed for {}: {e}", completion.filename),
                )
                .await;
            (None, false)
        }
    };

    let retire = shared
        .queue
        .retire_file(file_id, written_name, auto_deleted)
        .await;
    let Ok(retire) = retire else {
        return;
    };
    if let Some(HealthVerdict::Critical { health, critical }) = retire.health {
        apply_health_policy(shared, job_id, health, critical).await;
    }
    if let Some(job) = retire.completed_job {
        shared.retire_job(job).await;
    }
}

/// Below critical health: pause the job or delete it, per configuration.
async fn apply_health_policy(shared: &Arc<Shared>, job_id: crate::types::JobId, health: u32, critical: u32) {
    use crate::config::HealthAction;

    let action = shared.config().download.health_action;
    match action {
        HealthAction::None => {}
        HealthAction::Pause => {
            shared
                .log_message(
                    MessageKind::Warning,
                    format!(
                        "job {job_id} health {}‰ fell below critical {}‰, pausing",
                        health, critical
                    ),
                )
                .await;
            let _ = shared.queue.pause_job(job_id, true).await;
            shared.emit(Event::HealthCritical {
                id: job_id,
                health,
                critical,
                deleted: false,
            });
        }
        HealthAction::Delete => {
            shared
                .log_message(
                    MessageKind::Warning,
                    format!(
                        "job {job_id} health {}‰ fell below critical {}‰, deleting",
                        health, critical
                    ),
                )
                .await;
            // cancel in-flight tasks of this job, then mark for drain
            let running = shared.queue.running_files(job_id).await;
            {
                let tasks = shared.tasks.lock().await;
                for ((file_id, _), task) in tasks.iter() {
                    if running.contains(file_id) {
                        task.cancel.cancel();
                    }
                }
            }
            if let Ok(effect) = shared.queue.delete_job(job_id, DeleteStatus::Health).await {
                shared.emit(Event::HealthCritical {
                    id: job_id,
                    health,
                    critical,
                    deleted: true,
                });
                // delete effects never carry a completed file, so no
                // assembler round trip (and no recursion) is needed here
                if let Some(job) = effect.removed_job {
                    shared.retire_job(job).await;
                }
            }
        }
    }
}

/// Ask silent tasks to stop; shut hard-hung ones down outright.
async fn run_watchdog(shared: &Arc<Shared>) {
    let config = shared.config();
    let soft_after = config.download.connection_timeout.as_secs() + 1;
    let hard_after = config.download.terminate_timeout.as_secs().max(soft_after);
    let now = monotonic_secs();

    let mut tasks = shared.tasks.lock().await;
    for ((file_id, part), task) in tasks.iter_mut() {
        let silent_for = now.saturating_sub(task.last_activity.load(Ordering::Relaxed));
        if silent_for > hard_after {
            tracing::warn!(
                file_id = file_id.get(),
                part,
                silent_for,
                "hard-terminating hung download"
            );
            task.cancel.cancel();
        } else if silent_for > soft_after && !task.soft_stopped {
            tracing::warn!(
                file_id = file_id.get(),
                part,
                silent_for,
                "download stalled, asking it to stop"
            );
            task.soft_stopped = true;
            task.cancel.cancel();
        }
    }
}

/// Accrue one second of session download time unless in standby.
fn accrue_download_time(shared: &Arc<Shared>) {
    if !shared.standby.load(Ordering::SeqCst) {
        shared.download_time_secs.fetch_add(1, Ordering::SeqCst);
    }
}
