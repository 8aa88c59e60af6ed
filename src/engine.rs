//! Engine facade
//!
//! [`UsenetEngine`] wires the queue, server pool, scheduler, feeds and RPC
//! server together. All components receive a reference to one shared
//! [`Shared`] context — configuration, pool, queue, speed meter, logger,
//! collaborator hooks — instead of reaching for globals.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_native_tls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::FeedState;
use crate::history::HistoryEntry;
use crate::hooks::{Collaborators, DupeAction, NoOpCollaborators};
use crate::nntp::ServerPool;
use crate::nzb;
use crate::queue::{DownloadQueue, Job, MoveTarget};
use crate::speedmeter::SpeedMeter;
use crate::types::{
    DeleteStatus, DupeMode, Event, FileId, JobId, JobKind, Message, MessageKind, PauseTarget,
};
use crate::urlfetch::UrlFetcher;
use crate::utils::{job_name_from_filename, sanitize_component};

/// Cap on the global engine message log
const ENGINE_LOG_CAP: usize = 1000;

/// Grace period for in-flight downloads on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Options for adding a download (RPC Download request fields travel here).
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    /// Category to assign
    pub category: String,
    /// Priority (larger = earlier)
    pub priority: i32,
    /// Insert at the top of the queue
    pub add_top: bool,
    /// Add every file paused
    pub add_paused: bool,
    /// Duplicate key
    pub dupe_key: String,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: DupeMode,
}

/// Global engine log with stable message ids.
pub(crate) struct EngineLog {
    messages: VecDeque<Message>,
    next_id: u32,
}

impl EngineLog {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 1,
        }
    }

    pub(crate) fn push(&mut self, kind: MessageKind, text: String) {
        let message = Message {
            id: self.next_id,
            kind,
            time: chrono::Utc::now(),
            text,
        };
        self.next_id += 1;
        self.messages.push_back(message);
        while self.messages.len() > ENGINE_LOG_CAP {
            self.messages.pop_front();
        }
    }

    /// The last `count` messages, or messages with id ≥ `from_id` when set.
    pub(crate) fn tail(&self, from_id: u32, count: usize) -> Vec<Message> {
        if from_id > 0 {
            self.messages
                .iter()
                .filter(|m| m.id >= from_id)
                .cloned()
                .collect()
        } else {
            let skip = self.messages.len().saturating_sub(count);
            self.messages.iter().skip(skip).cloned().collect()
        }
    }
}

/// One running article download, visible to the watchdog.
pub(crate) struct RunningTask {
    /// Cancels the task (and through it, the connection)
    pub cancel: CancellationToken,
    /// Heartbeat: monotonic seconds of the last received byte
    pub last_activity: Arc<AtomicU64>,
    /// The watchdog already asked this task to stop
    pub soft_stopped: bool,
}

/// Shared context handed to every component.
pub(crate) struct Shared {
    pub config: std::sync::RwLock<Arc<Config>>,
    pub queue: DownloadQueue,
    pub pool: std::sync::RwLock<ServerPool>,
    pub speed: SpeedMeter,
    pub event_tx: broadcast::Sender<Event>,
    pub hooks: Arc<dyn Collaborators>,
    pub shutdown: CancellationToken,
    pub pause_download: AtomicBool,
    pub pause_post: AtomicBool,
    pub pause_scan: AtomicBool,
    pub rate_limit: Arc<AtomicU64>,
    pub log: tokio::sync::Mutex<EngineLog>,
    pub history: tokio::sync::Mutex<Vec<HistoryEntry>>,
    pub tasks: tokio::sync::Mutex<HashMap<(FileId, u32), RunningTask>>,
    pub fetcher: UrlFetcher,
    pub tls: Option<Arc<TlsConnector>>,
    pub started: Instant,
    pub download_time_secs: AtomicU64,
    pub standby: AtomicBool,
}

impl Shared {
    pub(crate) fn emit(&self, event: Event) {
        // send() errs with no subscribers, which is fine
        self.event_tx.send(event).ok();
    }

    pub(crate) fn config(&self) -> Arc<Config> {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub(crate) fn pool(&self) -> ServerPool {
        self.pool
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub(crate) async fn log_message(&self, kind: MessageKind, text: String) {
        match kind {
            MessageKind::Error => tracing::error!("{text}"),
            MessageKind::Warning => tracing::warn!("{text}"),
            MessageKind::Debug | MessageKind::Detail => tracing::debug!("{text}"),
            MessageKind::Info => tracing::info!("{text}"),
        }
        self.log.lock().await.push(kind, text);
    }

    /// A job left the queue: record history, notify collaborators, emit.
    pub(crate) async fn retire_job(&self, job: Job) {
        let completed = job.delete_status == DeleteStatus::None;
        self.log_message(
            if completed {
                MessageKind::Info
            } else {
                MessageKind::Warning
            },
            format!(
                "collection {} left the queue ({} ok / {} failed articles)",
                job.name, job.success_articles, job.failed_articles
            ),
        )
        .await;
        self.hooks.on_job_completed(&job).await;
        self.history.lock().await.push(HistoryEntry::from_job(&job));
        if completed {
            self.emit(Event::JobCompleted {
                id: job.id,
                success_articles: job.success_articles,
                failed_articles: job.failed_articles,
            });
        } else {
            self.emit(Event::JobRemoved { id: job.id });
        }
    }

    /// Destination directory for a category under the current config.
    pub(crate) fn dest_dir_for(&self, category: &str) -> PathBuf {
        let config = self.config();
        if category.is_empty() || !config.download.append_category_dir {
            config.download.dest_dir.clone()
        } else {
            config
                .download
                .dest_dir
                .join(sanitize_component(category))
        }
    }
}

/// The headless download engine.
///
/// Construct with [`UsenetEngine::new`], then [`start`](UsenetEngine::start)
/// the scheduler and feed tasks, and optionally
/// [`spawn_rpc_server`](UsenetEngine::spawn_rpc_server) for remote control.
#[derive(Clone)]
pub struct UsenetEngine {
    pub(crate) shared: Arc<Shared>,
}

impl UsenetEngine {
    /// Create an engine from configuration with no collaborators attached.
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_collaborators(config, Arc::new(NoOpCollaborators)).await
    }

    /// Create an engine with external collaborators.
    pub async fn with_collaborators(
        config: Config,
        hooks: Arc<dyn Collaborators>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.dest_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "failed to create destination directory '{}': {e}",
                        config.download.dest_dir.display()
                    ),
                ))
            })?;
        tokio::fs::create_dir_all(&config.download.temp_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "failed to create temp directory '{}': {e}",
                        config.download.temp_dir.display()
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(1000);

        let pool = ServerPool::new(
            config.servers.clone(),
            config.download.connection_idle_timeout,
        );
        let queue = DownloadQueue::new(config.download.retries, config.download.connect_retries);
        let fetcher = UrlFetcher::new(config.fetch.clone())?;
        let rate_limit = Arc::new(AtomicU64::new(
            config.download.rate_limit_bps.unwrap_or(0),
        ));

        let tls = if config.servers.iter().any(|s| s.tls) {
            let native = native_tls::TlsConnector::new()
                .map_err(|e| Error::Nntp(format!("TLS init: {e}")))?;
            Some(Arc::new(TlsConnector::from(native)))
        } else {
            None
        };

        let shared = Arc::new(Shared {
            config: std::sync::RwLock::new(Arc::new(config)),
            queue,
            pool: std::sync::RwLock::new(pool),
            speed: SpeedMeter::new(),
            event_tx,
            hooks,
            shutdown: CancellationToken::new(),
            pause_download: AtomicBool::new(false),
            pause_post: AtomicBool::new(false),
            pause_scan: AtomicBool::new(false),
            rate_limit,
            log: tokio::sync::Mutex::new(EngineLog::new()),
            history: tokio::sync::Mutex::new(Vec::new()),
            tasks: tokio::sync::Mutex::new(HashMap::new()),
            fetcher,
            tls,
            started: Instant::now(),
            download_time_secs: AtomicU64::new(0),
            standby: AtomicBool::new(true),
        });

        Ok(Self { shared })
    }

    /// Subscribe to engine events. Multiple subscribers are supported.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.event_tx.subscribe()
    }

    /// Crate version string (served by the RPC Version command).
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Spawn the scheduler and one task per configured feed.
    pub fn start(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            crate::scheduler::run(shared).await;
        });

        for feed_config in &self.shared.config().feeds {
            let engine = self.clone();
            let state = FeedState::new(feed_config.clone());
            tokio::spawn(async move {
                engine.run_feed(state).await;
            });
        }
    }

    /// Spawn the binary RPC server.
    pub fn spawn_rpc_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let engine = self.clone();
        tokio::spawn(async move { crate::rpc::serve(engine).await })
    }

    /// Add an NZB document to the queue.
    pub async fn add_nzb_content(
        &self,
        content: &[u8],
        name: &str,
        options: AddOptions,
    ) -> Result<JobId> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let parsed = nzb::parse_nzb(content)?;
        for warning in &parsed.warnings {
            self.shared
                .log_message(MessageKind::Warning, warning.clone())
                .await;
        }

        let display_name = parsed
            .meta
            .get("title")
            .cloned()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| job_name_from_filename(name));

        let mut job = Job::new(
            JobId::new(0),
            display_name.clone(),
            name.to_string(),
            self.shared.dest_dir_for(&options.category),
            options.category.clone(),
            JobKind::NzbCollection,
            options.priority,
        );
        job.content_hash = Some(parsed.content_hash);
        job.filtered_content_hash = Some(parsed.filtered_content_hash);
        job.dupe_key = options.dupe_key.clone();
        job.dupe_score = options.dupe_score;
        job.dupe_mode = options.dupe_mode;
        if let Some(password) = parsed.meta.get("password") {
            job.parameters
                .insert("*unpack:password".to_string(), password.clone());
        }
        let mut seen_names = std::collections::HashSet::new();
        job.many_dupe_files = parsed
            .files
            .iter()
            .any(|f| !seen_names.insert(f.filename.clone()));
        for mut file in parsed.files {
            file.paused = options.add_paused;
            job.attach_file(file);
        }

        // external dedup gets a veto before the job enters the queue
        if let DupeAction::Delete(status) = self.shared.hooks.on_nzb_file_found(&job).await {
            self.shared
                .log_message(
                    MessageKind::Warning,
                    format!("collection {display_name} rejected by duplicate check"),
                )
                .await;
            job.delete_status = status;
            self.shared
                .history
                .lock()
                .await
                .push(HistoryEntry::from_job(&job));
            return Err(Error::InvalidState {
                operation: "enqueue".to_string(),
                reason: format!("duplicate ({status:?})"),
            });
        }

        let id = self.shared.queue.add_job(job).await;
        if options.add_top {
            self.shared.queue.move_job(id, MoveTarget::Top).await?;
        }
        self.shared
            .log_message(MessageKind::Info, format!("queued collection {display_name}"))
            .await;
        self.shared.emit(Event::JobQueued {
            id,
            name: display_name,
        });
        Ok(id)
    }

    /// Add a URL that resolves to an NZB. The job enters the queue
    /// immediately as a url-kind placeholder and fills with files once the
    /// fetch completes.
    pub async fn add_url(&self, url: &str, options: AddOptions) -> Result<JobId> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(url);
        let mut job = Job::new(
            JobId::new(0),
            job_name_from_filename(name),
            name.to_string(),
            self.shared.dest_dir_for(&options.category),
            options.category.clone(),
            JobKind::Url,
            options.priority,
        );
        job.url = Some(url.to_string());
        job.dupe_key = options.dupe_key.clone();
        job.dupe_score = options.dupe_score;
        job.dupe_mode = options.dupe_mode;
        let id = self.shared.queue.add_job(job).await;
        if options.add_top {
            self.shared.queue.move_job(id, MoveTarget::Top).await?;
        }
        self.shared.emit(Event::JobQueued {
            id,
            name: job_name_from_filename(name),
        });

        let engine = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            engine.resolve_url(id, url, options).await;
        });
        Ok(id)
    }

    async fn resolve_url(&self, id: JobId, url: String, options: AddOptions) {
        let shared = &self.shared;
        let result = shared
            .fetcher
            .fetch(&url, &shared.shutdown.child_token())
            .await;
        let document = match result {
            Ok(doc) => doc,
            Err(e) => {
                shared
                    .log_message(MessageKind::Error, format!("URL fetch failed for {url}: {e}"))
                    .await;
                if let Ok(effect) = shared.queue.delete_job(id, DeleteStatus::Bad).await
                    && let Some(job) = effect.removed_job
                {
                    shared.retire_job(job).await;
                }
                return;
            }
        };

        let parsed = match nzb::parse_nzb(&document.content) {
            Ok(parsed) => parsed,
            Err(e) => {
                shared
                    .log_message(
                        MessageKind::Error,
                        format!("URL {url} did not resolve to a valid NZB: {e}"),
                    )
                    .await;
                if let Ok(effect) = shared.queue.delete_job(id, DeleteStatus::Bad).await
                    && let Some(job) = effect.removed_job
                {
                    shared.retire_job(job).await;
                }
                return;
            }
        };
        for warning in &parsed.warnings {
            shared
                .log_message(MessageKind::Warning, warning.clone())
                .await;
        }

        let name = parsed
            .meta
            .get("title")
            .cloned()
            .or_else(|| document.filename.clone().map(|f| job_name_from_filename(&f)));
        let mut files = parsed.files;
        if options.add_paused {
            for file in &mut files {
                file.paused = true;
            }
        }
        let resolve = shared
            .queue
            .resolve_url_job(
                id,
                files,
                name,
                parsed.content_hash,
                parsed.filtered_content_hash,
            )
            .await;
        match resolve {
            Ok(()) => {
                shared
                    .log_message(MessageKind::Info, format!("URL {url} resolved into the queue"))
                    .await;
            }
            Err(e) => {
                // the job may have been deleted while fetching
                shared
                    .log_message(MessageKind::Warning, format!("URL {url} resolution dropped: {e}"))
                    .await;
            }
        }
    }

    /// Flip one of the pause registers.
    pub fn set_paused(&self, target: PauseTarget, paused: bool) {
        let flag = match target {
            PauseTarget::Download => &self.shared.pause_download,
            PauseTarget::PostProcess => &self.shared.pause_post,
            PauseTarget::Scan => &self.shared.pause_scan,
        };
        flag.store(paused, Ordering::SeqCst);
        self.shared.emit(Event::PauseChanged { target, paused });
    }

    /// Read one of the pause registers.
    pub fn is_paused(&self, target: PauseTarget) -> bool {
        let flag = match target {
            PauseTarget::Download => &self.shared.pause_download,
            PauseTarget::PostProcess => &self.shared.pause_post,
            PauseTarget::Scan => &self.shared.pause_scan,
        };
        flag.load(Ordering::SeqCst)
    }

    /// Set the global download rate limit (None or 0 = unlimited).
    pub fn set_rate_limit(&self, limit_bps: Option<u64>) {
        self.shared
            .rate_limit
            .store(limit_bps.unwrap_or(0), Ordering::SeqCst);
        self.shared.emit(Event::RateLimitChanged { limit_bps });
    }

    /// Current rate limit.
    pub fn rate_limit(&self) -> Option<u64> {
        match self.shared.rate_limit.load(Ordering::SeqCst) {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Handle to the download queue.
    pub fn queue(&self) -> DownloadQueue {
        self.shared.queue.clone()
    }

    /// Per-server connection statistics.
    pub async fn server_stats(&self) -> Vec<crate::nntp::ServerStats> {
        self.shared.pool().connection_stats().await
    }

    /// Completed/deleted job history (most recent last).
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.shared.history.lock().await.clone()
    }

    /// Append a user message to the engine log.
    pub async fn write_log(&self, kind: MessageKind, text: &str) {
        self.shared.log_message(kind, text.to_string()).await;
    }

    /// Read back log messages: the last `count`, or all with id ≥ `from_id`.
    pub async fn log_entries(&self, from_id: u32, count: usize) -> Vec<Message> {
        self.shared.log.lock().await.tail(from_id, count)
    }

    /// Scan the incoming NZB directory, enqueueing every `*.nzb` found.
    /// Processed files are renamed to `<name>.queued`. Returns how many
    /// were added.
    pub async fn scan_nzb_dir(&self) -> Result<usize> {
        if self.is_paused(PauseTarget::Scan) {
            return Ok(0);
        }
        let dir = self.shared.config().download.nzb_dir.clone();
        let mut added = 0;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0), // no incoming directory configured
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_nzb = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("nzb"));
            if !is_nzb {
                continue;
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("scan.nzb")
                .to_string();
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    self.shared
                        .log_message(
                            MessageKind::Error,
                            format!("cannot read {}: {e}", path.display()),
                        )
                        .await;
                    continue;
                }
            };
            match self
                .add_nzb_content(&content, &name, AddOptions::default())
                .await
            {
                Ok(_) => {
                    added += 1;
                    let mut done = path.clone();
                    done.set_extension("nzb.queued");
                    let _ = tokio::fs::rename(&path, &done).await;
                }
                Err(e) => {
                    self.shared
                        .log_message(
                            MessageKind::Error,
                            format!("scan could not queue {name}: {e}"),
                        )
                        .await;
                    let mut bad = path.clone();
                    bad.set_extension("nzb.error");
                    let _ = tokio::fs::rename(&path, &bad).await;
                }
            }
        }
        Ok(added)
    }

    /// Re-read runtime-mutable settings from a fresh configuration: servers
    /// become a new pool (the scheduler recomputes its budget from the bumped
    /// generation), rate limit and pause state survive.
    pub async fn reload(&self, config: Config) -> Result<()> {
        config.validate()?;
        let pool = ServerPool::new(
            config.servers.clone(),
            config.download.connection_idle_timeout,
        );
        {
            let mut slot = self
                .shared
                .pool
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = pool;
        }
        {
            let mut slot = self
                .shared
                .config
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Arc::new(config);
        }
        self.shared.pool().bump_generation();
        self.shared
            .log_message(MessageKind::Info, "configuration reloaded".to_string())
            .await;
        Ok(())
    }

    /// Graceful shutdown: stop every downloader, wait up to 5 s, then return.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.emit(Event::Shutdown);
        self.shared.shutdown.cancel();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            let remaining = {
                let tasks = self.shared.tasks.lock().await;
                tasks.len()
            };
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(remaining, "shutdown grace expired with downloads in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    /// Status block for the RPC List command.
    pub async fn status(&self) -> EngineStatus {
        let shared = &self.shared;
        EngineStatus {
            download_rate_bps: shared.speed.speed_bps(),
            rate_limit_bps: shared.rate_limit.load(Ordering::SeqCst),
            download_paused: shared.pause_download.load(Ordering::SeqCst),
            post_paused: shared.pause_post.load(Ordering::SeqCst),
            scan_paused: shared.pause_scan.load(Ordering::SeqCst),
            standby: shared.standby.load(Ordering::SeqCst),
            thread_count: shared.tasks.lock().await.len() as u32,
            uptime_secs: shared.started.elapsed().as_secs(),
            download_time_secs: shared.download_time_secs.load(Ordering::SeqCst),
            session_downloaded_bytes: shared.speed.session_bytes(),
            remaining_size: shared.queue.remaining_size().await,
        }
    }

    async fn run_feed(&self, mut state: FeedState) {
        let interval = Duration::from_secs(state.config.interval_minutes.max(1) * 60);
        // first pass right away; it seeds the backlog without fetching items
        self.fetch_feed_once(&mut state).await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shared.shutdown.cancelled() => return,
            }
            self.fetch_feed_once(&mut state).await;
        }
    }

    /// One feed pass: fetch, classify, filter, synthesize download requests.
    pub(crate) async fn fetch_feed_once(&self, state: &mut FeedState) {
        use crate::feed::FeedStatus;

        state.status = FeedStatus::Running;
        let url = state.config.url.clone();
        let document = match self
            .shared
            .fetcher
            .fetch(&url, &self.shared.shutdown.child_token())
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                state.status = FeedStatus::Failed;
                self.shared
                    .log_message(
                        MessageKind::Warning,
                        format!("feed {} fetch failed: {e}", state.config.name),
                    )
                    .await;
                return;
            }
        };
        let content = String::from_utf8_lossy(&document.content).into_owned();

        // capture queued dupe keys so the filter's dupestatus field works
        let queued_keys: std::collections::HashSet<String> = self
            .shared
            .queue
            .snapshot()
            .await
            .into_iter()
            .map(|j| j.dupe_key)
            .filter(|k| !k.is_empty())
            .collect();

        let accepted = match state.process_document(
            &content,
            &|key| queued_keys.contains(key),
            chrono::Utc::now(),
        ) {
            Ok(accepted) => accepted,
            Err(e) => {
                state.status = FeedStatus::Failed;
                self.shared
                    .log_message(
                        MessageKind::Warning,
                        format!("feed {} parse failed: {e}", state.config.name),
                    )
                    .await;
                return;
            }
        };

        let new_count = accepted.len();
        for item in accepted {
            let options = AddOptions {
                category: item.add_category.clone(),
                priority: item.priority,
                add_top: false,
                add_paused: item.pause_nzb,
                dupe_key: item.dupe_key.clone(),
                dupe_score: item.dupe_score,
                dupe_mode: item.dupe_mode,
            };
            match self.add_url(&item.url, options).await {
                Ok(id) => {
                    self.shared
                        .log_message(
                            MessageKind::Info,
                            format!("feed {} queued {} as job {id}", state.config.name, item.title),
                        )
                        .await;
                }
                Err(e) => {
                    self.shared
                        .log_message(
                            MessageKind::Warning,
                            format!(
                                "feed {} could not queue {}: {e}",
                                state.config.name, item.title
                            ),
                        )
                        .await;
                }
            }
        }
        self.shared.emit(Event::FeedFetched {
            name: state.config.name.clone(),
            new_items: new_count,
        });
    }
}

/// Status block served by the RPC List command.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Current download speed in bytes per second
    pub download_rate_bps: u64,
    /// Rate limit in bytes per second (0 = unlimited)
    pub rate_limit_bps: u64,
    /// Download pause register
    pub download_paused: bool,
    /// Post-processing pause register
    pub post_paused: bool,
    /// Scan pause register
    pub scan_paused: bool,
    /// No downloads in flight
    pub standby: bool,
    /// Running downloader tasks
    pub thread_count: u32,
    /// Seconds since engine start
    pub uptime_secs: u64,
    /// Seconds spent with downloads in flight
    pub download_time_secs: u64,
    /// Bytes downloaded this session
    pub session_downloaded_bytes: u64,
    /// Remaining unpaused bytes in the queue
    pub remaining_size: u64,
}
