//! RPC server: accept loop and command dispatch
//!
//! Commands are short and self-terminating: each incoming connection gets its
//! own task that reads one request, executes it against the engine, streams
//! the response, and closes. Queue mutations go through the queue's own
//! mutex; nothing here holds locks across I/O.

use std::collections::HashSet;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::engine::{AddOptions, UsenetEngine};
use crate::error::{Error, Result};
use crate::queue::MoveTarget;
use crate::types::{DeleteStatus, DupeMode, FileId, JobId, JobKind, MessageKind, PauseTarget};

use super::messages::{
    BoolResponse, DownloadRequest, EditQueueRequest, HistoryResponse, HistoryWireEntry,
    ListFileEntry, ListJobEntry, ListRequest, ListResponse, LogEntry, LogResponse,
    REQUEST_HEADER_SIZE, RequestHeader, RequestKind, WireReader, edit_action, match_mode,
    pause_action, post_queue_response,
};

/// Upper bound on the fixed request struct (sanity against garbage).
const MAX_STRUCT_SIZE: usize = 64 * 1024;

/// Upper bound on trailing data (NZB bodies can be large).
const MAX_TRAILING: usize = 100 * 1024 * 1024;

/// Run the RPC accept loop until shutdown.
pub(crate) async fn serve(engine: UsenetEngine) -> Result<()> {
    let bind = engine.shared.config().rpc.rpc_bind;
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| Error::RpcProtocol(format!("bind {bind}: {e}")))?;
    tracing::info!(%bind, "RPC server listening");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "RPC accept failed");
                    continue;
                }
            },
            _ = engine.shared.shutdown.cancelled() => {
                tracing::info!("RPC server stopped");
                return Ok(());
            }
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(engine, stream).await {
                tracing::debug!(%peer, error = %e, "RPC connection failed");
            }
        });
    }
}

async fn handle_connection(engine: UsenetEngine, mut stream: TcpStream) -> Result<()> {
    let mut header_buf = [0u8; REQUEST_HEADER_SIZE];
    stream
        .read_exact(&mut header_buf)
        .await
        .map_err(|e| Error::RpcProtocol(format!("reading header: {e}")))?;
    let header = RequestHeader::parse(&header_buf)?;

    let config = engine.shared.config();
    if header.username != config.rpc.rpc_username || header.password != config.rpc.rpc_password {
        let response = BoolResponse::fail("authentication failed");
        stream.write_all(&response.to_bytes()).await.ok();
        return Err(Error::RpcProtocol("bad credentials".to_string()));
    }

    let body_len = (header.struct_size as usize).saturating_sub(REQUEST_HEADER_SIZE);
    if body_len > MAX_STRUCT_SIZE {
        return Err(Error::RpcProtocol(format!(
            "oversized request struct ({body_len} bytes)"
        )));
    }
    let mut body = vec![0u8; body_len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::RpcProtocol(format!("reading request body: {e}")))?;

    let response: Vec<u8> = match header.kind {
        RequestKind::Download => handle_download(&engine, &body, &mut stream).await?,
        RequestKind::PauseUnpause => handle_pause(&engine, &body)?.to_bytes(),
        RequestKind::List => handle_list(&engine, &body).await?,
        RequestKind::SetDownloadRate => handle_set_rate(&engine, &body)?.to_bytes(),
        RequestKind::DumpDebug => handle_dump_debug(&engine).await.to_bytes(),
        RequestKind::EditQueue => handle_edit(&engine, &body, &mut stream).await?.to_bytes(),
        RequestKind::Log => handle_log(&engine, &body).await?,
        RequestKind::Shutdown => {
            let response = BoolResponse::ok("Stopping server").to_bytes();
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.shutdown().await.ok();
            });
            response
        }
        RequestKind::Reload => {
            let config = (*engine.shared.config()).clone();
            match engine.reload(config).await {
                Ok(()) => BoolResponse::ok("Reloaded").to_bytes(),
                Err(e) => BoolResponse::fail(format!("Reload failed: {e}")).to_bytes(),
            }
        }
        RequestKind::Version => BoolResponse::ok(UsenetEngine::version()).to_bytes(),
        RequestKind::PostQueue => post_queue_response(),
        RequestKind::WriteLog => handle_write_log(&engine, &body, &mut stream).await?.to_bytes(),
        RequestKind::Scan => handle_scan(&engine, &body).await?.to_bytes(),
        RequestKind::History => handle_history(&engine, &body).await?,
    };

    stream
        .write_all(&response)
        .await
        .map_err(|e| Error::RpcProtocol(format!("writing response: {e}")))?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn handle_download(
    engine: &UsenetEngine,
    body: &[u8],
    stream: &mut TcpStream,
) -> Result<Vec<u8>> {
    let (mut request, trailing) = DownloadRequest::parse(body)?;
    if trailing > MAX_TRAILING {
        return Err(Error::RpcProtocol(format!(
            "oversized download content ({trailing} bytes)"
        )));
    }
    let mut content = vec![0u8; trailing];
    stream
        .read_exact(&mut content)
        .await
        .map_err(|e| Error::RpcProtocol(format!("reading nzb content: {e}")))?;
    request.content = content;

    let options = AddOptions {
        category: request.category.clone(),
        priority: request.priority,
        add_top: request.add_first,
        add_paused: request.add_paused,
        dupe_key: request.dupe_key.clone(),
        dupe_score: request.dupe_score,
        dupe_mode: DupeMode::from_i32(request.dupe_mode),
    };

    // a short single-line http(s) body is a URL job
    let text = std::str::from_utf8(&request.content).unwrap_or("").trim();
    let is_url = (text.starts_with("http://") || text.starts_with("https://"))
        && !text.contains('\n')
        && !text.contains('<');

    let result = if is_url {
        engine.add_url(text, options).await
    } else {
        let name = if request.nzb_filename.is_empty() {
            "remote.nzb".to_string()
        } else {
            request.nzb_filename.clone()
        };
        engine.add_nzb_content(&request.content, &name, options).await
    };

    Ok(match result {
        Ok(id) => BoolResponse::ok(format!("Collection added to queue (id {id})")).to_bytes(),
        Err(e) => BoolResponse::fail(format!("Download request failed: {e}")).to_bytes(),
    })
}

fn handle_pause(engine: &UsenetEngine, body: &[u8]) -> Result<BoolResponse> {
    let mut reader = WireReader::new(body);
    let pause = reader.read_i32()? != 0;
    let action = reader.read_i32()?;
    let target = match action {
        pause_action::DOWNLOAD => PauseTarget::Download,
        pause_action::POST_PROCESS => PauseTarget::PostProcess,
        pause_action::SCAN => PauseTarget::Scan,
        other => {
            return Ok(BoolResponse::fail(format!(
                "unknown pause action {other}"
            )));
        }
    };
    engine.set_paused(target, pause);
    Ok(BoolResponse::ok(if pause { "Paused" } else { "Unpaused" }))
}

fn handle_set_rate(engine: &UsenetEngine, body: &[u8]) -> Result<BoolResponse> {
    let mut reader = WireReader::new(body);
    let rate = reader.read_i32()?.max(0) as u64;
    engine.set_rate_limit(if rate == 0 { None } else { Some(rate) });
    Ok(BoolResponse::ok("Rate-Command completed successfully"))
}

async fn handle_dump_debug(engine: &UsenetEngine) -> BoolResponse {
    let snapshot = engine.queue().snapshot().await;
    let status = engine.status().await;
    engine
        .write_log(
            MessageKind::Debug,
            &format!(
                "debug dump: {} jobs queued, {} tasks running, {} B/s, standby={}",
                snapshot.len(),
                status.thread_count,
                status.download_rate_bps,
                status.standby
            ),
        )
        .await;
    BoolResponse::ok("Debug-Command completed successfully")
}

async fn handle_list(engine: &UsenetEngine, body: &[u8]) -> Result<Vec<u8>> {
    let request = ListRequest::parse(body)?;
    let status = engine.status().await;
    let snapshot = engine.queue().snapshot().await;

    let (regex, regex_valid) = if request.match_mode == match_mode::REGEX {
        match regex::Regex::new(&request.pattern) {
            Ok(re) => (Some(re), true),
            Err(_) => (None, false),
        }
    } else {
        (None, true)
    };

    let mut jobs = Vec::with_capacity(snapshot.len());
    let mut files = Vec::new();
    for (job_index, job) in snapshot.iter().enumerate() {
        let job_matched = regex
            .as_ref()
            .map(|re| request.match_group && re.is_match(&job.name))
            .unwrap_or(false);
        jobs.push(ListJobEntry {
            id: job.id.get() as i32,
            kind: match job.kind {
                JobKind::NzbCollection => 1,
                JobKind::Url => 2,
            },
            size: job.size,
            remaining_size: job.remaining_size,
            paused_size: job.paused_size,
            paused_count: job.paused_file_count as i32,
            remaining_par_count: job.remaining_par_count as i32,
            priority: job.priority,
            matched: job_matched,
            filename: job.source_filename.clone(),
            name: job.name.clone(),
            dest_dir: job.dest_dir.to_string_lossy().into_owned(),
            category: job.category.clone(),
            queued_filename: job.source_filename.clone(),
        });
        if request.file_list {
            for file in &job.files {
                let qualified = format!("{}/{}", job.name, file.filename);
                let file_matched = regex
                    .as_ref()
                    .map(|re| {
                        !request.match_group
                            && (re.is_match(&file.filename) || re.is_match(&qualified))
                    })
                    .unwrap_or(false);
                files.push(ListFileEntry {
                    id: file.id.get() as i32,
                    job_index: job_index as i32,
                    file_size: file.total_size,
                    remaining_size: file.remaining_size,
                    paused: file.paused,
                    filename_confirmed: file.filename_confirmed,
                    active_downloads: file.active_downloads as i32,
                    matched: file_matched,
                    subject: file.subject.clone(),
                    filename: file.filename.clone(),
                });
            }
        }
    }

    let response = ListResponse {
        remaining_size: status.remaining_size,
        download_rate: status.download_rate_bps.min(i32::MAX as u64) as i32,
        download_limit: status.rate_limit_bps.min(i32::MAX as u64) as i32,
        download_paused: status.download_paused,
        download_standby: status.standby,
        post_paused: status.post_paused,
        scan_paused: status.scan_paused,
        thread_count: status.thread_count as i32,
        post_job_count: 0,
        uptime_sec: status.uptime_secs.min(i32::MAX as u64) as i32,
        download_time_sec: status.download_time_secs.min(i32::MAX as u64) as i32,
        downloaded_bytes: status.session_downloaded_bytes,
        regex_valid,
        jobs,
        files,
    };
    Ok(response.to_bytes())
}

async fn handle_log(engine: &UsenetEngine, body: &[u8]) -> Result<Vec<u8>> {
    let mut reader = WireReader::new(body);
    let id_from = reader.read_i32()?.max(0) as u32;
    let lines = reader.read_i32()?.max(0) as usize;
    let messages = engine
        .log_entries(id_from, if lines == 0 { 100 } else { lines })
        .await;
    let response = LogResponse {
        entries: messages
            .into_iter()
            .map(|m| LogEntry {
                id: m.id as i32,
                kind: m.kind.to_i32(),
                time: m.time.timestamp().clamp(0, i32::MAX as i64) as i32,
                text: m.text,
            })
            .collect(),
    };
    Ok(response.to_bytes())
}

async fn handle_write_log(
    engine: &UsenetEngine,
    body: &[u8],
    stream: &mut TcpStream,
) -> Result<BoolResponse> {
    let mut reader = WireReader::new(body);
    let kind = MessageKind::from_i32(reader.read_i32()?);
    let trailing = reader.read_i32()?.max(0) as usize;
    if trailing > MAX_STRUCT_SIZE {
        return Err(Error::RpcProtocol("oversized log message".to_string()));
    }
    let mut text = vec![0u8; trailing];
    stream
        .read_exact(&mut text)
        .await
        .map_err(|e| Error::RpcProtocol(format!("reading log text: {e}")))?;
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    let text = String::from_utf8_lossy(&text[..end]).into_owned();
    engine.write_log(kind, &text).await;
    Ok(BoolResponse::ok("Message added to log"))
}

async fn handle_scan(engine: &UsenetEngine, body: &[u8]) -> Result<BoolResponse> {
    let mut reader = WireReader::new(body);
    let sync = reader.read_i32()? != 0;
    if sync {
        match engine.scan_nzb_dir().await {
            Ok(added) => Ok(BoolResponse::ok(format!("Scan completed, {added} added"))),
            Err(e) => Ok(BoolResponse::fail(format!("Scan failed: {e}"))),
        }
    } else {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.scan_nzb_dir().await {
                tracing::warn!(error = %e, "async scan failed");
            }
        });
        Ok(BoolResponse::ok("Scan scheduled"))
    }
}

async fn handle_history(engine: &UsenetEngine, body: &[u8]) -> Result<Vec<u8>> {
    let mut reader = WireReader::new(body);
    let hidden = reader.read_i32()? != 0;
    let entries = engine.history().await;
    let wire: Vec<HistoryWireEntry> = entries
        .iter()
        .filter(|e| hidden || !e.hidden())
        .enumerate()
        .map(|(index, entry)| {
            let (size, file_count, par_status, script_status, url_status) = match entry {
                crate::history::HistoryEntry::Nzb {
                    size,
                    file_count,
                    par_status,
                    script_status,
                    ..
                } => (*size, *file_count as i32, *par_status, *script_status, 0),
                crate::history::HistoryEntry::Url { url_status, .. } => {
                    (0, 0, 0, 0, *url_status)
                }
                crate::history::HistoryEntry::Dupe { size, .. } => (*size, 0, 0, 0, 0),
            };
            HistoryWireEntry {
                id: index as i32 + 1,
                kind: entry.kind(),
                time: entry.time().timestamp().clamp(0, i32::MAX as i64) as i32,
                size,
                file_count,
                par_status,
                script_status,
                url_status,
                name: entry.name().to_string(),
            }
        })
        .collect();
    Ok(HistoryResponse { entries: wire }.to_bytes())
}

// ---- EditQueue -----------------------------------------------------------

async fn handle_edit(
    engine: &UsenetEngine,
    body: &[u8],
    stream: &mut TcpStream,
) -> Result<BoolResponse> {
    let (mut request, trailer) = EditQueueRequest::parse(body)?;
    if trailer.trailing > MAX_STRUCT_SIZE {
        return Err(Error::RpcProtocol("oversized edit request".to_string()));
    }
    let mut trailing = vec![0u8; trailer.trailing];
    stream
        .read_exact(&mut trailing)
        .await
        .map_err(|e| Error::RpcProtocol(format!("reading edit trailer: {e}")))?;
    request.parse_trailer(&trailer, &trailing)?;

    if request.ids.is_empty() && request.names.is_empty() && request.match_mode != match_mode::REGEX
    {
        return Ok(BoolResponse::fail(
            "Edit-Command failed: no IDs/Names specified",
        ));
    }

    match apply_edit(engine, &request).await {
        Ok(()) => Ok(BoolResponse::ok("Edit-Command completed successfully")),
        Err(Error::RpcProtocol(text)) => Ok(BoolResponse::fail(text)),
        Err(e) => Ok(BoolResponse::fail(format!("Edit-Command failed: {e}"))),
    }
}

fn is_group_action(action: i32) -> bool {
    action >= edit_action::GROUP_MOVE_OFFSET
}

/// Resolve the request's id/name/regex selection into file ids (file
/// actions) and owning job ids (group actions).
async fn resolve_targets(
    engine: &UsenetEngine,
    request: &EditQueueRequest,
) -> Result<(Vec<FileId>, Vec<JobId>)> {
    let queue = engine.queue();
    let mut file_ids: Vec<FileId> = Vec::new();
    let mut job_ids: Vec<JobId> = Vec::new();
    let group = is_group_action(request.action);

    match request.match_mode {
        match_mode::ID => {
            for &raw in &request.ids {
                let fid = FileId::new(raw as i64);
                if group {
                    // for group actions ids name any file of the group
                    if let Some(job_id) = queue.job_of_file(fid).await {
                        job_ids.push(job_id);
                    } else if queue.job_snapshot(JobId::new(raw as i64)).await.is_ok() {
                        // tolerate clients sending the job id directly
                        job_ids.push(JobId::new(raw as i64));
                    }
                } else {
                    file_ids.push(fid);
                }
            }
        }
        match_mode::NAME => {
            for name in &request.names {
                match queue.resolve_name(name).await {
                    Some((job_id, Some(fid))) => {
                        if group {
                            job_ids.push(job_id);
                        } else {
                            file_ids.push(fid);
                        }
                    }
                    Some((job_id, None)) => job_ids.push(job_id),
                    None => {
                        return Err(Error::NotFound(format!("no queue entry named '{name}'")));
                    }
                }
            }
        }
        match_mode::REGEX => {
            let pattern = if !request.text.is_empty() {
                request.text.clone()
            } else {
                request.names.first().cloned().unwrap_or_default()
            };
            let re = regex::Regex::new(&pattern)
                .map_err(|_| Error::RpcProtocol("regex not supported".to_string()))?;
            for job in queue.snapshot().await {
                if group {
                    if re.is_match(&job.name) {
                        job_ids.push(job.id);
                    }
                } else {
                    for file in &job.files {
                        let qualified = format!("{}/{}", job.name, file.filename);
                        if re.is_match(&file.filename) || re.is_match(&qualified) {
                            file_ids.push(file.id);
                        }
                    }
                }
            }
        }
        other => {
            return Err(Error::RpcProtocol(format!("unknown match mode {other}")));
        }
    }

    job_ids.sort();
    job_ids.dedup();
    Ok((file_ids, job_ids))
}

async fn apply_edit(engine: &UsenetEngine, request: &EditQueueRequest) -> Result<()> {
    let queue = engine.queue();
    let (file_ids, job_ids) = resolve_targets(engine, request).await?;

    let offset_target = |offset: i32| MoveTarget::Offset(offset);

    match request.action {
        edit_action::FILE_MOVE_OFFSET => {
            for id in &file_ids {
                queue.move_file(*id, offset_target(request.offset)).await?;
            }
        }
        edit_action::FILE_MOVE_TOP => {
            for id in &file_ids {
                queue.move_file(*id, MoveTarget::Top).await?;
            }
        }
        edit_action::FILE_MOVE_BOTTOM => {
            for id in &file_ids {
                queue.move_file(*id, MoveTarget::Bottom).await?;
            }
        }
        edit_action::FILE_PAUSE => {
            for id in &file_ids {
                queue.pause_file(*id, true).await?;
            }
        }
        edit_action::FILE_RESUME => {
            for id in &file_ids {
                queue.pause_file(*id, false).await?;
            }
        }
        edit_action::FILE_DELETE => {
            cancel_running(engine, &file_ids).await;
            for id in &file_ids {
                let effect = queue.delete_file(*id).await?;
                if let Some(job) = effect.removed_job {
                    engine.shared.retire_job(job).await;
                }
            }
        }
        edit_action::FILE_PAUSE_ALL_PARS | edit_action::FILE_PAUSE_EXTRA_PARS => {
            let extra_only = request.action == edit_action::FILE_PAUSE_EXTRA_PARS;
            let mut jobs: HashSet<JobId> = HashSet::new();
            for id in &file_ids {
                if let Some(job_id) = queue.job_of_file(*id).await {
                    jobs.insert(job_id);
                }
            }
            for job_id in jobs {
                queue.pause_pars(job_id, extra_only).await?;
            }
        }
        edit_action::FILE_SPLIT => {
            queue.split_job(&request.text, &file_ids).await?;
        }
        edit_action::GROUP_MOVE_OFFSET => {
            for id in &job_ids {
                queue.move_job(*id, offset_target(request.offset)).await?;
            }
        }
        edit_action::GROUP_MOVE_TOP => {
            for id in &job_ids {
                queue.move_job(*id, MoveTarget::Top).await?;
            }
        }
        edit_action::GROUP_MOVE_BOTTOM => {
            for id in &job_ids {
                queue.move_job(*id, MoveTarget::Bottom).await?;
            }
        }
        edit_action::GROUP_PAUSE => {
            for id in &job_ids {
                queue.pause_job(*id, true).await?;
            }
        }
        edit_action::GROUP_RESUME => {
            for id in &job_ids {
                queue.pause_job(*id, false).await?;
            }
        }
        edit_action::GROUP_DELETE => {
            for id in &job_ids {
                let running = queue.running_files(*id).await;
                cancel_running(engine, &running).await;
                let effect = queue.delete_job(*id, DeleteStatus::Manual).await?;
                if let Some(job) = effect.removed_job {
                    engine.shared.retire_job(job).await;
                }
            }
        }
        edit_action::GROUP_PAUSE_ALL_PARS | edit_action::GROUP_PAUSE_EXTRA_PARS => {
            let extra_only = request.action == edit_action::GROUP_PAUSE_EXTRA_PARS;
            for id in &job_ids {
                queue.pause_pars(*id, extra_only).await?;
            }
        }
        edit_action::GROUP_SET_CATEGORY | edit_action::GROUP_APPLY_CATEGORY => {
            // ApplyCategory additionally relocates partial output on disk;
            // partials live under the temp dir here, so both map to a
            // destination rewrite
            let dest = engine.shared.dest_dir_for(&request.text);
            for id in &job_ids {
                queue.set_category(*id, &request.text, dest.clone()).await?;
            }
        }
        edit_action::GROUP_MERGE => {
            let Some((&dest, rest)) = job_ids.split_first() else {
                return Err(Error::RpcProtocol("merge needs at least two groups".into()));
            };
            for src in rest {
                queue.merge_jobs(dest, *src).await?;
            }
        }
        edit_action::GROUP_SET_PARAMETER => {
            let (key, value) = request
                .text
                .split_once('=')
                .ok_or_else(|| Error::RpcProtocol("parameter must be key=value".into()))?;
            for id in &job_ids {
                queue.set_parameter(*id, key, value).await?;
            }
        }
        edit_action::GROUP_SET_NAME => {
            for id in &job_ids {
                queue.rename_job(*id, &request.text).await?;
            }
        }
        edit_action::GROUP_SET_PRIORITY => {
            let priority: i32 = request
                .text
                .trim()
                .parse()
                .map_err(|_| Error::RpcProtocol("priority must be a number".into()))?;
            for id in &job_ids {
                queue.set_priority(*id, priority).await?;
            }
        }
        other => {
            return Err(Error::RpcProtocol(format!("unknown edit action {other}")));
        }
    }
    Ok(())
}

/// Cancel running downloader tasks touching the listed files.
async fn cancel_running(engine: &UsenetEngine, file_ids: &[FileId]) {
    let tasks = engine.shared.tasks.lock().await;
    for ((file_id, _), task) in tasks.iter() {
        if file_ids.contains(file_id) {
            task.cancel.cancel();
        }
    }
}
