//! File assembly
//!
//! When a file's article accounting completes, the assembler turns the
//! downloaded parts into the final output file: joining per-article partials
//! in part order (non-direct mode), renaming the already-laid-out shared
//! output (direct-write mode), or collecting raw article bodies into a
//! subdirectory (raw mode). It enforces filename dedupe, `_duplicate<N>`
//! collision suffixing, the broken-file policies, and reports whether the
//! result is complete.
//!
//! Joining happens on a blocking thread against data captured from the queue;
//! the queue lock is never held across assembly I/O.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::queue::FileCompletion;
use crate::types::{ArticleStatus, DeleteStatus, DupeMode};
use crate::utils::unique_output_path;

/// What the assembler did with a completed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// Output written (possibly under a `_duplicate<N>` or `_broken` name)
    Written {
        /// Final path on disk
        path: PathBuf,
        /// Final filename (what the job's completed-file list records)
        filename: String,
        /// Whether every article decoded successfully
        complete: bool,
    },
    /// Filename dedupe removed the file; its bytes do not count
    AutoDeleted,
    /// The owning job is deleted; nothing was written
    Skipped,
}

/// Assemble one completed file.
pub async fn assemble(
    completion: &FileCompletion,
    config: &DownloadConfig,
) -> Result<AssemblyOutcome> {
    if completion.job_delete_status != DeleteStatus::None {
        return Ok(AssemblyOutcome::Skipped);
    }

    // close the shared direct-write handle before any rename
    let direct_file = completion.output_lock.lock().await.take();
    drop(direct_file);

    let completion = completion.clone();
    let config = config.clone();
    tokio::task::spawn_blocking(move || assemble_blocking(&completion, &config))
        .await
        .map_err(|e| Error::Other(format!("assembly task panicked: {e}")))?
}

fn assemble_blocking(
    completion: &FileCompletion,
    config: &DownloadConfig,
) -> Result<AssemblyOutcome> {
    std::fs::create_dir_all(&completion.dest_dir)?;

    let target = completion.dest_dir.join(&completion.filename);
    if target.exists() && completion.dupe_mode != DupeMode::Force && !completion.many_dupe_files {
        tracing::info!(
            filename = %completion.filename,
            "output already exists, auto-deleting duplicate file"
        );
        discard_partials(completion, config);
        return Ok(AssemblyOutcome::AutoDeleted);
    }
    let target = unique_output_path(&target);

    let complete = completion.failed_articles == 0;

    let written_path = if !config.decode {
        assemble_raw(completion, &target)?
    } else if config.direct_write {
        assemble_direct(completion, config, &target)?
    } else {
        assemble_joined(completion, &target)?
    };

    let mut final_path = written_path;
    if !complete {
        tracing::warn!(
            filename = %completion.filename,
            ok = completion.success_articles,
            total = completion.total_articles,
            "file is incomplete"
        );
        if config.rename_broken {
            let broken = PathBuf::from(format!("{}_broken", final_path.display()));
            std::fs::rename(&final_path, &broken)?;
            final_path = broken;
        }
        if config.broken_log {
            append_broken_log(completion)?;
        }
    }

    let filename = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&completion.filename)
        .to_string();
    Ok(AssemblyOutcome::Written {
        path: final_path,
        filename,
        complete,
    })
}

/// Non-direct mode: stream partials in part order into a temp output, then
/// rename atomically onto the target.
fn assemble_joined(completion: &FileCompletion, target: &Path) -> Result<PathBuf> {
    let temp = target.with_extension("tmp__joining");
    {
        let mut out = std::io::BufWriter::new(std::fs::File::create(&temp)?);
        for article in &completion.articles {
            if article.status != ArticleStatus::Finished {
                continue;
            }
            let Some(path) = &article.result_path else {
                continue;
            };
            let data = std::fs::read(path).map_err(|e| Error::Assembly {
                path: path.clone(),
                reason: format!("reading part {}: {e}", article.part_number),
            })?;
            out.write_all(&data).map_err(|e| Error::Assembly {
                path: temp.clone(),
                reason: format!("writing part {}: {e}", article.part_number),
            })?;
        }
        out.flush().map_err(|e| Error::Assembly {
            path: temp.clone(),
            reason: format!("flushing: {e}"),
        })?;
    }
    std::fs::rename(&temp, target)?;
    // partials are consumed
    for article in &completion.articles {
        if let Some(path) = &article.result_path {
            let _ = std::fs::remove_file(path);
        }
    }
    Ok(target.to_path_buf())
}

/// Direct-write mode: the shared output already has the final layout.
fn assemble_direct(
    completion: &FileCompletion,
    config: &DownloadConfig,
    target: &Path,
) -> Result<PathBuf> {
    let source = crate::downloader::direct_output_path(
        &config.temp_dir,
        completion.job_id,
        completion.file_id,
    );
    if !source.exists() {
        return Err(Error::Assembly {
            path: source,
            reason: "direct-write output missing".to_string(),
        });
    }
    match std::fs::rename(&source, target) {
        Ok(()) => {}
        Err(_) => {
            // temp and dest on different filesystems: copy then unlink
            std::fs::copy(&source, target)?;
            std::fs::remove_file(&source)?;
        }
    }
    Ok(target.to_path_buf())
}

/// Raw mode: collect article bodies into a subdirectory named after the file.
fn assemble_raw(completion: &FileCompletion, target: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(target)?;
    for article in &completion.articles {
        if article.status != ArticleStatus::Finished {
            continue;
        }
        let Some(path) = &article.result_path else {
            continue;
        };
        let dest = target.join(format!("{:03}.msg", article.part_number));
        if std::fs::rename(path, &dest).is_err() {
            std::fs::copy(path, &dest)?;
            let _ = std::fs::remove_file(path);
        }
    }
    Ok(target.to_path_buf())
}

fn append_broken_log(completion: &FileCompletion) -> Result<()> {
    let log_path = completion.dest_dir.join("_brokenlog.txt");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    writeln!(
        file,
        "{} ({}/{})",
        completion.filename, completion.success_articles, completion.total_articles
    )?;
    Ok(())
}

/// Remove partials of an auto-deleted file.
fn discard_partials(completion: &FileCompletion, config: &DownloadConfig) {
    for article in &completion.articles {
        if let Some(path) = &article.result_path {
            let _ = std::fs::remove_file(path);
        }
    }
    let direct = crate::downloader::direct_output_path(
        &config.temp_dir,
        completion.job_id,
        completion.file_id,
    );
    let _ = std::fs::remove_file(direct);
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ArticlePart, OutputFileLock};
    use crate::types::{FileId, JobId};

    struct Setup {
        _dest: tempfile::TempDir,
        _temp: tempfile::TempDir,
        dest_dir: PathBuf,
        temp_dir: PathBuf,
    }

    fn setup() -> Setup {
        let dest = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        Setup {
            dest_dir: dest.path().to_path_buf(),
            temp_dir: temp.path().to_path_buf(),
            _dest: dest,
            _temp: temp,
        }
    }

    fn config(setup: &Setup, direct_write: bool) -> DownloadConfig {
        DownloadConfig {
            dest_dir: setup.dest_dir.clone(),
            temp_dir: setup.temp_dir.clone(),
            direct_write,
            ..Default::default()
        }
    }

    fn completion(
        setup: &Setup,
        parts: &[(u32, ArticleStatus, Option<&[u8]>)],
    ) -> FileCompletion {
        let articles: Vec<ArticlePart> = parts
            .iter()
            .map(|(number, status, data)| {
                let result_path = data.map(|bytes| {
                    let dir = setup.temp_dir.join("j1");
                    std::fs::create_dir_all(&dir).unwrap();
                    let path = dir.join(format!("f1.{number:03}.part"));
                    std::fs::write(&path, bytes).unwrap();
                    path
                });
                ArticlePart {
                    part_number: *number,
                    status: *status,
                    result_path,
                    size: data.map(|d| d.len() as u64).unwrap_or(0),
                }
            })
            .collect();
        let success = articles
            .iter()
            .filter(|a| a.status == ArticleStatus::Finished)
            .count() as u32;
        let failed = articles
            .iter()
            .filter(|a| a.status == ArticleStatus::Failed)
            .count() as u32;
        FileCompletion {
            job_id: JobId::new(1),
            file_id: FileId::new(1),
            filename: "output.bin".to_string(),
            dest_dir: setup.dest_dir.clone(),
            total_articles: articles.len() as u32,
            success_articles: success,
            failed_articles: failed,
            articles,
            output_lock: OutputFileLock::new(tokio::sync::Mutex::new(None)),
            job_delete_status: DeleteStatus::None,
            dupe_mode: DupeMode::Score,
            many_dupe_files: false,
        }
    }

    #[tokio::test]
    async fn joined_mode_concatenates_parts_in_order() {
        let s = setup();
        let c = completion(
            &s,
            &[
                (1, ArticleStatus::Finished, Some(b"aaa".as_slice())),
                (2, ArticleStatus::Finished, Some(b"bbb".as_slice())),
                (3, ArticleStatus::Finished, Some(b"cc".as_slice())),
            ],
        );
        let outcome = assemble(&c, &config(&s, false)).await.unwrap();
        match outcome {
            AssemblyOutcome::Written { path, complete, .. } => {
                assert!(complete);
                assert_eq!(std::fs::read(path).unwrap(), b"aaabbbcc");
            }
            other => panic!("expected Written, got {other:?}"),
        }
        // partials consumed
        assert!(!s.temp_dir.join("j1/f1.001.part").exists());
    }

    #[tokio::test]
    async fn failed_article_marks_file_incomplete_and_logs() {
        let s = setup();
        let c = completion(
            &s,
            &[
                (1, ArticleStatus::Finished, Some(b"aaa".as_slice())),
                (2, ArticleStatus::Failed, None),
            ],
        );
        let outcome = assemble(&c, &config(&s, false)).await.unwrap();
        match outcome {
            AssemblyOutcome::Written { complete, .. } => assert!(!complete),
            other => panic!("expected Written, got {other:?}"),
        }
        let log = std::fs::read_to_string(s.dest_dir.join("_brokenlog.txt")).unwrap();
        assert_eq!(log, "output.bin (1/2)\n");
    }

    #[tokio::test]
    async fn rename_broken_appends_suffix() {
        let s = setup();
        let c = completion(
            &s,
            &[
                (1, ArticleStatus::Finished, Some(b"x".as_slice())),
                (2, ArticleStatus::Failed, None),
            ],
        );
        let mut cfg = config(&s, false);
        cfg.rename_broken = true;
        let outcome = assemble(&c, &cfg).await.unwrap();
        match outcome {
            AssemblyOutcome::Written { path, filename, .. } => {
                assert!(path.to_string_lossy().ends_with("output.bin_broken"));
                assert_eq!(filename, "output.bin_broken");
                assert!(path.exists());
            }
            other => panic!("expected Written, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_mode_renames_shared_output() {
        let s = setup();
        let c = completion(&s, &[(1, ArticleStatus::Finished, None)]);
        let source = crate::downloader::direct_output_path(&s.temp_dir, c.job_id, c.file_id);
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"laid out already").unwrap();

        let outcome = assemble(&c, &config(&s, true)).await.unwrap();
        match outcome {
            AssemblyOutcome::Written { path, .. } => {
                assert_eq!(std::fs::read(path).unwrap(), b"laid out already");
            }
            other => panic!("expected Written, got {other:?}"),
        }
        assert!(!source.exists(), "source must be consumed by the rename");
    }

    #[tokio::test]
    async fn existing_target_auto_deletes_the_file() {
        let s = setup();
        std::fs::write(s.dest_dir.join("output.bin"), b"earlier copy").unwrap();
        let c = completion(&s, &[(1, ArticleStatus::Finished, Some(b"new".as_slice()))]);
        let outcome = assemble(&c, &config(&s, false)).await.unwrap();
        assert_eq!(outcome, AssemblyOutcome::AutoDeleted);
        assert_eq!(
            std::fs::read(s.dest_dir.join("output.bin")).unwrap(),
            b"earlier copy",
            "the earlier file must be untouched"
        );
    }

    #[tokio::test]
    async fn force_dupe_mode_writes_duplicate_suffix() {
        let s = setup();
        std::fs::write(s.dest_dir.join("output.bin"), b"earlier copy").unwrap();
        let mut c = completion(&s, &[(1, ArticleStatus::Finished, Some(b"new".as_slice()))]);
        c.dupe_mode = DupeMode::Force;
        let outcome = assemble(&c, &config(&s, false)).await.unwrap();
        match outcome {
            AssemblyOutcome::Written { path, filename, .. } => {
                assert_eq!(filename, "output_duplicate1.bin");
                assert_eq!(std::fs::read(path).unwrap(), b"new");
            }
            other => panic!("expected Written, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleted_job_skips_assembly() {
        let s = setup();
        let mut c = completion(&s, &[(1, ArticleStatus::Finished, Some(b"x".as_slice()))]);
        c.job_delete_status = DeleteStatus::Manual;
        let outcome = assemble(&c, &config(&s, false)).await.unwrap();
        assert_eq!(outcome, AssemblyOutcome::Skipped);
        assert!(!s.dest_dir.join("output.bin").exists());
    }

    #[tokio::test]
    async fn raw_mode_collects_bodies_into_subdirectory() {
        let s = setup();
        let c = completion(
            &s,
            &[
                (1, ArticleStatus::Finished, Some(b"one".as_slice())),
                (2, ArticleStatus::Finished, Some(b"two".as_slice())),
            ],
        );
        let mut cfg = config(&s, false);
        cfg.decode = false;
        let outcome = assemble(&c, &cfg).await.unwrap();
        match outcome {
            AssemblyOutcome::Written { path, .. } => {
                assert!(path.is_dir());
                assert_eq!(std::fs::read(path.join("001.msg")).unwrap(), b"one");
                assert_eq!(std::fs::read(path.join("002.msg")).unwrap(), b"two");
            }
            other => panic!("expected Written, got {other:?}"),
        }
    }
}
