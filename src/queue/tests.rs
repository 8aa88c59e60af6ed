//! Queue behavior tests: aggregate invariants, ordering, group surgery,
//! scheduler selection, and delete draining.

use super::*;
use crate::types::JobKind;
use std::path::PathBuf;

fn make_file(sizes: &[u64], filename: &str) -> FileInfo {
    let articles = sizes
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            Article::new(
                i as u32 + 1,
                format!("{filename}.{i}@example"),
                s,
                3,
                10,
            )
        })
        .collect();
    build_file(
        FileId::new(0),
        format!("post [1/1] - \"{filename}\" yEnc"),
        filename.to_string(),
        vec!["alt.binaries.test".to_string()],
        articles,
    )
}

fn make_job(name: &str, priority: i32, files: Vec<FileInfo>) -> Job {
    let mut job = Job::new(
        JobId::new(0),
        name.to_string(),
        format!("{name}.nzb"),
        PathBuf::from("/dst"),
        String::new(),
        JobKind::NzbCollection,
        priority,
    );
    for f in files {
        job.attach_file(f);
    }
    job
}

async fn queue_with(jobs: Vec<Job>) -> (DownloadQueue, Vec<JobId>) {
    let queue = DownloadQueue::new(3, 10);
    let mut ids = Vec::new();
    for job in jobs {
        ids.push(queue.add_job(job).await);
    }
    (queue, ids)
}

/// Q1: remaining_size and paused_size stay consistent with file sums.
fn assert_q1(snapshot: &crate::types::JobSnapshot) {
    let file_remaining: u64 = snapshot.files.iter().map(|f| f.remaining_size).sum();
    let paused_remaining: u64 = snapshot
        .files
        .iter()
        .filter(|f| f.paused)
        .map(|f| f.remaining_size)
        .sum();
    assert_eq!(
        snapshot.remaining_size, file_remaining,
        "job.remaining_size must equal the sum over files"
    );
    assert_eq!(
        snapshot.paused_size, paused_remaining,
        "job.paused_size must equal the sum over paused files"
    );
}

#[tokio::test]
async fn add_job_assigns_fresh_ids() {
    let (queue, ids) = queue_with(vec![
        make_job("a", 0, vec![make_file(&[100], "a.rar")]),
        make_job("b", 0, vec![make_file(&[100], "b.rar")]),
    ])
    .await;
    assert_ne!(ids[0], ids[1]);
    let snaps = queue.snapshot().await;
    let all_file_ids: Vec<FileId> = snaps
        .iter()
        .flat_map(|j| j.files.iter().map(|f| f.id))
        .collect();
    let mut deduped = all_file_ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), all_file_ids.len(), "file ids must be unique");
}

#[tokio::test]
async fn pause_file_maintains_q1() {
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![make_file(&[100, 100], "a.rar"), make_file(&[50], "b.rar")],
    )])
    .await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let fid = snap.files[0].id;

    queue.pause_file(fid, true).await.unwrap();
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.paused_size, 200);
    assert_eq!(snap.paused_file_count, 1);
    assert_q1(&snap);

    // pausing twice is a no-op, not a double count
    queue.pause_file(fid, true).await.unwrap();
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.paused_size, 200, "idempotent pause must not double");

    queue.pause_file(fid, false).await.unwrap();
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.paused_size, 0);
    assert_eq!(snap.paused_file_count, 0);
    assert_q1(&snap);
}

#[tokio::test]
async fn article_completion_updates_all_counters() {
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![make_file(&[100, 100, 50], "a.rar")],
    )])
    .await;
    let assignment = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .expect("one file with undefined articles");
    assert_eq!(assignment.part_number, 1);

    let effect = queue
        .finish_article(assignment.file_id, 1, None)
        .await
        .unwrap();
    assert!(effect.file_completed.is_none(), "2 articles still pending");

    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.remaining_size, 150);
    assert_eq!(snap.success_articles, 1);
    assert_q1(&snap);
}

#[tokio::test]
async fn q2_completed_articles_equals_finished_plus_failed() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10, 20, 30], "a.rar")])])
        .await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let fid = snap.files[0].id;

    // run all three articles to mixed outcomes
    for part in 1..=3u32 {
        let skip = std::collections::HashSet::new();
        let a = queue.next_assignment(&skip).await.unwrap();
        assert_eq!(a.part_number, part);
        if part == 2 {
            queue.fail_article(fid, part, true).await.unwrap();
        } else {
            let effect = queue.finish_article(fid, part, None).await.unwrap();
            if part == 3 {
                let completion = effect.file_completed.expect("last article completes file");
                assert_eq!(completion.success_articles, 2);
                assert_eq!(completion.failed_articles, 1);
                assert_eq!(completion.total_articles, 3);
                let finished_or_failed = completion
                    .articles
                    .iter()
                    .filter(|a| {
                        matches!(a.status, ArticleStatus::Finished | ArticleStatus::Failed)
                    })
                    .count();
                assert_eq!(finished_or_failed, 3, "Q2: completed = finished + failed");
            }
        }
    }

    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.remaining_size, 0);
    assert_eq!(snap.failed_articles, 1);
    assert_eq!(snap.success_articles, 2);
}

#[tokio::test]
async fn selection_prefers_higher_priority_job() {
    let (queue, _) = queue_with(vec![
        make_job("low", -1, vec![make_file(&[10], "low.rar")]),
        make_job("high", 5, vec![make_file(&[10], "high.rar")]),
    ])
    .await;
    let a = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();
    assert_eq!(a.filename, "high.rar", "higher priority job must win");
}

#[tokio::test]
async fn selection_prefers_extra_priority_over_priority() {
    let (queue, ids) = queue_with(vec![
        make_job("high", 5, vec![make_file(&[10], "high.rar")]),
        make_job("par", -10, vec![make_file(&[10], "recover.par2")]),
    ])
    .await;
    let par_file = queue.job_snapshot(ids[1]).await.unwrap().files[0].id;
    queue.set_extra_priority(par_file, true).await.unwrap();

    let a = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();
    assert_eq!(
        a.filename, "recover.par2",
        "extra_priority forces the file ahead of any priority"
    );
}

#[tokio::test]
async fn selection_skips_paused_and_exhausted_files() {
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![make_file(&[10], "one.rar"), make_file(&[10], "two.rar")],
    )])
    .await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    queue.pause_file(snap.files[0].id, true).await.unwrap();

    let mut skip = std::collections::HashSet::new();
    let a = queue.next_assignment(&skip).await.unwrap();
    assert_eq!(a.filename, "two.rar", "paused file must be skipped");

    skip.insert(a.file_id);
    // the only other file is paused and this one is running its lone article
    assert!(queue.next_assignment(&skip).await.is_none());
}

#[tokio::test]
async fn requeue_returns_article_to_undefined_at_new_level() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "a.rar")])]).await;
    let a = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();
    assert_eq!(a.level, 0);
    queue
        .requeue_article(a.file_id, a.part_number, 1, 3, 10)
        .await
        .unwrap();

    let b = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();
    assert_eq!(b.level, 1, "requeued article must carry the advanced level");
    assert_eq!(b.part_number, a.part_number);

    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.files[0].active_downloads, 1);
}

#[tokio::test]
async fn cancelled_article_returns_to_undefined_without_accounting() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "a.rar")])]).await;
    let a = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();
    queue.article_cancelled(a.file_id, a.part_number).await.unwrap();

    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.remaining_size, 10, "cancel must not shrink remaining");
    assert_eq!(snap.files[0].active_downloads, 0);
    assert_eq!(
        snap.files[0].articles[0].status,
        ArticleStatus::Undefined,
        "Q4: status returns to undefined after cancel"
    );
}

#[tokio::test]
async fn delete_with_active_download_drains_before_removal() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "a.rar")])]).await;
    let a = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();

    let effect = queue.delete_file(a.file_id).await.unwrap();
    assert!(
        effect.removed_files.is_empty(),
        "file with an active download must stay until it drains"
    );
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.files.len(), 1, "still reachable while draining");

    // the running task finishes; the drain removes the file and the empty job
    let effect = queue.article_cancelled(a.file_id, a.part_number).await.unwrap();
    assert_eq!(effect.removed_files.len(), 1);
    assert!(
        effect.removed_job.is_some(),
        "job emptied by the drain leaves the queue"
    );
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn delete_idle_file_is_removed_immediately() {
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![make_file(&[10], "a.rar"), make_file(&[10], "b.rar")],
    )])
    .await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let effect = queue.delete_file(snap.files[0].id).await.unwrap();
    assert_eq!(effect.removed_files.len(), 1);
    assert!(effect.removed_job.is_none(), "job still has b.rar");

    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.files.len(), 1);
    assert_eq!(snap.size, 10, "deleted file's size is unfolded");
}

#[tokio::test]
async fn split_moves_files_into_a_new_job() {
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![make_file(&[10], "one.rar"), make_file(&[20], "two.rar")],
    )])
    .await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let new_id = queue
        .split_job("a.split", &[snap.files[1].id])
        .await
        .unwrap();

    let old = queue.job_snapshot(ids[0]).await.unwrap();
    let new = queue.job_snapshot(new_id).await.unwrap();
    assert_eq!(old.size, 10);
    assert_eq!(new.size, 20);
    assert_eq!(new.name, "a.split");
    assert_q1(&old);
    assert_q1(&new);
}

#[tokio::test]
async fn split_of_all_files_removes_the_source_job() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "one.rar")])]).await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let new_id = queue
        .split_job("a.split", &[snap.files[0].id])
        .await
        .unwrap();
    assert!(queue.job_snapshot(ids[0]).await.is_err(), "source emptied");
    assert!(queue.job_snapshot(new_id).await.is_ok());
}

#[tokio::test]
async fn merge_splices_files_and_drops_source() {
    let (queue, ids) = queue_with(vec![
        make_job("dst", 0, vec![make_file(&[10], "one.rar")]),
        make_job("src", 0, vec![make_file(&[20], "two.rar")]),
    ])
    .await;
    queue.merge_jobs(ids[0], ids[1]).await.unwrap();

    let dst = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(dst.size, 30);
    assert_eq!(dst.files.len(), 2);
    assert_q1(&dst);
    assert!(queue.job_snapshot(ids[1]).await.is_err());
}

#[tokio::test]
async fn merge_into_itself_is_rejected() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "x.rar")])]).await;
    assert!(queue.merge_jobs(ids[0], ids[0]).await.is_err());
}

#[tokio::test]
async fn rename_rejects_empty_names() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "x.rar")])]).await;
    assert!(queue.rename_job(ids[0], "  ").await.is_err());
    queue.rename_job(ids[0], "fresh name").await.unwrap();
    assert_eq!(queue.job_snapshot(ids[0]).await.unwrap().name, "fresh name");
}

#[tokio::test]
async fn move_job_top_bottom_and_offset() {
    let (queue, ids) = queue_with(vec![
        make_job("a", 0, vec![make_file(&[1], "a.rar")]),
        make_job("b", 0, vec![make_file(&[1], "b.rar")]),
        make_job("c", 0, vec![make_file(&[1], "c.rar")]),
    ])
    .await;

    queue.move_job(ids[2], MoveTarget::Top).await.unwrap();
    let names: Vec<String> = queue.snapshot().await.iter().map(|j| j.name.clone()).collect();
    assert_eq!(names, ["c", "a", "b"]);

    queue.move_job(ids[2], MoveTarget::Offset(1)).await.unwrap();
    let names: Vec<String> = queue.snapshot().await.iter().map(|j| j.name.clone()).collect();
    assert_eq!(names, ["a", "c", "b"]);

    queue.move_job(ids[0], MoveTarget::Bottom).await.unwrap();
    let names: Vec<String> = queue.snapshot().await.iter().map(|j| j.name.clone()).collect();
    assert_eq!(names, ["c", "b", "a"]);
}

#[tokio::test]
async fn pause_pars_keeps_smallest_par_when_extra_only() {
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![
            make_file(&[100], "data.rar"),
            make_file(&[10], "data.par2"),
            make_file(&[50], "data.vol01+02.par2"),
            make_file(&[90], "data.vol03+04.par2"),
        ],
    )])
    .await;
    queue.pause_pars(ids[0], true).await.unwrap();
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let paused: Vec<&str> = snap
        .files
        .iter()
        .filter(|f| f.paused)
        .map(|f| f.filename.as_str())
        .collect();
    assert_eq!(
        paused,
        ["data.vol01+02.par2", "data.vol03+04.par2"],
        "the smallest par file stays live for verification"
    );
}

#[tokio::test]
async fn retire_file_keeps_health_aggregates_and_completes_job() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[10], "x.rar")])]).await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let fid = snap.files[0].id;

    let a = queue
        .next_assignment(&std::collections::HashSet::new())
        .await
        .unwrap();
    let effect = queue.finish_article(fid, a.part_number, None).await.unwrap();
    assert!(effect.file_completed.is_some());

    let retire = queue
        .retire_file(fid, Some("x.rar".to_string()), false)
        .await
        .unwrap();
    let job = retire.completed_job.expect("last file retires the job");
    assert_eq!(job.completed_files, vec!["x.rar".to_string()]);
    assert!(
        matches!(retire.health, Some(HealthVerdict::Ok)),
        "nothing failed, health must be Ok"
    );
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn health_verdict_fires_below_critical() {
    // 800 payload + 200 par: critical = 750; fail 400 payload bytes -> health 500
    let (queue, ids) = queue_with(vec![make_job(
        "a",
        0,
        vec![
            make_file(&[400, 400], "data.rar"),
            make_file(&[200], "data.par2"),
            make_file(&[10], "keep.rar"),
        ],
    )])
    .await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let rar = snap.files[0].id;

    // run both rar articles to failure
    for part in 1..=2u32 {
        let a = queue
            .next_assignment(&std::collections::HashSet::new())
            .await
            .unwrap();
        assert_eq!(a.file_id, rar);
        queue.fail_article(rar, part, true).await.unwrap();
    }
    let retire = queue.retire_file(rar, None, false).await.unwrap();
    match retire.health {
        Some(HealthVerdict::Critical { health, critical }) => {
            assert!(health < critical, "health {health} must be below {critical}");
        }
        other => panic!("expected critical health, got {other:?}"),
    }
}

#[tokio::test]
async fn resolve_name_finds_jobs_and_files() {
    let (queue, ids) = queue_with(vec![make_job("group", 0, vec![make_file(&[1], "f.rar")])]).await;
    assert_eq!(queue.resolve_name("group").await, Some((ids[0], None)));
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(
        queue.resolve_name("group/f.rar").await,
        Some((ids[0], Some(snap.files[0].id)))
    );
    assert_eq!(queue.resolve_name("missing").await, None);
}

#[tokio::test]
async fn confirm_filename_applies_once() {
    let (queue, ids) = queue_with(vec![make_job("a", 0, vec![make_file(&[1], "guess.rar")])]).await;
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    let fid = snap.files[0].id;

    let old = queue.confirm_filename(fid, "real-name.rar").await;
    assert_eq!(old.as_deref(), Some("guess.rar"));

    let again = queue.confirm_filename(fid, "other.rar").await;
    assert!(again.is_none(), "second confirmation must be ignored");
    let snap = queue.job_snapshot(ids[0]).await.unwrap();
    assert_eq!(snap.files[0].filename, "real-name.rar");
    assert!(snap.files[0].filename_confirmed);
}
