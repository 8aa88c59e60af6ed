//! End-to-end download scenarios against the mock NNTP server.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{
    MockNntpServer, Scripted, engine_config, three_part_nzb, three_part_payload,
    three_part_scripts, wait_for_event, yenc_part,
};
use usenet_engine::{AddOptions, Event, UsenetEngine};

const MIDS: [&str; 3] = ["part1@test", "part2@test", "part3@test"];
const WAIT: Duration = Duration::from_secs(30);

/// Scenario: a single-file NZB with three segments (100/100/50) downloads
/// completely, the output has length 250, and the job completes successfully.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_file_nzb_downloads_and_assembles() {
    let server = MockNntpServer::start(three_part_scripts("data.bin", MIDS)).await;
    let dir = tempfile::tempdir().unwrap();
    let config = engine_config(&[(server.addr, 0, 2)], dir.path());
    let dest = config.download.dest_dir.clone();

    let engine = UsenetEngine::new(config).await.unwrap();
    let mut events = engine.subscribe();
    engine
        .add_nzb_content(
            three_part_nzb("data.bin", MIDS).as_bytes(),
            "job.nzb",
            AddOptions::default(),
        )
        .await
        .unwrap();
    engine.start();

    let completed = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, Event::JobCompleted { .. })
    })
    .await;
    match completed {
        Event::JobCompleted {
            success_articles,
            failed_articles,
            ..
        } => {
            assert_eq!(success_articles, 3, "all three segments must succeed");
            assert_eq!(failed_articles, 0);
        }
        _ => unreachable!(),
    }

    let written = std::fs::read(dest.join("data.bin")).unwrap();
    assert_eq!(written.len(), 250, "output length must be 250");
    assert_eq!(written, three_part_payload(), "bytes must round-trip exactly");

    assert!(engine.queue().is_empty().await, "queue must drain");
    let status = engine.status().await;
    assert!(
        status.session_downloaded_bytes >= 250,
        "session byte counter must cover the article bodies"
    );
    engine.shutdown().await.unwrap();
}

/// Scenario: level 0 returns 430 for every segment, level 1 serves them.
/// The file completes via failover and the per-server counters show three
/// failures on the primary and three successes on the backup.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn not_found_fails_over_to_backup_level() {
    let mut primary_articles = HashMap::new();
    for mid in MIDS {
        primary_articles.insert(mid.to_string(), vec![Scripted::NotFound]);
    }
    let primary = MockNntpServer::start(primary_articles).await;
    let backup = MockNntpServer::start(three_part_scripts("data.bin", MIDS)).await;

    let dir = tempfile::tempdir().unwrap();
    let config = engine_config(&[(primary.addr, 0, 2), (backup.addr, 1, 2)], dir.path());
    let dest = config.download.dest_dir.clone();

    let engine = UsenetEngine::new(config).await.unwrap();
    let mut events = engine.subscribe();
    engine
        .add_nzb_content(
            three_part_nzb("data.bin", MIDS).as_bytes(),
            "job.nzb",
            AddOptions::default(),
        )
        .await
        .unwrap();
    engine.start();

    wait_for_event(&mut events, WAIT, |e| matches!(e, Event::JobCompleted { .. })).await;

    let written = std::fs::read(dest.join("data.bin")).unwrap();
    assert_eq!(written.len(), 250);

    let stats = engine.server_stats().await;
    let primary_stats = stats.iter().find(|s| s.id == 1).unwrap();
    let backup_stats = stats.iter().find(|s| s.id == 2).unwrap();
    assert_eq!(
        primary_stats.failed_articles, 3,
        "every segment must have failed once on level 0"
    );
    assert_eq!(
        backup_stats.success_articles, 3,
        "every segment must have succeeded on level 1"
    );
    engine.shutdown().await.unwrap();
}

/// Scenario: part 2 arrives corrupted once; with retry-on-crc enabled the
/// scheduler re-queues it, the retry succeeds, and the file assembles.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crc_error_retries_and_recovers() {
    let payload = three_part_payload();
    let good_part2 = yenc_part(&payload[100..200], "data.bin", 250, 2, 101);

    // corrupt one body character of part 2, avoiding yEnc control bytes
    let mut bad_part2 = good_part2.clone();
    let mut mutated = bad_part2[2].clone();
    for b in mutated.iter_mut() {
        if *b != b'=' && *b != b'.' {
            *b = b.wrapping_add(1);
            if *b == b'=' || *b == b'\r' || *b == b'\n' || *b == b'.' {
                *b = b.wrapping_add(1);
            }
            break;
        }
    }
    bad_part2[2] = mutated;

    let mut articles = three_part_scripts("data.bin", MIDS);
    articles.insert(
        MIDS[1].to_string(),
        vec![Scripted::Lines(bad_part2), Scripted::Lines(good_part2)],
    );

    let server = MockNntpServer::start(articles).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = engine_config(&[(server.addr, 0, 2)], dir.path());
    config.download.retry_on_crc_error = true;
    let dest = config.download.dest_dir.clone();

    let engine = UsenetEngine::new(config).await.unwrap();
    let mut events = engine.subscribe();
    engine
        .add_nzb_content(
            three_part_nzb("data.bin", MIDS).as_bytes(),
            "job.nzb",
            AddOptions::default(),
        )
        .await
        .unwrap();
    engine.start();

    let completed = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, Event::JobCompleted { .. })
    })
    .await;
    match completed {
        Event::JobCompleted {
            success_articles,
            failed_articles,
            ..
        } => {
            assert_eq!(success_articles, 3, "the CRC retry must eventually succeed");
            assert_eq!(failed_articles, 0);
        }
        _ => unreachable!(),
    }
    let written = std::fs::read(dest.join("data.bin")).unwrap();
    assert_eq!(written, three_part_payload());
    engine.shutdown().await.unwrap();
}

/// Scenario: without retry-on-crc, a permanently corrupted part marks the
/// file broken but the other parts still land.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crc_error_without_retry_marks_file_broken() {
    let payload = three_part_payload();
    let mut bad_part2 = yenc_part(&payload[100..200], "data.bin", 250, 2, 101);
    // announce a wrong CRC so every delivery fails verification
    let last = bad_part2.last_mut().unwrap();
    *last = b"=yend size=100 part=2 pcrc32=00000001".to_vec();

    let mut articles = three_part_scripts("data.bin", MIDS);
    articles.insert(MIDS[1].to_string(), vec![Scripted::Lines(bad_part2)]);

    let server = MockNntpServer::start(articles).await;
    let dir = tempfile::tempdir().unwrap();
    let config = engine_config(&[(server.addr, 0, 2)], dir.path());
    let dest = config.download.dest_dir.clone();

    let engine = UsenetEngine::new(config).await.unwrap();
    let mut events = engine.subscribe();
    engine
        .add_nzb_content(
            three_part_nzb("data.bin", MIDS).as_bytes(),
            "job.nzb",
            AddOptions::default(),
        )
        .await
        .unwrap();
    engine.start();

    let file_event = wait_for_event(&mut events, WAIT, |e| {
        matches!(e, Event::FileCompleted { .. })
    })
    .await;
    match file_event {
        Event::FileCompleted { complete, .. } => {
            assert!(!complete, "a failed CRC part must mark the file incomplete");
        }
        _ => unreachable!(),
    }
    let log = std::fs::read_to_string(dest.join("_brokenlog.txt")).unwrap();
    assert!(
        log.contains("data.bin (2/3)"),
        "broken log must record 2 of 3 articles, got: {log}"
    );
    engine.shutdown().await.unwrap();
}

/// Scenario: two workers write articles of the same file concurrently in
/// direct-write mode; the result is byte-identical to the single-worker one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn direct_write_concurrent_workers_produce_exact_bytes() {
    let server = MockNntpServer::start(three_part_scripts("data.bin", MIDS)).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = engine_config(&[(server.addr, 0, 3)], dir.path());
    config.download.direct_write = true;
    let dest = config.download.dest_dir.clone();

    let engine = UsenetEngine::new(config).await.unwrap();
    let mut events = engine.subscribe();
    engine
        .add_nzb_content(
            three_part_nzb("data.bin", MIDS).as_bytes(),
            "job.nzb",
            AddOptions::default(),
        )
        .await
        .unwrap();
    engine.start();

    wait_for_event(&mut events, WAIT, |e| matches!(e, Event::JobCompleted { .. })).await;
    let written = std::fs::read(dest.join("data.bin")).unwrap();
    assert_eq!(
        written,
        three_part_payload(),
        "no byte interleaving across part boundaries"
    );
    engine.shutdown().await.unwrap();
}

/// A paused job never starts downloads; resuming lets it finish.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paused_job_waits_for_resume() {
    let server = MockNntpServer::start(three_part_scripts("data.bin", MIDS)).await;
    let dir = tempfile::tempdir().unwrap();
    let config = engine_config(&[(server.addr, 0, 2)], dir.path());

    let engine = UsenetEngine::new(config).await.unwrap();
    let mut events = engine.subscribe();
    let id = engine
        .add_nzb_content(
            three_part_nzb("data.bin", MIDS).as_bytes(),
            "job.nzb",
            AddOptions {
                add_paused: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.start();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let snapshot = engine.queue().job_snapshot(id).await.unwrap();
    assert_eq!(
        snapshot.remaining_size, 250,
        "paused job must not download anything"
    );

    engine.queue().pause_job(id, false).await.unwrap();
    wait_for_event(&mut events, WAIT, |e| matches!(e, Event::JobCompleted { .. })).await;
    engine.shutdown().await.unwrap();
}
