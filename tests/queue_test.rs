//! Integration tests for the directory-backed queue.

mod common;

use chrono::Local;
use ondl_rs::error::Error;
use ondl_rs::model::{Job, JobName};
use ondl_rs::queue::{FsQueue, JobRef, Outcome, QueueState, QueueStore, ReapAction};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn name(raw: &str) -> JobName {
    JobName::parse(raw).unwrap()
}

fn backdate(queue: &FsQueue, job: &JobRef, age: Duration) {
    let file = std::fs::File::options()
        .append(true)
        .open(queue.path_of(job))
        .unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

// ---------------------------------------------------------------------------
// Enqueue / list / read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_then_parse_preserves_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());

    let job = Job::from_value(json!({
        "url": "https://youtu.be/abc",
        "category": "music",
        "app": "yt",
        "requested_by": "shortcut",
        "tags": ["a", "b"],
    }))
    .unwrap();

    let job_name = JobName::generate(Local::now());
    let queued = queue.enqueue(&job_name, &job).await.unwrap();
    assert_eq!(queued.state, QueueState::Incoming);

    let text = queue.read(&queued).await.unwrap();
    let parsed = Job::parse(&queued.name, &text).unwrap();
    assert_eq!(parsed, job);
    assert_eq!(parsed.extra["requested_by"], json!("shortcut"));
}

#[tokio::test]
async fn enqueue_never_overwrites() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let job_name = name("fixed.dljob");

    queue
        .enqueue(&job_name, &Job::new("https://a.example/1"))
        .await
        .unwrap();
    let err = queue
        .enqueue(&job_name, &Job::new("https://a.example/2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));

    let text = queue
        .read(&JobRef::new(job_name, QueueState::Incoming))
        .await
        .unwrap();
    assert!(text.contains("https://a.example/1"));
}

#[tokio::test]
async fn list_ignores_temp_and_foreign_files() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    queue
        .enqueue(&name("real.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();

    let incoming = &queue.layout().incoming;
    std::fs::write(incoming.join(".tmp-half-written.dljob"), "{").unwrap();
    std::fs::write(incoming.join("notes.txt"), "hi").unwrap();

    let listed = queue.list(QueueState::Incoming).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name.as_str(), "real.dljob");
}

#[tokio::test]
async fn list_of_missing_directory_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    assert!(queue.list(QueueState::Done).await.unwrap().is_empty());
}

#[tokio::test]
async fn ready_jobs_come_oldest_first() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let newer = queue
        .enqueue(&name("a-newer.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();
    let older = queue
        .enqueue(&name("b-older.dljob"), &Job::new("https://a.example/2"))
        .await
        .unwrap();
    backdate(&queue, &newer, Duration::from_secs(60));
    backdate(&queue, &older, Duration::from_secs(600));

    let ready = queue.list_ready().await.unwrap();
    let names: Vec<&str> = ready.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, ["b-older.dljob", "a-newer.dljob"]);
}

// ---------------------------------------------------------------------------
// Claim / finish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claimed_job_ends_in_exactly_one_terminal_state() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let queued = queue
        .enqueue(&name("one.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();

    let claimed = queue.claim(&queued).await.unwrap();
    assert_eq!(claimed.state, QueueState::Processing);
    assert!(!queue.path_of(&queued).exists());

    let finished = queue.finish(&claimed, Outcome::Failure).await.unwrap();
    assert_eq!(finished.state, QueueState::Error);

    for state in QueueState::ALL {
        let present = queue.path_of(&JobRef::new(claimed.name.clone(), state)).exists();
        assert_eq!(present, state == QueueState::Error, "state {state}");
    }
}

#[tokio::test]
async fn finishing_an_unclaimed_job_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let queued = queue
        .enqueue(&name("one.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();

    assert!(queue.finish(&queued, Outcome::Success).await.is_err());
    assert!(queue.path_of(&queued).exists());
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = Arc::new(common::fs_queue(tmp.path()));
    let queued = queue
        .enqueue(&name("race.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();

    let (a, b) = {
        let (qa, qb) = (Arc::clone(&queue), Arc::clone(&queue));
        let (ja, jb) = (queued.clone(), queued.clone());
        tokio::join!(
            tokio::spawn(async move { qa.claim(&ja).await }),
            tokio::spawn(async move { qb.claim(&jb).await }),
        )
    };
    let results = [a.unwrap(), b.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_not_found()))
        .count();
    assert_eq!((wins, lost), (1, 1));
}

#[tokio::test]
async fn claim_refreshes_modification_time() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let queued = queue
        .enqueue(&name("old.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();
    backdate(&queue, &queued, Duration::from_secs(3 * 3600));

    queue.claim(&queued).await.unwrap();

    // Ingested hours ago, but it only just started processing.
    let reaped = queue.reap_stale(60, ReapAction::Requeue).await.unwrap();
    assert_eq!(reaped, 0);
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reaper_requeues_stale_jobs_once() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let queued = queue
        .enqueue(&name("stuck.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();
    let claimed = queue.claim(&queued).await.unwrap();
    backdate(&queue, &claimed, Duration::from_secs(2 * 3600));

    assert_eq!(queue.reap_stale(0, ReapAction::Requeue).await.unwrap(), 0);
    assert_eq!(queue.reap_stale(60, ReapAction::Requeue).await.unwrap(), 1);
    assert_eq!(queue.reap_stale(60, ReapAction::Requeue).await.unwrap(), 0);

    assert!(queue.path_of(&queued).exists());
    assert!(!queue.path_of(&claimed).exists());
}

#[tokio::test]
async fn reaper_renames_instead_of_clobbering() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let job_name = name("dup.dljob");

    let queued = queue
        .enqueue(&job_name, &Job::new("https://a.example/1"))
        .await
        .unwrap();
    let claimed = queue.claim(&queued).await.unwrap();
    backdate(&queue, &claimed, Duration::from_secs(2 * 3600));

    // A different job with the same name already sits in error.
    let error_dir = &queue.layout().error;
    std::fs::create_dir_all(error_dir).unwrap();
    std::fs::write(error_dir.join("dup.dljob"), "{\"url\":\"https://other/\"}").unwrap();

    assert_eq!(queue.reap_stale(30, ReapAction::Error).await.unwrap(), 1);

    let errors = queue.list(QueueState::Error).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(
        errors
            .iter()
            .any(|j| j.name.as_str().starts_with("dup.reaped-") && j.name.as_str().ends_with(".dljob"))
    );
    let original = std::fs::read_to_string(error_dir.join("dup.dljob")).unwrap();
    assert!(original.contains("https://other/"));
}

#[tokio::test]
async fn huge_threshold_reaps_nothing_instead_of_overflowing() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());
    let queued = queue
        .enqueue(&name("fresh.dljob"), &Job::new("https://a.example/1"))
        .await
        .unwrap();
    queue.claim(&queued).await.unwrap();

    assert_eq!(queue.reap_stale(i64::MAX, ReapAction::Requeue).await.unwrap(), 0);
    assert_eq!(queue.list(QueueState::Processing).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reaper_skips_a_job_it_cannot_move_and_keeps_going() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = common::fs_queue(tmp.path());

    // The plain name is taken in error, and the `.reaped-<ts>` variant of
    // this stem is longer than the filesystem allows, so the move fails.
    let long = name(&format!("{}.dljob", "x".repeat(240)));
    let processing_dir = &queue.layout().processing;
    std::fs::create_dir_all(processing_dir).unwrap();
    std::fs::write(processing_dir.join(long.as_str()), "{\"url\":\"https://a.example/long\"}").unwrap();
    let stuck = JobRef::new(long.clone(), QueueState::Processing);
    backdate(&queue, &stuck, Duration::from_secs(2 * 3600));
    let error_dir = &queue.layout().error;
    std::fs::create_dir_all(error_dir).unwrap();
    std::fs::write(error_dir.join(long.as_str()), "{\"url\":\"https://other/\"}").unwrap();

    let movable = queue
        .enqueue(&name("movable.dljob"), &Job::new("https://a.example/2"))
        .await
        .unwrap();
    let movable = queue.claim(&movable).await.unwrap();
    backdate(&queue, &movable, Duration::from_secs(2 * 3600));

    assert_eq!(queue.reap_stale(30, ReapAction::Error).await.unwrap(), 1);

    assert!(queue.path_of(&stuck).exists(), "unmovable job stays in processing");
    assert!(
        queue
            .path_of(&JobRef::new(movable.name.clone(), QueueState::Error))
            .exists()
    );
}

#[tokio::test]
async fn racing_enqueues_of_one_name_keep_the_first_file() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = Arc::new(common::fs_queue(tmp.path()));
    let job_name = name("same.dljob");

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let queue = Arc::clone(&queue);
            let job_name = job_name.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(&job_name, &Job::new(format!("https://a.example/{i}")))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(Error::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);

    // Only the published file remains; temp files are cleaned up.
    let entries: Vec<_> = std::fs::read_dir(&queue.layout().incoming)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("same.dljob")]);
}
