// SPDX-License-Identifier: Apache-2.0

//! Harvester Integration Tests
//!
//! These tests run real harvesters on their own threads against files in a
//! temporary directory, rotating, truncating and unlinking them the way log
//! rotation tools do.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use harvester::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use harvester::harvester::{
    Error, Exit, ExitReason, FileId, HarvestEvent, HarvestOptions, Harvester, HarvesterConfig,
    HarvesterHandle, ROTATED_TAG, Registry,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn config(from_beginning: bool, idle_timeout: Duration) -> Arc<HarvesterConfig> {
    Arc::new(HarvesterConfig {
        from_beginning,
        poll_interval: Duration::from_millis(10),
        open_retry_interval: Duration::from_millis(10),
        idle_timeout,
        ..Default::default()
    })
}

fn build_harvester(
    path: &Path,
    tx: &BoundedSender<HarvestEvent>,
    registry: &Arc<Registry>,
    config: &Arc<HarvesterConfig>,
) -> Harvester {
    Harvester::builder(path, tx.clone(), Arc::clone(registry))
        .config(Arc::clone(config))
        .build()
}

fn recv(rx: &BoundedReceiver<HarvestEvent>) -> HarvestEvent {
    rx.recv_timeout(RECV_TIMEOUT)
        .expect("timed out waiting for an event")
}

fn join(handle: HarvesterHandle) -> Exit {
    handle.join().expect("harvester thread panicked")
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn append(path: &Path, data: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(data).unwrap();
}

#[test]
fn test_tail_skips_existing_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "old\n").unwrap();
    let file_id = FileId::from_path(&path).unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = build_harvester(&path, &tx, &registry, &config(false, Duration::from_millis(500)))
        .spawn(0, HarvestOptions::default());

    // registered means opened and positioned at the end
    wait_until(|| registry.contains(&file_id));
    append(&path, b"new\n");

    let event = recv(&rx);
    assert_eq!(event.text, "new");
    assert_eq!(event.offset, 4);
    assert_eq!(event.source, path.to_string_lossy());
    assert_eq!(event.file_id, Some(file_id));

    let exit = join(handle);
    assert!(matches!(exit.reason, ExitReason::IdleTimeout));
    assert!(rx.try_recv().is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_from_beginning_emits_offsets_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "aaa\nbbb\nccc\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = build_harvester(&path, &tx, &registry, &config(true, Duration::from_millis(300)))
        .spawn(0, HarvestOptions::default());

    let events: Vec<_> = (0..3).map(|_| recv(&rx)).collect();
    let offsets: Vec<u64> = events.iter().map(|e| e.offset).collect();
    let texts: Vec<&str> = events.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(texts, vec!["aaa", "bbb", "ccc"]);

    assert!(matches!(join(handle).reason, ExitReason::IdleTimeout));
}

#[test]
fn test_explicit_offset_wins_over_from_beginning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "aaa\nbbb\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let exit = build_harvester(&path, &tx, &registry, &config(true, Duration::from_millis(100)))
        .run(4, HarvestOptions::REWIND);

    assert!(matches!(exit.reason, ExitReason::IdleTimeout));
    let event = recv(&rx);
    assert_eq!((event.offset, event.text.as_str()), (4, "bbb"));
    assert!(rx.try_recv().is_none());
}

#[test]
fn test_duplicate_harvester_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "line\n").unwrap();
    let file_id = FileId::from_path(&path).unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let config = config(true, Duration::from_millis(500));
    let first = build_harvester(&path, &tx, &registry, &config).spawn(0, HarvestOptions::default());
    wait_until(|| registry.contains(&file_id));

    let second = build_harvester(&path, &tx, &registry, &config).run(0, HarvestOptions::default());
    assert!(matches!(
        second.error(),
        Some(Error::AlreadyRegistered(id)) if *id == file_id
    ));
    assert_eq!(recv(&rx).text, "line");
    assert!(rx.try_recv().is_none());

    assert!(matches!(join(first).reason, ExitReason::IdleTimeout));
    assert!(!registry.contains(&file_id));

    // the identity is free again once the first harvester is gone
    let third = build_harvester(&path, &tx, &registry, &config).run(0, HarvestOptions::default());
    assert!(matches!(third.reason, ExitReason::IdleTimeout));
    assert_eq!(recv(&rx).text, "line");
}

#[test]
fn test_no_register_skips_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "line\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let config = config(true, Duration::from_millis(300));
    let first =
        build_harvester(&path, &tx, &registry, &config).spawn(0, HarvestOptions::NO_REGISTER);
    let second =
        build_harvester(&path, &tx, &registry, &config).spawn(0, HarvestOptions::NO_REGISTER);

    assert_eq!(recv(&rx).text, "line");
    assert_eq!(recv(&rx).text, "line");
    assert!(registry.is_empty());

    assert!(matches!(join(first).reason, ExitReason::IdleTimeout));
    assert!(matches!(join(second).reason, ExitReason::IdleTimeout));
}

#[test]
fn test_waits_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.log");

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = build_harvester(&path, &tx, &registry, &config(true, Duration::from_millis(300)))
        .spawn(0, HarvestOptions::default());

    std::thread::sleep(Duration::from_millis(50));
    std::fs::write(&path, "hello\n").unwrap();

    let event = recv(&rx);
    assert_eq!((event.offset, event.text.as_str()), (0, "hello"));
    assert!(matches!(join(handle).reason, ExitReason::IdleTimeout));
}

#[test]
fn test_truncation_rewinds_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "first line\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = build_harvester(&path, &tx, &registry, &config(true, Duration::from_millis(500)))
        .spawn(0, HarvestOptions::default());

    assert_eq!(recv(&rx).text, "first line");

    // truncate in place, then write less than was already read
    std::fs::write(&path, "new\n").unwrap();

    let event = recv(&rx);
    assert_eq!((event.offset, event.text.as_str()), (0, "new"));

    let exit = join(handle);
    assert!(matches!(exit.reason, ExitReason::IdleTimeout));
    assert!(exit.successors.is_empty());
}

#[test]
fn test_truncation_hands_off_to_successor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let rotated = dir.path().join("app.log.1");
    std::fs::write(&path, "l1\nl2\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = Harvester::builder(&path, tx.clone(), Arc::clone(&registry))
        .tag("type", "app")
        .rotated(true)
        .successor(&rotated)
        .config(config(true, Duration::from_millis(500)))
        .build()
        .spawn(0, HarvestOptions::default());

    assert_eq!(recv(&rx).text, "l1");
    assert_eq!(recv(&rx).text, "l2");

    // copy-truncate: the copy also holds a line written after our last read
    std::fs::write(&rotated, "l1\nl2\nlate\n").unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(0)
        .unwrap();

    let late = recv(&rx);
    assert_eq!(late.source, rotated.to_string_lossy());
    assert_eq!((late.offset, late.text.as_str()), (6, "late"));
    assert!(!late.rotated);
    assert_eq!(late.tag(ROTATED_TAG), Some("false"));
    assert_eq!(late.tag("type"), Some("app"));

    append(&path, b"l4\n");
    let l4 = recv(&rx);
    assert_eq!(l4.source, path.to_string_lossy());
    assert_eq!((l4.offset, l4.text.as_str()), (0, "l4"));
    assert!(l4.rotated);
    assert_eq!(l4.tag(ROTATED_TAG), Some("true"));

    let mut exit = join(handle);
    assert!(matches!(exit.reason, ExitReason::IdleTimeout));
    assert_eq!(exit.successors.len(), 1);
    let successor = exit.successors.pop().unwrap();
    assert_eq!(successor.path(), rotated.as_path());
    assert!(matches!(join(successor).reason, ExitReason::IdleTimeout));
    assert!(registry.is_empty());
}

#[test]
fn test_resume_continues_after_matching_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log.1");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = build_harvester(&path, &tx, &registry, &config(false, Duration::from_millis(300)))
        .spawn_resume(11, b"beta\n".to_vec());

    let event = recv(&rx);
    assert_eq!((event.offset, event.text.as_str()), (11, "gamma"));
    assert!(matches!(join(handle).reason, ExitReason::IdleTimeout));
}

#[test]
fn test_resume_mismatch_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log.1");
    std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let exit = build_harvester(&path, &tx, &registry, &config(false, Duration::from_millis(300)))
        .resume(11, b"BETA\n".to_vec());

    assert!(matches!(
        exit.error(),
        Some(Error::ResumeMismatch { offset: 11, .. })
    ));
    assert!(rx.try_recv().is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_resume_refuses_stdin() {
    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let config = config(false, Duration::from_secs(1));
    let exit = build_harvester(Path::new("-"), &tx, &registry, &config).resume(5, b"x\n".to_vec());

    assert!(matches!(exit.error(), Some(Error::ResumeStdin(5))));
    assert!(rx.try_recv().is_none());
}

#[test]
fn test_idle_timeout_unregisters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quiet.log");
    std::fs::write(&path, "").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, _rx) = bounded(16);
    let started = Instant::now();
    let exit = build_harvester(&path, &tx, &registry, &config(false, Duration::from_millis(100)))
        .run(0, HarvestOptions::default());

    assert!(matches!(exit.reason, ExitReason::IdleTimeout));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(registry.is_empty());
}

#[test]
fn test_partial_line_is_emitted_in_pieces() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let mut writer = File::create(&path).unwrap();
    writer.write_all(b"abc").unwrap();
    writer.flush().unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let handle = build_harvester(&path, &tx, &registry, &config(true, Duration::from_millis(300)))
        .spawn(0, HarvestOptions::default());

    let head = recv(&rx);
    assert_eq!((head.offset, head.text.as_str()), (0, "abc"));

    writer.write_all(b"def\n").unwrap();
    let tail = recv(&rx);
    assert_eq!((tail.offset, tail.text.as_str()), (3, "def"));

    assert!(matches!(join(handle).reason, ExitReason::IdleTimeout));
}

#[test]
fn test_rotated_tag_and_line_cap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "abcdefgh\nxy\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let config = Arc::new(HarvesterConfig {
        max_line_bytes: 4,
        ..(*config(true, Duration::from_millis(200))).clone()
    });
    let exit = Harvester::builder(&path, tx, Arc::clone(&registry))
        .tag("type", "app")
        .rotated(true)
        .config(config)
        .build()
        .run(0, HarvestOptions::default());
    assert!(matches!(exit.reason, ExitReason::IdleTimeout));

    let first = recv(&rx);
    assert_eq!((first.offset, first.text.as_str()), (0, "abcd"));
    assert!(first.rotated);
    assert_eq!(first.tag(ROTATED_TAG), Some("true"));
    assert_eq!(first.tag("type"), Some("app"));

    // offsets count every byte of a capped line
    let second = recv(&rx);
    assert_eq!((second.offset, second.text.as_str()), (9, "xy"));
}

#[test]
fn test_closed_sink_stops_harvester() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "a\nb\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(1);
    drop(rx);
    let exit = build_harvester(&path, &tx, &registry, &config(true, Duration::from_secs(5)))
        .run(0, HarvestOptions::default());

    assert!(matches!(exit.error(), Some(Error::SinkClosed)));
    assert!(registry.is_empty());
}

#[cfg(unix)]
#[test]
fn test_unlinked_file_is_drained_then_gone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let mut writer = File::create(&path).unwrap();
    writer.write_all(b"one\n").unwrap();

    let registry = Arc::new(Registry::new());
    let (tx, rx) = bounded(16);
    let config = Arc::new(HarvesterConfig {
        poll_interval: Duration::from_millis(200),
        ..(*config(true, Duration::from_secs(5))).clone()
    });
    let handle =
        build_harvester(&path, &tx, &registry, &config).spawn(0, HarvestOptions::default());

    assert_eq!(recv(&rx).text, "one");

    // the writer keeps its descriptor after the name is gone
    writer.write_all(b"two\n").unwrap();
    std::fs::remove_file(&path).unwrap();

    let event = recv(&rx);
    assert_eq!((event.offset, event.text.as_str()), (4, "two"));

    let exit = join(handle);
    assert!(matches!(exit.error(), Some(Error::FileGone(p)) if *p == path));
    assert!(registry.is_empty());
}

#[test]
fn test_stdin_keeps_polling_at_end_of_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.log");
    std::fs::write(&path, "first\n").unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_harvester"))
        .args(["--poll-interval-ms", "20", "--idle-timeout-secs", "2", "-"])
        .stdin(Stdio::from(File::open(&path).unwrap()))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    let next_event = || -> serde_json::Value {
        let line = rx.recv_timeout(RECV_TIMEOUT).expect("no event from stdin");
        serde_json::from_str(&line).unwrap()
    };

    let first = next_event();
    assert_eq!(first["text"], "first");
    assert_eq!(first["offset"], 0);
    assert_eq!(first["source"], "-");
    // stdin has no identity and is never registered
    assert!(first["file_id"].is_null());

    std::thread::sleep(Duration::from_millis(500));
    if let Some(status) = child.try_wait().unwrap() {
        panic!("harvester exited at end of stdin with {status}");
    }

    append(&path, b"second\n");
    let second = next_event();
    assert_eq!(second["text"], "second");
    assert_eq!(second["offset"], 6);

    // only the idle timeout ends a stdin harvester
    let deadline = Instant::now() + RECV_TIMEOUT;
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("harvester did not stop after the idle timeout");
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(status.success());
}
