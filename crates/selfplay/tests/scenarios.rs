//! End-to-end match scenarios.
//!
//! Each test runs a full match through the scheduler against scripted
//! `fixture-engine` processes and checks the records and statistics.

use std::path::Path;
use std::time::{Duration, Instant};

use selfplay::config::{EngineConfig, MatchConfig, Opening};
use selfplay::game::{Outcome, Termination};
use selfplay::rules;
use selfplay::stats::GameStatus;
use selfplay::time_control::TimeControl;
use selfplay::MatchScheduler;
use tokio::sync::watch;

const FIXTURE: &str = env!("CARGO_BIN_EXE_fixture-engine");

const FOOLS_MATE: &str = "f2f3 e7e5 g2g4 d8h4";

const RUY_LOPEZ: &str = "e2e4 e7e5 g1f3 b8c6 f1b5 a7a6 b5a4 g8f6 e1g1 f8e7 f1e1 b7b5 \
                         a4b3 d7d6 c2c3 e8g8 h2h3 c6a5 b3c2 c7c5 d2d4 d8c7 b1d2 c5d4 c3d4";

fn fixture(name: &str, args: &[&str]) -> EngineConfig {
    EngineConfig::new(name, FIXTURE).with_args(args.iter().copied())
}

fn match_config(first: EngineConfig, second: EngineConfig, dir: &Path) -> MatchConfig {
    let mut config = MatchConfig::new(first, second);
    config.run_id = "run".to_string();
    config.output_dir = dir.to_path_buf();
    config.time_control = TimeControl::MoveTime(50);
    config.timeout_margin = Duration::from_secs(2);
    config.handshake_timeout = Duration::from_secs(5);
    config.stop_grace = Duration::from_secs(1);
    config
}

/// Process ids a fixture logged with `--pid-file`, one per launch.
fn launched_pids(path: &Path) -> Vec<u32> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.trim().parse().unwrap())
        .collect()
}

/// Whether the process has exited and been reaped.
#[cfg(target_os = "linux")]
fn process_is_gone(pid: u32) -> bool {
    !Path::new(&format!("/proc/{}", pid)).exists()
}

/// Replay the moves of a JSON record and check every one is legal.
fn assert_record_replays(path: &Path) {
    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    let moves: Vec<String> = json["moves"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["uci"].as_str().unwrap().to_string())
        .collect();
    let start_fen = json["start_fen"].as_str();
    assert!(
        rules::replay(start_fen, &moves).is_ok(),
        "record {} does not replay: {:?}",
        path.display(),
        moves
    );
}

#[tokio::test]
async fn test_decided_games_alternate_colors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = match_config(
        fixture("A", &["--script", FOOLS_MATE]),
        fixture("B", &["--script", FOOLS_MATE]),
        dir.path(),
    );
    config.games = 4;
    config.concurrency = 2;
    config.write_json = true;

    let summary = MatchScheduler::new(config).run().await.unwrap();

    for n in 1..=4 {
        let pgn = dir.path().join(format!("run-{:04}.pgn", n));
        assert!(pgn.exists(), "missing {}", pgn.display());
        let text = std::fs::read_to_string(&pgn).unwrap();
        assert!(text.contains("[Result \"0-1\"]"));
        assert!(text.contains("Qh4#"));
        assert_record_replays(&dir.path().join(format!("run-{:04}.json", n)));
    }

    let stats = &summary.stats;
    assert_eq!(stats.attempted, 4);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.decided, 4);
    assert_eq!(stats.errors, 0);
    for name in ["A", "B"] {
        let tally = stats.engines[name];
        assert_eq!((tally.wins, tally.losses, tally.games), (2, 2, 4), "{}", name);
    }

    let whites: Vec<&str> = summary.games.iter().map(|g| g.white.as_str()).collect();
    assert_eq!(whites, vec!["A", "B", "A", "B"]);
    assert!(summary.peak_playing >= 1 && summary.peak_playing <= 2);
    assert!(!summary.cancelled);
}

#[tokio::test]
async fn test_crash_aborts_only_its_game() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("launches");
    let counter = counter.to_str().unwrap();
    let pid_file = dir.path().join("a.pids");
    let records = dir.path().join("records");

    let mut config = match_config(
        fixture(
            "A",
            &[
                "--script",
                RUY_LOPEZ,
                "--crash-at",
                "10",
                "--crash-on-launch",
                "2",
                "--launch-counter",
                counter,
                "--pid-file",
                pid_file.to_str().unwrap(),
            ],
        ),
        fixture("B", &["--script", RUY_LOPEZ]),
        &records,
    );
    config.games = 4;
    config.concurrency = 1;
    config.max_plies = 30;

    let summary = MatchScheduler::new(config).run().await.unwrap();
    assert_eq!(summary.games.len(), 4);

    for report in &summary.games {
        let GameStatus::Completed {
            outcome,
            termination,
            culprit,
            record,
            ..
        } = &report.status
        else {
            panic!("game {} did not complete: {:?}", report.index + 1, report);
        };
        assert!(record.as_ref().is_some_and(|p| p.exists()));
        if report.index == 1 {
            assert_eq!(*outcome, Outcome::Aborted);
            assert_eq!(*termination, Termination::EngineCrash);
            assert_eq!(culprit.as_deref(), Some("A"));
        } else {
            assert_ne!(*outcome, Outcome::Aborted, "game {}", report.index + 1);
        }
    }

    assert_eq!(summary.stats.errors, 1);
    assert_eq!(summary.stats.aborted, 1);
    let a = summary.stats.engines["A"];
    assert_eq!((a.errors, a.forfeits), (1, 1));
    assert!(summary.stats.engines["B"].wins >= 1);

    let aborted = std::fs::read_to_string(records.join("run-0002.pgn")).unwrap();
    assert!(aborted.contains("[White \"B\"]"));
    assert!(aborted.contains("[Result \"1-0\"]"));

    // One launch of A per game; the second one crashed
    let pids = launched_pids(&pid_file);
    assert_eq!(pids.len(), 4);
    #[cfg(target_os = "linux")]
    for pid in pids {
        assert!(process_is_gone(pid), "engine process {} still exists", pid);
    }
}

#[tokio::test]
async fn test_unresponsive_engine_forfeits() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = match_config(
        fixture("A", &["--hang-at", "2"]),
        fixture("B", &[]),
        dir.path(),
    );
    config.games = 1;
    config.timeout_margin = Duration::from_millis(300);
    config.stop_grace = Duration::from_millis(200);

    let summary = MatchScheduler::new(config).run().await.unwrap();
    let report = &summary.games[0];
    match &report.status {
        GameStatus::Completed {
            outcome,
            termination,
            culprit,
            plies,
            ..
        } => {
            assert_eq!(*outcome, Outcome::Aborted);
            assert_eq!(*termination, Termination::EngineTimeout);
            assert_eq!(culprit.as_deref(), Some("A"));
            assert_eq!(*plies, 2);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(summary.stats.engines["B"].wins, 1);
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = match_config(
        fixture("A", &["--script", FOOLS_MATE, "--think-ms", "40"]),
        fixture("B", &["--script", FOOLS_MATE, "--think-ms", "40"]),
        dir.path(),
    );
    config.games = 6;
    config.concurrency = 3;

    let summary = MatchScheduler::new(config).run().await.unwrap();
    assert_eq!(summary.stats.completed, 6);
    assert!(summary.peak_playing >= 1);
    assert!(summary.peak_playing <= 3, "peak {}", summary.peak_playing);

    let serial = dir.path().join("serial");
    let mut config = match_config(
        fixture("A", &["--script", FOOLS_MATE]),
        fixture("B", &["--script", FOOLS_MATE]),
        &serial,
    );
    config.games = 3;
    config.concurrency = 1;
    let summary = MatchScheduler::new(config).run().await.unwrap();
    assert_eq!(summary.peak_playing, 1);
}

#[tokio::test]
async fn test_failed_handshake_counts_as_error_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = match_config(
        fixture("A", &["--no-handshake"]),
        fixture("B", &[]),
        dir.path(),
    );
    config.games = 2;
    config.handshake_timeout = Duration::from_millis(300);

    let summary = MatchScheduler::new(config).run().await.unwrap();
    let stats = &summary.stats;
    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.engines["A"].errors, 2);
    assert_eq!(stats.engines["B"].games, 0);
    assert!(!dir.path().join("run-0001.pgn").exists());
}

#[tokio::test]
async fn test_openings_are_shared_by_color_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = match_config(fixture("A", &[]), fixture("B", &[]), dir.path());
    config.games = 2;
    config.max_plies = 2;
    config.write_json = true;
    config.openings = vec![Opening::parse("e2e4 e7e5").unwrap()];

    let summary = MatchScheduler::new(config).run().await.unwrap();
    assert_eq!(summary.stats.draws, 2);

    for n in 1..=2 {
        let path = dir.path().join(format!("run-{:04}.json", n));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let moves = json["moves"].as_array().unwrap();
        assert_eq!(moves.len(), 4);
        assert_eq!(moves[0]["uci"], "e2e4");
        assert_eq!(moves[0]["book"], true);
        assert_eq!(moves[2]["book"], false);
        assert_eq!(json["termination"], "move-limit");
        assert_record_replays(&path);
    }
}

#[tokio::test]
async fn test_cancellation_stops_admitting_games() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = match_config(
        fixture("A", &["--think-ms", "200"]),
        fixture("B", &["--think-ms", "200"]),
        dir.path(),
    );
    config.games = 4;
    config.concurrency = 1;
    config.max_plies = 200;

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = MatchScheduler::new(config).with_cancel(stop_rx);
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(800)).await;
        stop_tx.send(true).unwrap();
    };

    let (summary, ()) = tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(scheduler.run(), interrupt)
    })
    .await
    .expect("match did not stop");
    let summary = summary.unwrap();

    assert!(summary.cancelled);
    assert!(summary.stats.attempted >= 1 && summary.stats.attempted < 4);
    assert_eq!(summary.stats.errors, 0);
    let last = summary.games.last().unwrap();
    assert!(matches!(
        last.status,
        GameStatus::Completed {
            termination: Termination::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancellation_kills_hung_engine() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("a.pids");
    let mut config = match_config(
        fixture("A", &["--hang-at", "1", "--pid-file", pid_file.to_str().unwrap()]),
        fixture("B", &[]),
        dir.path(),
    );
    config.games = 1;
    config.concurrency = 1;
    // Long enough that only the interrupt can end the game
    config.timeout_margin = Duration::from_secs(10);
    config.stop_grace = Duration::from_millis(300);

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = MatchScheduler::new(config).with_cancel(stop_rx);
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop_tx.send(true).unwrap();
    };

    let started = Instant::now();
    let (summary, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(scheduler.run(), interrupt)
    })
    .await
    .expect("match did not stop after the interrupt");
    let summary = summary.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(summary.cancelled);
    assert_eq!(summary.stats.errors, 0);
    assert_eq!(summary.games.len(), 1);
    assert!(matches!(
        summary.games[0].status,
        GameStatus::Completed {
            termination: Termination::Cancelled,
            ..
        }
    ));

    let pids = launched_pids(&pid_file);
    assert_eq!(pids.len(), 1);
    #[cfg(target_os = "linux")]
    assert!(process_is_gone(pids[0]), "hung engine {} was not killed", pids[0]);
}
