//! Persisting game records.
//!
//! Each game is written to `<output_dir>/<run_id>-<NNNN>.pgn`, where `NNNN`
//! is the one-based game number. Names depend only on the game index, never
//! on completion order. Files are written to a temporary file in the same
//! directory and renamed into place without replacing an existing file, so a
//! record is either complete or absent.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::MatchConfig;
use crate::game::GameResult;
use crate::json_output;
use crate::pgn::{self, PgnHeader};
use crate::scheduler::MatchSummary;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The PGN record was written but its JSON sidecar was not.
    #[error("Wrote {} but not its sidecar {}: {source}", pgn.display(), path.display())]
    SidecarError {
        pgn: PathBuf,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RecordError {
    /// The record that made it to disk despite the error, if any.
    pub fn written(&self) -> Option<&Path> {
        match self {
            RecordError::WriteError { .. } => None,
            RecordError::SidecarError { pgn, .. } => Some(pgn),
        }
    }
}

/// Record identifier of a game, `<run_id>-<NNNN>`.
pub fn record_id(run_id: &str, game_index: u32) -> String {
    format!("{}-{:04}", run_id, game_index + 1)
}

/// Path of a game's record with the given extension.
pub fn record_path(config: &MatchConfig, game_index: u32, extension: &str) -> PathBuf {
    config
        .output_dir
        .join(format!("{}.{}", record_id(&config.run_id, game_index), extension))
}

/// PGN tags for a finished game.
pub fn pgn_header(result: &GameResult, game_index: u32, config: &MatchConfig) -> PgnHeader {
    let white_is_first = result.white_name == config.first.name;
    let white_time = if white_is_first {
        config.first.time_control
    } else {
        config.second.time_control
    };
    PgnHeader {
        event: format!("Self-play {}", config.run_id),
        site: "local".to_string(),
        date: result.started_at.format("%Y.%m.%d").to_string(),
        round: game_index + 1,
        white: result.white_name.clone(),
        black: result.black_name.clone(),
        result: result.pgn_result().to_string(),
        termination: result.termination,
        time_control: white_time.unwrap_or(config.time_control).pgn_tag(),
        start_fen: result.start_fen.clone(),
    }
}

/// Write the PGN record of a game, plus its JSON sidecar when enabled.
///
/// Returns the path of the PGN record.
///
/// # Errors
///
/// Returns [`RecordError::WriteError`] if the PGN cannot be written or a file
/// of the same name already exists, and [`RecordError::SidecarError`] if only
/// the JSON sidecar failed.
pub fn record(
    result: &GameResult,
    game_index: u32,
    config: &MatchConfig,
) -> Result<PathBuf, RecordError> {
    let header = pgn_header(result, game_index, config);
    let path = record_path(config, game_index, "pgn");
    write_new(&path, pgn::render(&header, &result.moves).as_bytes())?;

    if config.write_json {
        let json_path = record_path(config, game_index, "json");
        let id = record_id(&config.run_id, game_index);
        let written = json_output::to_json(&id, result)
            .map_err(io::Error::from)
            .and_then(|bytes| persist(&json_path, &bytes));
        if let Err(source) = written {
            return Err(RecordError::SidecarError {
                pgn: path,
                path: json_path,
                source,
            });
        }
    }

    Ok(path)
}

/// Write `<run_id>-summary.json`.
pub fn write_summary(summary: &MatchSummary, config: &MatchConfig) -> Result<PathBuf, RecordError> {
    let path = config
        .output_dir
        .join(format!("{}-summary.json", config.run_id));
    let bytes = serde_json::to_vec_pretty(summary).map_err(|e| RecordError::WriteError {
        path: path.clone(),
        source: e.into(),
    })?;
    write_new(&path, &bytes)?;
    Ok(path)
}

/// Atomically create `path` with the given contents.
fn write_new(path: &Path, contents: &[u8]) -> Result<(), RecordError> {
    persist(path, contents).map_err(|source| RecordError::WriteError {
        path: path.to_path_buf(),
        source,
    })
}

fn persist(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist_noclobber(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::game::{MoveRecord, Outcome, Termination};
    use crate::time_control::TimeControl;
    use chrono::Utc;
    use shakmaty::Color;
    use std::time::Duration;

    fn config(dir: &Path) -> MatchConfig {
        let mut config = MatchConfig::new(EngineConfig::new("a", "a"), EngineConfig::new("b", "b"));
        config.run_id = "run".to_string();
        config.output_dir = dir.to_path_buf();
        config.time_control = TimeControl::Clock {
            base_ms: 10_000,
            increment_ms: 100,
        };
        config
    }

    fn result() -> GameResult {
        let moves = [("f2f3", "f3"), ("e7e5", "e5"), ("g2g4", "g4"), ("d8h4", "Qh4#")]
            .into_iter()
            .map(|(uci, san)| MoveRecord {
                uci: uci.to_string(),
                san: san.to_string(),
                think_ms: 5,
                book: false,
                search_info: None,
            })
            .collect();
        GameResult {
            white_name: "b".to_string(),
            black_name: "a".to_string(),
            outcome: Outcome::BlackWins,
            termination: Termination::Checkmate,
            culprit: None,
            start_fen: None,
            moves,
            started_at: Utc::now(),
            duration: Duration::from_millis(30),
        }
    }

    #[test]
    fn test_record_writes_named_pgn() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let path = record(&result(), 6, &config).unwrap();
        assert_eq!(path, dir.path().join("run-0007.pgn"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[Round \"7\"]"));
        assert!(text.contains("[White \"b\"]"));
        assert!(text.contains("[TimeControl \"10+0.1\"]"));
        assert!(text.contains("Qh4#"));
        assert!(!dir.path().join("run-0007.json").exists());
    }

    #[test]
    fn test_record_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        record(&result(), 0, &config).unwrap();
        let err = record(&result(), 0, &config).unwrap_err();
        assert!(matches!(err, RecordError::WriteError { .. }));

        // Only the record itself, no stray temporary files
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_record_with_json_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.write_json = true;

        let mut game = result();
        game.outcome = Outcome::Aborted;
        game.termination = Termination::EngineTimeout;
        game.culprit = Some(Color::White);
        record(&game, 1, &config).unwrap();

        let pgn = std::fs::read_to_string(dir.path().join("run-0002.pgn")).unwrap();
        assert!(pgn.contains("[Result \"0-1\"]"));
        assert!(pgn.contains("[Termination \"time forfeit\"]"));

        let json: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("run-0002.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json["id"], "run-0002");
        assert_eq!(json["culprit"], "b");
    }

    #[test]
    fn test_sidecar_failure_keeps_pgn_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.write_json = true;
        std::fs::write(dir.path().join("run-0003.json"), "taken").unwrap();

        let err = record(&result(), 2, &config).unwrap_err();
        assert!(matches!(err, RecordError::SidecarError { .. }));
        let pgn = err.written().unwrap();
        assert_eq!(pgn, dir.path().join("run-0003.pgn"));
        assert!(pgn.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("run-0003.json")).unwrap(),
            "taken"
        );
    }

    #[test]
    fn test_missing_directory_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir.path().join("missing"));
        assert!(matches!(
            record(&result(), 0, &config),
            Err(RecordError::WriteError { .. })
        ));
    }
}
