//! JSON game records with per-move search information.
//!
//! The JSON sidecar complements the PGN record with machine-readable data:
//! think time, book flag and the last scored `info` line for every move.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use shakmaty::Color;

use crate::game::{GameResult, MoveRecord, Outcome, Termination};

/// JSON representation of a complete game.
#[derive(Serialize)]
struct GameJson<'a> {
    /// Record identifier, `<run_id>-<NNNN>`.
    id: &'a str,
    white: &'a str,
    black: &'a str,
    outcome: Outcome,
    /// PGN result token.
    result: &'a str,
    termination: Termination,
    /// Identity of the engine blamed for an error ending.
    #[serde(skip_serializing_if = "Option::is_none")]
    culprit: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_fen: Option<&'a str>,
    moves: &'a [MoveRecord],
    started_at: String,
    duration_ms: u64,
}

fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serialize a game as pretty-printed JSON.
///
/// # File Format
///
/// ```json
/// {
///   "id": "20240501-101500-1a2b3c4d-0001",
///   "white": "alpha",
///   "black": "beta",
///   "outcome": "black_wins",
///   "result": "0-1",
///   "termination": "checkmate",
///   "moves": [
///     { "uci": "f2f3", "san": "f3", "think_ms": 12, "book": false }
///   ],
///   "started_at": "2024-05-01T10:15:00.000Z",
///   "duration_ms": 61
/// }
/// ```
pub fn to_json(id: &str, result: &GameResult) -> serde_json::Result<Vec<u8>> {
    let game = GameJson {
        id,
        white: &result.white_name,
        black: &result.black_name,
        outcome: result.outcome,
        result: result.pgn_result(),
        termination: result.termination,
        culprit: result.culprit.map(|c: Color| result.player_name(c)),
        start_fen: result.start_fen.as_deref(),
        moves: &result.moves,
        started_at: rfc3339(&result.started_at),
        duration_ms: result.duration.as_millis() as u64,
    };
    serde_json::to_vec_pretty(&game)
}
