//! Match statistics.
//!
//! Every game slot ends in one [`GameReport`]. [`MatchStats`] folds reports
//! into per-engine tallies and match totals; [`summarize`] does the same
//! fold over a finished list, so running it again yields the same numbers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::game::{Outcome, Termination};

/// What happened in one game slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameReport {
    /// Zero-based game index.
    pub index: u32,
    pub white: String,
    pub black: String,
    #[serde(flatten)]
    pub status: GameStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GameStatus {
    /// The game was played; it may still have ended in an error.
    Completed {
        outcome: Outcome,
        termination: Termination,
        /// Identity of the engine blamed for an error ending.
        culprit: Option<String>,
        plies: usize,
        record: Option<PathBuf>,
        /// Set when the record could not be written.
        record_error: Option<String>,
    },
    /// No game took place: an engine did not start or the slot panicked.
    Failed {
        /// Identity of the engine that failed to start, if known.
        engine: Option<String>,
        error: String,
    },
}

impl GameReport {
    pub fn failed(
        index: u32,
        white: &str,
        black: &str,
        engine: Option<String>,
        error: String,
    ) -> Self {
        Self {
            index,
            white: white.to_string(),
            black: black.to_string(),
            status: GameStatus::Failed { engine, error },
        }
    }
}

/// Results of one engine across the match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineTally {
    pub games: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    /// Failures charged to this engine (launch failures and error endings).
    pub errors: u32,
    /// Losses caused by this engine's own failure.
    pub forfeits: u32,
}

impl EngineTally {
    /// Points scored: one per win, half per draw.
    pub fn points(&self) -> f64 {
        self.wins as f64 + self.draws as f64 / 2.0
    }
}

/// Aggregate counters of a match.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchStats {
    pub attempted: u32,
    pub completed: u32,
    pub failed: u32,
    /// Completed games won over the board.
    pub decided: u32,
    pub draws: u32,
    pub aborted: u32,
    /// Failed slots plus games ended by an engine or harness error.
    pub errors: u32,
    pub write_failures: u32,
    pub total_plies: u64,
    pub engines: BTreeMap<String, EngineTally>,
}

impl MatchStats {
    fn tally(&mut self, engine: &str) -> &mut EngineTally {
        self.engines.entry(engine.to_string()).or_default()
    }

    /// Fold one report into the counters.
    pub fn record(&mut self, report: &GameReport) {
        self.attempted += 1;
        self.tally(&report.white);
        self.tally(&report.black);

        match &report.status {
            GameStatus::Failed { engine, .. } => {
                self.failed += 1;
                self.errors += 1;
                if let Some(engine) = engine {
                    self.tally(engine).errors += 1;
                }
            }
            GameStatus::Completed {
                outcome,
                termination,
                culprit,
                plies,
                record_error,
                ..
            } => {
                self.completed += 1;
                self.total_plies += *plies as u64;
                if record_error.is_some() {
                    self.write_failures += 1;
                }
                self.tally(&report.white).games += 1;
                self.tally(&report.black).games += 1;

                match outcome {
                    Outcome::WhiteWins => {
                        self.decided += 1;
                        self.tally(&report.white).wins += 1;
                        self.tally(&report.black).losses += 1;
                    }
                    Outcome::BlackWins => {
                        self.decided += 1;
                        self.tally(&report.black).wins += 1;
                        self.tally(&report.white).losses += 1;
                    }
                    Outcome::Draw => {
                        self.draws += 1;
                        self.tally(&report.white).draws += 1;
                        self.tally(&report.black).draws += 1;
                    }
                    Outcome::Aborted => {
                        self.aborted += 1;
                        if let Some(culprit) = culprit {
                            self.errors += 1;
                            let opponent = if *culprit == report.white {
                                &report.black
                            } else {
                                &report.white
                            };
                            self.tally(opponent).wins += 1;
                            let charged = self.tally(culprit);
                            charged.losses += 1;
                            charged.forfeits += 1;
                            charged.errors += 1;
                        } else if *termination != Termination::Cancelled {
                            self.errors += 1;
                        }
                    }
                }
            }
        }
    }

    /// Mean plies per completed game.
    pub fn average_plies(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_plies as f64 / self.completed as f64
        }
    }
}

/// Fold a list of reports into match statistics.
pub fn summarize<'a>(reports: impl IntoIterator<Item = &'a GameReport>) -> MatchStats {
    reports
        .into_iter()
        .fold(MatchStats::default(), |mut stats, report| {
            stats.record(report);
            stats
        })
}

impl fmt::Display for MatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Games: {} attempted, {} completed, {} failed",
            self.attempted, self.completed, self.failed
        )?;
        writeln!(
            f,
            "Results: {} decided, {} drawn, {} aborted, {} errors",
            self.decided, self.draws, self.aborted, self.errors
        )?;
        if self.write_failures > 0 {
            writeln!(f, "Records not written: {}", self.write_failures)?;
        }
        writeln!(f, "Average length: {:.1} plies", self.average_plies())?;
        for (name, t) in &self.engines {
            write!(
                f,
                "  {}: {:.1}/{} (+{} ={} -{})",
                name,
                t.points(),
                t.games,
                t.wins,
                t.draws,
                t.losses
            )?;
            if t.errors > 0 {
                write!(f, ", {} errors, {} forfeits", t.errors, t.forfeits)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(index: u32, white: &str, black: &str, outcome: Outcome) -> GameReport {
        let termination = match outcome {
            Outcome::Draw => Termination::Repetition,
            _ => Termination::Checkmate,
        };
        GameReport {
            index,
            white: white.to_string(),
            black: black.to_string(),
            status: GameStatus::Completed {
                outcome,
                termination,
                culprit: None,
                plies: 40,
                record: Some(PathBuf::from(format!("run-{:04}.pgn", index + 1))),
                record_error: None,
            },
        }
    }

    fn crashed(index: u32, white: &str, black: &str, culprit: &str) -> GameReport {
        GameReport {
            index,
            white: white.to_string(),
            black: black.to_string(),
            status: GameStatus::Completed {
                outcome: Outcome::Aborted,
                termination: Termination::EngineCrash,
                culprit: Some(culprit.to_string()),
                plies: 19,
                record: None,
                record_error: Some("disk full".to_string()),
            },
        }
    }

    #[test]
    fn test_wins_draws_losses() {
        let reports = vec![
            completed(0, "a", "b", Outcome::WhiteWins),
            completed(1, "b", "a", Outcome::WhiteWins),
            completed(2, "a", "b", Outcome::Draw),
        ];
        let stats = summarize(&reports);

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.decided, 2);
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.average_plies(), 40.0);

        let a = stats.engines["a"];
        assert_eq!((a.wins, a.draws, a.losses, a.games), (1, 1, 1, 3));
        assert_eq!(a.points(), 1.5);
    }

    #[test]
    fn test_crash_charges_culprit() {
        let stats = summarize(&[crashed(0, "a", "b", "b")]);

        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.decided, 0);
        assert_eq!(stats.engines["a"].wins, 1);
        let b = stats.engines["b"];
        assert_eq!((b.losses, b.forfeits, b.errors), (1, 1, 1));
    }

    #[test]
    fn test_failed_launch_is_only_an_error() {
        let report = GameReport::failed(0, "a", "b", Some("b".to_string()), "boom".to_string());
        let stats = summarize(&[report]);

        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.completed, 0);
        let b = stats.engines["b"];
        assert_eq!((b.games, b.wins, b.losses, b.errors), (0, 0, 0, 1));
    }

    #[test]
    fn test_cancelled_game_is_not_an_error() {
        let mut report = completed(0, "a", "b", Outcome::Aborted);
        if let GameStatus::Completed { termination, .. } = &mut report.status {
            *termination = Termination::Cancelled;
        }
        let stats = summarize(&[report]);
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_summarize_is_idempotent_and_order_independent() {
        let reports = vec![
            completed(0, "a", "b", Outcome::BlackWins),
            crashed(1, "b", "a", "a"),
            GameReport::failed(2, "a", "b", None, "panic".to_string()),
        ];
        let first = summarize(&reports);
        assert_eq!(summarize(&reports), first);
        assert_eq!(summarize(reports.iter().rev()), first);
    }

    #[test]
    fn test_display_summary() {
        let stats = summarize(&[
            completed(0, "a", "b", Outcome::WhiteWins),
            crashed(1, "b", "a", "b"),
        ]);
        let text = stats.to_string();
        assert!(text.contains("Games: 2 attempted, 2 completed, 0 failed"));
        assert!(text.contains("a: 2.0/2 (+2 =0 -0)"));
        assert!(text.contains("b: 0.0/2 (+0 =0 -2), 1 errors, 1 forfeits"));
    }

    #[test]
    fn test_report_serializes_flat() {
        let value = serde_json::to_value(completed(3, "a", "b", Outcome::Draw)).unwrap();
        assert_eq!(value["index"], 3);
        assert_eq!(value["status"], "completed");
        assert_eq!(value["outcome"], "draw");
        assert_eq!(value["termination"], "repetition");
    }
}
