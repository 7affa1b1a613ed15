//! Selfplay - a self-play match harness for UCI chess engines.
//!
//! This crate pits one or two engine processes against each other (or an
//! engine against itself), drives each game over UCI, and writes every game
//! as a PGN record for later analysis.
//!
//! # Modules
//!
//! - [`engine`] - Engine processes: spawn, handshake, move requests, shutdown
//! - [`rules`] - Move legality and game-end detection on top of `shakmaty`
//! - [`time_control`] - Time controls and per-side clocks
//! - [`game`] - Playing one game between two players
//! - [`pgn`] - PGN rendering
//! - [`json_output`] - JSON game records with search information
//! - [`recorder`] - Writing game records to disk
//! - [`scheduler`] - Running many games with bounded concurrency
//! - [`stats`] - Match statistics
//! - [`config`] - Config file and match settings

pub mod config;
pub mod engine;
pub mod game;
pub mod json_output;
pub mod pgn;
pub mod recorder;
pub mod rules;
pub mod scheduler;
pub mod stats;
pub mod time_control;

pub use config::{ConfigError, EngineConfig, MatchConfig, Opening, SelfplayConfig};
pub use engine::{EngineError, EngineHandle};
pub use game::{GameResult, GameRunner, Outcome, Player, Termination};
pub use scheduler::{MatchScheduler, MatchSummary};
pub use stats::MatchStats;
pub use time_control::TimeControl;
