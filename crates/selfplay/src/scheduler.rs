//! Running a match: many games, bounded concurrency.
//!
//! Every game runs in its own slot task with a fresh pair of engines:
//!
//! ```text
//! Pending -> EnginesStarting -> Playing -> Recording -> Done
//!                  |
//!                  +-> Failed
//! ```
//!
//! A semaphore bounds the number of active slots. Slots report to a single
//! aggregation task over a channel; it owns the running [`MatchStats`].

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::config::{ConfigError, EngineConfig, MatchConfig};
use crate::engine::{EngineError, EngineHandle};
use crate::game::{self, GameRunner};
use crate::recorder;
use crate::stats::{self, GameReport, GameStatus, MatchStats};

/// Lifecycle of one game slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    EnginesStarting,
    Playing,
    Recording,
    Done,
    Failed,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Pending => "pending",
            SlotState::EnginesStarting => "engines-starting",
            SlotState::Playing => "playing",
            SlotState::Recording => "recording",
            SlotState::Done => "done",
            SlotState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counts slots in [`SlotState::Playing`] and remembers the peak.
#[derive(Debug, Default)]
pub struct PlayingGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl PlayingGauge {
    /// Mark a game as playing until the guard is dropped.
    pub fn enter(&self) -> PlayingGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        PlayingGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct PlayingGuard<'a> {
    gauge: &'a PlayingGauge,
}

impl Drop for PlayingGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of a whole match.
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub run_id: String,
    /// The run was stopped before every game was admitted or finished.
    pub cancelled: bool,
    /// Most games ever playing at the same time.
    pub peak_playing: usize,
    pub stats: MatchStats,
    /// One report per attempted game, ordered by game index.
    pub games: Vec<GameReport>,
}

impl fmt::Display for MatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}{}", self.run_id, if self.cancelled { " (cancelled)" } else { "" })?;
        write!(f, "{}", self.stats)
    }
}

/// Runs the games of one match.
///
/// # Example
///
/// ```ignore
/// let summary = MatchScheduler::new(config).with_cancel(stop_rx).run().await?;
/// println!("{}", summary);
/// ```
pub struct MatchScheduler {
    config: Arc<MatchConfig>,
    cancel: Option<watch::Receiver<bool>>,
}

impl MatchScheduler {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: None,
        }
    }

    /// Stop admitting games, and wind down running ones, once the flag is raised.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Play every game and collect the results.
    ///
    /// # Errors
    ///
    /// Only configuration problems are errors; they are detected before any
    /// engine is started. Per-game failures are part of the summary.
    pub async fn run(self) -> Result<MatchSummary, ConfigError> {
        let config = self.config;
        config.validate()?;
        std::fs::create_dir_all(&config.output_dir).map_err(|e| {
            ConfigError::Invalid(format!(
                "cannot create output directory {}: {}",
                config.output_dir.display(),
                e
            ))
        })?;

        // Without an external signal, a sender that is never raised
        let (_never, idle) = watch::channel(false);
        let mut cancel = self.cancel.unwrap_or(idle);

        tracing::info!(
            run_id = %config.run_id,
            first = %config.first.name,
            second = %config.second.name,
            games = config.games,
            concurrency = config.concurrency,
            time_control = %config.time_control,
            "match starting"
        );

        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let gauge = Arc::new(PlayingGauge::default());
        let (reports_tx, reports_rx) = mpsc::channel(config.concurrency * 2);
        let aggregator = tokio::spawn(aggregate(reports_rx, config.games));

        let mut slots = JoinSet::new();
        let mut cancelled = false;
        for index in 0..config.games {
            let permit = tokio::select! {
                biased;
                _ = game::cancelled(&mut cancel) => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let slot = GameSlot {
                index,
                config: config.clone(),
                gauge: gauge.clone(),
                reports: reports_tx.clone(),
                cancel: cancel.clone(),
            };
            let reports = reports_tx.clone();
            let (white, black) = config.colors(index);
            let (white, black) = (white.name.clone(), black.name.clone());
            slots.spawn(async move {
                let _permit = permit;
                // The inner task isolates a panicking slot from the scheduler
                if let Err(e) = tokio::spawn(slot.run()).await {
                    tracing::error!(game = index + 1, error = %e, "game slot panicked");
                    let report = GameReport::failed(index, &white, &black, None, e.to_string());
                    let _ = reports.send(report).await;
                }
            });
        }

        while slots.join_next().await.is_some() {}
        drop(reports_tx);
        let (running, mut games) = aggregator.await.unwrap_or_default();
        games.sort_by_key(|report| report.index);

        let stats = stats::summarize(&games);
        debug_assert_eq!(stats, running);
        cancelled |= *cancel.borrow();

        tracing::info!(
            run_id = %config.run_id,
            attempted = stats.attempted,
            errors = stats.errors,
            cancelled,
            "match finished"
        );

        Ok(MatchSummary {
            run_id: config.run_id.clone(),
            cancelled,
            peak_playing: gauge.peak(),
            stats,
            games,
        })
    }
}

/// Single owner of the running statistics.
async fn aggregate(
    mut reports: mpsc::Receiver<GameReport>,
    total: u32,
) -> (MatchStats, Vec<GameReport>) {
    let mut stats = MatchStats::default();
    let mut games = Vec::new();
    while let Some(report) = reports.recv().await {
        stats.record(&report);
        tracing::info!(
            game = report.index + 1,
            done = stats.attempted,
            total,
            errors = stats.errors,
            "progress"
        );
        games.push(report);
    }
    (stats, games)
}

struct GameSlot {
    index: u32,
    config: Arc<MatchConfig>,
    gauge: Arc<PlayingGauge>,
    reports: mpsc::Sender<GameReport>,
    cancel: watch::Receiver<bool>,
}

impl GameSlot {
    fn transition(&self, state: &mut SlotState, next: SlotState) {
        tracing::debug!(game = self.index + 1, from = %state, to = %next, "slot state");
        *state = next;
    }

    async fn run(self) {
        let mut state = SlotState::Pending;
        let config = &self.config;
        let (white_cfg, black_cfg) = config.colors(self.index);

        self.transition(&mut state, SlotState::EnginesStarting);
        let (mut white, mut black) = match start_pair(config, white_cfg, black_cfg).await {
            Ok(pair) => pair,
            Err((engine, e)) => {
                self.transition(&mut state, SlotState::Failed);
                tracing::error!(game = self.index + 1, engine = %engine, error = %e, "engine failed to start");
                let report = GameReport::failed(
                    self.index,
                    &white_cfg.name,
                    &black_cfg.name,
                    Some(engine),
                    e.to_string(),
                );
                let _ = self.reports.send(report).await;
                return;
            }
        };

        self.transition(&mut state, SlotState::Playing);
        let settings = config.game_settings(self.index);
        let result = {
            let _playing = self.gauge.enter();
            GameRunner::new(&mut white, &mut black, &settings)
                .with_cancel(self.cancel.clone())
                .play_game()
                .await
        };

        if let Some(culprit) = result.culprit {
            let engine = match culprit {
                shakmaty::Color::White => &white,
                shakmaty::Color::Black => &black,
            };
            tracing::warn!(
                game = self.index + 1,
                engine = %engine.name(),
                termination = %result.termination,
                transcript = %engine.transcript().render(),
                "game aborted by engine failure"
            );
        }
        tokio::join!(white.stop(config.stop_grace), black.stop(config.stop_grace));

        self.transition(&mut state, SlotState::Recording);
        let outcome = result.outcome;
        let termination = result.termination;
        let culprit = result.culprit.map(|c| result.player_name(c).to_string());
        let plies = result.moves.len();
        let record_config = config.clone();
        let index = self.index;
        let written =
            tokio::task::spawn_blocking(move || recorder::record(&result, index, &record_config))
                .await;
        let (record, record_error) = match written {
            Ok(Ok(path)) => (Some(path), None),
            Ok(Err(e)) => {
                tracing::error!(game = self.index + 1, error = %e, "failed to write record");
                (e.written().map(Path::to_path_buf), Some(e.to_string()))
            }
            Err(e) => (None, Some(e.to_string())),
        };

        tracing::info!(
            game = self.index + 1,
            white = %white_cfg.name,
            black = %black_cfg.name,
            ?outcome,
            %termination,
            plies,
            "game finished"
        );
        self.transition(&mut state, SlotState::Done);
        let report = GameReport {
            index: self.index,
            white: white_cfg.name.clone(),
            black: black_cfg.name.clone(),
            status: GameStatus::Completed {
                outcome,
                termination,
                culprit,
                plies,
                record,
                record_error,
            },
        };
        let _ = self.reports.send(report).await;
    }
}

/// Start both engines of a game; on failure, names the engine that failed
/// and stops the other one.
async fn start_pair(
    config: &MatchConfig,
    white: &EngineConfig,
    black: &EngineConfig,
) -> Result<(EngineHandle, EngineHandle), (String, EngineError)> {
    let timeout = config.handshake_timeout;
    let (w, b) = tokio::join!(
        EngineHandle::start(white, timeout),
        EngineHandle::start(black, timeout)
    );
    match (w, b) {
        (Ok(w), Ok(b)) => Ok((w, b)),
        (Err(e), other) => {
            if let Ok(handle) = other {
                handle.stop(config.stop_grace).await;
            }
            Err((white.name.clone(), e))
        }
        (Ok(handle), Err(e)) => {
            handle.stop(config.stop_grace).await;
            Err((black.name.clone(), e))
        }
    }
}
