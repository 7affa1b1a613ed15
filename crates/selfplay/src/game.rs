//! Playing a single game between two players.
//!
//! The [`GameRunner`] alternates move requests between the two sides,
//! validates every move through the rules adapter, keeps the clocks, and
//! decides how the game ended. It never retries: the first engine failure
//! ends the game and is attributed to the side that caused it.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shakmaty::Color;
use tokio::sync::watch;
use uci::EngineInfo;

use crate::config::Opening;
use crate::engine::{EngineError, MoveReply, MoveRequest};
use crate::rules::{Board, DrawReason, Status};
use crate::time_control::{Clocks, TimeControl};

/// One side of a game.
///
/// Implemented by [`EngineHandle`](crate::engine::EngineHandle); tests drive
/// the runner with scripted players.
pub trait Player {
    fn name(&self) -> &str;

    fn request_move(
        &mut self,
        request: &MoveRequest<'_>,
    ) -> impl Future<Output = Result<MoveReply, EngineError>> + Send;
}

/// How a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    WhiteWins,
    BlackWins,
    Draw,
    /// Ended by a failure or interruption rather than by play.
    Aborted,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    Checkmate,
    Stalemate,
    Repetition,
    FiftyMove,
    InsufficientMaterial,
    Resignation,
    TimeForfeit,
    IllegalMove,
    EngineCrash,
    EngineTimeout,
    MoveLimit,
    GameTimeout,
    Cancelled,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Termination::Checkmate => "checkmate",
            Termination::Stalemate => "stalemate",
            Termination::Repetition => "repetition",
            Termination::FiftyMove => "fifty-move",
            Termination::InsufficientMaterial => "insufficient-material",
            Termination::Resignation => "resignation",
            Termination::TimeForfeit => "time-forfeit",
            Termination::IllegalMove => "illegal-move",
            Termination::EngineCrash => "engine-crash",
            Termination::EngineTimeout => "engine-timeout",
            Termination::MoveLimit => "move-limit",
            Termination::GameTimeout => "game-timeout",
            Termination::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DrawReason> for Termination {
    fn from(reason: DrawReason) -> Self {
        match reason {
            DrawReason::Stalemate => Termination::Stalemate,
            DrawReason::Repetition => Termination::Repetition,
            DrawReason::FiftyMoves => Termination::FiftyMove,
            DrawReason::InsufficientMaterial => Termination::InsufficientMaterial,
        }
    }
}

/// A single move with the data reported while choosing it.
#[derive(Debug, Clone, Serialize)]
pub struct MoveRecord {
    /// The move in UCI notation (e.g., "e2e4", "e1g1").
    pub uci: String,
    /// The move in SAN, with check or mate suffix.
    pub san: String,
    pub think_ms: u64,
    /// Pre-applied from the opening rather than chosen by an engine.
    pub book: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_info: Option<EngineInfo>,
}

/// A finished game.
#[derive(Debug, Clone)]
pub struct GameResult {
    pub white_name: String,
    pub black_name: String,
    pub outcome: Outcome,
    pub termination: Termination,
    /// The side whose failure ended the game, for error endings.
    pub culprit: Option<Color>,
    /// Start FEN, `None` for the standard position.
    pub start_fen: Option<String>,
    pub moves: Vec<MoveRecord>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl GameResult {
    /// The winning side, counting an engine failure as a loss for the culprit.
    pub fn winner(&self) -> Option<Color> {
        match self.outcome {
            Outcome::WhiteWins => Some(Color::White),
            Outcome::BlackWins => Some(Color::Black),
            Outcome::Draw => None,
            Outcome::Aborted => self.culprit.map(|c| !c),
        }
    }

    /// PGN result token. A forfeit by a culprit is scored as a loss, any
    /// other aborted game is unterminated.
    pub fn pgn_result(&self) -> &'static str {
        match (self.outcome, self.winner()) {
            (Outcome::Draw, _) => "1/2-1/2",
            (_, Some(Color::White)) => "1-0",
            (_, Some(Color::Black)) => "0-1",
            (_, None) => "*",
        }
    }

    pub fn player_name(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white_name,
            Color::Black => &self.black_name,
        }
    }

    /// Plies played by the engines, excluding book moves.
    pub fn engine_plies(&self) -> usize {
        self.moves.iter().filter(|m| !m.book).count()
    }
}

/// Per-game settings handed to the runner.
#[derive(Debug, Clone)]
pub struct GameSettings {
    pub white_time: TimeControl,
    pub black_time: TimeControl,
    /// Engine plies after which the game is drawn.
    pub max_plies: u32,
    pub timeout_margin: Duration,
    pub game_timeout: Option<Duration>,
    /// How long an in-flight move may run on after cancellation.
    pub stop_grace: Duration,
    pub opening: Option<Opening>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            white_time: TimeControl::default(),
            black_time: TimeControl::default(),
            max_plies: 500,
            timeout_margin: Duration::from_secs(1),
            game_timeout: None,
            stop_grace: Duration::from_secs(2),
            opening: None,
        }
    }
}

struct Ending {
    outcome: Outcome,
    termination: Termination,
    culprit: Option<Color>,
}

impl Ending {
    fn win(winner: Color, termination: Termination) -> Self {
        let outcome = match winner {
            Color::White => Outcome::WhiteWins,
            Color::Black => Outcome::BlackWins,
        };
        Self {
            outcome,
            termination,
            culprit: None,
        }
    }

    fn draw(termination: Termination) -> Self {
        Self {
            outcome: Outcome::Draw,
            termination,
            culprit: None,
        }
    }

    /// Aborted by a failure of `culprit`.
    fn fault(culprit: Color, termination: Termination) -> Self {
        Self {
            outcome: Outcome::Aborted,
            termination,
            culprit: Some(culprit),
        }
    }

    fn aborted(termination: Termination) -> Self {
        Self {
            outcome: Outcome::Aborted,
            termination,
            culprit: None,
        }
    }
}

/// Resolves once the stop flag is raised; never, if the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs one game between two players.
///
/// # Example
///
/// ```ignore
/// let settings = GameSettings::default();
/// let result = GameRunner::new(&mut white, &mut black, &settings)
///     .play_game()
///     .await;
/// println!("{} ({})", result.pgn_result(), result.termination);
/// ```
pub struct GameRunner<'a, P> {
    white: &'a mut P,
    black: &'a mut P,
    settings: &'a GameSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, P: Player + Send> GameRunner<'a, P> {
    pub fn new(white: &'a mut P, black: &'a mut P, settings: &'a GameSettings) -> Self {
        Self {
            white,
            black,
            settings,
            cancel: None,
        }
    }

    /// Stop the game after the current move once the flag is raised.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Play the game to its end.
    ///
    /// Never fails: every way a game can end, including engine failures, is
    /// described by the returned [`GameResult`].
    pub async fn play_game(mut self) -> GameResult {
        let started_at = Utc::now();
        let started = Instant::now();
        let white_name = self.white.name().to_string();
        let black_name = self.black.name().to_string();

        let mut moves = Vec::new();
        let (ending, start_fen) = match self.set_up(&mut moves) {
            Ok(mut board) => {
                let ending = self.play(&mut board, &mut moves, started).await;
                (ending, board.start_fen().map(str::to_string))
            }
            Err(ending) => (
                ending,
                self.settings.opening.as_ref().and_then(|o| o.fen.clone()),
            ),
        };

        tracing::debug!(
            white = %white_name,
            black = %black_name,
            termination = %ending.termination,
            plies = moves.len(),
            "game over"
        );

        GameResult {
            white_name,
            black_name,
            outcome: ending.outcome,
            termination: ending.termination,
            culprit: ending.culprit,
            start_fen,
            moves,
            started_at,
            duration: started.elapsed(),
        }
    }

    /// Start position plus book moves.
    fn set_up(&self, moves: &mut Vec<MoveRecord>) -> Result<Board, Ending> {
        let Some(opening) = self.settings.opening.as_ref() else {
            return Ok(Board::new());
        };
        match Board::from_opening(opening.fen.as_deref(), &opening.moves) {
            Ok((board, sans)) => {
                moves.extend(opening.moves.iter().zip(sans).map(|(uci, san)| MoveRecord {
                    uci: uci.clone(),
                    san,
                    think_ms: 0,
                    book: true,
                    search_info: None,
                }));
                Ok(board)
            }
            Err(e) => {
                tracing::error!(error = %e, "opening rejected");
                Err(Ending::aborted(Termination::IllegalMove))
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn play(
        &mut self,
        board: &mut Board,
        moves: &mut Vec<MoveRecord>,
        started: Instant,
    ) -> Ending {
        let settings = self.settings;
        let mut clocks = Clocks::new(settings.white_time, settings.black_time);
        let mut engine_plies = 0u32;

        loop {
            if let Some(status) = board.status() {
                return match status {
                    Status::Checkmate { winner } => Ending::win(winner, Termination::Checkmate),
                    Status::Draw(reason) => Ending::draw(reason.into()),
                };
            }
            if engine_plies >= settings.max_plies {
                return Ending::draw(Termination::MoveLimit);
            }
            if self.is_cancelled() {
                return Ending::aborted(Termination::Cancelled);
            }

            let side = board.turn();
            let mut timeout = clocks.move_timeout(side, settings.timeout_margin);
            let mut limited_by_game = false;
            if let Some(limit) = settings.game_timeout {
                let left = limit.saturating_sub(started.elapsed());
                if left.is_zero() {
                    return Ending::aborted(Termination::GameTimeout);
                }
                if left < timeout {
                    timeout = left;
                    limited_by_game = true;
                }
            }

            let request = MoveRequest {
                start_fen: board.start_fen(),
                moves: board.moves(),
                go: clocks.go_options(side),
                timeout,
            };
            let player: &mut P = match side {
                Color::White => &mut *self.white,
                Color::Black => &mut *self.black,
            };

            let reply = {
                let pending = player.request_move(&request);
                tokio::pin!(pending);
                match self.cancel.as_mut() {
                    Some(cancel) => tokio::select! {
                        reply = &mut pending => reply,
                        _ = cancelled(cancel) => {
                            match tokio::time::timeout(settings.stop_grace, &mut pending).await {
                                Ok(reply) => reply,
                                Err(_) => return Ending::aborted(Termination::Cancelled),
                            }
                        }
                    },
                    None => pending.await,
                }
            };

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(side = ?side, error = %e, "move request failed");
                    return match e {
                        EngineError::EngineTimeout { .. } if limited_by_game => {
                            Ending::aborted(Termination::GameTimeout)
                        }
                        EngineError::EngineTimeout { .. } => {
                            Ending::fault(side, Termination::EngineTimeout)
                        }
                        EngineError::MalformedResponse { .. } => {
                            Ending::fault(side, Termination::IllegalMove)
                        }
                        _ => Ending::fault(side, Termination::EngineCrash),
                    };
                }
            };

            // (none) and 0000 are the null move: nothing left to play
            if reply.uci == "(none)" || reply.uci == "0000" {
                return Ending::win(!side, Termination::Resignation);
            }
            if !clocks.charge(side, reply.think_time) {
                return Ending::win(!side, Termination::TimeForfeit);
            }
            match board.play_uci(&reply.uci) {
                Ok(san) => {
                    tracing::trace!(side = ?side, mv = %reply.uci, %san, "move");
                    moves.push(MoveRecord {
                        uci: reply.uci,
                        san,
                        think_ms: reply.think_time.as_millis() as u64,
                        book: false,
                        search_info: reply.info,
                    });
                    engine_plies += 1;
                }
                Err(e) => {
                    tracing::warn!(side = ?side, error = %e, "illegal move");
                    return Ending::fault(side, Termination::IllegalMove);
                }
            }
        }
    }
}
