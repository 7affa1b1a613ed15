//! Chess rules adapter.
//!
//! Wraps a [`shakmaty::Chess`] position behind the narrow contract the game
//! driver needs: apply a UCI move if it is legal, and report whether the
//! position ends the game. Threefold repetition is not tracked by shakmaty,
//! so the board keeps its own history of position hashes.

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};
use thiserror::Error;

/// Errors raised when a move or position is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    /// The move is unparseable or not legal in the current position.
    #[error("Illegal move '{mv}' in position {fen}")]
    IllegalMove { mv: String, fen: String },
    /// The FEN string does not describe a valid position.
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },
}

/// Why a drawn position is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawReason {
    Stalemate,
    Repetition,
    FiftyMoves,
    InsufficientMaterial,
}

/// A terminal position as judged by the rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The side to move is mated.
    Checkmate { winner: Color },
    Draw(DrawReason),
}

/// A position together with the moves that led to it.
#[derive(Debug, Clone)]
pub struct Board {
    position: Chess,
    start_fen: Option<String>,
    moves: Vec<String>,
    history: Vec<Zobrist64>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// The standard starting position.
    pub fn new() -> Self {
        Self::with_position(Chess::default(), None)
    }

    /// Start from an arbitrary position.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let invalid = |reason: String| RulesError::InvalidFen {
            fen: fen.to_string(),
            reason,
        };
        let parsed: Fen = fen.trim().parse().map_err(|e| invalid(format!("{e}")))?;
        let position: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| invalid(format!("{e}")))?;
        Ok(Self::with_position(position, Some(fen.trim().to_string())))
    }

    /// Set up an opening: an optional start FEN followed by book moves.
    ///
    /// Returns the board after the book moves together with their SAN.
    pub fn from_opening(
        fen: Option<&str>,
        moves: &[String],
    ) -> Result<(Self, Vec<String>), RulesError> {
        let mut board = match fen {
            Some(fen) => Self::from_fen(fen)?,
            None => Self::new(),
        };
        let sans = moves
            .iter()
            .map(|mv| board.play_uci(mv))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((board, sans))
    }

    fn with_position(position: Chess, start_fen: Option<String>) -> Self {
        let history = vec![position.zobrist_hash::<Zobrist64>(EnPassantMode::Legal)];
        Self {
            position,
            start_fen,
            moves: Vec::new(),
            history,
        }
    }

    /// Side to move.
    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    /// FEN of the current position.
    pub fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    /// FEN the game started from, or `None` for the standard position.
    pub fn start_fen(&self) -> Option<&str> {
        self.start_fen.as_deref()
    }

    /// Every move applied so far, in UCI notation.
    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    /// Legal moves in the current position, in UCI notation.
    pub fn legal_moves(&self) -> Vec<String> {
        self.position
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect()
    }

    /// Validate and apply a move given in UCI notation.
    ///
    /// Returns the move in SAN (with check or mate suffix). A rejected move
    /// leaves the board untouched.
    pub fn play_uci(&mut self, uci: &str) -> Result<String, RulesError> {
        let illegal = || RulesError::IllegalMove {
            mv: uci.to_string(),
            fen: self.fen(),
        };
        let parsed: UciMove = uci.parse().map_err(|_| illegal())?;
        let m = parsed.to_move(&self.position).map_err(|_| illegal())?;

        let san = SanPlus::from_move_and_play_unchecked(&mut self.position, &m);
        self.moves.push(m.to_uci(CastlingMode::Standard).to_string());
        self.history
            .push(self.position.zobrist_hash::<Zobrist64>(EnPassantMode::Legal));
        Ok(san.to_string())
    }

    /// Whether the current position ends the game.
    pub fn status(&self) -> Option<Status> {
        if self.position.is_checkmate() {
            return Some(Status::Checkmate {
                winner: !self.position.turn(),
            });
        }
        if self.position.is_stalemate() {
            return Some(Status::Draw(DrawReason::Stalemate));
        }
        if self.position.is_insufficient_material() {
            return Some(Status::Draw(DrawReason::InsufficientMaterial));
        }
        if self.position.halfmoves() >= 100 {
            return Some(Status::Draw(DrawReason::FiftyMoves));
        }
        if self.repetitions() >= 3 {
            return Some(Status::Draw(DrawReason::Repetition));
        }
        None
    }

    /// How often the current position has occurred, counting this occurrence.
    fn repetitions(&self) -> usize {
        match self.history.last() {
            Some(current) => self.history.iter().filter(|h| *h == current).count(),
            None => 0,
        }
    }
}

/// Replay a move list from its start position, failing at the first
/// illegal move.
pub fn replay(start_fen: Option<&str>, moves: &[String]) -> Result<Board, RulesError> {
    Board::from_opening(start_fen, moves).map(|(board, _)| board)
}
