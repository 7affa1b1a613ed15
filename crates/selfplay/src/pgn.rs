//! PGN (Portable Game Notation) rendering.
//!
//! [`render`] is a pure function from game metadata and moves to PGN text;
//! writing the text anywhere is the recorder's job.

use crate::game::{MoveRecord, Termination};

/// Maximum length of a movetext line.
const LINE_WIDTH: usize = 80;

/// Tag pairs of one game.
#[derive(Debug, Clone, PartialEq)]
pub struct PgnHeader {
    pub event: String,
    pub site: String,
    /// `YYYY.MM.DD`.
    pub date: String,
    pub round: u32,
    pub white: String,
    pub black: String,
    /// `1-0`, `0-1`, `1/2-1/2` or `*`.
    pub result: String,
    pub termination: Termination,
    pub time_control: String,
    /// Set when the game did not start from the standard position.
    pub start_fen: Option<String>,
}

/// Value of the standard `Termination` tag.
fn termination_tag(termination: Termination) -> &'static str {
    match termination {
        Termination::Checkmate
        | Termination::Stalemate
        | Termination::Repetition
        | Termination::FiftyMove
        | Termination::InsufficientMaterial
        | Termination::Resignation => "normal",
        Termination::TimeForfeit | Termination::EngineTimeout => "time forfeit",
        Termination::IllegalMove => "rules infraction",
        Termination::EngineCrash => "abandoned",
        Termination::MoveLimit => "adjudication",
        Termination::GameTimeout | Termination::Cancelled => "unterminated",
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Side to move and move number encoded in a FEN.
fn fen_move_number(fen: &str) -> (bool, u32) {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    let white_to_move = fields.get(1).map_or(true, |side| *side != "b");
    let number = fields.get(5).and_then(|n| n.parse().ok()).unwrap_or(1);
    (white_to_move, number)
}

fn move_comment(mv: &MoveRecord) -> String {
    if mv.book {
        return "{book}".to_string();
    }
    let seconds = mv.think_ms as f64 / 1000.0;
    match mv.search_info.as_ref() {
        Some(info) => match (info.score.as_ref(), info.depth) {
            (Some(score), Some(depth)) => format!("{{{}/{} {:.3}s}}", score, depth, seconds),
            _ => format!("{{{:.3}s}}", seconds),
        },
        None => format!("{{{:.3}s}}", seconds),
    }
}

/// Render a game as PGN.
///
/// Tags come first (seven tag roster, then `SetUp`/`FEN` for custom start
/// positions, then `TimeControl`, `Termination` and `PlyCount`), followed by
/// SAN movetext wrapped at 80 columns. Each move carries a comment with its
/// think time and, when reported, the engine's score and depth; book moves
/// are marked `{book}`. A comment naming the termination reason precedes
/// the result token.
pub fn render(header: &PgnHeader, moves: &[MoveRecord]) -> String {
    let mut out = String::new();
    let mut tag = |name: &str, value: &str| {
        out.push_str(&format!("[{} \"{}\"]\n", name, escape(value)));
    };

    tag("Event", &header.event);
    tag("Site", &header.site);
    tag("Date", &header.date);
    tag("Round", &header.round.to_string());
    tag("White", &header.white);
    tag("Black", &header.black);
    tag("Result", &header.result);
    if let Some(fen) = header.start_fen.as_deref() {
        tag("SetUp", "1");
        tag("FEN", fen);
    }
    tag("TimeControl", &header.time_control);
    tag("Termination", termination_tag(header.termination));
    tag("PlyCount", &moves.len().to_string());
    out.push('\n');

    let (mut white_to_move, mut number) = header
        .start_fen
        .as_deref()
        .map(fen_move_number)
        .unwrap_or((true, 1));

    let mut tokens: Vec<String> = Vec::with_capacity(moves.len() * 3 + 2);
    for (i, mv) in moves.iter().enumerate() {
        if white_to_move {
            tokens.push(format!("{}.", number));
        } else if i == 0 {
            tokens.push(format!("{}...", number));
        }
        tokens.push(mv.san.clone());
        tokens.push(move_comment(mv));

        if !white_to_move {
            number += 1;
        }
        white_to_move = !white_to_move;
    }
    tokens.push(format!("{{{}}}", header.termination));
    tokens.push(header.result.clone());

    let mut line = String::new();
    for token in tokens {
        if !line.is_empty() && line.len() + 1 + token.len() > LINE_WIDTH {
            out.push_str(&line);
            out.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&token);
    }
    out.push_str(&line);
    out.push('\n');
    out
}
