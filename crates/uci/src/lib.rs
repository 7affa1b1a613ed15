//! UCI (Universal Chess Interface) protocol grammar.
//!
//! This crate provides the types and parsing for both directions of the UCI
//! protocol, so it can be shared by controllers that drive engines and by
//! engines themselves.
//!
//! # Controller to engine
//!
//! - `uci` - Initialize engine, get id and options
//! - `setoption name <id> [value <x>]` - Configure an option
//! - `ucinewgame` - Next search belongs to a new game
//! - `isready` / `readyok` - Synchronization
//! - `position [startpos | fen <fen>] [moves <move>...]` - Set position
//! - `go [movetime <ms>] [depth <d>] [nodes <n>] [wtime ...]` - Start search
//! - `stop` - Stop search
//! - `quit` - Exit engine
//!
//! # Engine to controller
//!
//! - `id name <name>` / `id author <author>`
//! - `option name <id> type <kind> ...`
//! - `uciok`, `readyok`
//! - `info ...` - Search progress
//! - `bestmove <move> [ponder <move>]`

mod command;
mod info;
mod message;

pub use command::{GoOptions, GuiCommand};
pub use info::{Bound, EngineInfo, InfoBuilder, Score};
pub use message::{EngineMessage, OptionDecl, OptionKind};

use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UciError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Simple UCI engine wrapper for writing bots.
pub struct UciEngine<R: BufRead, W: Write> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> UciEngine<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read and parse the next command from the controller.
    ///
    /// Returns `Ok(None)` once the input stream is closed.
    pub fn read_command(&mut self) -> Result<Option<GuiCommand>, UciError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        GuiCommand::parse(&line).map(Some)
    }

    /// Send a message to the controller.
    pub fn send(&mut self, msg: &EngineMessage) -> Result<(), UciError> {
        writeln!(self.writer, "{}", msg.to_uci())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Send engine identification.
    pub fn send_id(&mut self, name: &str, author: &str) -> Result<(), UciError> {
        self.send(&EngineMessage::Id {
            name: Some(name.to_string()),
            author: None,
        })?;
        self.send(&EngineMessage::Id {
            name: None,
            author: Some(author.to_string()),
        })
    }

    /// Declare a configurable option.
    pub fn send_option(&mut self, decl: OptionDecl) -> Result<(), UciError> {
        self.send(&EngineMessage::Option(decl))
    }

    /// Send uciok.
    pub fn send_uciok(&mut self) -> Result<(), UciError> {
        self.send(&EngineMessage::UciOk)
    }

    /// Send readyok.
    pub fn send_readyok(&mut self) -> Result<(), UciError> {
        self.send(&EngineMessage::ReadyOk)
    }

    /// Send best move.
    pub fn send_bestmove(&mut self, mv: &str) -> Result<(), UciError> {
        self.send(&EngineMessage::BestMove {
            mv: mv.to_string(),
            ponder: None,
        })
    }

    /// Send search info.
    pub fn send_info(&mut self, info: EngineInfo) -> Result<(), UciError> {
        self.send(&EngineMessage::Info(info))
    }
}

/// Create a UCI engine using stdin/stdout.
pub fn stdio_engine() -> UciEngine<std::io::BufReader<std::io::Stdin>, std::io::Stdout> {
    UciEngine::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_reads_commands_until_eof() {
        let input = b"uci\nisready\n".to_vec();
        let mut engine = UciEngine::new(std::io::Cursor::new(input), Vec::new());

        assert_eq!(engine.read_command().unwrap(), Some(GuiCommand::Uci));
        assert_eq!(engine.read_command().unwrap(), Some(GuiCommand::IsReady));
        assert_eq!(engine.read_command().unwrap(), None);
    }

    #[test]
    fn engine_writes_one_line_per_message() {
        let mut engine = UciEngine::new(std::io::Cursor::new(Vec::new()), Vec::new());
        engine.send_id("Fixture", "Harness").unwrap();
        engine.send_uciok().unwrap();
        engine.send_bestmove("e2e4").unwrap();

        let written = String::from_utf8(engine.writer.clone()).unwrap();
        assert_eq!(
            written,
            "id name Fixture\nid author Harness\nuciok\nbestmove e2e4\n"
        );
    }
}
