//! UCI command rendering and parsing.

use crate::UciError;

/// Commands sent from GUI to engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiCommand {
    /// Initialize UCI mode.
    Uci,
    /// Check if engine is ready.
    IsReady,
    /// The following searches belong to a new game.
    UciNewGame,
    /// Set an engine option. Buttons carry no value.
    SetOption { name: String, value: Option<String> },
    /// Set up position.
    Position {
        fen: Option<String>,
        moves: Vec<String>,
    },
    /// Start calculating.
    Go(GoOptions),
    /// Stop calculating.
    Stop,
    /// Quit the engine.
    Quit,
    /// Unknown command (for forward compatibility).
    Unknown(String),
}

/// Options for the `go` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoOptions {
    /// Search for exactly this time in milliseconds.
    pub movetime: Option<u64>,
    /// Search to this depth.
    pub depth: Option<u32>,
    /// Search this many nodes.
    pub nodes: Option<u64>,
    /// White time remaining in milliseconds.
    pub wtime: Option<u64>,
    /// Black time remaining in milliseconds.
    pub btime: Option<u64>,
    /// White increment per move in milliseconds.
    pub winc: Option<u64>,
    /// Black increment per move in milliseconds.
    pub binc: Option<u64>,
    /// Moves to go until next time control.
    pub movestogo: Option<u32>,
    /// Search indefinitely until `stop`.
    pub infinite: bool,
}

impl GoOptions {
    /// Format as a `go` command line.
    pub fn to_uci(&self) -> String {
        let fields = [
            ("wtime", self.wtime),
            ("btime", self.btime),
            ("winc", self.winc),
            ("binc", self.binc),
            ("movestogo", self.movestogo.map(u64::from)),
            ("depth", self.depth.map(u64::from)),
            ("nodes", self.nodes),
            ("movetime", self.movetime),
        ];
        let mut line = fields
            .iter()
            .filter_map(|(key, value)| value.map(|v| format!(" {} {}", key, v)))
            .fold(String::from("go"), |mut line, field| {
                line.push_str(&field);
                line
            });
        if self.infinite {
            line.push_str(" infinite");
        }
        line
    }

    /// Read the arguments of a `go` line. Unknown tokens are skipped.
    fn parse<'a>(mut parts: impl Iterator<Item = &'a str>) -> Self {
        fn value<'b, T: std::str::FromStr>(
            parts: &mut impl Iterator<Item = &'b str>,
        ) -> Option<T> {
            parts.next().and_then(|v| v.parse().ok())
        }

        let mut opts = GoOptions::default();
        while let Some(key) = parts.next() {
            match key {
                "movetime" => opts.movetime = value(&mut parts),
                "depth" => opts.depth = value(&mut parts),
                "nodes" => opts.nodes = value(&mut parts),
                "wtime" => opts.wtime = value(&mut parts),
                "btime" => opts.btime = value(&mut parts),
                "winc" => opts.winc = value(&mut parts),
                "binc" => opts.binc = value(&mut parts),
                "movestogo" => opts.movestogo = value(&mut parts),
                "infinite" => opts.infinite = true,
                _ => {}
            }
        }
        opts
    }
}

impl GuiCommand {
    /// Format the command as a protocol line (without trailing newline).
    pub fn to_uci(&self) -> String {
        match self {
            GuiCommand::Uci => "uci".to_string(),
            GuiCommand::IsReady => "isready".to_string(),
            GuiCommand::UciNewGame => "ucinewgame".to_string(),
            GuiCommand::SetOption { name, value } => match value {
                Some(v) => format!("setoption name {} value {}", name, v),
                None => format!("setoption name {}", name),
            },
            GuiCommand::Position { fen, moves } => {
                let mut line = match fen {
                    Some(f) => format!("position fen {}", f),
                    None => "position startpos".to_string(),
                };
                if !moves.is_empty() {
                    line.push_str(" moves ");
                    line.push_str(&moves.join(" "));
                }
                line
            }
            GuiCommand::Go(opts) => opts.to_uci(),
            GuiCommand::Stop => "stop".to_string(),
            GuiCommand::Quit => "quit".to_string(),
            GuiCommand::Unknown(s) => s.clone(),
        }
    }

    /// Parse a UCI command string.
    pub fn parse(input: &str) -> Result<Self, UciError> {
        let input = input.trim();
        let mut parts = input.split_whitespace();

        let cmd = parts.next().unwrap_or("");

        match cmd {
            "uci" => Ok(GuiCommand::Uci),
            "isready" => Ok(GuiCommand::IsReady),
            "ucinewgame" => Ok(GuiCommand::UciNewGame),
            "stop" => Ok(GuiCommand::Stop),
            "quit" => Ok(GuiCommand::Quit),
            "setoption" => Self::parse_setoption(parts),
            "position" => Self::parse_position(parts),
            "go" => Ok(GuiCommand::Go(GoOptions::parse(parts))),
            "" => Ok(GuiCommand::Unknown(String::new())),
            _ => Ok(GuiCommand::Unknown(input.to_string())),
        }
    }

    fn parse_setoption<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Self, UciError> {
        if parts.next() != Some("name") {
            return Err(UciError::ParseError(
                "Expected 'name' after setoption".to_string(),
            ));
        }

        // Option names may contain spaces, so collect until "value"
        let mut name_parts = Vec::new();
        let mut value_parts = Vec::new();
        let mut in_value = false;
        for part in parts {
            if !in_value && part == "value" {
                in_value = true;
            } else if in_value {
                value_parts.push(part);
            } else {
                name_parts.push(part);
            }
        }

        if name_parts.is_empty() {
            return Err(UciError::ParseError("Empty option name".to_string()));
        }

        Ok(GuiCommand::SetOption {
            name: name_parts.join(" "),
            value: in_value.then(|| value_parts.join(" ")),
        })
    }

    fn parse_position<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Self, UciError> {
        let fen = match parts.next() {
            Some("startpos") => None,
            Some("fen") => {
                // A FEN spans several tokens and ends at "moves"
                let fen = parts
                    .by_ref()
                    .take_while(|&part| part != "moves")
                    .collect::<Vec<_>>()
                    .join(" ");
                if fen.is_empty() {
                    return Err(UciError::ParseError("Empty FEN".to_string()));
                }
                let moves = parts.map(str::to_string).collect();
                return Ok(GuiCommand::Position {
                    fen: Some(fen),
                    moves,
                });
            }
            other => {
                return Err(UciError::ParseError(format!(
                    "position needs startpos or fen, got {:?}",
                    other.unwrap_or("")
                )));
            }
        };

        let moves = match parts.next() {
            Some("moves") => parts.map(str::to_string).collect(),
            _ => Vec::new(),
        };
        Ok(GuiCommand::Position { fen, moves })
    }
}
