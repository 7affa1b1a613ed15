//! Engine-to-controller messages.

use crate::{EngineInfo, UciError};

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification. One line carries either the name or the author.
    Id {
        name: Option<String>,
        author: Option<String>,
    },
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Option declaration sent during initialization.
    Option(OptionDecl),
    /// Search information.
    Info(EngineInfo),
    /// Best move found.
    BestMove { mv: String, ponder: Option<String> },
    /// Anything else (copyprotection, registration, debug chatter).
    Unknown(String),
}

/// Type of a declared engine option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Check,
    Spin,
    Combo,
    Button,
    String,
}

impl OptionKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "check" => Some(OptionKind::Check),
            "spin" => Some(OptionKind::Spin),
            "combo" => Some(OptionKind::Combo),
            "button" => Some(OptionKind::Button),
            "string" => Some(OptionKind::String),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            OptionKind::Check => "check",
            OptionKind::Spin => "spin",
            OptionKind::Combo => "combo",
            OptionKind::Button => "button",
            OptionKind::String => "string",
        }
    }
}

/// An `option name <id> type <kind> ...` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDecl {
    pub name: String,
    pub kind: OptionKind,
    pub default: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// Allowed values of a combo option.
    pub vars: Vec<String>,
}

impl OptionDecl {
    /// Declare an option with no default or bounds.
    pub fn new(name: &str, kind: OptionKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default: None,
            min: None,
            max: None,
            vars: Vec::new(),
        }
    }

    /// Parse the tokens following `option`.
    ///
    /// Names and string defaults may contain spaces, so every field runs until
    /// the next keyword.
    pub fn parse(rest: &str) -> Result<Self, UciError> {
        let parts: Vec<&str> = rest.split_whitespace().collect();
        let mut name = Vec::new();
        let mut kind = None;
        let mut default: Option<Vec<&str>> = None;
        let mut min = None;
        let mut max = None;
        let mut vars: Vec<Vec<&str>> = Vec::new();

        let mut field = "";
        for part in parts {
            let is_keyword = match part {
                "name" | "type" | "min" | "max" | "var" => field != "name" || part == "type",
                "default" => true,
                _ => false,
            };
            if is_keyword {
                field = part;
                match part {
                    "default" => default = Some(Vec::new()),
                    "var" => vars.push(Vec::new()),
                    _ => {}
                }
                continue;
            }

            match field {
                "name" => name.push(part),
                "type" => kind = OptionKind::parse(part),
                "default" => default.get_or_insert_with(Vec::new).push(part),
                "min" => min = part.parse().ok(),
                "max" => max = part.parse().ok(),
                "var" => {
                    if let Some(var) = vars.last_mut() {
                        var.push(part);
                    }
                }
                _ => {}
            }
        }

        if name.is_empty() {
            return Err(UciError::ParseError(format!("option without name: {}", rest)));
        }
        let kind = kind.ok_or_else(|| {
            UciError::ParseError(format!("option without valid type: {}", rest))
        })?;

        Ok(Self {
            name: name.join(" "),
            kind,
            default: default.map(|d| d.join(" ")),
            min,
            max,
            vars: vars.into_iter().map(|v| v.join(" ")).collect(),
        })
    }

    /// Format as an `option` line.
    pub fn to_uci(&self) -> String {
        let mut line = format!("option name {} type {}", self.name, self.kind.as_str());
        if let Some(ref d) = self.default {
            line.push_str(&format!(" default {}", d));
        }
        if let Some(m) = self.min {
            line.push_str(&format!(" min {}", m));
        }
        if let Some(m) = self.max {
            line.push_str(&format!(" max {}", m));
        }
        for var in &self.vars {
            line.push_str(&format!(" var {}", var));
        }
        line
    }
}

impl EngineMessage {
    /// Parse a line received from an engine.
    ///
    /// Unrecognized lines become [`EngineMessage::Unknown`]; only recognized
    /// but malformed lines are errors.
    pub fn parse(line: &str) -> Result<Self, UciError> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim_start()),
            None => (line, ""),
        };

        match head {
            "uciok" => Ok(EngineMessage::UciOk),
            "readyok" => Ok(EngineMessage::ReadyOk),
            "id" => {
                if let Some(name) = rest.strip_prefix("name") {
                    Ok(EngineMessage::Id {
                        name: Some(name.trim().to_string()),
                        author: None,
                    })
                } else if let Some(author) = rest.strip_prefix("author") {
                    Ok(EngineMessage::Id {
                        name: None,
                        author: Some(author.trim().to_string()),
                    })
                } else {
                    Ok(EngineMessage::Unknown(line.to_string()))
                }
            }
            "option" => OptionDecl::parse(rest).map(EngineMessage::Option),
            "info" => EngineInfo::parse(line)
                .map(EngineMessage::Info)
                .ok_or_else(|| UciError::ParseError(line.to_string())),
            "bestmove" => {
                let mut parts = rest.split_whitespace();
                let mv = parts
                    .next()
                    .ok_or_else(|| UciError::ParseError("bestmove without a move".to_string()))?
                    .to_string();
                let ponder = match parts.next() {
                    Some("ponder") => parts.next().map(|p| p.to_string()),
                    _ => None,
                };
                Ok(EngineMessage::BestMove { mv, ponder })
            }
            _ => Ok(EngineMessage::Unknown(line.to_string())),
        }
    }

    /// Format message for output.
    pub fn to_uci(&self) -> String {
        match self {
            EngineMessage::Id { name, author } => {
                let mut parts = Vec::new();
                if let Some(n) = name {
                    parts.push(format!("id name {}", n));
                }
                if let Some(a) = author {
                    parts.push(format!("id author {}", a));
                }
                parts.join("\n")
            }
            EngineMessage::UciOk => "uciok".to_string(),
            EngineMessage::ReadyOk => "readyok".to_string(),
            EngineMessage::Option(decl) => decl.to_uci(),
            EngineMessage::Info(info) => info.to_uci(),
            EngineMessage::BestMove { mv, ponder } => match ponder {
                Some(p) => format!("bestmove {} ponder {}", mv, p),
                None => format!("bestmove {}", mv),
            },
            EngineMessage::Unknown(s) => s.clone(),
        }
    }
}
