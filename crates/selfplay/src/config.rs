//! Configuration for self-play matches.
//!
//! Engines and presets are read from a TOML file (`selfplay.toml` by
//! default). A [`MatchConfig`] is assembled from that file plus command-line
//! overrides and must pass [`MatchConfig::validate`] before any engine is
//! started.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::GameSettings;
use crate::rules::Board;
use crate::time_control::{ParseTimeControlError, TimeControl};

/// Errors in configuration, all fatal before a match starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Engine not found: {0}")]
    EngineNotFound(String),
    #[error("Preset not found: {0}")]
    PresetNotFound(String),
    #[error("Invalid time control {0}")]
    InvalidTimeControl(#[from] ParseTimeControlError),
    #[error("Invalid opening '{opening}': {reason}")]
    InvalidOpening { opening: String, reason: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Value of an engine option as written in the config file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// One engine: how to launch it and how to configure it.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    /// Identity used in records and statistics; the table key in the file.
    #[serde(skip)]
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// UCI options sent with `setoption` after the handshake.
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
    /// Overrides the match time control for this engine.
    #[serde(default)]
    pub time_control: Option<TimeControl>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args: Vec::new(),
            options: BTreeMap::new(),
            time_control: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Named bundle of match settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PresetConfig {
    #[serde(default = "default_games")]
    pub games: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub time_control: TimeControl,
    #[serde(default)]
    pub openings: Vec<String>,
    #[serde(default = "default_max_plies")]
    pub max_plies: u32,
}

fn default_games() -> u32 {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_max_plies() -> u32 {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("games")
}

/// Contents of `selfplay.toml`.
#[derive(Debug, Deserialize, Serialize)]
pub struct SelfplayConfig {
    #[serde(default)]
    pub engines: HashMap<String, EngineConfig>,
    #[serde(default)]
    pub presets: HashMap<String, PresetConfig>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for SelfplayConfig {
    fn default() -> Self {
        Self {
            engines: HashMap::new(),
            presets: HashMap::new(),
            output_dir: default_output_dir(),
        }
    }
}

impl SelfplayConfig {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        for (key, engine) in config.engines.iter_mut() {
            engine.name = key.clone();
        }
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        PathBuf::from("selfplay.toml")
    }

    pub fn get_engine(&self, name: &str) -> Result<&EngineConfig, ConfigError> {
        self.engines
            .get(name)
            .ok_or_else(|| ConfigError::EngineNotFound(name.to_string()))
    }

    pub fn get_preset(&self, name: &str) -> Result<&PresetConfig, ConfigError> {
        self.presets
            .get(name)
            .ok_or_else(|| ConfigError::PresetNotFound(name.to_string()))
    }

    /// Resolve an engine by configured name, treating unknown names as paths.
    pub fn resolve_engine(&self, name: &str) -> EngineConfig {
        match self.get_engine(name) {
            Ok(engine) => engine.clone(),
            Err(_) => EngineConfig::new(name, name),
        }
    }

    /// Resolve both sides of a match.
    ///
    /// Without a second engine the first plays itself. Both sides always get
    /// distinct identities: a repeated one gets a `#2` suffix.
    pub fn resolve_pair(&self, first: &str, second: Option<&str>) -> (EngineConfig, EngineConfig) {
        let first = self.resolve_engine(first);
        let mut second = match second {
            Some(name) => self.resolve_engine(name),
            None => first.clone(),
        };
        if second.name == first.name {
            second.name = format!("{}#2", first.name);
        }
        (first, second)
    }
}

/// An opening: an optional start position and book moves played from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opening {
    pub fen: Option<String>,
    pub moves: Vec<String>,
}

impl Opening {
    /// Parse an opening line.
    ///
    /// A line containing `/` is a FEN, optionally followed by `moves ...`;
    /// anything else is a list of UCI moves from the standard position. The
    /// line is replayed so that illegal openings are rejected up front.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidOpening {
            opening: line.to_string(),
            reason,
        };
        let line_trimmed = line.trim();
        if line_trimmed.is_empty() {
            return Err(invalid("empty opening".to_string()));
        }

        let (fen, moves) = if line_trimmed.contains('/') {
            let (fen, moves) = match line_trimmed.split_once(" moves ") {
                Some((fen, moves)) => (fen, moves),
                None => (line_trimmed, ""),
            };
            (Some(fen.trim().to_string()), moves)
        } else {
            (None, line_trimmed)
        };
        let moves: Vec<String> = moves.split_whitespace().map(str::to_string).collect();

        Board::from_opening(fen.as_deref(), &moves).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { fen, moves })
    }
}

/// Everything needed to run one match.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Prefix of every output file name.
    pub run_id: String,
    pub first: EngineConfig,
    pub second: EngineConfig,
    pub games: u32,
    pub concurrency: usize,
    pub output_dir: PathBuf,
    pub time_control: TimeControl,
    /// Swap colors every game so both engines play both sides.
    pub alternate_colors: bool,
    pub max_plies: u32,
    /// Grace added to every per-move budget before an engine is unresponsive.
    pub timeout_margin: Duration,
    pub handshake_timeout: Duration,
    /// How long an engine gets to exit after `quit`, and how long an
    /// in-flight move may run on after cancellation.
    pub stop_grace: Duration,
    pub game_timeout: Option<Duration>,
    pub openings: Vec<Opening>,
    pub write_json: bool,
}

impl MatchConfig {
    pub fn new(first: EngineConfig, second: EngineConfig) -> Self {
        Self {
            run_id: generate_run_id(),
            first,
            second,
            games: default_games(),
            concurrency: default_concurrency(),
            output_dir: default_output_dir(),
            time_control: TimeControl::default(),
            alternate_colors: true,
            max_plies: default_max_plies(),
            timeout_margin: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            game_timeout: None,
            openings: Vec::new(),
            write_json: false,
        }
    }

    /// Apply a preset's settings.
    pub fn apply_preset(&mut self, preset: &PresetConfig) -> Result<(), ConfigError> {
        self.games = preset.games;
        self.concurrency = preset.concurrency;
        self.time_control = preset.time_control;
        self.max_plies = preset.max_plies;
        self.openings = preset
            .openings
            .iter()
            .map(|line| Opening::parse(line))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Check the configuration before any engine is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.games == 0 {
            return invalid("game count must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".to_string());
        }
        if self.max_plies == 0 {
            return invalid("max plies must be at least 1".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return invalid("handshake timeout must be positive".to_string());
        }
        if self.game_timeout.is_some_and(|t| t.is_zero()) {
            return invalid("game timeout must be positive".to_string());
        }
        if self.run_id.is_empty() || self.run_id.contains(['/', '\\']) {
            return invalid(format!("run id '{}' is not a valid file name prefix", self.run_id));
        }
        if self.first.name.is_empty() || self.second.name.is_empty() {
            return invalid("engine names must not be empty".to_string());
        }
        if self.first.name == self.second.name {
            return invalid(format!(
                "both engines are named '{}'; identities must differ",
                self.first.name
            ));
        }
        for engine in [&self.first, &self.second] {
            // Bare names are looked up on PATH at launch
            let is_path = engine.path.components().count() > 1 || engine.path.is_absolute();
            if is_path && !engine.path.is_file() {
                return Err(ConfigError::EngineNotFound(format!(
                    "{} ({})",
                    engine.name,
                    engine.path.display()
                )));
            }
        }
        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return invalid(format!(
                "output path {} is not a directory",
                self.output_dir.display()
            ));
        }
        Ok(())
    }

    /// Whether the first engine plays White in the given game.
    pub fn first_is_white(&self, game_index: u32) -> bool {
        !self.alternate_colors || game_index % 2 == 0
    }

    /// Engine configs as (white, black) for the given game.
    pub fn colors(&self, game_index: u32) -> (&EngineConfig, &EngineConfig) {
        if self.first_is_white(game_index) {
            (&self.first, &self.second)
        } else {
            (&self.second, &self.first)
        }
    }

    /// Opening for the given game.
    ///
    /// With alternation each opening is played twice in a row, once with
    /// each color assignment.
    pub fn opening_for(&self, game_index: u32) -> Option<&Opening> {
        if self.openings.is_empty() {
            return None;
        }
        let slot = if self.alternate_colors {
            game_index / 2
        } else {
            game_index
        };
        self.openings.get(slot as usize % self.openings.len())
    }

    /// Settings for the game driver.
    pub fn game_settings(&self, game_index: u32) -> GameSettings {
        let (white, black) = self.colors(game_index);
        GameSettings {
            white_time: white.time_control.unwrap_or(self.time_control),
            black_time: black.time_control.unwrap_or(self.time_control),
            max_plies: self.max_plies,
            timeout_margin: self.timeout_margin,
            game_timeout: self.game_timeout,
            stop_grace: self.stop_grace,
            opening: self.opening_for(game_index).cloned(),
        }
    }
}

/// A run identifier: UTC timestamp plus a short random suffix.
pub fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}
