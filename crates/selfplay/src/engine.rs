//! Engine process handles.
//!
//! An [`EngineHandle`] owns one spawned UCI engine: its process, the pipes to
//! talk to it, and a bounded transcript of the conversation for post-mortem
//! logging. Every wait on the engine is bounded by a timeout, and the process
//! is killed when the handle is dropped, so no exit path leaves an engine
//! running.
//!
//! # Lifecycle
//!
//! 1. [`EngineHandle::start`] spawns the engine and runs the UCI handshake
//! 2. [`EngineHandle::request_move`] asks for a move in a position
//! 3. [`EngineHandle::stop`] sends `quit` and reaps the process

use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use uci::{EngineInfo, EngineMessage, GoOptions, GuiCommand, OptionDecl};

use crate::config::EngineConfig;
use crate::game::Player;

/// Lines of protocol traffic kept per engine.
pub const TRANSCRIPT_LINES: usize = 64;

/// Errors talking to an engine process.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The process could not be spawned.
    #[error("Failed to launch engine {engine}: {source}")]
    LaunchError {
        engine: String,
        #[source]
        source: std::io::Error,
    },
    /// The engine did not complete `uci`/`uciok` and `isready`/`readyok`.
    #[error("Engine {engine} failed the UCI handshake: {reason}")]
    HandshakeError { engine: String, reason: String },
    /// No `bestmove` within the allowed time.
    #[error("Engine {engine} did not answer within {}ms", timeout.as_millis())]
    EngineTimeout { engine: String, timeout: Duration },
    /// The process exited or its pipes broke.
    #[error("Engine {engine} crashed: {reason}")]
    EngineCrashed { engine: String, reason: String },
    /// A `bestmove` line without a move.
    #[error("Engine {engine} sent a malformed response: {line}")]
    MalformedResponse { engine: String, line: String },
}

/// Lifecycle state of an engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Starting,
    Ready,
    Thinking,
    Unresponsive,
    Terminated,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Starting => "starting",
            EngineState::Ready => "ready",
            EngineState::Thinking => "thinking",
            EngineState::Unresponsive => "unresponsive",
            EngineState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Features an engine declared during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub ponder: bool,
    pub multi_pv: bool,
    pub hash: bool,
    /// Every declared option name, in declaration order.
    pub options: Vec<String>,
}

impl Capabilities {
    fn declare(&mut self, decl: &OptionDecl) {
        match decl.name.to_ascii_lowercase().as_str() {
            "ponder" => self.ponder = true,
            "multipv" => self.multi_pv = true,
            "hash" => self.hash = true,
            _ => {}
        }
        self.options.push(decl.name.clone());
    }

    /// Whether the engine declared an option (names compare case-insensitively).
    pub fn supports(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }
}

/// The most recent protocol lines exchanged with an engine.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: VecDeque<String>,
}

impl Transcript {
    fn push(&mut self, line: String) {
        if self.lines.len() == TRANSCRIPT_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn sent(&mut self, line: &str) {
        self.push(format!("> {}", line));
    }

    fn received(&mut self, line: &str) {
        self.push(format!("< {}", line));
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// One line per entry, `>` for sent and `<` for received.
    pub fn render(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }
}

/// A request for one move.
#[derive(Debug, Clone)]
pub struct MoveRequest<'a> {
    /// Start position, `None` for the standard one.
    pub start_fen: Option<&'a str>,
    /// Moves played from the start position.
    pub moves: &'a [String],
    pub go: GoOptions,
    /// How long to wait for `bestmove`.
    pub timeout: Duration,
}

/// An engine's answer to a [`MoveRequest`].
#[derive(Debug, Clone)]
pub struct MoveReply {
    /// The move exactly as the engine sent it.
    pub uci: String,
    pub think_time: Duration,
    /// Last `info` line that carried a depth and a score.
    pub info: Option<EngineInfo>,
}

/// A running UCI engine.
pub struct EngineHandle {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Bytes of a line not yet terminated; survives a cancelled read.
    pending: Vec<u8>,
    state: EngineState,
    id_name: Option<String>,
    id_author: Option<String>,
    capabilities: Capabilities,
    transcript: Transcript,
}

impl EngineHandle {
    /// Spawn an engine and complete the UCI handshake.
    ///
    /// Configured options are sent with `setoption` when the engine declares
    /// them and skipped with a warning otherwise. The handshake ends with
    /// `ucinewgame` and an `isready`/`readyok` exchange.
    ///
    /// # Errors
    ///
    /// [`EngineError::LaunchError`] if the process cannot be spawned, and
    /// [`EngineError::HandshakeError`] if the handshake fails or does not
    /// finish within `handshake_timeout`. The process is killed before an
    /// error is returned.
    pub async fn start(
        config: &EngineConfig,
        handshake_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let launch_error = |source| EngineError::LaunchError {
            engine: config.name.clone(),
            source,
        };
        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error(std::io::Error::other("stdout not captured")))?;

        let mut handle = Self {
            name: config.name.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            pending: Vec::new(),
            state: EngineState::Starting,
            id_name: None,
            id_author: None,
            capabilities: Capabilities::default(),
            transcript: Transcript::default(),
        };
        tracing::debug!(engine = %handle.name, pid = ?handle.pid(), "engine spawned");

        let reason = match tokio::time::timeout(handshake_timeout, handle.handshake(config)).await
        {
            Ok(Ok(())) => {
                handle.set_state(EngineState::Ready);
                return Ok(handle);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no readyok within {}ms", handshake_timeout.as_millis()),
        };

        tracing::warn!(
            engine = %handle.name,
            transcript = %handle.transcript.render(),
            "handshake failed: {}",
            reason
        );
        handle.kill().await;
        Err(EngineError::HandshakeError {
            engine: config.name.clone(),
            reason,
        })
    }

    async fn handshake(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        self.send(&GuiCommand::Uci).await?;
        loop {
            match self.read_message().await? {
                EngineMessage::Id { name, author } => {
                    if name.is_some() {
                        self.id_name = name;
                    }
                    if author.is_some() {
                        self.id_author = author;
                    }
                }
                EngineMessage::Option(decl) => self.capabilities.declare(&decl),
                EngineMessage::UciOk => break,
                _ => {}
            }
        }

        for (option, value) in &config.options {
            if !self.capabilities.supports(option) {
                tracing::warn!(engine = %self.name, option = %option, "option not declared by engine, skipping");
                continue;
            }
            self.send(&GuiCommand::SetOption {
                name: option.clone(),
                value: Some(value.to_string()),
            })
            .await?;
        }

        self.send(&GuiCommand::UciNewGame).await?;
        self.send(&GuiCommand::IsReady).await?;
        loop {
            if let EngineMessage::ReadyOk = self.read_message().await? {
                return Ok(());
            }
        }
    }

    /// Ask the engine for a move.
    ///
    /// Sends the position and `go`, then waits for `bestmove`, keeping the
    /// last `info` line that carried a score.
    ///
    /// # Errors
    ///
    /// [`EngineError::EngineTimeout`] when no `bestmove` arrives within
    /// `request.timeout` (the engine is then unresponsive and should be
    /// stopped), [`EngineError::EngineCrashed`] when the process goes away,
    /// and [`EngineError::MalformedResponse`] for a `bestmove` without a move.
    pub async fn request_move(
        &mut self,
        request: &MoveRequest<'_>,
    ) -> Result<MoveReply, EngineError> {
        self.send(&GuiCommand::Position {
            fen: request.start_fen.map(str::to_string),
            moves: request.moves.to_vec(),
        })
        .await?;
        self.send(&GuiCommand::Go(request.go.clone())).await?;
        self.set_state(EngineState::Thinking);

        let started = Instant::now();
        match tokio::time::timeout(request.timeout, self.await_bestmove()).await {
            Ok(Ok((uci, info))) => {
                self.set_state(EngineState::Ready);
                Ok(MoveReply {
                    uci,
                    think_time: started.elapsed(),
                    info,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.set_state(EngineState::Unresponsive);
                Err(EngineError::EngineTimeout {
                    engine: self.name.clone(),
                    timeout: request.timeout,
                })
            }
        }
    }

    async fn await_bestmove(&mut self) -> Result<(String, Option<EngineInfo>), EngineError> {
        let mut last_info = None;
        loop {
            match self.read_message().await? {
                EngineMessage::Info(info) if is_principal_score(&info) => last_info = Some(info),
                EngineMessage::BestMove { mv, .. } => return Ok((mv, last_info)),
                _ => {}
            }
        }
    }

    /// Shut the engine down.
    ///
    /// Sends `quit` and waits up to `grace` for the process to exit, then
    /// kills it. The process is reaped either way.
    pub async fn stop(mut self, grace: Duration) {
        if self.state != EngineState::Terminated {
            // A dead pipe is fine here, the wait below notices the exit
            let _ = self.send(&GuiCommand::Quit).await;
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(engine = %self.name, %status, "engine exited");
            }
            Ok(Err(e)) => {
                tracing::debug!(engine = %self.name, error = %e, "wait failed, killing");
                self.kill().await;
            }
            Err(_) => {
                tracing::warn!(engine = %self.name, "engine ignored quit, killing");
                self.kill().await;
            }
        }
        self.set_state(EngineState::Terminated);
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(engine = %self.name, error = %e, "kill failed");
        }
    }

    /// Identity from the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the engine reported with `id name`.
    pub fn id_name(&self) -> Option<&str> {
        self.id_name.as_deref()
    }

    pub fn id_author(&self) -> Option<&str> {
        self.id_author.as_deref()
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            tracing::debug!(engine = %self.name, from = %self.state, to = %state, "engine state");
            self.state = state;
        }
    }

    async fn send(&mut self, command: &GuiCommand) -> Result<(), EngineError> {
        let line = command.to_uci();
        self.transcript.sent(&line);
        if let Err(e) = write_line(&mut self.stdin, &line).await {
            return Err(self.crashed(format!("write failed: {}", e)));
        }
        Ok(())
    }

    /// Read one line of output. Bytes that are not UTF-8 are replaced
    /// rather than rejected; only EOF and I/O failures mean a crash.
    async fn read_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.read_until(b'\n', &mut self.pending).await {
            Ok(0) if self.pending.is_empty() => {
                Err(self.crashed("unexpected end of output".to_string()))
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                self.transcript.received(&line);
                Ok(line)
            }
            Err(e) => Err(self.crashed(format!("read failed: {}", e))),
        }
    }

    /// Read the next message; only a malformed `bestmove` is an error,
    /// other garbage is ignored.
    async fn read_message(&mut self) -> Result<EngineMessage, EngineError> {
        let line = self.read_line().await?;
        match EngineMessage::parse(&line) {
            Ok(message) => Ok(message),
            Err(_) if line.split_whitespace().next() == Some("bestmove") => {
                Err(EngineError::MalformedResponse {
                    engine: self.name.clone(),
                    line,
                })
            }
            Err(e) => {
                tracing::debug!(engine = %self.name, error = %e, "ignoring unparseable line");
                Ok(EngineMessage::Unknown(line))
            }
        }
    }

    fn crashed(&mut self, reason: String) -> EngineError {
        let reason = match self.child.try_wait() {
            Ok(Some(status)) => format!("{} ({})", reason, status),
            _ => reason,
        };
        self.set_state(EngineState::Terminated);
        EngineError::EngineCrashed {
            engine: self.name.clone(),
            reason,
        }
    }
}

/// A scored `info` line for the best line; with MultiPV the others are
/// secondary variations.
fn is_principal_score(info: &EngineInfo) -> bool {
    info.has_score() && matches!(info.multipv, None | Some(1))
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

impl Player for EngineHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_move(&mut self, request: &MoveRequest<'_>) -> Result<MoveReply, EngineError> {
        EngineHandle::request_move(self, request).await
    }
}
