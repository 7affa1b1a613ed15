//! Fixture engine - a scripted UCI engine for exercising the harness.
//!
//! Plays the moves given with `--script`, indexed by ply from the start
//! position, and falls back to the first legal move once the script runs
//! out. It can be told to misbehave: crash or hang on its N-th move, crash
//! only on a given launch (counted in a file), never finish the handshake,
//! or write bytes that are not UTF-8.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::Parser;
use selfplay::rules::Board;
use uci::{stdio_engine, GuiCommand, InfoBuilder, OptionDecl, OptionKind, UciError};

#[derive(Parser)]
#[command(name = "fixture-engine")]
#[command(about = "Scripted UCI engine for harness tests")]
struct Args {
    /// Name reported with `id name`
    #[arg(long, default_value = "Fixture")]
    name: String,
    /// Moves by ply from the start position, separated by spaces
    #[arg(long, default_value = "")]
    script: String,
    /// Exit abruptly when asked for this move (1-based, per process)
    #[arg(long)]
    crash_at: Option<u32>,
    /// Stop answering when asked for this move (1-based, per process)
    #[arg(long)]
    hang_at: Option<u32>,
    /// Only apply --crash-at on this launch (1-based, needs --launch-counter)
    #[arg(long)]
    crash_on_launch: Option<u32>,
    /// File counting how often this engine has been launched
    #[arg(long)]
    launch_counter: Option<PathBuf>,
    /// Pretend to think this long before every move
    #[arg(long, default_value = "0")]
    think_ms: u64,
    /// Never answer `uci`
    #[arg(long)]
    no_handshake: bool,
    /// Append this process id to the file, one line per launch
    #[arg(long)]
    pid_file: Option<PathBuf>,
    /// Send an ISO-8859-1 author and info string, as older engines do
    #[arg(long)]
    latin1: bool,
}

fn record_pid(path: &Path) {
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{}", std::process::id()));
    if let Err(e) = appended {
        eprintln!("Failed to record pid: {}", e);
    }
}

/// Write a line that is not valid UTF-8, bypassing the protocol writer.
fn send_latin1(text: &[u8]) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Increment the launch counter and return this launch's number.
fn next_launch(path: &Path) -> u32 {
    let previous: u32 = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let launch = previous + 1;
    if let Err(e) = std::fs::write(path, launch.to_string()) {
        eprintln!("Failed to update launch counter: {}", e);
    }
    launch
}

fn main() -> Result<(), UciError> {
    let args = Args::parse();
    if let Some(path) = &args.pid_file {
        record_pid(path);
    }
    let launch = args.launch_counter.as_deref().map(next_launch).unwrap_or(1);
    let crash_at = match args.crash_on_launch {
        Some(wanted) if wanted != launch => None,
        _ => args.crash_at,
    };
    let script: Vec<&str> = args.script.split_whitespace().collect();

    let mut engine = stdio_engine();
    let mut board = Board::new();
    let mut ply = 0;
    let mut moves_made = 0;

    loop {
        let cmd = match engine.read_command() {
            Ok(Some(cmd)) => cmd,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading command: {}", e);
                continue;
            }
        };

        match cmd {
            GuiCommand::Uci => {
                if args.no_handshake {
                    continue;
                }
                engine.send_id(&args.name, "Selfplay")?;
                if args.latin1 {
                    send_latin1(b"id author J\xfcrgen")?;
                }
                let mut hash = OptionDecl::new("Hash", OptionKind::Spin);
                hash.default = Some("16".to_string());
                hash.min = Some(1);
                hash.max = Some(1024);
                engine.send_option(hash)?;
                let mut ponder = OptionDecl::new("Ponder", OptionKind::Check);
                ponder.default = Some("false".to_string());
                engine.send_option(ponder)?;
                let mut multi_pv = OptionDecl::new("MultiPV", OptionKind::Spin);
                multi_pv.default = Some("1".to_string());
                multi_pv.min = Some(1);
                multi_pv.max = Some(8);
                engine.send_option(multi_pv)?;
                engine.send_uciok()?;
            }

            GuiCommand::IsReady => engine.send_readyok()?,

            GuiCommand::UciNewGame => board = Board::new(),

            GuiCommand::Position { fen, moves } => {
                board = match Board::from_opening(fen.as_deref(), &moves) {
                    Ok((board, _)) => board,
                    Err(e) => {
                        eprintln!("Bad position: {}", e);
                        Board::new()
                    }
                };
                ply = moves.len();
            }

            GuiCommand::Go(_) => {
                moves_made += 1;
                if crash_at == Some(moves_made) {
                    std::process::exit(3);
                }
                if args.hang_at == Some(moves_made) {
                    loop {
                        thread::sleep(Duration::from_secs(3600));
                    }
                }
                if args.think_ms > 0 {
                    thread::sleep(Duration::from_millis(args.think_ms));
                }

                let mv = match script.get(ply) {
                    Some(mv) => mv.to_string(),
                    None => board
                        .legal_moves()
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| "0000".to_string()),
                };
                engine.send_info(
                    InfoBuilder::new()
                        .depth(1)
                        .score_cp(0)
                        .pv(vec![mv.clone()])
                        .build(),
                )?;
                if args.latin1 {
                    send_latin1(b"info string caf\xe9")?;
                }
                engine.send_bestmove(&mv)?;
            }

            GuiCommand::Quit => break,

            GuiCommand::SetOption { .. } | GuiCommand::Stop | GuiCommand::Unknown(_) => {}
        }
    }

    Ok(())
}
