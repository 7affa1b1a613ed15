//! Selfplay - runs self-play matches between UCI chess engines.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use selfplay::config::{ConfigError, MatchConfig, Opening, SelfplayConfig};
use selfplay::recorder;
use selfplay::scheduler::MatchScheduler;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "selfplay")]
#[command(about = "Self-play match harness for UCI chess engines")]
struct Cli {
    /// Config file with engines and presets
    #[arg(long, default_value = "selfplay.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a match between two engines, or an engine and itself
    Match(MatchArgs),
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// First engine (configured name or executable path)
    engine: String,
    /// Second engine; the first engine plays itself when omitted
    opponent: Option<String>,
    /// Number of games to play
    #[arg(short, long)]
    games: Option<u32>,
    /// Games played at the same time
    #[arg(short, long)]
    concurrency: Option<usize>,
    /// Time control: "movetime 500", "depth 8", "nodes 20000" or "40+0.4"
    #[arg(short, long)]
    time_control: Option<String>,
    /// Directory for game records
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Preset from the config file
    #[arg(short, long)]
    preset: Option<String>,
    /// Opening line (UCI moves, or a FEN optionally followed by "moves ..."); repeatable
    #[arg(long = "opening")]
    openings: Vec<String>,
    /// Keep the first engine on White in every game
    #[arg(long)]
    no_alternate: bool,
    /// Engine plies after which a game is drawn
    #[arg(long)]
    max_plies: Option<u32>,
    /// Wall-clock limit per game, in seconds
    #[arg(long)]
    game_timeout: Option<u64>,
    /// Prefix for output file names (default: timestamp and random suffix)
    #[arg(long)]
    run_id: Option<String>,
    /// Also write a JSON record per game
    #[arg(long)]
    json: bool,
}

/// Combine the config file, an optional preset and command-line flags.
///
/// Flags win over the preset, the preset over built-in defaults.
fn build_match_config(file: &SelfplayConfig, args: MatchArgs) -> Result<MatchConfig, ConfigError> {
    let (first, second) = file.resolve_pair(&args.engine, args.opponent.as_deref());
    let mut config = MatchConfig::new(first, second);
    config.output_dir = file.output_dir.clone();

    if let Some(name) = &args.preset {
        config.apply_preset(file.get_preset(name)?)?;
    }
    if let Some(games) = args.games {
        config.games = games;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(tc) = &args.time_control {
        config.time_control = tc.parse()?;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if !args.openings.is_empty() {
        config.openings = args
            .openings
            .iter()
            .map(|line| Opening::parse(line))
            .collect::<Result<_, _>>()?;
    }
    if args.no_alternate {
        config.alternate_colors = false;
    }
    if let Some(plies) = args.max_plies {
        config.max_plies = plies;
    }
    if let Some(secs) = args.game_timeout {
        config.game_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(run_id) = args.run_id {
        config.run_id = run_id;
    }
    config.write_json = args.json;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let file = SelfplayConfig::load(&cli.config)?;

    match cli.command {
        Commands::Match(args) => {
            let config = build_match_config(&file, args)?;
            config.validate()?;

            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received, finishing games in progress");
                    let _ = stop_tx.send(true);
                }
            });

            println!(
                "Running {} games: {} vs {} ({}), records in {}",
                config.games,
                config.first.name,
                config.second.name,
                config.time_control,
                config.output_dir.display()
            );

            let summary = MatchScheduler::new(config.clone())
                .with_cancel(stop_rx)
                .run()
                .await?;

            match recorder::write_summary(&summary, &config) {
                Ok(path) => tracing::info!("Summary written to {}", path.display()),
                Err(e) => tracing::warn!("Failed to write summary: {}", e),
            }
            println!("\n{}", summary);
        }
    }

    Ok(())
}
