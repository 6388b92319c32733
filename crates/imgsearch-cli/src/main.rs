use std::io::{BufRead, BufReader, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use imgsearch_core::host::recording::RecordingHost;
use imgsearch_core::{
    Background, BackgroundEvent, EngineTable, FileOptions, OptionsSource, Platform, RuntimeConfig,
};
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// Reverse image search orchestration, driven from the terminal
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Browser family to behave as
    #[arg(long, value_enum, global = true, default_value_t = PlatformArg::Chrome)]
    platform: PlatformArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    Firefox,
    Chrome,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Firefox => Platform::Firefox,
            PlatformArg::Chrome => Platform::Chrome,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the enabled engines in display order
    Engines {
        /// Options file (default: config dir overlaid by ./.imgsearch.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show the context menu and toolbar action the options produce
    Plan {
        /// Options file (default: config dir overlaid by ./.imgsearch.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Feed a JSON-lines event script through the background core
    Replay {
        /// One background event per line
        events: PathBuf,

        /// Options file (default: config dir overlaid by ./.imgsearch.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Treat every page as restricted
        #[arg(long)]
        deny_scripts: bool,
    },
}

/// Color only when asked for and writing to a terminal.
fn color_mode(no_color: bool) -> ColorMode {
    ColorMode(!no_color && std::io::stdout().is_terminal())
}

fn options_source(config: Option<PathBuf>) -> FileOptions {
    match config {
        Some(path) => FileOptions::at(path),
        None => FileOptions::cascade(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let platform = Platform::from(cli.platform);

    match cli.command {
        Command::Engines { config, no_color } => engines(options_source(config), no_color),
        Command::Plan { config, no_color } => plan(options_source(config), platform, no_color),
        Command::Replay {
            events,
            config,
            no_color,
            deny_scripts,
        } => replay(events, options_source(config), platform, no_color, deny_scripts).await,
    }
}

fn engines(source: FileOptions, no_color: bool) -> anyhow::Result<()> {
    let options = source.read()?;
    let table = EngineTable::builtin();
    let enabled = options.enabled_engines(&table);
    let mut stdout = std::io::stdout();
    output::print_engines(&mut stdout, &enabled, &table, color_mode(no_color))?;
    Ok(())
}

fn plan(source: FileOptions, platform: Platform, no_color: bool) -> anyhow::Result<()> {
    let options = source.read()?;
    let plan = imgsearch_core::ui_sync::plan(&options, &EngineTable::builtin(), platform);
    let mut stdout = std::io::stdout();
    output::print_plan(&mut stdout, &plan, color_mode(no_color))?;
    Ok(())
}

async fn replay(
    events: PathBuf,
    source: FileOptions,
    platform: Platform,
    no_color: bool,
    deny_scripts: bool,
) -> anyhow::Result<()> {
    if !events.exists() {
        anyhow::bail!("Event script not found: {}", events.display());
    }
    // Fail early on a broken options file instead of on the first event.
    source.read()?;

    let color = color_mode(no_color);
    let recorder = Arc::new(RecordingHost::new());
    if deny_scripts {
        recorder.deny_all_scripts();
    }
    let options: Arc<dyn OptionsSource> = Arc::new(source);
    let config = RuntimeConfig {
        platform,
        ..RuntimeConfig::default()
    };
    let background = Background::new(recorder.host(options), config);

    let mut stdout = std::io::stdout();
    let plan = background.start().await?;
    writeln!(
        stdout,
        "Installed {} menu item(s); action: {}",
        plan.menu.len(),
        plan.action.popup.as_deref().unwrap_or("click handler")
    )?;
    recorder.take_calls();

    let reader = BufReader::new(std::fs::File::open(&events)?);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: BackgroundEvent = serde_json::from_str(trimmed)
            .map_err(|e| anyhow::anyhow!("{}:{}: {}", events.display(), i + 1, e))?;

        tracing::debug!(line = i + 1, event = event.name(), "replaying event");
        writeln!(stdout)?;
        output::print_event_header(&mut stdout, i + 1, event.name(), color)?;
        let outcome = background.handle(event).await.map_err(|e| e.to_string());
        for call in recorder.take_calls() {
            output::print_call(&mut stdout, &call, color)?;
        }
        output::print_outcome(&mut stdout, &outcome, color)?;
    }

    background.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_color_is_accepted_by_every_subcommand() {
        for args in [
            &["imgsearch", "engines", "--no-color"][..],
            &["imgsearch", "plan", "--no-color"],
            &["imgsearch", "replay", "events.jsonl", "--no-color"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            let no_color = match cli.command {
                Command::Engines { no_color, .. }
                | Command::Plan { no_color, .. }
                | Command::Replay { no_color, .. } => no_color,
            };
            assert!(no_color);
        }
        assert!(!color_mode(true).0);
    }

    #[test]
    fn scripts_are_allowed_unless_denied() {
        let cli = Cli::try_parse_from(["imgsearch", "replay", "events.jsonl"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Replay {
                deny_scripts: false,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["imgsearch", "replay", "e.jsonl", "--allow-scripts"]).is_err());
    }
}
