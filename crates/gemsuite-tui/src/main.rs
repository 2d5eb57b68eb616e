use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gemsuite_core::{Config, CpalSink, ImageFile, Suite};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod input;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "gemsuite")]
#[command(version, about = "Chat, image analysis and storytelling with Google Gemini")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the reply
    Chat {
        /// Your message
        message: String,
    },
    /// Describe an image
    Analyze {
        /// Path to the image
        image: PathBuf,
        /// What to ask about the image
        #[arg(short, long)]
        prompt: Option<String>,
    },
    /// Write a story opening inspired by an image
    Story {
        /// Path to the image
        image: PathBuf,
        /// Read the story aloud when done
        #[arg(short, long)]
        speak: bool,
    },
    /// Read text aloud
    Speak {
        /// Text to narrate
        text: String,
    },
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The TUI owns the terminal, so logs go to a file next to the config.
fn init_file_logging(config_path: &std::path::Path) -> Result<PathBuf> {
    let dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;
    let log_path = dir.join("gemsuite.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(log_path)
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to read config {}", config_path.display()))?;

    match cli.command {
        None => {
            let log_path = init_file_logging(&config_path)?;
            info!(log = %log_path.display(), "starting gemsuite {}", env!("CARGO_PKG_VERSION"));
            run_tui(config, config_path).await
        }
        Some(command) => {
            init_stderr_logging();
            let suite = Suite::from_config(&config).context(
                "No Gemini API key. Set GEMINI_API_KEY or run `gemsuite` and press K to save one",
            )?;
            match command {
                Commands::Chat { message } => chat_once(&suite, &message).await,
                Commands::Analyze { image, prompt } => {
                    analyze_once(&suite, &image, prompt.as_deref().unwrap_or("")).await
                }
                Commands::Story { image, speak } => story_once(&suite, &image, speak).await,
                Commands::Speak { text } => speak_once(&suite, &text).await,
            }
        }
    }
}

async fn run_tui(config: Config, config_path: PathBuf) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(config, config_path, events.sender(), Arc::new(CpalSink::new()));
    if app.suite.is_none() {
        app.open_api_key_popup();
    }

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event)?,
                None => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    app.shutdown();
    info!("exiting");
    result
}

async fn chat_once(suite: &Suite, message: &str) -> Result<()> {
    let mut session = suite.new_chat_session();
    let mut printed = 0;
    let mut stdout = std::io::stdout();

    session
        .send_message_stream(suite.client(), message, |so_far| {
            // Each update carries the whole reply; print only the new tail
            let _ = write!(stdout, "{}", &so_far[printed..]);
            let _ = stdout.flush();
            printed = so_far.len();
        })
        .await?;
    println!();
    Ok(())
}

async fn analyze_once(suite: &Suite, image: &std::path::Path, prompt: &str) -> Result<()> {
    let file = ImageFile::from_path(image)?;
    let analysis = suite.analyze_image(&file, prompt).await?;
    println!("{}", analysis);
    Ok(())
}

async fn story_once(suite: &Suite, image: &std::path::Path, speak: bool) -> Result<()> {
    let file = ImageFile::from_path(image)?;
    let story = suite.generate_story(&file).await?;
    println!("{}", story);
    if speak {
        suite.speak_text(Arc::new(CpalSink::new()), &story).await?;
    }
    Ok(())
}

async fn speak_once(suite: &Suite, text: &str) -> Result<()> {
    suite.speak_text(Arc::new(CpalSink::new()), text).await?;
    Ok(())
}
