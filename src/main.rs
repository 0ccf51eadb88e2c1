mod app;
mod config;
mod flight;
mod llm;
mod markdown;
mod reveal;
mod session;
mod store;
mod timeline;
mod tui;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};

use app::App;
use config::{AnswerProvider, Config, HistoryBackend};
use llm::{AnswerService, MockLegalAnswerService, OpenAiAnswerService};
use session::Message;
use store::{MemorySessionStore, SessionStore, SqliteSessionStore};
use tui::Tui;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,
    #[arg(short, long, help = "Extra config file, applied after the default locations")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Ask one question and print the answer
    Ask { question: Vec<String> },
    /// List saved sessions, most recent first
    History,
    /// Print the messages of one session
    Show { session_id: String },
    /// Copy the demo sessions into the SQLite history database
    SeedDemo,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let debug_enabled = cli.debug || config.debug.unwrap_or(false);
    let command = cli.command.unwrap_or(Command::Chat);
    init_logging(debug_enabled, matches!(command, Command::Chat), &config)?;

    log::info!("IP Guardian starting...");
    log::debug!("Loaded configuration: {:?}", config);

    match command {
        Command::Chat => {
            let mut app = build_app(config).await?;
            let mut tui = Tui::new()?;
            tui.run_loop(&mut app).await?;
        }
        Command::Ask { question } => ask(config, &question.join(" ")).await?,
        Command::History => {
            let mut app = build_app(config).await?;
            app.load_initial_history().await;
            if app.sessions().is_empty() {
                println!("没有历史会话。");
            }
            let now = Utc::now();
            for summary in app.sessions() {
                println!(
                    "{}\t{}\t{}\t{}",
                    summary.id,
                    summary.title,
                    session::format_relative_time(summary.updated_at, now),
                    summary.preview
                );
            }
        }
        Command::Show { session_id } => {
            let mut app = build_app(config).await?;
            let outcome = app.select_session(&session_id).await;
            log::debug!("Select outcome for {}: {:?}", session_id, outcome);
            if app.timeline().is_empty() {
                println!("会话 {} 没有消息。", session_id);
            }
            for message in app.timeline().messages() {
                print_message(message);
            }
        }
        Command::SeedDemo => seed_demo(&config).await?,
    }

    log::info!("Application finished.");
    Ok(())
}

/// Logs go to a file while the TUI owns the terminal, stderr otherwise.
fn init_logging(debug_enabled: bool, to_file: bool, config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug_enabled { "debug" } else { "info" }),
    );
    if to_file {
        let dir = config.data_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating data directory {:?}", dir))?;
        let path = dir.join("ipguardian.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn build_answers(config: &Config) -> Result<Arc<dyn AnswerService>> {
    Ok(match config.answer.provider {
        AnswerProvider::Mock => {
            Arc::new(MockLegalAnswerService::new(Duration::from_millis(config.answer.mock_delay_ms)))
        }
        AnswerProvider::OpenAi => Arc::new(OpenAiAnswerService::from_config(&config.answer)?),
    })
}

async fn build_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    Ok(match config.history.backend {
        HistoryBackend::Memory => Arc::new(
            MemorySessionStore::demo().with_delay(Duration::from_millis(config.history.mock_delay_ms)),
        ),
        HistoryBackend::Sqlite => Arc::new(SqliteSessionStore::connect(&config.history.database_url).await?),
    })
}

async fn build_app(config: Config) -> Result<App> {
    let answers = build_answers(&config)?;
    let store = build_store(&config).await?;
    Ok(App::new(config, answers, store))
}

async fn ask(config: Config, question: &str) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question is empty");
    }
    let mut app = build_app(config).await?;
    let outcome = app.send(question).await;
    log::debug!("Ask outcome: {:?}", outcome);
    match app.timeline().messages().last() {
        Some(reply) => print_message(reply),
        None => bail!("no reply produced"),
    }
    println!("{}", tui::DISCLAIMER);
    Ok(())
}

async fn seed_demo(config: &Config) -> Result<()> {
    let store = SqliteSessionStore::connect(&config.history.database_url).await?;
    let demo = MemorySessionStore::demo();
    for summary in demo.sessions() {
        store.save_session(summary).await?;
        for message in demo.messages(&summary.id) {
            store.append_message(&summary.id, message).await?;
        }
    }
    println!("已写入 {} 个演示会话（共 {} 个）。", demo.sessions().len(), store.session_count().await?);
    store.close().await;
    Ok(())
}

fn print_message(message: &Message) {
    let label = match message.role {
        session::Role::User => "您",
        session::Role::Model => "IP Guardian",
        session::Role::System => "系统",
    };
    println!("[{}] {}", message.timestamp.with_timezone(&Local).format("%Y/%m/%d %H:%M"), label);
    println!("{}", message.content);
    for (index, citation) in message.citations().iter().enumerate() {
        println!("  [{}] {} {}", index + 1, citation.title, citation.uri);
    }
    println!();
}
