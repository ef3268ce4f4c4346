//! 命令行入口

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use newswire::env::{self, EnvVar};
use newswire::{ConfigManager, NewsError, NewsResult, Pipeline, RawArticle};

#[derive(Parser, Debug)]
#[command(name = "newswire", version, about = "Translate and analyze news articles")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a JSON array of articles
    Process {
        /// Input file, `-` reads stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Config file, defaults to the standard search paths
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Treat every article as urgent and skip tiering
        #[arg(long)]
        high_priority: bool,

        /// Include the daily digest in the output
        #[arg(long)]
        summary: bool,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write an example config file
    InitConfig {
        #[arg(default_value = "newswire.toml")]
        path: PathBuf,
    },

    /// Print supported environment variables
    EnvDocs,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(error) = run(cli.command).await {
        eprintln!("Error: {}", error);
        process::exit(1);
    }
}

fn init_tracing() {
    let level = env::core::LogLevel::get().unwrap_or_else(|error| {
        eprintln!("Warning: {}", error);
        "info".to_string()
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("newswire={}", level)))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command) -> NewsResult<()> {
    match command {
        Command::Process {
            input,
            config,
            high_priority,
            summary,
            output,
        } => {
            let manager = match config {
                Some(path) => ConfigManager::from_path(path)?,
                None => ConfigManager::new()?,
            };
            let pipeline = Pipeline::from_config(manager.into_config())?;

            let articles = read_articles(&input)?;
            let result = if high_priority {
                pipeline.process_high_priority(articles).await
            } else {
                pipeline.process(articles).await
            };

            let digest = summary.then(|| pipeline.summarize(&result.articles));
            let rendered = serde_json::to_string_pretty(&serde_json::json!({
                "articles": result.articles,
                "stats": result.stats,
                "summary": digest,
            }))?;

            match output {
                Some(path) => std::fs::write(&path, rendered)?,
                None => println!("{}", rendered),
            }
        }
        Command::InitConfig { path } => {
            if path.exists() {
                return Err(NewsError::Config(format!(
                    "配置文件已存在: {}",
                    path.display()
                )));
            }
            ConfigManager::generate_example_config(&path)?;
            eprintln!("Wrote {}", path.display());
        }
        Command::EnvDocs => print!("{}", env::generate_env_docs()),
    }

    Ok(())
}

fn read_articles(input: &Path) -> NewsResult<Vec<RawArticle>> {
    let content = if input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input)?
    };

    Ok(serde_json::from_str(&content)?)
}
