mod app;
mod event;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use esg_dash::api::{DEFAULT_MIN_CONTROVERSY, DEFAULT_SEARCH_LIMIT, DEFAULT_TOP_LIMIT};
use esg_dash::config::{Config, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "esg-dash")]
#[command(about = "Terminal client for the ESG analytics and prediction API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/esg-dash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend URL, overrides the config file and ESG_DASH_API_URL
  #[arg(long)]
  api_url: Option<String>,

  /// Print pretty JSON instead of tables
  #[arg(long)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Companies ranked by total ESG risk
  Top {
    #[arg(long, default_value_t = DEFAULT_TOP_LIMIT)]
    limit: u32,
    #[arg(long, default_value_t = 1)]
    page: usize,
    /// Rows per page (default: search.page_size)
    #[arg(long)]
    page_size: Option<usize>,
  },
  /// Average ESG score per sector
  Sectors,
  /// Companies with a high controversy score
  Controversy {
    #[arg(long, default_value_t = DEFAULT_MIN_CONTROVERSY)]
    min_score: f64,
  },
  /// Full record for one company
  Company { symbol: String },
  /// Search companies by name or symbol
  Search {
    query: String,
    #[arg(long)]
    sector: Option<String>,
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    limit: u32,
  },
  /// Predict the ESG risk level for one company profile
  Predict {
    #[arg(long)]
    environment: f64,
    #[arg(long)]
    social: f64,
    #[arg(long)]
    governance: f64,
    #[arg(long)]
    controversy: f64,
    #[arg(long)]
    employees: u64,
  },
  /// Predict risk levels for every profile in a JSON file
  PredictBatch { file: PathBuf },
  /// Details of the loaded prediction model
  ModelInfo,
  /// Backend health
  Health,
  /// Search as you type, one query per input line
  Watch {
    #[arg(long)]
    sector: Option<String>,
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    limit: u32,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override API URL if specified on command line
  let config = if let Some(url) = args.api_url {
    config.with_api_url(url)?
  } else {
    config
  };

  let _guard = init_logging(&config.log)?;

  let output = if args.json {
    app::Output::Json
  } else {
    app::Output::Text
  };

  // Initialize and run the app
  let mut app = app::App::new(config, output)?;
  app.run(args.command).await?;

  Ok(())
}

/// Install the global subscriber. RUST_LOG wins over `log.level`.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(log: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&log.level))
    .map_err(|e| eyre!("Invalid log level {:?}: {}", log.level, e))?;

  match &log.file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(file);
      tracing_subscriber::registry()
        .with(filter)
        .with(
          tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer),
        )
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
      Ok(None)
    }
  }
}
