use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use esg_dash::api::{
  BatchPredictionRequest, CachedEsgClient, Company, CompanyDetail, ControversyCompany, Health,
  ModelInfo, Prediction, PredictionRequest, SectorAverage,
};
use esg_dash::cache::CacheResult;
use esg_dash::config::Config;
use esg_dash::debounce::Debouncer;
use esg_dash::pagination::{PaginationConfig, PaginationState, Paginator};
use esg_dash::query::Query;

use crate::event::{Event, EventHandler};
use crate::Command;

/// How often the watch loop polls its query for changes
const TICK_RATE: Duration = Duration::from_millis(100);

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
  Text,
  Json,
}

/// Terminal client state
pub struct App {
  config: Config,
  client: CachedEsgClient,
  output: Output,
}

impl App {
  pub fn new(config: Config, output: Output) -> Result<Self> {
    let client = CachedEsgClient::new(&config)?;
    Ok(Self {
      config,
      client,
      output,
    })
  }

  /// Run one command to completion.
  pub async fn run(&mut self, command: Command) -> Result<()> {
    let janitor = self.client.spawn_janitor(&self.config);
    let result = self.dispatch(command).await;
    janitor.abort();
    result
  }

  async fn dispatch(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Top {
        limit,
        page,
        page_size,
      } => {
        let companies = self.client.top_companies(limit).await?;
        let page_size = page_size.unwrap_or(self.config.search.page_size);
        let paginator = Paginator::new(PaginationConfig {
          initial_page: page,
          page_size,
          total_items: companies.len(),
        });
        self.emit(&PageView::new(&paginator, companies.as_slice()), || {
          render_companies(paginator.slice(companies.as_slice()), Some(&paginator.state()))
        })
      }
      Command::Sectors => {
        let sectors = self.client.sector_averages().await?;
        self.emit(sectors.as_slice(), || render_sectors(&sectors))
      }
      Command::Controversy { min_score } => {
        let companies = self.client.high_controversy(min_score).await?;
        self.emit(companies.as_slice(), || render_controversy(&companies))
      }
      Command::Company { symbol } => {
        let detail = self.client.company(&symbol).await?;
        self.emit(&*detail, || render_detail(&detail))
      }
      Command::Search {
        query,
        sector,
        limit,
      } => {
        let companies = self
          .client
          .search_companies(&query, sector.as_deref(), limit)
          .await?;
        self.emit(companies.as_slice(), || render_companies(&companies, None))
      }
      Command::Predict {
        environment,
        social,
        governance,
        controversy,
        employees,
      } => {
        let request = PredictionRequest {
          environment_risk_score: environment,
          social_risk_score: social,
          governance_risk_score: governance,
          controversy_score: controversy,
          full_time_employees: employees,
        };
        let prediction = self.client.predict(&request).await?;
        self.emit(&prediction, || render_prediction(&prediction))
      }
      Command::PredictBatch { file } => {
        let request = load_batch(&file)?;
        let batch = self.client.predict_batch(&request).await?;
        self.emit(&batch, || {
          let mut out = String::new();
          for (i, prediction) in batch.predictions.iter().enumerate() {
            let _ = writeln!(out, "#{:<4} {}", i + 1, render_prediction(prediction).trim_end());
          }
          let _ = writeln!(out, "{} predictions", batch.count);
          out
        })
      }
      Command::ModelInfo => {
        let info = self.client.model_info().await?;
        self.emit(&*info, || render_model_info(&info))
      }
      Command::Health => {
        let health = self.client.health().await?;
        self.emit(&health, || render_health(&health))
      }
      Command::Watch { sector, limit } => self.watch(sector, limit).await,
    }
  }

  /// Search-as-you-type over input lines.
  ///
  /// Each line replaces the search text; once the text settles it keys a
  /// cached search whose results are printed whenever they change.
  async fn watch(&mut self, sector: Option<String>, limit: u32) -> Result<()> {
    let debouncer = Debouncer::new(String::new(), self.config.debounce_delay());
    let mut settled = debouncer.subscribe();
    let mut events = EventHandler::stdin(TICK_RATE);
    let mut query: Option<Query<Vec<Company>>> = None;

    eprintln!("Type to search, Ctrl-D to quit.");

    loop {
      tokio::select! {
        event = events.next() => match event {
          Some(Event::Line(line)) => debouncer.set(line),
          Some(Event::Tick) => {
            if let Some(query) = query.as_mut() {
              if query.poll() {
                self.show_search(&query.read());
              }
            }
          }
          Some(Event::Eof) | None => {
            let cancelled = self.client.cancel_all();
            debug!(cancelled, "Input closed, cancelling pending requests");
            break;
          }
        },
        Ok(()) = settled.changed() => {
          let text = settled.borrow_and_update().trim().to_string();
          if text.is_empty() {
            query = None;
            continue;
          }
          info!(query = %text, "Searching");
          let mut next = self.client.search_query(&text, sector.as_deref(), limit);
          self.show_search(&next.read());
          // Already shown, skip the fetch-start notice on the next tick
          next.poll();
          query = Some(next);
        }
      }
    }

    Ok(())
  }

  fn show_search(&self, result: &CacheResult<Vec<Company>>) {
    if result.is_loading() {
      eprintln!("Searching...");
      return;
    }
    if let Some(error) = result.error.as_ref().filter(|e| e.is_user_visible()) {
      eprintln!("Error: {}", error);
    }
    let Some(companies) = &result.data else {
      return;
    };
    let paginator = Paginator::new(PaginationConfig {
      initial_page: 1,
      page_size: self.config.search.page_size,
      total_items: companies.len(),
    });
    let printed = self.emit(&PageView::new(&paginator, companies.as_slice()), || {
      render_companies(paginator.slice(companies.as_slice()), Some(&paginator.state()))
    });
    if let Err(e) = printed {
      eprintln!("Error: {}", e);
    }
  }

  fn emit<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    match self.output {
      Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
      Output::Text => print!("{}", text()),
    }
    Ok(())
  }
}

/// One page of a listing, for JSON output
#[derive(Serialize)]
struct PageView<'a, T> {
  page: usize,
  total_pages: usize,
  total_items: usize,
  items: &'a [T],
}

impl<'a, T> PageView<'a, T> {
  fn new(paginator: &Paginator, items: &'a [T]) -> Self {
    Self {
      page: paginator.page(),
      total_pages: paginator.total_pages(),
      total_items: paginator.total_items(),
      items: paginator.slice(items),
    }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
  Wrapped(BatchPredictionRequest),
  Items(Vec<PredictionRequest>),
}

/// Read a batch from a JSON file, either `{"items": [...]}` or a bare array.
fn load_batch(path: &Path) -> Result<BatchPredictionRequest> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read batch file {}: {}", path.display(), e))?;
  let batch: BatchFile = serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse batch file {}: {}", path.display(), e))?;
  Ok(match batch {
    BatchFile::Wrapped(request) => request,
    BatchFile::Items(items) => BatchPredictionRequest { items },
  })
}

// ============================================================================
// Text rendering
// ============================================================================

fn render_companies(companies: &[Company], page: Option<&PaginationState>) -> String {
  let mut out = String::new();
  if companies.is_empty() {
    out.push_str("No companies found\n");
    return out;
  }
  let _ = writeln!(out, "{:<8} {:<36} {:<24} {:>9}", "SYMBOL", "NAME", "SECTOR", "ESG RISK");
  for c in companies {
    let _ = writeln!(
      out,
      "{:<8} {:<36} {:<24} {:>9.2}",
      c.symbol,
      truncate(&c.name, 36),
      truncate(&c.sector, 24),
      c.total_esg_risk_score
    );
  }
  if let Some(page) = page {
    if let Some(end) = page.end_index {
      let _ = writeln!(
        out,
        "Page {}/{} ({}-{} of {})",
        page.page,
        page.total_pages,
        page.start_index + 1,
        end + 1,
        page.total_items
      );
    }
  }
  out
}

fn render_sectors(sectors: &[SectorAverage]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<28} {:>9} {:>9}", "SECTOR", "AVG ESG", "COMPANIES");
  for s in sectors {
    let _ = writeln!(
      out,
      "{:<28} {:>9.2} {:>9}",
      truncate(&s.sector, 28),
      s.avg_esg_score,
      s.company_count
    );
  }
  out
}

fn render_controversy(companies: &[ControversyCompany]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<8} {:<36} {:>6}  {}", "SYMBOL", "NAME", "SCORE", "LEVEL");
  for c in companies {
    let _ = writeln!(
      out,
      "{:<8} {:<36} {:>6.1}  {}",
      c.symbol,
      truncate(&c.name, 36),
      c.controversy_score,
      c.controversy_level
    );
  }
  out
}

fn render_detail(detail: &CompanyDetail) -> String {
  let score = |v: Option<f64>| v.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "-".into());
  let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());

  let mut out = String::new();
  let _ = writeln!(out, "{} ({})", detail.name, detail.symbol);
  let _ = writeln!(out, "  Sector:       {}", detail.sector);
  let _ = writeln!(out, "  Industry:     {}", text(&detail.industry));
  let _ = writeln!(out, "  Total risk:   {}", score(detail.total_esg_risk_score));
  let _ = writeln!(out, "  Environment:  {}", score(detail.environment_risk_score));
  let _ = writeln!(out, "  Social:       {}", score(detail.social_risk_score));
  let _ = writeln!(out, "  Governance:   {}", score(detail.governance_risk_score));
  let _ = writeln!(
    out,
    "  Controversy:  {} ({})",
    score(detail.controversy_score),
    text(&detail.controversy_level)
  );
  let _ = writeln!(out, "  Risk level:   {}", text(&detail.esg_risk_level));
  out
}

fn render_prediction(prediction: &Prediction) -> String {
  let probabilities = prediction
    .probabilities
    .iter()
    .map(|(class, p)| format!("{}={:.2}", class, p))
    .collect::<Vec<_>>()
    .join(" ");
  format!(
    "{:<8} confidence {:.2}  {}\n",
    prediction.risk_level, prediction.confidence, probabilities
  )
}

fn render_model_info(info: &ModelInfo) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "Status:   {}", info.status);
  let _ = writeln!(out, "Type:     {}", info.model_type);
  let _ = writeln!(out, "Device:   {}", info.device);
  let _ = writeln!(out, "Classes:  {}", info.classes.join(", "));
  let _ = writeln!(out, "Features: {}", info.features.join(", "));
  out
}

fn render_health(health: &Health) -> String {
  let status_of = |v: &serde_json::Value| {
    v.get("status")
      .and_then(|s| s.as_str())
      .unwrap_or("unknown")
      .to_string()
  };
  let mut out = String::new();
  let _ = writeln!(
    out,
    "{} (version {}, {})",
    health.status, health.version, health.environment
  );
  let _ = writeln!(out, "  database: {}", status_of(&health.database));
  let _ = writeln!(out, "  cache:    {}", status_of(&health.cache));
  out
}

fn truncate(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
  }
}
