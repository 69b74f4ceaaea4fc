mod cache;
mod config;
mod logging;
mod met;
mod orchestrator;
mod query;

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cache::{open_backend, SystemClock};
use met::cache::CatalogCaches;
use met::client::MetClient;
use met::types::{Lookup, ObjectRecord};
use orchestrator::QueryOrchestrator;
use query::{QueryParams, QueryView, SearchBy};

#[derive(Parser, Debug)]
#[command(name = "metscope")]
#[command(about = "Browse the Met Museum collection from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./metscope.yaml, then $XDG_CONFIG_HOME/metscope/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also print logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List objects, optionally narrowed by filters
  Browse {
    #[command(flatten)]
    filters: Filters,
  },
  /// Search objects by text
  Search {
    query: String,
    /// Field the query targets
    #[arg(long, value_enum, default_value_t = SearchBy::All)]
    by: SearchBy,
    #[command(flatten)]
    filters: Filters,
  },
  /// Show objects in detail
  Show {
    #[arg(required = true)]
    ids: Vec<u64>,
  },
  /// List departments
  Departments,
  /// Manage the local cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop every cached page and object
  Clear,
}

#[derive(ClapArgs, Debug)]
struct Filters {
  /// Department id
  #[arg(short, long)]
  department: Option<u64>,
  /// Only objects with images
  #[arg(long)]
  images: bool,
  /// Only highlighted objects
  #[arg(long)]
  highlight: bool,
  /// Only public-domain objects
  #[arg(long)]
  open_access: bool,
  /// Only objects currently in a gallery
  #[arg(long)]
  on_view: bool,
  /// Result page, starting at 1
  #[arg(short, long, default_value_t = 1)]
  page: u32,
}

impl Filters {
  fn into_params(self, query: Option<String>, search_by: SearchBy) -> QueryParams {
    QueryParams {
      page: self.page,
      department_id: self.department,
      query,
      search_by,
      has_images: self.images.then_some(true),
      is_highlight: self.highlight.then_some(true),
      open_access: self.open_access.then_some(true),
      is_on_view: self.on_view.then_some(true),
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.verbose)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let backend = open_backend(&config.cache);
  info!("Using {} cache backend", backend.name());
  let caches = CatalogCaches::new(backend, config.cache.policy(), Arc::new(SystemClock));

  let client = Arc::new(MetClient::new(&config.api)?);
  let orchestrator = QueryOrchestrator::new(client, caches.clone());

  let outcome = run(&orchestrator, args.command).await;

  orchestrator.teardown();
  caches.flush();
  outcome
}

async fn run(orchestrator: &QueryOrchestrator<MetClient>, command: Command) -> Result<()> {
  match command {
    Command::Browse { filters } => {
      list(orchestrator, filters.into_params(None, SearchBy::All)).await
    }
    Command::Search { query, by, filters } => {
      list(orchestrator, filters.into_params(Some(query), by)).await
    }
    Command::Show { ids } => show(orchestrator, &ids).await,
    Command::Departments => {
      let departments = orchestrator
        .departments()
        .await
        .map_err(|e| eyre!("Failed to fetch departments: {}", e))?;
      for department in departments {
        println!("{:>4}  {}", department.id, department.display_name);
      }
      Ok(())
    }
    Command::Cache {
      action: CacheAction::Clear,
    } => {
      let caches = orchestrator.caches();
      let pages = caches.lists.store().len();
      let objects = caches.details.store().len();
      caches.reset();
      if caches.lists.store().is_empty() && caches.details.store().is_empty() {
        println!("Cache cleared ({} pages, {} objects)", pages, objects);
        Ok(())
      } else {
        Err(eyre!("Cache still holds entries after clearing"))
      }
    }
  }
}

async fn list(orchestrator: &QueryOrchestrator<MetClient>, params: QueryParams) -> Result<()> {
  let view = orchestrator.update(params).await;
  print_view(&view)?;

  // Warm the cache for the next page
  if view.is_ready() && u64::from(view.page) < view.page_count() {
    orchestrator.prefetch_page(view.page + 1).await;
  }
  Ok(())
}

async fn show(orchestrator: &QueryOrchestrator<MetClient>, ids: &[u64]) -> Result<()> {
  // Fetch every object at once, then print from the cache in order
  let warm = ids.iter().map(|id| orchestrator.prefetch_detail(*id));
  future::join_all(warm).await;

  let mut missing = 0;
  for (i, id) in ids.iter().enumerate() {
    if i > 0 {
      println!();
    }
    match orchestrator.object_detail(*id).await {
      Ok(Lookup::Found(record)) => print_record(&record),
      Ok(Lookup::NotFound) => {
        println!("Object {} not found", id);
        missing += 1;
      }
      Err(e) if e.is_validation() => return Err(eyre!("{}", e)),
      Err(e) => return Err(eyre!("Failed to fetch object {}: {}", id, e)),
    }
  }
  if missing == ids.len() {
    return Err(eyre!("No objects found"));
  }
  Ok(())
}

fn print_view(view: &QueryView) -> Result<()> {
  if let Some(message) = view.error() {
    return Err(eyre!("{}", message));
  }
  if view.is_not_found() {
    println!("Object not found");
    return Ok(());
  }
  if view.is_empty() {
    println!("No results");
    return Ok(());
  }

  let records = view.visible_records();
  println!(
    "Page {} of {} ({} results)",
    view.page,
    view.page_count().max(1),
    view.total
  );
  for record in &records {
    println!(
      "{:>8}  {}  {}",
      record.object_id,
      record.title,
      record.artist().unwrap_or("Unknown artist")
    );
  }
  if view.on_view_only && records.is_empty() {
    println!("Nothing on this page is currently on view");
  }
  Ok(())
}

fn print_record(record: &ObjectRecord) {
  println!("{} ({})", record.title, record.object_id);
  let fields = [
    ("Artist", record.artist()),
    ("Date", record.object_date.as_deref()),
    ("Culture", record.culture.as_deref()),
    ("Medium", record.medium.as_deref()),
    ("Dimensions", record.dimensions.as_deref()),
    ("Department", record.department.as_deref()),
    ("Classification", record.classification.as_deref()),
    ("Credit", record.credit_line.as_deref()),
    ("Gallery", record.gallery_number.as_deref()),
    ("Image", record.primary_image.as_deref()),
    ("Link", record.object_url.as_deref()),
  ];
  for (label, value) in fields {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
      println!("  {:<15}{}", label, value);
    }
  }
  if !record.tags.is_empty() {
    println!("  {:<15}{}", "Tags", record.tags.join(", "));
  }
  if record.is_public_domain {
    println!("  Public domain");
  }
}
