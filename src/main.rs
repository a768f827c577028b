use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fieldsync::config::Config;
use fieldsync::connection::ConfigField;
use fieldsync::connectivity::Dispatch;
use fieldsync::location::{RawLocation, StaticProvider};
use fieldsync::queue::QueuedAction;
use fieldsync::store::SqliteStore;
use fieldsync::Services;
use futures::try_join;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline queue, request cache and runtime config for field-operations clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the store database (default: <data dir>/store.db)
  #[arg(long)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Apply a configuration deep link
  Configure {
    /// e.g. fieldsync://configure?key=..&host=..&socketcluster_host=..&socketcluster_port=..
    link: String,
  },
  /// Show the resolved connection config
  Config,
  /// Inspect and replay the pending action queue
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
  /// Send a mutating call, queueing it if the backend is unreachable
  Send(ActionArgs),
  /// Show tracking progress and ETAs of an order
  Track {
    order_id: String,
    /// Bypass cached values
    #[arg(long)]
    refresh: bool,
  },
  /// Record a device position
  Locate {
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
  },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List pending actions
  List,
  /// Append an action without sending it
  Push(ActionArgs),
  /// Replay all pending actions
  Drain,
  /// List actions whose replay failed
  DeadLetters,
  /// Move failed actions back into the queue
  Retry,
  /// Forget failed actions
  ClearDead,
}

#[derive(clap::Args, Debug)]
struct ActionArgs {
  /// Adapter verb (get|put|patch|post|delete) or resource method (e.g. complete)
  #[arg(short, long)]
  method: String,
  /// Endpoint relative to the API root, e.g. orders/42/complete
  #[arg(short, long, default_value = "")]
  endpoint: String,
  /// Resource type for resource methods, e.g. order
  #[arg(long, default_value = "")]
  resource_type: String,
  #[arg(long)]
  resource_id: Option<String>,
  /// JSON params
  #[arg(short, long, default_value = "{}")]
  params: String,
}

impl ActionArgs {
  fn into_action(self) -> Result<QueuedAction> {
    let params = serde_json::from_str(&self.params)
      .map_err(|e| eyre!("Invalid params JSON: {}", e))?;
    let endpoint = if self.endpoint.is_empty() {
      match (&self.resource_type, &self.resource_id) {
        (t, Some(id)) if !t.is_empty() => format!("{}s/{}", t.trim_end_matches('s'), id),
        _ => return Err(eyre!("An endpoint or a resource type and id is required")),
      }
    } else {
      self.endpoint
    };

    QueuedAction::from_parts(
      &self.method,
      &self.resource_type,
      self.resource_id.as_deref(),
      &endpoint,
      params,
    )
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = init_logging(&data_dir)?;

  let store_path = args.store.unwrap_or_else(|| data_dir.join("store.db"));
  let store = Arc::new(SqliteStore::open_at(&store_path)?);
  let services = Services::new(config, store)?;
  let tasks = services.start();

  let result = run(args.command, &services).await;
  tasks.stop().await;
  result
}

/// Log to a daily rolling file; stdout is reserved for command output.
fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "fieldsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_writer(writer)
    .with_ansi(false)
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fieldsync=info")),
    )
    .init();

  Ok(guard)
}

async fn run(command: Command, services: &Services) -> Result<()> {
  match command {
    Command::Configure { link } => {
      if services.resolver.apply_deep_link(&link)? {
        println!("Connection config updated");
      } else {
        println!("No config change");
      }
      print_config(services);
    }
    Command::Config => print_config(services),
    Command::Queue { command } => run_queue(command, services).await?,
    Command::Send(action) => {
      services.connectivity.set_online(true);
      match services.dispatcher().dispatch(action.into_action()?).await? {
        Dispatch::Sent(response) => println!("{}", serde_json::to_string_pretty(&response)?),
        Dispatch::Queued => println!("Backend unreachable, action queued"),
        Dispatch::Replayed(report) => println!(
          "Sent behind {} earlier queued actions, {} of {} succeeded",
          report.replayed().saturating_sub(1),
          report.succeeded(),
          report.replayed()
        ),
      }
    }
    Command::Track { order_id, refresh } => {
      let fleet = &services.fleet;
      let (tracker, eta) = if refresh {
        try_join!(fleet.refresh_order_tracker(&order_id), fleet.refresh_order_eta(&order_id))?
      } else {
        try_join!(fleet.order_tracker(&order_id), fleet.order_eta(&order_id))?
      };
      println!("Progress: {:.0}%", tracker.progress_percentage);
      if let Some(secs) = tracker.completion_eta {
        println!("Completion in {:.0}s", secs);
      }
      for (waypoint, secs) in &eta.waypoints {
        println!("  {:<24} {:>8.0}s", waypoint, secs);
      }
    }
    Command::Locate { lon, lat } => {
      let provider = Arc::new(StaticProvider::new(RawLocation::new(lon, lat)));
      let sync = services.location_sync(provider);
      if sync.sample().await? {
        println!("Location updated to [{}, {}]", lon, lat);
      } else {
        println!("Location unchanged");
      }
    }
  }

  Ok(())
}

async fn run_queue(command: QueueCommand, services: &Services) -> Result<()> {
  let queue = &services.queue;

  match command {
    QueueCommand::List => {
      let pending = queue.pending().await?;
      if pending.is_empty() {
        println!("Queue is empty");
      }
      for (i, action) in pending.iter().enumerate() {
        println!("{:>3}  {}  {}", i + 1, action.enqueued_at.to_rfc3339(), action);
      }
    }
    QueueCommand::Push(action) => {
      queue.enqueue(action.into_action()?).await?;
      println!("Queued ({} pending)", queue.len().await?);
    }
    QueueCommand::Drain => {
      let report = queue.drain().await?;
      for outcome in &report.outcomes {
        match &outcome.error {
          None => println!("ok      {}", outcome.action),
          Some(e) => println!("failed  {}: {}", outcome.action, e),
        }
      }
      println!(
        "{} replayed, {} succeeded, {} dead-lettered",
        report.replayed(),
        report.succeeded(),
        report.dead_lettered()
      );
    }
    QueueCommand::DeadLetters => {
      for letter in queue.dead_letters().await? {
        println!(
          "{}  {} (after {} attempts): {}",
          letter.failed_at.to_rfc3339(),
          letter.action,
          letter.attempts,
          letter.error
        );
      }
    }
    QueueCommand::Retry => println!("Re-queued {} actions", queue.retry_dead_letters().await?),
    QueueCommand::ClearDead => println!("Dropped {} actions", queue.clear_dead_letters().await?),
  }

  Ok(())
}

fn print_config(services: &Services) {
  for field in ConfigField::ALL {
    let mut value = services.resolver.resolve(field);
    if field == ConfigField::ApiKey && value.chars().count() > 8 {
      value = format!("{}…", value.chars().take(8).collect::<String>());
    }
    println!("{:<12} {}", field, value);
  }
}
