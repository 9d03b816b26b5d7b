use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use savings_sync::cache::CacheManager;
use savings_sync::clock::{Clock, SystemClock};
use savings_sync::config::Config;
use savings_sync::queue::{
  ActionId, ActionQueue, ActionType, Channel, NewAction, NotificationDraft, NotificationQueue,
};
use savings_sync::store::{LocalStore, SqliteStore};
use savings_sync::sync::{
  HttpGateway, ManualConnectivity, NetworkStatus, SubmitOutcome, SyncOptions, SyncOrchestrator,
};
use savings_sync::{SyncError, SyncInterval};

const DEFAULT_LOG_FILTER: &str = "savings_sync=info";

#[derive(Parser, Debug)]
#[command(name = "savings-sync")]
#[command(about = "Offline-first action and notification queue for savings groups")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/savings-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the device as offline: queue instead of sending
  #[arg(long)]
  offline: bool,

  /// Report the connection as metered
  #[arg(long, conflicts_with = "offline")]
  cellular: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show queue, cache and settings state
  Status,
  /// Submit an action given as JSON, e.g. '{"type":"payment","group_id":"g1",...}'
  Enqueue { json: String },
  /// Queue a notification
  Notify {
    #[arg(long)]
    channel: Channel,
    #[arg(long)]
    to: String,
    message: String,
  },
  /// List permanently failed actions and notifications
  Failed,
  /// Re-queue a failed action or notification
  Retry { id: String },
  /// Drop a queued or failed action or notification
  Discard { id: String },
  /// Drain both queues now
  Sync,
  /// Drop every cached entity
  ClearCache,
  /// Show or change sync settings
  Settings(SettingsArgs),
}

#[derive(ClapArgs, Debug)]
struct SettingsArgs {
  #[arg(long)]
  auto_sync: Option<bool>,
  #[arg(long)]
  wifi_only: Option<bool>,
  #[arg(long)]
  interval: Option<SyncInterval>,
  #[arg(long)]
  retain_days: Option<u32>,
  /// Action types to drain first (repeatable)
  #[arg(long = "prioritize")]
  prioritize: Vec<ActionType>,
  /// Remove all prioritized action types
  #[arg(long, conflicts_with = "prioritize")]
  clear_priority: bool,
}

impl SettingsArgs {
  fn is_empty(&self) -> bool {
    self.auto_sync.is_none()
      && self.wifi_only.is_none()
      && self.interval.is_none()
      && self.retain_days.is_none()
      && self.prioritize.is_empty()
      && !self.clear_priority
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = setup_tracing(&config);

  let status = if args.offline {
    NetworkStatus::Offline
  } else if args.cellular {
    NetworkStatus::Cellular
  } else {
    NetworkStatus::Wifi
  };
  let orchestrator = Arc::new(build_orchestrator(&config, status)?);

  run(args.command, &orchestrator).await
}

fn setup_tracing(config: &Config) -> Option<WorkerGuard> {
  use tracing_subscriber::prelude::*;
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(config.log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
  });

  if let Some(dir) = config.log_directory() {
    if std::fs::create_dir_all(&dir).is_ok() {
      let appender = tracing_appender::rolling::daily(&dir, "savings-sync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true),
        )
        .init();
      return Some(guard);
    }
  }

  // Fallback to stderr
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
  None
}

fn build_orchestrator(config: &Config, status: NetworkStatus) -> Result<SyncOrchestrator> {
  let store: Arc<dyn LocalStore> = Arc::new(match &config.storage.path {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  });
  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let gateway = Arc::new(HttpGateway::new(
    &config.gateway.url,
    config.gateway_timeout(),
    Config::get_api_token(),
  )?);
  let connectivity = Arc::new(ManualConnectivity::new(status));

  let actions = ActionQueue::open(Arc::clone(&store), Arc::clone(&clock))?
    .with_retry_policy(config.action_retry())
    .with_call_timeout(config.gateway_timeout());
  let notifications = NotificationQueue::open(Arc::clone(&store), Arc::clone(&clock))
    .with_retry_policy(config.notification_retry())
    .with_throttle(config.throttle())
    .with_call_timeout(config.gateway_timeout());
  let cache =
    CacheManager::new(Arc::clone(&store), Arc::clone(&clock)).with_default_ttl(config.default_ttl());

  let orchestrator = SyncOrchestrator::new(store, clock, gateway, connectivity)?
    .with_action_queue(actions)
    .with_notification_queue(notifications)
    .with_cache(cache)
    .with_options(SyncOptions {
      max_passes: config.retry.max_passes,
      backoff: config.backoff(),
      call_timeout: config.gateway_timeout(),
    });
  Ok(orchestrator)
}

async fn run(command: Command, orchestrator: &Arc<SyncOrchestrator>) -> Result<()> {
  match command {
    Command::Status => {
      let status = serde_json::json!({
        "network": orchestrator.network_status(),
        "queues": orchestrator.queue_summary()?,
        "cache": orchestrator.cache_summary()?,
        "settings": orchestrator.settings(),
      });
      print_json(&status)?;
    }
    Command::Enqueue { json } => {
      let new: NewAction =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid action JSON: {}", e))?;
      match orchestrator.submit(new).await? {
        SubmitOutcome::Applied(receipt) => {
          println!("applied (duplicate: {})", receipt.duplicate);
        }
        SubmitOutcome::Queued(action) => {
          println!("queued {} ({})", action.id, action.action_type());
        }
      }
    }
    Command::Notify {
      channel,
      to,
      message,
    } => {
      let item = orchestrator.notify(NotificationDraft::new(channel, to, message))?;
      println!("queued {} ({})", item.id, item.channel);
    }
    Command::Failed => {
      let failed = serde_json::json!({
        "actions": orchestrator.failed_actions()?,
        "notifications": orchestrator.failed_notifications()?,
      });
      print_json(&failed)?;
    }
    Command::Retry { id } => match orchestrator.retry_action(&ActionId::from(id.as_str())) {
      Ok(action) => println!("re-queued action {}", action.id),
      Err(SyncError::NotFound(_)) => {
        let item = orchestrator.retry_notification(&id)?;
        println!("re-queued notification {}", item.id);
      }
      Err(e) => return Err(e.into()),
    },
    Command::Discard { id } => match orchestrator.discard_action(&ActionId::from(id.as_str())) {
      Ok(action) => println!("discarded action {}", action.id),
      Err(SyncError::NotFound(_)) => {
        let item = orchestrator.discard_notification(&id)?;
        println!("discarded notification {}", item.id);
      }
      Err(e) => return Err(e.into()),
    },
    Command::Sync => {
      let mut progress = orchestrator.trigger_sync();
      let mut last = None;
      while let Some(session) = progress.next().await {
        println!(
          "{:>3.0}%  actions {}/{}  notifications {}/{}",
          session.progress * 100.0,
          session.actions_completed,
          session.actions_total,
          session.notifications_processed,
          session.notifications_total,
        );
        last = Some(session);
      }
      match last {
        Some(session) => info!(state = ?session.state, "Sync command finished"),
        None => println!("sync skipped ({})", orchestrator.network_status()),
      }
    }
    Command::ClearCache => {
      let removed = orchestrator.clear_cache()?;
      println!("removed {} cached entities", removed);
    }
    Command::Settings(args) => {
      if !args.is_empty() {
        let mut settings = orchestrator.settings();
        if let Some(auto_sync) = args.auto_sync {
          settings.auto_sync = auto_sync;
        }
        if let Some(wifi_only) = args.wifi_only {
          settings.sync_on_wifi_only = wifi_only;
        }
        if let Some(interval) = args.interval {
          settings.sync_interval = interval;
        }
        if let Some(days) = args.retain_days {
          settings.retain_data_days = days;
        }
        if args.clear_priority {
          settings.channel_priority.clear();
        }
        settings.channel_priority.extend(args.prioritize);
        orchestrator.update_sync_settings(settings)?;
      }
      print_json(&orchestrator.settings())?;
    }
  }

  Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", text);
  Ok(())
}
