mod api;
mod app;
mod config;
mod proxy;
mod push;
mod store;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;

use store::{SortField, SortOrder};

#[derive(Parser, Debug)]
#[command(name = "cerita")]
#[command(about = "A terminal client for the Dicoding Story API with an offline-first local store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cerita/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create a new account
  Register {
    name: String,
    email: String,
    password: String,
  },
  /// Sign in and persist the session token
  Login { email: String, password: String },
  /// Submit a story; kept locally for later sync when the API is down
  Add {
    description: String,
    /// Photo to attach
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    lat: Option<f64>,
    #[arg(long)]
    lon: Option<f64>,
    /// Skip the submission attempt and store the story unsynced
    #[arg(long)]
    offline: bool,
  },
  /// List stories from the API, hydrating the local store
  List {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    size: u32,
  },
  /// Browse stories in the local store
  Saved {
    /// Case-insensitive substring match over name and description
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum, default_value = "created-at")]
    sort: SortArg,
    #[arg(long, value_enum, default_value = "desc")]
    order: OrderArg,
    /// Only stories not yet accepted by the API
    #[arg(long)]
    unsynced: bool,
  },
  /// Show one story, falling back to the local store when offline
  Detail { id: String },
  /// Push unsynced local stories to the API
  Sync,
  /// Delete one story from the local store
  Remove { id: String },
  /// Delete every story from the local store
  Clear,
  /// Prefetch the configured shell assets into the cache
  Prefetch,
  /// Decode a push payload and show the resulting notification
  Notify {
    /// JSON payload file (stdin when omitted)
    #[arg(long)]
    payload: Option<PathBuf>,
  },
  /// Register a push subscription for this account
  Subscribe {
    endpoint: String,
    #[arg(long)]
    p256dh: String,
    #[arg(long)]
    auth: String,
  },
  /// Remove a push subscription
  Unsubscribe { endpoint: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
  CreatedAt,
  Name,
  Description,
}

impl From<SortArg> for SortField {
  fn from(arg: SortArg) -> Self {
    match arg {
      SortArg::CreatedAt => SortField::CreatedAt,
      SortArg::Name => SortField::Name,
      SortArg::Description => SortField::Description,
    }
  }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
  Asc,
  Desc,
}

impl From<OrderArg> for SortOrder {
  fn from(arg: OrderArg) -> Self {
    match arg {
      OrderArg::Asc => SortOrder::Asc,
      OrderArg::Desc => SortOrder::Desc,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let app = app::App::new(config)?;

  match args.command {
    Command::Register {
      name,
      email,
      password,
    } => app.register(&name, &email, &password).await,
    Command::Login { email, password } => app.login(&email, &password).await,
    Command::Add {
      description,
      photo,
      lat,
      lon,
      offline,
    } => app.add(&description, &photo, lat, lon, offline).await,
    Command::List { page, size } => app.list(page, size).await,
    Command::Saved {
      search,
      sort,
      order,
      unsynced,
    } => app.saved(search.as_deref(), sort.into(), order.into(), unsynced),
    Command::Detail { id } => app.detail(&id).await,
    Command::Sync => app.sync().await,
    Command::Remove { id } => app.remove(&id),
    Command::Clear => app.clear(),
    Command::Prefetch => app.prefetch().await,
    Command::Notify { payload } => app.notify(payload.as_deref()),
    Command::Subscribe {
      endpoint,
      p256dh,
      auth,
    } => app.subscribe(&endpoint, &p256dh, &auth).await,
    Command::Unsubscribe { endpoint } => app.unsubscribe(&endpoint).await,
  }
}
