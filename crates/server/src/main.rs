use clap::Parser;
use florafield_protocol::ServerParameters;
use florafield_server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Authoritative server for a shared, evolving flower field.
#[derive(Debug, Parser)]
#[command(name = "florafield-server", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Flower database path. Defaults to ~/.florafield/flowers.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Radius within which a viewer loads flowers.
    #[arg(long, default_value_t = 25.0)]
    flower_range: f64,

    /// Minimum separation between flowers, enforced at insertion.
    #[arg(long, default_value_t = 0.5)]
    exclusion_range: f64,

    /// Growth tick interval in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    spread_interval_ms: u64,

    /// Per-tick chance that any given flower spreads.
    #[arg(long, default_value_t = 0.1)]
    spread_fraction: f64,

    /// Cap on flowers selected per growth tick.
    #[arg(long, default_value_t = 10)]
    max_spread_updates: usize,

    /// World width in field units, centered on the origin.
    #[arg(long, default_value_t = 1000.0)]
    field_width: f64,

    /// World height in field units, centered on the origin.
    #[arg(long, default_value_t = 1000.0)]
    field_height: f64,

    /// Erase the flower database before serving.
    #[arg(long)]
    reset: bool,

    /// Plant this many random flowers at startup.
    #[arg(long)]
    seed: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".florafield")
            .join("flowers.db")
    });

    let config = ServerConfig {
        db_path,
        params: ServerParameters {
            flower_range: cli.flower_range,
            flower_exclusion_range: cli.exclusion_range,
            flower_spread_interval_ms: cli.spread_interval_ms,
            flower_spread_fraction: cli.spread_fraction,
            max_flower_updates: cli.max_spread_updates,
        },
        field_width: cli.field_width,
        field_height: cli.field_height,
        reset: cli.reset,
        seed: cli.seed,
    };

    florafield_server::serve(cli.listen, config).await
}
