use std::path::PathBuf;

use bank::models::Category;
use clap::Parser;
use process::{Forecaster, MockPredictor, RemoteModel};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Ledger file, updated in place
    ledger: PathBuf,

    /// Donor account email
    donor: String,

    /// Days to forecast, starting today
    days: u32,

    #[arg(long, default_value = "other")]
    category: String,

    /// External model server; the mock predictor is used when absent
    #[arg(long, env = "MODEL_URL")]
    model_url: Option<String>,

    /// Seed for the mock predictor
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let forecaster = match (args.model_url.as_deref(), args.seed) {
        (Some(url), _) => Forecaster::Remote(RemoteModel::new(url)?),
        (None, Some(seed)) => Forecaster::Mock(MockPredictor::seeded(seed)),
        (None, None) => Forecaster::Mock(MockPredictor::new()),
    };

    process::load_forecasts(
        &args.ledger,
        &args.donor,
        args.days,
        Category::from(args.category.as_str()),
        &forecaster,
    )
    .await
}
