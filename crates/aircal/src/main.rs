use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use aircal::api::{router, AppState};
use aircal::auth::{Credentials, TokenIssuer};
use aircal::config::{AuthArgs, ModelArgs, StorageArgs, UpstreamArgs};
use aircal::qhawax::QhawaxClient;
use aircal_core::pipelines::predictions::{run_prediction_ingest, PredictionConfig};
use aircal_core::pipelines::reference::{
    run_reference_ingest, FsReferenceSource, ReferenceConfig, ReferenceOutcome,
};
use aircal_core::pipelines::serving::ServingConfig;
use aircal_core::pipelines::{DeviceOutcome, RunReport};
use aircal_core::publish::PublishedDay;
use aircal_core::window::{IngestWindow, CIVIL_ZONE};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Air-quality calibration pipelines and API server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve stored and on-demand predictions over HTTP
    Serve(ServeArgs),
    /// Fetch a day of sensor averages, calibrate and publish them
    IngestPredictions(IngestPredictionsArgs),
    /// Clean and publish the newest reference-instrument export
    IngestReference(IngestReferenceArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    bind_addr: SocketAddr,

    #[command(flatten)]
    auth: AuthArgs,

    #[command(flatten)]
    models: ModelArgs,

    #[command(flatten)]
    storage: StorageArgs,
}

#[derive(Args, Debug)]
struct IngestPredictionsArgs {
    /// Civil day to ingest (YYYY-MM-DD). Defaults to yesterday in GMT-5.
    #[arg(long)]
    day: Option<NaiveDate>,

    #[command(flatten)]
    upstream: UpstreamArgs,

    #[command(flatten)]
    models: ModelArgs,

    #[command(flatten)]
    storage: StorageArgs,
}

#[derive(Args, Debug)]
struct IngestReferenceArgs {
    /// Local mirror of the instrument's export folders.
    #[arg(long, env = "REFERENCE_EXPORT_DIR")]
    export_dir: PathBuf,

    #[command(flatten)]
    storage: StorageArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::IngestPredictions(args) => ingest_predictions(args).await,
        Command::IngestReference(args) => ingest_reference(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let models = args.models.load()?;
    let state = Arc::new(AppState {
        tokens: TokenIssuer::new(
            &args.auth.jwt_secret,
            chrono::Duration::seconds(args.auth.token_ttl_secs),
        ),
        credentials: Credentials {
            email: args.auth.api_email,
            password: args.auth.api_password,
        },
        models,
        predictions: args.storage.predictions().await?,
        reference: args.storage.reference().await?,
        serving: ServingConfig::default(),
    });

    let listener = TcpListener::bind(args.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.bind_addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state).into_make_service())
        .await
        .context("server terminated")?;
    Ok(())
}

async fn ingest_predictions(args: IngestPredictionsArgs) -> Result<()> {
    let window = match args.day {
        Some(day) => IngestWindow::for_day(day, CIVIL_ZONE),
        None => IngestWindow::previous_civil_day(Utc::now(), CIVIL_ZONE),
    }
    .context("failed to compute ingest window")?;

    let models = args.models.load()?;
    let store = args.storage.predictions().await?;
    let client = QhawaxClient::new(
        args.upstream.qhawax_api_url,
        args.upstream.qhawax_email,
        args.upstream.qhawax_password,
    );

    let report = run_prediction_ingest(
        &client,
        models.as_ref(),
        store.as_ref(),
        &window,
        &args.upstream.qhawax_device_ids,
        &PredictionConfig::default(),
    )
    .await
    .with_context(|| format!("prediction ingest for {} failed", window.day))?;

    print_run_report(&report);
    Ok(())
}

async fn ingest_reference(args: IngestReferenceArgs) -> Result<()> {
    let store = args.storage.reference().await?;
    let source = FsReferenceSource::new(&args.export_dir);

    let outcome = run_reference_ingest(&source, store.as_ref(), &ReferenceConfig::default())
        .await
        .context("reference ingest failed")?;

    match outcome {
        ReferenceOutcome::NoExport => {
            println!("No reference export found in {}", args.export_dir.display())
        }
        ReferenceOutcome::UpToDate { folder } => {
            println!("Reference export {folder} was already processed")
        }
        ReferenceOutcome::Published {
            folder,
            file_name,
            report,
            published,
        } => {
            println!(
                "Processed {file_name} from {folder}: {} rows in, {} rows out, {} values interpolated",
                report.input_rows, report.output_rows, report.interpolated
            );
            let mut passes = Table::new();
            passes.set_header(vec!["Column", "Nulls", "Rows removed", "Rows after"]);
            for pass in &report.passes {
                passes.add_row(vec![
                    pass.column.clone(),
                    pass.null_count.to_string(),
                    pass.rows_removed.to_string(),
                    pass.rows_after.to_string(),
                ]);
            }
            if !report.passes.is_empty() {
                println!("{passes}");
            }
            print_published(&published);
        }
    }
    Ok(())
}

fn print_run_report(report: &RunReport) {
    let mut devices = Table::new();
    devices.set_header(vec!["Device", "Status", "Detail"]);
    for outcome in &report.devices {
        let (status, detail) = match outcome {
            DeviceOutcome::Processed { rows, .. } => ("processed", format!("{rows} rows")),
            DeviceOutcome::Skipped { reason, .. } => ("skipped", reason.clone()),
            DeviceOutcome::Failed { error, .. } => ("failed", error.clone()),
        };
        devices.add_row(vec![
            outcome.device_id().to_string(),
            status.to_string(),
            detail,
        ]);
    }
    println!("{devices}");
    println!(
        "{} of {} devices processed",
        report.processed(),
        report.devices.len()
    );
    print_published(&report.published);
}

fn print_published(published: &[PublishedDay]) {
    let mut table = Table::new();
    table.set_header(vec!["Key", "Day", "Rows", "Action"]);
    for day in published {
        table.add_row(vec![
            day.key.clone(),
            day.day.to_string(),
            day.rows.to_string(),
            day.action.to_string(),
        ]);
    }
    println!("{table}");
}
