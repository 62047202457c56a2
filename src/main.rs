mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, DedupArgs, PublishArgs};
use memorialize_core::progress::run_progress;
use memorialize_core::{
    filter_duplicates, load_records, print_summary, save_records, write_json, AppConfig,
    CascadeFaceLocator, FaceFingerprinter, FaceLocator, InterruptFlag, Orchestrator,
    OutboxPublisher, SystemClock,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("memorialize=info,memorialize_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Publish(args) => run_publish(args, config),
        Command::Dedup(args) => run_dedup(args, config),
    }
}

fn run_publish(args: PublishArgs, mut config: AppConfig) -> anyhow::Result<()> {
    args.apply_overrides(&mut config);

    let locator: Arc<dyn FaceLocator> = Arc::new(
        CascadeFaceLocator::from_config(&config.detector).context("loading face cascades")?,
    );
    let fingerprinter = FaceFingerprinter::new(locator.clone(), config.detector.clone());
    let mut publisher = OutboxPublisher::new(config.publisher.outbox_dir.clone())
        .with_pacing(config.publisher.pacing());
    if config.publisher.frame_images {
        publisher = publisher.with_framing(locator);
    }

    let interrupt = InterruptFlag::new();
    let handle = interrupt.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping after the current record");
        handle.raise();
    })
    .context("installing the interrupt handler")?;

    let records = load_records(&args.records)
        .with_context(|| format!("reading records from {}", args.records.display()))?;
    info!(
        records = records.len(),
        outbox = %publisher.root().display(),
        "starting publication run"
    );

    let progress = run_progress(records.len(), !args.quiet);
    let report = Orchestrator::new(&publisher, &fingerprinter, &SystemClock, &interrupt)
        .with_caption(config.caption.clone())
        .with_progress(progress.clone())
        .run(records, &args.run_options());
    progress.finish_with_message("Run complete");

    save_records(&report.records, &args.records)
        .with_context(|| format!("writing records to {}", args.records.display()))?;
    print_summary(&report.summary);

    if let Some(path) = &args.report {
        match write_json(&report.summary, path) {
            Ok(()) => info!(path = %path.display(), "run report written"),
            Err(error) => warn!(%error, "could not write run report"),
        }
    }
    Ok(())
}

fn run_dedup(args: DedupArgs, mut config: AppConfig) -> anyhow::Result<()> {
    if let Some(dir) = &args.cascade_dir {
        config.detector.cascade_dir = dir.clone();
    }
    let locator = CascadeFaceLocator::from_config(&config.detector).context("loading face cascades")?;
    let fingerprinter = FaceFingerprinter::new(Arc::new(locator), config.detector);

    let outcome = filter_duplicates(&args.images, &fingerprinter);
    println!("Unique images:");
    for path in &outcome.unique {
        println!("  {}", path.display());
    }
    if !outcome.removed.is_empty() {
        println!("Duplicates:");
        for path in &outcome.removed {
            println!("  {}", path.display());
        }
    }
    Ok(())
}
