use clap::{Args, Parser, Subcommand};
use memorialize_core::{AppConfig, RunOptions, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "memorialize", version)]
#[command(about = "Publishes memorial posts for casualty records, once each, without duplicate photos")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish the built posts of a record batch
    Publish(PublishArgs),
    /// Show which of the given images would be dropped as duplicates
    Dedup(DedupArgs),
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// JSON file holding the record batch; rewritten after the run
    #[arg(long, env = "MEMORIALIZE_RECORDS")]
    pub records: PathBuf,

    /// Maximal number of posts to publish
    #[arg(long)]
    pub posts_limit: Option<usize>,

    /// Minimal number of images a post needs to be published
    #[arg(long)]
    pub min_images: Option<usize>,

    /// Publish posts only for records whose name contains one of these
    #[arg(long, num_args = 1..)]
    pub names: Vec<String>,

    /// Mark posts as tested instead of published
    #[arg(long)]
    pub test: bool,

    /// Prepare the posts without exporting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Outbox directory (overrides config file)
    #[arg(long)]
    pub outbox: Option<PathBuf>,

    /// Directory with the face cascade XML files (overrides config file)
    #[arg(long)]
    pub cascade_dir: Option<PathBuf>,

    /// Skip the random wait before each post
    #[arg(long)]
    pub no_pacing: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl PublishArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            posts_limit: self.posts_limit,
            min_images: self.min_images,
            names: self.names.clone(),
            test_mode: self.test,
            dry_run: self.dry_run,
        }
    }

    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(outbox) = &self.outbox {
            config.publisher.outbox_dir = outbox.clone();
        }
        if let Some(dir) = &self.cascade_dir {
            config.detector.cascade_dir = dir.clone();
        }
        if self.no_pacing {
            config.publisher.pacing_min_seconds = 0;
            config.publisher.pacing_max_seconds = 0;
        }
    }
}

#[derive(Debug, Args)]
pub struct DedupArgs {
    /// Images in discovery order; the first of each look-alike group is kept
    #[arg(required = true, num_args = 1..)]
    pub images: Vec<PathBuf>,

    /// Directory with the face cascade XML files (overrides config file)
    #[arg(long)]
    pub cascade_dir: Option<PathBuf>,
}
