//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Librarian - Generate and release the client libraries of a language repository
#[derive(Parser, Debug)]
#[command(name = "librarian")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Regenerate libraries from new API commits and open a pull request
    Generate(commands::generate::GenerateArgs),

    /// Onboard a new API as a library and generate it
    Configure(commands::configure::ConfigureArgs),

    /// Prepare a release pull request for libraries with releasable changes
    ReleaseInit(commands::release_init::ReleaseInitArgs),

    /// Wait until a release pull request may be merged, then merge it
    MergeReleasePr(commands::merge_release_pr::MergeReleasePrArgs),

    /// Build, test and package the libraries of a merged release
    CreateReleaseArtifacts(commands::create_release_artifacts::CreateReleaseArtifactsArgs),

    /// Publish packaged release artifacts and create GitHub releases
    PublishReleaseArtifacts(commands::publish_release_artifacts::PublishReleaseArtifactsArgs),

    /// Tag and create GitHub releases for a merged release pull request
    TagAndRelease(commands::tag_and_release::TagAndReleaseArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        match self.command {
            Commands::Generate(args) => commands::generate::execute(args),
            Commands::Configure(args) => commands::configure::execute(args),
            Commands::ReleaseInit(args) => commands::release_init::execute(args),
            Commands::MergeReleasePr(args) => commands::merge_release_pr::execute(args),
            Commands::CreateReleaseArtifacts(args) => {
                commands::create_release_artifacts::execute(args)
            }
            Commands::PublishReleaseArtifacts(args) => {
                commands::publish_release_artifacts::execute(args)
            }
            Commands::TagAndRelease(args) => commands::tag_and_release::execute(args),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A logger may already be installed when running under a test harness.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .try_init();
}
