use clap::{Parser, Subcommand};
use rtrace_cli::{build, inspect};
use tracing::info;

#[derive(Parser)]
#[command(name = "rtrace")]
#[command(about = "rtrace - Vulkan capture to replay-program builder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mutate a capture into a replay program
    Build {
        /// Capture file to read
        #[arg(long)]
        capture: String,

        /// Replay program to write
        #[arg(short, long, default_value = "replay.rtp")]
        output: String,

        /// Configuration file path (defaults to the user or local rtrace.toml)
        #[arg(short, long)]
        config: Option<String>,

        /// Track state only, without writing a replay program
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize the commands and resources of a capture
    Inspect {
        /// Capture file to read
        #[arg(long)]
        capture: String,

        /// Number of command kinds to list
        #[arg(short, long, default_value_t = 20)]
        top: usize,
    },
}

fn main() -> anyhow::Result<()> {
    rtrace_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { capture, output, config, dry_run } => {
            let config_path = config.unwrap_or_else(rtrace_core::config::default_config_path);
            let config = rtrace_core::config::RtraceConfig::load_or_default(&config_path);
            info!("building replay program from {}", capture);
            let output = (!dry_run).then_some(output);
            let summary = build::run(&capture, output.as_deref(), &config)?;
            println!("{}", summary);
        }

        Commands::Inspect { capture, top } => {
            let report = inspect::run(&capture)?;
            report.print(top);
        }
    }

    Ok(())
}
