//! CLI binary for cloud-instance crate.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cloud_instance::{CloudError, CloudInstance, CloudProvider, Config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloud-instance")]
#[command(
    author,
    version,
    about = "Detect the cloud provider and characterize this instance's disks"
)]
struct Cli {
    /// Explicitly specify the cloud provider instead of auto-detecting
    #[arg(short, long, global = true)]
    provider: Option<CloudProvider>,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the current cloud provider
    Detect,

    /// Print the characterized instance
    Profile {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List local and remote disks
    Disks,

    /// Evaluate whether the instance is recommended for local-disk workloads
    Recommend,

    /// Print the instance's user data
    UserData {
        /// Maximum size in bytes to accept (fails if exceeded)
        #[arg(short, long)]
        max_size: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn instance(
    provider: Option<CloudProvider>,
    config: &Config,
) -> Result<CloudInstance, CloudError> {
    match provider {
        Some(provider) => CloudInstance::for_provider(provider, config),
        None => CloudInstance::detect_with_config(config).await,
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CloudError> {
    let mut config = Config::default();

    match cli.command {
        Commands::Detect => {
            let instance = instance(cli.provider, &config).await?;
            println!("{}", instance.provider());
        }

        Commands::Profile { json } => {
            let instance = instance(cli.provider, &config).await?;
            let profile = instance.profile().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("provider:      {}", profile.provider);
                println!("instance type: {}", profile.instance_type);
                println!("class:         {}", profile.instance_class);
                println!("size:          {}", profile.instance_size);
                println!("cpus:          {}", profile.host.cpu_count);
                println!("memory:        {:.1} GB", profile.host.memory_gb());
                println!("disk count:    {}", profile.disk_count);
                println!("snitch:        {}", profile.provider.endpoint_snitch());
            }
        }

        Commands::Disks => {
            let instance = instance(cli.provider, &config).await?;
            for disk in instance.local_disks().await? {
                println!("local  {}", disk);
            }
            for disk in instance.remote_disks().await? {
                println!("remote {}", disk);
            }
        }

        Commands::Recommend => {
            let instance = instance(cli.provider, &config).await?;
            let verdict = instance.recommendation().await?;
            if !verdict.recommended {
                println!("not recommended");
                return Ok(ExitCode::FAILURE);
            }
            println!("recommended");
        }

        Commands::UserData { max_size } => {
            if let Some(size) = max_size {
                config = config.with_max_size(size);
            }
            let instance = instance(cli.provider, &config).await?;
            print!("{}", instance.user_data().await?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
