use std::path::PathBuf;

use anyhow::Context;
use bridge_plugin::LogLevel;
use clap::{Args, Parser, Subcommand};
use plugin_bridge::{
    bridge::Bridge,
    builtin::register_builtins,
    config::{BridgeConfig, ConfigManager, EnvConfigManager},
    host::replay_to_stdout,
    logger::init_tracing,
    schema::write_schema,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "plugin-bridge",
    about = "Route plugin.method calls from a host into plugins and back",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay host events against the built-in plugins
    Run(RunArgs),

    /// List the built-in plugins and their methods
    Plugins,

    /// Emit JSON-Schema for the host event format
    Schema(SchemaArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Host events, one JSON object per line. Reads stdin when absent.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Environment file seeding the configuration
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    #[arg(long, default_value = "schemas")]
    out: PathBuf,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs {
        env_file: PathBuf::from(".env"),
        ..Default::default()
    })) {
        Commands::Run(args) => run(args).await,
        Commands::Plugins => {
            let (bridge, _failures) = Bridge::new(BridgeConfig::default());
            register_builtins(&bridge)?;
            for plugin in bridge.plugins() {
                println!("{}: {}", plugin.name, plugin.methods.join(", "));
            }
            Ok(())
        }
        Commands::Schema(args) => {
            for path in write_schema(&args.out)? {
                println!("Schema written to {}", path.display());
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config_mgr = ConfigManager(EnvConfigManager::new(args.env_file.clone()));
    let mut config = BridgeConfig::load(&config_mgr).await?;
    if let Some(level) = args.log_level {
        config.log.log_level = level;
    }
    init_tracing(&config.log).context("could not set up logging")?;
    info!(policy = %config.duplicate_policy, "plugin bridge starting up");

    let (bridge, mut failures) = Bridge::new(config);
    register_builtins(&bridge)?;

    let reporter = tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            error!(
                invoke = %failure.invoke,
                plugin = %failure.plugin,
                method = %failure.method,
                error = %failure.error,
                "plugin method failed"
            );
        }
    });

    let summary = replay_to_stdout(bridge, args.file).await?;
    reporter.await?;

    info!(
        events = summary.events,
        scripts = summary.scripts,
        rejected = summary.rejected,
        "plugin bridge shutting down"
    );
    Ok(())
}
