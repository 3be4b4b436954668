use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use claude_split_proxy::config::{default_config_path, ensure_config, load_config};

#[derive(Parser)]
#[command(name = "claude-split-proxy", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the resolved config path and log directory, then exit
    #[arg(long)]
    show_config: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Override proxy.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let loaded = ensure_config(&config_path)
        .and_then(|created| Ok((created, load_config(&config_path)?)));
    let (created, mut config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("claude-split-proxy: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.proxy.port = port;
    }

    if created && (cli.show_config || cli.check) {
        eprintln!("Wrote default config to {}", config_path.display());
    }

    if cli.show_config {
        println!("config:  {}", config_path.display());
        println!("log-dir: {}", config.proxy.log_dir);
        return ExitCode::SUCCESS;
    }

    if cli.check {
        let problems = config.validate();
        if problems.is_empty() {
            println!("{}: ok", config_path.display());
            return ExitCode::SUCCESS;
        }
        for problem in problems {
            eprintln!("{}: {}", config_path.display(), problem);
        }
        return ExitCode::FAILURE;
    }

    claude_split_proxy::init_tracing(config.proxy.debug);
    if created {
        tracing::warn!("No config found, wrote defaults to {}", config_path.display());
    }
    tracing::info!("Config loaded from {}", config_path.display());

    if let Err(e) = claude_split_proxy::run(config).await {
        tracing::error!("{:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
