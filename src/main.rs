mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use vf_av::ToolRegistry;
use vf_core::config::Config;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path);

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting vodforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    vf_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vodforge=trace,vf_server=debug,vf_pipeline=trace,vf_av=debug,vf_store=debug,vf_db=debug,tower_http=debug".to_string()
        } else {
            "vodforge=info,vf_server=info,vf_pipeline=info,vf_av=info,vf_store=info,vf_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vodforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools);
    let probed = vf_av::probe_media(&tools, file)
        .await
        .with_context(|| format!("probing {}", file.display()))?;

    if json {
        let value = serde_json::json!({
            "file": file.display().to_string(),
            "duration_secs": probed.duration_secs,
            "metadata": probed.metadata,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let secs = probed.duration_secs as u64;
        let meta = &probed.metadata;
        println!("File: {}", file.display());
        println!(
            "Duration: {:02}:{:02}:{:02} ({:.3}s)",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            probed.duration_secs
        );
        println!("Video: {} {}x{} @ {:.3} fps", meta.codec, meta.width, meta.height, meta.fps);
        println!("Bitrate: {} bit/s", meta.bitrate);
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Videos cannot be processed without ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration parses");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.server.db_path.display());
    println!(
        "  Storage: {} (bucket {})",
        config.storage.backend, config.storage.bucket
    );
    println!(
        "  Workers: {} (max retries {})",
        config.worker.concurrency, config.worker.retry.max_retries
    );
    println!(
        "  Webhooks: {}",
        config.notifications.webhooks.iter().filter(|w| w.enabled).count()
    );

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("No warnings");
    } else {
        println!("Warnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
