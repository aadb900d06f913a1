use anyhow::{bail, Result};
use clap::Parser;
use grid_broker::cli::{self, Args, BrokerConfig, Command};
use grid_broker::broker::state_counts;
use grid_broker::server::{base32, ConnectionState};
use grid_broker::web::{self, AppState};
use grid_broker::{LocalIntroducer, ServerDescriptor, StorageFarmBroker, TcpConnector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match args.command {
        Command::Run(run_args) => run_broker(run_args).await?,
        Command::Check(check_args) => check_grid(check_args).await?,
        Command::List(list_args) => list_servers(list_args)?,
        Command::Init(init_args) => generate_sample_config(init_args)?,
    }

    Ok(())
}

fn build_broker(config: &BrokerConfig) -> StorageFarmBroker {
    let connector = Arc::new(TcpConnector::new(config.settings.connect_timeout()));
    StorageFarmBroker::new(connector, config.settings.retry_policy())
}

async fn run_broker(args: cli::RunArgs) -> Result<()> {
    info!("Loading broker config from {:?}", args.config);
    let config = BrokerConfig::load(&args.config)?;

    let broker = build_broker(&config);
    let introducer = Arc::new(LocalIntroducer::new());
    broker.use_introducer(introducer.as_ref());
    broker.set_static_servers(config.static_servers());

    let shares_happy = config.settings.shares_happy;
    let ready = broker.when_connected_enough(shares_happy);
    tokio::spawn(async move {
        let connected = ready.await;
        info!(
            "Grid ready: {} servers connected (need {})",
            connected, shares_happy
        );
    });

    let port = args.port.unwrap_or(config.settings.status_port);
    let state = AppState::new(&config.name, broker.clone(), introducer);
    let result = web::start_server(port, state).await;

    broker.stop();
    result
}

async fn check_grid(args: cli::CheckArgs) -> Result<()> {
    let config = BrokerConfig::load(&args.config)?;
    let threshold = args.threshold.unwrap_or(config.settings.shares_happy);

    let broker = build_broker(&config);
    broker.set_static_servers(config.static_servers());

    println!(
        "Waiting up to {}s for {} of {} servers in {}...",
        args.timeout_secs,
        threshold,
        config.servers.len(),
        config.name
    );

    let ready = broker.when_connected_enough(threshold);
    let reached = tokio::time::timeout(Duration::from_secs(args.timeout_secs), ready)
        .await
        .is_ok();

    let servers = broker.servers();
    println!("\n{:<10} {:<16} {:<12} {}", "NAME", "NICKNAME", "STATE", "ADDRESS");
    for server in &servers {
        let status = server.get_connection_status();
        println!(
            "{:<10} {:<16} {:<12} {}",
            server.get_name(),
            server.get_nickname(),
            status.state,
            status
                .remote_address
                .or(status.last_error)
                .unwrap_or_default()
        );
    }

    let counts = state_counts(&servers);
    println!(
        "\n{} connected, {} connecting, {} failed",
        counts.get(&ConnectionState::Connected).copied().unwrap_or(0),
        counts.get(&ConnectionState::Connecting).copied().unwrap_or(0),
        counts.get(&ConnectionState::Failed).copied().unwrap_or(0)
    );

    let connected = broker.connected_count();
    broker.stop();

    if !reached {
        warn!("Threshold not reached in {}s", args.timeout_secs);
        bail!(
            "only {} of {} required servers connected",
            connected,
            threshold
        );
    }

    println!("\nGrid ready: {} servers connected", connected);
    Ok(())
}

fn list_servers(args: cli::ListArgs) -> Result<()> {
    let config = BrokerConfig::load(&args.config)?;

    println!("Grid: {}", config.name);
    println!("Static servers: {}", config.servers.len());
    for (server_id, server) in config.static_servers() {
        let descriptor = ServerDescriptor::new_static(&server_id, server.ann);
        let space = descriptor
            .get_available_space()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "\n  {} [{}]\n    id:    {}\n    seed:  {}\n    furl:  {}\n    space: {}",
            descriptor.get_name(),
            descriptor.get_nickname(),
            descriptor.get_longname(),
            base32::b2a(descriptor.get_permutation_seed()),
            descriptor.storage_furl().unwrap_or("-"),
            space
        );
    }

    Ok(())
}

fn generate_sample_config(args: cli::InitArgs) -> Result<()> {
    let config = BrokerConfig::sample();

    config.save(&args.output)?;
    println!("Generated sample config at: {:?}", args.output);

    Ok(())
}
