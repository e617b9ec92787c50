//! Status-relay binary entry point.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use status_relay::cli::{self, Args, Subcommand};
use status_relay::config::Config;
use status_relay::{
    health, logging, LoopbackTransport, PairingFlow, PairingRequest, RelayError, SessionDirectory,
    SessionIdentity, Supervisor, SupervisorConfig, Transport,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_with_filter(Some(config.log_filter()));

    let directory = match SessionDirectory::init(
        &config.storage.sessions_dir,
        &config.storage.history_dir,
    )
    .await
    {
        Ok(directory) => directory.with_retention(config.retention()),
        Err(e) => {
            error!("cannot prepare session storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Subcommand::Run => match config.supervisor_config() {
            Ok(supervisor) => run(&config, supervisor, directory).await,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
        Subcommand::Add => add(&args, &config, directory).await,
        Subcommand::Remove => remove(&args, &directory).await,
        Subcommand::List => list(&directory).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: &Config,
    supervisor: SupervisorConfig,
    directory: SessionDirectory,
) -> status_relay::Result<()> {
    info!("status-relay v{}", env!("CARGO_PKG_VERSION"));
    warn!(
        backend = %config.transport.backend,
        "loopback transport only links accounts inside this process"
    );
    let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::new());

    let handle = Supervisor::new(directory, transport, supervisor).spawn();
    let shutdown = handle.shutdown_token();

    let health_task = config.health.enabled.then(|| {
        let health_config = config.health_config();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(health_config, token).await {
                error!("health endpoint stopped: {}", e);
            }
        })
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("cannot listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received, draining sessions...");
        }
        _ = shutdown.cancelled() => {}
    }

    let report = handle.shutdown().await?;
    if let Some(task) = health_task {
        let _ = task.await;
    }

    if report.forced.is_empty() {
        info!("Stopped cleanly ({} sessions drained)", report.drained);
    } else {
        let forced: Vec<&str> = report.forced.iter().map(|id| id.as_str()).collect();
        warn!(
            "Stopped with {} sessions drained, forced: {}",
            report.drained,
            forced.join(", ")
        );
    }
    Ok(())
}

async fn add(args: &Args, config: &Config, directory: SessionDirectory) -> status_relay::Result<()> {
    let name = match &args.name {
        Some(name) => name.clone(),
        None => prompt("Session name (letters, digits, '-' or '_'): ")?,
    };
    let identity: SessionIdentity = name.parse()?;
    let phone = match &args.phone {
        Some(phone) => phone.clone(),
        None => prompt("Phone number with country code (e.g. +2348012345678): ")?,
    };

    let request = PairingRequest::new(identity, phone)
        .with_display_name(config.pairing.display_name.clone());
    let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::new().auto_linking());
    let flow = PairingFlow::new(directory, transport).with_timeout(config.pairing_timeout());

    let abort = CancellationToken::new();
    let on_signal = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let store = flow
        .run(
            request,
            |code| {
                println!();
                println!("Pairing code: {code}");
                println!("On the phone open Linked devices > Link with phone number and enter it.");
                println!("Waiting for confirmation (Ctrl+C to cancel)...");
            },
            abort,
        )
        .await?;

    println!(
        "Session '{}' paired. A running supervisor picks it up on its next poll.",
        store.identity()
    );
    Ok(())
}

async fn remove(args: &Args, directory: &SessionDirectory) -> status_relay::Result<()> {
    let identity = match &args.name {
        Some(name) => name.parse::<SessionIdentity>()?,
        None => {
            let ids = directory.list().await?;
            if ids.is_empty() {
                println!("No sessions found.");
                return Ok(());
            }
            println!("Sessions:");
            for (index, id) in ids.iter().enumerate() {
                println!("{}. {}", index + 1, id);
            }
            let choice = prompt("Number of the session to remove: ")?;
            choice
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|index| ids.get(index).cloned())
                .ok_or(RelayError::SessionNotFound(choice))?
        }
    };

    if !args.yes {
        let answer = prompt(&format!(
            "Remove '{identity}' and delete its credentials and history? Type 'yes' to confirm: "
        ))?;
        if answer != "yes" {
            println!("Cancelled.");
            return Ok(());
        }
    }

    directory.delete(&identity).await?;
    println!("Session '{identity}' removed. A running supervisor unlinks it on its next poll.");
    Ok(())
}

async fn list(directory: &SessionDirectory) -> status_relay::Result<()> {
    let ids = directory.list().await?;
    if ids.is_empty() {
        println!("No sessions found.");
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

/// Ask on stdout and read one trimmed line from stdin.
fn prompt(question: &str) -> status_relay::Result<String> {
    print!("{question}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(RelayError::Aborted);
    }
    Ok(line.trim().to_string())
}
