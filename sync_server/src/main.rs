//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p sync_server -- [--addr 127.0.0.1:40000] [--tick-hz 20]
//!
//! The server listens for client connections and publishes world deltas
//! every tick.
//!
//! Console commands:
//!   status                                - Show server status
//!   spawn <category> <id> <x> <y> <z>     - Add an entity
//!   set <category> <id> <field> <value>   - Change one field
//!   quit                                  - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use sync_server::server::GameServer;
use sync_shared::config::SyncConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> SyncConfig {
    let mut cfg = SyncConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = GameServer::new(cfg.clone())
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = std::time::Duration::from_secs_f64(1.0 / cfg.tick_hz.max(1) as f64);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        match server.try_accept(std::time::Duration::from_millis(1)).await {
            Ok(Some(cid)) => info!(client_id = ?cid, "New client accepted"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Rejected connection"),
        }

        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                info!("Server shutting down");
                return Ok(());
            }
            for out in server.exec_console(&line) {
                println!("{out}");
            }
        }

        server.step(tick_interval.as_secs_f64()).await?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
