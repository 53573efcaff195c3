//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p sync_client -- [--addr 127.0.0.1:40000] [--name Player] [--config client.json]
//!
//! The client connects to the server, waits for login, then renders
//! interpolated frames at `interp_rate` while sending idle input.
//!
//! Console commands:
//!   say <message>          - Global chat
//!   team <message>         - Team chat
//!   whisper <id> <message> - Private message
//!   status                 - Show session status
//!   quit                   - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use sync_client::client::GameClient;
use sync_client::input::InputState;
use sync_client::render::{RenderSink, TraceRenderer};
use sync_client::session::{ChatEvent, LoginEvent, SessionState};
use sync_shared::config::SyncConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<SyncConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&PathBuf::from(&args[i + 1]))?,
        _ => SyncConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        server = %cfg.server_addr,
        interp_rate = cfg.interp_rate,
        delay_ms = cfg.render_delay_ms(),
        "Starting client"
    );

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    client
        .wait_for_login(Duration::from_secs(5))
        .await
        .context("login")?;

    let mut renderer = TraceRenderer::new(cfg.interp_rate.max(1) as u64);
    for login in client.session.events_mut().drain::<LoginEvent>() {
        info!(local_id = %login.id, "Logged in");
        renderer.track = Some(login.id);
    }

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

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let frame_interval = Duration::from_secs_f64(1.0 / cfg.interp_rate.max(1) as f64);
    let mut ticker = tokio::time::interval(frame_interval);

    loop {
        ticker.tick().await;

        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                client.disconnect("quit").await;
                return Ok(());
            }
            for out in client.exec_console(&line).await {
                println!("{out}");
            }
        }

        // Input capture lives outside this crate; send idle input.
        client.send_input(InputState::default());

        let frame = client.frame().await;
        renderer.present(&frame);

        for chat in client.session.events_mut().drain::<ChatEvent>() {
            println!("[{:?}] {}: {}", chat.channel, chat.sender_id, chat.content);
        }

        if client.state() == SessionState::Disconnected {
            println!("Disconnected from server.");
            break;
        }
    }

    Ok(())
}
