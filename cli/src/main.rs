// datapipe: host-side tooling for BLE DataPipe peripherals
//
// Plans frames, runs an in-memory loopback demo, and acts as a BLE central
// that sends to and listens on a DataPipe characteristic.

mod central;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use datapipe_core::transport::ble::max_frame_size;
use datapipe_core::{
    DataPipe, DeliveryMode, Dispatcher, FramePlan, LoopbackLink, Message, PeripheralEvents,
    Reassembler, SendOutcome, TYPE_JSON,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "datapipe")]
#[command(about = "DataPipe: typed messages over one BLE characteristic", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a message is split into frames at a given MTU
    Frames {
        /// JSON document (type 0) or text/hex payload
        payload: String,
        #[arg(short, long, default_value = "23")]
        mtu: u16,
        #[arg(short, long, default_value = "0")]
        kind: u8,
        /// Treat the payload as hex
        #[arg(long)]
        hex: bool,
    },
    /// Run a peripheral and central against an in-memory link
    Loopback {
        #[arg(short, long, default_value = "23")]
        mtu: u16,
        #[arg(long, value_enum, default_value = "indicate")]
        mode: ModeArg,
        /// Binary payload size for the bulk transfer
        #[arg(short, long, default_value = "500")]
        size: usize,
    },
    /// Send one message to a DataPipe peripheral
    Send {
        payload: String,
        #[arg(short, long)]
        target: Option<String>,
        #[arg(short, long, default_value = "0")]
        kind: u8,
        #[arg(long)]
        hex: bool,
        /// Write without response, paced like notifications
        #[arg(long)]
        no_response: bool,
    },
    /// Print messages received from a DataPipe peripheral
    Listen {
        #[arg(short, long)]
        target: Option<String>,
        /// Stop after this many messages
        #[arg(short, long)]
        count: Option<usize>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    Path,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Indicate,
    Notify,
}

impl From<ModeArg> for DeliveryMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Indicate => DeliveryMode::Confirmed,
            ModeArg::Notify => DeliveryMode::Unconfirmed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Frames { payload, mtu, kind, hex } => cmd_frames(&payload, mtu, kind, hex),
        Commands::Loopback { mtu, mode, size } => cmd_loopback(mtu, mode.into(), size),
        Commands::Send { payload, target, kind, hex, no_response } => {
            cmd_send(&payload, target, kind, hex, !no_response).await
        }
        Commands::Listen { target, count } => cmd_listen(target, count).await,
        Commands::Config { action } => cmd_config(action),
    }
}

/// Build a message from command-line input
fn build_message(payload: &str, kind: u8, hex: bool) -> Result<Message> {
    if kind == TYPE_JSON && !hex {
        let document: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
        return Message::json(&document).context("Cannot encode JSON message");
    }
    let bytes = if hex {
        hex::decode(payload.trim()).context("Payload is not valid hex")?
    } else {
        payload.as_bytes().to_vec()
    };
    Message::new(kind, bytes).context("Cannot build message")
}

fn describe(message: &Message) -> String {
    if message.is_json() {
        match datapipe_core::message::decode_json(message.payload()) {
            Ok(doc) => doc.to_string(),
            Err(_) => format!("<invalid JSON> {}", hex::encode(message.payload())),
        }
    } else {
        hex::encode(message.payload())
    }
}

fn cmd_frames(payload: &str, mtu: u16, kind: u8, hex: bool) -> Result<()> {
    let message = build_message(payload, kind, hex)?;
    let Some(plan) = FramePlan::new(&message, mtu) else {
        anyhow::bail!(
            "MTU {} leaves {} bytes per frame; at least 3 are needed",
            mtu,
            max_frame_size(mtu)
        );
    };

    println!("{}", "Frame Plan".bold());
    println!("  Type:        {}", message.kind().to_string().bright_cyan());
    println!("  Payload:     {} bytes", message.len());
    println!("  Framed:      {} bytes", plan.total_len());
    println!("  MTU:         {} ({} bytes per frame)", mtu, plan.max_frame());
    println!("  Frames:      {}", plan.frame_count().to_string().bright_yellow());
    println!();

    for (index, frame) in plan.frames().enumerate() {
        let offset = index * plan.max_frame();
        println!(
            "  {:>4}  @{:<6} {:>3}B  {}",
            (index + 1).to_string().dimmed(),
            offset,
            frame.len(),
            hex::encode(frame)
        );
    }

    Ok(())
}

fn cmd_loopback(mtu: u16, mode: DeliveryMode, size: usize) -> Result<()> {
    let config = config::Config::load()?;
    let link = LoopbackLink::new();
    let mut pipe = DataPipe::new(config.pipe.with_delivery_mode(mode), link.peripheral())
        .context("Failed to create pipe")?;

    let (tx, mut inbox) = tokio::sync::mpsc::unbounded_channel();
    pipe.set_on_json(move |doc| {
        let _ = tx.send(doc.clone());
    });

    pipe.begin().context("Failed to start pipe")?;
    println!("{}", "Loopback DataPipe".bold());
    println!("  {} Advertising as '{}'", "✓".green(), pipe.config().device_name);

    link.connect(mtu);
    pipe.on_peer_connected(mtu);
    println!("  {} Central attached (MTU {}, {} mode)", "✓".green(), pipe.mtu(), mode);
    println!();

    // central -> peripheral: a JSON command split over writes
    let command = Message::json(&serde_json::json!({"cmd": "status", "verbose": true}))?;
    let plan = FramePlan::new(&command, mtu).context("MTU too small")?;
    for frame in plan.frames() {
        pipe.on_bytes_written(frame);
    }
    while let Ok(doc) = inbox.try_recv() {
        println!("  {} Peripheral received: {}", "←".bright_blue(), doc.to_string().bright_cyan());
    }

    // peripheral -> central: a JSON reply and a bulk binary message
    let reply = serde_json::json!({"status": "ok", "mtu": pipe.mtu()});
    report_send("JSON reply", &pipe.send_json(&reply));
    let bulk: Vec<u8> = (0..size).map(|i| i as u8).collect();
    report_send("binary type 5", &pipe.send_binary(5, &bulk));

    let frames = link.take_frames();
    let mut rx = Reassembler::default();
    for frame in &frames {
        for message in rx.push(&frame.bytes) {
            let shown = describe(&message);
            let shown = if shown.chars().count() > 64 {
                format!("{}…", shown.chars().take(64).collect::<String>())
            } else {
                shown
            };
            println!(
                "  {} Central received type {} ({} bytes): {}",
                "→".bright_green(),
                message.kind(),
                message.len(),
                shown
            );
        }
    }
    println!();
    println!("  {} frames transmitted in total", frames.len().to_string().bright_yellow());

    link.disconnect();
    pipe.on_peer_disconnected(0x13);
    println!("  {} Central detached, advertising again: {}", "✓".green(), link.is_advertising());
    pipe.stop();

    Ok(())
}

fn report_send(label: &str, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Sent { frames } => {
            println!("  {} Sent {} in {} frame(s)", "✓".green(), label, frames)
        }
        other => println!("  {} {} not sent: {:?}", "✗".red(), label, other),
    }
}

async fn cmd_send(
    payload: &str,
    target: Option<String>,
    kind: u8,
    hex: bool,
    confirmed: bool,
) -> Result<()> {
    let config = config::Config::load()?;
    let message = build_message(payload, kind, hex)?;

    println!("{}", "Connecting...".bold());
    let central = central::PipeCentral::connect(&config, target.as_deref()).await?;
    let frames = central.send(&message, confirmed).await?;
    println!(
        "  {} Sent type {} ({} bytes) in {} frame(s)",
        "✓".green(),
        message.kind(),
        message.len(),
        frames
    );
    central.disconnect().await
}

async fn cmd_listen(target: Option<String>, count: Option<usize>) -> Result<()> {
    let config = config::Config::load()?;

    println!("{}", "Connecting...".bold());
    let central = central::PipeCentral::connect(&config, target.as_deref()).await?;
    println!("  {} Subscribed, waiting for messages (Ctrl-C to stop)", "✓".green());

    let mut dispatcher = Dispatcher::new();
    dispatcher.set_on_json(|doc| {
        println!("  {} {}", "json".bright_cyan(), doc);
    });
    dispatcher.set_on_binary(|kind, data| {
        println!(
            "  {} ({} bytes) {}",
            format!("type {}", kind).bright_yellow(),
            data.len(),
            hex::encode(data)
        );
    });

    let handled = central.listen(&mut dispatcher, count).await?;
    println!("  {} {} message(s) received", "✓".green(), handled);
    central.disconnect().await
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("  {} {} = {}", "✓".green(), key, value.bright_cyan());
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<22} {}", key, value.bright_cyan());
            }
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
