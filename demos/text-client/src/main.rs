//! text-client - a terminal client for one multiworld slot.
//!
//! Connects with the WebSocket transport, prints everything the engine
//! reports and turns typed lines into engine operations.
//!
//! ## Usage
//!
//! ```bash
//! text-client --address localhost:38281 --slot Alice --game "Test Game"
//!
//! # Then type:
//! #   /check 1001 1002     report checked locations
//! #   /goal                report goal completion
//! #   /death fell in lava  send a death link
//! #   /deathlink on|off    toggle death link
//! #   /get key1 key2       read data storage keys
//! #   /quit
//! # Anything else is sent as chat.
//! ```

use clap::Parser;
use tether::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "text-client", about = "Terminal client for a multiworld slot")]
struct Args {
    /// Server address, `host[:port]` or a ws:// / wss:// URL.
    #[arg(short, long, env = "TETHER_ADDRESS", default_value = "localhost:38281")]
    address: String,

    /// Slot name to authenticate as.
    #[arg(short, long, env = "TETHER_SLOT")]
    slot: String,

    /// Room password.
    #[arg(short, long, env = "TETHER_PASSWORD", default_value = "")]
    password: String,

    /// Game name announced to the server.
    #[arg(short, long, env = "TETHER_GAME", default_value = "Test Game")]
    game: String,

    /// Opt in to death link.
    #[arg(long)]
    death_link: bool,

    /// How often to poll the engine, in Hz.
    #[arg(long, default_value_t = 30)]
    poll_rate: u32,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Check(Vec<LocationId>),
    Goal,
    Death(String),
    DeathLink(bool),
    Get(Vec<String>),
    Quit,
    Say(String),
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();

    match name {
        "check" => {
            let ids = args
                .split_whitespace()
                .map(|s| s.parse().map(LocationId))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| format!("bad location id: {e}"))?;
            if ids.is_empty() {
                return Err("usage: /check <id>...".into());
            }
            Ok(Command::Check(ids))
        }
        "goal" => Ok(Command::Goal),
        "death" => Ok(Command::Death(args.to_string())),
        "deathlink" => match args {
            "on" => Ok(Command::DeathLink(true)),
            "off" => Ok(Command::DeathLink(false)),
            _ => Err("usage: /deathlink on|off".into()),
        },
        "get" if !args.is_empty() => Ok(Command::Get(
            args.split_whitespace().map(str::to_string).collect(),
        )),
        "get" => Err("usage: /get <key>...".into()),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}")),
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn build_engine(
    args: &Args,
) -> Result<ProtocolEngine<WebSocketTransport>, ClientError> {
    let config = ClientConfig::new(args.game.clone()).with_death_link(args.death_link);
    let transport = WebSocketTransport::with_handle(
        tokio::runtime::Handle::current(),
        config.websocket_config(),
    );

    ProtocolEngine::builder(transport)
        .config(config)
        .on_connected(|slot_config| {
            println!("* connected ({} slot options)", slot_config.len());
        })
        .on_disconnected(|reason| println!("* disconnected: {reason}"))
        .on_item_received(|item| {
            println!(
                "* received {} from {} (#{})",
                item.item_name, item.sender_name, item.index
            );
        })
        .on_death_link(|source, cause| println!("* {source} died: {cause}"))
        .on_chat_message(|msg| println!("{}", msg.text))
        .on_data_retrieved(|response| {
            for (key, value) in &response.keys {
                println!("* {key} = {value}");
            }
        })
        .build()
}

fn run_command(
    engine: &mut ProtocolEngine<WebSocketTransport>,
    command: Command,
) -> Result<(), ClientError> {
    match command {
        Command::Check(ids) => engine.report_checks(ids),
        Command::Goal => engine.send_goal_complete(),
        Command::Death(cause) => engine.send_death(&cause),
        Command::DeathLink(enabled) => engine.set_death_link_enabled(enabled),
        Command::Get(keys) => {
            let id = engine.fetch(keys)?;
            tracing::debug!(request_id = id, "data storage request sent");
        }
        Command::Say(text) if text.is_empty() => {}
        Command::Say(text) => engine.say(&text)?,
        Command::Quit => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut engine = build_engine(&args)?;
    engine.connect(&args.address, &args.slot, &args.password)?;

    let mut ticker = PollTicker::new(PollConfig::with_rate(args.poll_rate));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.poll() {
                    eprintln!("error: {e}");
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = run_command(&mut engine, command) {
                            eprintln!("error: {e}");
                        }
                    }
                    Err(usage) => eprintln!("{usage}"),
                }
            }
        }
    }

    engine.disconnect();
    Ok(())
}
