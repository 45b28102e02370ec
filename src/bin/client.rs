//! framelink demo client
//!
//! Command-line client for the demo server.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use framelink::demo::DemoMessage;
use framelink::{Client, Config, Message, OwnedMessage};
use tracing_subscriber::{fmt, EnvFilter};

/// framelink demo client
#[derive(Parser, Debug)]
#[command(name = "framelink-client")]
#[command(about = "Demo client for the framelink messaging layer")]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    server_host: String,

    /// Server port
    #[arg(short, long, default_value = "60000")]
    port: u16,

    /// Seconds to wait for a reply
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Measure the round trip to the server
    Ping,

    /// Send text to every other connected client
    Say {
        /// The text to send
        text: String,
    },

    /// Print text relayed from other clients
    Listen,
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Wait for the next message with the given id, discarding others
fn wait_for(
    client: &Client<DemoMessage>,
    id: DemoMessage,
    timeout: Duration,
) -> Option<OwnedMessage<DemoMessage>> {
    loop {
        let owned = client.wait_for_message(timeout)?;
        if owned.message().id() == id {
            return Some(owned);
        }
        tracing::debug!("Skipping {}", owned);
    }
}

fn ping(client: &Client<DemoMessage>, timeout: Duration) -> Result<Duration, String> {
    let mut message = Message::new(DemoMessage::ServerPing);
    message.push(now_micros()).map_err(|e| e.to_string())?;
    client.send(message);

    let reply = wait_for(client, DemoMessage::ServerPing, timeout)
        .ok_or_else(|| "no ping reply".to_string())?;
    let sent: u64 = reply.into_message().pop().map_err(|e| e.to_string())?;
    Ok(Duration::from_micros(now_micros().saturating_sub(sent)))
}

fn say(client: &Client<DemoMessage>, text: &str, timeout: Duration) -> Result<(), String> {
    let mut message = Message::new(DemoMessage::MessageAll);
    message
        .push_bytes(text.as_bytes())
        .and_then(|m| m.push(text.len() as u32))
        .map_err(|e| e.to_string())?;
    client.send(message);

    // Writes are ordered, so a ping reply means the text went out first
    ping(client, timeout).map(|_| ())
}

fn print_relayed(owned: OwnedMessage<DemoMessage>) -> Result<(), String> {
    let mut message = owned.into_message();
    let sender: u32 = message.pop().map_err(|e| e.to_string())?;
    let len: u32 = message.pop().map_err(|e| e.to_string())?;
    let text = message.pop_bytes(len as usize).map_err(|e| e.to_string())?;
    println!("[{}] {}", sender, String::from_utf8_lossy(&text));
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    let config = Config::builder()
        .connect_timeout_ms(args.timeout * 1000)
        .build();
    let mut client: Client<DemoMessage> = Client::with_config(config);

    if !client.connect(&args.server_host, args.port) {
        eprintln!("Could not connect to {}:{}", args.server_host, args.port);
        std::process::exit(1);
    }

    if wait_for(&client, DemoMessage::ServerAccept, timeout).is_none() {
        eprintln!("Server did not accept the connection");
        std::process::exit(1);
    }

    let result = match args.command {
        Commands::Ping => ping(&client, timeout).map(|rtt| println!("Ping: {:?}", rtt)),
        Commands::Say { text } => say(&client, &text, timeout),
        Commands::Listen => loop {
            if !client.is_connected() {
                break Err("server closed the connection".to_string());
            }
            if let Some(owned) = wait_for(&client, DemoMessage::ServerMessage, timeout) {
                if let Err(e) = print_relayed(owned) {
                    break Err(e);
                }
            }
        },
    };

    client.disconnect();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
