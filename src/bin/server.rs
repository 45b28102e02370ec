//! framelink demo server
//!
//! Echoes pings and relays chat text to every other client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use framelink::demo::DemoMessage;
use framelink::{Config, Connection, Message, Server, ServerHandler};
use tracing_subscriber::{fmt, EnvFilter};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// framelink demo server
#[derive(Parser, Debug)]
#[command(name = "framelink-server")]
#[command(about = "Demo server for the framelink messaging layer")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:60000")]
    listen: String,

    /// Maximum simultaneously connected clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Largest accepted message body in KB
    #[arg(long, default_value = "1024")]
    max_message_kb: usize,
}

struct DemoServer {
    max_clients: usize,
    connected: AtomicUsize,
}

impl ServerHandler<DemoMessage> for DemoServer {
    fn on_client_connect(&self, client: &Arc<Connection<DemoMessage>>) -> bool {
        let admitted = self
            .connected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_clients).then_some(count + 1)
            })
            .is_ok();

        if !admitted {
            tracing::warn!(
                "Rejecting {:?}: {} clients connected",
                client.peer_addr(),
                self.max_clients
            );
            return false;
        }

        client.send(Message::new(DemoMessage::ServerAccept));
        true
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<DemoMessage>>) {
        self.connected.fetch_sub(1, Ordering::AcqRel);
        tracing::info!("Removing client [{}]", client.id());
    }

    fn on_message(
        &self,
        server: &Server<DemoMessage, Self>,
        client: Option<Arc<Connection<DemoMessage>>>,
        mut message: Message<DemoMessage>,
    ) {
        let Some(client) = client else {
            tracing::debug!("Dropping {} from a released connection", message);
            return;
        };

        match message.id() {
            DemoMessage::ServerPing => {
                tracing::debug!("[{}] Server Ping", client.id());
                server.message_client(&client, message);
            }
            DemoMessage::MessageAll => {
                tracing::debug!("[{}] Message All", client.id());
                message.set_id(DemoMessage::ServerMessage);
                if let Err(e) = message.push(client.id()) {
                    tracing::warn!("[{}] Could not relay message: {}", client.id(), e);
                    return;
                }
                server.message_all_clients(&message, Some(&client));
            }
            other => {
                tracing::warn!("[{}] Unexpected {:?}", client.id(), other);
            }
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,framelink=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("framelink server v{}", framelink::VERSION);
    tracing::info!("Listen address: {}", args.listen);
    tracing::info!("Max clients: {}", args.max_clients);

    let config = Config::builder()
        .listen_addr(&args.listen)
        .max_message_size(args.max_message_kb * 1024)
        .build();

    let handler = DemoServer {
        max_clients: args.max_clients,
        connected: AtomicUsize::new(0),
    };

    let mut server = Server::with_config(config, handler);
    if !server.start() {
        std::process::exit(1);
    }

    // Wake at least once a second so departed clients free their slots even
    // when nobody broadcasts
    loop {
        if server.incoming().wait_timeout(SWEEP_INTERVAL) {
            server.update(usize::MAX, false);
        }
        server.release_closed();
    }
}
