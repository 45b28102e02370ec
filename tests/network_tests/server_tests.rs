//! Server Tests
//!
//! Admission, accept loop and disconnect bookkeeping, exercised with plain
//! blocking sockets as clients.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framelink::{Config, Connection, DenyAll, Header, Message, Server, ServerHandler, HEADER_SIZE};
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Admits everyone and records what it sees
#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    received: Mutex<Vec<(Option<u32>, u32)>>,
}

impl ServerHandler<u32> for Recorder {
    fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_client_disconnect(&self, _client: &Arc<Connection<u32>>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_message(
        &self,
        _server: &Server<u32, Self>,
        client: Option<Arc<Connection<u32>>>,
        message: Message<u32>,
    ) {
        self.received
            .lock()
            .push((client.map(|c| c.id()), message.id()));
    }
}

/// Rejects everyone, counting the attempts it is offered
#[derive(Default)]
struct Rejector {
    offered: AtomicUsize,
}

impl ServerHandler<u32> for Rejector {
    fn on_client_connect(&self, _client: &Arc<Connection<u32>>) -> bool {
        self.offered.fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn local_config() -> Config {
    Config::builder().listen_addr("127.0.0.1:0").build()
}

fn start<H: ServerHandler<u32>>(handler: H) -> (Server<u32, H>, SocketAddr) {
    let mut server = Server::with_config(local_config(), handler);
    assert!(server.start());
    let addr = server.local_addr().unwrap();
    (server, addr)
}

fn dial(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_start_stop() {
    let (mut server, addr) = start(DenyAll);
    assert!(server.is_running());
    assert_ne!(addr.port(), 0);

    server.stop();
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());

    // Stopping twice is harmless
    server.stop();
}

#[test]
fn test_start_twice_fails() {
    let (mut server, _) = start(DenyAll);
    assert!(!server.start());
    assert!(server.is_running());
}

#[test]
fn test_start_on_taken_port_fails() {
    let (_first, addr) = start(DenyAll);

    let config = Config::builder().listen_addr(addr.to_string()).build();
    let mut second: Server<u32, DenyAll> = Server::with_config(config, DenyAll);
    assert!(!second.start());
    assert!(!second.is_running());
}

#[test]
fn test_restart_after_stop() {
    let (mut server, _) = start(Recorder::default());
    server.stop();

    assert!(server.start());
    let addr = server.local_addr().unwrap();
    let _client = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));
}

// =============================================================================
// Admission Tests
// =============================================================================

#[test]
fn test_deny_all_rejects() {
    let (server, addr) = start(DenyAll);

    let mut client = dial(addr);
    let mut buf = [0u8; 1];
    assert!(matches!(client.read(&mut buf), Ok(0)));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_accept_loop_continues_after_rejection() {
    let (server, addr) = start(Rejector::default());

    for attempt in 1..=3 {
        let mut client = dial(addr);

        // Every attempt reaches the admission hook, then sees end of stream
        assert!(wait_for(|| server.handler().offered.load(Ordering::SeqCst) == attempt));
        let mut buf = [0u8; 1];
        assert!(matches!(client.read(&mut buf), Ok(0)));
    }
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_admitted_connections_are_never_seen_closed() {
    const CLIENTS: usize = 100;

    let (server, addr) = start(Recorder::default());
    let done = AtomicBool::new(false);

    let clients = crossbeam::thread::scope(|s| {
        // Owner-thread sweeps racing the accept loop
        s.spawn(|_| {
            while !done.load(Ordering::SeqCst) {
                for connection in server.connections() {
                    assert!(connection.is_connected());
                }
                assert_eq!(server.release_closed(), 0);
            }
        });

        let clients: Vec<_> = (0..CLIENTS).map(|_| dial(addr)).collect();
        assert!(wait_for(|| server.connection_count() == CLIENTS));
        done.store(true, Ordering::SeqCst);
        clients
    })
    .unwrap();

    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 0);
    assert_eq!(server.connection_count(), clients.len());
}

#[test]
fn test_ids_assigned_in_order() {
    let (server, addr) = start(Recorder::default());

    let _a = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));
    let _b = dial(addr);
    assert!(wait_for(|| server.connection_count() == 2));

    let ids: Vec<u32> = server.connections().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(server.handler().connects.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Inbound Tests
// =============================================================================

#[test]
fn test_update_dispatches_with_origin() {
    let (server, addr) = start(Recorder::default());

    let mut client = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));

    for id in [7u32, 8, 9] {
        client.write_all(&Message::new(id).encode()).unwrap();
    }
    assert!(wait_for(|| server.incoming().size() == 3));

    // max_messages bounds one call
    assert_eq!(server.update(2, false), 2);
    assert_eq!(server.update(usize::MAX, true), 1);
    assert_eq!(server.update(usize::MAX, false), 0);

    let received = server.handler().received.lock().clone();
    assert_eq!(received, vec![(Some(1), 7), (Some(1), 8), (Some(1), 9)]);
}

#[test]
fn test_message_client_writes_frame() {
    let (server, addr) = start(Recorder::default());

    let mut client = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));
    let connection = server.connections().remove(0);

    let mut msg = Message::new(4u32);
    msg.push(99u16).unwrap();
    server.message_client(&connection, msg);

    let mut block = [0u8; HEADER_SIZE];
    client.read_exact(&mut block).unwrap();
    let header = Header::<u32>::decode(&block).unwrap();
    assert_eq!(header.id, 4);
    assert_eq!(header.size, 2);

    let mut body = [0u8; 2];
    client.read_exact(&mut body).unwrap();
    assert_eq!(body, 99u16.to_ne_bytes());
}

// =============================================================================
// Disconnect Tests
// =============================================================================

#[test]
fn test_message_client_releases_closed() {
    let (server, addr) = start(Recorder::default());

    let client = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));
    let connection = server.connections().remove(0);

    drop(client);
    assert!(wait_for(|| !connection.is_connected()));

    server.message_client(&connection, Message::new(1));
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);

    // Already released: not reported again
    server.message_client(&connection, Message::new(1));
    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_message_all_clients_sweeps_closed() {
    let (server, addr) = start(Recorder::default());

    let a = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));
    let mut b = dial(addr);
    assert!(wait_for(|| server.connection_count() == 2));
    let closed = server.connections().remove(0);

    drop(a);
    assert!(wait_for(|| !closed.is_connected()));

    server.message_all_clients(&Message::new(6), None);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);

    // The live client still got the broadcast
    let mut block = [0u8; HEADER_SIZE];
    b.read_exact(&mut block).unwrap();
    assert_eq!(Header::<u32>::decode(&block).unwrap().id, 6);
}

#[test]
fn test_stop_releases_connections() {
    let (mut server, addr) = start(Recorder::default());

    let mut client = dial(addr);
    assert!(wait_for(|| server.connection_count() == 1));

    server.stop();
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);

    let mut buf = [0u8; 1];
    assert!(matches!(client.read(&mut buf), Ok(0) | Err(_)));
}

#[test]
fn test_release_closed_without_sending() {
    let (server, addr) = start(Recorder::default());

    let client = dial(addr);
    let mut other = dial(addr);
    assert!(wait_for(|| server.connection_count() == 2));
    let closed = server.connections().remove(0);

    drop(client);
    assert!(wait_for(|| !closed.is_connected()));

    assert_eq!(server.release_closed(), 1);
    assert_eq!(server.release_closed(), 0);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);

    // Nothing was written to the remaining client
    other.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let mut buf = [0u8; 1];
    assert!(other.read(&mut buf).is_err());
}
