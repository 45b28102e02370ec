//! Connection Tests
//!
//! Drives a client-role Connection against a plain blocking socket acting as
//! the peer.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framelink::demo::DemoMessage;
use framelink::{
    Config, Connection, ConnectionState, Header, IoContext, Message, MessageId, OwnedMessage,
    Owner, TsQueue, HEADER_SIZE,
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Link<T: MessageId> {
    _context: IoContext,
    connection: Arc<Connection<T>>,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    peer: TcpStream,
}

fn connect<T: MessageId>(config: Config) -> Link<T> {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut context = IoContext::new("connection-test").unwrap();
    let inbound = Arc::new(TsQueue::new());
    let connection = Connection::new(
        Owner::Client,
        context.handle(),
        None,
        Arc::clone(&inbound),
        &config,
    );

    let outcome = connection.connect_to_server(vec![addr]);
    context.run().unwrap();

    let (peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();

    let connected = outcome.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(connected, addr);

    Link {
        _context: context,
        connection,
        inbound,
        peer,
    }
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

fn read_frame<T: MessageId>(peer: &mut TcpStream) -> (Header<T>, Vec<u8>) {
    let mut block = [0u8; HEADER_SIZE];
    peer.read_exact(&mut block).unwrap();
    let header = Header::<T>::decode(&block).unwrap();

    let mut body = vec![0u8; header.size as usize];
    peer.read_exact(&mut body).unwrap();
    (header, body)
}

// =============================================================================
// Connect Tests
// =============================================================================

#[test]
fn test_connect_to_server() {
    let link = connect::<u32>(Config::default());

    assert_eq!(link.connection.state(), ConnectionState::Connected);
    assert_eq!(link.connection.owner(), Owner::Client);
    assert_eq!(link.connection.id(), 0);
    assert_eq!(
        link.connection.peer_addr(),
        Some(link.peer.local_addr().unwrap())
    );
}

#[test]
fn test_connect_refused() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut context = IoContext::new("connection-test").unwrap();
    let connection: Arc<Connection<u32>> = Connection::new(
        Owner::Client,
        context.handle(),
        None,
        Arc::new(TsQueue::new()),
        &Config::default(),
    );

    let outcome = connection.connect_to_server(vec![addr]);
    context.run().unwrap();

    assert!(outcome.recv_timeout(TIMEOUT).unwrap().is_err());
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

// =============================================================================
// Write Pipeline Tests
// =============================================================================

#[test]
fn test_send_preserves_order() {
    let mut link = connect::<u32>(Config::default());

    for id in 1..=3u32 {
        let mut msg = Message::new(id);
        msg.push(id * 100).unwrap();
        link.connection.send(msg);
    }

    for id in 1..=3u32 {
        let (header, body) = read_frame::<u32>(&mut link.peer);
        assert_eq!(header.id, id);
        assert_eq!(header.size, 4);
        assert_eq!(body, (id * 100).to_ne_bytes());
    }

    assert!(wait_for(|| link.connection.pending_writes() == 0));
}

#[test]
fn test_send_many_from_threads() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 50;

    let mut link = connect::<u32>(Config::default());

    crossbeam::thread::scope(|s| {
        for t in 0..THREADS {
            let connection = &link.connection;
            s.spawn(move |_| {
                for i in 0..PER_THREAD {
                    let mut msg = Message::new(t);
                    msg.push(i).unwrap();
                    connection.send(msg);
                }
            });
        }
    })
    .unwrap();

    // Frames arrive whole, and each sender's frames arrive in order
    let mut next = vec![0u32; THREADS as usize];
    for _ in 0..THREADS * PER_THREAD {
        let (header, body) = read_frame::<u32>(&mut link.peer);
        let value = u32::from_ne_bytes(body.try_into().unwrap());
        assert_eq!(value, next[header.id as usize]);
        next[header.id as usize] += 1;
    }
}

#[test]
fn test_send_empty_body() {
    let mut link = connect::<DemoMessage>(Config::default());
    link.connection.send(Message::new(DemoMessage::ServerAccept));

    let (header, body) = read_frame::<DemoMessage>(&mut link.peer);
    assert_eq!(header.id, DemoMessage::ServerAccept);
    assert!(body.is_empty());
}

// =============================================================================
// Read Pipeline Tests
// =============================================================================

#[test]
fn test_receive_frames() {
    let mut link = connect::<u32>(Config::default());

    let mut first = Message::new(10u32);
    first.push(42i32).unwrap();
    let second = Message::new(11u32);
    link.peer.write_all(&first.encode()).unwrap();
    link.peer.write_all(&second.encode()).unwrap();

    assert!(wait_for(|| link.inbound.size() == 2));

    let owned = link.inbound.pop_front().unwrap();
    assert!(!owned.has_origin());
    let mut msg = owned.into_message();
    assert_eq!(msg.id(), 10);
    assert_eq!(msg.pop::<i32>().unwrap(), 42);

    let msg = link.inbound.pop_front().unwrap().into_message();
    assert_eq!(msg.id(), 11);
    assert!(msg.is_empty());
}

#[test]
fn test_receive_split_frame() {
    let mut link = connect::<u32>(Config::default());

    let mut msg = Message::new(5u32);
    msg.push_bytes(&[9u8; 64]).unwrap();
    let frame = msg.encode();

    // Header and body dribble in across several writes
    for chunk in frame.chunks(5) {
        link.peer.write_all(chunk).unwrap();
        link.peer.flush().unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    assert!(link.inbound.wait_timeout(TIMEOUT));
    let received = link.inbound.pop_front().unwrap().into_message();
    assert_eq!(received.id(), 5);
    assert_eq!(received.body(), &[9u8; 64][..]);
}

#[test]
fn test_oversize_header_closes() {
    let config = Config::builder().max_message_size(16).build();
    let mut link = connect::<u32>(config);

    let header = Header { id: 1u32, size: 1024 };
    link.peer.write_all(&header.encode()).unwrap();

    assert!(wait_for(|| !link.connection.is_connected()));
    assert!(link.inbound.is_empty());
}

#[test]
fn test_unknown_id_closes() {
    let mut link = connect::<DemoMessage>(Config::default());

    let mut block = [0u8; HEADER_SIZE];
    block[..4].copy_from_slice(&99u32.to_le_bytes());
    link.peer.write_all(&block).unwrap();

    assert!(wait_for(|| !link.connection.is_connected()));
    assert!(link.inbound.is_empty());
}

// =============================================================================
// Disconnect Tests
// =============================================================================

#[test]
fn test_peer_close_detected() {
    let link = connect::<u32>(Config::default());
    let connection = Arc::clone(&link.connection);
    drop(link.peer);

    assert!(wait_for(|| !connection.is_connected()));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[test]
fn test_disconnect_closes_socket() {
    let mut link = connect::<u32>(Config::default());
    link.connection.disconnect();

    assert!(wait_for(|| !link.connection.is_connected()));

    // The peer sees end of stream
    let mut buf = [0u8; 1];
    let read = link.peer.read(&mut buf);
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[test]
fn test_send_after_close_is_dropped() {
    let link = connect::<u32>(Config::default());
    link.connection.disconnect();
    assert!(wait_for(|| !link.connection.is_connected()));

    link.connection.send(Message::new(1u32));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(link.connection.pending_writes(), 0);
}
