use sockmux::SelectorManager;
use sockmux::dispatch::ThreadPool;
use sockmux::net::TcpSocket;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn selector() -> (SelectorManager, Arc<ThreadPool>) {
    let pool = Arc::new(ThreadPool::new(2));
    let selector = SelectorManager::new(pool.clone());

    (selector, pool)
}

fn read_exact(socket: &TcpSocket, buffer: &mut [u8]) {
    let mut filled = 0;

    while filled < buffer.len() {
        let n = socket
            .read(&mut buffer[filled..])
            .expect("Failed to read from socket");
        assert!(n > 0, "Peer closed the connection early");

        filled += n;
    }
}

#[test]
fn accept_then_echo_roundtrip() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("Failed to accept connection");

        let mut buffer = [0; 5];
        read_exact(&socket, &mut buffer);
        assert_eq!(&buffer, b"hello");

        socket.write_all(b"world").expect("Failed to write to socket");
    });

    let mut client = TcpStream::connect(addr).expect("Failed to connect to listener");
    client
        .write_all(b"hello")
        .expect("Failed to write to stream");

    let mut buffer = [0; 5];
    client
        .read_exact(&mut buffer)
        .expect("Failed to read from stream");
    assert_eq!(&buffer, b"world");

    server.join().expect("Server thread panicked");
    selector.close();
}

#[test]
fn connect_to_std_listener() {
    let (selector, _pool) = selector();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");

        let mut buffer = [0; 4];
        stream
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
        assert_eq!(&buffer, b"ping");

        stream
            .write_all(b"pong")
            .expect("Failed to write to stream");
    });

    let socket = selector
        .connect(&addr.to_string())
        .expect("Failed to connect");
    assert_eq!(socket.peer_addr(), addr);

    socket.write_all(b"ping").expect("Failed to write to socket");

    let mut buffer = [0; 4];
    read_exact(&socket, &mut buffer);
    assert_eq!(&buffer, b"pong");

    server.join().expect("Server thread panicked");
    selector.close();
}

#[test]
fn rearm_across_multiple_messages() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("Failed to accept connection");

        // Each message parks the reader anew, so every round trips
        // through a fresh disarm + re-arm cycle.
        for _ in 0..3 {
            let mut buffer = [0; 4];
            read_exact(&socket, &mut buffer);
            assert_eq!(&buffer, b"ping");

            socket.write_all(b"pong").expect("Failed to write to socket");
        }
    });

    let mut client = TcpStream::connect(addr).expect("Failed to connect to listener");
    for _ in 0..3 {
        client
            .write_all(b"ping")
            .expect("Failed to write to stream");

        let mut buffer = [0; 4];
        client
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
        assert_eq!(&buffer, b"pong");

        thread::sleep(Duration::from_millis(20));
    }

    server.join().expect("Server thread panicked");
    selector.close();
}

#[test]
fn sequential_clients_share_one_listener() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || {
        for _ in 0..3 {
            let (socket, _) = listener.accept().expect("Failed to accept connection");

            let mut buffer = [0; 2];
            read_exact(&socket, &mut buffer);
            socket.write_all(&buffer).expect("Failed to write to socket");
        }
    });

    for i in 0..3u8 {
        let mut client = TcpStream::connect(addr).expect("Failed to connect to listener");
        client
            .write_all(&[i, i + 1])
            .expect("Failed to write to stream");

        let mut buffer = [0; 2];
        client
            .read_exact(&mut buffer)
            .expect("Failed to read from stream");
        assert_eq!(buffer, [i, i + 1]);
    }

    server.join().expect("Server thread panicked");
    selector.close();
}

#[test]
fn concurrent_clients_share_one_selector() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || {
        let mut sessions = Vec::new();

        for _ in 0..4 {
            let (socket, _) = listener.accept().expect("Failed to accept connection");

            sessions.push(thread::spawn(move || {
                let mut buffer = [0; 1];
                read_exact(&socket, &mut buffer);
                socket.write_all(&buffer).expect("Failed to write to socket");
            }));
        }

        for session in sessions {
            session.join().expect("Session thread panicked");
        }
    });

    let clients: Vec<_> = (0..4u8)
        .map(|i| {
            thread::spawn(move || {
                let mut client = TcpStream::connect(addr).expect("Failed to connect to listener");
                client.write_all(&[i]).expect("Failed to write to stream");

                let mut buffer = [0; 1];
                client
                    .read_exact(&mut buffer)
                    .expect("Failed to read from stream");
                assert_eq!(buffer, [i]);
            })
        })
        .collect();

    for client in clients {
        client.join().expect("Client thread panicked");
    }

    server.join().expect("Server thread panicked");
    selector.close();
}

#[test]
fn read_reports_peer_close_as_zero() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || {
        let (socket, _) = listener.accept().expect("Failed to accept connection");

        let mut buffer = [0; 16];
        let n = socket.read(&mut buffer).expect("Failed to read from socket");
        assert_eq!(n, 0);
    });

    let client = TcpStream::connect(addr).expect("Failed to connect to listener");
    drop(client);

    server.join().expect("Server thread panicked");
    selector.close();
}
