use sockmux::dispatch::ThreadPool;
use sockmux::{SelectorManager, SelectorStats};

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn selector() -> (SelectorManager, Arc<ThreadPool>) {
    let pool = Arc::new(ThreadPool::new(2));
    let selector = SelectorManager::new(pool.clone());

    (selector, pool)
}

#[test]
fn close_is_idempotent_and_rejects_operations() {
    let (selector, _pool) = selector();

    let _listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    assert!(!selector.is_closed());

    selector.close();
    selector.close();
    assert!(selector.is_closed());

    let err = selector.bind("127.0.0.1:0").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);

    let err = selector.connect("127.0.0.1:1").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);

    let err = selector.wake().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[test]
fn close_before_first_use_never_starts_the_loop() {
    let (selector, _pool) = selector();

    assert!(selector.wake().is_ok());

    selector.close();

    let err = selector.bind("127.0.0.1:0").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[test]
fn closing_the_selector_unblocks_a_parked_accept() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");

    let acceptor = thread::spawn(move || listener.accept());

    // Give the acceptor time to park in the selector, then close out
    // from under it.
    thread::sleep(Duration::from_millis(50));
    selector.close();

    let err = acceptor
        .join()
        .expect("Acceptor thread panicked")
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[test]
fn closing_a_socket_unblocks_a_parked_read() {
    let (selector, _pool) = selector();

    let listener = selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = thread::spawn(move || listener.accept().expect("Failed to accept connection"));

    let _client = std::net::TcpStream::connect(addr).expect("Failed to connect to listener");
    let (socket, _) = server.join().expect("Server thread panicked");
    let socket = Arc::new(socket);

    let reader = {
        let socket = socket.clone();
        thread::spawn(move || {
            let mut buffer = [0; 8];
            socket.read(&mut buffer)
        })
    };

    // The client sends nothing, so the reader parks until the close
    // releases it.
    thread::sleep(Duration::from_millis(50));
    socket.close();

    let err = reader.join().expect("Reader thread panicked").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);

    selector.close();
}

#[test]
fn fresh_selector_reports_zeroed_stats() {
    let (selector, _pool) = selector();

    assert_eq!(selector.stats(), SelectorStats::default());
    selector.close();
}

#[test]
fn clones_share_the_same_selector() {
    let (selector, _pool) = selector();
    let clone = selector.clone();

    let _listener = clone.bind("127.0.0.1:0").expect("Failed to bind listener");

    selector.close();
    assert!(clone.is_closed());

    let err = clone.bind("127.0.0.1:0").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}
