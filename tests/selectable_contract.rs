#![cfg(unix)]

use sockmux::dispatch::ThreadPool;
use sockmux::{Interest, RawFd, Selectable, SelectorManager};

use std::io;
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, PartialEq)]
enum Outcome {
    Ready,
    Failed(io::ErrorKind),
}

/// A bare-bones registrant observing its callbacks through a channel.
struct Probe {
    fd: RawFd,
    ops: Interest,
    outcomes: Mutex<Sender<Outcome>>,
}

impl Probe {
    fn new(fd: RawFd, ops: Interest) -> (Arc<Self>, Receiver<Outcome>) {
        let (tx, rx) = channel();

        let probe = Arc::new(Self {
            fd,
            ops,
            outcomes: Mutex::new(tx),
        });

        (probe, rx)
    }
}

impl Selectable for Probe {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn interest(&self) -> Interest {
        self.ops
    }

    fn on_ready(&self) {
        let _ = self.outcomes.lock().unwrap().send(Outcome::Ready);
    }

    fn on_failed(&self, error: io::Error) {
        let _ = self.outcomes.lock().unwrap().send(Outcome::Failed(error.kind()));
    }
}

fn selector() -> (SelectorManager, Arc<ThreadPool>) {
    let pool = Arc::new(ThreadPool::new(2));
    let selector = SelectorManager::new(pool.clone());

    (selector, pool)
}

#[test]
fn readiness_dispatches_once_until_rearmed() {
    let (selector, _pool) = selector();

    let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind probe socket");
    let (probe, outcomes) = Probe::new(socket.as_raw_fd(), Interest::WRITABLE);

    // A UDP socket is writable immediately, so readiness fires as soon
    // as the registration is applied.
    selector.submit(probe.clone()).expect("Failed to submit");
    assert_eq!(
        outcomes.recv_timeout(Duration::from_secs(5)),
        Ok(Outcome::Ready)
    );

    // Interest was disarmed before dispatch: the still-writable socket
    // must not be reported again until the handle is re-armed.
    assert!(outcomes.recv_timeout(Duration::from_millis(300)).is_err());

    selector.submit(probe).expect("Failed to re-submit");
    assert_eq!(
        outcomes.recv_timeout(Duration::from_secs(5)),
        Ok(Outcome::Ready)
    );

    selector.close();
}

#[test]
fn registration_race_fails_into_the_handle() {
    let (selector, _pool) = selector();

    let (probe, outcomes) = Probe::new(-1, Interest::READABLE);

    selector.submit(probe).expect("Failed to submit");

    match outcomes.recv_timeout(Duration::from_secs(5)) {
        Ok(Outcome::Failed(_)) => {}
        other => panic!("Expected a registration failure, got {other:?}"),
    }

    assert_eq!(selector.stats().registration_races, 1);
    selector.close();
}

#[test]
fn cancellation_prevents_future_dispatch() {
    let (selector, _pool) = selector();

    let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind probe socket");
    let addr = socket.local_addr().expect("Failed to get local address");
    let (probe, outcomes) = Probe::new(socket.as_raw_fd(), Interest::READABLE);

    // Armed for readable with no datagram pending: stays quiet.
    selector.submit(probe.clone()).expect("Failed to submit");
    assert!(outcomes.recv_timeout(Duration::from_millis(200)).is_err());

    selector.cancel(probe).expect("Failed to cancel");
    thread::sleep(Duration::from_millis(100));

    // Data arriving after the cancellation completed must not reach
    // the handle.
    let sender = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind sender socket");
    sender.send_to(b"x", addr).expect("Failed to send datagram");

    assert!(outcomes.recv_timeout(Duration::from_millis(300)).is_err());

    selector.close();
}

#[test]
fn close_fails_registered_handles() {
    let (selector, _pool) = selector();

    let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind probe socket");
    let (probe, outcomes) = Probe::new(socket.as_raw_fd(), Interest::READABLE);

    selector.submit(probe).expect("Failed to submit");
    assert!(outcomes.recv_timeout(Duration::from_millis(200)).is_err());

    selector.close();

    assert_eq!(
        outcomes.recv_timeout(Duration::from_secs(5)),
        Ok(Outcome::Failed(io::ErrorKind::NotConnected))
    );
}

#[test]
fn submissions_after_close_fail_fast() {
    let (selector, _pool) = selector();

    let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind probe socket");
    let (probe, _outcomes) = Probe::new(socket.as_raw_fd(), Interest::READABLE);

    // Start the loop, then close it.
    selector.bind("127.0.0.1:0").expect("Failed to bind listener");
    selector.close();

    let err = selector.submit(probe).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}
