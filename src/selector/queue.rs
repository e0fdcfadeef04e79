use crate::selector::manager::closed_error;
use crate::selector::request::Request;

use std::io;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, sync_channel};

/// Creates the bounded submission channel between producers and the
/// selector loop.
///
/// Producers hold cloned [`Submitter`]s; the loop owns the single
/// [`SubmissionQueue`] consumer.
pub(crate) fn submission_queue(capacity: usize) -> (Submitter, SubmissionQueue) {
    let (tx, rx) = sync_channel(capacity);

    (Submitter { tx }, SubmissionQueue { rx })
}

/// Producer side of the submission channel.
///
/// `submit` blocks when the queue is at capacity. The block resolves
/// either when the loop drains an entry or when the selector closes
/// and the loop drops the consumer, in which case the submission fails
/// with a closed error rather than being silently dropped.
#[derive(Clone)]
pub(crate) struct Submitter {
    tx: SyncSender<Request>,
}

impl Submitter {
    pub(crate) fn submit(&self, request: Request) -> io::Result<()> {
        self.tx.send(request).map_err(|_| closed_error())
    }
}

/// Consumer side of the submission channel. Loop thread only.
pub(crate) struct SubmissionQueue {
    rx: Receiver<Request>,
}

impl SubmissionQueue {
    /// Removes and returns the oldest queued request, without blocking.
    ///
    /// Per-producer submission order is preserved; ordering across
    /// producers is whatever the channel observed.
    pub(crate) fn try_next(&mut self) -> Option<Request> {
        match self.rx.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::submission_queue;
    use crate::selector::handle::{Interest, RawFd, Selectable};
    use crate::selector::request::Request;

    use std::io;
    use std::sync::Arc;

    struct Inert(RawFd);

    impl Selectable for Inert {
        fn raw_fd(&self) -> RawFd {
            self.0
        }

        fn interest(&self) -> Interest {
            Interest::READABLE
        }

        fn on_ready(&self) {}

        fn on_failed(&self, _error: io::Error) {}
    }

    #[test]
    fn drains_in_submission_order() {
        let (submitter, mut queue) = submission_queue(8);

        for fd in 0..3 {
            submitter
                .submit(Request::Register(Arc::new(Inert(fd as RawFd))))
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(Request::Register(handle)) = queue.try_next() {
            seen.push(handle.raw_fd());
        }

        assert_eq!(seen, vec![0, 1, 2]);
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn submit_fails_once_consumer_is_gone() {
        let (submitter, queue) = submission_queue(8);
        drop(queue);

        let err = submitter
            .submit(Request::Register(Arc::new(Inert(0 as RawFd))))
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn blocked_submit_resolves_when_consumer_drops() {
        let (submitter, queue) = submission_queue(1);

        submitter
            .submit(Request::Register(Arc::new(Inert(0 as RawFd))))
            .unwrap();

        let blocked = {
            let submitter = submitter.clone();
            std::thread::spawn(move || submitter.submit(Request::Register(Arc::new(Inert(1)))))
        };

        // Give the producer time to block on the full queue, then
        // close the consumer side out from under it.
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(queue);

        let err = blocked.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
