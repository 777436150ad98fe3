use parking_lot::{Condvar, Mutex};

/// First-come first-served admission for connect sequences.
///
/// Every caller draws a ticket and waits until its ticket is served; the
/// returned [`QueueTurn`] serves the next ticket when dropped, whether the
/// sequence succeeded, failed or panicked.
pub(crate) struct ConnectQueue {
    state: Mutex<QueueState>,
    turn_changed: Condvar,
}

struct QueueState {
    next_ticket: u64,
    serving: u64,
}

impl ConnectQueue {
    pub(crate) fn new() -> Self {
        ConnectQueue {
            state: Mutex::new(QueueState {
                next_ticket: 0,
                serving: 0,
            }),
            turn_changed: Condvar::new(),
        }
    }

    pub(crate) fn enter(&self) -> QueueTurn<'_> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        if ticket != state.serving {
            log::debug!(
                "Connect queued behind {} earlier request(s)",
                ticket - state.serving
            );
        }
        while state.serving != ticket {
            self.turn_changed.wait(&mut state);
        }
        QueueTurn { queue: self }
    }

    /// Requests admitted or waiting, including the one being served.
    #[cfg(test)]
    pub(crate) fn len(&self) -> u64 {
        let state = self.state.lock();
        state.next_ticket - state.serving
    }
}

pub(crate) struct QueueTurn<'a> {
    queue: &'a ConnectQueue,
}

impl Drop for QueueTurn<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.serving += 1;
        self.queue.turn_changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awaitility::at_most;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_turns_are_released() {
        let queue = ConnectQueue::new();
        {
            let _turn = queue.enter();
            assert_eq!(queue.len(), 1);
        }
        assert_eq!(queue.len(), 0);
        let _turn = queue.enter();
    }

    #[test]
    fn test_waiters_are_served_in_arrival_order() {
        let queue = Arc::new(ConnectQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let first_turn = queue.enter();

        let mut handles = Vec::new();
        for i in 0..4u64 {
            let waiter = queue.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                let _turn = waiter.enter();
                order.lock().push(i);
            }));
            // each waiter must have drawn its ticket before the next starts
            let expected = i + 2;
            let watcher = queue.clone();
            at_most(Duration::from_secs(5)).until(move || watcher.len() == expected);
        }

        drop(first_turn);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }
}
