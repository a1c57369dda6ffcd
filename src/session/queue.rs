use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::OverflowPolicy;

/// Producer side of the bounded frame queue between the socket reader and the worker.
///
/// Capture is usually faster than detection, so pushing never blocks: on overflow either the
/// oldest queued frame or the incoming one is discarded.
pub struct FrameQueue {
    tx: Sender<Vec<u8>>,
    // Held only to evict the oldest entry
    evict: Receiver<Vec<u8>>,
    policy: OverflowPolicy,
    dropped: u64,
}

impl FrameQueue {
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let queue = FrameQueue {
            tx,
            evict: rx.clone(),
            policy,
            dropped: 0,
        };
        (queue, rx)
    }
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
    pub fn push(&mut self, frame: Vec<u8>) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                // Disconnected cannot happen while `evict` is alive
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.dropped += 1;
                        return;
                    }
                    OverflowPolicy::DropOldest => {
                        // The worker may have drained the slot meanwhile; retry either way
                        if self.evict.try_recv().is_ok() {
                            self.dropped += 1;
                        }
                        frame = rejected;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &Receiver<Vec<u8>>) -> Vec<u8> {
        rx.try_iter().map(|f| f[0]).collect()
    }

    #[test]
    fn test_drop_oldest() {
        let (mut queue, rx) = FrameQueue::bounded(2, OverflowPolicy::DropOldest);
        for i in 0..5u8 {
            queue.push(vec![i]);
        }
        assert_eq!(drain(&rx), vec![3, 4]);
        assert_eq!(queue.dropped(), 3);
    }

    #[test]
    fn test_drop_newest() {
        let (mut queue, rx) = FrameQueue::bounded(2, OverflowPolicy::DropNewest);
        for i in 0..5u8 {
            queue.push(vec![i]);
        }
        assert_eq!(drain(&rx), vec![0, 1]);
        assert_eq!(queue.dropped(), 3);
    }
}
