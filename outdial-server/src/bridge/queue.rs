use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct Frame<T> {
    control: bool,
    item: T,
}

struct QueueState<T> {
    frames: VecDeque<Frame<T>>,
    closed: bool,
    dropped: u64,
}

/// A bounded frame queue feeding one socket's send loop.
///
/// When full, the oldest *media* frame is dropped to make room; control
/// frames (clear, pong) are never dropped and may briefly push the queue
/// past its bound. Pushing never blocks, so the receive loops can't stall
/// behind a slow peer.
pub struct FrameQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    bound: usize,
}

impl<T> FrameQueue<T> {
    pub fn new(bound: usize) -> Self {
        FrameQueue {
            state: Mutex::new(QueueState {
                frames: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            bound,
        }
    }

    /// Enqueues a droppable media frame. Returns false when the frame (or an
    /// older one) had to be dropped to respect the bound.
    pub fn push_media(&self, item: T) -> bool {
        self.push(item, false)
    }

    /// Enqueues a control frame; never dropped.
    pub fn push_control(&self, item: T) {
        self.push(item, true);
    }

    fn push(&self, item: T, control: bool) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }

        let mut clean = true;
        if state.frames.len() >= self.bound {
            if let Some(pos) = state.frames.iter().position(|f| !f.control) {
                state.frames.remove(pos);
                state.dropped += 1;
                clean = false;
            } else if !control {
                // Nothing droppable and the newcomer is media: drop it.
                state.dropped += 1;
                return false;
            }
        }

        state.frames.push_back(Frame { control, item });
        drop(state);
        self.notify.notify_one();
        clean
    }

    /// Next frame, in order. `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame.item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().frames.len()
    }
}
