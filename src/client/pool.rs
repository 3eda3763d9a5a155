use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};

/// Streams kept per object id. Acquisition blocks when the pool is at
/// capacity until a stream is returned.
pub const STREAM_POOL_CAPACITY: usize = 10;

/// Opens a fresh stream to the peer for one object id.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Stream: Send;

    async fn connect(&self) -> AppResult<Self::Stream>;
}

/// Bounded pool of reusable client streams.
///
/// Callers `get` a stream, and either `put` it back after a successful
/// response read or `discard` it on error, which closes the stream and
/// frees its capacity slot.
pub struct StreamPool<C: Connect> {
    connector: C,
    capacity: usize,
    active: AtomicUsize,
    idle_tx: mpsc::Sender<C::Stream>,
    idle_rx: Mutex<mpsc::Receiver<C::Stream>>,
}

impl<C: Connect> StreamPool<C> {
    pub fn new(connector: C) -> Self {
        Self::with_capacity(connector, STREAM_POOL_CAPACITY)
    }

    pub fn with_capacity(connector: C, capacity: usize) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(capacity.max(1));
        StreamPool {
            connector,
            capacity,
            active: AtomicUsize::new(0),
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn try_reserve(&self) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.capacity {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Acquires a stream: an idle one if available, a fresh one while under
    /// capacity, otherwise waits for a return.
    pub async fn get(&self) -> AppResult<C::Stream> {
        let mut idle = self.idle_rx.lock().await;

        if let Ok(stream) = idle.try_recv() {
            return Ok(stream);
        }

        if self.try_reserve() {
            // don't hold the idle queue while dialing
            drop(idle);
            match self.connector.connect().await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        match idle.recv().await {
            Some(stream) => Ok(stream),
            None => Err(crate::error::AppError::Transport(
                "stream pool closed".to_string(),
            )),
        }
    }

    /// Returns a healthy stream to the pool after a successful response.
    pub fn put(&self, stream: C::Stream) {
        if self.idle_tx.try_send(stream).is_err() {
            // queue full or closed; drop the stream and free its slot
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Drops an erroring stream and frees its capacity slot. The stream
    /// itself is closed by the caller dropping it.
    pub fn discard(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
