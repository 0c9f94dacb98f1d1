//! Tick fan-out shared by the metronome and the poll hub

use super::Tick;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Callback invoked synchronously for every emitted tick
pub type Listener = Arc<dyn Fn(&Tick) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
    streams: Vec<mpsc::UnboundedSender<Tick>>,
}

/// Fans ticks out to callbacks and channel subscribers
#[derive(Clone, Default)]
pub struct TickEmitter {
    registry: Arc<Mutex<Registry>>,
}

impl TickEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; keep the returned handle to remove it later
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Tick) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Open a channel subscription
    ///
    /// Ticks emitted before the consumer awaits are buffered in the channel.
    pub fn subscribe(&self) -> TickStream {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.registry).streams.push(tx);
        TickStream { rx }
    }

    /// Deliver a tick to every listener and open stream
    pub fn emit(&self, tick: &Tick) {
        let listeners: Vec<Listener> = {
            let mut registry = lock(&self.registry);
            registry.streams.retain(|tx| tx.send(tick.clone()).is_ok());
            registry.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in listeners {
            listener(tick);
        }
    }

    /// End every open stream; consumers drain what is buffered, then see `None`
    pub fn close_streams(&self) {
        lock(&self.registry).streams.clear();
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    /// Number of open channel subscriptions
    pub fn stream_count(&self) -> usize {
        let mut registry = lock(&self.registry);
        registry.streams.retain(|tx| !tx.is_closed());
        registry.streams.len()
    }
}

// Listener panics never happen under the lock, so poisoning only means a
// panic elsewhere in the holder; the registry itself stays consistent.
fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle returned by [`TickEmitter::on`]
///
/// Dropping the handle leaves the listener registered.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the listener
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Single-consumer async tick sequence
pub struct TickStream {
    rx: mpsc::UnboundedReceiver<Tick>,
}

impl TickStream {
    /// Wait for the next tick; `None` once the source stopped and the buffer is empty
    pub async fn recv(&mut self) -> Option<Tick> {
        self.rx.recv().await
    }

    /// Take a buffered tick without waiting
    pub fn try_recv(&mut self) -> Option<Tick> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving; buffered ticks can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for TickStream {
    type Item = Tick;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Tick>> {
        self.rx.poll_recv(cx)
    }
}
