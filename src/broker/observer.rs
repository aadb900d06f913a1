use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Completion = (oneshot::Sender<usize>, usize);

struct PendingWaiter {
    target: usize,
    tx: oneshot::Sender<usize>,
}

#[derive(Default)]
struct ObserverState {
    count: usize,
    pending: Vec<PendingWaiter>,
}

/// One-shot, multi-waiter notification over a counter.
///
/// Each waiter completes once, the first time the counter is at or above its
/// target. Completions are never delivered from inside [`notify`] or
/// [`register`]: they are queued to a delivery task on the runtime and reach
/// waiters in the order they became satisfied.
///
/// The guarantee is relative to the notifying call stack. On a
/// `current_thread` runtime a waiter also cannot see its completion before
/// the notifying task yields; on a multi-threaded runtime another worker may
/// deliver it while the caller of [`notify`] is still running.
///
/// [`notify`]: ThresholdObserver::notify
/// [`register`]: ThresholdObserver::register
pub struct ThresholdObserver {
    state: Mutex<ObserverState>,
    deliveries: mpsc::UnboundedSender<Vec<Completion>>,
}

impl ThresholdObserver {
    /// Create an observer. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::new_in(&tokio::runtime::Handle::current())
    }

    pub fn new_in(runtime: &tokio::runtime::Handle) -> Self {
        let (deliveries, rx) = mpsc::unbounded_channel();
        runtime.spawn(deliver(rx));

        Self {
            state: Mutex::new(ObserverState::default()),
            deliveries,
        }
    }

    /// Wait for the counter to reach `target`
    pub fn register(&self, target: usize) -> ThresholdWaiter {
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        if state.count >= target {
            self.post(vec![(tx, state.count)]);
        } else {
            state.pending.push(PendingWaiter { target, tx });
        }

        ThresholdWaiter {
            target,
            rx,
            fired: None,
        }
    }

    /// Record a new counter value and release every waiter it satisfies
    pub fn notify(&self, count: usize) {
        let mut state = self.state.lock();
        state.count = count;

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|w| w.target <= count);
        state.pending = waiting;

        if !ready.is_empty() {
            debug!("Counter reached {}, releasing {} waiter(s)", count, ready.len());
            self.post(ready.into_iter().map(|w| (w.tx, count)).collect());
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Waiters still below their target
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn post(&self, batch: Vec<Completion>) {
        // The runtime is gone; nobody is left to observe the waiters.
        let _ = self.deliveries.send(batch);
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Vec<Completion>>) {
    while let Some(batch) = rx.recv().await {
        for (tx, count) in batch {
            let _ = tx.send(count);
        }
    }
}

/// Completion handle returned by [`ThresholdObserver::register`].
///
/// Resolves to the counter value that satisfied the target. If the observer
/// goes away first it never resolves.
#[derive(Debug)]
pub struct ThresholdWaiter {
    target: usize,
    rx: oneshot::Receiver<usize>,
    fired: Option<usize>,
}

impl ThresholdWaiter {
    pub fn target(&self) -> usize {
        self.target
    }

    /// Whether the completion has been delivered, without waiting for it
    pub fn is_fired(&mut self) -> bool {
        if self.fired.is_none() {
            if let Ok(count) = self.rx.try_recv() {
                self.fired = Some(count);
            }
        }
        self.fired.is_some()
    }
}

impl Future for ThresholdWaiter {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        let this = self.get_mut();
        if let Some(count) = this.fired {
            return Poll::Ready(count);
        }

        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(count)) => {
                this.fired = Some(count);
                Poll::Ready(count)
            }
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}
