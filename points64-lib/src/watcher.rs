use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::warn;

use crate::sm64::Sm64;

/// One poll per display frame.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryChange {
    pub old_value: Vec<u8>,
    pub new_value: Vec<u8>,
}

/// A running periodic watch over a byte range. The channel completes when
/// the watched process dies or the watch is unsubscribed.
pub struct MemoryWatch {
    receiver: mpsc::Receiver<MemoryChange>,
    task: JoinHandle<()>,
}

impl MemoryWatch {
    pub async fn changed(&mut self) -> Option<MemoryChange> {
        self.receiver.recv().await
    }

    /// Stops polling. Idempotent.
    pub fn unsubscribe(&self) {
        self.task.abort();
    }
}

impl Drop for MemoryWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Re-reads `length` bytes at the base-relative `offset` every
/// `poll_interval` and emits a change whenever the content differs from the
/// last observed value. The first successful read is emitted as a synthetic
/// baseline with `old_value == new_value`.
///
/// Each tick is an independent read; ticks are never queued behind a
/// stalled one. A failed read logs and waits for the next tick. Watches
/// over overlapping regions are independent.
pub fn watch_bytes(
    memory: Arc<Sm64>,
    offset: usize,
    length: usize,
    poll_interval: Duration,
) -> MemoryWatch {
    let (sender, receiver) = mpsc::channel(16);
    let task = tokio::spawn(async move {
        let mut ticks = interval(poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last: Option<Vec<u8>> = None;
        loop {
            ticks.tick().await;
            if !memory.is_alive() {
                break;
            }
            let mut value = vec![0; length];
            if let Err(err) = memory.read(offset, &mut value) {
                warn!("watch read of {length} bytes at {offset:#x} failed: {err}");
                continue;
            }
            let change = match &last {
                None => MemoryChange {
                    old_value: value.clone(),
                    new_value: value.clone(),
                },
                Some(previous) if *previous != value => MemoryChange {
                    old_value: previous.clone(),
                    new_value: value.clone(),
                },
                Some(_) => continue,
            };
            last = Some(value);
            if sender.send(change).await.is_err() {
                break;
            }
        }
    });
    MemoryWatch { receiver, task }
}
