//! Two-thread producer/consumer handoff shared by the historical and
//! realtime sources.
//!
//! A dedicated reader thread blocks on I/O (an HTTP request, a Kafka
//! `poll()`) and hands completed batches of triples across to the pipeline's
//! pull thread one batch at a time, through a single-slot mailbox guarded by
//! one [`Mutex`] and two [`Condvar`]s: `producable` wakes the reader once the
//! slot has been drained, `consumable` wakes the puller once a new batch has
//! landed.
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::StageError;

struct Slot<T> {
    item: Option<Result<T, String>>,
    producable: bool,
    consumable: bool,
    done: bool,
    stop_requested: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    producable: Condvar,
    consumable: Condvar,
}

/// The reader-thread side of the handoff.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// The puller-thread (consumer) side of the handoff.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    handle: Option<JoinHandle<()>>,
}

/// Creates a new handoff with an empty single-item slot.
fn handoff<T: Send + 'static>() -> (Producer<T>, Arc<Shared<T>>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            item: None,
            producable: true,
            consumable: false,
            done: false,
            stop_requested: false,
        }),
        producable: Condvar::new(),
        consumable: Condvar::new(),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        shared,
    )
}

impl<T: Send + 'static> Producer<T> {
    /// Blocks until the slot is free, then deposits `item`. Returns `false`
    /// (without blocking further) if the consumer has requested a stop, in
    /// which case the reader thread should wind down.
    pub fn send(&self, item: Result<T, String>) -> bool {
        let mut slot = self.shared.slot.lock().expect("handoff mutex poisoned");
        while !slot.producable && !slot.stop_requested {
            slot = self
                .shared
                .producable
                .wait(slot)
                .expect("handoff mutex poisoned");
        }
        if slot.stop_requested {
            return false;
        }
        slot.item = Some(item);
        slot.producable = false;
        slot.consumable = true;
        self.shared.consumable.notify_one();
        true
    }

    /// Marks the stream as exhausted. The next (or a currently blocked)
    /// `Consumer::recv` call returns `None` once the slot has been drained.
    pub fn finish(self) {
        let mut slot = self.shared.slot.lock().expect("handoff mutex poisoned");
        slot.done = true;
        self.shared.consumable.notify_one();
    }
}

impl<T: Send + 'static> Consumer<T> {
    fn new(shared: Arc<Shared<T>>, handle: JoinHandle<()>) -> Self {
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Blocks until the reader has deposited an item, or signalled
    /// completion. Returns `None` once the reader is done and the slot has
    /// been drained.
    pub fn recv(&self) -> Option<Result<T, String>> {
        let mut slot = self.shared.slot.lock().expect("handoff mutex poisoned");
        loop {
            if let Some(item) = slot.item.take() {
                slot.consumable = false;
                slot.producable = true;
                self.shared.producable.notify_one();
                return Some(item);
            }
            if slot.done {
                return None;
            }
            slot = self
                .shared
                .consumable
                .wait(slot)
                .expect("handoff mutex poisoned");
        }
    }

    /// Requests the reader thread stop producing new items and waits for it
    /// to join. Used on pipeline shutdown (SIGINT) so the source doesn't
    /// outlive the process that owns it.
    pub fn stop(&mut self) {
        {
            let mut slot = self.shared.slot.lock().expect("handoff mutex poisoned");
            slot.stop_requested = true;
        }
        self.shared.producable.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock().expect("handoff mutex poisoned");
        slot.stop_requested = true;
        drop(slot);
        self.shared.producable.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns `reader` on a dedicated OS thread and returns a [`Consumer`] that
/// pulls its output through the handoff, converting each batch into an
/// iterator item. `stage` names the owning source for error messages.
pub fn spawn_reader<T, F>(stage: &'static str, reader: F) -> Consumer<T>
where
    T: Send + 'static,
    F: FnOnce(Producer<T>) + Send + 'static,
{
    let (producer, shared) = handoff();
    let handle = thread::Builder::new()
        .name(format!("sentry-source-{stage}"))
        .spawn(move || reader(producer))
        .expect("failed to spawn source reader thread");
    Consumer::new(shared, handle)
}

/// Adapts a [`Consumer`] of triple batches into the pipeline's
/// `Iterator<Item = Result<Triple, StageError>>` by flattening each batch.
pub struct HandoffIter<T, I>
where
    I: Iterator<Item = Result<crate::triple::Triple, StageError>>,
{
    stage: &'static str,
    consumer: Consumer<T>,
    to_iter: fn(T) -> I,
    current: Option<I>,
}

impl<T, I> HandoffIter<T, I>
where
    I: Iterator<Item = Result<crate::triple::Triple, StageError>>,
{
    pub fn new(stage: &'static str, consumer: Consumer<T>, to_iter: fn(T) -> I) -> Self {
        Self {
            stage,
            consumer,
            to_iter,
            current: None,
        }
    }
}

impl<T, I> Iterator for HandoffIter<T, I>
where
    I: Iterator<Item = Result<crate::triple::Triple, StageError>>,
{
    type Item = Result<crate::triple::Triple, StageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iter) = self.current.as_mut()
                && let Some(item) = iter.next()
            {
                return Some(item);
            }
            self.current = None;
            match self.consumer.recv() {
                None => return None,
                Some(Err(message)) => {
                    return Some(Err(StageError::ReaderFailed(format!(
                        "[{}] {message}",
                        self.stage
                    ))));
                }
                Some(Ok(batch)) => {
                    self.current = Some((self.to_iter)(batch));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hands_items_across_in_order() {
        let consumer = spawn_reader::<i32, _>("test", |producer| {
            for i in 0..5 {
                if !producer.send(Ok(i)) {
                    return;
                }
            }
            producer.finish();
        });
        let mut received = Vec::new();
        while let Some(item) = consumer.recv() {
            received.push(item.unwrap());
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn stop_unblocks_a_blocked_producer() {
        let mut consumer = spawn_reader::<i32, _>("test-stop", |producer| {
            for i in 0.. {
                if !producer.send(Ok(i)) {
                    return;
                }
            }
        });
        assert_eq!(consumer.recv().unwrap().unwrap(), 0);
        consumer.stop();
    }

    #[test]
    fn propagates_reader_error() {
        let consumer = spawn_reader::<i32, _>("test-err", |producer| {
            producer.send(Err("boom".to_string()));
            producer.finish();
        });
        assert!(consumer.recv().unwrap().is_err());
    }
}
