//! Bounded per-epoch queue of training pairs, fed by producer threads.
//!
//! One `EpochBuffer` covers one pass over the training pool. The first
//! `capacity` pairs may be pushed synchronously (`prefill`); the remainder is
//! split across worker threads that block whenever the queue is full. The
//! consumer pops with a timeout, so a stalled producer surfaces as
//! [`RankingError::BufferStarvation`] instead of a hang.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::RankingError;
use crate::training::data::{EmbeddingPair, TrainingPool};

type Delivery = Result<Arc<EmbeddingPair>, RankingError>;

pub(crate) struct EpochBuffer {
    receiver: Option<Receiver<Delivery>>,
    /// Held until workers are spawned, then handed out and dropped.
    sender: Option<SyncSender<Delivery>>,
    /// Pool indices not yet assigned to any producer, in epoch order.
    pending: Vec<usize>,
    /// Pairs of this epoch not yet popped by the consumer.
    remaining: usize,
    workers: Vec<JoinHandle<()>>,
}

impl EpochBuffer {
    pub(crate) fn new(order: Vec<usize>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        Self {
            receiver: Some(receiver),
            sender: Some(sender),
            remaining: order.len(),
            pending: order,
            workers: Vec::new(),
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn has_workers(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Whether producers were already started for this epoch.
    pub(crate) fn is_started(&self) -> bool {
        self.sender.is_none()
    }

    /// Push up to `count` pairs on the calling thread.
    ///
    /// `count` must not exceed the queue capacity, or this blocks forever.
    pub(crate) fn prefill(&mut self, pool: &TrainingPool, count: usize) -> Result<usize, RankingError> {
        let Some(sender) = &self.sender else {
            return Ok(0);
        };
        let count = count.min(self.pending.len());
        for &index in &self.pending[..count] {
            let pair = pool.fetch(index)?;
            sender
                .send(Ok(pair))
                .map_err(|_| RankingError::unavailable(pool.dataset_name(), "training buffer closed"))?;
        }
        self.pending.drain(..count);
        Ok(count)
    }

    /// Hand every pending index to `num_workers` producer threads.
    pub(crate) fn spawn_workers(
        &mut self,
        pool: Arc<TrainingPool>,
        num_workers: usize,
    ) -> Result<usize, RankingError> {
        let Some(sender) = self.sender.take() else {
            return Ok(0);
        };
        if self.pending.is_empty() {
            return Ok(0);
        }

        let pending = std::mem::take(&mut self.pending);
        let chunk_size = pending.len().div_ceil(num_workers.max(1));
        for (worker_id, chunk) in pending.chunks(chunk_size).enumerate() {
            let indices = chunk.to_vec();
            let pool = Arc::clone(&pool);
            let sender = sender.clone();
            let handle = std::thread::Builder::new()
                .name(format!("pair-filler-{worker_id}"))
                .spawn(move || fill_worker(&pool, indices, sender))?;
            self.workers.push(handle);
        }
        Ok(self.workers.len())
    }

    /// Pop the next pair, waiting at most `timeout`.
    pub(crate) fn pop(&mut self, timeout: Duration, dataset: &str) -> Result<Arc<EmbeddingPair>, RankingError> {
        let Some(receiver) = &self.receiver else {
            return Err(RankingError::unavailable(dataset, "training buffer closed"));
        };
        match receiver.recv_timeout(timeout) {
            Ok(Ok(pair)) => {
                self.remaining = self.remaining.saturating_sub(1);
                Ok(pair)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(RankingError::BufferStarvation {
                timeout_ms: timeout.as_millis() as u64,
                remaining: self.remaining,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(RankingError::unavailable(
                dataset,
                format!("producers exited with {} pairs undelivered", self.remaining),
            )),
        }
    }

    /// Wait for every producer to finish.
    ///
    /// Undelivered pairs are discarded first, so producers blocked on a full
    /// queue observe the closed channel and exit.
    pub(crate) fn join_workers(&mut self, dataset: &str) -> Result<(), RankingError> {
        if self.remaining > 0 {
            self.receiver = None;
        }
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(RankingError::unavailable(
                dataset,
                format!("{panicked} buffer fill worker(s) panicked"),
            ));
        }
        Ok(())
    }
}

impl Drop for EpochBuffer {
    fn drop(&mut self) {
        self.receiver = None;
        self.sender = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn fill_worker(pool: &TrainingPool, indices: Vec<usize>, sender: SyncSender<Delivery>) {
    for index in indices {
        let delivery = pool.fetch(index);
        let failed = delivery.is_err();
        if sender.send(delivery).is_err() {
            tracing::debug!("Training buffer closed, fill worker exiting");
            return;
        }
        if failed {
            return;
        }
    }
}
