/*
Copyright (c) 2021 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! The asynchronous write pipeline.
//!
//! [`WritePipeline::submit`] copies an update into a bounded queue together with a one-shot
//! reply channel.  Workers block only for the first update of a batch, then take whatever else
//! is already queued, up to the batch limit, and send the batch as one Write RPC.  Delivering the
//! RPC's outcome back to the callers is handed off to a separate task so that the worker can
//! start on the next batch right away.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use grpcio::{RpcStatus, RpcStatusCode};

use proto::p4runtime::{Update, WriteRequest};

use protobuf::RepeatedField;

use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;

use tracing::{event, Level};

use crate::config::ClientConfig;
use crate::demux::{self, WriteError, WriteOutcome};
use crate::mastership::ElectionCell;
use crate::trace::TraceEmitter;
use crate::transport::Connection;

/// A queued update and the channel its outcome goes back on.
pub(crate) struct PendingWrite {
    update: Update,
    respond_to: oneshot::Sender<WriteOutcome>,
}

/// Resolves to the outcome of one submitted update.
///
/// Every handle resolves exactly once.  If the client is torn down before the update's batch
/// completes, the outcome is an ABORTED error.
#[must_use = "a write handle does nothing unless awaited"]
pub struct WriteHandle {
    receiver: oneshot::Receiver<WriteOutcome>,
}

impl WriteHandle {
    /// Waits for the outcome from outside of an async context.  Panics if called from within
    /// an async runtime.
    pub fn blocking_wait(self) -> WriteOutcome {
        self.receiver.blocking_recv().unwrap_or_else(|_| Err(abandoned()))
    }
}

impl Future for WriteHandle {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(abandoned())))
    }
}

fn abandoned() -> WriteError {
    WriteError::aborted("write pipeline shut down before the write completed")
}

/// Everything a worker needs to turn a batch into a Write RPC and resolve it.
pub(crate) struct Dispatcher {
    pub device_id: u64,
    pub connection: Arc<dyn Connection>,
    pub election_id: Arc<ElectionCell>,
    pub trace: Arc<TraceEmitter>,
    pub max_batch_size: usize,
    pub write_timeout: Option<Duration>,
    pub resolvers: Arc<Semaphore>,
}

impl Dispatcher {
    fn request(&self, updates: Vec<Update>) -> WriteRequest {
        let mut request = WriteRequest::new();
        request.set_device_id(self.device_id);
        if let Some(election_id) = self.election_id.get() {
            request.set_election_id(election_id.into());
        }
        request.set_updates(RepeatedField::from_vec(updates));
        request
    }

    async fn dispatch(&self, batch: Vec<PendingWrite>) {
        let (updates, sinks): (Vec<Update>, Vec<oneshot::Sender<WriteOutcome>>) = batch
            .into_iter()
            .map(|pending| (pending.update, pending.respond_to))
            .unzip();
        let request = self.request(updates);

        let start = Instant::now();
        let write = self.connection.write(request);
        let result = match self.write_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, write).await {
                Ok(result) => result,
                Err(_) => Err(grpcio::Error::RpcFailure(RpcStatus::with_details(
                    RpcStatusCode::DEADLINE_EXCEEDED,
                    format!("write did not complete within {timeout:?}"),
                    Vec::new(),
                ))),
            },
            None => write.await,
        };
        let duration = start.elapsed();
        let result = result.map(|_| ());

        event!(
            Level::DEBUG,
            "{}: device {}: wrote batch of {} in {duration:?}",
            self.connection.target(),
            self.device_id,
            sinks.len()
        );

        match self.resolvers.clone().acquire_owned().await {
            Ok(permit) => {
                let trace = self.trace.clone();
                tokio::spawn(async move {
                    demux::resolve(sinks, result, duration, &trace);
                    drop(permit);
                });
            }
            // The semaphore is never closed, but if it were, resolve in place.
            Err(_) => demux::resolve(sinks, result, duration, &self.trace),
        }
    }
}

/// Takes one batch from `queue`: waits for the first item, then adds items that are already
/// queued until `max` is reached or the queue is momentarily empty.  An empty batch means the
/// queue is closed and drained.
pub(crate) async fn next_batch<T>(queue: &mut mpsc::Receiver<T>, max: usize) -> Vec<T> {
    let mut batch = Vec::new();
    match queue.recv().await {
        Some(first) => batch.push(first),
        None => return batch,
    }
    while batch.len() < max {
        match queue.try_recv() {
            Ok(item) => batch.push(item),
            Err(_) => break,
        }
    }
    batch
}

async fn run_worker(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<PendingWrite>>>,
    dispatcher: Arc<Dispatcher>,
) {
    loop {
        let batch = {
            let mut queue = queue.lock().await;
            next_batch(&mut queue, dispatcher.max_batch_size).await
        };
        if batch.is_empty() {
            break;
        }
        dispatcher.dispatch(batch).await;
    }
    event!(
        Level::DEBUG,
        "{}: device {}: write worker {worker} exiting",
        dispatcher.connection.target(),
        dispatcher.device_id
    );
}

pub(crate) struct WritePipeline {
    sender: mpsc::Sender<PendingWrite>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WritePipeline {
    pub fn start(config: &ClientConfig, dispatcher: Dispatcher) -> WritePipeline {
        let capacity = config.queue_capacity();
        let (sender, receiver) = mpsc::channel(capacity);
        let queue = Arc::new(Mutex::new(receiver));
        let dispatcher = Arc::new(dispatcher);
        let workers = (0..config.write_workers)
            .map(|worker| tokio::spawn(run_worker(worker, queue.clone(), dispatcher.clone())))
            .collect();
        WritePipeline {
            sender,
            capacity,
            workers,
        }
    }

    fn pending(update: &Update) -> (PendingWrite, WriteHandle) {
        let (respond_to, receiver) = oneshot::channel();
        let pending = PendingWrite {
            update: update.clone(),
            respond_to,
        };
        (pending, WriteHandle { receiver })
    }

    /// Queues a copy of `update`, waiting for room if the queue is full.
    pub async fn submit(&self, update: &Update) -> WriteHandle {
        let (pending, handle) = Self::pending(update);
        if let Err(mpsc::error::SendError(pending)) = self.sender.send(pending).await {
            // Dropping `respond_to` resolves the handle as aborted.
            drop(pending);
        }
        handle
    }

    /// Like `submit`, for callers outside of an async context.
    pub fn blocking_submit(&self, update: &Update) -> WriteHandle {
        let (pending, handle) = Self::pending(update);
        if let Err(mpsc::error::SendError(pending)) = self.sender.blocking_send(pending) {
            drop(pending);
        }
        handle
    }

    /// Number of writes queued and not yet taken by a worker.
    pub fn remaining(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}

impl Drop for WritePipeline {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
