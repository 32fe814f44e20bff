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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};

use tracing::{event, Level};

use crate::demux::WriteOutcome;

/// Statistics for one completed Write RPC.
#[derive(Clone, Debug)]
pub struct WriteTrace {
    pub batch_size: usize,
    /// Wall-clock time spent in the RPC.
    pub duration: Duration,
    /// The outcome delivered for each update, in batch order.
    pub outcomes: Vec<WriteOutcome>,
}

impl WriteTrace {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_err()).count()
    }
}

/// Best-effort delivery of [`WriteTrace`]s to an optional observer channel.
#[derive(Debug, Default)]
pub(crate) struct TraceEmitter {
    channel: RwLock<Option<mpsc::Sender<WriteTrace>>>,
    dropped: AtomicU64,
}

impl TraceEmitter {
    pub fn set_channel(&self, channel: Option<mpsc::Sender<WriteTrace>>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = channel;
    }

    /// Number of traces discarded because the observer's channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Never waits: a full channel loses the trace.
    pub fn emit(&self, trace: WriteTrace) {
        let channel = self.channel.read().unwrap_or_else(PoisonError::into_inner);
        let channel = match channel.as_ref() {
            Some(channel) => channel,
            None => return,
        };
        match channel.try_send(trace) {
            Ok(()) => (),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                event!(Level::WARN, "write trace channel full, discarding trace");
            }
            Err(TrySendError::Closed(_)) => {
                event!(Level::DEBUG, "write trace receiver closed, discarding trace");
            }
        }
    }
}
