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

use std::time::Duration;

use clap::Parser;

use tokio::sync::Semaphore;

use crate::error::{P4rtError, Result};

/// Tuning for a [`Client`](crate::Client) and its write pipeline.
///
/// This derives `clap::Parser` so that binaries can `#[clap(flatten)]` it into their own options.
#[derive(Clone, Debug, Parser)]
pub struct ClientConfig {
    /// Maximum number of updates carried by a single Write RPC.
    #[clap(long, default_value_t = 200)]
    pub max_batch_size: usize,

    /// Number of workers draining the write queue for each client.
    #[clap(long, default_value_t = 1)]
    pub write_workers: usize,

    /// Write queue capacity, in units of `max_batch_size * write_workers`.
    #[clap(long, default_value_t = 10)]
    pub buffer_multiplier: usize,

    /// Maximum number of batch results being delivered concurrently.
    #[clap(long, default_value_t = 64)]
    pub resolver_limit: usize,

    /// Wait at most this many milliseconds for a new connection to become ready.
    #[clap(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Fail a batch with DEADLINE_EXCEEDED if its Write RPC takes longer than this.
    #[clap(long)]
    pub write_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_batch_size: 200,
            write_workers: 1,
            buffer_multiplier: 10,
            resolver_limit: 64,
            connect_timeout_ms: None,
            write_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Number of writes that can be queued before `Client::write` has to wait.
    pub fn queue_capacity(&self) -> usize {
        self.max_batch_size
            .saturating_mul(self.write_workers)
            .saturating_mul(self.buffer_multiplier)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_batch_size", self.max_batch_size),
            ("write_workers", self.write_workers),
            ("buffer_multiplier", self.buffer_multiplier),
            ("resolver_limit", self.resolver_limit),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(P4rtError::Config(format!("{name} must be at least 1")));
            }
        }

        let max = Semaphore::MAX_PERMITS;
        if self.resolver_limit > max {
            return Err(P4rtError::Config(format!("resolver_limit must be at most {max}")));
        }
        let capacity = self
            .max_batch_size
            .checked_mul(self.write_workers)
            .and_then(|n| n.checked_mul(self.buffer_multiplier));
        match capacity {
            Some(capacity) if capacity <= max => Ok(()),
            _ => Err(P4rtError::Config(format!(
                "write queue capacity (max_batch_size * write_workers * buffer_multiplier) must be at most {max}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_capacity() {
        assert_eq!(ClientConfig::default().queue_capacity(), 2000);
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = ClientConfig { write_workers: 0, ..Default::default() };
        match config.validate() {
            Err(P4rtError::Config(message)) => assert!(message.contains("write_workers")),
            other => panic!("expected config error, got {:?}", other),
        }
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn oversized_values_are_rejected() {
        let config = ClientConfig { resolver_limit: usize::MAX, ..Default::default() };
        assert!(matches!(config.validate(), Err(P4rtError::Config(_))));

        let config = ClientConfig {
            max_batch_size: usize::MAX / 2,
            write_workers: 4,
            ..Default::default()
        };
        match config.validate() {
            Err(P4rtError::Config(message)) => assert!(message.contains("queue capacity")),
            other => panic!("expected config error, got {:?}", other),
        }

        // Large, but still within what the queue can hold.
        let config = ClientConfig { max_batch_size: 1 << 20, write_workers: 64, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_flags() {
        let config = ClientConfig::parse_from([
            "test",
            "--max-batch-size",
            "16",
            "--write-workers",
            "4",
            "--write-timeout-ms",
            "250",
        ]);
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.write_workers, 4);
        assert_eq!(config.queue_capacity(), 16 * 4 * 10);
        assert_eq!(config.write_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.connect_timeout(), None);
    }
}
