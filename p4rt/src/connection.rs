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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, OnceCell};

use tracing::{event, Instrument, Level};

use crate::error::Result;
use crate::transport::{Connection, ConnectionState, Connector};

/// The cache entry for one host.  Filled at most once.
type Slot = Arc<OnceCell<Arc<dyn Connection>>>;

/// Keeps one [`Connection`] per target host and watches each one's state.
///
/// Connections are never re-established automatically.  A connection that fails stays cached;
/// callers that want a fresh one must [`shutdown`](ConnectionRegistry::shutdown) the registry.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<String, Slot>>,
    /// Bumped on every shutdown; monitors exit on any change.
    shutdown: watch::Sender<u64>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (shutdown, _) = watch::channel(0);
        ConnectionRegistry {
            connector,
            connections: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached connection to `host`, establishing it first if there is none.
    ///
    /// Concurrent callers for the same new host wait for, and share, a single connection.
    /// Callers for other hosts do not wait.  If connecting fails, nothing is cached and the next
    /// call tries again.
    pub async fn get_connection(&self, host: &str) -> Result<Arc<dyn Connection>> {
        let slot = self.lock().entry(host.to_string()).or_default().clone();
        let connection = slot.get_or_try_init(|| self.connect(host)).await?;
        Ok(connection.clone())
    }

    async fn connect(&self, host: &str) -> Result<Arc<dyn Connection>> {
        let connection = self.connector.connect(host).await?;
        tokio::spawn(monitor(connection.clone(), self.shutdown.subscribe()).in_current_span());
        event!(Level::INFO, "{host}: connection established");
        Ok(connection)
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every state monitor and forgets all cached connections.  Connections stay open
    /// until the last client using them is dropped.
    pub fn shutdown(&self) {
        self.shutdown.send_modify(|generation| *generation += 1);
        self.lock().clear();
    }
}

/// Logs `connection`'s state transitions until it shuts down or `shutdown` fires.
async fn monitor(connection: Arc<dyn Connection>, mut shutdown: watch::Receiver<u64>) {
    let target = connection.target().to_string();
    let mut state = connection.state();
    event!(Level::INFO, "gRPC state update for {target}: {state:?}");
    while state != ConnectionState::Shutdown {
        tokio::select! {
            next = connection.wait_for_state_change(state) => {
                state = next;
                event!(Level::INFO, "gRPC state update for {target}: {state:?}");
            }
            _ = shutdown.changed() => break,
        }
    }
    event!(Level::DEBUG, "{target}: connection monitor exiting");
}
