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
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use proto::p4runtime::{
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest,
    GetForwardingPipelineConfigRequest_ResponseType,
    SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigRequest_Action,
    Update,
};

use tokio::sync::{mpsc, OnceCell, Semaphore};

use tracing::{event, Level};

use crate::config::ClientConfig;
use crate::connection::ConnectionRegistry;
use crate::error::{P4rtError, Result};
use crate::mastership::{Arbitrator, ElectionCell, ElectionId, Mastership, StreamStatus};
use crate::pipeline::{self, DeviceConfigLoader};
use crate::trace::{TraceEmitter, WriteTrace};
use crate::transport::{Connection, Connector, GrpcConnector};
use crate::write::{Dispatcher, WriteHandle, WritePipeline};

/// A P4Runtime session with one device.
///
/// A client owns the stream channel used for mastership arbitration and the write pipeline that
/// batches updates for its device.  The underlying connection may be shared with clients for
/// other devices behind the same host.  Dropping the client stops its write workers; writes that
/// have not completed by then resolve as aborted.
pub struct Client {
    target: String,
    device_id: u64,
    connection: Arc<dyn Connection>,
    election_id: Arc<ElectionCell>,
    arbitrator: Arbitrator,
    trace: Arc<TraceEmitter>,
    pipeline: WritePipeline,
}

impl Client {
    /// Opens the stream channel on `connection` and starts the write workers.
    pub fn start(
        connection: Arc<dyn Connection>,
        device_id: u64,
        config: &ClientConfig,
    ) -> Result<Client> {
        config.validate()?;
        let target = connection.target().to_string();
        let channel = connection.stream_channel().map_err(|source| P4rtError::StreamOpen {
            target: target.clone(),
            source,
        })?;

        let election_id = Arc::new(ElectionCell::default());
        let arbitrator = Arbitrator::start(&target, device_id, channel, election_id.clone());
        let trace = Arc::new(TraceEmitter::default());
        let pipeline = WritePipeline::start(
            config,
            Dispatcher {
                device_id,
                connection: connection.clone(),
                election_id: election_id.clone(),
                trace: trace.clone(),
                max_batch_size: config.max_batch_size,
                write_timeout: config.write_timeout(),
                resolvers: Arc::new(Semaphore::new(config.resolver_limit)),
            },
        );
        event!(
            Level::INFO,
            "{target}: device {device_id}: client started with {} write worker(s)",
            config.write_workers
        );

        Ok(Client {
            target,
            device_id,
            connection,
            election_id,
            arbitrator,
            trace,
            pipeline,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Asks the device to make this client master with `election_id`.
    ///
    /// Returns once the request is sent.  From then on, every batch carries `election_id`.  The
    /// device's answer shows up later in [`mastership`](Client::mastership).  If sending fails,
    /// the previous election id stays in effect.
    pub async fn set_mastership(&self, election_id: ElectionId) -> Result<()> {
        self.arbitrator.set_mastership(election_id).await
    }

    /// The election id that writes currently carry, if mastership was ever requested.
    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id.get()
    }

    pub fn mastership(&self) -> Mastership {
        self.arbitrator.mastership()
    }

    /// Once the stream is no longer open, this client cannot learn about mastership changes.
    /// Nothing reconnects it; get a new client instead.
    pub fn stream_status(&self) -> StreamStatus {
        self.arbitrator.stream_status()
    }

    /// Queues a copy of `update` for writing and returns a handle to its outcome.  Waits only if
    /// the write queue is full.
    pub async fn write(&self, update: &Update) -> WriteHandle {
        self.pipeline.submit(update).await
    }

    /// Like [`write`](Client::write), for callers outside of an async runtime.  Panics if called
    /// from within one.
    pub fn blocking_write(&self, update: &Update) -> WriteHandle {
        self.pipeline.blocking_submit(update)
    }

    /// Number of writes waiting in the queue.
    pub fn remaining_writes(&self) -> usize {
        self.pipeline.remaining()
    }

    /// Sends a [`WriteTrace`] for every completed batch to `channel`, or stops tracing if it is
    /// `None`.  Traces that do not fit in the channel are dropped.
    pub fn set_write_trace_channel(&self, channel: Option<mpsc::Sender<WriteTrace>>) {
        self.trace.set_channel(channel);
    }

    /// Number of traces dropped so far because the trace channel was full.
    pub fn dropped_traces(&self) -> u64 {
        self.trace.dropped()
    }

    /// Installs `config` on the device with VERIFY_AND_COMMIT.  Not retried.
    pub async fn set_forwarding_pipeline_config(&self, config: ForwardingPipelineConfig) -> Result<()> {
        let mut request = SetForwardingPipelineConfigRequest::new();
        request.set_device_id(self.device_id);
        if let Some(election_id) = self.election_id() {
            request.set_election_id(election_id.into());
        }
        request.set_action(SetForwardingPipelineConfigRequest_Action::VERIFY_AND_COMMIT);
        request.set_config(config);

        self.connection
            .set_forwarding_pipeline_config(request)
            .await
            .map_err(|source| P4rtError::Pipeline {
                target: self.target.clone(),
                operation: "SetForwardingPipelineConfig",
                source,
            })?;
        event!(Level::INFO, "{}: device {}: forwarding pipeline committed", self.target, self.device_id);
        Ok(())
    }

    /// Reads `p4info_path` and the device config named by `device_config`, then installs them.
    pub async fn load_forwarding_pipeline_config(
        &self,
        p4info_path: &Path,
        device_config: &str,
        loader: &dyn DeviceConfigLoader,
    ) -> Result<()> {
        let p4info = pipeline::load_p4info(p4info_path)?;
        let device_config = loader.load(device_config)?;
        self.set_forwarding_pipeline_config(pipeline::build_pipeline_config(p4info, device_config))
            .await
    }

    /// Fetches the P4Info and cookie currently installed on the device.
    pub async fn get_forwarding_pipeline_config(&self) -> Result<ForwardingPipelineConfig> {
        let mut request = GetForwardingPipelineConfigRequest::new();
        request.set_device_id(self.device_id);
        request.set_response_type(GetForwardingPipelineConfigRequest_ResponseType::P4INFO_AND_COOKIE);

        let mut response = self
            .connection
            .get_forwarding_pipeline_config(request)
            .await
            .map_err(|source| P4rtError::Pipeline {
                target: self.target.clone(),
                operation: "GetForwardingPipelineConfig",
                source,
            })?;
        if !response.get_config().has_p4info() {
            return Err(P4rtError::MissingP4Info { target: self.target.clone() });
        }
        Ok(response.take_config())
    }
}

/// The cache entry for one (host, device id).  Filled at most once.
type ClientSlot = Arc<OnceCell<Arc<Client>>>;

/// Hands out one [`Client`] per (host, device id), sharing connections between clients on the
/// same host.
pub struct ClientRegistry {
    config: ClientConfig,
    connections: ConnectionRegistry,
    clients: Mutex<HashMap<(String, u64), ClientSlot>>,
}

impl ClientRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(ClientRegistry {
            config,
            connections: ConnectionRegistry::new(connector),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// A registry that connects over gRPC.
    pub fn with_grpc(config: ClientConfig) -> Result<Self> {
        let connector = Arc::new(GrpcConnector::new(config.connect_timeout()));
        Self::new(connector, config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, u64), ClientSlot>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the client for `device_id` on `host`, starting it if there is none yet.
    ///
    /// Only callers asking for the same (host, device id) wait for each other.
    pub async fn get_client(&self, host: &str, device_id: u64) -> Result<Arc<Client>> {
        let slot = self.lock().entry((host.to_string(), device_id)).or_default().clone();
        let client = slot
            .get_or_try_init(|| async {
                let connection = self.connections.get_connection(host).await?;
                Client::start(connection, device_id, &self.config).map(Arc::new)
            })
            .await?;
        Ok(client.clone())
    }

    /// Forgets every client and connection.  Clients still referenced elsewhere keep working
    /// until they are dropped.
    pub fn shutdown(&self) {
        self.lock().clear();
        self.connections.shutdown();
    }
}
