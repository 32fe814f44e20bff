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

//! The RPC boundary between a [`Client`](crate::Client) and a device.
//!
//! [`GrpcConnector`] and [`GrpcConnection`] talk to a real P4Runtime server through `grpcio`.
//! Anything else that implements [`Connector`] and [`Connection`] can stand in for them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use futures::SinkExt;

use grpcio::{
    Channel,
    ChannelBuilder,
    ClientDuplexSender,
    ConnectivityState,
    EnvBuilder,
    Environment,
    WriteFlags,
};

use proto::p4runtime::{
    GetForwardingPipelineConfigRequest,
    GetForwardingPipelineConfigResponse,
    SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigResponse,
    StreamMessageRequest,
    StreamMessageResponse,
    WriteRequest,
    WriteResponse,
};
use proto::p4runtime_grpc::P4RuntimeClient;

use crate::error::{P4rtError, Result};

/// Upper bound on a single grpcio state watch.  A watch that expires is renewed.
const STATE_WATCH_DEADLINE: Duration = Duration::from_secs(3600);

/// Connectivity of a [`Connection`], as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl From<ConnectivityState> for ConnectionState {
    fn from(state: ConnectivityState) -> Self {
        match state {
            ConnectivityState::GRPC_CHANNEL_CONNECTING => ConnectionState::Connecting,
            ConnectivityState::GRPC_CHANNEL_READY => ConnectionState::Ready,
            ConnectivityState::GRPC_CHANNEL_TRANSIENT_FAILURE => ConnectionState::TransientFailure,
            ConnectivityState::GRPC_CHANNEL_SHUTDOWN => ConnectionState::Shutdown,
            _ => ConnectionState::Idle,
        }
    }
}

impl From<ConnectionState> for ConnectivityState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle => ConnectivityState::GRPC_CHANNEL_IDLE,
            ConnectionState::Connecting => ConnectivityState::GRPC_CHANNEL_CONNECTING,
            ConnectionState::Ready => ConnectivityState::GRPC_CHANNEL_READY,
            ConnectionState::TransientFailure => ConnectivityState::GRPC_CHANNEL_TRANSIENT_FAILURE,
            ConnectionState::Shutdown => ConnectivityState::GRPC_CHANNEL_SHUTDOWN,
        }
    }
}

/// The sending half of a P4Runtime stream channel.
pub trait StreamSender: Send {
    fn send(&mut self, request: StreamMessageRequest) -> BoxFuture<'_, grpcio::Result<()>>;
}

impl StreamSender for ClientDuplexSender<StreamMessageRequest> {
    fn send(&mut self, request: StreamMessageRequest) -> BoxFuture<'_, grpcio::Result<()>> {
        SinkExt::send(self, (request, WriteFlags::default())).boxed()
    }
}

/// Both halves of an open P4Runtime stream channel.
pub struct StreamChannel {
    pub sender: Box<dyn StreamSender>,
    pub receiver: BoxStream<'static, grpcio::Result<StreamMessageResponse>>,
}

/// A transport connection to one P4Runtime server, shared by every client on that host.
pub trait Connection: Send + Sync {
    fn target(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Resolves with the new state once the connection leaves `last`.
    fn wait_for_state_change(&self, last: ConnectionState) -> BoxFuture<'static, ConnectionState>;

    fn write(&self, request: WriteRequest) -> BoxFuture<'static, grpcio::Result<WriteResponse>>;

    fn stream_channel(&self) -> grpcio::Result<StreamChannel>;

    fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> BoxFuture<'static, grpcio::Result<SetForwardingPipelineConfigResponse>>;

    fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> BoxFuture<'static, grpcio::Result<GetForwardingPipelineConfigResponse>>;
}

/// Establishes [`Connection`]s.
pub trait Connector: Send + Sync {
    fn connect(&self, target: &str) -> BoxFuture<'static, Result<Arc<dyn Connection>>>;
}

/// Checks that `target` looks like `host:port`.
pub fn validate_target(target: &str) -> Result<()> {
    let valid = match target.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !target.chars().any(char::is_whitespace)
                && port.parse::<u16>().is_ok()
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(P4rtError::InvalidTarget(target.to_string()))
    }
}

/// Opens insecure `grpcio` channels.
pub struct GrpcConnector {
    env: Arc<Environment>,
    connect_timeout: Option<Duration>,
}

impl GrpcConnector {
    /// If `connect_timeout` is set, `connect` waits for the channel to become ready and fails if
    /// it does not within that time.  Otherwise the channel connects lazily.
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        GrpcConnector {
            env: Arc::new(EnvBuilder::new().build()),
            connect_timeout,
        }
    }
}

impl Connector for GrpcConnector {
    fn connect(&self, target: &str) -> BoxFuture<'static, Result<Arc<dyn Connection>>> {
        if let Err(e) = validate_target(target) {
            return future::ready(Err(e)).boxed();
        }

        let channel = ChannelBuilder::new(self.env.clone()).connect(target);
        let connection = GrpcConnection {
            target: target.to_string(),
            client: P4RuntimeClient::new(channel.clone()),
            channel,
        };
        let connect_timeout = self.connect_timeout;
        async move {
            if let Some(timeout) = connect_timeout {
                connection.wait_until_ready(timeout).await?;
            }
            Ok(Arc::new(connection) as Arc<dyn Connection>)
        }
        .boxed()
    }
}

pub struct GrpcConnection {
    target: String,
    channel: Channel,
    client: P4RuntimeClient,
}

impl GrpcConnection {
    async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        if self.channel.wait_for_connected(timeout).await {
            return Ok(());
        }
        match ConnectionState::from(self.channel.check_connectivity_state(false)) {
            ConnectionState::Shutdown => Err(P4rtError::Connect {
                target: self.target.clone(),
                message: "channel shut down".to_string(),
            }),
            _ => Err(P4rtError::ConnectTimeout {
                target: self.target.clone(),
                timeout,
            }),
        }
    }
}

impl Connection for GrpcConnection {
    fn target(&self) -> &str {
        &self.target
    }

    fn state(&self) -> ConnectionState {
        self.channel.check_connectivity_state(false).into()
    }

    fn wait_for_state_change(&self, last: ConnectionState) -> BoxFuture<'static, ConnectionState> {
        let channel = self.channel.clone();
        async move {
            loop {
                let started = Instant::now();
                if channel.wait_for_state_change(last.into(), STATE_WATCH_DEADLINE).await {
                    return channel.check_connectivity_state(false).into();
                }
                // Before the deadline, `false` means the channel's completion queue is gone.
                if started.elapsed() < STATE_WATCH_DEADLINE {
                    return ConnectionState::Shutdown;
                }
            }
        }
        .boxed()
    }

    fn write(&self, request: WriteRequest) -> BoxFuture<'static, grpcio::Result<WriteResponse>> {
        match self.client.write_async(&request) {
            Ok(receiver) => receiver.boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    fn stream_channel(&self) -> grpcio::Result<StreamChannel> {
        let (sender, receiver) = self.client.stream_channel()?;
        Ok(StreamChannel {
            sender: Box::new(sender),
            receiver: receiver.boxed(),
        })
    }

    fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> BoxFuture<'static, grpcio::Result<SetForwardingPipelineConfigResponse>> {
        match self.client.set_forwarding_pipeline_config_async(&request) {
            Ok(receiver) => receiver.boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> BoxFuture<'static, grpcio::Result<GetForwardingPipelineConfigResponse>> {
        match self.client.get_forwarding_pipeline_config_async(&request) {
            Ok(receiver) => receiver.boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }
}
