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

//! In-memory stand-ins for a P4Runtime server, plus test helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::StreamExt;

use grpcio::{RpcStatus, RpcStatusCode};

use p4rt::entity::{encode_value, exact_table_entry, table_entry_update};
use p4rt::transport::{Connection, ConnectionState, Connector, StreamChannel, StreamSender};
use p4rt::{ElectionId, P4rtError};

use proto::p4runtime::{
    ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest,
    GetForwardingPipelineConfigResponse,
    MasterArbitrationUpdate,
    SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigResponse,
    StreamMessageRequest,
    StreamMessageResponse,
    Update,
    Update_Type,
    WriteRequest,
    WriteResponse,
};
use proto::status::Status;

use protobuf::well_known_types::Any;
use protobuf::{Message, SingularPtrField};

use tokio::sync::watch;

#[derive(Default)]
struct Shared {
    target: String,
    /// Every Write request, in the order the client sent them.
    writes: Mutex<Vec<WriteRequest>>,
    /// Results for upcoming Write calls; success once exhausted.
    results: Mutex<VecDeque<grpcio::Result<()>>>,
    /// Every request sent on any stream channel.
    stream_requests: Mutex<Vec<StreamMessageRequest>>,
    streams: Mutex<Vec<UnboundedSender<grpcio::Result<StreamMessageResponse>>>>,
    fail_stream_sends: AtomicBool,
    pipeline: Mutex<Option<SetForwardingPipelineConfigRequest>>,
}

/// A fake connection.  Clones share state.
#[derive(Clone)]
pub struct FakeConnection {
    shared: Arc<Shared>,
    /// Write calls complete only while this is true.
    gate: Arc<watch::Sender<bool>>,
    state: Arc<watch::Sender<ConnectionState>>,
    // Held so that sends on `gate` and `state` always update the value.
    _watchers: (watch::Receiver<bool>, watch::Receiver<ConnectionState>),
}

impl FakeConnection {
    pub fn new(target: &str) -> Self {
        let (gate, gate_rx) = watch::channel(true);
        let (state, state_rx) = watch::channel(ConnectionState::Ready);
        FakeConnection {
            shared: Arc::new(Shared { target: target.to_string(), ..Default::default() }),
            gate: Arc::new(gate),
            state: Arc::new(state),
            _watchers: (gate_rx, state_rx),
        }
    }

    /// Holds every Write call that starts from now on until `open_gate`.
    pub fn close_gate(&self) {
        let _ = self.gate.send(false);
    }

    pub fn open_gate(&self) {
        let _ = self.gate.send(true);
    }

    pub fn push_result(&self, result: grpcio::Result<()>) {
        self.shared.results.lock().unwrap().push_back(result);
    }

    pub fn writes(&self) -> Vec<WriteRequest> {
        self.shared.writes.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.writes().iter().map(|w| w.get_updates().len()).collect()
    }

    pub fn stream_requests(&self) -> Vec<StreamMessageRequest> {
        self.shared.stream_requests.lock().unwrap().clone()
    }

    pub fn stream_count(&self) -> usize {
        self.shared.streams.lock().unwrap().len()
    }

    /// Stream channels whose receiving half is still held by a client.
    pub fn open_streams(&self) -> usize {
        self.shared.streams.lock().unwrap().iter().filter(|stream| !stream.is_closed()).count()
    }

    /// Delivers `response` on every open stream channel.
    pub fn respond(&self, response: grpcio::Result<StreamMessageResponse>) {
        for stream in self.shared.streams.lock().unwrap().iter() {
            let response = match &response {
                Ok(r) => Ok(r.clone()),
                Err(_) => Err(grpcio::Error::RemoteStopped),
            };
            let _ = stream.unbounded_send(response);
        }
    }

    /// Ends every open stream channel cleanly.
    pub fn close_streams(&self) {
        self.shared.streams.lock().unwrap().clear();
    }

    pub fn fail_stream_sends(&self, fail: bool) {
        self.shared.fail_stream_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send(state);
    }

    /// The last SetForwardingPipelineConfig request received.
    pub fn pipeline_request(&self) -> Option<SetForwardingPipelineConfigRequest> {
        self.shared.pipeline.lock().unwrap().clone()
    }

    pub fn installed_pipeline(&self) -> Option<ForwardingPipelineConfig> {
        self.pipeline_request().map(|request| request.get_config().clone())
    }
}

struct FakeStreamSender {
    shared: Arc<Shared>,
}

impl StreamSender for FakeStreamSender {
    fn send(&mut self, request: StreamMessageRequest) -> BoxFuture<'_, grpcio::Result<()>> {
        let result = if self.shared.fail_stream_sends.load(Ordering::SeqCst) {
            Err(grpcio::Error::RpcFailure(RpcStatus::with_details(
                RpcStatusCode::UNAVAILABLE,
                "stream broken".to_string(),
                Vec::new(),
            )))
        } else {
            self.shared.stream_requests.lock().unwrap().push(request);
            Ok(())
        };
        future::ready(result).boxed()
    }
}

impl Connection for FakeConnection {
    fn target(&self) -> &str {
        &self.shared.target
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn wait_for_state_change(&self, last: ConnectionState) -> BoxFuture<'static, ConnectionState> {
        let mut state = self.state.subscribe();
        async move {
            loop {
                let current = *state.borrow();
                if current != last {
                    return current;
                }
                if state.changed().await.is_err() {
                    return ConnectionState::Shutdown;
                }
            }
        }
        .boxed()
    }

    fn write(&self, request: WriteRequest) -> BoxFuture<'static, grpcio::Result<WriteResponse>> {
        self.shared.writes.lock().unwrap().push(request);
        let result = self.shared.results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        let mut gate = self.gate.subscribe();
        async move {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
            result.map(|()| WriteResponse::new())
        }
        .boxed()
    }

    fn stream_channel(&self) -> grpcio::Result<StreamChannel> {
        let (tx, rx) = unbounded();
        self.shared.streams.lock().unwrap().push(tx);
        Ok(StreamChannel {
            sender: Box::new(FakeStreamSender { shared: self.shared.clone() }),
            receiver: rx.boxed(),
        })
    }

    fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> BoxFuture<'static, grpcio::Result<SetForwardingPipelineConfigResponse>> {
        *self.shared.pipeline.lock().unwrap() = Some(request);
        future::ready(Ok(SetForwardingPipelineConfigResponse::new())).boxed()
    }

    fn get_forwarding_pipeline_config(
        &self,
        _request: GetForwardingPipelineConfigRequest,
    ) -> BoxFuture<'static, grpcio::Result<GetForwardingPipelineConfigResponse>> {
        let config = self.installed_pipeline();
        let response = GetForwardingPipelineConfigResponse {
            config: config.map(SingularPtrField::some).unwrap_or_default(),
            ..Default::default()
        };
        future::ready(Ok(response)).boxed()
    }
}

/// Hands out [`FakeConnection`]s and remembers the latest one per target.
#[derive(Default)]
pub struct FakeConnector {
    connections: Mutex<HashMap<String, FakeConnection>>,
    connects: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeConnector::default())
    }

    /// Makes the next connection attempt to `target` fail.
    pub fn fail_next(&self, target: &str) {
        self.failing.lock().unwrap().insert(target.to_string());
    }

    /// Makes every connection attempt to `target` wait forever.
    pub fn hang(&self, target: &str) {
        self.hanging.lock().unwrap().insert(target.to_string());
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connection(&self, target: &str) -> FakeConnection {
        self.connections.lock().unwrap()[target].clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, target: &str) -> BoxFuture<'static, p4rt::Result<Arc<dyn Connection>>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hanging.lock().unwrap().contains(target) {
            return future::pending().boxed();
        }
        if self.failing.lock().unwrap().remove(target) {
            let error = P4rtError::Connect {
                target: target.to_string(),
                message: "connection refused".to_string(),
            };
            return future::ready(Err(error)).boxed();
        }
        let connection = FakeConnection::new(target);
        self.connections.lock().unwrap().insert(target.to_string(), connection.clone());
        future::ready(Ok(Arc::new(connection) as Arc<dyn Connection>)).boxed()
    }
}

/// An insert whose MPLS label is `label`; distinct labels give distinct updates.
pub fn update(label: u64) -> Update {
    let entry = exact_table_entry(
        33574274,
        &[(1, encode_value(label, 20))],
        16827758,
        &[(1, encode_value(0, 32))],
    );
    table_entry_update(Update_Type::INSERT, entry)
}

/// A Write failure carrying one `p4.v1.Error` per entry of `codes`, the way P4Runtime servers
/// report partial batch failures.
pub fn per_item_failure(codes: &[RpcStatusCode]) -> grpcio::Error {
    let details = codes
        .iter()
        .map(|&code| {
            let error = proto::p4runtime::Error {
                canonical_code: code.into(),
                message: format!("{:?}", code),
                space: "fake".to_string(),
                ..Default::default()
            };
            Any::pack(&error).unwrap()
        })
        .collect::<Vec<_>>();
    let status = Status {
        code: RpcStatusCode::UNKNOWN.into(),
        details: details.into(),
        ..Default::default()
    };
    grpcio::Error::RpcFailure(RpcStatus::with_details(
        RpcStatusCode::UNKNOWN,
        String::new(),
        status.write_to_bytes().unwrap(),
    ))
}

pub fn aggregate_failure(code: RpcStatusCode, message: &str) -> grpcio::Error {
    grpcio::Error::RpcFailure(RpcStatus::with_details(code, message.to_string(), Vec::new()))
}

pub fn arbitration_response(election_id: ElectionId, code: RpcStatusCode) -> StreamMessageResponse {
    let mut arbitration = MasterArbitrationUpdate::new();
    arbitration.set_device_id(1);
    arbitration.set_election_id(election_id.into());
    arbitration.mut_status().set_code(code.into());
    let mut response = StreamMessageResponse::new();
    response.set_arbitration(arbitration);
    response
}

/// Repeatedly evaluates `condition`, sleeping a bit between calls, until it is true.  After a
/// while, gives up and returns an error instead.
pub async fn wait_until<F>(mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    for i in 0..50 {
        if condition() {
            return Ok(());
        }

        // Most conditions become true almost immediately.
        let ms = match i {
            0 => 1,
            1..=4 => 10,
            _ => 100,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    Err(anyhow!("wait_until timed out"))
}
