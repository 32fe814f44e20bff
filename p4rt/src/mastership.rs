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

//! Mastership arbitration over the P4Runtime stream channel.

use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::stream::{BoxStream, StreamExt};

use proto::code::Code;
use proto::p4runtime::{MasterArbitrationUpdate, StreamMessageRequest, StreamMessageResponse, Uint128};

use protobuf::ProtobufEnum;

use tokio::task::JoinHandle;

use tracing::{event, Level};

use crate::error::{P4rtError, Result};
use crate::transport::{StreamChannel, StreamSender};

/// A P4Runtime election identifier.  Among the clients of one device, the highest one is master.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElectionId(pub u128);

impl From<ElectionId> for Uint128 {
    fn from(id: ElectionId) -> Self {
        let mut uint128 = Uint128::new();
        uint128.set_high((id.0 >> 64) as u64);
        uint128.set_low(id.0 as u64);
        uint128
    }
}

impl From<&Uint128> for ElectionId {
    fn from(uint128: &Uint128) -> Self {
        ElectionId((u128::from(uint128.get_high()) << 64) | u128::from(uint128.get_low()))
    }
}

impl FromStr for ElectionId {
    type Err = P4rtError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u128>()
            .map(ElectionId)
            .map_err(|_| P4rtError::ElectionId(s.to_string()))
    }
}

impl Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The election id most recently sent by a client.  Written by arbitration, read by every batch.
#[derive(Debug, Default)]
pub(crate) struct ElectionCell(RwLock<Option<ElectionId>>);

impl ElectionCell {
    pub fn get(&self) -> Option<ElectionId> {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, id: ElectionId) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }
}

/// This client's role for its device, as last reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mastership {
    /// No arbitration response received yet, or the stream channel has ended.
    Unknown,
    Master,
    Standby,
}

/// Health of the stream channel that carries arbitration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    /// The device closed the stream.
    Closed,
    /// Receiving from the stream failed.
    Failed,
}

#[derive(Debug)]
struct Role {
    mastership: Mastership,
    stream: StreamStatus,
}

pub(crate) struct Arbitrator {
    target: String,
    device_id: u64,
    sender: tokio::sync::Mutex<Box<dyn StreamSender>>,
    election_id: Arc<ElectionCell>,
    role: Arc<Mutex<Role>>,
    receiver: JoinHandle<()>,
}

impl Arbitrator {
    /// Takes over `channel` and starts a task that tracks arbitration responses on it.
    pub fn start(
        target: &str,
        device_id: u64,
        channel: StreamChannel,
        election_id: Arc<ElectionCell>,
    ) -> Arbitrator {
        let role = Arc::new(Mutex::new(Role {
            mastership: Mastership::Unknown,
            stream: StreamStatus::Open,
        }));
        let receiver = tokio::spawn(receive_arbitration(
            target.to_string(),
            device_id,
            channel.receiver,
            role.clone(),
        ));
        Arbitrator {
            target: target.to_string(),
            device_id,
            sender: tokio::sync::Mutex::new(channel.sender),
            election_id,
            role,
            receiver,
        }
    }

    /// Sends an arbitration update for `election_id`.  The id takes effect for subsequent
    /// batches only once the send succeeds; the device's answer arrives asynchronously.
    pub async fn set_mastership(&self, election_id: ElectionId) -> Result<()> {
        let mut update = MasterArbitrationUpdate::new();
        update.set_device_id(self.device_id);
        update.set_election_id(election_id.into());

        let mut request = StreamMessageRequest::new();
        request.set_arbitration(update);

        let mut sender = self.sender.lock().await;
        sender
            .send(request)
            .await
            .map_err(|source| P4rtError::Arbitration {
                target: self.target.clone(),
                device_id: self.device_id,
                source,
            })?;
        self.election_id.set(election_id);
        event!(
            Level::DEBUG,
            "{}: device {}: sent arbitration update for election id {election_id}",
            self.target,
            self.device_id
        );
        Ok(())
    }

    pub fn mastership(&self) -> Mastership {
        self.role.lock().unwrap_or_else(PoisonError::into_inner).mastership
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.role.lock().unwrap_or_else(PoisonError::into_inner).stream
    }
}

impl Drop for Arbitrator {
    /// The receive loop stops before the sender goes away: dropping the sender cancels the
    /// stream call, and that cancellation is not a stream failure.
    fn drop(&mut self) {
        self.receiver.abort();
        event!(Level::DEBUG, "{}: device {}: arbitration stream released", self.target, self.device_id);
    }
}

fn arbitration_role(response: &StreamMessageResponse) -> Option<(Mastership, ElectionId)> {
    if !response.has_arbitration() {
        return None;
    }
    let arbitration = response.get_arbitration();
    let mastership = if arbitration.get_status().get_code() == Code::OK.value() {
        Mastership::Master
    } else {
        Mastership::Standby
    };
    Some((mastership, arbitration.get_election_id().into()))
}

async fn receive_arbitration(
    target: String,
    device_id: u64,
    mut receiver: BoxStream<'static, grpcio::Result<StreamMessageResponse>>,
    role: Arc<Mutex<Role>>,
) {
    let end = loop {
        match receiver.next().await {
            Some(Ok(response)) => {
                if let Some((mastership, election_id)) = arbitration_role(&response) {
                    role.lock().unwrap_or_else(PoisonError::into_inner).mastership = mastership;
                    match mastership {
                        Mastership::Master => event!(
                            Level::INFO,
                            "{target}: device {device_id}: client is master (election id {election_id})"
                        ),
                        _ => event!(
                            Level::INFO,
                            "{target}: device {device_id}: client is not master (master election id {election_id})"
                        ),
                    }
                } else {
                    event!(Level::DEBUG, "{target}: device {device_id}: ignoring stream message {:?}", response.update);
                }
            }
            Some(Err(e)) => {
                event!(Level::ERROR, "{target}: device {device_id}: stream channel failed ({e})");
                break StreamStatus::Failed;
            }
            None => {
                event!(Level::INFO, "{target}: device {device_id}: stream channel closed");
                break StreamStatus::Closed;
            }
        }
    };

    let mut role = role.lock().unwrap_or_else(PoisonError::into_inner);
    role.stream = end;
    role.mastership = Mastership::Unknown;
}
