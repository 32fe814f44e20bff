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

//! Splits the result of one batched Write RPC into one outcome per update.

use std::time::Duration;

use grpcio::{RpcStatus, RpcStatusCode};

use proto::p4runtime;
use proto::status::Status;

use protobuf::well_known_types::Any;
use protobuf::Message;

use thiserror::Error;

use tokio::sync::oneshot;

use tracing::{event, Level};

use crate::trace::{TraceEmitter, WriteTrace};

/// Error space of outcomes that this crate synthesizes instead of receiving from the device.
pub const ERROR_SPACE: &str = "p4rt";

/// Why a single update in a batch was not applied.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{space}: {code:?}: {message}")]
pub struct WriteError {
    /// Canonical gRPC status code.
    pub code: RpcStatusCode,
    pub message: String,
    /// Namespace of `target_code`.  Device-reported errors carry the device's own space.
    pub space: String,
    /// Device-specific error code, meaningful only within `space`.
    pub target_code: i32,
}

impl WriteError {
    pub fn new(code: RpcStatusCode, message: impl Into<String>) -> Self {
        WriteError {
            code,
            message: message.into(),
            space: ERROR_SPACE.to_string(),
            target_code: 0,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        WriteError::new(RpcStatusCode::INTERNAL, message)
    }

    pub(crate) fn aborted(message: impl Into<String>) -> Self {
        WriteError::new(RpcStatusCode::ABORTED, message)
    }
}

impl From<p4runtime::Error> for WriteError {
    fn from(error: p4runtime::Error) -> Self {
        WriteError {
            code: RpcStatusCode::from(error.canonical_code),
            message: error.message,
            space: error.space,
            target_code: error.code,
        }
    }
}

/// The result of one submitted update.
pub type WriteOutcome = Result<(), WriteError>;

/// Computes exactly `batch_size` outcomes for a batch whose Write RPC returned `result`.
///
/// A failed RPC whose status details decode to a `google.rpc.Status` with one `p4.v1.Error` per
/// update is reported item by item; a detail that cannot be decoded becomes an INTERNAL outcome
/// for its own slot only.  Any other failure is copied into every slot.
pub(crate) fn write_outcomes(result: &grpcio::Result<()>, batch_size: usize) -> Vec<WriteOutcome> {
    let error = match result {
        Ok(()) => return vec![Ok(()); batch_size],
        Err(error) => error,
    };

    let status = match error {
        grpcio::Error::RpcFailure(status) => status,
        other => {
            let shared = WriteError::new(RpcStatusCode::UNAVAILABLE, other.to_string());
            return vec![Err(shared); batch_size];
        }
    };

    match per_item_details(status, batch_size) {
        Some(details) => details.iter().map(detail_outcome).collect(),
        None => {
            let shared = WriteError::new(status.code(), status.message());
            vec![Err(shared); batch_size]
        }
    }
}

fn per_item_details(status: &RpcStatus, batch_size: usize) -> Option<Vec<Any>> {
    if status.details().is_empty() {
        return None;
    }
    let decoded = match Status::parse_from_bytes(status.details()) {
        Ok(decoded) => decoded,
        Err(e) => {
            event!(Level::WARN, "could not decode write error details ({e})");
            return None;
        }
    };
    if decoded.details.len() != batch_size {
        event!(
            Level::DEBUG,
            "write error has {} details for a batch of {batch_size}, using aggregate status",
            decoded.details.len()
        );
        return None;
    }
    Some(decoded.details.into_vec())
}

fn detail_outcome(detail: &Any) -> WriteOutcome {
    match detail.unpack::<p4runtime::Error>() {
        Ok(Some(error)) if RpcStatusCode::from(error.canonical_code) == RpcStatusCode::OK => Ok(()),
        Ok(Some(error)) => Err(error.into()),
        Ok(None) => Err(WriteError::internal(format!(
            "unexpected write error detail type {:?}",
            detail.type_url
        ))),
        Err(e) => Err(WriteError::internal(format!("could not decode write error detail ({e})"))),
    }
}

/// Delivers one outcome to each of `sinks`, in order, then offers a trace of the batch to `trace`.
///
/// Callers that dropped their handle are skipped.  Nothing here waits on a caller or on the
/// trace observer.
pub(crate) fn resolve(
    sinks: Vec<oneshot::Sender<WriteOutcome>>,
    result: grpcio::Result<()>,
    duration: Duration,
    trace: &TraceEmitter,
) {
    let batch_size = sinks.len();
    let outcomes = write_outcomes(&result, batch_size);
    for (sink, outcome) in sinks.into_iter().zip(outcomes.iter()) {
        if sink.send(outcome.clone()).is_err() {
            event!(Level::DEBUG, "write outcome discarded, caller no longer waiting");
        }
    }
    trace.emit(WriteTrace {
        batch_size,
        duration,
        outcomes,
    });
}
