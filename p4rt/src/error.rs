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

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures that are reported directly to the caller of a setup-time operation.
///
/// Failed batch writes never show up here: they are delivered as a
/// [`WriteOutcome`](crate::WriteOutcome) through the write's handle.
#[derive(Debug, Error)]
pub enum P4rtError {
    /// The target is not a usable `host:port` address.
    #[error("invalid target address {0:?}")]
    InvalidTarget(String),

    /// The connection did not become ready within the configured connect timeout.
    #[error("{target}: connection not ready after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// The connection could not be established.
    #[error("{target}: connection failed ({message})")]
    Connect { target: String, message: String },

    /// Opening the P4Runtime stream channel failed.
    #[error("{target}: could not open stream channel ({source})")]
    StreamOpen {
        target: String,
        #[source]
        source: grpcio::Error,
    },

    /// Sending a master arbitration update on the stream channel failed.
    #[error("{target}: device {device_id}: arbitration update failed ({source})")]
    Arbitration {
        target: String,
        device_id: u64,
        #[source]
        source: grpcio::Error,
    },

    /// A forwarding-pipeline RPC failed.
    #[error("{target}: {operation} failed ({source})")]
    Pipeline {
        target: String,
        operation: &'static str,
        #[source]
        source: grpcio::Error,
    },

    /// The device answered a pipeline query without a P4Info.
    #[error("{target}: device did not return P4Info")]
    MissingP4Info { target: String },

    /// A device configuration could not be assembled.
    #[error("invalid device config: {0}")]
    DeviceConfig(String),

    /// A P4Info file could not be parsed.
    #[error("{}: could not parse P4Info ({message})", path.display())]
    P4Info { path: PathBuf, message: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A [`ClientConfig`](crate::ClientConfig) value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid election id {0:?}")]
    ElectionId(String),

    #[error("unknown target kind {0:?} (expected \"bmv2\" or \"tofino\")")]
    TargetKind(String),
}

pub type Result<T, E = P4rtError> = std::result::Result<T, E>;
