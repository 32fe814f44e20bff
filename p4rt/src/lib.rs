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

//! `p4rt` is a client-side engine for issuing P4Runtime writes against a forwarding device.
//!
//! Callers submit individual [`Update`](proto::p4runtime::Update)s through a [`Client`].  Each
//! client owns a bounded write queue and a pool of workers that greedily coalesce queued updates
//! into batches of at most [`ClientConfig::max_batch_size`], send each batch as one `Write` RPC,
//! and hand every caller back exactly one [`WriteOutcome`] through its [`WriteHandle`].
//!
//! Clients are obtained from a [`ClientRegistry`], which keeps one client per (host, device id)
//! pair and shares one underlying connection per host between them.  Each client also owns the
//! P4Runtime stream channel, over which it claims mastership with [`Client::set_mastership`].

mod client;
mod config;
mod connection;
mod demux;
mod error;
mod mastership;
mod trace;
mod write;

pub mod entity;
pub mod pipeline;
pub mod transport;

pub use client::{Client, ClientRegistry};
pub use config::ClientConfig;
pub use connection::ConnectionRegistry;
pub use demux::{WriteError, WriteOutcome, ERROR_SPACE};
pub use error::{P4rtError, Result};
pub use mastership::{ElectionId, Mastership, StreamStatus};
pub use trace::WriteTrace;
pub use write::WriteHandle;
