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

//! `p4rt-bench` measures write throughput against a P4Runtime device.  It claims mastership,
//! optionally installs a pipeline, then inserts `--count` MPLS table entries through the batching
//! write pipeline and reports how fast they completed.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use clap::Parser;

use p4rt::entity::{encode_value, exact_table_entry, table_entry_update};
use p4rt::pipeline::TargetKind;
use p4rt::{ClientConfig, ClientRegistry, ElectionId, WriteTrace};

use proto::p4runtime::{Update, Update_Type};

use tokio::sync::mpsc;

use tracing::{event, Level};

/// `FabricIngress.forwarding.mpls` in the fabric P4 program.
const MPLS_TABLE_ID: u32 = 33574274;
const MPLS_LABEL_FIELD_ID: u32 = 1;
const MPLS_LABEL_BITS: u32 = 20;
/// `FabricIngress.forwarding.pop_mpls_and_next`.
const POP_MPLS_AND_NEXT_ACTION_ID: u32 = 16827758;
const NEXT_ID_PARAM_ID: u32 = 1;

const TRACE_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Parser)]
#[clap(version, about = "P4Runtime write throughput benchmark")]
struct Args {
    /// P4Runtime server address.
    #[clap(long, default_value = "localhost:28000")]
    target: String,

    #[clap(long, default_value_t = 1)]
    device_id: u64,

    #[clap(long, default_value = "1")]
    election_id: ElectionId,

    /// P4Info to install before writing, in text or binary format.
    #[clap(long)]
    p4info: Option<PathBuf>,

    /// Device config for `--p4info`: a bmv2 JSON file, or "<tofino.bin>,<context.json>".
    #[clap(long, default_value = "")]
    device_config: String,

    /// Device config format: bmv2 or tofino.
    #[clap(long, default_value = "bmv2")]
    target_kind: TargetKind,

    /// Number of table entries to insert.
    #[clap(long, default_value_t = 100_000)]
    count: u64,

    /// Log every failed write and batch.
    #[clap(short, long)]
    verbose: bool,

    #[clap(flatten)]
    client: ClientConfig,
}

fn mpls_update(i: u64) -> Update {
    let label = i & ((1 << MPLS_LABEL_BITS) - 1);
    let entry = exact_table_entry(
        MPLS_TABLE_ID,
        &[(MPLS_LABEL_FIELD_ID, encode_value(label, MPLS_LABEL_BITS))],
        POP_MPLS_AND_NEXT_ACTION_ID,
        &[(NEXT_ID_PARAM_ID, encode_value(0, 32))],
    );
    table_entry_update(Update_Type::INSERT, entry)
}

/// Counts traced updates and prints progress once a second until the channel closes.
async fn watch_traces(mut traces: mpsc::Receiver<WriteTrace>, total: u64) -> u64 {
    let mut traced = 0;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            trace = traces.recv() => match trace {
                Some(trace) => {
                    traced += trace.batch_size as u64;
                    event!(Level::DEBUG, "batch of {} took {:?}, {} failed",
                           trace.batch_size, trace.duration, trace.failures());
                }
                None => break,
            },
            _ = ticker.tick() => println!("{traced}/{total} writes traced"),
        }
    }
    traced
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let registry = ClientRegistry::with_grpc(args.client.clone())?;
    let client = registry
        .get_client(&args.target, args.device_id)
        .await
        .with_context(|| format!("could not create client for {}", args.target))?;
    client
        .set_mastership(args.election_id)
        .await
        .context("could not send arbitration update")?;

    if let Some(p4info) = &args.p4info {
        let loader = args.target_kind.loader();
        client
            .load_forwarding_pipeline_config(p4info, &args.device_config, loader.as_ref())
            .await
            .context("could not set forwarding pipeline config")?;
    }

    let (trace_tx, trace_rx) = mpsc::channel(TRACE_CHANNEL_CAPACITY);
    client.set_write_trace_channel(Some(trace_tx));
    let watcher = tokio::spawn(watch_traces(trace_rx, args.count));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(args.count as usize);
    for i in 0..args.count {
        handles.push(client.write(&mpls_update(i)).await);
    }
    let mut failed = 0u64;
    for (i, handle) in handles.into_iter().enumerate() {
        if let Err(error) = handle.await {
            failed += 1;
            if args.verbose {
                event!(Level::DEBUG, "write {i} failed: {error}");
            }
        }
    }
    let elapsed = start.elapsed().as_secs_f64();

    client.set_write_trace_channel(None);
    let traced = watcher.await.context("trace watcher panicked")?;

    println!(
        "{:.2} seconds, {} writes, {:.0} writes/sec",
        elapsed,
        args.count,
        args.count as f64 / elapsed
    );
    println!("{failed} failed writes, {traced} traced, {} traces dropped", client.dropped_traces());

    registry.shutdown();
    Ok(())
}
