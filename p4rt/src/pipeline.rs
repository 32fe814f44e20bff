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

//! Forwarding-pipeline configuration: P4Info, target-specific device configs and the cookie
//! that identifies a pushed config.

use std::fmt::{self, Display};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use proto::p4info::P4Info;
use proto::p4runtime::{ForwardingPipelineConfig, ForwardingPipelineConfig_Cookie};

use protobuf::Message;

use sha2::{Digest, Sha256};

use crate::error::{P4rtError, Result};

/// Name embedded in generated Tofino device configs.
pub const TOFINO_PIPECONF_NAME: &str = "p4rt-gen";

/// Produces the opaque `p4_device_config` bytes for one kind of target.
pub trait DeviceConfigLoader: Send + Sync {
    /// `input` names the input file(s), in a target-specific form.
    fn load(&self, input: &str) -> Result<Vec<u8>>;
}

/// bmv2 takes the compiler's JSON output unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bmv2Loader;

impl DeviceConfigLoader for Bmv2Loader {
    fn load(&self, input: &str) -> Result<Vec<u8>> {
        read(Path::new(input))
    }
}

/// Tofino takes the compiled binary and its context JSON, given as `"<file>.bin,<file>.json"`,
/// packed by [`tofino_device_config`].
#[derive(Clone, Debug)]
pub struct TofinoLoader {
    pub name: String,
}

impl Default for TofinoLoader {
    fn default() -> Self {
        TofinoLoader { name: TOFINO_PIPECONF_NAME.to_string() }
    }
}

impl DeviceConfigLoader for TofinoLoader {
    fn load(&self, input: &str) -> Result<Vec<u8>> {
        let (bin_path, context_path) = match input.split(',').collect::<Vec<_>>()[..] {
            [bin, context] => (bin.trim(), context.trim()),
            _ => {
                return Err(P4rtError::DeviceConfig(format!(
                    "expected \"<tofino.bin>,<context.json>\", got {input:?}"
                )))
            }
        };
        if !bin_path.ends_with(".bin") {
            return Err(P4rtError::DeviceConfig(format!("{bin_path}: expected a .bin file")));
        }
        if !context_path.ends_with(".json") {
            return Err(P4rtError::DeviceConfig(format!("{context_path}: expected a .json file")));
        }

        let bin = read(Path::new(bin_path))?;
        let context = read(Path::new(context_path))?;
        tofino_device_config(&self.name, &bin, &context)
    }
}

/// Packs a Tofino device config: the pipeconf name, the binary and the context JSON, each
/// preceded by its length as a little-endian `u32`.
pub fn tofino_device_config(name: &str, bin: &[u8], context: &[u8]) -> Result<Vec<u8>> {
    let mut config = Vec::with_capacity(12 + name.len() + bin.len() + context.len());
    for section in [name.as_bytes(), bin, context] {
        let len = u32::try_from(section.len()).map_err(|_| {
            P4rtError::DeviceConfig(format!("section of {} bytes is too long", section.len()))
        })?;
        let mut prefix = [0; 4];
        LittleEndian::write_u32(&mut prefix, len);
        config.extend_from_slice(&prefix);
        config.extend_from_slice(section);
    }
    Ok(config)
}

/// Which [`DeviceConfigLoader`] to use, chosen at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Bmv2,
    Tofino,
}

impl TargetKind {
    pub fn loader(self) -> Box<dyn DeviceConfigLoader> {
        match self {
            TargetKind::Bmv2 => Box::new(Bmv2Loader),
            TargetKind::Tofino => Box::new(TofinoLoader::default()),
        }
    }
}

impl FromStr for TargetKind {
    type Err = P4rtError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bmv2" => Ok(TargetKind::Bmv2),
            "tofino" => Ok(TargetKind::Tofino),
            _ => Err(P4rtError::TargetKind(s.to_string())),
        }
    }
}

impl Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TargetKind::Bmv2 => write!(f, "bmv2"),
            TargetKind::Tofino => write!(f, "tofino"),
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| P4rtError::Io { path: path.to_path_buf(), source })
}

/// Reads a P4Info file.  Files ending in `.txt`, `.pbtxt` or `.p4info` are parsed as protobuf
/// text format, anything else as binary protobuf.
pub fn load_p4info(path: &Path) -> Result<P4Info> {
    let text_format = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("pbtxt") | Some("p4info")
    );
    let parse_error = |message: String| P4rtError::P4Info { path: path.to_path_buf(), message };
    if text_format {
        let text = fs::read_to_string(path)
            .map_err(|source| P4rtError::Io { path: path.to_path_buf(), source })?;
        protobuf::text_format::parse_from_str::<P4Info>(&text).map_err(|e| parse_error(e.to_string()))
    } else {
        let bytes = read(path)?;
        P4Info::parse_from_bytes(&bytes).map_err(|e| parse_error(e.to_string()))
    }
}

/// Identifies a device config: the first 8 bytes of its SHA-256, read little-endian.
pub fn cookie(device_config: &[u8]) -> u64 {
    let digest = Sha256::digest(device_config);
    LittleEndian::read_u64(&digest[..8])
}

pub fn build_pipeline_config(p4info: P4Info, device_config: Vec<u8>) -> ForwardingPipelineConfig {
    let mut cookie_jar = ForwardingPipelineConfig_Cookie::new();
    cookie_jar.set_cookie(cookie(&device_config));

    let mut config = ForwardingPipelineConfig::new();
    config.set_p4info(p4info);
    config.set_p4_device_config(device_config);
    config.set_cookie(cookie_jar);
    config
}
