//! The status/management surface: a periodically flushed snapshot of
//! connected clients, serialized via `serde_json` through a `BufWriter`.

use std::time::SystemTime;

use serde::Serialize;

use crate::addr::OuterAddr;
use crate::instance::InstanceState;

/// One row of the status output. `version` controls which optional fields
/// are populated, mirroring the status-file formats recognized
/// historically by downstream tooling.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub real: String,
    pub vaddr: Option<String>,
    pub state: &'static str,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connected_since_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub version: u8,
    pub generated_at: u64,
    pub clients: Vec<StatusRow>,
}

fn state_name(state: InstanceState) -> &'static str {
    match state {
        InstanceState::Unassigned => "unassigned",
        InstanceState::Authenticating => "authenticating",
        InstanceState::Established => "established",
        InstanceState::Halting => "halting",
    }
}

fn real_to_string(real: &OuterAddr) -> String {
    real.to_string()
}

/// Where a [`StatusSnapshot`] is published to. Decoupled from the event loop
/// so tests can assert against an in-memory sink instead of touching disk.
pub trait StatusSink {
    fn publish(&self, snapshot: &StatusSnapshot);
}

/// Writes the snapshot to a file as pretty JSON on every call: a full
/// rewrite rather than an append, so a reader never observes a partial
/// record.
pub struct FileStatusSink {
    path: std::path::PathBuf,
}

impl FileStatusSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatusSink for FileStatusSink {
    fn publish(&self, snapshot: &StatusSnapshot) {
        let Ok(file) = std::fs::File::create(&self.path) else {
            tracing::warn!(path = %self.path.display(), "failed to open status file");
            return;
        };
        let writer = std::io::BufWriter::new(file);
        if let Err(err) = serde_json::to_writer_pretty(writer, snapshot) {
            tracing::warn!(%err, "failed to write status snapshot");
        }
    }
}

pub fn build_snapshot(
    version: u8,
    registry: &crate::registry::ClientInstanceRegistry,
    now: SystemTime,
) -> StatusSnapshot {
    let generated_at = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let clients = registry
        .iter()
        .map(|handle| {
            let inst = handle.borrow();
            let connected_since_secs = inst.created.elapsed().as_secs();
            StatusRow {
                real: real_to_string(&inst.real),
                vaddr: inst.vaddr.map(|v| format!("{v:?}")),
                state: state_name(inst.state),
                bytes_in: inst.bytes_in,
                bytes_out: inst.bytes_out,
                connected_since_secs,
            }
        })
        .collect();

    StatusSnapshot {
        version,
        generated_at,
        clients,
    }
}
