//! sr-logging: NDJSON run events.
//!
//! Append-only, one JSON object per line, so a run can be post-mortemed with line tools
//! even when the process died mid-write.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const EVENT_ROLLOUT_STATS: &str = "rollout_stats";
pub const EVENT_WORKER_EXIT: &str = "worker_exit";

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

pub fn hash_config_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Schema versioning fields carried by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfoV1 {
    pub protocol_version: u32,
    pub obs_schema_id: String,
}

/// Per-rollout statistics. Metrics with nothing to average over are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutStatsV1 {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scorek: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lns: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pcs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub short_finish: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub maxk: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub perline: Option<f64>,
    pub mil_games: f64,
    pub long_games: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutStatsEventV1 {
    pub event: String,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub rollout: u64,
    pub window: u32,
    pub envs: u32,
    pub finished_episodes: u64,

    pub stats: RolloutStatsV1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerExitEventV1 {
    pub event: String,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub worker: u32,
    pub slot_start: u32,
    pub slot_end: u32,
    /// `"ok"`, `"failed"` or `"disconnected"`.
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it if it doesn't exist.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}

impl Drop for NdjsonWriter {
    fn drop(&mut self) {
        let _ = self.w.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use serde_json::Value;

    fn read_ndjson_lenient(path: &Path) -> Vec<Value> {
        let s = fs::read_to_string(path).expect("read");
        s.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Value>(l).ok())
            .collect()
    }

    fn v() -> VersionInfoV1 {
        VersionInfoV1 {
            protocol_version: 1,
            obs_schema_id: "stacker".to_string(),
        }
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn writes_one_valid_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut w = NdjsonWriter::open_append(&path).unwrap();

        #[derive(Serialize)]
        struct E {
            event: &'static str,
            x: u32,
        }

        w.write_event(&E { event: "e", x: 1 }).unwrap();
        w.write_event(&E { event: "e", x: 2 }).unwrap();
        w.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[0]["x"], 1);
        assert_eq!(vals[1]["x"], 2);
    }

    #[test]
    fn periodic_flush_makes_lines_visible_without_explicit_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut w = NdjsonWriter::open_append_with_flush(&path, 1).unwrap();
        w.write_event(&serde_json::json!({"event": "e"})).unwrap();
        assert_eq!(read_ndjson_lenient(&path).len(), 1);
        drop(w);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        for x in 0..2 {
            let mut w = NdjsonWriter::open_append(&path).unwrap();
            w.write_event(&serde_json::json!({ "x": x })).unwrap();
        }
        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[1]["x"], 1);
    }

    #[test]
    fn lenient_reader_tolerates_trailing_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        {
            let mut w = NdjsonWriter::open_append(&path).unwrap();
            w.write_event(&serde_json::json!({"event": "e", "x": 1})).unwrap();
        }

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"event":"e","x":"#).unwrap();
        f.flush().unwrap();

        let vals = read_ndjson_lenient(&path);
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0]["x"], 1);
    }

    #[test]
    fn absent_stats_are_omitted() {
        let e = RolloutStatsEventV1 {
            event: EVENT_ROLLOUT_STATS.to_string(),
            ts_ms: now_ms(),
            v: v(),
            rollout: 3,
            window: 5,
            envs: 6,
            finished_episodes: 0,
            stats: RolloutStatsV1 {
                maxk: Some(1.5),
                ..Default::default()
            },
        };
        let val = serde_json::to_value(&e).unwrap();
        let stats = val["stats"].as_object().unwrap();
        assert!(stats.contains_key("maxk"));
        assert!(stats.contains_key("mil_games"));
        assert!(!stats.contains_key("reward"));
        assert!(!stats.contains_key("perline"));
        assert_eq!(val["v"]["obs_schema_id"], "stacker");
    }

    #[test]
    fn worker_exit_event_roundtrips() {
        let e = WorkerExitEventV1 {
            event: EVENT_WORKER_EXIT.to_string(),
            ts_ms: 1,
            v: v(),
            worker: 1,
            slot_start: 3,
            slot_end: 6,
            status: "disconnected".to_string(),
            error: Some("eof".to_string()),
        };
        let back: WorkerExitEventV1 =
            serde_json::from_str(&serde_json::to_string(&e).unwrap()).unwrap();
        assert_eq!(back.slot_end, 6);
        assert_eq!(back.status, "disconnected");
    }

    #[test]
    fn config_hash_is_stable_hex() {
        let a = hash_config_bytes(b"sampler: {}");
        assert_eq!(a, hash_config_bytes(b"sampler: {}"));
        assert_ne!(a, hash_config_bytes(b"sampler: {n_workers: 2}"));
        assert_eq!(a.len(), 64);
    }
}
