#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::Duration;

use kira_spatial_features::codec::{encode_coordinates, encode_sparse_vector, encode_string_table};
use kira_spatial_features::error::FeatureError;
use kira_spatial_features::metadata::METADATA_KEY;
use kira_spatial_features::source::{ByteSource, MemoryByteSource};
use kira_spatial_features::store::{CELL_IDS_KEY, COORDINATES_KEY, REGIONS_KEY, SLICES_KEY};

pub const CELL_IDS: [&str; 5] = ["cell-0", "cell-1", "cell-2", "cell-3", "cell-4"];

pub fn metadata_json() -> String {
    r#"{
        "version": "1.0",
        "format": "sparse_binary",
        "total_cells": 5,
        "genes": { "total": 3, "features": ["Shh", "Pax9", "Msx1"] },
        "tfs": { "total": 1, "features": ["Foxa1_extended"] },
        "last_updated": "2024-05-01T10:00:00"
    }"#
    .to_string()
}

/// Five-cell dataset with `Shh` and `Pax9` records; `Msx1` is listed but has no file.
pub fn dataset() -> MemoryByteSource {
    MemoryByteSource::new()
        .with(METADATA_KEY, metadata_json().into_bytes())
        .with(CELL_IDS_KEY, encode_string_table(&CELL_IDS))
        .with(
            COORDINATES_KEY,
            encode_coordinates(&[(0.0, 0.0), (1.0, 0.5), (2.0, 1.0), (3.0, 1.5), (4.0, 2.0)]),
        )
        .with(
            SLICES_KEY,
            encode_string_table(&["E13", "E13", "E14", "E14", "E15"]),
        )
        .with(
            REGIONS_KEY,
            encode_string_table(&["palate", "palate", "tongue", "bone", "palate"]),
        )
        .with("genes/Shh.bin", encode_sparse_vector(&[(1, 2.5), (4, 0.75)]))
        .with("genes/Pax9.bin", encode_sparse_vector(&[(0, 1.0)]))
        .with(
            "tfs/Foxa1_extended.bin",
            encode_sparse_vector(&[(2, -0.5), (3, 3.0)]),
        )
}

/// Wraps a source, counting fetches per key and optionally slowing or gating them.
pub struct CountingSource<S> {
    inner: S,
    counts: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    gate: Option<Gate>,
}

pub struct Gate {
    key: String,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

pub struct GateHandle {
    pub started: Receiver<()>,
    pub release: Sender<()>,
}

impl<S: ByteSource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counts: Mutex::new(HashMap::new()),
            delay: None,
            gate: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The first fetch of `key` signals `started` and then blocks until `release` is sent.
    pub fn with_gate(mut self, key: &str) -> (Self, GateHandle) {
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel();
        self.gate = Some(Gate {
            key: key.to_string(),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        (
            self,
            GateHandle {
                started: started_rx,
                release: release_tx,
            },
        )
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }
}

impl<S: ByteSource> ByteSource for CountingSource<S> {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FeatureError> {
        let seen = {
            let mut counts = self.counts.lock().unwrap();
            let entry = counts.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if let Some(gate) = &self.gate {
            if gate.key == key && seen == 1 {
                let _ = gate.started.lock().unwrap().send(());
                let _ = gate.release.lock().unwrap().recv();
            }
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.inner.fetch(key)
    }
}
