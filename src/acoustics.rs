//! Acoustic track sources.
//!
//! Tracks are not stored in the graph. Queries return the time span and
//! entities of each token, and the result set asks an [`AcousticSource`]
//! for the samples afterwards.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::Result;

/// One track lookup: a measure over a time span of one discourse.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub measure: String,
    pub discourse: String,
    pub speaker: Option<String>,
    pub begin: f64,
    pub end: f64,
}

#[async_trait]
pub trait AcousticSource: Send + Sync {
    /// `(time, value)` samples inside `[begin, end]`, ordered by time.
    async fn track(&self, request: &TrackRequest) -> Result<Vec<(f64, f64)>>;
}

/// Samples held in memory, keyed by discourse and measure.
#[derive(Default)]
pub struct MemoryAcoustics {
    tracks: RwLock<HashMap<(String, String), Vec<(f64, f64)>>>,
}

impl MemoryAcoustics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, discourse: &str, measure: &str, mut samples: Vec<(f64, f64)>) {
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.tracks
            .write()
            .insert((discourse.to_string(), measure.to_string()), samples);
    }
}

#[async_trait]
impl AcousticSource for MemoryAcoustics {
    async fn track(&self, request: &TrackRequest) -> Result<Vec<(f64, f64)>> {
        let tracks = self.tracks.read();
        let key = (request.discourse.clone(), request.measure.clone());
        Ok(tracks
            .get(&key)
            .map(|samples| {
                samples
                    .iter()
                    .copied()
                    .filter(|(t, _)| *t >= request.begin && *t <= request.end)
                    .collect()
            })
            .unwrap_or_default())
    }
}
