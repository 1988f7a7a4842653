//! Acoustic tracks merged per time point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::attribute::TrackStat;

/// Time points are keyed at microsecond resolution so measures sampled at
/// the same instant land on the same point.
fn time_key(time: f64) -> i64 {
    (time * 1_000_000.0).round() as i64
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimePoint {
    pub time: f64,
    pub values: BTreeMap<String, f64>,
}

/// Every measure fetched for one row, merged by time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    points: BTreeMap<i64, TimePoint>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `(time, value)` samples of one measure.
    pub fn add(&mut self, measure: &str, samples: &[(f64, f64)]) {
        for &(time, value) in samples {
            let point = self.points.entry(time_key(time)).or_insert_with(|| TimePoint {
                time,
                values: BTreeMap::new(),
            });
            point.values.insert(measure.to_string(), value);
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &TimePoint> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Measures present on at least one point, sorted.
    pub fn measures(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .points
            .values()
            .flat_map(|p| p.values.keys().cloned())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn values(&self, measure: &str) -> Vec<f64> {
        self.points
            .values()
            .filter_map(|p| p.values.get(measure).copied())
            .collect()
    }

    pub fn stat(&self, measure: &str, stat: TrackStat) -> Option<f64> {
        stat.apply(&self.values(measure))
    }
}
