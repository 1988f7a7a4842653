//! # Result Materialization
//!
//! A [`ResultSet`] keeps a cache of materialized rows and a queue of open
//! cursors over raw records. Rows are built on demand: [`ResultSet::get`]
//! fills the cache up to the requested index, [`ResultSet::len`] drains
//! everything. Split queries chain one cursor per partition.
//!
//! Materializing a row may call out: acoustic columns fetch their samples
//! from the [`AcousticSource`], and hydrated annotations keep a handle on the
//! [`AnnotationRepository`] for relations that were not preloaded.

pub mod annotation;
pub mod row;
pub mod track;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use crate::acoustics::{AcousticSource, TrackRequest};
use crate::cypher::compiler::{
    ANNOTATION_COLUMN, DISCOURSE_SUFFIX, LABELS_SUFFIX, SPEAKER_SUFFIX, TYPE_SUFFIX,
};
use crate::cypher::{CompiledQuery, HydrationPlan, RowShape, TrackColumn};
use crate::model::{PropertyMap, Value};
use crate::storage::Record;
use crate::{Error, Result};

pub use annotation::{Annotation, AnnotationRepository, Relation};
pub use row::{FromValue, Row};
pub use track::{TimePoint, Track};

/// One materialized result: column values, or a hydrated annotation when
/// the query declared no columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRow {
    Row(Row),
    Annotation(Annotation),
}

impl ResultRow {
    pub fn as_row(&self) -> Option<&Row> {
        match self {
            ResultRow::Row(r) => Some(r),
            ResultRow::Annotation(_) => None,
        }
    }

    pub fn as_annotation(&self) -> Option<&Annotation> {
        match self {
            ResultRow::Annotation(a) => Some(a),
            ResultRow::Row(_) => None,
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            ResultRow::Row(r) => Some(r),
            ResultRow::Annotation(_) => None,
        }
    }

    pub fn into_annotation(self) -> Option<Annotation> {
        match self {
            ResultRow::Annotation(a) => Some(a),
            ResultRow::Row(_) => None,
        }
    }
}

// ============================================================================
// Materializer
// ============================================================================

#[derive(Clone)]
struct Materializer {
    columns: Arc<[String]>,
    shape: RowShape,
    tracks: Vec<TrackColumn>,
    repository: Option<Arc<dyn AnnotationRepository>>,
    acoustics: Option<Arc<dyn AcousticSource>>,
}

fn map_of(value: Option<&Value>) -> PropertyMap {
    value.and_then(Value::as_map).cloned().unwrap_or_default()
}

fn string_of(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

impl Materializer {
    async fn materialize(&self, record: Record) -> Result<ResultRow> {
        match &self.shape {
            RowShape::Annotations(plan) => self.hydrate(&record, plan).map(ResultRow::Annotation),
            _ if self.tracks.is_empty() => {
                let values = self.columns.iter().map(|c| record.value(c)).collect();
                Ok(ResultRow::Row(Row::new(self.columns.clone(), values)))
            }
            _ => self.with_tracks(&record).await.map(ResultRow::Row),
        }
    }

    async fn with_tracks(&self, record: &Record) -> Result<Row> {
        let acoustics = self.acoustics.as_ref().ok_or_else(|| {
            Error::NotFound("acoustic columns were requested but no acoustic source is configured".to_string())
        })?;

        let mut values: Vec<Value> = self.columns.iter().map(|c| record.value(c)).collect();
        let mut merged: Option<Track> = None;
        for tc in &self.tracks {
            let begin = record.get(&tc.begin).and_then(Value::as_float);
            let end = record.get(&tc.end).and_then(Value::as_float);
            let discourse = string_of(record.get(&tc.discourse));
            let samples = match (begin, end, discourse) {
                (Some(begin), Some(end), Some(discourse)) => {
                    let request = TrackRequest {
                        measure: tc.measure.clone(),
                        discourse,
                        speaker: string_of(record.get(&tc.speaker)),
                        begin,
                        end,
                    };
                    acoustics.track(&request).await?
                }
                _ => Vec::new(),
            };
            let idx = self.columns.iter().position(|c| *c == tc.column);
            match (tc.stat, idx) {
                (Some(stat), Some(i)) => {
                    let vals: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
                    values[i] = stat.apply(&vals).map(Value::Float).unwrap_or(Value::Null);
                }
                _ => merged.get_or_insert_with(Track::new).add(&tc.measure, &samples),
            }
        }
        Ok(Row::new(self.columns.clone(), values).with_track(merged))
    }

    fn hydrate(&self, record: &Record, plan: &HydrationPlan) -> Result<Annotation> {
        let root = ANNOTATION_COLUMN;
        let props = record
            .require(root)?
            .as_map()
            .cloned()
            .ok_or_else(|| Error::TypeError { expected: "Map".into(), got: record.value(root).type_name().into() })?;
        let speaker = string_of(record.get(&format!("{root}{SPEAKER_SUFFIX}")));
        let discourse = string_of(record.get(&format!("{root}{DISCOURSE_SUFFIX}")));
        let labels = record
            .get(&format!("{root}{LABELS_SUFFIX}"))
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let mut annotation = self.attach(
            Annotation::new(plan.type_name.clone(), props)
                .with_type_properties(map_of(record.get(&format!("{root}{TYPE_SUFFIX}"))))
                .with_labels(labels)
                .with_entities(speaker.clone(), discourse.clone()),
        );

        for p in &plan.preloads {
            let target = p.relation.target_type(&plan.type_name).to_string();
            let raw = record.value(&p.column);
            let related: Vec<Annotation> = if p.list {
                raw.as_list()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_map)
                    .map(|m| Annotation::new(target.clone(), m.clone()))
                    .collect()
            } else {
                match raw.as_map() {
                    Some(m) => vec![
                        Annotation::new(target.clone(), m.clone())
                            .with_type_properties(map_of(record.get(&format!("{}{TYPE_SUFFIX}", p.column)))),
                    ],
                    None => Vec::new(),
                }
            };
            let related = related
                .into_iter()
                .map(|a| self.attach(a.with_entities(speaker.clone(), discourse.clone())))
                .collect();
            annotation.preload(p.relation.clone(), related);
        }
        Ok(annotation)
    }

    fn attach(&self, annotation: Annotation) -> Annotation {
        match &self.repository {
            Some(r) => annotation.with_repository(r.clone()),
            None => annotation,
        }
    }
}

// ============================================================================
// ResultSet
// ============================================================================

pub struct ResultSet {
    materializer: Materializer,
    cursors: VecDeque<VecDeque<Record>>,
    cache: Vec<ResultRow>,
    position: usize,
}

impl ResultSet {
    pub(crate) fn new(
        compiled: &CompiledQuery,
        records: Vec<Record>,
        repository: Option<Arc<dyn AnnotationRepository>>,
        acoustics: Option<Arc<dyn AcousticSource>>,
    ) -> Self {
        Self {
            materializer: Materializer {
                columns: compiled.columns.clone().into(),
                shape: compiled.shape.clone(),
                tracks: compiled.tracks.clone(),
                repository,
                acoustics,
            },
            cursors: VecDeque::from([VecDeque::from(records)]),
            cache: Vec::new(),
            position: 0,
        }
    }

    /// Append another result set's unread records after this one's.
    pub(crate) fn chain(&mut self, other: ResultSet) {
        self.cursors.extend(other.cursors);
    }

    pub fn columns(&self) -> &[String] {
        &self.materializer.columns
    }

    /// Number of rows materialized so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    async fn fill(&mut self, upto: Option<usize>) -> Result<()> {
        while upto.is_none_or(|i| self.cache.len() <= i) {
            let Some(cursor) = self.cursors.front_mut() else { break };
            match cursor.pop_front() {
                Some(record) => {
                    let row = self.materializer.materialize(record).await?;
                    self.cache.push(row);
                }
                None => {
                    self.cursors.pop_front();
                }
            }
        }
        Ok(())
    }

    pub async fn get(&mut self, index: usize) -> Result<Option<&ResultRow>> {
        self.fill(Some(index)).await?;
        Ok(self.cache.get(index))
    }

    /// Up to `n` rows from the cursor position, advancing it.
    pub async fn next(&mut self, n: usize) -> Result<Vec<ResultRow>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.fill(Some(self.position + n - 1)).await?;
        let end = (self.position + n).min(self.cache.len());
        let page = self.cache[self.position..end].to_vec();
        self.position = end;
        Ok(page)
    }

    /// Up to `n` rows before the cursor position, moving it back.
    pub async fn previous(&mut self, n: usize) -> Result<Vec<ResultRow>> {
        let start = self.position.saturating_sub(n);
        let page = self.cache[start..self.position].to_vec();
        self.position = start;
        Ok(page)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub async fn len(&mut self) -> Result<usize> {
        self.fill(None).await?;
        Ok(self.cache.len())
    }

    pub async fn is_empty(&mut self) -> Result<bool> {
        Ok(self.get(0).await?.is_none())
    }

    pub async fn rows(&mut self) -> Result<&[ResultRow]> {
        self.fill(None).await?;
        Ok(&self.cache)
    }

    pub async fn into_rows(mut self) -> Result<Vec<ResultRow>> {
        self.fill(None).await?;
        Ok(self.cache)
    }

    /// Hydrated annotations, skipping column rows.
    pub async fn annotations(self) -> Result<Vec<Annotation>> {
        Ok(self
            .into_rows()
            .await?
            .into_iter()
            .filter_map(ResultRow::into_annotation)
            .collect())
    }

    /// Write every row as CSV. Track columns expand to one line per time
    /// point, with a `time` column and one column per measure.
    pub async fn to_csv(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.fill(None).await?;
        let m = &self.materializer;
        let mut writer = csv::Writer::from_path(path.as_ref())?;

        if let RowShape::Annotations(_) = m.shape {
            writer.write_record(["type", "id", "label", "begin", "end", "speaker", "discourse"])?;
            for a in self.cache.iter().filter_map(ResultRow::as_annotation) {
                let opt = |v: Option<&str>| v.unwrap_or_default().to_string();
                let num = |v: Option<f64>| v.map(|f| f.to_string()).unwrap_or_default();
                writer.write_record([
                    a.type_name().to_string(),
                    opt(a.id()),
                    opt(a.label()),
                    num(a.begin()),
                    num(a.end()),
                    opt(a.speaker()),
                    opt(a.discourse()),
                ])?;
            }
            writer.flush()?;
            return Ok(());
        }

        // Declared order; `time` sits right before the first series column.
        let series: Vec<Option<&TrackColumn>> = m
            .columns
            .iter()
            .map(|c| m.tracks.iter().find(|t| t.stat.is_none() && &t.column == c))
            .collect();
        let has_series = series.iter().any(Option::is_some);
        let time_at = series.iter().position(Option::is_some);

        let mut header = Vec::with_capacity(m.columns.len() + 1);
        for (i, column) in m.columns.iter().enumerate() {
            if time_at == Some(i) {
                header.push("time".to_string());
            }
            header.push(column.clone());
        }
        writer.write_record(&header)?;

        for row in self.cache.iter().filter_map(ResultRow::as_row) {
            let points: Vec<&TimePoint> = match (has_series, row.track()) {
                (true, Some(track)) => track.points().collect(),
                _ => Vec::new(),
            };
            let line = |point: Option<&TimePoint>| {
                let mut line = Vec::with_capacity(header.len());
                for (i, track) in series.iter().enumerate() {
                    if time_at == Some(i) {
                        line.push(point.map(|p| p.time.to_string()).unwrap_or_default());
                    }
                    line.push(match track {
                        Some(t) => point
                            .and_then(|p| p.values.get(&t.measure))
                            .map(|v| v.to_string())
                            .unwrap_or_default(),
                        None => row.values().get(i).map(Value::to_plain_string).unwrap_or_default(),
                    });
                }
                line
            };
            if points.is_empty() {
                writer.write_record(&line(None))?;
                continue;
            }
            for p in points {
                writer.write_record(&line(Some(p)))?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.materializer.columns)
            .field("cached", &self.cache.len())
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustics::MemoryAcoustics;
    use crate::cypher::compiler::PreloadColumn;
    use crate::model::properties;
    use crate::query::attribute::TrackStat;
    use crate::storage::Statement;

    fn compiled(columns: &[&str], shape: RowShape, tracks: Vec<TrackColumn>) -> CompiledQuery {
        CompiledQuery {
            statement: Statement::raw("RETURN 1"),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            shape,
            tracks,
        }
    }

    fn labels(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::from_pairs([("label", Value::from(format!("w{i}")))])).collect()
    }

    #[tokio::test]
    async fn test_lazy_paging() {
        let mut rs = ResultSet::new(&compiled(&["label"], RowShape::Columns, vec![]), labels(5), None, None);
        let second = rs.get(1).await.unwrap().and_then(ResultRow::as_row).cloned().unwrap();
        assert_eq!(second.get::<String>("label").unwrap(), "w1");
        assert_eq!(rs.cached(), 2);

        let page = rs.next(3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(rs.position(), 3);
        let back = rs.previous(2).await.unwrap();
        assert_eq!(back[0].as_row().unwrap().get::<String>("label").unwrap(), "w1");
        assert_eq!(rs.len().await.unwrap(), 5);
        assert!(rs.get(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chained_cursors() {
        let c = compiled(&["label"], RowShape::Columns, vec![]);
        let mut a = ResultSet::new(&c, labels(2), None, None);
        a.chain(ResultSet::new(&c, Vec::new(), None, None));
        a.chain(ResultSet::new(&c, labels(1), None, None));
        assert_eq!(a.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_hydration_with_preload() {
        let plan = HydrationPlan {
            type_name: "phone".into(),
            preloads: vec![PreloadColumn {
                relation: Relation::Container("word".into()),
                column: "container__word".into(),
                list: false,
            }],
        };
        let record = Record::from_pairs([
            ("annotation", Value::Map(properties([("label", "k")]))),
            ("annotation__labels", Value::from(vec!["phone", "test"])),
            ("annotation__type", Value::Map(properties([("label", "k")]))),
            ("annotation__speaker", Value::from("Speaker 1")),
            ("annotation__discourse", Value::from("cats")),
            ("container__word", Value::Map(properties([("label", "cats")]))),
        ]);
        let rs = ResultSet::new(&compiled(&["annotation"], RowShape::Annotations(plan), vec![]), vec![record], None, None);
        let anns = rs.annotations().await.unwrap();
        let word = anns[0].container("word").await.unwrap().unwrap();
        assert_eq!(word.label(), Some("cats"));
        assert_eq!(word.speaker(), Some("Speaker 1"));
        assert!(anns[0].in_subset("phone"));
    }

    fn pitch_column(stat: Option<TrackStat>, column: &str) -> TrackColumn {
        TrackColumn {
            column: column.into(),
            measure: "pitch".into(),
            stat,
            begin: "a__begin".into(),
            end: "a__end".into(),
            speaker: "a__speaker".into(),
            discourse: "a__discourse".into(),
        }
    }

    fn span_record() -> Record {
        Record::from_pairs([
            ("label", Value::from("cats")),
            ("a__begin", Value::from(0.0)),
            ("a__end", Value::from(0.5)),
            ("a__speaker", Value::from("Speaker 1")),
            ("a__discourse", Value::from("cats")),
        ])
    }

    #[tokio::test]
    async fn test_track_columns_and_csv() {
        let src = Arc::new(MemoryAcoustics::new());
        src.insert("cats", "pitch", vec![(0.1, 100.0), (0.2, 110.0), (0.9, 90.0)]);
        let c = compiled(
            &["label", "pitch", "max_pitch"],
            RowShape::Columns,
            vec![pitch_column(None, "pitch"), pitch_column(Some(TrackStat::Max), "max_pitch")],
        );
        let mut rs = ResultSet::new(&c, vec![span_record()], None, Some(src));
        let row = rs.get(0).await.unwrap().and_then(ResultRow::as_row).cloned().unwrap();
        assert_eq!(row.get::<f64>("max_pitch").unwrap(), 110.0);
        assert_eq!(row.track().map(Track::len), Some(2));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        rs.to_csv(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "label,time,pitch,max_pitch\ncats,0.1,100,110\ncats,0.2,110,110\n");
    }

    #[tokio::test]
    async fn test_csv_header_follows_declared_columns() {
        let src = Arc::new(MemoryAcoustics::new());
        src.insert("cats", "pitch", vec![(0.1, 100.0)]);
        let c = compiled(&["pitch", "label"], RowShape::Columns, vec![pitch_column(None, "pitch")]);
        let mut rs = ResultSet::new(&c, vec![span_record()], None, Some(src));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        rs.to_csv(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "time,pitch,label\n0.1,100,cats\n");
    }

    #[tokio::test]
    async fn test_track_without_source() {
        let c = compiled(&["pitch"], RowShape::Columns, vec![pitch_column(None, "pitch")]);
        let mut rs = ResultSet::new(&c, vec![span_record()], None, None);
        assert!(matches!(rs.get(0).await, Err(Error::NotFound(_))));
    }
}
