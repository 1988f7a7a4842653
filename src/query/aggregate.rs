//! Aggregate functions over query results.

use serde::{Deserialize, Serialize};

use super::attribute::Attribute;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Average,
    Min,
    Max,
    Stdev,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "average",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Stdev => "stdev",
        }
    }

    /// Cypher function implementing the aggregate.
    pub fn cypher(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Stdev => "stDev",
        }
    }
}

/// One aggregate column: a function over an attribute (or over rows, for count).
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub attribute: Option<Attribute>,
    pub alias: Option<String>,
}

impl Aggregate {
    /// Number of matched rows.
    pub fn count() -> Self {
        Self { function: AggregateFunction::Count, attribute: None, alias: None }
    }

    /// Number of non-null values of `attr`.
    pub fn count_of(attr: Attribute) -> Self {
        Self::over(AggregateFunction::Count, attr)
    }

    pub fn sum(attr: Attribute) -> Self {
        Self::over(AggregateFunction::Sum, attr)
    }

    pub fn average(attr: Attribute) -> Self {
        Self::over(AggregateFunction::Average, attr)
    }

    pub fn min(attr: Attribute) -> Self {
        Self::over(AggregateFunction::Min, attr)
    }

    pub fn max(attr: Attribute) -> Self {
        Self::over(AggregateFunction::Max, attr)
    }

    pub fn stdev(attr: Attribute) -> Self {
        Self::over(AggregateFunction::Stdev, attr)
    }

    fn over(function: AggregateFunction, attr: Attribute) -> Self {
        Self { function, attribute: Some(attr), alias: None }
    }

    pub fn column_name(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn output_name(&self) -> String {
        if let Some(a) = &self.alias {
            return a.clone();
        }
        match &self.attribute {
            None => self.function.name().to_string(),
            Some(attr) => format!("{}_{}", self.function.name(), attr.output_name()),
        }
    }

    /// Aggregates reduce scalar values computed in the graph.
    pub fn validate(&self) -> Result<()> {
        if let Some(attr) = &self.attribute {
            if attr.is_list_valued() || attr.is_acoustic() {
                return Err(Error::QueryCompositionError(format!(
                    "cannot take the {} of {attr}: it is not a scalar graph value",
                    self.function.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Hierarchy;
    use crate::query::QueryNode;
    use std::sync::Arc;

    fn word() -> QueryNode {
        let mut h = Hierarchy::new("test");
        h.add_annotation_type("word", None).unwrap();
        h.add_annotation_type("phone", Some("word")).unwrap();
        QueryNode::annotation(Arc::new(h), "word").unwrap()
    }

    #[test]
    fn test_output_names() {
        assert_eq!(Aggregate::count().output_name(), "count");
        let avg = Aggregate::average(word().attr("duration").unwrap());
        assert_eq!(avg.output_name(), "average_duration");
        assert_eq!(avg.column_name("mean_dur").output_name(), "mean_dur");
    }

    #[test]
    fn test_list_valued_rejected() {
        let agg = Aggregate::max(word().attr("phone.label").unwrap());
        assert!(matches!(agg.validate(), Err(Error::QueryCompositionError(_))));
        assert!(Aggregate::sum(word().attr("phone.count").unwrap()).validate().is_ok());
    }
}
