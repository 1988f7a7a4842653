//! Query → Cypher statement compilation.
//!
//! Clause order is fixed:
//!
//! 1. `MATCH` of every required node, with the filters that need no
//!    collection in the attached `WHERE`;
//! 2. one `OPTIONAL MATCH` per optional block;
//! 3. one stage per collection (gather members, order by time, collect),
//!    carrying every bound variable through `WITH`; filters on collection
//!    aggregates hang off the last stage;
//! 4. the terminal clause: `RETURN` columns, hydration columns, a count,
//!    aggregates, or a mutation.

use crate::model::Value;
use crate::planner::{self, PlanInput, QueryPlan};
use crate::query::aggregate::Aggregate;
use crate::query::attribute::{Attribute, AttributeKind, Level, TrackStat};
use crate::query::builder::Query;
use crate::query::clause::ClauseElement;
use crate::query::node::{NodeKind, PauseDirection, QueryNode, Root};
use crate::results::annotation::Relation;
use crate::storage::Statement;
use crate::{Error, Result};

use super::ast::*;
use super::params::ParamSink;
use super::render::{self, Ctx};
use super::{ident, prop};

/// Column holding the hydrated root annotation's properties.
pub const ANNOTATION_COLUMN: &str = "annotation";
pub const LABELS_SUFFIX: &str = "__labels";
pub const TYPE_SUFFIX: &str = "__type";
pub const SPEAKER_SUFFIX: &str = "__speaker";
pub const DISCOURSE_SUFFIX: &str = "__discourse";
/// Column holding the affected row count of a mutation.
pub const AFFECTED_COLUMN: &str = "affected";
pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Longest pause span (in tokens) a pause path may cross.
    pub max_pause_span: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_pause_span: 15 }
    }
}

/// What the statement produces.
#[derive(Debug, Clone)]
pub enum Projection {
    Rows,
    Count,
    Aggregate(Vec<Aggregate>),
    Mutation(Mutation),
}

#[derive(Debug, Clone)]
pub enum Mutation {
    SetProperties(Vec<(String, Value)>),
    RemoveProperties(Vec<String>),
    AddSubset(String),
    RemoveSubset(String),
    Delete,
    Cache(Vec<Attribute>),
}

/// How records of a compiled statement turn into rows.
#[derive(Debug, Clone)]
pub enum RowShape {
    Columns,
    Annotations(HydrationPlan),
    Count,
    Aggregate,
    Affected,
}

#[derive(Debug, Clone)]
pub struct HydrationPlan {
    pub type_name: String,
    pub preloads: Vec<PreloadColumn>,
}

#[derive(Debug, Clone)]
pub struct PreloadColumn {
    pub relation: Relation,
    pub column: String,
    pub list: bool,
}

/// An acoustic column, filled after execution from the helper columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackColumn {
    pub column: String,
    pub measure: String,
    pub stat: Option<TrackStat>,
    pub begin: String,
    pub end: String,
    pub speaker: String,
    pub discourse: String,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub statement: Statement,
    /// Visible columns in declaration order.
    pub columns: Vec<String>,
    pub shape: RowShape,
    pub tracks: Vec<TrackColumn>,
}

impl CompiledQuery {
    pub fn text(&self) -> &str {
        &self.statement.text
    }
}

// ============================================================================
// Entry point
// ============================================================================

pub fn compile(query: &Query, projection: &Projection, options: &CompileOptions) -> Result<CompiledQuery> {
    let to_find = &query.to_find;
    let annotation_root = matches!(to_find.root(), Root::Annotation(_));

    let columns: Vec<Attribute> = match projection {
        Projection::Rows if query.columns.is_empty() && !annotation_root => default_columns(to_find)?,
        _ => query.columns.clone(),
    };
    let hydrate = matches!(projection, Projection::Rows) && columns.is_empty();

    let order_attrs: Vec<&Attribute> = query.order_by.iter().map(|(a, _)| a).collect();
    let (required, outputs): (Vec<&Attribute>, Vec<&Attribute>) = match projection {
        Projection::Rows => (order_attrs, columns.iter().collect()),
        Projection::Count => (Vec::new(), Vec::new()),
        Projection::Aggregate(aggs) => {
            let mut outputs: Vec<&Attribute> = query.group_by.iter().collect();
            outputs.extend(aggs.iter().filter_map(|a| a.attribute.as_ref()));
            (order_attrs, outputs)
        }
        Projection::Mutation(Mutation::Cache(attrs)) => (Vec::new(), attrs.iter().collect()),
        Projection::Mutation(_) => (Vec::new(), Vec::new()),
    };

    for a in required.iter().chain(outputs.iter()) {
        if a.is_acoustic() && !matches!(projection, Projection::Rows) {
            return Err(Error::QueryCompositionError(format!(
                "{a} is an acoustic measure and can only be returned as a column"
            )));
        }
    }
    if let Some(a) = required.iter().find(|a| a.is_acoustic()) {
        return Err(Error::QueryCompositionError(format!("cannot order by acoustic measure {a}")));
    }

    let preload: &[QueryNode] = if hydrate { &query.preload } else { &[] };
    let input = PlanInput {
        to_find,
        filters: &query.filters,
        required,
        outputs,
        preload,
        hydrate,
    };
    let plan = planner::plan(&input)?;

    let mut params = ParamSink::new();
    let mut clauses = bind_clauses(&plan, to_find.corpus_name(), options, &mut params)?;

    let (terminal, columns, shape, tracks) = match projection {
        Projection::Rows if hydrate => {
            let (ret, cols, hydration) = hydration_return(query, &plan)?;
            (ret, cols, RowShape::Annotations(hydration), Vec::new())
        }
        Projection::Rows => {
            let (ret, cols, tracks) = columns_return(query, &columns)?;
            (ret, cols, RowShape::Columns, tracks)
        }
        Projection::Count => (
            vec![Clause::Return(ReturnClause {
                items: vec![ReturnItem::aliased("count(*)", COUNT_COLUMN)],
                ..Default::default()
            })],
            vec![COUNT_COLUMN.to_string()],
            RowShape::Count,
            Vec::new(),
        ),
        Projection::Aggregate(aggs) => {
            let (ret, cols) = aggregate_return(query, aggs)?;
            (ret, cols, RowShape::Aggregate, Vec::new())
        }
        Projection::Mutation(m) => {
            let ret = mutation_clauses(to_find, m, &mut params)?;
            (ret, vec![AFFECTED_COLUMN.to_string()], RowShape::Affected, Vec::new())
        }
    };
    clauses.extend(terminal);

    let text = CypherQuery { clauses }.to_string();
    Ok(CompiledQuery {
        statement: Statement::new(text, params.into_params()),
        columns,
        shape,
        tracks,
    })
}

/// Columns returned for lexicon, speaker and discourse queries without explicit columns.
fn default_columns(to_find: &QueryNode) -> Result<Vec<Attribute>> {
    let h = to_find.hierarchy();
    let names: Vec<String> = match to_find.kind() {
        NodeKind::Lexicon { type_name } => h
            .annotation_type(type_name)
            .map(|at| at.type_properties.keys().cloned().collect())
            .unwrap_or_default(),
        NodeKind::Speaker { .. } => h.speaker_properties().keys().cloned().collect(),
        NodeKind::Discourse { .. } => h.discourse_properties().keys().cloned().collect(),
        _ => Vec::new(),
    };
    names.iter().map(|n| to_find.attr(n)).collect()
}

// ============================================================================
// Binding: MATCH, OPTIONAL MATCH, collection stages
// ============================================================================

fn bind_clauses(
    plan: &QueryPlan,
    corpus: &str,
    options: &CompileOptions,
    params: &mut ParamSink,
) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    let mut carried: Vec<String> = Vec::new();

    let mut patterns = Vec::new();
    for n in &plan.required {
        patterns.extend(node_patterns(n, plan, corpus)?);
        carried.extend(bound_variables(n, plan));
    }
    let where_clause = render_filters(&plan.top_filters, Ctx::top(), params)?;
    clauses.push(Clause::Match(MatchClause { optional: false, patterns, where_clause }));

    for block in &plan.optional_blocks {
        let mut patterns = Vec::new();
        for n in block {
            patterns.extend(node_patterns(n, plan, corpus)?);
            carried.extend(bound_variables(n, plan));
        }
        clauses.push(Clause::Match(MatchClause { optional: true, patterns, where_clause: None }));
    }

    let post = render_filters(&plan.post_filters, Ctx::top(), params)?;
    let last = plan.collections.len().saturating_sub(1);
    for (i, c) in plan.collections.iter().enumerate() {
        let post = if i == last { post.clone() } else { None };
        clauses.extend(collection_stage(c, plan, corpus, &carried, post, options, params)?);
        carried.push(c.alias().to_string());
        if plan.is_typed(c) {
            carried.push(c.types_alias());
        }
    }
    Ok(clauses)
}

fn render_filters(filters: &[ClauseElement], ctx: Ctx<'_>, params: &mut ParamSink) -> Result<Option<String>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let parts = filters
        .iter()
        .map(|f| render::clause(f, ctx, params))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(parts.join("\nAND ")))
}

fn bound_variables(n: &QueryNode, plan: &QueryPlan) -> Vec<String> {
    let mut out = vec![n.alias().to_string()];
    if n.is_token() && plan.is_typed(n) {
        out.push(n.type_alias());
    }
    out
}

/// Labels of a token pattern: type, corpus, token-level subsets.
fn token_labels(n: &QueryNode, type_name: &str, corpus: &str) -> Vec<String> {
    let mut labels = vec![type_name.to_string(), corpus.to_string()];
    labels.extend(
        n.subsets()
            .iter()
            .filter(|s| s.level == Level::Token)
            .map(|s| s.label.clone()),
    );
    labels
}

/// Labels of a type-node pattern: `<type>_type`, corpus, type-level subsets.
fn type_labels(n: &QueryNode, type_name: &str, corpus: &str) -> Vec<String> {
    let mut labels = vec![format!("{type_name}_type"), corpus.to_string()];
    labels.extend(
        n.subsets()
            .iter()
            .filter(|s| s.level == Level::Type)
            .map(|s| s.label.clone()),
    );
    labels
}

fn node_patterns(n: &QueryNode, plan: &QueryPlan, corpus: &str) -> Result<Vec<Pattern>> {
    let alias = n.alias();
    let type_name = n.type_name().unwrap_or_default();
    let token = || NodePattern::new(Some(alias), token_labels(n, type_name, corpus));

    let mut patterns = vec![match n.kind() {
        NodeKind::Annotation { .. } => Pattern::start(token()),
        NodeKind::Lexicon { .. } => Pattern::start(NodePattern::new(Some(alias), type_labels(n, type_name, corpus))),
        NodeKind::Speaker { anchor } => entity_pattern(alias, "Speaker", "spoken_by", anchor.as_ref(), corpus),
        NodeKind::Discourse { anchor } => entity_pattern(alias, "Discourse", "spoken_in", anchor.as_ref(), corpus),
        NodeKind::Precedence { .. } => {
            let link = plan.link(n).ok_or_else(|| {
                Error::QueryCompositionError(format!("no precedence base planned for {}", n.display_path()))
            })?;
            let hops = VarLength::Exact(link.steps.unsigned_abs() as usize);
            let base = Pattern::start(NodePattern::var(link.base.alias()));
            if link.steps > 0 {
                base.out("precedes", hops, token())
            } else {
                base.inc("precedes", hops, token())
            }
        }
        NodeKind::Hierarchical { anchor, depth, .. } => {
            Pattern::start(NodePattern::var(anchor.alias())).out("contained_by", VarLength::Exact(*depth), token())
        }
        _ => {
            return Err(Error::QueryCompositionError(format!(
                "{} is not bound by a MATCH pattern",
                n.display_path()
            )));
        }
    }];

    if n.is_token() && plan.is_typed(n) {
        patterns.push(Pattern::start(NodePattern::var(alias)).out(
            "is_a",
            VarLength::Exact(1),
            NodePattern::new(Some(&n.type_alias()), type_labels(n, type_name, corpus)),
        ));
    }
    Ok(patterns)
}

fn entity_pattern(alias: &str, label: &str, rel: &str, anchor: Option<&QueryNode>, corpus: &str) -> Pattern {
    let node = NodePattern::new(Some(alias), [label, corpus]);
    match anchor {
        Some(a) => Pattern::start(NodePattern::var(a.alias())).out(rel, VarLength::Exact(1), node),
        None => Pattern::start(node),
    }
}

fn carry(carried: &[String], extra: impl IntoIterator<Item = ReturnItem>) -> Vec<ReturnItem> {
    carried.iter().map(|v| ReturnItem::var(v)).chain(extra).collect()
}

fn collection_stage(
    c: &QueryNode,
    plan: &QueryPlan,
    corpus: &str,
    carried: &[String],
    post: Option<String>,
    options: &CompileOptions,
    params: &mut ParamSink,
) -> Result<Vec<Clause>> {
    let filters = render_filters(plan.stage_filters(c), Ctx::stage(c), params)?;
    let m = c.member_alias();
    let mt = c.member_type_alias();
    let typed = plan.is_typed(c);
    let type_name = c.type_name().unwrap_or_default();
    let mut out = Vec::new();

    let (member, rel, depth, anchor) = match c.kind() {
        NodeKind::SubPath { anchor, depth, .. } => (
            NodePattern::new(Some(&m), token_labels(c, type_name, corpus)),
            "contained_by",
            *depth,
            anchor,
        ),
        NodeKind::SubAnnotation { anchor, .. } => (
            NodePattern::new(Some(&m), [type_name, corpus]),
            "annotates",
            1,
            anchor,
        ),
        NodeKind::PausePath { anchor, direction } => {
            return Ok(pause_stage(c, anchor, *direction, corpus, carried, filters, post, typed, options));
        }
        _ => {
            return Err(Error::QueryCompositionError(format!("{} is not a collection", c.display_path())));
        }
    };

    let mut patterns =
        vec![Pattern::start(member).out(rel, VarLength::Exact(depth), NodePattern::var(anchor.alias()))];
    if typed {
        patterns.push(Pattern::start(NodePattern::var(&m)).out(
            "is_a",
            VarLength::Exact(1),
            NodePattern::new(Some(&mt), type_labels(c, type_name, corpus)),
        ));
    }
    out.push(Clause::Match(MatchClause { optional: true, patterns, where_clause: filters }));

    let mut members = vec![ReturnItem::var(&m)];
    let mut collected = vec![ReturnItem::aliased(format!("collect({m})"), c.alias())];
    if typed {
        members.push(ReturnItem::var(&mt));
        collected.push(ReturnItem::aliased(format!("collect({mt})"), &c.types_alias()));
    }
    out.push(Clause::With(WithClause {
        items: carry(carried, members),
        order_by: vec![OrderExpr::asc(format!("{m}.begin"))],
        where_clause: None,
    }));
    out.push(Clause::With(WithClause {
        items: carry(carried, collected),
        order_by: Vec::new(),
        where_clause: post,
    }));
    Ok(out)
}

/// Tokens between the anchor and the nearest speech token across a
/// `precedes_pause` edge. Intermediate tokens must all be non-speech, and a
/// span without intermediate tokens yields an empty list.
#[allow(clippy::too_many_arguments)]
fn pause_stage(
    c: &QueryNode,
    anchor: &QueryNode,
    direction: PauseDirection,
    corpus: &str,
    carried: &[String],
    filters: Option<String>,
    post: Option<String>,
    typed: bool,
    options: &CompileOptions,
) -> Vec<Clause> {
    let a = anchor.alias();
    let p = format!("{}_p", c.alias());
    let end = format!("{}_end", c.alias());
    let type_name = anchor.type_name().unwrap_or_default();
    let end_node = NodePattern::new(Some(&end), [type_name, crate::hierarchy::SPEECH_LABEL, corpus]);
    let span = VarLength::Range { min: 1, max: Some(options.max_pause_span) };

    let (pattern, adjacency) = match direction {
        PauseDirection::Following => (
            Pattern::start(NodePattern::var(a)).out("precedes", span, end_node).named(&p),
            format!("({a})-[:precedes_pause]->({end})"),
        ),
        PauseDirection::Previous => (
            Pattern::start(end_node).out("precedes", span, NodePattern::var(a)).named(&p),
            format!("({end})-[:precedes_pause]->({a})"),
        ),
    };
    let inner = format!("nodes({p})[1..-1]");
    let mut out = vec![Clause::Match(MatchClause {
        optional: true,
        patterns: vec![pattern],
        where_clause: Some(format!(
            "{adjacency} AND ALL(n IN {inner} WHERE NOT n:{})",
            crate::hierarchy::SPEECH_LABEL
        )),
    })];

    let m = c.member_alias();
    let members = match filters {
        Some(f) => format!("[{m} IN {inner} WHERE {f}]"),
        None => inner.clone(),
    };
    let gathered = ReturnItem::aliased(
        format!("CASE WHEN {p} IS NOT NULL AND size({inner}) > 0 THEN {members} ELSE [] END"),
        c.alias(),
    );

    if typed {
        out.push(Clause::With(WithClause { items: carry(carried, [gathered]), ..Default::default() }));
        let types = ReturnItem::aliased(
            format!("[x IN {} | head([(x)-[:is_a]->(xt) | xt])]", c.alias()),
            &c.types_alias(),
        );
        out.push(Clause::With(WithClause {
            items: carry(carried, [ReturnItem::var(c.alias()), types]),
            order_by: Vec::new(),
            where_clause: post,
        }));
    } else {
        out.push(Clause::With(WithClause {
            items: carry(carried, [gathered]),
            order_by: Vec::new(),
            where_clause: post,
        }));
    }
    out
}

// ============================================================================
// Terminal clauses
// ============================================================================

fn order_clause(query: &Query) -> Result<Vec<OrderExpr>> {
    query
        .order_by
        .iter()
        .map(|(attr, descending)| {
            Ok(OrderExpr { expr: render::attribute(attr, Ctx::top())?, ascending: !descending })
        })
        .collect()
}

fn check_unique(columns: &[String]) -> Result<()> {
    for (i, c) in columns.iter().enumerate() {
        if columns[..i].contains(c) {
            return Err(Error::QueryCompositionError(format!(
                "column '{c}' appears twice; use column_name to rename one"
            )));
        }
    }
    Ok(())
}

fn columns_return(
    query: &Query,
    columns: &[Attribute],
) -> Result<(Vec<Clause>, Vec<String>, Vec<TrackColumn>)> {
    let mut items = Vec::new();
    let mut visible = Vec::new();
    let mut hidden: Vec<String> = Vec::new();
    let mut tracks = Vec::new();

    for attr in columns {
        let name = attr.output_name();
        visible.push(name.clone());
        if let NodeKind::Acoustic { anchor, measure } = attr.node().kind() {
            let stat = match attr.kind() {
                AttributeKind::TrackStat(s) => Some(*s),
                _ => None,
            };
            let base = anchor.alias();
            let helpers = [
                (format!("{base}__begin"), prop(base, "begin")),
                (format!("{base}__end"), prop(base, "end")),
                (format!("{base}__speaker"), prop(anchor.speaker()?.alias(), "name")),
                (format!("{base}__discourse"), prop(anchor.discourse()?.alias(), "name")),
            ];
            for (col, expr) in &helpers {
                if !hidden.contains(col) {
                    hidden.push(col.clone());
                    items.push(ReturnItem::aliased(expr.clone(), col));
                }
            }
            let [begin, end, speaker, discourse] = helpers.map(|(c, _)| c);
            tracks.push(TrackColumn { column: name, measure: measure.clone(), stat, begin, end, speaker, discourse });
            continue;
        }
        items.push(ReturnItem::aliased(render::attribute(attr, Ctx::top())?, &name));
    }
    check_unique(&visible)?;

    let ret = ReturnClause {
        distinct: false,
        items,
        order_by: order_clause(query)?,
        skip: query.offset,
        limit: query.limit,
    };
    Ok((vec![Clause::Return(ret)], visible, tracks))
}

/// Relation of a preloaded node to the queried annotation.
fn preload_relation(to_find: &QueryNode, n: &QueryNode) -> Result<Relation> {
    let direct = n.anchor() == Some(to_find);
    let relation = match n.kind() {
        NodeKind::Precedence { offset: -1, .. } if direct && n.subsets().is_empty() => Some(Relation::Previous),
        NodeKind::Precedence { offset: 1, .. } if direct && n.subsets().is_empty() => Some(Relation::Following),
        NodeKind::Hierarchical { type_name, .. } if n.hierarchical_base() == to_find && n.subsets().is_empty() => {
            Some(Relation::Container(type_name.clone()))
        }
        NodeKind::SubPath { type_name, .. } if direct && n.subsets().is_empty() => {
            Some(Relation::Contained(type_name.clone()))
        }
        NodeKind::SubAnnotation { type_name, .. } if direct => Some(Relation::SubAnnotations(type_name.clone())),
        _ => None,
    };
    relation.ok_or_else(|| {
        Error::QueryCompositionError(format!(
            "{} cannot be preloaded: only neighbours, containers, contained annotations \
             and subannotations of {} can",
            n.display_path(),
            to_find.display_path()
        ))
    })
}

fn hydration_return(query: &Query, plan: &QueryPlan) -> Result<(Vec<Clause>, Vec<String>, HydrationPlan)> {
    let a = query.to_find.alias();
    let root = ANNOTATION_COLUMN;
    let mut items = vec![
        ReturnItem::aliased(format!("properties({a})"), root),
        ReturnItem::aliased(format!("labels({a})"), &format!("{root}{LABELS_SUFFIX}")),
        ReturnItem::aliased(format!("properties({})", query.to_find.type_alias()), &format!("{root}{TYPE_SUFFIX}")),
        ReturnItem::aliased(prop(query.to_find.speaker()?.alias(), "name"), &format!("{root}{SPEAKER_SUFFIX}")),
        ReturnItem::aliased(prop(query.to_find.discourse()?.alias(), "name"), &format!("{root}{DISCOURSE_SUFFIX}")),
    ];
    let mut columns = vec![root.to_string()];
    let mut preloads = Vec::new();
    for n in &query.preload {
        let relation = preload_relation(&query.to_find, n)?;
        let column = relation.column();
        if columns.contains(&column) {
            continue;
        }
        let list = n.is_collection();
        if list {
            items.push(ReturnItem::aliased(format!("[x IN {} | properties(x)]", n.alias()), &column));
        } else {
            items.push(ReturnItem::aliased(format!("properties({})", n.alias()), &column));
            if plan.is_typed(n) {
                items.push(ReturnItem::aliased(
                    format!("properties({})", n.type_alias()),
                    &format!("{column}{TYPE_SUFFIX}"),
                ));
            }
        }
        columns.push(column.clone());
        preloads.push(PreloadColumn { relation, column, list });
    }

    let ret = ReturnClause {
        distinct: false,
        items,
        order_by: order_clause(query)?,
        skip: query.offset,
        limit: query.limit,
    };
    let hydration = HydrationPlan {
        type_name: query.to_find.type_name().unwrap_or_default().to_string(),
        preloads,
    };
    Ok((vec![Clause::Return(ret)], columns, hydration))
}

fn aggregate_return(query: &Query, aggs: &[Aggregate]) -> Result<(Vec<Clause>, Vec<String>)> {
    if aggs.is_empty() {
        return Err(Error::QueryCompositionError("aggregate() needs at least one function".to_string()));
    }
    if !query.columns.is_empty() && query.group_by.is_empty() {
        return Err(Error::QueryCompositionError(
            "columns without group_by cannot be combined with aggregates".to_string(),
        ));
    }
    for agg in aggs {
        agg.validate()?;
    }

    let mut items = Vec::new();
    let mut names = Vec::new();
    for g in &query.group_by {
        let name = g.output_name();
        items.push(ReturnItem::aliased(render::attribute(g, Ctx::top())?, &name));
        names.push(name);
    }
    for agg in aggs {
        let name = agg.output_name();
        let expr = match &agg.attribute {
            None => format!("{}(*)", agg.function.cypher()),
            Some(attr) => format!("{}({})", agg.function.cypher(), render::attribute(attr, Ctx::top())?),
        };
        items.push(ReturnItem::aliased(expr, &name));
        names.push(name);
    }
    check_unique(&names)?;

    let mut order_by = Vec::new();
    for (attr, descending) in &query.order_by {
        let key = query.group_by.iter().find(|g| *g == attr || g.output_name() == attr.output_name());
        match key {
            Some(g) => order_by.push(OrderExpr { expr: ident(&g.output_name()), ascending: !descending }),
            None => {
                return Err(Error::QueryCompositionError(format!(
                    "cannot order aggregated results by {attr}: it is not a group_by key"
                )));
            }
        }
    }
    if order_by.is_empty() {
        if let Some(first) = query.group_by.first() {
            order_by.push(OrderExpr::asc(ident(&first.output_name())));
        }
    }

    let ret = ReturnClause { distinct: false, items, order_by, skip: query.offset, limit: query.limit };
    Ok((vec![Clause::Return(ret)], names))
}

fn mutation_clauses(
    to_find: &QueryNode,
    mutation: &Mutation,
    params: &mut ParamSink,
) -> Result<Vec<Clause>> {
    let target = to_find.alias().to_string();
    let mut clauses = match mutation {
        Mutation::SetProperties(kv) => {
            if kv.is_empty() {
                return Err(Error::QueryCompositionError("no properties to set".to_string()));
            }
            let items = kv
                .iter()
                .map(|(k, v)| SetItem::Property {
                    variable: target.clone(),
                    key: k.clone(),
                    value: params.bind(k, v.clone()),
                })
                .collect();
            vec![Clause::Set(items)]
        }
        Mutation::RemoveProperties(names) => {
            if names.is_empty() {
                return Err(Error::QueryCompositionError("no properties to remove".to_string()));
            }
            let items = names
                .iter()
                .map(|k| RemoveItem::Property { variable: target.clone(), key: k.clone() })
                .collect();
            vec![Clause::Remove(items)]
        }
        Mutation::AddSubset(label) | Mutation::RemoveSubset(label) => {
            if !matches!(to_find.kind(), NodeKind::Annotation { .. } | NodeKind::Lexicon { .. }) {
                return Err(Error::QueryCompositionError(format!(
                    "subsets apply to annotations and lexicon entries, not {}",
                    to_find.display_path()
                )));
            }
            if matches!(mutation, Mutation::AddSubset(_)) {
                vec![Clause::Set(vec![SetItem::Label { variable: target.clone(), label: label.clone() }])]
            } else {
                vec![Clause::Remove(vec![RemoveItem::Label { variable: target.clone(), label: label.clone() }])]
            }
        }
        Mutation::Delete => vec![Clause::Delete { variables: vec![target.clone()], detach: true }],
        Mutation::Cache(attrs) => {
            if attrs.is_empty() {
                return Err(Error::QueryCompositionError("no attributes to cache".to_string()));
            }
            let names: Vec<String> = attrs.iter().map(Attribute::output_name).collect();
            check_unique(&names)?;
            let items = attrs
                .iter()
                .zip(names)
                .map(|(attr, key)| {
                    Ok(SetItem::Property {
                        variable: target.clone(),
                        key,
                        value: render::attribute(attr, Ctx::top())?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            vec![Clause::Set(items)]
        }
    };
    clauses.push(Clause::Return(ReturnClause {
        items: vec![ReturnItem::aliased("count(*)", AFFECTED_COLUMN)],
        ..Default::default()
    }));
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, PropertyType};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn hierarchy() -> Arc<Hierarchy> {
        let mut h = Hierarchy::new("test");
        h.add_annotation_type("word", None).unwrap();
        h.add_annotation_type("phone", Some("word")).unwrap();
        h.add_type_properties("word", [("frequency", PropertyType::Int)]).unwrap();
        h.add_token_subsets("word", ["pause"]).unwrap();
        Arc::new(h)
    }

    fn compile_rows(q: &Query) -> CompiledQuery {
        compile(q, &Projection::Rows, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn test_root_only_scan() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone()).column(phone.attr("label").unwrap());
        assert_eq!(compile_rows(&q).text(), "MATCH (node_phone:phone:test)\nRETURN node_phone.label AS label");
    }

    #[test]
    fn test_count_ignores_columns() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone())
            .filter(phone.attr("label").unwrap().equals("aa").unwrap())
            .column(phone.attr("following.label").unwrap());
        let c = compile(&q, &Projection::Count, &CompileOptions::default()).unwrap();
        assert_eq!(
            c.text(),
            "MATCH (node_phone:phone:test)\nWHERE node_phone.label = $label_0\nRETURN count(*) AS count"
        );
        assert_eq!(c.statement.params.get("label_0"), Some(&Value::from("aa")));
    }

    #[test]
    fn test_subpath_stage() {
        let word = QueryNode::annotation(hierarchy(), "word").unwrap();
        let q = Query::new(word.clone())
            .filter(word.attr("phone.count").unwrap().greater_than(3).unwrap())
            .column(word.attr("phone.label").unwrap().column_name("phones"));
        assert_eq!(
            compile_rows(&q).text(),
            "MATCH (node_word:word:test)\n\
             OPTIONAL MATCH (node_word_phone_coll_m:phone:test)-[:contained_by]->(node_word)\n\
             WITH node_word, node_word_phone_coll_m\n\
             ORDER BY node_word_phone_coll_m.begin\n\
             WITH node_word, collect(node_word_phone_coll_m) AS node_word_phone_coll\n\
             WHERE size(node_word_phone_coll) > $count_0\n\
             RETURN [x IN node_word_phone_coll | x.label] AS phones"
        );
    }

    #[test]
    fn test_pause_stage_guard() {
        let word = QueryNode::annotation(hierarchy(), "word").unwrap();
        let q = Query::new(word.clone()).column(word.attr("following_pause_duration").unwrap());
        let text = compile_rows(&q).text().to_string();
        assert!(text.contains(
            "OPTIONAL MATCH node_word_fpause_p = (node_word)-[:precedes*1..15]->(node_word_fpause_end:word:speech:test)"
        ));
        assert!(text.contains("WHERE (node_word)-[:precedes_pause]->(node_word_fpause_end) AND ALL(n IN nodes(node_word_fpause_p)[1..-1] WHERE NOT n:speech)"));
        assert!(text.contains(
            "CASE WHEN node_word_fpause_p IS NOT NULL AND size(nodes(node_word_fpause_p)[1..-1]) > 0 \
             THEN nodes(node_word_fpause_p)[1..-1] ELSE [] END AS node_word_fpause"
        ));
    }

    #[test]
    fn test_aggregate_default_order() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone()).group_by(phone.attr("word.label").unwrap());
        let aggs = vec![Aggregate::count(), Aggregate::average(phone.attr("duration").unwrap())];
        let c = compile(&q, &Projection::Aggregate(aggs), &CompileOptions::default()).unwrap();
        assert_eq!(
            c.text(),
            "MATCH (node_phone:phone:test),\n      (node_phone)-[:contained_by]->(node_phone_word:word:test)\n\
             RETURN node_phone_word.label AS word_label, count(*) AS count, \
             avg((node_phone.end - node_phone.begin)) AS average_duration\n\
             ORDER BY word_label"
        );
        assert_eq!(c.columns, vec!["word_label", "count", "average_duration"]);
    }

    #[test]
    fn test_aggregate_with_columns_rejected() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone()).column(phone.attr("label").unwrap());
        let err = compile(&q, &Projection::Aggregate(vec![Aggregate::count()]), &CompileOptions::default());
        assert!(matches!(err, Err(Error::QueryCompositionError(_))));
    }

    #[test]
    fn test_cache_matches_inline_expression() {
        let word = QueryNode::annotation(hierarchy(), "word").unwrap();
        let rate = word.attr("phone.rate").unwrap().column_name("speech_rate");
        let inline = compile_rows(&Query::new(word.clone()).column(rate.clone()));
        let cached = compile(
            &Query::new(word.clone()),
            &Projection::Mutation(Mutation::Cache(vec![rate])),
            &CompileOptions::default(),
        )
        .unwrap();
        let expr = "CASE WHEN node_word.end - node_word.begin > 0 THEN toFloat(size(node_word_phone_coll)) / (node_word.end - node_word.begin) ELSE null END";
        assert!(inline.text().contains(&format!("RETURN {expr} AS speech_rate")));
        assert!(cached.text().contains(&format!("SET node_word.speech_rate = {expr}")));
        assert!(cached.text().ends_with("RETURN count(*) AS affected"));
    }

    #[test]
    fn test_hydration_columns() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone()).preload(phone.node("word").unwrap());
        let c = compile_rows(&q);
        assert!(matches!(&c.shape, RowShape::Annotations(h) if h.preloads.len() == 1));
        assert!(c.text().contains("(node_phone)-[:spoken_by]->(node_phone_Speaker:Speaker:test)"));
        assert!(c.text().contains("properties(node_phone_word) AS container__word"));
        assert!(c.text().contains("(node_phone)-[:is_a]->(node_phone_type:phone_type:test)"));
    }

    #[test]
    fn test_invalid_preload() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone()).preload(phone.node("following.following").unwrap());
        let err = compile(&q, &Projection::Rows, &CompileOptions::default());
        assert!(matches!(err, Err(Error::QueryCompositionError(_))));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let phone = QueryNode::annotation(hierarchy(), "phone").unwrap();
        let q = Query::new(phone.clone())
            .column(phone.attr("label").unwrap())
            .column(phone.attr("word.label").unwrap().column_name("label"));
        assert!(matches!(
            compile(&q, &Projection::Rows, &CompileOptions::default()),
            Err(Error::QueryCompositionError(_))
        ));
    }

    #[test]
    fn test_lexicon_default_columns() {
        let lex = QueryNode::lexicon(hierarchy(), "word").unwrap();
        let c = compile_rows(&Query::new(lex));
        assert_eq!(
            c.text(),
            "MATCH (lex_word:word_type:test)\nRETURN lex_word.frequency AS frequency, lex_word.label AS label"
        );
    }
}
