// src/workflow.rs
// Workflow ops: the plan DAG and its smart constructors
//
// Every node is an immutable value; children are shared through Arc.
// Construction goes through the smart constructors only. Each one
// runs a local peephole (coalesce) against its already-coalesced
// child, so the rules compose without a global fixpoint.

use crate::error::{PlannerError, Result};
use crate::expression::Expression;
use crate::field::{is_reserved_label, DocVar};
use crate::js::{FlatMapFunc, MapFunc, ReduceFunc};
use crate::log_trace;
use crate::reshape::{Reshape, ReshapeValue};
use crate::selector::Selector;
use crate::stage::{GeoNear, GroupBy, Grouped, SortDirection, Stage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::min;
use std::sync::Arc;

/// A collection handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collection(String);

impl Collection {
    pub fn new(name: impl Into<String>) -> Collection {
        Collection(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A workflow op: one node of the plan DAG
#[derive(Debug, Clone, PartialEq)]
pub enum Workflow {
    /// Literal source
    Pure(Value),
    /// Collection source
    Read(Collection),
    Match {
        src: Arc<Workflow>,
        selector: Selector,
    },
    Sort {
        src: Arc<Workflow>,
        keys: Vec<(DocVar, SortDirection)>,
    },
    Limit {
        src: Arc<Workflow>,
        count: i64,
    },
    Skip {
        src: Arc<Workflow>,
        count: i64,
    },
    Project {
        src: Arc<Workflow>,
        shape: Reshape,
    },
    Redact {
        src: Arc<Workflow>,
        expr: Expression,
    },
    Unwind {
        src: Arc<Workflow>,
        field: DocVar,
    },
    Group {
        src: Arc<Workflow>,
        grouped: Grouped,
        by: GroupBy,
    },
    GeoNear {
        src: Arc<Workflow>,
        geo_near: GeoNear,
    },
    Map {
        src: Arc<Workflow>,
        func: MapFunc,
    },
    FlatMap {
        src: Arc<Workflow>,
        func: FlatMapFunc,
    },
    Reduce {
        src: Arc<Workflow>,
        func: ReduceFunc,
    },
    FoldLeft {
        head: Arc<Workflow>,
        tails: Vec<Arc<Workflow>>,
    },
    Join {
        sources: Vec<Arc<Workflow>>,
    },
}

impl Workflow {
    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    pub fn is_source(&self) -> bool {
        matches!(self, Workflow::Pure(_) | Workflow::Read(_))
    }

    /// The single predecessor, for single-source ops
    pub fn source(&self) -> Option<&Arc<Workflow>> {
        match self {
            Workflow::Match { src, .. }
            | Workflow::Sort { src, .. }
            | Workflow::Limit { src, .. }
            | Workflow::Skip { src, .. }
            | Workflow::Project { src, .. }
            | Workflow::Redact { src, .. }
            | Workflow::Unwind { src, .. }
            | Workflow::Group { src, .. }
            | Workflow::GeoNear { src, .. }
            | Workflow::Map { src, .. }
            | Workflow::FlatMap { src, .. }
            | Workflow::Reduce { src, .. } => Some(src),
            Workflow::Pure(_)
            | Workflow::Read(_)
            | Workflow::FoldLeft { .. }
            | Workflow::Join { .. } => None,
        }
    }

    pub fn is_single_source(&self) -> bool {
        self.source().is_some()
    }

    /// Representable as a native pipeline stage
    pub fn is_pipeline_op(&self) -> bool {
        matches!(
            self,
            Workflow::Match { .. }
                | Workflow::Sort { .. }
                | Workflow::Limit { .. }
                | Workflow::Skip { .. }
                | Workflow::Project { .. }
                | Workflow::Redact { .. }
                | Workflow::Unwind { .. }
                | Workflow::Group { .. }
                | Workflow::GeoNear { .. }
        )
    }

    /// Leaves the document shape untouched
    pub fn is_shape_preserving(&self) -> bool {
        matches!(
            self,
            Workflow::Match { .. }
                | Workflow::Sort { .. }
                | Workflow::Limit { .. }
                | Workflow::Skip { .. }
        )
    }

    /// An opaque JS op
    pub fn is_udf(&self) -> bool {
        matches!(
            self,
            Workflow::Map { .. } | Workflow::FlatMap { .. } | Workflow::Reduce { .. }
        )
    }

    /// The pipeline stage for this op. Every pipeline op answers.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Workflow::Match { selector, .. } => Some(Stage::Match(selector.clone())),
            Workflow::Sort { keys, .. } => Some(Stage::Sort(keys.clone())),
            Workflow::Limit { count, .. } => Some(Stage::Limit(*count)),
            Workflow::Skip { count, .. } => Some(Stage::Skip(*count)),
            Workflow::Project { shape, .. } => Some(Stage::Project(shape.clone())),
            Workflow::Redact { expr, .. } => Some(Stage::Redact(expr.clone())),
            Workflow::Unwind { field, .. } => Some(Stage::Unwind(field.clone())),
            Workflow::Group { grouped, by, .. } => {
                Some(Stage::Group(grouped.clone(), by.clone()))
            }
            Workflow::GeoNear { geo_near, .. } => Some(Stage::GeoNear(geo_near.clone())),
            _ => None,
        }
    }

    /// Op name, for diagnostics and rendering
    pub fn op_name(&self) -> &'static str {
        match self {
            Workflow::Pure(_) => "Pure",
            Workflow::Read(_) => "Read",
            Workflow::Match { .. } => "Match",
            Workflow::Sort { .. } => "Sort",
            Workflow::Limit { .. } => "Limit",
            Workflow::Skip { .. } => "Skip",
            Workflow::Project { .. } => "Project",
            Workflow::Redact { .. } => "Redact",
            Workflow::Unwind { .. } => "Unwind",
            Workflow::Group { .. } => "Group",
            Workflow::GeoNear { .. } => "GeoNear",
            Workflow::Map { .. } => "Map",
            Workflow::FlatMap { .. } => "FlatMap",
            Workflow::Reduce { .. } => "Reduce",
            Workflow::FoldLeft { .. } => "FoldLeft",
            Workflow::Join { .. } => "Join",
        }
    }

    /// Swap the single source without re-coalescing. Sources and
    /// multi-source ops are returned unchanged.
    pub fn reparent(&self, new_src: Arc<Workflow>) -> Arc<Workflow> {
        let rebuilt = match self {
            Workflow::Match { selector, .. } => Workflow::Match {
                src: new_src,
                selector: selector.clone(),
            },
            Workflow::Sort { keys, .. } => Workflow::Sort {
                src: new_src,
                keys: keys.clone(),
            },
            Workflow::Limit { count, .. } => Workflow::Limit {
                src: new_src,
                count: *count,
            },
            Workflow::Skip { count, .. } => Workflow::Skip {
                src: new_src,
                count: *count,
            },
            Workflow::Project { shape, .. } => Workflow::Project {
                src: new_src,
                shape: shape.clone(),
            },
            Workflow::Redact { expr, .. } => Workflow::Redact {
                src: new_src,
                expr: expr.clone(),
            },
            Workflow::Unwind { field, .. } => Workflow::Unwind {
                src: new_src,
                field: field.clone(),
            },
            Workflow::Group { grouped, by, .. } => Workflow::Group {
                src: new_src,
                grouped: grouped.clone(),
                by: by.clone(),
            },
            Workflow::GeoNear { geo_near, .. } => Workflow::GeoNear {
                src: new_src,
                geo_near: geo_near.clone(),
            },
            Workflow::Map { func, .. } => Workflow::Map {
                src: new_src,
                func: func.clone(),
            },
            Workflow::FlatMap { func, .. } => Workflow::FlatMap {
                src: new_src,
                func: func.clone(),
            },
            Workflow::Reduce { func, .. } => Workflow::Reduce {
                src: new_src,
                func: func.clone(),
            },
            other => other.clone(),
        };
        Arc::new(rebuilt)
    }

    /// Rewrite the immediate op's references through a substitution.
    /// Child ops are never touched; the node type is preserved.
    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Arc<Workflow> {
        let rebuilt = match self {
            Workflow::Match { src, selector } => Workflow::Match {
                src: src.clone(),
                selector: selector.rewrite_fields(f),
            },
            Workflow::Sort { src, keys } => Workflow::Sort {
                src: src.clone(),
                keys: keys
                    .iter()
                    .map(|(v, dir)| (f(v).unwrap_or_else(|| v.clone()), *dir))
                    .collect(),
            },
            Workflow::Project { src, shape } => Workflow::Project {
                src: src.clone(),
                shape: shape.rewrite_refs(f),
            },
            Workflow::Redact { src, expr } => Workflow::Redact {
                src: src.clone(),
                expr: expr.rewrite_refs(f),
            },
            Workflow::Unwind { src, field } => Workflow::Unwind {
                src: src.clone(),
                field: f(field).unwrap_or_else(|| field.clone()),
            },
            Workflow::Group { src, grouped, by } => Workflow::Group {
                src: src.clone(),
                grouped: grouped.rewrite_refs(f),
                by: by.rewrite_refs(f),
            },
            Workflow::GeoNear { src, geo_near } => Workflow::GeoNear {
                src: src.clone(),
                geo_near: geo_near.rewrite_refs(f),
            },
            // limits, skips, sources, UDFs and multi-source ops carry no
            // document references of their own
            other => other.clone(),
        };
        Arc::new(rebuilt)
    }

    /// The fields the immediate op reads
    pub fn refs(&self) -> Vec<DocVar> {
        self.stage()
            .map(|s| s.referenced_vars())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Smart constructors
    // ------------------------------------------------------------------

    pub fn pure(value: Value) -> Arc<Workflow> {
        Arc::new(Workflow::Pure(value))
    }

    pub fn read(collection: Collection) -> Arc<Workflow> {
        Arc::new(Workflow::Read(collection))
    }

    /// Match. Coalesces: floats above a sort, ANDs into a prior match.
    pub fn match_with(src: Arc<Workflow>, selector: Selector) -> Arc<Workflow> {
        match &*src {
            Workflow::Sort { src: inner, keys } => {
                log_trace!("coalesce: match floated above sort");
                Arc::new(Workflow::Sort {
                    src: Workflow::match_with(inner.clone(), selector),
                    keys: keys.clone(),
                })
            }
            Workflow::Match {
                src: inner,
                selector: first,
            } => Workflow::match_with(inner.clone(), Selector::and(first, &selector)),
            _ => Arc::new(Workflow::Match { src, selector }),
        }
    }

    /// Sort by a non-empty key list
    pub fn sort(src: Arc<Workflow>, keys: Vec<(DocVar, SortDirection)>) -> Result<Arc<Workflow>> {
        if keys.is_empty() {
            return Err(PlannerError::EmptySort);
        }
        Ok(Arc::new(Workflow::Sort { src, keys }))
    }

    /// Limit. Coalesces: min with a prior limit, re-associates over skip.
    pub fn limit(src: Arc<Workflow>, count: i64) -> Arc<Workflow> {
        match &*src {
            Workflow::Limit {
                src: inner,
                count: prior,
            } => Arc::new(Workflow::Limit {
                src: inner.clone(),
                count: min(count, *prior),
            }),
            Workflow::Skip {
                src: inner,
                count: skipped,
            } => {
                // limit(n) . skip(m) == skip(m) . limit(n + m)
                let skipped = *skipped;
                Workflow::skip(Workflow::limit(inner.clone(), count + skipped), skipped)
            }
            _ => Arc::new(Workflow::Limit { src, count }),
        }
    }

    /// Skip. Coalesces: adds into a prior skip.
    pub fn skip(src: Arc<Workflow>, count: i64) -> Arc<Workflow> {
        match &*src {
            Workflow::Skip {
                src: inner,
                count: prior,
            } => Arc::new(Workflow::Skip {
                src: inner.clone(),
                count: count + prior,
            }),
            _ => Arc::new(Workflow::Skip { src, count }),
        }
    }

    /// Project. Rejects reserved top-level labels in user shapes.
    pub fn project(src: Arc<Workflow>, shape: Reshape) -> Result<Arc<Workflow>> {
        for key in shape.doc_keys() {
            if is_reserved_label(key) {
                return Err(PlannerError::ReservedLabel(key.to_string()));
            }
        }
        Ok(Workflow::project_unchecked(src, shape))
    }

    /// Project without the reserved-label check; the merge algorithm
    /// builds its namespace projections through this. Coalesces:
    /// inlines through a prior project, fuses renames into a prior
    /// group (directly or through an unwind).
    pub(crate) fn project_unchecked(src: Arc<Workflow>, shape: Reshape) -> Arc<Workflow> {
        match &*src {
            Workflow::Project {
                src: inner_src,
                shape: inner_shape,
            } => match inline_reshape(&shape, inner_shape) {
                Some(inlined) => {
                    log_trace!("coalesce: project inlined through project");
                    Workflow::project_unchecked(inner_src.clone(), inlined)
                }
                None => Arc::new(Workflow::Project { src, shape }),
            },
            Workflow::Group {
                src: group_src,
                grouped,
                by,
            } => match rename_grouped(&shape, grouped) {
                Some(renamed) => {
                    log_trace!("coalesce: project fused into group");
                    Workflow::group_unchecked(group_src.clone(), renamed, by.clone())
                }
                None => Arc::new(Workflow::Project { src, shape }),
            },
            Workflow::Unwind {
                src: unwound_src,
                field,
            } => match &**unwound_src {
                Workflow::Group {
                    src: group_src,
                    grouped,
                    by,
                } => {
                    // three-way fusion: the unwound path is renamed through
                    // the projection along with the grouped fields
                    match rename_grouped(&shape, grouped) {
                        Some(renamed) => {
                            match renamed_path_of(&shape, field) {
                                Some(new_field) => {
                                    log_trace!("coalesce: project fused into unwound group");
                                    let group = Workflow::group_unchecked(
                                        group_src.clone(),
                                        renamed,
                                        by.clone(),
                                    );
                                    Workflow::unwind(group, new_field)
                                }
                                None => Arc::new(Workflow::Project { src, shape }),
                            }
                        }
                        None => Arc::new(Workflow::Project { src, shape }),
                    }
                }
                _ => Arc::new(Workflow::Project { src, shape }),
            },
            _ => Arc::new(Workflow::Project { src, shape }),
        }
    }

    pub fn redact(src: Arc<Workflow>, expr: Expression) -> Arc<Workflow> {
        Arc::new(Workflow::Redact { src, expr })
    }

    pub fn unwind(src: Arc<Workflow>, field: DocVar) -> Arc<Workflow> {
        Arc::new(Workflow::Unwind { src, field })
    }

    /// Group. Rejects reserved output names in user groupings.
    pub fn group(src: Arc<Workflow>, grouped: Grouped, by: GroupBy) -> Result<Arc<Workflow>> {
        for key in grouped.keys() {
            if is_reserved_label(key) {
                return Err(PlannerError::ReservedLabel(key.to_string()));
            }
        }
        Ok(Workflow::group_unchecked(src, grouped, by))
    }

    /// Group without the reserved-label check. Coalesces: folds a prior
    /// project's definitions back into the group's expressions when
    /// every reference resolves.
    pub(crate) fn group_unchecked(
        src: Arc<Workflow>,
        grouped: Grouped,
        by: GroupBy,
    ) -> Arc<Workflow> {
        if let Workflow::Project {
            src: inner_src,
            shape,
        } = &*src
        {
            let folded: Option<Grouped> = grouped
                .0
                .iter()
                .map(|(name, acc)| {
                    let expr = substitute(acc.expression(), shape)?;
                    Some((name.clone(), acc.map_expression(|_| expr)))
                })
                .collect::<Option<_>>()
                .map(Grouped);
            let folded_by = match &by {
                GroupBy::Expr(e) => substitute(e, shape).map(GroupBy::Expr),
                GroupBy::Shape(r) => inline_reshape(r, shape).map(GroupBy::Shape),
            };
            if let (Some(grouped2), Some(by2)) = (folded, folded_by) {
                log_trace!("coalesce: group folded through project");
                return Workflow::group_unchecked(inner_src.clone(), grouped2, by2);
            }
        }
        Arc::new(Workflow::Group { src, grouped, by })
    }

    /// GeoNear. Hoists itself beneath any pipeline ops so it sits
    /// directly on the source; a second geo-near in the same chain is
    /// a construction error.
    pub fn geo_near(src: Arc<Workflow>, geo_near: GeoNear) -> Result<Arc<Workflow>> {
        let mut cursor = Some(&src);
        while let Some(op) = cursor {
            if matches!(&**op, Workflow::GeoNear { .. }) {
                return Err(PlannerError::DuplicateGeoNear);
            }
            cursor = op.source();
        }
        if src.is_pipeline_op() {
            if let Some(inner) = src.source().cloned() {
                let hoisted = Workflow::geo_near(inner, geo_near)?;
                log_trace!("coalesce: geo-near hoisted beneath pipeline op");
                return Ok(src.reparent(hoisted));
            }
        }
        Ok(Arc::new(Workflow::GeoNear { src, geo_near }))
    }

    /// Map. Coalesces with a prior map/flat-map by function composition.
    pub fn map(src: Arc<Workflow>, func: MapFunc) -> Arc<Workflow> {
        match &*src {
            Workflow::Map {
                src: inner,
                func: first,
            } => Arc::new(Workflow::Map {
                src: inner.clone(),
                func: MapFunc::compose(&func, first),
            }),
            Workflow::FlatMap {
                src: inner,
                func: first,
            } => Arc::new(Workflow::FlatMap {
                src: inner.clone(),
                func: FlatMapFunc::map_over_flat_map(&func, first),
            }),
            _ => Arc::new(Workflow::Map { src, func }),
        }
    }

    /// FlatMap. Coalesces with a prior map/flat-map.
    pub fn flat_map(src: Arc<Workflow>, func: FlatMapFunc) -> Arc<Workflow> {
        match &*src {
            Workflow::Map {
                src: inner,
                func: first,
            } => Arc::new(Workflow::FlatMap {
                src: inner.clone(),
                func: FlatMapFunc::compose_over_map(&func, first),
            }),
            Workflow::FlatMap {
                src: inner,
                func: first,
            } => Arc::new(Workflow::FlatMap {
                src: inner.clone(),
                func: FlatMapFunc::compose(&func, first),
            }),
            _ => Arc::new(Workflow::FlatMap { src, func }),
        }
    }

    pub fn reduce(src: Arc<Workflow>, func: ReduceFunc) -> Arc<Workflow> {
        Arc::new(Workflow::Reduce { src, func })
    }

    /// FoldLeft over a head and a non-empty list of tails. A fold-left
    /// head flattens into the outer fold.
    pub fn fold_left(head: Arc<Workflow>, tails: Vec<Arc<Workflow>>) -> Result<Arc<Workflow>> {
        if tails.is_empty() {
            return Err(PlannerError::EmptyFoldLeft);
        }
        match &*head {
            Workflow::FoldLeft {
                head: inner_head,
                tails: inner_tails,
            } => {
                let mut all = inner_tails.clone();
                all.extend(tails);
                Ok(Arc::new(Workflow::FoldLeft {
                    head: inner_head.clone(),
                    tails: all,
                }))
            }
            _ => Ok(Arc::new(Workflow::FoldLeft { head, tails })),
        }
    }

    /// Join over a set of sources. Duplicates collapse and the set is
    /// order-normalized so structurally equal joins compare equal.
    pub fn join(sources: Vec<Arc<Workflow>>) -> Arc<Workflow> {
        let mut unique: Vec<Arc<Workflow>> = Vec::new();
        for s in sources {
            if !unique.iter().any(|u| **u == *s) {
                unique.push(s);
            }
        }
        unique.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
        Arc::new(Workflow::Join { sources: unique })
    }
}

// ----------------------------------------------------------------------
// Coalescing helpers
// ----------------------------------------------------------------------

/// Substitute every variable in `e` with its definition in `shape`.
/// Fails when any variable doesn't resolve to a plain expression.
fn substitute(e: &Expression, shape: &Reshape) -> Option<Expression> {
    let mut ok = true;
    let result = e.map_up(&mut |node| match node {
        Expression::Var(v) => match shape.lookup(&v) {
            Some(ReshapeValue::Expr(def)) => def,
            _ => {
                ok = false;
                Expression::Var(v)
            }
        },
        other => other,
    });
    if ok {
        Some(result)
    } else {
        None
    }
}

/// Push an outer reshape through an inner one. Every outer reference
/// must resolve to an inner definition; a leaf that is a bare variable
/// may absorb a whole nested shape.
fn inline_reshape(outer: &Reshape, inner: &Reshape) -> Option<Reshape> {
    fn inline_value(v: &ReshapeValue, inner: &Reshape) -> Option<ReshapeValue> {
        match v {
            ReshapeValue::Nested(r) => inline_reshape(r, inner).map(ReshapeValue::Nested),
            ReshapeValue::Expr(Expression::Var(var)) => inner.lookup(var),
            ReshapeValue::Expr(e) => substitute(e, inner).map(ReshapeValue::Expr),
        }
    }
    match outer {
        Reshape::Doc(m) => m
            .iter()
            .map(|(k, v)| Some((k.clone(), inline_value(v, inner)?)))
            .collect::<Option<_>>()
            .map(Reshape::Doc),
        Reshape::Arr(m) => m
            .iter()
            .map(|(k, v)| Some((*k, inline_value(v, inner)?)))
            .collect::<Option<_>>()
            .map(Reshape::Arr),
    }
}

/// Project-over-group fusion: succeeds when the outer shape is a flat
/// document of pure renames, where each field either passes `_id`
/// through under its own name or renames one of the group's outputs.
/// Returns the grouped map rekeyed in the projection's order.
fn rename_grouped(outer: &Reshape, grouped: &Grouped) -> Option<Grouped> {
    let fields = match outer {
        Reshape::Doc(m) => m,
        Reshape::Arr(_) => return None,
    };
    let mut renamed = Grouped::default();
    for (name, value) in fields {
        let var = match value {
            ReshapeValue::Expr(Expression::Var(v)) => v,
            _ => return None,
        };
        let elems = var.elems();
        if elems.len() != 1 {
            return None;
        }
        let source_name = match &elems[0] {
            crate::field::PathElem::Field(n) => n.as_str(),
            crate::field::PathElem::Index(_) => return None,
        };
        if source_name == "_id" {
            // the group key keeps its fixed slot; only an identity
            // passthrough can fuse
            if name != "_id" {
                return None;
            }
            continue;
        }
        match grouped.0.get(source_name) {
            Some(acc) => {
                renamed.0.insert(name.clone(), acc.clone());
            }
            None => return None,
        }
    }
    if renamed.0.is_empty() {
        return None;
    }
    Some(renamed)
}

/// For the three-way project/unwind/group fusion: the outer name that
/// renames the unwound grouped field.
fn renamed_path_of(outer: &Reshape, field: &DocVar) -> Option<DocVar> {
    let fields = match outer {
        Reshape::Doc(m) => m,
        Reshape::Arr(_) => return None,
    };
    for (name, value) in fields {
        if let ReshapeValue::Expr(Expression::Var(v)) = value {
            if v == field {
                return Some(DocVar::field(name.clone()));
            }
        }
    }
    None
}
