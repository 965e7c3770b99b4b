// src/merge.rs
// Binary merging of two workflow graphs
//
// merge(a, b) produces one graph that carries both plans over their
// shared source, plus the two document-relative bases locating each
// plan's output inside the merged documents. Divergent branches are
// namespaced under the reserved labels lEft / rIght. The dispatch is
// ordered; `delegate` recurses with swapped arguments and swaps the
// returned bases.

use crate::error::Result;
use crate::expression::{Accumulator, Expression};
use crate::field::{DocVar, LEFT_LABEL, RIGHT_LABEL};
use crate::log_debug;
use crate::reshape::{Reshape, ReshapeValue};
use crate::stage::Grouped;
use crate::workflow::Workflow;
use serde_json::json;
use std::sync::Arc;

/// The result of merging two plans: the combined op and where each
/// input plan's output lives inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub left_base: DocVar,
    pub right_base: DocVar,
    pub op: Arc<Workflow>,
}

impl Merged {
    fn new(left_base: DocVar, right_base: DocVar, op: Arc<Workflow>) -> Merged {
        Merged {
            left_base,
            right_base,
            op,
        }
    }

    fn swapped(self) -> Merged {
        Merged {
            left_base: self.right_base,
            right_base: self.left_base,
            op: self.op,
        }
    }
}

/// Deterministic fresh-name source, one per top-level merge
struct NameGen {
    counter: usize,
}

impl NameGen {
    fn new() -> NameGen {
        NameGen { counter: 0 }
    }

    fn fresh(&mut self) -> String {
        let name = format!("__tmp{}", self.counter);
        self.counter += 1;
        name
    }

    /// Fresh name avoiding keys already bound in `grouped` (a plan that
    /// went through an earlier merge may carry temp names of its own)
    fn fresh_for(&mut self, grouped: &Grouped) -> String {
        let mut name = self.fresh();
        while grouped.0.contains_key(&name) {
            name = self.fresh();
        }
        name
    }
}

fn left_var() -> DocVar {
    DocVar::field(LEFT_LABEL)
}

fn right_var() -> DocVar {
    DocVar::field(RIGHT_LABEL)
}

/// Rebase an op's own references under `base`; the new base is ROOT
/// when the op resets the document shape (group, project).
fn rewrite(op: &Arc<Workflow>, base: &DocVar) -> (Arc<Workflow>, DocVar) {
    let rewritten = if base.is_root() {
        op.clone()
    } else {
        op.rewrite_refs(&|v| Some(base.concat(v)))
    };
    let new_base = match &**op {
        Workflow::Group { .. } | Workflow::Project { .. } => DocVar::root(),
        _ => base.clone(),
    };
    (rewritten, new_base)
}

fn prefix_fn(base: &DocVar) -> impl Fn(&DocVar) -> Option<DocVar> + '_ {
    move |v: &DocVar| Some(base.concat(v))
}

/// `{lEft: ..., rIght: ...}`
fn branch_shape(left: ReshapeValue, right: ReshapeValue) -> Reshape {
    Reshape::doc(vec![(LEFT_LABEL, left), (RIGHT_LABEL, right)])
}

/// Merge two workflow graphs into one
pub fn merge(a: &Arc<Workflow>, b: &Arc<Workflow>) -> Result<Merged> {
    let mut gen = NameGen::new();
    merge_rec(&mut gen, a, b)
}

fn merge_rec(gen: &mut NameGen, a: &Arc<Workflow>, b: &Arc<Workflow>) -> Result<Merged> {
    // identical plans share everything
    if a == b {
        return Ok(Merged::new(DocVar::root(), DocVar::root(), a.clone()));
    }

    macro_rules! delegate {
        () => {
            return merge_rec(gen, b, a).map(Merged::swapped)
        };
    }

    match (&**a, &**b) {
        // Pure vs Pure: wrap both literals
        (Workflow::Pure(x), Workflow::Pure(y)) => Ok(Merged::new(
            left_var(),
            right_var(),
            Workflow::pure(json!({ LEFT_LABEL: x, RIGHT_LABEL: y })),
        )),

        // Pure vs any: inject the literal alongside the other branch
        (Workflow::Pure(x), _) => {
            let op = Workflow::project_unchecked(
                b.clone(),
                branch_shape(
                    ReshapeValue::Expr(Expression::Literal(x.clone())),
                    ReshapeValue::root(),
                ),
            );
            Ok(Merged::new(left_var(), right_var(), op))
        }
        (_, Workflow::Pure(_)) => delegate!(),

        // two distinct geo-nears cannot share one chain; keep the
        // branches disjoint
        (Workflow::GeoNear { .. }, Workflow::GeoNear { .. }) => fallback_fold_left(a, b),

        // GeoNear vs pipeline: recurse into the pipeline's source so the
        // geo-near stays at the bottom of the chain
        (Workflow::GeoNear { .. }, _) if b.is_pipeline_op() => {
            let bsrc = match b.source() {
                Some(src) => src.clone(),
                None => return fallback_fold_left(a, b),
            };
            let m = merge_rec(gen, a, &bsrc)?;
            let (b2, rb) = rewrite(b, &m.right_base);
            Ok(Merged::new(m.left_base, rb, b2.reparent(m.op)))
        }
        (_, Workflow::GeoNear { .. }) if a.is_pipeline_op() => delegate!(),

        // Project whose source is the other plan: one synthetic project
        (Workflow::Project { src, shape }, _) if **src == **b => {
            let op = Workflow::project_unchecked(
                src.clone(),
                branch_shape(ReshapeValue::Nested(shape.clone()), ReshapeValue::root()),
            );
            Ok(Merged::new(left_var(), right_var(), op))
        }
        (_, Workflow::Project { src, .. }) if **src == **a => delegate!(),

        // ShapePreserving vs pipeline: recurse beneath the
        // shape-preserving op and reparent it on top
        (_, _) if a.is_shape_preserving() && b.is_pipeline_op() => {
            let asrc = match a.source() {
                Some(src) => src.clone(),
                None => return fallback_fold_left(a, b),
            };
            let m = merge_rec(gen, &asrc, b)?;
            let (a2, lb) = rewrite(a, &m.left_base);
            Ok(Merged::new(lb, m.right_base, a2.reparent(m.op)))
        }
        (_, _) if b.is_shape_preserving() && a.is_pipeline_op() => delegate!(),

        // Project vs source
        (Workflow::Project { src, shape }, _) if b.is_source() => {
            let m = merge_rec(gen, src, b)?;
            let shape2 = shape.rewrite_refs(&prefix_fn(&m.left_base));
            let op = Workflow::project_unchecked(
                m.op,
                branch_shape(
                    ReshapeValue::Nested(shape2),
                    ReshapeValue::Expr(Expression::Var(m.right_base)),
                ),
            );
            Ok(Merged::new(left_var(), right_var(), op))
        }
        (_, Workflow::Project { .. }) if a.is_source() => delegate!(),

        // Unwind vs group: merge beneath the unwind, rewrite its path
        (Workflow::Unwind { src, field }, Workflow::Group { .. }) => {
            let m = merge_rec(gen, src, b)?;
            let op = Workflow::unwind(m.op, m.left_base.concat(field));
            Ok(Merged::new(m.left_base, m.right_base, op))
        }
        (Workflow::Group { .. }, Workflow::Unwind { .. }) => delegate!(),

        // Group vs group: with one grouping key, fuse into a single
        // group over fresh names and relabel under lEft/rIght
        (
            Workflow::Group {
                src: asrc,
                grouped: ag,
                by: aby,
            },
            Workflow::Group {
                src: bsrc,
                grouped: bg,
                by: bby,
            },
        ) => {
            let m = merge_rec(gen, asrc, bsrc)?;
            let ag2 = ag.rewrite_refs(&prefix_fn(&m.left_base));
            let aby2 = aby.rewrite_refs(&prefix_fn(&m.left_base));
            let bg2 = bg.rewrite_refs(&prefix_fn(&m.right_base));
            let bby2 = bby.rewrite_refs(&prefix_fn(&m.right_base));
            if aby2 == bby2 {
                let mut combined = Grouped::default();
                let mut left_fields = Vec::new();
                let mut right_fields = Vec::new();
                for (name, acc) in &ag2.0 {
                    let tmp = gen.fresh_for(&combined);
                    combined.0.insert(tmp.clone(), acc.clone());
                    left_fields.push((name.clone(), ReshapeValue::var(&tmp)));
                }
                for (name, acc) in &bg2.0 {
                    let tmp = gen.fresh_for(&combined);
                    combined.0.insert(tmp.clone(), acc.clone());
                    right_fields.push((name.clone(), ReshapeValue::var(&tmp)));
                }
                let group = Workflow::group_unchecked(m.op, combined, aby2);
                let op = Workflow::project_unchecked(
                    group,
                    branch_shape(
                        ReshapeValue::Nested(Reshape::doc(left_fields)),
                        ReshapeValue::Nested(Reshape::doc(right_fields)),
                    ),
                );
                Ok(Merged::new(left_var(), right_var(), op))
            } else {
                // different keys: materialize the right group through the
                // left one like any other pipeline
                group_vs_pipeline(gen, a, b)
            }
        }

        // Group vs pipeline: push the pipeline branch through the group
        // as a fresh $push, then unwind it back out
        (Workflow::Group { .. }, _) if b.is_pipeline_op() => group_vs_pipeline(gen, a, b),
        (_, Workflow::Group { .. }) if a.is_pipeline_op() => delegate!(),

        // Project vs project: try a reshape merge, namespace on conflict
        (
            Workflow::Project {
                src: asrc,
                shape: ashape,
            },
            Workflow::Project {
                src: bsrc,
                shape: bshape,
            },
        ) => {
            let m = merge_rec(gen, asrc, bsrc)?;
            let s1 = ashape.rewrite_refs(&prefix_fn(&m.left_base));
            let s2 = bshape.rewrite_refs(&prefix_fn(&m.right_base));
            match s1.merge(&s2) {
                Some(shape) => {
                    let op = Workflow::project_unchecked(m.op, shape);
                    Ok(Merged::new(DocVar::root(), DocVar::root(), op))
                }
                None => {
                    log_debug!("merge: project reshapes conflict, namespacing under lEft/rIght");
                    let op = Workflow::project_unchecked(
                        m.op,
                        branch_shape(ReshapeValue::Nested(s1), ReshapeValue::Nested(s2)),
                    );
                    Ok(Merged::new(left_var(), right_var(), op))
                }
            }
        }

        // Project vs pipeline
        (Workflow::Project { src, shape }, _) if b.is_pipeline_op() => {
            let m = merge_rec(gen, src, b)?;
            let shape2 = shape.rewrite_refs(&prefix_fn(&m.left_base));
            let op = Workflow::project_unchecked(
                m.op,
                branch_shape(
                    ReshapeValue::Nested(shape2),
                    ReshapeValue::Expr(Expression::Var(m.right_base)),
                ),
            );
            Ok(Merged::new(left_var(), right_var(), op))
        }
        (_, Workflow::Project { .. }) if a.is_pipeline_op() => delegate!(),

        // Redact vs redact: sequence both
        (
            Workflow::Redact {
                src: asrc,
                expr: ae,
            },
            Workflow::Redact {
                src: bsrc,
                expr: be,
            },
        ) => {
            let m = merge_rec(gen, asrc, bsrc)?;
            let e1 = ae.rewrite_refs(&prefix_fn(&m.left_base));
            let e2 = be.rewrite_refs(&prefix_fn(&m.right_base));
            let op = Workflow::redact(Workflow::redact(m.op, e1), e2);
            Ok(Merged::new(m.left_base, m.right_base, op))
        }

        // Unwind vs unwind: one unwind when the paths coincide
        (
            Workflow::Unwind {
                src: asrc,
                field: af,
            },
            Workflow::Unwind {
                src: bsrc,
                field: bf,
            },
        ) => {
            let m = merge_rec(gen, asrc, bsrc)?;
            let f1 = m.left_base.concat(af);
            let f2 = m.right_base.concat(bf);
            let op = if f1 == f2 {
                Workflow::unwind(m.op, f1)
            } else {
                Workflow::unwind(Workflow::unwind(m.op, f1), f2)
            };
            Ok(Merged::new(m.left_base, m.right_base, op))
        }

        // Unwind vs redact: merge beneath the unwind
        (Workflow::Unwind { src, field }, Workflow::Redact { .. }) => {
            let m = merge_rec(gen, src, b)?;
            let op = Workflow::unwind(m.op, m.left_base.concat(field));
            Ok(Merged::new(m.left_base, m.right_base, op))
        }
        (Workflow::Redact { .. }, Workflow::Unwind { .. }) => delegate!(),

        // Map vs project: keep the map's output whole under lEft
        (Workflow::Map { .. }, Workflow::Project { src, shape }) => {
            let m = merge_rec(gen, a, src)?;
            let shape2 = shape.rewrite_refs(&prefix_fn(&m.right_base));
            let op = Workflow::project_unchecked(
                m.op,
                branch_shape(
                    ReshapeValue::Expr(Expression::Var(m.left_base)),
                    ReshapeValue::Nested(shape2),
                ),
            );
            Ok(Merged::new(left_var(), right_var(), op))
        }
        (Workflow::Project { .. }, Workflow::Map { .. }) => delegate!(),

        // default: anything vs a pipeline op recurses into its source
        (_, _) if b.is_pipeline_op() => {
            let bsrc = match b.source() {
                Some(src) => src.clone(),
                None => return fallback_fold_left(a, b),
            };
            let m = merge_rec(gen, a, &bsrc)?;
            let (b2, rb) = rewrite(b, &m.right_base);
            Ok(Merged::new(m.left_base, rb, b2.reparent(m.op)))
        }
        (_, _) if a.is_pipeline_op() => delegate!(),

        // disjoint branches fold together
        _ => fallback_fold_left(a, b),
    }
}

/// Materialize a pipeline branch through a group: the group gains a
/// fresh $push of the pipeline's documents, which is unwound right
/// after the group.
fn group_vs_pipeline(gen: &mut NameGen, a: &Arc<Workflow>, b: &Arc<Workflow>) -> Result<Merged> {
    let (asrc, grouped, by) = match &**a {
        Workflow::Group { src, grouped, by } => (src, grouped, by),
        _ => return fallback_fold_left(a, b),
    };
    let m = merge_rec(gen, asrc, b)?;
    let grouped2 = grouped.rewrite_refs(&prefix_fn(&m.left_base));
    let by2 = by.rewrite_refs(&prefix_fn(&m.left_base));
    let pushed = gen.fresh_for(&grouped2);
    let mut combined = grouped2;
    combined.0.insert(
        pushed.clone(),
        Accumulator::Push(Expression::Var(m.right_base)),
    );
    let op = Workflow::unwind(
        Workflow::group_unchecked(m.op, combined, by2),
        DocVar::field(pushed.clone()),
    );
    Ok(Merged::new(DocVar::root(), DocVar::field(pushed), op))
}

/// The last resort: two disjoint branches fold into one accumulator,
/// each namespaced under its own label. This is also the shape the
/// UDF-boundary cases (e.g. a read against a map) lower to.
fn fallback_fold_left(a: &Arc<Workflow>, b: &Arc<Workflow>) -> Result<Merged> {
    log_debug!(
        "merge: no pipeline merge for {} vs {}, folding branches",
        a.op_name(),
        b.op_name()
    );
    let left = Workflow::project_unchecked(
        a.clone(),
        Reshape::nest(LEFT_LABEL, ReshapeValue::root()),
    );
    let right = Workflow::project_unchecked(
        b.clone(),
        Reshape::nest(RIGHT_LABEL, ReshapeValue::root()),
    );
    let op = Workflow::fold_left(left, vec![right])?;
    Ok(Merged::new(left_var(), right_var(), op))
}
