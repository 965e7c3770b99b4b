// src/optimize.rs
// Post-construction passes: finish (unused-field pruning) and finalize
// (rewrites across the pipeline/UDF boundary)
//
// finish runs top-down with the set of fields the parent consumes;
// finalize runs bottom-up and prepares UDF ops and fold-lefts for
// lowering.

use crate::field::{DocVar, VALUE_LABEL};
use crate::js::{FlatMapFunc, JsExpr, JsStmt, MapFunc, MERGE_REDUCE};
use crate::log_debug;
use crate::reshape::{Reshape, ReshapeValue};
use crate::workflow::Workflow;
use std::sync::Arc;

// ----------------------------------------------------------------------
// finish: delete unused fields
// ----------------------------------------------------------------------

/// Drop projected/grouped fields that nothing downstream reads.
/// Idempotent; the root op itself is never pruned (its whole output is
/// the result).
pub fn finish(op: &Arc<Workflow>) -> Arc<Workflow> {
    delete_unused_fields(op, None)
}

/// `parent_refs`: the fields the consumers above need, or None when
/// unknown (everything must be kept).
fn delete_unused_fields(op: &Arc<Workflow>, parent_refs: Option<&[DocVar]>) -> Arc<Workflow> {
    // prune this op's definitions against what the parent reads
    let pruned: Arc<Workflow> = match (&**op, parent_refs) {
        (Workflow::Project { src, shape }, Some(refs)) => {
            let unused: Vec<DocVar> = shape
                .field_paths()
                .into_iter()
                .filter(|def| !refs.iter().any(|r| r.overlaps(def)))
                .collect();
            if unused.is_empty() {
                op.clone()
            } else {
                let slimmed = shape.remove_paths(&unused);
                if slimmed.is_empty() {
                    // an empty projection is not a stage; leave as built
                    op.clone()
                } else {
                    log_debug!("finish: dropped {} unused projected field(s)", unused.len());
                    Arc::new(Workflow::Project {
                        src: src.clone(),
                        shape: slimmed,
                    })
                }
            }
        }
        (Workflow::Group { src, grouped, by }, Some(refs)) => {
            let keep = |name: &str| {
                let def = DocVar::field(name);
                refs.iter().any(|r| r.overlaps(&def))
            };
            let slimmed: Vec<(String, _)> = grouped
                .0
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, acc)| (name.clone(), acc.clone()))
                .collect();
            if slimmed.len() == grouped.0.len() || slimmed.is_empty() {
                op.clone()
            } else {
                log_debug!(
                    "finish: dropped {} unused grouped field(s)",
                    grouped.0.len() - slimmed.len()
                );
                Arc::new(Workflow::Group {
                    src: src.clone(),
                    grouped: crate::stage::Grouped::new(slimmed),
                    by: by.clone(),
                })
            }
        }
        _ => op.clone(),
    };

    // what the ops below must still provide
    let own_refs = pruned.refs();
    let child_refs: Option<Vec<DocVar>> = match &*pruned {
        // these reset the shape: children only serve their refs
        Workflow::Project { .. } | Workflow::Group { .. } => Some(own_refs),
        // the unwound path alone is not a use
        Workflow::Unwind { .. } => parent_refs.map(|r| r.to_vec()),
        // opaque JS: pruning stops here
        Workflow::Map { .. } | Workflow::FlatMap { .. } | Workflow::Reduce { .. } => None,
        _ => parent_refs.map(|r| {
            let mut refs = r.to_vec();
            refs.extend(own_refs);
            refs
        }),
    };

    match &*pruned {
        Workflow::Pure(_) | Workflow::Read(_) => pruned,
        Workflow::FoldLeft { head, tails } => Arc::new(Workflow::FoldLeft {
            head: delete_unused_fields(head, None),
            tails: tails
                .iter()
                .map(|t| delete_unused_fields(t, None))
                .collect(),
        }),
        Workflow::Join { sources } => Arc::new(Workflow::Join {
            sources: sources
                .iter()
                .map(|s| delete_unused_fields(s, None))
                .collect(),
        }),
        _ => {
            let src = pruned
                .source()
                .cloned()
                .map(|src| delete_unused_fields(&src, child_refs.as_deref()));
            match src {
                Some(new_src) => pruned.reparent(new_src),
                None => pruned,
            }
        }
    }
}

// ----------------------------------------------------------------------
// finalize: pipeline/UDF boundary rewrites
// ----------------------------------------------------------------------

/// Prepare the graph for lowering: fuse projects beneath UDFs into JS
/// transforms, replace unwinds beneath UDFs with their flat-map
/// equivalent, and normalize fold-lefts (head carries `{value: ROOT}`,
/// every tail ends in a reduce).
pub fn finalize(op: &Arc<Workflow>) -> Arc<Workflow> {
    match &**op {
        Workflow::Pure(_) | Workflow::Read(_) => op.clone(),

        Workflow::Map { src, func } => finalize_udf(Arc::new(Workflow::Map {
            src: finalize(src),
            func: func.clone(),
        })),
        Workflow::FlatMap { src, func } => finalize_udf(Arc::new(Workflow::FlatMap {
            src: finalize(src),
            func: func.clone(),
        })),
        Workflow::Reduce { src, func } => finalize_udf(Arc::new(Workflow::Reduce {
            src: finalize(src),
            func: func.clone(),
        })),

        Workflow::FoldLeft { head, tails } => {
            let head = finalize(head);
            let head = if is_value_wrap(&head) {
                head
            } else {
                Workflow::project_unchecked(head, Reshape::nest(VALUE_LABEL, ReshapeValue::root()))
            };
            let tails = tails
                .iter()
                .map(|tail| {
                    let tail = finalize(tail);
                    if matches!(&*tail, Workflow::Reduce { .. }) {
                        tail
                    } else {
                        log_debug!("finalize: appending default merge reduce to fold-left tail");
                        Workflow::reduce(tail, MERGE_REDUCE.clone())
                    }
                })
                .collect();
            Arc::new(Workflow::FoldLeft { head, tails })
        }

        Workflow::Join { sources } => Arc::new(Workflow::Join {
            sources: sources.iter().map(finalize).collect(),
        }),

        _ => {
            let src = op
                .source()
                .cloned()
                .map(|src| finalize(&src));
            match src {
                Some(new_src) => op.reparent(new_src),
                None => op.clone(),
            }
        }
    }
}

/// Pull projects and unwinds beneath a UDF into JS territory until the
/// source offers nothing more. Each step rebuilds the UDF through its
/// smart constructor, which composes the functions.
fn finalize_udf(op: Arc<Workflow>) -> Arc<Workflow> {
    let mut current = op;
    loop {
        let src = match current.source() {
            Some(src) => src.clone(),
            None => return current,
        };
        let below = match udf_input(&src) {
            Some(below) => below,
            None => return current,
        };
        current = match &*current {
            Workflow::Map { func, .. } => Workflow::map(below, func.clone()),
            Workflow::FlatMap { func, .. } => Workflow::flat_map(below, func.clone()),
            Workflow::Reduce { func, .. } => Workflow::reduce(below, func.clone()),
            _ => return current,
        };
    }
}

/// When a UDF's finalized source is a project expressible as a JS
/// transform (or an unwind), rewrite that source into UDF territory and
/// return the op the UDF should now sit on. The smart constructors
/// compose the functions.
fn udf_input(src: &Arc<Workflow>) -> Option<Arc<Workflow>> {
    match &**src {
        Workflow::Project { src: below, shape } => {
            let transform = reshape_to_js(shape)?;
            log_debug!("finalize: fused project into JS transform beneath UDF");
            Some(Workflow::map(
                below.clone(),
                MapFunc::new(vec![JsStmt::Return(JsExpr::AnonArr(vec![
                    JsExpr::ident("key"),
                    transform,
                ]))]),
            ))
        }
        Workflow::Unwind { src: below, field } => {
            log_debug!("finalize: replaced unwind with JS flat-map beneath UDF");
            Some(Workflow::flat_map(
                below.clone(),
                FlatMapFunc::unwind(field),
            ))
        }
        _ => None,
    }
}

/// Does this op already nest its whole output under `value`? True for
/// `project {value: ROOT}` and for projects the wrap was inlined into.
fn is_value_wrap(op: &Arc<Workflow>) -> bool {
    match &**op {
        Workflow::Project { shape, .. } => match shape {
            Reshape::Doc(m) => m.len() == 1 && m.contains_key(VALUE_LABEL),
            Reshape::Arr(_) => false,
        },
        _ => false,
    }
}

/// A reshape as a JS object-building expression over `value`, when
/// every embedded expression translates
fn reshape_to_js(shape: &Reshape) -> Option<JsExpr> {
    let input = JsExpr::ident("value");
    fn value_to_js(v: &ReshapeValue, input: &JsExpr) -> Option<JsExpr> {
        match v {
            ReshapeValue::Expr(e) => e.to_js(input),
            ReshapeValue::Nested(r) => nested_to_js(r, input),
        }
    }
    fn nested_to_js(shape: &Reshape, input: &JsExpr) -> Option<JsExpr> {
        match shape {
            Reshape::Doc(m) => m
                .iter()
                .map(|(k, v)| Some((k.clone(), value_to_js(v, input)?)))
                .collect::<Option<Vec<_>>>()
                .map(JsExpr::AnonObj),
            Reshape::Arr(m) => m
                .values()
                .map(|v| value_to_js(v, input))
                .collect::<Option<Vec<_>>>()
                .map(JsExpr::AnonArr),
        }
    }
    nested_to_js(shape, &input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use crate::js::IDENTITY_MAP;
    use crate::selector::Selector;
    use crate::workflow::Collection;
    use serde_json::json;

    fn read_c() -> Arc<Workflow> {
        Workflow::read(Collection::new("c"))
    }

    /// An outer project that can't inline (one reference undefined
    /// below) keeps the inner project alive, so pruning has a target.
    fn stacked_projects() -> Arc<Workflow> {
        let inner = Workflow::project(
            read_c(),
            Reshape::doc(vec![
                ("used", ReshapeValue::var("a")),
                ("unused", ReshapeValue::var("b")),
            ]),
        )
        .unwrap();
        Workflow::project(
            inner,
            Reshape::doc(vec![
                ("out", ReshapeValue::var("used")),
                ("raw", ReshapeValue::var("missing")),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_finish_prunes_unreferenced_project_field() {
        let outer = stacked_projects();
        // construction kept both projects
        match &*outer {
            Workflow::Project { src, .. } => {
                assert!(matches!(&**src, Workflow::Project { .. }))
            }
            other => panic!("expected stacked projects, got {}", other.op_name()),
        }
        let finished = finish(&outer);
        match &*finished {
            Workflow::Project { src, .. } => match &**src {
                Workflow::Project { shape, .. } => {
                    assert_eq!(shape.field_paths(), vec![DocVar::field("used")]);
                }
                other => panic!("expected project below, got {}", other.op_name()),
            },
            other => panic!("expected project, got {}", other.op_name()),
        }
    }

    #[test]
    fn test_finish_root_not_pruned() {
        let p = Workflow::project(
            read_c(),
            Reshape::doc(vec![("only", ReshapeValue::var("a"))]),
        )
        .unwrap();
        assert_eq!(*finish(&p), *p);
    }

    #[test]
    fn test_finish_idempotent() {
        let outer = Workflow::match_with(stacked_projects(), Selector::new(json!({"out": 1})));
        let once = finish(&outer);
        let twice = finish(&once);
        assert_eq!(*once, *twice);
    }

    #[test]
    fn test_finish_conservative_behind_udf() {
        // the map's JS body is opaque, so nothing below it may be pruned
        // even though the outer project only reads one field
        let inner = Workflow::project(
            read_c(),
            Reshape::doc(vec![
                ("a", ReshapeValue::var("x")),
                ("b", ReshapeValue::var("y")),
            ]),
        )
        .unwrap();
        let mapped = Workflow::map(inner, IDENTITY_MAP.clone());
        let outer = Workflow::project(
            mapped,
            Reshape::doc(vec![("out", ReshapeValue::var("a"))]),
        )
        .unwrap();
        let finished = finish(&outer);
        fn find_inner_project(op: &Arc<Workflow>) -> Option<Arc<Workflow>> {
            match &**op {
                Workflow::Project { src, .. } if matches!(&**src, Workflow::Read(_)) => {
                    Some(op.clone())
                }
                _ => op.source().and_then(find_inner_project),
            }
        }
        let p = find_inner_project(&finished).expect("inner project survives");
        match &*p {
            Workflow::Project { shape, .. } => assert_eq!(shape.field_paths().len(), 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_finalize_wraps_fold_left_head() {
        let fold = Workflow::fold_left(
            read_c(),
            vec![Workflow::reduce(read_c(), MERGE_REDUCE.clone())],
        )
        .unwrap();
        let finalized = finalize(&fold);
        match &*finalized {
            Workflow::FoldLeft { head, .. } => {
                assert!(is_value_wrap(head));
            }
            other => panic!("expected fold-left, got {}", other.op_name()),
        }
        // idempotent
        assert_eq!(*finalize(&finalized), *finalized);
    }

    #[test]
    fn test_finalize_appends_tail_reduce() {
        let fold = Workflow::fold_left(read_c(), vec![read_c()]).unwrap();
        let finalized = finalize(&fold);
        match &*finalized {
            Workflow::FoldLeft { tails, .. } => {
                assert!(matches!(&*tails[0], Workflow::Reduce { .. }));
            }
            other => panic!("expected fold-left, got {}", other.op_name()),
        }
    }

    #[test]
    fn test_finalize_fuses_project_beneath_udf() {
        let projected = Workflow::project(
            read_c(),
            Reshape::doc(vec![("n", ReshapeValue::var("amount"))]),
        )
        .unwrap();
        let mapped = Workflow::map(projected, IDENTITY_MAP.clone());
        let finalized = finalize(&mapped);
        // the project became a JS transform composed into the map
        match &*finalized {
            Workflow::Map { src, func } => {
                assert_eq!(**src, *read_c());
                assert!(func
                    .fn_expr()
                    .to_string()
                    .contains("\"n\": value.amount"));
            }
            other => panic!("expected fused map, got {}", other.op_name()),
        }
    }

    #[test]
    fn test_finalize_leaves_untranslatable_project() {
        let projected = Workflow::project(
            read_c(),
            Reshape::doc(vec![(
                "n",
                ReshapeValue::Expr(Expression::IfNull(
                    Box::new(Expression::Var(DocVar::field("a"))),
                    Box::new(Expression::Literal(json!(0))),
                )),
            )]),
        )
        .unwrap();
        let mapped = Workflow::map(projected.clone(), IDENTITY_MAP.clone());
        let finalized = finalize(&mapped);
        match &*finalized {
            Workflow::Map { src, .. } => assert_eq!(**src, *projected),
            other => panic!("expected map over project, got {}", other.op_name()),
        }
    }

    #[test]
    fn test_finalize_unwind_beneath_udf() {
        let unwound = Workflow::unwind(read_c(), DocVar::field("tags"));
        let mapped = Workflow::map(unwound, IDENTITY_MAP.clone());
        let finalized = finalize(&mapped);
        match &*finalized {
            Workflow::FlatMap { src, .. } => assert_eq!(**src, *read_c()),
            other => panic!("expected flat-map, got {}", other.op_name()),
        }
    }
}
