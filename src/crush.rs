// src/crush.rs
// Lowering: op graph -> task tree
//
// Each node produces (base, task): the task that computes it and the
// document-relative path where its logical output lives. Pipelines
// extend as long as the chain stays native; a JS escape anywhere
// drops the chain into a map-reduce job. Crush is strictly one-way:
// tasks never refer back to ops.

use crate::error::{PlannerError, Result};
use crate::field::{DocVar, VALUE_LABEL};
use crate::js::{FlatMapFunc, JsExpr, JsStmt, MapFunc, IDENTITY_MAP, IDENTITY_REDUCE};
use crate::log_debug;
use crate::optimize::{finalize, finish};
use crate::selector::Selector;
use crate::stage::SortDirection;
use crate::task::{MapReduce, OutAction, Task};
use crate::workflow::Workflow;
use std::sync::Arc;

/// The lowering entry point: prune, finalize, crush.
pub fn workflow_task(op: &Arc<Workflow>) -> Result<Task> {
    let finished = finish(op);
    let finalized = finalize(&finished);
    crush(&finalized).map(|(_, task)| task)
}

fn value_var() -> DocVar {
    DocVar::field(VALUE_LABEL)
}

/// Compose an extraction of `base` in front of a mapper, so the
/// function sees the documents it was written against.
fn rebase_map(func: &MapFunc, base: &DocVar) -> MapFunc {
    if base.is_root() {
        return func.clone();
    }
    let extract = MapFunc::new(vec![JsStmt::Return(JsExpr::AnonArr(vec![
        JsExpr::ident("key"),
        JsExpr::select_path(JsExpr::ident("value"), base),
    ]))]);
    MapFunc::compose(func, &extract)
}

fn rebase_flat_map(func: &FlatMapFunc, base: &DocVar) -> FlatMapFunc {
    if base.is_root() {
        return func.clone();
    }
    let extract = MapFunc::new(vec![JsStmt::Return(JsExpr::AnonArr(vec![
        JsExpr::ident("key"),
        JsExpr::select_path(JsExpr::ident("value"), base),
    ]))]);
    FlatMapFunc::compose_over_map(func, &extract)
}

/// A chain of at most one limit over one sort over one pipelinable
/// match, directly over a source: these absorb into a map-reduce
/// job's query/sort/limit instead of running as a pipeline.
type SmallPrefix = (
    Arc<Workflow>,
    Option<Selector>,
    Option<Vec<(DocVar, SortDirection)>>,
    Option<i64>,
);

fn small_prefix(op: &Arc<Workflow>) -> Option<SmallPrefix> {
    let mut cur = op.clone();
    let mut limit = None;
    let mut sort = None;
    let mut selection = None;
    if let Workflow::Limit { src, count } = &*cur {
        limit = Some(*count);
        cur = src.clone();
    }
    if let Workflow::Sort { src, keys } = &*cur {
        sort = Some(keys.clone());
        cur = src.clone();
    }
    if let Workflow::Match { src, selector } = &*cur {
        if !selector.is_pipelinable() {
            return None;
        }
        selection = Some(selector.clone());
        cur = src.clone();
    }
    let absorbed_any = limit.is_some() || sort.is_some() || selection.is_some();
    if cur.is_source() && absorbed_any {
        Some((cur, selection, sort, limit))
    } else {
        None
    }
}

fn prefix_fn(base: &DocVar) -> impl Fn(&DocVar) -> Option<DocVar> + '_ {
    move |v: &DocVar| Some(base.concat(v))
}

/// Lower one op to (base, task)
pub fn crush(op: &Arc<Workflow>) -> Result<(DocVar, Task)> {
    match &**op {
        Workflow::Pure(v) => Ok((DocVar::root(), Task::Pure(v.clone()))),
        Workflow::Read(c) => Ok((DocVar::root(), Task::Read(c.clone()))),

        // a JS selector can't run as a $match stage; filter in a mapper
        Workflow::Match { src, selector } if !selector.is_pipelinable() => {
            let (base, source) = crush(src)?;
            let selector = if base.is_root() {
                selector.clone()
            } else {
                selector.rewrite_fields(&prefix_fn(&base))
            };
            log_debug!("crush: selector contains $where, lowering match to map-reduce");
            let predicate = selector.to_js_predicate(&JsExpr::ident("value"));
            let map = JsExpr::AnonFun(
                vec!["key".to_string(), "value".to_string()],
                vec![JsStmt::If(
                    predicate,
                    vec![JsStmt::Expr(JsExpr::call(
                        JsExpr::ident("emit"),
                        vec![JsExpr::ident("key"), JsExpr::ident("value")],
                    ))],
                    None,
                )],
            );
            let map_reduce = MapReduce::new(map, IDENTITY_REDUCE.clone());
            Ok((
                value_var().concat(&base),
                Task::MapReduce {
                    source: Box::new(source),
                    map_reduce,
                },
            ))
        }

        _ if op.is_pipeline_op() => {
            let src = match op.source() {
                Some(src) => src,
                None => unreachable!("pipeline ops are single-source"),
            };
            let (base, src_task) = crush(src)?;
            let stage = match op.stage() {
                Some(stage) => stage,
                None => unreachable!("pipeline ops answer stage()"),
            };
            let stage = if base.is_root() {
                stage
            } else {
                stage.rewrite_refs(&prefix_fn(&base))
            };
            let new_base = match &**op {
                Workflow::Group { .. } | Workflow::Project { .. } => DocVar::root(),
                _ => base,
            };
            let task = match src_task {
                Task::Pipeline { source, mut stages } => {
                    stages.push(stage);
                    Task::Pipeline { source, stages }
                }
                other => Task::Pipeline {
                    source: Box::new(other),
                    stages: vec![stage],
                },
            };
            Ok((new_base, task))
        }

        Workflow::Map { src, func } => {
            let (base, src_task) = crush(src)?;
            match src_task {
                // a finished map-reduce grows a finalizer
                Task::MapReduce { source, map_reduce } if map_reduce.finalizer.is_none() => {
                    let mut map_reduce = map_reduce;
                    map_reduce.finalizer = Some(func.to_finalize_fn());
                    Ok((
                        value_var(),
                        Task::MapReduce { source, map_reduce },
                    ))
                }
                src_task => {
                    let func = rebase_map(func, &base);
                    let (source, map_reduce) = fresh_map_reduce(
                        src,
                        src_task,
                        func.to_emit_fn(),
                        IDENTITY_REDUCE.clone(),
                    )?;
                    Ok((
                        value_var(),
                        Task::MapReduce {
                            source: Box::new(source),
                            map_reduce,
                        },
                    ))
                }
            }
        }

        Workflow::FlatMap { src, func } => {
            let (base, src_task) = crush(src)?;
            let func = rebase_flat_map(func, &base);
            let (source, map_reduce) = fresh_map_reduce(
                src,
                src_task,
                func.to_emit_fn(),
                IDENTITY_REDUCE.clone(),
            )?;
            Ok((
                value_var(),
                Task::MapReduce {
                    source: Box::new(source),
                    map_reduce,
                },
            ))
        }

        Workflow::Reduce { src, func } => {
            let (base, src_task) = crush(src)?;
            match src_task {
                Task::MapReduce { source, map_reduce } if map_reduce.finalizer.is_none() => {
                    let mut map_reduce = map_reduce;
                    map_reduce.reduce = func.clone();
                    Ok((
                        value_var(),
                        Task::MapReduce { source, map_reduce },
                    ))
                }
                src_task => {
                    let mapper = rebase_map(&IDENTITY_MAP, &base);
                    let (source, map_reduce) =
                        fresh_map_reduce(src, src_task, mapper.to_emit_fn(), func.clone())?;
                    Ok((
                        value_var(),
                        Task::MapReduce {
                            source: Box::new(source),
                            map_reduce,
                        },
                    ))
                }
            }
        }

        Workflow::FoldLeft { head, tails } => {
            let (_, head_task) = crush(head)?;
            let mut tail_tasks = Vec::new();
            for tail in tails {
                let (_, task) = crush(tail)?;
                match task {
                    Task::MapReduce { source, map_reduce } => {
                        let mut map_reduce = map_reduce;
                        map_reduce.out = Some(OutAction::Reduce);
                        tail_tasks.push(Task::MapReduce { source, map_reduce });
                    }
                    other => {
                        return Err(PlannerError::InvalidFoldLeftTail(
                            other.name().to_string(),
                        ))
                    }
                }
            }
            Ok((
                value_var(),
                Task::FoldLeft {
                    head: Box::new(head_task),
                    tails: tail_tasks,
                },
            ))
        }

        Workflow::Join { sources } => {
            let tasks = sources
                .iter()
                .map(|s| crush(s).map(|(_, t)| t))
                .collect::<Result<Vec<_>>>()?;
            Ok((DocVar::root(), Task::Join(tasks)))
        }

        // every remaining single-source op is a pipeline op, already
        // handled by the guarded arm above
        _ => unreachable!("non-pipeline op fell through crush dispatch"),
    }
}

/// Build a fresh map-reduce job: absorb a small match/sort/limit
/// prefix into the job's query/sort/limit when the op chain allows,
/// otherwise run over the already-crushed source task.
fn fresh_map_reduce(
    src_op: &Arc<Workflow>,
    src_task: Task,
    map: JsExpr,
    reduce: crate::js::ReduceFunc,
) -> Result<(Task, MapReduce)> {
    let mut map_reduce = MapReduce::new(map, reduce);
    if let Some((inner, selection, sort, limit)) = small_prefix(src_op) {
        log_debug!("crush: absorbed pipeline prefix into map-reduce input");
        let (_, source) = crush(&inner)?;
        map_reduce.selection = selection;
        map_reduce.input_sort = sort;
        map_reduce.limit = limit;
        Ok((source, map_reduce))
    } else {
        Ok((src_task, map_reduce))
    }
}
