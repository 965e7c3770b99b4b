// src/task.rs
// The task IR: what the execution layer consumes
//
// A task tree is the lowered form of a workflow: leaves read or
// produce documents, pipelines run native stages, map-reduce tasks
// bundle their JS, and fold-left/join combine sub-tasks.

use crate::field::DocVar;
use crate::js::{JsExpr, ReduceFunc};
use crate::selector::Selector;
use crate::stage::{SortDirection, Stage};
use crate::workflow::Collection;
use serde_json::{json, Value};

/// Where a map-reduce job writes its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutAction {
    /// Replace the output collection (the default)
    Replace,
    /// Reduce into the accumulator collection (fold-left tails)
    Reduce,
}

impl OutAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutAction::Replace => "replace",
            OutAction::Reduce => "reduce",
        }
    }
}

/// A map-reduce bundle: emit-style mapper, reducer, and the optional
/// finalizer/selection/sort/limit/out extras
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduce {
    pub map: JsExpr,
    pub reduce: ReduceFunc,
    pub finalizer: Option<JsExpr>,
    pub selection: Option<Selector>,
    pub input_sort: Option<Vec<(DocVar, SortDirection)>>,
    pub limit: Option<i64>,
    pub out: Option<OutAction>,
}

impl MapReduce {
    pub fn new(map: JsExpr, reduce: ReduceFunc) -> MapReduce {
        MapReduce {
            map,
            reduce,
            finalizer: None,
            selection: None,
            input_sort: None,
            limit: None,
            out: None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("map".to_string(), Value::String(self.map.to_string()));
        obj.insert(
            "reduce".to_string(),
            Value::String(self.reduce.fn_expr().to_string()),
        );
        if let Some(finalizer) = &self.finalizer {
            obj.insert("finalize".to_string(), Value::String(finalizer.to_string()));
        }
        if let Some(selection) = &self.selection {
            obj.insert("query".to_string(), selection.to_json().clone());
        }
        if let Some(sort) = &self.input_sort {
            let mut rendered = serde_json::Map::new();
            for (v, dir) in sort {
                rendered.insert(v.to_field_string(), json!(dir.to_wire()));
            }
            obj.insert("sort".to_string(), Value::Object(rendered));
        }
        if let Some(limit) = self.limit {
            obj.insert("limit".to_string(), json!(limit));
        }
        if let Some(out) = self.out {
            obj.insert("out".to_string(), json!({ out.as_str(): true }));
        }
        Value::Object(obj)
    }
}

/// One node of the executable task tree
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Literal documents
    Pure(Value),
    /// Scan of a collection
    Read(Collection),
    /// A native aggregation pipeline over a source task
    Pipeline { source: Box<Task>, stages: Vec<Stage> },
    /// A map-reduce job over a source task
    MapReduce {
        source: Box<Task>,
        map_reduce: MapReduce,
    },
    /// Sequential accumulation: run the head, then reduce each tail
    /// into its output
    FoldLeft { head: Box<Task>, tails: Vec<Task> },
    /// Side-by-side sub-plans; join semantics live in the runtime
    Join(Vec<Task>),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Pure(_) => "PureTask",
            Task::Read(_) => "ReadTask",
            Task::Pipeline { .. } => "PipelineTask",
            Task::MapReduce { .. } => "MapReduceTask",
            Task::FoldLeft { .. } => "FoldLeftTask",
            Task::Join(_) => "JoinTask",
        }
    }

    /// JSON rendering for the execution layer and for diagnostics
    pub fn to_value(&self) -> Value {
        match self {
            Task::Pure(v) => json!({ "pure": v }),
            Task::Read(c) => json!({ "read": c.name() }),
            Task::Pipeline { source, stages } => json!({
                "pipeline": {
                    "source": source.to_value(),
                    "stages": stages.iter().map(|s| s.to_value()).collect::<Vec<_>>(),
                }
            }),
            Task::MapReduce { source, map_reduce } => json!({
                "mapReduce": {
                    "source": source.to_value(),
                    "job": map_reduce.to_value(),
                }
            }),
            Task::FoldLeft { head, tails } => json!({
                "foldLeft": {
                    "head": head.to_value(),
                    "tails": tails.iter().map(|t| t.to_value()).collect::<Vec<_>>(),
                }
            }),
            Task::Join(tasks) => json!({
                "join": tasks.iter().map(|t| t.to_value()).collect::<Vec<_>>()
            }),
        }
    }
}
