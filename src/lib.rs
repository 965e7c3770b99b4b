// src/lib.rs
// ironplan: workflow IR and optimizer for document-database query plans
//
// Plans are built as immutable op graphs through smart constructors
// that coalesce locally, combined with `merge`, and lowered with
// `workflow_task` into pipeline / map-reduce task trees.

pub mod crush;
pub mod error;
pub mod expression;
pub mod field;
pub mod js;
pub mod logging;
pub mod merge;
pub mod optimize;
pub mod render;
pub mod reshape;
pub mod selector;
pub mod stage;
pub mod task;
pub mod workflow;

// Public exports
pub use crush::{crush, workflow_task};
pub use error::{PlannerError, Result};
pub use expression::{Accumulator, Expression};
pub use field::{DocVar, PathElem, LEFT_LABEL, RIGHT_LABEL, VALUE_LABEL};
pub use js::{FlatMapFunc, JsExpr, JsStmt, MapFunc, ReduceFunc};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use merge::{merge, Merged};
pub use optimize::{finalize, finish};
pub use render::{render, RenderedTree};
pub use reshape::{Reshape, ReshapeValue};
pub use selector::Selector;
pub use stage::{GeoNear, GroupBy, Grouped, SortDirection, Stage};
pub use task::{MapReduce, OutAction, Task};
pub use workflow::{Collection, Workflow};
