// tests/workflow_tests.rs
// End-to-end scenarios: construction, coalescing, merging, lowering

use ironplan::{
    merge, render, workflow_task, Accumulator, Collection, DocVar, Expression, GeoNear, GroupBy,
    Grouped, PlannerError, Reshape, ReshapeValue, Selector, SortDirection, Stage, Task, Workflow,
};
use serde_json::json;
use std::sync::Arc;

fn read(name: &str) -> Arc<Workflow> {
    Workflow::read(Collection::new(name))
}

// ========== COALESCING SCENARIOS ==========

#[test]
fn test_limit_fusion_takes_minimum() {
    let w = Workflow::limit(Workflow::limit(read("c"), 10), 5);
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { source, stages } => {
            assert_eq!(*source, Task::Read(Collection::new("c")));
            assert_eq!(stages.len(), 1);
            assert_eq!(stages[0].to_value(), json!({"$limit": 5}));
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_match_fusion_ands_selectors() {
    let w = Workflow::match_with(
        Workflow::match_with(read("c"), Selector::new(json!({"x": 1}))),
        Selector::new(json!({"y": 2})),
    );
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { stages, .. } => {
            assert_eq!(stages.len(), 1);
            assert_eq!(
                stages[0].to_value(),
                json!({"$match": {"$and": [{"x": 1}, {"y": 2}]}})
            );
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_match_sort_swap() {
    let sorted = Workflow::sort(
        read("c"),
        vec![(DocVar::field("age"), SortDirection::Ascending)],
    )
    .unwrap();
    let w = Workflow::match_with(sorted, Selector::new(json!({"x": 1})));
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { stages, .. } => {
            // match floats above the sort: it runs first in the pipeline
            assert_eq!(stages.len(), 2);
            assert_eq!(stages[0].to_value(), json!({"$match": {"x": 1}}));
            assert_eq!(stages[1].to_value(), json!({"$sort": {"age": 1}}));
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_skip_and_limit_reassociation() {
    // limit(5) over skip(3) runs as skip(3) over limit(8)
    let w = Workflow::limit(Workflow::skip(read("c"), 3), 5);
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { stages, .. } => {
            assert_eq!(stages.len(), 2);
            assert_eq!(stages[0].to_value(), json!({"$limit": 8}));
            assert_eq!(stages[1].to_value(), json!({"$skip": 3}));
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

// ========== MERGE SCENARIOS ==========

#[test]
fn test_merge_same_reads() {
    let m = merge(&read("c"), &read("c")).unwrap();
    assert!(m.left_base.is_root());
    assert!(m.right_base.is_root());
    assert_eq!(*m.op, *read("c"));
}

#[test]
fn test_merge_pures_wraps_both_literals() {
    let m = merge(&Workflow::pure(json!(1)), &Workflow::pure(json!(2))).unwrap();
    assert_eq!(m.left_base, DocVar::field("lEft"));
    assert_eq!(m.right_base, DocVar::field("rIght"));
    assert_eq!(
        workflow_task(&m.op).unwrap(),
        Task::Pure(json!({"lEft": 1, "rIght": 2}))
    );
}

#[test]
fn test_merge_group_scenario() {
    // two groups with the same key merge into one group over temp
    // names plus a relabeling project
    let sums = Workflow::group(
        read("c"),
        Grouped::new(vec![(
            "s",
            Accumulator::Sum(Expression::Var(DocVar::field("a"))),
        )]),
        GroupBy::Expr(Expression::Var(DocVar::field("city"))),
    )
    .unwrap();
    let avgs = Workflow::group(
        read("c"),
        Grouped::new(vec![(
            "m",
            Accumulator::Avg(Expression::Var(DocVar::field("b"))),
        )]),
        GroupBy::Expr(Expression::Var(DocVar::field("city"))),
    )
    .unwrap();
    let m = merge(&sums, &avgs).unwrap();
    let task = workflow_task(&m.op).unwrap();
    match task {
        Task::Pipeline { stages, .. } => {
            assert_eq!(stages.len(), 2);
            assert_eq!(
                stages[0].to_value(),
                json!({"$group": {
                    "_id": "$city",
                    "__tmp0": {"$sum": "$a"},
                    "__tmp1": {"$avg": "$b"}
                }})
            );
            assert_eq!(
                stages[1].to_value(),
                json!({"$project": {
                    "lEft": {"s": "$__tmp0"},
                    "rIght": {"m": "$__tmp1"}
                }})
            );
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_merge_then_consume_bases() {
    // consumers address the merged outputs through the returned bases
    let left = Workflow::project(
        read("c"),
        Reshape::doc(vec![("x", ReshapeValue::var("a"))]),
    )
    .unwrap();
    let right = Workflow::project(
        read("c"),
        Reshape::doc(vec![("x", ReshapeValue::var("b"))]),
    )
    .unwrap();
    let m = merge(&left, &right).unwrap();
    // conflicting shapes are namespaced; the base locates the left plan
    assert_eq!(m.left_base, DocVar::field("lEft"));
    let key = m.left_base.concat(&DocVar::field("x")).to_field_string();
    let selector = Selector::new(json!({ key: 1 }));
    let w = Workflow::match_with(m.op, selector);
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { stages, .. } => {
            assert_eq!(stages.len(), 2);
            assert_eq!(
                stages[1].to_value(),
                json!({"$match": {"lEft.x": 1}})
            );
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

// ========== LOWERING SCENARIOS ==========

#[test]
fn test_plain_match_lowered_to_pipeline() {
    let w = Workflow::match_with(read("zips"), Selector::new(json!({"state": "CO"})));
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { source, stages } => {
            assert_eq!(*source, Task::Read(Collection::new("zips")));
            assert_eq!(stages.len(), 1);
            assert_eq!(
                stages[0].to_value(),
                json!({"$match": {"state": "CO"}})
            );
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_where_match_lowered_to_map_reduce() {
    let w = Workflow::match_with(read("zips"), Selector::where_js("this.pop > 1000"));
    let task = workflow_task(&w).unwrap();
    match task {
        Task::MapReduce { source, map_reduce } => {
            assert_eq!(*source, Task::Read(Collection::new("zips")));
            let mapper = map_reduce.map.to_string();
            assert!(mapper.contains("this.pop > 1000"));
            assert!(mapper.contains("emit(key, value);"));
            // identity reduce: the mapper emits unique keys
            assert_eq!(
                map_reduce.reduce.fn_expr().to_string(),
                "function(key, values) { return values[0]; }"
            );
        }
        other => panic!("expected map-reduce, got {}", other.name()),
    }
}

#[test]
fn test_aggregation_report_end_to_end() {
    // match -> group -> project-rename -> sort, all one pipeline
    let matched = Workflow::match_with(read("orders"), Selector::new(json!({"status": "paid"})));
    let grouped = Workflow::group(
        matched,
        Grouped::new(vec![(
            "total",
            Accumulator::Sum(Expression::Var(DocVar::parse("amount"))),
        )]),
        GroupBy::Expr(Expression::Var(DocVar::parse("customer.id"))),
    )
    .unwrap();
    let renamed = Workflow::project(
        grouped,
        Reshape::doc(vec![("revenue", ReshapeValue::var("total"))]),
    )
    .unwrap();
    let sorted = Workflow::sort(
        renamed,
        vec![(DocVar::field("revenue"), SortDirection::Descending)],
    )
    .unwrap();
    let task = workflow_task(&sorted).unwrap();
    match task {
        Task::Pipeline { source, stages } => {
            assert_eq!(*source, Task::Read(Collection::new("orders")));
            // the project-rename fused into the group at construction
            assert_eq!(stages.len(), 3);
            assert_eq!(
                stages[1].to_value(),
                json!({"$group": {"_id": "$customer.id", "revenue": {"$sum": "$amount"}}})
            );
            assert_eq!(stages[2].to_value(), json!({"$sort": {"revenue": -1}}));
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_geo_near_is_first_stage() {
    let matched = Workflow::match_with(read("places"), Selector::new(json!({"kind": "cafe"})));
    let w = Workflow::geo_near(matched, GeoNear::new((40.7, -73.9), DocVar::field("dist")))
        .unwrap();
    let task = workflow_task(&w).unwrap();
    match task {
        Task::Pipeline { stages, .. } => {
            assert_eq!(stages.len(), 2);
            assert!(matches!(stages[0], Stage::GeoNear(_)));
            assert!(matches!(stages[1], Stage::Match(_)));
        }
        other => panic!("expected pipeline, got {}", other.name()),
    }
}

#[test]
fn test_fold_left_of_disjoint_collections() {
    let m = merge(&read("a"), &read("b")).unwrap();
    let task = workflow_task(&m.op).unwrap();
    match task {
        Task::FoldLeft { head, tails } => {
            assert_eq!(tails.len(), 1);
            match &*head {
                Task::Pipeline { source, .. } => {
                    assert_eq!(**source, Task::Read(Collection::new("a")))
                }
                other => panic!("expected pipeline head, got {}", other.name()),
            }
        }
        other => panic!("expected fold-left, got {}", other.name()),
    }
}

// ========== CONSTRUCTION ERRORS ==========

#[test]
fn test_empty_sort_rejected() {
    let err = Workflow::sort(read("c"), vec![]);
    assert_eq!(err.unwrap_err(), PlannerError::EmptySort);
}

#[test]
fn test_reserved_labels_rejected_in_user_shapes() {
    for label in ["lEft", "rIght"] {
        let err = Workflow::project(
            read("c"),
            Reshape::doc(vec![(label, ReshapeValue::var("x"))]),
        );
        assert_eq!(
            err.unwrap_err(),
            PlannerError::ReservedLabel(label.to_string())
        );
    }
}

#[test]
fn test_two_geo_nears_rejected() {
    let first =
        Workflow::geo_near(read("c"), GeoNear::new((0.0, 0.0), DocVar::field("d"))).unwrap();
    let second = Workflow::geo_near(first, GeoNear::new((1.0, 1.0), DocVar::field("e")));
    assert_eq!(second.unwrap_err(), PlannerError::DuplicateGeoNear);
}

// ========== RENDERING ==========

#[test]
fn test_debug_tree_shows_op_chain() {
    let w = Workflow::limit(
        Workflow::match_with(read("users"), Selector::new(json!({"active": true}))),
        10,
    );
    let out = render(&w).to_string();
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines[0].starts_with("Limit(10)"));
    assert!(lines[1].trim_start().starts_with("Match"));
    assert!(lines[2].trim_start().starts_with("Read(users)"));
}

#[test]
fn test_task_tree_serializes() {
    let w = Workflow::match_with(read("c"), Selector::new(json!({"x": 1})));
    let task = workflow_task(&w).unwrap();
    let rendered = task.to_value();
    assert_eq!(
        rendered,
        json!({"pipeline": {
            "source": {"read": "c"},
            "stages": [{"$match": {"x": 1}}]
        }})
    );
}
