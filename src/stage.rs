// src/stage.rs
// Pipeline stage value objects
//
// Each stage is a pure description of one aggregation stage in wire
// order: $project, $match, $redact, $limit, $skip, $unwind, $sort,
// $group, $geoNear. Stages know how to rewrite their embedded
// references and how to render themselves to wire JSON.

use crate::expression::{Accumulator, Expression};
use crate::field::DocVar;
use crate::reshape::Reshape;
use crate::selector::Selector;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sort direction (wire form: 1 ascending, -1 descending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn to_wire(self) -> i64 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// The grouped map: output name -> accumulator. Only accumulators can
/// appear here; order is preserved into the wire form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grouped(pub IndexMap<String, Accumulator>);

impl Grouped {
    pub fn new<K: Into<String>>(pairs: Vec<(K, Accumulator)>) -> Grouped {
        Grouped(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Grouped {
        Grouped(
            self.0
                .iter()
                .map(|(k, acc)| (k.clone(), acc.rewrite_refs(f)))
                .collect(),
        )
    }

    pub fn referenced_vars(&self) -> Vec<DocVar> {
        self.0
            .values()
            .flat_map(|acc| acc.referenced_vars())
            .collect()
    }

    /// Output names, in declaration order
    pub fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// The group key: an expression or a reshape
#[derive(Debug, Clone, PartialEq)]
pub enum GroupBy {
    Expr(Expression),
    Shape(Reshape),
}

impl GroupBy {
    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> GroupBy {
        match self {
            GroupBy::Expr(e) => GroupBy::Expr(e.rewrite_refs(f)),
            GroupBy::Shape(r) => GroupBy::Shape(r.rewrite_refs(f)),
        }
    }

    pub fn referenced_vars(&self) -> Vec<DocVar> {
        match self {
            GroupBy::Expr(e) => e.referenced_vars(),
            GroupBy::Shape(r) => r.referenced_vars(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            GroupBy::Expr(e) => e.to_value(),
            GroupBy::Shape(r) => r.to_value(),
        }
    }
}

/// $geoNear parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GeoNear {
    pub near: (f64, f64),
    pub distance_field: DocVar,
    pub limit: Option<i64>,
    pub max_distance: Option<f64>,
    pub query: Option<Selector>,
    pub spherical: bool,
    pub distance_multiplier: Option<f64>,
    pub include_locs: Option<DocVar>,
    pub unique_docs: bool,
}

impl GeoNear {
    pub fn new(near: (f64, f64), distance_field: DocVar) -> GeoNear {
        GeoNear {
            near,
            distance_field,
            limit: None,
            max_distance: None,
            query: None,
            spherical: false,
            distance_multiplier: None,
            include_locs: None,
            unique_docs: false,
        }
    }

    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> GeoNear {
        let rewrite_var = |v: &DocVar| f(v).unwrap_or_else(|| v.clone());
        GeoNear {
            near: self.near,
            distance_field: rewrite_var(&self.distance_field),
            limit: self.limit,
            max_distance: self.max_distance,
            query: self.query.as_ref().map(|q| q.rewrite_fields(f)),
            spherical: self.spherical,
            distance_multiplier: self.distance_multiplier,
            include_locs: self.include_locs.as_ref().map(rewrite_var),
            unique_docs: self.unique_docs,
        }
    }

    pub fn referenced_vars(&self) -> Vec<DocVar> {
        self.query
            .as_ref()
            .map(|q| q.referenced_vars())
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("near".to_string(), json!([self.near.0, self.near.1]));
        obj.insert(
            "distanceField".to_string(),
            Value::String(self.distance_field.to_field_string()),
        );
        if let Some(limit) = self.limit {
            obj.insert("limit".to_string(), json!(limit));
        }
        if let Some(max) = self.max_distance {
            obj.insert("maxDistance".to_string(), json!(max));
        }
        if let Some(query) = &self.query {
            obj.insert("query".to_string(), query.to_json().clone());
        }
        if self.spherical {
            obj.insert("spherical".to_string(), json!(true));
        }
        if let Some(mult) = self.distance_multiplier {
            obj.insert("distanceMultiplier".to_string(), json!(mult));
        }
        if let Some(locs) = &self.include_locs {
            obj.insert(
                "includeLocs".to_string(),
                Value::String(locs.to_field_string()),
            );
        }
        if self.unique_docs {
            obj.insert("uniqueDocs".to_string(), json!(true));
        }
        Value::Object(obj)
    }
}

/// One aggregation pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Project(Reshape),
    Match(Selector),
    Redact(Expression),
    Limit(i64),
    Skip(i64),
    Unwind(DocVar),
    Sort(Vec<(DocVar, SortDirection)>),
    Group(Grouped, GroupBy),
    GeoNear(GeoNear),
}

impl Stage {
    /// Stage operator name
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Project(_) => "$project",
            Stage::Match(_) => "$match",
            Stage::Redact(_) => "$redact",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Unwind(_) => "$unwind",
            Stage::Sort(_) => "$sort",
            Stage::Group(_, _) => "$group",
            Stage::GeoNear(_) => "$geoNear",
        }
    }

    /// Rewrite the stage's own references through a substitution. The
    /// node type is always preserved and no child op is touched.
    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Stage {
        match self {
            Stage::Project(shape) => Stage::Project(shape.rewrite_refs(f)),
            Stage::Match(sel) => Stage::Match(sel.rewrite_fields(f)),
            Stage::Redact(e) => Stage::Redact(e.rewrite_refs(f)),
            Stage::Limit(n) => Stage::Limit(*n),
            Stage::Skip(n) => Stage::Skip(*n),
            Stage::Unwind(v) => Stage::Unwind(f(v).unwrap_or_else(|| v.clone())),
            Stage::Sort(keys) => Stage::Sort(
                keys.iter()
                    .map(|(v, dir)| (f(v).unwrap_or_else(|| v.clone()), *dir))
                    .collect(),
            ),
            Stage::Group(grouped, by) => {
                Stage::Group(grouped.rewrite_refs(f), by.rewrite_refs(f))
            }
            Stage::GeoNear(gn) => Stage::GeoNear(gn.rewrite_refs(f)),
        }
    }

    /// The fields this stage reads
    pub fn referenced_vars(&self) -> Vec<DocVar> {
        match self {
            Stage::Project(shape) => shape.referenced_vars(),
            Stage::Match(sel) => sel.referenced_vars(),
            Stage::Redact(e) => e.referenced_vars(),
            Stage::Limit(_) | Stage::Skip(_) => Vec::new(),
            Stage::Unwind(v) => vec![v.clone()],
            Stage::Sort(keys) => keys.iter().map(|(v, _)| v.clone()).collect(),
            Stage::Group(grouped, by) => {
                let mut vars = grouped.referenced_vars();
                vars.extend(by.referenced_vars());
                vars
            }
            Stage::GeoNear(gn) => gn.referenced_vars(),
        }
    }

    /// Wire JSON, e.g. `{"$match": {...}}`
    pub fn to_value(&self) -> Value {
        match self {
            Stage::Project(shape) => json!({ "$project": shape.to_value() }),
            Stage::Match(sel) => json!({ "$match": sel.to_json() }),
            Stage::Redact(e) => json!({ "$redact": e.to_value() }),
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Skip(n) => json!({ "$skip": n }),
            Stage::Unwind(v) => json!({ "$unwind": v.to_ref_string() }),
            Stage::Sort(keys) => {
                // key order is significant and preserved by the map
                let mut obj = serde_json::Map::new();
                for (v, dir) in keys {
                    obj.insert(v.to_field_string(), json!(dir.to_wire()));
                }
                json!({ "$sort": Value::Object(obj) })
            }
            Stage::Group(grouped, by) => {
                let mut obj = serde_json::Map::new();
                obj.insert("_id".to_string(), by.to_value());
                for (name, acc) in &grouped.0 {
                    obj.insert(name.clone(), acc.to_value());
                }
                json!({ "$group": Value::Object(obj) })
            }
            Stage::GeoNear(gn) => json!({ "$geoNear": gn.to_value() }),
        }
    }
}
