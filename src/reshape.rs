// src/reshape.rs
// Reshapes: ordered record constructors for $project
//
// A reshape is either document-shaped (name -> value) or array-shaped
// (index -> value); values are expressions or nested reshapes. Insertion
// order is preserved and observable: stages read fields in declared
// order, so every rewrite here keeps it.

use crate::expression::Expression;
use crate::field::{DocVar, PathElem};
use indexmap::IndexMap;
use serde_json::Value;

/// One reshape slot: a computed expression or a nested shape
#[derive(Debug, Clone, PartialEq)]
pub enum ReshapeValue {
    Expr(Expression),
    Nested(Reshape),
}

impl ReshapeValue {
    pub fn var(path: &str) -> ReshapeValue {
        ReshapeValue::Expr(Expression::Var(DocVar::parse(path)))
    }

    pub fn root() -> ReshapeValue {
        ReshapeValue::Expr(Expression::Var(DocVar::root()))
    }

    fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> ReshapeValue {
        match self {
            ReshapeValue::Expr(e) => ReshapeValue::Expr(e.rewrite_refs(f)),
            ReshapeValue::Nested(r) => ReshapeValue::Nested(r.rewrite_refs(f)),
        }
    }

    fn collect_vars(&self, acc: &mut Vec<DocVar>) {
        match self {
            ReshapeValue::Expr(e) => acc.extend(e.referenced_vars()),
            ReshapeValue::Nested(r) => r.collect_vars(acc),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ReshapeValue::Expr(e) => e.to_value(),
            ReshapeValue::Nested(r) => r.to_value(),
        }
    }
}

/// An ordered record constructor
#[derive(Debug, Clone, PartialEq)]
pub enum Reshape {
    Doc(IndexMap<String, ReshapeValue>),
    Arr(IndexMap<usize, ReshapeValue>),
}

impl Reshape {
    /// Document shape from ordered pairs
    pub fn doc<K: Into<String>>(pairs: Vec<(K, ReshapeValue)>) -> Reshape {
        Reshape::Doc(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Array shape from ordered index pairs
    pub fn arr(pairs: Vec<(usize, ReshapeValue)>) -> Reshape {
        Reshape::Arr(pairs.into_iter().collect())
    }

    /// `{label: value}`
    pub fn nest(label: impl Into<String>, value: ReshapeValue) -> Reshape {
        Reshape::doc(vec![(label.into(), value)])
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Reshape::Doc(m) => m.is_empty(),
            Reshape::Arr(m) => m.is_empty(),
        }
    }

    /// Top-level field names of a document shape
    pub fn doc_keys(&self) -> Vec<&str> {
        match self {
            Reshape::Doc(m) => m.keys().map(|k| k.as_str()).collect(),
            Reshape::Arr(_) => Vec::new(),
        }
    }

    /// Merge two reshapes. Succeeds when no leaf conflicts: disjoint
    /// fields interleave (self's fields first), nested shapes merge
    /// recursively, identical leaves collapse. Any other overlap is a
    /// conflict and the caller must namespace the two shapes instead.
    pub fn merge(&self, other: &Reshape) -> Option<Reshape> {
        match (self, other) {
            (Reshape::Doc(left), Reshape::Doc(right)) => {
                let mut merged = left.clone();
                for (name, rv) in right {
                    match merged.get(name) {
                        None => {
                            merged.insert(name.clone(), rv.clone());
                        }
                        Some(existing) if existing == rv => {}
                        Some(ReshapeValue::Nested(a)) => match rv {
                            ReshapeValue::Nested(b) => {
                                let sub = a.merge(b)?;
                                merged.insert(name.clone(), ReshapeValue::Nested(sub));
                            }
                            ReshapeValue::Expr(_) => return None,
                        },
                        Some(ReshapeValue::Expr(_)) => return None,
                    }
                }
                Some(Reshape::Doc(merged))
            }
            (Reshape::Arr(left), Reshape::Arr(right)) => {
                let mut merged = left.clone();
                for (index, rv) in right {
                    match merged.get(index) {
                        None => {
                            merged.insert(*index, rv.clone());
                        }
                        Some(existing) if existing == rv => {}
                        Some(ReshapeValue::Nested(a)) => match rv {
                            ReshapeValue::Nested(b) => {
                                let sub = a.merge(b)?;
                                merged.insert(*index, ReshapeValue::Nested(sub));
                            }
                            ReshapeValue::Expr(_) => return None,
                        },
                        Some(ReshapeValue::Expr(_)) => return None,
                    }
                }
                Some(Reshape::Arr(merged))
            }
            _ => None,
        }
    }

    /// Rewrite every embedded expression's references
    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Reshape {
        match self {
            Reshape::Doc(m) => Reshape::Doc(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.rewrite_refs(f)))
                    .collect(),
            ),
            Reshape::Arr(m) => Reshape::Arr(
                m.iter()
                    .map(|(k, v)| (*k, v.rewrite_refs(f)))
                    .collect(),
            ),
        }
    }

    fn collect_vars(&self, acc: &mut Vec<DocVar>) {
        match self {
            Reshape::Doc(m) => {
                for v in m.values() {
                    v.collect_vars(acc);
                }
            }
            Reshape::Arr(m) => {
                for v in m.values() {
                    v.collect_vars(acc);
                }
            }
        }
    }

    /// Every variable referenced by the embedded expressions
    pub fn referenced_vars(&self) -> Vec<DocVar> {
        let mut acc = Vec::new();
        self.collect_vars(&mut acc);
        acc
    }

    /// Resolve a variable against this reshape's definitions.
    ///
    /// A leaf expression that is itself a plain variable absorbs any
    /// remaining sub-path (`a -> $x` resolves `a.b` to `$x.b`); other
    /// expressions only resolve exactly.
    pub fn lookup(&self, var: &DocVar) -> Option<ReshapeValue> {
        if var.is_root() {
            return Some(ReshapeValue::Nested(self.clone()));
        }
        let elems = var.elems();
        let slot = match (self, &elems[0]) {
            (Reshape::Doc(m), PathElem::Field(name)) => m.get(name)?,
            (Reshape::Arr(m), PathElem::Index(i)) => m.get(i)?,
            _ => return None,
        };
        let head = match &elems[0] {
            PathElem::Field(name) => DocVar::field(name.clone()),
            PathElem::Index(i) => DocVar::index(*i),
        };
        let remaining = var.strip_prefix(&head)?;
        if remaining.is_root() {
            return Some(slot.clone());
        }
        match slot {
            ReshapeValue::Nested(r) => r.lookup(&remaining),
            ReshapeValue::Expr(Expression::Var(inner)) => {
                Some(ReshapeValue::Expr(Expression::Var(inner.concat(&remaining))))
            }
            ReshapeValue::Expr(_) => None,
        }
    }

    fn collect_field_paths(&self, prefix: &DocVar, acc: &mut Vec<DocVar>) {
        match self {
            Reshape::Doc(m) => {
                for (name, v) in m {
                    let path = prefix.push_field(name.clone());
                    match v {
                        ReshapeValue::Expr(_) => acc.push(path),
                        ReshapeValue::Nested(r) => r.collect_field_paths(&path, acc),
                    }
                }
            }
            Reshape::Arr(m) => {
                for (index, v) in m {
                    let path = prefix.concat(&DocVar::index(*index));
                    match v {
                        ReshapeValue::Expr(_) => acc.push(path),
                        ReshapeValue::Nested(r) => r.collect_field_paths(&path, acc),
                    }
                }
            }
        }
    }

    /// The leaf field paths this reshape defines, in declaration order
    pub fn field_paths(&self) -> Vec<DocVar> {
        let mut acc = Vec::new();
        self.collect_field_paths(&DocVar::root(), &mut acc);
        acc
    }

    fn remove_paths_at(&self, prefix: &DocVar, unused: &[DocVar]) -> Reshape {
        match self {
            Reshape::Doc(m) => Reshape::Doc(
                m.iter()
                    .filter_map(|(name, v)| {
                        let path = prefix.push_field(name.clone());
                        match v {
                            ReshapeValue::Expr(_) if unused.contains(&path) => None,
                            ReshapeValue::Expr(_) => Some((name.clone(), v.clone())),
                            ReshapeValue::Nested(r) => {
                                let pruned = r.remove_paths_at(&path, unused);
                                if pruned.is_empty() {
                                    None
                                } else {
                                    Some((name.clone(), ReshapeValue::Nested(pruned)))
                                }
                            }
                        }
                    })
                    .collect(),
            ),
            Reshape::Arr(m) => Reshape::Arr(
                m.iter()
                    .filter_map(|(index, v)| {
                        let path = prefix.concat(&DocVar::index(*index));
                        match v {
                            ReshapeValue::Expr(_) if unused.contains(&path) => None,
                            ReshapeValue::Expr(_) => Some((*index, v.clone())),
                            ReshapeValue::Nested(r) => {
                                let pruned = r.remove_paths_at(&path, unused);
                                if pruned.is_empty() {
                                    None
                                } else {
                                    Some((*index, ReshapeValue::Nested(pruned)))
                                }
                            }
                        }
                    })
                    .collect(),
            ),
        }
    }

    /// Drop the given leaf paths, removing shapes that become empty
    pub fn remove_paths(&self, unused: &[DocVar]) -> Reshape {
        self.remove_paths_at(&DocVar::root(), unused)
    }

    /// $project wire shape. Array shapes render as JSON arrays in index
    /// order; document shapes as objects in declaration order.
    pub fn to_value(&self) -> Value {
        match self {
            Reshape::Doc(m) => {
                let mut obj = serde_json::Map::new();
                for (name, v) in m {
                    obj.insert(name.clone(), v.to_value());
                }
                Value::Object(obj)
            }
            Reshape::Arr(m) => Value::Array(m.values().map(|v| v.to_value()).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expr_var(path: &str) -> ReshapeValue {
        ReshapeValue::var(path)
    }

    #[test]
    fn test_order_preserved_in_to_value() {
        let shape = Reshape::doc(vec![
            ("zeta", expr_var("z")),
            ("alpha", expr_var("a")),
            ("mid", expr_var("m")),
        ]);
        let rendered = shape.to_value();
        let keys: Vec<&String> = rendered.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_order_survives_rewrite() {
        let shape = Reshape::doc(vec![("b", expr_var("x")), ("a", expr_var("y"))]);
        let rewritten =
            shape.rewrite_refs(&|v| Some(DocVar::field("lEft").concat(v)));
        assert_eq!(rewritten.doc_keys(), ["b", "a"]);
    }

    #[test]
    fn test_merge_disjoint() {
        let a = Reshape::doc(vec![("x", expr_var("x"))]);
        let b = Reshape::doc(vec![("y", expr_var("y"))]);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.doc_keys(), ["x", "y"]);
    }

    #[test]
    fn test_merge_conflict() {
        let a = Reshape::doc(vec![("x", expr_var("x"))]);
        let b = Reshape::doc(vec![("x", expr_var("y"))]);
        assert!(a.merge(&b).is_none());
    }

    #[test]
    fn test_merge_identical_leaves() {
        let a = Reshape::doc(vec![("x", expr_var("x"))]);
        assert_eq!(a.merge(&a), Some(a.clone()));
    }

    #[test]
    fn test_merge_nested() {
        let a = Reshape::doc(vec![(
            "addr",
            ReshapeValue::Nested(Reshape::doc(vec![("city", expr_var("address.city"))])),
        )]);
        let b = Reshape::doc(vec![(
            "addr",
            ReshapeValue::Nested(Reshape::doc(vec![("zip", expr_var("address.zip"))])),
        )]);
        let merged = a.merge(&b).unwrap();
        assert_eq!(
            merged.field_paths(),
            vec![DocVar::parse("addr.city"), DocVar::parse("addr.zip")]
        );
    }

    #[test]
    fn test_merge_doc_arr_conflict() {
        let a = Reshape::doc(vec![("x", expr_var("x"))]);
        let b = Reshape::arr(vec![(0, expr_var("y"))]);
        assert!(a.merge(&b).is_none());
    }

    #[test]
    fn test_lookup_leaf() {
        let shape = Reshape::doc(vec![("total", expr_var("order.total"))]);
        assert_eq!(
            shape.lookup(&DocVar::field("total")),
            Some(expr_var("order.total"))
        );
        assert_eq!(shape.lookup(&DocVar::field("missing")), None);
    }

    #[test]
    fn test_lookup_var_absorbs_subpath() {
        let shape = Reshape::doc(vec![("o", expr_var("order"))]);
        assert_eq!(
            shape.lookup(&DocVar::parse("o.total")),
            Some(expr_var("order.total"))
        );
    }

    #[test]
    fn test_lookup_nested() {
        let shape = Reshape::doc(vec![(
            "addr",
            ReshapeValue::Nested(Reshape::doc(vec![("city", expr_var("address.city"))])),
        )]);
        assert_eq!(
            shape.lookup(&DocVar::parse("addr.city")),
            Some(expr_var("address.city"))
        );
    }

    #[test]
    fn test_lookup_expr_subpath_fails() {
        let shape = Reshape::doc(vec![(
            "n",
            ReshapeValue::Expr(Expression::Add(
                Box::new(Expression::Var(DocVar::field("a"))),
                Box::new(Expression::Literal(json!(1))),
            )),
        )]);
        assert_eq!(shape.lookup(&DocVar::parse("n.sub")), None);
    }

    #[test]
    fn test_remove_paths() {
        let shape = Reshape::doc(vec![
            ("keep", expr_var("a")),
            ("drop", expr_var("b")),
            (
                "nested",
                ReshapeValue::Nested(Reshape::doc(vec![("gone", expr_var("c"))])),
            ),
        ]);
        let pruned = shape.remove_paths(&[DocVar::field("drop"), DocVar::parse("nested.gone")]);
        assert_eq!(pruned.field_paths(), vec![DocVar::field("keep")]);
    }

    #[test]
    fn test_arr_to_value() {
        let shape = Reshape::arr(vec![(0, expr_var("a")), (1, expr_var("b"))]);
        assert_eq!(shape.to_value(), json!(["$a", "$b"]));
    }
}
