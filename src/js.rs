// src/js.rs
// The serializable JS subset used in map-reduce bundles
//
// Literal, identifier, member access, call, anonymous function, binary
// op, assignment, var declaration, for-in, if, return, anonymous
// object/array. Construction and rendering only; there is no
// interpreter. User $where bodies ride along verbatim.

use crate::field::{DocVar, PathElem};
use lazy_static::lazy_static;
use serde_json::Value;
use std::fmt;

/// A JS expression in the closed subset
#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    Literal(Value),
    Ident(String),
    /// `obj.name`
    Select(Box<JsExpr>, String),
    /// `obj[key]`
    Index(Box<JsExpr>, Box<JsExpr>),
    Call(Box<JsExpr>, Vec<JsExpr>),
    /// `function(params) { body }`
    AnonFun(Vec<String>, Vec<JsStmt>),
    BinOp(String, Box<JsExpr>, Box<JsExpr>),
    AnonObj(Vec<(String, JsExpr)>),
    AnonArr(Vec<JsExpr>),
    /// Raw user JS (a $where body); opaque to the planner
    Verbatim(String),
}

/// A JS statement in the closed subset
#[derive(Debug, Clone, PartialEq)]
pub enum JsStmt {
    VarDecl(String, Option<JsExpr>),
    Assign(JsExpr, JsExpr),
    ForIn(String, JsExpr, Vec<JsStmt>),
    If(JsExpr, Vec<JsStmt>, Option<Vec<JsStmt>>),
    Return(JsExpr),
    Expr(JsExpr),
}

fn is_js_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl JsExpr {
    pub fn ident(name: impl Into<String>) -> JsExpr {
        JsExpr::Ident(name.into())
    }

    pub fn select(obj: JsExpr, name: impl Into<String>) -> JsExpr {
        JsExpr::Select(Box::new(obj), name.into())
    }

    pub fn index(obj: JsExpr, key: JsExpr) -> JsExpr {
        JsExpr::Index(Box::new(obj), Box::new(key))
    }

    pub fn call(f: JsExpr, args: Vec<JsExpr>) -> JsExpr {
        JsExpr::Call(Box::new(f), args)
    }

    pub fn binop(op: impl Into<String>, a: JsExpr, b: JsExpr) -> JsExpr {
        JsExpr::BinOp(op.into(), Box::new(a), Box::new(b))
    }

    /// Navigate a document path off a base expression.
    /// Names that aren't valid JS identifiers use computed access.
    pub fn select_path(base: JsExpr, path: &DocVar) -> JsExpr {
        path.elems().iter().fold(base, |acc, elem| match elem {
            PathElem::Field(name) if is_js_ident(name) => JsExpr::select(acc, name.clone()),
            PathElem::Field(name) => {
                JsExpr::index(acc, JsExpr::Literal(Value::String(name.clone())))
            }
            PathElem::Index(i) => JsExpr::index(acc, JsExpr::Literal(Value::from(*i))),
        })
    }
}

fn write_stmts(f: &mut fmt::Formatter<'_>, stmts: &[JsStmt]) -> fmt::Result {
    for stmt in stmts {
        write!(f, " {}", stmt)?;
    }
    write!(f, " ")
}

impl fmt::Display for JsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsExpr::Literal(v) => write!(f, "{}", v),
            JsExpr::Ident(name) => write!(f, "{}", name),
            JsExpr::Select(obj, name) => match obj.as_ref() {
                JsExpr::AnonFun(_, _) | JsExpr::BinOp(_, _, _) => {
                    write!(f, "({}).{}", obj, name)
                }
                _ => write!(f, "{}.{}", obj, name),
            },
            JsExpr::Index(obj, key) => match obj.as_ref() {
                JsExpr::AnonFun(_, _) | JsExpr::BinOp(_, _, _) => {
                    write!(f, "({})[{}]", obj, key)
                }
                _ => write!(f, "{}[{}]", obj, key),
            },
            JsExpr::Call(callee, args) => {
                match callee.as_ref() {
                    JsExpr::AnonFun(_, _) => write!(f, "({})", callee)?,
                    _ => write!(f, "{}", callee)?,
                }
                write!(f, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            JsExpr::AnonFun(params, body) => {
                write!(f, "function({}) {{", params.join(", "))?;
                write_stmts(f, body)?;
                write!(f, "}}")
            }
            JsExpr::BinOp(op, a, b) => write!(f, "({} {} {})", a, op, b),
            JsExpr::AnonObj(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " \"{}\": {}", name, value)?;
                }
                write!(f, " }}")
            }
            JsExpr::AnonArr(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            JsExpr::Verbatim(src) => write!(f, "({})", src),
        }
    }
}

impl fmt::Display for JsStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsStmt::VarDecl(name, Some(init)) => write!(f, "var {} = {};", name, init),
            JsStmt::VarDecl(name, None) => write!(f, "var {};", name),
            JsStmt::Assign(target, value) => write!(f, "{} = {};", target, value),
            JsStmt::ForIn(var, obj, body) => {
                write!(f, "for (var {} in {}) {{", var, obj)?;
                write_stmts(f, body)?;
                write!(f, "}}")
            }
            JsStmt::If(cond, then_body, else_body) => {
                write!(f, "if ({}) {{", cond)?;
                write_stmts(f, then_body)?;
                write!(f, "}}")?;
                if let Some(else_body) = else_body {
                    write!(f, " else {{")?;
                    write_stmts(f, else_body)?;
                    write!(f, "}}")?;
                }
                Ok(())
            }
            JsStmt::Return(e) => write!(f, "return {};", e),
            JsStmt::Expr(e) => write!(f, "{};", e),
        }
    }
}

// ============================================================================
// UDF FUNCTION NEWTYPES
// ============================================================================

/// Two-argument mapper: `(key, value) -> [key, value]`
#[derive(Debug, Clone, PartialEq)]
pub struct MapFunc(JsExpr);

/// Two-argument flat mapper: `(key, value) -> [[key, value], ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct FlatMapFunc(JsExpr);

/// Reducer: `(key, values) -> value`
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceFunc(JsExpr);

impl MapFunc {
    /// Wrap a `(key, value)` function body
    pub fn new(body: Vec<JsStmt>) -> MapFunc {
        MapFunc(JsExpr::AnonFun(
            vec!["key".to_string(), "value".to_string()],
            body,
        ))
    }

    pub fn from_fn(f: JsExpr) -> MapFunc {
        MapFunc(f)
    }

    pub fn fn_expr(&self) -> &JsExpr {
        &self.0
    }

    /// `outer . inner`: feed inner's `[key, value]` pair into outer
    pub fn compose(outer: &MapFunc, inner: &MapFunc) -> MapFunc {
        let pair = JsExpr::ident("pair");
        MapFunc::new(vec![
            JsStmt::VarDecl(
                "pair".to_string(),
                Some(JsExpr::call(
                    inner.0.clone(),
                    vec![JsExpr::ident("key"), JsExpr::ident("value")],
                )),
            ),
            JsStmt::Return(JsExpr::call(
                outer.0.clone(),
                vec![
                    JsExpr::index(pair.clone(), JsExpr::Literal(Value::from(0))),
                    JsExpr::index(pair, JsExpr::Literal(Value::from(1))),
                ],
            )),
        ])
    }

    /// As a map-reduce finalizer: applies the mapper to the reduced
    /// value and keeps the value half of the pair
    pub fn to_finalize_fn(&self) -> JsExpr {
        JsExpr::AnonFun(
            vec!["key".to_string(), "reduced".to_string()],
            vec![JsStmt::Return(JsExpr::index(
                JsExpr::call(
                    self.0.clone(),
                    vec![JsExpr::ident("key"), JsExpr::ident("reduced")],
                ),
                JsExpr::Literal(Value::from(1)),
            ))],
        )
    }

    /// Emit-style wrapper for a map-reduce bundle:
    /// `function(key, value) { var pair = f(key, value); emit(pair[0], pair[1]); }`
    pub fn to_emit_fn(&self) -> JsExpr {
        let pair = JsExpr::ident("pair");
        JsExpr::AnonFun(
            vec!["key".to_string(), "value".to_string()],
            vec![
                JsStmt::VarDecl(
                    "pair".to_string(),
                    Some(JsExpr::call(
                        self.0.clone(),
                        vec![JsExpr::ident("key"), JsExpr::ident("value")],
                    )),
                ),
                JsStmt::Expr(JsExpr::call(
                    JsExpr::ident("emit"),
                    vec![
                        JsExpr::index(pair.clone(), JsExpr::Literal(Value::from(0))),
                        JsExpr::index(pair, JsExpr::Literal(Value::from(1))),
                    ],
                )),
            ],
        )
    }
}

impl FlatMapFunc {
    pub fn new(body: Vec<JsStmt>) -> FlatMapFunc {
        FlatMapFunc(JsExpr::AnonFun(
            vec!["key".to_string(), "value".to_string()],
            body,
        ))
    }

    pub fn from_fn(f: JsExpr) -> FlatMapFunc {
        FlatMapFunc(f)
    }

    pub fn fn_expr(&self) -> &JsExpr {
        &self.0
    }

    /// flatMap over map: map first, then fan out
    pub fn compose_over_map(outer: &FlatMapFunc, inner: &MapFunc) -> FlatMapFunc {
        let pair = JsExpr::ident("pair");
        FlatMapFunc::new(vec![
            JsStmt::VarDecl(
                "pair".to_string(),
                Some(JsExpr::call(
                    inner.0.clone(),
                    vec![JsExpr::ident("key"), JsExpr::ident("value")],
                )),
            ),
            JsStmt::Return(JsExpr::call(
                outer.0.clone(),
                vec![
                    JsExpr::index(pair.clone(), JsExpr::Literal(Value::from(0))),
                    JsExpr::index(pair, JsExpr::Literal(Value::from(1))),
                ],
            )),
        ])
    }

    /// map over flatMap: fan out first, then map each pair
    pub fn map_over_flat_map(outer: &MapFunc, inner: &FlatMapFunc) -> FlatMapFunc {
        let pairs = JsExpr::ident("pairs");
        let each = JsExpr::index(pairs.clone(), JsExpr::ident("i"));
        FlatMapFunc::new(vec![
            JsStmt::VarDecl(
                "pairs".to_string(),
                Some(JsExpr::call(
                    inner.0.clone(),
                    vec![JsExpr::ident("key"), JsExpr::ident("value")],
                )),
            ),
            JsStmt::VarDecl("rez".to_string(), Some(JsExpr::AnonArr(vec![]))),
            JsStmt::ForIn(
                "i".to_string(),
                pairs,
                vec![JsStmt::Expr(JsExpr::call(
                    JsExpr::select(JsExpr::ident("rez"), "push"),
                    vec![JsExpr::call(
                        outer.0.clone(),
                        vec![
                            JsExpr::index(each.clone(), JsExpr::Literal(Value::from(0))),
                            JsExpr::index(each, JsExpr::Literal(Value::from(1))),
                        ],
                    )],
                ))],
            ),
            JsStmt::Return(JsExpr::ident("rez")),
        ])
    }

    /// flatMap over flatMap: fan out twice, concatenating
    pub fn compose(outer: &FlatMapFunc, inner: &FlatMapFunc) -> FlatMapFunc {
        let pairs = JsExpr::ident("pairs");
        let each = JsExpr::index(pairs.clone(), JsExpr::ident("i"));
        FlatMapFunc::new(vec![
            JsStmt::VarDecl(
                "pairs".to_string(),
                Some(JsExpr::call(
                    inner.0.clone(),
                    vec![JsExpr::ident("key"), JsExpr::ident("value")],
                )),
            ),
            JsStmt::VarDecl("rez".to_string(), Some(JsExpr::AnonArr(vec![]))),
            JsStmt::ForIn(
                "i".to_string(),
                pairs,
                vec![
                    JsStmt::VarDecl(
                        "fanned".to_string(),
                        Some(JsExpr::call(
                            outer.0.clone(),
                            vec![
                                JsExpr::index(each.clone(), JsExpr::Literal(Value::from(0))),
                                JsExpr::index(each, JsExpr::Literal(Value::from(1))),
                            ],
                        )),
                    ),
                    JsStmt::ForIn(
                        "j".to_string(),
                        JsExpr::ident("fanned"),
                        vec![JsStmt::Expr(JsExpr::call(
                            JsExpr::select(JsExpr::ident("rez"), "push"),
                            vec![JsExpr::index(
                                JsExpr::ident("fanned"),
                                JsExpr::ident("j"),
                            )],
                        ))],
                    ),
                ],
            ),
            JsStmt::Return(JsExpr::ident("rez")),
        ])
    }

    /// The flat-map equivalent of unwinding `field`: one output document
    /// per array element, keyed `[key, index]` to keep emit keys unique.
    pub fn unwind(field: &DocVar) -> FlatMapFunc {
        let value = JsExpr::ident("value");
        let each = JsExpr::ident("each");
        let target = JsExpr::select_path(value.clone(), field);
        FlatMapFunc::new(vec![
            JsStmt::VarDecl("rez".to_string(), Some(JsExpr::AnonArr(vec![]))),
            JsStmt::ForIn(
                "index".to_string(),
                target.clone(),
                vec![
                    JsStmt::VarDecl("each".to_string(), Some(JsExpr::AnonObj(vec![]))),
                    JsStmt::ForIn(
                        "attr".to_string(),
                        value.clone(),
                        vec![JsStmt::Assign(
                            JsExpr::index(each.clone(), JsExpr::ident("attr")),
                            JsExpr::index(value, JsExpr::ident("attr")),
                        )],
                    ),
                    JsStmt::Assign(
                        JsExpr::select_path(each.clone(), field),
                        JsExpr::index(target, JsExpr::ident("index")),
                    ),
                    JsStmt::Expr(JsExpr::call(
                        JsExpr::select(JsExpr::ident("rez"), "push"),
                        vec![JsExpr::AnonArr(vec![
                            JsExpr::AnonArr(vec![JsExpr::ident("key"), JsExpr::ident("index")]),
                            each,
                        ])],
                    )),
                ],
            ),
            JsStmt::Return(JsExpr::ident("rez")),
        ])
    }

    /// Emit-style wrapper: emits every produced pair
    pub fn to_emit_fn(&self) -> JsExpr {
        let pairs = JsExpr::ident("pairs");
        let each = JsExpr::index(pairs.clone(), JsExpr::ident("i"));
        JsExpr::AnonFun(
            vec!["key".to_string(), "value".to_string()],
            vec![
                JsStmt::VarDecl(
                    "pairs".to_string(),
                    Some(JsExpr::call(
                        self.0.clone(),
                        vec![JsExpr::ident("key"), JsExpr::ident("value")],
                    )),
                ),
                JsStmt::ForIn(
                    "i".to_string(),
                    pairs,
                    vec![JsStmt::Expr(JsExpr::call(
                        JsExpr::ident("emit"),
                        vec![
                            JsExpr::index(each.clone(), JsExpr::Literal(Value::from(0))),
                            JsExpr::index(each, JsExpr::Literal(Value::from(1))),
                        ],
                    ))],
                ),
            ],
        )
    }
}

impl ReduceFunc {
    /// Wrap a `(key, values)` function body
    pub fn new(body: Vec<JsStmt>) -> ReduceFunc {
        ReduceFunc(JsExpr::AnonFun(
            vec!["key".to_string(), "values".to_string()],
            body,
        ))
    }

    pub fn from_fn(f: JsExpr) -> ReduceFunc {
        ReduceFunc(f)
    }

    pub fn fn_expr(&self) -> &JsExpr {
        &self.0
    }
}

lazy_static! {
    /// `(key, value) -> [key, value]`
    pub static ref IDENTITY_MAP: MapFunc = MapFunc::new(vec![JsStmt::Return(
        JsExpr::AnonArr(vec![JsExpr::ident("key"), JsExpr::ident("value")])
    )]);

    /// Keeps the first value; correct when the mapper emits unique keys
    pub static ref IDENTITY_REDUCE: ReduceFunc = ReduceFunc::new(vec![JsStmt::Return(
        JsExpr::index(JsExpr::ident("values"), JsExpr::Literal(Value::from(0)))
    )]);

    /// Document-merging reduce: later attributes win. The default tail
    /// reduce for fold-left accumulation.
    pub static ref MERGE_REDUCE: ReduceFunc = {
        let values = JsExpr::ident("values");
        let each = JsExpr::index(values.clone(), JsExpr::ident("i"));
        ReduceFunc::new(vec![
            JsStmt::VarDecl("result".to_string(), Some(JsExpr::AnonObj(vec![]))),
            JsStmt::ForIn(
                "i".to_string(),
                values,
                vec![JsStmt::ForIn(
                    "attr".to_string(),
                    each.clone(),
                    vec![JsStmt::Assign(
                        JsExpr::index(JsExpr::ident("result"), JsExpr::ident("attr")),
                        JsExpr::index(each.clone(), JsExpr::ident("attr")),
                    )],
                )],
            ),
            JsStmt::Return(JsExpr::ident("result")),
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_path_rendering() {
        let js = JsExpr::select_path(JsExpr::ident("value"), &DocVar::parse("items.0.name"));
        assert_eq!(js.to_string(), "value.items[0].name");
    }

    #[test]
    fn test_select_path_non_ident_field() {
        let js = JsExpr::select_path(JsExpr::ident("value"), &DocVar::field("odd-name"));
        assert_eq!(js.to_string(), "value[\"odd-name\"]");
    }

    #[test]
    fn test_identity_map_rendering() {
        assert_eq!(
            IDENTITY_MAP.fn_expr().to_string(),
            "function(key, value) { return [key, value]; }"
        );
    }

    #[test]
    fn test_identity_reduce_rendering() {
        assert_eq!(
            IDENTITY_REDUCE.fn_expr().to_string(),
            "function(key, values) { return values[0]; }"
        );
    }

    #[test]
    fn test_map_compose_calls_inner_then_outer() {
        let inner = IDENTITY_MAP.clone();
        let outer = MapFunc::new(vec![JsStmt::Return(JsExpr::AnonArr(vec![
            JsExpr::ident("key"),
            JsExpr::binop("+", JsExpr::ident("value"), JsExpr::Literal(json!(1))),
        ]))]);
        let composed = MapFunc::compose(&outer, &inner);
        let rendered = composed.fn_expr().to_string();
        assert!(rendered.starts_with("function(key, value) { var pair = "));
        assert!(rendered.contains("return (function(key, value)"));
        assert!(rendered.contains("pair[0], pair[1]"));
    }

    #[test]
    fn test_emit_wrapper() {
        let rendered = IDENTITY_MAP.to_emit_fn().to_string();
        assert!(rendered.contains("emit(pair[0], pair[1]);"));
    }

    #[test]
    fn test_unwind_flat_map() {
        let rendered = FlatMapFunc::unwind(&DocVar::field("tags")).fn_expr().to_string();
        assert!(rendered.contains("for (var index in value.tags)"));
        assert!(rendered.contains("each[attr] = value[attr];"));
        assert!(rendered.contains("each.tags = value.tags[index];"));
        assert!(rendered.contains("rez.push([[key, index], each]);"));
    }

    #[test]
    fn test_if_and_verbatim() {
        let stmt = JsStmt::If(
            JsExpr::Verbatim("this.x > 2".to_string()),
            vec![JsStmt::Return(JsExpr::Literal(json!(true)))],
            Some(vec![JsStmt::Return(JsExpr::Literal(json!(false)))]),
        );
        assert_eq!(
            stmt.to_string(),
            "if ((this.x > 2)) { return true; } else { return false; }"
        );
    }
}
