// src/selector.rs
// Match selectors: MongoDB find-query filters as pure descriptions
//
// A Selector is a thin wrapper around the filter JSON; the planner
// never evaluates it. What the planner does need is conjunction
// (match fusion), field rewriting, the pipelinability decision, and a
// JS compilation for the map-reduce fallback.

use crate::field::DocVar;
use crate::js::{JsExpr, JsStmt};
use crate::log_warn;
use serde_json::{json, Map, Value};

/// A find-query filter
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    filter: Value,
}

impl Selector {
    /// Empty selector: matches all documents
    pub fn empty() -> Selector {
        Selector {
            filter: Value::Object(Map::new()),
        }
    }

    pub fn new(filter: Value) -> Selector {
        Selector { filter }
    }

    /// A `$where` selector with a raw JS predicate body
    pub fn where_js(body: impl Into<String>) -> Selector {
        Selector {
            filter: json!({ "$where": body.into() }),
        }
    }

    pub fn to_json(&self) -> &Value {
        &self.filter
    }

    pub fn into_json(self) -> Value {
        self.filter
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.filter, Value::Object(m) if m.is_empty())
    }

    /// Conjunction of two selectors. `$and` terms are flattened so
    /// repeated fusion yields one flat conjunction.
    pub fn and(a: &Selector, b: &Selector) -> Selector {
        if a.is_empty() {
            return b.clone();
        }
        if b.is_empty() {
            return a.clone();
        }
        fn terms(s: &Selector) -> Vec<Value> {
            if let Value::Object(m) = &s.filter {
                if m.len() == 1 {
                    if let Some(Value::Array(items)) = m.get("$and") {
                        return items.clone();
                    }
                }
            }
            vec![s.filter.clone()]
        }
        let mut all = terms(a);
        all.extend(terms(b));
        Selector {
            filter: json!({ "$and": all }),
        }
    }

    /// The pipelinability decision: a selector can run as a native
    /// $match stage iff it contains no JS predicate anywhere. Compound
    /// selectors propagate the decision by conjunction.
    pub fn is_pipelinable(&self) -> bool {
        fn scan(v: &Value) -> bool {
            match v {
                Value::Object(m) => m
                    .iter()
                    .all(|(k, v)| k != "$where" && scan(v)),
                Value::Array(items) => items.iter().all(scan),
                _ => true,
            }
        }
        scan(&self.filter)
    }

    /// Rewrite the dotted field keys through a DocVar substitution.
    /// Logical operators recurse; `$where` bodies are opaque; operator
    /// objects below a field key are left untouched.
    pub fn rewrite_fields(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Selector {
        fn rewrite_obj(filter: &Value, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Value {
            let obj = match filter {
                Value::Object(m) => m,
                other => return other.clone(),
            };
            let mut out = Map::new();
            for (key, value) in obj {
                if key == "$and" || key == "$or" || key == "$nor" {
                    let items = match value {
                        Value::Array(items) => items
                            .iter()
                            .map(|item| rewrite_obj(item, f))
                            .collect(),
                        other => vec![rewrite_obj(other, f)],
                    };
                    out.insert(key.clone(), Value::Array(items));
                } else if key.starts_with('$') {
                    out.insert(key.clone(), value.clone());
                } else {
                    let var = DocVar::parse(key);
                    let rewritten = f(&var).unwrap_or(var);
                    out.insert(rewritten.to_field_string(), value.clone());
                }
            }
            Value::Object(out)
        }
        Selector {
            filter: rewrite_obj(&self.filter, f),
        }
    }

    /// The field paths this selector constrains
    pub fn referenced_vars(&self) -> Vec<DocVar> {
        fn collect(v: &Value, acc: &mut Vec<DocVar>) {
            if let Value::Object(m) = v {
                for (key, value) in m {
                    if key == "$and" || key == "$or" || key == "$nor" {
                        if let Value::Array(items) = value {
                            for item in items {
                                collect(item, acc);
                            }
                        }
                    } else if !key.starts_with('$') {
                        acc.push(DocVar::parse(key));
                    }
                }
            }
        }
        let mut acc = Vec::new();
        collect(&self.filter, &mut acc);
        acc
    }

    /// Compile to a JS predicate over `input` for the map-reduce
    /// fallback mapper. The find-operator vocabulary the aggregation
    /// runtime supports renders directly; an operator outside it
    /// compiles to `true` with a warning (the fallback then filters
    /// less, never more).
    pub fn to_js_predicate(&self, input: &JsExpr) -> JsExpr {
        fn all(preds: Vec<JsExpr>) -> JsExpr {
            let mut iter = preds.into_iter();
            match iter.next() {
                None => JsExpr::Literal(Value::Bool(true)),
                Some(first) => iter.fold(first, |acc, p| JsExpr::binop("&&", acc, p)),
            }
        }
        fn any(preds: Vec<JsExpr>) -> JsExpr {
            let mut iter = preds.into_iter();
            match iter.next() {
                None => JsExpr::Literal(Value::Bool(false)),
                Some(first) => iter.fold(first, |acc, p| JsExpr::binop("||", acc, p)),
            }
        }
        fn negate(pred: JsExpr) -> JsExpr {
            JsExpr::binop("==", pred, JsExpr::Literal(Value::Bool(false)))
        }
        fn json_stringify(e: JsExpr) -> JsExpr {
            JsExpr::call(
                JsExpr::select(JsExpr::ident("JSON"), "stringify"),
                vec![e],
            )
        }
        // documents and arrays compare structurally (field order is
        // significant, as in find); `===` on objects would compare
        // references and never match
        fn eq_pred(target: JsExpr, operand: &Value) -> JsExpr {
            match operand {
                Value::Object(_) | Value::Array(_) => JsExpr::binop(
                    "===",
                    json_stringify(target),
                    json_stringify(JsExpr::Literal(operand.clone())),
                ),
                scalar => JsExpr::binop("===", target, JsExpr::Literal(scalar.clone())),
            }
        }
        fn neq_pred(target: JsExpr, operand: &Value) -> JsExpr {
            match operand {
                Value::Object(_) | Value::Array(_) => JsExpr::binop(
                    "!==",
                    json_stringify(target),
                    json_stringify(JsExpr::Literal(operand.clone())),
                ),
                scalar => JsExpr::binop("!==", target, JsExpr::Literal(scalar.clone())),
            }
        }
        /// Is the literal `elem` an element of the runtime array?
        fn contains_pred(array: JsExpr, elem: &Value) -> JsExpr {
            match elem {
                Value::Object(_) | Value::Array(_) => {
                    let item = JsExpr::index(JsExpr::ident("arr"), JsExpr::ident("i"));
                    JsExpr::call(
                        JsExpr::AnonFun(
                            vec!["arr".to_string()],
                            vec![
                                JsStmt::VarDecl(
                                    "found".to_string(),
                                    Some(JsExpr::Literal(Value::Bool(false))),
                                ),
                                JsStmt::ForIn(
                                    "i".to_string(),
                                    JsExpr::ident("arr"),
                                    vec![JsStmt::If(
                                        eq_pred(item, elem),
                                        vec![JsStmt::Assign(
                                            JsExpr::ident("found"),
                                            JsExpr::Literal(Value::Bool(true)),
                                        )],
                                        None,
                                    )],
                                ),
                                JsStmt::Return(JsExpr::ident("found")),
                            ],
                        ),
                        vec![array],
                    )
                }
                scalar => JsExpr::binop(
                    ">=",
                    JsExpr::call(
                        JsExpr::select(array, "indexOf"),
                        vec![JsExpr::Literal(scalar.clone())],
                    ),
                    JsExpr::Literal(Value::from(0)),
                ),
            }
        }
        fn regex_pred(target: JsExpr, pattern: &Value, options: Option<&Value>) -> JsExpr {
            let mut args = vec![JsExpr::Literal(pattern.clone())];
            if let Some(opts) = options {
                args.push(JsExpr::Literal(opts.clone()));
            }
            JsExpr::call(
                JsExpr::select(JsExpr::call(JsExpr::ident("RegExp"), args), "test"),
                vec![target],
            )
        }
        fn type_pred(target: JsExpr, operand: &Value) -> JsExpr {
            let name = match operand {
                Value::String(s) => s.clone(),
                Value::Number(n) => match n.as_i64() {
                    Some(1) => "double".to_string(),
                    Some(2) => "string".to_string(),
                    Some(3) => "object".to_string(),
                    Some(4) => "array".to_string(),
                    Some(8) => "bool".to_string(),
                    Some(10) => "null".to_string(),
                    Some(16) => "int".to_string(),
                    Some(18) => "long".to_string(),
                    _ => {
                        log_warn!("unknown $type code {}; compiling to true", n);
                        return JsExpr::Literal(Value::Bool(true));
                    }
                },
                other => {
                    log_warn!("unsupported $type operand {}; compiling to true", other);
                    return JsExpr::Literal(Value::Bool(true));
                }
            };
            match name.as_str() {
                // string concatenation / arithmetic are identities only
                // on their own type
                "string" => JsExpr::binop(
                    "===",
                    JsExpr::binop(
                        "+",
                        target.clone(),
                        JsExpr::Literal(Value::String(String::new())),
                    ),
                    target,
                ),
                "double" | "int" | "long" | "number" | "decimal" => JsExpr::binop(
                    "===",
                    JsExpr::binop("-", target.clone(), JsExpr::Literal(Value::from(0))),
                    target,
                ),
                "bool" => any(vec![
                    JsExpr::binop("===", target.clone(), JsExpr::Literal(Value::Bool(true))),
                    JsExpr::binop("===", target, JsExpr::Literal(Value::Bool(false))),
                ]),
                "null" => JsExpr::binop("===", target, JsExpr::Literal(Value::Null)),
                "array" => JsExpr::binop("instanceof", target, JsExpr::ident("Array")),
                "object" => all(vec![
                    JsExpr::binop("instanceof", target.clone(), JsExpr::ident("Object")),
                    negate(JsExpr::binop("instanceof", target, JsExpr::ident("Array"))),
                ]),
                other => {
                    log_warn!("unknown $type alias {}; compiling to true", other);
                    JsExpr::Literal(Value::Bool(true))
                }
            }
        }
        /// Does any element of the runtime array satisfy the sub-filter?
        fn elem_match_pred(target: JsExpr, filter: &Value) -> JsExpr {
            let element = JsExpr::index(JsExpr::ident("arr"), JsExpr::ident("i"));
            let inner = match filter {
                // operator form applies directly to each element;
                // document form is an ordinary filter over the element
                Value::Object(ops)
                    if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) =>
                {
                    ops_pred(&element, ops)
                }
                other => compile(other, &element),
            };
            JsExpr::call(
                JsExpr::AnonFun(
                    vec!["arr".to_string()],
                    vec![
                        JsStmt::VarDecl(
                            "found".to_string(),
                            Some(JsExpr::Literal(Value::Bool(false))),
                        ),
                        JsStmt::ForIn(
                            "i".to_string(),
                            JsExpr::ident("arr"),
                            vec![JsStmt::If(
                                inner,
                                vec![JsStmt::Assign(
                                    JsExpr::ident("found"),
                                    JsExpr::Literal(Value::Bool(true)),
                                )],
                                None,
                            )],
                        ),
                        JsStmt::Return(JsExpr::ident("found")),
                    ],
                ),
                vec![target],
            )
        }
        fn field_op(
            target: JsExpr,
            op: &str,
            operand: &Value,
            options: Option<&Value>,
        ) -> JsExpr {
            match op {
                "$eq" => eq_pred(target, operand),
                "$ne" => neq_pred(target, operand),
                "$gt" => JsExpr::binop(">", target, JsExpr::Literal(operand.clone())),
                "$gte" => JsExpr::binop(">=", target, JsExpr::Literal(operand.clone())),
                "$lt" => JsExpr::binop("<", target, JsExpr::Literal(operand.clone())),
                "$lte" => JsExpr::binop("<=", target, JsExpr::Literal(operand.clone())),
                "$in" => match operand {
                    Value::Array(items) => any(
                        items.iter().map(|e| eq_pred(target.clone(), e)).collect(),
                    ),
                    other => {
                        log_warn!("$in operand {} is not an array; compiling to true", other);
                        JsExpr::Literal(Value::Bool(true))
                    }
                },
                "$nin" => match operand {
                    Value::Array(items) => negate(any(
                        items.iter().map(|e| eq_pred(target.clone(), e)).collect(),
                    )),
                    other => {
                        log_warn!("$nin operand {} is not an array; compiling to true", other);
                        JsExpr::Literal(Value::Bool(true))
                    }
                },
                "$exists" => {
                    let wanted = operand.as_bool().unwrap_or(true);
                    let cmp = if wanted { "!==" } else { "===" };
                    JsExpr::binop(cmp, target, JsExpr::ident("undefined"))
                }
                "$regex" => regex_pred(target, operand, options),
                "$not" => match operand {
                    Value::Object(ops) if !ops.is_empty() => negate(ops_pred(&target, ops)),
                    other => {
                        log_warn!("$not operand {} has no JS rendering; compiling to true", other);
                        JsExpr::Literal(Value::Bool(true))
                    }
                },
                "$all" => match operand {
                    // an empty $all matches nothing
                    Value::Array(items) if items.is_empty() => {
                        JsExpr::Literal(Value::Bool(false))
                    }
                    Value::Array(items) => all(
                        items
                            .iter()
                            .map(|e| contains_pred(target.clone(), e))
                            .collect(),
                    ),
                    other => {
                        log_warn!("$all operand {} is not an array; compiling to true", other);
                        JsExpr::Literal(Value::Bool(true))
                    }
                },
                "$elemMatch" => elem_match_pred(target, operand),
                "$type" => type_pred(target, operand),
                "$size" => JsExpr::binop(
                    "===",
                    JsExpr::select(target, "length"),
                    JsExpr::Literal(operand.clone()),
                ),
                "$mod" => match operand {
                    Value::Array(parts) if parts.len() == 2 => JsExpr::binop(
                        "===",
                        JsExpr::binop("%", target, JsExpr::Literal(parts[0].clone())),
                        JsExpr::Literal(parts[1].clone()),
                    ),
                    other => {
                        log_warn!("$mod operand {} is not [divisor, remainder]; compiling to true", other);
                        JsExpr::Literal(Value::Bool(true))
                    }
                },
                other => {
                    log_warn!("selector operator {} has no JS rendering; compiling to true", other);
                    JsExpr::Literal(Value::Bool(true))
                }
            }
        }
        /// One field's operator object, as a conjunction. `$options`
        /// is a modifier consumed by its sibling `$regex`.
        fn ops_pred(target: &JsExpr, ops: &Map<String, Value>) -> JsExpr {
            let options = ops.get("$options");
            all(ops
                .iter()
                .filter(|(op, _)| op.as_str() != "$options")
                .map(|(op, operand)| field_op(target.clone(), op, operand, options))
                .collect())
        }
        fn compile(filter: &Value, input: &JsExpr) -> JsExpr {
            let obj = match filter {
                Value::Object(m) => m,
                other => return JsExpr::Literal(other.clone()),
            };
            let mut preds = Vec::new();
            for (key, value) in obj {
                match key.as_str() {
                    "$and" => {
                        if let Value::Array(items) = value {
                            preds.push(all(
                                items.iter().map(|i| compile(i, input)).collect(),
                            ));
                        }
                    }
                    "$or" => {
                        if let Value::Array(items) = value {
                            preds.push(any(
                                items.iter().map(|i| compile(i, input)).collect(),
                            ));
                        }
                    }
                    "$nor" => {
                        if let Value::Array(items) = value {
                            preds.push(negate(any(
                                items.iter().map(|i| compile(i, input)).collect(),
                            )));
                        }
                    }
                    "$where" => {
                        if let Value::String(body) = value {
                            preds.push(JsExpr::Verbatim(body.clone()));
                        }
                    }
                    field => {
                        let target = JsExpr::select_path(input.clone(), &DocVar::parse(field));
                        match value {
                            Value::Object(ops)
                                if !ops.is_empty()
                                    && ops.keys().all(|k| k.starts_with('$')) =>
                            {
                                preds.push(ops_pred(&target, ops));
                            }
                            literal => preds.push(eq_pred(target, literal)),
                        }
                    }
                }
            }
            all(preds)
        }
        compile(&self.filter, input)
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens() {
        let a = Selector::new(json!({"x": 1}));
        let b = Selector::new(json!({"y": 2}));
        let c = Selector::new(json!({"z": 3}));
        let ab = Selector::and(&a, &b);
        assert_eq!(ab.to_json(), &json!({"$and": [{"x": 1}, {"y": 2}]}));
        let abc = Selector::and(&ab, &c);
        assert_eq!(
            abc.to_json(),
            &json!({"$and": [{"x": 1}, {"y": 2}, {"z": 3}]})
        );
    }

    #[test]
    fn test_and_empty_identity() {
        let a = Selector::new(json!({"x": 1}));
        assert_eq!(Selector::and(&a, &Selector::empty()), a);
        assert_eq!(Selector::and(&Selector::empty(), &a), a);
    }

    #[test]
    fn test_pipelinable_plain() {
        let s = Selector::new(json!({"age": {"$gte": 18}, "city": "NYC"}));
        assert!(s.is_pipelinable());
    }

    #[test]
    fn test_pipelinable_where() {
        let s = Selector::where_js("this.x > 2");
        assert!(!s.is_pipelinable());
    }

    #[test]
    fn test_pipelinable_nested_where() {
        let s = Selector::new(json!({
            "$and": [{"a": 1}, {"$or": [{"b": 2}, {"$where": "this.c"}]}]
        }));
        assert!(!s.is_pipelinable());
    }

    #[test]
    fn test_rewrite_fields() {
        let s = Selector::new(json!({"age": {"$gte": 18}}));
        let rewritten =
            s.rewrite_fields(&|v| Some(DocVar::field("rIght").concat(v)));
        assert_eq!(rewritten.to_json(), &json!({"rIght.age": {"$gte": 18}}));
    }

    #[test]
    fn test_rewrite_fields_recurses_logical() {
        let s = Selector::new(json!({"$or": [{"a": 1}, {"b": 2}]}));
        let rewritten =
            s.rewrite_fields(&|v| Some(DocVar::field("lEft").concat(v)));
        assert_eq!(
            rewritten.to_json(),
            &json!({"$or": [{"lEft.a": 1}, {"lEft.b": 2}]})
        );
    }

    #[test]
    fn test_referenced_vars() {
        let s = Selector::new(json!({"a.b": 1, "c": 2}));
        assert_eq!(
            s.referenced_vars(),
            vec![DocVar::parse("a.b"), DocVar::parse("c")]
        );
    }

    #[test]
    fn test_referenced_vars_recurses_logical() {
        let s = Selector::new(json!({"$and": [{"c": 2}, {"d": 3}]}));
        assert_eq!(
            s.referenced_vars(),
            vec![DocVar::parse("c"), DocVar::parse("d")]
        );
    }

    #[test]
    fn test_js_predicate_simple() {
        let s = Selector::new(json!({"age": {"$gte": 18}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "(value.age >= 18)");
    }

    #[test]
    fn test_js_predicate_where() {
        let s = Selector::where_js("this.x > 2");
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "(this.x > 2)");
    }

    #[test]
    fn test_js_predicate_conjunction() {
        let s = Selector::new(json!({"$and": [{"a": 1}, {"b": {"$lt": 5}}]}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(
            js.to_string(),
            "((value.a === 1) && (value.b < 5))"
        );
    }

    #[test]
    fn test_js_predicate_in_unrolls() {
        let s = Selector::new(json!({"city": {"$in": ["NYC", "LA"]}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(
            js.to_string(),
            "((value.city === \"NYC\") || (value.city === \"LA\"))"
        );
    }

    #[test]
    fn test_js_predicate_nin() {
        let s = Selector::new(json!({"x": {"$nin": [1, 2]}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(
            js.to_string(),
            "(((value.x === 1) || (value.x === 2)) == false)"
        );
    }

    #[test]
    fn test_js_predicate_regex_with_options() {
        let s = Selector::new(json!({"name": {"$regex": "^a", "$options": "i"}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "RegExp(\"^a\", \"i\").test(value.name)");
    }

    #[test]
    fn test_js_predicate_not() {
        let s = Selector::new(json!({"x": {"$not": {"$gt": 5}}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "((value.x > 5) == false)");
    }

    #[test]
    fn test_js_predicate_nested_document_equality_is_structural() {
        let s = Selector::new(json!({"address": {"city": "NYC"}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(
            js.to_string(),
            "(JSON.stringify(value.address) === JSON.stringify({\"city\":\"NYC\"}))"
        );
    }

    #[test]
    fn test_js_predicate_eq_array_is_structural() {
        let s = Selector::new(json!({"tags": {"$eq": ["a", "b"]}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(
            js.to_string(),
            "(JSON.stringify(value.tags) === JSON.stringify([\"a\",\"b\"]))"
        );
    }

    #[test]
    fn test_js_predicate_all() {
        let s = Selector::new(json!({"tags": {"$all": ["a", "b"]}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(
            js.to_string(),
            "((value.tags.indexOf(\"a\") >= 0) && (value.tags.indexOf(\"b\") >= 0))"
        );
    }

    #[test]
    fn test_js_predicate_all_empty_matches_nothing() {
        let s = Selector::new(json!({"tags": {"$all": []}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "false");
    }

    #[test]
    fn test_js_predicate_elem_match() {
        let s = Selector::new(json!({"scores": {"$elemMatch": {"$gt": 80}}}));
        let js = s.to_js_predicate(&JsExpr::ident("value")).to_string();
        assert!(js.starts_with("(function(arr) { var found = false;"));
        assert!(js.contains("if ((arr[i] > 80)) { found = true; }"));
        assert!(js.ends_with(")(value.scores)"));
    }

    #[test]
    fn test_js_predicate_elem_match_document_form() {
        let s = Selector::new(json!({"items": {"$elemMatch": {"qty": {"$gte": 3}}}}));
        let js = s.to_js_predicate(&JsExpr::ident("value")).to_string();
        assert!(js.contains("(arr[i].qty >= 3)"));
        assert!(js.ends_with(")(value.items)"));
    }

    #[test]
    fn test_js_predicate_type() {
        let s = Selector::new(json!({"x": {"$type": "array"}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "(value.x instanceof Array)");
        let s = Selector::new(json!({"x": {"$type": "string"}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "((value.x + \"\") === value.x)");
    }

    #[test]
    fn test_js_predicate_size_and_mod() {
        let s = Selector::new(json!({"xs": {"$size": 2}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "(value.xs.length === 2)");
        let s = Selector::new(json!({"n": {"$mod": [4, 1]}}));
        let js = s.to_js_predicate(&JsExpr::ident("value"));
        assert_eq!(js.to_string(), "((value.n % 4) === 1)");
    }

    #[test]
    fn test_js_predicate_where_alongside_regex() {
        // every clause of a mixed selector survives into the predicate
        let s = Selector::new(json!({"$where": "this.active", "tags": {"$regex": "^a"}}));
        let js = s.to_js_predicate(&JsExpr::ident("value")).to_string();
        assert!(js.contains("(this.active)"));
        assert!(js.contains("RegExp(\"^a\").test(value.tags)"));
    }
}
