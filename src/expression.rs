// src/expression.rs
// Aggregation expressions and the accumulator (group operator) family
//
// Expressions are pure descriptions in MongoDB aggregation-expression
// shape. Accumulators are the operators that are only valid inside a
// $group stage; keeping them in their own type means no reference
// substitution can ever turn a group operator into a scalar one.

use crate::field::DocVar;
use crate::js::JsExpr;
use serde_json::{json, Value};

/// A document expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value
    Literal(Value),
    /// Document variable reference
    Var(DocVar),
    Add(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Mod(Box<Expression>, Box<Expression>),
    Eq(Box<Expression>, Box<Expression>),
    Neq(Box<Expression>, Box<Expression>),
    Lt(Box<Expression>, Box<Expression>),
    Lte(Box<Expression>, Box<Expression>),
    Gt(Box<Expression>, Box<Expression>),
    Gte(Box<Expression>, Box<Expression>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// if-then-else
    Cond(Box<Expression>, Box<Expression>, Box<Expression>),
    IfNull(Box<Expression>, Box<Expression>),
    Concat(Vec<Expression>),
    Size(Box<Expression>),
}

impl Expression {
    pub fn literal(value: Value) -> Expression {
        Expression::Literal(value)
    }

    pub fn var(v: DocVar) -> Expression {
        Expression::Var(v)
    }

    /// Uniform bottom-up map: children are rewritten first, then the
    /// rebuilt node is passed to `f`.
    pub fn map_up(&self, f: &mut impl FnMut(Expression) -> Expression) -> Expression {
        let rebuilt = match self {
            Expression::Literal(_) | Expression::Var(_) => self.clone(),
            Expression::Add(a, b) => {
                Expression::Add(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Subtract(a, b) => {
                Expression::Subtract(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Multiply(a, b) => {
                Expression::Multiply(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Divide(a, b) => {
                Expression::Divide(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Mod(a, b) => {
                Expression::Mod(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Eq(a, b) => Expression::Eq(Box::new(a.map_up(f)), Box::new(b.map_up(f))),
            Expression::Neq(a, b) => {
                Expression::Neq(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Lt(a, b) => Expression::Lt(Box::new(a.map_up(f)), Box::new(b.map_up(f))),
            Expression::Lte(a, b) => {
                Expression::Lte(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Gt(a, b) => Expression::Gt(Box::new(a.map_up(f)), Box::new(b.map_up(f))),
            Expression::Gte(a, b) => {
                Expression::Gte(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::And(es) => Expression::And(es.iter().map(|e| e.map_up(f)).collect()),
            Expression::Or(es) => Expression::Or(es.iter().map(|e| e.map_up(f)).collect()),
            Expression::Not(e) => Expression::Not(Box::new(e.map_up(f))),
            Expression::Cond(p, t, e) => Expression::Cond(
                Box::new(p.map_up(f)),
                Box::new(t.map_up(f)),
                Box::new(e.map_up(f)),
            ),
            Expression::IfNull(a, b) => {
                Expression::IfNull(Box::new(a.map_up(f)), Box::new(b.map_up(f)))
            }
            Expression::Concat(es) => {
                Expression::Concat(es.iter().map(|e| e.map_up(f)).collect())
            }
            Expression::Size(e) => Expression::Size(Box::new(e.map_up(f))),
        };
        f(rebuilt)
    }

    /// Apply a partial DocVar substitution to every variable reference.
    /// Variables outside the substitution's domain are left unchanged.
    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Expression {
        self.map_up(&mut |e| match e {
            Expression::Var(v) => match f(&v) {
                Some(v2) => Expression::Var(v2),
                None => Expression::Var(v),
            },
            other => other,
        })
    }

    fn collect_vars(&self, acc: &mut Vec<DocVar>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Var(v) => acc.push(v.clone()),
            Expression::Add(a, b)
            | Expression::Subtract(a, b)
            | Expression::Multiply(a, b)
            | Expression::Divide(a, b)
            | Expression::Mod(a, b)
            | Expression::Eq(a, b)
            | Expression::Neq(a, b)
            | Expression::Lt(a, b)
            | Expression::Lte(a, b)
            | Expression::Gt(a, b)
            | Expression::Gte(a, b)
            | Expression::IfNull(a, b) => {
                a.collect_vars(acc);
                b.collect_vars(acc);
            }
            Expression::And(es) | Expression::Or(es) | Expression::Concat(es) => {
                for e in es {
                    e.collect_vars(acc);
                }
            }
            Expression::Not(e) | Expression::Size(e) => e.collect_vars(acc),
            Expression::Cond(p, t, e) => {
                p.collect_vars(acc);
                t.collect_vars(acc);
                e.collect_vars(acc);
            }
        }
    }

    /// Every variable referenced by this expression, in traversal order
    pub fn referenced_vars(&self) -> Vec<DocVar> {
        let mut acc = Vec::new();
        self.collect_vars(&mut acc);
        acc
    }

    /// Render to aggregation-expression JSON.
    ///
    /// String literals are guarded with $literal so they can't be
    /// mistaken for field references.
    pub fn to_value(&self) -> Value {
        fn op2(name: &str, a: &Expression, b: &Expression) -> Value {
            json!({ name: [a.to_value(), b.to_value()] })
        }
        fn opn(name: &str, es: &[Expression]) -> Value {
            json!({ name: es.iter().map(|e| e.to_value()).collect::<Vec<_>>() })
        }
        match self {
            Expression::Literal(v) => match v {
                Value::String(_) => json!({ "$literal": v }),
                other => other.clone(),
            },
            Expression::Var(v) => Value::String(v.to_ref_string()),
            Expression::Add(a, b) => op2("$add", a, b),
            Expression::Subtract(a, b) => op2("$subtract", a, b),
            Expression::Multiply(a, b) => op2("$multiply", a, b),
            Expression::Divide(a, b) => op2("$divide", a, b),
            Expression::Mod(a, b) => op2("$mod", a, b),
            Expression::Eq(a, b) => op2("$eq", a, b),
            Expression::Neq(a, b) => op2("$ne", a, b),
            Expression::Lt(a, b) => op2("$lt", a, b),
            Expression::Lte(a, b) => op2("$lte", a, b),
            Expression::Gt(a, b) => op2("$gt", a, b),
            Expression::Gte(a, b) => op2("$gte", a, b),
            Expression::And(es) => opn("$and", es),
            Expression::Or(es) => opn("$or", es),
            Expression::Not(e) => json!({ "$not": [e.to_value()] }),
            Expression::Cond(p, t, e) => {
                json!({ "$cond": [p.to_value(), t.to_value(), e.to_value()] })
            }
            Expression::IfNull(a, b) => op2("$ifNull", a, b),
            Expression::Concat(es) => opn("$concat", es),
            Expression::Size(e) => json!({ "$size": e.to_value() }),
        }
    }

    /// Translate to the JS subset, reading variables off `input`.
    ///
    /// Partial: returns None for expressions with no direct JS rendering
    /// (conditionals and null-coalescing don't fit the statement subset).
    pub fn to_js(&self, input: &JsExpr) -> Option<JsExpr> {
        fn bin(
            op: &str,
            a: &Expression,
            b: &Expression,
            input: &JsExpr,
        ) -> Option<JsExpr> {
            Some(JsExpr::binop(op, a.to_js(input)?, b.to_js(input)?))
        }
        match self {
            Expression::Literal(v) => Some(JsExpr::Literal(v.clone())),
            Expression::Var(v) => Some(JsExpr::select_path(input.clone(), v)),
            Expression::Add(a, b) => bin("+", a, b, input),
            Expression::Subtract(a, b) => bin("-", a, b, input),
            Expression::Multiply(a, b) => bin("*", a, b, input),
            Expression::Divide(a, b) => bin("/", a, b, input),
            Expression::Mod(a, b) => bin("%", a, b, input),
            Expression::Eq(a, b) => bin("===", a, b, input),
            Expression::Neq(a, b) => bin("!==", a, b, input),
            Expression::Lt(a, b) => bin("<", a, b, input),
            Expression::Lte(a, b) => bin("<=", a, b, input),
            Expression::Gt(a, b) => bin(">", a, b, input),
            Expression::Gte(a, b) => bin(">=", a, b, input),
            Expression::And(es) => {
                let mut parts = es.iter().map(|e| e.to_js(input));
                let first = parts.next()??;
                parts.try_fold(first, |acc, e| Some(JsExpr::binop("&&", acc, e?)))
            }
            Expression::Or(es) => {
                let mut parts = es.iter().map(|e| e.to_js(input));
                let first = parts.next()??;
                parts.try_fold(first, |acc, e| Some(JsExpr::binop("||", acc, e?)))
            }
            Expression::Concat(es) => {
                let mut parts = es.iter().map(|e| e.to_js(input));
                let first = parts.next()??;
                parts.try_fold(first, |acc, e| Some(JsExpr::binop("+", acc, e?)))
            }
            Expression::Size(e) => Some(JsExpr::select(e.to_js(input)?, "length")),
            Expression::Not(_) | Expression::Cond(_, _, _) | Expression::IfNull(_, _) => None,
        }
    }
}

/// Accumulators: the operators that are only valid inside a $group
/// stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Push(Expression),
    AddToSet(Expression),
    First(Expression),
    Last(Expression),
    Max(Expression),
    Min(Expression),
}

impl Accumulator {
    pub fn expression(&self) -> &Expression {
        match self {
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::Push(e)
            | Accumulator::AddToSet(e)
            | Accumulator::First(e)
            | Accumulator::Last(e)
            | Accumulator::Max(e)
            | Accumulator::Min(e) => e,
        }
    }

    /// Rewrite the inner expression's references. The result is always
    /// another accumulator of the same operator.
    pub fn rewrite_refs(&self, f: &dyn Fn(&DocVar) -> Option<DocVar>) -> Accumulator {
        self.map_expression(|e| e.rewrite_refs(f))
    }

    /// Apply an expression rewrite to the operand, preserving the operator
    pub fn map_expression(&self, f: impl FnOnce(&Expression) -> Expression) -> Accumulator {
        match self {
            Accumulator::Sum(e) => Accumulator::Sum(f(e)),
            Accumulator::Avg(e) => Accumulator::Avg(f(e)),
            Accumulator::Push(e) => Accumulator::Push(f(e)),
            Accumulator::AddToSet(e) => Accumulator::AddToSet(f(e)),
            Accumulator::First(e) => Accumulator::First(f(e)),
            Accumulator::Last(e) => Accumulator::Last(f(e)),
            Accumulator::Max(e) => Accumulator::Max(f(e)),
            Accumulator::Min(e) => Accumulator::Min(f(e)),
        }
    }

    pub fn referenced_vars(&self) -> Vec<DocVar> {
        self.expression().referenced_vars()
    }

    pub fn operator_name(&self) -> &'static str {
        match self {
            Accumulator::Sum(_) => "$sum",
            Accumulator::Avg(_) => "$avg",
            Accumulator::Push(_) => "$push",
            Accumulator::AddToSet(_) => "$addToSet",
            Accumulator::First(_) => "$first",
            Accumulator::Last(_) => "$last",
            Accumulator::Max(_) => "$max",
            Accumulator::Min(_) => "$min",
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ self.operator_name(): self.expression().to_value() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::JsExpr;

    fn var(path: &str) -> Expression {
        Expression::Var(DocVar::parse(path))
    }

    #[test]
    fn test_map_up_bottom_up_order() {
        // rewrite leaves, then make sure the composite node sees rebuilt children
        let e = Expression::Add(Box::new(var("a")), Box::new(var("b")));
        let rewritten = e.map_up(&mut |e| match e {
            Expression::Var(_) => Expression::Literal(json!(1)),
            other => other,
        });
        assert_eq!(
            rewritten,
            Expression::Add(
                Box::new(Expression::Literal(json!(1))),
                Box::new(Expression::Literal(json!(1)))
            )
        );
    }

    #[test]
    fn test_rewrite_refs_partial() {
        let e = Expression::Add(Box::new(var("a")), Box::new(var("b")));
        let base = DocVar::field("lEft");
        let rewritten = e.rewrite_refs(&|v| {
            if v == &DocVar::field("a") {
                Some(base.concat(v))
            } else {
                None
            }
        });
        assert_eq!(
            rewritten.referenced_vars(),
            vec![DocVar::parse("lEft.a"), DocVar::parse("b")]
        );
    }

    #[test]
    fn test_referenced_vars_order() {
        let e = Expression::Cond(
            Box::new(var("p")),
            Box::new(var("t")),
            Box::new(var("e")),
        );
        assert_eq!(
            e.referenced_vars(),
            vec![DocVar::field("p"), DocVar::field("t"), DocVar::field("e")]
        );
    }

    #[test]
    fn test_to_value_var() {
        assert_eq!(var("address.city").to_value(), json!("$address.city"));
        assert_eq!(Expression::Var(DocVar::root()).to_value(), json!("$$ROOT"));
    }

    #[test]
    fn test_to_value_string_literal_guarded() {
        let e = Expression::Literal(json!("$looks_like_a_ref"));
        assert_eq!(e.to_value(), json!({"$literal": "$looks_like_a_ref"}));
        // numbers render bare
        assert_eq!(Expression::Literal(json!(5)).to_value(), json!(5));
    }

    #[test]
    fn test_to_value_add() {
        let e = Expression::Add(Box::new(var("a")), Box::new(Expression::Literal(json!(1))));
        assert_eq!(e.to_value(), json!({"$add": ["$a", 1]}));
    }

    #[test]
    fn test_to_js_arithmetic() {
        let e = Expression::Multiply(Box::new(var("price")), Box::new(var("qty")));
        let js = e.to_js(&JsExpr::ident("value")).unwrap();
        assert_eq!(js.to_string(), "(value.price * value.qty)");
    }

    #[test]
    fn test_to_js_partial() {
        let e = Expression::IfNull(Box::new(var("a")), Box::new(Expression::Literal(json!(0))));
        assert!(e.to_js(&JsExpr::ident("value")).is_none());
    }

    #[test]
    fn test_accumulator_rewrite_preserves_operator() {
        let acc = Accumulator::Sum(var("amount"));
        let rewritten = acc.rewrite_refs(&|v| Some(DocVar::field("rIght").concat(v)));
        assert_eq!(rewritten, Accumulator::Sum(var("rIght.amount")));
        assert_eq!(rewritten.operator_name(), "$sum");
    }

    #[test]
    fn test_accumulator_to_value() {
        let acc = Accumulator::Avg(var("order.total"));
        assert_eq!(acc.to_value(), json!({"$avg": "$order.total"}));
    }
}
