// src/render.rs
// Labeled debug trees for workflow ops

use crate::stage::GroupBy;
use crate::workflow::Workflow;
use std::fmt;
use std::sync::Arc;

/// A labeled tree: node type plus interesting per-op details, with the
/// source ops as children
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTree {
    pub label: String,
    pub children: Vec<RenderedTree>,
}

impl RenderedTree {
    pub fn leaf(label: impl Into<String>) -> RenderedTree {
        RenderedTree {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn node(label: impl Into<String>, children: Vec<RenderedTree>) -> RenderedTree {
        RenderedTree {
            label: label.into(),
            children,
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(depth), self.label)?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for RenderedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Render an op graph as a labeled tree
pub fn render(op: &Arc<Workflow>) -> RenderedTree {
    match &**op {
        Workflow::Pure(v) => RenderedTree::leaf(format!("Pure({})", v)),
        Workflow::Read(c) => RenderedTree::leaf(format!("Read({})", c.name())),
        Workflow::Match { src, selector } => RenderedTree::node(
            format!("Match({})", selector.to_json()),
            vec![render(src)],
        ),
        Workflow::Sort { src, keys } => {
            let keys: Vec<String> = keys
                .iter()
                .map(|(v, dir)| format!("{} {:?}", v.to_field_string(), dir))
                .collect();
            RenderedTree::node(format!("Sort({})", keys.join(", ")), vec![render(src)])
        }
        Workflow::Limit { src, count } => {
            RenderedTree::node(format!("Limit({})", count), vec![render(src)])
        }
        Workflow::Skip { src, count } => {
            RenderedTree::node(format!("Skip({})", count), vec![render(src)])
        }
        Workflow::Project { src, shape } => RenderedTree::node(
            format!("Project({})", shape.to_value()),
            vec![render(src)],
        ),
        Workflow::Redact { src, expr } => RenderedTree::node(
            format!("Redact({})", expr.to_value()),
            vec![render(src)],
        ),
        Workflow::Unwind { src, field } => {
            RenderedTree::node(format!("Unwind({})", field), vec![render(src)])
        }
        Workflow::Group { src, grouped, by } => {
            let by = match by {
                GroupBy::Expr(e) => e.to_value().to_string(),
                GroupBy::Shape(r) => r.to_value().to_string(),
            };
            let fields: Vec<String> = grouped
                .0
                .iter()
                .map(|(name, acc)| format!("{}: {}", name, acc.to_value()))
                .collect();
            RenderedTree::node(
                format!("Group(by {}; {})", by, fields.join(", ")),
                vec![render(src)],
            )
        }
        Workflow::GeoNear { src, geo_near } => RenderedTree::node(
            format!("GeoNear({})", geo_near.to_value()),
            vec![render(src)],
        ),
        Workflow::Map { src, func } => {
            RenderedTree::node(format!("Map({})", func.fn_expr()), vec![render(src)])
        }
        Workflow::FlatMap { src, func } => {
            RenderedTree::node(format!("FlatMap({})", func.fn_expr()), vec![render(src)])
        }
        Workflow::Reduce { src, func } => {
            RenderedTree::node(format!("Reduce({})", func.fn_expr()), vec![render(src)])
        }
        Workflow::FoldLeft { head, tails } => {
            let mut children = vec![render(head)];
            children.extend(tails.iter().map(render));
            RenderedTree::node("FoldLeft", children)
        }
        Workflow::Join { sources } => {
            RenderedTree::node("Join", sources.iter().map(render).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;
    use crate::workflow::Collection;
    use serde_json::json;

    #[test]
    fn test_render_chain() {
        let w = Workflow::limit(
            Workflow::match_with(
                Workflow::read(Collection::new("users")),
                Selector::new(json!({"active": true})),
            ),
            10,
        );
        let tree = render(&w);
        assert!(tree.label.starts_with("Limit"));
        assert!(tree.children[0].label.starts_with("Match"));
        assert_eq!(tree.children[0].children[0].label, "Read(users)");
    }

    #[test]
    fn test_display_indents() {
        let w = Workflow::limit(Workflow::read(Collection::new("c")), 1);
        let out = render(&w).to_string();
        assert_eq!(out, "Limit(1)\n  Read(c)\n");
    }
}
