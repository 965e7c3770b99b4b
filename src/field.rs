// src/field.rs
// Field paths and document variables
//
// A DocVar is a rooted path inside the current document: field names and
// array indices, dot-separated in the wire form ("address.city",
// "items.0.name"). The planner rewrites these paths; it never reads
// documents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Field label reserved for the merge algorithm's left branch.
pub const LEFT_LABEL: &str = "lEft";
/// Field label reserved for the merge algorithm's right branch.
pub const RIGHT_LABEL: &str = "rIght";
/// Field label reserved as the map-reduce value carrier.
pub const VALUE_LABEL: &str = "value";

/// Returns true for field labels that user input must not bind.
///
/// `value` is deliberately not included: it is a planner-produced carrier,
/// but a perfectly ordinary user field name.
pub fn is_reserved_label(name: &str) -> bool {
    name == LEFT_LABEL || name == RIGHT_LABEL
}

/// One step in a document path: a named field or an array index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathElem {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElem::Field(name) => write!(f, "{}", name),
            PathElem::Index(i) => write!(f, "{}", i),
        }
    }
}

/// A rooted document path. The empty path is the document root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocVar {
    elems: Vec<PathElem>,
}

impl DocVar {
    /// The document root
    pub fn root() -> DocVar {
        DocVar { elems: Vec::new() }
    }

    /// A single top-level field
    pub fn field(name: impl Into<String>) -> DocVar {
        DocVar {
            elems: vec![PathElem::Field(name.into())],
        }
    }

    /// A single array index
    pub fn index(i: usize) -> DocVar {
        DocVar {
            elems: vec![PathElem::Index(i)],
        }
    }

    /// Parse a dotted path ("address.city", "items.0.name").
    ///
    /// Numeric segments become indices, everything else a field name.
    /// An empty string is the root.
    pub fn parse(path: &str) -> DocVar {
        if path.is_empty() {
            return DocVar::root();
        }
        DocVar {
            elems: path
                .split('.')
                .map(|part| match part.parse::<usize>() {
                    Ok(i) => PathElem::Index(i),
                    Err(_) => PathElem::Field(part.to_string()),
                })
                .collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn elems(&self) -> &[PathElem] {
        &self.elems
    }

    /// First path element, if any
    pub fn head(&self) -> Option<&PathElem> {
        self.elems.first()
    }

    /// Path concatenation
    pub fn concat(&self, other: &DocVar) -> DocVar {
        let mut elems = self.elems.clone();
        elems.extend(other.elems.iter().cloned());
        DocVar { elems }
    }

    /// Extend with one field name
    pub fn push_field(&self, name: impl Into<String>) -> DocVar {
        let mut elems = self.elems.clone();
        elems.push(PathElem::Field(name.into()));
        DocVar { elems }
    }

    /// Prefix comparison: does `self` start with `prefix`?
    /// Every path starts with the root.
    pub fn starts_with(&self, prefix: &DocVar) -> bool {
        self.elems.len() >= prefix.elems.len()
            && self.elems[..prefix.elems.len()] == prefix.elems[..]
    }

    /// Remove a leading prefix, if present
    pub fn strip_prefix(&self, prefix: &DocVar) -> Option<DocVar> {
        if self.starts_with(prefix) {
            Some(DocVar {
                elems: self.elems[prefix.elems.len()..].to_vec(),
            })
        } else {
            None
        }
    }

    /// Two paths overlap when either is a prefix of the other.
    /// Used by unused-field pruning: an overlapping def cannot be dropped.
    pub fn overlaps(&self, other: &DocVar) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Dotted wire form without the `$` sigil ("a.b.0"); empty for root
    pub fn to_field_string(&self) -> String {
        self.elems
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// `$`-reference wire form ("$a.b.0"); `$$ROOT` for the root
    pub fn to_ref_string(&self) -> String {
        if self.is_root() {
            "$$ROOT".to_string()
        } else {
            format!("${}", self.to_field_string())
        }
    }
}

impl fmt::Display for DocVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ref_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let v = DocVar::parse("address.city");
        assert_eq!(v.elems().len(), 2);
        assert_eq!(v.to_field_string(), "address.city");
    }

    #[test]
    fn test_parse_index() {
        let v = DocVar::parse("items.0.name");
        assert_eq!(v.elems()[1], PathElem::Index(0));
        assert_eq!(v.to_field_string(), "items.0.name");
    }

    #[test]
    fn test_root() {
        let root = DocVar::root();
        assert!(root.is_root());
        assert_eq!(root.to_ref_string(), "$$ROOT");
        assert_eq!(DocVar::parse(""), root);
    }

    #[test]
    fn test_concat() {
        let base = DocVar::field("lEft");
        let sub = DocVar::parse("address.city");
        assert_eq!(base.concat(&sub).to_field_string(), "lEft.address.city");
        // root is the identity on both sides
        assert_eq!(base.concat(&DocVar::root()), base);
        assert_eq!(DocVar::root().concat(&base), base);
    }

    #[test]
    fn test_starts_with() {
        let v = DocVar::parse("a.b.c");
        assert!(v.starts_with(&DocVar::parse("a.b")));
        assert!(v.starts_with(&DocVar::root()));
        assert!(v.starts_with(&v));
        assert!(!v.starts_with(&DocVar::parse("a.c")));
        assert!(!DocVar::parse("a").starts_with(&v));
    }

    #[test]
    fn test_strip_prefix() {
        let v = DocVar::parse("lEft.total");
        assert_eq!(
            v.strip_prefix(&DocVar::field("lEft")),
            Some(DocVar::field("total"))
        );
        assert_eq!(v.strip_prefix(&DocVar::field("rIght")), None);
    }

    #[test]
    fn test_overlaps() {
        let a = DocVar::parse("a.b");
        assert!(a.overlaps(&DocVar::parse("a")));
        assert!(a.overlaps(&DocVar::parse("a.b.c")));
        assert!(!a.overlaps(&DocVar::parse("b")));
    }

    #[test]
    fn test_reserved_labels() {
        assert!(is_reserved_label("lEft"));
        assert!(is_reserved_label("rIght"));
        assert!(!is_reserved_label("left"));
        assert!(!is_reserved_label("value"));
    }

    #[test]
    fn test_ref_string() {
        assert_eq!(DocVar::parse("a.b").to_ref_string(), "$a.b");
    }
}
