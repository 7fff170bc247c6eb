//! Nested array structures ("trees") and their flattening.
//!
//! The transform API accepts arbitrarily nested structures of arrays;
//! each call flattens them to a leaf list plus a structure descriptor,
//! runs the flat core, and unflattens outputs by the recorded structure.

use crate::array::Array;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// An arbitrarily nested structure of arrays.
#[derive(Debug, Clone)]
pub enum Tree {
    /// A single array
    Leaf(Array),
    /// An ordered sequence of subtrees
    List(Vec<Tree>),
    /// A string-keyed mapping of subtrees (ordered by key)
    Map(BTreeMap<String, Tree>),
}

/// Structure descriptor recorded while flattening a [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeDef {
    /// A leaf position
    Leaf,
    /// A list with the given child structures
    List(Vec<TreeDef>),
    /// A map with the given keys and child structures
    Map(Vec<(String, TreeDef)>),
}

impl Tree {
    /// Flatten to a leaf list and a structure descriptor.
    pub fn flatten(&self) -> (Vec<Array>, TreeDef) {
        let mut leaves = Vec::new();
        let def = self.flatten_into(&mut leaves);
        (leaves, def)
    }

    fn flatten_into(&self, leaves: &mut Vec<Array>) -> TreeDef {
        match self {
            Tree::Leaf(a) => {
                leaves.push(a.clone());
                TreeDef::Leaf
            }
            Tree::List(items) => {
                TreeDef::List(items.iter().map(|t| t.flatten_into(leaves)).collect())
            }
            Tree::Map(items) => TreeDef::Map(
                items
                    .iter()
                    .map(|(k, t)| (k.clone(), t.flatten_into(leaves)))
                    .collect(),
            ),
        }
    }
}

impl TreeDef {
    /// Number of leaves in the structure.
    pub fn num_leaves(&self) -> usize {
        match self {
            TreeDef::Leaf => 1,
            TreeDef::List(items) => items.iter().map(TreeDef::num_leaves).sum(),
            TreeDef::Map(items) => items.iter().map(|(_, t)| t.num_leaves()).sum(),
        }
    }

    /// Rebuild a tree from a flat leaf list.
    pub fn unflatten(&self, leaves: Vec<Array>) -> Result<Tree> {
        if leaves.len() != self.num_leaves() {
            return Err(Error::TreeMismatch(format!(
                "structure has {} leaves but {} were provided",
                self.num_leaves(),
                leaves.len()
            )));
        }
        let mut iter = leaves.into_iter();
        Ok(self.build(&mut iter))
    }

    fn build(&self, leaves: &mut impl Iterator<Item = Array>) -> Tree {
        match self {
            TreeDef::Leaf => Tree::Leaf(leaves.next().expect("leaf count checked")),
            TreeDef::List(items) => {
                Tree::List(items.iter().map(|t| t.build(leaves)).collect())
            }
            TreeDef::Map(items) => Tree::Map(
                items
                    .iter()
                    .map(|(k, t)| (k.clone(), t.build(leaves)))
                    .collect(),
            ),
        }
    }

    /// Check two structures for equality, reporting the first diverging
    /// path in the error message.
    pub fn check_matches(&self, other: &TreeDef) -> Result<()> {
        fn walk(a: &TreeDef, b: &TreeDef, path: &str) -> Result<()> {
            match (a, b) {
                (TreeDef::Leaf, TreeDef::Leaf) => Ok(()),
                (TreeDef::List(xs), TreeDef::List(ys)) => {
                    if xs.len() != ys.len() {
                        return Err(Error::TreeMismatch(format!(
                            "at {}: list of {} vs list of {}",
                            path,
                            xs.len(),
                            ys.len()
                        )));
                    }
                    for (i, (x, y)) in xs.iter().zip(ys).enumerate() {
                        walk(x, y, &format!("{}[{}]", path, i))?;
                    }
                    Ok(())
                }
                (TreeDef::Map(xs), TreeDef::Map(ys)) => {
                    let xk: Vec<_> = xs.iter().map(|(k, _)| k.as_str()).collect();
                    let yk: Vec<_> = ys.iter().map(|(k, _)| k.as_str()).collect();
                    if xk != yk {
                        return Err(Error::TreeMismatch(format!(
                            "at {}: keys {:?} vs {:?}",
                            path, xk, yk
                        )));
                    }
                    for ((k, x), (_, y)) in xs.iter().zip(ys) {
                        walk(x, y, &format!("{}.{}", path, k))?;
                    }
                    Ok(())
                }
                _ => Err(Error::TreeMismatch(format!(
                    "at {}: {} vs {}",
                    path,
                    a.kind(),
                    b.kind()
                ))),
            }
        }
        walk(self, other, "$")
    }

    fn kind(&self) -> &'static str {
        match self {
            TreeDef::Leaf => "leaf",
            TreeDef::List(_) => "list",
            TreeDef::Map(_) => "map",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Shape};

    fn leaf(v: f32) -> Tree {
        Tree::Leaf(Array::full(v, Shape::scalar(), DType::Float32))
    }

    #[test]
    fn test_flatten_unflatten_roundtrip() {
        let tree = Tree::List(vec![
            leaf(1.0),
            Tree::List(vec![leaf(2.0), leaf(3.0)]),
            Tree::Map(BTreeMap::from([
                ("a".to_string(), leaf(4.0)),
                ("b".to_string(), leaf(5.0)),
            ])),
        ]);
        let (leaves, def) = tree.flatten();
        assert_eq!(leaves.len(), 5);
        assert_eq!(def.num_leaves(), 5);
        let rebuilt = def.unflatten(leaves).unwrap();
        let (again, def2) = rebuilt.flatten();
        assert_eq!(def, def2);
        assert_eq!(again.len(), 5);
    }

    #[test]
    fn test_mismatch_names_path() {
        let a = Tree::List(vec![leaf(1.0), Tree::List(vec![leaf(2.0)])]);
        let b = Tree::List(vec![leaf(1.0), leaf(2.0)]);
        let (_, da) = a.flatten();
        let (_, db) = b.flatten();
        let err = da.check_matches(&db).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("$[1]"), "message was: {}", msg);
        assert!(msg.contains("list") && msg.contains("leaf"));
    }

    #[test]
    fn test_unflatten_wrong_leaf_count() {
        let (leaves, def) = Tree::List(vec![leaf(1.0), leaf(2.0)]).flatten();
        let mut short = leaves;
        short.pop();
        assert!(matches!(
            def.unflatten(short),
            Err(Error::TreeMismatch(_))
        ));
    }
}
