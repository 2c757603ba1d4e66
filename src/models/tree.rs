use diesel::{prelude::*, result::Error as DbError};
use failure::Fail;
use serde::{Deserialize, Serialize};

use std::collections::{HashMap, HashSet};

use crate::db::{Connection, models as db, schema::trees};

/// Table of contents of a binder as submitted, before any referenced module
/// exists. Stored in the pending binder's metadata and resolved to module
/// rows at commit time.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeSpec {
    /// Reference to a document, by ident-hash.
    Document {
        id: String,
        title: String,
        #[serde(default = "default_latest")]
        latest: bool,
    },
    /// Titled sub-grouping carrying no document reference.
    Subcollection {
        title: String,
        contents: Vec<NodeSpec>,
    },
}

fn default_latest() -> bool {
    true
}

/// A committed collection tree, loaded into memory.
///
/// Cascade discovery and tree rebuilding both work on this structure rather
/// than on recursive SQL, so they can be tested without a database.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tree {
    pub root: Node,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    /// Module this node references. `None` for subcollection placeholders.
    pub module: Option<i32>,
    pub title: Option<String>,
    /// Whether this node tracks the newest version of its module. Unflagged
    /// nodes are deliberate version pins and are never rewritten.
    pub latest: bool,
    pub children: Vec<Node>,
}

impl Tree {
    /// Rebuild a tree from its flat rows.
    ///
    /// Rows are grouped by parent, ordered by `child_order` within each
    /// group, and walked depth-first. A visited set guards against
    /// accidental self-reference, even though well-formed data has none.
    pub fn from_rows(rows: &[db::TreeNode]) -> Result<Tree, TreeError> {
        let mut children = HashMap::new();
        let mut root = None;

        for row in rows {
            match row.parent {
                Some(parent) => children
                    .entry(parent)
                    .or_insert_with(Vec::new)
                    .push(row),
                None => {
                    if root.replace(row).is_some() {
                        return Err(TreeError::MultipleRoots);
                    }
                }
            }
        }

        for group in children.values_mut() {
            group.sort_by_key(|row| row.child_order);
        }

        let root = root.ok_or(TreeError::NoRoot)?;
        let mut visited = HashSet::new();

        Ok(Tree {
            root: build_node(root, &children, &mut visited)?,
        })
    }

    /// Load the uncollated or collated tree of a module, if one exists.
    pub fn load(conn: &Connection, module_ident: i32, is_collated: bool)
    -> Result<Option<Tree>, TreeError> {
        let rows = load_rows(conn, module_ident, is_collated)?;

        if rows.is_empty() {
            return Ok(None);
        }

        Tree::from_rows(&rows).map(Some)
    }

    /// Substitute module references through `map` at every node flagged
    /// `latest`, and unconditionally at the root (which names the collection
    /// version itself). Pinned nodes keep their original reference.
    pub fn rewrite(&self, map: &HashMap<i32, i32>) -> Tree {
        Tree {
            root: rewrite_node(&self.root, map, true),
        }
    }

    /// Module idents referenced anywhere in this tree, root included.
    pub fn modules(&self) -> Vec<i32> {
        let mut modules = Vec::new();
        collect_modules(&self.root, &mut modules);
        modules
    }

    /// Persist this tree as a fresh set of rows, depth-first, preserving
    /// sibling order. Every node is assigned a new id.
    pub fn write(&self, conn: &Connection, is_collated: bool)
    -> Result<(), DbError> {
        write_node(conn, &self.root, None, 0, is_collated)?;
        Ok(())
    }

    /// Remove a module's collated tree. Baking calls this before writing the
    /// replacement, so only one collated tree ever exists per version.
    pub fn delete_collated(conn: &Connection, module_ident: i32)
    -> Result<(), DbError> {
        // Deleting the root cascades to the rest of the tree.
        diesel::delete(trees::table
            .filter(trees::module.eq(module_ident))
            .filter(trees::parent.is_null())
            .filter(trees::is_collated.eq(true)))
            .execute(conn)?;
        Ok(())
    }
}

/// Fetch all rows of one tree, level by level from the root.
fn load_rows(conn: &Connection, module_ident: i32, is_collated: bool)
-> Result<Vec<db::TreeNode>, TreeError> {
    let root = trees::table
        .filter(trees::module.eq(module_ident))
        .filter(trees::parent.is_null())
        .filter(trees::is_collated.eq(is_collated))
        .get_result::<db::TreeNode>(conn)
        .optional()?;

    let root = match root {
        Some(root) => root,
        None => return Ok(Vec::new()),
    };

    let mut seen = HashSet::new();
    seen.insert(root.nodeid);

    let mut frontier = vec![root.nodeid];
    let mut rows = vec![root];

    while !frontier.is_empty() {
        let children = trees::table
            .filter(trees::parent.eq_any(&frontier))
            .get_results::<db::TreeNode>(conn)?;

        frontier.clear();

        for child in children {
            if !seen.insert(child.nodeid) {
                return Err(TreeError::Cycle(child.nodeid));
            }
            frontier.push(child.nodeid);
            rows.push(child);
        }
    }

    Ok(rows)
}

fn build_node<'a>(
    row: &db::TreeNode,
    children: &HashMap<i32, Vec<&'a db::TreeNode>>,
    visited: &mut HashSet<i32>,
) -> Result<Node, TreeError> {
    if !visited.insert(row.nodeid) {
        return Err(TreeError::Cycle(row.nodeid));
    }

    let child_nodes = children.get(&row.nodeid)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .map(|child| build_node(child, children, visited))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Node {
        module: row.module,
        title: row.title.clone(),
        latest: row.latest,
        children: child_nodes,
    })
}

fn rewrite_node(node: &Node, map: &HashMap<i32, i32>, is_root: bool) -> Node {
    let module = match node.module {
        Some(old) if node.latest || is_root =>
            Some(map.get(&old).cloned().unwrap_or(old)),
        other => other,
    };

    Node {
        module,
        title: node.title.clone(),
        latest: node.latest,
        children: node.children
            .iter()
            .map(|child| rewrite_node(child, map, false))
            .collect(),
    }
}

fn collect_modules(node: &Node, modules: &mut Vec<i32>) {
    if let Some(module) = node.module {
        modules.push(module);
    }
    for child in &node.children {
        collect_modules(child, modules);
    }
}

fn write_node(
    conn: &Connection,
    node: &Node,
    parent: Option<i32>,
    child_order: i32,
    is_collated: bool,
) -> Result<i32, DbError> {
    let row = diesel::insert_into(trees::table)
        .values(&db::NewTreeNode {
            parent,
            module: node.module,
            title: node.title.as_ref().map(String::as_str),
            child_order,
            latest: node.latest,
            is_collated,
        })
        .get_result::<db::TreeNode>(conn)?;

    for (index, child) in node.children.iter().enumerate() {
        write_node(conn, child, Some(row.nodeid), index as i32, is_collated)?;
    }

    Ok(row.nodeid)
}

#[derive(Debug, Fail)]
pub enum TreeError {
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// No row without a parent was found.
    #[fail(display = "Tree has no root node")]
    NoRoot,
    /// More than one row without a parent was found.
    #[fail(display = "Tree has multiple root nodes")]
    MultipleRoots,
    /// A node is reachable from itself.
    #[fail(display = "Tree contains a cycle through node {}", _0)]
    Cycle(i32),
}

impl_from! { for TreeError ;
    DbError => |e| TreeError::Database(e),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        nodeid: i32,
        parent: Option<i32>,
        module: Option<i32>,
        child_order: i32,
        latest: bool,
    ) -> db::TreeNode {
        db::TreeNode {
            nodeid,
            parent,
            module,
            title: None,
            child_order,
            latest,
            is_collated: false,
        }
    }

    #[test]
    fn builds_ordered_tree_from_rows() {
        // Rows deliberately out of order.
        let rows = vec![
            row(3, Some(1), Some(30), 1, true),
            row(1, None, Some(10), 0, true),
            row(2, Some(1), Some(20), 0, true),
            row(4, Some(3), None, 0, true),
        ];

        let tree = Tree::from_rows(&rows).unwrap();

        assert_eq!(tree.root.module, Some(10));
        assert_eq!(tree.root.children.len(), 2);
        assert_eq!(tree.root.children[0].module, Some(20));
        assert_eq!(tree.root.children[1].module, Some(30));
        assert_eq!(tree.root.children[1].children[0].module, None);
    }

    #[test]
    fn rejects_cycles() {
        let rows = vec![
            row(1, None, Some(10), 0, true),
            row(2, Some(1), Some(20), 0, true),
            row(3, Some(3), Some(30), 0, true),
        ];

        match Tree::from_rows(&rows) {
            Err(TreeError::Cycle(3)) => (),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_root() {
        let rows = vec![row(1, Some(2), Some(10), 0, true)];

        match Tree::from_rows(&rows) {
            Err(TreeError::Cycle(_)) | Err(TreeError::NoRoot) => (),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn rewrite_touches_latest_nodes_only() {
        let rows = vec![
            row(1, None, Some(10), 0, true),
            // Tracks latest, gets rewritten.
            row(2, Some(1), Some(20), 0, true),
            // Pinned to a specific version, left alone.
            row(3, Some(1), Some(20), 1, false),
        ];

        let tree = Tree::from_rows(&rows).unwrap();

        let mut map = HashMap::new();
        map.insert(10, 11);
        map.insert(20, 21);

        let rewritten = tree.rewrite(&map);

        assert_eq!(rewritten.root.module, Some(11));
        assert_eq!(rewritten.root.children[0].module, Some(21));
        assert_eq!(rewritten.root.children[1].module, Some(20));
    }

    #[test]
    fn rewrite_root_even_when_pinned() {
        let rows = vec![row(1, None, Some(10), 0, false)];
        let tree = Tree::from_rows(&rows).unwrap();

        let mut map = HashMap::new();
        map.insert(10, 11);

        assert_eq!(tree.rewrite(&map).root.module, Some(11));
    }

    #[test]
    fn rewrite_leaves_unmapped_nodes() {
        let rows = vec![
            row(1, None, Some(10), 0, true),
            row(2, Some(1), Some(20), 0, true),
        ];
        let tree = Tree::from_rows(&rows).unwrap();

        let rewritten = tree.rewrite(&HashMap::new());
        assert_eq!(rewritten, tree);
    }

    #[test]
    fn node_spec_shapes_deserialize() {
        let spec: Vec<NodeSpec> = serde_json::from_str(r#"[
            {"id": "91cb5f28-2b8a-4324-9373-dac1d617bc24@3", "title": "One"},
            {"title": "Part A", "contents": [
                {
                    "id": "b3a24b63-2762-42e9-b1d4-b073cbce6f1f@1",
                    "title": "Two",
                    "latest": false
                }
            ]}
        ]"#).unwrap();

        match &spec[0] {
            NodeSpec::Document { latest, .. } => assert!(*latest),
            other => panic!("expected document, got {:?}", other),
        }

        match &spec[1] {
            NodeSpec::Subcollection { title, contents } => {
                assert_eq!(title, "Part A");
                match &contents[0] {
                    NodeSpec::Document { latest, .. } => assert!(!*latest),
                    other => panic!("expected document, got {:?}", other),
                }
            }
            other => panic!("expected subcollection, got {:?}", other),
        }
    }
}
