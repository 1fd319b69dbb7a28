//! Assembly of the flat rows returned by the recursive node query into the
//! reply tree.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use orgd_schemas::{Node, NodeTreeItem};

/// Build the reply tree from rows ordered `(parent, name)`.
///
/// Single pass over the rows attaches every row whose parent has already
/// been seen; the ordering usually delivers parents first but does not
/// guarantee it, so stragglers wait in `pending` and are attached in a
/// second pass. Children keep their attachment order under each parent,
/// which preserves the SQL name ordering.
pub fn assemble_tree(rows: Vec<Node>) -> NodeTreeItem {
    // Edge lists keyed by parent id; None is the synthetic root.
    let mut edges: HashMap<Option<Uuid>, Vec<Uuid>> = HashMap::new();
    let mut nodes: HashMap<Uuid, Node> = HashMap::new();
    let mut pending: Vec<Uuid> = Vec::new();

    for node in rows {
        let id = node.uuid;
        let attachable = match node.parent {
            None => true,
            Some(parent) => nodes.contains_key(&parent),
        };
        let parent = node.parent;
        nodes.insert(id, node);
        if attachable {
            edges.entry(parent).or_default().push(id);
        } else {
            pending.push(id);
        }
    }

    // Every pending row's parent has been seen by now; link the stragglers.
    for id in pending {
        let parent = nodes[&id].parent;
        match parent {
            Some(p) if nodes.contains_key(&p) => {
                edges.entry(Some(p)).or_default().push(id);
            }
            _ => {
                // Parent missing from the result set entirely; drop the row
                // rather than hand out an unattachable child.
                warn!("node {id} references an unknown parent; skipping");
                nodes.remove(&id);
            }
        }
    }

    let children = edges.remove(&None).unwrap_or_default();
    NodeTreeItem {
        node: None,
        children: children
            .into_iter()
            .map(|id| build_item(id, &mut nodes, &mut edges))
            .collect(),
    }
}

fn build_item(
    id: Uuid,
    nodes: &mut HashMap<Uuid, Node>,
    edges: &mut HashMap<Option<Uuid>, Vec<Uuid>>,
) -> NodeTreeItem {
    let node = nodes.remove(&id).expect("attached id has a node row");
    let children = edges.remove(&Some(id)).unwrap_or_default();
    NodeTreeItem {
        node: Some(node),
        children: children
            .into_iter()
            .map(|child| build_item(child, nodes, edges))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgd_schemas::NodeKind;

    fn node(name: &str, parent: Option<Uuid>) -> Node {
        Node {
            uuid: Uuid::new_v4(),
            user: Uuid::nil(),
            name: name.to_string(),
            kind: NodeKind::Folder,
            descr: None,
            active: true,
            parent,
            version: 0,
        }
    }

    fn names(item: &NodeTreeItem) -> Vec<String> {
        item.children
            .iter()
            .map(|c| c.node.as_ref().unwrap().name.clone())
            .collect()
    }

    #[test]
    fn empty_rows_yield_bare_root() {
        let tree = assemble_tree(Vec::new());
        assert!(tree.node.is_none());
        assert!(tree.children.is_empty());
    }

    #[test]
    fn parent_first_rows_build_nested_tree() {
        let home = node("Home", None);
        let work = node("Work", None);
        let attic = node("Attic", Some(home.uuid));
        let garden = node("Garden", Some(home.uuid));
        let reports = node("Reports", Some(work.uuid));

        let tree = assemble_tree(vec![
            home.clone(),
            work.clone(),
            attic.clone(),
            garden.clone(),
            reports.clone(),
        ]);

        assert_eq!(names(&tree), ["Home", "Work"]);
        assert_eq!(names(&tree.children[0]), ["Attic", "Garden"]);
        assert_eq!(names(&tree.children[1]), ["Reports"]);
        assert_eq!(tree.children[0].node.as_ref().unwrap().uuid, home.uuid);
    }

    #[test]
    fn child_arriving_before_parent_attaches_in_second_pass() {
        let parent = node("Parent", None);
        let child = node("Child", Some(parent.uuid));
        let grandchild = node("Grandchild", Some(child.uuid));

        // Worst-case ordering: leaf first, root last.
        let tree = assemble_tree(vec![grandchild.clone(), child.clone(), parent.clone()]);

        assert_eq!(names(&tree), ["Parent"]);
        let parent_item = &tree.children[0];
        assert_eq!(names(parent_item), ["Child"]);
        assert_eq!(names(&parent_item.children[0]), ["Grandchild"]);
    }

    #[test]
    fn each_row_appears_exactly_once() {
        let a = node("A", None);
        let b = node("B", Some(a.uuid));
        let c = node("C", Some(a.uuid));
        let tree = assemble_tree(vec![a.clone(), b.clone(), c.clone()]);

        fn count(item: &NodeTreeItem) -> usize {
            usize::from(item.node.is_some()) + item.children.iter().map(count).sum::<usize>()
        }
        assert_eq!(count(&tree), 3);
    }

    #[test]
    fn row_with_unknown_parent_is_dropped() {
        let a = node("A", None);
        let orphan = node("Orphan", Some(Uuid::new_v4()));
        let tree = assemble_tree(vec![a.clone(), orphan]);
        assert_eq!(names(&tree), ["A"]);
        assert!(tree.children[0].children.is_empty());
    }
}
