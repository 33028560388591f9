use std::collections::HashSet;

use crate::node::{Node, Operand, Role};

/// An edge from a node to one of its operands.
#[derive(Clone, Debug)]
pub struct Edge {
    pub role: Role,
    pub target: Operand,
}

/// A node produced by [`Node::visit_all`] together with its outgoing edges.
#[derive(Clone, Debug)]
pub struct Visit {
    pub node: Node,
    pub edges: Vec<Edge>,
}

/// Callback interface for graph exporters.
pub trait NodeVisitor {
    fn visit_node(&mut self, node: &Node, edges: &[Edge]);
}

impl<F: FnMut(&Node, &[Edge])> NodeVisitor for F {
    fn visit_node(&mut self, node: &Node, edges: &[Edge]) {
        self(node, edges)
    }
}

/// Lazy depth first enumeration of the nodes reachable from a root.
///
/// Every node is yielded exactly once, however many parents share it. The
/// visited set belongs to the iterator, so it is independent of
/// [`Node::differentiate`] and of any other traversal.
pub struct Nodes {
    stack: Vec<Node>,
    seen: HashSet<usize>,
}

impl Iterator for Nodes {
    type Item = Visit;

    fn next(&mut self) -> Option<Visit> {
        let node = self.stack.pop()?;
        let edges: Vec<Edge> = node
            .operands()
            .into_iter()
            .map(|(role, target)| Edge { role, target })
            .collect();
        // Push in reverse so the first operand is visited first.
        for edge in edges.iter().rev() {
            if let Operand::Node(child) = &edge.target {
                if self.seen.insert(child.id()) {
                    self.stack.push(child.clone());
                }
            }
        }
        Some(Visit { node, edges })
    }
}

impl Node {
    pub fn visit_all(&self) -> Nodes {
        Nodes {
            stack: vec![self.clone()],
            seen: HashSet::from([self.id()]),
        }
    }

    /// Calls `visitor` once for every node reachable from `self`.
    pub fn accept(&self, visitor: &mut impl NodeVisitor) {
        for Visit { node, edges } in self.visit_all() {
            visitor.visit_node(&node, &edges);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::leaf;
    use crate::ops::{log, mul};

    #[test]
    fn test_visits_shared_nodes_once() {
        let (x, y) = (leaf(2.), leaf(3.));
        let xy = (&x * &y).into_node().unwrap();
        let lx = log(&x).unwrap().into_node().unwrap();
        let z = mul(&xy, &lx).unwrap().into_node().unwrap();

        let visited: Vec<_> = z.visit_all().map(|visit| visit.node).collect();
        assert_eq!(visited.len(), 5);
        assert!(visited[0].ptr_eq(&z));
        assert_eq!(visited.iter().filter(|node| node.ptr_eq(&x)).count(), 1);
    }

    #[test]
    fn test_edges_carry_roles_and_constants() {
        let x = leaf(2.);
        let p = crate::ops::pow(&x, 3.).unwrap().into_node().unwrap();
        let visits: Vec<_> = p.visit_all().collect();
        assert_eq!(visits.len(), 2);
        let edges = &visits[0].edges;
        assert_eq!(edges[0].role, Role::Base);
        assert!(edges[0].target.as_node().unwrap().ptr_eq(&x));
        assert_eq!(edges[1].role, Role::Exponent);
        assert!(edges[1].target.is_const(3.));
        assert!(visits[1].edges.is_empty());
    }

    #[test]
    fn test_traversal_is_independent_of_grad() {
        let (x, y) = (leaf(2.), leaf(3.));
        let z = (&x + &y).into_node().unwrap();
        let mut first = z.visit_all();
        first.next();
        z.differentiate().unwrap();
        // A second traversal started midway does not disturb the first one.
        assert_eq!(z.visit_all().count(), 3);
        assert_eq!(first.count(), 2);
    }

    #[test]
    fn test_accept_closure() {
        let x = leaf(1.);
        let z = (&x - 4.).into_node().unwrap();
        let mut edges = 0;
        z.accept(&mut |_: &Node, e: &[Edge]| edges += e.len());
        assert_eq!(edges, 2);
    }
}
