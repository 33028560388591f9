//! Reverse mode adjoint propagation.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, trace};

use crate::{
    error::Result,
    node::{Node, Op, Operand},
    ops::{
        add_terms, cos_terms, div_terms, log_terms, mul_terms, neg_terms, pow_terms, sin_terms,
        sub_terms,
    },
};

/// The order in which ready nodes are taken off the worklist.
///
/// A node is only queued once every parent has contributed to its adjoint, so
/// both orders produce the same adjoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GradOrder {
    /// Last in, first out.
    #[default]
    Stack,
    /// First in, first out.
    Queue,
}

/// Shorthand for [`Node::differentiate`].
pub fn differentiate(root: &Node) -> Result<()> {
    root.differentiate()
}

impl Node {
    /// The entry point to backpropagation.
    ///
    /// Sets the adjoint of every node reachable from `self` to the derivative of
    /// `self` with respect to that node. Adjoints are built with the simplifying
    /// constructors, so an adjoint that still depends on a variable is itself a
    /// node and can be differentiated again.
    ///
    /// `self` owns the expression adjoints it produced and the nodes below only
    /// point at them, so adjoints never keep the graph they describe alive. They
    /// stay readable as long as `self` is.
    ///
    /// Fails only if a chain rule leaves the domain of an operator, e.g. the
    /// exponent partial of a power whose base is not positive.
    pub fn differentiate(&self) -> Result<()> {
        self.differentiate_with(GradOrder::default())
    }

    pub fn differentiate_with(&self, order: GradOrder) -> Result<()> {
        let nodes = self.reset_reachable();
        self.set_gradients(vec![]);
        debug!(
            "differentiate {} node (value {}): {} reachable nodes, {order:?} order",
            self.op_name(),
            self.value(),
            nodes.len()
        );

        let mut adjoints = Adjoints::default();
        adjoints.accumulate(self, Operand::Const(1.));
        self.set_chained(true);
        let pop = |worklist: &mut VecDeque<Node>| match order {
            GradOrder::Stack => worklist.pop_back(),
            GradOrder::Queue => worklist.pop_front(),
        };
        let mut worklist = VecDeque::from([self.clone()]);
        while let Some(node) = pop(&mut worklist) {
            node.chain(&mut adjoints)?;
            for child in node.children() {
                let pending = child.pending().saturating_sub(1);
                child.set_pending(pending);
                if pending == 0 && !child.chained() {
                    child.set_chained(true);
                    worklist.push_back(child.clone());
                }
            }
        }

        for node in &nodes {
            node.set_adjoint(&adjoints.get(node));
        }
        self.set_gradients(adjoints.into_nodes());
        Ok(())
    }

    /// Clears the adjoint of every node reachable from `self`, returning how many there are.
    ///
    /// This also releases the expression adjoints owned by `self`.
    pub fn reset_adjoints(&self) -> usize {
        self.set_gradients(vec![]);
        self.reset_reachable().len()
    }

    /// Resets every node reachable from `self`, counting how many reachable
    /// parents each one has, and returns them in discovery order.
    fn reset_reachable(&self) -> Vec<Node> {
        let mut seen = HashSet::from([self.id()]);
        let mut stack = vec![self.clone()];
        let mut nodes = vec![];
        self.reset();
        while let Some(node) = stack.pop() {
            for child in node.children() {
                if seen.insert(child.id()) {
                    child.reset();
                    stack.push(child.clone());
                }
                child.set_pending(child.pending() + 1);
            }
            nodes.push(node);
        }
        nodes
    }

    fn reset(&self) {
        self.set_adjoint(&Operand::Const(0.));
        self.set_chained(false);
        self.set_pending(0);
    }

    /// Adds this node's contributions into the adjoints of its operands.
    fn chain(&self, adjoints: &mut Adjoints) -> Result<()> {
        use Op::*;
        let adjoint = adjoints.get(self);
        trace!(
            "chain {} (value {}, adjoint {})",
            self.op_name(),
            self.value(),
            adjoint.value()
        );
        match self.op() {
            Leaf(_) => {}
            Neg(arg) => adjoints.accumulate(arg, neg_terms(adjoint)),
            Log(arg) => adjoints.accumulate(arg, div_terms(adjoint, arg.into())?),
            Sin(arg) => adjoints.accumulate(arg, mul_terms(adjoint, cos_terms(arg.into()))),
            Cos(arg) => {
                adjoints.accumulate(arg, neg_terms(mul_terms(adjoint, sin_terms(arg.into()))))
            }
            Add(lhs, rhs) => {
                adjoints.contribute(lhs, || Ok(adjoint.clone()))?;
                adjoints.contribute(rhs, || Ok(adjoint.clone()))?;
            }
            Sub(lhs, rhs) => {
                adjoints.contribute(lhs, || Ok(adjoint.clone()))?;
                adjoints.contribute(rhs, || Ok(neg_terms(adjoint.clone())))?;
            }
            Mul(lhs, rhs) => {
                adjoints.contribute(lhs, || Ok(mul_terms(adjoint.clone(), rhs.clone())))?;
                adjoints.contribute(rhs, || Ok(mul_terms(adjoint.clone(), lhs.clone())))?;
            }
            Div(lhs, rhs) => {
                adjoints.contribute(lhs, || div_terms(adjoint.clone(), rhs.clone()))?;
                // -g * l / r**2
                adjoints.contribute(rhs, || {
                    let squared = pow_terms(rhs.clone(), Operand::Const(2.))?;
                    let quotient = div_terms(lhs.clone(), squared)?;
                    Ok(neg_terms(mul_terms(adjoint.clone(), quotient)))
                })?;
            }
            Pow(base, exponent) => {
                // g * e * b**(e - 1)
                adjoints.contribute(base, || {
                    let lowered = sub_terms(exponent.clone(), Operand::Const(1.));
                    let power = pow_terms(base.clone(), lowered)?;
                    Ok(mul_terms(
                        mul_terms(adjoint.clone(), exponent.clone()),
                        power,
                    ))
                })?;
                // g * b**e * log(b), with b**e rebuilt: the root owns the adjoints,
                // so they must not refer to it.
                adjoints.contribute(exponent, || {
                    let power = pow_terms(base.clone(), exponent.clone())?;
                    let log_base = log_terms(base.clone())?;
                    Ok(mul_terms(mul_terms(adjoint.clone(), power), log_base))
                })?;
            }
        }
        Ok(())
    }
}

/// Adjoints of one `differentiate` call, keyed by node address.
#[derive(Default)]
struct Adjoints(HashMap<usize, Operand>);

impl Adjoints {
    fn get(&self, node: &Node) -> Operand {
        self.0
            .get(&node.id())
            .cloned()
            .unwrap_or(Operand::Const(0.))
    }

    fn accumulate(&mut self, node: &Node, contribution: Operand) {
        let sum = add_terms(self.get(node), contribution);
        self.0.insert(node.id(), sum);
    }

    /// Accumulates into `target` if it is a node. Constants have no adjoint, so the
    /// contribution is not even built for them.
    fn contribute(
        &mut self,
        target: &Operand,
        contribution: impl FnOnce() -> Result<Operand>,
    ) -> Result<()> {
        if let Operand::Node(node) = target {
            self.accumulate(node, contribution()?);
        }
        Ok(())
    }

    fn into_nodes(self) -> Vec<Node> {
        self.0.into_values().filter_map(Operand::into_node).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{node::leaf, ops::*};

    #[test_log::test]
    fn test_leaf_is_its_own_derivative() {
        let x = leaf(4.);
        x.differentiate().unwrap();
        assert!(x.adjoint().is_const(1.));
    }

    #[test_log::test]
    fn test_unary_rules() {
        let x = leaf(0.5);

        let s = sin(&x).unwrap().into_node().unwrap();
        s.differentiate().unwrap();
        assert!((x.adjoint().value() - 0.5f64.cos()).abs() < 1e-12);

        let c = cos(&x).unwrap().into_node().unwrap();
        c.differentiate().unwrap();
        assert!((x.adjoint().value() + 0.5f64.sin()).abs() < 1e-12);

        let l = log(&x).unwrap().into_node().unwrap();
        l.differentiate().unwrap();
        assert_eq!(x.adjoint().value(), 2.);

        let n = neg(&x).unwrap().into_node().unwrap();
        n.differentiate().unwrap();
        assert!(x.adjoint().is_const(-1.));
    }

    #[test_log::test]
    fn test_binary_rules() {
        let (x, y) = (leaf(3.), leaf(2.));

        let d = div(&x, &y).unwrap().into_node().unwrap();
        d.differentiate().unwrap();
        assert_eq!(x.adjoint().value(), 0.5);
        assert_eq!(y.adjoint().value(), -0.75);

        let s = (&x - &y).into_node().unwrap();
        s.differentiate().unwrap();
        assert!(x.adjoint().is_const(1.));
        assert!(y.adjoint().is_const(-1.));

        let m = (&x * &y).into_node().unwrap();
        m.differentiate().unwrap();
        assert_eq!(x.adjoint().value(), 2.);
        assert_eq!(y.adjoint().value(), 3.);
    }

    #[test_log::test]
    fn test_constant_operands() {
        let x = leaf(3.);

        let p = pow(2., &x).unwrap().into_node().unwrap();
        p.differentiate().unwrap();
        assert!((x.adjoint().value() - 8. * 2f64.ln()).abs() < 1e-12);

        let q = pow(&x, 2.).unwrap().into_node().unwrap();
        q.differentiate().unwrap();
        assert_eq!(x.adjoint().value(), 6.);

        let r = div(6., &x).unwrap().into_node().unwrap();
        r.differentiate().unwrap();
        assert!((x.adjoint().value() + 6. / 9.).abs() < 1e-12);

        let t = (10. - &x).into_node().unwrap();
        t.differentiate().unwrap();
        assert!(x.adjoint().is_const(-1.));
    }

    #[test_log::test]
    fn test_adjoints_are_expressions() {
        let (x, y) = (leaf(3.), leaf(2.));
        let m = (&x * &y).into_node().unwrap();
        m.differentiate().unwrap();
        // dm/dx is the node y itself, not a copy of its value.
        assert!(x.adjoint().as_node().unwrap().ptr_eq(&y));
        assert!(y.adjoint().as_node().unwrap().ptr_eq(&x));
    }

    #[test_log::test]
    fn test_chain_rule_domain_error() {
        let x = leaf(-2.);
        let y = leaf(2.);
        let p = pow(&x, &y).unwrap().into_node().unwrap();
        assert_eq!(p.value(), 4.);
        assert!(matches!(
            p.differentiate(),
            Err(crate::Error::DomainError { .. })
        ));
    }

    #[test_log::test]
    fn test_reset_counts_shared_nodes_once() {
        let x = leaf(2.);
        let sx = sin(&x).unwrap().into_node().unwrap();
        let cx = cos(&x).unwrap().into_node().unwrap();
        let z = (&sx * &cx).into_node().unwrap();
        assert_eq!(z.reset_adjoints(), 4);
        assert_eq!(x.pending(), 2);
        assert!(z.adjoint().is_const(0.));
    }

    #[test_log::test]
    fn test_graph_is_freed_after_differentiate() {
        let (x, y, m) = {
            let (x, y) = (leaf(3.), leaf(2.));
            let m = (&x * &y).into_node().unwrap();
            m.differentiate().unwrap();
            assert!(x.adjoint().as_node().unwrap().ptr_eq(&y));
            (x.downgrade(), y.downgrade(), m.downgrade())
        };
        assert!(x.upgrade().is_none());
        assert!(y.upgrade().is_none());
        assert!(m.upgrade().is_none());

        // x * x has dx = x * 2, an adjoint built on x itself.
        let (x, adjoint) = {
            let x = leaf(3.);
            let square = mul(&x, &x).unwrap().into_node().unwrap();
            square.differentiate().unwrap();
            let adjoint = x.adjoint().into_node().unwrap();
            assert_eq!(adjoint.value(), 6.);
            (x.downgrade(), adjoint.downgrade())
        };
        assert!(x.upgrade().is_none());
        assert!(adjoint.upgrade().is_none());
    }

    #[test_log::test]
    fn test_higher_order_graph_is_freed() {
        let (x, y) = {
            let (x, y) = (leaf(2.), leaf(3.));
            let z = pow(&x, &y).unwrap().into_node().unwrap();
            z.differentiate().unwrap();
            x.adjoint().into_node().unwrap().differentiate().unwrap();
            assert!(y.adjoint().is_node());
            (x.downgrade(), y.downgrade())
        };
        assert!(x.upgrade().is_none());
        assert!(y.upgrade().is_none());
    }

    #[test_log::test]
    fn test_adjoints_live_as_long_as_the_root() {
        let (x, y) = (leaf(3.), leaf(2.));
        let z = sin(&x * &y).unwrap().into_node().unwrap();
        z.differentiate().unwrap();
        assert!(x.adjoint().is_node());
        drop(z);
        assert!(x.adjoint().is_const(0.));
    }
}
