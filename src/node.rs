use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    fmt::{self, Display},
    mem,
    rc::{Rc, Weak},
};

/// The operator a node applies to its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Leaf,
    Neg,
    Log,
    Sin,
    Cos,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        use OpKind::*;
        match self {
            Leaf => "var",
            Neg => "-",
            Log => "log",
            Sin => "sin",
            Cos => "cos",
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Pow => "**",
        }
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Label of an edge from a node to one of its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Arg,
    Left,
    Right,
    Base,
    Exponent,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Arg => "arg",
            Role::Left => "left",
            Role::Right => "right",
            Role::Base => "base",
            Role::Exponent => "exponent",
        })
    }
}

/// Either a graph node or an embedded numeric constant.
///
/// Operands of binary nodes, adjoints and the results of the simplifying
/// constructors all use this type, since a rewrite such as `x * 0` can
/// collapse an expression into a bare number.
#[derive(Clone, Debug)]
pub enum Operand {
    Node(Node),
    Const(f64),
}

impl Operand {
    pub fn value(&self) -> f64 {
        match self {
            Self::Node(node) => node.value(),
            Self::Const(val) => *val,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            Self::Const(_) => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            Self::Node(node) => Some(node),
            Self::Const(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    /// Returns true if this is the constant `val`. Nodes never match, whatever their value.
    pub fn is_const(&self, val: f64) -> bool {
        matches!(self, Self::Const(c) if *c == val)
    }
}

impl From<f64> for Operand {
    fn from(val: f64) -> Self {
        Self::Const(val)
    }
}

impl From<Node> for Operand {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<&Node> for Operand {
    fn from(node: &Node) -> Self {
        Self::Node(node.clone())
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(lhs), Self::Node(rhs)) => lhs == rhs,
            (Self::Const(lhs), Self::Const(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(node) => node.fmt(f),
            Self::Const(val) => write!(f, "{val}"),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Op {
    Leaf(f64),
    Neg(Node),
    Log(Node),
    Sin(Node),
    Cos(Node),
    Add(Operand, Operand),
    Sub(Operand, Operand),
    Mul(Operand, Operand),
    Div(Operand, Operand),
    Pow(Operand, Operand),
}

impl Op {
    pub(crate) fn kind(&self) -> OpKind {
        use Op::*;
        match self {
            Leaf(_) => OpKind::Leaf,
            Neg(_) => OpKind::Neg,
            Log(_) => OpKind::Log,
            Sin(_) => OpKind::Sin,
            Cos(_) => OpKind::Cos,
            Add(..) => OpKind::Add,
            Sub(..) => OpKind::Sub,
            Mul(..) => OpKind::Mul,
            Div(..) => OpKind::Div,
            Pow(..) => OpKind::Pow,
        }
    }

    /// Forward value from the operands' cached values.
    pub(crate) fn eval(&self) -> f64 {
        use Op::*;
        match self {
            Leaf(val) => *val,
            Neg(arg) => -arg.value(),
            Log(arg) => arg.value().ln(),
            Sin(arg) => arg.value().sin(),
            Cos(arg) => arg.value().cos(),
            Add(lhs, rhs) => lhs.value() + rhs.value(),
            Sub(lhs, rhs) => lhs.value() - rhs.value(),
            Mul(lhs, rhs) => lhs.value() * rhs.value(),
            Div(lhs, rhs) => lhs.value() / rhs.value(),
            Pow(base, exponent) => base.value().powf(exponent.value()),
        }
    }
}

/// Where a node's adjoint lives. Expression adjoints are owned by the
/// differentiated root (see [`Node::differentiate`]), the node only points at them.
enum AdjointRef {
    Const(f64),
    Node(Weak<NodePayload>),
}

pub(crate) struct NodePayload {
    value: f64,
    op: Op,
    adjoint: RefCell<AdjointRef>,
    /// Expression adjoints produced by the last `differentiate` call rooted here.
    gradients: RefCell<Vec<Node>>,
    /// Set once the node has been queued by the current `differentiate` call.
    chained: Cell<bool>,
    /// Reachable parents that have not run their chain rule yet.
    pending: Cell<usize>,
}

/// A node of the expression graph.
///
/// Cloning a `Node` clones the reference, not the node: parents share their
/// operands, so the graph is a DAG. Equality (`==`) is structural, see
/// [`Node::ptr_eq`] for identity.
#[derive(Clone)]
pub struct Node(Rc<NodePayload>);

/// Creates a variable leaf.
pub fn leaf(value: f64) -> Node {
    Node::leaf(value)
}

impl Node {
    pub fn leaf(value: f64) -> Node {
        Self::new(Op::Leaf(value))
    }

    pub(crate) fn new(op: Op) -> Node {
        let value = op.eval();
        Self(Rc::new(NodePayload {
            value,
            op,
            adjoint: RefCell::new(AdjointRef::Const(0.)),
            gradients: RefCell::new(vec![]),
            chained: Cell::new(false),
            pending: Cell::new(0),
        }))
    }

    pub fn value(&self) -> f64 {
        self.0.value
    }

    /// The derivative of the last differentiated root with respect to this node.
    ///
    /// Expression adjoints are owned by that root, so they read as zero once the
    /// root has been dropped.
    pub fn adjoint(&self) -> Operand {
        match &*self.0.adjoint.borrow() {
            AdjointRef::Const(val) => Operand::Const(*val),
            AdjointRef::Node(weak) => weak
                .upgrade()
                .map_or(Operand::Const(0.), |payload| Operand::Node(Node(payload))),
        }
    }

    pub fn kind(&self) -> OpKind {
        self.0.op.kind()
    }

    pub fn op_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.0.op, Op::Leaf(_))
    }

    /// Operands in order, labelled by their role.
    pub fn operands(&self) -> Vec<(Role, Operand)> {
        use Op::*;
        match &self.0.op {
            Leaf(_) => vec![],
            Neg(arg) | Log(arg) | Sin(arg) | Cos(arg) => vec![(Role::Arg, arg.into())],
            Add(lhs, rhs) | Sub(lhs, rhs) | Mul(lhs, rhs) | Div(lhs, rhs) => {
                vec![(Role::Left, lhs.clone()), (Role::Right, rhs.clone())]
            }
            Pow(base, exponent) => vec![
                (Role::Base, base.clone()),
                (Role::Exponent, exponent.clone()),
            ],
        }
    }

    /// Returns true if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        let payload = &*self.0;
        payload as *const _ as usize
    }

    pub(crate) fn op(&self) -> &Op {
        &self.0.op
    }

    /// Operands that are nodes, in operand order. A node used twice (`x * x`) appears twice.
    pub(crate) fn children(&self) -> impl Iterator<Item = &Node> {
        use Op::*;
        let (first, second) = match &self.0.op {
            Leaf(_) => (None, None),
            Neg(arg) | Log(arg) | Sin(arg) | Cos(arg) => (Some(arg), None),
            Add(lhs, rhs) | Sub(lhs, rhs) | Mul(lhs, rhs) | Div(lhs, rhs) | Pow(lhs, rhs) => {
                (lhs.as_node(), rhs.as_node())
            }
        };
        first.into_iter().chain(second)
    }

    /// Points this node at `adjoint` without owning it.
    pub(crate) fn set_adjoint(&self, adjoint: &Operand) {
        *self.0.adjoint.borrow_mut() = match adjoint {
            Operand::Const(val) => AdjointRef::Const(*val),
            Operand::Node(node) => AdjointRef::Node(Rc::downgrade(&node.0)),
        };
    }

    pub(crate) fn set_gradients(&self, gradients: Vec<Node>) {
        *self.0.gradients.borrow_mut() = gradients;
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> Weak<NodePayload> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn chained(&self) -> bool {
        self.0.chained.get()
    }

    pub(crate) fn set_chained(&self, chained: bool) {
        self.0.chained.set(chained);
    }

    pub(crate) fn pending(&self) -> usize {
        self.0.pending.get()
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.0.pending.set(pending);
    }
}

impl PartialEq for Node {
    /// Leaves are equal only to themselves. Operator nodes are equal when the
    /// operators match and the operands in each role are equal.
    fn eq(&self, other: &Self) -> bool {
        use Op::*;
        // A pair met twice is already being compared: any mismatch below it
        // returns false for the whole comparison.
        let mut seen = HashSet::new();
        let mut pairs = vec![(self.clone(), other.clone())];
        while let Some((lhs, rhs)) = pairs.pop() {
            if lhs.ptr_eq(&rhs) || !seen.insert((lhs.id(), rhs.id())) {
                continue;
            }
            match (&lhs.0.op, &rhs.0.op) {
                (Neg(a0), Neg(a1))
                | (Log(a0), Log(a1))
                | (Sin(a0), Sin(a1))
                | (Cos(a0), Cos(a1)) => pairs.push((a0.clone(), a1.clone())),
                (Add(l0, r0), Add(l1, r1))
                | (Sub(l0, r0), Sub(l1, r1))
                | (Mul(l0, r0), Mul(l1, r1))
                | (Div(l0, r0), Div(l1, r1))
                | (Pow(l0, r0), Pow(l1, r1)) => {
                    for (a, b) in [(l0, l1), (r0, r1)] {
                        match (a, b) {
                            (Operand::Node(a), Operand::Node(b)) => {
                                pairs.push((a.clone(), b.clone()))
                            }
                            (Operand::Const(a), Operand::Const(b)) if a == b => {}
                            _ => return false,
                        }
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

impl NodePayload {
    /// Detaches everything this payload holds strong references to.
    fn take_links(&mut self) -> Vec<Node> {
        use Op::*;
        let mut links = mem::take(self.gradients.get_mut());
        match mem::replace(&mut self.op, Leaf(self.value)) {
            Leaf(_) => {}
            Neg(arg) | Log(arg) | Sin(arg) | Cos(arg) => links.push(arg),
            Add(lhs, rhs) | Sub(lhs, rhs) | Mul(lhs, rhs) | Div(lhs, rhs) | Pow(lhs, rhs) => {
                links.extend(lhs.into_node());
                links.extend(rhs.into_node());
            }
        }
        links
    }
}

impl Drop for NodePayload {
    // Unlinks operand chains with a worklist, dropping a long chain one node at a time.
    fn drop(&mut self) {
        let mut links = self.take_links();
        while let Some(node) = links.pop() {
            if let Ok(mut payload) = Rc::try_unwrap(node.0) {
                links.extend(payload.take_links());
            }
        }
    }
}

impl fmt::Debug for Node {
    // Adjoints are left out: an expression-valued adjoint usually refers back to this node.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("op", &self.kind()).field("value", &self.value());
        let operands = self.operands();
        if !operands.is_empty() {
            s.field("operands", &operands);
        }
        s.finish()
    }
}

impl Display for Node {
    /// Fully parenthesized infix expression in terms of values, e.g. `(2 + log(3))`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Op::*;
        match &self.0.op {
            Leaf(val) => write!(f, "{val}"),
            Neg(arg) | Log(arg) | Sin(arg) | Cos(arg) => write!(f, "{}({arg})", self.op_name()),
            Add(lhs, rhs) | Sub(lhs, rhs) | Mul(lhs, rhs) | Div(lhs, rhs) | Pow(lhs, rhs) => {
                write!(f, "({lhs} {} {rhs})", self.op_name())
            }
        }
    }
}

#[test]
fn test_structural_eq() {
    let x = leaf(2.);
    let y = leaf(2.);
    assert_ne!(x, y);
    assert_eq!(x, x.clone());

    let a = Node::new(Op::Add(x.clone().into(), y.clone().into()));
    let b = Node::new(Op::Add(x.clone().into(), y.clone().into()));
    assert_eq!(a, b);
    assert!(!a.ptr_eq(&b));

    let swapped = Node::new(Op::Add(y.clone().into(), x.clone().into()));
    assert_ne!(a, swapped);

    let sub = Node::new(Op::Sub(x.clone().into(), y.clone().into()));
    assert_ne!(a, sub);

    let c0 = Node::new(Op::Mul(x.clone().into(), Operand::Const(3.)));
    let c1 = Node::new(Op::Mul(x.clone().into(), Operand::Const(3.)));
    let c2 = Node::new(Op::Mul(x.clone().into(), Operand::Const(4.)));
    assert_eq!(c0, c1);
    assert_ne!(c0, c2);
}

#[test]
fn test_structural_eq_on_shared_graphs() {
    // Each level uses the level below twice: 2**64 paths, 65 distinct pairs.
    let x = leaf(1.);
    let doubled = |depth| {
        let mut node = x.clone();
        for _ in 0..depth {
            node = Node::new(Op::Add(node.clone().into(), node.into()));
        }
        node
    };
    let (a, b) = (doubled(64), doubled(64));
    assert!(!a.ptr_eq(&b));
    assert_eq!(a, b);
    assert_ne!(a, doubled(63));
}

#[test]
fn test_operands_roles() {
    let x = leaf(2.);
    let p = Node::new(Op::Pow(x.clone().into(), Operand::Const(3.)));
    assert_eq!(p.value(), 8.);
    let roles: Vec<_> = p.operands().into_iter().map(|(role, _)| role).collect();
    assert_eq!(roles, [Role::Base, Role::Exponent]);
    assert_eq!(p.children().count(), 1);

    let l = Node::new(Op::Log(x.clone()));
    assert_eq!(l.operands()[0].0, Role::Arg);
    assert!(x.is_leaf());
    assert!(x.operands().is_empty());
}

#[test]
fn test_display() {
    let x = leaf(2.);
    let y = Node::new(Op::Sin(x.clone()));
    let z = Node::new(Op::Add(y.into(), Operand::Const(1.5)));
    assert_eq!(z.to_string(), "(sin(2) + 1.5)");
    assert_eq!(z.op_name(), "+");
    assert_eq!(x.op_name(), "var");
}
