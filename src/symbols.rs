//! Human readable names for nodes.

use crate::node::{Node, Op, Operand};

/// Display names for nodes, matched by identity rather than by value.
///
/// When several names refer to the same node, the first one inserted wins.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    entries: Vec<(String, Node)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, node: &Node) {
        self.entries.push((name.into(), node.clone()));
    }

    pub fn with(mut self, name: impl Into<String>, node: &Node) -> Self {
        self.insert(name, node);
        self
    }

    pub fn lookup(&self, node: &Node) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, named)| named.ptr_eq(node))
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Node)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (S, Node)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        }
    }
}

/// Which fields [`Node::label`] includes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelOptions {
    pub name: bool,
    pub value: bool,
    pub adjoint: bool,
}

impl Default for LabelOptions {
    fn default() -> Self {
        Self {
            name: true,
            value: true,
            adjoint: true,
        }
    }
}

impl Node {
    /// The node's name in `symbols`, or `op(value)` such as `var(2.0)` if it has none.
    pub fn display_name(&self, symbols: &SymbolTable) -> String {
        match symbols.lookup(self) {
            Some(name) => name.to_string(),
            None => format!("{}({:?})", self.op_name(), self.value()),
        }
    }

    /// Fully parenthesized infix expression using the names in `symbols`,
    /// e.g. `(log(x) + (y ** 2))`.
    pub fn to_infix(&self, symbols: &SymbolTable) -> String {
        use Op::*;
        if let Some(name) = symbols.lookup(self) {
            return name.to_string();
        }
        match self.op() {
            Leaf(_) => self.display_name(symbols),
            Neg(arg) | Log(arg) | Sin(arg) | Cos(arg) => {
                format!("{}({})", self.op_name(), arg.to_infix(symbols))
            }
            Add(lhs, rhs) | Sub(lhs, rhs) | Mul(lhs, rhs) | Div(lhs, rhs) | Pow(lhs, rhs) => {
                format!(
                    "({} {} {})",
                    operand_infix(lhs, symbols),
                    self.op_name(),
                    operand_infix(rhs, symbols)
                )
            }
        }
    }

    /// Multi-line description of a single node for graph exporters.
    pub fn label(&self, symbols: &SymbolTable, options: &LabelOptions) -> String {
        let mut label = self.op_name().to_string();
        if options.name {
            if let Some(name) = symbols.lookup(self) {
                label += &format!("\nname: {name}");
            }
        }
        if options.value {
            label += &format!("\nval: {}", self.value());
        }
        if options.adjoint {
            label += &format!("\nadj: {}", self.adjoint().value());
        }
        label
    }
}

fn operand_infix(operand: &Operand, symbols: &SymbolTable) -> String {
    match operand {
        Operand::Node(node) => node.to_infix(symbols),
        Operand::Const(val) => val.to_string(),
    }
}
