//! Errors raised while building an expression graph.

use thiserror::Error;

use crate::node::OpKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// None of the operands is a graph node, so the result would not depend on any variable.
    #[error("`{op}` needs at least one node operand, got only plain numbers")]
    InvalidOperandKind { op: OpKind },

    /// The forward value is mathematically undefined.
    #[error("`{op}` is undefined for {operands:?}")]
    DomainError { op: OpKind, operands: Vec<f64> },
}

pub type Result<T> = std::result::Result<T, Error>;
