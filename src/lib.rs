//! Reverse mode automatic differentiation over scalar expression graphs.
//!
//! Expressions are built from [`leaf`] variables with the simplifying
//! constructors ([`add`], [`mul`], [`pow`], [`log`], ...) or the `+ - *`
//! operators on `&Node`. [`Node::differentiate`] then fills in the adjoint of
//! every node below the root. Adjoints are themselves expressions over the same
//! variables, so they can be differentiated again for higher order derivatives.
//! The differentiated root owns those expressions; nodes only point at them.
//!
//! ```
//! use symgrad::{leaf, pow};
//!
//! let x = leaf(2.);
//! let y = leaf(3.);
//! let z = pow(&x, &y).unwrap().into_node().unwrap();
//! z.differentiate().unwrap();
//! assert_eq!(x.adjoint().value(), 12.);
//!
//! // d/dy (dz/dx)
//! x.adjoint().into_node().unwrap().differentiate().unwrap();
//! let expected = 4. + 12. * 2f64.ln();
//! assert!((y.adjoint().value() - expected).abs() < 1e-12);
//! ```
pub mod error;
mod grad;
mod node;
mod ops;
mod symbols;
mod visit;

pub use error::{Error, Result};
pub use grad::{differentiate, GradOrder};
pub use node::{leaf, Node, OpKind, Operand, Role};
pub use ops::{add, cos, div, log, mul, neg, pow, sin, sub};
pub use symbols::{LabelOptions, SymbolTable};
pub use visit::{Edge, NodeVisitor, Nodes, Visit};
