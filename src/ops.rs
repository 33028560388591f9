//! Simplifying constructors.
//!
//! Each constructor computes the forward value eagerly, then tries the local
//! rewrite rules in a fixed priority order before allocating a node:
//!
//! 1. identity and absorbing elements (`x + 0`, `x * 1`, `x ** 0`, ...)
//! 2. double negation
//! 3. common factors: `a*b ± a*c -> a*(b ± c)`, `a*b ± a -> a*(b ± 1)`
//! 4. power laws: `a**b * a**c -> a**(b + c)`, `(a**b)**c -> a**(b * c)`
//! 5. logarithms: `log(x) + log(y) -> log(x * y)`, `log(a**b) -> b * log(a)`
//! 6. self cancellation: `x - x -> 0`, `x + x -> x * 2`
//!
//! Rules match on structural equality of the immediate operands only.
//!
//! The public functions require at least one node operand. The `*_terms`
//! functions are what the chain rules use to build adjoints: they accept any
//! operand pair and fold two constants into a constant.

use log::trace;

use crate::{
    error::{Error, Result},
    node::{Node, Op, OpKind, Operand},
};

fn binary_operands(
    op: OpKind,
    lhs: impl Into<Operand>,
    rhs: impl Into<Operand>,
) -> Result<(Operand, Operand)> {
    let (lhs, rhs) = (lhs.into(), rhs.into());
    if lhs.is_node() || rhs.is_node() {
        Ok((lhs, rhs))
    } else {
        Err(Error::InvalidOperandKind { op })
    }
}

fn unary_operand(op: OpKind, arg: impl Into<Operand>) -> Result<Operand> {
    let arg = arg.into();
    if arg.is_node() {
        Ok(arg)
    } else {
        Err(Error::InvalidOperandKind { op })
    }
}

pub fn add(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<Operand> {
    let (lhs, rhs) = binary_operands(OpKind::Add, lhs, rhs)?;
    Ok(add_terms(lhs, rhs))
}

pub fn sub(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<Operand> {
    let (lhs, rhs) = binary_operands(OpKind::Sub, lhs, rhs)?;
    Ok(sub_terms(lhs, rhs))
}

pub fn mul(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<Operand> {
    let (lhs, rhs) = binary_operands(OpKind::Mul, lhs, rhs)?;
    Ok(mul_terms(lhs, rhs))
}

/// Fails with [`Error::DomainError`] if the divisor is zero.
pub fn div(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<Operand> {
    let (lhs, rhs) = binary_operands(OpKind::Div, lhs, rhs)?;
    div_terms(lhs, rhs)
}

/// `base ** exponent`. Fails with [`Error::DomainError`] for a zero base with a
/// negative exponent, or a negative base with a fractional exponent.
pub fn pow(base: impl Into<Operand>, exponent: impl Into<Operand>) -> Result<Operand> {
    let (base, exponent) = binary_operands(OpKind::Pow, base, exponent)?;
    pow_terms(base, exponent)
}

pub fn neg(arg: impl Into<Operand>) -> Result<Operand> {
    Ok(neg_terms(unary_operand(OpKind::Neg, arg)?))
}

/// Natural logarithm. Fails with [`Error::DomainError`] for a non-positive argument.
pub fn log(arg: impl Into<Operand>) -> Result<Operand> {
    log_terms(unary_operand(OpKind::Log, arg)?)
}

pub fn sin(arg: impl Into<Operand>) -> Result<Operand> {
    Ok(sin_terms(unary_operand(OpKind::Sin, arg)?))
}

pub fn cos(arg: impl Into<Operand>) -> Result<Operand> {
    Ok(cos_terms(unary_operand(OpKind::Cos, arg)?))
}

fn rewrite(rule: &str, result: Operand) -> Operand {
    trace!("rewrite {rule}");
    result
}

fn node(op: Op) -> Operand {
    Operand::Node(Node::new(op))
}

fn mul_parts(term: &Operand) -> Option<(&Operand, &Operand)> {
    match term.as_node()?.op() {
        Op::Mul(lhs, rhs) => Some((lhs, rhs)),
        _ => None,
    }
}

fn pow_parts(term: &Operand) -> Option<(&Operand, &Operand)> {
    match term.as_node()?.op() {
        Op::Pow(base, exponent) => Some((base, exponent)),
        _ => None,
    }
}

fn log_arg(term: &Operand) -> Option<&Node> {
    match term.as_node()?.op() {
        Op::Log(arg) => Some(arg),
        _ => None,
    }
}

/// Logarithm for rewrite rules, which fall back to plain construction instead of failing.
fn try_log(arg: Operand) -> Option<Operand> {
    log_terms(arg).ok()
}

/// `lhs + rhs` for `Add`, `lhs - rhs` for `Sub`.
fn combine(op: OpKind, lhs: Operand, rhs: Operand) -> Operand {
    if op == OpKind::Add {
        add_terms(lhs, rhs)
    } else {
        sub_terms(lhs, rhs)
    }
}

/// Common factor extraction for `Add` and `Sub`.
///
/// Between two products the shared factor may be a plain number (`2*x + 2*y`).
/// A lone term is only factored out when it is a node, so `x*3 + 3` stays a sum.
fn factor_common(op: OpKind, lhs: &Operand, rhs: &Operand) -> Option<Operand> {
    let factored = |factor: &Operand, lhs: &Operand, rhs: &Operand| {
        let rule = if op == OpKind::Add {
            "a*b + a*c -> a*(b + c)"
        } else {
            "a*b - a*c -> a*(b - c)"
        };
        rewrite(
            rule,
            mul_terms(factor.clone(), combine(op, lhs.clone(), rhs.clone())),
        )
    };
    let one = Operand::Const(1.);

    if let (Some((a, b)), Some((c, d))) = (mul_parts(lhs), mul_parts(rhs)) {
        if a == c {
            return Some(factored(a, b, d));
        }
        if a == d {
            return Some(factored(a, b, c));
        }
        if b == c {
            return Some(factored(b, a, d));
        }
        if b == d {
            return Some(factored(b, a, c));
        }
    }
    if let Some((a, b)) = mul_parts(lhs).filter(|_| rhs.is_node()) {
        if rhs == a {
            return Some(factored(a, b, &one));
        }
        if rhs == b {
            return Some(factored(b, a, &one));
        }
    }
    if let Some((a, b)) = mul_parts(rhs).filter(|_| lhs.is_node()) {
        if lhs == a {
            return Some(factored(a, &one, b));
        }
        if lhs == b {
            return Some(factored(b, &one, a));
        }
    }
    None
}

pub(crate) fn add_terms(lhs: Operand, rhs: Operand) -> Operand {
    if let (Operand::Const(l), Operand::Const(r)) = (&lhs, &rhs) {
        return Operand::Const(l + r);
    }
    if rhs.is_const(0.) {
        return rewrite("x + 0 -> x", lhs);
    }
    if lhs.is_const(0.) {
        return rewrite("0 + x -> x", rhs);
    }
    if let Some(factored) = factor_common(OpKind::Add, &lhs, &rhs) {
        return factored;
    }
    if let (Some(x), Some(y)) = (log_arg(&lhs), log_arg(&rhs)) {
        if let Some(log) = try_log(mul_terms(x.into(), y.into())) {
            return rewrite("log(x) + log(y) -> log(x*y)", log);
        }
    }
    if lhs.is_node() && lhs == rhs {
        return rewrite("x + x -> x*2", mul_terms(lhs, Operand::Const(2.)));
    }
    node(Op::Add(lhs, rhs))
}

pub(crate) fn sub_terms(lhs: Operand, rhs: Operand) -> Operand {
    if let (Operand::Const(l), Operand::Const(r)) = (&lhs, &rhs) {
        return Operand::Const(l - r);
    }
    if let Some(factored) = factor_common(OpKind::Sub, &lhs, &rhs) {
        return factored;
    }
    if let (Some(x), Some(y)) = (log_arg(&lhs), log_arg(&rhs)) {
        if let Some(log) = div_terms(x.into(), y.into()).ok().and_then(try_log) {
            return rewrite("log(x) - log(y) -> log(x/y)", log);
        }
    }
    if lhs.is_node() && lhs == rhs {
        return rewrite("x - x -> 0", Operand::Const(0.));
    }
    node(Op::Sub(lhs, rhs))
}

pub(crate) fn mul_terms(lhs: Operand, rhs: Operand) -> Operand {
    if let (Operand::Const(l), Operand::Const(r)) = (&lhs, &rhs) {
        return Operand::Const(l * r);
    }
    if rhs.is_const(0.) {
        return rewrite("x * 0 -> 0", Operand::Const(0.));
    }
    if rhs.is_const(1.) {
        return rewrite("x * 1 -> x", lhs);
    }
    if lhs.is_const(1.) {
        return rewrite("1 * x -> x", rhs);
    }
    if rhs.is_const(-1.) {
        return rewrite("x * -1 -> -x", neg_terms(lhs));
    }
    if let Some((a, b)) = pow_parts(&lhs) {
        if let Some((c, d)) = pow_parts(&rhs) {
            if a == c {
                let exponent = add_terms(b.clone(), d.clone());
                if let Ok(pow) = pow_terms(a.clone(), exponent) {
                    return rewrite("a**b * a**c -> a**(b + c)", pow);
                }
            }
        }
        if &rhs == a {
            let exponent = add_terms(b.clone(), Operand::Const(1.));
            if let Ok(pow) = pow_terms(a.clone(), exponent) {
                return rewrite("a**b * a -> a**(b + 1)", pow);
            }
        }
    }
    node(Op::Mul(lhs, rhs))
}

pub(crate) fn div_terms(lhs: Operand, rhs: Operand) -> Result<Operand> {
    if rhs.value() == 0. {
        return Err(Error::DomainError {
            op: OpKind::Div,
            operands: vec![lhs.value(), rhs.value()],
        });
    }
    if let (Operand::Const(l), Operand::Const(r)) = (&lhs, &rhs) {
        return Ok(Operand::Const(l / r));
    }
    if rhs.is_const(1.) {
        return Ok(rewrite("x / 1 -> x", lhs));
    }
    if lhs.is_const(0.) {
        return Ok(rewrite("0 / x -> 0", Operand::Const(0.)));
    }
    if let (Some((a, b)), Some((c, d))) = (pow_parts(&lhs), pow_parts(&rhs)) {
        if a == c {
            let exponent = sub_terms(b.clone(), d.clone());
            if let Ok(pow) = pow_terms(a.clone(), exponent) {
                return Ok(rewrite("a**b / a**c -> a**(b - c)", pow));
            }
        }
    }
    Ok(node(Op::Div(lhs, rhs)))
}

fn pow_value(base: f64, exponent: f64) -> Result<f64> {
    let value = base.powf(exponent);
    let undefined = (base == 0. && exponent < 0.)
        || (value.is_nan() && !base.is_nan() && !exponent.is_nan());
    if undefined {
        Err(Error::DomainError {
            op: OpKind::Pow,
            operands: vec![base, exponent],
        })
    } else {
        Ok(value)
    }
}

pub(crate) fn pow_terms(base: Operand, exponent: Operand) -> Result<Operand> {
    let value = pow_value(base.value(), exponent.value())?;
    if let (Operand::Const(_), Operand::Const(_)) = (&base, &exponent) {
        return Ok(Operand::Const(value));
    }
    if exponent.is_const(1.) {
        return Ok(rewrite("x ** 1 -> x", base));
    }
    if exponent.is_const(0.) {
        return Ok(rewrite("x ** 0 -> 1", Operand::Const(1.)));
    }
    // Only exact for a positive inner base: ((-2)**2)**0.5 is 2, (-2)**1 is not.
    if let Some((a, b)) = pow_parts(&base).filter(|(a, _)| a.value() > 0.) {
        let combined = mul_terms(b.clone(), exponent.clone());
        if let Ok(pow) = pow_terms(a.clone(), combined) {
            return Ok(rewrite("(a**b)**c -> a**(b * c)", pow));
        }
    }
    Ok(node(Op::Pow(base, exponent)))
}

pub(crate) fn neg_terms(arg: Operand) -> Operand {
    match arg {
        Operand::Const(val) => Operand::Const(-val),
        Operand::Node(arg) => {
            if let Op::Neg(inner) = arg.op() {
                return rewrite("-(-x) -> x", inner.into());
            }
            node(Op::Neg(arg))
        }
    }
}

pub(crate) fn log_terms(arg: Operand) -> Result<Operand> {
    let val = arg.value();
    if val.is_nan() || val <= 0. {
        return Err(Error::DomainError {
            op: OpKind::Log,
            operands: vec![val],
        });
    }
    let arg = match arg {
        Operand::Const(val) => return Ok(Operand::Const(val.ln())),
        Operand::Node(arg) => arg,
    };
    if let Op::Pow(base, exponent) = arg.op() {
        if let Some(log_base) = try_log(base.clone()) {
            return Ok(rewrite(
                "log(a**b) -> b*log(a)",
                mul_terms(exponent.clone(), log_base),
            ));
        }
    }
    Ok(node(Op::Log(arg)))
}

pub(crate) fn sin_terms(arg: Operand) -> Operand {
    match arg {
        Operand::Const(val) => Operand::Const(val.sin()),
        Operand::Node(arg) => node(Op::Sin(arg)),
    }
}

pub(crate) fn cos_terms(arg: Operand) -> Operand {
    match arg {
        Operand::Const(val) => Operand::Const(val.cos()),
        Operand::Node(arg) => node(Op::Cos(arg)),
    }
}

macro_rules! impl_node_op {
    ($trait:ident, $method:ident, $terms:ident) => {
        impl std::ops::$trait for &Node {
            type Output = Operand;
            fn $method(self, rhs: Self) -> Self::Output {
                $terms(self.into(), rhs.into())
            }
        }

        impl std::ops::$trait<f64> for &Node {
            type Output = Operand;
            fn $method(self, rhs: f64) -> Self::Output {
                $terms(self.into(), rhs.into())
            }
        }

        impl std::ops::$trait<&Node> for f64 {
            type Output = Operand;
            fn $method(self, rhs: &Node) -> Self::Output {
                $terms(self.into(), rhs.into())
            }
        }
    };
}

// These combinations always carry a node and can never leave the domain.
impl_node_op!(Add, add, add_terms);
impl_node_op!(Sub, sub, sub_terms);
impl_node_op!(Mul, mul, mul_terms);

impl std::ops::Neg for &Node {
    type Output = Operand;
    fn neg(self) -> Self::Output {
        neg_terms(self.into())
    }
}
