use symgrad::{cos, leaf, log, mul, sin, GradOrder, Node, Operand};

#[test_log::test]
fn main() {
    let a = leaf(1.);
    let b = leaf(3.);
    let c = leaf(5.);
    let ab = (&a + &b).into_node().unwrap();
    let ac = (&a + &c).into_node().unwrap();
    let abac = (&ab + &ac).into_node().unwrap();

    abac.differentiate().unwrap();
    println!("abac: {abac:#?}");
    assert_eq!(a.adjoint().value(), 2.);
    assert_eq!(b.adjoint().value(), 1.);
    assert_eq!(c.adjoint().value(), 1.);
}

/// A graph where `x` is reached through paths of different lengths, so a
/// naive worklist would run its parents' chain rules out of order.
fn diamond() -> (Node, Node, Node) {
    let x = leaf(0.7);
    let y = leaf(1.3);
    let sx = sin(&x).unwrap().into_node().unwrap();
    let sxy = mul(&sx, &y).unwrap().into_node().unwrap();
    let lsxy = log(&(&sxy + 2.).into_node().unwrap())
        .unwrap()
        .into_node()
        .unwrap();
    let cx = cos(&x).unwrap().into_node().unwrap();
    let inner = (&lsxy * &cx).into_node().unwrap();
    let root = (&(&inner * &x).into_node().unwrap() + &sx)
        .into_node()
        .unwrap();
    (root, x, y)
}

fn expected_gradient(x: f64, y: f64) -> (f64, f64) {
    // f = log(sin(x) * y + 2) * cos(x) * x + sin(x)
    let l = (x.sin() * y + 2.).ln();
    let dl_dx = x.cos() * y / (x.sin() * y + 2.);
    let dl_dy = x.sin() / (x.sin() * y + 2.);
    let dfdx = dl_dx * x.cos() * x - l * x.sin() * x + l * x.cos() + x.cos();
    let dfdy = dl_dy * x.cos() * x;
    (dfdx, dfdy)
}

#[test_log::test]
fn shared_nodes_accumulate_in_any_order() {
    let (root, x, y) = diamond();
    let (dfdx, dfdy) = expected_gradient(x.value(), y.value());

    root.differentiate_with(GradOrder::Stack).unwrap();
    let stack = (x.adjoint().value(), y.adjoint().value());
    root.differentiate_with(GradOrder::Queue).unwrap();
    let queue = (x.adjoint().value(), y.adjoint().value());

    // Accumulation order may differ, so allow for rounding.
    assert!((stack.0 - queue.0).abs() < 1e-12);
    assert!((stack.1 - queue.1).abs() < 1e-12);
    assert!((stack.0 - dfdx).abs() < 1e-12, "{} != {dfdx}", stack.0);
    assert!((stack.1 - dfdy).abs() < 1e-12, "{} != {dfdy}", stack.1);
}

#[test_log::test]
fn repeated_differentiation_is_idempotent() {
    let (root, x, y) = diamond();
    root.differentiate().unwrap();
    let first: Vec<f64> = root
        .visit_all()
        .map(|visit| visit.node.adjoint().value())
        .collect();
    root.differentiate().unwrap();
    let second: Vec<f64> = root
        .visit_all()
        .map(|visit| visit.node.adjoint().value())
        .collect();
    assert_eq!(first, second);
    assert!(root.adjoint().is_const(1.));
    let (dfdx, dfdy) = expected_gradient(x.value(), y.value());
    assert!((x.adjoint().value() - dfdx).abs() < 1e-12);
    assert!((y.adjoint().value() - dfdy).abs() < 1e-12);
}

#[test]
fn long_chains_differentiate_and_drop() {
    let x = leaf(1.);
    let mut sum = (&x + 0.5).into_node().unwrap();
    for _ in 0..100_000 {
        sum = (&sum + &x).into_node().unwrap();
    }
    assert_eq!(sum.reset_adjoints(), 100_002);
    sum.differentiate().unwrap();
    assert_eq!(x.adjoint(), Operand::Const(100_001.));
    drop(sum);
    assert!(x.adjoint().is_const(100_001.));
}
