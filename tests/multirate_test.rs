//! Recursive multirate nesting on a three-rate linear system.
//!
//! The fastest rate is integrated by LSRK54, the middle rate by an
//! MRI-GARK composer around it, and the slowest by a second MRI-GARK
//! composer around the middle one.

mod common;

use atmos_ode::config::{ExplicitChoice, MultirateChoice, MultirateMethod};
use atmos_ode::time::{
    LowStorageRungeKutta, LsrkTableau, MisTableau, MriGarkExplicit, MriGarkScheme,
    MriGarkTableau, MultirateInfinitesimalStep, SubstepPolicy,
};
use atmos_ode::{BoxedSolver, OdeError, OdeSolver, SolverInfo};
use common::{ThreeRate, max_error, observed_orders, three_rate_exact, three_rate_initial};

/// Build the three-level stack with outer step `h` using boxed solvers.
fn boxed_stack(h: f64, y: &Vec<f64>) -> BoxedSolver<Vec<f64>> {
    let substeps = SubstepPolicy::Fixed(2);
    let level = MultirateChoice {
        method: MultirateMethod::MriGark { scheme: MriGarkScheme::Erk33a },
        substeps,
    };
    let fastest = ExplicitChoice::default().build(ThreeRate { level: 0 }, y, h / 36.0, 0.0);
    let middle = level.build(ThreeRate { level: 1 }, fastest, y, h / 6.0, 0.0).unwrap();
    level.build(ThreeRate { level: 2 }, middle, y, h, 0.0).unwrap()
}

fn run(mut solver: impl OdeSolver<Vec<f64>>, n: usize) -> f64 {
    let mut y = three_rate_initial();
    for _ in 0..n {
        solver.step(&mut y, None, None).unwrap();
    }
    max_error(&y, &three_rate_exact(1.0))
}

#[test]
fn test_three_rate_nesting_converges() {
    let errors: Vec<f64> = [10, 20, 40]
        .iter()
        .map(|&n| {
            let y = three_rate_initial();
            run(boxed_stack(1.0 / n as f64, &y), n)
        })
        .collect();
    let orders = observed_orders(&errors);
    println!("three-rate errors: {:?}, orders: {:?}", errors, orders);
    assert!(orders[orders.len() - 1] > 2.5, "observed orders {:?}", orders);
}

#[test]
fn test_statically_nested_stack_matches_boxed() {
    let n = 10;
    let h = 1.0 / n as f64;
    let y = three_rate_initial();

    let fastest = LowStorageRungeKutta::new(
        ThreeRate { level: 0 },
        LsrkTableau::carpenter_kennedy_54(),
        &y,
        h / 36.0,
        0.0,
    );
    let middle = MriGarkExplicit::new(
        ThreeRate { level: 1 },
        fastest,
        MriGarkTableau::erk33a(-0.5),
        SubstepPolicy::Fixed(2),
        &y,
        h / 6.0,
        0.0,
    )
    .unwrap();
    let outer = MriGarkExplicit::new(
        ThreeRate { level: 2 },
        middle,
        MriGarkTableau::erk33a(-0.5),
        SubstepPolicy::Fixed(2),
        &y,
        h,
        0.0,
    )
    .unwrap();
    assert_eq!(outer.order(), 3);
    assert_eq!(outer.n_stages(), 3);

    let static_error = run(outer, n);
    let boxed_error = run(boxed_stack(h, &y), n);
    assert_eq!(static_error, boxed_error);
}

#[test]
fn test_mixed_families_nest() {
    // MIS outside an MRI-GARK level: still a consistent integrator.
    let n = 20;
    let h = 1.0 / n as f64;
    let y = three_rate_initial();
    let fastest = ExplicitChoice::default().build(ThreeRate { level: 0 }, &y, h / 36.0, 0.0);
    let middle = MriGarkExplicit::new(
        ThreeRate { level: 1 },
        fastest,
        MriGarkTableau::erk22a(),
        SubstepPolicy::FastDt,
        &y,
        h / 6.0,
        0.0,
    )
    .unwrap();
    let outer = MultirateInfinitesimalStep::new(
        ThreeRate { level: 2 },
        middle,
        MisTableau::mis2(),
        SubstepPolicy::FastDt,
        &y,
        h,
        0.0,
    )
    .unwrap();
    assert_eq!(outer.order(), 2);
    assert!(run(outer, n) < 1e-2);
}

#[test]
fn test_inner_dt_too_large_rejected() {
    let y = three_rate_initial();
    let fastest = ExplicitChoice::default().build(ThreeRate { level: 0 }, &y, 0.5, 0.0);
    let result = MriGarkExplicit::new(
        ThreeRate { level: 1 },
        fastest,
        MriGarkTableau::erk33a(-0.5),
        SubstepPolicy::FastDt,
        &y,
        0.1,
        0.0,
    );
    assert!(matches!(result, Err(OdeError::Nesting(_))));
}
