//! End to end presolve scenarios, driven through the public interface only.
use num::BigRational;

use prelp::data::number_types::{Num, Real};
use prelp::data::problem::{Problem, ProblemBuilder};
use prelp::presolve::methods::DominatedColumns;
use prelp::presolve::{
    Abort, NoCertificate, Presolve, PresolveOptions, PresolveStatus, Presolver, PresolverStatus,
    PseudoBoolean, Reductions, Timing,
};

/// `min -x` with `0 <= x <= 4` integer and the single row `x <= 3`.
fn single_fixation_problem<R: Real>() -> Problem<R> {
    let real = |value: f64| R::from_f64(value).unwrap();
    let mut builder = ProblemBuilder::new();
    let x = builder.column("x", real(-1_f64), Some(real(0_f64)), Some(real(4_f64)), true);
    builder.row(None, Some(real(3_f64)), [(x, real(1_f64))]);
    builder.build()
}

/// The dominated column happy path problem.
fn dominated_column_problem() -> Problem<f64> {
    // min -2x - y - 2z
    // a: 2x + 3y +  z <= 6
    // b:       y + 3z <= 1
    let mut builder = ProblemBuilder::new();
    let x = builder.column("x", -2_f64, Some(0_f64), Some(4_f64), true);
    let y = builder.column("y", -1_f64, Some(0_f64), Some(2_f64), true);
    let z = builder.column("z", -2_f64, Some(0_f64), Some(2_f64), true);
    builder.row(None, Some(6_f64), [(x, 2_f64), (y, 3_f64), (z, 1_f64)]);
    builder.row(None, Some(1_f64), [(y, 1_f64), (z, 3_f64)]);
    builder.build()
}

/// The multiple dominations problem.
fn multiple_dominations_problem() -> Problem<f64> {
    // min -3x - 2y - z
    // a: 2x + 3y + 4z <= 6
    // b:       y + 3z <= 1
    let mut builder = ProblemBuilder::new();
    let x = builder.column("x", -3_f64, Some(0_f64), Some(4_f64), true);
    let y = builder.column("y", -2_f64, Some(0_f64), Some(2_f64), true);
    let z = builder.column("z", -1_f64, Some(0_f64), Some(2_f64), true);
    builder.row(None, Some(6_f64), [(x, 2_f64), (y, 3_f64), (z, 4_f64)]);
    builder.row(None, Some(1_f64), [(y, 1_f64), (z, 3_f64)]);
    builder.build()
}

#[test]
fn single_fixation() {
    let mut problem = single_fixation_problem::<f64>();
    let presolve = Presolve::with_default_methods(PresolveOptions::default());

    let result = presolve.apply(&mut problem, &mut NoCertificate);

    assert_eq!(result.status, PresolveStatus::Reduced);
    assert_eq!(result.statistics.transactions_applied, 1);
    assert_eq!(problem.nr_rows(), 0);
    assert_eq!(problem.nr_columns(), 0);

    let restored = result.postsolve.restore_primal(&[], &presolve.num());
    assert_eq!(restored, vec![3_f64]);
}

#[test]
fn single_fixation_with_exact_arithmetic() {
    let mut problem = single_fixation_problem::<BigRational>();
    let presolve = Presolve::with_default_methods(PresolveOptions::default());

    let result = presolve.apply(&mut problem, &mut NoCertificate);

    assert_eq!(result.status, PresolveStatus::Reduced);
    assert_eq!(problem.nr_columns(), 0);
    let restored = result.postsolve.restore_primal(&[], &presolve.num());
    assert_eq!(restored, vec![BigRational::from_f64(3_f64).unwrap()]);
}

#[test]
fn dominated_column() {
    let mut problem = dominated_column_problem();
    let options = PresolveOptions::default();
    let mut presolve = Presolve::new(options);
    presolve.add_method(Box::new(DominatedColumns));

    let result = presolve.apply(&mut problem, &mut NoCertificate);

    assert_eq!(result.status, PresolveStatus::Reduced);
    assert_eq!(result.statistics.transactions_applied, 1);
    // Column y is gone, x and z remain.
    assert_eq!(problem.nr_columns(), 2);
    assert_eq!(problem.variable_name(0), "x");
    assert_eq!(problem.variable_name(1), "z");
    assert_eq!(problem.nr_rows(), 2);

    // A feasible point of the reduced problem lifts to one of the original.
    let restored = result.postsolve.restore_primal(&[3_f64, 0_f64], &presolve.num());
    assert_eq!(restored, vec![3_f64, 0_f64, 0_f64]);
}

#[test]
fn multiple_dominations() {
    let mut problem = multiple_dominations_problem();
    let mut presolve = Presolve::new(PresolveOptions::default());
    presolve.add_method(Box::new(DominatedColumns));

    let result = presolve.apply(&mut problem, &mut NoCertificate);

    assert_eq!(result.status, PresolveStatus::Reduced);
    // The third transaction locks a column the first one modified.
    assert_eq!(result.statistics.transactions_applied, 2);
    assert_eq!(result.statistics.transactions_rejected, 1);
    // Only x survives.
    assert_eq!(problem.nr_columns(), 1);
    assert_eq!(problem.variable_name(0), "x");
    assert_eq!(problem.nr_rows(), 1);
}

/// Emits one sparsify group and nothing else.
struct Sparsifier;

impl Presolver<f64> for Sparsifier {
    fn name(&self) -> &'static str {
        "Sparsifier"
    }

    fn timing(&self) -> Timing {
        Timing::Fast
    }

    fn execute(
        &self,
        _: &Problem<f64>,
        _: &Num<f64>,
        reductions: &mut Reductions<f64>,
        _: &Abort,
    ) -> PresolverStatus {
        reductions.sparsify(0, &[(1, 2_f64)]);
        PresolverStatus::Reduced
    }
}

#[test]
fn sparsify_with_certificate() {
    // r_eq: 2a + b = 4, r_c: 4a + b + c <= 10.
    let mut builder = ProblemBuilder::new();
    let a = builder.column("a", 0_f64, Some(0_f64), Some(1_f64), true);
    let b = builder.column("b", 0_f64, Some(0_f64), Some(1_f64), true);
    let c = builder.column("c", 1_f64, Some(0_f64), Some(1_f64), true);
    builder.row(Some(4_f64), Some(4_f64), [(a, 2_f64), (b, 1_f64)]);
    builder.row(None, Some(10_f64), [(a, 4_f64), (b, 1_f64), (c, 1_f64)]);
    let mut problem = builder.build();

    let options = PresolveOptions {
        max_rounds: 1,
        ..PresolveOptions::default()
    };
    let mut presolve = Presolve::new(options);
    presolve.add_method(Box::new(Sparsifier));

    let mut proof = Vec::new();
    {
        let mut certificate = PseudoBoolean::new(&problem, presolve.num(), &mut proof);
        presolve.apply(&mut problem, &mut certificate);
    }

    // r_c became -b + c <= 2.
    assert_eq!(problem.row(1), &[(1, -1_f64), (2, 1_f64)]);
    assert_eq!(problem.rhs(1), Some(&2_f64));

    // The proof combines the ids of r_eq and r_c and retires the old r_c.
    let text = String::from_utf8(proof).unwrap();
    assert!(text.starts_with("pseudo-Boolean proof version 1.0\nf 3\n"));
    assert!(text.contains("pol 3 2 2 * +\n"), "unexpected proof: {}", text);
    assert!(text.contains("del id 3\n"), "unexpected proof: {}", text);
}

/// Changes the right hand side of row 0 under a row lock.
struct SideSetter;

impl Presolver<f64> for SideSetter {
    fn name(&self) -> &'static str {
        "SideSetter"
    }

    fn timing(&self) -> Timing {
        Timing::Fast
    }

    fn execute(
        &self,
        _: &Problem<f64>,
        _: &Num<f64>,
        reductions: &mut Reductions<f64>,
        _: &Abort,
    ) -> PresolverStatus {
        let mut transaction = reductions.transaction();
        transaction.lock_row(0);
        transaction.change_row_rhs(0, 5_f64);
        drop(transaction);
        PresolverStatus::Reduced
    }
}

/// Deletes the coefficient at (0, 3) under a row lock.
struct EntryDeleter;

impl Presolver<f64> for EntryDeleter {
    fn name(&self) -> &'static str {
        "EntryDeleter"
    }

    fn timing(&self) -> Timing {
        Timing::Fast
    }

    fn execute(
        &self,
        _: &Problem<f64>,
        _: &Num<f64>,
        reductions: &mut Reductions<f64>,
        _: &Abort,
    ) -> PresolverStatus {
        let mut transaction = reductions.transaction();
        transaction.lock_row(0);
        transaction.change_matrix_entry(0, 3, 0_f64);
        drop(transaction);
        PresolverStatus::Reduced
    }
}

#[test]
fn lock_conflict_between_presolvers() {
    let mut builder = ProblemBuilder::new();
    for name in ["w", "x", "y", "z"] {
        builder.column(name, 1_f64, Some(0_f64), Some(2_f64), false);
    }
    builder.row(None, Some(6_f64), (0..4).map(|col| (col, 1_f64)));
    let mut problem = builder.build();

    let options = PresolveOptions {
        max_rounds: 1,
        ..PresolveOptions::default()
    };
    let mut presolve = Presolve::new(options);
    presolve.add_method(Box::new(SideSetter));
    presolve.add_method(Box::new(EntryDeleter));

    let result = presolve.apply(&mut problem, &mut NoCertificate);

    assert_eq!(result.statistics.transactions_applied, 1);
    assert_eq!(result.statistics.transactions_rejected, 1);
    assert_eq!(problem.rhs(0), Some(&5_f64));
    assert_eq!(problem.coefficient(0, 3), Some(&1_f64));
}

/// Fixes column 0 under a strong lock.
struct StrongFixer;

impl Presolver<f64> for StrongFixer {
    fn name(&self) -> &'static str {
        "StrongFixer"
    }

    fn timing(&self) -> Timing {
        Timing::Fast
    }

    fn execute(
        &self,
        _: &Problem<f64>,
        _: &Num<f64>,
        reductions: &mut Reductions<f64>,
        _: &Abort,
    ) -> PresolverStatus {
        let mut transaction = reductions.transaction();
        transaction.lock_col_strong(0);
        transaction.fix_col(0, 0_f64);
        drop(transaction);
        PresolverStatus::Reduced
    }
}

/// Tightens a bound of column 0 under a normal lock.
struct BoundTightener;

impl Presolver<f64> for BoundTightener {
    fn name(&self) -> &'static str {
        "BoundTightener"
    }

    fn timing(&self) -> Timing {
        Timing::Fast
    }

    fn execute(
        &self,
        _: &Problem<f64>,
        _: &Num<f64>,
        reductions: &mut Reductions<f64>,
        _: &Abort,
    ) -> PresolverStatus {
        let mut transaction = reductions.transaction();
        transaction.lock_col(0);
        transaction.change_col_ub(0, 5_f64);
        drop(transaction);
        PresolverStatus::Reduced
    }
}

#[test]
fn strong_lock_blocks_later_modification() {
    let mut builder = ProblemBuilder::new();
    let x = builder.column("x", 0_f64, Some(0_f64), Some(10_f64), false);
    let y = builder.column("y", 1_f64, Some(0_f64), Some(10_f64), false);
    builder.row(None, Some(10_f64), [(x, 1_f64), (y, 1_f64)]);
    let mut problem = builder.build();

    let options = PresolveOptions {
        max_rounds: 1,
        ..PresolveOptions::default()
    };
    let mut presolve = Presolve::new(options);
    presolve.add_method(Box::new(StrongFixer));
    presolve.add_method(Box::new(BoundTightener));

    let result = presolve.apply(&mut problem, &mut NoCertificate);

    assert_eq!(result.statistics.transactions_applied, 1);
    assert_eq!(result.statistics.transactions_rejected, 1);
}

#[test]
fn determinism_across_thread_counts() {
    let reference = {
        let mut problem = multiple_dominations_problem();
        let options = PresolveOptions {
            threads: 1,
            ..PresolveOptions::default()
        };
        let presolve = Presolve::with_default_methods(options);
        let result = presolve.apply(&mut problem, &mut NoCertificate);
        (problem, result.postsolve, result.status)
    };

    for threads in [2, 4] {
        let mut problem = multiple_dominations_problem();
        let options = PresolveOptions {
            threads,
            ..PresolveOptions::default()
        };
        let presolve = Presolve::with_default_methods(options);
        let result = presolve.apply(&mut problem, &mut NoCertificate);

        assert_eq!(problem, reference.0, "problem differs with {} threads", threads);
        assert_eq!(result.postsolve, reference.1, "trace differs with {} threads", threads);
        assert_eq!(result.status, reference.2);
    }
}

#[test]
fn presolve_is_idempotent() {
    let mut problem = dominated_column_problem();
    let mut presolve = Presolve::new(PresolveOptions::default());
    presolve.add_method(Box::new(DominatedColumns));

    let first = presolve.apply(&mut problem, &mut NoCertificate);
    assert_eq!(first.status, PresolveStatus::Reduced);

    let again = presolve.apply(&mut problem, &mut NoCertificate);
    assert_eq!(again.status, PresolveStatus::Unchanged);
    assert!(again.postsolve.is_empty());
}

#[test]
fn empty_logs_produce_no_output() {
    let mut problem = dominated_column_problem();
    let presolve = Presolve::<f64>::new(PresolveOptions::default());

    let mut proof = Vec::new();
    let result = {
        let mut certificate = PseudoBoolean::new(&problem, presolve.num(), &mut proof);
        presolve.apply(&mut problem, &mut certificate)
    };

    assert_eq!(result.status, PresolveStatus::Unchanged);
    assert!(result.postsolve.is_empty());
    // Nothing beyond the header was written.
    let text = String::from_utf8(proof).unwrap();
    assert_eq!(text, "pseudo-Boolean proof version 1.0\nf 2\n");
}

#[test]
fn problem_invariants_hold_after_presolve() {
    let mut problem = multiple_dominations_problem();
    let presolve = Presolve::with_default_methods(PresolveOptions::default());

    presolve.apply(&mut problem, &mut NoCertificate);

    assert!(problem.is_consistent(&presolve.num()));
}
