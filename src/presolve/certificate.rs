//! # Certificates
//!
//! A certificate backend is a capability the applier invokes on every accepted reduction, from
//! its single threaded section only. The default backend does nothing; the pseudo-Boolean
//! backend writes one or more proof lines per reduction to a text stream.
//!
//! The proof format supports only one sided `>=` constraints, so every two sided row of the
//! input maps to up to two proof constraints, whose ids the emitter tracks per row. Proof
//! constraints are numbered by a monotonic counter; replacing or deleting a row side emits a
//! `del id` for the superseded constraint.
//!
//! The certificate is an advisory side channel: an io error degrades the emitter to silence but
//! does not invalidate the presolve result.
use std::io::Write;

use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::{BoundDirection, Problem};

/// What the applier tells a certificate backend.
///
/// All methods are invoked after the corresponding problem mutation, except
/// [`Certificate::linear_combination`] which is invoked once per rewritten row with the rewrite
/// already applied.
pub trait Certificate<R> {
    /// Whether reductions must restrict themselves to integral coefficients and scales for this
    /// backend to stay sound. The applier rejects transactions that violate this.
    fn requires_integral_coefficients(&self) -> bool {
        false
    }

    /// A column bound was tightened.
    fn bound_change(&mut self, problem: &Problem<R>, col: usize, direction: BoundDirection, value: &R);

    /// A column was fixed.
    fn fixed_column(&mut self, problem: &Problem<R>, col: usize, value: &R);

    /// A row side was replaced (`Some`) or removed (`None`).
    fn row_side_change(&mut self, problem: &Problem<R>, row: usize, direction: BoundDirection, value: Option<&R>);

    /// A row was marked redundant.
    fn row_redundant(&mut self, problem: &Problem<R>, row: usize);

    /// A single coefficient of a row changed.
    fn coefficient_changed(&mut self, problem: &Problem<R>, row: usize, col: usize);

    /// `scale` times the equality row `eq` was subtracted from `target`.
    fn linear_combination(&mut self, problem: &Problem<R>, target: usize, eq: usize, scale: &R);

    /// The problem was compressed; internal per row and per column state must be rewritten with
    /// the same mappings.
    fn compress(&mut self, row_mapping: &[i32], col_mapping: &[i32]);
}

/// Backend that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCertificate;

impl<R> Certificate<R> for NoCertificate {
    fn bound_change(&mut self, _: &Problem<R>, _: usize, _: BoundDirection, _: &R) {}

    fn fixed_column(&mut self, _: &Problem<R>, _: usize, _: &R) {}

    fn row_side_change(&mut self, _: &Problem<R>, _: usize, _: BoundDirection, _: Option<&R>) {}

    fn row_redundant(&mut self, _: &Problem<R>, _: usize) {}

    fn coefficient_changed(&mut self, _: &Problem<R>, _: usize, _: usize) {}

    fn linear_combination(&mut self, _: &Problem<R>, _: usize, _: usize, _: &R) {}

    fn compress(&mut self, _: &[i32], _: &[i32]) {}
}

/// Pseudo-Boolean proof emitter.
///
/// Sound for problems whose variables are 0/1 and whose data is integral; the applier enforces
/// the latter through [`Certificate::requires_integral_coefficients`].
#[derive(Debug)]
pub struct PseudoBoolean<R, W> {
    writer: W,
    /// Set after an io error; no further lines are attempted.
    broken: bool,
    /// Monotonic constraint id watermark; the id of the next written constraint is
    /// `next_constraint_id + 1`.
    next_constraint_id: u64,
    /// Proof constraint id of each row's left hand side variant, `-1` when absent.
    lhs_ids: Vec<i64>,
    /// Proof constraint id of each row's right hand side variant, `-1` when absent.
    rhs_ids: Vec<i64>,
    variable_names: Vec<String>,
    num: Num<R>,
}

impl<R, W> PseudoBoolean<R, W>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
    W: Write,
{
    /// Create an emitter for a problem and write the proof header.
    ///
    /// Each row of the problem contributes one initial proof constraint per finite side; the
    /// header's `f` line carries the resulting id watermark.
    pub fn new(problem: &Problem<R>, num: Num<R>, writer: W) -> Self {
        let nr_rows = problem.nr_rows();
        let mut emitter = Self {
            writer,
            broken: false,
            next_constraint_id: 0,
            lhs_ids: Vec::with_capacity(nr_rows),
            rhs_ids: Vec::with_capacity(nr_rows),
            variable_names: (0..problem.nr_columns())
                .map(|j| problem.variable_name(j).to_string())
                .collect(),
            num,
        };

        for row in 0..nr_rows {
            let flags = problem.row_flags(row);
            if flags.lhs_inf() {
                emitter.lhs_ids.push(-1);
            } else {
                emitter.next_constraint_id += 1;
                emitter.lhs_ids.push(emitter.next_constraint_id as i64);
            }
            if flags.rhs_inf() {
                emitter.rhs_ids.push(-1);
            } else {
                emitter.next_constraint_id += 1;
                emitter.rhs_ids.push(emitter.next_constraint_id as i64);
            }
        }

        let header = format!(
            "pseudo-Boolean proof version 1.0\nf {}\n",
            emitter.next_constraint_id,
        );
        emitter.write(&header);
        emitter
    }

    /// The current id watermark, for tests and reporting.
    pub fn constraint_count(&self) -> u64 {
        self.next_constraint_id
    }

    fn write(&mut self, text: &str) {
        if self.broken {
            return;
        }
        if self.writer.write_all(text.as_bytes()).is_err() {
            self.broken = true;
        }
    }

    fn as_integer(&self, value: &R) -> i64 {
        debug_assert!(self.num.is_integral(value));

        self.num.round(value).to_f64() as i64
    }

    /// Render one side of a row as a `>=` constraint over literals with positive coefficients.
    ///
    /// The left hand side `<a, x> >= l` keeps positive coefficients on plain literals; negative
    /// coefficients move to complemented literals, raising the degree. The right hand side is
    /// first negated to `<-a, x> >= -u` and then normalized the same way.
    fn render_side(&self, problem: &Problem<R>, row: usize, direction: BoundDirection) -> Option<String> {
        let side = match direction {
            BoundDirection::Lower => problem.lhs(row)?,
            BoundDirection::Upper => problem.rhs(row)?,
        };
        let mut degree = match direction {
            BoundDirection::Lower => self.as_integer(side),
            BoundDirection::Upper => -self.as_integer(side),
        };

        let mut terms = Vec::with_capacity(problem.row(row).len());
        for (col, value) in problem.row(row) {
            let coefficient = match direction {
                BoundDirection::Lower => self.as_integer(value),
                BoundDirection::Upper => -self.as_integer(value),
            };
            debug_assert_ne!(coefficient, 0);

            let name = &self.variable_names[*col];
            if coefficient > 0 {
                terms.push(format!("{} {}", coefficient, name));
            } else {
                terms.push(format!("{} ~{}", -coefficient, name));
                degree += -coefficient;
            }
        }

        Some(format!("{} >= {} ;", terms.join(" +"), degree))
    }

    fn side_id(&mut self, row: usize, direction: BoundDirection) -> &mut i64 {
        match direction {
            BoundDirection::Lower => &mut self.lhs_ids[row],
            BoundDirection::Upper => &mut self.rhs_ids[row],
        }
    }

    /// Write a replacement constraint for a row side and retire the superseded one.
    fn replace_side(&mut self, problem: &Problem<R>, row: usize, direction: BoundDirection, keyword: &str) {
        let Some(rendered) = self.render_side(problem, row, direction) else { return };
        self.next_constraint_id += 1;
        let line = format!("{} {}\n", keyword, rendered);
        self.write(&line);

        let new_id = self.next_constraint_id as i64;
        let old = std::mem::replace(self.side_id(row, direction), new_id);
        if old >= 0 {
            let line = format!("del id {}\n", old);
            self.write(&line);
        }
    }
}

impl<R, W> Certificate<R> for PseudoBoolean<R, W>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
    W: Write,
{
    fn requires_integral_coefficients(&self) -> bool {
        true
    }

    fn bound_change(&mut self, _problem: &Problem<R>, col: usize, direction: BoundDirection, value: &R) {
        let name = self.variable_names[col].clone();
        let rounded = self.as_integer(value);
        // Only 0/1 domains are expressible.
        let line = match (direction, rounded) {
            (BoundDirection::Upper, 0) => format!("rup 1 ~{} >= 1 ;\n", name),
            (BoundDirection::Lower, 1) => format!("rup 1 {} >= 1 ;\n", name),
            _ => return,
        };
        self.next_constraint_id += 1;
        self.write(&line);
    }

    fn fixed_column(&mut self, _problem: &Problem<R>, col: usize, value: &R) {
        let name = self.variable_names[col].clone();
        let line = match self.as_integer(value) {
            0 => format!("red 1 ~{} >= 1 ; {} -> 0\n", name, name),
            1 => format!("red 1 {} >= 1 ; {} -> 1\n", name, name),
            _ => return,
        };
        self.next_constraint_id += 1;
        self.write(&line);
    }

    fn row_side_change(&mut self, problem: &Problem<R>, row: usize, direction: BoundDirection, value: Option<&R>) {
        match value {
            Some(_) => self.replace_side(problem, row, direction, "rup"),
            None => {
                let old = std::mem::replace(self.side_id(row, direction), -1);
                if old >= 0 {
                    let line = format!("del id {}\n", old);
                    self.write(&line);
                }
            },
        }
    }

    fn row_redundant(&mut self, _problem: &Problem<R>, row: usize) {
        for direction in [BoundDirection::Lower, BoundDirection::Upper] {
            let old = std::mem::replace(self.side_id(row, direction), -1);
            if old >= 0 {
                let line = format!("del id {}\n", old);
                self.write(&line);
            }
        }
    }

    fn coefficient_changed(&mut self, problem: &Problem<R>, row: usize, _col: usize) {
        // A coefficient change is not derivable by unit propagation in general.
        self.replace_side(problem, row, BoundDirection::Lower, "u");
        self.replace_side(problem, row, BoundDirection::Upper, "u");
    }

    fn linear_combination(&mut self, _problem: &Problem<R>, target: usize, eq: usize, scale: &R) {
        // Subtracting `scale * eq` adds the rhs variant of the equality when the scale is
        // positive and the lhs variant when it is negative.
        let weight = self.as_integer(scale);
        let eq_id = if weight >= 0 { self.rhs_ids[eq] } else { self.lhs_ids[eq] };
        if eq_id < 0 {
            return;
        }

        for direction in [BoundDirection::Lower, BoundDirection::Upper] {
            let old = *self.side_id(target, direction);
            if old < 0 {
                continue;
            }
            self.next_constraint_id += 1;
            let line = format!("pol {} {} {} * +\n", old, eq_id, weight.abs());
            self.write(&line);

            let new_id = self.next_constraint_id as i64;
            *self.side_id(target, direction) = new_id;
            let line = format!("del id {}\n", old);
            self.write(&line);
        }
    }

    fn compress(&mut self, row_mapping: &[i32], col_mapping: &[i32]) {
        debug_assert_eq!(row_mapping.len(), self.lhs_ids.len());
        debug_assert_eq!(col_mapping.len(), self.variable_names.len());

        let mut index = 0;
        self.lhs_ids.retain(|_| {
            index += 1;
            row_mapping[index - 1] >= 0
        });
        index = 0;
        self.rhs_ids.retain(|_| {
            index += 1;
            row_mapping[index - 1] >= 0
        });
        index = 0;
        self.variable_names.retain(|_| {
            index += 1;
            col_mapping[index - 1] >= 0
        });
    }
}

#[cfg(test)]
mod test {
    use crate::data::number_types::Num;
    use crate::data::problem::{BoundDirection, Problem, ProblemBuilder};
    use crate::presolve::certificate::{Certificate, PseudoBoolean};

    fn binary_problem() -> Problem<f64> {
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -1_f64, Some(0_f64), Some(1_f64), true);
        let y = builder.column("y", -1_f64, Some(0_f64), Some(1_f64), true);
        builder.row(None, Some(1_f64), [(x, 1_f64), (y, 1_f64)]);
        builder.row(Some(0_f64), Some(1_f64), [(x, 1_f64), (y, -1_f64)]);
        builder.build()
    }

    #[test]
    fn header_counts_finite_sides() {
        let problem = binary_problem();
        let mut output = Vec::new();
        let emitter = PseudoBoolean::new(&problem, Num::default(), &mut output);

        // Row 0 has one finite side, row 1 has two.
        assert_eq!(emitter.constraint_count(), 3);
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("pseudo-Boolean proof version 1.0\nf 3\n"));
    }

    #[test]
    fn fixation_and_deletion_lines() {
        let problem = binary_problem();
        let mut output = Vec::new();
        {
            let mut emitter = PseudoBoolean::new(&problem, Num::default(), &mut output);
            emitter.fixed_column(&problem, 1, &0_f64);
            emitter.row_redundant(&problem, 1);
        }

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("red 1 ~y >= 1 ; y -> 0\n"));
        assert!(text.contains("del id 2\n"));
        assert!(text.contains("del id 3\n"));
    }

    #[test]
    fn each_term_prints_its_own_name() {
        let problem = binary_problem();
        let mut output = Vec::new();
        {
            let mut emitter = PseudoBoolean::new(&problem, Num::default(), &mut output);
            emitter.row_side_change(&problem, 1, BoundDirection::Upper, Some(&1_f64));
        }

        let text = String::from_utf8(output).unwrap();
        // x + (-y) <= 1 normalizes to 1 ~x +1 y >= 0.
        assert!(text.contains("rup 1 ~x +1 y >= 0 ;\n"), "unexpected: {}", text);
    }

    #[test]
    fn broken_stream_degrades_to_silence() {
        struct Failing;
        impl std::io::Write for Failing {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let problem = binary_problem();
        let mut emitter = PseudoBoolean::new(&problem, Num::default(), Failing);
        // No panic on further events.
        emitter.fixed_column(&problem, 0, &1_f64);
    }
}
