//! Minimal mixed-integer solver capability. The planner is solver-agnostic:
//! it only declares bounded integer variables, linear constraints, objective
//! coefficients, and a warm-start hint, then solves under a time limit. The
//! in-crate implementation is a deterministic branch-and-bound with interval
//! propagation, sufficient for the model sizes one pattern produces.

use std::time::{Duration, Instant};

const EPS: f64 = 1e-9;

/// Handle to a declared solver variable.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SolverVar(pub usize);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unbounded,
    Abnormal,
    NotSolved,
}

impl SolveStatus {
    pub fn is_planned(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }

    pub fn name(self) -> &'static str {
        match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unbounded => "UNBOUNDED",
            SolveStatus::Abnormal => "ABNORMAL",
            SolveStatus::NotSolved => "NOT_SOLVED",
        }
    }
}

/// The capability the planner programs against. Any MIP backend supplying
/// these operations can be injected in place of the built-in one.
pub trait MipSolver: Send {
    /// Declare an integer variable with inclusive bounds.
    fn int_var(&mut self, lo: i64, hi: i64, name: &str) -> SolverVar;

    /// Add `lo <= sum(coefficient * var) <= hi`.
    fn add_constraint(&mut self, lo: f64, hi: f64, terms: &[(SolverVar, f64)], name: &str);

    /// Set (replace) a variable's minimisation-objective coefficient.
    fn set_objective(&mut self, var: SolverVar, coefficient: f64);

    /// Supply a warm-start assignment used as the initial incumbent.
    fn set_hint(&mut self, values: &[(SolverVar, i64)]);

    fn clear_hint(&mut self);

    fn solve(&mut self, time_limit: Duration) -> SolveStatus;

    /// Value of `var` in the last solution. Meaningless unless the last
    /// solve returned a planned status.
    fn solution(&self, var: SolverVar) -> i64;

    /// Objective value of the last solution.
    fn objective_value(&self) -> f64;

    /// Human-readable model dump, attached to planning failures.
    fn dump(&self) -> String;
}

struct VarDef {
    lo: i64,
    hi: i64,
    name: String,
}

struct Constraint {
    lo: f64,
    hi: f64,
    terms: Vec<(usize, f64)>,
    name: String,
}

/// Deterministic branch-and-bound over bounded integer variables.
#[derive(Default)]
pub struct BranchAndBound {
    vars: Vec<VarDef>,
    constraints: Vec<Constraint>,
    objective: Vec<f64>,
    hint: Vec<Option<i64>>,
    solution: Vec<i64>,
    solution_cost: f64,
}

impl BranchAndBound {
    pub fn new() -> Self {
        Self::default()
    }

    fn feasible(&self, values: &[i64]) -> bool {
        self.constraints.iter().all(|constraint| {
            let sum: f64 = constraint
                .terms
                .iter()
                .map(|(var, coefficient)| coefficient * values[*var] as f64)
                .sum();
            sum >= constraint.lo - EPS && sum <= constraint.hi + EPS
        })
    }

    fn cost(&self, values: &[i64]) -> f64 {
        values
            .iter()
            .zip(&self.objective)
            .map(|(value, coefficient)| *value as f64 * coefficient)
            .sum()
    }
}

struct Search<'a> {
    model: &'a BranchAndBound,
    domains: Vec<(i64, i64)>,
    best: Option<(Vec<i64>, f64)>,
    deadline: Instant,
    timed_out: bool,
}

impl<'a> Search<'a> {
    /// Interval propagation to fixpoint. Returns false on contradiction.
    fn propagate(&mut self) -> bool {
        loop {
            let mut changed = false;
            for constraint in &self.model.constraints {
                let mut sum_min = 0.0;
                let mut sum_max = 0.0;
                for (var, coefficient) in &constraint.terms {
                    let (lo, hi) = self.domains[*var];
                    let (a, b) = (coefficient * lo as f64, coefficient * hi as f64);
                    sum_min += a.min(b);
                    sum_max += a.max(b);
                }
                if sum_min > constraint.hi + EPS || sum_max < constraint.lo - EPS {
                    return false;
                }
                for (var, coefficient) in &constraint.terms {
                    if *coefficient == 0.0 {
                        continue;
                    }
                    let (lo, hi) = self.domains[*var];
                    if lo == hi {
                        continue;
                    }
                    let (a, b) = (coefficient * lo as f64, coefficient * hi as f64);
                    let rest_min = sum_min - a.min(b);
                    let rest_max = sum_max - a.max(b);
                    // c*x must fit in [constraint.lo - rest_max, constraint.hi - rest_min]
                    let term_lo = constraint.lo - rest_max;
                    let term_hi = constraint.hi - rest_min;
                    let (mut new_lo, mut new_hi) = if *coefficient > 0.0 {
                        (
                            ((term_lo - EPS) / coefficient).ceil() as i64,
                            ((term_hi + EPS) / coefficient).floor() as i64,
                        )
                    } else {
                        (
                            ((term_hi + EPS) / coefficient).ceil() as i64,
                            ((term_lo - EPS) / coefficient).floor() as i64,
                        )
                    };
                    new_lo = new_lo.max(lo);
                    new_hi = new_hi.min(hi);
                    if new_lo > new_hi {
                        return false;
                    }
                    if (new_lo, new_hi) != (lo, hi) {
                        self.domains[*var] = (new_lo, new_hi);
                        changed = true;
                    }
                }
            }
            if !changed {
                return true;
            }
        }
    }

    fn objective_lower_bound(&self) -> f64 {
        self.domains
            .iter()
            .zip(&self.model.objective)
            .map(|((lo, hi), coefficient)| {
                let (a, b) = (coefficient * *lo as f64, coefficient * *hi as f64);
                a.min(b)
            })
            .sum()
    }

    fn branch(&mut self) {
        if Instant::now() >= self.deadline {
            self.timed_out = true;
            return;
        }
        if !self.propagate() {
            return;
        }
        if let Some((_, best_cost)) = &self.best {
            if self.objective_lower_bound() >= best_cost - EPS {
                return;
            }
        }
        let Some(var) = self
            .domains
            .iter()
            .position(|(lo, hi)| lo < hi)
        else {
            let values: Vec<i64> = self.domains.iter().map(|(lo, _)| *lo).collect();
            let cost = self.model.cost(&values);
            let improves = self
                .best
                .as_ref()
                .map_or(true, |(_, best_cost)| cost < best_cost - EPS);
            if improves {
                self.best = Some((values, cost));
            }
            return;
        };

        let (lo, hi) = self.domains[var];
        let mut order: Vec<i64> = Vec::with_capacity((hi - lo + 1) as usize);
        if let Some(hinted) = self.model.hint[var] {
            if hinted >= lo && hinted <= hi {
                order.push(hinted);
            }
        }
        // descending: selection variables find feasible walks faster on 1
        let mut value = hi;
        while value >= lo {
            if !order.contains(&value) {
                order.push(value);
            }
            value -= 1;
        }

        let saved = self.domains.clone();
        for value in order {
            if self.timed_out {
                return;
            }
            self.domains = saved.clone();
            self.domains[var] = (value, value);
            self.branch();
        }
        self.domains = saved;
    }
}

impl MipSolver for BranchAndBound {
    fn int_var(&mut self, lo: i64, hi: i64, name: &str) -> SolverVar {
        debug_assert!(lo <= hi);
        let index = self.vars.len();
        self.vars.push(VarDef {
            lo,
            hi,
            name: name.to_owned(),
        });
        self.objective.push(0.0);
        self.hint.push(None);
        SolverVar(index)
    }

    fn add_constraint(&mut self, lo: f64, hi: f64, terms: &[(SolverVar, f64)], name: &str) {
        self.constraints.push(Constraint {
            lo,
            hi,
            terms: terms.iter().map(|(var, c)| (var.0, *c)).collect(),
            name: name.to_owned(),
        });
    }

    fn set_objective(&mut self, var: SolverVar, coefficient: f64) {
        self.objective[var.0] = coefficient;
    }

    fn set_hint(&mut self, values: &[(SolverVar, i64)]) {
        self.hint = vec![None; self.vars.len()];
        for (var, value) in values {
            self.hint[var.0] = Some(*value);
        }
    }

    fn clear_hint(&mut self) {
        self.hint = vec![None; self.vars.len()];
    }

    fn solve(&mut self, time_limit: Duration) -> SolveStatus {
        if self.vars.is_empty() {
            return SolveStatus::NotSolved;
        }
        let mut search = Search {
            model: self,
            domains: self.vars.iter().map(|var| (var.lo, var.hi)).collect(),
            best: None,
            deadline: Instant::now() + time_limit,
            timed_out: false,
        };

        // a complete feasible hint seeds the incumbent
        if self.hint.iter().all(Option::is_some) {
            let hinted: Vec<i64> = self.hint.iter().map(|value| value.unwrap()).collect();
            let in_bounds = hinted
                .iter()
                .zip(&self.vars)
                .all(|(value, var)| *value >= var.lo && *value <= var.hi);
            if in_bounds && self.feasible(&hinted) {
                let cost = self.cost(&hinted);
                search.best = Some((hinted, cost));
            }
        }

        search.branch();
        let timed_out = search.timed_out;
        let best = search.best.take();
        match best {
            Some((values, cost)) => {
                self.solution = values;
                self.solution_cost = cost;
                if timed_out {
                    SolveStatus::Feasible
                } else {
                    SolveStatus::Optimal
                }
            }
            None => {
                if timed_out {
                    SolveStatus::Abnormal
                } else {
                    SolveStatus::Infeasible
                }
            }
        }
    }

    fn solution(&self, var: SolverVar) -> i64 {
        self.solution[var.0]
    }

    fn objective_value(&self) -> f64 {
        self.solution_cost
    }

    fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "minimise:");
        for (index, coefficient) in self.objective.iter().enumerate() {
            if *coefficient != 0.0 {
                let _ = writeln!(out, "  {:+.6} {}", coefficient, self.vars[index].name);
            }
        }
        let _ = writeln!(out, "subject to:");
        for constraint in &self.constraints {
            let terms: Vec<String> = constraint
                .terms
                .iter()
                .map(|(var, c)| format!("{:+} {}", c, self.vars[*var].name))
                .collect();
            let _ = writeln!(
                out,
                "  {} <= {} <= {}  [{}]",
                constraint.lo,
                terms.join(" "),
                constraint.hi,
                constraint.name
            );
        }
        let _ = writeln!(out, "bounds:");
        for var in &self.vars {
            let _ = writeln!(out, "  {} in [{}, {}]", var.name, var.lo, var.hi);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_small_assignment_exactly() {
        // pick exactly one of x, y; x costs 3, y costs 1
        let mut solver = BranchAndBound::new();
        let x = solver.int_var(0, 1, "x");
        let y = solver.int_var(0, 1, "y");
        solver.add_constraint(1.0, 1.0, &[(x, 1.0), (y, 1.0)], "one_of");
        solver.set_objective(x, 3.0);
        solver.set_objective(y, 1.0);

        let status = solver.solve(Duration::from_millis(100));
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(solver.solution(x), 0);
        assert_eq!(solver.solution(y), 1);
        assert!((solver.objective_value() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn infeasible_model_is_reported() {
        let mut solver = BranchAndBound::new();
        let x = solver.int_var(0, 1, "x");
        solver.add_constraint(2.0, 3.0, &[(x, 1.0)], "impossible");
        assert_eq!(solver.solve(Duration::from_millis(50)), SolveStatus::Infeasible);
    }

    #[test]
    fn hint_seeds_the_incumbent() {
        let mut solver = BranchAndBound::new();
        let x = solver.int_var(0, 10, "x");
        let y = solver.int_var(0, 10, "y");
        solver.add_constraint(10.0, 10.0, &[(x, 1.0), (y, 1.0)], "sum");
        solver.set_objective(x, 1.0);
        solver.set_hint(&[(x, 0), (y, 10)]);

        let status = solver.solve(Duration::from_millis(100));
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(solver.solution(x), 0);
    }

    #[test]
    fn propagation_fixes_forced_variables() {
        let mut solver = BranchAndBound::new();
        let x = solver.int_var(0, 5, "x");
        let y = solver.int_var(0, 5, "y");
        // x + y = 10 forces both to 5
        solver.add_constraint(10.0, 10.0, &[(x, 1.0), (y, 1.0)], "forced");
        let status = solver.solve(Duration::from_millis(100));
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(solver.solution(x), 5);
        assert_eq!(solver.solution(y), 5);
    }

    #[test]
    fn resolve_after_objective_change_is_consistent() {
        let mut solver = BranchAndBound::new();
        let x = solver.int_var(0, 1, "x");
        let y = solver.int_var(0, 1, "y");
        solver.add_constraint(1.0, 1.0, &[(x, 1.0), (y, 1.0)], "one_of");
        solver.set_objective(x, 1.0);
        solver.set_objective(y, 3.0);
        assert_eq!(solver.solve(Duration::from_millis(100)), SolveStatus::Optimal);
        assert_eq!(solver.solution(x), 1);

        solver.set_objective(x, 5.0);
        assert_eq!(solver.solve(Duration::from_millis(100)), SolveStatus::Optimal);
        assert_eq!(solver.solution(y), 1);
    }
}
