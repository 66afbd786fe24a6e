//! MIP-based traversal planner. Each structural edge contributes a pair of
//! directional candidates; the solver picks one direction per edge and a
//! global order so the walk is connected, covering, and cheap under the
//! exponential branching objective. Solutions are cached and only re-solved
//! when statistics drift past the change thresholds.

mod edge;
pub mod solver;

pub use edge::{directional_cost, Directional, PlannerEdge};
pub use solver::{BranchAndBound, MipSolver, SolveStatus, SolverVar};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{MotifError, Result};
use crate::graph::SchemaGraph;
use crate::traversal::procedure::{GraphProcedure, ProcedureEdge, ProcedureVertex};
use crate::traversal::structure::{Structure, VertexId, VertexKind, VertexProps};

pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_millis(100);
pub const HIGHER_TIME_LIMIT: Duration = Duration::from_millis(200);
/// Default ceiling on the objective exponent before overflow capping.
pub const OBJECTIVE_COEFFICIENT_MAX_EXPONENT_DEFAULT: f64 = 3.0;
/// Total-cost drift (either direction) that invalidates the cached plan.
pub const PLANNER_COST_MAX_CHANGE: f64 = 0.2;
/// Per-edge growth ratio that invalidates the cached plan...
pub const VARIABLE_COST_MAX_CHANGE: f64 = 2.0;
/// ...provided the edge also carries this share of the total cost.
pub const VARIABLE_TO_PLANNER_COST_MIN_CHANGE: f64 = 0.02;

#[derive(Clone, Debug)]
struct VertexVars {
    is_starting: SolverVar,
    is_ending: SolverVar,
    has_incoming: SolverVar,
    has_outgoing: SolverVar,
}

#[derive(Clone, Debug)]
struct PlannerVertex {
    id: VertexId,
    is_thing: bool,
    props: VertexProps,
    vars: Option<VertexVars>,
    cost_last_recorded: f64,
    hint_start: bool,
    hint_end: bool,
    hint_incoming: bool,
    hint_outgoing: bool,
    value_starting: bool,
}

struct PlannerState {
    structure: Structure,
    vertices: Vec<PlannerVertex>,
    edges: Vec<PlannerEdge>,
    solver: Box<dyn MipSolver>,
    snapshot: Option<u64>,
    up_to_date: bool,
    out_of_date_pending: bool,
    last_status: SolveStatus,
    total_cost_last_recorded: f64,
    branching_factor: f64,
    cost_exponent_unit: f64,
}

/// Per-structure planner singleton. `optimise` is guarded by an atomic flag;
/// concurrent callers block on `procedure()` until the winner publishes.
pub struct GraphPlanner {
    state: Mutex<PlannerState>,
    procedure: Mutex<Option<Arc<GraphProcedure>>>,
    procedure_ready: Condvar,
    is_optimising: AtomicBool,
}

impl GraphPlanner {
    pub fn create(structure: Structure) -> Self {
        Self::create_with_solver(structure, Box::new(BranchAndBound::new()))
    }

    /// Build the planner around an injected solver capability.
    pub fn create_with_solver(structure: Structure, solver: Box<dyn MipSolver>) -> Self {
        debug_assert!(structure.vertices().len() > 1);
        let vertices: Vec<PlannerVertex> = structure
            .vertices()
            .iter()
            .map(|vertex| PlannerVertex {
                id: vertex.id,
                is_thing: vertex.kind == VertexKind::Thing,
                props: vertex.props.clone(),
                vars: None,
                cost_last_recorded: 0.01,
                hint_start: false,
                hint_end: false,
                hint_incoming: false,
                hint_outgoing: false,
                value_starting: false,
            })
            .collect();
        let edges: Vec<PlannerEdge> = structure
            .edges()
            .iter()
            .map(|edge| PlannerEdge::new(edge.index, edge.from, edge.to, edge.kind.clone()))
            .collect();
        let mut state = PlannerState {
            structure,
            vertices,
            edges,
            solver,
            snapshot: None,
            up_to_date: false,
            out_of_date_pending: false,
            last_status: SolveStatus::NotSolved,
            total_cost_last_recorded: 0.01,
            branching_factor: 0.01,
            cost_exponent_unit: 0.1,
        };
        state.initialise_model();
        Self {
            state: Mutex::new(state),
            procedure: Mutex::new(None),
            procedure_ready: Condvar::new(),
            is_optimising: AtomicBool::new(false),
        }
    }

    /// Produce (or reuse) the traversal procedure for the current statistics.
    pub fn optimise(&self, schema: &SchemaGraph, extra_time: bool) -> Result<()> {
        if self
            .is_optimising
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // another caller is optimising; procedure() will block until ready
            return Ok(());
        }
        let result = self.optimise_locked(schema, extra_time);
        self.is_optimising.store(false, Ordering::Release);
        result
    }

    fn optimise_locked(&self, schema: &SchemaGraph, extra_time: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.update_objective(schema);
        if state.up_to_date
            && state.last_status == SolveStatus::Optimal
            && self.procedure.lock().is_some()
        {
            debug!("optimisation still optimal and up-to-date");
            return Ok(());
        }

        let limit = if extra_time {
            HIGHER_TIME_LIMIT
        } else {
            DEFAULT_TIME_LIMIT
        };
        let status = state.solve(limit);
        debug!(status = status.name(), "traversal planning finished");
        if !status.is_planned() {
            trace!(model = %state.solver.dump(), "planning failed");
            return Err(MotifError::UnexpectedPlanningError {
                status: status.name(),
                model: state.solver.dump(),
            });
        }
        state.record_results();
        let procedure = Arc::new(state.build_procedure()?);
        state.last_status = status;
        state.up_to_date = true;

        let mut slot = self.procedure.lock();
        *slot = Some(procedure);
        self.procedure_ready.notify_all();
        Ok(())
    }

    /// The published procedure; blocks until an optimise call publishes one.
    pub fn procedure(&self) -> Arc<GraphProcedure> {
        let mut slot = self.procedure.lock();
        while slot.is_none() {
            self.procedure_ready.wait(&mut slot);
        }
        slot.as_ref().expect("waited for publication").clone()
    }

    pub fn try_procedure(&self) -> Option<Arc<GraphProcedure>> {
        self.procedure.lock().clone()
    }

    /// Count of solver invocations avoided is observable through this: an
    /// up-to-date planner reuses its procedure without solving.
    pub fn is_up_to_date(&self) -> bool {
        self.state.lock().up_to_date
    }
}

impl PlannerState {
    fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn initialise_model(&mut self) {
        let edge_count = self.edge_count();

        for vertex in &mut self.vertices {
            let name = format!("vertex_{}", vertex.id.0);
            vertex.vars = Some(VertexVars {
                is_starting: self.solver.int_var(0, 1, &format!("{name}_is_starting")),
                is_ending: self.solver.int_var(0, 1, &format!("{name}_is_ending")),
                has_incoming: self.solver.int_var(0, 1, &format!("{name}_has_incoming")),
                has_outgoing: self.solver.int_var(0, 1, &format!("{name}_has_outgoing")),
            });
        }
        for edge in &mut self.edges {
            let edge_index = edge.index;
            for directional in edge.directionals_mut() {
                let name = format!(
                    "edge_{}_{}",
                    edge_index,
                    if directional.is_forward { "fwd" } else { "bwd" }
                );
                let is_selected = self.solver.int_var(0, 1, &format!("{name}_is_selected"));
                let order_number =
                    self.solver
                        .int_var(0, edge_count as i64, &format!("{name}_order_number"));
                let order_assignment = (0..edge_count)
                    .map(|i| {
                        self.solver
                            .int_var(0, 1, &format!("{name}_order_assignment[{i}]"))
                    })
                    .collect();
                directional.vars = Some(edge::DirectionalVars {
                    is_selected,
                    order_number,
                    order_assignment,
                });
            }
        }

        self.initialise_vertex_constraints();
        self.initialise_edge_constraints();
    }

    fn vertex_vars(&self, id: VertexId) -> &VertexVars {
        self.vertices[id.0 as usize]
            .vars
            .as_ref()
            .expect("model initialised")
    }

    fn initialise_vertex_constraints(&mut self) {
        // exactly one starting vertex
        let starting: Vec<(SolverVar, f64)> = self
            .vertices
            .iter()
            .map(|vertex| (vertex.vars.as_ref().expect("initialised").is_starting, 1.0))
            .collect();
        self.solver
            .add_constraint(1.0, 1.0, &starting, "one_starting_vertex");

        for vertex in &self.vertices {
            let vars = vertex.vars.as_ref().expect("initialised");
            // a vertex is reached either as the start or through an incoming edge
            self.solver.add_constraint(
                1.0,
                1.0,
                &[(vars.is_starting, 1.0), (vars.has_incoming, 1.0)],
                &format!("vertex_{}_start_or_incoming", vertex.id.0),
            );

            let incoming: Vec<(SolverVar, f64)> = self
                .edges
                .iter()
                .flat_map(|edge| edge.directionals())
                .filter(|directional| directional.to == vertex.id)
                .map(|directional| {
                    (directional.vars.as_ref().expect("initialised").is_selected, 1.0)
                })
                .collect();
            if !incoming.is_empty() {
                let mut terms = vec![(vars.has_incoming, -1.0)];
                terms.extend(incoming);
                self.solver.add_constraint(
                    0.0,
                    self.edges.len() as f64 * 2.0,
                    &terms,
                    &format!("vertex_{}_incoming_support", vertex.id.0),
                );
            } else {
                self.solver.add_constraint(
                    0.0,
                    0.0,
                    &[(vars.has_incoming, 1.0)],
                    &format!("vertex_{}_no_incoming", vertex.id.0),
                );
            }

            let outgoing: Vec<(SolverVar, f64)> = self
                .edges
                .iter()
                .flat_map(|edge| edge.directionals())
                .filter(|directional| directional.from == vertex.id)
                .map(|directional| {
                    (directional.vars.as_ref().expect("initialised").is_selected, 1.0)
                })
                .collect();
            if !outgoing.is_empty() {
                let mut terms = vec![(vars.has_outgoing, -1.0)];
                terms.extend(outgoing);
                self.solver.add_constraint(
                    0.0,
                    self.edges.len() as f64 * 2.0,
                    &terms,
                    &format!("vertex_{}_outgoing_support", vertex.id.0),
                );
            } else {
                self.solver.add_constraint(
                    0.0,
                    0.0,
                    &[(vars.has_outgoing, 1.0)],
                    &format!("vertex_{}_no_outgoing", vertex.id.0),
                );
            }
        }
    }

    fn initialise_edge_constraints(&mut self) {
        let edge_count = self.edge_count();

        for edge_index in 0..self.edges.len() {
            let (fwd_selected, bwd_selected) = {
                let edge = &self.edges[edge_index];
                (
                    edge.forward.vars.as_ref().expect("initialised").is_selected,
                    edge.backward.vars.as_ref().expect("initialised").is_selected,
                )
            };
            // exactly one direction per structural edge
            self.solver.add_constraint(
                1.0,
                1.0,
                &[(fwd_selected, 1.0), (bwd_selected, 1.0)],
                &format!("edge_{edge_index}_one_direction"),
            );
        }

        // collect the per-directional data first to keep the borrowck happy
        struct DirectionalModel {
            vars: edge::DirectionalVars,
            from: VertexId,
            to: VertexId,
            edge_index: usize,
            name: String,
        }
        let directionals: Vec<DirectionalModel> = self
            .edges
            .iter()
            .flat_map(|edge| {
                edge.directionals().into_iter().map(move |directional| DirectionalModel {
                    vars: directional.vars.clone().expect("initialised"),
                    from: directional.from,
                    to: directional.to,
                    edge_index: edge.index,
                    name: format!(
                        "edge_{}_{}",
                        edge.index,
                        if directional.is_forward { "fwd" } else { "bwd" }
                    ),
                })
            })
            .collect();

        for directional in &directionals {
            // order assignment sums to the selection flag
            let mut selected_terms = vec![(directional.vars.is_selected, -1.0)];
            let mut order_terms = vec![(directional.vars.order_number, -1.0)];
            for (i, assignment) in directional.vars.order_assignment.iter().enumerate() {
                selected_terms.push((*assignment, 1.0));
                order_terms.push((*assignment, (i + 1) as f64));
            }
            self.solver.add_constraint(
                0.0,
                0.0,
                &selected_terms,
                &format!("{}_order_if_selected", directional.name),
            );
            self.solver.add_constraint(
                0.0,
                0.0,
                &order_terms,
                &format!("{}_assign_order_number", directional.name),
            );

            // vertex flow: an endpoint flag dominates each selected edge
            let from_vars = self.vertex_vars(directional.from).clone();
            let to_vars = self.vertex_vars(directional.to).clone();
            self.solver.add_constraint(
                0.0,
                1.0,
                &[
                    (from_vars.has_outgoing, 1.0),
                    (directional.vars.is_selected, -1.0),
                ],
                &format!("{}_out_from_vertex", directional.name),
            );
            self.solver.add_constraint(
                0.0,
                1.0,
                &[
                    (to_vars.has_incoming, 1.0),
                    (directional.vars.is_selected, -1.0),
                ],
                &format!("{}_in_to_vertex", directional.name),
            );
        }

        // order sequencing: a selected edge's successors at its target come
        // later, unless the target is an ending vertex. The relaxation
        // constant must exceed the maximum order number.
        let big = (edge_count + 1) as f64;
        for directional in &directionals {
            let to_end = self.vertex_vars(directional.to).is_ending;
            for subsequent in &directionals {
                if subsequent.from != directional.to
                    || subsequent.edge_index == directional.edge_index
                {
                    continue;
                }
                self.solver.add_constraint(
                    1.0 - big,
                    2.0 * big + edge_count as f64,
                    &[
                        (subsequent.vars.order_number, 1.0),
                        (directional.vars.order_number, -1.0),
                        (directional.vars.is_selected, -big),
                        (to_end, big),
                    ],
                    &format!("{}_order_sequence", directional.name),
                );
            }
        }

        // exactly one edge per order position
        for position in 0..edge_count {
            let terms: Vec<(SolverVar, f64)> = directionals
                .iter()
                .map(|directional| (directional.vars.order_assignment[position], 1.0))
                .collect();
            self.solver.add_constraint(
                1.0,
                1.0,
                &terms,
                &format!("one_edge_at_order_{}", position + 1),
            );
        }
    }

    fn update_objective(&mut self, schema: &SchemaGraph) {
        let current = schema.snapshot();
        if self.snapshot == Some(current) {
            return;
        }
        self.snapshot = Some(current);
        self.set_branching_factor(schema);
        self.set_cost_exponent_unit(schema);

        let mut total_cost_next = 0.1;
        let mut out_of_date = self.out_of_date_pending;
        let edge_count = self.edge_count();
        let branching_factor = self.branching_factor;
        let cost_exponent_unit = self.cost_exponent_unit;
        let total_last = self.total_cost_last_recorded;

        let mut objective_updates: Vec<(SolverVar, f64)> = Vec::new();
        for edge in &mut self.edges {
            for directional in edge.directionals_mut() {
                let from_props = self.structure.vertex(directional.from).props.clone();
                let to_props = self.structure.vertex(directional.to).props.clone();
                let cost = directional_cost(directional, &from_props, &to_props, schema);
                directional.cost_next = cost;
                total_cost_next += cost;
                if cost / directional.cost_previous >= VARIABLE_COST_MAX_CHANGE
                    && cost / total_last >= VARIABLE_TO_PLANNER_COST_MIN_CHANGE
                {
                    out_of_date = true;
                }
                let vars = directional.vars.as_ref().expect("initialised");
                for (i, assignment) in vars.order_assignment.iter().enumerate() {
                    let exponent = cost_exponent_unit * (edge_count - 1 - i) as f64;
                    let coefficient = cost * branching_factor.powf(exponent);
                    debug_assert!(coefficient.is_finite());
                    objective_updates.push((*assignment, coefficient));
                }
            }
        }
        for (var, coefficient) in objective_updates {
            self.solver.set_objective(var, coefficient);
        }

        // starting at a vertex pays its retrieval cost one position before
        // the first edge
        for index in 0..self.vertices.len() {
            let cost = self.vertex_cost(VertexId(index as u32), schema);
            total_cost_next += cost;
            let vertex = &mut self.vertices[index];
            vertex.cost_last_recorded = cost;
            let starting = vertex.vars.as_ref().expect("initialised").is_starting;
            let coefficient =
                cost * branching_factor.powf(cost_exponent_unit * edge_count as f64);
            debug_assert!(coefficient.is_finite());
            self.solver.set_objective(starting, coefficient);
        }

        let total_ratio = total_cost_next / self.total_cost_last_recorded;
        if (total_ratio - 1.0).abs() >= PLANNER_COST_MAX_CHANGE {
            out_of_date = true;
        }
        if out_of_date {
            self.up_to_date = false;
            self.out_of_date_pending = false;
            self.total_cost_last_recorded = total_cost_next;
            for edge in &mut self.edges {
                for directional in edge.directionals_mut() {
                    directional.record_cost();
                }
            }
            self.seed_warm_start();
        }
    }

    fn set_branching_factor(&mut self, schema: &SchemaGraph) {
        let stats = schema.stats();
        let entities = stats.instances_transitive(schema.root_entity()) as f64;
        let mut roles = stats.instances_transitive(schema.root_role()) as f64;
        if roles == 0.0 {
            roles = 1.0;
        }
        if entities > 0.0 {
            self.branching_factor = roles / entities;
        }
    }

    /// The per-position exponent step of the objective. The default ceiling
    /// is spread over the edge count, then bounded so the largest possible
    /// coefficient stays finite even under extreme statistics.
    fn set_cost_exponent_unit(&mut self, schema: &SchemaGraph) {
        let edge_count = self.edge_count() as f64;
        let exp_unit = ((OBJECTIVE_COEFFICIENT_MAX_EXPONENT_DEFAULT - 1.0) / edge_count).min(1.0);

        let mut exp_max_inc = exp_unit * edge_count;
        let exp_max = 1.0 + exp_max_inc;
        let things = edge::thing_instances_transitive(schema).max(2) as f64;
        // the branching factor itself can outgrow the thing count when
        // entities are scarce, so the overflow bound is taken against the
        // larger base
        let base = things.max(self.branching_factor);
        let max_coefficient = base.powf(exp_max);
        if !max_coefficient.is_finite() || max_coefficient > i64::MAX as f64 {
            exp_max_inc = ((i64::MAX as f64).ln() / base.ln() - 1.0).max(0.0);
        }
        self.cost_exponent_unit = exp_max_inc / edge_count;
        debug_assert!(self.cost_exponent_unit.is_finite() && self.cost_exponent_unit >= 0.0);
    }

    fn vertex_cost(&self, id: VertexId, schema: &SchemaGraph) -> f64 {
        let stats = schema.stats();
        let vertex = &self.vertices[id.0 as usize];
        if vertex.is_thing {
            if vertex.props.iid.is_some() {
                1.0
            } else if !vertex.props.types.is_empty() {
                let resolved: Vec<_> = vertex
                    .props
                    .types
                    .iter()
                    .filter_map(|label| schema.resolve(label).ok())
                    .collect();
                stats.instances_sum(&resolved) as f64
            } else {
                (stats.instances_transitive(schema.root_entity())
                    + stats.instances_transitive(schema.root_attribute())
                    + stats.instances_transitive(schema.root_relation())) as f64
            }
        } else if !vertex.props.labels.is_empty() {
            vertex.props.labels.len() as f64
        } else {
            schema.thing_types().len() as f64
        }
    }

    /// Greedy BFS seed: walk from the cheapest vertex, ordering unseeded
    /// edges by ascending recorded cost, and hand the assignment to the
    /// solver as a hint.
    fn seed_warm_start(&mut self) {
        for vertex in &mut self.vertices {
            vertex.hint_start = false;
            vertex.hint_end = false;
            vertex.hint_incoming = false;
            vertex.hint_outgoing = false;
        }
        for edge in &mut self.edges {
            for directional in edge.directionals_mut() {
                directional.initial_order = None;
            }
        }

        let start = self
            .vertices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.cost_last_recorded
                    .partial_cmp(&b.cost_last_recorded)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(index, _)| VertexId(index as u32))
            .expect("planner has vertices");
        self.vertices[start.0 as usize].hint_start = true;

        let mut queue: Vec<VertexId> = vec![start];
        let mut edge_counter = 0usize;
        while let Some(vertex) = queue.first().copied() {
            queue.remove(0);
            let mut outgoing: Vec<(usize, bool, f64, VertexId)> = Vec::new();
            for (edge_index, edge) in self.edges.iter().enumerate() {
                if edge.forward.initial_order.is_some() || edge.backward.initial_order.is_some() {
                    continue;
                }
                for directional in edge.directionals() {
                    if directional.from == vertex && !directional.is_self_closure() {
                        outgoing.push((
                            edge_index,
                            directional.is_forward,
                            directional.cost_previous,
                            directional.to,
                        ));
                    }
                }
            }
            outgoing.sort_by(|a, b| {
                a.2.partial_cmp(&b.2)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
                    .then(b.1.cmp(&a.1)) // forward wins ties
            });
            // a structural edge may appear twice (self-referential vertex
            // sets); only its first directional is seeded
            let mut seeded_edges: Vec<usize> = Vec::new();
            let mut any = false;
            for (edge_index, is_forward, _, target) in outgoing {
                if seeded_edges.contains(&edge_index) {
                    continue;
                }
                seeded_edges.push(edge_index);
                any = true;
                edge_counter += 1;
                let edge = &mut self.edges[edge_index];
                let (seeded, opposite) = if is_forward {
                    (&mut edge.forward, &mut edge.backward)
                } else {
                    (&mut edge.backward, &mut edge.forward)
                };
                seeded.initial_order = Some(edge_counter);
                opposite.initial_order = Some(0);
                self.vertices[target.0 as usize].hint_incoming = true;
                if !queue.contains(&target) {
                    queue.push(target);
                }
            }
            if any {
                self.vertices[vertex.0 as usize].hint_outgoing = true;
            } else {
                self.vertices[vertex.0 as usize].hint_end = true;
            }
        }

        let mut hint: Vec<(SolverVar, i64)> = Vec::new();
        for vertex in &self.vertices {
            let vars = vertex.vars.as_ref().expect("initialised");
            hint.push((vars.is_starting, i64::from(vertex.hint_start)));
            hint.push((vars.is_ending, i64::from(vertex.hint_end)));
            hint.push((vars.has_incoming, i64::from(vertex.hint_incoming)));
            hint.push((vars.has_outgoing, i64::from(vertex.hint_outgoing)));
        }
        for edge in &self.edges {
            for directional in edge.directionals() {
                let vars = directional.vars.as_ref().expect("initialised");
                let order = directional.initial_order.unwrap_or(0);
                hint.push((vars.is_selected, i64::from(order > 0)));
                hint.push((vars.order_number, order as i64));
                for (i, assignment) in vars.order_assignment.iter().enumerate() {
                    hint.push((*assignment, i64::from(order == i + 1)));
                }
            }
        }
        self.solver.set_hint(&hint);
    }

    fn solve(&mut self, limit: Duration) -> SolveStatus {
        self.solver.solve(limit)
    }

    fn record_results(&mut self) {
        for vertex in &mut self.vertices {
            let vars = vertex.vars.as_ref().expect("initialised");
            vertex.value_starting = self.solver.solution(vars.is_starting) == 1;
        }
        for edge in &mut self.edges {
            for directional in edge.directionals_mut() {
                let vars = directional.vars.as_ref().expect("initialised");
                directional.selected = self.solver.solution(vars.is_selected) == 1;
                directional.order = self.solver.solution(vars.order_number) as usize;
            }
        }
    }

    /// Extract the ordered walk. The solver's order is repaired into a valid
    /// traversal if a relaxation artefact left a successor before its source.
    fn build_procedure(&mut self) -> Result<GraphProcedure> {
        let start = self
            .vertices
            .iter()
            .find(|vertex| vertex.value_starting)
            .map(|vertex| vertex.id)
            .ok_or(MotifError::IllegalState("no starting vertex in solution"))?;

        let mut selected: Vec<&Directional> = self
            .edges
            .iter()
            .flat_map(|edge| edge.directionals())
            .filter(|directional| directional.selected)
            .collect();
        selected.sort_by_key(|directional| directional.order);

        let mut ordered: Vec<ProcedureEdge> = Vec::with_capacity(selected.len());
        let mut visited = vec![start];
        while !selected.is_empty() {
            let position = selected
                .iter()
                .position(|directional| visited.contains(&directional.from))
                .ok_or(MotifError::IllegalState("solution walk is disconnected"))?;
            let directional = selected.remove(position);
            if !visited.contains(&directional.to) {
                visited.push(directional.to);
            }
            ordered.push(ProcedureEdge {
                order: ordered.len() + 1,
                kind: directional.kind.clone(),
                from: directional.from,
                to: directional.to,
                is_forward: directional.is_forward,
            });
        }

        let vertices: Vec<ProcedureVertex> = self
            .structure
            .vertices()
            .iter()
            .map(|vertex| ProcedureVertex {
                id: vertex.id,
                var: vertex.var,
                reference: vertex.reference.clone(),
                is_thing: vertex.kind == VertexKind::Thing,
                is_start: vertex.id == start,
                props: vertex.props.clone(),
            })
            .collect();
        Ok(GraphProcedure::new(vertices, ordered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ValueType;
    use crate::graph::Label;
    use crate::pattern::{Conjunction, RolePlayer};
    use crate::traversal::structure::project;

    fn schema() -> SchemaGraph {
        let schema = SchemaGraph::new();
        let person = schema.put_entity_type("person").unwrap();
        let name = schema
            .put_attribute_type("name", ValueType::String)
            .unwrap();
        schema.put_owns(person, name, false).unwrap();
        let marriage = schema.put_relation_type("marriage").unwrap();
        let spouse = schema.put_relates(marriage, "spouse").unwrap();
        schema.put_plays(person, spouse).unwrap();
        schema.override_instance_count(person, 1000);
        schema.override_instance_count(name, 900);
        schema.override_instance_count(marriage, 50);
        schema.override_instance_count(spouse, 100);
        schema.record_has_edge(person, name, 1);
        schema
    }

    fn marriage_pattern() -> Conjunction {
        let mut conj = Conjunction::new();
        let x = conj.named_thing("x");
        let y = conj.named_thing("y");
        conj.isa_label(x, Label::of("person"));
        conj.isa_label(y, Label::of("person"));
        let rel = conj.anon_thing();
        let role_a = conj.labelled_type(Label::scoped("spouse", "marriage"));
        let role_b = conj.labelled_type(Label::scoped("spouse", "marriage"));
        conj.relation(
            rel,
            vec![RolePlayer::new(Some(role_a), x), RolePlayer::new(Some(role_b), y)],
        );
        conj.isa_label(rel, Label::of("marriage"));
        conj
    }

    fn plan(schema: &SchemaGraph, conj: &Conjunction) -> Arc<GraphProcedure> {
        let structure = project(conj, schema);
        let planner = GraphPlanner::create(structure);
        planner.optimise(schema, true).unwrap();
        planner.procedure()
    }

    #[test]
    fn plan_covers_every_vertex_and_edge() {
        let schema = schema();
        let conj = marriage_pattern();
        let structure = project(&conj, &schema);
        let edge_count = structure.edges().len();
        let vertex_count = structure.vertices().len();

        let procedure = plan(&schema, &conj);
        assert_eq!(procedure.edges().len(), edge_count);
        assert_eq!(procedure.vertices().len(), vertex_count);
        procedure.validate().unwrap();
    }

    #[test]
    fn plan_is_deterministic() {
        let schema = schema();
        let conj = marriage_pattern();
        let a = plan(&schema, &conj);
        let b = plan(&schema, &conj);
        assert_eq!(a.summary(), b.summary());
    }

    #[test]
    fn snapshot_reuse_skips_the_solver() {
        let schema = schema();
        let conj = marriage_pattern();
        let structure = project(&conj, &schema);
        let planner = GraphPlanner::create(structure);
        planner.optimise(&schema, true).unwrap();
        let first = planner.procedure();
        assert!(planner.is_up_to_date());

        // no statistic writes: the snapshot is unchanged and the second call
        // must return the identical procedure object
        planner.optimise(&schema, false).unwrap();
        let second = planner.procedure();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn small_drift_keeps_cached_plan_large_drift_resolves() {
        let schema = schema();
        let conj = marriage_pattern();
        let structure = project(&conj, &schema);
        let planner = GraphPlanner::create(structure);
        planner.optimise(&schema, true).unwrap();
        let first = planner.procedure();

        // tiny drift: below every threshold, plan stays cached
        schema.record_has_edge(
            schema.resolve(&Label::of("person")).unwrap(),
            schema.resolve(&Label::of("name")).unwrap(),
            1,
        );
        planner.optimise(&schema, false).unwrap();
        assert!(Arc::ptr_eq(&first, &planner.procedure()));

        // large drift: instance explosion forces a re-solve
        schema.override_instance_count(schema.resolve(&Label::of("person")).unwrap(), 1_000_000);
        planner.optimise(&schema, true).unwrap();
        let replanned = planner.procedure();
        replanned.validate().unwrap();
    }
}
