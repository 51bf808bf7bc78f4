//! Integrator and cooling controller.
//!
//! A [`Simulation`] moves through `Idle -> Running -> Finished(termination)`. Each tick rebuilds
//! the spatial index, sums the force accumulators, applies a semi-implicit Euler step with
//! velocity damping, optionally relaxes collisions, and then cools `alpha`.

use crate::config::SimulationConfig;
use crate::forces;
use crate::progress::{CancelToken, TickProgress};
use crate::quadtree::RepulsionParams;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    Converged,
    MaxIterations,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Idle,
    Running,
    Finished(Termination),
}

/// Kinematic state of one node, owned by the simulation for the duration of a run.
#[derive(Debug, Clone)]
pub struct SimNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub(crate) fx: f64,
    pub(crate) fy: f64,
    pub width: f64,
    pub height: f64,
    /// Pinned position; fixed nodes never move.
    pub fixed: Option<(f64, f64)>,
    /// Signed repulsion strength (negative repels).
    pub(crate) charge: f64,
}

impl SimNode {
    pub(crate) fn new(
        id: impl Into<String>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        fixed: Option<(f64, f64)>,
        charge: f64,
    ) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            fx: 0.0,
            fy: 0.0,
            width,
            height,
            fixed,
            charge,
        }
    }
}

/// Edge resolved to node indices.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimEdge {
    pub(crate) source: usize,
    pub(crate) target: usize,
    pub(crate) rest_length: f64,
    pub(crate) strength: f64,
}

#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    nodes: Vec<SimNode>,
    edges: Vec<SimEdge>,
    state: SimulationState,
    alpha: f64,
    iteration: usize,
    stable_ticks: usize,
    collision: bool,
    started: Option<Instant>,
    elapsed: Duration,
    cancel: Option<CancelToken>,
    dropped_contributions: usize,
}

impl Simulation {
    pub(crate) fn new(config: SimulationConfig, nodes: Vec<SimNode>, edges: Vec<SimEdge>) -> Self {
        let collision = config.collision_active(nodes.len());
        Self {
            alpha: config.alpha,
            config,
            nodes,
            edges,
            state: SimulationState::Idle,
            iteration: 0,
            stable_ticks: 0,
            collision,
            started: None,
            elapsed: Duration::ZERO,
            cancel: None,
            dropped_contributions: 0,
        }
    }

    pub(crate) fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn termination(&self) -> Option<Termination> {
        match self.state {
            SimulationState::Finished(t) => Some(t),
            _ => None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn elapsed(&self) -> Duration {
        match (self.state, self.started) {
            (SimulationState::Running, Some(s)) => s.elapsed(),
            _ => self.elapsed,
        }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Resets the cooling schedule to `alpha` while keeping the current positions.
    pub fn reheat(&mut self, alpha: f64) {
        self.alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            self.config.alpha
        };
        self.iteration = 0;
        self.stable_ticks = 0;
        self.started = None;
        self.elapsed = Duration::ZERO;
        self.state = SimulationState::Idle;
    }

    /// Advances one tick. Returns `None` once the simulation has reached a terminal state.
    pub fn tick(&mut self) -> Option<TickProgress> {
        match self.state {
            SimulationState::Finished(_) => return None,
            SimulationState::Idle => {
                self.state = SimulationState::Running;
                self.started = Some(Instant::now());
            }
            SimulationState::Running => {}
        }

        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            self.finish(Termination::Cancelled);
            return None;
        }

        let prev_alpha = self.alpha;
        self.step();
        self.iteration += 1;
        self.alpha = prev_alpha * (1.0 - self.config.alpha_decay);

        if (prev_alpha - self.alpha).abs() < self.config.convergence_threshold {
            self.stable_ticks += 1;
        } else {
            self.stable_ticks = 0;
        }

        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        let termination = if self.iteration >= self.config.iterations {
            Some(Termination::MaxIterations)
        } else if self.alpha < self.config.alpha_min
            || self.stable_ticks >= self.config.convergence_window
        {
            Some(Termination::Converged)
        } else if elapsed > self.config.stabilization_timeout() {
            Some(Termination::TimedOut)
        } else {
            None
        };
        if let Some(t) = termination {
            self.finish(t);
        }

        tracing::trace!(
            iteration = self.iteration,
            alpha = self.alpha,
            stable_ticks = self.stable_ticks,
            "tick"
        );

        Some(TickProgress {
            iteration: self.iteration,
            alpha: self.alpha,
            progress: (self.iteration as f64 / self.config.iterations as f64).min(1.0),
            converged: termination == Some(Termination::Converged),
        })
    }

    fn finish(&mut self, termination: Termination) {
        self.elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        self.state = SimulationState::Finished(termination);
        if self.dropped_contributions > 0 {
            tracing::warn!(
                dropped = self.dropped_contributions,
                "ignored non-finite force contributions"
            );
        }
    }

    fn step(&mut self) {
        let cfg = &self.config;
        let alpha = self.alpha;
        for n in &mut self.nodes {
            n.fx = 0.0;
            n.fy = 0.0;
        }

        let mut dropped = forces::apply_links(&mut self.nodes, &self.edges, alpha);
        if cfg.node_repulsion > 0.0 {
            let params = RepulsionParams {
                theta2: cfg.theta * cfg.theta,
                distance_min2: cfg.distance_min * cfg.distance_min,
                distance_max2: cfg.distance_max * cfg.distance_max,
                alpha,
            };
            dropped += forces::apply_repulsion(&mut self.nodes, &params);
        }
        let (cx, cy) = cfg.bounds.center();
        forces::apply_center(&mut self.nodes, cx, cy, cfg.center_force, alpha);
        forces::apply_boundary(
            &mut self.nodes,
            cfg.bounds.width,
            cfg.bounds.height,
            cfg.padding,
            cfg.boundary_strength,
        );

        let damping = 1.0 - cfg.velocity_decay;
        for n in &mut self.nodes {
            if let Some((px, py)) = n.fixed {
                n.x = px;
                n.y = py;
                n.vx = 0.0;
                n.vy = 0.0;
                continue;
            }
            let vx = (n.vx + n.fx) * damping;
            let vy = (n.vy + n.fy) * damping;
            let (x, y) = (n.x + vx, n.y + vy);
            if x.is_finite() && y.is_finite() {
                n.vx = vx;
                n.vy = vy;
                n.x = x;
                n.y = y;
            } else {
                // Hold position; the corrupted step is discarded.
                n.vx = 0.0;
                n.vy = 0.0;
                dropped += 1;
            }
        }

        if self.collision {
            forces::resolve_collisions(
                &mut self.nodes,
                cfg.collision_radius,
                cfg.collision_strength,
                cfg.collision_iterations,
            );
        }
        self.dropped_contributions += dropped;
    }
}

impl Iterator for Simulation {
    type Item = TickProgress;

    fn next(&mut self) -> Option<Self::Item> {
        self.tick()
    }
}
