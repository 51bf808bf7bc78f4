//! Layout session: validation, seeding, the tick loop, and result assembly.

use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use crate::graph::{EdgeLayout, Graph, LayoutBounds, LayoutResult, Node, Point};
use crate::progress::{CancelToken, GuardedSink, ProgressSink};
use crate::rng::SeedJitter;
use crate::simulation::{SimEdge, SimNode, Simulation, Termination};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::time::Instant;

/// Upper bound on the per-edge spring strength after type and weight scaling.
const MAX_EDGE_STRENGTH: f64 = 2.0;
const MAX_EDGE_WEIGHT: f64 = 4.0;

/// Runs layouts for one configuration.
///
/// A session owns no node state between runs; every [`LayoutSession::run`] seeds fresh kinematic
/// state from the graph. Independent sessions can run concurrently on separate threads.
pub struct LayoutSession<'a> {
    config: SimulationConfig,
    progress: Option<GuardedSink<'a>>,
    cancel: Option<CancelToken>,
}

impl std::fmt::Debug for LayoutSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutSession")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<'a> LayoutSession<'a> {
    /// Validates the bounds and clamps every other field into range.
    pub fn new(mut config: SimulationConfig) -> Result<Self> {
        config.bounds.validate()?;
        config.clamp();
        Ok(Self {
            config,
            progress: None,
            cancel: None,
        })
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + Send + 'a) -> Self {
        self.progress = Some(GuardedSink::new(Box::new(sink)));
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Validates `graph` and returns an idle simulation seeded from it.
    ///
    /// Callers that want to drive ticks themselves can iterate the returned [`Simulation`] and
    /// finish with [`LayoutSession::assemble`].
    pub fn start(&self, graph: &Graph) -> Result<Simulation> {
        graph.validate()?;
        let nodes = seed_nodes(&self.config, &graph.nodes);
        let edges = resolve_edges(&self.config, graph);
        let mut sim = Simulation::new(self.config.clone(), nodes, edges);
        if let Some(token) = &self.cancel {
            sim.set_cancel_token(token.clone());
        }
        Ok(sim)
    }

    /// Runs `graph` to a terminal state and assembles the result.
    pub fn run(&mut self, graph: &Graph) -> Result<LayoutResult> {
        let started = Instant::now();
        let mut sim = self.start(graph)?;
        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            iterations = self.config.iterations,
            collision = self.config.collision_active(graph.nodes.len()),
            "layout started"
        );

        while let Some(progress) = sim.tick() {
            if let Some(sink) = self.progress.as_mut() {
                sink.emit(&progress);
            }
        }

        let result = Self::assemble(graph, &sim);
        tracing::debug!(
            termination = ?result.termination,
            iterations = result.iterations,
            final_alpha = result.final_alpha,
            elapsed_ms = started.elapsed().as_millis() as u64,
            sink_panics = self.progress.as_ref().map_or(0, GuardedSink::panics),
            "layout finished"
        );

        match result.termination {
            Termination::Cancelled if result.iterations == 0 => Err(Error::Cancelled),
            Termination::TimedOut => {
                tracing::warn!(
                    iterations = result.iterations,
                    timeout_ms = self.config.stabilization_timeout_ms,
                    "layout did not stabilize before the timeout"
                );
                if self.config.strict_convergence {
                    Err(Error::SimulationTimeout {
                        iterations: result.iterations,
                        elapsed: sim.elapsed(),
                    })
                } else {
                    Ok(result)
                }
            }
            _ => Ok(result),
        }
    }

    /// Builds a [`LayoutResult`] from the current state of `sim`.
    ///
    /// `graph` must be the graph `sim` was started from.
    pub fn assemble(graph: &Graph, sim: &Simulation) -> LayoutResult {
        let termination = match sim.termination() {
            Some(t) => t,
            // Still running: report what has been reached so far.
            None => Termination::Cancelled,
        };

        let mut positions: IndexMap<String, Point> = IndexMap::with_capacity(sim.nodes().len());
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for n in sim.nodes() {
            let (hw, hh) = (n.width / 2.0, n.height / 2.0);
            min_x = min_x.min(n.x - hw);
            min_y = min_y.min(n.y - hh);
            max_x = max_x.max(n.x + hw);
            max_y = max_y.max(n.y + hh);
            positions.insert(n.id.clone(), Point { x: n.x, y: n.y });
        }
        let pad = sim.config().result_padding;
        let bounds = LayoutBounds {
            min_x: min_x - pad,
            min_y: min_y - pad,
            max_x: max_x + pad,
            max_y: max_y + pad,
            width: (max_x - min_x) + 2.0 * pad,
            height: (max_y - min_y) + 2.0 * pad,
        };

        let edges = graph
            .edges
            .iter()
            .filter_map(|e| {
                let source = *positions.get(e.source.as_str())?;
                let target = *positions.get(e.target.as_str())?;
                Some(EdgeLayout {
                    id: e.id.clone(),
                    source_id: e.source.clone(),
                    target_id: e.target.clone(),
                    source,
                    target,
                })
            })
            .collect();

        LayoutResult {
            positions,
            edges,
            bounds,
            converged: termination == Termination::Converged,
            iterations: sim.iteration(),
            final_alpha: sim.alpha(),
            termination,
        }
    }
}

fn finite_point(p: Option<Point>) -> Option<Point> {
    p.filter(|p| p.x.is_finite() && p.y.is_finite())
}

fn extent(v: f64) -> f64 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}

/// Fixed nodes keep their pinned position, nodes with a prior position start there, and the
/// rest are spread by index over a circle around the center with a small seeded jitter.
fn seed_nodes(cfg: &SimulationConfig, nodes: &[Node]) -> Vec<SimNode> {
    let (cx, cy) = cfg.bounds.center();
    let mut jitter = SeedJitter::new(cfg.seed);
    let count = nodes.len().max(1) as f64;

    nodes
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let fixed = finite_point(n.fixed_position);
            let (x, y) = match (fixed, finite_point(n.position)) {
                (Some(p), _) | (None, Some(p)) => (p.x, p.y),
                (None, None) => {
                    let angle = std::f64::consts::TAU * i as f64 / count;
                    (
                        cx + cfg.seed_radius * angle.cos() + jitter.offset(cfg.seed_jitter),
                        cy + cfg.seed_radius * angle.sin() + jitter.offset(cfg.seed_jitter),
                    )
                }
            };
            let (width, height) = (extent(n.size.width), extent(n.size.height));
            let size_factor = ((width + height) / 100.0).max(0.1);
            SimNode::new(
                n.id.clone(),
                x,
                y,
                width,
                height,
                fixed.map(|p| (p.x, p.y)),
                -cfg.node_repulsion * size_factor,
            )
        })
        .collect()
}

/// Resolves endpoint ids to indices once. Self-loops exert no force and are skipped.
fn resolve_edges(cfg: &SimulationConfig, graph: &Graph) -> Vec<SimEdge> {
    let index: FxHashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    graph
        .edges
        .iter()
        .filter_map(|e| {
            let source = *index.get(e.source.as_str())?;
            let target = *index.get(e.target.as_str())?;
            if source == target {
                return None;
            }
            let rest_length = e
                .distance
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(cfg.link_distance);
            let weight = if e.weight.is_finite() {
                e.weight.clamp(0.0, MAX_EDGE_WEIGHT)
            } else {
                1.0
            };
            let strength =
                (cfg.force_strength * e.kind.stiffness() * weight).min(MAX_EDGE_STRENGTH);
            Some(SimEdge {
                source,
                target,
                rest_length,
                strength,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeKind};

    fn chain() -> Graph {
        Graph {
            nodes: vec![
                Node::new("a", 60.0, 40.0),
                Node::new("b", 60.0, 40.0),
                Node::new("c", 60.0, 40.0),
            ],
            edges: vec![
                Edge::new("ab", "a", "b", EdgeKind::Hierarchy),
                Edge::new("bc", "b", "c", EdgeKind::Connection),
            ],
        }
    }

    #[test]
    fn seeds_on_a_circle_around_the_center() {
        let cfg = SimulationConfig::default();
        let nodes = seed_nodes(&cfg, &chain().nodes);
        for n in &nodes {
            let r = (n.x - 400.0).hypot(n.y - 300.0);
            assert!((r - 200.0).abs() <= 2.0, "radius {r}");
        }
    }

    #[test]
    fn fixed_and_prior_positions_win_over_the_circle() {
        let mut graph = chain();
        graph.nodes[0] = Node::new("a", 60.0, 40.0).fixed_at(10.0, 20.0);
        graph.nodes[1] = Node::new("b", 60.0, 40.0).at(30.0, 40.0);
        let nodes = seed_nodes(&SimulationConfig::default(), &graph.nodes);
        assert_eq!((nodes[0].x, nodes[0].y), (10.0, 20.0));
        assert_eq!(nodes[0].fixed, Some((10.0, 20.0)));
        assert_eq!((nodes[1].x, nodes[1].y), (30.0, 40.0));
        assert_eq!(nodes[1].fixed, None);
    }

    #[test]
    fn larger_nodes_repel_harder() {
        let graph = Graph {
            nodes: vec![Node::new("s", 50.0, 50.0), Node::new("l", 200.0, 100.0)],
            edges: vec![],
        };
        let nodes = seed_nodes(&SimulationConfig::default(), &graph.nodes);
        assert_eq!(nodes[0].charge, -300.0);
        assert_eq!(nodes[1].charge, -900.0);
    }

    #[test]
    fn edge_strength_follows_type_and_weight() {
        let mut graph = chain();
        graph.edges.push(Edge::new("loop", "c", "c", EdgeKind::Dependency));
        let mut heavy = Edge::new("ca", "c", "a", EdgeKind::Dependency);
        heavy.weight = f64::NAN;
        heavy.distance = Some(40.0);
        graph.edges.push(heavy);

        let edges = resolve_edges(&SimulationConfig::default(), &graph);
        assert_eq!(edges.len(), 3);
        assert!((edges[0].strength - 0.75).abs() < 1e-12);
        assert!((edges[1].strength - 0.5).abs() < 1e-12);
        assert!((edges[2].strength - 0.35).abs() < 1e-12);
        assert_eq!(edges[2].rest_length, 40.0);
        assert_eq!(edges[0].rest_length, 100.0);
    }

    #[test]
    fn result_bounds_cover_node_extents_plus_padding() {
        let mut graph = chain();
        for n in &mut graph.nodes {
            n.fixed_position = Some(Point { x: 100.0, y: 100.0 });
        }
        graph.nodes[2].fixed_position = Some(Point { x: 300.0, y: 200.0 });
        let mut session = LayoutSession::new(SimulationConfig::default()).expect("session");
        let result = session.run(&graph).expect("layout");
        assert_eq!(result.bounds.min_x, 100.0 - 30.0 - 100.0);
        assert_eq!(result.bounds.max_y, 200.0 + 20.0 + 100.0);
        assert_eq!(result.bounds.width, 260.0 + 200.0);
        assert_eq!(result.edges[1].target, Point { x: 300.0, y: 200.0 });
    }
}
