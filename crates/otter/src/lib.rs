#![forbid(unsafe_code)]

//! Headless force-directed graph layout.
//!
//! `otter` positions the nodes of a [`Graph`] with a d3-force style simulation: springs along
//! edges, Barnes-Hut many-body repulsion, a centering pull, a soft boundary, and optional
//! collision relaxation, cooled by an exponentially decaying `alpha`.
//!
//! ```no_run
//! use otter::{Edge, EdgeKind, Graph, Node, SimulationConfig};
//!
//! let graph = Graph {
//!     nodes: vec![Node::new("a", 100.0, 60.0), Node::new("b", 100.0, 60.0)],
//!     edges: vec![Edge::new("ab", "a", "b", EdgeKind::Connection)],
//! };
//! let result = otter::layout(&graph, SimulationConfig::default())?;
//! println!("{:?}", result.positions["a"]);
//! # Ok::<(), otter::Error>(())
//! ```

pub mod config;
pub mod error;
mod forces;
pub mod graph;
pub mod progress;
pub mod quadtree;
mod rng;
pub mod session;
pub mod simulation;

pub use config::{Bounds, PartialBounds, PartialSimulationConfig, Preset, SimulationConfig, SizeTier};
pub use error::{ConfigError, Error, GraphValidationError, Result};
pub use graph::{
    Edge, EdgeKind, EdgeLayout, Graph, GraphStats, LayoutBounds, LayoutResult, Node, Point, Size,
};
pub use progress::{CancelToken, ChannelSink, ProgressSink, TickProgress};
pub use session::LayoutSession;
pub use simulation::{Simulation, SimulationState, Termination};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Headless layout entry point.
pub fn layout(graph: &Graph, config: SimulationConfig) -> Result<LayoutResult> {
    LayoutSession::new(config)?.run(graph)
}
