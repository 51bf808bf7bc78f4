//! Simulation parameters.
//!
//! Every numeric field is clamped into its documented range whenever a config is built or
//! updated; only structurally invalid input (bad bounds, malformed JSON, unknown preset names)
//! is rejected.

use crate::error::ConfigError;
use crate::graph::GraphStats;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

impl Bounds {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
        {
            Ok(())
        } else {
            Err(ConfigError::InvalidBounds {
                width: self.width,
                height: self.height,
            })
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.width / 2.0, self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PartialSimulationConfig")]
pub struct SimulationConfig {
    /// Spring stiffness, `[0, 1]`.
    pub force_strength: f64,
    /// Default spring rest length, `> 0`.
    pub link_distance: f64,
    /// Many-body repulsion magnitude, `>= 0`.
    pub node_repulsion: f64,
    /// Pull toward the bounds center, `[0, 1]`. Zero disables the force.
    pub center_force: f64,
    /// Iteration budget, `[1, 10000]`.
    pub iterations: usize,
    /// Initial temperature.
    pub alpha: f64,
    pub alpha_decay: f64,
    /// Velocity damping, applied multiplicatively each tick.
    pub velocity_decay: f64,
    pub enable_collision: bool,
    /// Multiplier on a node's half-extent.
    pub collision_radius: f64,
    pub bounds: Bounds,

    /// Edge padding used by the boundary force.
    pub padding: f64,
    /// Barnes-Hut opening ratio (cell width / distance).
    pub theta: f64,
    pub distance_min: f64,
    pub distance_max: f64,
    pub alpha_min: f64,
    /// Alpha delta under which a tick counts toward convergence.
    pub convergence_threshold: f64,
    /// Consecutive sub-threshold ticks needed to report convergence.
    pub convergence_window: usize,
    pub stabilization_timeout_ms: u64,
    pub collision_iterations: usize,
    pub collision_strength: f64,
    /// Collision is skipped for graphs with more nodes than this.
    pub collision_node_limit: usize,
    pub boundary_strength: f64,
    /// Radius of the circle nodes without a prior position are seeded on.
    pub seed_radius: f64,
    /// Padding added around the final bounding box.
    pub result_padding: f64,
    /// Seed for the symmetry-breaking jitter.
    pub seed: u64,
    pub seed_jitter: f64,
    /// Turn a timeout into an error instead of a best-effort result.
    pub strict_convergence: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            force_strength: 0.5,
            link_distance: 100.0,
            node_repulsion: 300.0,
            center_force: 0.1,
            iterations: 300,
            alpha: 1.0,
            // d3-force default: 1 - 0.001^(1/300)
            alpha_decay: 0.0228,
            velocity_decay: 0.4,
            enable_collision: true,
            collision_radius: 1.0,
            bounds: Bounds::default(),
            padding: 50.0,
            theta: 0.9,
            distance_min: 10.0,
            distance_max: 300.0,
            alpha_min: 0.001,
            convergence_threshold: 0.01,
            convergence_window: 5,
            stabilization_timeout_ms: 10_000,
            collision_iterations: 2,
            collision_strength: 0.8,
            collision_node_limit: 200,
            boundary_strength: 0.1,
            seed_radius: 200.0,
            result_padding: 100.0,
            seed: 0x9E37_79B9_7F4A_7C15,
            seed_jitter: 1.0,
            strict_convergence: false,
        }
    }
}

/// Non-finite values fall back to `fallback` before clamping.
fn clamp_f64(v: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v.clamp(lo, hi)
    } else {
        fallback.clamp(lo, hi)
    }
}

impl SimulationConfig {
    pub const MAX_ITERATIONS: usize = 10_000;

    pub fn new(bounds: Bounds) -> std::result::Result<Self, ConfigError> {
        bounds.validate()?;
        Ok(Self {
            bounds,
            ..Self::default()
        })
    }

    /// Merges `partial` over the defaults and clamps the result.
    pub fn from_partial(partial: &PartialSimulationConfig) -> std::result::Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.update(partial)?;
        Ok(cfg)
    }

    pub fn from_json_str(json: &str) -> std::result::Result<Self, ConfigError> {
        let partial: PartialSimulationConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Json {
                message: e.to_string(),
            })?;
        Self::from_partial(&partial)
    }

    /// Applies `partial` on top of `self`. On error `self` is left untouched.
    pub fn update(&mut self, partial: &PartialSimulationConfig) -> std::result::Result<(), ConfigError> {
        let mut next = self.clone();
        partial.apply_to(&mut next)?;
        next.bounds.validate()?;
        next.clamp();
        *self = next;
        Ok(())
    }

    /// Clamps every numeric field into its valid range.
    pub fn clamp(&mut self) {
        let d = Self::default();
        self.force_strength = clamp_f64(self.force_strength, 0.0, 1.0, d.force_strength);
        self.link_distance = clamp_f64(self.link_distance, 1.0, 10_000.0, d.link_distance);
        self.node_repulsion = clamp_f64(self.node_repulsion, 0.0, 1_000_000.0, d.node_repulsion);
        self.center_force = clamp_f64(self.center_force, 0.0, 1.0, d.center_force);
        self.iterations = self.iterations.clamp(1, Self::MAX_ITERATIONS);
        self.alpha = clamp_f64(self.alpha, 0.0, 1.0, d.alpha);
        self.alpha_decay = clamp_f64(self.alpha_decay, 0.0, 1.0, d.alpha_decay);
        self.velocity_decay = clamp_f64(self.velocity_decay, 0.0, 1.0, d.velocity_decay);
        self.collision_radius = clamp_f64(self.collision_radius, 0.0, 10.0, d.collision_radius);

        let half_extent = if self.bounds.width.is_finite() && self.bounds.height.is_finite() {
            (self.bounds.width.min(self.bounds.height) / 2.0).max(0.0)
        } else {
            0.0
        };
        self.padding = clamp_f64(self.padding, 0.0, half_extent, d.padding);
        self.theta = clamp_f64(self.theta, 0.0, 2.0, d.theta);
        self.distance_min = clamp_f64(self.distance_min, 0.01, 10_000.0, d.distance_min);
        self.distance_max = clamp_f64(
            self.distance_max,
            self.distance_min,
            1_000_000.0,
            d.distance_max,
        );
        self.alpha_min = clamp_f64(self.alpha_min, 0.0, 1.0, d.alpha_min);
        self.convergence_threshold =
            clamp_f64(self.convergence_threshold, 0.0, 1.0, d.convergence_threshold);
        self.convergence_window = self.convergence_window.clamp(1, 1_000);
        self.stabilization_timeout_ms = self.stabilization_timeout_ms.clamp(1, 3_600_000);
        self.collision_iterations = self.collision_iterations.clamp(1, 2);
        self.collision_strength = clamp_f64(self.collision_strength, 0.0, 1.0, d.collision_strength);
        self.boundary_strength = clamp_f64(self.boundary_strength, 0.0, 1.0, d.boundary_strength);
        self.seed_radius = clamp_f64(self.seed_radius, 0.0, 100_000.0, d.seed_radius);
        self.result_padding = clamp_f64(self.result_padding, 0.0, 100_000.0, d.result_padding);
        self.seed_jitter = clamp_f64(self.seed_jitter, 0.0, 1_000.0, d.seed_jitter);
    }

    pub fn stabilization_timeout(&self) -> Duration {
        Duration::from_millis(self.stabilization_timeout_ms)
    }

    /// Collision resolution runs only when enabled and the graph is small enough.
    pub fn collision_active(&self, node_count: usize) -> bool {
        self.enable_collision && node_count <= self.collision_node_limit
    }

    /// Deterministic size tiering: small graphs favor quality, large graphs favor speed.
    pub fn optimize_for_size(&self, node_count: usize) -> Self {
        let mut cfg = self.clone();
        SizeTier::for_node_count(node_count).apply(&mut cfg);
        cfg.clamp();
        cfg
    }

    /// Picks a preset from graph statistics, keeping the receiver's bounds and run controls.
    pub fn optimize_for_graph(&self, stats: &GraphStats) -> Self {
        let tier = SizeTier::for_node_count(stats.node_count);
        let preset = if stats.is_hierarchical {
            Preset::Hierarchical
        } else if stats.avg_degree >= 4.0 {
            Preset::Network
        } else {
            tier.preset()
        };
        tracing::debug!(
            preset = %preset,
            nodes = stats.node_count,
            edges = stats.edge_count,
            avg_degree = stats.avg_degree,
            "selected layout preset"
        );

        let mut cfg = preset.config();
        cfg.bounds = self.bounds;
        cfg.seed = self.seed;
        cfg.strict_convergence = self.strict_convergence;
        cfg.stabilization_timeout_ms = self.stabilization_timeout_ms;
        // Structural presets keep their forces but still get the large-graph budget.
        if tier == SizeTier::Large {
            cfg.iterations = cfg.iterations.min(150);
            cfg.alpha_decay = cfg.alpha_decay.max(0.05);
            cfg.enable_collision = false;
        }
        cfg.clamp();
        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    pub fn for_node_count(node_count: usize) -> Self {
        match node_count {
            0..20 => SizeTier::Small,
            20..100 => SizeTier::Medium,
            _ => SizeTier::Large,
        }
    }

    fn preset(self) -> Preset {
        match self {
            SizeTier::Small => Preset::Small,
            SizeTier::Medium => Preset::Medium,
            SizeTier::Large => Preset::Large,
        }
    }

    // The stability window fires once `alpha * alpha_decay` drops below the
    // threshold, so a slower decay needs a tighter threshold to run longer.
    fn apply(self, cfg: &mut SimulationConfig) {
        match self {
            SizeTier::Small => {
                cfg.iterations = 500;
                cfg.force_strength = 0.7;
                cfg.alpha_decay = 0.0128;
                cfg.convergence_threshold = 0.001;
                cfg.enable_collision = true;
                cfg.collision_iterations = 2;
            }
            SizeTier::Medium => {
                cfg.iterations = 300;
                cfg.force_strength = 0.5;
                cfg.alpha_decay = 0.0228;
                cfg.convergence_threshold = 0.01;
                cfg.enable_collision = true;
                cfg.collision_iterations = 1;
            }
            SizeTier::Large => {
                cfg.iterations = 150;
                cfg.force_strength = 0.3;
                cfg.alpha_decay = 0.05;
                cfg.convergence_threshold = 0.01;
                cfg.enable_collision = false;
                cfg.collision_iterations = 1;
            }
        }
    }
}

/// Named configuration presets. Pure data; bounds are always the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Small,
    Medium,
    Large,
    Hierarchical,
    Network,
    Performance,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Small,
        Preset::Medium,
        Preset::Large,
        Preset::Hierarchical,
        Preset::Network,
        Preset::Performance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Small => "small",
            Preset::Medium => "medium",
            Preset::Large => "large",
            Preset::Hierarchical => "hierarchical",
            Preset::Network => "network",
            Preset::Performance => "performance",
        }
    }

    pub fn config(self) -> SimulationConfig {
        let mut cfg = SimulationConfig::default();
        match self {
            Preset::Small => SizeTier::Small.apply(&mut cfg),
            Preset::Medium => SizeTier::Medium.apply(&mut cfg),
            Preset::Large => SizeTier::Large.apply(&mut cfg),
            Preset::Hierarchical => {
                cfg.link_distance = 120.0;
                cfg.force_strength = 0.6;
                cfg.node_repulsion = 400.0;
                cfg.center_force = 0.05;
                cfg.iterations = 400;
            }
            Preset::Network => {
                cfg.link_distance = 80.0;
                cfg.node_repulsion = 500.0;
                cfg.center_force = 0.15;
                cfg.force_strength = 0.4;
            }
            Preset::Performance => {
                cfg.iterations = 100;
                cfg.alpha_decay = 0.08;
                cfg.velocity_decay = 0.5;
                cfg.theta = 1.2;
                cfg.enable_collision = false;
            }
        }
        cfg.clamp();
        cfg
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ConfigError::UnknownPreset {
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialBounds {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

/// Configuration as supplied by callers: every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialSimulationConfig {
    /// Named preset used as the base instead of the defaults.
    pub preset: Option<String>,
    pub force_strength: Option<f64>,
    pub link_distance: Option<f64>,
    pub node_repulsion: Option<f64>,
    pub center_force: Option<f64>,
    pub iterations: Option<usize>,
    pub alpha: Option<f64>,
    pub alpha_decay: Option<f64>,
    pub velocity_decay: Option<f64>,
    pub enable_collision: Option<bool>,
    pub collision_radius: Option<f64>,
    pub bounds: Option<PartialBounds>,
    pub padding: Option<f64>,
    pub theta: Option<f64>,
    pub distance_min: Option<f64>,
    pub distance_max: Option<f64>,
    pub alpha_min: Option<f64>,
    pub convergence_threshold: Option<f64>,
    pub convergence_window: Option<usize>,
    pub stabilization_timeout_ms: Option<u64>,
    pub collision_iterations: Option<usize>,
    pub collision_strength: Option<f64>,
    pub collision_node_limit: Option<usize>,
    pub boundary_strength: Option<f64>,
    pub seed_radius: Option<f64>,
    pub result_padding: Option<f64>,
    pub seed: Option<u64>,
    pub seed_jitter: Option<f64>,
    pub strict_convergence: Option<bool>,
}

impl PartialSimulationConfig {
    fn apply_to(&self, cfg: &mut SimulationConfig) -> std::result::Result<(), ConfigError> {
        if let Some(name) = self.preset.as_deref() {
            let bounds = cfg.bounds;
            *cfg = name.parse::<Preset>()?.config();
            cfg.bounds = bounds;
        }
        if let Some(b) = self.bounds {
            let width = b.width.unwrap_or(f64::NAN);
            let height = b.height.unwrap_or(f64::NAN);
            cfg.bounds = Bounds { width, height };
            cfg.bounds.validate()?;
        }

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(v) = self.$field {
                        cfg.$field = v;
                    }
                )*
            };
        }
        merge!(
            force_strength,
            link_distance,
            node_repulsion,
            center_force,
            iterations,
            alpha,
            alpha_decay,
            velocity_decay,
            enable_collision,
            collision_radius,
            padding,
            theta,
            distance_min,
            distance_max,
            alpha_min,
            convergence_threshold,
            convergence_window,
            stabilization_timeout_ms,
            collision_iterations,
            collision_strength,
            collision_node_limit,
            boundary_strength,
            seed_radius,
            result_padding,
            seed,
            seed_jitter,
            strict_convergence,
        );
        Ok(())
    }
}

impl TryFrom<PartialSimulationConfig> for SimulationConfig {
    type Error = ConfigError;

    fn try_from(value: PartialSimulationConfig) -> Result<Self, Self::Error> {
        Self::from_partial(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_clamped_not_rejected() {
        let cfg = SimulationConfig::from_partial(&PartialSimulationConfig {
            force_strength: Some(4.0),
            link_distance: Some(-5.0),
            iterations: Some(0),
            alpha_decay: Some(f64::NAN),
            velocity_decay: Some(-1.0),
            collision_iterations: Some(9),
            ..Default::default()
        })
        .expect("config");
        assert_eq!(cfg.force_strength, 1.0);
        assert_eq!(cfg.link_distance, 1.0);
        assert_eq!(cfg.iterations, 1);
        assert_eq!(cfg.alpha_decay, SimulationConfig::default().alpha_decay);
        assert_eq!(cfg.velocity_decay, 0.0);
        assert_eq!(cfg.collision_iterations, 2);
    }

    #[test]
    fn non_positive_or_missing_bounds_are_config_errors() {
        let err = SimulationConfig::from_json_str(r#"{"bounds": {"width": 0, "height": 600}}"#)
            .expect_err("zero width");
        assert!(matches!(err, ConfigError::InvalidBounds { .. }));

        let err = SimulationConfig::from_json_str(r#"{"bounds": {"width": 800}}"#)
            .expect_err("missing height");
        assert!(matches!(err, ConfigError::InvalidBounds { .. }));

        assert!(SimulationConfig::new(Bounds {
            width: -1.0,
            height: 10.0
        })
        .is_err());
    }

    #[test]
    fn update_is_atomic_on_error() {
        let mut cfg = SimulationConfig::default();
        let before = cfg.clone();
        let err = cfg.update(&PartialSimulationConfig {
            link_distance: Some(42.0),
            preset: Some("nope".to_string()),
            ..Default::default()
        });
        assert_eq!(
            err,
            Err(ConfigError::UnknownPreset {
                name: "nope".to_string()
            })
        );
        assert_eq!(cfg, before);
    }

    #[test]
    fn size_tiers_are_a_lookup_table() {
        let base = SimulationConfig::default();
        let small = base.optimize_for_size(5);
        let medium = base.optimize_for_size(50);
        let large = base.optimize_for_size(250);
        assert!(small.iterations > medium.iterations);
        assert!(medium.iterations > large.iterations);
        assert!(small.force_strength > large.force_strength);
        assert!(large.alpha_decay > medium.alpha_decay);
        assert!(small.convergence_threshold < medium.convergence_threshold);
        assert!(!large.enable_collision);
        assert_eq!(base.optimize_for_size(50), base.optimize_for_size(50));
        assert_eq!(SizeTier::for_node_count(19), SizeTier::Small);
        assert_eq!(SizeTier::for_node_count(20), SizeTier::Medium);
        assert_eq!(SizeTier::for_node_count(100), SizeTier::Large);
    }

    #[test]
    fn presets_round_trip_through_names() {
        for p in Preset::ALL {
            assert_eq!(p.name().parse::<Preset>(), Ok(p));
            assert_eq!(p.config().bounds, Bounds::default());
        }
        assert_eq!(" Network ".parse::<Preset>(), Ok(Preset::Network));
    }

    #[test]
    fn optimize_for_graph_prefers_structure_then_size() {
        let base = SimulationConfig::new(Bounds {
            width: 1200.0,
            height: 900.0,
        })
        .expect("bounds");
        let tree = GraphStats {
            node_count: 10,
            edge_count: 9,
            avg_degree: 1.8,
            is_hierarchical: true,
        };
        let cfg = base.optimize_for_graph(&tree);
        assert_eq!(cfg.link_distance, Preset::Hierarchical.config().link_distance);
        assert_eq!(cfg.bounds, base.bounds);

        let dense = GraphStats {
            node_count: 30,
            edge_count: 90,
            avg_degree: 6.0,
            is_hierarchical: false,
        };
        assert_eq!(
            base.optimize_for_graph(&dense).node_repulsion,
            Preset::Network.config().node_repulsion
        );

        let sparse = GraphStats {
            node_count: 150,
            edge_count: 100,
            avg_degree: 1.3,
            is_hierarchical: false,
        };
        assert!(!base.optimize_for_graph(&sparse).enable_collision);
    }

    #[test]
    fn config_deserializes_from_partial_json() {
        let cfg: SimulationConfig = serde_json::from_str(
            r#"{"linkDistance": 80, "preset": "performance", "enableCollision": true}"#,
        )
        .expect("config");
        assert_eq!(cfg.link_distance, 80.0);
        assert_eq!(cfg.iterations, Preset::Performance.config().iterations);
        assert!(cfg.enable_collision);
    }
}
