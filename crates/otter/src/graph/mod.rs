use crate::error::GraphValidationError;
use crate::simulation::Termination;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Input topology, as produced by graph preparation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Defensive re-check of the invariants graph preparation is expected to uphold.
    pub fn validate(&self) -> std::result::Result<(), GraphValidationError> {
        if self.nodes.is_empty() {
            return Err(GraphValidationError::EmptyGraph);
        }
        let mut node_exists: FxHashSet<&str> = FxHashSet::default();
        node_exists.reserve(self.nodes.len());
        for n in &self.nodes {
            if !node_exists.insert(n.id.as_str()) {
                return Err(GraphValidationError::DuplicateNode {
                    node_id: n.id.clone(),
                });
            }
        }
        for e in &self.edges {
            for endpoint in [&e.source, &e.target] {
                if !node_exists.contains(endpoint.as_str()) {
                    return Err(GraphValidationError::MissingEndpoint {
                        edge_id: e.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> GraphStats {
        let node_count = self.nodes.len();
        let edge_count = self.edges.len();
        let avg_degree = if node_count == 0 {
            0.0
        } else {
            (2 * edge_count) as f64 / node_count as f64
        };
        GraphStats {
            node_count,
            edge_count,
            avg_degree,
            is_hierarchical: self.is_hierarchical(),
        }
    }

    fn is_hierarchical(&self) -> bool {
        if self.edges.is_empty() {
            return false;
        }
        let hierarchy_edges = self
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Hierarchy)
            .count();
        if hierarchy_edges * 2 >= self.edges.len() {
            return true;
        }

        // Otherwise: a forest where every node has at most one parent.
        let idx: FxHashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        let mut has_parent = vec![false; self.nodes.len()];
        let mut roots: Vec<usize> = (0..self.nodes.len()).collect();
        fn find(roots: &mut [usize], mut i: usize) -> usize {
            while roots[i] != i {
                roots[i] = roots[roots[i]];
                i = roots[i];
            }
            i
        }
        for e in &self.edges {
            let (Some(&s), Some(&t)) = (idx.get(e.source.as_str()), idx.get(e.target.as_str()))
            else {
                return false;
            };
            if std::mem::replace(&mut has_parent[t], true) {
                return false;
            }
            let (rs, rt) = (find(&mut roots, s), find(&mut roots, t));
            if rs == rt {
                return false;
            }
            roots[rs] = rt;
        }
        true
    }

    /// Copies result positions onto matching nodes as prior positions (incremental re-layout).
    pub fn with_positions_from(mut self, result: &LayoutResult) -> Self {
        for n in &mut self.nodes {
            if let Some(p) = result.positions.get(n.id.as_str()) {
                n.position = Some(*p);
            }
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub size: Size,
    /// Pinned position. Fixed nodes never move but still exert force on others.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_position: Option<Point>,
    /// Optional prior position (center), used to seed incremental re-layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
}

impl Node {
    pub fn new(id: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            id: id.into(),
            kind: String::new(),
            size: Size { width, height },
            fixed_position: None,
            position: None,
        }
    }

    pub fn fixed_at(mut self, x: f64, y: f64) -> Self {
        self.fixed_position = Some(Point { x, y });
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Point { x, y });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    #[serde(rename = "sourceId")]
    pub source: String,
    #[serde(rename = "targetId")]
    pub target: String,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Rest length override; falls back to `SimulationConfig::link_distance`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: EdgeKind,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind,
            weight: 1.0,
            distance: None,
        }
    }
}

/// Edge type. Structurally important edges are stiffer springs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeKind {
    Hierarchy,
    Dependency,
    #[default]
    Connection,
    Other(String),
}

impl EdgeKind {
    pub fn stiffness(&self) -> f64 {
        match self {
            EdgeKind::Hierarchy => 1.5,
            EdgeKind::Dependency => 0.7,
            EdgeKind::Connection | EdgeKind::Other(_) => 1.0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::Hierarchy => "hierarchy",
            EdgeKind::Dependency => "dependency",
            EdgeKind::Connection => "connection",
            EdgeKind::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for EdgeKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hierarchy" => EdgeKind::Hierarchy,
            "dependency" => EdgeKind::Dependency,
            "connection" | "" => EdgeKind::Connection,
            _ => EdgeKind::Other(value),
        }
    }
}

impl From<EdgeKind> for String {
    fn from(value: EdgeKind) -> Self {
        match value {
            EdgeKind::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance_to(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub avg_degree: f64,
    pub is_hierarchical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Edge endpoints resolved from final node positions, for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeLayout {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub source: Point,
    pub target: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResult {
    /// Final node centers, in input order.
    pub positions: IndexMap<String, Point>,
    pub edges: Vec<EdgeLayout>,
    pub bounds: LayoutBounds,
    pub converged: bool,
    pub iterations: usize,
    pub final_alpha: f64,
    pub termination: Termination,
}
