//! Force accumulators.
//!
//! Every contributor adds into `SimNode::fx/fy` for the current tick. Forces are expressed in
//! velocity units (as in d3-force), so the integrator adds them straight onto the velocity.
//! Non-finite contributions are dropped instead of propagated.

use crate::quadtree::{Body, QuadTree, RepulsionParams};
use crate::simulation::{SimEdge, SimNode};

/// Below this, distances are treated as zero.
pub(crate) const EPSILON: f64 = 1e-9;

/// Adds `(fx, fy)` to the node's accumulator. Returns `false` if the contribution was dropped.
#[inline]
fn accumulate(n: &mut SimNode, fx: f64, fy: f64) -> bool {
    if fx.is_finite() && fy.is_finite() {
        n.fx += fx;
        n.fy += fy;
        true
    } else {
        false
    }
}

/// Spring force along every edge. The correction is split evenly between the endpoints, or
/// given entirely to the free endpoint when the other one is fixed.
pub(crate) fn apply_links(nodes: &mut [SimNode], edges: &[SimEdge], alpha: f64) -> usize {
    let mut dropped = 0usize;
    for e in edges {
        let (a, b) = (e.source, e.target);
        let (a_fixed, b_fixed) = (nodes[a].fixed.is_some(), nodes[b].fixed.is_some());
        if a_fixed && b_fixed {
            continue;
        }
        let dx = nodes[b].x - nodes[a].x;
        let dy = nodes[b].y - nodes[a].y;
        let len = (dx * dx + dy * dy).sqrt();
        if len.is_nan() || len <= EPSILON {
            // Direction is undefined; repulsion separates coincident endpoints.
            continue;
        }

        let k = (len - e.rest_length) / len * alpha * e.strength;
        let (fx, fy) = (dx * k, dy * k);
        let (a_share, b_share) = match (a_fixed, b_fixed) {
            (true, false) => (0.0, 1.0),
            (false, true) => (1.0, 0.0),
            _ => (0.5, 0.5),
        };
        if !accumulate(&mut nodes[a], fx * a_share, fy * a_share) {
            dropped += 1;
        }
        if !accumulate(&mut nodes[b], -fx * b_share, -fy * b_share) {
            dropped += 1;
        }
    }
    dropped
}

/// Many-body repulsion via a Barnes-Hut quadtree rebuilt from the current positions.
pub(crate) fn apply_repulsion(nodes: &mut [SimNode], params: &RepulsionParams) -> usize {
    if nodes.len() < 2 {
        return 0;
    }
    let bodies: Vec<Body> = nodes
        .iter()
        .map(|n| Body {
            x: n.x,
            y: n.y,
            charge: n.charge,
        })
        .collect();
    let Some(tree) = QuadTree::build(&bodies) else {
        return 0;
    };

    let forces = repulsion_forces(&tree, nodes.len(), params);
    let mut dropped = 0usize;
    for (n, (fx, fy)) in nodes.iter_mut().zip(forces) {
        if !accumulate(n, fx, fy) {
            dropped += 1;
        }
    }
    dropped
}

#[cfg(feature = "parallel")]
fn repulsion_forces(tree: &QuadTree, len: usize, params: &RepulsionParams) -> Vec<(f64, f64)> {
    use rayon::prelude::*;
    (0..len)
        .into_par_iter()
        .map(|i| tree.repulsion_on(i, params))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn repulsion_forces(tree: &QuadTree, len: usize, params: &RepulsionParams) -> Vec<(f64, f64)> {
    (0..len).map(|i| tree.repulsion_on(i, params)).collect()
}

/// Pulls every node toward `(cx, cy)` proportionally to its offset.
pub(crate) fn apply_center(nodes: &mut [SimNode], cx: f64, cy: f64, strength: f64, alpha: f64) {
    if strength <= 0.0 {
        return;
    }
    let k = strength * alpha;
    for n in nodes {
        let (fx, fy) = ((cx - n.x) * k, (cy - n.y) * k);
        accumulate(n, fx, fy);
    }
}

/// Soft boundary: a weak spring toward `[padding, dimension - padding]` on each axis.
///
/// Not scaled by alpha, so it keeps acting after the primary forces have cooled down.
pub(crate) fn apply_boundary(
    nodes: &mut [SimNode],
    width: f64,
    height: f64,
    padding: f64,
    strength: f64,
) {
    if strength <= 0.0 {
        return;
    }
    let (min_x, max_x) = (padding, (width - padding).max(padding));
    let (min_y, max_y) = (padding, (height - padding).max(padding));
    for n in nodes {
        let fx = axis_pull(n.x, min_x, max_x) * strength;
        let fy = axis_pull(n.y, min_y, max_y) * strength;
        accumulate(n, fx, fy);
    }
}

fn axis_pull(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo - v
    } else if v > hi {
        hi - v
    } else {
        0.0
    }
}

/// Collision relaxation on positions. Overlapping circle pairs are pushed apart along the line
/// between their centers by `strength * overlap`. Candidate pairs come from a quadtree built at
/// the start of each pass. Returns the number of overlapping pairs seen in the last pass.
pub(crate) fn resolve_collisions(
    nodes: &mut [SimNode],
    radius_scale: f64,
    strength: f64,
    passes: usize,
) -> usize {
    let radii: Vec<f64> = nodes
        .iter()
        .map(|n| n.width.max(n.height) / 2.0 * radius_scale)
        .collect();
    let max_radius = radii.iter().copied().fold(0.0, f64::max);
    let mut overlapping = 0usize;
    let mut candidates = Vec::new();
    for _ in 0..passes {
        let bodies: Vec<Body> = nodes
            .iter()
            .map(|n| Body {
                x: n.x,
                y: n.y,
                charge: 0.0,
            })
            .collect();
        let Some(tree) = QuadTree::build(&bodies) else {
            return 0;
        };

        overlapping = 0;
        for i in 0..nodes.len() {
            candidates.clear();
            tree.bodies_within(bodies[i].x, bodies[i].y, radii[i] + max_radius, &mut candidates);
            // Each pair is handled once, from its lower index.
            candidates.retain(|&j| j > i);
            candidates.sort_unstable();
            for &j in &candidates {
                if separate_pair(nodes, i, j, radii[i] + radii[j], strength) {
                    overlapping += 1;
                }
            }
        }
    }
    overlapping
}

/// Pushes `i` and `j` apart if their circles overlap. Returns whether they did.
fn separate_pair(
    nodes: &mut [SimNode],
    i: usize,
    j: usize,
    min_dist: f64,
    strength: f64,
) -> bool {
    let (i_fixed, j_fixed) = (nodes[i].fixed.is_some(), nodes[j].fixed.is_some());
    if (i_fixed && j_fixed) || min_dist <= 0.0 {
        return false;
    }
    let mut dx = nodes[j].x - nodes[i].x;
    let mut dy = nodes[j].y - nodes[i].y;
    let mut dist = (dx * dx + dy * dy).sqrt();
    if dist >= min_dist || !dist.is_finite() {
        return false;
    }
    if dist < EPSILON {
        // Coincident centers: separate along a direction derived from the indices.
        let angle = (i * 7 + j * 13) as f64;
        (dx, dy, dist) = (angle.cos(), angle.sin(), 1.0);
    }

    let push = (min_dist - dist) * strength;
    let (ux, uy) = (dx / dist, dy / dist);
    let (i_share, j_share) = match (i_fixed, j_fixed) {
        (true, false) => (0.0, 1.0),
        (false, true) => (1.0, 0.0),
        _ => (0.5, 0.5),
    };
    nodes[i].x -= ux * push * i_share;
    nodes[i].y -= uy * push * i_share;
    nodes[j].x += ux * push * j_share;
    nodes[j].y += uy * push * j_share;
    true
}
