//! Barnes-Hut quadtree over body positions.
//!
//! Cells live in a flat arena (`Vec<Cell>`) and refer to each other by index. Children are always
//! pushed after their parent, so a reverse scan of the arena is a valid post-order for
//! aggregating charge and centroids.

/// A point mass. `charge` is the signed repulsion strength (negative repels).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub x: f64,
    pub y: f64,
    pub charge: f64,
}

/// Parameters for a single repulsion query.
#[derive(Debug, Clone, Copy)]
pub struct RepulsionParams {
    /// Squared opening ratio: a cell of width `w` at squared distance `l` is approximated when
    /// `w * w / theta2 < l`.
    pub theta2: f64,
    pub distance_min2: f64,
    pub distance_max2: f64,
    pub alpha: f64,
}

// Subdivision stops here; deeper bodies share the leaf chain.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
struct Cell {
    x0: f64,
    y0: f64,
    size: f64,
    children: [Option<usize>; 4],
    /// Head of the body chain when this cell is a leaf.
    first: Option<usize>,
    charge: f64,
    cx: f64,
    cy: f64,
    count: usize,
}

impl Cell {
    fn new(x0: f64, y0: f64, size: f64) -> Self {
        Self {
            x0,
            y0,
            size,
            children: [None; 4],
            first: None,
            charge: 0.0,
            cx: 0.0,
            cy: 0.0,
            count: 0,
        }
    }

    fn is_internal(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    fn quadrant(&self, x: f64, y: f64) -> usize {
        let half = self.size / 2.0;
        let right = x >= self.x0 + half;
        let bottom = y >= self.y0 + half;
        (right as usize) | ((bottom as usize) << 1)
    }

    fn child_origin(&self, quadrant: usize) -> (f64, f64) {
        let half = self.size / 2.0;
        let x0 = if quadrant & 1 == 1 { self.x0 + half } else { self.x0 };
        let y0 = if quadrant & 2 == 2 { self.y0 + half } else { self.y0 };
        (x0, y0)
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x <= self.x0 + self.size && y >= self.y0 && y <= self.y0 + self.size
    }

    /// Squared distance from `(x, y)` to the nearest point of the cell.
    fn distance2_to(&self, x: f64, y: f64) -> f64 {
        let dx = (self.x0 - x).max(0.0).max(x - (self.x0 + self.size));
        let dy = (self.y0 - y).max(0.0).max(y - (self.y0 + self.size));
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone)]
pub struct QuadTree {
    cells: Vec<Cell>,
    bodies: Vec<Body>,
    /// Next body in the same leaf chain.
    next: Vec<Option<usize>>,
}

impl QuadTree {
    /// Builds the tree over every body with a finite position. Returns `None` if there are none.
    pub fn build(bodies: &[Body]) -> Option<Self> {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for b in bodies.iter().filter(|b| b.x.is_finite() && b.y.is_finite()) {
            min_x = min_x.min(b.x);
            min_y = min_y.min(b.y);
            max_x = max_x.max(b.x);
            max_y = max_y.max(b.y);
        }
        if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
            return None;
        }

        // Square root cell, padded so that points on the max edge land inside.
        let size = (max_x - min_x).max(max_y - min_y).max(1.0) * 1.0001;
        let mut tree = Self {
            cells: Vec::with_capacity(bodies.len() * 2 + 1),
            bodies: bodies.to_vec(),
            next: vec![None; bodies.len()],
        };
        tree.cells.push(Cell::new(min_x, min_y, size));

        for (idx, b) in bodies.iter().enumerate() {
            if b.x.is_finite() && b.y.is_finite() {
                tree.insert(idx);
            }
        }
        tree.aggregate();
        Some(tree)
    }

    pub fn len(&self) -> usize {
        self.cells[0].count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of arena cells, mostly useful for diagnostics.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn insert(&mut self, idx: usize) {
        let Body { x, y, .. } = self.bodies[idx];
        let mut cell = 0usize;
        let mut depth = 0usize;
        loop {
            if self.cells[cell].is_internal() {
                let q = self.cells[cell].quadrant(x, y);
                match self.cells[cell].children[q] {
                    Some(child) => {
                        cell = child;
                        depth += 1;
                    }
                    None => {
                        let child = self.push_child(cell, q);
                        self.cells[child].first = Some(idx);
                        return;
                    }
                }
                continue;
            }

            let Some(head) = self.cells[cell].first else {
                self.cells[cell].first = Some(idx);
                return;
            };
            let other = self.bodies[head];
            if (other.x == x && other.y == y) || depth >= MAX_DEPTH {
                self.next[idx] = Some(head);
                self.cells[cell].first = Some(idx);
                return;
            }

            // Split: move the existing chain one level down, then retry at this cell.
            let q = self.cells[cell].quadrant(other.x, other.y);
            let child = self.push_child(cell, q);
            self.cells[child].first = Some(head);
            self.cells[cell].first = None;
        }
    }

    fn push_child(&mut self, parent: usize, quadrant: usize) -> usize {
        let (x0, y0) = self.cells[parent].child_origin(quadrant);
        let size = self.cells[parent].size / 2.0;
        let idx = self.cells.len();
        self.cells.push(Cell::new(x0, y0, size));
        self.cells[parent].children[quadrant] = Some(idx);
        idx
    }

    fn aggregate(&mut self) {
        for idx in (0..self.cells.len()).rev() {
            let mut charge = 0.0;
            let mut weight = 0.0;
            let mut sx = 0.0;
            let mut sy = 0.0;
            let mut count = 0usize;
            // Plain average as a fallback when every charge is zero.
            let mut ax = 0.0;
            let mut ay = 0.0;

            if let Some(first) = self.cells[idx].first {
                let mut cur = Some(first);
                while let Some(b) = cur {
                    let body = self.bodies[b];
                    let w = body.charge.abs();
                    charge += body.charge;
                    weight += w;
                    sx += body.x * w;
                    sy += body.y * w;
                    ax += body.x;
                    ay += body.y;
                    count += 1;
                    cur = self.next[b];
                }
            } else {
                for child in self.cells[idx].children.into_iter().flatten() {
                    let c = &self.cells[child];
                    let w = c.charge.abs();
                    charge += c.charge;
                    weight += w;
                    sx += c.cx * w;
                    sy += c.cy * w;
                    ax += c.cx * c.count as f64;
                    ay += c.cy * c.count as f64;
                    count += c.count;
                }
            }

            let cell = &mut self.cells[idx];
            cell.charge = charge;
            cell.count = count;
            if weight > 0.0 {
                cell.cx = sx / weight;
                cell.cy = sy / weight;
            } else if count > 0 {
                cell.cx = ax / count as f64;
                cell.cy = ay / count as f64;
            }
        }
    }

    /// Approximate repulsion on body `idx` from every other body.
    ///
    /// Contributions beyond `distance_max` are ignored and squared distances under
    /// `distance_min2` are softened, so the result is finite for finite input.
    pub fn repulsion_on(&self, idx: usize, params: &RepulsionParams) -> (f64, f64) {
        let Some(me) = self.bodies.get(idx).copied() else {
            return (0.0, 0.0);
        };
        if !(me.x.is_finite() && me.y.is_finite()) {
            return (0.0, 0.0);
        }

        let mut fx = 0.0;
        let mut fy = 0.0;
        let mut stack: Vec<usize> = Vec::with_capacity(64);
        stack.push(0);
        while let Some(cell_idx) = stack.pop() {
            let cell = &self.cells[cell_idx];
            if cell.count == 0 || cell.distance2_to(me.x, me.y) >= params.distance_max2 {
                continue;
            }

            if cell.is_internal() {
                let dx = cell.cx - me.x;
                let dy = cell.cy - me.y;
                let l = dx * dx + dy * dy;
                let far = cell.size * cell.size / params.theta2 < l;
                if far && !cell.contains(me.x, me.y) {
                    if l < params.distance_max2 {
                        let (kx, ky) = kernel(dx, dy, l, cell.charge, params);
                        fx += kx;
                        fy += ky;
                    }
                } else {
                    stack.extend(cell.children.iter().flatten().copied());
                }
                continue;
            }

            let mut cur = cell.first;
            while let Some(b) = cur {
                cur = self.next[b];
                if b == idx {
                    continue;
                }
                let other = self.bodies[b];
                let mut dx = other.x - me.x;
                let mut dy = other.y - me.y;
                let mut l = dx * dx + dy * dy;
                if l >= params.distance_max2 {
                    continue;
                }
                if l == 0.0 {
                    (dx, dy) = coincident_direction(idx, b);
                    l = params.distance_min2;
                }
                let (kx, ky) = kernel(dx, dy, l, other.charge, params);
                fx += kx;
                fy += ky;
            }
        }
        (fx, fy)
    }

    /// Appends to `out` every body within `radius` of `(x, y)`, the query body included.
    pub fn bodies_within(&self, x: f64, y: f64, radius: f64, out: &mut Vec<usize>) {
        if !(x.is_finite() && y.is_finite() && radius >= 0.0) {
            return;
        }
        let r2 = radius * radius;
        let mut stack: Vec<usize> = Vec::with_capacity(64);
        stack.push(0);
        while let Some(cell_idx) = stack.pop() {
            let cell = &self.cells[cell_idx];
            if cell.count == 0 || cell.distance2_to(x, y) > r2 {
                continue;
            }
            if cell.is_internal() {
                stack.extend(cell.children.iter().flatten().copied());
                continue;
            }
            let mut cur = cell.first;
            while let Some(b) = cur {
                cur = self.next[b];
                let other = self.bodies[b];
                let (dx, dy) = (other.x - x, other.y - y);
                if dx * dx + dy * dy <= r2 {
                    out.push(b);
                }
            }
        }
    }
}

fn kernel(dx: f64, dy: f64, mut l: f64, charge: f64, params: &RepulsionParams) -> (f64, f64) {
    if l < params.distance_min2 {
        l = (params.distance_min2 * l).sqrt();
    }
    if l.is_nan() || l <= f64::EPSILON {
        return (0.0, 0.0);
    }
    let w = charge * params.alpha / l;
    (dx * w, dy * w)
}

/// Deterministic unit-ish direction for two bodies at the same position. Antisymmetric in
/// `(a, b)` so the pair is pushed apart.
fn coincident_direction(a: usize, b: usize) -> (f64, f64) {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let angle = ((lo.wrapping_mul(31) ^ hi.wrapping_mul(17)) % 360) as f64 * std::f64::consts::PI
        / 180.0;
    let sign = if a < b { 1.0 } else { -1.0 };
    (sign * angle.cos() * 1e-3, sign * angle.sin() * 1e-3)
}
