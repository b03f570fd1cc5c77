//! Region quadtree over a fixed bounding box, storing `(x, y, id)` entries.
//!
//! The tree holds locations only; genome data lives in the store. An id map
//! sits beside the tree so removal works by identity, mirroring how the index
//! is always driven (callers know ids, not leaf positions).

use florafield_protocol::Vec2;
use std::collections::HashMap;

const LEAF_CAPACITY: usize = 8;
// Coincident or near-coincident points stop splitting here and pile up in one
// leaf instead of recursing forever.
const MAX_DEPTH: usize = 12;

#[derive(Debug, Clone, Copy)]
struct Aabb {
    cx: f64,
    cy: f64,
    half_w: f64,
    half_h: f64,
}

impl Aabb {
    fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x.clamp(self.cx - self.half_w, self.cx + self.half_w),
            y.clamp(self.cy - self.half_h, self.cy + self.half_h),
        )
    }

    /// Quadrant for a routing point: 0 SW, 1 SE, 2 NW, 3 NE. Points on a
    /// center line go east/north so routing is deterministic.
    fn quadrant(&self, x: f64, y: f64) -> usize {
        let east = x >= self.cx;
        let north = y >= self.cy;
        (north as usize) << 1 | east as usize
    }

    fn child(&self, quadrant: usize) -> Aabb {
        let hw = self.half_w / 2.0;
        let hh = self.half_h / 2.0;
        let cx = if quadrant & 1 == 1 {
            self.cx + hw
        } else {
            self.cx - hw
        };
        let cy = if quadrant & 2 == 2 {
            self.cy + hh
        } else {
            self.cy - hh
        };
        Aabb {
            cx,
            cy,
            half_w: hw,
            half_h: hh,
        }
    }

    fn intersects_circle(&self, x: f64, y: f64, radius: f64) -> bool {
        let dx = ((x - self.cx).abs() - self.half_w).max(0.0);
        let dy = ((y - self.cy).abs() - self.half_h).max(0.0);
        dx * dx + dy * dy <= radius * radius
    }
}

#[derive(Debug)]
struct Entry {
    x: f64,
    y: f64,
    id: String,
}

#[derive(Debug)]
enum Node {
    Leaf(Vec<Entry>),
    Branch(Box<[Node; 4]>),
}

impl Node {
    fn empty_leaf() -> Node {
        Node::Leaf(Vec::new())
    }
}

/// Bounded 2D point index keyed by flower id.
#[derive(Debug)]
pub struct FlowerQuadtree {
    root: Node,
    bounds: Aabb,
    points: HashMap<String, Vec2>,
}

impl FlowerQuadtree {
    /// Build an empty tree over a `width` x `height` box centered on the origin.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            root: Node::empty_leaf(),
            bounds: Aabb {
                cx: 0.0,
                cy: 0.0,
                half_w: width.abs() / 2.0,
                half_h: height.abs() / 2.0,
            },
            points: HashMap::new(),
        }
    }

    /// Insert one entry. The caller must have filtered duplicate ids already;
    /// a duplicate here is replaced to keep the id map and tree agreeing.
    /// Points outside the bounding box are routed to the nearest edge cell but
    /// keep their true coordinates for distance tests.
    pub fn insert(&mut self, x: f64, y: f64, id: &str) {
        if self.points.contains_key(id) {
            self.remove(id);
        }
        self.points.insert(id.to_string(), Vec2::new(x, y));
        let (rx, ry) = self.bounds.clamp(x, y);
        insert_entry(
            &mut self.root,
            self.bounds,
            0,
            Entry {
                x,
                y,
                id: id.to_string(),
            },
            rx,
            ry,
        );
    }

    /// Remove an entry by id, merging thinned-out branches back into leaves
    /// on the way up so churn does not accumulate dead tree structure.
    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(loc) = self.points.remove(id) else {
            return false;
        };
        let (rx, ry) = self.bounds.clamp(loc.x, loc.y);
        remove_entry(&mut self.root, self.bounds, rx, ry, id);
        true
    }

    pub fn remove_batch<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.remove(id.as_ref());
        }
    }

    /// All ids whose point lies within the circle, boundary inclusive, in no
    /// particular order.
    pub fn query_circle(&self, x: f64, y: f64, radius: f64) -> Vec<String> {
        if radius < 0.0 {
            return Vec::new();
        }
        // Out-of-bounds points live in edge cells, so box pruning runs against
        // the clamped center with the clamp distance added to the radius;
        // acceptance still uses true coordinates.
        let (qx, qy) = self.bounds.clamp(x, y);
        let slack = Vec2::new(x, y).distance(Vec2::new(qx, qy));
        let mut out = Vec::new();
        query_node(
            &self.root,
            self.bounds,
            qx,
            qy,
            radius + slack,
            x,
            y,
            radius,
            &mut out,
        );
        out
    }

    /// Every indexed id. Used by the growth scheduler, once per tick.
    pub fn all_ids(&self) -> Vec<String> {
        self.points.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.points.contains_key(id)
    }

    pub fn location(&self, id: &str) -> Option<Vec2> {
        self.points.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = Node::empty_leaf();
        self.points.clear();
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn depth_of(node: &Node) -> usize {
            match node {
                Node::Leaf(_) => 0,
                Node::Branch(children) => 1 + children.iter().map(depth_of).max().unwrap_or(0),
            }
        }
        depth_of(&self.root)
    }
}

fn remove_entry(node: &mut Node, bounds: Aabb, rx: f64, ry: f64, id: &str) -> bool {
    match node {
        Node::Leaf(entries) => {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            entries.len() != before
        }
        Node::Branch(children) => {
            let q = bounds.quadrant(rx, ry);
            let removed = remove_entry(&mut children[q], bounds.child(q), rx, ry, id);
            if removed {
                try_collapse(node);
            }
            removed
        }
    }
}

/// Merge a branch whose children are all leaves holding at most one leaf's
/// worth of entries back into a single leaf. Cascades upward through the
/// unwinding removal recursion.
fn try_collapse(node: &mut Node) {
    let Node::Branch(children) = node else {
        return;
    };
    let mut total = 0;
    for child in children.iter() {
        match child {
            Node::Leaf(entries) => total += entries.len(),
            Node::Branch(_) => return,
        }
    }
    if total > LEAF_CAPACITY {
        return;
    }
    let mut merged = Vec::with_capacity(total);
    for child in children.iter_mut() {
        if let Node::Leaf(entries) = child {
            merged.append(entries);
        }
    }
    *node = Node::Leaf(merged);
}

fn insert_entry(node: &mut Node, bounds: Aabb, depth: usize, entry: Entry, rx: f64, ry: f64) {
    match node {
        Node::Leaf(entries) => {
            if entries.len() < LEAF_CAPACITY || depth >= MAX_DEPTH {
                entries.push(entry);
                return;
            }
            // Split: redistribute existing entries, then retry the new one.
            let old = std::mem::take(entries);
            *node = Node::Branch(Box::new([
                Node::empty_leaf(),
                Node::empty_leaf(),
                Node::empty_leaf(),
                Node::empty_leaf(),
            ]));
            for e in old {
                let (ex, ey) = bounds.clamp(e.x, e.y);
                insert_entry(node, bounds, depth, e, ex, ey);
            }
            insert_entry(node, bounds, depth, entry, rx, ry);
        }
        Node::Branch(children) => {
            let q = bounds.quadrant(rx, ry);
            insert_entry(&mut children[q], bounds.child(q), depth + 1, entry, rx, ry);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn query_node(
    node: &Node,
    bounds: Aabb,
    px: f64,
    py: f64,
    prune_radius: f64,
    x: f64,
    y: f64,
    radius: f64,
    out: &mut Vec<String>,
) {
    if !bounds.intersects_circle(px, py, prune_radius) {
        return;
    }
    match node {
        Node::Leaf(entries) => {
            for e in entries {
                if Vec2::new(e.x, e.y).distance(Vec2::new(x, y)) <= radius {
                    out.push(e.id.clone());
                }
            }
        }
        Node::Branch(children) => {
            for (q, child) in children.iter().enumerate() {
                query_node(child, bounds.child(q), px, py, prune_radius, x, y, radius, out);
            }
        }
    }
}
