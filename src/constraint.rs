//! Embedding polyline and polygon constraints into a [`Triangulator`]:
//! forcing each segment to appear as a mesh edge (splitting crossings at
//! synthetic vertices where necessary), and flood-filling the interior of
//! constrained regions with a region identifier.

use std::collections::{HashSet, VecDeque};

use log::{trace, warn};

use crate::error::{TriangulatorError, TriangulatorResult};
use crate::pool::EdgeIndex;
use crate::predicates::{Coord2, Orientation};
use crate::triangulator::Triangulator;
use crate::vertex::Vertex;

/// Whether a [`Constraint`] is an open polyline or a closed polygon ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Polyline,
    Polygon,
}

/// A polyline or polygon forced into the mesh as a chain of constrained
/// edges. `A` is the caller's opaque application data, carried through
/// unexamined rather than interpreted by the embedder.
#[derive(Debug, Clone)]
pub struct Constraint<A = ()> {
    pub kind: ConstraintKind,
    pub vertices: Vec<Vertex>,
    /// If set (only meaningful for [`ConstraintKind::Polygon`]), the
    /// embedder flood-fills the polygon's interior with this constraint's
    /// index once all of its edges are in the mesh.
    pub defines_constrained_region: bool,
    pub application_data: A,
}

impl<A> Constraint<A> {
    pub fn polyline(vertices: Vec<Vertex>, application_data: A) -> Self {
        Self {
            kind: ConstraintKind::Polyline,
            vertices,
            defines_constrained_region: false,
            application_data,
        }
    }

    pub fn polygon(vertices: Vec<Vertex>, defines_constrained_region: bool, application_data: A) -> Self {
        Self {
            kind: ConstraintKind::Polygon,
            vertices,
            defines_constrained_region,
            application_data,
        }
    }

    /// Twice the shoelace sum; meaningful only for a closed polygon ring.
    /// Positive for a counter-clockwise ring.
    pub fn signed_area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            sum += a.x * b.y - b.x * a.y;
        }
        sum / 2.0
    }

    pub fn perimeter(&self) -> f64 {
        let n = self.vertices.len();
        if n < 2 {
            return 0.0;
        }
        let closed = self.kind == ConstraintKind::Polygon;
        let edge_count = if closed { n } else { n - 1 };
        (0..edge_count)
            .map(|i| self.vertices[i].distance_to(&self.vertices[(i + 1) % n]))
            .sum()
    }
}

/// A report of one constraint's embedding: the index the embedder assigned
/// it, and the chain of directed edges (in traversal order) realizing its
/// segments in the mesh.
#[derive(Debug, Clone)]
pub struct EmbeddedConstraint {
    pub index: i32,
    pub kind: ConstraintKind,
    pub edges: Vec<EdgeIndex>,
}

impl Triangulator {
    /// Embed a batch of constraints, processed in the order supplied.
    /// Requires the mesh to already be bootstrapped with every
    /// unconstrained vertex already added.
    ///
    /// When `restore_conformity` is set, the Delaunay property of
    /// unconstrained edges disturbed by crossing splits is restored by a
    /// local Lawson-flip pass bounded by the newly constrained edges, the
    /// same primitive [`Triangulator::remove`] uses to repair its cavity.
    pub fn add_constraints<A>(
        &mut self,
        constraints: Vec<Constraint<A>>,
        restore_conformity: bool,
    ) -> TriangulatorResult<Vec<EmbeddedConstraint>> {
        if !self.bootstrapped() {
            return Err(TriangulatorError::NotBootstrapped);
        }
        let mut reports = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            let min_vertices = match constraint.kind {
                ConstraintKind::Polyline => 2,
                ConstraintKind::Polygon => 3,
            };
            if constraint.vertices.len() < min_vertices {
                return Err(TriangulatorError::InvalidInput(format!(
                    "constraint of kind {:?} needs at least {min_vertices} vertices",
                    constraint.kind
                )));
            }

            let index = self.next_constraint_index();
            let closed = constraint.kind == ConstraintKind::Polygon;
            let slots: Vec<u32> = constraint
                .vertices
                .iter()
                .map(|v| self.ensure_vertex_present(*v))
                .collect::<TriangulatorResult<Vec<_>>>()?;

            let n = slots.len();
            let segment_count = if closed { n } else { n - 1 };
            let mut chain = Vec::new();
            for i in 0..segment_count {
                let p = slots[i];
                let q = slots[(i + 1) % n];
                if p == q {
                    continue;
                }
                let segment_edges = self.embed_segment(p, q, index, restore_conformity)?;
                chain.extend(segment_edges);
            }

            if closed && constraint.defines_constrained_region {
                let inside_is_left = constraint.signed_area() > 0.0;
                self.label_region(&chain, index, inside_is_left);
            }

            reports.push(EmbeddedConstraint {
                index,
                kind: constraint.kind,
                edges: chain,
            });
        }
        Ok(reports)
    }

    /// Insert `v` if no live vertex shares its caller index or lies within
    /// the merge radius, marking it (or the vertex it merges into) as a
    /// constraint member. Returns the vertex's mesh slot either way.
    fn ensure_vertex_present(&mut self, mut v: Vertex) -> TriangulatorResult<u32> {
        if let Some(slot) = self.slot_for_index(v.index) {
            self.vertex_mut(slot).flags.constraint_member = true;
            return Ok(slot);
        }
        v.flags.constraint_member = true;
        self.add(v)?;
        let slot = self
            .slot_for_index(v.index)
            .expect("add() either inserts v.index or records the vertex it merged into");
        self.vertex_mut(slot).flags.constraint_member = true;
        Ok(slot)
    }

    /// Forces the segment `p -> q` to appear as a chain of mesh edges:
    /// walk from `p` toward `q`, and for each edge the line crosses, either
    /// adopt it (already
    /// identical to the segment), flip it out of the way, or split it at
    /// the intersection with a synthetic vertex, continuing the walk from
    /// there. Returns the final chain of directed edges from `p` to `q`.
    fn embed_segment(
        &mut self,
        mut p: u32,
        q: u32,
        constraint_index: i32,
        restore_conformity: bool,
    ) -> TriangulatorResult<Vec<EdgeIndex>> {
        let mut chain = Vec::new();
        let cap = self.vertices_len() * 4 + 64;
        for _ in 0..cap {
            if p == q {
                return Ok(chain);
            }
            if let Some(direct) = self.find_edge_between(p, q) {
                self.mark_constrained(direct, constraint_index);
                chain.push(direct);
                return Ok(chain);
            }

            let (crossed, r, r_next) = self
                .first_crossing_from(p, q)
                .ok_or_else(|| TriangulatorError::InvalidInput(
                    "constraint segment endpoints are not connected by any walk through the mesh"
                        .to_string(),
                ))?;

            if self.is_constrained(crossed) {
                let (pp, qq, rr, rn) = (
                    self.coord_of(p),
                    self.coord_of(q),
                    self.coord_of(r),
                    self.coord_of(r_next),
                );
                let collinear = self.kernel().orientation(pp, qq, rr) == Orientation::Collinear
                    && self.kernel().orientation(pp, qq, rn) == Orientation::Collinear;
                if collinear {
                    // The existing constraint runs along our own segment;
                    // the later constraint wins the shared edge.
                    let previous = self.pool().constraint_index(crossed);
                    if previous != constraint_index {
                        warn!(
                            "constraint {constraint_index} overlaps constraint {previous} on a shared edge; {constraint_index} wins"
                        );
                        self.record_constraint_conflict(previous, constraint_index);
                    }
                    self.mark_constrained(crossed, constraint_index);
                    chain.push(crossed);
                    p = if self.pool().destination(crossed) == Some(r_next) {
                        r_next
                    } else {
                        r
                    };
                    continue;
                }
                let (m_slot, by_vertex) = self.split_at_intersection(crossed, pp, qq);
                let old_index = self.pool().constraint_index(crossed);
                // `crossed` no longer exists after the split; its two
                // halves (toward the endpoints it used to connect) carry
                // its old constraint index forward.
                self.mark_constrained(by_vertex[&r], old_index);
                self.mark_constrained(by_vertex[&r_next], old_index);
                let toward_p = by_vertex[&p];
                self.mark_constrained(self.pool().dual(toward_p), constraint_index);
                chain.push(self.pool().dual(toward_p));
                if restore_conformity {
                    let apex = by_vertex
                        .keys()
                        .copied()
                        .find(|&v| v != p && v != r && v != r_next)
                        .expect("split quad has exactly one vertex besides p, r, r_next");
                    self.restore_delaunay(vec![by_vertex[&apex]]);
                }
                p = m_slot;
                continue;
            }

            if self.try_flip_toward(crossed, p, q) {
                trace!("flipped edge {crossed} to make progress toward constraint {constraint_index}");
                continue;
            }

            let (pp, qq) = (self.coord_of(p), self.coord_of(q));
            let (m_slot, by_vertex) = self.split_at_intersection(crossed, pp, qq);
            let toward_p = by_vertex[&p];
            self.mark_constrained(self.pool().dual(toward_p), constraint_index);
            chain.push(self.pool().dual(toward_p));
            if restore_conformity {
                let apex = by_vertex
                    .keys()
                    .copied()
                    .find(|&v| v != p && v != r && v != r_next)
                    .expect("split quad has exactly one vertex besides p, r, r_next");
                self.restore_delaunay(vec![by_vertex[&r], by_vertex[&r_next], by_vertex[&apex]]);
            }
            p = m_slot;
        }
        Err(TriangulatorError::InvalidInput(
            "constraint segment did not converge; mesh may be degenerate".to_string(),
        ))
    }

    fn vertices_len(&self) -> usize {
        self.vertices().count().max(8)
    }

    fn mark_constrained(&mut self, e: EdgeIndex, constraint_index: i32) {
        let pool = self.pool_mut();
        pool.flags_mut(e).constrained = true;
        pool.flags_mut(pool.dual(e)).constrained = true;
        pool.set_constraint_index(e, constraint_index);
        pool.set_constraint_index(pool.dual(e), constraint_index);
    }

    /// Finds the first edge the segment `p -> q` crosses by rotating
    /// around `p`'s pinwheel until the direction to `q` falls in a wedge
    /// between two consecutive spokes, returning that wedge's opposite
    /// edge along with its two endpoints `(r, r_next)`.
    fn first_crossing_from(&mut self, p: u32, q: u32) -> Option<(EdgeIndex, u32, u32)> {
        let start = self.any_incident_edge(p)?;
        let q_coord = self.coord_of(q);
        let p_coord = self.coord_of(p);
        let spokes: Vec<EdgeIndex> = self.pool().pinwheel(start).collect();
        for &spoke in &spokes {
            if self.pool().is_ghost(spoke) {
                continue;
            }
            let next_spoke = self.pool().forward_from_dual(spoke);
            if self.pool().is_ghost(next_spoke) {
                continue;
            }
            let r = self.pool().destination(spoke).unwrap();
            let r_next = self.pool().destination(next_spoke).unwrap();
            let r_coord = self.coord_of(r);
            let r_next_coord = self.coord_of(r_next);
            let side_r = self.kernel().orientation(p_coord, r_coord, q_coord);
            let side_r_next = self.kernel().orientation(p_coord, r_next_coord, q_coord);
            if side_r != Orientation::CounterClockwise && side_r_next != Orientation::Clockwise {
                let crossed = self.pool().forward(spoke);
                return Some((crossed, r, r_next));
            }
        }
        None
    }

    /// Attempts a Delaunay edge flip that removes `crossed` from the
    /// segment `p -> q`'s path, following the standard constrained-edge
    /// insertion rule (Sloan 1993): valid only when the quadrilateral
    /// formed by the two triangles adjacent to `crossed` is convex.
    fn try_flip_toward(&mut self, crossed: EdgeIndex, p: u32, _q: u32) -> bool {
        let near = self.triangle_edges(crossed);
        let far = self.triangle_edges(self.pool().dual(crossed));
        let apex_near = self.pool().destination(near[1]).unwrap(); // == p, by construction
        let apex_far = self.pool().destination(far[1]).unwrap();
        debug_assert_eq!(apex_near, p);

        let r = self.pool().origin(crossed).unwrap();
        let r_next = self.pool().destination(crossed).unwrap();
        let (pc, rc, sc, rnc) = (
            self.coord_of(apex_near),
            self.coord_of(r),
            self.coord_of(apex_far),
            self.coord_of(r_next),
        );
        let convex = self.kernel().orientation(pc, rc, sc) == Orientation::CounterClockwise
            && self.kernel().orientation(pc, sc, rnc) == Orientation::CounterClockwise;
        if !convex {
            return false;
        }
        self.flip(crossed);
        true
    }

    /// Computes the intersection of `crossed` (whose endpoints are read
    /// fresh) with segment `p -> q` and splits `crossed` there with a
    /// synthetic vertex.
    fn split_at_intersection(
        &mut self,
        crossed: EdgeIndex,
        p: Coord2,
        q: Coord2,
    ) -> (u32, std::collections::HashMap<u32, EdgeIndex>) {
        let r = self.pool().origin(crossed).unwrap();
        let r_next = self.pool().destination(crossed).unwrap();
        let a = self.coord_of(r);
        let b = self.coord_of(r_next);
        let m = segment_intersection(p, q, a, b).unwrap_or_else(|| {
            // Degenerate (near-parallel within rounding); fall back to the
            // edge's midpoint rather than failing the embedding.
            Coord2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
        });
        let idx = self.bump_synthetic_counter();
        let va = *self.vertex_at(r);
        let vb = *self.vertex_at(r_next);
        let vertex = Vertex::synthetic(m.x, m.y, interpolate_z(va, vb, m), idx);
        self.split_edge(crossed, vertex)
    }

    /// Flood-fills the interior of a closed constrained region: starting
    /// from the face immediately to the interior side of each boundary
    /// edge, labels every reachable unconstrained edge
    /// `constrained_region_interior` and every constrained edge it meets
    /// `constrained_region_border`, propagating across unconstrained edges
    /// only.
    fn label_region(&mut self, boundary_chain: &[EdgeIndex], region_index: i32, inside_is_left: bool) {
        let mut queue: VecDeque<EdgeIndex> = VecDeque::new();
        let mut visited_faces: HashSet<EdgeIndex> = HashSet::new();

        for &boundary_edge in boundary_chain {
            let interior_edge = if inside_is_left {
                boundary_edge
            } else {
                self.pool().dual(boundary_edge)
            };
            queue.push_back(interior_edge);
        }

        while let Some(seed) = queue.pop_front() {
            let tri = self.triangle_edges(seed);
            if self.is_ghost_triangle(tri) {
                continue;
            }
            let canon = *tri.iter().min().unwrap();
            if !visited_faces.insert(canon) {
                continue;
            }
            for &d in &tri {
                let pool = self.pool_mut();
                if pool.flags(d).constrained {
                    pool.flags_mut(d).constrained_region_border = true;
                    pool.set_constraint_index(d, region_index);
                } else {
                    pool.flags_mut(d).constrained_region_interior = true;
                    pool.set_constraint_index(d, region_index);
                    let across = pool.dual(d);
                    queue.push_back(across);
                }
            }
        }
    }
}

fn interpolate_z(va: Vertex, vb: Vertex, m: Coord2) -> f64 {
    let len = va.distance_to(&vb);
    if len <= 0.0 {
        return va.z;
    }
    let t = ((m.x - va.x) * (vb.x - va.x) + (m.y - va.y) * (vb.y - va.y)) / (len * len);
    let t = t.clamp(0.0, 1.0);
    va.z + t * (vb.z - va.z)
}

/// Intersection point of two open segments `p1->p2` and `p3->p4`, by
/// solving the 2x2 linear system in parametric form. Returns `None` when
/// the segments are parallel (determinant underflows to zero).
fn segment_intersection(p1: Coord2, p2: Coord2, p3: Coord2, p4: Coord2) -> Option<Coord2> {
    let d1x = p2.x - p1.x;
    let d1y = p2.y - p1.y;
    let d2x = p4.x - p3.x;
    let d2y = p4.y - p3.y;
    let denom = d1x * d2y - d1y * d2x;
    if denom.abs() < 1e-300 {
        return None;
    }
    let t = ((p3.x - p1.x) * d2y - (p3.y - p1.y) * d2x) / denom;
    Some(Coord2::new(p1.x + t * d1x, p1.y + t * d1y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulator::Triangulator;

    fn v(x: f64, y: f64, idx: i32) -> Vertex {
        Vertex::new(x, y, 0.0, idx)
    }

    fn square_with_center() -> Triangulator {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 1)).unwrap();
        tin.add(v(10.0, 0.0, 2)).unwrap();
        tin.add(v(10.0, 10.0, 3)).unwrap();
        tin.add(v(0.0, 10.0, 4)).unwrap();
        tin.add(v(5.0, 5.0, 5)).unwrap();
        tin
    }

    #[test]
    fn polyline_constraint_through_existing_vertex() {
        let mut tin = square_with_center();
        let constraint = Constraint::polyline(vec![v(2.0, 2.0, 100), v(8.0, 8.0, 101)], ());
        let reports = tin.add_constraints(vec![constraint], true).unwrap();
        assert_eq!(reports.len(), 1);
        // the chain must connect the two named endpoints end to end
        let first = reports[0].edges[0];
        let last = *reports[0].edges.last().unwrap();
        let p_slot = tin.slot_for_index(100).unwrap();
        let q_slot = tin.slot_for_index(101).unwrap();
        assert_eq!(tin.pool().origin(first), Some(p_slot));
        assert_eq!(tin.pool().destination(last), Some(q_slot));
    }

    #[test]
    fn polygon_region_labels_interior_edges() {
        let mut tin = Triangulator::new(1.0);
        for (i, (x, y)) in [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
            .into_iter()
            .enumerate()
        {
            tin.add(v(x, y, i as i32)).unwrap();
        }
        tin.add(v(5.0, 5.0, 10)).unwrap();
        let ring = vec![
            v(1.0, 1.0, 20),
            v(9.0, 1.0, 21),
            v(9.0, 9.0, 22),
            v(1.0, 9.0, 23),
        ];
        let constraint = Constraint::polygon(ring, true, ());
        let reports = tin.add_constraints(vec![constraint], true).unwrap();
        let region = reports[0].index;
        let mut saw_interior = false;
        for e in tin.pool().edges() {
            if tin.pool().flags(e).constrained_region_interior && tin.pool().constraint_index(e) == region {
                saw_interior = true;
                break;
            }
        }
        assert!(saw_interior);
    }

    #[test]
    fn recorded_conflicts_surface_through_integrity_check_without_failing() {
        let mut tin = square_with_center();
        assert!(tin.constraint_conflicts().is_empty());
        tin.record_constraint_conflict(0, 1);
        assert_eq!(tin.constraint_conflicts().len(), 1);
        let report = tin.integrity_check();
        assert!(report.passed);
        assert!(report.message.contains("conflict"));
    }
}
