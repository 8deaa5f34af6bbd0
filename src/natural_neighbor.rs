//! Sibson (C⁰) natural-neighbor interpolation over a finished
//! [`Triangulator`]: for a query point, enumerate the Bowyer-Watson
//! insertion envelope it would create without mutating the mesh, derive
//! each envelope vertex's Sibson weight from the Voronoi-cell area a
//! hypothetical insertion would steal from it, and return the weighted
//! average of a caller-supplied per-vertex value.

use std::cell::Cell;
use std::collections::{HashSet, VecDeque};

use log::{trace, warn};

use crate::pool::EdgeIndex;
use crate::predicates::Coord2;
use crate::triangulator::{order_boundary_cycle, LocateResult, Triangulator};
use crate::vertex::Vertex;

/// Supplies the scalar a [`NaturalNeighbor`] query interpolates. Most
/// callers want [`ZValuator`] (the vertex's own `z`); anything else
/// (a side table keyed by vertex index, a derived quantity) can implement
/// this directly, and any `Fn(&Vertex) -> f64` already does via the
/// blanket impl below.
pub trait Valuator {
    fn value(&self, vertex: &Vertex) -> f64;
}

impl<F> Valuator for F
where
    F: Fn(&Vertex) -> f64,
{
    fn value(&self, vertex: &Vertex) -> f64 {
        self(vertex)
    }
}

/// The default valuator: interpolates each vertex's `z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZValuator;

impl Valuator for ZValuator {
    fn value(&self, vertex: &Vertex) -> f64 {
        vertex.z
    }
}

/// A read-only natural-neighbor consumer bound to one [`Triangulator`].
///
/// Under the mesh's single-writer/read-only-consumer concurrency model,
/// a `NaturalNeighbor` never mutates the mesh it queries; it
/// keeps its own walk-start cache and its own diagnostic state (interior
/// mutability via `Cell`, so `interpolate` can stay `&self` and several
/// instances can query the same mesh concurrently from different
/// threads as long as the mesh itself is not being written to).
pub struct NaturalNeighbor<'a> {
    mesh: &'a Triangulator,
    cached_edge: Cell<Option<EdgeIndex>>,
    last_deviation: Cell<f64>,
}

/// One vertex on a Bowyer-Watson insertion envelope, paired with its
/// mesh slot so [`NaturalNeighbor`] doesn't need a second lookup to
/// evaluate the valuator against it.
struct EnvelopeVertex {
    slot: u32,
    coord: Coord2,
}

impl<'a> NaturalNeighbor<'a> {
    pub fn new(mesh: &'a Triangulator) -> Self {
        Self {
            mesh,
            cached_edge: Cell::new(mesh.any_hull_edge()),
            last_deviation: Cell::new(f64::NAN),
        }
    }

    /// Invalidates the cached walk-start edge and diagnostic state. Call
    /// this after the backing mesh has changed (more vertices or
    /// constraints added) so the next query doesn't seed its walk from a
    /// possibly-removed edge.
    pub fn reset_for_change_to_tin(&self) {
        self.cached_edge.set(self.mesh.any_hull_edge());
        self.last_deviation.set(f64::NAN);
    }

    /// `‖Σ wᵢ·(vᵢ − query)‖` from the most recent successful
    /// [`Self::interpolate`] call. Near zero on a well-conditioned mesh;
    /// `NaN` if no query has succeeded yet.
    pub fn get_barycentric_coordinate_deviation(&self) -> f64 {
        self.last_deviation.get()
    }

    /// The caller indices of the vertices on the Bowyer-Watson insertion
    /// envelope of `(x, y)` — the natural neighbors a hypothetical
    /// insertion there would connect to — without mutating the mesh.
    /// `None` if the mesh isn't bootstrapped, the query is outside the
    /// hull, or it coincides with an existing vertex (the envelope of an
    /// exact duplicate is degenerate; see [`Self::interpolate`] instead).
    pub fn get_bowyer_watson_envelope(&self, x: f64, y: f64) -> Option<Vec<i32>> {
        let envelope = self.locate_envelope(x, y)?;
        match envelope {
            Probe::Envelope(vertices, _boundary) => Some(
                vertices
                    .iter()
                    .map(|v| self.mesh.vertex_at(v.slot).index)
                    .collect(),
            ),
            Probe::Coincident(_) | Probe::OnConstrainedEdge => None,
        }
    }

    /// Sibson natural-neighbor interpolation at `(x, y)`. `None` when the
    /// query lies outside the convex hull or on a constrained edge;
    /// otherwise the weighted average of
    /// `valuator` over the envelope, normalized to weights summing to 1.
    pub fn interpolate<V: Valuator>(&self, x: f64, y: f64, valuator: &V) -> Option<f64> {
        match self.locate_envelope(x, y)? {
            Probe::Coincident(slot) => {
                self.last_deviation.set(0.0);
                Some(valuator.value(self.mesh.vertex_at(slot)))
            }
            Probe::OnConstrainedEdge => None,
            Probe::Envelope(vertices, boundary) => {
                let q = Coord2::new(x, y);
                let weights = sibson_weights(self.mesh, &vertices, &boundary, q)?;
                let total: f64 = weights.iter().sum();
                if !(total > 0.0) {
                    return None;
                }
                let mut z = 0.0;
                let mut dev_x = 0.0;
                let mut dev_y = 0.0;
                for (w, ev) in weights.iter().zip(vertices.iter()) {
                    let wi = w / total;
                    z += wi * valuator.value(self.mesh.vertex_at(ev.slot));
                    dev_x += wi * (ev.coord.x - q.x);
                    dev_y += wi * (ev.coord.y - q.y);
                }
                self.last_deviation.set((dev_x * dev_x + dev_y * dev_y).sqrt());
                Some(z)
            }
        }
    }

    /// Runs point location (using, then updating, this instance's own
    /// cached walk-start edge) and classifies the result — exact vertex
    /// match, on a constrained edge, outside the hull, or ordinary — then
    /// (for the ordinary case) builds the insertion envelope.
    fn locate_envelope(&self, x: f64, y: f64) -> Option<Probe> {
        let start = self.cached_edge.get().or_else(|| self.mesh.any_hull_edge())?;
        let q = Coord2::new(x, y);
        let tri = match self.mesh.locate_from(x, y, start) {
            LocateResult::Empty => return None,
            LocateResult::Exterior(_) => return None,
            LocateResult::Interior(tri) => tri,
        };
        self.cached_edge.set(Some(tri[0]));

        let merge_radius = self.mesh.thresholds().vertex_merge_radius;
        for &e in &tri {
            let slot = self.mesh.pool().origin(e).unwrap();
            if self.mesh.coord_of(slot).distance(q) < merge_radius {
                return Some(Probe::Coincident(slot));
            }
        }
        for &e in &tri {
            if self.mesh.is_constrained(e) && point_on_segment(self.mesh, e, q) {
                return Some(Probe::OnConstrainedEdge);
            }
        }

        let (vertices, boundary) = self.build_envelope(q, tri)?;
        if vertices.len() < 3 {
            return None;
        }
        Some(Probe::Envelope(vertices, boundary))
    }

    /// Bowyer-Watson cavity discovery, structurally identical to
    /// [`Triangulator`]'s own insertion cavity but read-only:
    /// it marks "bad" triangles and finds the cavity boundary without
    /// releasing or allocating a single edge.
    fn build_envelope(
        &self,
        q: Coord2,
        seed_tri: [EdgeIndex; 3],
    ) -> Option<(Vec<EnvelopeVertex>, Vec<[EdgeIndex; 3]>)> {
        let mesh = self.mesh;
        let canon = |tri: &[EdgeIndex; 3]| *tri.iter().min().unwrap();

        let mut bad: HashSet<EdgeIndex> = HashSet::new();
        bad.insert(canon(&seed_tri));
        let mut triangles: Vec<[EdgeIndex; 3]> = vec![seed_tri];
        let mut frontier: VecDeque<EdgeIndex> = seed_tri.into_iter().collect();

        while let Some(x) = frontier.pop_front() {
            if mesh.is_constrained(x) {
                continue;
            }
            let far = mesh.pool().dual(x);
            let far_tri = mesh.triangle_edges(far);
            if mesh.is_ghost_triangle(far_tri) {
                continue;
            }
            let far_canon = canon(&far_tri);
            if bad.contains(&far_canon) {
                continue;
            }
            let a = mesh.coord_of(mesh.pool().origin(far).unwrap());
            let b = mesh.coord_of(mesh.pool().destination(far).unwrap());
            let apex = mesh.coord_of(mesh.pool().origin(far_tri[2]).unwrap());
            if mesh.kernel().in_circle(a, b, apex, q) {
                bad.insert(far_canon);
                triangles.push(far_tri);
                for e2 in far_tri {
                    frontier.push_back(e2);
                }
            }
        }

        let mut boundary = Vec::new();
        for tri in &triangles {
            for &x in tri {
                let far = mesh.pool().dual(x);
                let keep = mesh.is_constrained(x) || {
                    let far_tri = mesh.triangle_edges(far);
                    mesh.is_ghost_triangle(far_tri) || !bad.contains(&canon(&far_tri))
                };
                if keep {
                    boundary.push(x);
                }
            }
        }
        if boundary.len() < 3 {
            return None;
        }
        let ordered = order_boundary_cycle(mesh.pool(), &boundary);
        let vertices = ordered
            .iter()
            .map(|&e| {
                let slot = mesh.pool().origin(e).unwrap();
                EnvelopeVertex { slot, coord: mesh.coord_of(slot) }
            })
            .collect();
        Some((vertices, triangles))
    }
}

enum Probe {
    Coincident(u32),
    OnConstrainedEdge,
    Envelope(Vec<EnvelopeVertex>, Vec<[EdgeIndex; 3]>),
}

fn point_on_segment(mesh: &Triangulator, e: EdgeIndex, q: Coord2) -> bool {
    let a = mesh.coord_of(mesh.pool().origin(e).unwrap());
    let b = mesh.coord_of(mesh.pool().destination(e).unwrap());
    if mesh.kernel().orientation(a, b, q) != crate::predicates::Orientation::Collinear {
        return false;
    }
    let dot = (q.x - a.x) * (b.x - a.x) + (q.y - a.y) * (b.y - a.y);
    let len2 = (b.x - a.x).powi(2) + (b.y - a.y).powi(2);
    (0.0..=len2).contains(&dot)
}

/// Computes each envelope vertex's (unnormalized) Sibson weight: for
/// vertex `v_i`, the polygon bounded by the two "new"
/// circumcenters (of the hypothetical triangles `(v_{i-1}, v_i, q)` and
/// `(v_i, v_{i+1}, q)`) and, between them, the circumcenters of the
/// deleted ("bad") triangles incident to `v_i`, walked in the mesh's own
/// pinwheel order so the chain comes out in a consistent cyclic sequence.
/// The weight is half the absolute shoelace area of that polygon, with
/// every coordinate translated by `(-q.x, -q.y)` first for conditioning.
fn sibson_weights(
    mesh: &Triangulator,
    vertices: &[EnvelopeVertex],
    bad_triangles: &[[EdgeIndex; 3]],
    q: Coord2,
) -> Option<Vec<f64>> {
    let canon = |tri: &[EdgeIndex; 3]| *tri.iter().min().unwrap();
    let bad: HashSet<EdgeIndex> = bad_triangles.iter().map(canon).collect();
    let n = vertices.len();

    let centered = |p: Coord2| Coord2::new(p.x - q.x, p.y - q.y);
    let q0 = Coord2::new(0.0, 0.0);

    // One new circumcenter per envelope edge i: triangle (v_i, v_{i+1}, q).
    let mut new_cc = Vec::with_capacity(n);
    for i in 0..n {
        let a = centered(vertices[i].coord);
        let b = centered(vertices[(i + 1) % n].coord);
        let c = mesh
            .kernel()
            .circumcenter(a, b, q0)
            .unwrap_or(Coord2::new((a.x + b.x) / 3.0, (a.y + b.y) / 3.0));
        new_cc.push(c);
    }

    let cap = mesh.get_maximum_edge_allocation_index() + 64;
    let mut weights = Vec::with_capacity(n);
    for i in 0..n {
        // Walk v_i's pinwheel from the spoke toward v_{i-1} to the spoke
        // toward v_{i+1}, collecting the circumcenters of whichever "bad"
        // triangles lie on that arc — the deleted triangles the
        // hypothetical insertion would have removed around v_i.
        let start = find_spoke_towards(mesh, vertices[i].slot, vertices[(i + n - 1) % n].slot)?;
        let target = find_spoke_towards(mesh, vertices[i].slot, vertices[(i + 1) % n].slot)?;

        let mut chain = vec![centered(new_cc[(i + n - 1) % n])];
        let mut cur = start;
        let mut steps = 0usize;
        loop {
            cur = mesh.pool().forward_from_dual(cur);
            steps += 1;
            if steps > cap {
                warn!("natural-neighbor envelope walk at vertex did not converge; using partial chain");
                break;
            }
            let tri = mesh.triangle_edges(cur);
            if !mesh.is_ghost_triangle(tri) && bad.contains(&canon(&tri)) {
                let a = mesh.coord_of(mesh.pool().origin(tri[0]).unwrap());
                let b = mesh.coord_of(mesh.pool().origin(tri[1]).unwrap());
                let c = mesh.coord_of(mesh.pool().origin(tri[2]).unwrap());
                let (ca, cb, cc) = (centered(a), centered(b), centered(c));
                let cc_point = mesh
                    .kernel()
                    .circumcenter(ca, cb, cc)
                    .unwrap_or(Coord2::new((ca.x + cb.x + cc.x) / 3.0, (ca.y + cb.y + cc.y) / 3.0));
                chain.push(cc_point);
            }
            if cur == target {
                break;
            }
        }
        chain.push(centered(new_cc[i]));

        weights.push(0.5 * shoelace(&chain).abs());
        trace!("envelope vertex {} stole area {}", mesh.vertex_at(vertices[i].slot).index, weights.last().unwrap());
    }
    Some(weights)
}

/// The directed edge with origin `from` and destination `to`, found by
/// scanning `from`'s pinwheel (both endpoints are already live mesh
/// vertices, connected by the existing boundary ring).
fn find_spoke_towards(mesh: &Triangulator, from: u32, to: u32) -> Option<EdgeIndex> {
    let start = mesh.any_incident_edge_const(from)?;
    mesh.pool()
        .pinwheel(start)
        .find(|&e| mesh.pool().destination(e) == Some(to))
}

fn shoelace(pts: &[Coord2]) -> f64 {
    let n = pts.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::Vertex;

    fn v(x: f64, y: f64, z: f64, idx: i32) -> Vertex {
        Vertex::new(x, y, z, idx)
    }

    #[test]
    fn reproduces_a_plane_exactly() {
        let mut tin = Triangulator::new(0.1);
        let mut idx = 0;
        for i in 0..6 {
            for j in 0..6 {
                let x = i as f64 / 5.0;
                let y = j as f64 / 5.0;
                let z = 2.0 * x + 3.0 * y + 1.0;
                tin.add(v(x, y, z, idx)).unwrap();
                idx += 1;
            }
        }
        let nn = NaturalNeighbor::new(&tin);
        let z = nn.interpolate(0.43, 0.61, &ZValuator).expect("interior query");
        let expected = 2.0 * 0.43 + 3.0 * 0.61 + 1.0;
        assert!((z - expected).abs() < 1e-6, "z={z} expected={expected}");
    }

    #[test]
    fn outside_hull_is_undefined() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 0.0, 0)).unwrap();
        tin.add(v(1.0, 0.0, 0.0, 1)).unwrap();
        tin.add(v(0.0, 1.0, 0.0, 2)).unwrap();
        let nn = NaturalNeighbor::new(&tin);
        assert!(nn.interpolate(10.0, 10.0, &ZValuator).is_none());
    }

    #[test]
    fn exact_vertex_match_returns_its_value() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 5.0, 0)).unwrap();
        tin.add(v(1.0, 0.0, 7.0, 1)).unwrap();
        tin.add(v(0.0, 1.0, 9.0, 2)).unwrap();
        let nn = NaturalNeighbor::new(&tin);
        let z = nn.interpolate(0.0, 0.0, &ZValuator).unwrap();
        assert_eq!(z, 5.0);
        assert_eq!(nn.get_barycentric_coordinate_deviation(), 0.0);
    }
}
