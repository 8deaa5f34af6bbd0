//! Bounded Voronoi diagram construction from a finished [`Triangulator`]:
//! one circumcenter per finite triangle, Cohen-Sutherland/Liang-Barsky
//! clipping of the dual edges (finite segments and hull-edge rays) to a
//! rectangular bound, and assembly into closed Thiessen polygons with
//! synthetic boundary-stitch edges where a cell is cut open by the bound.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{IntegrityReport, TriangulatorError, TriangulatorResult};
use crate::pool::EdgeIndex;
use crate::predicates::Coord2;
use crate::triangulator::Triangulator;
use crate::vertex::Vertex;

/// An axis-aligned rectangular clipping bound.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    pub min: Coord2,
    pub max: Coord2,
}

impl Rect {
    pub fn new(min: Coord2, max: Coord2) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    fn expand_to_include(&mut self, p: Coord2) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    fn contains(&self, p: Coord2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// A Voronoi vertex: either a triangle circumcenter or a point added while
/// clipping a cell to the bound (a ray intersection, or a bound corner).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoronoiVertex {
    pub x: f64,
    pub y: f64,
    pub synthetic: bool,
}

/// One boundary edge of a [`ThiessenPolygon`]: indices into
/// [`BoundedVoronoi::voronoi_vertices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThiessenEdge {
    pub start: usize,
    pub end: usize,
    /// `true` for an edge added purely to close a cell along the clipping
    /// rectangle (a corner-to-corner or ray-to-corner hop); `false` for an
    /// edge dual to a genuine Delaunay edge (finite or clipped ray).
    pub synthetic: bool,
}

/// The Thiessen (Voronoi) cell of one input vertex.
#[derive(Debug, Clone)]
pub struct ThiessenPolygon {
    /// Caller index of the anchor input vertex.
    pub anchor_index: i32,
    pub edges: Vec<ThiessenEdge>,
    /// `true` if the anchor is a convex-hull vertex (the cell includes at
    /// least one ray-derived edge).
    pub open: bool,
    pub area: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedVoronoiOptions {
    pub bounds: Option<Rect>,
    pub enable_automatic_color_assignment: bool,
}

impl Default for BoundedVoronoiOptions {
    fn default() -> Self {
        Self {
            bounds: None,
            enable_automatic_color_assignment: false,
        }
    }
}

pub struct BoundedVoronoi {
    bound: Rect,
    voronoi_vertices: Vec<VoronoiVertex>,
    polygons: Vec<ThiessenPolygon>,
    anchors: Vec<Vertex>,
    /// Populated only when `enable_automatic_color_assignment` was set:
    /// one small integer per polygon (round-robin over four colors so no
    /// two adjacent cells in a typical planar mesh share a color).
    colors: Vec<i32>,
    /// Per mesh-edge polygon-membership bookkeeping, keyed by the
    /// canonical (smaller of the two directed slots) edge index.
    membership: HashMap<EdgeIndex, EdgeMembership>,
}

/// How many Thiessen polygons reference a given mesh edge, and whether
/// that edge has a real triangle on both sides (`interior`) or borders
/// the ghost fan on one side (a hull edge, referenced by only one cell).
#[derive(Debug, Clone, Copy)]
struct EdgeMembership {
    count: usize,
    interior: bool,
}

impl BoundedVoronoi {
    /// Builds a bounded Voronoi diagram from a finished CDT. `mesh` must
    /// already be bootstrapped with at least three non-collinear vertices.
    pub fn build(mesh: &Triangulator, opts: BoundedVoronoiOptions) -> TriangulatorResult<Self> {
        if !mesh.bootstrapped() {
            return Err(TriangulatorError::NotBootstrapped);
        }

        let (circumcenters, edge_to_cc) = compute_circumcenters(mesh);
        if circumcenters.is_empty() {
            return Err(TriangulatorError::InvalidInput(
                "mesh has no finite triangles to build a Voronoi diagram from".to_string(),
            ));
        }

        let mut bound = opts.bounds.unwrap_or_else(|| default_bound(mesh));
        let auto_expand = opts.bounds.is_none();
        if auto_expand {
            for &c in &circumcenters {
                bound.expand_to_include(c);
            }
        }

        let hull_rays = compute_hull_rays(mesh, &edge_to_cc, &circumcenters, bound);

        let mut vv: Vec<VoronoiVertex> = Vec::new();
        let mut polygons = Vec::new();
        let mut anchors = Vec::new();
        let mut membership: HashMap<EdgeIndex, usize> = HashMap::new();

        for v in mesh.vertices() {
            let Some(slot) = mesh.slot_for_index(v.index) else {
                continue;
            };
            let Some(polygon) = build_cell(
                mesh,
                slot,
                &circumcenters,
                &edge_to_cc,
                &hull_rays,
                bound,
                auto_expand,
                &mut vv,
                &mut membership,
            ) else {
                continue;
            };
            anchors.push(*v);
            polygons.push(polygon);
        }

        let colors = if opts.enable_automatic_color_assignment {
            assign_colors(&polygons)
        } else {
            Vec::new()
        };

        let membership: HashMap<EdgeIndex, EdgeMembership> = membership
            .into_iter()
            .map(|(canon, count)| {
                let interior =
                    edge_to_cc.contains_key(&canon) && edge_to_cc.contains_key(&mesh.pool().dual(canon));
                (canon, EdgeMembership { count, interior })
            })
            .collect();
        for (&key, m) in &membership {
            let expected = if m.interior { 2 } else { 1 };
            if m.count != expected {
                warn!(
                    "Voronoi edge {key} claimed by {} polygons (expected {expected})",
                    m.count
                );
            }
        }
        debug!(
            "built bounded Voronoi diagram: {} polygons, {} Voronoi vertices",
            polygons.len(),
            vv.len()
        );

        Ok(Self {
            bound,
            voronoi_vertices: vv,
            polygons,
            anchors,
            colors,
            membership,
        })
    }

    pub fn bound(&self) -> Rect {
        self.bound
    }

    pub fn polygons(&self) -> &[ThiessenPolygon] {
        &self.polygons
    }

    pub fn edges(&self) -> impl Iterator<Item = &ThiessenEdge> {
        self.polygons.iter().flat_map(|p| p.edges.iter())
    }

    /// The input (anchor) vertices, in the same order as [`Self::polygons`].
    pub fn vertices(&self) -> &[Vertex] {
        &self.anchors
    }

    pub fn voronoi_vertices(&self) -> &[VoronoiVertex] {
        &self.voronoi_vertices
    }

    /// Automatic color index per polygon (empty unless
    /// `enable_automatic_color_assignment` was requested at build time).
    pub fn colors(&self) -> &[i32] {
        &self.colors
    }

    /// Linear point-in-polygon scan over every cell; returns the anchor
    /// index of the containing polygon, or `None` if `(x, y)` falls
    /// outside every cell (only possible outside the clipping bound).
    pub fn get_containing_polygon(&self, x: f64, y: f64) -> Option<&ThiessenPolygon> {
        let q = Coord2::new(x, y);
        self.polygons.iter().find(|p| self.point_in_polygon(p, q))
    }

    fn polygon_points(&self, p: &ThiessenPolygon) -> Vec<Coord2> {
        p.edges
            .iter()
            .map(|e| {
                let v = self.voronoi_vertices[e.start];
                Coord2::new(v.x, v.y)
            })
            .collect()
    }

    fn point_in_polygon(&self, p: &ThiessenPolygon, q: Coord2) -> bool {
        let pts = self.polygon_points(p);
        point_in_ring(&pts, q)
    }

    /// Checks the bounded Voronoi diagram's invariants: every anchor lies inside its own
    /// polygon, every polygon has positive area, the sum of polygon areas
    /// matches the clipping bound's area within 1e-3 relative tolerance,
    /// every interior mesh edge is claimed by exactly two polygons, and
    /// every hull (boundary) edge is claimed by exactly one.
    pub fn integrity_check(&self) -> IntegrityReport {
        for (&edge, m) in &self.membership {
            let expected = if m.interior { 2 } else { 1 };
            if m.count != expected {
                let kind = if m.interior { "interior" } else { "boundary" };
                return IntegrityReport::fail(format!(
                    "{kind} Voronoi edge {edge} is claimed by {} polygons (expected {expected})",
                    m.count
                ));
            }
        }

        for p in &self.polygons {
            let anchor = self
                .anchors
                .iter()
                .find(|a| a.index == p.anchor_index)
                .expect("every polygon has a matching anchor");
            // An anchor outside the clipping bound can never lie inside its
            // own cell once that cell is clipped to the bound (the cell is
            // a subset of `bound`, and the anchor isn't); such cells still
            // tile the part of `bound` nearest that anchor; skip the
            // inside-check for them rather than failing on an invariant
            // that cannot hold by construction.
            let anchor_in_bound = self.bound.contains(Coord2::new(anchor.x, anchor.y));
            if anchor_in_bound && !self.point_in_polygon(p, Coord2::new(anchor.x, anchor.y)) {
                return IntegrityReport::fail(format!(
                    "anchor {} does not lie inside its own Thiessen polygon",
                    anchor.index
                ));
            }
            if p.area <= 0.0 {
                return IntegrityReport::fail(format!(
                    "polygon for anchor {} has non-positive area {}",
                    anchor.index, p.area
                ));
            }
        }

        let area_sum: f64 = self.polygons.iter().map(|p| p.area).sum();
        let bound_area = self.bound.area();
        if bound_area > 0.0 {
            let relative_error = (area_sum - bound_area).abs() / bound_area;
            if relative_error > 1e-3 {
                return IntegrityReport::fail(format!(
                    "polygon area sum {area_sum} does not match bound area {bound_area} (relative error {relative_error})"
                ));
            }
        }

        IntegrityReport::ok()
    }
}

fn point_in_ring(pts: &[Coord2], q: Coord2) -> bool {
    let n = pts.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = pts[i];
        let pj = pts[j];
        if (pi.y > q.y) != (pj.y > q.y) {
            let x_at_q = (pj.x - pi.x) * (q.y - pi.y) / (pj.y - pi.y) + pi.x;
            if q.x < x_at_q {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn polygon_area(pts: &[Coord2]) -> f64 {
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
    (sum / 2.0).abs()
}

fn default_bound(mesh: &Triangulator) -> Rect {
    let mut min = Coord2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Coord2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut edge_len_sum = 0.0;
    let mut edge_count = 0usize;
    for v in mesh.vertices() {
        min.x = min.x.min(v.x);
        min.y = min.y.min(v.y);
        max.x = max.x.max(v.x);
        max.y = max.y.max(v.y);
    }
    for e in mesh.pool().undirected_edges() {
        if mesh.pool().is_ghost(e) {
            continue;
        }
        let a = mesh.coord_of(mesh.pool().origin(e).unwrap());
        let b = mesh.coord_of(mesh.pool().destination(e).unwrap());
        edge_len_sum += ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        edge_count += 1;
    }
    let mean_edge = if edge_count > 0 {
        edge_len_sum / edge_count as f64
    } else {
        1.0
    };
    let pad = mean_edge * 0.25;
    Rect::new(
        Coord2::new(min.x - pad, min.y - pad),
        Coord2::new(max.x + pad, max.y + pad),
    )
}

/// One circumcenter per finite triangle, plus a map from each of a
/// triangle's three directed edges to its circumcenter's index.
fn compute_circumcenters(mesh: &Triangulator) -> (Vec<Coord2>, HashMap<EdgeIndex, usize>) {
    let mut circumcenters = Vec::new();
    let mut edge_to_cc = HashMap::new();
    for e in mesh.edges() {
        if mesh.pool().is_ghost(e) {
            continue;
        }
        let tri = [e, mesh.pool().forward(e), mesh.pool().forward(mesh.pool().forward(e))];
        if tri.iter().any(|&x| mesh.pool().is_ghost(x)) {
            continue;
        }
        let canon = *tri.iter().min().unwrap();
        if canon != e {
            continue;
        }
        let a = mesh.coord_of(mesh.pool().origin(tri[0]).unwrap());
        let b = mesh.coord_of(mesh.pool().origin(tri[1]).unwrap());
        let c = mesh.coord_of(mesh.pool().origin(tri[2]).unwrap());
        let center = mesh.kernel().circumcenter(a, b, c).unwrap_or(Coord2::new(
            (a.x + b.x + c.x) / 3.0,
            (a.y + b.y + c.y) / 3.0,
        ));
        let idx = circumcenters.len();
        circumcenters.push(center);
        for &te in &tri {
            edge_to_cc.insert(te, idx);
        }
    }
    (circumcenters, edge_to_cc)
}

/// One ray per convex-hull directed edge (the direction whose own face is
/// the finite triangle), clipped to `bound`. Keyed by that directed edge's
/// index.
fn compute_hull_rays(
    mesh: &Triangulator,
    edge_to_cc: &HashMap<EdgeIndex, usize>,
    circumcenters: &[Coord2],
    bound: Rect,
) -> HashMap<EdgeIndex, (Coord2, f64)> {
    let mut rays = HashMap::new();
    let diag = ((bound.width()).powi(2) + (bound.height()).powi(2)).sqrt().max(1.0);
    for e in mesh.edges() {
        if mesh.pool().is_ghost(e) {
            continue;
        }
        // A convex-hull edge is real on its own side but borders the ghost
        // fan across its dual.
        if is_ghost_triangle(mesh, e) {
            continue;
        }
        let dual = mesh.pool().dual(e);
        if !is_ghost_triangle(mesh, dual) {
            continue;
        }
        let Some(&cc_idx) = edge_to_cc.get(&e) else {
            continue;
        };
        let center = circumcenters[cc_idx];
        let tri = mesh.triangle_edges(e);
        let a = mesh.coord_of(mesh.pool().origin(e).unwrap());
        let b = mesh.coord_of(mesh.pool().destination(e).unwrap());
        let apex = mesh.coord_of(mesh.pool().origin(tri[2]).unwrap());
        let edge_dx = b.x - a.x;
        let edge_dy = b.y - a.y;
        let mid = Coord2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
        let n1 = (edge_dy, -edge_dx);
        let n2 = (-edge_dy, edge_dx);
        let away_from_apex = |n: (f64, f64)| {
            let probe = Coord2::new(mid.x + n.0, mid.y + n.1);
            let d_probe = (probe.x - apex.x).powi(2) + (probe.y - apex.y).powi(2);
            let d_mid = (mid.x - apex.x).powi(2) + (mid.y - apex.y).powi(2);
            d_probe > d_mid
        };
        let normal = if away_from_apex(n1) { n1 } else { n2 };
        let len = (normal.0 * normal.0 + normal.1 * normal.1).sqrt().max(1e-12);
        let dir = (normal.0 / len, normal.1 / len);
        let far = Coord2::new(center.x + dir.0 * diag * 2.0, center.y + dir.1 * diag * 2.0);

        let point = match liang_barsky_clip(center, far, bound) {
            Some((_, t1)) => lerp(center, far, t1),
            None => clamp_to_rect(center, bound),
        };
        let param = perimeter_parameter(point, bound);
        rays.insert(e, (point, param));
    }
    rays
}

fn is_ghost_triangle(mesh: &Triangulator, e: EdgeIndex) -> bool {
    mesh.is_ghost_triangle(mesh.triangle_edges(e))
}

fn clamp_to_rect(p: Coord2, rect: Rect) -> Coord2 {
    Coord2::new(p.x.clamp(rect.min.x, rect.max.x), p.y.clamp(rect.min.y, rect.max.y))
}

fn lerp(a: Coord2, b: Coord2, t: f64) -> Coord2 {
    Coord2::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y))
}

/// Classic Liang-Barsky clip of segment `p0 -> p1` against `rect`. Returns
/// the entry/exit parameters `(t0, t1)` in `[0, 1]`, or `None` if the
/// segment misses the rectangle entirely.
fn liang_barsky_clip(p0: Coord2, p1: Coord2, rect: Rect) -> Option<(f64, f64)> {
    let dx = p1.x - p0.x;
    let dy = p1.y - p0.y;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    let checks = [
        (-dx, p0.x - rect.min.x),
        (dx, rect.max.x - p0.x),
        (-dy, p0.y - rect.min.y),
        (dy, rect.max.y - p0.y),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                if r > t0 {
                    t0 = r;
                }
            } else {
                if r < t0 {
                    return None;
                }
                if r < t1 {
                    t1 = r;
                }
            }
        }
    }
    if t0 > t1 {
        None
    } else {
        Some((t0, t1))
    }
}

/// The cyclic perimeter parameter of a point already known to lie on
/// `rect`'s boundary: `[0,1)` bottom, `[1,2)` right, `[2,3)` top, `[3,4)`
/// left.
fn perimeter_parameter(p: Coord2, rect: Rect) -> f64 {
    let w = rect.width().max(1e-12);
    let h = rect.height().max(1e-12);
    let tol = (w.max(h)) * 1e-9;
    if (p.y - rect.min.y).abs() <= tol {
        return ((p.x - rect.min.x) / w).clamp(0.0, 1.0 - 1e-12);
    }
    if (p.x - rect.max.x).abs() <= tol {
        return 1.0 + ((p.y - rect.min.y) / h).clamp(0.0, 1.0 - 1e-12);
    }
    if (p.y - rect.max.y).abs() <= tol {
        return 2.0 + ((rect.max.x - p.x) / w).clamp(0.0, 1.0 - 1e-12);
    }
    3.0 + ((rect.max.y - p.y) / h).clamp(0.0, 1.0 - 1e-12)
}

fn corner_point(k: i32, rect: Rect) -> Coord2 {
    match k.rem_euclid(4) {
        0 => Coord2::new(rect.min.x, rect.min.y),
        1 => Coord2::new(rect.max.x, rect.min.y),
        2 => Coord2::new(rect.max.x, rect.max.y),
        _ => Coord2::new(rect.min.x, rect.max.y),
    }
}

/// Corner points strictly between `p0` and `p1` walking increasing
/// perimeter parameter (mod 4).
fn stitch_corners(p0: f64, p1: f64, rect: Rect) -> Vec<Coord2> {
    let start_side = p0.floor() as i32;
    let end_side = p1.floor() as i32;
    if start_side == end_side && p0 <= p1 {
        return Vec::new();
    }
    let mut points = Vec::new();
    let mut k = start_side + 1;
    for _ in 0..4 {
        points.push(corner_point(k, rect));
        if k.rem_euclid(4) == end_side {
            break;
        }
        k += 1;
    }
    points
}

/// Clips a cell's raw (unclipped) boundary cycle against `bound`: each
/// entry is `(point, source mesh edge feeding the edge leading into this
/// point, synthetic)`. Segments entirely inside `bound` pass through
/// unchanged; a segment crossing the boundary is cut at the Liang-Barsky
/// entry/exit parameter; a run of segments clipped away entirely (both
/// endpoints outside and the segment missing `bound`) leaves a gap that is
/// closed the same way the hull-ray branch closes its own gap: walking
/// `stitch_corners` from the last exit parameter to the next entry
/// parameter. Points already placed on `bound` by the hull-ray branch
/// satisfy `Rect::contains` by construction and pass through untouched.
fn clip_cell_to_bound(
    raw: &[(Coord2, Option<EdgeIndex>, bool)],
    bound: Rect,
) -> Vec<(Coord2, Option<EdgeIndex>, bool)> {
    let m = raw.len();
    if m == 0 {
        return Vec::new();
    }

    // Rotate so iteration starts right after a point already known to lie
    // in `bound`, so a pending exit left over from wrapping past index 0
    // is always closed out before the loop ends instead of leaking past
    // the seam.
    let rotate_from = raw
        .iter()
        .position(|&(p, _, _)| bound.contains(p))
        .map(|i| (i + 1) % m);

    let mut out: Vec<(Coord2, Option<EdgeIndex>, bool)> = Vec::new();
    let mut pending_exit: Option<f64> = None;

    for k in 0..m {
        let idx = match rotate_from {
            Some(s) => (s + k) % m,
            None => k,
        };
        let prev_idx = (idx + m - 1) % m;
        let (a, _, _) = raw[prev_idx];
        let (b, b_src, b_synth) = raw[idx];
        let a_inside = bound.contains(a);
        let b_inside = bound.contains(b);

        if a_inside && b_inside {
            out.push((b, b_src, b_synth));
            continue;
        }

        let Some((t0, t1)) = liang_barsky_clip(a, b, bound) else {
            // Segment misses `bound` entirely; nothing to emit, carry any
            // pending exit forward to the next visible segment.
            continue;
        };

        let mut tagged = false;
        if !a_inside {
            let entry_pt = lerp(a, b, t0);
            let entry_param = perimeter_parameter(entry_pt, bound);
            if let Some(exit_param) = pending_exit.take() {
                for corner in stitch_corners(exit_param, entry_param, bound) {
                    out.push((corner, None, true));
                }
            }
            let tag = if b_inside { None } else { b_src };
            tagged = tag.is_some();
            out.push((entry_pt, tag, false));
        }
        if !b_inside {
            let exit_pt = lerp(a, b, t1);
            let tag = if tagged { None } else { b_src };
            out.push((exit_pt, tag, false));
            pending_exit = Some(perimeter_parameter(exit_pt, bound));
        } else {
            out.push((b, b_src, b_synth));
        }
    }

    // If the cycle never passed through a point already inside `bound`,
    // the rotation above was a no-op and a trailing exit from the final
    // segment may not have been stitched back to the first emitted point.
    if let (Some(exit_param), None, Some(&(first_pt, _, _))) =
        (pending_exit, rotate_from, out.first())
    {
        let entry_param = perimeter_parameter(first_pt, bound);
        let mut closing = stitch_corners(exit_param, entry_param, bound)
            .into_iter()
            .map(|c| (c, None, true))
            .collect::<Vec<_>>();
        closing.append(&mut out);
        out = closing;
    }

    out
}

/// Builds one Thiessen polygon by walking the pinwheel of Delaunay edges
/// at `slot`, mapping consecutive spokes to the shared face's circumcenter,
/// substituting the pair of clipped hull rays (plus
/// any bound corners between them) wherever the pinwheel crosses the
/// ghost spoke.
#[allow(clippy::too_many_arguments)]
fn build_cell(
    mesh: &Triangulator,
    slot: u32,
    circumcenters: &[Coord2],
    edge_to_cc: &HashMap<EdgeIndex, usize>,
    hull_rays: &HashMap<EdgeIndex, (Coord2, f64)>,
    bound: Rect,
    auto_expand: bool,
    vv: &mut Vec<VoronoiVertex>,
    membership: &mut HashMap<EdgeIndex, usize>,
) -> Option<ThiessenPolygon> {
    let start = mesh.any_incident_edge_const(slot)?;
    let spokes: Vec<EdgeIndex> = mesh.pool().pinwheel(start).collect();
    let k = spokes.len();
    if k < 2 {
        return None;
    }

    // One entry per edge of the cell's raw (unclipped) boundary, in pinwheel
    // order: either a genuine circumcenter (may lie outside an explicit
    // bound) or a point already placed on the bound by the hull-ray branch
    // (always satisfies `bound.contains`). `source` is the mesh edge the
    // point arrived on (for membership bookkeeping); `synthetic` marks a
    // pure corner-stitch point with no backing mesh edge.
    let mut raw: Vec<(Coord2, Option<EdgeIndex>, bool)> = Vec::new();
    let mut open = false;

    for i in 0..k {
        let s = spokes[i];
        if mesh.pool().is_ghost(s) {
            continue;
        }
        if let Some(&cc_idx) = edge_to_cc.get(&s) {
            raw.push((circumcenters[cc_idx], Some(s), false));
        } else {
            // `s`'s own face is a ghost triangle: `s` is the far hull edge
            // of the gap at `slot`. The ghost spoke itself always sits
            // immediately before `s` in pinwheel order, and the near hull
            // edge of the gap immediately before that (already handled,
            // above, by the branch that found its own circumcenter). Only
            // the near side is tagged with a membership source, so each
            // hull edge is claimed by exactly one of its two endpoint
            // cells rather than both.
            open = true;
            let near = spokes[(i + k - 2) % k];
            let far = mesh.pool().dual(s);
            let Some(&(ray_near, p_near)) = hull_rays.get(&near) else {
                continue;
            };
            let Some(&(ray_far, p_far)) = hull_rays.get(&far) else {
                continue;
            };
            raw.push((ray_near, Some(near), false));
            for corner in stitch_corners(p_near, p_far, bound) {
                raw.push((corner, None, true));
            }
            raw.push((ray_far, None, false));
        }
    }

    // An explicit bound may be smaller than the mesh's own extent, so a
    // circumcenter can fall outside it; clip the whole raw cycle against
    // `bound`, inserting boundary-crossing points and stitching any gap
    // left by a run of circumcenters clipped away entirely. The
    // auto-computed default bound is always grown to contain every
    // circumcenter (see `build`), so no clipping is needed there.
    let clipped = if auto_expand { raw } else { clip_cell_to_bound(&raw, bound) };

    let mut sequence: Vec<(usize, Option<EdgeIndex>, bool)> = Vec::new();
    for (p, source, synthetic) in clipped {
        let idx = vv.len();
        vv.push(VoronoiVertex { x: p.x, y: p.y, synthetic });
        sequence.push((idx, source, synthetic));
    }

    if sequence.len() < 3 {
        return None;
    }

    // The pinwheel walks clockwise; reverse to present a
    // consistently counter-clockwise polygon.
    sequence.reverse();

    let n = sequence.len();
    let mut edges = Vec::with_capacity(n);
    for i in 0..n {
        let (start_idx, _source, _synth) = sequence[i];
        let (end_idx, source, synth) = sequence[(i + 1) % n];
        if let Some(src) = source {
            let canon = src.min(mesh.pool().dual(src));
            *membership.entry(canon).or_insert(0) += 1;
        }
        edges.push(ThiessenEdge {
            start: start_idx,
            end: end_idx,
            synthetic: synth,
        });
    }

    let pts: Vec<Coord2> = sequence
        .iter()
        .map(|&(idx, _, _)| {
            let p = vv[idx];
            Coord2::new(p.x, p.y)
        })
        .collect();
    let area = polygon_area(&pts);

    Some(ThiessenPolygon {
        anchor_index: mesh.vertex_at(slot).index,
        edges,
        open,
        area,
    })
}

/// Greedy four-coloring by polygon insertion order; a simple, adequate
/// automatic palette assignment, not a proper planar four-coloring
/// (that would require adjacency tracking this builder doesn't keep).
fn assign_colors(polygons: &[ThiessenPolygon]) -> Vec<i32> {
    (0..polygons.len() as i32).map(|i| i % 4).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulator::Triangulator;

    fn v(x: f64, y: f64, idx: i32) -> Vertex {
        Vertex::new(x, y, 0.0, idx)
    }

    #[test]
    fn right_triangle_has_three_open_cells() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 0)).unwrap();
        tin.add(v(3.0, 0.0, 1)).unwrap();
        tin.add(v(0.0, 4.0, 2)).unwrap();

        let voronoi = BoundedVoronoi::build(&tin, BoundedVoronoiOptions::default()).unwrap();
        assert_eq!(voronoi.polygons().len(), 3);
        assert!(voronoi.polygons().iter().all(|p| p.open));
        let report = voronoi.integrity_check();
        assert!(report.passed, "{}", report.message);
    }

    #[test]
    fn square_with_center_has_one_closed_cell() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 0)).unwrap();
        tin.add(v(10.0, 0.0, 1)).unwrap();
        tin.add(v(10.0, 10.0, 2)).unwrap();
        tin.add(v(0.0, 10.0, 3)).unwrap();
        tin.add(v(5.0, 5.0, 4)).unwrap();

        let voronoi = BoundedVoronoi::build(&tin, BoundedVoronoiOptions::default()).unwrap();
        let center = voronoi.polygons().iter().find(|p| p.anchor_index == 4).unwrap();
        assert!(!center.open);
    }

    #[test]
    fn explicit_bound_clips_shared_circumcenter_segment() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 0)).unwrap();
        tin.add(v(10.0, 0.0, 1)).unwrap();
        tin.add(v(10.0, 10.0, 2)).unwrap();
        tin.add(v(0.0, 10.0, 3)).unwrap();
        tin.add(v(5.0, 5.0, 4)).unwrap();

        // Smaller than the mesh's own extent (and smaller than the
        // default auto-computed bound), so at least one interior
        // circumcenter-pair segment straddles this bound and must be
        // clipped rather than have its outside endpoint clamped alone.
        let bound = Rect::new(Coord2::new(2.0, 2.0), Coord2::new(8.0, 8.0));
        let opts = BoundedVoronoiOptions {
            bounds: Some(bound),
            ..BoundedVoronoiOptions::default()
        };
        let voronoi = BoundedVoronoi::build(&tin, opts).unwrap();
        assert_eq!(voronoi.bound(), bound);

        let tol = 1e-9;
        for vtx in voronoi.voronoi_vertices() {
            assert!(
                vtx.x >= bound.min.x - tol && vtx.x <= bound.max.x + tol,
                "x {} outside explicit bound",
                vtx.x
            );
            assert!(
                vtx.y >= bound.min.y - tol && vtx.y <= bound.max.y + tol,
                "y {} outside explicit bound",
                vtx.y
            );
        }

        let report = voronoi.integrity_check();
        assert!(report.passed, "{}", report.message);
    }

    #[test]
    fn perimeter_parameter_is_monotone_per_side() {
        let rect = Rect::new(Coord2::new(0.0, 0.0), Coord2::new(10.0, 10.0));
        let p0 = perimeter_parameter(Coord2::new(0.0, 0.0), rect);
        let p1 = perimeter_parameter(Coord2::new(10.0, 0.0), rect);
        let p2 = perimeter_parameter(Coord2::new(10.0, 10.0), rect);
        let p3 = perimeter_parameter(Coord2::new(0.0, 10.0), rect);
        assert!(p0 < p1 && p1 < p2 && p2 < p3);
    }
}
