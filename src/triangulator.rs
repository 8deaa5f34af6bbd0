//! Incremental constrained-Delaunay triangulator: bootstrap, stochastic-walk
//! point location, Bowyer-Watson cavity insertion, ghost-vertex hull
//! maintenance, vertex removal, and bulk insertion with an optional Hilbert
//! presort and cancellation token.

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, trace, warn};

use crate::error::{IntegrityReport, TriangulatorError, TriangulatorResult};
use crate::hilbert::sort_by_hilbert;
use crate::pool::{EdgeFlags, EdgeIndex, EdgePool, VertexSlot};
use crate::predicates::{Coord2, Kernel, Orientation};
use crate::thresholds::Thresholds;
use crate::vertex::{MergeRule, Vertex, VertexMergerGroup};

/// The edge pool is never allowed to grow past this many directed slots;
/// beyond it `EdgeIndex` (a `u32`) could no longer address every slot.
const MAX_EDGE_SLOTS: usize = (u32::MAX as usize) - 8;

/// Checked periodically by bulk operations so long-running inserts can be
/// cooperatively cancelled without leaving the mesh in an inconsistent
/// state.
pub trait ProgressToken {
    /// Return `true` to abort the in-flight bulk operation before its next
    /// vertex. The vertex being processed when cancellation is observed is
    /// rolled back if it was only partway through a cavity rebuild;
    /// everything committed before it remains.
    fn is_cancelled(&mut self) -> bool {
        false
    }

    /// Called with `(completed, total)` at the same cadence `is_cancelled`
    /// is checked (roughly every 1000 vertices, or once per constraint
    /// segment for constraint insertion).
    fn report(&mut self, _completed: usize, _total: usize) {}
}

/// How many vertices a bulk insertion processes between cancellation and
/// progress checks.
const CANCELLATION_CADENCE: usize = 1000;

/// Where a query point landed relative to the current mesh.
enum Location {
    /// Strictly inside the finite triangle whose three directed edges are
    /// `[e, forward(e), forward(forward(e))]`, none of them ghost.
    Interior([EdgeIndex; 3]),
    /// Outside the hull; `EdgeIndex` is the real-real hull edge the walk
    /// crossed into the ghost fan from.
    Exterior(EdgeIndex),
}

/// Crate-visible counterpart of [`Location`], for read-only consumers (the
/// natural-neighbor interpolator) that need to locate a query point without
/// depending on this module's private enum.
pub(crate) enum LocateResult {
    /// Mesh has fewer than three non-collinear vertices; nothing to locate.
    Empty,
    Interior([EdgeIndex; 3]),
    Exterior(EdgeIndex),
}

/// Incremental constrained-Delaunay triangulation over a quad-edge mesh.
///
/// A single sentinel "ghost" vertex (represented internally as `None` in
/// the edge pool's endpoints, per [`crate::pool`]) stands in for the point
/// at infinity, so every face of the mesh -- including the unbounded one --
/// is an ordinary triangle and needs no special-casing in the cavity
/// insertion logic.
pub struct Triangulator {
    pool: EdgePool,
    vertices: Vec<Vertex>,
    removed: Vec<bool>,
    index_to_slot: HashMap<i32, u32>,
    /// Best-effort cache of one edge incident to each live vertex, used to
    /// seed pinwheel walks (e.g. for removal). Self-healing: callers that
    /// find a stale entry fall back to a linear scan and overwrite it.
    vertex_edge: Vec<Option<EdgeIndex>>,
    kernel: Kernel,
    bootstrapped: bool,
    pending: Vec<Vertex>,
    last_edge: Option<EdgeIndex>,
    hull_start: Option<EdgeIndex>,
    next_constraint_index: i32,
    /// Counter for caller-index slots handed to synthetic vertices (edge
    /// crossings, Voronoi perimeter stitching). Counts down from -1 so
    /// synthetic indices never collide with non-negative caller indices.
    next_synthetic_index: i32,
    /// How a merged-away vertex's `z` folds into the slot it merged into,
    /// via that slot's [`VertexMergerGroup`]. Only consulted when a merge
    /// actually happens; an untouched vertex's `z` is never recomputed.
    merge_rule: MergeRule,
    /// Populated lazily, one entry per slot that has absorbed at least one
    /// near-coincident input.
    merger_groups: HashMap<u32, VertexMergerGroup>,
    /// Constraint-over-constraint conflicts the embedder resolved
    /// deterministically: the embedder never fails the insertion over this,
    /// it just records which constraint was superseded on the shared edge.
    constraint_conflicts: Vec<TriangulatorError>,
}

impl Triangulator {
    /// Create an empty mesh. `nominal_point_spacing` seeds the
    /// [`Thresholds`] that drive the adaptive-precision predicates and the
    /// vertex-merge radius.
    pub fn new(nominal_point_spacing: f64) -> Self {
        Self {
            pool: EdgePool::new(),
            vertices: Vec::new(),
            removed: Vec::new(),
            index_to_slot: HashMap::new(),
            vertex_edge: Vec::new(),
            kernel: Kernel::new(Thresholds::from_nominal_spacing(nominal_point_spacing)),
            bootstrapped: false,
            pending: Vec::new(),
            last_edge: None,
            hull_start: None,
            next_constraint_index: 0,
            next_synthetic_index: -1,
            merge_rule: MergeRule::default(),
            merger_groups: HashMap::new(),
            constraint_conflicts: Vec::new(),
        }
    }

    /// Sets the rule used to fold a merged-away vertex's `z` into the slot
    /// it merged into. Takes effect for merges from this point on; existing
    /// merger groups are not retroactively recomputed.
    pub fn set_merge_rule(&mut self, rule: MergeRule) {
        self.merge_rule = rule;
    }

    /// The merger group a caller index belongs to, if that index's vertex
    /// ever absorbed (or was absorbed by) another near-coincident input.
    /// `None` for a vertex that has never been involved in a merge.
    pub fn merger_group(&self, caller_index: i32) -> Option<&VertexMergerGroup> {
        let slot = self.slot_for_index(caller_index)?;
        self.merger_groups.get(&slot)
    }

    /// Constraint-over-constraint conflicts resolved so far: two
    /// constraints claiming the same mesh edge, with the later one always
    /// winning. Never cleared.
    pub fn constraint_conflicts(&self) -> &[TriangulatorError] {
        &self.constraint_conflicts
    }

    pub(crate) fn record_constraint_conflict(&mut self, superseded: i32, winner: i32) {
        self.constraint_conflicts.push(TriangulatorError::ConstraintConflict { superseded, winner });
    }

    /// Create an empty mesh with an explicit [`Thresholds`] bundle, for
    /// callers that already know the coordinate domain of the batch they
    /// are about to insert.
    pub fn with_thresholds(thresholds: Thresholds) -> Self {
        let mut tin = Self::new(1.0);
        tin.kernel = Kernel::new(thresholds);
        tin
    }

    pub fn thresholds(&self) -> Thresholds {
        self.kernel.thresholds()
    }

    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn pre_allocate(&mut self, vertex_count: usize) {
        self.pool.pre_allocate(vertex_count);
        self.vertices.reserve(vertex_count);
        self.removed.reserve(vertex_count);
        self.vertex_edge.reserve(vertex_count);
    }

    /// Live (non-removed) vertices, in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices
            .iter()
            .zip(self.removed.iter())
            .filter(|(_, removed)| !**removed)
            .map(|(v, _)| v)
    }

    /// Directed edge slots currently live in the pool, ascending index
    /// order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.pool.edges()
    }

    pub fn get_maximum_edge_allocation_index(&self) -> usize {
        self.pool.max_allocated_index()
    }

    pub(crate) fn pool(&self) -> &EdgePool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut EdgePool {
        &mut self.pool
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub(crate) fn vertex_at(&self, slot: u32) -> &Vertex {
        &self.vertices[slot as usize]
    }

    pub(crate) fn coord_of(&self, slot: u32) -> Coord2 {
        let v = &self.vertices[slot as usize];
        Coord2::new(v.x, v.y)
    }

    fn coord_of_slot(&self, slot: VertexSlot) -> Option<Coord2> {
        slot.map(|s| self.coord_of(s))
    }

    pub(crate) fn next_constraint_index(&mut self) -> i32 {
        let idx = self.next_constraint_index;
        self.next_constraint_index += 1;
        idx
    }

    /// Vertex slot for a caller-assigned index, if that vertex is still
    /// live in the mesh (merged-away or removed vertices are not found).
    pub(crate) fn slot_for_index(&self, caller_index: i32) -> Option<u32> {
        self.index_to_slot
            .get(&caller_index)
            .copied()
            .filter(|&s| !self.removed[s as usize])
    }

    pub(crate) fn vertex_mut(&mut self, slot: u32) -> &mut Vertex {
        &mut self.vertices[slot as usize]
    }

    /// Hands out the next synthetic-vertex caller index and advances the
    /// counter.
    pub(crate) fn bump_synthetic_counter(&mut self) -> i32 {
        let idx = self.next_synthetic_index;
        self.next_synthetic_index -= 1;
        idx
    }

    /// The directed edge `p -> q`, if one currently exists, found by
    /// scanning `p`'s pinwheel. `None` if `p` and `q` are not directly
    /// connected (they may still be joined by a chain of crossed edges).
    pub(crate) fn find_edge_between(&mut self, p: u32, q: u32) -> Option<EdgeIndex> {
        let start = self.any_incident_edge(p)?;
        self.pool
            .pinwheel(start)
            .find(|&e| self.pool.destination(e) == Some(q))
    }

    /// Splits the two triangles adjacent to `e` by inserting vertex `v`
    /// exactly on `e`'s line and fanning it against the quadrilateral
    /// boundary, the same fan used for a normal Bowyer-Watson cavity of
    /// size two. Used by the constraint embedder to force a synthetic
    /// vertex onto an edge it crosses, which an ordinary `add` cannot do
    /// (a point exactly on an edge is a degenerate in-circle case that a
    /// walk-and-cavity insertion does not resolve on its own).
    ///
    /// Returns the new vertex's slot and, for each of the four boundary
    /// vertices of the removed quad, the new directed edge `new -> vertex`.
    pub(crate) fn split_edge(&mut self, e: EdgeIndex, v: Vertex) -> (u32, HashMap<u32, EdgeIndex>) {
        let near = self.triangle_edges(e);
        let far = self.triangle_edges(self.pool.dual(e));
        debug_assert!(!self.is_ghost_triangle(near) && !self.is_ghost_triangle(far));

        // Boundary of the union quad, in CCW order, with the shared edge
        // `e`/`dual(e)` removed: near's other two edges, then far's other
        // two edges.
        let boundary = [near[1], near[2], far[1], far[2]];

        self.pool.release(e.min(self.pool.dual(e)));

        let v_slot = self.push_vertex(v);
        let ordered = order_boundary_cycle(&self.pool, &boundary);
        let new_edges = self.fan_new_vertex(v_slot, &ordered, true);
        self.remember_incident(v_slot, new_edges[0]);

        let mut by_vertex = HashMap::with_capacity(4);
        for (&edge, &new_edge) in ordered.iter().zip(new_edges.iter()) {
            let vertex = self.pool.origin(edge).unwrap();
            by_vertex.insert(vertex, new_edge);
        }
        self.last_edge = Some(new_edges[0]);
        (v_slot, by_vertex)
    }

    /// The perimeter of the convex hull, by walking the real-real hull
    /// edges (each one's `forward` leads to a ghost edge) until the start
    /// is revisited.
    pub fn perimeter(&self) -> f64 {
        let Some(start) = self.hull_start else {
            return 0.0;
        };
        let mut total = 0.0;
        let mut e = start;
        loop {
            let a = self.coord_of(self.pool.origin(e).expect("hull edge has real origin"));
            let b = self.coord_of(self.pool.destination(e).expect("hull edge has real destination"));
            total += ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
            e = self.next_hull_edge(e);
            if e == start {
                break;
            }
        }
        total
    }

    // ---- navigation helpers built on the pool's six primitives ----------

    pub(crate) fn triangle_edges(&self, e: EdgeIndex) -> [EdgeIndex; 3] {
        let e2 = self.pool.forward(e);
        let e3 = self.pool.forward(e2);
        [e, e2, e3]
    }

    pub(crate) fn is_ghost_triangle(&self, tri: [EdgeIndex; 3]) -> bool {
        tri.iter().any(|&e| self.pool.is_ghost(e))
    }

    /// `forward(dual(forward(e)))`: given a real-real hull edge, the next
    /// hull edge walking the same direction around the convex hull.
    fn next_hull_edge(&self, e: EdgeIndex) -> EdgeIndex {
        self.pool.forward_from_dual(self.pool.forward(e))
    }

    /// Inverse of [`Self::next_hull_edge`].
    fn prev_hull_edge(&self, e: EdgeIndex) -> EdgeIndex {
        self.pool.reverse(self.pool.dual(self.pool.reverse(e)))
    }

    pub(crate) fn is_constrained(&self, e: EdgeIndex) -> bool {
        self.pool.flags(e).constrained || self.pool.flags(self.pool.dual(e)).constrained
    }

    fn remember_incident(&mut self, slot: u32, e: EdgeIndex) {
        if (slot as usize) >= self.vertex_edge.len() {
            self.vertex_edge.resize(slot as usize + 1, None);
        }
        self.vertex_edge[slot as usize] = Some(e);
    }

    /// Any live directed edge with origin `slot`. Uses the best-effort
    /// cache, falling back to a linear scan (and repairing the cache) if
    /// the cached edge went stale.
    pub(crate) fn any_incident_edge(&mut self, slot: u32) -> Option<EdgeIndex> {
        if let Some(cached) = self.vertex_edge.get(slot as usize).copied().flatten() {
            if self.pool.is_live(cached) && self.pool.origin(cached) == Some(slot) {
                return Some(cached);
            }
        }
        let found = self.pool.edges().find(|&e| self.pool.origin(e) == Some(slot));
        if let Some(e) = found {
            self.remember_incident(slot, e);
        }
        found
    }

    /// Read-only counterpart to [`Self::any_incident_edge`] for callers that
    /// only hold a shared reference (the Voronoi builder): a linear scan for
    /// any live edge with origin `slot`, skipping the cache since there is
    /// no `&mut self` to repair it with.
    pub(crate) fn any_incident_edge_const(&self, slot: u32) -> Option<EdgeIndex> {
        if let Some(cached) = self.vertex_edge.get(slot as usize).copied().flatten() {
            if self.pool.is_live(cached) && self.pool.origin(cached) == Some(slot) {
                return Some(cached);
            }
        }
        self.pool.edges().find(|&e| self.pool.origin(e) == Some(slot))
    }

    // ---- bootstrap --------------------------------------------------------

    fn try_bootstrap(&mut self) -> bool {
        if self.bootstrapped || self.pending.len() < 3 {
            return false;
        }
        let merge_radius = self.kernel.thresholds().vertex_merge_radius;
        // Try every unordered triple of the buffered points (small, so the
        // quadratic scan is cheap) for the first non-collinear one.
        let pts = &self.pending;
        let n = pts.len();
        for i in 0..n {
            for j in (i + 1)..n {
                for k in (j + 1)..n {
                    let (p, q, r) = (pts[i], pts[j], pts[k]);
                    if p.distance_to(&q) < merge_radius || p.distance_to(&r) < merge_radius {
                        continue;
                    }
                    let orient = self.kernel.orientation(
                        Coord2::new(p.x, p.y),
                        Coord2::new(q.x, q.y),
                        Coord2::new(r.x, r.y),
                    );
                    if orient == Orientation::Collinear {
                        continue;
                    }
                    let (mut a, mut b, mut c) = (p, q, r);
                    if orient == Orientation::Clockwise {
                        std::mem::swap(&mut b, &mut c);
                    }
                    self.pending.clear();
                    self.build_initial_triangle(a, b, c);
                    return true;
                }
            }
        }
        false
    }

    pub(crate) fn push_vertex(&mut self, v: Vertex) -> u32 {
        let slot = self.vertices.len() as u32;
        self.vertices.push(v);
        self.removed.push(false);
        self.index_to_slot.insert(v.index, slot);
        slot
    }

    /// Builds the one-triangle, three-ghost-edge bootstrap mesh from three
    /// known non-collinear, CCW-ordered vertices.
    fn build_initial_triangle(&mut self, a: Vertex, b: Vertex, c: Vertex) {
        let a = self.push_vertex(a);
        let b = self.push_vertex(b);
        let c = self.push_vertex(c);

        let ab = self.pool.allocate(Some(a), Some(b));
        let bc = self.pool.allocate(Some(b), Some(c));
        let ca = self.pool.allocate(Some(c), Some(a));
        let ba = self.pool.dual(ab);
        let cb = self.pool.dual(bc);
        let ac = self.pool.dual(ca);

        let a_g = self.pool.allocate(Some(a), None);
        let b_g = self.pool.allocate(Some(b), None);
        let c_g = self.pool.allocate(Some(c), None);
        let g_a = self.pool.dual(a_g);
        let g_b = self.pool.dual(b_g);
        let g_c = self.pool.dual(c_g);

        // Interior face (a, b, c), CCW.
        self.pool.set_forward(ab, bc);
        self.pool.set_forward(bc, ca);
        self.pool.set_forward(ca, ab);

        // Ghost fan: one ghost triangle per hull edge, each sharing the
        // dual of the corresponding interior edge.
        self.pool.set_forward(ba, a_g);
        self.pool.set_forward(a_g, g_b);
        self.pool.set_forward(g_b, ba);

        self.pool.set_forward(cb, b_g);
        self.pool.set_forward(b_g, g_c);
        self.pool.set_forward(g_c, cb);

        self.pool.set_forward(ac, c_g);
        self.pool.set_forward(c_g, g_a);
        self.pool.set_forward(g_a, ac);

        for (slot, e) in [(a, ab), (b, bc), (c, ca)] {
            self.remember_incident(slot, e);
        }

        self.bootstrapped = true;
        self.last_edge = Some(ab);
        self.hull_start = Some(ba);
        debug!("bootstrapped mesh from vertices {a}, {b}, {c}");
    }

    /// Forces the bootstrap decision for buffered pre-bootstrap input: if
    /// fewer than three non-collinear vertices have been seen, reports
    /// [`TriangulatorError::NotBootstrapped`] instead of continuing to
    /// buffer silently.
    pub fn finalize_bootstrap(&mut self) -> TriangulatorResult<()> {
        if self.bootstrapped {
            return Ok(());
        }
        if !self.try_bootstrap() {
            return Err(TriangulatorError::NotBootstrapped);
        }
        Ok(())
    }

    // ---- point location -----------------------------------------------

    fn locate(&self, q: Coord2, start: EdgeIndex) -> Location {
        let mut e = start;
        let cap = (self.vertices.len() * 4 + 16).max(64);
        for _ in 0..cap {
            let tri = self.triangle_edges(e);
            if self.is_ghost_triangle(tri) {
                let real_edge = tri
                    .into_iter()
                    .find(|&x| !self.pool.is_ghost(x))
                    .expect("ghost triangle has exactly one real-real edge");
                return Location::Exterior(real_edge);
            }
            let mut crossed = None;
            for cand in tri {
                let a = self.coord_of(self.pool.origin(cand).unwrap());
                let b = self.coord_of(self.pool.destination(cand).unwrap());
                if self.kernel.orientation(a, b, q) == Orientation::Clockwise {
                    crossed = Some(cand);
                    break;
                }
            }
            match crossed {
                Some(edge) => e = self.pool.dual(edge),
                None => return Location::Interior(tri),
            }
        }
        warn!("stochastic walk exceeded step cap; falling back to linear scan");
        self.locate_linear(q)
    }

    /// Fallback used only if the stochastic walk cycles (can happen with
    /// pathological floating-point ties); scans every live triangle.
    fn locate_linear(&self, q: Coord2) -> Location {
        for e in self.pool.undirected_edges() {
            for cand in [e, self.pool.dual(e)] {
                let tri = self.triangle_edges(cand);
                if self.is_ghost_triangle(tri) {
                    continue;
                }
                let inside = tri.iter().all(|&x| {
                    let a = self.coord_of(self.pool.origin(x).unwrap());
                    let b = self.coord_of(self.pool.destination(x).unwrap());
                    self.kernel.orientation(a, b, q) != Orientation::Clockwise
                });
                if inside {
                    return Location::Interior(tri);
                }
            }
        }
        // Outside every finite triangle: fall back to any hull edge.
        let start = self.hull_start.expect("bootstrapped mesh always has a hull");
        Location::Exterior(start)
    }

    /// Point location without insertion: returns the edge the stochastic
    /// walk terminates on (a bracketing edge of the containing triangle, or
    /// the hull edge it exits through if the query is outside the hull).
    pub fn get_neighbor_edge(&self, x: f64, y: f64) -> Option<EdgeIndex> {
        if !self.bootstrapped {
            return None;
        }
        let start = self.last_edge.or(self.hull_start)?;
        match self.locate(Coord2::new(x, y), start) {
            Location::Interior(tri) => Some(tri[0]),
            Location::Exterior(e) => Some(e),
        }
    }

    /// Crate-visible hull-edge accessor for consumers that keep their own
    /// point-location cache instead of sharing the mesh's `last_edge`.
    pub(crate) fn any_hull_edge(&self) -> Option<EdgeIndex> {
        self.hull_start
    }

    /// Locates `(x, y)` starting the stochastic walk from `start` rather
    /// than the mesh's own cached edge, so a read-only consumer (the
    /// natural-neighbor interpolator) can keep a walk-start cache of its
    /// own without touching the mesh's. Never mutates the mesh.
    pub(crate) fn locate_from(&self, x: f64, y: f64, start: EdgeIndex) -> LocateResult {
        if !self.bootstrapped {
            return LocateResult::Empty;
        }
        match self.locate(Coord2::new(x, y), start) {
            Location::Interior(tri) => LocateResult::Interior(tri),
            Location::Exterior(e) => LocateResult::Exterior(e),
        }
    }

    // ---- insertion -------------------------------------------------------

    fn validate_vertex(v: &Vertex) -> TriangulatorResult<()> {
        if !v.is_finite() {
            return Err(TriangulatorError::InvalidInput(format!(
                "vertex {} has a non-finite coordinate",
                v.index
            )));
        }
        Ok(())
    }

    fn check_pool_capacity(&self, additional_slots: usize) -> TriangulatorResult<()> {
        if self.pool.max_allocated_index() + additional_slots > MAX_EDGE_SLOTS {
            return Err(TriangulatorError::EdgePoolExhausted);
        }
        Ok(())
    }

    /// Insert one vertex. Returns `true` if it altered the mesh (new
    /// triangles created, or the bootstrap was achieved); `false` if it
    /// merged into an existing vertex within the merge threshold.
    pub fn add(&mut self, v: Vertex) -> TriangulatorResult<bool> {
        Self::validate_vertex(&v)?;
        if !self.bootstrapped {
            self.pending.push(v);
            return Ok(self.try_bootstrap());
        }
        self.check_pool_capacity(16)?;
        let q = Coord2::new(v.x, v.y);
        let start = self.last_edge.unwrap_or_else(|| self.hull_start.unwrap());
        match self.locate(q, start) {
            Location::Interior(tri) => {
                if let Some(merged_into) = self.merge_candidate(&tri, q) {
                    trace!("vertex {} merged into existing vertex {}", v.index, merged_into);
                    self.record_merge(merged_into, v);
                    return Ok(false);
                }
                let slot = self.push_vertex(v);
                self.retriangulate_cavity(slot, q, tri[0]);
                Ok(true)
            }
            Location::Exterior(hull_edge) => {
                let ends = [
                    self.pool.origin(hull_edge).unwrap(),
                    self.pool.destination(hull_edge).unwrap(),
                ];
                if let Some(merged_into) = ends
                    .into_iter()
                    .find(|&s| self.coord_of(s).distance(q) < self.kernel.thresholds().vertex_merge_radius)
                {
                    self.record_merge(merged_into, v);
                    return Ok(false);
                }
                let slot = self.push_vertex(v);
                self.insert_exterior(slot, q, hull_edge);
                Ok(true)
            }
        }
    }

    fn merge_candidate(&self, tri: &[EdgeIndex; 3], q: Coord2) -> Option<u32> {
        let radius = self.kernel.thresholds().vertex_merge_radius;
        tri.iter().find_map(|&e| {
            let s = self.pool.origin(e).unwrap();
            (self.coord_of(s).distance(q) < radius).then_some(s)
        })
    }

    /// Folds `incoming` into the merger group at `slot`, applying
    /// [`Self::merge_rule`] to the group's effective `z` and writing it back
    /// onto the mesh vertex. Leaves `x`/`y` untouched (the mesh never moves
    /// an already-accepted vertex).
    fn record_merge(&mut self, slot: u32, incoming: Vertex) {
        self.index_to_slot.insert(incoming.index, slot);
        let representative = self.vertices[slot as usize];
        let group = self
            .merger_groups
            .entry(slot)
            .or_insert_with(|| VertexMergerGroup::new(representative, self.merge_rule));
        group.absorb(incoming);
        self.vertices[slot as usize].z = group.effective_z();
    }

    /// Bulk insert. Pre-sorts by Hilbert-curve index for point-location
    /// locality, then inserts sequentially, checking `progress` every
    /// [`CANCELLATION_CADENCE`] vertices. On cancellation, every vertex
    /// committed before the check point remains in the mesh; the call
    /// returns the count actually committed.
    pub fn add_batch(
        &mut self,
        mut vertices: Vec<Vertex>,
        mut progress: Option<&mut dyn ProgressToken>,
    ) -> TriangulatorResult<usize> {
        self.pre_allocate(vertices.len());
        if self.bootstrapped {
            sort_by_hilbert(&mut vertices, |v| (v.x, v.y));
        }
        let total = vertices.len();
        let mut committed = 0usize;
        for (i, v) in vertices.into_iter().enumerate() {
            if i % CANCELLATION_CADENCE == 0 {
                if let Some(token) = progress.as_deref_mut() {
                    token.report(committed, total);
                    if token.is_cancelled() {
                        debug!("add_batch cancelled after {committed}/{total} vertices");
                        return Ok(committed);
                    }
                }
            }
            self.add(v)?;
            committed += 1;
        }
        if let Some(token) = progress.as_deref_mut() {
            token.report(committed, total);
        }
        Ok(committed)
    }

    /// Bowyer-Watson cavity insertion for a query strictly inside a finite
    /// triangle. `seed` is any one of that triangle's three directed
    /// edges.
    fn retriangulate_cavity(&mut self, q_slot: u32, q: Coord2, seed: EdgeIndex) {
        let seed_tri = self.triangle_edges(seed);
        let canon = |tri: &[EdgeIndex; 3]| *tri.iter().min().unwrap();

        let mut bad: HashSet<EdgeIndex> = HashSet::new();
        bad.insert(canon(&seed_tri));
        let mut triangles: Vec<[EdgeIndex; 3]> = vec![seed_tri];
        let mut frontier: VecDeque<EdgeIndex> = seed_tri.into_iter().collect();

        while let Some(x) = frontier.pop_front() {
            if self.is_constrained(x) {
                continue;
            }
            let far = self.pool.dual(x);
            let far_tri = self.triangle_edges(far);
            if self.is_ghost_triangle(far_tri) {
                continue;
            }
            let far_canon = canon(&far_tri);
            if bad.contains(&far_canon) {
                continue;
            }
            let a = self.coord_of(self.pool.origin(far).unwrap());
            let b = self.coord_of(self.pool.destination(far).unwrap());
            let apex = self.coord_of(self.pool.origin(far_tri[2]).unwrap());
            if self.kernel.in_circle(a, b, apex, q) {
                bad.insert(far_canon);
                triangles.push(far_tri);
                for e2 in far_tri {
                    frontier.push_back(e2);
                }
            }
        }

        // Boundary edges: the edges of bad triangles whose far side isn't
        // itself in the cavity (ghost, constrained, or simply not bad).
        let mut boundary: Vec<EdgeIndex> = Vec::new();
        let mut to_release: HashSet<EdgeIndex> = HashSet::new();
        for tri in &triangles {
            for &x in tri {
                let far = self.pool.dual(x);
                let keep = self.is_constrained(x) || {
                    let far_tri = self.triangle_edges(far);
                    self.is_ghost_triangle(far_tri) || !bad.contains(&canon(&far_tri))
                };
                if keep {
                    boundary.push(x);
                } else {
                    let canonical = x.min(far);
                    to_release.insert(canonical);
                }
            }
        }
        for e in to_release {
            self.pool.release(e);
        }

        let ordered = order_boundary_cycle(&self.pool, &boundary);
        let qe = self.fan_new_vertex(q_slot, &ordered, true);
        self.remember_incident(q_slot, qe[0]);
        self.last_edge = Some(qe[0]);
    }

    /// Allocates one directed edge `q -> v` per boundary vertex and sews
    /// the fan of new triangles `(v_i, v_{i+1}, q)` against the (already
    /// existing) boundary edges. If `closed`, the fan wraps around back to
    /// the first vertex (a full cavity ring); otherwise it is an open
    /// chain (used by hull expansion, which sews the two open ends to the
    /// ghost vertex separately).
    fn fan_new_vertex(
        &mut self,
        q_slot: u32,
        ordered_boundary: &[EdgeIndex],
        closed: bool,
    ) -> Vec<EdgeIndex> {
        let n = ordered_boundary.len();
        let vertex_count = if closed { n } else { n + 1 };
        let mut qe = Vec::with_capacity(vertex_count);
        for i in 0..vertex_count {
            let v = if i < n {
                self.pool.origin(ordered_boundary[i]).unwrap()
            } else {
                self.pool.destination(ordered_boundary[n - 1]).unwrap()
            };
            let e = self.pool.allocate(Some(q_slot), Some(v));
            self.remember_incident(v, self.pool.dual(e));
            qe.push(e);
        }
        let triangle_count = n;
        for i in 0..triangle_count {
            let j = if closed { (i + 1) % n } else { i + 1 };
            let h = ordered_boundary[i];
            self.pool.set_forward(h, self.pool.dual(qe[j]));
            self.pool.set_forward(self.pool.dual(qe[j]), qe[i]);
            self.pool.set_forward(qe[i], h);
        }
        qe
    }

    /// Hull expansion for a query outside the convex hull. `entry_hull_edge`
    /// is the real-real hull edge the stochastic walk exited through.
    fn insert_exterior(&mut self, q_slot: u32, q: Coord2, entry_hull_edge: EdgeIndex) {
        let visible = |tri: &Self, e: EdgeIndex| -> bool {
            let a = tri.coord_of(tri.pool.origin(e).unwrap());
            let b = tri.coord_of(tri.pool.destination(e).unwrap());
            tri.kernel.orientation(a, b, q) == Orientation::CounterClockwise
        };

        let mut arc = vec![entry_hull_edge];
        let cap = self.vertices.len().max(8);
        let mut cur = entry_hull_edge;
        for _ in 0..cap {
            let nxt = self.next_hull_edge(cur);
            if nxt == entry_hull_edge || !visible(self, nxt) {
                break;
            }
            arc.push(nxt);
            cur = nxt;
        }
        let mut cur = entry_hull_edge;
        for _ in 0..cap {
            let prv = self.prev_hull_edge(cur);
            if prv == *arc.last().unwrap() || !visible(self, prv) {
                break;
            }
            arc.insert(0, prv);
            cur = prv;
        }

        let k = arc.len();
        // Capture ghost edges before any resewing invalidates `forward`.
        let g0 = self.pool.forward(self.prev_hull_edge(arc[0]));
        let gk = self.pool.forward(arc[k - 1]);
        let internal_ghosts: Vec<EdgeIndex> = (0..k.saturating_sub(1))
            .map(|i| self.pool.forward(arc[i]))
            .collect();
        for g in internal_ghosts {
            self.pool.release(g.min(self.pool.dual(g)));
        }

        let qe = self.fan_new_vertex(q_slot, &arc, false);
        let qg = self.pool.allocate(Some(q_slot), None);

        // End triangle at the arc's start vertex: (A_0, q, ghost).
        self.pool.set_forward(self.pool.dual(qe[0]), qg);
        self.pool.set_forward(qg, self.pool.dual(g0));
        self.pool.set_forward(self.pool.dual(g0), self.pool.dual(qe[0]));

        // End triangle at the arc's end vertex: (q, A_k, ghost).
        let last = *qe.last().unwrap();
        self.pool.set_forward(last, gk);
        self.pool.set_forward(gk, self.pool.dual(qg));
        self.pool.set_forward(self.pool.dual(qg), last);

        self.remember_incident(q_slot, *qe.last().unwrap());
        self.last_edge = Some(*qe.last().unwrap());
        self.hull_start = Some(*qe.last().unwrap());
    }

    // ---- removal -----------------------------------------------------

    /// Remove a previously inserted vertex, identified by the caller index
    /// it was given at insertion. Retriangulates the resulting hole by
    /// fanning it from one boundary vertex and repairing the Delaunay
    /// property with local Lawson flips, the same edge-flip primitive the
    /// constraint embedder uses. Returns `false` if no live vertex with
    /// that index exists.
    pub fn remove(&mut self, caller_index: i32) -> TriangulatorResult<bool> {
        let Some(&slot) = self.index_to_slot.get(&caller_index) else {
            return Ok(false);
        };
        if self.removed[slot as usize] {
            return Ok(false);
        }
        let Some(start) = self.any_incident_edge(slot) else {
            return Ok(false);
        };

        // Collect the ring of neighbor vertices in pinwheel order, and the
        // boundary edges that survive (each `forward` of the outgoing spoke).
        let spokes: Vec<EdgeIndex> = self.pool.pinwheel(start).collect();
        if spokes.iter().any(|&s| self.pool.is_ghost(s)) {
            // Hull vertex removal needs hull bookkeeping this crate does not
            // perform; the mesh is only ever grown, with the exception of
            // internal constraint splits.
            return Err(TriangulatorError::InvalidInput(
                "removing a convex-hull vertex is not supported".into(),
            ));
        }
        let ring: Vec<EdgeIndex> = spokes.iter().map(|&s| self.pool.forward(s)).collect();
        let ring_vertices: Vec<u32> = ring.iter().map(|&e| self.pool.origin(e).unwrap()).collect();

        for &s in &spokes {
            self.pool.release(s.min(self.pool.dual(s)));
        }
        self.removed[slot as usize] = true;

        // Fan-triangulate the ring from its first vertex, then Lawson-flip
        // away any violations.
        let n = ring.len();
        if n < 3 {
            return Ok(true);
        }
        // Fan-triangulate from ring_vertices[0]: triangle i (i = 1..n-2) is
        // (ring_vertices[0], ring_vertices[i], ring_vertices[i+1]), reusing
        // the existing boundary edge ring[i] (vertices[i] -> vertices[i+1])
        // and a new diagonal ring_vertices[0] -> ring_vertices[i] on each
        // side. `diagonals[i]` (for i in 1..n-1) is that new edge.
        let mut diagonals: HashMap<usize, EdgeIndex> = HashMap::new();
        for i in 1..(n - 1) {
            let e = self.pool.allocate(Some(ring_vertices[0]), Some(ring_vertices[i]));
            diagonals.insert(i, e);
        }
        for i in 1..(n - 1) {
            let entry = diagonals[&i];
            let boundary_edge = ring[i];
            let exit = if i + 1 == n - 1 {
                ring[i + 1]
            } else {
                self.pool.dual(diagonals[&(i + 1)])
            };
            self.pool.set_forward(entry, boundary_edge);
            self.pool.set_forward(boundary_edge, exit);
            self.pool.set_forward(exit, entry);
        }

        self.restore_delaunay(diagonals.into_values().collect());
        self.last_edge = Some(ring[0]);
        Ok(true)
    }

    /// Local Lawson-flip repair: pops candidate edges, flips any that
    /// violate the Delaunay in-circle test, and pushes the four edges of
    /// the two triangles touched by a flip back onto the queue.
    pub(crate) fn restore_delaunay(&mut self, seed: Vec<EdgeIndex>) {
        let mut queue: VecDeque<EdgeIndex> = seed.into_iter().collect();
        let mut guard = 0usize;
        let cap = 10_000 + self.vertices.len() * 8;
        while let Some(e) = queue.pop_front() {
            guard += 1;
            if guard > cap {
                warn!("restore_delaunay exceeded flip budget; leaving remaining edges as-is");
                break;
            }
            if !self.pool.is_live(e) || self.is_constrained(e) {
                continue;
            }
            let tri = self.triangle_edges(e);
            let far_tri = self.triangle_edges(self.pool.dual(e));
            if self.is_ghost_triangle(tri) || self.is_ghost_triangle(far_tri) {
                continue;
            }
            let a = self.coord_of(self.pool.origin(tri[1]).unwrap());
            let b = self.coord_of(self.pool.destination(tri[1]).unwrap());
            let c = self.coord_of(self.pool.origin(tri[2]).unwrap());
            let apex_far = self.coord_of(self.pool.origin(far_tri[2]).unwrap());
            if self.kernel.in_circle(a, b, c, apex_far) {
                for x in [tri[1], tri[2], far_tri[1], far_tri[2]] {
                    queue.push_back(x);
                }
                self.flip(e);
            }
        }
    }

    /// Flips the shared edge of the two triangles adjacent to `e`,
    /// replacing `e` (a -> b) with the quadrilateral's other diagonal
    /// (c -> d). Used by both vertex-removal repair and the constraint
    /// embedder's crossing resolution.
    pub(crate) fn flip(&mut self, e: EdgeIndex) {
        let de = self.pool.dual(e);
        let bc = self.pool.forward(e);
        let ca = self.pool.forward(bc);
        let ad = self.pool.forward(de);
        let db = self.pool.forward(ad);
        let c = self.pool.destination(bc).unwrap();
        let d = self.pool.destination(ad).unwrap();

        self.pool.set_endpoints(e, Some(c), Some(d));
        self.pool.set_endpoints(de, Some(d), Some(c));

        self.pool.set_forward(ad, de);
        self.pool.set_forward(de, ca);
        self.pool.set_forward(ca, ad);

        self.pool.set_forward(bc, e);
        self.pool.set_forward(e, db);
        self.pool.set_forward(db, bc);
    }

    // ---- integrity ------------------------------------------------------

    /// Checks the structural quad-edge invariants and the Delaunay
    /// property of every unconstrained edge. Never mutates the mesh.
    pub fn integrity_check(&self) -> IntegrityReport {
        for e in self.pool.edges() {
            if self.pool.dual(self.pool.dual(e)) != e {
                return IntegrityReport::fail(format!("dual(dual({e})) != {e}"));
            }
            if !self.pool.index_of_dual_is_xor_one(e) {
                return IntegrityReport::fail(format!("index(dual({e})) != {e} ^ 1"));
            }
            let f = self.pool.forward(e);
            if self.pool.reverse(f) != e {
                return IntegrityReport::fail(format!("forward(reverse({e})) != {e}"));
            }
        }
        let tol = self.kernel.thresholds().in_circle_threshold.sqrt().max(1e-9);
        for e in self.pool.undirected_edges() {
            if self.is_constrained(e) {
                continue;
            }
            let tri = self.triangle_edges(e);
            let far = self.pool.dual(e);
            let far_tri = self.triangle_edges(far);
            if self.is_ghost_triangle(tri) || self.is_ghost_triangle(far_tri) {
                continue;
            }
            let a = self.coord_of(self.pool.origin(far).unwrap());
            let b = self.coord_of(self.pool.destination(far).unwrap());
            let apex = self.coord_of(self.pool.origin(far_tri[2]).unwrap());
            let opposite = self.coord_of(self.pool.origin(tri[2]).unwrap());
            let sign = self.kernel.in_circle_sign(a, b, apex, opposite);
            if sign > tol {
                return IntegrityReport::fail(format!(
                    "edge {e} violates the Delaunay in-circle property (sign={sign})"
                ));
            }
        }
        if !self.constraint_conflicts.is_empty() {
            return IntegrityReport {
                passed: true,
                message: format!(
                    "ok ({} constraint-over-constraint conflict(s) resolved by later-wins)",
                    self.constraint_conflicts.len()
                ),
            };
        }
        IntegrityReport::ok()
    }
}

/// Orders an unordered set of boundary edges (each `origin -> destination`,
/// with `destination(e_i) == origin(e_{i+1})`) into a single cycle starting
/// from an arbitrary element. Cavity boundaries are always a simple cycle
/// by construction (the cavity is a topological disk).
pub(crate) fn order_boundary_cycle(pool: &EdgePool, boundary: &[EdgeIndex]) -> Vec<EdgeIndex> {
    let mut next_by_origin: HashMap<u32, EdgeIndex> = HashMap::with_capacity(boundary.len());
    for &e in boundary {
        next_by_origin.insert(pool.origin(e).unwrap(), e);
    }
    let start = boundary[0];
    let start_vertex = pool.origin(start).unwrap();
    let mut ordered = vec![start];
    let mut cur_dest = pool.destination(start).unwrap();
    while cur_dest != start_vertex {
        let e = *next_by_origin
            .get(&cur_dest)
            .expect("cavity boundary must be a single cycle");
        ordered.push(e);
        cur_dest = pool.destination(e).unwrap();
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64, y: f64, idx: i32) -> Vertex {
        Vertex::new(x, y, 0.0, idx)
    }

    #[test]
    fn three_point_bootstrap() {
        let mut tin = Triangulator::new(1.0);
        assert!(!tin.add(v(0.0, 0.0, 1)).unwrap());
        assert!(!tin.add(v(1.0, 0.0, 2)).unwrap());
        assert!(tin.add(v(0.0, 1.0, 3)).unwrap());
        assert!(tin.bootstrapped());
        let expected = 2.0 + std::f64::consts::SQRT_2;
        assert!((tin.perimeter() - expected).abs() < 1e-9);
    }

    #[test]
    fn collinear_points_do_not_bootstrap() {
        let mut tin = Triangulator::new(1.0);
        assert!(!tin.add(v(0.0, 0.0, 1)).unwrap());
        assert!(!tin.add(v(1.0, 0.0, 2)).unwrap());
        assert!(!tin.add(v(2.0, 0.0, 3)).unwrap());
        assert!(!tin.bootstrapped());
        assert!(tin.add(v(0.0, 1.0, 4)).unwrap());
        assert!(tin.bootstrapped());
    }

    #[test]
    fn square_with_center_has_four_triangles() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 1)).unwrap();
        tin.add(v(1.0, 0.0, 2)).unwrap();
        tin.add(v(1.0, 1.0, 3)).unwrap();
        tin.add(v(0.0, 1.0, 4)).unwrap();
        tin.add(v(0.5, 0.5, 5)).unwrap();

        assert!(tin.integrity_check().passed);

        let mut seen = HashSet::new();
        let mut triangle_count = 0;
        for e in tin.pool.undirected_edges() {
            for cand in [e, tin.pool.dual(e)] {
                let tri = tin.triangle_edges(cand);
                if tin.is_ghost_triangle(tri) {
                    continue;
                }
                let canon = *tri.iter().min().unwrap();
                if seen.insert(canon) {
                    triangle_count += 1;
                }
            }
        }
        assert_eq!(triangle_count, 4);
    }

    #[test]
    fn removing_center_vertex_collapses_to_two_triangles() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 1)).unwrap();
        tin.add(v(1.0, 0.0, 2)).unwrap();
        tin.add(v(1.0, 1.0, 3)).unwrap();
        tin.add(v(0.0, 1.0, 4)).unwrap();
        tin.add(v(0.5, 0.5, 5)).unwrap();

        assert!(tin.remove(5).unwrap());
        assert!(tin.integrity_check().passed);

        let mut seen = HashSet::new();
        let mut triangle_count = 0;
        for e in tin.pool.undirected_edges() {
            for cand in [e, tin.pool.dual(e)] {
                let tri = tin.triangle_edges(cand);
                if tin.is_ghost_triangle(tri) {
                    continue;
                }
                let canon = *tri.iter().min().unwrap();
                if seen.insert(canon) {
                    triangle_count += 1;
                }
            }
        }
        assert_eq!(triangle_count, 2);
        assert!(!tin.remove(5).unwrap());
    }

    #[test]
    fn idempotent_add_merges() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 1)).unwrap();
        tin.add(v(1.0, 0.0, 2)).unwrap();
        tin.add(v(0.0, 1.0, 3)).unwrap();
        let altered = tin.add(v(0.0, 0.0, 4)).unwrap();
        assert!(!altered);
    }

    #[test]
    fn merge_rule_mean_updates_representative_z() {
        use crate::vertex::MergeRule;
        let mut tin = Triangulator::new(1.0);
        tin.set_merge_rule(MergeRule::Mean);
        tin.add(Vertex::new(0.0, 0.0, 2.0, 1)).unwrap();
        tin.add(v(1.0, 0.0, 2)).unwrap();
        tin.add(v(0.0, 1.0, 3)).unwrap();
        let altered = tin.add(Vertex::new(0.0, 0.0, 8.0, 4)).unwrap();
        assert!(!altered);
        let slot = tin.slot_for_index(1).unwrap();
        assert_eq!(tin.vertex_at(slot).z, 5.0);
        let group = tin.merger_group(4).expect("merged vertex belongs to a group");
        assert_eq!(group.originals().len(), 2);
    }

    #[test]
    fn exterior_point_expands_hull() {
        let mut tin = Triangulator::new(1.0);
        tin.add(v(0.0, 0.0, 1)).unwrap();
        tin.add(v(1.0, 0.0, 2)).unwrap();
        tin.add(v(0.0, 1.0, 3)).unwrap();
        tin.add(v(2.0, 2.0, 4)).unwrap();
        assert!(tin.integrity_check().passed);
    }
}
