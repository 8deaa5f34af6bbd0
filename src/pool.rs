//! The quad-edge arena: a free-list allocator of directed-edge slots,
//! indexed by plain `u32`s so the triangulator and its consumers can size
//! parallel arrays off [`EdgePool::max_allocated_index`] instead of
//! chasing pointers.
//!
//! Each undirected edge occupies a pair of slots at indices `e` and
//! `e ^ 1`; that XOR relationship *is* the dual, and it is the one
//! invariant every other piece of navigation in this crate is built on top
//! of.

/// Index of a directed edge slot in an [`EdgePool`].
pub type EdgeIndex = u32;

/// Index of a vertex in the triangulator's vertex storage. `None` at an
/// edge endpoint marks a ghost edge (the convex hull side facing the
/// mesh's single sentinel "vertex at infinity").
pub type VertexSlot = Option<u32>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeFlags {
    pub constrained: bool,
    pub constrained_region_border: bool,
    pub constrained_region_interior: bool,
    pub synthetic: bool,
}

#[derive(Debug, Clone)]
struct EdgeRecord {
    a: VertexSlot,
    b: VertexSlot,
    /// Next directed slot around the left face (`Lnext`).
    forward: EdgeIndex,
    /// The slot whose `forward` points here (`Lprev`), maintained
    /// alongside `forward` so `reverse` stays O(1).
    reverse: EdgeIndex,
    constraint_index: i32,
    flags: EdgeFlags,
    free: bool,
}

impl EdgeRecord {
    fn free_slot() -> Self {
        Self {
            a: None,
            b: None,
            forward: 0,
            reverse: 0,
            constraint_index: -1,
            flags: EdgeFlags::default(),
            free: true,
        }
    }
}

/// Arena allocator of quad-edge records.
///
/// Allocation hands out two directed slots at a time (`e` and its dual
/// `e ^ 1`); release returns both to the free list for reuse by a later
/// `allocate`.
#[derive(Debug, Clone, Default)]
pub struct EdgePool {
    slots: Vec<EdgeRecord>,
    free_pairs: Vec<EdgeIndex>,
    live_count: usize,
}

impl EdgePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_hint(vertex_count: usize) -> Self {
        let mut pool = Self::new();
        pool.pre_allocate(vertex_count);
        pool
    }

    /// Hint to reserve room for roughly `3n` undirected edges (the
    /// expected edge count of a Delaunay triangulation of `n` points),
    /// i.e. `6n` directed slots.
    pub fn pre_allocate(&mut self, vertex_count: usize) {
        let slots_hint = vertex_count.saturating_mul(6);
        self.slots.reserve(slots_hint);
    }

    /// Allocate one undirected edge `a -> b`, returning the directed slot
    /// in the `a -> b` direction. Its dual (`b -> a`) is pre-linked at
    /// `index ^ 1`. Both slots initially have `forward` pointing to
    /// themselves (a degenerate one-edge "face") until the caller sews
    /// them into the mesh with [`EdgePool::set_forward`].
    pub fn allocate(&mut self, a: VertexSlot, b: VertexSlot) -> EdgeIndex {
        let e = if let Some(pair_base) = self.free_pairs.pop() {
            pair_base
        } else {
            let base = self.slots.len() as EdgeIndex;
            self.slots.push(EdgeRecord::free_slot());
            self.slots.push(EdgeRecord::free_slot());
            base
        };
        let dual = e ^ 1;

        self.slots[e as usize] = EdgeRecord {
            a,
            b,
            forward: e,
            reverse: e,
            constraint_index: -1,
            flags: EdgeFlags::default(),
            free: false,
        };
        self.slots[dual as usize] = EdgeRecord {
            a: b,
            b: a,
            forward: dual,
            reverse: dual,
            constraint_index: -1,
            flags: EdgeFlags::default(),
            free: false,
        };
        self.live_count += 2;
        e
    }

    /// Return the four-slot (two-directed-edge) block containing `e` to
    /// the free list. Both `e` and `dual(e)` become reusable by a future
    /// `allocate`.
    pub fn release(&mut self, e: EdgeIndex) {
        let base = e & !1;
        debug_assert!(!self.slots[base as usize].free, "double release of edge {e}");
        self.slots[base as usize] = EdgeRecord::free_slot();
        self.slots[(base ^ 1) as usize] = EdgeRecord::free_slot();
        self.free_pairs.push(base);
        self.live_count -= 2;
    }

    #[inline]
    pub fn dual(&self, e: EdgeIndex) -> EdgeIndex {
        e ^ 1
    }

    /// Checks the load-bearing `index(dual(e)) == index(e) ^ 1` identity
    /// directly (it holds by construction here, since `dual` is the XOR
    /// itself, but the integrity check calls this to document and verify
    /// the invariant rather than assuming it).
    #[inline]
    pub fn index_of_dual_is_xor_one(&self, e: EdgeIndex) -> bool {
        self.dual(e) == (e ^ 1)
    }

    #[inline]
    pub fn forward(&self, e: EdgeIndex) -> EdgeIndex {
        self.slots[e as usize].forward
    }

    #[inline]
    pub fn reverse(&self, e: EdgeIndex) -> EdgeIndex {
        self.slots[e as usize].reverse
    }

    /// `forward(dual(e))`: the next edge around `origin(e)`, clockwise.
    #[inline]
    pub fn forward_from_dual(&self, e: EdgeIndex) -> EdgeIndex {
        self.forward(self.dual(e))
    }

    /// Set `forward(e) = f`, restoring `reverse(f) == e` in the same
    /// step. Callers must restore the `forward(reverse(e)) == e` and
    /// `dual(dual(e)) == e` invariants before the next query; this helper
    /// keeps the `forward`/`reverse` half of that contract atomic.
    pub fn set_forward(&mut self, e: EdgeIndex, f: EdgeIndex) {
        self.slots[e as usize].forward = f;
        self.slots[f as usize].reverse = e;
    }

    #[inline]
    pub fn origin(&self, e: EdgeIndex) -> VertexSlot {
        self.slots[e as usize].a
    }

    #[inline]
    pub fn destination(&self, e: EdgeIndex) -> VertexSlot {
        self.slots[e as usize].b
    }

    pub fn set_endpoints(&mut self, e: EdgeIndex, a: VertexSlot, b: VertexSlot) {
        self.slots[e as usize].a = a;
        self.slots[e as usize].b = b;
    }

    #[inline]
    pub fn is_ghost(&self, e: EdgeIndex) -> bool {
        self.origin(e).is_none() || self.destination(e).is_none()
    }

    #[inline]
    pub fn is_live(&self, e: EdgeIndex) -> bool {
        (e as usize) < self.slots.len() && !self.slots[e as usize].free
    }

    #[inline]
    pub fn constraint_index(&self, e: EdgeIndex) -> i32 {
        self.slots[e as usize].constraint_index
    }

    pub fn set_constraint_index(&mut self, e: EdgeIndex, idx: i32) {
        self.slots[e as usize].constraint_index = idx;
    }

    #[inline]
    pub fn flags(&self, e: EdgeIndex) -> EdgeFlags {
        self.slots[e as usize].flags
    }

    pub fn flags_mut(&mut self, e: EdgeIndex) -> &mut EdgeFlags {
        &mut self.slots[e as usize].flags
    }

    pub fn max_allocated_index(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Directed slots in ascending index order, skipping freed ones.
    /// Restartable: each call produces a fresh iterator over the current
    /// state of the pool.
    pub fn edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        (0..self.slots.len() as EdgeIndex).filter(move |&e| self.is_live(e))
    }

    /// One representative slot per undirected edge (the lower of `e` and
    /// `dual(e)`), for callers that want each edge once.
    pub fn undirected_edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.edges().filter(|&e| e & 1 == 0)
    }

    /// Lazily walk the directed slots sharing `origin(e)`, each reached
    /// from the previous by `forward_from_dual`, stopping when the start
    /// is revisited. Finite by construction around a well-formed vertex
    /// star; non-restartable (it is a plain iterator, not a cursor you can
    /// rewind).
    pub fn pinwheel(&self, e: EdgeIndex) -> Pinwheel<'_> {
        Pinwheel {
            pool: self,
            start: e,
            current: Some(e),
        }
    }
}

pub struct Pinwheel<'a> {
    pool: &'a EdgePool,
    start: EdgeIndex,
    current: Option<EdgeIndex>,
}

impl<'a> Iterator for Pinwheel<'a> {
    type Item = EdgeIndex;

    fn next(&mut self) -> Option<EdgeIndex> {
        let current = self.current?;
        let next = self.pool.forward_from_dual(current);
        self.current = if next == self.start { None } else { Some(next) };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_is_xor_one() {
        let mut pool = EdgePool::new();
        let e = pool.allocate(Some(0), Some(1));
        assert_eq!(pool.dual(e), e ^ 1);
        assert_eq!(pool.dual(pool.dual(e)), e);
    }

    #[test]
    fn forward_reverse_are_mutually_consistent() {
        let mut pool = EdgePool::new();
        let e0 = pool.allocate(Some(0), Some(1));
        let e1 = pool.allocate(Some(1), Some(2));
        pool.set_forward(e0, e1);
        assert_eq!(pool.forward(e0), e1);
        assert_eq!(pool.reverse(e1), e0);
    }

    #[test]
    fn release_then_allocate_reuses_indices() {
        let mut pool = EdgePool::new();
        let e0 = pool.allocate(Some(0), Some(1));
        let base = e0 & !1;
        pool.release(e0);
        let e1 = pool.allocate(Some(2), Some(3));
        assert_eq!(e1 & !1, base);
    }

    #[test]
    fn pinwheel_terminates_on_triangle() {
        let mut pool = EdgePool::new();
        // Build a triangle fan around vertex 0 with two wedges, sharing edges.
        let e01 = pool.allocate(Some(0), Some(1));
        let e02 = pool.allocate(Some(0), Some(2));
        pool.set_forward(pool.dual(e01), e02);
        pool.set_forward(pool.dual(e02), e01);
        let spokes: Vec<_> = pool.pinwheel(e01).collect();
        assert_eq!(spokes, vec![e01, e02]);
    }
}
