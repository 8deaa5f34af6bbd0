//! Hilbert-curve ordering used to presort bulk vertex batches before
//! incremental insertion, so the stochastic walk in
//! [`crate::triangulator::Triangulator`] starts near its previous
//! location instead of skipping across the whole point set between
//! consecutive inserts.

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

/// Below this batch size, the key-computation and sort run on the calling
/// thread; a `rayon::join`/thread-pool round trip isn't worth it for a
/// handful of points.
#[cfg(feature = "multithreading")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Order of the curve; `2^ORDER` cells per axis is enough resolution to
/// separate any two points that aren't already within the vertex-merge
/// radius of one another for the point counts this crate targets.
const ORDER: u32 = 16;

/// Map a normalized `(x, y) in [0,1]^2` coordinate to its distance along a
/// 2D Hilbert curve of order [`ORDER`].
fn hilbert_d(mut x: u32, mut y: u32) -> u64 {
    let n = 1u32 << ORDER;
    let mut rx;
    let mut ry;
    let mut d: u64 = 0;
    let mut s = n / 2;
    while s > 0 {
        rx = u32::from((x & s) > 0);
        ry = u32::from((y & s) > 0);
        d += u64::from(s) * u64::from(s) * u64::from((3 * rx) ^ ry);
        // rotate
        if ry == 0 {
            if rx == 1 {
                x = s.wrapping_sub(1).wrapping_sub(x) & (s.wrapping_mul(2).wrapping_sub(1));
                y = s.wrapping_sub(1).wrapping_sub(y) & (s.wrapping_mul(2).wrapping_sub(1));
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

/// Sort `items` in place by the Hilbert-curve index of `coord(item)`,
/// normalized against the bounding box of the batch.
///
/// With the `multithreading` feature enabled, key computation and the sort
/// itself run on the rayon pool once a batch is large enough to be worth
/// the dispatch (mirroring `geo`'s own `multithreading`-gated parallel
/// iterators); `coord` and `T` must then be `Sync`/`Send`, which every
/// caller in this crate already satisfies (`Vertex` is `Copy`).
pub fn sort_by_hilbert<T: Send>(items: &mut [T], coord: impl Fn(&T) -> (f64, f64) + Sync) {
    if items.len() < 3 {
        return;
    }
    let (mut min_x, mut min_y, mut max_x, mut max_y) =
        (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for item in items.iter() {
        let (x, y) = coord(item);
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let width = (max_x - min_x).max(f64::EPSILON);
    let height = (max_y - min_y).max(f64::EPSILON);
    let scale = (1u32 << ORDER) as f64 - 1.0;

    let key_of = |i: usize, item: &T| -> (u64, usize) {
        let (x, y) = coord(item);
        let nx = (((x - min_x) / width) * scale).clamp(0.0, scale) as u32;
        let ny = (((y - min_y) / height) * scale).clamp(0.0, scale) as u32;
        (hilbert_d(nx, ny), i)
    };

    #[cfg(feature = "multithreading")]
    let mut keyed: Vec<(u64, usize)> = if items.len() >= PARALLEL_THRESHOLD {
        let mut keyed: Vec<(u64, usize)> = items
            .par_iter()
            .enumerate()
            .map(|(i, item)| key_of(i, item))
            .collect();
        keyed.par_sort_unstable_by_key(|(d, _)| *d);
        keyed
    } else {
        let mut keyed: Vec<(u64, usize)> =
            items.iter().enumerate().map(|(i, item)| key_of(i, item)).collect();
        keyed.sort_unstable_by_key(|(d, _)| *d);
        keyed
    };
    #[cfg(not(feature = "multithreading"))]
    let mut keyed: Vec<(u64, usize)> = {
        let mut keyed: Vec<(u64, usize)> =
            items.iter().enumerate().map(|(i, item)| key_of(i, item)).collect();
        keyed.sort_unstable_by_key(|(d, _)| *d);
        keyed
    };

    // Apply the permutation in place by cycle-following, so this works for
    // any `T` without requiring `Clone` or a temporary allocation of `T`s.
    let mut order: Vec<usize> = keyed.into_iter().map(|(_, i)| i).collect();
    for i in 0..order.len() {
        let mut current = i;
        while order[current] != i {
            let next = order[current];
            items.swap(current, next);
            order.swap(current, next);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_without_losing_points() {
        let mut pts = vec![(0.0, 0.0), (1.0, 1.0), (0.5, 0.5), (1.0, 0.0), (0.0, 1.0)];
        let original_len = pts.len();
        sort_by_hilbert(&mut pts, |p| *p);
        assert_eq!(pts.len(), original_len);
    }
}
