//! Orientation, in-circle, and circumcenter predicates with adaptive
//! precision, and the [`Thresholds`](crate::thresholds::Thresholds)-driven
//! dispatch between a fast and an exact form.
//!
//! `geo`'s own [`kernels::robust`] module wraps the `robust` crate's
//! adaptive-precision `orient2d` for a single predicate; this module
//! extends the same idea to the in-circle test the Bowyer-Watson cavity
//! needs, and adds the circumcenter computation the Voronoi builder
//! consumes, all gated by the same two-tier fast/exact dispatch: the fast
//! form is a plain double-precision determinant, and the
//! exact form (`robust`'s adaptively-refined arithmetic) only runs when the
//! fast form's magnitude falls within the corresponding threshold.
//!
//! [`kernels::robust`]: https://docs.rs/geo/latest/geo/algorithm/kernels/robust/index.html

#[cfg(any(feature = "approx", test))]
use approx::{AbsDiffEq, RelativeEq};

use crate::thresholds::Thresholds;

/// A bare 2-D coordinate, independent of [`crate::vertex::Vertex`]'s richer
/// fields, used internally wherever only `(x, y)` matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord2 {
    pub x: f64,
    pub y: f64,
}

impl Coord2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub(crate) fn distance(&self, other: Coord2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[cfg(any(feature = "approx", test))]
impl approx::AbsDiffEq for Coord2 {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        f64::abs_diff_eq(&self.x, &other.x, epsilon) && f64::abs_diff_eq(&self.y, &other.y, epsilon)
    }
}

#[cfg(any(feature = "approx", test))]
impl approx::RelativeEq for Coord2 {
    fn default_max_relative() -> f64 {
        f64::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: f64, max_relative: f64) -> bool {
        f64::relative_eq(&self.x, &other.x, epsilon, max_relative)
            && f64::relative_eq(&self.y, &other.y, epsilon, max_relative)
    }
}

impl From<Coord2> for robust::Coord<f64> {
    fn from(c: Coord2) -> Self {
        robust::Coord { x: c.x, y: c.y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    CounterClockwise,
    Clockwise,
    Collinear,
}

fn classify(sign: f64) -> Orientation {
    if sign > 0.0 {
        Orientation::CounterClockwise
    } else if sign < 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::Collinear
    }
}

fn fast_orient2d(p: Coord2, q: Coord2, r: Coord2) -> f64 {
    (q.x - p.x) * (r.y - q.y) - (q.y - p.y) * (r.x - q.x)
}

fn fast_incircle(a: Coord2, b: Coord2, c: Coord2, d: Coord2) -> f64 {
    // 4x4 determinant via cofactor expansion against the lifted paraboloid
    // (x^2+y^2); same layout Shewchuk's `incircle` uses before falling back
    // to adaptive arithmetic.
    let adx = a.x - d.x;
    let ady = a.y - d.y;
    let bdx = b.x - d.x;
    let bdy = b.y - d.y;
    let cdx = c.x - d.x;
    let cdy = c.y - d.y;

    let alift = adx * adx + ady * ady;
    let blift = bdx * bdx + bdy * bdy;
    let clift = cdx * cdx + cdy * cdy;

    adx * (bdy * clift - blift * cdy) - ady * (bdx * clift - blift * cdx)
        + alift * (bdx * cdy - bdy * cdx)
}

/// A numeric kernel bound to a fixed set of [`Thresholds`]: the adaptive
/// dispatch point for every geometric predicate the triangulator, the
/// constraint embedder, and the Voronoi builder rely on.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    thresholds: Thresholds,
}

impl Kernel {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Twice the signed area of `p -> q -> r`, adaptively refined: the fast
    /// double-precision determinant runs first, and only when its magnitude
    /// is within [`Thresholds::half_plane_threshold`] does the
    /// adaptive-precision `robust::orient2d` run. The two forms are
    /// monotone-consistent by construction: `robust::orient2d` agrees with
    /// the sign of any sufficiently large fast determinant, since both
    /// compute the same determinant, just at different precisions. Shared
    /// by [`Self::orientation`] (which only needs the sign) and
    /// [`Self::circumcenter`] (which needs the refined magnitude too, since
    /// it divides by this value).
    fn orient2d_value(&self, p: Coord2, q: Coord2, r: Coord2) -> f64 {
        let fast = fast_orient2d(p, q, r);
        if fast.abs() <= self.thresholds.half_plane_threshold {
            robust::orient2d(p.into(), q.into(), r.into())
        } else {
            fast
        }
    }

    /// Sign of the orientation of `p -> q -> r`.
    pub fn orientation(&self, p: Coord2, q: Coord2, r: Coord2) -> Orientation {
        classify(self.orient2d_value(p, q, r))
    }

    /// Sign of the in-circle test of `d` against the circle through `a`,
    /// `b`, `c` (assumed counter-clockwise). Positive means `d` lies
    /// strictly inside.
    pub fn in_circle_sign(&self, a: Coord2, b: Coord2, c: Coord2, d: Coord2) -> f64 {
        let fast = fast_incircle(a, b, c, d);
        if fast.abs() <= self.thresholds.in_circle_threshold {
            robust::incircle(a.into(), b.into(), c.into(), d.into())
        } else {
            fast
        }
    }

    pub fn in_circle(&self, a: Coord2, b: Coord2, c: Coord2, d: Coord2) -> bool {
        self.in_circle_sign(a, b, c, d) > 0.0
    }

    /// Circumcenter of the triangle `a, b, c`, robust to near-degenerate
    /// (nearly collinear) triangles: the denominator `d` is twice the
    /// signed area of `c, a, b`, so it is computed through the same
    /// adaptive fast/exact dispatch as [`Self::orientation`] rather than a
    /// plain double-precision product that could catastrophically cancel
    /// right where the triangle is most degenerate.
    ///
    /// Returns `None` only when the three points are exactly collinear
    /// (denominator is exactly zero even after the adaptive refinement),
    /// which cannot happen for a triangle that passed the mesh's own
    /// orientation check during insertion.
    pub fn circumcenter(&self, a: Coord2, b: Coord2, c: Coord2) -> Option<Coord2> {
        let ax = a.x - c.x;
        let ay = a.y - c.y;
        let bx = b.x - c.x;
        let by = b.y - c.y;

        // `ax * by - ay * bx` is exactly `(a - c) x (b - c)`, i.e. the same
        // determinant `orient2d(c, a, b)` computes (the two cross-product
        // expansions are algebraically identical), so the adaptive
        // fast/exact gate applies here unchanged.
        let d = 2.0 * self.orient2d_value(c, a, b);
        if d == 0.0 {
            return None;
        }

        let a2 = ax * ax + ay * ay;
        let b2 = bx * bx + by * by;

        let ux = (by * a2 - ay * b2) / d;
        let uy = (ax * b2 - bx * a2) / d;

        Some(Coord2::new(c.x + ux, c.y + uy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> Kernel {
        Kernel::new(Thresholds::from_nominal_spacing(1.0))
    }

    #[test]
    fn orientation_ccw_triangle() {
        let k = kernel();
        let o = k.orientation(
            Coord2::new(0.0, 0.0),
            Coord2::new(1.0, 0.0),
            Coord2::new(0.0, 1.0),
        );
        assert_eq!(o, Orientation::CounterClockwise);
    }

    #[test]
    fn orientation_collinear() {
        let k = kernel();
        let o = k.orientation(
            Coord2::new(0.0, 0.0),
            Coord2::new(1.0, 0.0),
            Coord2::new(2.0, 0.0),
        );
        assert_eq!(o, Orientation::Collinear);
    }

    #[test]
    fn in_circle_interior_point() {
        let k = kernel();
        // Unit right triangle, circumcircle centered at (0.5, 0.5), r = sqrt(2)/2.
        let inside = k.in_circle(
            Coord2::new(0.0, 0.0),
            Coord2::new(1.0, 0.0),
            Coord2::new(0.0, 1.0),
            Coord2::new(0.4, 0.4),
        );
        assert!(inside);

        let outside = k.in_circle(
            Coord2::new(0.0, 0.0),
            Coord2::new(1.0, 0.0),
            Coord2::new(0.0, 1.0),
            Coord2::new(5.0, 5.0),
        );
        assert!(!outside);
    }

    #[test]
    fn circumcenter_right_triangle() {
        let k = kernel();
        let c = k
            .circumcenter(
                Coord2::new(0.0, 0.0),
                Coord2::new(3.0, 0.0),
                Coord2::new(0.0, 4.0),
            )
            .unwrap();
        approx::assert_relative_eq!(c, Coord2::new(1.5, 2.0), epsilon = 1e-9);
    }

    #[test]
    fn circumcenter_nearly_collinear_triangle_stays_finite() {
        let k = kernel();
        // `b` sits a sub-threshold distance off the line through `a` and
        // `c`: the fast denominator is tiny enough to need the adaptive
        // fallback, but the triangle isn't truly degenerate.
        let c = k
            .circumcenter(
                Coord2::new(0.0, 0.0),
                Coord2::new(1.0, 1e-12),
                Coord2::new(2.0, 0.0),
            )
            .expect("nearly-collinear triangle still has a well-defined circumcenter");
        assert!(c.x.is_finite() && c.y.is_finite());
        approx::assert_relative_eq!(c.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn circumcenter_exactly_collinear_is_none() {
        let k = kernel();
        let c = k.circumcenter(
            Coord2::new(0.0, 0.0),
            Coord2::new(1.0, 0.0),
            Coord2::new(2.0, 0.0),
        );
        assert!(c.is_none());
    }
}
