/// Numeric scale parameters that drive the adaptive-precision predicates.
///
/// `Thresholds` is a pure function of the coordinate domain and the expected
/// point spacing: nothing here depends on mesh state, so a single bundle can
/// be shared across a [`crate::Triangulator`], its [`crate::voronoi::BoundedVoronoi`],
/// and any number of [`crate::natural_neighbor::NaturalNeighbor`] consumers built on top of it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Thresholds {
    /// Two vertices closer than this are merged into one on insertion.
    pub vertex_merge_radius: f64,
    /// Below this magnitude, the fast orientation determinant is
    /// considered unreliable and the adaptive-precision predicate runs.
    pub half_plane_threshold: f64,
    /// Below this magnitude, the fast in-circle determinant is considered
    /// unreliable and the adaptive-precision predicate runs.
    pub in_circle_threshold: f64,
}

impl Thresholds {
    /// Derive thresholds from the nominal spacing between samples, as
    /// `Triangulator::new` does.
    ///
    /// `nominal_point_spacing` should be a representative distance between
    /// neighboring input points (e.g. the mean nearest-neighbor distance for
    /// a scattered terrain sample). A value of zero or a non-finite value
    /// falls back to a unit spacing so the thresholds remain well defined.
    pub fn from_nominal_spacing(nominal_point_spacing: f64) -> Self {
        let spacing = if nominal_point_spacing.is_finite() && nominal_point_spacing > 0.0 {
            nominal_point_spacing
        } else {
            1.0
        };
        Self {
            vertex_merge_radius: spacing * 1.0e-6,
            half_plane_threshold: spacing * spacing * 1.0e-10,
            in_circle_threshold: spacing.powi(4) * 1.0e-10,
        }
    }

    /// Derive thresholds from the bounding extent of an input batch, used
    /// when the caller has a point set in hand but no prior notion of
    /// nominal spacing (e.g. the first batch passed to `add(list)`).
    pub fn from_coordinate_domain(min: (f64, f64), max: (f64, f64), point_count: usize) -> Self {
        let width = (max.0 - min.0).abs();
        let height = (max.1 - min.1).abs();
        let diagonal = (width * width + height * height).sqrt();
        let n = (point_count.max(1) as f64).sqrt();
        let nominal_spacing = if diagonal > 0.0 { diagonal / n.max(1.0) } else { 1.0 };
        Self::from_nominal_spacing(nominal_spacing)
    }

    /// [`Self::from_coordinate_domain`] for callers whose points aren't
    /// already `f64`, so a caller working in `f32` or a newtype coordinate
    /// doesn't have to convert the whole batch by hand first.
    ///
    /// Points that fail to cast (`T::to_f64` returning `None`, which
    /// `num_traits::Float` implementors shouldn't produce for finite
    /// values) are skipped rather than aborting the whole derivation.
    pub fn from_points<T>(points: impl IntoIterator<Item = (T, T)>) -> Self
    where
        T: num_traits::Float,
    {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        let mut count = 0usize;
        for (x, y) in points {
            let (Some(x), Some(y)) = (x.to_f64(), y.to_f64()) else {
                continue;
            };
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;
        }
        if count == 0 {
            return Self::default();
        }
        Self::from_coordinate_domain((min_x, min_y), (max_x, max_y), count)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_nominal_spacing(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_points_matches_from_coordinate_domain() {
        let pts: Vec<(f32, f32)> = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let from_generic = Thresholds::from_points(pts);
        let from_f64 = Thresholds::from_coordinate_domain((0.0, 0.0), (10.0, 10.0), 4);
        assert_eq!(from_generic, from_f64);
    }

    #[test]
    fn from_points_empty_falls_back_to_default() {
        let empty: Vec<(f64, f64)> = Vec::new();
        assert_eq!(Thresholds::from_points(empty), Thresholds::default());
    }
}
