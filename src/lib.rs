//! Incremental constrained Delaunay triangulation over a quad-edge mesh,
//! plus two direct consumers built on top of a finished mesh: a bounded
//! Voronoi diagram and a Sibson (C⁰) natural-neighbor interpolator.
//!
//! # Types
//!
//! - **[`Triangulator`]**: the incremental CDT itself — bootstrap, point
//!   location, Bowyer-Watson insertion and removal, constraint embedding.
//! - **[`Vertex`]**: a planar point with an auxiliary scalar, caller index,
//!   and mesh-tracked flags (synthetic, withheld, constraint-member).
//! - **[`Thresholds`]**: the numeric-scale bundle (vertex-merge radius,
//!   half-plane and in-circle tolerances) driving the adaptive predicates.
//! - **[`constraint::Constraint`]**: a polyline or polygon forced into the
//!   mesh as a chain of constrained edges, with optional region labeling.
//! - **[`voronoi::BoundedVoronoi`]**: Thiessen polygons clipped to a
//!   rectangular bound, built from a finished [`Triangulator`].
//! - **[`natural_neighbor::NaturalNeighbor`]**: Sibson natural-neighbor
//!   interpolation queries against a finished [`Triangulator`].
//!
//! # Non-goals
//!
//! No 3-D tetrahedralization, no spherical/geographic triangulation
//! (inputs are assumed projected planar), no kinetic (moving-point)
//! updates, no persistent on-disk mesh representation. File-format
//! readers, rendering, and CLI drivers are left to other crates.

pub mod constraint;
pub mod error;
mod hilbert;
pub mod natural_neighbor;
pub mod pool;
pub mod predicates;
pub mod thresholds;
pub mod triangulator;
pub mod vertex;
pub mod voronoi;

pub use constraint::{Constraint, ConstraintKind, EmbeddedConstraint};
pub use error::{IntegrityReport, TriangulatorError, TriangulatorResult};
pub use natural_neighbor::{NaturalNeighbor, Valuator, ZValuator};
pub use predicates::{Coord2, Orientation};
pub use thresholds::Thresholds;
pub use triangulator::{ProgressToken, Triangulator};
pub use vertex::{MergeRule, Vertex, VertexFlags, VertexMergerGroup};
pub use voronoi::{BoundedVoronoi, BoundedVoronoiOptions, Rect, ThiessenEdge, ThiessenPolygon, VoronoiVertex};
