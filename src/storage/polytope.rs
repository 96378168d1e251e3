//! Convex polytopes over the objective-value space of multi-objective
//! queries.
//!
//! Two dual representations coexist: the over-approximation is an
//! intersection of supporting halfspaces, the under-approximation is the
//! downward closure of the convex hull of achieved points. Refinement only
//! ever adds a halfspace, resp. a point; polytopes are never mutated through
//! a representation change. Geometry runs in `f64` independently of the
//! model's numeric type, on the internal dense simplex.

use std::fmt;

use tinyvec::TinyVec;

use crate::storage::simplex::{self, SimplexOutcome};

const GEOMETRY_EPSILON: f64 = 1e-9;

/// A point of the objective-value space. Multi-objective queries rarely
/// exceed a handful of objectives, so points live inline.
pub type Point = TinyVec<[f64; 4]>;

/// Builds a [`Point`] from a slice.
pub fn point_from(coordinates: &[f64]) -> Point {
    coordinates.iter().cloned().collect()
}

/// The halfspace `{x : normal·x ≤ offset}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Halfspace {
    pub normal: Point,
    pub offset: f64,
}

impl Halfspace {
    pub fn new(normal: Point, offset: f64) -> Self {
        Self { normal, offset }
    }

    /// The signed Euclidean distance of `point` from the halfspace:
    /// positive when the point lies outside.
    pub fn signed_distance(&self, point: &[f64]) -> f64 {
        let norm = self
            .normal
            .iter()
            .map(|w| w * w)
            .sum::<f64>()
            .sqrt();
        (dot(&self.normal, point) - self.offset) / norm
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        dot(&self.normal, point) <= self.offset + GEOMETRY_EPSILON
    }
}

/// A convex polytope in one of its two refinement representations.
#[derive(Debug, Clone, PartialEq)]
pub enum Polytope {
    /// The empty set.
    Empty { dimension: usize },
    /// The whole space.
    Universe { dimension: usize },
    /// An intersection of halfspaces.
    Halfspaces {
        dimension: usize,
        halfspaces: Vec<Halfspace>,
    },
    /// The downward closure of the convex hull of a point set.
    DownwardClosure {
        dimension: usize,
        points: Vec<Point>,
    },
}

impl Polytope {
    pub fn empty(dimension: usize) -> Self {
        Self::Empty { dimension }
    }

    pub fn universe(dimension: usize) -> Self {
        Self::Universe { dimension }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Empty { dimension }
            | Self::Universe { dimension }
            | Self::Halfspaces { dimension, .. }
            | Self::DownwardClosure { dimension, .. } => *dimension,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty { .. } => true,
            Self::DownwardClosure { points, .. } => points.is_empty(),
            _ => false,
        }
    }

    /// The halfspaces of a halfspace-form polytope.
    pub fn halfspaces(&self) -> &[Halfspace] {
        match self {
            Self::Halfspaces { halfspaces, .. } => halfspaces,
            _ => &[],
        }
    }

    /// The generating points of a downward-closure polytope.
    pub fn points(&self) -> &[Point] {
        match self {
            Self::DownwardClosure { points, .. } => points,
            _ => &[],
        }
    }

    /// Intersects with one more halfspace; turns a universe into
    /// halfspace form.
    pub fn intersect_halfspace(&mut self, halfspace: Halfspace) {
        match self {
            Self::Universe { dimension } => {
                *self = Self::Halfspaces {
                    dimension: *dimension,
                    halfspaces: vec![halfspace],
                };
            }
            Self::Halfspaces { halfspaces, .. } => halfspaces.push(halfspace),
            Self::Empty { .. } => (),
            Self::DownwardClosure { .. } => {
                unreachable!("refinement never intersects a downward closure")
            }
        }
    }

    /// Adds a generating point; turns an empty set into downward-closure
    /// form.
    pub fn insert_point(&mut self, point: Point) {
        match self {
            Self::Empty { dimension } => {
                *self = Self::DownwardClosure {
                    dimension: *dimension,
                    points: vec![point],
                };
            }
            Self::DownwardClosure { points, .. } => points.push(point),
            _ => unreachable!("refinement never adds points to halfspace form"),
        }
    }

    /// Whether `point` lies in the polytope.
    pub fn contains(&self, point: &[f64]) -> bool {
        match self {
            Self::Empty { .. } => false,
            Self::Universe { .. } => true,
            Self::Halfspaces { halfspaces, .. } => {
                halfspaces.iter().all(|h| h.contains(point))
            }
            Self::DownwardClosure { points, .. } => {
                downward_closure_contains(points, point)
            }
        }
    }

    /// The supremum of `direction·x` over the polytope, `None` when
    /// unbounded or empty.
    pub fn support(&self, direction: &[f64]) -> Option<f64> {
        match self {
            Self::Empty { .. } => None,
            Self::Universe { .. } => None,
            Self::Halfspaces { halfspaces, .. } => {
                halfspace_support(halfspaces, direction, &[])
            }
            Self::DownwardClosure { points, .. } => {
                if direction.iter().any(|&w| w < -GEOMETRY_EPSILON) {
                    return None;
                }
                points
                    .iter()
                    .map(|p| dot(p, direction))
                    .fold(None, |best, value| {
                        Some(best.map_or(value, |b: f64| b.max(value)))
                    })
            }
        }
    }

    /// Maximizes coordinate `objective` over the polytope intersected with
    /// the lower-bound constraints `x[i] ≥ threshold` for `(i, threshold)`
    /// in `constraints`. `None` when infeasible or unbounded.
    pub fn optimize_coordinate(
        &self,
        objective: usize,
        constraints: &[(usize, f64)],
    ) -> Option<f64> {
        let dimension = self.dimension();
        let mut direction = vec![0.0; dimension];
        direction[objective] = 1.0;
        match self {
            Self::Empty { .. } | Self::Universe { .. } => None,
            Self::Halfspaces { halfspaces, .. } => {
                halfspace_support(halfspaces, &direction, constraints)
            }
            Self::DownwardClosure { points, .. } => {
                downward_closure_optimize(points, objective, constraints)
            }
        }
    }

    /// The best separating halfspace between `point` and the polytope: the
    /// normalized direction maximizing the separation margin. `None` when
    /// the point is inside.
    pub fn separating_halfspace(&self, point: &[f64]) -> Option<Halfspace> {
        match self {
            Self::DownwardClosure { dimension, points } => {
                separating_halfspace(points, point, *dimension)
            }
            Self::Empty { .. } => None,
            _ => unreachable!("separation is only queried on downward closures"),
        }
    }
}

impl fmt::Display for Polytope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty { .. } => write!(f, "∅"),
            Self::Universe { .. } => write!(f, "universe"),
            Self::Halfspaces { halfspaces, .. } => {
                write!(f, "{} halfspaces", halfspaces.len())
            }
            Self::DownwardClosure { points, .. } => {
                write!(f, "dc of {} points", points.len())
            }
        }
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Feasibility of `∃λ ≥ 0: Σλ = 1 ∧ Σλ_i·p_i ≥ t` via the simplex.
fn downward_closure_contains(points: &[Point], target: &[f64]) -> bool {
    if points.is_empty() {
        return false;
    }
    let dimension = target.len();
    let k = points.len();
    let mut rows = Vec::with_capacity(dimension + 2);
    let mut rhs = Vec::with_capacity(dimension + 2);
    for j in 0..dimension {
        // Σλ_i p_i[j] ≥ t[j]
        rows.push(points.iter().map(|p| -p[j]).collect::<Vec<_>>());
        rhs.push(-target[j] + GEOMETRY_EPSILON);
    }
    rows.push(vec![1.0; k]);
    rhs.push(1.0);
    rows.push(vec![-1.0; k]);
    rhs.push(-1.0);
    !matches!(
        simplex::maximize(&vec![0.0; k], &rows, &rhs),
        SimplexOutcome::Infeasible
    )
}

/// Maximizes `Σλ_i·p_i[objective]` over convex combinations whose other
/// coordinates meet the given lower bounds.
fn downward_closure_optimize(
    points: &[Point],
    objective: usize,
    constraints: &[(usize, f64)],
) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let k = points.len();
    let mut rows = Vec::new();
    let mut rhs = Vec::new();
    for &(coordinate, threshold) in constraints {
        rows.push(points.iter().map(|p| -p[coordinate]).collect::<Vec<_>>());
        rhs.push(-threshold);
    }
    rows.push(vec![1.0; k]);
    rhs.push(1.0);
    rows.push(vec![-1.0; k]);
    rhs.push(-1.0);
    let objective_row: Vec<f64> = points.iter().map(|p| p[objective]).collect();
    match simplex::maximize(&objective_row, &rows, &rhs) {
        SimplexOutcome::Optimal { objective, .. } => Some(objective),
        _ => None,
    }
}

/// Maximizes `direction·x` over an intersection of halfspaces and optional
/// coordinate lower bounds, with free variables split into differences.
fn halfspace_support(
    halfspaces: &[Halfspace],
    direction: &[f64],
    constraints: &[(usize, f64)],
) -> Option<f64> {
    let dimension = direction.len();
    let mut rows = Vec::with_capacity(halfspaces.len() + constraints.len());
    let mut rhs = Vec::with_capacity(halfspaces.len() + constraints.len());
    for halfspace in halfspaces {
        let mut row = Vec::with_capacity(2 * dimension);
        row.extend(halfspace.normal.iter().cloned());
        row.extend(halfspace.normal.iter().map(|w| -w));
        rows.push(row);
        rhs.push(halfspace.offset);
    }
    for &(coordinate, threshold) in constraints {
        let mut row = vec![0.0; 2 * dimension];
        row[coordinate] = -1.0;
        row[dimension + coordinate] = 1.0;
        rows.push(row);
        rhs.push(-threshold);
    }
    let mut objective = Vec::with_capacity(2 * dimension);
    objective.extend(direction.iter().cloned());
    objective.extend(direction.iter().map(|w| -w));
    match simplex::maximize(&objective, &rows, &rhs) {
        SimplexOutcome::Optimal { objective, .. } => Some(objective),
        _ => None,
    }
}

/// The maximum-margin separating direction: maximize `w·t − z` subject to
/// `w·p_i ≤ z`, `w ≥ 0`, `Σw = 1`. A positive optimum yields the halfspace
/// `{x : w·x ≤ z}` containing the closure but not the target.
fn separating_halfspace(points: &[Point], target: &[f64], dimension: usize) -> Option<Halfspace> {
    if points.is_empty() {
        return None;
    }
    // variables: w (dimension), z = u − v
    let num_vars = dimension + 2;
    let mut rows = Vec::new();
    let mut rhs = Vec::new();
    for point in points {
        let mut row = Vec::with_capacity(num_vars);
        row.extend(point.iter().cloned());
        row.push(-1.0);
        row.push(1.0);
        rows.push(row);
        rhs.push(0.0);
    }
    let mut sum_row = vec![1.0; dimension];
    sum_row.push(0.0);
    sum_row.push(0.0);
    rows.push(sum_row.clone());
    rhs.push(1.0);
    rows.push(sum_row.iter().map(|w| -w).collect());
    rhs.push(-1.0);

    let mut objective = Vec::with_capacity(num_vars);
    objective.extend(target.iter().cloned());
    objective.push(-1.0);
    objective.push(1.0);
    match simplex::maximize(&objective, &rows, &rhs) {
        SimplexOutcome::Optimal {
            objective: margin,
            solution,
        } if margin > GEOMETRY_EPSILON => {
            let normal: Point = solution[..dimension].iter().cloned().collect();
            let offset = solution[dimension] - solution[dimension + 1];
            Some(Halfspace::new(normal, offset))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halfspace_distance() {
        let h = Halfspace::new(point_from(&[1.0, 0.0]), 1.0);
        assert!(h.contains(&[0.5, 3.0]));
        assert!(!h.contains(&[1.5, 0.0]));
        assert!((h.signed_distance(&[1.5, 0.0]) - 0.5).abs() < 1e-9);
        assert!((h.signed_distance(&[0.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_downward_closure_membership() {
        let mut under = Polytope::empty(2);
        assert!(!under.contains(&[0.0, 0.0]));
        under.insert_point(point_from(&[1.0, 0.0]));
        under.insert_point(point_from(&[0.0, 1.0]));
        // the diagonal is achievable by mixing, anything above is not
        assert!(under.contains(&[0.5, 0.5]));
        assert!(under.contains(&[0.2, 0.3]));
        assert!(!under.contains(&[0.6, 0.6]));
    }

    #[test]
    fn test_halfspace_form() {
        let mut over = Polytope::universe(2);
        assert!(over.contains(&[100.0, 100.0]));
        over.intersect_halfspace(Halfspace::new(point_from(&[1.0, 0.0]), 1.0));
        over.intersect_halfspace(Halfspace::new(point_from(&[0.0, 1.0]), 1.0));
        over.intersect_halfspace(Halfspace::new(point_from(&[0.5, 0.5]), 0.5));
        assert!(over.contains(&[0.5, 0.5]));
        assert!(!over.contains(&[0.9, 0.9]));
        // support in the diagonal direction is capped by the third plane
        let support = over.support(&[1.0, 1.0]).unwrap();
        assert!((support - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_optimize_coordinate() {
        let mut under = Polytope::empty(2);
        under.insert_point(point_from(&[1.0, 0.0]));
        under.insert_point(point_from(&[0.0, 1.0]));
        // best first coordinate subject to second ≥ 0.5 is on the diagonal
        let best = under.optimize_coordinate(0, &[(1, 0.5)]).unwrap();
        assert!((best - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_separating_halfspace() {
        let mut under = Polytope::empty(2);
        under.insert_point(point_from(&[1.0, 0.0]));
        under.insert_point(point_from(&[0.0, 1.0]));
        let outside = [0.8, 0.8];
        let halfspace = under.separating_halfspace(&outside).unwrap();
        // separates the point from the closure
        assert!(halfspace.signed_distance(&outside) > 0.0);
        assert!(halfspace.contains(&[0.5, 0.5]));
        // an inside point admits no separator
        assert!(under.separating_halfspace(&[0.3, 0.3]).is_none());
    }
}
