//! Plot-data export for two-objective Pareto queries.
//!
//! When the caller supplies a destination directory, the two approximations
//! and the achieved points are written as `x,y` pairs in clockwise vertex
//! order, one file each. This is the only output the checker ever persists.

use std::io::Write;
use std::path::Path;

use fs_err::File;
use log::info;

use crate::error::{Error, Result};
use crate::storage::{Halfspace, Point, Polytope};

const VERTEX_EPSILON: f64 = 1e-7;

/// Writes `underapproximation.csv`, `overapproximation.csv` and
/// `paretopoints.csv` into `directory`.
pub(crate) fn export_pareto_plot(
    directory: &Path,
    under: &Polytope,
    over: &Polytope,
) -> Result<()> {
    let pareto_points = pareto_optimal_points(under.points());
    write_csv(
        &directory.join("underapproximation.csv"),
        &convex_chain(&pareto_points),
    )?;
    write_csv(
        &directory.join("overapproximation.csv"),
        &halfspace_vertices(over.halfspaces()),
    )?;
    write_csv(&directory.join("paretopoints.csv"), &pareto_points)?;
    info!("Exported Pareto plot data to {}", directory.display());
    Ok(())
}

fn write_csv(path: &Path, vertices: &[Point]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|error| Error::BackendFailure(format!("cannot write plot data: {}", error)))?;
    for vertex in vertices {
        writeln!(file, "{},{}", vertex[0], vertex[1])
            .map_err(|error| Error::BackendFailure(format!("cannot write plot data: {}", error)))?;
    }
    Ok(())
}

/// The points not dominated in both coordinates by another point, sorted by
/// ascending first coordinate: clockwise along the frontier.
fn pareto_optimal_points(points: &[Point]) -> Vec<Point> {
    let mut result: Vec<Point> = points
        .iter()
        .filter(|candidate| {
            !points.iter().any(|other| {
                other[0] >= candidate[0] + VERTEX_EPSILON && other[1] >= candidate[1]
                    || other[0] >= candidate[0] && other[1] >= candidate[1] + VERTEX_EPSILON
            })
        })
        .cloned()
        .collect();
    result.sort_by(|a, b| {
        a[0].partial_cmp(&b[0])
            .unwrap()
            .then(b[1].partial_cmp(&a[1]).unwrap())
    });
    result.dedup_by(|a, b| {
        (a[0] - b[0]).abs() < VERTEX_EPSILON && (a[1] - b[1]).abs() < VERTEX_EPSILON
    });
    result
}

/// The convex chain through the frontier points, dropping interior points.
fn convex_chain(sorted_points: &[Point]) -> Vec<Point> {
    let mut chain: Vec<Point> = Vec::new();
    for point in sorted_points {
        while chain.len() >= 2 {
            let a = &chain[chain.len() - 2];
            let b = &chain[chain.len() - 1];
            let cross =
                (b[0] - a[0]) * (point[1] - a[1]) - (b[1] - a[1]) * (point[0] - a[0]);
            // drop points below the chord, they are not hull vertices
            if cross >= -VERTEX_EPSILON {
                chain.pop();
            } else {
                break;
            }
        }
        chain.push(point.clone());
    }
    chain
}

/// The boundary vertices of a two-dimensional halfspace intersection:
/// pairwise boundary-line intersections that satisfy every halfspace,
/// ordered clockwise.
fn halfspace_vertices(halfspaces: &[Halfspace]) -> Vec<Point> {
    let mut vertices: Vec<Point> = Vec::new();
    for (i, a) in halfspaces.iter().enumerate() {
        for b in halfspaces.iter().skip(i + 1) {
            let determinant = a.normal[0] * b.normal[1] - a.normal[1] * b.normal[0];
            if determinant.abs() < VERTEX_EPSILON {
                continue;
            }
            let x = (a.offset * b.normal[1] - b.offset * a.normal[1]) / determinant;
            let y = (a.normal[0] * b.offset - b.normal[0] * a.offset) / determinant;
            let candidate = [x, y];
            if halfspaces
                .iter()
                .all(|h| h.normal[0] * x + h.normal[1] * y <= h.offset + VERTEX_EPSILON)
                && !vertices.iter().any(|v| {
                    (v[0] - candidate[0]).abs() < VERTEX_EPSILON
                        && (v[1] - candidate[1]).abs() < VERTEX_EPSILON
                })
            {
                vertices.push(candidate.iter().cloned().collect());
            }
        }
    }
    // clockwise: ascending first coordinate along the upper boundary
    vertices.sort_by(|a, b| {
        a[0].partial_cmp(&b[0])
            .unwrap()
            .then(b[1].partial_cmp(&a[1]).unwrap())
    });
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::point_from;

    #[test]
    fn test_pareto_filter_and_chain() {
        let points = vec![
            point_from(&[0.2, 0.2]),
            point_from(&[1.0, 0.0]),
            point_from(&[0.0, 1.0]),
            point_from(&[0.5, 0.5]),
        ];
        let optimal = pareto_optimal_points(&points);
        assert_eq!(optimal.len(), 3);
        assert_eq!(optimal[0], point_from(&[0.0, 1.0]));
        assert_eq!(optimal[2], point_from(&[1.0, 0.0]));
        // (0.5, 0.5) lies on the chord and is dropped from the hull chain
        let chain = convex_chain(&optimal);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_halfspace_vertices() {
        let halfspaces = vec![
            Halfspace::new(point_from(&[1.0, 0.0]), 1.0),
            Halfspace::new(point_from(&[0.0, 1.0]), 1.0),
            Halfspace::new(point_from(&[1.0, 1.0]), 1.5),
        ];
        let vertices = halfspace_vertices(&halfspaces);
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[0], point_from(&[0.5, 1.0]));
        assert_eq!(vertices[1], point_from(&[1.0, 0.5]));
    }
}
