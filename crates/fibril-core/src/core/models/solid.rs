use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid aggregate: a bead or a small assembly of points whose mutual
/// distances are maintained by stiff pairwise springs fed to the solver.
///
/// A single-point solid is a plain bead with an isotropic drag set by its
/// radius; multi-point solids approximate a solid body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    points: Vec<Point3<f64>>,
    /// Rest distances between consecutive points, captured at creation.
    rest_lengths: Vec<f64>,
    /// Hydrodynamic radius used for the drag coefficient.
    pub radius: f64,
}

impl Solid {
    /// Creates a single-point bead.
    pub fn bead(center: Point3<f64>, radius: f64) -> Self {
        assert!(radius > 0.0);
        Self {
            points: vec![center],
            rest_lengths: Vec::new(),
            radius,
        }
    }

    /// Creates a rigid aggregate from a set of points; inter-point rest
    /// distances are recorded from the initial geometry.
    pub fn aggregate(points: Vec<Point3<f64>>, radius: f64) -> Self {
        assert!(points.len() >= 2 && radius > 0.0);
        let rest_lengths = points.windows(2).map(|w| (w[1] - w[0]).norm()).collect();
        Self {
            points,
            rest_lengths,
            radius,
        }
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.points
    }

    pub fn rest_lengths(&self) -> &[f64] {
        &self.rest_lengths
    }

    pub fn center(&self) -> Point3<f64> {
        let sum: Vector3<f64> = self.points.iter().map(|p| p.coords).sum();
        Point3::from(sum / self.points.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bead_has_one_point_and_no_constraints() {
        let bead = Solid::bead(Point3::new(1.0, 2.0, 3.0), 0.5);
        assert_eq!(bead.n_points(), 1);
        assert!(bead.rest_lengths().is_empty());
        assert_relative_eq!(bead.center().x, 1.0);
    }

    #[test]
    fn aggregate_records_rest_lengths() {
        let solid = Solid::aggregate(
            vec![
                Point3::origin(),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 2.0, 0.0),
            ],
            0.1,
        );
        assert_eq!(solid.rest_lengths(), &[1.0, 2.0]);
        assert_relative_eq!(solid.center().y, 2.0 / 3.0);
    }
}
