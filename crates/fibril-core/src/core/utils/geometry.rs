use nalgebra::{Point3, Vector3};

#[inline]
pub fn segment_direction(a: &Point3<f64>, b: &Point3<f64>) -> Vector3<f64> {
    let d = b - a;
    let n = d.norm();
    if n < 1e-12 { Vector3::x() } else { d / n }
}

/// Projects `p` onto the segment `[a, b]` and returns the clamped
/// interpolation coefficient in `[0, 1]` together with the closest point.
#[inline]
pub fn project_on_segment(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
) -> (f64, Point3<f64>) {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < 1e-24 {
        return (0.0, *a);
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (t, a + ab * t)
}

#[inline]
pub fn distance_sq_to_segment(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let (_, closest) = project_on_segment(p, a, b);
    (p - closest).norm_squared()
}
