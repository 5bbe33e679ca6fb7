use nalgebra::{Point3, Vector3};

/// A geometric confinement capability.
///
/// A `Space` answers the three questions the engine needs from a confinement
/// shape: whether a point is inside, where the closest boundary point lies,
/// and how large the accessible volume is. Periodic variants additionally
/// fold points into the canonical domain. The engine consumes this contract
/// and never looks at shape internals.
pub trait Space: std::fmt::Debug + Send + Sync {
    /// True if the point lies inside the space.
    fn inside(&self, p: &Point3<f64>) -> bool;

    /// Projects the point onto the boundary surface.
    fn project(&self, p: &Point3<f64>) -> Point3<f64>;

    /// The accessible volume.
    fn volume(&self) -> f64;

    /// Folds a point into the canonical domain. Identity for
    /// non-periodic spaces.
    fn fold(&self, p: &Point3<f64>) -> Point3<f64> {
        *p
    }

    /// Per-axis period, `None` on bounded axes.
    fn periodicity(&self) -> [Option<f64>; 3] {
        [None, None, None]
    }

    /// An axis-aligned region enclosing the space, used to size spatial
    /// grids.
    fn bounds(&self) -> (Point3<f64>, Point3<f64>);
}

/// A rectangular box centered on the origin with the given half-extents.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSpace {
    half: Vector3<f64>,
}

impl BoxSpace {
    pub fn new(half: Vector3<f64>) -> Self {
        Self { half }
    }
}

impl Space for BoxSpace {
    fn inside(&self, p: &Point3<f64>) -> bool {
        p.x.abs() <= self.half.x && p.y.abs() <= self.half.y && p.z.abs() <= self.half.z
    }

    fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        if self.inside(p) {
            // project onto the nearest face
            let gaps = [
                self.half.x - p.x.abs(),
                self.half.y - p.y.abs(),
                self.half.z - p.z.abs(),
            ];
            let axis = (0..3).min_by(|&a, &b| gaps[a].total_cmp(&gaps[b])).unwrap();
            let mut q = *p;
            q[axis] = self.half[axis].copysign(if p[axis] == 0.0 { 1.0 } else { p[axis] });
            q
        } else {
            Point3::new(
                p.x.clamp(-self.half.x, self.half.x),
                p.y.clamp(-self.half.y, self.half.y),
                p.z.clamp(-self.half.z, self.half.z),
            )
        }
    }

    fn volume(&self) -> f64 {
        8.0 * self.half.x * self.half.y * self.half.z
    }

    fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        (Point3::from(-self.half), Point3::from(self.half))
    }
}

/// A fully periodic box (torus) centered on the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicSpace {
    half: Vector3<f64>,
}

impl PeriodicSpace {
    pub fn new(half: Vector3<f64>) -> Self {
        Self { half }
    }
}

impl Space for PeriodicSpace {
    fn inside(&self, _p: &Point3<f64>) -> bool {
        true
    }

    fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        // a torus has no boundary to project onto
        self.fold(p)
    }

    fn volume(&self) -> f64 {
        8.0 * self.half.x * self.half.y * self.half.z
    }

    fn fold(&self, p: &Point3<f64>) -> Point3<f64> {
        let fold1 = |x: f64, h: f64| {
            let period = 2.0 * h;
            let y = (x + h).rem_euclid(period) - h;
            y
        };
        Point3::new(
            fold1(p.x, self.half.x),
            fold1(p.y, self.half.y),
            fold1(p.z, self.half.z),
        )
    }

    fn periodicity(&self) -> [Option<f64>; 3] {
        [
            Some(2.0 * self.half.x),
            Some(2.0 * self.half.y),
            Some(2.0 * self.half.z),
        ]
    }

    fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        (Point3::from(-self.half), Point3::from(self.half))
    }
}

/// A ball of the given radius centered on the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereSpace {
    radius: f64,
}

impl SphereSpace {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }
}

impl Space for SphereSpace {
    fn inside(&self, p: &Point3<f64>) -> bool {
        p.coords.norm_squared() <= self.radius * self.radius
    }

    fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        let n = p.coords.norm();
        if n < 1e-12 {
            return Point3::new(self.radius, 0.0, 0.0);
        }
        Point3::from(p.coords * (self.radius / n))
    }

    fn volume(&self) -> f64 {
        4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3)
    }

    fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let h = Vector3::repeat(self.radius);
        (Point3::from(-h), Point3::from(h))
    }
}
