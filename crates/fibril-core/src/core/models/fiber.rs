use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::utils::geometry::segment_direction;

/// Which of the two distinguished fiber ends is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FiberEnd {
    Minus,
    Plus,
}

impl FiberEnd {
    pub const BOTH: [FiberEnd; 2] = [FiberEnd::Plus, FiberEnd::Minus];
}

/// Dynamic-instability state of one fiber end.
///
/// The ordinal "assembly state" exposed for reporting follows the
/// conventional color scale white/green/yellow/orange/red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicState {
    /// The end does not assemble or disassemble.
    #[default]
    Inactive,
    /// The end polymerizes.
    Growing,
    /// The end holds its length, pending rescue or catastrophe.
    Paused,
    /// The end depolymerizes at the fast rate.
    ShrinkingFast,
    /// The end depolymerizes.
    Shrinking,
}

impl DynamicState {
    /// The reporting ordinal: white=0, green=1, yellow=2, orange=3, red=4.
    pub fn ordinal(self) -> u8 {
        match self {
            DynamicState::Inactive => 0,
            DynamicState::Growing => 1,
            DynamicState::Paused => 2,
            DynamicState::ShrinkingFast => 3,
            DynamicState::Shrinking => 4,
        }
    }

    /// True in either depolymerizing state.
    pub fn is_shrinking(self) -> bool {
        matches!(self, DynamicState::Shrinking | DynamicState::ShrinkingFast)
    }

    pub fn is_growing(self) -> bool {
        self == DynamicState::Growing
    }
}

/// Mutable state carried by one fiber end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FiberTip {
    pub state: DynamicState,
    /// Length assembled at this end during the last step; negative while
    /// shrinking.
    pub fresh: f64,
    /// Force on the end from the last solve, projected on the outward end
    /// direction; negative values oppose growth. Persisted with the world
    /// so a restored checkpoint replays identically.
    #[serde(default)]
    pub force: f64,
}

/// A semi-flexible polymer modeled as a chain of points.
///
/// The chain is parameterized by an arclength coordinate ("abscissa")
/// increasing from the minus end toward the plus end. Growth and shrinkage
/// move the end abscissae; the origin of the coordinate is therefore stable
/// under minus-end dynamics, and bound hands can keep their attachment
/// abscissa across steps without referencing the point array directly.
///
/// Points are kept approximately equidistant; [`Fiber::adjust_segmentation`]
/// re-discretizes the chain whenever a segment drifts too far from the
/// target spacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fiber {
    points: Vec<Point3<f64>>,
    /// Abscissa of the minus end.
    abscissa_minus: f64,
    /// Target spacing between consecutive points.
    segmentation: f64,
    pub tip_minus: FiberTip,
    pub tip_plus: FiberTip,
}

impl Fiber {
    /// Creates a straight fiber starting at `origin` and extending by
    /// `length` along `dir`.
    pub fn new(origin: Point3<f64>, dir: Vector3<f64>, length: f64, segmentation: f64) -> Self {
        assert!(length > 0.0 && segmentation > 0.0);
        let dir = dir.normalize();
        let n_seg = ((length / segmentation).round() as usize).max(1);
        let step = length / n_seg as f64;
        let points = (0..=n_seg)
            .map(|i| origin + dir * (step * i as f64))
            .collect();
        Self {
            points,
            abscissa_minus: 0.0,
            segmentation,
            tip_minus: FiberTip::default(),
            tip_plus: FiberTip::default(),
        }
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_segments(&self) -> usize {
        self.points.len() - 1
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.points
    }

    pub fn segment(&self, i: usize) -> (Point3<f64>, Point3<f64>) {
        (self.points[i], self.points[i + 1])
    }

    /// Contour length of the chain.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .sum()
    }

    /// Abscissa of the minus end.
    pub fn abscissa_m(&self) -> f64 {
        self.abscissa_minus
    }

    /// Abscissa of the plus end.
    pub fn abscissa_p(&self) -> f64 {
        self.abscissa_minus + self.length()
    }

    pub fn abscissa_of_end(&self, end: FiberEnd) -> f64 {
        match end {
            FiberEnd::Minus => self.abscissa_m(),
            FiberEnd::Plus => self.abscissa_p(),
        }
    }

    /// True if `abscissa` lies within the current fiber range.
    pub fn covers(&self, abscissa: f64) -> bool {
        abscissa >= self.abscissa_m() && abscissa <= self.abscissa_p()
    }

    /// Locates an abscissa on the chain: segment index plus interpolation
    /// coefficient in `[0, 1]`. The abscissa is clamped to the fiber range.
    pub fn interpolate(&self, abscissa: f64) -> (usize, f64) {
        let mut remaining = (abscissa - self.abscissa_minus).max(0.0);
        let last = self.n_segments() - 1;
        for i in 0..self.n_segments() {
            let len = (self.points[i + 1] - self.points[i]).norm();
            if remaining <= len || i == last {
                let t = if len > 1e-12 {
                    (remaining / len).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                return (i, t);
            }
            remaining -= len;
        }
        (last, 1.0)
    }

    /// Abscissa of a point located on segment `segment` at interpolation
    /// coefficient `t`; the inverse of [`Fiber::interpolate`].
    pub fn abscissa_at(&self, segment: usize, t: f64) -> f64 {
        let before: f64 = self
            .points
            .windows(2)
            .take(segment)
            .map(|w| (w[1] - w[0]).norm())
            .sum();
        let len = (self.points[segment + 1] - self.points[segment]).norm();
        self.abscissa_minus + before + t * len
    }

    /// Position of a point of given abscissa.
    pub fn pos_at(&self, abscissa: f64) -> Point3<f64> {
        let (i, t) = self.interpolate(abscissa);
        let (a, b) = self.segment(i);
        a + (b - a) * t
    }

    /// Unit tangent at a given abscissa, oriented from minus to plus end.
    pub fn dir_at(&self, abscissa: f64) -> Vector3<f64> {
        let (i, _) = self.interpolate(abscissa);
        let (a, b) = self.segment(i);
        segment_direction(&a, &b)
    }

    pub fn end_pos(&self, end: FiberEnd) -> Point3<f64> {
        match end {
            FiberEnd::Minus => self.points[0],
            FiberEnd::Plus => *self.points.last().unwrap(),
        }
    }

    /// Outward unit direction at an end (the direction in which the end
    /// grows).
    pub fn end_dir(&self, end: FiberEnd) -> Vector3<f64> {
        match end {
            FiberEnd::Minus => {
                let (a, b) = self.segment(0);
                -segment_direction(&a, &b)
            }
            FiberEnd::Plus => {
                let (a, b) = self.segment(self.n_segments() - 1);
                segment_direction(&a, &b)
            }
        }
    }

    pub fn tip(&self, end: FiberEnd) -> &FiberTip {
        match end {
            FiberEnd::Minus => &self.tip_minus,
            FiberEnd::Plus => &self.tip_plus,
        }
    }

    pub fn tip_mut(&mut self, end: FiberEnd) -> &mut FiberTip {
        match end {
            FiberEnd::Minus => &mut self.tip_minus,
            FiberEnd::Plus => &mut self.tip_plus,
        }
    }

    /// Changes the length at one end by `delta` (negative shrinks),
    /// displacing the terminal point along the end direction. The abscissa
    /// of the far end is unaffected; minus-end assembly therefore lowers
    /// `abscissa_m`, keeping attachment coordinates stable.
    ///
    /// Shrinking is clamped so at least one segment of positive length
    /// remains; the caller decides the fate of a fiber reaching its minimal
    /// length before calling.
    pub fn grow(&mut self, end: FiberEnd, delta: f64) {
        let delta = delta.max(1e-9 - self.length());
        match end {
            FiberEnd::Plus => {
                // consume whole points while shrinking past them
                let mut delta = delta;
                while delta < 0.0 && self.n_points() > 2 {
                    let last = self.n_points() - 1;
                    let seg = (self.points[last] - self.points[last - 1]).norm();
                    if seg + delta > 0.0 {
                        break;
                    }
                    delta += seg;
                    self.points.pop();
                }
                let last = self.n_points() - 1;
                let dir = self.end_dir(FiberEnd::Plus);
                self.points[last] += dir * delta;
            }
            FiberEnd::Minus => {
                let mut delta = delta;
                while delta < 0.0 && self.n_points() > 2 {
                    let seg = (self.points[1] - self.points[0]).norm();
                    if seg + delta > 0.0 {
                        break;
                    }
                    delta += seg;
                    self.points.remove(0);
                    self.abscissa_minus += seg;
                }
                let dir = self.end_dir(FiberEnd::Minus);
                self.points[0] += dir * delta;
                self.abscissa_minus -= delta;
            }
        }
    }

    /// Resamples the chain into equal segments whenever the spacing has
    /// drifted by more than a third from the target segmentation.
    ///
    /// Sampling walks the existing polyline, so the shape is preserved up
    /// to the discretization change. After the call no segment is longer
    /// than `1.5 * segmentation`, the bound the attachment grid relies on
    /// when sizing its cells.
    pub fn adjust_segmentation(&mut self) {
        let length = self.length();
        let n_seg = self.n_segments();
        let lo = 0.75 * self.segmentation;
        let hi = 4.0 / 3.0 * self.segmentation;
        let drifted = self
            .points
            .windows(2)
            .any(|w| !((lo..=hi).contains(&(w[1] - w[0]).norm())));
        let wanted = ((length / self.segmentation).round() as usize).max(1);
        if drifted || wanted != n_seg {
            self.points = resample_polyline(&self.points, wanted);
        }
    }

    /// Cuts the fiber at `abscissa`, keeping the minus-end side in `self`
    /// and returning the plus-end side as a new fiber.
    ///
    /// Returns `None` if the cut would leave either side shorter than
    /// `min_piece`. The returned fiber keeps the abscissa coordinate of the
    /// severed site as its minus-end abscissa, so attachment coordinates on
    /// the distal side stay meaningful after transfer.
    pub fn sever(&mut self, abscissa: f64, min_piece: f64) -> Option<Fiber> {
        let a_m = self.abscissa_m();
        let a_p = self.abscissa_p();
        if abscissa - a_m < min_piece || a_p - abscissa < min_piece {
            return None;
        }
        let cut = self.pos_at(abscissa);
        let (seg, _) = self.interpolate(abscissa);

        let mut distal = vec![cut];
        distal.extend_from_slice(&self.points[seg + 1..]);
        let mut proximal = self.points[..=seg].to_vec();
        proximal.push(cut);

        let n_distal = (((a_p - abscissa) / self.segmentation).round() as usize).max(1);
        let n_proximal = (((abscissa - a_m) / self.segmentation).round() as usize).max(1);

        let new_fiber = Fiber {
            points: resample_polyline(&distal, n_distal),
            abscissa_minus: abscissa,
            segmentation: self.segmentation,
            // the transferred plus end keeps its state; the fresh minus end
            // of the distal piece starts stable
            tip_minus: FiberTip::default(),
            tip_plus: self.tip_plus,
        };
        self.points = resample_polyline(&proximal, n_proximal);
        // the freshly exposed plus end of the proximal piece is unstable
        self.tip_plus = FiberTip {
            state: DynamicState::Shrinking,
            ..FiberTip::default()
        };
        Some(new_fiber)
    }

    /// Rigid translation of the whole chain.
    pub fn translate(&mut self, delta: &Vector3<f64>) {
        for p in &mut self.points {
            *p += delta;
        }
    }
}

/// Resamples a polyline into `n_seg` equal-length segments, walking the
/// cumulative arclength of the input.
fn resample_polyline(points: &[Point3<f64>], n_seg: usize) -> Vec<Point3<f64>> {
    debug_assert!(points.len() >= 2);
    let total: f64 = points.windows(2).map(|w| (w[1] - w[0]).norm()).sum();
    let step = total / n_seg as f64;

    let mut out = Vec::with_capacity(n_seg + 1);
    out.push(points[0]);
    let mut seg = 0;
    let mut seg_start = 0.0;
    let mut seg_len = (points[1] - points[0]).norm();
    for k in 1..n_seg {
        let target = step * k as f64;
        while seg_start + seg_len < target && seg + 2 < points.len() {
            seg_start += seg_len;
            seg += 1;
            seg_len = (points[seg + 1] - points[seg]).norm();
        }
        let t = if seg_len > 1e-12 {
            ((target - seg_start) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(points[seg] + (points[seg + 1] - points[seg]) * t);
    }
    out.push(*points.last().unwrap());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn straight_fiber(length: f64) -> Fiber {
        Fiber::new(Point3::origin(), Vector3::x(), length, 0.5)
    }

    #[test]
    fn new_fiber_has_requested_length_and_spacing() {
        let fiber = straight_fiber(2.0);
        assert_eq!(fiber.n_segments(), 4);
        assert_relative_eq!(fiber.length(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(fiber.abscissa_m(), 0.0);
        assert_relative_eq!(fiber.abscissa_p(), 2.0);
    }

    #[test]
    fn abscissa_interpolation_is_linear_on_a_straight_fiber() {
        let fiber = straight_fiber(2.0);
        for abscissa in [0.0, 0.3, 1.0, 1.7, 2.0] {
            let p = fiber.pos_at(abscissa);
            assert_relative_eq!(p.x, abscissa, epsilon = 1e-12);
            assert_relative_eq!(p.y, 0.0);
        }
        assert_relative_eq!(fiber.dir_at(1.2).x, 1.0);
    }

    #[test]
    fn out_of_range_abscissa_clamps_to_the_ends() {
        let fiber = straight_fiber(2.0);
        assert_relative_eq!(fiber.pos_at(-1.0).x, 0.0);
        assert_relative_eq!(fiber.pos_at(9.0).x, 2.0);
        assert!(!fiber.covers(-0.1));
        assert!(!fiber.covers(2.1));
        assert!(fiber.covers(1.0));
    }

    #[test]
    fn plus_end_growth_extends_along_the_tangent() {
        let mut fiber = straight_fiber(2.0);
        fiber.grow(FiberEnd::Plus, 0.25);
        assert_relative_eq!(fiber.length(), 2.25, epsilon = 1e-12);
        assert_relative_eq!(fiber.abscissa_p(), 2.25, epsilon = 1e-12);
        // the minus-end abscissa is untouched
        assert_relative_eq!(fiber.abscissa_m(), 0.0);
    }

    #[test]
    fn minus_end_growth_lowers_the_minus_abscissa() {
        let mut fiber = straight_fiber(2.0);
        fiber.grow(FiberEnd::Minus, 0.25);
        assert_relative_eq!(fiber.length(), 2.25, epsilon = 1e-12);
        assert_relative_eq!(fiber.abscissa_m(), -0.25, epsilon = 1e-12);
        // an attachment at abscissa 1.0 keeps its material position
        assert_relative_eq!(fiber.pos_at(1.0).x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn shrinking_consumes_points_but_keeps_two() {
        let mut fiber = straight_fiber(2.0);
        fiber.grow(FiberEnd::Plus, -1.3);
        assert_relative_eq!(fiber.length(), 0.7, epsilon = 1e-12);
        assert!(fiber.n_points() >= 2);

        // shrinking beyond the full length clamps to a sliver
        fiber.grow(FiberEnd::Plus, -10.0);
        assert!(fiber.length() > 0.0);
        assert!(fiber.n_points() >= 2);
    }

    #[test]
    fn adjust_segmentation_restores_even_spacing() {
        let mut fiber = straight_fiber(2.0);
        fiber.grow(FiberEnd::Plus, 0.9);
        fiber.adjust_segmentation();
        let lens: Vec<f64> = fiber
            .points()
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .collect();
        let spread = lens.iter().cloned().fold(f64::MIN, f64::max)
            - lens.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread < 1e-9, "segments should be uniform, spread {spread}");
        assert_relative_eq!(fiber.length(), 2.9, epsilon = 1e-9);
    }

    #[test]
    fn resampling_preserves_a_bent_shape() {
        // an L-shaped polyline
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        let out = resample_polyline(&points, 4);
        assert_eq!(out.len(), 5);
        assert_relative_eq!(out[0].x, 0.0);
        assert_relative_eq!(out[4].y, 1.0);
        // the corner survives: the middle sample sits at the bend
        assert_relative_eq!(out[2].x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[2].y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn sever_preserves_abscissa_continuity() {
        let mut fiber = straight_fiber(2.0);
        fiber.tip_plus.state = DynamicState::Growing;
        let distal = fiber.sever(0.75, 0.1).unwrap();

        assert_relative_eq!(fiber.abscissa_p(), 0.75, epsilon = 1e-9);
        assert_relative_eq!(distal.abscissa_m(), 0.75, epsilon = 1e-9);
        assert_relative_eq!(distal.length(), 1.25, epsilon = 1e-9);
        // material point at abscissa 1.5 now lives on the distal piece
        assert_relative_eq!(distal.pos_at(1.5).x, 1.5, epsilon = 1e-9);

        // state transfer: distal plus end keeps Growing, proximal plus end
        // is freshly exposed and shrinks
        assert_eq!(distal.tip_plus.state, DynamicState::Growing);
        assert_eq!(distal.tip_minus.state, DynamicState::Inactive);
        assert_eq!(fiber.tip_plus.state, DynamicState::Shrinking);
    }

    #[test]
    fn sever_refuses_to_create_slivers() {
        let mut fiber = straight_fiber(2.0);
        assert!(fiber.sever(0.05, 0.1).is_none());
        assert!(fiber.sever(1.95, 0.1).is_none());
        assert_eq!(fiber.n_segments(), 4);
    }

    #[test]
    fn assembly_ordinals_follow_the_color_convention() {
        assert_eq!(DynamicState::Inactive.ordinal(), 0);
        assert_eq!(DynamicState::Growing.ordinal(), 1);
        assert_eq!(DynamicState::Paused.ordinal(), 2);
        assert_eq!(DynamicState::ShrinkingFast.ordinal(), 3);
        assert_eq!(DynamicState::Shrinking.ordinal(), 4);
    }
}
