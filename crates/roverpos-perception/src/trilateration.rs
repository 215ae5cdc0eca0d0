//! Least-squares trilateration of a UWB tag from anchor ranges.
//!
//! Subtracting the first anchor's sphere equation from the others leaves a
//! linear system in the tag position, solved through its normal equations.
//! When the anchors are (nearly) coplanar the height is poorly observed by
//! that system; it is then recovered from the ranges instead, with the tag
//! assumed to sit below the anchors.

use roverpos_types::{RoverError, Vector};

/// Fewest ranges that fix a position.
pub const MIN_ANCHORS: usize = 3;

/// Anchor layouts whose normal matrix has a relative determinant below this
/// are solved as planar.
const PLANAR: f64 = 1e-2;

/// Relative determinant below which the horizontal system is singular.
const SINGULAR: f64 = 1e-9;

/// Alternations between the horizontal solve and the height estimate.
const HEIGHT_PASSES: usize = 8;

/// A surveyed anchor position and the measured range to it, in one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorRange {
    pub position: Vector,
    pub range: f64,
}

impl AnchorRange {
    pub fn new(position: Vector, range: f64) -> Self {
        Self { position, range }
    }
}

/// Position of the tag that best fits `anchors`.
///
/// # Errors
///
/// Returns [`RoverError::Validation`] for fewer than [`MIN_ANCHORS`]
/// anchors, a negative or non-finite range, or collinear anchors.
pub fn trilaterate(anchors: &[AnchorRange]) -> Result<Vector, RoverError> {
    let [origin, ..] = anchors else {
        return Err(too_few(0));
    };
    if anchors.len() < MIN_ANCHORS {
        return Err(too_few(anchors.len()));
    }
    if let Some(bad) = anchors
        .iter()
        .find(|a| !(a.range.is_finite() && a.range >= 0.0) || !a.position.to_array().iter().all(|c| c.is_finite()))
    {
        return Err(RoverError::Validation(format!("unusable anchor range {bad:?}")));
    }

    // Work relative to the first anchor, which keeps the squares small.
    let local: Vec<AnchorRange> = anchors
        .iter()
        .map(|a| AnchorRange::new(a.position - origin.position, a.range))
        .collect();
    let r0 = origin.range * origin.range;
    let rows: Vec<(Vector, f64)> = local[1..]
        .iter()
        .map(|a| (a.position * 2.0, r0 - a.range * a.range + a.position.dot(a.position)))
        .collect();

    let fix = match solve_spatial(&rows) {
        Some(fix) => fix,
        None => solve_planar(&local, &rows)?,
    };
    Ok(fix + origin.position)
}

fn too_few(count: usize) -> RoverError {
    RoverError::Validation(format!("trilateration needs {MIN_ANCHORS} anchors, got {count}"))
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]) - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Full 3-D least squares, or `None` when the layout is too flat for it.
fn solve_spatial(rows: &[(Vector, f64)]) -> Option<Vector> {
    let mut m = [[0.0; 3]; 3];
    let mut v = [0.0; 3];
    for (normal, rhs) in rows {
        let n = normal.to_array();
        for (i, row) in m.iter_mut().enumerate() {
            v[i] += n[i] * rhs;
            for (j, cell) in row.iter_mut().enumerate() {
                *cell += n[i] * n[j];
            }
        }
    }
    let det = det3(&m);
    let scale = ((m[0][0] + m[1][1] + m[2][2]) / 3.0).powi(3);
    if scale <= 0.0 || det.abs() <= PLANAR * scale {
        return None;
    }
    // Cramer's rule.
    let component = |col: usize| {
        let mut c = m;
        for (row, value) in c.iter_mut().zip(v) {
            row[col] = value;
        }
        det3(&c) / det
    };
    Some(Vector::new(component(0), component(1), component(2)))
}

/// Horizontal least squares alternated with a height taken from the ranges.
fn solve_planar(anchors: &[AnchorRange], rows: &[(Vector, f64)]) -> Result<Vector, RoverError> {
    let (mut xx, mut xy, mut yy) = (0.0, 0.0, 0.0);
    for (n, _) in rows {
        xx += n.x * n.x;
        xy += n.x * n.y;
        yy += n.y * n.y;
    }
    let det = xx * yy - xy * xy;
    let scale = ((xx + yy) / 2.0).powi(2);
    if scale <= 0.0 || det.abs() <= SINGULAR * scale {
        return Err(RoverError::Validation("anchors are collinear".into()));
    }

    let mut fix = Vector::zero();
    for _ in 0..HEIGHT_PASSES {
        let (mut bx, mut by) = (0.0, 0.0);
        for (n, rhs) in rows {
            let rhs = rhs - n.z * fix.z;
            bx += n.x * rhs;
            by += n.y * rhs;
        }
        fix.x = (yy * bx - xy * by) / det;
        fix.y = (xx * by - xy * bx) / det;

        let heights: f64 = anchors
            .iter()
            .map(|a| {
                let dx = fix.x - a.position.x;
                let dy = fix.y - a.position.y;
                a.position.z - (a.range * a.range - dx * dx - dy * dy).max(0.0).sqrt()
            })
            .sum();
        fix.z = heights / anchors.len() as f64;
    }
    Ok(fix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(tag: Vector, anchors: &[Vector]) -> Vec<AnchorRange> {
        anchors
            .iter()
            .map(|&a| AnchorRange::new(a, (tag - a).magnitude()))
            .collect()
    }

    fn assert_near(actual: Vector, expected: Vector, tolerance: f64) {
        assert!(
            (actual - expected).magnitude() < tolerance,
            "{actual:?} is not within {tolerance} of {expected:?}"
        );
    }

    #[test]
    fn ceiling_anchors_fix_a_tag_below_them() {
        let tag = Vector::new(1000.0, 2000.0, 0.0);
        let anchors = [
            Vector::new(0.0, 0.0, 2000.0),
            Vector::new(5000.0, 0.0, 2000.0),
            Vector::new(0.0, 5000.0, 2000.0),
            Vector::new(5000.0, 5000.0, 2000.0),
        ];
        assert_near(trilaterate(&ranges(tag, &anchors)).unwrap(), tag, 1e-6);
    }

    #[test]
    fn three_anchors_at_different_heights() {
        let tag = Vector::new(1500.0, 1000.0, 300.0);
        let anchors = [
            Vector::new(0.0, 0.0, 2000.0),
            Vector::new(5000.0, 0.0, 2200.0),
            Vector::new(0.0, 5000.0, 2400.0),
        ];
        assert_near(trilaterate(&ranges(tag, &anchors)).unwrap(), tag, 1.0);
    }

    #[test]
    fn spatial_layout_is_solved_directly() {
        let tag = Vector::new(1000.0, 2000.0, 500.0);
        let anchors = [
            Vector::new(0.0, 0.0, 0.0),
            Vector::new(5000.0, 0.0, 0.0),
            Vector::new(0.0, 5000.0, 0.0),
            Vector::new(0.0, 0.0, 3000.0),
        ];
        assert_near(trilaterate(&ranges(tag, &anchors)).unwrap(), tag, 1e-6);
    }

    #[test]
    fn noisy_ranges_give_a_close_fix() {
        let tag = Vector::new(2500.0, 1500.0, 0.0);
        let anchors = [
            Vector::new(0.0, 0.0, 2000.0),
            Vector::new(5000.0, 0.0, 2000.0),
            Vector::new(0.0, 5000.0, 2000.0),
            Vector::new(5000.0, 5000.0, 2000.0),
        ];
        let mut noisy = ranges(tag, &anchors);
        for (a, noise) in noisy.iter_mut().zip([20.0, -15.0, 10.0, -5.0]) {
            a.range += noise;
        }
        let fix = trilaterate(&noisy).unwrap();
        assert!((fix.x - tag.x).abs() < 100.0 && (fix.y - tag.y).abs() < 100.0, "{fix:?}");
    }

    #[test]
    fn too_few_anchors_is_a_validation_error() {
        let anchors = ranges(Vector::zero(), &[Vector::new(1.0, 0.0, 0.0), Vector::new(0.0, 1.0, 0.0)]);
        assert!(matches!(trilaterate(&anchors), Err(RoverError::Validation(_))));
        assert!(matches!(trilaterate(&[]), Err(RoverError::Validation(_))));
    }

    #[test]
    fn collinear_anchors_are_rejected() {
        let anchors = ranges(
            Vector::new(500.0, 800.0, 0.0),
            &[
                Vector::new(0.0, 0.0, 0.0),
                Vector::new(1000.0, 0.0, 0.0),
                Vector::new(2000.0, 0.0, 0.0),
            ],
        );
        assert!(matches!(trilaterate(&anchors), Err(RoverError::Validation(_))));
    }

    #[test]
    fn non_finite_range_is_rejected() {
        let mut anchors = ranges(
            Vector::zero(),
            &[
                Vector::new(1000.0, 0.0, 0.0),
                Vector::new(0.0, 1000.0, 0.0),
                Vector::new(1000.0, 1000.0, 0.0),
            ],
        );
        anchors[1].range = f64::NAN;
        assert!(matches!(trilaterate(&anchors), Err(RoverError::Validation(_))));
    }
}
