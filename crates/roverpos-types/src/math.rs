//! Small fixed-arity math primitives.
//!
//! [`Vector`] carries accelerations, velocities, positions and raw UWB
//! coordinates; [`Quaternion`] carries vehicle attitude (w, x, y, z
//! convention, Hamilton product).

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vector
// ────────────────────────────────────────────────────────────────────────────

/// A 3-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// `(1, 1, 1)`; the neutral element of [`Vector::scale`].
    pub fn one() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    /// Elementwise product.
    pub fn scale(self, factors: Self) -> Self {
        Self::new(self.x * factors.x, self.y * factors.y, self.z * factors.z)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn magnitude(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Vector {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Add for Vector {
    type Output = Vector;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector {
    type Output = Vector;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;
    fn mul(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tait-Bryan angles
// ────────────────────────────────────────────────────────────────────────────

/// Roll/pitch/yaw decomposition (radians, intrinsic Z-Y'-X'' order).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TaitBryan {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A quaternion representing a 3-D rotation (w, x, y, z convention).
///
/// Normally unit norm, but nothing here enforces it; estimation algorithms
/// call [`Quaternion::normalised`] when they need to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build a rotation from roll, pitch and yaw (radians).
    pub fn from_tait_bryan(angles: TaitBryan) -> Self {
        let (sr, cr) = (angles.roll * 0.5).sin_cos();
        let (sp, cp) = (angles.pitch * 0.5).sin_cos();
        let (sy, cy) = (angles.yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Rotation of `|v|` radians about the axis `v / |v|`.
    pub fn from_rotation_vector(v: Vector) -> Self {
        let angle = v.magnitude();
        if angle < 1e-12 {
            // Small-angle limit: sin(a/2)/a → 1/2.
            return Self::new(1.0, v.x * 0.5, v.y * 0.5, v.z * 0.5).normalised();
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let k = s / angle;
        Self::new(c, v.x * k, v.y * k, v.z * k)
    }

    /// Decompose into roll/pitch/yaw (radians).
    ///
    /// Pitch is clamped to ±π/2 at gimbal lock.
    pub fn to_tait_bryan(self) -> TaitBryan {
        let roll = (2.0 * (self.w * self.x + self.y * self.z))
            .atan2(1.0 - 2.0 * (self.x * self.x + self.y * self.y));
        let sin_pitch = (2.0 * (self.w * self.y - self.z * self.x)).clamp(-1.0, 1.0);
        let pitch = sin_pitch.asin();
        let yaw = (2.0 * (self.w * self.z + self.x * self.y))
            .atan2(1.0 - 2.0 * (self.y * self.y + self.z * self.z));
        TaitBryan { roll, pitch, yaw }
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Unit-norm copy. A zero quaternion normalises to the identity.
    pub fn normalised(self) -> Self {
        let n = self.norm();
        if n < f64::EPSILON {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vector) -> Vector {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self * p * self.conjugate();
        Vector::new(rotated.x, rotated.y, rotated.z)
    }

    /// Normalised linear interpolation toward `target`; `t = 0` keeps `self`.
    ///
    /// Takes the short way round when the two rotations lie in opposite
    /// hemispheres.
    pub fn nlerp(self, target: Self, t: f64) -> Self {
        let target = if self.dot(target) < 0.0 {
            Self::new(-target.w, -target.x, -target.y, -target.z)
        } else {
            target
        };
        let s = 1.0 - t;
        Self::new(
            s * self.w + t * target.w,
            s * self.x + t * target.x,
            s * self.y + t * target.y,
            s * self.z + t * target.z,
        )
        .normalised()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    /// Hamilton product: compose two rotations.
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }
}
