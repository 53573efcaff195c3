//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Clamps the vector to at most unit length.
    pub fn clamp_unit(self) -> Self {
        let len_sq = self.len_sq();
        if len_sq > 1.0 {
            self.scale(1.0 / len_sq.sqrt())
        } else {
            self
        }
    }
}

/// Scalar lerp. `t` is not clamped so callers can extrapolate.
pub fn lerp_f64(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Rotation quaternion. Field values arrive off the wire as `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    fn scale(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z, self.w + rhs.w)
    }

    /// Unit-length copy. Degenerate input collapses to identity.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= f64::EPSILON || !len.is_finite() {
            Self::IDENTITY
        } else {
            self.scale(1.0 / len)
        }
    }

    /// Shortest-path spherical interpolation.
    ///
    /// `t` outside `[0, 1]` continues the rotation, which is what
    /// extrapolation wants. The result is always normalized.
    pub fn slerp(self, to: Self, t: f64) -> Self {
        let from = self.normalize();
        let mut to = to.normalize();
        let mut cos = from.dot(to);
        // q and -q are the same rotation; take the short arc.
        if cos < 0.0 {
            to = to.scale(-1.0);
            cos = -cos;
        }
        if cos > 0.9995 {
            return from.scale(1.0 - t).add(to.scale(t)).normalize();
        }
        let theta = cos.clamp(-1.0, 1.0).acos();
        let sin = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin;
        let b = (t * theta).sin() / sin;
        from.scale(a).add(to.scale(b)).normalize()
    }
}
