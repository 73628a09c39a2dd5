//! Pinhole intrinsics with radial–tangential (Brown–Conrady) distortion.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Distortion coefficients in the usual `(k1, k2, p1, p2, k3)` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    #[serde(default)]
    pub k3: f64,
}

impl Distortion {
    pub fn from_coeffs(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn coeffs(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.coeffs().iter().all(|c| *c == 0.0)
    }

    /// Distort a point given in normalized image coordinates.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`distort`](Self::distort) by fixed-point iteration.
    pub fn undistort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return p;
        }
        let (mut x, mut y) = (p.x, p.y);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (p.x - dx) / radial;
            y = (p.y - dy) / radial;
        }
        Point2::new(x, y)
    }
}

const UNDISTORT_ITERS: usize = 20;

/// Camera calibration supplied by the caller; immutable once handed to a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: Distortion::default(),
        }
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    /// Build from a 3×3 camera matrix (skew ignored) and distortion coefficients.
    pub fn from_matrix(k: &Matrix3<f64>, distortion: Distortion) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            distortion,
        }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.fx.is_finite() && self.fy.is_finite() && self.fx.abs() > 1e-12 && self.fy.abs() > 1e-12
    }

    /// Pixel → undistorted normalized coordinates.
    pub fn normalize(&self, px: Point2<f64>) -> Point2<f64> {
        let xd = Point2::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy);
        self.distortion.undistort(xd)
    }

    /// Camera-frame point → distorted pixel; `None` behind the camera.
    pub fn project(&self, pc: &Point3<f64>) -> Option<Point2<f64>> {
        if pc.z <= 1e-12 {
            return None;
        }
        let d = self
            .distortion
            .distort(Point2::new(pc.x / pc.z, pc.y / pc.z));
        Some(Point2::new(
            self.fx * d.x + self.cx,
            self.fy * d.y + self.cy,
        ))
    }
}
