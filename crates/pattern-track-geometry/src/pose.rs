//! Planar pose recovery: homography decomposition refined by Gauss–Newton.

use nalgebra::{Matrix3, Matrix4, Matrix6, Point2, Point3, Rotation3, Vector3, Vector6};
use pattern_track_core::{estimate_homography, CameraIntrinsics};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseError {
    #[error("not enough correspondences for pose (need {required}, got {got})")]
    NotEnoughPoints { required: usize, got: usize },
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("camera intrinsics are singular")]
    SingularIntrinsics,
}

/// Rigid transform from pattern coordinates into the camera frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rodrigues rotation vector (axis · angle).
    pub rvec: Vector3<f64>,
    /// Translation in pattern units.
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn from_rotation(rotation: &Rotation3<f64>, tvec: Vector3<f64>) -> Self {
        Self {
            rvec: rotation.scaled_axis(),
            tvec,
        }
    }

    #[inline]
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    /// 4×4 homogeneous matrix `[R | t]` acting on column vectors.
    pub fn model_matrix(&self) -> Matrix4<f64> {
        let r = self.rotation();
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(r.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.tvec);
        m
    }

    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * p + self.tvec
    }

    /// Project object points to pixels; `None` if any lands behind the camera.
    pub fn project(
        &self,
        object: &[Point3<f64>],
        camera: &CameraIntrinsics,
    ) -> Option<Vec<Point2<f64>>> {
        object
            .iter()
            .map(|p| camera.project(&self.transform(p)))
            .collect()
    }
}

/// Camera pose from 3D↔2D correspondences.
pub trait PoseSolver: Send {
    fn solve_pose(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraIntrinsics,
    ) -> Result<Pose, PoseError>;
}

impl<T: PoseSolver + ?Sized> PoseSolver for Box<T> {
    fn solve_pose(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraIntrinsics,
    ) -> Result<Pose, PoseError> {
        (**self).solve_pose(object, image, camera)
    }
}

/// Pose solver for points on the `z = 0` plane.
///
/// A plane-to-image homography in normalized camera coordinates gives the
/// initial `[r1 r2 t]`, which is then refined by damped Gauss–Newton on the
/// pixel reprojection error through the full distortion model.
#[derive(Clone, Debug)]
pub struct PlanarPoseSolver {
    pub max_iterations: usize,
}

impl Default for PlanarPoseSolver {
    fn default() -> Self {
        Self { max_iterations: 30 }
    }
}

const MIN_POINTS: usize = 4;
const PLANE_EPS: f64 = 1e-9;

/// Decompose `H ~ [r1 r2 t]` into a proper rotation and translation.
fn decompose_planar(h: &Matrix3<f64>) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let norm = h1.norm() + h2.norm();
    if norm <= f64::EPSILON {
        return None;
    }
    let mut lambda = 2.0 / norm;
    // the plane sits in front of the camera
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t = h3 * lambda;
    let r3 = r1.cross(&r2);

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    Some((Rotation3::from_matrix_unchecked(r), t))
}

fn residuals(
    rotation: &Rotation3<f64>,
    t: &Vector3<f64>,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &CameraIntrinsics,
) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(object.len() * 2);
    for (p, obs) in object.iter().zip(image) {
        let proj = camera.project(&(rotation * p + t))?;
        out.push(proj.x - obs.x);
        out.push(proj.y - obs.y);
    }
    Some(out)
}

fn cost(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Apply a 6-vector update: left-multiplied rotation increment, additive translation.
fn perturb(
    rotation: &Rotation3<f64>,
    t: &Vector3<f64>,
    delta: &Vector6<f64>,
) -> (Rotation3<f64>, Vector3<f64>) {
    let dr = Rotation3::new(Vector3::new(delta[0], delta[1], delta[2]));
    (dr * rotation, t + Vector3::new(delta[3], delta[4], delta[5]))
}

impl PlanarPoseSolver {
    fn refine(
        &self,
        mut rotation: Rotation3<f64>,
        mut t: Vector3<f64>,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraIntrinsics,
    ) -> (Rotation3<f64>, Vector3<f64>) {
        const STEP: f64 = 1e-7;
        let Some(mut r) = residuals(&rotation, &t, object, image, camera) else {
            return (rotation, t);
        };
        let mut current = cost(&r);
        let mut damping = 1e-6;

        for _ in 0..self.max_iterations {
            if current < 1e-18 {
                break;
            }
            // forward-difference Jacobian, one column per parameter
            let mut jtj = Matrix6::<f64>::zeros();
            let mut jtr = Vector6::<f64>::zeros();
            let mut columns: Vec<Vec<f64>> = Vec::with_capacity(6);
            for k in 0..6 {
                let mut d = Vector6::zeros();
                d[k] = STEP;
                let (rk, tk) = perturb(&rotation, &t, &d);
                let Some(rp) = residuals(&rk, &tk, object, image, camera) else {
                    return (rotation, t);
                };
                columns.push(rp.iter().zip(&r).map(|(a, b)| (a - b) / STEP).collect());
            }
            for a in 0..6 {
                jtr[a] = columns[a].iter().zip(&r).map(|(j, e)| j * e).sum();
                for b in a..6 {
                    let v: f64 = columns[a].iter().zip(&columns[b]).map(|(x, y)| x * y).sum();
                    jtj[(a, b)] = v;
                    jtj[(b, a)] = v;
                }
            }

            let mut improved = false;
            while damping < 1e6 {
                let mut lhs = jtj;
                for i in 0..6 {
                    lhs[(i, i)] += damping * jtj[(i, i)].max(1e-12);
                }
                let Some(delta) = lhs.cholesky().map(|c| c.solve(&(-jtr))) else {
                    damping *= 10.0;
                    continue;
                };
                let (rn, tn) = perturb(&rotation, &t, &delta);
                match residuals(&rn, &tn, object, image, camera) {
                    Some(rr) if cost(&rr) < current => {
                        rotation = rn;
                        t = tn;
                        current = cost(&rr);
                        r = rr;
                        damping = (damping * 0.1).max(1e-12);
                        improved = delta.norm() > 1e-12;
                        break;
                    }
                    _ => damping *= 10.0,
                }
            }
            if !improved {
                break;
            }
        }
        (rotation, t)
    }
}

impl PoseSolver for PlanarPoseSolver {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, object, image, camera), fields(points = object.len()))
    )]
    fn solve_pose(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraIntrinsics,
    ) -> Result<Pose, PoseError> {
        let n = object.len().min(image.len());
        if object.len() != image.len() || n < MIN_POINTS {
            return Err(PoseError::NotEnoughPoints {
                required: MIN_POINTS,
                got: n,
            });
        }
        if !camera.is_valid() {
            return Err(PoseError::SingularIntrinsics);
        }
        if object.iter().any(|p| p.z.abs() > PLANE_EPS) {
            return Err(PoseError::Degenerate);
        }

        let plane: Vec<Point2<f32>> = object
            .iter()
            .map(|p| Point2::new(p.x as f32, p.y as f32))
            .collect();
        let normalized: Vec<Point2<f32>> = image
            .iter()
            .map(|px| {
                let n = camera.normalize(*px);
                Point2::new(n.x as f32, n.y as f32)
            })
            .collect();

        let h = estimate_homography(&plane, &normalized).ok_or(PoseError::Degenerate)?;
        let (rotation, t) = decompose_planar(&h.h).ok_or(PoseError::Degenerate)?;
        let (rotation, t) = self.refine(rotation, t, object, image, camera);

        if !t.iter().all(|v| v.is_finite()) || t.z <= 0.0 {
            return Err(PoseError::Degenerate);
        }
        Ok(Pose::from_rotation(&rotation, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pattern_track_core::Distortion;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::new(800.0, 810.0, 320.0, 240.0)
            .with_distortion(Distortion::from_coeffs([-0.12, 0.03, 0.001, -0.0008, 0.0]))
    }

    fn square() -> Vec<Point3<f64>> {
        vec![
            Point3::new(-1.0, -0.75, 0.0),
            Point3::new(1.0, -0.75, 0.0),
            Point3::new(1.0, 0.75, 0.0),
            Point3::new(-1.0, 0.75, 0.0),
        ]
    }

    #[test]
    fn recovers_pose_from_four_corners() {
        let cam = camera();
        let truth = Pose {
            rvec: Vector3::new(0.25, -0.3, 0.1),
            tvec: Vector3::new(0.2, -0.1, 4.0),
        };
        let obj = square();
        let img = truth.project(&obj, &cam).expect("visible");

        let pose = PlanarPoseSolver::default()
            .solve_pose(&obj, &img, &cam)
            .expect("pose");
        assert_relative_eq!(pose.rvec, truth.rvec, epsilon = 1e-6);
        assert_relative_eq!(pose.tvec, truth.tvec, epsilon = 1e-6);
    }

    #[test]
    fn model_matrix_maps_origin_to_translation() {
        let pose = Pose {
            rvec: Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            tvec: Vector3::new(1.0, 2.0, 3.0),
        };
        let m = pose.model_matrix();
        let o = m * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(o.xyz(), pose.tvec, epsilon = 1e-12);
        let x = m * nalgebra::Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(x.xyz(), Vector3::new(1.0, 3.0, 3.0), epsilon = 1e-12);
        assert_relative_eq!(m[(3, 3)], 1.0);
    }

    #[test]
    fn decomposition_is_orthonormal_for_noisy_input() {
        let rot = Rotation3::new(Vector3::new(0.1, 0.2, -0.3));
        let t = Vector3::new(0.1, 0.2, 5.0);
        let r = rot.matrix();
        let mut h = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
        h[(0, 1)] += 0.01;
        let h = h * -3.0;
        let (rr, tt) = decompose_planar(&h).expect("decomposition");
        let m = rr.matrix();
        assert_relative_eq!(m.transpose() * m, Matrix3::identity(), epsilon = 1e-9);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-9);
        assert!(tt.z > 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        let cam = camera();
        let solver = PlanarPoseSolver::default();
        let obj = square();
        let img = vec![Point2::new(0.0, 0.0); 3];
        assert_eq!(
            solver.solve_pose(&obj[..3], &img, &cam),
            Err(PoseError::NotEnoughPoints { required: 4, got: 3 })
        );

        let img4 = vec![
            Point2::new(100.0, 100.0),
            Point2::new(200.0, 100.0),
            Point2::new(200.0, 180.0),
            Point2::new(100.0, 180.0),
        ];
        let singular = CameraIntrinsics::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(
            solver.solve_pose(&obj, &img4, &singular),
            Err(PoseError::SingularIntrinsics)
        );

        let mut lifted = obj.clone();
        lifted[2].z = 0.5;
        assert_eq!(
            solver.solve_pose(&lifted, &img4, &cam),
            Err(PoseError::Degenerate)
        );
    }
}
