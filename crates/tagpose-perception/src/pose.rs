//! Pose-from-homography for square fiducial markers.
//!
//! The four observed corners are treated as the projection of a square of
//! edge `size`, centred on the marker origin and lying in the marker's z = 0
//! plane.  Corner `i` corresponds to the canonical corner `CANONICAL[i]`:
//!
//! ```text
//!   3 (-1, 1) ─── 2 (1, 1)
//!       │             │
//!   0 (-1,-1) ─── 1 (1,-1)
//! ```
//!
//! [`resolve`] estimates the homography `H` mapping canonical corners to
//! pixels, strips the intrinsics (`M = K⁻¹H`), reads the marker axes off the
//! first two columns and the translation off the third, then projects the
//! axes onto SO(3).
//!
//! This is a pure function: no caching, no state between calls.

use nalgebra::{
    Isometry3, Matrix3, Point2, Rotation3, SMatrix, SVector, Translation3, UnitQuaternion,
    Vector3 as NaVector3,
};
use tagpose_types::{CameraIntrinsics, Pose, TagError};

use crate::transform::isometry_to_pose;

/// Smallest enclosed quad area accepted, in square pixels.
pub const MIN_QUAD_AREA_PX2: f64 = 1.0;

/// Minimum |sin| of the interior angle at every corner.
const MIN_CORNER_SINE: f64 = 1e-6;

const CANONICAL: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// Compute the pose of a square marker relative to the camera.
///
/// The returned translation is in the units of `size`; the orientation is a
/// unit quaternion rotating marker-frame vectors into the camera frame.
///
/// # Errors
///
/// * [`TagError::InvalidIntrinsics`] when `intrinsics` are non-finite or have
///   a zero focal length.
/// * [`TagError::DegenerateGeometry`] when `size` is not positive, when the
///   corners are non-finite, collinear, self-intersecting or enclose less
///   than [`MIN_QUAD_AREA_PX2`], or when the decomposition does not yield a
///   finite pose in front of the camera.
pub fn resolve(
    corners: &[[f64; 2]; 4],
    size: f64,
    intrinsics: &CameraIntrinsics,
) -> Result<Pose, TagError> {
    if !(size.is_finite() && size > 0.0) {
        return Err(degenerate(format!("marker size must be positive, got {size}")));
    }
    if !intrinsics.is_valid() {
        return Err(TagError::InvalidIntrinsics(format!(
            "fx={} fy={} px={} py={}",
            intrinsics.fx, intrinsics.fy, intrinsics.px, intrinsics.py
        )));
    }
    check_quad(corners)?;

    let h = homography_from_4pt(&CANONICAL, corners)
        .ok_or_else(|| degenerate("homography estimation failed"))?;
    decompose(&h, size, intrinsics)
}

/// Pose computation seam used by the frame assembler.
pub trait PoseResolver: Send + Sync {
    fn resolve(
        &self,
        corners: &[[f64; 2]; 4],
        size: f64,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Pose, TagError>;
}

/// [`PoseResolver`] backed by [`resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HomographyResolver;

impl PoseResolver for HomographyResolver {
    fn resolve(
        &self,
        corners: &[[f64; 2]; 4],
        size: f64,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Pose, TagError> {
        resolve(corners, size, intrinsics)
    }
}

fn degenerate(reason: impl Into<String>) -> TagError {
    TagError::DegenerateGeometry(reason.into())
}

// ────────────────────────────────────────────────────────────────────────────
// Quad sanity
// ────────────────────────────────────────────────────────────────────────────

fn signed_area(c: &[[f64; 2]; 4]) -> f64 {
    let mut acc = 0.0;
    for i in 0..4 {
        let a = c[i];
        let b = c[(i + 1) % 4];
        acc += a[0] * b[1] - b[0] * a[1];
    }
    0.5 * acc
}

fn check_quad(c: &[[f64; 2]; 4]) -> Result<(), TagError> {
    if c.iter().flatten().any(|v| !v.is_finite()) {
        return Err(degenerate("non-finite corner coordinates"));
    }

    let area = signed_area(c);
    if area.abs() < MIN_QUAD_AREA_PX2 {
        return Err(degenerate(format!(
            "quad encloses {:.3e} px², below the {MIN_QUAD_AREA_PX2} px² minimum",
            area.abs()
        )));
    }

    // Every turn must have the same sense as the overall winding.
    let winding = area.signum();
    for i in 0..4 {
        let a = c[i];
        let b = c[(i + 1) % 4];
        let d = c[(i + 2) % 4];
        let e1 = [b[0] - a[0], b[1] - a[1]];
        let e2 = [d[0] - b[0], d[1] - b[1]];
        let cross = e1[0] * e2[1] - e1[1] * e2[0];
        let scale = e1[0].hypot(e1[1]) * e2[0].hypot(e2[1]);
        if cross * winding <= MIN_CORNER_SINE * scale {
            return Err(degenerate(format!(
                "quad is not strictly convex at corner {}",
                (i + 1) % 4
            )));
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Homography
// ────────────────────────────────────────────────────────────────────────────

/// Hartley normalisation: centroid to the origin, mean distance √2.
fn normalize_points4(pts: &[[f64; 2]; 4]) -> ([Point2<f64>; 4], Matrix3<f64>) {
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts.map(|p| Point2::new(s * (p[0] - cx), s * (p[1] - cy)));
    (out, t)
}

/// Compute `H` such that `dst ~ H * src` from four correspondences, with
/// `H[(2, 2)] = 1`.
pub(crate) fn homography_from_4pt(
    src: &[[f64; 2]; 4],
    dst: &[[f64; 2]; 4],
) -> Option<Matrix3<f64>> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], h33 = 1.
    //   h11 x + h12 y + h13 - u h31 x - u h32 y = u
    //   h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = normalize_points4(src);
    let (dst_n, t_dst) = normalize_points4(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h = t_dst.try_inverse()? * hn * t_src;
    let s = h[(2, 2)];
    if !s.is_finite() || s.abs() < 1e-12 {
        return None;
    }
    let h = h / s;
    if h.iter().all(|v| v.is_finite()) && h.determinant().abs() > 1e-12 {
        Some(h)
    } else {
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decomposition
// ────────────────────────────────────────────────────────────────────────────

fn decompose(h: &Matrix3<f64>, size: f64, k: &CameraIntrinsics) -> Result<Pose, TagError> {
    let k_inv = Matrix3::new(
        1.0 / k.fx,
        0.0,
        -k.px / k.fx,
        0.0,
        1.0 / k.fy,
        -k.py / k.fy,
        0.0,
        0.0,
        1.0,
    );
    let m = k_inv * h;
    let m0: NaVector3<f64> = m.column(0).into_owned();
    let m1: NaVector3<f64> = m.column(1).into_owned();
    let m2: NaVector3<f64> = m.column(2).into_owned();

    // Canonical corners sit at ±1, i.e. half an edge from the centre.
    let scale = 0.5 * (m0.norm() + m1.norm());
    if !(scale.is_finite() && scale > f64::EPSILON) {
        return Err(degenerate("homography has vanishing marker axes"));
    }
    let mut r1 = m0 / scale;
    let mut r2 = m1 / scale;
    let mut t = m2 * (0.5 * size / scale);

    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    if !(t.z > 0.0) || !t.iter().all(|v| v.is_finite()) {
        return Err(degenerate("marker does not lie in front of the camera"));
    }

    let r3 = r1.cross(&r2);
    let rotation = project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]))
        .ok_or_else(|| degenerate("rotation orthogonalisation failed"))?;
    let q = UnitQuaternion::from_rotation_matrix(&rotation);
    if !q.coords.iter().all(|v| v.is_finite()) {
        return Err(degenerate("rotation is not finite"));
    }

    Ok(isometry_to_pose(&Isometry3::from_parts(
        Translation3::from(t),
        q,
    )))
}

/// Nearest rotation in the Frobenius sense: `R = U Vᵀ`, with the last
/// singular direction flipped if that would be a reflection.
fn project_to_so3(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let flip = Matrix3::from_diagonal(&NaVector3::new(1.0, 1.0, -1.0));
        r = u * flip * v_t;
    }
    if r.iter().all(|v| v.is_finite()) {
        Some(Rotation3::from_matrix_unchecked(r))
    } else {
        None
    }
}
