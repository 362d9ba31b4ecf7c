use opencv::core::{self, Vec3b};
use opencv::{imgproc, prelude::*};

extern crate nalgebra as na;

use crate::camera::CameraIntrinsics;
use crate::config::CylinderTuning;
use crate::error::InvalidBboxError;
use crate::vision::pose::PoseSnapshot;
use crate::vision::projector::{Projector, RAY_EPS};

/// A standing cylinder recovered from a 2D bounding box, expressed on the
/// z=0 work plane of the marker frame.
#[derive(Debug, Clone)]
pub struct CylinderEstimate {
    /// Center of the cylinder's base, marker frame, z = 0.
    pub center_marker: na::Point3<f64>,
    pub radius_mm: f64,
    pub height_mm: f64,
    /// Reprojected base center, absolute pixels.
    pub contact_px: (f64, f64),
    /// Base center in 0-1000 normalized image coordinates (u, v).
    pub contact_norm: (i32, i32),
    /// Reprojected top-face center, absolute pixels.
    pub top_px: (f64, f64),
    /// Top-face center in 0-1000 normalized image coordinates (u, v).
    pub top_norm: (i32, i32),
    /// Base radius in 0-1000 normalized pixels (u, v); the v component is
    /// foreshortened by |R[2,2]|.
    pub radius_norm: (i32, i32),
}

/// Back-projects a vertical cylinder resting on the work plane from its
/// axis-aligned image bounding box. Works for wide-angle cameras at arbitrary
/// orientations: the cylinder axis may project to any direction in the image.
pub struct CylinderEstimator {
    tuning: CylinderTuning,
}

impl CylinderEstimator {
    pub fn new(tuning: CylinderTuning) -> Self {
        Self { tuning }
    }

    /// Estimate the cylinder whose bounding box is `bbox_norm`
    /// (`[ymin, xmin, ymax, xmax]` in thousandths of the image dimensions).
    pub fn estimate(
        &self,
        intrinsics: &CameraIntrinsics,
        pose: &PoseSnapshot,
        bbox_norm: [f64; 4],
    ) -> Result<CylinderEstimate, Box<dyn std::error::Error>> {
        let (image_w, image_h) = intrinsics.resolution();
        let (image_w, image_h) = (image_w as f64, image_h as f64);
        let x1 = bbox_norm[1] / 1000.0 * image_w;
        let y1 = bbox_norm[0] / 1000.0 * image_h;
        let x2 = bbox_norm[3] / 1000.0 * image_w;
        let y2 = bbox_norm[2] / 1000.0 * image_h;
        if !(x2 > x1 && y2 > y1) || !x1.is_finite() || !y1.is_finite() {
            return Err(InvalidBboxError::new(bbox_norm).into());
        }
        let center = ((x1 + x2) * 0.5, (y1 + y2) * 0.5);

        let projector = Projector::new(intrinsics, pose);

        // image direction of the world's vertical axis at the bbox center
        let d_up = self.image_up_direction(intrinsics, pose, &projector, center);
        let d_down = (-d_up.0, -d_up.1);

        // ground-contact and top pixels on the bbox boundary
        let contact = march_to_edge(center, d_down, (x1, y1, x2, y2))
            .ok_or_else(|| InvalidBboxError::new(bbox_norm))?;
        let top = march_to_edge(center, d_up, (x1, y1, x2, y2))
            .ok_or_else(|| InvalidBboxError::new(bbox_norm))?;

        // pixel diameter, blended between the analytic solution (exact for
        // axis-aligned projections) and a shrink heuristic (stable near 45°)
        let c_abs = d_up.0.abs();
        let s_abs = d_up.1.abs();
        let width = x2 - x1;
        let height = y2 - y1;
        let min_side = width.min(height);
        let d_heur = min_side * (1.0 - self.tuning.heuristic_coeff * 2.0 * c_abs * s_abs);
        let denom = c_abs * c_abs - s_abs * s_abs;
        let d_poly = if denom.abs() > RAY_EPS {
            ((height * c_abs - width * s_abs).abs() / denom.abs()).min(min_side)
        } else {
            d_heur
        };
        let weight = denom * denom;
        let diameter = weight * d_poly + (1.0 - weight) * d_heur;

        // the contact pixel sees the near edge of the base; convert the pixel
        // diameter to metric through the slant distance and shift inward
        let p_edge = projector.pixel_to_plane(contact.0, contact.1, 0.0)?;
        let to_edge = p_edge - pose.camera_pos;
        let d_cam = to_edge.norm();
        let nx = (contact.0 - intrinsics.cx()) / intrinsics.fx();
        let ny = (contact.1 - intrinsics.cy()) / intrinsics.fy();
        let cos_alpha = 1.0 / (1.0 + nx * nx + ny * ny).sqrt();
        let radius =
            diameter / (2.0 * intrinsics.fx()) * d_cam * cos_alpha * self.tuning.radius_factor;
        let ground = na::Vector3::new(to_edge.x, to_edge.y, 0.0);
        let center_marker = if ground.norm() > 1e-9 {
            p_edge + radius * ground.normalize()
        } else {
            p_edge
        };

        // height: closest approach between the top-pixel ray and the vertical
        // axis through the base center, then compensate for the bbox top
        // being the far edge of the top face
        let ray_top = (pose.rotation.transpose() * projector.pixel_ray(top.0, top.1)).normalize();
        let cos_phi = ray_top.z;
        let sin_sq = 1.0 - cos_phi * cos_phi;
        let mut height_mm = 0.0;
        if sin_sq > 1e-9 {
            let base_to_cam = pose.camera_pos - center_marker;
            height_mm = (base_to_cam.z - base_to_cam.dot(&ray_top) * cos_phi) / sin_sq;
            let sin_phi = sin_sq.sqrt();
            if sin_phi > 0.1 {
                height_mm += radius * cos_phi / sin_phi;
            }
        }

        let contact_px = projector.marker_to_pixel(&center_marker)?;
        let top_point = center_marker + na::Vector3::new(0.0, 0.0, height_mm.max(0.0));
        let top_px = projector.marker_to_pixel(&top_point)?;
        let foreshorten = pose.rotation.matrix()[(2, 2)].abs();
        let radius_px = diameter * 0.5;

        Ok(CylinderEstimate {
            center_marker,
            radius_mm: radius,
            height_mm,
            contact_px,
            contact_norm: normalize_px(contact_px, image_w, image_h),
            top_px,
            top_norm: normalize_px(top_px, image_w, image_h),
            radius_norm: (
                (radius_px / image_w * 1000.0).round() as i32,
                (radius_px / image_h * 1000.0 * foreshorten).round() as i32,
            ),
        })
    }

    /// Image direction of "up" at the given pixel: project the pixel's ray
    /// and the same ray nudged along the world z axis, and take the pixel
    /// difference. Falls back to straight image-up when the nudged point lands
    /// behind the camera or the projection collapses.
    fn image_up_direction(
        &self,
        intrinsics: &CameraIntrinsics,
        pose: &PoseSnapshot,
        projector: &Projector<'_>,
        at: (f64, f64),
    ) -> (f64, f64) {
        const DEFAULT_UP: (f64, f64) = (0.0, -1.0);
        let pc = projector.pixel_ray(at.0, at.1);
        let az = pose.rotation * na::Vector3::z();
        let nudged = pc + 0.1 * az;
        let (p0, p1) = match (
            project_camera_point(intrinsics, &pc),
            project_camera_point(intrinsics, &nudged),
        ) {
            (Some(p0), Some(p1)) => (p0, p1),
            _ => return DEFAULT_UP,
        };
        let diff = (p1.0 - p0.0, p1.1 - p0.1);
        let norm = (diff.0 * diff.0 + diff.1 * diff.1).sqrt();
        if norm > 1e-9 {
            (diff.0 / norm, diff.1 / norm)
        } else {
            DEFAULT_UP
        }
    }
}

fn project_camera_point(intrinsics: &CameraIntrinsics, p: &na::Vector3<f64>) -> Option<(f64, f64)> {
    if p.z <= RAY_EPS {
        return None;
    }
    Some((
        intrinsics.fx() * p.x / p.z + intrinsics.cx(),
        intrinsics.fy() * p.y / p.z + intrinsics.cy(),
    ))
}

fn normalize_px(p: (f64, f64), image_w: f64, image_h: f64) -> (i32, i32) {
    (
        (p.0 / image_w * 1000.0).round() as i32,
        (p.1 / image_h * 1000.0).round() as i32,
    )
}

/// From `start` (inside the box), march along `dir` and return the first
/// intersection with the box boundary. `None` when no positive step reaches
/// an edge, which only happens for malformed boxes.
fn march_to_edge(
    start: (f64, f64),
    dir: (f64, f64),
    bbox: (f64, f64, f64, f64),
) -> Option<(f64, f64)> {
    let (x1, y1, x2, y2) = bbox;
    let tx = if dir.0 > RAY_EPS {
        (x2 - start.0) / dir.0
    } else if dir.0 < -RAY_EPS {
        (x1 - start.0) / dir.0
    } else {
        f64::INFINITY
    };
    let ty = if dir.1 > RAY_EPS {
        (y2 - start.1) / dir.1
    } else if dir.1 < -RAY_EPS {
        (y1 - start.1) / dir.1
    } else {
        f64::INFINITY
    };
    let t = tx.min(ty);
    if !t.is_finite() || t < 0.0 {
        return None;
    }
    Some((start.0 + t * dir.0, start.1 + t * dir.1))
}

/// A color read off the cylinder, as a representative HSV triple plus a coarse
/// palette name.
#[derive(Debug, Clone)]
pub struct ColorSample {
    pub hsv: (u8, u8, u8),
    pub name: &'static str,
}

/// Sample the cylinder's color along its image-space axis, from the ground
/// contact point to the top. Shadowed and blown-out samples are rejected
/// before a majority vote over palette buckets; if every sample is rejected
/// the vote falls back to the full set so achromatic objects keep a name.
pub fn sample_axis_color(
    frame: &Mat,
    from_px: (f64, f64),
    to_px: (f64, f64),
) -> opencv::Result<Option<ColorSample>> {
    const SAMPLES: usize = 5;
    let mut points = Vec::with_capacity(SAMPLES);
    for i in 0..SAMPLES {
        let t = i as f64 / (SAMPLES - 1) as f64;
        points.push((
            from_px.0 + t * (to_px.0 - from_px.0),
            from_px.1 + t * (to_px.1 - from_px.1),
        ));
    }
    vote_color(frame, &points)
}

/// Single-point fallback used when 3D estimation failed and no axis exists.
pub fn sample_point_color(frame: &Mat, at: (f64, f64)) -> opencv::Result<Option<ColorSample>> {
    vote_color(frame, &[at])
}

fn vote_color(frame: &Mat, points: &[(f64, f64)]) -> opencv::Result<Option<ColorSample>> {
    let size = frame.size()?;
    if size.width == 0 || size.height == 0 {
        return Ok(None);
    }
    let mut bgr = Vec::with_capacity(points.len());
    for &(u, v) in points {
        let col = (u.round() as i32).clamp(0, size.width - 1);
        let row = (v.round() as i32).clamp(0, size.height - 1);
        bgr.push(*frame.at_2d::<Vec3b>(row, col)?);
    }
    let bgr_mat = Mat::from_slice(&bgr)?;
    let mut hsv_mat = Mat::default();
    imgproc::cvt_color(
        &bgr_mat,
        &mut hsv_mat,
        imgproc::COLOR_BGR2HSV,
        0,
        core::AlgorithmHint::ALGO_HINT_ACCURATE,
    )?;
    let mut samples = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        let hsv = *hsv_mat.at_2d::<Vec3b>(0, i as i32)?;
        samples.push((hsv[0], hsv[1], hsv[2]));
    }

    // v < 30 is shadow, s < 20 is highlight glare
    let lit: Vec<_> = samples
        .iter()
        .copied()
        .filter(|&(_, s, v)| v >= 30 && s >= 20)
        .collect();
    let voters = if lit.is_empty() { samples } else { lit };

    let mut counts: Vec<(&'static str, usize, (u8, u8, u8))> = Vec::new();
    for &hsv in &voters {
        let name = classify_hsv(hsv);
        match counts.iter_mut().find(|(n, _, _)| *n == name) {
            Some((_, count, _)) => *count += 1,
            None => counts.push((name, 1, hsv)),
        }
    }
    Ok(counts
        .into_iter()
        .max_by_key(|&(_, count, _)| count)
        .map(|(name, _, hsv)| ColorSample { hsv, name }))
}

/// Coarse palette bucket for an OpenCV HSV triple (hue in 0..180).
fn classify_hsv((h, s, v): (u8, u8, u8)) -> &'static str {
    if v < 46 {
        return "black";
    }
    if s < 43 {
        return if v > 200 { "white" } else { "gray" };
    }
    match h {
        0..=10 => "red",
        11..=25 => "orange",
        26..=34 => "yellow",
        35..=77 => "green",
        78..=99 => "cyan",
        100..=130 => "blue",
        131..=145 => "purple",
        146..=169 => "magenta",
        _ => "red",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_intrinsics(resolution: (u32, u32), f: f64) -> CameraIntrinsics {
        let (w, h) = (resolution.0 as f64, resolution.1 as f64);
        let k = na::Matrix3::new(f, 0.0, w * 0.5, 0.0, f, h * 0.5, 0.0, 0.0, 1.0);
        CameraIntrinsics::from_parts(k, [0.0; 5], resolution).unwrap()
    }

    /// Bounding box of a synthetic cylinder, computed by densely projecting
    /// its base and top circles, returned in 0-1000 normalized form.
    fn cylinder_bbox(
        intrinsics: &CameraIntrinsics,
        pose: &PoseSnapshot,
        center: (f64, f64),
        radius: f64,
        height: f64,
    ) -> [f64; 4] {
        let projector = Projector::new(intrinsics, pose);
        let (w, h) = intrinsics.resolution();
        let (w, h) = (w as f64, h as f64);
        let mut min = (f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for i in 0..360 {
            let angle = (i as f64).to_radians();
            for z in [0.0, height] {
                let p = na::Point3::new(
                    center.0 + radius * angle.cos(),
                    center.1 + radius * angle.sin(),
                    z,
                );
                let (u, v) = projector.marker_to_pixel(&p).unwrap();
                min = (min.0.min(u), min.1.min(v));
                max = (max.0.max(u), max.1.max(v));
            }
        }
        [
            min.1 / h * 1000.0,
            min.0 / w * 1000.0,
            max.1 / h * 1000.0,
            max.0 / w * 1000.0,
        ]
    }

    #[test]
    fn test_axis_aligned_down_view() {
        let intrinsics = synthetic_intrinsics((1280, 720), 1000.0);
        // camera 500 mm above (60, 40), looking straight down
        let rvec = na::Vector3::new(std::f64::consts::PI, 0.0, 0.0);
        let pose = PoseSnapshot::from_rvec_tvec(
            rvec,
            -(na::Rotation3::from_scaled_axis(rvec) * na::Vector3::new(60.0, 40.0, 500.0)),
        );
        let bbox = cylinder_bbox(&intrinsics, &pose, (60.0, 130.0), 20.0, 40.0);

        let estimator = CylinderEstimator::new(CylinderTuning::default());
        let estimate = estimator.estimate(&intrinsics, &pose, bbox).unwrap();

        assert!(
            estimate.radius_mm >= 17.0 && estimate.radius_mm <= 23.0,
            "radius = {}",
            estimate.radius_mm
        );
        assert!(
            estimate.height_mm >= 32.0 && estimate.height_mm <= 48.0,
            "height = {}",
            estimate.height_mm
        );
        assert!(
            (estimate.center_marker.x - 60.0).abs() < 8.0
                && (estimate.center_marker.y - 130.0).abs() < 8.0,
            "center = {:?}",
            estimate.center_marker
        );
    }

    #[test]
    fn test_tilted_view() {
        let intrinsics = synthetic_intrinsics((1920, 1080), 1200.0);
        // camera tilted roughly 35 degrees off vertical, south of the scene
        let rvec = na::Vector3::new(std::f64::consts::PI * 0.8, 0.0, 0.0);
        let rotation = na::Rotation3::from_scaled_axis(rvec);
        let camera_pos = na::Vector3::new(100.0, -250.0, 450.0);
        let pose = PoseSnapshot::from_rvec_tvec(rvec, -(rotation * camera_pos));
        let bbox = cylinder_bbox(&intrinsics, &pose, (100.0, 90.0), 25.0, 50.0);

        let estimator = CylinderEstimator::new(CylinderTuning::default());
        let estimate = estimator.estimate(&intrinsics, &pose, bbox).unwrap();

        assert!(
            (estimate.radius_mm - 25.0).abs() <= 25.0 * 0.15,
            "radius = {}",
            estimate.radius_mm
        );
        assert!(
            (estimate.height_mm - 50.0).abs() <= 50.0 * 0.2,
            "height = {}",
            estimate.height_mm
        );
    }

    #[test]
    fn test_malformed_bbox_is_rejected() {
        let intrinsics = synthetic_intrinsics((1280, 720), 1000.0);
        let pose = PoseSnapshot::from_rvec_tvec(
            na::Vector3::new(std::f64::consts::PI, 0.0, 0.0),
            na::Vector3::new(0.0, 0.0, 400.0),
        );
        let estimator = CylinderEstimator::new(CylinderTuning::default());
        // ymax < ymin
        assert!(estimator
            .estimate(&intrinsics, &pose, [700.0, 400.0, 400.0, 600.0])
            .is_err());
    }

    #[test]
    fn test_march_to_edge() {
        let bbox = (100.0, 100.0, 200.0, 300.0);
        let center = (150.0, 200.0);
        // straight down exits at the bottom edge
        let hit = march_to_edge(center, (0.0, 1.0), bbox).unwrap();
        assert_eq!(hit, (150.0, 300.0));
        // diagonal exit clips on the nearer boundary (the right edge here)
        let hit = march_to_edge(
            center,
            (
                std::f64::consts::FRAC_1_SQRT_2,
                -std::f64::consts::FRAC_1_SQRT_2,
            ),
            bbox,
        )
        .unwrap();
        assert!((hit.0 - 200.0).abs() < 1e-9, "hit = {:?}", hit);
        // a start point outside the box has no forward exit
        assert!(march_to_edge((50.0, 50.0), (-1.0, 0.0), bbox).is_none());
    }

    #[test]
    fn test_classify_hsv_buckets() {
        assert_eq!(classify_hsv((5, 200, 200)), "red");
        assert_eq!(classify_hsv((30, 200, 200)), "yellow");
        assert_eq!(classify_hsv((60, 200, 200)), "green");
        assert_eq!(classify_hsv((110, 200, 200)), "blue");
        assert_eq!(classify_hsv((175, 200, 200)), "red");
        assert_eq!(classify_hsv((0, 0, 255)), "white");
        assert_eq!(classify_hsv((0, 0, 100)), "gray");
        assert_eq!(classify_hsv((90, 255, 20)), "black");
    }
}
