use std::sync::Mutex;
use std::time::Instant;

use opencv::core::{self, Point2f, Vector};
use opencv::{calib3d, imgproc, objdetect, prelude::*};

extern crate nalgebra as na;

use crate::camera::CameraIntrinsics;

/// The fiducial marker that anchors the work plane. The marker lies on z=0 of
/// its own right-handed frame, origin at the bottom-right corner, z up.
#[derive(Debug, Clone, Copy)]
pub struct MarkerModel {
    pub id: i32,
    pub side_mm: f64,
}

impl MarkerModel {
    /// The marker's corner coordinates in its own frame, in millimeters.
    ///
    /// This array's order is kept consistent with the detector's corner order:
    /// counter-clockwise starting from the top-left corner.
    pub fn object_points(&self) -> [na::Point3<f64>; 4] {
        let s = self.side_mm;
        [
            na::Point3::new(s, s, 0.0),
            na::Point3::new(s, 0.0, 0.0),
            na::Point3::new(0.0, 0.0, 0.0),
            na::Point3::new(0.0, s, 0.0),
        ]
    }
}

/// A solved camera pose relative to the marker, cached for a short TTL.
///
/// `rotation` maps marker coordinates into camera coordinates; `camera_pos`
/// is the camera center expressed in the marker frame (`-Rᵀ·t`).
#[derive(Debug, Clone)]
pub struct PoseSnapshot {
    pub rvec: na::Vector3<f64>,
    pub tvec: na::Vector3<f64>,
    pub rotation: na::Rotation3<f64>,
    pub camera_pos: na::Point3<f64>,
    pub solved_at: Instant,
}

impl PoseSnapshot {
    pub fn from_rvec_tvec(rvec: na::Vector3<f64>, tvec: na::Vector3<f64>) -> Self {
        let rotation = na::Rotation3::from_scaled_axis(rvec);
        let camera_pos = na::Point3::from(-(rotation.transpose() * tvec));
        Self {
            rvec,
            tvec,
            rotation,
            camera_pos,
            solved_at: Instant::now(),
        }
    }

    /// The rotation vector as a 3x1 Mat, for OpenCV drawing entry points.
    pub fn rvec_mat(&self) -> opencv::Result<Mat> {
        let data = [self.rvec.x, self.rvec.y, self.rvec.z];
        Mat::new_rows_cols_with_data(3, 1, &data)?.try_clone()
    }

    /// The translation vector as a 3x1 Mat, for OpenCV drawing entry points.
    pub fn tvec_mat(&self) -> opencv::Result<Mat> {
        let data = [self.tvec.x, self.tvec.y, self.tvec.z];
        Mat::new_rows_cols_with_data(3, 1, &data)?.try_clone()
    }
}

/// Detects the designated marker in an undistorted frame and solves its pose.
pub struct PoseEstimator {
    marker: MarkerModel,
    detector: Mutex<objdetect::ArucoDetector>,
}

impl PoseEstimator {
    pub fn new(marker: MarkerModel) -> Result<Self, Box<dyn std::error::Error>> {
        let dictionary = objdetect::get_predefined_dictionary(
            objdetect::PredefinedDictionaryType::DICT_4X4_50,
        )?;
        let parameters = objdetect::DetectorParameters::default()?;
        let refinement = objdetect::RefineParameters::new(10.0, 3.0, true)?;
        let detector = objdetect::ArucoDetector::new(&dictionary, &parameters, refinement)?;
        Ok(Self {
            marker,
            detector: Mutex::new(detector),
        })
    }

    pub fn marker(&self) -> &MarkerModel {
        &self.marker
    }

    /// Detect the marker in an already-undistorted frame and solve PnP
    /// against its four corners. The frame lives in the same K as the raw
    /// camera, so the distortion passed to the solver is zero.
    ///
    /// Returns `None` when the marker is absent or the solver does not
    /// converge; both are transient conditions.
    pub fn estimate(
        &self,
        intrinsics: &CameraIntrinsics,
        undistorted: &Mat,
    ) -> Result<Option<PoseSnapshot>, Box<dyn std::error::Error>> {
        let mut gray = Mat::default();
        imgproc::cvt_color(
            undistorted,
            &mut gray,
            imgproc::COLOR_BGR2GRAY,
            0,
            core::AlgorithmHint::ALGO_HINT_ACCURATE,
        )?;

        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();
        self.detector
            .lock()
            .unwrap()
            .detect_markers(&gray, &mut corners, &mut ids, &mut rejected)?;

        let index = match ids.iter().position(|id| id == self.marker.id) {
            Some(index) => index,
            None => return Ok(None),
        };
        let marker_corners = corners.get(index)?;
        if marker_corners.len() != 4 {
            return Ok(None);
        }

        let mut object_points_data = Vec::<f64>::with_capacity(12);
        let mut image_points_data = Vec::<f64>::with_capacity(8);
        for (object_point, corner) in self
            .marker
            .object_points()
            .iter()
            .zip(marker_corners.iter())
        {
            object_points_data.push(object_point.x);
            object_points_data.push(object_point.y);
            object_points_data.push(object_point.z);
            image_points_data.push(corner.x as f64);
            image_points_data.push(corner.y as f64);
        }
        let object_points = Mat::new_rows_cols_with_data(4, 3, &object_points_data)?;
        let image_points = Mat::new_rows_cols_with_data(4, 2, &image_points_data)?;
        let zero_dist = Mat::zeros(5, 1, core::CV_64F)?.to_mat()?;
        let mut rvec = Mat::default();
        let mut tvec = Mat::default();

        let converged = calib3d::solve_pnp(
            &object_points,
            &image_points,
            intrinsics.camera_mat(),
            &zero_dist,
            &mut rvec,
            &mut tvec,
            false,
            calib3d::SOLVEPNP_ITERATIVE,
        )?;
        if !converged {
            return Ok(None);
        }

        let rvec = na::Vector3::new(
            *rvec.at::<f64>(0)?,
            *rvec.at::<f64>(1)?,
            *rvec.at::<f64>(2)?,
        );
        let tvec = na::Vector3::new(
            *tvec.at::<f64>(0)?,
            *tvec.at::<f64>(1)?,
            *tvec.at::<f64>(2)?,
        );
        Ok(Some(PoseSnapshot::from_rvec_tvec(rvec, tvec)))
    }
}
