use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use opencv::{calib3d, prelude::*, videoio};
use serde::Deserialize;

extern crate nalgebra as na;

use crate::error::{CalibrationError, CameraUnavailableError};

/// Intrinsic parameters of the calibrated camera: the 3x3 camera matrix, the
/// 5-element distortion vector and the capture resolution. Loaded once at
/// startup and never modified afterwards.
pub struct CameraIntrinsics {
    mat: Mat,
    dist: Mat,
    k: na::Matrix3<f64>,
    dist_coeffs: [f64; 5],
    resolution: (u32, u32),
}

#[derive(Deserialize)]
struct CalibrationFile {
    mtx: Vec<Vec<f64>>,
    dist: serde_json::Value,
}

fn flatten_dist(value: &serde_json::Value) -> Option<Vec<f64>> {
    // accepts both a flat [k1..k3] array and the nested [[k1..k3]] shape that
    // a row-vector export produces
    let outer = value.as_array()?;
    if outer.len() == 1 && outer[0].is_array() {
        return flatten_dist(&outer[0]);
    }
    outer.iter().map(|v| v.as_f64()).collect()
}

impl CameraIntrinsics {
    /// Load the calibration archive. Missing keys or ill-shaped matrices are
    /// fatal, per the startup contract.
    pub fn load(path: &Path, resolution: (u32, u32)) -> Result<Self, Box<dyn std::error::Error>> {
        let display_path = path.display().to_string();
        let file =
            File::open(path).map_err(|e| CalibrationError::new(&display_path, e.to_string()))?;
        let parsed: CalibrationFile = serde_json::from_reader(file)
            .map_err(|e| CalibrationError::new(&display_path, e.to_string()))?;

        if parsed.mtx.len() != 3 || parsed.mtx.iter().any(|row| row.len() != 3) {
            return Err(
                CalibrationError::new(&display_path, "\"mtx\" must be a 3x3 matrix").into(),
            );
        }
        let k = na::Matrix3::from_fn(|r, c| parsed.mtx[r][c]);

        let dist = flatten_dist(&parsed.dist).ok_or_else(|| {
            CalibrationError::new(&display_path, "\"dist\" must be a numeric array")
        })?;
        if dist.len() != 5 {
            return Err(CalibrationError::new(
                &display_path,
                format!("\"dist\" must have 5 elements, got {}", dist.len()),
            )
            .into());
        }
        let mut dist_coeffs = [0.0; 5];
        dist_coeffs.copy_from_slice(&dist);

        Self::from_parts(k, dist_coeffs, resolution)
    }

    /// Build intrinsics from raw parameters. Used by the loader above and for
    /// synthetic pinhole cameras in tests.
    pub fn from_parts(
        k: na::Matrix3<f64>,
        dist_coeffs: [f64; 5],
        resolution: (u32, u32),
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let k_data: [f64; 9] = [
            k[(0, 0)], k[(0, 1)], k[(0, 2)],
            k[(1, 0)], k[(1, 1)], k[(1, 2)],
            k[(2, 0)], k[(2, 1)], k[(2, 2)],
        ];
        let mat = Mat::new_rows_cols_with_data(3, 3, &k_data)?.try_clone()?;
        let dist = Mat::new_rows_cols_with_data(5, 1, &dist_coeffs)?.try_clone()?;
        Ok(Self {
            mat,
            dist,
            k,
            dist_coeffs,
            resolution,
        })
    }

    pub fn camera_mat(&self) -> &Mat {
        &self.mat
    }

    pub fn k(&self) -> &na::Matrix3<f64> {
        &self.k
    }

    pub fn dist_coeffs(&self) -> &[f64; 5] {
        &self.dist_coeffs
    }

    pub fn fx(&self) -> f64 {
        self.k[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.k[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.k[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.k[(1, 2)]
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Undistort a raw frame. The undistorted image is produced with the
    /// original camera matrix as the new projection matrix, so the pinhole
    /// model with K keeps holding on the result.
    pub fn undistort(&self, frame: &Mat) -> opencv::Result<Mat> {
        let mut undistorted = Mat::default();
        calib3d::undistort(frame, &mut undistorted, &self.mat, &self.dist, &self.mat)?;
        Ok(undistorted)
    }
}

/// The single video capture device. All reads go through an exclusive lock
/// which is held only for the duration of one frame grab.
pub struct FrameSource {
    cap: Mutex<videoio::VideoCapture>,
}

impl FrameSource {
    pub fn open(cam_id: i32, resolution: (u32, u32)) -> Result<Self, Box<dyn std::error::Error>> {
        let mut cap = videoio::VideoCapture::new(cam_id, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(CameraUnavailableError::new(cam_id).into());
        }
        cap.set(videoio::CAP_PROP_FRAME_WIDTH, resolution.0 as f64)?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, resolution.1 as f64)?;
        log::info!(
            "Camera {} opened at {}x{}",
            cam_id,
            resolution.0,
            resolution.1
        );
        Ok(Self {
            cap: Mutex::new(cap),
        })
    }

    /// Grab one raw BGR frame. Returns `None` when the driver yields no frame
    /// (transient condition, the caller invalidates its pose and moves on).
    pub fn read(&self) -> Result<Option<Mat>, Box<dyn std::error::Error>> {
        let mut frame = Mat::default();
        let ok = {
            let mut cap = self.cap.lock().unwrap();
            cap.read(&mut frame)?
        };
        if ok && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    /// A source with no device behind it; every read yields no frame.
    #[cfg(test)]
    pub(crate) fn inactive() -> Self {
        Self {
            cap: Mutex::new(videoio::VideoCapture::default().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(tag: &str, content: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("armvision-calib-{}-{}.json", std::process::id(), tag));
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_calibration() {
        let path = write_temp(
            "ok",
            r#"{"mtx": [[1000.0, 0.0, 640.0], [0.0, 1000.0, 360.0], [0.0, 0.0, 1.0]],
                "dist": [[0.1, -0.2, 0.0, 0.0, 0.05]]}"#,
        );
        let intr = CameraIntrinsics::load(&path, (1280, 720)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(intr.fx(), 1000.0);
        assert_eq!(intr.fy(), 1000.0);
        assert_eq!(intr.cx(), 640.0);
        assert_eq!(intr.cy(), 360.0);
        assert_eq!(intr.dist_coeffs()[1], -0.2);
        // the Mat mirror must agree with the nalgebra form
        assert_eq!(*intr.camera_mat().at_2d::<f64>(0, 2).unwrap(), 640.0);
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let path = write_temp(
            "missing",
            r#"{"mtx": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]}"#,
        );
        let result = CameraIntrinsics::load(&path, (640, 480));
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_dist_length() {
        let path = write_temp(
            "short",
            r#"{"mtx": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], "dist": [0.0, 0.0]}"#,
        );
        let result = CameraIntrinsics::load(&path, (640, 480));
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
