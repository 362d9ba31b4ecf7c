use opencv::prelude::*;
use serde::Serialize;

/// One prediction from the external object detector, in absolute pixels of
/// the undistorted frame.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    /// [x1, y1, x2, y2] pixel corners.
    pub bbox_px: [f64; 4],
}

/// Boundary to the external object detector. The detector is opaque to the
/// core: it receives a BGR frame and a confidence threshold and returns
/// labeled pixel bounding boxes.
pub trait ObjectDetector: Send + Sync {
    fn predict(
        &self,
        frame: &Mat,
        confidence: f32,
    ) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>>;
}

/// A detection as reported to tool callers, with the optional 3D enrichment.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// [ymin, xmin, ymax, xmax] in thousandths of the image dimensions.
    pub box_2d: [i32; 4],
    #[serde(flatten)]
    pub ground: Option<GroundCenter>,
    /// Color sampled at the bbox center; only filled when no ground estimate
    /// (which carries its own color) could be made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hsv: Option<[u8; 3]>,
}

/// Where a detected cylinder touches the work plane, in every frame a caller
/// might want: metric world/marker coordinates, absolute pixels and
/// resolution-independent 0-1000 coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct GroundCenter {
    /// Base center in the robot-base frame, mm.
    pub position_world: [f64; 3],
    /// Base center in the marker frame, mm (z = 0).
    pub position_marker: [f64; 3],
    pub radius_mm: f64,
    pub height_mm: f64,
    /// Base center, absolute pixels [u, v].
    pub ground_contact_px: [i32; 2],
    /// Base center, normalized [y, x] in thousandths.
    pub ground_contact_point_2d: [i32; 2],
    /// Top-face center, absolute pixels [u, v].
    pub top_px: [i32; 2],
    /// Top-face center, normalized [y, x] in thousandths.
    pub top_point_2d: [i32; 2],
    /// Base radius in normalized pixels (u, v), v foreshortened.
    pub radius_px_2d: [i32; 2],
    /// Representative HSV of the object surface (OpenCV ranges).
    pub hsv: [u8; 3],
    /// Coarse palette name of the object color.
    pub color: String,
}
