use opencv::core::{self, Point, Rect, Scalar};
use opencv::{calib3d, imgproc, prelude::*};

extern crate nalgebra as na;

use crate::camera::CameraIntrinsics;
use crate::sequence::{PICK_HEIGHT_MM, PLACE_HEIGHT_MM, SAFETY_HEIGHT_MM};
use crate::vision::pose::{MarkerModel, PoseSnapshot};
use crate::vision::projector::Projector;

/// Planned pick-and-place motion, drawn over the camera view. Coordinates are
/// in the marker frame, heights in millimeters.
#[derive(Debug, Clone, Copy)]
pub struct PickPlaceTrajectory {
    pub pick: (f64, f64),
    pub place: (f64, f64),
    pub z_pick: f64,
    pub z_place: f64,
    pub z_safe: f64,
}

impl PickPlaceTrajectory {
    pub fn new(pick: (f64, f64), place: (f64, f64)) -> Self {
        Self {
            pick,
            place,
            z_pick: PICK_HEIGHT_MM,
            z_place: PLACE_HEIGHT_MM,
            z_safe: SAFETY_HEIGHT_MM,
        }
    }
}

/// One detection to draw: a normalized bounding box plus an optional ground
/// contact dot, both in 0-1000 image coordinates.
#[derive(Debug, Clone)]
pub struct DetectionOverlay {
    pub label: String,
    pub confidence: Option<f32>,
    /// [ymin, xmin, ymax, xmax], thousandths of the image dimensions.
    pub box_2d: [f64; 4],
    /// Ground contact point as (u, v) in thousandths.
    pub ground_norm: Option<(i32, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayOptions {
    pub draw_axes: bool,
    pub trajectory: Option<PickPlaceTrajectory>,
    pub detections: Vec<DetectionOverlay>,
}

/// Render the requested overlays onto `frame` in place. A frame without a
/// pose is still renderable: axes and trajectory are simply skipped, while
/// detection boxes only need image coordinates.
pub fn render(
    frame: &mut Mat,
    intrinsics: &CameraIntrinsics,
    pose: Option<&PoseSnapshot>,
    marker: &MarkerModel,
    options: &OverlayOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(pose) = pose {
        if options.draw_axes {
            draw_axes(frame, intrinsics, pose, marker)?;
        }
        if let Some(trajectory) = &options.trajectory {
            draw_trajectory(frame, intrinsics, pose, trajectory)?;
        }
    }
    draw_detections(frame, intrinsics, &options.detections)?;
    Ok(())
}

fn draw_axes(
    frame: &mut Mat,
    intrinsics: &CameraIntrinsics,
    pose: &PoseSnapshot,
    marker: &MarkerModel,
) -> Result<(), Box<dyn std::error::Error>> {
    let length = marker.side_mm * 0.8;
    let zero_dist = Mat::zeros(5, 1, core::CV_64F)?.to_mat()?;
    calib3d::draw_frame_axes(
        frame,
        intrinsics.camera_mat(),
        &zero_dist,
        &pose.rvec_mat()?,
        &pose.tvec_mat()?,
        length as f32,
        3,
    )?;

    // labels sit slightly beyond the axis tips, in the axis colors
    let label_len = length * 1.1;
    let projector = Projector::new(intrinsics, pose);
    let labels = [
        ("X", na::Point3::new(label_len, 0.0, 0.0), Scalar::new(0.0, 0.0, 255.0, 0.0)),
        ("Y", na::Point3::new(0.0, label_len, 0.0), Scalar::new(0.0, 255.0, 0.0, 0.0)),
        ("Z", na::Point3::new(0.0, 0.0, label_len), Scalar::new(255.0, 0.0, 0.0, 0.0)),
    ];
    for (text, tip, color) in labels {
        if let Ok((u, v)) = projector.marker_to_pixel(&tip) {
            imgproc::put_text(
                frame,
                text,
                Point::new(u.round() as i32, v.round() as i32),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.7,
                color,
                2,
                imgproc::LINE_8,
                false,
            )?;
        }
    }
    Ok(())
}

fn draw_trajectory(
    frame: &mut Mat,
    intrinsics: &CameraIntrinsics,
    pose: &PoseSnapshot,
    trajectory: &PickPlaceTrajectory,
) -> Result<(), Box<dyn std::error::Error>> {
    let projector = Projector::new(intrinsics, pose);
    let vertices = [
        na::Point3::new(trajectory.pick.0, trajectory.pick.1, trajectory.z_pick),
        na::Point3::new(trajectory.pick.0, trajectory.pick.1, trajectory.z_safe),
        na::Point3::new(trajectory.place.0, trajectory.place.1, trajectory.z_safe),
        na::Point3::new(trajectory.place.0, trajectory.place.1, trajectory.z_place),
    ];
    let mut pixels = Vec::with_capacity(4);
    for vertex in &vertices {
        match projector.marker_to_pixel(vertex) {
            Ok((u, v)) => pixels.push(Point::new(u.round() as i32, v.round() as i32)),
            // a vertex behind the camera makes the whole path undrawable
            Err(_) => return Ok(()),
        }
    }

    let pick_color = Scalar::new(255.0, 0.0, 255.0, 0.0); // purple
    let transit_color = Scalar::new(0.0, 255.0, 255.0, 0.0); // yellow
    let place_color = Scalar::new(255.0, 0.0, 0.0, 0.0); // blue
    imgproc::line(frame, pixels[0], pixels[1], pick_color, 2, imgproc::LINE_8, 0)?;
    imgproc::line(frame, pixels[1], pixels[2], transit_color, 2, imgproc::LINE_8, 0)?;
    imgproc::line(frame, pixels[2], pixels[3], place_color, 2, imgproc::LINE_8, 0)?;
    imgproc::circle(frame, pixels[0], 5, pick_color, -1, imgproc::LINE_8, 0)?;
    imgproc::circle(frame, pixels[3], 5, place_color, -1, imgproc::LINE_8, 0)?;
    Ok(())
}

fn draw_detections(
    frame: &mut Mat,
    intrinsics: &CameraIntrinsics,
    detections: &[DetectionOverlay],
) -> Result<(), Box<dyn std::error::Error>> {
    let (image_w, image_h) = intrinsics.resolution();
    let (image_w, image_h) = (image_w as f64, image_h as f64);
    let box_color = Scalar::new(0.0, 255.0, 0.0, 0.0);
    let dot_color = Scalar::new(0.0, 0.0, 255.0, 0.0);
    for detection in detections {
        let [ymin, xmin, ymax, xmax] = detection.box_2d;
        let x1 = (xmin * image_w / 1000.0).round() as i32;
        let y1 = (ymin * image_h / 1000.0).round() as i32;
        let x2 = (xmax * image_w / 1000.0).round() as i32;
        let y2 = (ymax * image_h / 1000.0).round() as i32;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        imgproc::rectangle(
            frame,
            Rect::new(x1, y1, x2 - x1, y2 - y1),
            box_color,
            2,
            imgproc::LINE_8,
            0,
        )?;
        let text = match detection.confidence {
            Some(confidence) => format!("{} {:.2}", detection.label, confidence),
            None => detection.label.clone(),
        };
        imgproc::put_text(
            frame,
            &text,
            Point::new(x1, y1 - 10),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            box_color,
            2,
            imgproc::LINE_8,
            false,
        )?;
        if let Some((u_norm, v_norm)) = detection.ground_norm {
            let center = Point::new(
                (u_norm as f64 * image_w / 1000.0).round() as i32,
                (v_norm as f64 * image_h / 1000.0).round() as i32,
            );
            imgproc::circle(frame, center, 5, dot_color, -1, imgproc::LINE_8, 0)?;
        }
    }
    Ok(())
}
