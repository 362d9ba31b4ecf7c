use crate::camera::CameraIntrinsics;
use crate::error::GeometryDegenerateError;
use crate::vision::pose::PoseSnapshot;

extern crate nalgebra as na;

/// A viewing ray whose z component is smaller than this is treated as
/// parallel to the target plane.
pub const RAY_EPS: f64 = 1e-6;

/// Fixed translation between the marker frame and the robot-base (world)
/// frame. The conversion is additive and exact in both directions.
#[derive(Debug, Clone, Copy)]
pub struct WorldOffset {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl WorldOffset {
    pub fn to_world(&self, p: &na::Point3<f64>) -> na::Point3<f64> {
        na::Point3::new(p.x + self.x_mm, p.y + self.y_mm, p.z)
    }

    pub fn to_marker(&self, p: &na::Point3<f64>) -> na::Point3<f64> {
        na::Point3::new(p.x - self.x_mm, p.y - self.y_mm, p.z)
    }
}

/// Side-effect-free projection math over one intrinsics/pose pair. All inputs
/// and outputs are in millimeters (marker frame) or pixels (image frame); the
/// image is assumed undistorted, so the plain pinhole model applies.
pub struct Projector<'a> {
    intrinsics: &'a CameraIntrinsics,
    pose: &'a PoseSnapshot,
}

impl<'a> Projector<'a> {
    pub fn new(intrinsics: &'a CameraIntrinsics, pose: &'a PoseSnapshot) -> Self {
        Self { intrinsics, pose }
    }

    /// The camera-frame viewing ray through pixel (u, v), normalized to z=1.
    pub fn pixel_ray(&self, u: f64, v: f64) -> na::Vector3<f64> {
        na::Vector3::new(
            (u - self.intrinsics.cx()) / self.intrinsics.fx(),
            (v - self.intrinsics.cy()) / self.intrinsics.fy(),
            1.0,
        )
    }

    /// Intersect the viewing ray through pixel (u, v) with the horizontal
    /// plane z = `z_plane` of the marker frame.
    pub fn pixel_to_plane(
        &self,
        u: f64,
        v: f64,
        z_plane: f64,
    ) -> Result<na::Point3<f64>, GeometryDegenerateError> {
        let ray_marker = self.pose.rotation.transpose() * self.pixel_ray(u, v);
        if ray_marker.z.abs() <= RAY_EPS {
            return Err(GeometryDegenerateError::new(
                "viewing ray is parallel to the work plane",
            ));
        }
        let s = (z_plane - self.pose.camera_pos.z) / ray_marker.z;
        Ok(self.pose.camera_pos + s * ray_marker)
    }

    /// Project a marker-frame point to pixel coordinates. Equivalent to
    /// OpenCV's projectPoints with zero distortion, which holds on the
    /// undistorted image.
    pub fn marker_to_pixel(
        &self,
        p: &na::Point3<f64>,
    ) -> Result<(f64, f64), GeometryDegenerateError> {
        let pc = self.pose.rotation * p.coords + self.pose.tvec;
        if pc.z <= RAY_EPS {
            return Err(GeometryDegenerateError::new("point is behind the camera"));
        }
        Ok((
            self.intrinsics.fx() * pc.x / pc.z + self.intrinsics.cx(),
            self.intrinsics.fy() * pc.y / pc.z + self.intrinsics.cy(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_intrinsics() -> CameraIntrinsics {
        let k = na::Matrix3::new(1000.0, 0.0, 640.0, 0.0, 1000.0, 360.0, 0.0, 0.0, 1.0);
        CameraIntrinsics::from_parts(k, [0.0; 5], (1280, 720)).unwrap()
    }

    /// Camera straight above the marker origin at the given height, looking
    /// down at the work plane.
    fn top_down_pose(height_mm: f64) -> PoseSnapshot {
        let rvec = na::Vector3::new(std::f64::consts::PI, 0.0, 0.0);
        let tvec = na::Vector3::new(0.0, 0.0, height_mm);
        PoseSnapshot::from_rvec_tvec(rvec, tvec)
    }

    #[test]
    fn test_principal_pixel_hits_marker_origin() {
        let intrinsics = synthetic_intrinsics();
        let pose = top_down_pose(300.0);
        let projector = Projector::new(&intrinsics, &pose);

        let point = projector.pixel_to_plane(640.0, 360.0, 0.0).unwrap();
        assert!(point.x.abs() < 0.5, "x = {}", point.x);
        assert!(point.y.abs() < 0.5, "y = {}", point.y);
        assert!(point.z.abs() < 1e-9);
    }

    #[test]
    fn test_pixel_world_round_trip() {
        let intrinsics = synthetic_intrinsics();
        // a tilted view, camera off to the side
        let rvec = na::Vector3::new(std::f64::consts::PI * 0.85, 0.1, -0.05);
        let tvec = na::Vector3::new(25.0, -40.0, 420.0);
        let pose = PoseSnapshot::from_rvec_tvec(rvec, tvec);
        let projector = Projector::new(&intrinsics, &pose);

        for point in [
            na::Point3::new(0.0, 0.0, 0.0),
            na::Point3::new(80.0, 30.0, 0.0),
            na::Point3::new(-50.0, 120.0, 0.0),
        ] {
            let (u, v) = projector.marker_to_pixel(&point).unwrap();
            let back = projector.pixel_to_plane(u, v, 0.0).unwrap();
            assert!(
                (back - point).norm() < 1.0,
                "round trip moved {:?} to {:?}",
                point,
                back
            );
        }
    }

    #[test]
    fn test_random_pose_round_trips() {
        use rand::Rng;

        let intrinsics = synthetic_intrinsics();
        let mut rng = rand::rng();
        for _ in 0..100 {
            // a camera somewhere above the work plane, roughly looking down
            let rvec = na::Vector3::new(
                std::f64::consts::PI * rng.random_range(0.85..1.0),
                rng.random_range(-0.1..0.1),
                rng.random_range(-0.1..0.1),
            );
            let camera = na::Vector3::new(
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
                rng.random_range(350.0..550.0),
            );
            let rotation = na::Rotation3::from_scaled_axis(rvec);
            let pose = PoseSnapshot::from_rvec_tvec(rvec, -(rotation * camera));
            let projector = Projector::new(&intrinsics, &pose);

            let point = na::Point3::new(
                rng.random_range(-80.0..80.0),
                rng.random_range(-80.0..80.0),
                0.0,
            );
            let (u, v) = projector.marker_to_pixel(&point).unwrap();
            let back = projector.pixel_to_plane(u, v, 0.0).unwrap();
            assert!(
                (back - point).norm() < 1.0,
                "round trip moved {:?} to {:?} (camera at {:?})",
                point,
                back,
                camera
            );
        }
    }

    #[test]
    fn test_parallel_ray_is_degenerate() {
        let intrinsics = synthetic_intrinsics();
        // camera looking horizontally: rays through the principal row never
        // meet the z=0 plane
        let rvec = na::Vector3::new(std::f64::consts::FRAC_PI_2, 0.0, 0.0);
        let tvec = na::Vector3::new(0.0, 100.0, 500.0);
        let pose = PoseSnapshot::from_rvec_tvec(rvec, tvec);
        let projector = Projector::new(&intrinsics, &pose);

        assert!(projector.pixel_to_plane(640.0, 360.0, 0.0).is_err());
    }

    #[test]
    fn test_world_marker_is_exact() {
        let offset = WorldOffset {
            x_mm: 196.0,
            y_mm: 100.0,
        };
        let p = na::Point3::new(12.345, -67.89, 4.2);
        let round_tripped = offset.to_marker(&offset.to_world(&p));
        assert_eq!(round_tripped, p);
        assert_eq!(
            offset.to_world(&na::Point3::new(0.0, 0.0, 0.0)),
            na::Point3::new(196.0, 100.0, 0.0)
        );
    }
}
