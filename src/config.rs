use std::path::PathBuf;

use clap::Parser;

/// Tunable constants of the cylinder back-projection. The defaults reproduce
/// the values tuned against the reference wide-angle camera; they are exposed
/// here instead of being hard-coded because no analytic derivation exists for
/// either of them.
#[derive(Debug, Clone, Copy)]
pub struct CylinderTuning {
    /// Scale applied to the computed base radius.
    pub radius_factor: f64,
    /// Shrink coefficient of the heuristic diameter used near 45° axis angles.
    pub heuristic_coeff: f64,
}

impl Default for CylinderTuning {
    fn default() -> Self {
        Self {
            radius_factor: 0.9,
            heuristic_coeff: 0.4,
        }
    }
}

/// Language of workpiece names and tool documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Language {
    Ja,
    En,
}

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The device index of the camera observing the work area.
    #[arg(long, default_value_t = 0)]
    pub cam_id: i32,

    /// The camera resolution's X component.
    #[arg(long, default_value_t = 1920)]
    pub cam_res_x: u32,

    /// The camera resolution's Y component.
    #[arg(long, default_value_t = 1080)]
    pub cam_res_y: u32,

    /// Path to the camera calibration file (JSON with "mtx" and "dist" keys).
    #[arg(long, default_value = "calibration.json")]
    pub calibration: PathBuf,

    /// ID of the ArUco marker (DICT_4X4_50) that defines the work plane.
    #[arg(long, default_value_t = 14)]
    pub marker_id: i32,

    /// Side length of the ArUco marker in millimeters.
    #[arg(long, default_value_t = 63.0)]
    pub marker_size_mm: f64,

    /// X offset from the marker origin to the robot-base (world) origin, in mm.
    #[arg(long, default_value_t = 196.0)]
    pub offset_x_mm: f64,

    /// Y offset from the marker origin to the robot-base (world) origin, in mm.
    #[arg(long, default_value_t = 100.0)]
    pub offset_y_mm: f64,

    /// Serial port of the robot controller. Auto-detected when omitted.
    #[arg(long)]
    pub serial_port: Option<String>,

    /// Baud rate of the robot's serial link.
    #[arg(long, default_value_t = 9600)]
    pub baud_rate: u32,

    /// Timeout for one serial command exchange, in seconds.
    #[arg(long, default_value_t = 45)]
    pub serial_timeout_secs: u64,

    /// How long a solved marker pose stays cached, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub pose_cache_ms: u64,

    /// TCP port of the MJPEG stream endpoint.
    #[arg(long, default_value_t = 8081)]
    pub stream_port: u16,

    /// TCP port of the JSON-lines tool endpoint.
    #[arg(long, default_value_t = 8082)]
    pub tool_port: u16,

    /// Path to the workpiece catalog CSV.
    #[arg(long, default_value = "workpieces.csv")]
    pub catalog: PathBuf,

    /// Language used for workpiece names and tool documentation.
    #[arg(long, value_enum, default_value_t = Language::Ja)]
    pub lang: Language,

    /// Scale applied to the cylinder estimator's base radius.
    #[arg(long, default_value_t = 0.9)]
    pub radius_factor: f64,

    /// Shrink coefficient of the cylinder estimator's heuristic diameter.
    #[arg(long, default_value_t = 0.4)]
    pub heuristic_coeff: f64,
}

impl Args {
    pub fn cylinder_tuning(&self) -> CylinderTuning {
        CylinderTuning {
            radius_factor: self.radius_factor,
            heuristic_coeff: self.heuristic_coeff,
        }
    }
}
