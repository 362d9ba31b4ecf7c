use std::error::Error;
use std::fmt::{Debug, Display};

/// This error occurs when the calibration archive cannot be loaded or is missing
/// a required key. It is fatal at startup.
pub struct CalibrationError {
    path: String,
    reason: String,
}

impl CalibrationError {
    pub fn new<S: Into<String>>(path: &str, reason: S) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl Debug for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cannot load camera calibration from \"{}\": {}",
            self.path, self.reason,
        )
    }
}

impl Display for CalibrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for CalibrationError {}

/// This error occurs when the video capture device cannot be opened.
/// It is fatal at startup.
pub struct CameraUnavailableError {
    cam_id: i32,
}

impl CameraUnavailableError {
    pub fn new(cam_id: i32) -> Self {
        Self { cam_id }
    }
}

impl Debug for CameraUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cannot open camera {}!", self.cam_id)
    }
}

impl Display for CameraUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for CameraUnavailableError {}

/// This error occurs when an operation needs the marker pose but no valid
/// pose snapshot exists (marker not seen recently, or PnP failed).
pub struct PoseUnavailableError;

impl Debug for PoseUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Marker pose is not available. Make sure the marker is visible to the camera."
        )
    }
}

impl Display for PoseUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for PoseUnavailableError {}

/// This error occurs when a geometric computation hits a near-zero divisor,
/// e.g. a viewing ray parallel to the target plane.
pub struct GeometryDegenerateError {
    context: &'static str,
}

impl GeometryDegenerateError {
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }
}

impl Debug for GeometryDegenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Degenerate geometry: {}", self.context)
    }
}

impl Display for GeometryDegenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for GeometryDegenerateError {}

/// This error occurs when a detection bounding box cannot be back-projected,
/// e.g. its center lies outside its own edges.
pub struct InvalidBboxError {
    bbox: [f64; 4],
}

impl InvalidBboxError {
    pub fn new(bbox: [f64; 4]) -> Self {
        Self { bbox }
    }
}

impl Debug for InvalidBboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Malformed bounding box [ymin={}, xmin={}, ymax={}, xmax={}]",
            self.bbox[0], self.bbox[1], self.bbox[2], self.bbox[3],
        )
    }
}

impl Display for InvalidBboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for InvalidBboxError {}

/// This error occurs when the robot's serial port cannot be opened.
pub struct SerialUnavailableError {
    reason: String,
}

impl SerialUnavailableError {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Debug for SerialUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cannot connect to the robot: {}", self.reason)
    }
}

impl Display for SerialUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for SerialUnavailableError {}

/// This error occurs when an established serial exchange fails mid-flight.
pub struct SerialIoError {
    cause: String,
}

impl SerialIoError {
    pub fn new<E: Display>(cause: E) -> Self {
        Self {
            cause: cause.to_string(),
        }
    }
}

impl Debug for SerialIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Serial communication failed: {}", self.cause)
    }
}

impl Display for SerialIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for SerialIoError {}

/// This error occurs when a command program contains a verb or argument the
/// robot would not understand. The program is rejected before anything is sent.
pub struct ProtocolParseError {
    command: String,
    reason: String,
}

impl ProtocolParseError {
    pub fn new<S: Into<String>>(command: &str, reason: S) -> Self {
        Self {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

impl Debug for ProtocolParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cannot parse command \"{}\": {}",
            self.command, self.reason,
        )
    }
}

impl Display for ProtocolParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for ProtocolParseError {}
