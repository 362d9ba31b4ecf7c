/// Camera calibration data and the exclusive capture source
pub mod camera;

/// Workpiece catalog loaded from CSV
pub mod catalog;

/// Command-line configuration and tunables
pub mod config;

/// Typed error definitions
pub mod error;

/// Gamepad axis state, fed by an external HID reader over a channel
pub mod joypad;

/// TCP endpoints: the JSON-lines tool transport and the MJPEG stream
pub mod net;

/// Robot command program parsing and the canned pick-and-place program
pub mod sequence;

/// Serial link to the robot controller
pub mod serial;

/// Tool registry, handlers and the audit log
pub mod tools;

/// The monocular geometry engine and the frame pipeline
pub mod vision;
