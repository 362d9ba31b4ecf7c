use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use clap::Parser;

use armvision::camera::{CameraIntrinsics, FrameSource};
use armvision::catalog::WorkpieceCatalog;
use armvision::config::Args;
use armvision::joypad::{self, JoypadState};
use armvision::net::{self, stream};
use armvision::serial::gateway::{SerialConfig, SerialGateway};
use armvision::tools::audit::AuditLog;
use armvision::tools::{CoreContext, ToolRegistry};
use armvision::vision::pose::{MarkerModel, PoseEstimator};
use armvision::vision::projector::WorldOffset;
use armvision::vision::publisher::FramePublisher;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = Args::parse();

    // calibration and camera problems are fatal here; everything later is
    // reported to tool callers instead
    let resolution = (args.cam_res_x, args.cam_res_y);
    let intrinsics = Arc::new(CameraIntrinsics::load(&args.calibration, resolution)?);
    log::info!("Calibration loaded from {}", args.calibration.display());
    let source = FrameSource::open(args.cam_id, resolution)?;
    let estimator = PoseEstimator::new(MarkerModel {
        id: args.marker_id,
        side_mm: args.marker_size_mm,
    })?;
    let publisher = Arc::new(FramePublisher::new(
        source,
        intrinsics,
        estimator,
        Duration::from_millis(args.pose_cache_ms),
    ));

    let gateway = Arc::new(SerialGateway::new(SerialConfig {
        port: args.serial_port.clone(),
        baud_rate: args.baud_rate,
        timeout: Duration::from_secs(args.serial_timeout_secs),
    }));

    let catalog = match WorkpieceCatalog::load(&args.catalog, args.lang) {
        Ok(catalog) => catalog,
        Err(e) => {
            log::warn!(
                "Cannot load workpiece catalog {}: {}. Starting with an empty catalog.",
                args.catalog.display(),
                e
            );
            WorkpieceCatalog::empty()
        }
    };

    let joypad = Arc::new(JoypadState::default());
    let (joypad_feed, joypad_events) = mpsc::channel();

    let context = Arc::new(CoreContext {
        publisher,
        gateway,
        // the object detector is an external collaborator; none is wired in
        // by default
        detector: None,
        catalog,
        audit: AuditLog::new(),
        joypad: joypad.clone(),
        offset: WorldOffset {
            x_mm: args.offset_x_mm,
            y_mm: args.offset_y_mm,
        },
        tuning: args.cylinder_tuning(),
        trajectory: Mutex::new(None),
    });
    let registry = Arc::new(ToolRegistry::new(args.lang));

    thread::scope(|s| {
        let joypad_state = joypad.clone();
        let _ = s.spawn(move || joypad::consume_events(&joypad_state, joypad_events));

        let stream_context = context.clone();
        let _ = s.spawn(move || {
            if let Err(e) = stream::stream_server_main(stream_context, args.stream_port) {
                log::error!("MJPEG server failed: {}", e);
            }
        });

        // the HID reader hands its events to joypad_feed; keeping the sender
        // alive here keeps the consumer thread running for the process lifetime
        let _joypad_feed = joypad_feed;

        if let Err(e) = net::tool_server_main(context.clone(), registry.clone(), args.tool_port) {
            log::error!("Tool endpoint failed: {}", e);
        }
    });

    Ok(())
}
