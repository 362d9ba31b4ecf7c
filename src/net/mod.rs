use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::tools::{CoreContext, ToolRegistry};

/// MJPEG stream endpoint
pub mod stream;

#[derive(Deserialize)]
struct ToolRequest {
    tool: String,
    #[serde(default)]
    args: Value,
}

/// Serve tool calls as JSON lines over TCP: one request object per line in,
/// one response object per line out. The transport is deliberately thin; the
/// registry does all the work.
pub fn tool_server_main(
    context: Arc<CoreContext>,
    registry: Arc<ToolRegistry>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    log::info!("Tool endpoint listening on port {}", port);
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Tool client connected from {}", addr);
                let context = context.clone();
                let registry = registry.clone();
                std::thread::spawn(move || {
                    if let Err(e) = serve_client(stream, &context, &registry) {
                        log::error!("Tool client error: {}", e);
                    }
                });
            }
            Err(e) => {
                log::error!("An error occurred at the tool endpoint: {}", e);
            }
        }
    }
}

fn serve_client(
    stream: TcpStream,
    context: &CoreContext,
    registry: &ToolRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    serve_lines(reader, writer, context, registry)
}

fn serve_lines(
    reader: impl BufRead,
    mut writer: impl Write,
    context: &CoreContext,
    registry: &ToolRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) => {
                let args = if request.args.is_null() {
                    json!({})
                } else {
                    request.args
                };
                json!({"result": registry.dispatch(context, &request.tool, &args)})
            }
            Err(e) => json!({"error": format!("malformed request: {}", e)}),
        };
        writer.write_all(serde_json::to_string(&response)?.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    extern crate nalgebra as na;

    use crate::camera::{CameraIntrinsics, FrameSource};
    use crate::catalog::WorkpieceCatalog;
    use crate::config::{CylinderTuning, Language};
    use crate::joypad::JoypadState;
    use crate::serial::gateway::{SerialConfig, SerialGateway};
    use crate::tools::audit::AuditLog;
    use crate::vision::pose::{MarkerModel, PoseEstimator};
    use crate::vision::projector::WorldOffset;
    use crate::vision::publisher::FramePublisher;

    fn test_context() -> CoreContext {
        let k = na::Matrix3::new(1000.0, 0.0, 640.0, 0.0, 1000.0, 360.0, 0.0, 0.0, 1.0);
        let intrinsics = Arc::new(CameraIntrinsics::from_parts(k, [0.0; 5], (1280, 720)).unwrap());
        let estimator = PoseEstimator::new(MarkerModel {
            id: 14,
            side_mm: 63.0,
        })
        .unwrap();
        CoreContext {
            publisher: Arc::new(FramePublisher::new(
                FrameSource::inactive(),
                intrinsics,
                estimator,
                Duration::from_millis(100),
            )),
            gateway: Arc::new(SerialGateway::new(SerialConfig::default())),
            detector: None,
            catalog: WorkpieceCatalog::empty(),
            audit: AuditLog::new(),
            joypad: Arc::new(JoypadState::default()),
            offset: WorldOffset {
                x_mm: 196.0,
                y_mm: 100.0,
            },
            tuning: CylinderTuning::default(),
            trajectory: Mutex::new(None),
        }
    }

    #[test]
    fn test_serve_lines_dispatches_and_replies() {
        let context = test_context();
        let registry = ToolRegistry::new(Language::En);
        let input = b"{\"tool\": \"get_joypad_status\"}\nnot json\n".to_vec();
        let mut output = Vec::new();

        serve_lines(&input[..], &mut output, &context, &registry).unwrap();

        let text = String::from_utf8(output).unwrap();
        let mut lines = text.lines();
        let first: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(first["result"], json!({"X": 0, "Y": 0, "RX": 0, "RY": 0}));
        let second: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert!(second["error"].as_str().unwrap().contains("malformed"));
    }

    #[test]
    fn test_empty_lines_are_skipped() {
        let context = test_context();
        let registry = ToolRegistry::new(Language::En);
        let mut output = Vec::new();
        serve_lines(&b"\n\n"[..], &mut output, &context, &registry).unwrap();
        assert!(output.is_empty());
    }
}
