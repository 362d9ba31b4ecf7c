use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

extern crate nalgebra as na;

use crate::catalog::WorkpieceCatalog;
use crate::config::{CylinderTuning, Language};
use crate::error::PoseUnavailableError;
use crate::joypad::JoypadState;
use crate::sequence;
use crate::serial::gateway::SerialGateway;
use crate::vision::cylinder::{self, CylinderEstimator};
use crate::vision::detector::{Detection, GroundCenter, ObjectDetector, RawDetection};
use crate::vision::overlay::{DetectionOverlay, OverlayOptions, PickPlaceTrajectory};
use crate::vision::projector::{Projector, WorldOffset};
use crate::vision::publisher::{FramePublisher, Published};

/// Bounded audit trail of tool invocations
pub mod audit;

use audit::AuditLog;

/// All process-wide state, constructed once at startup and borrowed by every
/// tool handler.
pub struct CoreContext {
    pub publisher: Arc<FramePublisher>,
    pub gateway: Arc<SerialGateway>,
    pub detector: Option<Arc<dyn ObjectDetector>>,
    pub catalog: WorkpieceCatalog,
    pub audit: AuditLog,
    pub joypad: Arc<JoypadState>,
    pub offset: WorldOffset,
    pub tuning: CylinderTuning,
    /// The pick-and-place path currently shown on overlays, published by
    /// `execute_sequence` from the program's first and last waypoints.
    pub trajectory: Mutex<Option<PickPlaceTrajectory>>,
}

type ToolHandler = fn(&CoreContext, &Value) -> Result<Value, Box<dyn std::error::Error>>;

/// A registered tool: its name, the documentation shown to the AI agent
/// (picked per language at registration) and the handler.
pub struct ToolDescriptor {
    pub name: &'static str,
    pub doc: &'static str,
    handler: ToolHandler,
}

pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new(lang: Language) -> Self {
        let doc = |ja: &'static str, en: &'static str| match lang {
            Language::Ja => ja,
            Language::En => en,
        };
        let tools = vec![
            ToolDescriptor {
                name: "get_workpiece_catalog",
                doc: doc(
                    "作業対象ワークの一覧（名称・把持高さ・説明）を返します。",
                    "Return the catalog of known workpieces with their names, \
                     gripping heights (mm) and descriptions.",
                ),
                handler: get_workpiece_catalog,
            },
            ToolDescriptor {
                name: "execute_sequence",
                doc: doc(
                    "セミコロン区切りのコマンド列をロボットに送信します。使用できる動詞: \
                     move x=<mm> y=<mm> z=<mm> s=<0-100> / grip open|close / delay t=<ms>。\
                     座標は世界座標系 (mm) です。",
                    "Send a semicolon-separated command program to the robot. Verbs: \
                     move x=<mm> y=<mm> z=<mm> s=<0-100> / grip open|close / delay t=<ms>. \
                     Coordinates are world-frame millimeters.",
                ),
                handler: execute_sequence,
            },
            ToolDescriptor {
                name: "get_robot_status",
                doc: doc(
                    "ロボットの現在状態（TCP位置・関節角度など）を取得します。",
                    "Query the robot for its current status dump (TCP position, joint angles).",
                ),
                handler: get_robot_status,
            },
            ToolDescriptor {
                name: "get_joypad_status",
                doc: doc(
                    "ジョイパッドの現在の軸の値 (X, Y, RX, RY) を返します。",
                    "Return the latest gamepad axis values (X, Y, RX, RY).",
                ),
                handler: get_joypad_status,
            },
            ToolDescriptor {
                name: "get_live_image",
                doc: doc(
                    "カメラ画像を取得します。座標軸の描画、物体検出（接地点の3D推定つき）、\
                     base64画像の返却を選択できます。",
                    "Capture the camera view. Optionally draw the marker axes, run object \
                     detection (with 3D ground-point estimation) and return the frame as a \
                     base64 JPEG.",
                ),
                handler: get_live_image,
            },
            ToolDescriptor {
                name: "convert_coordinates",
                doc: doc(
                    "座標を world / marker / pixel の各フレーム間で変換します。",
                    "Convert a point between the world, marker and pixel frames.",
                ),
                handler: convert_coordinates,
            },
            ToolDescriptor {
                name: "get_tool_logs",
                doc: doc(
                    "直近のツール呼び出し履歴を返します。",
                    "Return the recent tool invocation log.",
                ),
                handler: get_tool_logs,
            },
        ];
        Self { tools }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Run one tool call. Handler failures come back as `"Error: …"` strings
    /// rather than transport failures, so the agent can read them. Every
    /// dispatched invocation is recorded in the audit log.
    pub fn dispatch(&self, context: &CoreContext, name: &str, args: &Value) -> Value {
        let tool = match self.find(name) {
            Some(tool) => tool,
            None => return Value::String(format!("Error: unknown tool \"{}\"", name)),
        };
        let result = match (tool.handler)(context, args) {
            Ok(value) => value,
            Err(e) => Value::String(format!("Error: {}", e)),
        };
        let result_text = match &result {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        context.audit.record(name, args, &result_text);
        result
    }
}

fn get_workpiece_catalog(context: &CoreContext, _args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(context.catalog.to_json())
}

fn execute_sequence(context: &CoreContext, args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let commands = args
        .get("commands")
        .and_then(Value::as_str)
        .ok_or("missing \"commands\" argument")?;
    let parsed = sequence::parse_program(commands)?;

    // publish the program's first and last waypoints for the overlay
    let points = sequence::move_points(&parsed);
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        let pick = context
            .offset
            .to_marker(&na::Point3::new(first.0, first.1, 0.0));
        let place = context
            .offset
            .to_marker(&na::Point3::new(last.0, last.1, 0.0));
        *context.trajectory.lock().unwrap() =
            Some(PickPlaceTrajectory::new((pick.x, pick.y), (place.x, place.y)));
    }

    let reply = context.gateway.send_command(commands)?;
    Ok(Value::String(reply))
}

fn get_robot_status(context: &CoreContext, _args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let reply = context.gateway.send_command("dump")?;
    Ok(Value::String(reply))
}

fn get_joypad_status(context: &CoreContext, _args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let (x, y, rx, ry) = context.joypad.snapshot();
    Ok(json!({"X": x, "Y": y, "RX": rx, "RY": ry}))
}

fn get_live_image(context: &CoreContext, args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let visualize_axes = args
        .get("visualize_axes")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let detect_objects = args
        .get("detect_objects")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let confidence = args
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.7) as f32;
    let return_image = args
        .get("return_image")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    context.publisher.update_pose(false)?;

    let mut response = serde_json::Map::new();
    let mut overlays = Vec::new();
    if detect_objects {
        let detector = context
            .detector
            .as_ref()
            .ok_or("object detector is not configured")?;
        let published = context
            .publisher
            .published()
            .ok_or("no camera frame available")?;
        let mut detections = Vec::new();
        for raw in detector.predict(&published.frame, confidence)? {
            let detection = enrich_detection(context, &published, raw);
            overlays.push(DetectionOverlay {
                label: detection.label.clone(),
                confidence: Some(detection.confidence),
                box_2d: detection.box_2d.map(|v| v as f64),
                ground_norm: detection
                    .ground
                    .as_ref()
                    .map(|g| (g.ground_contact_point_2d[1], g.ground_contact_point_2d[0])),
            });
            detections.push(detection);
        }
        response.insert("detections".to_string(), serde_json::to_value(&detections)?);
    }

    if return_image {
        let options = OverlayOptions {
            draw_axes: visualize_axes,
            trajectory: if visualize_axes {
                *context.trajectory.lock().unwrap()
            } else {
                None
            },
            detections: overlays,
        };
        if let Some(image) = context.publisher.snapshot_base64(&options)? {
            response.insert("image_jpeg_base64".to_string(), Value::String(image));
        }
    }
    Ok(Value::Object(response))
}

/// Attach the 3D ground estimate and a sampled color to a raw detection.
/// Degenerate geometry never fails the detect call: the enrichment is simply
/// omitted and the color falls back to a bbox-center sample.
fn enrich_detection(context: &CoreContext, published: &Published, raw: RawDetection) -> Detection {
    let intrinsics = context.publisher.intrinsics();
    let (image_w, image_h) = intrinsics.resolution();
    let (image_w, image_h) = (image_w as f64, image_h as f64);
    let [x1, y1, x2, y2] = raw.bbox_px;
    let box_norm = [
        y1 / image_h * 1000.0,
        x1 / image_w * 1000.0,
        y2 / image_h * 1000.0,
        x2 / image_w * 1000.0,
    ];

    let mut ground = None;
    if let Some(pose) = &published.pose {
        let estimator = CylinderEstimator::new(context.tuning);
        match estimator.estimate(intrinsics, pose, box_norm) {
            Ok(estimate) => {
                let color = cylinder::sample_axis_color(
                    &published.frame,
                    estimate.contact_px,
                    estimate.top_px,
                )
                .ok()
                .flatten();
                let world = context.offset.to_world(&estimate.center_marker);
                ground = Some(GroundCenter {
                    position_world: [world.x, world.y, world.z],
                    position_marker: [
                        estimate.center_marker.x,
                        estimate.center_marker.y,
                        estimate.center_marker.z,
                    ],
                    radius_mm: estimate.radius_mm,
                    height_mm: estimate.height_mm,
                    ground_contact_px: [
                        estimate.contact_px.0.round() as i32,
                        estimate.contact_px.1.round() as i32,
                    ],
                    ground_contact_point_2d: [estimate.contact_norm.1, estimate.contact_norm.0],
                    top_px: [
                        estimate.top_px.0.round() as i32,
                        estimate.top_px.1.round() as i32,
                    ],
                    top_point_2d: [estimate.top_norm.1, estimate.top_norm.0],
                    radius_px_2d: [estimate.radius_norm.0, estimate.radius_norm.1],
                    hsv: color.as_ref().map(|c| [c.hsv.0, c.hsv.1, c.hsv.2]).unwrap_or([0, 0, 0]),
                    color: color
                        .map(|c| c.name.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                });
            }
            Err(e) => log::debug!("Ground estimation skipped for \"{}\": {}", raw.label, e),
        }
    }

    let mut detection = Detection {
        label: raw.label,
        confidence: raw.confidence,
        box_2d: box_norm.map(|v| v.round() as i32),
        ground,
        color: None,
        hsv: None,
    };
    if detection.ground.is_none() {
        let center = ((x1 + x2) * 0.5, (y1 + y2) * 0.5);
        if let Ok(Some(sample)) = cylinder::sample_point_color(&published.frame, center) {
            detection.color = Some(sample.name.to_string());
            detection.hsv = Some([sample.hsv.0, sample.hsv.1, sample.hsv.2]);
        }
    }
    detection
}

fn convert_coordinates(context: &CoreContext, args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    let x = args.get("x").and_then(Value::as_f64).ok_or("missing \"x\" argument")?;
    let y = args.get("y").and_then(Value::as_f64).ok_or("missing \"y\" argument")?;
    let z = args.get("z").and_then(Value::as_f64).unwrap_or(0.0);
    let source = args
        .get("source")
        .and_then(Value::as_str)
        .ok_or("missing \"source\" argument")?;
    let target = args
        .get("target")
        .and_then(Value::as_str)
        .ok_or("missing \"target\" argument")?;

    context.publisher.update_pose(false)?;
    let intrinsics = context.publisher.intrinsics();

    let marker_point = match source {
        "world" => context.offset.to_marker(&na::Point3::new(x, y, z)),
        "marker" => na::Point3::new(x, y, z),
        "pixel" => {
            let pose = context.publisher.current_pose().ok_or(PoseUnavailableError)?;
            Projector::new(intrinsics, &pose).pixel_to_plane(x, y, 0.0)?
        }
        other => return Err(format!("unknown source frame \"{}\"", other).into()),
    };

    let converted = match target {
        "world" => {
            let p = context.offset.to_world(&marker_point);
            json!({"frame": "world", "x": round1(p.x), "y": round1(p.y), "z": round1(p.z)})
        }
        "marker" => json!({
            "frame": "marker",
            "x": round1(marker_point.x),
            "y": round1(marker_point.y),
            "z": round1(marker_point.z),
        }),
        "pixel" => {
            let pose = context.publisher.current_pose().ok_or(PoseUnavailableError)?;
            let (u, v) = Projector::new(intrinsics, &pose).marker_to_pixel(&marker_point)?;
            json!({"frame": "pixel", "u": round1(u), "v": round1(v)})
        }
        other => return Err(format!("unknown target frame \"{}\"", other).into()),
    };
    Ok(converted)
}

fn get_tool_logs(context: &CoreContext, _args: &Value) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(serde_json::to_value(context.audit.snapshot())?)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
