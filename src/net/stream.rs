use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::tools::CoreContext;
use crate::vision::overlay::OverlayOptions;

/// Cadence of the stream, roughly 25 frames per second.
const FRAME_INTERVAL: Duration = Duration::from_millis(40);

/// Serve `GET /stream.mjpg` as a multipart/x-mixed-replace MJPEG stream, one
/// connection per thread. Every frame pull forces a fresh capture, so the
/// stream doubles as the system's heartbeat when no tool calls arrive.
pub fn stream_server_main(
    context: Arc<CoreContext>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    log::info!("MJPEG stream listening on port {}", port);
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Stream viewer connected from {}", addr);
                let context = context.clone();
                std::thread::spawn(move || {
                    // a write failure just means the viewer went away
                    if let Err(e) = serve_stream(stream, &context) {
                        log::debug!("Stream viewer disconnected: {}", e);
                    }
                });
            }
            Err(e) => {
                log::error!("An error occurred at the stream endpoint: {}", e);
            }
        }
    }
}

fn serve_stream(stream: TcpStream, context: &CoreContext) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let path = request_line.split_whitespace().nth(1).unwrap_or("");
    // drain the request headers
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
    }

    let mut writer = stream;
    if path != "/stream.mjpg" {
        writer.write_all(
            b"HTTP/1.1 404 Not Found\r\n\
              Access-Control-Allow-Origin: *\r\n\
              Content-Length: 0\r\n\r\n",
        )?;
        return Ok(());
    }

    writer.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
          Access-Control-Allow-Origin: *\r\n\
          Cache-Control: no-cache\r\n\r\n",
    )?;

    loop {
        let started = Instant::now();
        if let Err(e) = context.publisher.update_pose(true) {
            log::warn!("Stream capture failed: {}", e);
        }
        let options = OverlayOptions {
            draw_axes: true,
            trajectory: *context.trajectory.lock().unwrap(),
            detections: Vec::new(),
        };
        match context.publisher.latest_jpeg(&options) {
            Ok(Some(jpeg)) => write_part(&mut writer, &jpeg)?,
            Ok(None) => {}
            Err(e) => log::warn!("Stream encode failed: {}", e),
        }
        if let Some(remaining) = FRAME_INTERVAL.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

fn write_part(writer: &mut impl Write, jpeg: &[u8]) -> io::Result<()> {
    write!(
        writer,
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )?;
    writer.write_all(jpeg)?;
    writer.write_all(b"\r\n")?;
    writer.flush()
}
