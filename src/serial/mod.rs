use std::cmp::Ordering;

/// Request/response exchange with the robot controller
pub mod gateway;

/// Name fragments that identify a USB-ACM-class robot controller port.
const PORT_MARKERS: [&str; 4] = ["usbmodem", "ttyACM", "ttyUSB", "COM"];

#[cfg(target_os = "macos")]
const FALLBACK_PORT: &str = "/dev/cu.usbmodem101";
#[cfg(target_os = "windows")]
const FALLBACK_PORT: &str = "COM3";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const FALLBACK_PORT: &str = "/dev/ttyACM0";

/// Compare two port names so that embedded numbers order numerically:
/// "ttyACM2" sorts before "ttyACM10". Digit runs sort before letter runs.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_chunks = chunks(a);
    let b_chunks = chunks(b);
    for (x, y) in a_chunks.iter().zip(b_chunks.iter()) {
        let ordering = match (x.0, y.0) {
            (true, true) => numeric_cmp(x.1, y.1),
            (false, false) => x.1.cmp(y.1),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a_chunks.len().cmp(&b_chunks.len())
}

/// Split a string into runs of digits and runs of everything else.
fn chunks(s: &str) -> Vec<(bool, &str)> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;
    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match current {
            Some(kind) if kind == is_digit => {}
            Some(kind) => {
                result.push((kind, &s[start..i]));
                start = i;
                current = Some(is_digit);
            }
            None => current = Some(is_digit),
        }
    }
    if let Some(kind) = current {
        result.push((kind, &s[start..]));
    }
    result
}

fn numeric_cmp(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Pick the robot port among the given candidates: keep names carrying a
/// known USB-serial marker, order them naturally and take the first.
pub fn select_port<S: AsRef<str>>(candidates: &[S]) -> Option<String> {
    let mut matching: Vec<&str> = candidates
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| PORT_MARKERS.iter().any(|marker| name.contains(marker)))
        .collect();
    matching.sort_by(|a, b| natural_cmp(a, b));
    matching.first().map(|name| name.to_string())
}

/// Enumerate the system's serial ports and pick the robot controller,
/// falling back to the platform default when nothing matches.
pub fn discover_port() -> String {
    let names: Vec<String> = serialport::available_ports()
        .map(|ports| ports.into_iter().map(|port| port.port_name).collect())
        .unwrap_or_default();
    match select_port(&names) {
        Some(name) => name,
        None => {
            log::warn!(
                "No robot serial port found, falling back to {}",
                FALLBACK_PORT
            );
            FALLBACK_PORT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order_beats_lexical() {
        let ports = [
            "/dev/ttyACM10",
            "/dev/ttyACM2",
            "/dev/ttyUSB0",
            "/dev/null",
        ];
        assert_eq!(select_port(&ports).unwrap(), "/dev/ttyACM2");
    }

    #[test]
    fn test_non_matching_ports_are_ignored() {
        assert_eq!(select_port(&["/dev/null", "/dev/random"]), None);
        assert_eq!(
            select_port(&["/dev/cu.usbmodem101", "/dev/cu.Bluetooth"]).unwrap(),
            "/dev/cu.usbmodem101"
        );
    }

    #[test]
    fn test_windows_style_ports() {
        assert_eq!(select_port(&["COM10", "COM3", "COM1"]).unwrap(), "COM1");
    }

    #[test]
    fn test_natural_cmp_details() {
        assert_eq!(natural_cmp("ttyACM2", "ttyACM10"), Ordering::Less);
        assert_eq!(natural_cmp("ttyACM2", "ttyACM2"), Ordering::Equal);
        assert_eq!(natural_cmp("ttyACM002", "ttyACM2"), Ordering::Equal);
        assert_eq!(natural_cmp("ttyACM", "ttyUSB"), Ordering::Less);
    }
}
