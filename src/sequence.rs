use crate::error::ProtocolParseError;

/// Heights (mm) used by the canned pick-and-place program and the trajectory
/// overlay. Pick grips low, place releases a little higher so the workpiece
/// drops into position, and all horizontal transit happens at safety height.
pub const PICK_HEIGHT_MM: f64 = 20.0;
pub const PLACE_HEIGHT_MM: f64 = 30.0;
pub const SAFETY_HEIGHT_MM: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripAction {
    Open,
    Close,
}

/// One verb of the robot's command language.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// TCP move in world coordinates (mm). Omitted axes keep their current
    /// value on the robot side.
    Move {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        speed: Option<u8>,
    },
    Grip(GripAction),
    /// Blocking pause in milliseconds.
    Delay { ms: u32 },
}

/// Parse a semicolon-separated command program. The program is validated
/// before anything is sent to the robot; any unknown verb or malformed
/// argument rejects the whole program.
pub fn parse_program(text: &str) -> Result<Vec<Command>, ProtocolParseError> {
    let mut commands = Vec::new();
    for segment in text.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        commands.push(parse_command(segment)?);
    }
    if commands.is_empty() {
        return Err(ProtocolParseError::new(text, "empty program"));
    }
    Ok(commands)
}

fn parse_command(segment: &str) -> Result<Command, ProtocolParseError> {
    let mut tokens = segment.split_whitespace();
    let verb = tokens.next().unwrap_or("");
    match verb {
        "move" => {
            let mut x = None;
            let mut y = None;
            let mut z = None;
            let mut speed = None;
            for token in tokens {
                let (key, value) = token
                    .split_once('=')
                    .ok_or_else(|| ProtocolParseError::new(segment, "expected key=value"))?;
                match key {
                    "x" => x = Some(parse_float(segment, value)?),
                    "y" => y = Some(parse_float(segment, value)?),
                    "z" => z = Some(parse_float(segment, value)?),
                    "s" => {
                        let s: u8 = value.parse().map_err(|_| {
                            ProtocolParseError::new(segment, "speed must be an integer 0-100")
                        })?;
                        if s > 100 {
                            return Err(ProtocolParseError::new(
                                segment,
                                "speed must be an integer 0-100",
                            ));
                        }
                        speed = Some(s);
                    }
                    other => {
                        return Err(ProtocolParseError::new(
                            segment,
                            format!("unknown move argument \"{}\"", other),
                        ));
                    }
                }
            }
            if x.is_none() && y.is_none() && z.is_none() {
                return Err(ProtocolParseError::new(segment, "move needs at least one axis"));
            }
            Ok(Command::Move { x, y, z, speed })
        }
        "grip" => match tokens.next() {
            Some("open") => Ok(Command::Grip(GripAction::Open)),
            Some("close") => Ok(Command::Grip(GripAction::Close)),
            _ => Err(ProtocolParseError::new(
                segment,
                "grip takes exactly \"open\" or \"close\"",
            )),
        },
        "delay" => {
            let token = tokens
                .next()
                .ok_or_else(|| ProtocolParseError::new(segment, "delay needs t=<ms>"))?;
            let ms = token
                .strip_prefix("t=")
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| ProtocolParseError::new(segment, "delay needs t=<ms>"))?;
            Ok(Command::Delay { ms })
        }
        other => Err(ProtocolParseError::new(
            segment,
            format!("unknown verb \"{}\"", other),
        )),
    }
}

fn parse_float(segment: &str, value: &str) -> Result<f64, ProtocolParseError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProtocolParseError::new(segment, "expected a number"))
}

/// The (x, y) waypoints of a parsed program, in program order. Only moves
/// that set both horizontal axes count as waypoints.
pub fn move_points(commands: &[Command]) -> Vec<(f64, f64)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Move {
                x: Some(x),
                y: Some(y),
                ..
            } => Some((*x, *y)),
            _ => None,
        })
        .collect()
}

/// Build the canonical pick-and-place program between two world-frame points.
pub fn pick_place_program(pick_world: (f64, f64), place_world: (f64, f64)) -> String {
    [
        "grip open".to_string(),
        format!("move z={:.0} s=100", SAFETY_HEIGHT_MM),
        format!(
            "move x={:.1} y={:.1} z={:.0} s=100",
            pick_world.0, pick_world.1, SAFETY_HEIGHT_MM
        ),
        format!("move z={:.0} s=50", PICK_HEIGHT_MM),
        "grip close".to_string(),
        "delay t=1000".to_string(),
        format!("move z={:.0} s=100", SAFETY_HEIGHT_MM),
        format!(
            "move x={:.1} y={:.1} z={:.0} s=100",
            place_world.0, place_world.1, SAFETY_HEIGHT_MM
        ),
        format!("move z={:.0} s=50", PLACE_HEIGHT_MM),
        "grip open".to_string(),
        "delay t=1000".to_string(),
        format!("move z={:.0} s=100", SAFETY_HEIGHT_MM),
    ]
    .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_program() {
        let commands =
            parse_program("grip open; move x=130.5 y=-20 z=90 s=100; delay t=500; grip close")
                .unwrap();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0], Command::Grip(GripAction::Open));
        assert_eq!(
            commands[1],
            Command::Move {
                x: Some(130.5),
                y: Some(-20.0),
                z: Some(90.0),
                speed: Some(100),
            }
        );
        assert_eq!(commands[2], Command::Delay { ms: 500 });
    }

    #[test]
    fn test_partial_move_is_valid() {
        let commands = parse_program("move z=90 s=100").unwrap();
        assert_eq!(
            commands[0],
            Command::Move {
                x: None,
                y: None,
                z: Some(90.0),
                speed: Some(100),
            }
        );
    }

    #[test]
    fn test_rejects_unknown_verb() {
        assert!(parse_program("jump z=90").is_err());
        assert!(parse_program("").is_err());
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(parse_program("move q=1").is_err());
        assert!(parse_program("move x=abc").is_err());
        assert!(parse_program("move x=1 s=150").is_err());
        assert!(parse_program("grip halfway").is_err());
        assert!(parse_program("delay 500").is_err());
    }

    #[test]
    fn test_move_points_need_both_axes() {
        let commands = parse_program(
            "move z=90 s=100; move x=100 y=50 z=90 s=100; move z=20 s=50; move x=200 y=80 z=90 s=100",
        )
        .unwrap();
        assert_eq!(move_points(&commands), vec![(100.0, 50.0), (200.0, 80.0)]);
    }

    #[test]
    fn test_pick_place_program_parses() {
        let program = pick_place_program((296.0, 150.0), (250.0, 60.0));
        let commands = parse_program(&program).unwrap();
        assert_eq!(commands.len(), 12);
        let points = move_points(&commands);
        assert_eq!(points.first(), Some(&(296.0, 150.0)));
        assert_eq!(points.last(), Some(&(250.0, 60.0)));
    }
}
