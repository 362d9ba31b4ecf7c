use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::mpsc::Receiver;

/// Values this close to center are treated as stick noise.
const DEAD_ZONE: i16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoypadAxis {
    X,
    Y,
    Rx,
    Ry,
}

/// One axis movement as decoded from a HID report. The HID reader thread is
/// external to the core; it feeds these over a channel.
#[derive(Debug, Clone, Copy)]
pub struct JoypadEvent {
    pub axis: JoypadAxis,
    pub value: i8,
}

/// Center a raw 0-255 axis byte to the -128..127 range, flattening the dead
/// zone around the neutral position.
pub fn center_axis(raw: u8) -> i8 {
    let scaled = raw as i16 - 128;
    if scaled.abs() < DEAD_ZONE {
        0
    } else {
        scaled as i8
    }
}

/// Latest position of the four gamepad axes, shared lock-free with tool
/// handlers.
#[derive(Debug, Default)]
pub struct JoypadState {
    x: AtomicI8,
    y: AtomicI8,
    rx: AtomicI8,
    ry: AtomicI8,
}

impl JoypadState {
    pub fn apply(&self, event: JoypadEvent) {
        let slot = match event.axis {
            JoypadAxis::X => &self.x,
            JoypadAxis::Y => &self.y,
            JoypadAxis::Rx => &self.rx,
            JoypadAxis::Ry => &self.ry,
        };
        slot.store(event.value, Ordering::Relaxed);
    }

    /// The current (X, Y, RX, RY) axis values.
    pub fn snapshot(&self) -> (i8, i8, i8, i8) {
        (
            self.x.load(Ordering::Relaxed),
            self.y.load(Ordering::Relaxed),
            self.rx.load(Ordering::Relaxed),
            self.ry.load(Ordering::Relaxed),
        )
    }
}

/// Drain axis events into the shared state until the producer hangs up.
/// Runs on its own thread; the single channel replaces per-event callbacks.
pub fn consume_events(state: &JoypadState, events: Receiver<JoypadEvent>) {
    for event in events {
        state.apply(event);
    }
    log::info!("Joypad event source disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn test_center_axis() {
        assert_eq!(center_axis(128), 0);
        assert_eq!(center_axis(133), 0); // inside the dead zone
        assert_eq!(center_axis(255), 127);
        assert_eq!(center_axis(0), -128);
        assert_eq!(center_axis(100), -28);
    }

    #[test]
    fn test_consume_events_updates_state() {
        let state = Arc::new(JoypadState::default());
        let (tx, rx) = mpsc::channel();
        let consumer = {
            let state = state.clone();
            std::thread::spawn(move || consume_events(&state, rx))
        };

        tx.send(JoypadEvent {
            axis: JoypadAxis::X,
            value: 42,
        })
        .unwrap();
        tx.send(JoypadEvent {
            axis: JoypadAxis::Ry,
            value: -17,
        })
        .unwrap();
        drop(tx);
        consumer.join().unwrap();

        assert_eq!(state.snapshot(), (42, 0, 0, -17));
    }
}
