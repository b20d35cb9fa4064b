//! Raw input events and the samples delivered to consumers.

use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A screen position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    /// X coordinate (screen coordinates).
    pub x: f64,
    /// Y coordinate (screen coordinates).
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Button {
    /// Left mouse button (Button 1).
    Left,
    /// Right mouse button (Button 2).
    Right,
    /// Middle mouse button (Button 3).
    Middle,
    /// Unknown or unsupported button.
    Unknown(u8),
}

impl Button {
    /// Get the button number (1-indexed).
    pub fn number(&self) -> u8 {
        match self {
            Button::Left => 1,
            Button::Right => 2,
            Button::Middle => 3,
            Button::Unknown(n) => *n,
        }
    }

    /// Create a Button from a number (1-indexed).
    pub fn from_number(n: u8) -> Self {
        match n {
            1 => Button::Left,
            2 => Button::Right,
            3 => Button::Middle,
            _ => Button::Unknown(n),
        }
    }
}

/// What happened in a raw OS input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RawEventKind {
    /// A button went down.
    Pressed(Button),
    /// A button went up.
    Released(Button),
    /// The pointer moved (with or without buttons held).
    Moved,
}

/// One event as observed by the hook capture layer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawEvent {
    /// Event kind.
    pub kind: RawEventKind,
    /// Pointer position when the event occurred.
    pub point: Point,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl RawEvent {
    fn new(kind: RawEventKind, x: f64, y: f64) -> Self {
        Self {
            kind,
            point: Point::new(x, y),
            timestamp_ms: now_ms(),
        }
    }

    /// Create a button pressed event stamped with the current time.
    pub fn pressed(button: Button, x: f64, y: f64) -> Self {
        Self::new(RawEventKind::Pressed(button), x, y)
    }

    /// Create a button released event stamped with the current time.
    pub fn released(button: Button, x: f64, y: f64) -> Self {
        Self::new(RawEventKind::Released(button), x, y)
    }

    /// Create a pointer moved event stamped with the current time.
    pub fn moved(x: f64, y: f64) -> Self {
        Self::new(RawEventKind::Moved, x, y)
    }

    /// Replace the timestamp.
    pub fn at(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Check if this event changes button state.
    pub fn is_button(&self) -> bool {
        matches!(
            self.kind,
            RawEventKind::Pressed(_) | RawEventKind::Released(_)
        )
    }
}

/// Left/right button state pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ButtonStates {
    /// Left button held.
    pub left: bool,
    /// Right button held.
    pub right: bool,
}

/// A coalesced pointer position delivered at most once per batch interval.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PositionSample {
    /// X coordinate (screen coordinates).
    pub x: f64,
    /// Y coordinate (screen coordinates).
    pub y: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Button state, present only when the sample came from a button transition.
    pub buttons: Option<ButtonStates>,
}

/// A single button state change. Never coalesced or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ButtonTransition {
    /// Left button held after the transition.
    pub left_down: bool,
    /// Right button held after the transition.
    pub right_down: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}
