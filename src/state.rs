//! Atomic button mask tracking.
//!
//! Each engine instance owns one [`ButtonMask`]; the hook callback updates it
//! on button transitions and reads it on every move to decide whether the
//! sample belongs to a gesture. Only atomic operations are used so the hook
//! never waits on another thread.

use crate::event::{Button, ButtonStates};
use std::sync::atomic::{AtomicU32, Ordering};

/// Left mouse button mask.
pub const MASK_BUTTON1: u32 = 1 << 8;
/// Right mouse button mask.
pub const MASK_BUTTON2: u32 = 1 << 9;
/// Middle mouse button mask.
pub const MASK_BUTTON3: u32 = 1 << 10;

/// All button masks combined.
pub const MASK_ALL_BUTTONS: u32 = MASK_BUTTON1 | MASK_BUTTON2 | MASK_BUTTON3;

/// Get the mask for a button. Unknown buttons are not tracked.
pub fn button_to_mask(button: Button) -> u32 {
    match button {
        Button::Left => MASK_BUTTON1,
        Button::Right => MASK_BUTTON2,
        Button::Middle => MASK_BUTTON3,
        Button::Unknown(_) => 0,
    }
}

/// Button mask shared between the hook callback and readers.
#[derive(Debug, Default)]
pub struct ButtonMask {
    mask: AtomicU32,
}

impl ButtonMask {
    /// Create an empty mask.
    pub const fn new() -> Self {
        Self {
            mask: AtomicU32::new(0),
        }
    }

    /// Set bits, returning the previous mask.
    #[inline]
    pub fn set(&self, mask: u32) -> u32 {
        self.mask.fetch_or(mask, Ordering::SeqCst)
    }

    /// Clear bits, returning the previous mask.
    #[inline]
    pub fn unset(&self, mask: u32) -> u32 {
        self.mask.fetch_and(!mask, Ordering::SeqCst)
    }

    /// Get the current mask value.
    #[inline]
    pub fn get(&self) -> u32 {
        self.mask.load(Ordering::SeqCst)
    }

    /// Reset the mask to zero.
    #[inline]
    pub fn reset(&self) {
        self.mask.store(0, Ordering::SeqCst);
    }

    /// Check if any mouse button is currently held.
    #[inline]
    pub fn is_button_held(&self) -> bool {
        (self.get() & MASK_ALL_BUTTONS) != 0
    }

    /// Check if a specific button is held.
    #[inline]
    pub fn is_pressed(&self, button: Button) -> bool {
        let mask = button_to_mask(button);
        mask != 0 && (self.get() & mask) != 0
    }

    /// Left/right state as delivered to consumers.
    pub fn states(&self) -> ButtonStates {
        let mask = self.get();
        ButtonStates {
            left: mask & MASK_BUTTON1 != 0,
            right: mask & MASK_BUTTON2 != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_mask_operations() {
        let mask = ButtonMask::new();
        assert!(!mask.is_button_held());

        mask.set(MASK_BUTTON1);
        assert!(mask.is_button_held());
        assert!(mask.is_pressed(Button::Left));
        assert!(!mask.is_pressed(Button::Right));

        mask.set(MASK_BUTTON2);
        assert_eq!(
            mask.states(),
            ButtonStates {
                left: true,
                right: true
            }
        );

        mask.unset(MASK_BUTTON1);
        assert!(!mask.is_pressed(Button::Left));
        assert!(mask.is_button_held());

        mask.unset(MASK_BUTTON2);
        assert!(!mask.is_button_held());
    }

    #[test]
    fn test_set_reports_previous_mask() {
        let mask = ButtonMask::new();
        assert_eq!(mask.set(MASK_BUTTON1) & MASK_BUTTON1, 0);
        assert_ne!(mask.set(MASK_BUTTON1) & MASK_BUTTON1, 0);
        mask.reset();
        assert_eq!(mask.get(), 0);
    }

    #[test]
    fn test_unknown_buttons_are_untracked() {
        assert_eq!(button_to_mask(Button::Unknown(7)), 0);
        let mask = ButtonMask::new();
        assert!(!mask.is_pressed(Button::Unknown(7)));
    }
}
