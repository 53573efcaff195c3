//! Input handling.
//!
//! Capture itself (keyboard, mouse, gamepad, camera) happens outside this
//! crate. This module turns a sampled [`InputState`] into the wire-level
//! [`InputVector`] carried by the outbound `action` message.

use sync_shared::{math::Vec3, net::InputVector};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub jump: bool,
    pub fire: bool,
    pub interact: bool,
}

impl InputState {
    /// Wish direction, never longer than one unit so diagonals aren't faster.
    pub fn wish_vector(self) -> Vec3 {
        Vec3::new(self.forward, self.right, self.up).clamp_unit()
    }
}

/// Turns sampled input into the outbound [`InputVector`].
pub fn build_input(input: InputState) -> InputVector {
    InputVector {
        movement: input.wish_vector(),
        yaw: input.yaw,
        pitch: input.pitch.clamp(-std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2),
        jump: input.jump,
        fire: input.fire,
        interact: input.interact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_is_normalized() {
        let v = build_input(InputState {
            forward: 1.0,
            right: 1.0,
            ..Default::default()
        });
        assert!((v.movement.len_sq() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pitch_is_clamped() {
        let v = build_input(InputState {
            pitch: 4.0,
            jump: true,
            ..Default::default()
        });
        assert_eq!(v.pitch, std::f32::consts::FRAC_PI_2);
        assert!(v.jump);
    }
}
