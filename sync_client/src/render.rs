//! Rendering seam.
//!
//! Scene construction lives elsewhere. Whatever draws the world implements
//! [`RenderSink`] and receives one interpolated frame per render tick.

use tracing::debug;

use crate::interp::InterpolatedFrame;

/// Consumer of interpolated frames.
pub trait RenderSink {
    fn present(&mut self, frame: &InterpolatedFrame);
}

/// A no-op sink useful for headless tests.
#[derive(Default)]
pub struct NullRenderer;

impl RenderSink for NullRenderer {
    fn present(&mut self, _frame: &InterpolatedFrame) {}
}

/// Logs the tracked entity's interpolated position every `every` frames.
pub struct TraceRenderer {
    pub track: Option<String>,
    pub every: u64,
    frames: u64,
}

impl TraceRenderer {
    pub fn new(every: u64) -> Self {
        Self {
            track: None,
            every: every.max(1),
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl RenderSink for TraceRenderer {
    fn present(&mut self, frame: &InterpolatedFrame) {
        self.frames += 1;
        if self.frames % self.every != 0 {
            return;
        }
        let Some(id) = self.track.as_deref() else {
            return;
        };
        debug!(
            id,
            render_time = ?frame.render_time,
            x = ?frame.number(id, "x"),
            y = ?frame.number(id, "y"),
            z = ?frame.number(id, "z"),
            entities = frame.len(),
            "Frame"
        );
    }
}

impl<R: RenderSink + ?Sized> RenderSink for Box<R> {
    fn present(&mut self, frame: &InterpolatedFrame) {
        (**self).present(frame)
    }
}
