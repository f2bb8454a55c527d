//! Input abstraction layer.

/// Polled rotary-dial state: an absolute detent position plus a key level.
///
/// Wraparound to a station index is the caller's job
/// (`position.rem_euclid(len)`); the dial only accumulates detents.
pub trait DialInput {
    type Error;

    /// Accumulated detent position since the last [`set_position`].
    ///
    /// [`set_position`]: DialInput::set_position
    fn position(&mut self) -> Result<i32, Self::Error>;

    /// Overwrite the accumulated position so the next poll compares against
    /// a known baseline.
    fn set_position(&mut self, position: i32);

    /// Key level, `true` while held down.
    fn key_pressed(&mut self) -> Result<bool, Self::Error>;
}

pub mod mock;
