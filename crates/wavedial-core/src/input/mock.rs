use super::DialInput;

/// Scriptable dial for host tests: a settable absolute position plus a key
/// level script replayed one sample per poll (exhausted script reads as
/// released).
#[derive(Debug, Default)]
pub struct MockDial<'a> {
    position: i32,
    key_script: &'a [bool],
    key_cursor: usize,
    /// Number of times the key was sampled; lets tests assert the key is
    /// skipped on switch iterations.
    pub key_samples: usize,
}

impl<'a> MockDial<'a> {
    pub const fn new() -> Self {
        Self {
            position: 0,
            key_script: &[],
            key_cursor: 0,
            key_samples: 0,
        }
    }

    pub const fn with_key_script(mut self, key_script: &'a [bool]) -> Self {
        self.key_script = key_script;
        self
    }

    /// Simulate the listener turning the dial to an absolute position.
    pub fn turn_to(&mut self, position: i32) {
        self.position = position;
    }

    pub const fn position_value(&self) -> i32 {
        self.position
    }
}

impl DialInput for MockDial<'_> {
    type Error = core::convert::Infallible;

    fn position(&mut self) -> Result<i32, Self::Error> {
        Ok(self.position)
    }

    fn set_position(&mut self, position: i32) {
        self.position = position;
    }

    fn key_pressed(&mut self) -> Result<bool, Self::Error> {
        self.key_samples += 1;
        let level = self
            .key_script
            .get(self.key_cursor)
            .copied()
            .unwrap_or(false);
        self.key_cursor += 1;
        Ok(level)
    }
}
