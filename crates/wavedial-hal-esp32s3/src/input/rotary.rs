use embedded_hal::digital::InputPin;

use esp_hal::{
    gpio::Input,
    pcnt::{Pcnt, channel, unit::Unit},
    peripherals::PCNT,
};
use wavedial_core::input::DialInput;

// PCNT glitch filter in APB cycles (80 MHz): ~12.5 us. Hardware caps the
// filter register at 1023.
const PCNT_FILTER_CYCLES: u16 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct DialConfig {
    direction_inverted: bool,
    key_active_low: bool,
    transitions_per_detent: u8,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            direction_inverted: false,
            key_active_low: true,
            // EC-11 style encoders emit a full quadrature cycle per detent.
            transitions_per_detent: 4,
        }
    }
}

impl DialConfig {
    pub const fn with_direction_inverted(mut self, direction_inverted: bool) -> Self {
        self.direction_inverted = direction_inverted;
        self
    }

    pub const fn with_key_active_low(mut self, key_active_low: bool) -> Self {
        self.key_active_low = key_active_low;
        self
    }

    pub const fn with_transitions_per_detent(mut self, transitions_per_detent: u8) -> Self {
        self.transitions_per_detent = transitions_per_detent;
        self
    }
}

/// Rotary dial on the PCNT peripheral: both quadrature channels are counted
/// in hardware, so the 50 ms session poll cadence cannot drop transitions.
/// The key is a plain input pin, externally pulled up.
pub struct RotaryDial<'d, SW> {
    unit: Unit<'d, 0>,
    // The quadrature pins stay owned here so their input configuration
    // outlives the PCNT routing set up in `new`.
    _clk: Input<'d>,
    _dt: Input<'d>,
    sw: SW,
    config: DialConfig,
    base: i32,
}

impl<'d, SW> RotaryDial<'d, SW>
where
    SW: InputPin,
{
    pub fn new(pcnt: PCNT<'d>, clk: Input<'d>, dt: Input<'d>, sw: SW, config: DialConfig) -> Self {
        let pcnt = Pcnt::new(pcnt);
        let unit = pcnt.unit0;
        unit.set_filter(Some(PCNT_FILTER_CYCLES)).unwrap();
        unit.clear();

        // Full x4 decode: each channel counts edges of one signal gated by
        // the other, so one detent accumulates `transitions_per_detent`.
        let ch0 = &unit.channel0;
        ch0.set_ctrl_signal(clk.peripheral_input());
        ch0.set_edge_signal(dt.peripheral_input());
        ch0.set_ctrl_mode(channel::CtrlMode::Reverse, channel::CtrlMode::Keep);
        ch0.set_input_mode(channel::EdgeMode::Increment, channel::EdgeMode::Decrement);

        let ch1 = &unit.channel1;
        ch1.set_ctrl_signal(dt.peripheral_input());
        ch1.set_edge_signal(clk.peripheral_input());
        ch1.set_ctrl_mode(channel::CtrlMode::Reverse, channel::CtrlMode::Keep);
        ch1.set_input_mode(channel::EdgeMode::Decrement, channel::EdgeMode::Increment);

        unit.resume();

        Self {
            unit,
            _clk: clk,
            _dt: dt,
            sw,
            config,
            base: 0,
        }
    }

    // The 16-bit counter is cleared on every baseline resync, which every
    // playback session does at start, so it never gets near wrapping.
    fn detents(&self) -> i32 {
        let transitions = self.unit.value() as i32;
        let per_detent = self.config.transitions_per_detent.max(1) as i32;
        let detents = transitions / per_detent;
        if self.config.direction_inverted {
            -detents
        } else {
            detents
        }
    }
}

impl<SW> DialInput for RotaryDial<'_, SW>
where
    SW: InputPin,
{
    type Error = SW::Error;

    fn position(&mut self) -> Result<i32, Self::Error> {
        Ok(self.base.wrapping_add(self.detents()))
    }

    fn set_position(&mut self, position: i32) {
        self.unit.clear();
        self.base = position;
    }

    fn key_pressed(&mut self) -> Result<bool, Self::Error> {
        let level_high = self.sw.is_high()?;
        Ok(if self.config.key_active_low {
            !level_high
        } else {
            level_high
        })
    }
}
