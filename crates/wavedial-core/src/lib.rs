//! Platform-independent control logic for the wavedial internet radio.
//!
//! Everything here is `no_std` and hardware-free: the station catalog, the
//! persisted-selection contract, the dial input contract, the HTTP header
//! skip, and the playback control state machine. The firmware binary and the
//! ESP32-S3 hal crate plug real sockets, flash, and pins into these seams;
//! the unit tests plug in scripted mocks and run on the host.
#![no_std]

pub mod http;
pub mod input;
pub mod selection;
pub mod session;
pub mod station;
