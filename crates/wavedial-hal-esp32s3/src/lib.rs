//! ESP32-S3 hardware bindings for wavedial: the PCNT-backed rotary dial,
//! the flash-backed selection store, and the I2S MP3 output pipeline.
#![no_std]

pub mod audio;
pub mod input;
pub mod storage;
