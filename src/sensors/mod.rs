//! Sensors module - reading and decoding RuuviTag advertisements

pub mod bluetooth;
pub mod ruuvi;
