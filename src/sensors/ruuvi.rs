//! RuuviTag advertisement decoding
//!
//! Ruuvi sensors broadcast their measurements as manufacturer specific data
//! under company id 0x0499. The first payload byte is the data format.

use serde::Serialize;
use thiserror::Error;

pub const MANUFACTURER_ID: u16 = 0x0499;

const FORMAT_RAWV1: u8 = 3;
const FORMAT_RAWV2: u8 = 5;
const RAWV1_LEN: usize = 14;
const RAWV2_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("unsupported data format {0}")]
    UnsupportedFormat(u8),
    #[error("data format {format} expects {expected} bytes, got {actual}")]
    Length {
        format: u8,
        expected: usize,
        actual: usize,
    },
}

/// One decoded measurement. Unavailable values are left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorReading {
    pub data_format: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// hPa
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<i16>,
    /// mV
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_counter: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_sequence_number: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

/// Decode the manufacturer data payload of a Ruuvi advertisement
pub fn decode(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    let format = *payload.first().ok_or(DecodeError::Empty)?;
    match format {
        FORMAT_RAWV1 => decode_rawv1(payload),
        FORMAT_RAWV2 => decode_rawv2(payload),
        other => Err(DecodeError::UnsupportedFormat(other)),
    }
}

fn check_len(payload: &[u8], format: u8, expected: usize) -> Result<(), DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::Length {
            format,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn u16_at(payload: &[u8], i: usize) -> u16 {
    u16::from_be_bytes([payload[i], payload[i + 1]])
}

fn i16_at(payload: &[u8], i: usize) -> i16 {
    i16::from_be_bytes([payload[i], payload[i + 1]])
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn magnitude(x: i16, y: i16, z: i16) -> f64 {
    let (x, y, z) = (f64::from(x), f64::from(y), f64::from(z));
    (x * x + y * y + z * z).sqrt()
}

fn decode_rawv1(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len(payload, FORMAT_RAWV1, RAWV1_LEN)?;

    let humidity = f64::from(payload[1]) / 2.0;

    let whole = f64::from(payload[2] & 0x7F);
    let fraction = f64::from(payload[3]) / 100.0;
    let temperature = if payload[2] & 0x80 != 0 {
        -(whole + fraction)
    } else {
        whole + fraction
    };

    let pressure = (f64::from(u16_at(payload, 4)) + 50_000.0) / 100.0;

    let (x, y, z) = (i16_at(payload, 6), i16_at(payload, 8), i16_at(payload, 10));

    Ok(SensorReading {
        data_format: FORMAT_RAWV1,
        temperature: Some(round2(temperature)),
        humidity: Some(humidity),
        pressure: Some(round2(pressure)),
        acceleration: Some(magnitude(x, y, z)),
        acceleration_x: Some(x),
        acceleration_y: Some(y),
        acceleration_z: Some(z),
        battery: Some(u16_at(payload, 12)),
        ..Default::default()
    })
}

fn decode_rawv2(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len(payload, FORMAT_RAWV2, RAWV2_LEN)?;

    let temperature = match i16_at(payload, 1) {
        i16::MIN => None,
        raw => Some(round2(f64::from(raw) * 0.005)),
    };

    let humidity = match u16_at(payload, 3) {
        u16::MAX => None,
        raw => Some(round2(f64::from(raw) / 400.0)),
    };

    let pressure = match u16_at(payload, 5) {
        u16::MAX => None,
        raw => Some(round2((f64::from(raw) + 50_000.0) / 100.0)),
    };

    let axis = |i| match i16_at(payload, i) {
        i16::MIN => None,
        raw => Some(raw),
    };
    let (x, y, z) = (axis(7), axis(9), axis(11));
    let acceleration = match (x, y, z) {
        (Some(x), Some(y), Some(z)) => Some(magnitude(x, y, z)),
        _ => None,
    };

    // 11 bits battery above 1.6V, 5 bits tx power in 2dBm steps above -40dBm
    let power_info = u16_at(payload, 13);
    let battery = match power_info >> 5 {
        0x7FF => None,
        raw => Some(raw + 1600),
    };
    let tx_power = match power_info & 0x1F {
        0x1F => None,
        raw => Some(raw as i8 * 2 - 40),
    };

    let movement_counter = match payload[15] {
        u8::MAX => None,
        raw => Some(raw),
    };

    let measurement_sequence_number = match u16_at(payload, 16) {
        u16::MAX => None,
        raw => Some(raw),
    };

    let mac_bytes = &payload[18..24];
    let mac = if mac_bytes.iter().all(|b| *b == 0xFF) {
        None
    } else {
        Some(mac_bytes.iter().map(|b| format!("{:02x}", b)).collect())
    };

    Ok(SensorReading {
        data_format: FORMAT_RAWV2,
        temperature,
        humidity,
        pressure,
        acceleration,
        acceleration_x: x,
        acceleration_y: y,
        acceleration_z: z,
        battery,
        tx_power,
        movement_counter,
        measurement_sequence_number,
        mac,
        rssi: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn close(actual: Option<f64>, expected: f64) -> bool {
        actual.is_some_and(|v| (v - expected).abs() < 0.01)
    }

    #[test]
    fn test_rawv2_valid() {
        let reading = decode(&hex("0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F")).unwrap();
        assert_eq!(reading.data_format, 5);
        assert!(close(reading.temperature, 24.3));
        assert!(close(reading.humidity, 53.49));
        assert!(close(reading.pressure, 1000.44));
        assert_eq!(reading.acceleration_x, Some(4));
        assert_eq!(reading.acceleration_y, Some(-4));
        assert_eq!(reading.acceleration_z, Some(1036));
        assert_eq!(reading.tx_power, Some(4));
        assert_eq!(reading.battery, Some(2977));
        assert_eq!(reading.movement_counter, Some(66));
        assert_eq!(reading.measurement_sequence_number, Some(205));
        assert_eq!(reading.mac.as_deref(), Some("cbb8334c884f"));
    }

    #[test]
    fn test_rawv2_extremes() {
        let reading = decode(&hex("057FFFFFFEFFFE7FFF7FFF7FFFFFDEFEFFFECBB8334C884F")).unwrap();
        assert!(close(reading.temperature, 163.835));
        assert!(close(reading.pressure, 1155.34));
        assert_eq!(reading.acceleration_x, Some(32767));
        assert_eq!(reading.battery, Some(3646));
        assert_eq!(reading.tx_power, Some(20));
        assert_eq!(reading.movement_counter, Some(254));
        assert_eq!(reading.measurement_sequence_number, Some(65534));
    }

    #[test]
    fn test_rawv2_sentinels_are_unavailable() {
        let reading = decode(&hex("058000FFFFFFFF800080008000FFFFFFFFFFFFFFFFFFFFFF")).unwrap();
        assert_eq!(
            reading,
            SensorReading {
                data_format: 5,
                ..Default::default()
            }
        );
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json, serde_json::json!({ "data_format": 5 }));
    }

    #[test]
    fn test_rawv1() {
        let reading = decode(&hex("03291A1ECE1EFC18F94202CA0B53")).unwrap();
        assert_eq!(reading.data_format, 3);
        assert!(close(reading.humidity, 20.5));
        assert!(close(reading.temperature, 26.3));
        assert!(close(reading.pressure, 1027.66));
        assert_eq!(reading.acceleration_x, Some(-1000));
        assert_eq!(reading.acceleration_y, Some(-1726));
        assert_eq!(reading.acceleration_z, Some(714));
        assert_eq!(reading.battery, Some(2899));
        assert!(reading.tx_power.is_none());
    }

    #[test]
    fn test_rawv1_negative_temperature() {
        let reading = decode(&hex("03299A1ECE1EFC18F94202CA0B53")).unwrap();
        assert!(close(reading.temperature, -26.3));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert_eq!(decode(&[4, 0, 0]), Err(DecodeError::UnsupportedFormat(4)));
        assert_eq!(
            decode(&[5, 0x12, 0xFC]),
            Err(DecodeError::Length {
                format: 5,
                expected: 24,
                actual: 3
            })
        );
    }
}
