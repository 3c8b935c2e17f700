//! Heart Rate Protocol
//!
//! Standard Bluetooth Heart Rate Service definitions and the parser for the
//! Heart Rate Measurement characteristic.

use std::time::SystemTime;

use uuid::Uuid;

use crate::domain::models::HeartRateSample;
use crate::error::MonitorError;

/// Standard Heart Rate Service UUID (assigned number 0x180D).
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Heart Rate Measurement characteristic UUID (assigned number 0x2A37).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Name fragments advertised by the supported sensor families. Some straps
/// omit the heart rate service from their scan response, so discovery
/// filters on names rather than advertised services.
pub const SENSOR_NAME_PREFIXES: &[&str] = &["Polar", "H10", "H9", "OH1", "Verity Sense"];

/// Case-insensitive substring match against the sensor allow-list.
pub fn is_supported_sensor_name(name: &str) -> bool {
    let name = name.to_lowercase();
    SENSOR_NAME_PREFIXES
        .iter()
        .any(|prefix| name.contains(&prefix.to_lowercase()))
}

/// Parse a Heart Rate Measurement payload.
///
/// # Payload Structure
///
/// ```text
/// [0]    : Flags
///          bit 0: 1 -> BPM field is u16 little-endian, 0 -> u8
///          bit 3: energy expended field present (u16 little-endian)
///          bit 4: RR intervals present (u16 little-endian each,
///                 repeated until the payload is exhausted)
/// [1..]  : BPM (1 or 2 bytes per flags bit 0)
/// [..]   : Energy expended (2 bytes, only if flags bit 3)
/// [..]   : RR intervals (2 bytes each, only if flags bit 4)
/// ```
///
/// The wire format carries no timestamp; the sample is stamped with its
/// arrival time here. A payload that promises a field and then ends early is
/// malformed, as is an empty one.
pub fn decode_heart_rate(payload: &[u8]) -> Result<HeartRateSample, MonitorError> {
    let malformed = || MonitorError::MalformedPayload(payload.len());

    let flags = *payload.first().ok_or_else(malformed)?;
    let mut offset = 1;

    let bpm = if flags & 0x01 != 0 {
        let bytes = payload.get(offset..offset + 2).ok_or_else(malformed)?;
        offset += 2;
        u16::from_le_bytes([bytes[0], bytes[1]])
    } else {
        let byte = *payload.get(offset).ok_or_else(malformed)?;
        offset += 1;
        u16::from(byte)
    };

    let energy_expended = if flags & 0x08 != 0 {
        let bytes = payload.get(offset..offset + 2).ok_or_else(malformed)?;
        offset += 2;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    } else {
        None
    };

    let rr_intervals = if flags & 0x10 != 0 {
        let mut intervals = Vec::new();
        while offset < payload.len() {
            let bytes = payload.get(offset..offset + 2).ok_or_else(malformed)?;
            intervals.push(u16::from_le_bytes([bytes[0], bytes[1]]));
            offset += 2;
        }
        if intervals.is_empty() {
            None
        } else {
            Some(intervals)
        }
    } else {
        None
    };

    Ok(HeartRateSample {
        bpm,
        captured_at: SystemTime::now(),
        energy_expended,
        rr_intervals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_8bit_bpm_without_optional_fields() {
        let sample = decode_heart_rate(&[0x00, 72]).unwrap();
        assert_eq!(sample.bpm, 72);
        assert_eq!(sample.energy_expended, None);
        assert_eq!(sample.rr_intervals, None);
    }

    #[test]
    fn test_decode_16bit_bpm_little_endian() {
        let sample = decode_heart_rate(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(sample.bpm, 300);
    }

    #[test]
    fn test_16bit_bpm_unaffected_by_trailing_fields() {
        // 16-bit BPM + energy + RR: BPM still comes from exactly bytes 1-2.
        let sample =
            decode_heart_rate(&[0x19, 0x64, 0x00, 0x10, 0x27, 0xE8, 0x03, 0x20, 0x03]).unwrap();
        assert_eq!(sample.bpm, 100);
        assert_eq!(sample.energy_expended, Some(10_000));
        assert_eq!(sample.rr_intervals, Some(vec![1_000, 800]));
    }

    #[test]
    fn test_decode_energy_expended() {
        let sample = decode_heart_rate(&[0x08, 85, 0x34, 0x12]).unwrap();
        assert_eq!(sample.bpm, 85);
        assert_eq!(sample.energy_expended, Some(0x1234));
        assert_eq!(sample.rr_intervals, None);
    }

    #[test]
    fn test_decode_rr_intervals_until_exhaustion() {
        let sample = decode_heart_rate(&[0x10, 90, 0xE8, 0x03, 0x20, 0x03, 0x4C, 0x04]).unwrap();
        assert_eq!(sample.bpm, 90);
        assert_eq!(sample.rr_intervals, Some(vec![1_000, 800, 1_100]));
    }

    #[test]
    fn test_rr_flag_with_no_intervals_yields_none() {
        let sample = decode_heart_rate(&[0x10, 90]).unwrap();
        assert_eq!(sample.rr_intervals, None);
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            decode_heart_rate(&[]),
            Err(MonitorError::MalformedPayload(0))
        ));
    }

    #[test]
    fn test_truncated_fields_rejected() {
        // 16-bit flag with only one BPM byte.
        assert!(decode_heart_rate(&[0x01, 0x48]).is_err());
        // Energy flag with a single trailing byte.
        assert!(decode_heart_rate(&[0x08, 85, 0x34]).is_err());
        // Odd byte left over in the RR region.
        assert!(decode_heart_rate(&[0x10, 90, 0xE8]).is_err());
        // Flags byte alone.
        assert!(decode_heart_rate(&[0x00]).is_err());
    }

    #[test]
    fn test_sensor_name_allow_list() {
        assert!(is_supported_sensor_name("Polar H10 12345678"));
        assert!(is_supported_sensor_name("polar verity sense"));
        assert!(is_supported_sensor_name("OH1 E5F2A1"));
        assert!(!is_supported_sensor_name("Garmin HRM-Pro"));
        assert!(!is_supported_sensor_name(""));
    }
}
