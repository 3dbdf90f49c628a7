//! # Data-Notification Decoding
//!
//! The meter pushes an unsolicited `data-notification` APDU:
//!
//! ```text
//! 0F | long-invoke-id-and-priority (4) | date-time (0C + 12 bytes, or 00) | notification-body (Data)
//! ```
//!
//! The body is a structure that alternates OBIS octet strings, values and
//! scaler-unit pairs. [`decode`] flattens it depth first and pairs every
//! registry OBIS code with the node that follows it.

use crate::constants::{APDU_ACCEPTED_PREFIX, COSEM_DATE_TIME_LENGTH, DLMS_DATA_NOTIFICATION};
use crate::dlms::axdr::{parse_data, Data};
use crate::dlms::obis::{lookup, ObisCode};
use crate::reading::{Quantity, Reading};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::debug;
use nom::bytes::complete::{tag, take};
use nom::number::complete::{be_u32, be_u8};
use nom::IResult;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Not a data-notification: tag 0x{0:02X}")]
    UnexpectedTag(u8),

    #[error("Malformed A-XDR data at offset {offset}")]
    Malformed { offset: usize },

    #[error("APDU truncated at offset {offset}")]
    Truncated { offset: usize },
}

/// Parsed `data-notification` APDU.
#[derive(Debug, Clone, PartialEq)]
pub struct DataNotification {
    pub invoke_id: u32,
    /// Raw COSEM date-time, absent when the meter sends a zero length
    pub date_time: Option<[u8; COSEM_DATE_TIME_LENGTH]>,
    pub body: Data,
}

impl DataNotification {
    pub fn meter_time(&self) -> Option<NaiveDateTime> {
        self.date_time.as_ref().and_then(cosem_date_time)
    }
}

/// One registry quantity found in the notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub obis: ObisCode,
    pub quantity: Quantity,
    /// Raw big-endian bytes of the value node, read as unsigned
    pub value: u64,
}

/// Result of decoding one accepted APDU.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedApdu {
    pub invoke_id: u32,
    pub meter_time: Option<NaiveDateTime>,
    /// Registry quantities in document order
    pub fields: Vec<Field>,
    /// Active power import and export values in encounter order
    pub momentary: Vec<u64>,
}

/// Decodes a decrypted APDU.
///
/// Returns `Ok(None)` when the APDU is not a high-priority data-notification;
/// such responses are skipped without error.
pub fn decode(apdu: &[u8]) -> Result<Option<DecodedApdu>, DecodeError> {
    if !apdu.starts_with(&APDU_ACCEPTED_PREFIX) {
        debug!(
            "skipping APDU with prefix {:02X?}",
            &apdu[..apdu.len().min(APDU_ACCEPTED_PREFIX.len())]
        );
        return Ok(None);
    }

    let notification = parse_notification(apdu)?;
    let (fields, momentary) = extract_fields(&notification.body);

    Ok(Some(DecodedApdu {
        invoke_id: notification.invoke_id,
        meter_time: notification.meter_time(),
        fields,
        momentary,
    }))
}

/// Parses the notification envelope and its body.
pub fn parse_notification(apdu: &[u8]) -> Result<DataNotification, DecodeError> {
    match apdu.first() {
        Some(&DLMS_DATA_NOTIFICATION) => {}
        Some(&other) => return Err(DecodeError::UnexpectedTag(other)),
        None => return Err(DecodeError::Truncated { offset: 0 }),
    }

    let (rest, notification) = data_notification(apdu).map_err(|err| to_decode_error(apdu, err))?;
    if !rest.is_empty() {
        debug!("{} bytes after notification body ignored", rest.len());
    }
    Ok(notification)
}

fn data_notification(input: &[u8]) -> IResult<&[u8], DataNotification> {
    let (input, _) = tag(&[DLMS_DATA_NOTIFICATION][..])(input)?;
    let (input, invoke_id) = be_u32(input)?;
    let (input, date_time) = optional_date_time(input)?;
    let (input, body) = parse_data(input)?;
    Ok((
        input,
        DataNotification {
            invoke_id,
            date_time,
            body,
        },
    ))
}

fn optional_date_time(input: &[u8]) -> IResult<&[u8], Option<[u8; COSEM_DATE_TIME_LENGTH]>> {
    let (input, len) = be_u8(input)?;
    if len == 0 {
        return Ok((input, None));
    }
    let (input, bytes) = take(len as usize)(input)?;
    let date_time = <[u8; COSEM_DATE_TIME_LENGTH]>::try_from(bytes).ok();
    Ok((input, date_time))
}

fn to_decode_error(apdu: &[u8], err: nom::Err<nom::error::Error<&[u8]>>) -> DecodeError {
    match err {
        nom::Err::Incomplete(_) => DecodeError::Truncated { offset: apdu.len() },
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = apdu.len() - e.input.len();
            if e.code == nom::error::ErrorKind::Eof {
                DecodeError::Truncated { offset }
            } else {
                DecodeError::Malformed { offset }
            }
        }
    }
}

/// Pairs each registry OBIS code with the integer node that follows it.
pub fn extract_fields(body: &Data) -> (Vec<Field>, Vec<u64>) {
    let nodes = body.flatten();
    let mut fields = Vec::new();
    let mut momentary = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        let Some((obis, quantity)) = node.as_octet_string().and_then(lookup) else {
            continue;
        };
        let Some(value) = nodes.get(i + 1).and_then(|next| next.unsigned_value()) else {
            debug!("{obis} is not followed by an integer value");
            continue;
        };
        if quantity.is_momentary_power() {
            momentary.push(value);
        }
        fields.push(Field {
            obis,
            quantity,
            value,
        });
    }

    (fields, momentary)
}

/// Converts a COSEM date-time. Unspecified fields (0xFF) and invalid dates
/// yield `None`.
pub fn cosem_date_time(bytes: &[u8; COSEM_DATE_TIME_LENGTH]) -> Option<NaiveDateTime> {
    let year = u16::from_be_bytes([bytes[0], bytes[1]]);
    let [month, day, hour, minute, second] = [bytes[2], bytes[3], bytes[5], bytes[6], bytes[7]];
    if year == 0xFFFF || [month, day, hour, minute, second].contains(&0xFF) {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
        hour as u32,
        minute as u32,
        second as u32,
    )
}

/// Converts to a COSEM date-time with unspecified deviation.
pub fn encode_cosem_date_time(time: &NaiveDateTime) -> [u8; COSEM_DATE_TIME_LENGTH] {
    let year = (time.year() as u16).to_be_bytes();
    [
        year[0],
        year[1],
        time.month() as u8,
        time.day() as u8,
        time.weekday().number_from_monday() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        0x00,
        0x80,
        0x00,
        0x00,
    ]
}

/// Scaler and unit the meter reports next to each register.
fn scaler_unit(quantity: Quantity) -> (i8, u8) {
    match quantity {
        Quantity::EnergyImport | Quantity::EnergyExport => (0, 30),
        Quantity::PowerImport | Quantity::PowerExport => (0, 27),
        Quantity::VoltageL1 | Quantity::VoltageL2 | Quantity::VoltageL3 => (-1, 35),
        Quantity::CurrentL1 | Quantity::CurrentL2 | Quantity::CurrentL3 => (-2, 33),
        Quantity::PowerFactor => (-3, 255),
    }
}

fn register_value(quantity: Quantity, value: f64) -> Data {
    let raw = (value / quantity.scale()).round();
    if quantity.is_integral() {
        Data::DoubleLongUnsigned(raw as u32)
    } else {
        Data::LongUnsigned(raw as u16)
    }
}

/// Builds the notification a meter would push for `reading`, in the register
/// order of the customer interface. Quantities the reading lacks are left out.
pub fn build_notification(reading: &Reading, invoke_id: u32, meter_number: &str) -> DataNotification {
    let date_time = reading.meter_time.as_ref().map(encode_cosem_date_time);
    let mut items = Vec::new();
    if let Some(date_time) = date_time {
        items.push(Data::OctetString(date_time.to_vec()));
    }
    for quantity in Quantity::ALL {
        let Some(value) = reading.get(quantity) else {
            continue;
        };
        let (scaler, unit) = scaler_unit(quantity);
        items.push(Data::OctetString(quantity.obis().0.to_vec()));
        items.push(register_value(quantity, value));
        items.push(Data::Structure(vec![Data::Integer(scaler), Data::Enum(unit)]));
    }
    items.push(Data::OctetString(meter_number.as_bytes().to_vec()));

    DataNotification {
        invoke_id,
        date_time,
        body: Data::Structure(items),
    }
}

/// Encodes a notification into APDU bytes.
pub fn encode_notification(notification: &DataNotification) -> Vec<u8> {
    let mut out = vec![DLMS_DATA_NOTIFICATION];
    out.extend_from_slice(&notification.invoke_id.to_be_bytes());
    match &notification.date_time {
        Some(date_time) => {
            out.push(COSEM_DATE_TIME_LENGTH as u8);
            out.extend_from_slice(date_time);
        }
        None => out.push(0x00),
    }
    notification.body.encode(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification_with(body: &[u8]) -> Vec<u8> {
        let mut apdu = vec![0x0F, 0x80, 0x00, 0x00, 0x01, 0x00];
        apdu.extend_from_slice(body);
        apdu
    }

    #[test]
    fn test_gate_skips_other_prefixes() {
        assert_eq!(decode(&[0x0F, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00]), Ok(None));
        assert_eq!(decode(&[0xC4, 0x01]), Ok(None));
        assert_eq!(decode(&[]), Ok(None));
    }

    #[test]
    fn test_field_after_obis() {
        let apdu = notification_with(&[
            0x02, 0x02, 0x09, 0x06, 0x01, 0x00, 0x20, 0x07, 0x00, 0xFF, 0x12, 0x09, 0x21,
        ]);
        let decoded = decode(&apdu).unwrap().unwrap();
        assert_eq!(decoded.invoke_id, 0x8000_0001);
        assert_eq!(decoded.meter_time, None);
        assert_eq!(decoded.fields.len(), 1);
        assert_eq!(decoded.fields[0].quantity, Quantity::VoltageL1);
        assert_eq!(decoded.fields[0].value, 2337);
        assert!(decoded.momentary.is_empty());
    }

    #[test]
    fn test_non_integer_successor_dropped() {
        // OBIS followed by a nested scaler-unit structure instead of a value
        let apdu = notification_with(&[
            0x02, 0x02, 0x09, 0x06, 0x01, 0x00, 0x20, 0x07, 0x00, 0xFF, 0x02, 0x02, 0x0F, 0xFF,
            0x16, 0x23,
        ]);
        let decoded = decode(&apdu).unwrap().unwrap();
        assert!(decoded.fields.is_empty());
    }

    #[test]
    fn test_unknown_obis_ignored() {
        let apdu = notification_with(&[
            0x02, 0x02, 0x09, 0x06, 0x01, 0x00, 0x63, 0x07, 0x00, 0xFF, 0x12, 0x00, 0x01,
        ]);
        assert!(decode(&apdu).unwrap().unwrap().fields.is_empty());
    }

    #[test]
    fn test_momentary_order() {
        let apdu = notification_with(&[
            0x02, 0x04, 0x09, 0x06, 0x01, 0x00, 0x02, 0x07, 0x00, 0xFF, 0x06, 0x00, 0x00, 0x00,
            0x05, 0x09, 0x06, 0x01, 0x00, 0x01, 0x07, 0x00, 0xFF, 0x06, 0x00, 0x00, 0x01, 0x00,
        ]);
        let decoded = decode(&apdu).unwrap().unwrap();
        assert_eq!(decoded.momentary, vec![5, 256]);
    }

    #[test]
    fn test_truncated_body_is_error() {
        let apdu = notification_with(&[0x02, 0x02, 0x09, 0x06, 0x01, 0x00]);
        assert!(matches!(decode(&apdu), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let apdu = notification_with(&[0x02, 0x01, 0x42]);
        assert!(matches!(decode(&apdu), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_cosem_date_time() {
        let bytes = [0x07, 0xE5, 0x09, 0x1B, 0x01, 0x09, 0x2F, 0x0F, 0x00, 0xFF, 0x88, 0x80];
        let time = cosem_date_time(&bytes).unwrap();
        assert_eq!(time.to_string(), "2021-09-27 09:47:15");

        let unspecified = [0xFF; 12];
        assert_eq!(cosem_date_time(&unspecified), None);
    }

    #[test]
    fn test_built_notification_decodes_back() {
        let mut reading = Reading::default();
        reading.set(Quantity::EnergyImport, 12937);
        reading.set(Quantity::VoltageL1, 2337);
        reading.set(Quantity::PowerFactor, 1000);
        reading.meter_time = NaiveDate::from_ymd_opt(2021, 9, 27)
            .and_then(|d| d.and_hms_opt(9, 47, 15));

        let apdu = encode_notification(&build_notification(&reading, 0x8006_870E, "181220000009"));
        assert_eq!(&apdu[..2], &APDU_ACCEPTED_PREFIX);

        let decoded = decode(&apdu).unwrap().unwrap();
        assert_eq!(decoded.meter_time, reading.meter_time);
        let values: Vec<(Quantity, u64)> =
            decoded.fields.iter().map(|f| (f.quantity, f.value)).collect();
        assert_eq!(
            values,
            vec![
                (Quantity::EnergyImport, 12937),
                (Quantity::VoltageL1, 2337),
                (Quantity::PowerFactor, 1000)
            ]
        );
    }

    #[test]
    fn test_parse_notification_rejects_other_tags() {
        assert_eq!(
            parse_notification(&[0xC4, 0x01]),
            Err(DecodeError::UnexpectedTag(0xC4))
        );
    }
}
