//! # Measurement Mapping
//!
//! Turns the decoded registry fields of one cycle into a [`Reading`]: raw
//! integers scaled into physical units, plus the derived net active power.
//!
//! A reading is sparse. Quantities the notification did not carry stay `None`,
//! so values never leak from one cycle into the next.

use crate::dlms::apdu::{DecodedApdu, Field};
use crate::dlms::obis::ObisCode;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The quantities of the customer interface push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    EnergyImport,
    EnergyExport,
    PowerImport,
    PowerExport,
    VoltageL1,
    VoltageL2,
    VoltageL3,
    CurrentL1,
    CurrentL2,
    CurrentL3,
    PowerFactor,
}

impl Quantity {
    pub const ALL: [Quantity; 11] = [
        Quantity::EnergyImport,
        Quantity::EnergyExport,
        Quantity::PowerImport,
        Quantity::PowerExport,
        Quantity::VoltageL1,
        Quantity::VoltageL2,
        Quantity::VoltageL3,
        Quantity::CurrentL1,
        Quantity::CurrentL2,
        Quantity::CurrentL3,
        Quantity::PowerFactor,
    ];

    pub fn obis(&self) -> ObisCode {
        match self {
            Quantity::EnergyImport => ObisCode::new(1, 0, 1, 8, 0, 255),
            Quantity::EnergyExport => ObisCode::new(1, 0, 2, 8, 0, 255),
            Quantity::PowerImport => ObisCode::new(1, 0, 1, 7, 0, 255),
            Quantity::PowerExport => ObisCode::new(1, 0, 2, 7, 0, 255),
            Quantity::VoltageL1 => ObisCode::new(1, 0, 32, 7, 0, 255),
            Quantity::VoltageL2 => ObisCode::new(1, 0, 52, 7, 0, 255),
            Quantity::VoltageL3 => ObisCode::new(1, 0, 72, 7, 0, 255),
            Quantity::CurrentL1 => ObisCode::new(1, 0, 31, 7, 0, 255),
            Quantity::CurrentL2 => ObisCode::new(1, 0, 51, 7, 0, 255),
            Quantity::CurrentL3 => ObisCode::new(1, 0, 71, 7, 0, 255),
            Quantity::PowerFactor => ObisCode::new(1, 0, 13, 7, 0, 255),
        }
    }

    /// Name used by the meter operator's documentation.
    pub fn name(&self) -> &'static str {
        match self {
            Quantity::EnergyImport => "WirkenergieP",
            Quantity::EnergyExport => "WirkenergieN",
            Quantity::PowerImport => "MomentanleistungP",
            Quantity::PowerExport => "MomentanleistungN",
            Quantity::VoltageL1 => "SpannungL1",
            Quantity::VoltageL2 => "SpannungL2",
            Quantity::VoltageL3 => "SpannungL3",
            Quantity::CurrentL1 => "StromL1",
            Quantity::CurrentL2 => "StromL2",
            Quantity::CurrentL3 => "StromL3",
            Quantity::PowerFactor => "Leistungsfaktor",
        }
    }

    /// Label in the console table.
    pub fn label(&self) -> &'static str {
        match self {
            Quantity::EnergyImport => "Wirkenergie Bezug [Wh]:",
            Quantity::EnergyExport => "Wirkenergie Lieferung [Wh]:",
            Quantity::PowerImport => "Wirkleistung Bezug [W]:",
            Quantity::PowerExport => "Wirkleistung Lieferung [W]:",
            Quantity::VoltageL1 => "Spannung L1 (V):",
            Quantity::VoltageL2 => "Spannung L2 (V):",
            Quantity::VoltageL3 => "Spannung L3 (V):",
            Quantity::CurrentL1 => "Strom L1 (A):",
            Quantity::CurrentL2 => "Strom L2 (A):",
            Quantity::CurrentL3 => "Strom L3 (A):",
            Quantity::PowerFactor => "Leistungsfaktor:",
        }
    }

    /// Factor applied to the raw register value.
    pub fn scale(&self) -> f64 {
        match self {
            Quantity::VoltageL1 | Quantity::VoltageL2 | Quantity::VoltageL3 => 0.1,
            Quantity::CurrentL1 | Quantity::CurrentL2 | Quantity::CurrentL3 => 0.01,
            Quantity::PowerFactor => 0.001,
            _ => 1.0,
        }
    }

    /// Energy and power registers are kept as integers.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Quantity::EnergyImport
                | Quantity::EnergyExport
                | Quantity::PowerImport
                | Quantity::PowerExport
        )
    }

    /// Import and export active power, the inputs of the net power.
    pub fn is_momentary_power(&self) -> bool {
        matches!(self, Quantity::PowerImport | Quantity::PowerExport)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical values of one cycle. Serialized with the column names of the
/// `smartmeter` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "wirkenergie_p")]
    pub energy_import: Option<u64>,
    #[serde(rename = "wirkenergie_n")]
    pub energy_export: Option<u64>,
    #[serde(rename = "momentanleistung_p")]
    pub power_import: Option<u64>,
    #[serde(rename = "momentanleistung_n")]
    pub power_export: Option<u64>,
    #[serde(rename = "spannung_l1")]
    pub voltage_l1: Option<f64>,
    #[serde(rename = "spannung_l2")]
    pub voltage_l2: Option<f64>,
    #[serde(rename = "spannung_l3")]
    pub voltage_l3: Option<f64>,
    #[serde(rename = "strom_l1")]
    pub current_l1: Option<f64>,
    #[serde(rename = "strom_l2")]
    pub current_l2: Option<f64>,
    #[serde(rename = "strom_l3")]
    pub current_l3: Option<f64>,
    #[serde(rename = "leistungsfaktor")]
    pub power_factor: Option<f64>,
    /// Import minus export active power (W), when both were captured
    #[serde(rename = "momentanleistung")]
    pub net_power: Option<i64>,
    /// Timestamp of the notification as sent by the meter
    pub meter_time: Option<NaiveDateTime>,
}

impl Reading {
    /// Stores one raw register value, scaled. Later writes win.
    pub fn set(&mut self, quantity: Quantity, raw: u64) {
        let scaled = raw as f64 * quantity.scale();
        match quantity {
            Quantity::EnergyImport => self.energy_import = Some(raw),
            Quantity::EnergyExport => self.energy_export = Some(raw),
            Quantity::PowerImport => self.power_import = Some(raw),
            Quantity::PowerExport => self.power_export = Some(raw),
            Quantity::VoltageL1 => self.voltage_l1 = Some(scaled),
            Quantity::VoltageL2 => self.voltage_l2 = Some(scaled),
            Quantity::VoltageL3 => self.voltage_l3 = Some(scaled),
            Quantity::CurrentL1 => self.current_l1 = Some(scaled),
            Quantity::CurrentL2 => self.current_l2 = Some(scaled),
            Quantity::CurrentL3 => self.current_l3 = Some(scaled),
            Quantity::PowerFactor => self.power_factor = Some(scaled),
        }
    }

    /// Value of `quantity` in physical units.
    pub fn get(&self, quantity: Quantity) -> Option<f64> {
        match quantity {
            Quantity::EnergyImport => self.energy_import.map(|v| v as f64),
            Quantity::EnergyExport => self.energy_export.map(|v| v as f64),
            Quantity::PowerImport => self.power_import.map(|v| v as f64),
            Quantity::PowerExport => self.power_export.map(|v| v as f64),
            Quantity::VoltageL1 => self.voltage_l1,
            Quantity::VoltageL2 => self.voltage_l2,
            Quantity::VoltageL3 => self.voltage_l3,
            Quantity::CurrentL1 => self.current_l1,
            Quantity::CurrentL2 => self.current_l2,
            Quantity::CurrentL3 => self.current_l3,
            Quantity::PowerFactor => self.power_factor,
        }
    }

    /// Quantities this cycle did not populate.
    pub fn missing(&self) -> Vec<Quantity> {
        Quantity::ALL
            .iter()
            .copied()
            .filter(|q| self.get(*q).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Maps registry fields into a reading.
///
/// The net power is only derived when exactly two momentary power values were
/// captured, in the order import, export.
pub fn map(fields: &[Field], momentary: &[u64]) -> Reading {
    let mut reading = Reading::default();
    for field in fields {
        reading.set(field.quantity, field.value);
    }
    if let [import, export] = momentary {
        reading.net_power = net_power(*import, *export);
    }
    reading
}

/// Maps a decoded APDU, keeping the meter timestamp.
pub fn from_decoded(decoded: &DecodedApdu) -> Reading {
    let mut reading = map(&decoded.fields, &decoded.momentary);
    reading.meter_time = decoded.meter_time;
    reading
}

fn net_power(import: u64, export: u64) -> Option<i64> {
    i64::try_from(import)
        .ok()?
        .checked_sub(i64::try_from(export).ok()?)
}

/// Console order of the quantities.
const TABLE_ORDER: [Quantity; 10] = [
    Quantity::VoltageL1,
    Quantity::VoltageL2,
    Quantity::VoltageL3,
    Quantity::CurrentL1,
    Quantity::CurrentL2,
    Quantity::CurrentL3,
    Quantity::PowerImport,
    Quantity::PowerExport,
    Quantity::EnergyImport,
    Quantity::EnergyExport,
];

fn format_value(quantity: Quantity, value: Option<f64>) -> String {
    match value {
        None => "-".to_string(),
        Some(v) if quantity.is_integral() => format!("{}", v as u64),
        Some(v) => format!("{}", (v * 100.0).round() / 100.0),
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n\t\t*** KUNDENSCHNITTSTELLE ***\n")?;
        writeln!(f, "OBIS Code\tBezeichnung\t\t\t Wert")?;
        match self.meter_time {
            Some(time) => writeln!(f, "{}", time.format("%d.%m.%Y %H:%M:%S"))?,
            None => writeln!(f, "--.--.---- --:--:--")?,
        }
        for quantity in TABLE_ORDER {
            writeln!(
                f,
                "{}\t{}\t\t {}",
                quantity.obis(),
                quantity.label(),
                format_value(quantity, self.get(quantity))
            )?;
        }
        writeln!(
            f,
            "-------------\t{}\t\t {}",
            Quantity::PowerFactor.label(),
            self.power_factor
                .map(|v| format!("{}", (v * 1000.0).round() / 1000.0))
                .unwrap_or_else(|| "-".to_string())
        )?;
        let total = match (self.power_import, self.power_export) {
            (Some(import), Some(export)) => net_power(import, export),
            _ => self.net_power,
        };
        write!(
            f,
            "-------------\tWirkleistunggesamt [W]:\t\t {}",
            total.map_or_else(|| "-".to_string(), |v| v.to_string())
        )
    }
}
