//! # smartmeter-rs - Reader for the EVN Smart Meter Customer Interface
//!
//! The smartmeter-rs crate reads the encrypted push telegrams that EVN (Netz NÖ)
//! smart meters send on their M-Bus customer interface, decrypts them and turns
//! them into physical measurements: active energy, active power, voltage, current
//! and power factor.
//!
//! ## Features
//!
//! - Read fixed-size windows from the serial customer interface (8N1)
//! - Validate and reassemble the M-Bus long frames of one telegram
//! - Decrypt the DLMS `general-glo-ciphering` payload with AES-128-GCM
//! - Decode the COSEM data-notification and map the OBIS registers
//! - Persist every reading through a pluggable sink
//! - Run unattended with recovery from link errors and a link-health deadline
//!
//! ## Usage
//!
//! ```rust
//! use smartmeter_rs::{decode_window, AesKey, Decryptor, RawWindow};
//! use smartmeter_rs::util::hex::decode_hex;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let capture = "68FAFA6853FF000167DB084B464D675000000981F8200000002388D5AB4F97515AAFC6B88D2F85DAA7A0E3C0C40D004535C397C9D037AB7DBDA329107615444894A1A0DD7E85F02D496CECD3FF46AF5FB3C9229CFE8F3EE4606AB2E1F409F36AAD2E50900A4396FC6C2E083F373233A69616950758BFC7D63A9E9B6E99E21B2CBC2B934772CA51FD4D69830711CAB1F8CFF25F0A329337CBA51904F0CAED88D61968743C8454BA922EB00038182C22FE316D16F2A9F544D6F75D51A4E92A1C4EF8AB19A2B7FEAA32D0726C0ED80229AE6C0F7621A4209251ACE2B2BC66FF0327A653BB686C756BE033C7A281F1D2A7E1FA31C3983E15F8FD16CC5787E6F517166814146853FF110167419A3CFDA44BE438C96F0E38BF83D98316";
//! let window = RawWindow::from(decode_hex(capture)?);
//! let decryptor = Decryptor::new(AesKey::from_hex("36C66639E48A8CA4D6BC8B282A793BBB")?);
//!
//! let reading = decode_window(&window, &decryptor)?.expect("data-notification");
//! assert_eq!(reading.energy_import, Some(12937));
//! println!("{reading}");
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod constants;
pub mod dlms;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod reading;
pub mod sink;
pub mod util;

pub use crate::error::MeterError;
pub use crate::logging::{init_logger, init_logger_to_file, log_info};

pub use acquisition::{AcquisitionLoop, CycleOutcome, CycleState, LoopSettings};
pub use config::Config;
pub use dlms::{AesKey, DecodedApdu, Decryptor, SecurityControl};
pub use mbus::{FrameEnvelope, MeterLink, RawWindow, SerialConfig, SerialLink};
pub use reading::{Quantity, Reading};
pub use sink::{DiscardSink, JsonLinesSink, ReadingSink};

/// Runs one captured window through split, decrypt, decode and map.
///
/// # Returns
/// `Ok(None)` when the decrypted APDU is not a data-notification.
pub fn decode_window(
    window: &RawWindow,
    decryptor: &Decryptor,
) -> Result<Option<Reading>, MeterError> {
    let envelope = mbus::split(window)?;
    let apdu = decryptor.decrypt(&envelope)?;
    Ok(dlms::decode(&apdu)?.map(|decoded| reading::from_decoded(&decoded)))
}

/// Builds the window a meter would send for `reading`.
///
/// The plaintext is laid out like the customer interface notification and
/// sealed with `decryptor` under `control`.
pub fn simulate_window(
    reading: &Reading,
    decryptor: &Decryptor,
    system_title: &[u8; 8],
    frame_counter: u32,
    control: SecurityControl,
) -> Result<RawWindow, MeterError> {
    let notification = dlms::apdu::build_notification(reading, 0x8000_0001, "000000000000");
    let plaintext = dlms::apdu::encode_notification(&notification);
    let counter = frame_counter.to_be_bytes();
    let ciphertext = decryptor.seal(&plaintext, system_title, &counter, control)?;
    Ok(mbus::envelope::assemble(
        system_title,
        &counter,
        control,
        &ciphertext,
    ))
}
