//! # DLMS/COSEM Application Layer
//!
//! Everything above the M-Bus link: the security suite that turns the ciphered
//! payload into an APDU ([`security`]), the A-XDR data decoder ([`axdr`]), the
//! OBIS registry ([`obis`]) and the data-notification decoder ([`apdu`]).

pub mod apdu;
pub mod axdr;
pub mod obis;
pub mod security;

pub use apdu::{decode, DataNotification, DecodeError, DecodedApdu, Field};
pub use axdr::{Data, DataTag};
pub use obis::{ObisCode, REGISTRY};
pub use security::{AesKey, DecryptError, Decryptor, SecurityControl};
