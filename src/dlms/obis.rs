//! OBIS codes and the registry of quantities the meter pushes.

use crate::reading::Quantity;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// 6-byte OBIS identifier `A.B.C.D.E.F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisCode(pub [u8; 6]);

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        ObisCode([a, b, c, d, e, f])
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(ObisCode)
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}.{b}.{c}.{d}.{e}.{g}")
    }
}

/// Registry of the quantities decoded from the push notification.
pub static REGISTRY: Lazy<HashMap<ObisCode, Quantity>> = Lazy::new(|| {
    Quantity::ALL
        .iter()
        .map(|quantity| (quantity.obis(), *quantity))
        .collect()
});

/// Looks up a 6-byte octet string in the registry.
pub fn lookup(bytes: &[u8]) -> Option<(ObisCode, Quantity)> {
    let code = ObisCode::from_slice(bytes)?;
    REGISTRY.get(&code).map(|quantity| (code, *quantity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_eleven_entries() {
        assert_eq!(REGISTRY.len(), 11);
    }

    #[test]
    fn test_display() {
        let code = ObisCode::new(1, 0, 32, 7, 0, 255);
        assert_eq!(code.to_string(), "1.0.32.7.0.255");
    }

    #[test]
    fn test_lookup() {
        let (code, quantity) = lookup(&[0x01, 0x00, 0x01, 0x08, 0x00, 0xFF]).unwrap();
        assert_eq!(quantity, Quantity::EnergyImport);
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));

        assert!(lookup(&[0x01, 0x00, 0x01, 0x08, 0x00]).is_none());
        // Date-time octet strings share the length of other keys but never match.
        assert!(lookup(&[0x07, 0xE5, 0x09, 0x1B, 0x01, 0x09]).is_none());
    }
}
