//! # DLMS Security Suite 0
//!
//! AES-128-GCM decryption of `general-glo-ciphering` APDUs (IEC 62056-5-3).
//!
//! The initialization vector is the 8-byte system title followed by the 4-byte
//! frame counter. The security control byte decides what the ciphertext carries:
//!
//! - `ENCRYPTED | AUTHENTICATED`: ciphertext followed by a 12-byte GCM tag, the
//!   additional authenticated data is the security control byte and the optional
//!   authentication key.
//! - `ENCRYPTED`: ciphertext only. Decryption applies the GCM key stream
//!   (AES-CTR starting at counter block 2) without any integrity check.
//! - neither: the payload is plaintext.
//!
//! ## Usage
//!
//! ```rust
//! use smartmeter_rs::dlms::security::{AesKey, Decryptor, SecurityControl};
//!
//! let key = AesKey::from_hex("36C66639E48A8CA4D6BC8B282A793BBB").unwrap();
//! let decryptor = Decryptor::new(key);
//! let control = SecurityControl::ENCRYPTED | SecurityControl::AUTHENTICATED;
//! let sealed = decryptor.seal(b"\x0F\x80", &[0; 8], &[0, 0, 0, 1], control).unwrap();
//! assert_eq!(sealed.len(), 2 + 12);
//! ```

use crate::constants::{AES_KEY_LENGTH, DLMS_GCM_TAG_LENGTH, DLMS_SYSTEM_TITLE_LENGTH};
use crate::mbus::envelope::FrameEnvelope;
use crate::util::hex::decode_hex;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::BlockEncrypt;
use aes::Aes128;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{AesGcm, Nonce, Tag};
use bitflags::bitflags;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-128-GCM with the 12-byte tag used by DLMS.
type DlmsGcm = AesGcm<Aes128, U12, U12>;

bitflags! {
    /// Security control byte of a ciphered APDU.
    ///
    /// The low nibble holds the security suite id, which is 0 for AES-128-GCM.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SecurityControl: u8 {
        const AUTHENTICATED = 0x10;
        const ENCRYPTED = 0x20;
        const KEY_SET = 0x40;
        const COMPRESSED = 0x80;
    }
}

impl SecurityControl {
    pub fn suite_id(&self) -> u8 {
        self.bits() & 0x0F
    }
}

/// Decryption failures. None of them yields plaintext.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecryptError {
    #[error("GCM tag mismatch")]
    Authentication,

    #[error("Ciphertext of {len} bytes cannot carry a 12-byte tag")]
    MalformedCiphertext { len: usize },

    #[error("Frame is not authenticated (security control 0x{0:02X})")]
    Unauthenticated(u8),

    #[error("Unsupported security control 0x{0:02X}")]
    UnsupportedSecurity(u8),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Pre-shared AES-128 key. Wiped on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesKey {
    key: [u8; AES_KEY_LENGTH],
}

impl AesKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecryptError> {
        if bytes.len() != AES_KEY_LENGTH {
            return Err(DecryptError::InvalidKey(format!(
                "expected {AES_KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; AES_KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(AesKey { key })
    }

    /// Parses 32 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, DecryptError> {
        let mut bytes =
            decode_hex(hex_str.trim()).map_err(|e| DecryptError::InvalidKey(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(<redacted>)")
    }
}

/// Builds the 12-byte GCM initialization vector.
pub fn nonce(system_title: &[u8; DLMS_SYSTEM_TITLE_LENGTH], frame_counter: &[u8; 4]) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[..8].copy_from_slice(system_title);
    iv[8..].copy_from_slice(frame_counter);
    iv
}

/// Decrypts `ciphertext` without an authentication key.
pub fn decrypt(
    ciphertext: &[u8],
    key: &AesKey,
    system_title: &[u8; DLMS_SYSTEM_TITLE_LENGTH],
    frame_counter: &[u8; 4],
    control: SecurityControl,
) -> Result<Vec<u8>, DecryptError> {
    open(ciphertext, key, None, &nonce(system_title, frame_counter), control)
}

/// Encrypts `plaintext` the way a meter would, appending the tag for
/// authenticated frames.
pub fn seal(
    plaintext: &[u8],
    key: &AesKey,
    system_title: &[u8; DLMS_SYSTEM_TITLE_LENGTH],
    frame_counter: &[u8; 4],
    control: SecurityControl,
) -> Result<Vec<u8>, DecryptError> {
    close(plaintext, key, None, &nonce(system_title, frame_counter), control)
}

/// Holds the keys for the lifetime of the acquisition loop.
///
/// Frames sent with security control `0x20` (what EVN meters push) carry no
/// GCM tag, so a flipped ciphertext bit decrypts to different plaintext
/// instead of failing. Tampering is only detected for tagged `0x30` frames;
/// enable [`Decryptor::require_authentication`] to reject everything else.
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: AesKey,
    auth_key: Option<AesKey>,
    require_authentication: bool,
}

impl Decryptor {
    pub fn new(key: AesKey) -> Self {
        Decryptor {
            key,
            auth_key: None,
            require_authentication: false,
        }
    }

    /// Authentication key mixed into the additional authenticated data.
    pub fn with_authentication_key(mut self, auth_key: AesKey) -> Self {
        self.auth_key = Some(auth_key);
        self
    }

    /// Rejects frames that carry no GCM tag, with
    /// [`DecryptError::Unauthenticated`].
    pub fn require_authentication(mut self, required: bool) -> Self {
        self.require_authentication = required;
        self
    }

    pub fn decrypt(&self, envelope: &FrameEnvelope) -> Result<Vec<u8>, DecryptError> {
        let control = envelope.security_control;
        if self.require_authentication && !control.contains(SecurityControl::AUTHENTICATED) {
            return Err(DecryptError::Unauthenticated(control.bits()));
        }
        open(
            &envelope.ciphertext,
            &self.key,
            self.auth_key.as_ref(),
            &envelope.nonce(),
            control,
        )
    }

    pub fn seal(
        &self,
        plaintext: &[u8],
        system_title: &[u8; DLMS_SYSTEM_TITLE_LENGTH],
        frame_counter: &[u8; 4],
        control: SecurityControl,
    ) -> Result<Vec<u8>, DecryptError> {
        close(
            plaintext,
            &self.key,
            self.auth_key.as_ref(),
            &nonce(system_title, frame_counter),
            control,
        )
    }
}

fn open(
    ciphertext: &[u8],
    key: &AesKey,
    auth_key: Option<&AesKey>,
    iv: &[u8; 12],
    control: SecurityControl,
) -> Result<Vec<u8>, DecryptError> {
    let authenticated = control.contains(SecurityControl::AUTHENTICATED);
    let encrypted = control.contains(SecurityControl::ENCRYPTED);

    match (encrypted, authenticated) {
        (false, false) => Ok(ciphertext.to_vec()),
        (true, false) => {
            let mut buffer = ciphertext.to_vec();
            apply_keystream(key, iv, &mut buffer);
            Ok(buffer)
        }
        (true, true) => {
            if ciphertext.len() < DLMS_GCM_TAG_LENGTH {
                return Err(DecryptError::MalformedCiphertext {
                    len: ciphertext.len(),
                });
            }
            let (body, tag) = ciphertext.split_at(ciphertext.len() - DLMS_GCM_TAG_LENGTH);
            let mut buffer = body.to_vec();
            let cipher = DlmsGcm::new(GenericArray::from_slice(key.as_bytes()));
            cipher
                .decrypt_in_place_detached(
                    Nonce::<U12>::from_slice(iv),
                    &aad(control, auth_key),
                    &mut buffer,
                    Tag::<U12>::from_slice(tag),
                )
                .map_err(|_| DecryptError::Authentication)?;
            Ok(buffer)
        }
        // Authentication without encryption tags the plaintext, which no meter
        // on this interface sends.
        (false, true) => Err(DecryptError::UnsupportedSecurity(control.bits())),
    }
}

fn close(
    plaintext: &[u8],
    key: &AesKey,
    auth_key: Option<&AesKey>,
    iv: &[u8; 12],
    control: SecurityControl,
) -> Result<Vec<u8>, DecryptError> {
    let authenticated = control.contains(SecurityControl::AUTHENTICATED);
    let encrypted = control.contains(SecurityControl::ENCRYPTED);
    let mut buffer = plaintext.to_vec();

    match (encrypted, authenticated) {
        (false, false) => Ok(buffer),
        (true, false) => {
            apply_keystream(key, iv, &mut buffer);
            Ok(buffer)
        }
        (true, true) => {
            let cipher = DlmsGcm::new(GenericArray::from_slice(key.as_bytes()));
            let tag = cipher
                .encrypt_in_place_detached(
                    Nonce::<U12>::from_slice(iv),
                    &aad(control, auth_key),
                    &mut buffer,
                )
                .map_err(|_| DecryptError::MalformedCiphertext { len: plaintext.len() })?;
            buffer.extend_from_slice(&tag);
            Ok(buffer)
        }
        (false, true) => Err(DecryptError::UnsupportedSecurity(control.bits())),
    }
}

/// `SC || AK`
fn aad(control: SecurityControl, auth_key: Option<&AesKey>) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + AES_KEY_LENGTH);
    aad.push(control.bits());
    if let Some(auth_key) = auth_key {
        aad.extend_from_slice(auth_key.as_bytes());
    }
    aad
}

/// XORs `data` with the GCM key stream: AES-CTR over `iv || counter`, the
/// counter starting at 2 since block 1 is reserved for the tag.
fn apply_keystream(key: &AesKey, iv: &[u8; 12], data: &mut [u8]) {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut counter: u32 = 2;

    for chunk in data.chunks_mut(16) {
        let mut block = GenericArray::clone_from_slice(&[0u8; 16]);
        block[..12].copy_from_slice(iv);
        block[12..].copy_from_slice(&counter.to_be_bytes());
        cipher.encrypt_block(&mut block);

        for (byte, stream) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= stream;
        }
        counter = counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "36C66639E48A8CA4D6BC8B282A793BBB";
    const TITLE: [u8; 8] = [0x4B, 0x46, 0x4D, 0x67, 0x50, 0x00, 0x00, 0x09];
    const COUNTER: [u8; 4] = [0x00, 0x00, 0x00, 0x23];

    fn key() -> AesKey {
        AesKey::from_hex(KEY).unwrap()
    }

    fn authenticated() -> SecurityControl {
        SecurityControl::AUTHENTICATED | SecurityControl::ENCRYPTED
    }

    #[test]
    fn test_key_from_hex() {
        assert_eq!(key().as_bytes()[0], 0x36);
        assert!(AesKey::from_hex("36C666").is_err());
        assert!(AesKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let printed = format!("{:?}", key());
        assert!(!printed.contains("36"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_keystream_roundtrip() {
        let plaintext: Vec<u8> = (0..50).collect();
        let control = SecurityControl::ENCRYPTED;
        let sealed = seal(&plaintext, &key(), &TITLE, &COUNTER, control).unwrap();
        assert_eq!(sealed.len(), plaintext.len());
        assert_ne!(sealed, plaintext);
        let opened = decrypt(&sealed, &key(), &TITLE, &COUNTER, control).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_keystream_matches_gcm_body() {
        // The untagged path must produce the same bytes as full GCM minus the tag.
        let plaintext = b"data-notification body".to_vec();
        let tagged = seal(&plaintext, &key(), &TITLE, &COUNTER, authenticated()).unwrap();
        let untagged =
            seal(&plaintext, &key(), &TITLE, &COUNTER, SecurityControl::ENCRYPTED).unwrap();
        assert_eq!(&tagged[..plaintext.len()], &untagged[..]);
    }

    #[test]
    fn test_authenticated_roundtrip() {
        let plaintext = vec![0x0F, 0x80, 0x00, 0x00, 0x01];
        let sealed = seal(&plaintext, &key(), &TITLE, &COUNTER, authenticated()).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + DLMS_GCM_TAG_LENGTH);
        let opened = decrypt(&sealed, &key(), &TITLE, &COUNTER, authenticated()).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_tampered_tag_fails() {
        let mut sealed = seal(&[1, 2, 3, 4], &key(), &TITLE, &COUNTER, authenticated()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(
            decrypt(&sealed, &key(), &TITLE, &COUNTER, authenticated()),
            Err(DecryptError::Authentication)
        );
    }

    #[test]
    fn test_wrong_counter_fails_authentication() {
        let sealed = seal(&[1, 2, 3, 4], &key(), &TITLE, &COUNTER, authenticated()).unwrap();
        assert_eq!(
            decrypt(&sealed, &key(), &TITLE, &[0, 0, 0, 0x24], authenticated()),
            Err(DecryptError::Authentication)
        );
    }

    #[test]
    fn test_authentication_key_is_bound() {
        let auth = AesKey::from_bytes(&[0x11; 16]).unwrap();
        let sealer = Decryptor::new(key()).with_authentication_key(auth);
        let sealed = sealer.seal(&[9, 9, 9], &TITLE, &COUNTER, authenticated()).unwrap();
        assert_eq!(
            decrypt(&sealed, &key(), &TITLE, &COUNTER, authenticated()),
            Err(DecryptError::Authentication)
        );
    }

    #[test]
    fn test_short_tagged_ciphertext() {
        assert_eq!(
            decrypt(&[0; 5], &key(), &TITLE, &COUNTER, authenticated()),
            Err(DecryptError::MalformedCiphertext { len: 5 })
        );
    }

    #[test]
    fn test_plaintext_passthrough() {
        let control = SecurityControl::empty();
        assert_eq!(decrypt(&[7, 8], &key(), &TITLE, &COUNTER, control).unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_authentication_only_is_unsupported() {
        assert_eq!(
            decrypt(&[7, 8], &key(), &TITLE, &COUNTER, SecurityControl::AUTHENTICATED),
            Err(DecryptError::UnsupportedSecurity(0x10))
        );
    }

    #[test]
    fn test_security_control_bits() {
        let control = SecurityControl::from_bits_retain(0x20);
        assert!(control.contains(SecurityControl::ENCRYPTED));
        assert!(!control.contains(SecurityControl::AUTHENTICATED));
        assert_eq!(control.suite_id(), 0);
    }
}
