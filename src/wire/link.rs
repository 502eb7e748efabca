//! Link-stage structs and RSA ticket auth (spec.md §4.2).
//!
//! Field layout and sizes follow the classic SPICE wire protocol: the link
//! reply's public-key slot is a fixed 162-byte SubjectPublicKeyInfo blob
//! (`SPICE_TICKET_PUBKEY_BYTES`), which is what makes the worked example in
//! spec.md §8 ("size=178") come out exact: `4 (error) + 162 (pub_key) + 4 +
//! 4 + 4 (caps_offset) == 178`, with `caps_offset` pointing immediately past
//! this fixed struct. See DESIGN.md for the full reasoning.

use binrw::{BinRead, BinWrite};
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

use crate::error::{Result, SpiceError};
use crate::wire::SPICE_MAGIC;

/// Fixed size, in bytes, of the RSA public key slot in [`LinkReplyFixed`].
pub const TICKET_PUBKEY_BYTES: usize = 162;

#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct LinkHeader {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub size: u32,
}

pub const LINK_HEADER_SIZE: usize = 16;

impl LinkHeader {
    pub fn new(size: u32) -> Self {
        Self {
            magic: SPICE_MAGIC,
            major_version: crate::wire::SPICE_VERSION_MAJOR,
            minor_version: crate::wire::SPICE_VERSION_MINOR,
            size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != SPICE_MAGIC {
            return Err(SpiceError::Protocol(format!(
                "bad link magic: got {:#010x}, expected {:#010x}",
                self.magic, SPICE_MAGIC
            )));
        }
        if self.major_version != crate::wire::SPICE_VERSION_MAJOR {
            return Err(SpiceError::VersionMismatch {
                expected: crate::wire::SPICE_VERSION_MAJOR,
                actual: self.major_version,
            });
        }
        Ok(())
    }
}

/// Client->server link message body (spec.md §4.2). `caps_offset` is
/// always `sizeof(mess)` since capability words are appended immediately
/// after this fixed struct.
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct LinkMess {
    pub connection_id: u32,
    pub channel_type: u8,
    pub channel_id: u8,
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

pub const LINK_MESS_SIZE: u32 = 18;

/// Server->client link reply, fixed-size prefix (variable-length
/// capability words follow at `caps_offset`, which for this engine's
/// parsing purposes is always right after this struct).
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct LinkReplyFixed {
    pub error: u32,
    pub pub_key: [u8; TICKET_PUBKEY_BYTES],
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

pub const LINK_REPLY_FIXED_SIZE: usize = 4 + TICKET_PUBKEY_BYTES + 4 + 4 + 4;

pub struct LinkReply {
    pub fixed: LinkReplyFixed,
    pub common_caps: Vec<u32>,
    pub channel_caps: Vec<u32>,
}

impl LinkReply {
    /// Parses a link reply from the fixed-size prefix plus the capability
    /// words that follow it. `body` must contain at least
    /// [`LINK_REPLY_FIXED_SIZE`] bytes; the reply's declared `size` (from
    /// the outer [`LinkHeader`]) must be at least that much (spec.md §4.2:
    /// "a link-reply whose size must be at least the fixed reply struct").
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < LINK_REPLY_FIXED_SIZE {
            return Err(SpiceError::Protocol(format!(
                "undersized link reply: {} bytes, need at least {}",
                body.len(),
                LINK_REPLY_FIXED_SIZE
            )));
        }
        let mut cursor = std::io::Cursor::new(&body[..LINK_REPLY_FIXED_SIZE]);
        let fixed = LinkReplyFixed::read(&mut cursor)
            .map_err(|e| SpiceError::Protocol(format!("bad link reply: {e}")))?;

        let caps_start = fixed.caps_offset as usize;
        let common_words = fixed.num_common_caps as usize;
        let channel_words = fixed.num_channel_caps as usize;
        let caps_end = caps_start
            .checked_add((common_words + channel_words) * 4)
            .ok_or_else(|| SpiceError::Protocol("capability offset overflow".into()))?;
        if caps_end > body.len() {
            return Err(SpiceError::Protocol(
                "link reply capability words run past declared size".into(),
            ));
        }

        let mut common_caps = Vec::with_capacity(common_words);
        let mut channel_caps = Vec::with_capacity(channel_words);
        let mut off = caps_start;
        for _ in 0..common_words {
            common_caps.push(u32::from_le_bytes(body[off..off + 4].try_into().unwrap()));
            off += 4;
        }
        for _ in 0..channel_words {
            channel_caps.push(u32::from_le_bytes(body[off..off + 4].try_into().unwrap()));
            off += 4;
        }

        Ok(Self {
            fixed,
            common_caps,
            channel_caps,
        })
    }
}

/// Auth mechanism selector, sent only when both sides advertise
/// `AUTH_SELECTION` (spec.md §4.2). The single supported mechanism is the
/// SPICE ticket (RSA-OAEP over the password).
pub const AUTH_MECHANISM_SPICE: u32 = 1;

/// Encrypts `password` (NUL-terminated, per spec.md §6) with RSA-OAEP
/// (SHA-1, MGF1-SHA1) against the server's DER-encoded SubjectPublicKeyInfo
/// key, producing exactly `key.size` bytes.
pub fn encrypt_ticket(password: &str, pub_key_der: &[u8]) -> Result<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_der(pub_key_der)
        .map_err(|e| SpiceError::Crypto(format!("failed to parse RSA public key: {e}")))?;
    let mut plaintext = Vec::with_capacity(password.len() + 1);
    plaintext.extend_from_slice(password.as_bytes());
    plaintext.push(0);

    let padding = Oaep::new::<Sha1>();
    public_key
        .encrypt(&mut OsRng, padding, &plaintext)
        .map_err(|e| SpiceError::Crypto(format!("RSA-OAEP encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_reply_fixed_size_matches_scenario() {
        // spec.md §8 scenario 1: size=178 with num_common_caps=1,
        // num_channel_caps=1, caps_offset=178.
        assert_eq!(LINK_REPLY_FIXED_SIZE, 178);
    }

    #[test]
    fn parse_rejects_undersized_body() {
        let body = vec![0u8; 10];
        assert!(LinkReply::parse(&body).is_err());
    }

    #[test]
    fn parse_reads_capability_words_at_offset() {
        let mut body = vec![0u8; LINK_REPLY_FIXED_SIZE];
        // error = 0
        body[0..4].copy_from_slice(&0u32.to_le_bytes());
        // num_common_caps = 1, num_channel_caps = 1, caps_offset = 178
        body[166..170].copy_from_slice(&1u32.to_le_bytes());
        body[170..174].copy_from_slice(&1u32.to_le_bytes());
        body[174..178].copy_from_slice(&(LINK_REPLY_FIXED_SIZE as u32).to_le_bytes());
        body.extend_from_slice(&0x0Bu32.to_le_bytes());
        body.extend_from_slice(&0x00u32.to_le_bytes());

        let reply = LinkReply::parse(&body).unwrap();
        assert_eq!(reply.fixed.error, 0);
        assert_eq!(reply.common_caps, vec![0x0B]);
        assert_eq!(reply.channel_caps, vec![0x00]);
    }
}
