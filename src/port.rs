//! Deterministic transport addressing for a project.
//!
//! A project id maps to a short base58 id and to a port in
//! `PORT_RANGE_START..=PORT_RANGE_END`. The port is derived from the short id,
//! so a short id given in place of the full one resolves to the same port.

use sha2::{Digest, Sha256};

pub const PORT_RANGE_START: u16 = 3847;
pub const PORT_RANGE_END: u16 = 4096;
pub const SHORT_ID_LEN: usize = 8;

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// The fixed-length base58 form of `project_id`. A short id maps to itself.
pub fn short_project_id(project_id: &str) -> String {
    if is_short_id(project_id) {
        return project_id.to_owned();
    }
    let digest = Sha256::digest(project_id.as_bytes());
    let mut value = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    let mut out = [BASE58_ALPHABET[0]; SHORT_ID_LEN];
    for slot in out.iter_mut().rev() {
        *slot = BASE58_ALPHABET[(value % 58) as usize];
        value /= 58;
    }
    out.iter().map(|&b| b as char).collect()
}

/// The port the channel for `project_id` listens on.
pub fn port_for_project(project_id: &str) -> u16 {
    let short = short_project_id(project_id);
    let digest = Sha256::digest(short.as_bytes());
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let span = u32::from(PORT_RANGE_END - PORT_RANGE_START) + 1;
    PORT_RANGE_START + (value % span) as u16
}

pub fn is_short_id(id: &str) -> bool {
    id.len() == SHORT_ID_LEN && id.bytes().all(|b| BASE58_ALPHABET.contains(&b))
}
