//! Backup code generation and normalization.
//!
//! Backup codes are short one-time codes for signing in when the TOTP
//! factor is unavailable. They are stored uppercased and consumed on use.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};

const BACKUP_CODE_LEN: usize = 6;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate `count` random base36 backup codes.
pub(crate) fn generate_backup_codes(count: usize) -> Result<Vec<String>> {
    let mut rng = OsRng;
    let mut codes = Vec::with_capacity(count);
    for _ in 0..count {
        codes.push(generate_code(&mut rng)?);
    }
    Ok(codes)
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.try_fill_bytes(&mut raw)
        .context("failed to generate backup code")?;
    Ok(raw
        .iter()
        .map(|byte| {
            let idx = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
            BACKUP_CODE_ALPHABET[idx] as char
        })
        .collect())
}

/// Normalize user input for matching: trimmed and uppercased.
///
/// Returns `None` when the input cannot be a backup code at all.
pub(crate) fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .trim()
        .chars()
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if normalized.len() != BACKUP_CODE_LEN
        || !normalized.bytes().all(|byte| BACKUP_CODE_ALPHABET.contains(&byte))
    {
        return None;
    }
    Some(normalized)
}
