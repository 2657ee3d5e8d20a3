//! Short record identifiers.
//!
//! Ids are lowercase base-32 tokens (`0-9a-v`) cut from the random bits of a
//! v4 UUID. They are collision-improbable, not unique: nothing checks the
//! target collection before use.

use uuid::Uuid;

const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Length used when none is configured
pub const DEFAULT_ID_LENGTH: usize = 5;

/// Longest id drawn only from the fully random low 60 bits of the UUID
pub const MAX_ID_LENGTH: usize = 12;

/// Generate an id of [`DEFAULT_ID_LENGTH`] characters.
pub fn generate_id() -> String {
    generate_id_with_length(DEFAULT_ID_LENGTH)
}

/// Generate an id of `len` characters (capped at [`MAX_ID_LENGTH`]).
pub fn generate_id_with_length(len: usize) -> String {
    let mut bits = Uuid::new_v4().as_u128();
    (0..len.min(MAX_ID_LENGTH))
        .map(|_| {
            let c = ALPHABET[(bits & 0x1f) as usize] as char;
            bits >>= 5;
            c
        })
        .collect()
}
