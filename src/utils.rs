// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Write;

use rand::RngCore;

/// Generates an unforgeable random token with at least 256 bits of entropy
/// (a 32-byte CSPRNG draw), hex-encoded for safe use as a JSON string, map
/// key, and log field.
///
/// Used for session ids, device ids, and file transfer ids.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);

    let mut hex = String::with_capacity(64);
    for byte in &bytes {
        write!(&mut hex, "{byte:02x}").expect("writing to String cannot fail");
    }
    hex
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn token_is_64_hex_chars() {
        let tok = generate_token();
        assert_eq!(tok.len(), 64);
        assert!(tok.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_token()));
        }
    }
}
