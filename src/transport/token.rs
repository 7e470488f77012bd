//! Connection token generation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Draw a fresh 64-bit connection token from the operating system CSPRNG.
///
/// Zero is never returned, so an all-zero token on the wire always means
/// "not set".
pub fn generate_token() -> u64 {
    loop {
        let token = OsRng.next_u64();
        if token != 0 {
            return token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_distinct_and_nonzero() {
        let tokens: HashSet<u64> = (0..64).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 64);
        assert!(!tokens.contains(&0));
    }
}
