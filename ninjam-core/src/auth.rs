//! Credentials and the two-pass SHA-1 password hash.
//!
//! Pass 1 is `SHA1(user ":" password)` and is computed at connect time. Pass 2 is
//! `SHA1(pass1 || challenge)` and is computed once the server's 8-byte challenge arrives.
//! Only pass 2 ever goes on the wire.

use std::fmt;

use sha1::{Digest, Sha1};

/// Prefix the server expects on anonymous logins.
pub const ANONYMOUS_PREFIX: &str = "anonymous:";

/// 20-byte SHA-1 digest used at both passes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PasswordHash([u8; 20]);

impl PasswordHash {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        PasswordHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The digest as five little-endian 32-bit words, the way it is laid out on the wire.
    pub fn words(&self) -> [u32; 5] {
        std::array::from_fn(|i| {
            u32::from_le_bytes([
                self.0[i * 4],
                self.0[i * 4 + 1],
                self.0[i * 4 + 2],
                self.0[i * 4 + 3],
            ])
        })
    }

    pub fn from_words(words: [u32; 5]) -> Self {
        let mut out = [0u8; 20];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        PasswordHash(out)
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasswordHash({})", hex::encode(self.0))
    }
}

/// Pass 1: hash of `wire_username:password`.
pub fn hash_password(wire_username: &str, password: &str) -> PasswordHash {
    let mut hasher = Sha1::new();
    hasher.update(wire_username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    PasswordHash(hasher.finalize().into())
}

/// Pass 2: hash of the pass-1 digest followed by the server challenge.
pub fn hash_challenge(pass1: &PasswordHash, challenge: &[u8; 8]) -> PasswordHash {
    let mut hasher = Sha1::new();
    hasher.update(pass1.as_bytes());
    hasher.update(challenge);
    PasswordHash(hasher.finalize().into())
}

/// Login credentials for one connection attempt. The plain password is not kept.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    anonymous: bool,
    pass1: PasswordHash,
    pass2: Option<PasswordHash>,
}

impl Credentials {
    pub fn new(username: &str, password: &str, anonymous: bool) -> Self {
        let wire = wire_username(username, anonymous);
        Self {
            username: username.to_string(),
            anonymous,
            pass1: hash_password(&wire, password),
            pass2: None,
        }
    }

    /// Username as typed by the user.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Username as sent to the server.
    pub fn wire_username(&self) -> String {
        wire_username(&self.username, self.anonymous)
    }

    /// Derive pass 2 from the server challenge and remember it for the auth response.
    pub fn answer_challenge(&mut self, challenge: &[u8; 8]) -> PasswordHash {
        let pass2 = hash_challenge(&self.pass1, challenge);
        self.pass2 = Some(pass2);
        pass2
    }

    /// Pass-2 hash, if a challenge has been answered.
    pub fn response(&self) -> Option<PasswordHash> {
        self.pass2
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("anonymous", &self.anonymous)
            .finish_non_exhaustive()
    }
}

fn wire_username(username: &str, anonymous: bool) -> String {
    if anonymous {
        format!("{ANONYMOUS_PREFIX}{username}")
    } else {
        username.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_hash(s: &str) -> PasswordHash {
        let bytes: [u8; 20] = hex::decode(s).unwrap().try_into().unwrap();
        PasswordHash::from_bytes(bytes)
    }

    #[test]
    fn pass1_known_vectors() {
        assert_eq!(
            hash_password("anonymous:bob", "secret"),
            hex_hash("2b41fa1d3a501caed92f958cff9bfee4ba00d46c")
        );
        assert_eq!(
            hash_password("bob", "secret"),
            hex_hash("7f2566142c156d3258af39e84aed64a2a604605d")
        );
    }

    #[test]
    fn pass2_is_hash_of_pass1_and_challenge() {
        let mut creds = Credentials::new("bob", "secret", true);
        assert!(creds.response().is_none());
        let challenge = [1, 2, 3, 4, 5, 6, 7, 8];
        let pass2 = creds.answer_challenge(&challenge);
        assert_eq!(pass2, hex_hash("cc785aa394eb799343daf9ffba38fcc972428668"));
        assert_eq!(creds.response(), Some(pass2));
    }

    #[test]
    fn anonymous_prefix_only_when_anonymous() {
        assert_eq!(Credentials::new("bob", "", true).wire_username(), "anonymous:bob");
        assert_eq!(Credentials::new("bob", "", false).wire_username(), "bob");
    }

    #[test]
    fn words_roundtrip_raw_bytes() {
        let hash = hex_hash("2b41fa1d3a501caed92f958cff9bfee4ba00d46c");
        let words = hash.words();
        assert_eq!(words[0], u32::from_le_bytes([0x2b, 0x41, 0xfa, 0x1d]));
        assert_eq!(PasswordHash::from_words(words), hash);
    }

    #[test]
    fn debug_does_not_leak_hash() {
        let creds = Credentials::new("bob", "secret", true);
        let s = format!("{creds:?}");
        assert!(s.contains("bob"));
        assert!(!s.contains("2b41fa"));
    }
}
