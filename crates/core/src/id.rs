// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID generation and validation.
//!
//! Workspace and session identifiers are a one-character type prefix followed
//! by 24 lowercase hex characters (`w3f9a…`, `s81c2…`). The prefix doubles as
//! a namespace so an id can never be mistaken for the wrong resource kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum byte length for an inline ID (1-char prefix + 24 hex chars).
pub const ID_MAX_LEN: usize = 25;

/// Hex alphabet used for generated id suffixes.
const HEX_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Length of the random hex suffix.
const SUFFIX_LEN: usize = 24;

/// Error returned when a string is not a well-formed id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid id {got:?}: expected {prefix}<24 hex chars>")]
pub struct IdParseError {
    pub prefix: char,
    pub got: String,
}

/// Fixed-size inline ID buffer. Always ≤ 25 ASCII bytes, `Copy`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdBuf {
    len: u8,
    buf: [u8; ID_MAX_LEN],
}

impl std::hash::Hash for IdBuf {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash only the active bytes so it matches str::hash,
        // which is required for Borrow<str> HashMap lookups.
        self.as_str().hash(state);
    }
}

impl IdBuf {
    pub fn new(s: &str) -> Self {
        debug_assert!(
            s.len() <= ID_MAX_LEN,
            "ID exceeds {} bytes ({} bytes): {:?}",
            ID_MAX_LEN,
            s.len(),
            s,
        );
        let len = s.len().min(ID_MAX_LEN);
        let mut buf = [0u8; ID_MAX_LEN];
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { len: len as u8, buf }
    }

    pub fn as_str(&self) -> &str {
        // Invariant: only constructed from &str, always valid UTF-8.
        match std::str::from_utf8(&self.buf[..self.len as usize]) {
            Ok(s) => s,
            Err(_) => unreachable!("IdBuf constructed from non-UTF-8"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::borrow::Borrow<str> for IdBuf {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Debug for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for IdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for IdBuf {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IdBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.len() > ID_MAX_LEN {
            return Err(serde::de::Error::custom(format!(
                "ID exceeds {} bytes: {:?}",
                ID_MAX_LEN, s
            )));
        }
        Ok(IdBuf::new(&s))
    }
}

/// Generate a fresh 24-char lowercase-hex suffix.
fn random_suffix() -> String {
    nanoid::nanoid!(SUFFIX_LEN, &HEX_ALPHABET)
}

/// Check that `s` is `prefix` followed by exactly 24 lowercase hex chars.
fn is_well_formed(prefix: char, s: &str) -> bool {
    let mut chars = s.chars();
    if chars.next() != Some(prefix) {
        return false;
    }
    let suffix = &s[1..];
    suffix.len() == SUFFIX_LEN
        && suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Define a newtype ID wrapper around [`IdBuf`] with a one-char type prefix.
///
/// Generates `generate()` for fresh random IDs, `parse()` for validated
/// parsing at trust boundaries, `from_trusted()` for already-validated
/// strings (storage round-trips), plus the usual string-adjacent impls.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub IdBuf);

        impl $name {
            pub const PREFIX: char = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn generate() -> Self {
                Self(IdBuf::new(&format!("{}{}", Self::PREFIX, random_suffix())))
            }

            /// Parse and validate an untrusted string.
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                if is_well_formed(Self::PREFIX, s) {
                    Ok(Self(IdBuf::new(s)))
                } else {
                    Err(IdParseError { prefix: Self::PREFIX, got: s.to_string() })
                }
            }

            /// Wrap a string that is already known to be well-formed
            /// (storage round-trips, internally generated values).
            pub fn from_trusted(s: impl AsRef<str>) -> Self {
                debug_assert!(
                    is_well_formed(Self::PREFIX, s.as_ref()),
                    "malformed trusted id: {:?}",
                    s.as_ref(),
                );
                Self(IdBuf::new(s.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_str())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

define_id! {
    /// Workspace identifier (`w` + 24 hex). Doubles as the tenant's OS user
    /// name, so it must stay within useradd's charset and length limits.
    pub struct WorkspaceId('w');
}

define_id! {
    /// Session identifier (`s` + 24 hex). Immutable for the session's life.
    pub struct SessionId('s');
}

define_id! {
    /// Chat message identifier (`m` + 24 hex). Opaque to clients; ordering
    /// comes from the per-worktree sequence, not from the id.
    pub struct MessageId('m');
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
