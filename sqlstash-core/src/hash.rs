//! Cache key derivation.
//!
//! A [`StatementKey`] is a 64-bit hash of a one-byte [`Namespace`] tag
//! followed by the normalized statement text. Keys route statements to shards
//! and index the shard maps, so a collision would hand out a handle prepared
//! for different SQL; the cache therefore also stores the text and rejects
//! mismatches (see [`QueryError::key_collision`](crate::QueryError::key_collision)).

use std::fmt;

/// A cache key for a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementKey(u64);

impl StatementKey {
    /// Create a key from a raw hash value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw hash value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Stable shard index for this key.
    #[inline]
    pub fn shard_index(self, shard_count: usize) -> usize {
        (self.0 % shard_count as u64) as usize
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Namespace discriminator mixed into every key.
///
/// The same SQL text used for a row-returning query and for a fire-and-forget
/// execution gets two independent cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Row-returning statements.
    Query,
    /// Statements executed for their side effects.
    Exec,
    /// Application-defined namespace.
    Custom(u8),
}

impl Namespace {
    /// The variant byte hashed in front of the statement text.
    ///
    /// Every `Custom` namespace shares `b'c'` and adds its own byte after
    /// it, so no custom tag can reproduce the `Query` or `Exec` prefix.
    #[inline]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Query => b'q',
            Self::Exec => b'e',
            Self::Custom(_) => b'c',
        }
    }
}

/// Maps normalized statement text to a cache key.
///
/// Implementations must be deterministic and should make collisions
/// improbable.
pub trait KeyHasher: Send + Sync {
    /// Hash the normalized text under a namespace.
    fn hash(&self, normalized: &str, namespace: Namespace) -> StatementKey;

    /// Name of this hasher (for debugging/logging).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// 64-bit FNV-1a, the default hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1aHasher;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over `tag` followed by `text`.
#[inline]
pub fn fnv1a(tag: u8, text: &str) -> u64 {
    fnv1a_extend(fnv1a_extend(FNV_OFFSET_BASIS, &[tag]), text.as_bytes())
}

#[inline]
fn fnv1a_extend(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl KeyHasher for Fnv1aHasher {
    #[inline]
    fn hash(&self, normalized: &str, namespace: Namespace) -> StatementKey {
        let mut hash = fnv1a_extend(FNV_OFFSET_BASIS, &[namespace.tag()]);
        if let Namespace::Custom(tag) = namespace {
            hash = fnv1a_extend(hash, &[tag]);
        }
        StatementKey(fnv1a_extend(hash, normalized.as_bytes()))
    }

    fn name(&self) -> &'static str {
        "fnv1a-64"
    }
}

impl<F> KeyHasher for F
where
    F: Fn(&str, Namespace) -> u64 + Send + Sync,
{
    fn hash(&self, normalized: &str, namespace: Namespace) -> StatementKey {
        StatementKey(self(normalized, namespace))
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}
