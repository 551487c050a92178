//! Shard lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A shard's position in the write -> full -> packing -> packed -> readonly
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardState {
    /// Not currently held by any writer; eligible to be locked WRITING.
    Standby,
    /// Locked by a writer, accepting inserts.
    Writing,
    /// Reached `shards.max_size`, released, waiting for a packer.
    Full,
    /// Locked by a packer, being converted to an RO image.
    Packing,
    /// RO image finalized; RW table still present until enough hosts map it.
    Packed,
    /// Locked by the RW-shard cleaner, dropping the RW table.
    Cleaning,
    /// RW table dropped; only the RO image remains.
    Readonly,
}

impl ShardState {
    /// `true` for states a process has exclusive lock ownership of
    /// (`locker` is non-null).
    pub fn is_locked(self) -> bool {
        matches!(self, ShardState::Writing | ShardState::Packing | ShardState::Cleaning)
    }

    /// `true` once an RO image exists in the pool for this shard.
    pub fn image_available(self) -> bool {
        matches!(
            self,
            ShardState::Packed | ShardState::Cleaning | ShardState::Readonly
        )
    }

    /// `true` once the RW table for this shard is gone (or going away).
    pub fn readonly(self) -> bool {
        matches!(self, ShardState::Cleaning | ShardState::Readonly)
    }

    /// Whether `self -> next` is one of the transitions in the state
    /// diagram (spec.md §4.6 / SPEC_FULL.md §4.6).
    pub fn can_transition_to(self, next: ShardState) -> bool {
        use ShardState::*;
        matches!(
            (self, next),
            (Standby, Writing)
                | (Writing, Standby)
                | (Writing, Full)
                | (Full, Packing)
                | (Packing, Full)
                | (Packing, Packed)
                | (Packed, Cleaning)
                | (Cleaning, Packed)
                | (Cleaning, Readonly)
        )
    }

    /// Database representation, matching the `shards.state` text column.
    pub fn as_str(self) -> &'static str {
        match self {
            ShardState::Standby => "standby",
            ShardState::Writing => "writing",
            ShardState::Full => "full",
            ShardState::Packing => "packing",
            ShardState::Packed => "packed",
            ShardState::Cleaning => "cleaning",
            ShardState::Readonly => "readonly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "standby" => ShardState::Standby,
            "writing" => ShardState::Writing,
            "full" => ShardState::Full,
            "packing" => ShardState::Packing,
            "packed" => ShardState::Packed,
            "cleaning" => ShardState::Cleaning,
            "readonly" => ShardState::Readonly,
            _ => return None,
        })
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_available() {
        assert!(!ShardState::Full.image_available());
        assert!(ShardState::Packed.image_available());
        assert!(ShardState::Cleaning.image_available());
        assert!(ShardState::Readonly.image_available());
    }

    #[test]
    fn test_readonly() {
        assert!(!ShardState::Packed.readonly());
        assert!(ShardState::Cleaning.readonly());
        assert!(ShardState::Readonly.readonly());
    }

    #[test]
    fn test_locked_states() {
        assert!(ShardState::Writing.is_locked());
        assert!(ShardState::Packing.is_locked());
        assert!(ShardState::Cleaning.is_locked());
        assert!(!ShardState::Standby.is_locked());
        assert!(!ShardState::Full.is_locked());
        assert!(!ShardState::Packed.is_locked());
        assert!(!ShardState::Readonly.is_locked());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ShardState::Standby.can_transition_to(ShardState::Writing));
        assert!(ShardState::Writing.can_transition_to(ShardState::Standby));
        assert!(ShardState::Writing.can_transition_to(ShardState::Full));
        assert!(ShardState::Full.can_transition_to(ShardState::Packing));
        assert!(ShardState::Packing.can_transition_to(ShardState::Full));
        assert!(ShardState::Packing.can_transition_to(ShardState::Packed));
        assert!(ShardState::Packed.can_transition_to(ShardState::Cleaning));
        assert!(ShardState::Cleaning.can_transition_to(ShardState::Packed));
        assert!(ShardState::Cleaning.can_transition_to(ShardState::Readonly));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ShardState::Standby.can_transition_to(ShardState::Full));
        assert!(!ShardState::Packed.can_transition_to(ShardState::Writing));
        assert!(!ShardState::Readonly.can_transition_to(ShardState::Standby));
        assert!(!ShardState::Full.can_transition_to(ShardState::Readonly));
    }

    #[test]
    fn test_roundtrip_str() {
        for state in [
            ShardState::Standby,
            ShardState::Writing,
            ShardState::Full,
            ShardState::Packing,
            ShardState::Packed,
            ShardState::Cleaning,
            ShardState::Readonly,
        ] {
            assert_eq!(ShardState::from_str(state.as_str()), Some(state));
        }
    }
}
