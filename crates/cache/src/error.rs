//! Error types for bucket operations

use crate::bucket::BucketKind;
use crate::lod::LodLevel;

/// Errors returned synchronously by the bucket manager
///
/// These are contract violations by the caller. A rejected call leaves every
/// bucket exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("invalid operation on {bucket} bucket: {reason}")]
    InvalidOperation {
        bucket: BucketKind,
        reason: &'static str,
    },

    #[error("atlas built at {found} in a set for {expected}")]
    LodMismatch { expected: LodLevel, found: LodLevel },
}

pub type CacheResult<T> = Result<T, CacheError>;
