use std::str::FromStr;

use crate::contract::{DecodeError, ObjectSummary};
use crate::sizing::{compute_tracked_size, is_untracked};

/// Order in which the cleaner gives up objects once a bucket is over its
/// threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Least recently written first; ties break on key.
    #[default]
    OldestFirst,
    /// Biggest object first; ties break on key.
    LargestFirst,
    /// Every deletable object.
    All,
}

impl DeletionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OldestFirst => "oldest_first",
            Self::LargestFirst => "largest_first",
            Self::All => "all",
        }
    }
}

impl FromStr for DeletionPolicy {
    type Err = DecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oldest_first" | "oldest" => Ok(Self::OldestFirst),
            "largest_first" | "largest" => Ok(Self::LargestFirst),
            "all" => Ok(Self::All),
            other => Err(DecodeError::new(format!(
                "Unknown deletion policy '{other}' (expected oldest_first, largest_first or all)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionPlan {
    pub victims: Vec<ObjectSummary>,
    pub current_total: u64,
    pub projected_total: u64,
    pub threshold: u64,
}

impl DeletionPlan {
    pub fn is_noop(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Chooses which objects to delete so the bucket total drops to
/// `threshold` or below. Objects whose key is in `protected_keys` are
/// neither counted nor selected, matching the size the tracker reports.
pub fn plan_deletions(
    objects: &[ObjectSummary],
    threshold: u64,
    policy: DeletionPolicy,
    protected_keys: &[String],
) -> DeletionPlan {
    let current_total = compute_tracked_size(objects, protected_keys).total_bytes;
    if current_total <= threshold {
        return DeletionPlan {
            victims: Vec::new(),
            current_total,
            projected_total: current_total,
            threshold,
        };
    }

    let mut candidates: Vec<&ObjectSummary> = objects
        .iter()
        .filter(|object| !is_untracked(&object.key, protected_keys))
        .collect();

    match policy {
        DeletionPolicy::OldestFirst | DeletionPolicy::All => candidates.sort_by(|left, right| {
            left.last_modified_ms
                .cmp(&right.last_modified_ms)
                .then_with(|| left.key.cmp(&right.key))
        }),
        DeletionPolicy::LargestFirst => candidates.sort_by(|left, right| {
            right
                .size
                .cmp(&left.size)
                .then_with(|| left.key.cmp(&right.key))
        }),
    }

    let mut projected_total = current_total;
    let mut victims = Vec::new();
    for candidate in candidates {
        if policy != DeletionPolicy::All && projected_total <= threshold {
            break;
        }
        projected_total = projected_total.saturating_sub(candidate.size);
        victims.push(candidate.clone());
    }

    DeletionPlan {
        victims,
        current_total,
        projected_total,
        threshold,
    }
}
