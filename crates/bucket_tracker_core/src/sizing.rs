use crate::contract::{BucketSize, ObjectSummary};

/// Recomputes the aggregate size from a full listing of live objects.
///
/// The tracker never accumulates deltas from event payloads: duplicated,
/// dropped or reordered notifications cannot make the listing drift.
pub fn compute_bucket_size(objects: &[ObjectSummary]) -> BucketSize {
    compute_tracked_size(objects, &[])
}

/// Size of the objects users own: keys the tracker writes itself (the plot
/// artifact) are left out, so rendering a chart never moves the metric.
pub fn compute_tracked_size(objects: &[ObjectSummary], untracked_keys: &[String]) -> BucketSize {
    objects
        .iter()
        .filter(|object| !is_untracked(&object.key, untracked_keys))
        .fold(BucketSize::default(), |acc, object| BucketSize {
            total_bytes: acc.total_bytes.saturating_add(object.size),
            object_count: acc.object_count + 1,
        })
}

pub fn is_untracked(key: &str, untracked_keys: &[String]) -> bool {
    untracked_keys.iter().any(|untracked| untracked == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(key: &str, size: u64) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            size,
            last_modified_ms: 0,
        }
    }

    #[test]
    fn empty_listing_is_zero() {
        assert_eq!(compute_bucket_size(&[]), BucketSize::default());
    }

    #[test]
    fn sums_sizes_and_counts_objects() {
        let size = compute_bucket_size(&[object("a", 19), object("b", 27), object("c", 2)]);
        assert_eq!(size.total_bytes, 48);
        assert_eq!(size.object_count, 3);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let size = compute_bucket_size(&[object("a", u64::MAX), object("b", 1)]);
        assert_eq!(size.total_bytes, u64::MAX);
    }

    #[test]
    fn tracked_size_skips_plot_artifact() {
        let objects = [object("plot.svg", 2_048), object("a.txt", 5)];
        let size = compute_tracked_size(&objects, &["plot.svg".to_string()]);
        assert_eq!(size.total_bytes, 5);
        assert_eq!(size.object_count, 1);
        assert_eq!(compute_tracked_size(&objects, &[]).total_bytes, 2_053);
    }
}
