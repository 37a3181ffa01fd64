use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use jobhive_schema::RequestId;

/// Issues request ids of the form `{unix_millis:013}-{sequence:06}-{random:08x}`.
///
/// The time prefix keeps ids roughly ordered across processes, the sequence
/// orders ids issued by one generator within the same millisecond, and the
/// random suffix keeps two processes from colliding.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    sequence: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> RequestId {
        let millis = Utc::now().timestamp_millis();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let salt: u32 = rand::random();
        RequestId(format!("{millis:013}-{sequence:06}-{salt:08x}"))
    }
}

/// `true` if `id` is still the most recent request, or if no request has
/// been recorded since (for example after a timeout cleared it).
pub fn is_latest(id: &RequestId, current: Option<&RequestId>) -> bool {
    current.map_or(true, |current| current == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let generator = RequestIdGenerator::new();
        let ids: HashSet<_> = (0..1000).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_sort_by_issue_order() {
        let generator = RequestIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert!(first.as_str() < second.as_str());
    }

    #[test]
    fn id_has_time_prefix() {
        let id = RequestIdGenerator::new().next_id();
        let parts: Vec<_> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 13);
        assert!(parts[0].parse::<i64>().is_ok());
    }

    #[test]
    fn latest_check() {
        let generator = RequestIdGenerator::new();
        let r1 = generator.next_id();
        let r2 = generator.next_id();

        assert!(is_latest(&r1, Some(&r1)));
        assert!(!is_latest(&r1, Some(&r2)));
        assert!(is_latest(&r1, None));
    }
}
