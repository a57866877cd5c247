//! Status bucket counts for monitoring.

use serde::{Deserialize, Serialize};

use super::category::InstanceStatus;

/// Instance counts per lifecycle status bucket.
///
/// `total` counts every matching instance, including those that have not yet
/// emitted a status-bearing event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatistics {
    pub total: u64,
    pub in_progress: u64,
    pub transferred: u64,
    pub aborted: u64,
    pub failed: u64,
}

impl InstanceStatistics {
    /// Add `count` instances in the given bucket (or none)
    pub fn record(&mut self, status: Option<InstanceStatus>, count: u64) {
        self.total += count;
        match status {
            Some(InstanceStatus::InProgress) => self.in_progress += count,
            Some(InstanceStatus::Transferred) => self.transferred += count,
            Some(InstanceStatus::Aborted) => self.aborted += count,
            Some(InstanceStatus::Failed) => self.failed += count,
            None => {}
        }
    }

    pub fn merge(&mut self, other: &InstanceStatistics) {
        self.total += other.total;
        self.in_progress += other.in_progress;
        self.transferred += other.transferred;
        self.aborted += other.aborted;
        self.failed += other.failed;
    }

    pub fn count(&self, status: InstanceStatus) -> u64 {
        match status {
            InstanceStatus::InProgress => self.in_progress,
            InstanceStatus::Transferred => self.transferred,
            InstanceStatus::Aborted => self.aborted,
            InstanceStatus::Failed => self.failed,
        }
    }
}

/// Counts for one integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatistics {
    /// `None` groups instances whose events never carried an integration id
    pub integration_id: Option<i64>,

    #[serde(flatten)]
    pub statistics: InstanceStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_status_counts_total_only() {
        let mut stats = InstanceStatistics::default();
        stats.record(None, 3);
        stats.record(Some(InstanceStatus::Failed), 2);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.in_progress + stats.transferred + stats.aborted, 0);
    }

    #[test]
    fn test_merge() {
        let mut a = InstanceStatistics::default();
        a.record(Some(InstanceStatus::Transferred), 1);
        let mut b = InstanceStatistics::default();
        b.record(Some(InstanceStatus::Transferred), 2);
        b.record(Some(InstanceStatus::Aborted), 1);

        a.merge(&b);
        assert_eq!(a.total, 4);
        assert_eq!(a.count(InstanceStatus::Transferred), 3);
        assert_eq!(a.count(InstanceStatus::Aborted), 1);
    }
}
