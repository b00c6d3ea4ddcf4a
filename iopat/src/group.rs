// Copyright (c) Facebook, Inc. and its affiliates.
use log::debug;
use std::collections::BTreeMap;

use iopat_intf::{ExcludedGroup, GroupKey, RunRecord};

/// Runs of one executable with the same dominant I/O direction.
#[derive(Clone, Debug)]
pub struct ApplicationGroup {
    pub key: GroupKey,
    pub members: Vec<RunRecord>,
}

#[derive(Debug, Default)]
pub struct Grouping {
    /// Ordered by key, members in table order.
    pub included: Vec<ApplicationGroup>,
    pub excluded: Vec<ExcludedGroup>,
}

impl Grouping {
    pub fn runs_included(&self) -> usize {
        self.included.iter().map(|g| g.members.len()).sum()
    }

    pub fn runs_excluded(&self) -> usize {
        self.excluded.iter().map(|g| g.size).sum()
    }
}

/// Partition `table` by `(exe, I/O mode)` and drop groups with fewer than
/// `threshold` runs.
pub fn group_runs(table: &[RunRecord], threshold: usize) -> Grouping {
    let mut groups = BTreeMap::<GroupKey, Vec<RunRecord>>::new();
    for rec in table.iter() {
        groups
            .entry(GroupKey::new(&rec.exe, rec.io_mode()))
            .or_default()
            .push(rec.clone());
    }

    let mut grouping = Grouping::default();
    for (key, members) in groups.into_iter() {
        if members.len() >= threshold {
            grouping.included.push(ApplicationGroup { key, members });
        } else {
            debug!(
                "group: Excluding {} with {} < {} runs",
                &key,
                members.len(),
                threshold
            );
            grouping.excluded.push(ExcludedGroup {
                key,
                size: members.len(),
            });
        }
    }
    grouping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::run_record;
    use iopat_intf::IoMode;

    #[test]
    fn test_group_and_threshold() {
        let mut table = vec![];
        for i in 0..9 {
            table.push(run_record(1, "simA", i, 8192, 4096));
        }
        for i in 0..3 {
            table.push(run_record(1, "simA", 100 + i, 0, 4096));
        }
        for i in 0..4 {
            table.push(run_record(2, "simB", i, 4096, 4096));
        }

        let grouping = group_runs(&table, 5);
        assert_eq!(grouping.included.len(), 1);
        assert_eq!(grouping.included[0].key, GroupKey::new("simA", IoMode::Read));
        assert_eq!(grouping.included[0].members.len(), 9);
        assert_eq!(grouping.runs_included(), 9);
        assert_eq!(
            grouping.excluded,
            vec![
                ExcludedGroup {
                    key: GroupKey::new("simA", IoMode::Write),
                    size: 3
                },
                ExcludedGroup {
                    key: GroupKey::new("simB", IoMode::Read),
                    size: 4
                },
            ]
        );
        assert_eq!(grouping.runs_excluded(), 7);

        let grouping = group_runs(&table, 1);
        assert_eq!(grouping.included.len(), 3);
        assert_eq!(grouping.runs_included(), table.len());
    }
}
