//! Ordered ranges of candidate builds

use crate::build::descriptor::{Branch, BuildDescriptor, BuildFlags, BuildId};
use crate::error::{BisectError, BisectResult};
use chrono::{Duration, NaiveDate};
use std::ops::Index;

/// Ordered, non-empty sequence of builds in chronological or topological order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRange {
    builds: Vec<BuildDescriptor>,
}

impl BuildRange {
    /// Wrap an ordered list of descriptors
    pub fn new(builds: Vec<BuildDescriptor>) -> BisectResult<Self> {
        if builds.is_empty() {
            return Err(BisectError::EmptyRange);
        }
        Ok(Self { builds })
    }

    /// One nightly build per day from `start` to `end`, both inclusive
    pub fn from_dates(
        start: NaiveDate,
        end: NaiveDate,
        branch: Branch,
        flags: BuildFlags,
    ) -> BisectResult<Self> {
        let days = (end - start).num_days();
        let builds = (0..=days)
            .map(|offset| {
                BuildDescriptor::new(
                    BuildId::Date(start + Duration::days(offset)),
                    branch,
                    flags,
                )
            })
            .collect();
        Self::new(builds)
    }

    /// Range over an explicit ordered list of identifiers
    pub fn from_ids(ids: Vec<BuildId>, branch: Branch, flags: BuildFlags) -> BisectResult<Self> {
        let builds = ids
            .into_iter()
            .map(|id| BuildDescriptor::new(id, branch, flags))
            .collect();
        Self::new(builds)
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    /// Always false for a constructed range; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    /// A single build means there is nothing left to bisect
    pub fn is_resolved(&self) -> bool {
        self.builds.len() == 1
    }

    pub fn get(&self, index: usize) -> Option<&BuildDescriptor> {
        self.builds.get(index)
    }

    pub fn first(&self) -> &BuildDescriptor {
        &self.builds[0]
    }

    pub fn last(&self) -> &BuildDescriptor {
        &self.builds[self.builds.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildDescriptor> {
        self.builds.iter()
    }

    /// Index of the midpoint: `len / 2`
    pub fn mid_point(&self) -> usize {
        self.builds.len() / 2
    }

    /// Contiguous sub-range `[lo, hi)`. Bounds are clamped like a slice
    /// expression; an empty result is an error.
    pub fn slice(&self, lo: usize, hi: usize) -> BisectResult<Self> {
        let hi = hi.min(self.builds.len());
        if lo >= hi {
            return Err(BisectError::EmptyRange);
        }
        Ok(Self {
            builds: self.builds[lo..hi].to_vec(),
        })
    }

    /// Position of a descriptor in this range
    pub fn locate(&self, build: &BuildDescriptor) -> BisectResult<usize> {
        self.builds
            .iter()
            .position(|b| b == build)
            .ok_or_else(|| BisectError::NotFound(build.prefix()))
    }
}

impl Index<usize> for BuildRange {
    type Output = BuildDescriptor;

    fn index(&self, index: usize) -> &Self::Output {
        &self.builds[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dates(start: &str, end: &str) -> BuildRange {
        BuildRange::from_dates(date(start), date(end), Branch::Central, BuildFlags::default())
            .unwrap()
    }

    #[test]
    fn date_range_covers_every_day() {
        let pairs = [
            ("2023-01-01", "2023-01-10", 10),
            ("2023-01-01", "2023-01-01", 1),
            ("2020-02-27", "2020-03-01", 4),
            ("2022-12-30", "2023-01-02", 4),
        ];
        for (start, end, len) in pairs {
            let range = dates(start, end);
            assert_eq!(range.len(), len, "{start}..{end}");
            assert_eq!(range.first().id().to_string(), start);
            assert_eq!(range.last().id().to_string(), end);
        }
    }

    #[test]
    fn reversed_dates_are_empty() {
        let err = BuildRange::from_dates(
            date("2023-01-10"),
            date("2023-01-01"),
            Branch::Central,
            BuildFlags::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BisectError::EmptyRange));
    }

    #[test]
    fn empty_list_rejected() {
        assert!(matches!(
            BuildRange::new(vec![]).unwrap_err(),
            BisectError::EmptyRange
        ));
    }

    #[test]
    fn mid_point_is_floor_half() {
        assert_eq!(dates("2023-01-01", "2023-01-10").mid_point(), 5);
        assert_eq!(dates("2023-01-01", "2023-01-05").mid_point(), 2);
        assert_eq!(dates("2023-01-01", "2023-01-01").mid_point(), 0);
    }

    #[test]
    fn slice_preserves_order() {
        let range = dates("2023-01-01", "2023-01-10");
        let sub = range.slice(3, 6).unwrap();
        assert_eq!(sub.len(), 3);
        assert_eq!(sub[0], range[3]);
        assert_eq!(sub[2], range[5]);

        let clamped = range.slice(8, 100).unwrap();
        assert_eq!(clamped.len(), 2);

        assert!(matches!(range.slice(4, 4), Err(BisectError::EmptyRange)));
    }

    #[test]
    fn locate_finds_index() {
        let range = dates("2023-01-01", "2023-01-10");
        assert_eq!(range.locate(&range[7]).unwrap(), 7);

        let outside = BuildDescriptor::new(
            BuildId::Date(date("2024-01-01")),
            Branch::Central,
            BuildFlags::default(),
        );
        assert!(matches!(
            range.locate(&outside),
            Err(BisectError::NotFound(_))
        ));
    }

    #[test]
    fn single_build_is_resolved() {
        assert!(dates("2023-01-01", "2023-01-01").is_resolved());
        assert!(!dates("2023-01-01", "2023-01-02").is_resolved());
    }

    #[test]
    fn ranges_from_revisions() {
        let ids = vec![
            BuildId::Revision("aaaaaaaaaaaa".to_string()),
            BuildId::Revision("bbbbbbbbbbbb".to_string()),
        ];
        let range = BuildRange::from_ids(ids, Branch::Inbound, BuildFlags::default()).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[1].prefix(), "inbound-bbbbbbbbbbbb-opt");
    }
}
