use std::collections::BTreeSet;

use super::error::VoteError;

pub const MAX_HOURS_OFFSET: u32 = 48;

/// A validated, deduplicated, ascending set of "hours ago" buckets to query
/// hourly counters for. `0` is deliberately excluded from the valid range so
/// it can never collide with the reserved lifetime-counter sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoursOffsetGroups(Vec<u32>);

impl HoursOffsetGroups {
    pub fn new(offsets: impl IntoIterator<Item = u32>) -> Result<Self, VoteError> {
        let set: BTreeSet<u32> = offsets.into_iter().collect();
        if set.is_empty() {
            return Err(VoteError::Validation(
                "hoursOffsets must not be empty".into(),
            ));
        }
        for &h in &set {
            if h == 0 || h > MAX_HOURS_OFFSET {
                return Err(VoteError::Validation(format!(
                    "hoursOffsets must be within 1..={MAX_HOURS_OFFSET}, got {h}"
                )));
            }
        }
        Ok(Self(set.into_iter().collect()))
    }

    pub fn hours(&self) -> &[u32] {
        &self.0
    }

    pub fn max_offset(&self) -> u32 {
        *self.0.last().expect("validated non-empty at construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(HoursOffsetGroups::new(Vec::<u32>::new()).is_err());
    }

    #[test]
    fn rejects_zero_and_out_of_range() {
        assert!(HoursOffsetGroups::new([0]).is_err());
        assert!(HoursOffsetGroups::new([49]).is_err());
    }

    #[test]
    fn dedups_and_sorts() {
        let groups = HoursOffsetGroups::new([24, 1, 24, 12]).unwrap();
        assert_eq!(groups.hours(), &[1, 12, 24]);
        assert_eq!(groups.max_offset(), 24);
    }
}
