use std::collections::BTreeMap;

/// Four-way incoming/outgoing yes/no tally for one bucket (either the
/// all-time total or one hourly cumulative window).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersGroup {
    pub incoming_yes: u32,
    pub incoming_no: u32,
    pub outgoing_yes: u32,
    pub outgoing_no: u32,
}

impl CountersGroup {
    pub fn add(&mut self, other: CountersGroup) {
        self.incoming_yes += other.incoming_yes;
        self.incoming_no += other.incoming_no;
        self.outgoing_yes += other.outgoing_yes;
        self.outgoing_no += other.outgoing_no;
    }
}

pub type LifetimeCounters = CountersGroup;

/// Cumulative yes/no counts keyed by "hours ago" offset: the bucket at
/// offset `h` holds the total over the last `h` hours, not just the hour
/// `h` hours ago.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourlyCounters(BTreeMap<u32, CountersGroup>);

impl HourlyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, offset: u32, bucket: CountersGroup) {
        self.0.insert(offset, bucket);
    }

    pub fn get(&self, offset: u32) -> CountersGroup {
        self.0.get(&offset).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, CountersGroup)> + '_ {
        self.0.iter().map(|(&o, &b)| (o, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_all_four_fields() {
        let mut a = CountersGroup {
            incoming_yes: 1,
            incoming_no: 2,
            outgoing_yes: 3,
            outgoing_no: 4,
        };
        a.add(CountersGroup {
            incoming_yes: 10,
            incoming_no: 20,
            outgoing_yes: 30,
            outgoing_no: 40,
        });
        assert_eq!(a.incoming_yes, 11);
        assert_eq!(a.incoming_no, 22);
        assert_eq!(a.outgoing_yes, 33);
        assert_eq!(a.outgoing_no, 44);
    }

    #[test]
    fn missing_offset_reads_as_zero() {
        let hourly = HourlyCounters::new();
        assert_eq!(hourly.get(12), CountersGroup::default());
    }
}
