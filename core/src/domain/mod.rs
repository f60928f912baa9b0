pub mod active_user_key;
pub mod counter_update_group;
pub mod counters_group;
pub mod error;
pub mod hours_offset_groups;
pub mod romance;
pub mod vote;
pub mod vote_id;
pub mod vote_type;

pub use active_user_key::ActiveUserKey;
pub use counter_update_group::CounterUpdateGroup;
pub use counters_group::{CountersGroup, HourlyCounters, LifetimeCounters};
pub use error::{ErrorClass, VoteError};
pub use hours_offset_groups::{HoursOffsetGroups, MAX_HOURS_OFFSET};
pub use romance::Romance;
pub use vote::Vote;
pub use vote_id::VoteId;
pub use vote_type::VoteType;
