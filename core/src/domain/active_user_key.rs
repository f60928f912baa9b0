use uuid::Uuid;

use super::error::VoteError;

/// Identifies a single user within a country for counter lookups. Counters
/// are scoped per-user, not per-pair, so this carries no peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActiveUserKey {
    pub country_id: u16,
    pub user_id: Uuid,
}

impl ActiveUserKey {
    pub fn new(country_id: u16, user_id: Uuid) -> Result<Self, VoteError> {
        if country_id == 0 {
            return Err(VoteError::Validation("countryId must not be zero".into()));
        }
        if user_id.is_nil() {
            return Err(VoteError::Validation("userId must not be nil".into()));
        }
        Ok(Self {
            country_id,
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_country() {
        let err = ActiveUserKey::new(0, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, VoteError::Validation(_)));
    }

    #[test]
    fn rejects_nil_user() {
        let err = ActiveUserKey::new(1, Uuid::nil()).unwrap_err();
        assert!(matches!(err, VoteError::Validation(_)));
    }

    #[test]
    fn accepts_valid_input() {
        assert!(ActiveUserKey::new(1, Uuid::new_v4()).is_ok());
    }
}
