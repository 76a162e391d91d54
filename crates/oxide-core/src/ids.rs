//! Strongly-typed identifiers for domain entities.
//!
//! Storage assigns these as monotonically increasing integers, so id order
//! doubles as creation order.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(raw.parse()?))
            }
        }
    };
}

define_id!(ChangeId, "chg");
define_id!(SourceStampId, "ss");
define_id!(BuildsetId, "bs");
define_id!(BuildRequestId, "brq");
define_id!(SchedulerId, "sch");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_id_ordering() {
        let mut ids = vec![ChangeId::new(14), ChangeId::new(15), ChangeId::new(13)];
        ids.sort();
        assert_eq!(ids, vec![ChangeId::new(13), ChangeId::new(14), ChangeId::new(15)]);
    }

    #[test]
    fn test_change_id_parse() {
        let parsed: ChangeId = "chg_42".parse().unwrap();
        assert_eq!(parsed, ChangeId::new(42));
        let bare: ChangeId = "42".parse().unwrap();
        assert_eq!(bare, parsed);
    }

    #[test]
    fn test_scheduler_id_display() {
        assert_eq!(SchedulerId::new(19).to_string(), "19");
    }
}
