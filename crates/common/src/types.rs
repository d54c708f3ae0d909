// Core domain types shared between the relay and its clients.
//
// Every 64-bit identifier crosses the wire as a decimal string. Browser
// clients decode JSON numbers into IEEE doubles, which silently corrupt
// snowflake ids above 2^53, so the string form is baked into the id types
// themselves instead of being repeated at each call site.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Failure to parse an identifier from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier '{0}' is not a decimal integer")]
    NotDecimal(String),
    #[error("identifier {0} must be positive")]
    NotPositive(i64),
}

fn parse_positive_id(raw: &str) -> Result<i64, IdParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdParseError::Empty);
    }
    let value =
        trimmed.parse::<i64>().map_err(|_| IdParseError::NotDecimal(trimmed.to_string()))?;
    if value <= 0 {
        return Err(IdParseError::NotPositive(value));
    }
    Ok(value)
}

macro_rules! decimal_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                parse_positive_id(raw).map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(DecimalIdVisitor).map(Self)
            }
        }
    };
}

decimal_id!(
    /// Identifier of a user account.
    UserId
);
decimal_id!(
    /// Identifier of a picture (the collaboratively edited resource).
    ResourceId
);
decimal_id!(
    /// Identifier of a space (the collaborative container of pictures).
    WorkspaceId
);

/// Accepts either a JSON integer or a decimal string.
struct DecimalIdVisitor;

impl<'de> Visitor<'de> for DecimalIdVisitor {
    type Value = i64;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a decimal string or integer identifier")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<i64, E> {
        Ok(value)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<i64, E> {
        i64::try_from(value).map_err(|_| E::custom(format!("identifier {value} overflows i64")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<i64, E> {
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| E::custom(format!("identifier '{value}' is not a decimal integer")))
    }
}

/// Account-level role, independent of any space membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Public view of a user attached to every outbound notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub role: UserRole,
}
