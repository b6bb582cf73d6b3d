use core::str::FromStr;

use serde::{Deserialize, Serialize};

use granary_core::DomainError;

/// Warehouse operation role.
///
/// Closed set: the domain's role separation is fixed (platform admins,
/// warehouse owners, floor attendants), so roles are typed rather than
/// opaque strings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Owner,
    Attendant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Owner => "OWNER",
            Role::Attendant => "ATTENDANT",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "OWNER" => Ok(Role::Owner),
            "ATTENDANT" => Ok(Role::Attendant),
            other => Err(DomainError::validation(format!("unknown role '{other}'"))),
        }
    }
}
