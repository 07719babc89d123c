//! Identifiers of the fleet.
//!
//! Operator-scoped identifiers follow the `CC*OOO*...` layout used by
//! e-mobility roaming: the first two `*`-separated segments name the
//! charging station operator. The router relies on that to find the
//! back-end responsible for a supply point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::{DomainError, DomainResult};

const SEPARATOR: char = '*';

fn validate_plain(value: &str, label: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{label} must not be empty")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::Validation(format!(
            "{label} '{value}' must not contain whitespace"
        )));
    }
    Ok(())
}

fn validate_segments(value: &str, label: &str, min_segments: usize) -> DomainResult<()> {
    validate_plain(value, label)?;
    let segments: Vec<&str> = value.split(SEPARATOR).collect();
    if segments.len() < min_segments || segments.iter().any(|s| s.is_empty()) {
        return Err(DomainError::Validation(format!(
            "{label} '{value}' must have at least {min_segments} non-empty '*'-separated segments"
        )));
    }
    Ok(())
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal, $validate:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> DomainResult<Self> {
                let value = value.into();
                let validate: fn(&str, &str) -> DomainResult<()> = $validate;
                validate(&value, $label)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! operator_scoped {
    ($name:ident) => {
        impl $name {
            /// Operator prefix (`CC*OOO`) of this identifier.
            pub fn operator_id(&self) -> OperatorId {
                let mut parts = self.0.splitn(3, SEPARATOR);
                let country = parts.next().unwrap_or_default();
                let operator = parts.next().unwrap_or_default();
                OperatorId(format!("{country}{SEPARATOR}{operator}"))
            }
        }
    };
}

macro_rules! generated {
    ($name:ident) => {
        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }
    };
}

define_id!(
    /// Roaming network identifier
    NetworkId, "network id", validate_plain
);
define_id!(
    /// Charging station operator identifier, e.g. `DE*GEF`
    OperatorId, "operator id", |v, l| {
        validate_segments(v, l, 2)?;
        if v.split(SEPARATOR).count() != 2 {
            return Err(DomainError::Validation(format!(
                "{l} '{v}' must have exactly two '*'-separated segments"
            )));
        }
        Ok(())
    }
);
define_id!(
    /// Charging pool identifier, e.g. `DE*GEF*P1`
    PoolId, "pool id", |v, l| validate_segments(v, l, 3)
);
define_id!(
    /// Charging station identifier, e.g. `DE*GEF*S1`
    StationId, "station id", |v, l| validate_segments(v, l, 3)
);
define_id!(
    /// Supply point (EVSE) identifier, e.g. `DE*GEF*E1*1`
    SupplyPointId, "supply point id", |v, l| validate_segments(v, l, 3)
);
define_id!(ReservationId, "reservation id", validate_plain);
define_id!(SessionId, "session id", validate_plain);
define_id!(
    /// E-mobility provider / account issuer
    ProviderId, "provider id", validate_plain
);
define_id!(
    /// Registered back-end (authorization service or remote system)
    BackendId, "backend id", validate_plain
);
define_id!(
    /// Correlates the request/response events of one call chain
    EventTrackingId, "event tracking id", validate_plain
);
define_id!(
    /// Authentication token (RFID uid, contract id, ...)
    AuthToken, "authentication token", validate_plain
);
define_id!(ChargingProductId, "charging product id", validate_plain);

operator_scoped!(PoolId);
operator_scoped!(StationId);
operator_scoped!(SupplyPointId);

generated!(ReservationId);
generated!(SessionId);
generated!(EventTrackingId);

/// Reference to any entity of the hierarchy, used as event origin and as
/// session owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum EntityRef {
    Network(NetworkId),
    Operator(OperatorId),
    Pool(PoolId),
    Station(StationId),
    SupplyPoint(SupplyPointId),
}

impl EntityRef {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Network(_) => "network",
            EntityRef::Operator(_) => "operator",
            EntityRef::Pool(_) => "pool",
            EntityRef::Station(_) => "station",
            EntityRef::SupplyPoint(_) => "supply_point",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRef::Network(id) => id.as_str(),
            EntityRef::Operator(id) => id.as_str(),
            EntityRef::Pool(id) => id.as_str(),
            EntityRef::Station(id) => id.as_str(),
            EntityRef::SupplyPoint(id) => id.as_str(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Ties an identifier type to its [`EntityRef`] variant.
pub trait EntityId: Clone + Eq + std::hash::Hash + fmt::Display + Send + Sync + 'static {
    fn entity_ref(&self) -> EntityRef;
}

impl EntityId for NetworkId {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Network(self.clone())
    }
}

impl EntityId for OperatorId {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Operator(self.clone())
    }
}

impl EntityId for PoolId {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Pool(self.clone())
    }
}

impl EntityId for StationId {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::Station(self.clone())
    }
}

impl EntityId for SupplyPointId {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::SupplyPoint(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supply_point_id_exposes_operator_prefix() {
        let id: SupplyPointId = "DE*GEF*E1234*1".parse().unwrap();
        assert_eq!(id.operator_id().as_str(), "DE*GEF");
    }

    #[test]
    fn operator_id_requires_two_segments() {
        assert!(OperatorId::new("DE*GEF").is_ok());
        assert!(OperatorId::new("DEGEF").is_err());
        assert!(OperatorId::new("DE*GEF*X").is_err());
        assert!(OperatorId::new("DE*").is_err());
    }

    #[test]
    fn scoped_ids_reject_short_or_empty_segments() {
        assert!(StationId::new("DE*GEF").is_err());
        assert!(StationId::new("DE**S1").is_err());
        assert!(PoolId::new("DE*GEF*P1").is_ok());
    }

    #[test]
    fn empty_auth_token_fails_fast() {
        let err = AuthToken::new("  ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(AuthToken::new("04A2 11").is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
        assert_ne!(ReservationId::generate(), ReservationId::generate());
    }

    #[test]
    fn ids_deserialize_with_validation() {
        let ok: StationId = serde_json::from_str("\"DE*GEF*S1\"").unwrap();
        assert_eq!(ok.as_str(), "DE*GEF*S1");
        assert!(serde_json::from_str::<StationId>("\"S1\"").is_err());
    }

    #[test]
    fn entity_ref_display_includes_kind() {
        let r = EntityRef::Station("DE*GEF*S1".parse().unwrap());
        assert_eq!(r.to_string(), "station:DE*GEF*S1");
        assert_eq!(r.kind(), "station");
    }
}
