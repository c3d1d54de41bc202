//! Validated `domain.object_id` entity identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error("domain '{0}' contains invalid characters")]
    InvalidDomainChars(String),

    #[error("object_id '{0}' contains invalid characters")]
    InvalidObjectIdChars(String),
}

/// An entity identifier such as `binary_sensor.front_door`
///
/// Both parts are lowercase ASCII alphanumerics and underscores and may not
/// start or end with an underscore. The domain additionally may not contain
/// a double underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if domain.contains("__") || !is_slug(&domain) {
            return Err(EntityIdError::InvalidDomainChars(domain));
        }
        if !is_slug(&object_id) {
            return Err(EntityIdError::InvalidObjectIdChars(object_id));
        }

        Ok(Self { domain, object_id })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// True when the entity belongs to `domain`
    pub fn in_domain(&self, domain: &str) -> bool {
        self.domain == domain
    }
}

fn is_slug(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => {
                Self::new(domain, object_id)
            }
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sensor_id() {
        let id: EntityId = "binary_sensor.front_door".parse().unwrap();
        assert_eq!(id.domain(), "binary_sensor");
        assert_eq!(id.object_id(), "front_door");
        assert!(id.in_domain("binary_sensor"));
        assert_eq!(id.to_string(), "binary_sensor.front_door");
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "front_door".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
        assert_eq!(
            "zone.home.extra".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(
            ".home".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyDomain
        );
        assert_eq!(
            "zone.".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyObjectId
        );
    }

    #[test]
    fn test_invalid_characters() {
        assert!(matches!(
            "Person.anna".parse::<EntityId>(),
            Err(EntityIdError::InvalidDomainChars(_))
        ));
        assert!(matches!(
            "person.Anna".parse::<EntityId>(),
            Err(EntityIdError::InvalidObjectIdChars(_))
        ));
        assert!(matches!(
            "my__light.room".parse::<EntityId>(),
            Err(EntityIdError::InvalidDomainChars(_))
        ));
        assert!(matches!(
            "light._room".parse::<EntityId>(),
            Err(EntityIdError::InvalidObjectIdChars(_))
        ));
        assert!("light.my__room".parse::<EntityId>().is_ok());
    }

    #[test]
    fn test_serde_as_string() {
        let id = EntityId::new("siren", "hallway").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"siren.hallway\"");

        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<EntityId>("\"not an id\"").is_err());
    }
}
