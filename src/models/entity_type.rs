use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity families whose mutations are captured for offline delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Appointment,
    VitalsReading,
    QueueEntry,
    GenericRecord,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Appointment => write!(f, "appointment"),
            EntityType::VitalsReading => write!(f, "vitals-reading"),
            EntityType::QueueEntry => write!(f, "queue-entry"),
            EntityType::GenericRecord => write!(f, "generic-record"),
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "appointment" => Ok(EntityType::Appointment),
            "vitals-reading" => Ok(EntityType::VitalsReading),
            "queue-entry" => Ok(EntityType::QueueEntry),
            "generic-record" => Ok(EntityType::GenericRecord),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: appointment, vitals-reading, \
                 queue-entry, generic-record",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_display() {
        assert_eq!(format!("{}", EntityType::Appointment), "appointment");
        assert_eq!(format!("{}", EntityType::VitalsReading), "vitals-reading");
        assert_eq!(format!("{}", EntityType::QueueEntry), "queue-entry");
        assert_eq!(format!("{}", EntityType::GenericRecord), "generic-record");
    }

    #[test]
    fn test_entity_type_from_str() {
        assert_eq!(
            EntityType::from_str("appointment").unwrap(),
            EntityType::Appointment
        );
        assert_eq!(
            EntityType::from_str("VITALS-READING").unwrap(),
            EntityType::VitalsReading
        );
        assert!(EntityType::from_str("lab-order").is_err());
    }

    #[test]
    fn test_entity_type_json_roundtrip() {
        let json = serde_json::to_string(&EntityType::QueueEntry).unwrap();
        assert_eq!(json, "\"queue-entry\"");

        let parsed: EntityType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EntityType::QueueEntry);
    }
}
