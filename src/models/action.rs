use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of change a mutation applies to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationAction::Create => write!(f, "create"),
            MutationAction::Update => write!(f, "update"),
            MutationAction::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for MutationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(MutationAction::Create),
            "update" => Ok(MutationAction::Update),
            "delete" => Ok(MutationAction::Delete),
            _ => Err(format!(
                "Invalid action '{}'. Valid options: create, update, delete",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display() {
        assert_eq!(format!("{}", MutationAction::Create), "create");
        assert_eq!(format!("{}", MutationAction::Update), "update");
        assert_eq!(format!("{}", MutationAction::Delete), "delete");
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!(
            MutationAction::from_str("create").unwrap(),
            MutationAction::Create
        );
        assert_eq!(
            MutationAction::from_str("Delete").unwrap(),
            MutationAction::Delete
        );
        assert!(MutationAction::from_str("patch").is_err());
    }
}
