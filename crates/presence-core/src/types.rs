use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::embedding::Embedding;

/// Role of an enrolled person. Teachers may view the attendance list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0:?} (expected \"student\" or \"teacher\")")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d)?.parse().map_err(serde::de::Error::custom)
    }
}

fn default_role() -> Role {
    Role::Student
}

/// Stored roles are free text; anything that is not a teacher is a student.
fn deserialize_stored_role<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Role, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    let role = match raw.as_ref().and_then(|v| v.as_str()) {
        Some(text) => text.parse().unwrap_or_else(|e: UnknownRole| {
            tracing::warn!(error = %e, "treating unknown stored role as student");
            Role::Student
        }),
        None => default_role(),
    };
    Ok(role)
}

/// A registered person as returned by the record store.
///
/// `face_embedding` is kept exactly as stored (a JSON array, a textual
/// vector, null, ...). It is only decoded when the roster is matched, so a
/// single bad record cannot poison a roster fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledPerson {
    pub id: String,
    pub name: String,
    #[serde(default = "default_role", deserialize_with = "deserialize_stored_role")]
    pub role: Role,
    #[serde(default)]
    pub face_embedding: serde_json::Value,
}

/// Registration payload for a new person.
#[derive(Debug, Clone, Serialize)]
pub struct NewPerson {
    pub name: String,
    pub role: Role,
    #[serde(rename = "face_embedding", serialize_with = "serialize_values")]
    pub embedding: Embedding,
}

fn serialize_values<S: serde::Serializer>(e: &Embedding, s: S) -> Result<S::Ok, S::Error> {
    e.values.serialize(s)
}

fn deserialize_day<'de, D: serde::Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(d)?;
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

/// One person's attendance for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Store-assigned record ID; absent until the record is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub person_id: String,
    /// Serialized as `YYYY-MM-DD`. Datetime strings are accepted and truncated.
    #[serde(deserialize_with = "deserialize_day")]
    pub date: NaiveDate,
    pub present: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_case_insensitive() {
        assert_eq!("Teacher".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!(" student ".parse::<Role>().unwrap(), Role::Student);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_presence_date_accepts_datetime() {
        let record: PresenceRecord = serde_json::from_str(
            r#"{"id": "r1", "person_id": "a", "date": "2024-09-02 00:00:00.000Z", "present": true}"#,
        )
        .unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 9, 2).unwrap());
        assert_eq!(serde_json::to_value(&record).unwrap()["date"], "2024-09-02");
    }

    #[test]
    fn test_enrolled_person_keeps_raw_embedding() {
        let raw = r#"{
            "id": "abc123",
            "collectionName": "people",
            "name": "Ada",
            "role": "student",
            "face_embedding": "[0.5, 1.5]"
        }"#;
        let person: EnrolledPerson = serde_json::from_str(raw).unwrap();
        assert_eq!(person.role, Role::Student);
        assert_eq!(person.face_embedding, serde_json::json!("[0.5, 1.5]"));
    }

    #[test]
    fn test_role_deserializes_any_case() {
        let role: Role = serde_json::from_str(r#""TEACHER""#).unwrap();
        assert_eq!(role, Role::Teacher);
        assert!(serde_json::from_str::<Role>(r#""janitor""#).is_err());
    }

    #[test]
    fn test_enrolled_person_capitalized_role() {
        let raw = r#"{"id": "t1", "name": "Tess", "role": "Teacher", "face_embedding": [0, 0, 0]}"#;
        let person: EnrolledPerson = serde_json::from_str(raw).unwrap();
        assert_eq!(person.role, Role::Teacher);
    }

    #[test]
    fn test_enrolled_person_unknown_or_missing_role_kept_as_student() {
        for raw in [
            r#"{"id": "a", "name": "Al", "role": "admin", "face_embedding": [1]}"#,
            r#"{"id": "b", "name": "Bo", "role": "", "face_embedding": [1]}"#,
            r#"{"id": "c", "name": "Cy", "role": null, "face_embedding": [1]}"#,
            r#"{"id": "d", "name": "Di", "face_embedding": [1]}"#,
        ] {
            let person: EnrolledPerson = serde_json::from_str(raw).unwrap();
            assert_eq!(person.role, Role::Student, "{raw}");
        }
    }

    #[test]
    fn test_enrolled_person_missing_embedding_is_null() {
        let raw = r#"{"id": "x", "name": "Bo", "role": "teacher"}"#;
        let person: EnrolledPerson = serde_json::from_str(raw).unwrap();
        assert!(person.face_embedding.is_null());
    }

    #[test]
    fn test_new_person_serializes_embedding_as_array() {
        let person = NewPerson {
            name: "Ada".into(),
            role: Role::Student,
            embedding: Embedding::new(vec![1.0, 2.0]),
        };
        let json = serde_json::to_value(&person).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Ada", "role": "student", "face_embedding": [1.0, 2.0]})
        );
    }

    #[test]
    fn test_presence_record_date_format() {
        let record = PresenceRecord {
            id: None,
            person_id: "p1".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            present: true,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"person_id": "p1", "date": "2024-01-01", "present": true})
        );
    }
}
