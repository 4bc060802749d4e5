use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{QueryDescriptor, RawDocument};

pub const APPOINTMENTS_COLLECTION: &str = "appointments";
pub const DOCTORS_COLLECTION: &str = "doctors";

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(DocumentId);

/// Recognized appointment groupings. Statuses outside this set are kept in
/// the materialized list but shown in no bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Upcoming,
    Past,
}

impl StatusBucket {
    pub const ALL: [StatusBucket; 2] = [StatusBucket::Upcoming, StatusBucket::Past];

    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "upcoming" => Some(StatusBucket::Upcoming),
            "past" => Some(StatusBucket::Past),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusBucket::Upcoming => "upcoming",
            StatusBucket::Past => "past",
        }
    }
}

pub trait StatusKeyed {
    fn status(&self) -> &str;
}

/// A locally materialized, typed counterpart of one remote document.
/// `materialize` returns `None` for documents that cannot become a record
/// (no id, or a field of the wrong shape); such documents are dropped from
/// the snapshot rather than failing it.
pub trait Record: Sized + Send + Sync + 'static {
    fn materialize(doc: &RawDocument) -> Option<Self>;
    fn id(&self) -> &DocumentId;
}

fn decode_fields<T: DeserializeOwned>(doc: &RawDocument) -> Option<T> {
    serde_json::from_value(Value::Object(doc.fields.clone())).ok()
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(skip)]
    pub id: DocumentId,
    #[serde(default)]
    pub doctor_name: String,
    #[serde(default)]
    pub appointment_date: String,
    #[serde(default)]
    pub appointment_time: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn query() -> QueryDescriptor {
        QueryDescriptor::new(APPOINTMENTS_COLLECTION, "timestamp")
    }
}

impl Record for Appointment {
    fn materialize(doc: &RawDocument) -> Option<Self> {
        let id = doc.id.clone()?;
        let mut record: Self = decode_fields(doc)?;
        record.id = id;
        Some(record)
    }

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

impl StatusKeyed for Appointment {
    fn status(&self) -> &str {
        &self.status
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    #[serde(skip)]
    pub id: DocumentId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub specialization: String,
    #[serde(default)]
    pub experience: String,
}

impl Doctor {
    pub fn query() -> QueryDescriptor {
        QueryDescriptor::new(DOCTORS_COLLECTION, "name")
    }

    /// Search predicate used by the consultation listing: blank queries match
    /// everything, otherwise a case-insensitive substring match on the name.
    /// The query is matched as typed, padding included.
    pub fn name_matches(&self, query: &str) -> bool {
        if query.trim().is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&query.to_lowercase())
    }
}

impl Record for Doctor {
    fn materialize(doc: &RawDocument) -> Option<Self> {
        let id = doc.id.clone()?;
        let mut record: Self = decode_fields(doc)?;
        record.id = id;
        Some(record)
    }

    fn id(&self) -> &DocumentId {
        &self.id
    }
}

/// The editable subset of an appointment, sent as a field mapping so that
/// untouched fields stay untouched on the remote document.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AppointmentPatch {
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub notes: Option<String>,
}

impl AppointmentPatch {
    pub fn into_fields(self) -> serde_json::Map<String, Value> {
        let mut fields = serde_json::Map::new();
        if let Some(date) = self.appointment_date {
            fields.insert("appointmentDate".into(), Value::String(date));
        }
        if let Some(time) = self.appointment_time {
            fields.insert("appointmentTime".into(), Value::String(time));
        }
        if let Some(notes) = self.notes {
            fields.insert("notes".into(), Value::String(notes));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document(id: Option<&str>, fields: Value) -> RawDocument {
        let Value::Object(fields) = fields else {
            panic!("fields fixture must be a JSON object");
        };
        RawDocument {
            id: id.map(DocumentId::new),
            fields,
        }
    }

    #[test]
    fn status_bucket_recognizes_only_known_statuses() {
        assert_eq!(
            StatusBucket::from_status("upcoming"),
            Some(StatusBucket::Upcoming)
        );
        assert_eq!(StatusBucket::from_status("past"), Some(StatusBucket::Past));
        assert_eq!(StatusBucket::from_status("done"), None);
        assert_eq!(StatusBucket::from_status("Upcoming"), None);
        assert_eq!(StatusBucket::from_status(""), None);
    }

    #[test]
    fn appointment_materializes_from_camel_case_fields() {
        let doc = document(
            Some("appt-1"),
            json!({
                "doctorName": "Wanjiru",
                "appointmentDate": "2025-03-14",
                "appointmentTime": "10:30",
                "notes": "follow-up",
                "status": "upcoming",
                "timestamp": "2025-03-14T10:30:00Z"
            }),
        );

        let appointment = Appointment::materialize(&doc).expect("materialize");
        assert_eq!(appointment.id.as_str(), "appt-1");
        assert_eq!(appointment.doctor_name, "Wanjiru");
        assert_eq!(appointment.appointment_date, "2025-03-14");
        assert_eq!(appointment.status, "upcoming");
        assert!(appointment.timestamp.is_some());
    }

    #[test]
    fn appointment_without_id_is_dropped() {
        let doc = document(None, json!({ "doctorName": "Otieno", "status": "past" }));
        assert!(Appointment::materialize(&doc).is_none());
    }

    #[test]
    fn appointment_with_miscast_field_is_dropped() {
        let doc = document(Some("appt-2"), json!({ "doctorName": 17, "status": "past" }));
        assert!(Appointment::materialize(&doc).is_none());
    }

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let doc = document(Some("appt-3"), json!({ "status": "upcoming" }));
        let appointment = Appointment::materialize(&doc).expect("materialize");
        assert_eq!(appointment.doctor_name, "");
        assert_eq!(appointment.notes, "");
        assert!(appointment.timestamp.is_none());
    }

    #[test]
    fn doctor_search_is_case_insensitive_and_blank_matches_all() {
        let doctor = Doctor {
            name: "Dr. Achieng Odhiambo".to_string(),
            ..Doctor::default()
        };
        assert!(doctor.name_matches("achieng"));
        assert!(doctor.name_matches("ODHIAMBO"));
        assert!(doctor.name_matches(""));
        assert!(doctor.name_matches("   "));
        assert!(!doctor.name_matches("mwangi"));
    }

    #[test]
    fn doctor_search_matches_padded_queries_literally() {
        let doctor = Doctor {
            name: "Dr. Achieng Odhiambo".to_string(),
            ..Doctor::default()
        };
        // " achieng " appears verbatim in the name, " odhiambo " does not.
        assert!(doctor.name_matches(" achieng "));
        assert!(!doctor.name_matches(" odhiambo "));
    }

    #[test]
    fn patch_serializes_only_populated_fields() {
        let patch = AppointmentPatch {
            appointment_date: Some("2025-04-01".to_string()),
            appointment_time: None,
            notes: Some("bring referral letter".to_string()),
        };
        let fields = patch.into_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["appointmentDate"], json!("2025-04-01"));
        assert_eq!(fields["notes"], json!("bring referral letter"));
        assert!(!fields.contains_key("appointmentTime"));
    }
}
