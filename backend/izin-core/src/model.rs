// src/model.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::{Fields, Value};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Stored field names shared by the ledger documents.
const F_STUDENT_ID: &str = "studentId";
const F_STUDENT_NAME: &str = "studentName";
const F_CLASS_NAME: &str = "className";
const F_LEAVE_TYPE: &str = "leaveType";
const F_NOTE: &str = "note";
const F_DATE: &str = "date";
const F_RECORDED_AT: &str = "recordedAt";
const F_STATUS: &str = "status";
const F_ARRIVAL_TIME: &str = "arrivalTime";
const F_DEPARTURE_TIME: &str = "departureTime";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class: String,
}

/// Kind of absence. The source forms accept free text, so anything that is
/// not a recognised sick/permission spelling is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LeaveType {
    Sick,
    Permission,
    Other(String),
}

impl LeaveType {
    pub fn as_str(&self) -> &str {
        match self {
            LeaveType::Sick => "sick",
            LeaveType::Permission => "permission",
            LeaveType::Other(raw) => raw,
        }
    }
}

impl From<String> for LeaveType {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "sick" | "sakit" => LeaveType::Sick,
            "permission" | "izin" => LeaveType::Permission,
            _ => LeaveType::Other(raw.trim().to_string()),
        }
    }
}

impl From<LeaveType> for String {
    fn from(leave_type: LeaveType) -> Self {
        leave_type.as_str().to_string()
    }
}

impl fmt::Display for LeaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry of the per-day leave ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub leave_type: LeaveType,
    pub note: String,
    pub date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

impl LeaveRequest {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(F_STUDENT_ID.into(), Value::from(self.student_id.as_str()));
        fields.insert(F_STUDENT_NAME.into(), Value::from(self.student_name.as_str()));
        fields.insert(F_CLASS_NAME.into(), Value::from(self.class_name.as_str()));
        fields.insert(F_LEAVE_TYPE.into(), Value::from(self.leave_type.as_str()));
        fields.insert(F_NOTE.into(), Value::from(self.note.as_str()));
        fields.insert(
            F_DATE.into(),
            Value::from(self.date.format(DATE_FORMAT).to_string()),
        );
        fields.insert(F_RECORDED_AT.into(), Value::from(self.recorded_at));
        fields
    }
}

/// A student's entry in the per-day attendance ledger.
///
/// Identity, `status` and `note` are overwritten by every leave submission.
/// `arrival_time` and `departure_time` are only ever filled when absent or
/// null. A check-in value that is not a timestamp (such as a `"07:15"`
/// string) counts as set; it stays in `extra` and is written back unchanged,
/// like every other field this service does not own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub status: String,
    pub note: String,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub extra: Fields,
}

impl AttendanceRecord {
    pub fn from_fields(fields: &Fields) -> Self {
        let text = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let owned = [F_STUDENT_ID, F_STUDENT_NAME, F_CLASS_NAME, F_STATUS, F_NOTE];
        // Typed timestamps and nulls are owned here; any other value is foreign.
        let is_typed_time = |name: &str, value: &Value| {
            (name == F_ARRIVAL_TIME || name == F_DEPARTURE_TIME)
                && matches!(value, Value::Timestamp(_) | Value::Null)
        };
        Self {
            student_id: text(F_STUDENT_ID),
            student_name: text(F_STUDENT_NAME),
            class_name: text(F_CLASS_NAME),
            status: text(F_STATUS),
            note: text(F_NOTE),
            arrival_time: fields.get(F_ARRIVAL_TIME).and_then(Value::as_timestamp),
            departure_time: fields.get(F_DEPARTURE_TIME).and_then(Value::as_timestamp),
            extra: fields
                .iter()
                .filter(|(name, value)| {
                    !owned.contains(&name.as_str()) && !is_typed_time(name, value)
                })
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Sets arrival and departure to `now` where no value is present yet.
    pub fn fill_missing_times(&mut self, now: DateTime<Utc>) {
        if self.arrival_time.is_none() && !self.extra.contains_key(F_ARRIVAL_TIME) {
            self.arrival_time = Some(now);
        }
        if self.departure_time.is_none() && !self.extra.contains_key(F_DEPARTURE_TIME) {
            self.departure_time = Some(now);
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = self.extra.clone();
        fields.insert(F_STUDENT_ID.into(), Value::from(self.student_id.as_str()));
        fields.insert(F_STUDENT_NAME.into(), Value::from(self.student_name.as_str()));
        fields.insert(F_CLASS_NAME.into(), Value::from(self.class_name.as_str()));
        fields.insert(F_STATUS.into(), Value::from(self.status.as_str()));
        fields.insert(F_NOTE.into(), Value::from(self.note.as_str()));
        if let Some(ts) = self.arrival_time {
            fields.insert(F_ARRIVAL_TIME.into(), Value::from(ts));
        }
        if let Some(ts) = self.departure_time {
            fields.insert(F_DEPARTURE_TIME.into(), Value::from(ts));
        }
        fields
    }
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
