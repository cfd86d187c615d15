// src/validator.rs
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{LeaveType, DATE_FORMAT};
use crate::roster::RosterIndex;

pub const DEFAULT_CUTOFF_HOUR: u32 = 10;

/// Raw form input, exactly as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaveFields {
    /// Selection key: a student id or display name depending on `RosterKey`.
    pub student: String,
    pub student_name: String,
    pub class_name: String,
    pub date: String,
    pub leave_type: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLeave {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub date: NaiveDate,
    pub leave_type: LeaveType,
    pub note: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("All fields are required (missing: {0})")]
    MissingField(&'static str),

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("The selected date {date} has already passed. Choose today or a later date.")]
    DateInPast { date: NaiveDate, today: NaiveDate },

    #[error("Today's submission deadline has passed (until {cutoff_hour:02}:00)")]
    DeadlinePassed { cutoff_hour: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    cutoff_hour: u32,
}

impl Validator {
    pub fn new(cutoff_hour: u32) -> Self {
        Self { cutoff_hour }
    }

    pub fn cutoff_hour(&self) -> u32 {
        self.cutoff_hour
    }

    /// Checks a submission against the roster and the local time `now_local`.
    ///
    /// Date rules run first when the date parses, so a past date is reported
    /// as such even if other fields are blank.
    pub fn validate(
        &self,
        fields: &LeaveFields,
        roster: &RosterIndex,
        now_local: NaiveDateTime,
    ) -> Result<ValidatedLeave, ValidationError> {
        let date = self.check_date(&fields.date, now_local)?;

        let selection = required(&fields.student, "student")?;
        let student_name = required(&fields.student_name, "studentName")?;
        let class_name = required(&fields.class_name, "className")?;
        let date = date.ok_or(ValidationError::MissingField("date"))?;
        let leave_type = required(&fields.leave_type, "leaveType")?;
        let note = required(&fields.note, "note")?;

        let student = roster
            .lookup(selection)
            .filter(|s| !s.id.trim().is_empty())
            .ok_or(ValidationError::MissingField("studentId"))?;

        Ok(ValidatedLeave {
            student_id: student.id.trim().to_string(),
            student_name: student_name.to_string(),
            class_name: class_name.to_string(),
            date,
            leave_type: LeaveType::from(leave_type.to_string()),
            note: note.to_string(),
        })
    }

    /// Date rules alone: parse `raw_date` and check it against today and the
    /// cutoff. A blank date passes as `None`; the caller reports it missing.
    pub fn check_date(
        &self,
        raw_date: &str,
        now_local: NaiveDateTime,
    ) -> Result<Option<NaiveDate>, ValidationError> {
        let raw_date = raw_date.trim();
        if raw_date.is_empty() {
            return Ok(None);
        }
        let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT)
            .map_err(|_| ValidationError::InvalidDate(raw_date.to_string()))?;
        self.check_deadline(date, now_local)?;
        Ok(Some(date))
    }

    fn check_deadline(&self, date: NaiveDate, now_local: NaiveDateTime) -> Result<(), ValidationError> {
        let today = now_local.date();
        if date < today {
            return Err(ValidationError::DateInPast { date, today });
        }
        if date == today && now_local.hour() >= self.cutoff_hour {
            return Err(ValidationError::DeadlinePassed {
                cutoff_hour: self.cutoff_hour,
            });
        }
        Ok(())
    }
}

fn required<'a>(value: &'a str, name: &'static str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::MissingField(name))
    } else {
        Ok(trimmed)
    }
}
