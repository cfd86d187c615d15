// src/recorder.rs
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::model::{date_key, AttendanceRecord, LeaveRequest};
use crate::store::{DocumentStore, Fields, StoreError, Value};
use crate::validator::ValidatedLeave;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStage {
    LeaveLedger,
    AttendanceLedger,
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStage::LeaveLedger => f.write_str("leave ledger"),
            RecordStage::AttendanceLedger => f.write_str("attendance ledger"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Failed to write the {stage}")]
    StoreUnavailable {
        stage: RecordStage,
        #[source]
        source: StoreError,
    },
}

impl RecordError {
    /// True when the leave entry landed but the attendance sync did not.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            RecordError::StoreUnavailable {
                stage: RecordStage::AttendanceLedger,
                ..
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct LedgerCollections {
    pub leave: String,
    pub attendance: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub leave: LeaveRequest,
    pub attendance: AttendanceRecord,
}

/// Writes validated leave into the leave ledger and mirrors it into the
/// attendance ledger.
///
/// The attendance update is a read followed by a separate merge-write with no
/// transaction around it. Two submissions for the same student and day that
/// interleave inside that window both succeed; the later one's status and
/// note win, and the arrival/departure defaults may be written twice. Within
/// one process the API's in-flight guard serializes such pairs.
pub struct LeaveRecorder {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    collections: LedgerCollections,
}

impl LeaveRecorder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        collections: LedgerCollections,
    ) -> Self {
        Self {
            store,
            clock,
            collections,
        }
    }

    pub async fn record(&self, leave: &ValidatedLeave) -> Result<Recorded, RecordError> {
        let day = date_key(leave.date);
        let now = self.clock.now().with_timezone(&Utc);

        let request = LeaveRequest {
            student_id: leave.student_id.clone(),
            student_name: leave.student_name.clone(),
            class_name: leave.class_name.clone(),
            leave_type: leave.leave_type.clone(),
            note: leave.note.clone(),
            date: leave.date,
            recorded_at: now,
        };

        // Step 1: blind merge, last submission for this student/day wins.
        self.store
            .set_merge(
                &self.collections.leave,
                &day,
                single_entry(&request.student_id, request.to_fields()),
            )
            .await
            .map_err(|source| {
                error!(
                    "Leave ledger write failed for {} on {}: {}",
                    request.student_id, day, source
                );
                RecordError::StoreUnavailable {
                    stage: RecordStage::LeaveLedger,
                    source,
                }
            })?;
        info!(
            "Recorded {} for student {} on {}",
            request.leave_type, request.student_id, day
        );

        // Step 2: read-modify-write of the student's attendance entry.
        let attendance = self
            .sync_attendance(&day, &request)
            .await
            .map_err(|source| {
                warn!(
                    "Leave for {} on {} was saved but attendance sync failed: {}",
                    request.student_id, day, source
                );
                RecordError::StoreUnavailable {
                    stage: RecordStage::AttendanceLedger,
                    source,
                }
            })?;

        Ok(Recorded {
            leave: request,
            attendance,
        })
    }

    async fn sync_attendance(
        &self,
        day: &str,
        request: &LeaveRequest,
    ) -> Result<AttendanceRecord, StoreError> {
        let existing = self
            .store
            .get(&self.collections.attendance, day)
            .await?
            .and_then(|doc| doc.fields.get(&request.student_id).cloned());

        let record = merge_attendance(
            existing.as_ref().and_then(Value::as_map),
            request,
        );

        self.store
            .set_merge(
                &self.collections.attendance,
                day,
                single_entry(&request.student_id, record.to_fields()),
            )
            .await?;
        info!(
            "Attendance for {} on {} set to '{}'",
            request.student_id, day, record.status
        );
        Ok(record)
    }
}

/// Applies a leave submission on top of an existing attendance entry.
pub fn merge_attendance(existing: Option<&Fields>, request: &LeaveRequest) -> AttendanceRecord {
    let mut record = existing
        .map(AttendanceRecord::from_fields)
        .unwrap_or_default();
    record.student_id = request.student_id.clone();
    record.student_name = request.student_name.clone();
    record.class_name = request.class_name.clone();
    record.status = request.leave_type.to_string();
    record.note = request.note.clone();
    record.fill_missing_times(request.recorded_at);
    record
}

fn single_entry(student_id: &str, fields: Fields) -> Fields {
    let mut update = Fields::new();
    update.insert(student_id.to_string(), Value::Map(fields));
    update
}
