//! Enrolled students and attendance records, mirrored from the store.
//!
//! Both collections are read once on load and written back wholesale
//! after every mutation.

use crate::store::{KvStore, StoreError, ATTENDANCE_KEY, STUDENTS_KEY};
use crate::types::{AttendanceRecord, DedupScope, EnrolledStudent};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;

/// Outcome of [`Roster::mark_present`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked(AttendanceRecord),
    AlreadyMarked,
}

pub struct Roster {
    store: KvStore,
    students: Vec<EnrolledStudent>,
    /// Newest first.
    attendance: Vec<AttendanceRecord>,
}

impl Roster {
    /// Load both collections. Undecodable entries are logged and start empty.
    pub fn load(store: KvStore) -> Result<Self, StoreError> {
        let students: Vec<EnrolledStudent> = load_list(&store, STUDENTS_KEY)?;
        let attendance: Vec<AttendanceRecord> = load_list(&store, ATTENDANCE_KEY)?;

        tracing::info!(
            students = students.len(),
            records = attendance.len(),
            "roster loaded"
        );

        Ok(Self {
            store,
            students,
            attendance,
        })
    }

    pub fn students(&self) -> &[EnrolledStudent] {
        &self.students
    }

    pub fn attendance(&self) -> &[AttendanceRecord] {
        &self.attendance
    }

    pub fn has_students(&self) -> bool {
        !self.students.is_empty()
    }

    pub fn student(&self, name: &str) -> Option<&EnrolledStudent> {
        self.students.iter().find(|s| s.name == name)
    }

    /// Append a student. Duplicate names are kept as separate entries.
    pub fn enroll(&mut self, student: EnrolledStudent) -> Result<(), StoreError> {
        let mut next = self.students.clone();
        next.push(student);
        self.store.put(STUDENTS_KEY, &next)?;
        self.students = next;
        Ok(())
    }

    /// Remove every student named exactly `name`. Attendance is untouched.
    pub fn delete_student(&mut self, name: &str) -> Result<usize, StoreError> {
        let before = self.students.len();
        let next: Vec<EnrolledStudent> = self
            .students
            .iter()
            .filter(|s| s.name != name)
            .cloned()
            .collect();
        let removed = before - next.len();
        if removed > 0 {
            self.store.put(STUDENTS_KEY, &next)?;
            self.students = next;
        }
        Ok(removed)
    }

    /// Record `name` as present at `now` unless `scope` already covers it.
    pub fn mark_present(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
        scope: DedupScope,
    ) -> Result<MarkOutcome, StoreError> {
        let already = self
            .attendance
            .iter()
            .any(|r| r.name == name && scope.covers(r, now));
        if already {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            timestamp: now,
        };
        let mut next = Vec::with_capacity(self.attendance.len() + 1);
        next.push(record.clone());
        next.extend(self.attendance.iter().cloned());
        self.store.put(ATTENDANCE_KEY, &next)?;
        self.attendance = next;
        Ok(MarkOutcome::Marked(record))
    }

    /// Drop all attendance records. Students are untouched.
    pub fn clear_attendance(&mut self) -> Result<usize, StoreError> {
        let cleared = self.attendance.len();
        self.store.put(ATTENDANCE_KEY, &Vec::<AttendanceRecord>::new())?;
        self.attendance.clear();
        Ok(cleared)
    }

    /// Map a name returned by the oracle onto an enrolled name.
    ///
    /// Exact match wins; otherwise a trimmed, case-insensitive match.
    pub fn resolve_name(&self, candidate: &str) -> Option<&str> {
        if let Some(s) = self.students.iter().find(|s| s.name == candidate) {
            return Some(&s.name);
        }
        let wanted = candidate.trim().to_lowercase();
        self.students
            .iter()
            .find(|s| s.name.trim().to_lowercase() == wanted)
            .map(|s| s.name.as_str())
    }

    /// Records whose local calendar day is `day`, newest first.
    pub fn present_on(&self, day: NaiveDate) -> Vec<AttendanceRecord> {
        self.attendance
            .iter()
            .filter(|r| r.local_day() == day)
            .cloned()
            .collect()
    }
}

fn load_list<T: DeserializeOwned>(store: &KvStore, key: &str) -> Result<Vec<T>, StoreError> {
    match store.get::<Vec<T>>(key) {
        Ok(v) => Ok(v.unwrap_or_default()),
        Err(err @ StoreError::Decode { .. }) => {
            tracing::warn!(key, error = %err, "discarding undecodable store entry");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
