//! Employee directory and attendance ledger seams, with a SQLite implementation.
//!
//! The pipeline only talks to [`EmployeeDirectory`] and [`AttendanceLedger`];
//! [`SqliteStore`] is one injected implementation holding a single connection.

use crate::error::StorageError;
use crate::identity::{AttendanceEvent, AttendanceKind, Employee, EmployeeId, EnrollmentStatus};
use crate::identity::{DATE_FORMAT, TIME_FORMAT};
use crate::samples::SampleStore;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Read access to employees plus the one mutation this pipeline performs:
/// advancing enrollment status.
pub trait EmployeeDirectory {
    fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StorageError>;

    fn employee_exists(&self, id: EmployeeId) -> Result<bool, StorageError> {
        Ok(self.employee(id)?.is_some())
    }

    fn enrollment_status(&self, id: EmployeeId) -> Result<Option<EnrollmentStatus>, StorageError> {
        Ok(self.employee(id)?.map(|e| e.status))
    }

    fn set_enrollment_status(&self, id: EmployeeId, status: EnrollmentStatus) -> Result<(), StorageError>;
}

/// Append-only log of verified clock events.
pub trait AttendanceLedger {
    fn append(&self, event: &AttendanceEvent) -> Result<(), StorageError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees(
    employee_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    face_id TEXT NOT NULL DEFAULT 'Not Enrolled'
);
CREATE TABLE IF NOT EXISTS attendance(
    attendance_id INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id INTEGER NOT NULL,
    attendance_type TEXT NOT NULL,
    location TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    FOREIGN KEY (employee_id) REFERENCES employees (employee_id) ON DELETE CASCADE
);
";

/// SQLite-backed directory and ledger.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::init(Connection::open(path)?)?;
        tracing::debug!(path = %path.display(), "opened employee database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert an employee; `id` of `None` lets SQLite assign one.
    pub fn add_employee(&self, id: Option<EmployeeId>, name: &str) -> Result<EmployeeId, StorageError> {
        self.conn.execute(
            "INSERT INTO employees (employee_id, name, face_id) VALUES (?1, ?2, ?3)",
            params![id.map(|i| i.0), name, EnrollmentStatus::NotEnrolled.as_str()],
        )?;
        Ok(EmployeeId(self.conn.last_insert_rowid()))
    }

    /// Delete the employee row; status and attendance rows go with it.
    pub fn remove_employee(&self, id: EmployeeId) -> Result<bool, StorageError> {
        let n = self
            .conn
            .execute("DELETE FROM employees WHERE employee_id = ?1", params![id.0])?;
        Ok(n > 0)
    }

    /// Delete the employee's face samples, then the row.
    ///
    /// Samples go first, so a failure leaves the employee in place for a retry.
    /// Returns the number of samples removed, or `None` for an unknown employee.
    pub fn purge_employee(&self, id: EmployeeId, samples: &SampleStore) -> Result<Option<usize>, StorageError> {
        if !self.employee_exists(id)? {
            return Ok(None);
        }
        let removed = samples.delete_for(id)?;
        self.remove_employee(id)?;
        Ok(Some(removed))
    }

    pub fn employees(&self) -> Result<Vec<Employee>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT employee_id, name, face_id FROM employees ORDER BY employee_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut employees = Vec::new();
        for row in rows {
            let (id, name, status) = row?;
            employees.push(Employee {
                id: EmployeeId(id),
                display_name: name,
                status: status.parse()?,
            });
        }
        Ok(employees)
    }

    /// Attendance rows for one employee, oldest first.
    pub fn attendance_for(&self, id: EmployeeId) -> Result<Vec<AttendanceEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT attendance_type, location, date, time FROM attendance
             WHERE employee_id = ?1 ORDER BY attendance_id",
        )?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (kind, location, date, time) = row?;
            events.push(AttendanceEvent {
                employee_id: id,
                kind: kind.parse::<AttendanceKind>()?,
                location,
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|e| StorageError::Corrupt(format!("date {date:?}: {e}")))?,
                time: NaiveTime::parse_from_str(&time, TIME_FORMAT)
                    .map_err(|e| StorageError::Corrupt(format!("time {time:?}: {e}")))?,
            });
        }
        Ok(events)
    }
}

impl EmployeeDirectory for SqliteStore {
    fn employee(&self, id: EmployeeId) -> Result<Option<Employee>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, face_id FROM employees WHERE employee_id = ?1",
                params![id.0],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(name, status)| {
            Ok(Employee {
                id,
                display_name: name,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    fn set_enrollment_status(&self, id: EmployeeId, status: EnrollmentStatus) -> Result<(), StorageError> {
        let n = self.conn.execute(
            "UPDATE employees SET face_id = ?1 WHERE employee_id = ?2",
            params![status.as_str(), id.0],
        )?;
        if n == 0 {
            return Err(StorageError::MissingEmployee(id));
        }
        tracing::info!(employee = %id, status = %status, "enrollment status updated");
        Ok(())
    }
}

impl AttendanceLedger for SqliteStore {
    fn append(&self, event: &AttendanceEvent) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO attendance (employee_id, attendance_type, location, date, time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.employee_id.0,
                event.kind.as_str(),
                event.location,
                event.date_string(),
                event.time_string(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(employees: &[(i64, &str)]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, name) in employees {
            store.add_employee(Some(EmployeeId(*id)), name).unwrap();
        }
        store
    }

    #[test]
    fn test_new_employee_is_not_enrolled() {
        let store = store_with(&[(101, "Alice Tan")]);
        let e = store.employee(EmployeeId(101)).unwrap().unwrap();
        assert_eq!(e.display_name, "Alice Tan");
        assert_eq!(e.status, EnrollmentStatus::NotEnrolled);
        assert!(store.employee_exists(EmployeeId(101)).unwrap());
        assert!(!store.employee_exists(EmployeeId(102)).unwrap());
    }

    #[test]
    fn test_auto_assigned_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.add_employee(None, "A").unwrap();
        let b = store.add_employee(None, "B").unwrap();
        assert!(b.0 > a.0);
    }

    #[test]
    fn test_status_transitions_persist() {
        let store = store_with(&[(7, "Bob")]);
        store
            .set_enrollment_status(EmployeeId(7), EnrollmentStatus::ImagesCaptured)
            .unwrap();
        assert_eq!(
            store.enrollment_status(EmployeeId(7)).unwrap(),
            Some(EnrollmentStatus::ImagesCaptured)
        );
    }

    #[test]
    fn test_set_status_of_missing_employee() {
        let store = store_with(&[]);
        assert!(matches!(
            store.set_enrollment_status(EmployeeId(9), EnrollmentStatus::Enrolled),
            Err(StorageError::MissingEmployee(EmployeeId(9)))
        ));
    }

    #[test]
    fn test_ledger_stores_legacy_formats() {
        let store = store_with(&[(101, "Alice")]);
        let event = AttendanceEvent {
            employee_id: EmployeeId(101),
            kind: AttendanceKind::ClockIn,
            location: "SGH".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 1).unwrap(),
        };
        store.append(&event).unwrap();

        let (kind, date, time): (String, String, String) = store
            .conn
            .query_row("SELECT attendance_type, date, time FROM attendance", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(kind, "Clock in");
        assert_eq!(date, "31-01-2024");
        assert_eq!(time, "09:00:01");
        assert_eq!(store.attendance_for(EmployeeId(101)).unwrap(), vec![event]);
    }

    #[test]
    fn test_ledger_allows_repeated_events() {
        let store = store_with(&[(1, "A")]);
        let event = AttendanceEvent::now(EmployeeId(1), AttendanceKind::ClockIn, "KKH");
        store.append(&event).unwrap();
        store.append(&event).unwrap();
        assert_eq!(store.attendance_for(EmployeeId(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_ledger_rejects_unknown_employee() {
        let store = store_with(&[]);
        let event = AttendanceEvent::now(EmployeeId(5), AttendanceKind::ClockOut, "SGH");
        assert!(matches!(store.append(&event), Err(StorageError::Sqlite(_))));
    }

    #[test]
    fn test_remove_employee_cascades_attendance() {
        let store = store_with(&[(3, "C")]);
        store
            .append(&AttendanceEvent::now(EmployeeId(3), AttendanceKind::ClockIn, "SGH"))
            .unwrap();
        assert!(store.remove_employee(EmployeeId(3)).unwrap());
        assert!(store.employee(EmployeeId(3)).unwrap().is_none());
        assert!(store.attendance_for(EmployeeId(3)).unwrap().is_empty());
        assert!(!store.remove_employee(EmployeeId(3)).unwrap());
    }

    #[test]
    fn test_purge_removes_samples_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let samples = SampleStore::new(dir.path());
        let face = image::GrayImage::new(8, 8);
        samples.write("A.1", 1, &face).unwrap();
        samples.write("A.1", 2, &face).unwrap();
        samples.write("B.2", 1, &face).unwrap();
        let store = store_with(&[(1, "A"), (2, "B")]);

        assert_eq!(store.purge_employee(EmployeeId(1), &samples).unwrap(), Some(2));
        assert!(store.employee(EmployeeId(1)).unwrap().is_none());
        assert_eq!(samples.count_for(EmployeeId(1)).unwrap(), 0);
        assert_eq!(samples.count_for(EmployeeId(2)).unwrap(), 1);
        assert_eq!(store.purge_employee(EmployeeId(1), &samples).unwrap(), None);
    }

    #[test]
    fn test_purge_keeps_row_when_samples_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the sample directory should be.
        let root = dir.path().join("FaceData");
        std::fs::write(&root, "not a directory").unwrap();
        let store = store_with(&[(1, "A")]);

        assert!(store.purge_employee(EmployeeId(1), &SampleStore::new(&root)).is_err());
        assert!(store.employee(EmployeeId(1)).unwrap().is_some());
    }

    #[test]
    fn test_employees_listing_order() {
        let store = store_with(&[(20, "Zed"), (10, "Amy")]);
        let ids: Vec<i64> = store.employees().unwrap().iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![10, 20]);
    }
}
