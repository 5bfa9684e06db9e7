//! Employee identity, enrollment status, session context and attendance events.

use crate::error::{StorageError, ValidationError};
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value of an unselected location picker; treated as "no location".
pub const LOCATION_PLACEHOLDER: &str = "Select Working Location";

pub const DATE_FORMAT: &str = "%d-%m-%Y";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Identifier owned by the external employee directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub i64);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EmployeeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(EmployeeId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    NotEnrolled,
    ImagesCaptured,
    Enrolled,
}

impl EnrollmentStatus {
    /// Marker persisted in the employee record.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::NotEnrolled => "Not Enrolled",
            EnrollmentStatus::ImagesCaptured => "Images Captured",
            EnrollmentStatus::Enrolled => "Enrolled",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not enrolled" => Ok(EnrollmentStatus::NotEnrolled),
            "images captured" => Ok(EnrollmentStatus::ImagesCaptured),
            "enrolled" => Ok(EnrollmentStatus::Enrolled),
            other => Err(StorageError::Corrupt(format!("unknown enrollment status {other:?}"))),
        }
    }
}

/// An employee as seen by this pipeline: identity, display name and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub display_name: String,
    pub status: EnrollmentStatus,
}

impl Employee {
    /// File-system-safe key `<sanitizedName>.<id>` that prefixes every sample.
    pub fn sample_key(&self) -> Result<String, ValidationError> {
        let name = sanitize_display_name(&self.display_name);
        if name.is_empty() {
            return Err(ValidationError::EmptyDisplayName(self.id));
        }
        Ok(format!("{name}.{}", self.id))
    }
}

/// Strip every non-alphanumeric character.
pub fn sanitize_display_name(name: &str) -> String {
    name.chars().filter(|c| c.is_alphanumeric()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceKind {
    ClockIn,
    ClockOut,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            // Casing differs between the two kinds in existing ledgers.
            AttendanceKind::ClockIn => "Clock in",
            AttendanceKind::ClockOut => "Clock Out",
        }
    }
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clock in" => Ok(AttendanceKind::ClockIn),
            "clock out" => Ok(AttendanceKind::ClockOut),
            other => Err(StorageError::Corrupt(format!("unknown attendance type {other:?}"))),
        }
    }
}

/// One verified clock event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    pub employee_id: EmployeeId,
    pub kind: AttendanceKind,
    pub location: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceEvent {
    /// Stamp an event with the current local date and time (whole seconds).
    pub fn now(employee_id: EmployeeId, kind: AttendanceKind, location: impl Into<String>) -> Self {
        let now = Local::now().naive_local();
        let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());
        Self {
            employee_id,
            kind,
            location: location.into(),
            date: now.date(),
            time,
        }
    }

    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn time_string(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }
}

/// Read-only context supplied by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Employee currently authenticated in the application.
    pub employee_id: EmployeeId,
    /// Chosen working location.
    pub location: String,
}

impl SessionContext {
    pub fn new(employee_id: EmployeeId, location: impl Into<String>) -> Self {
        Self {
            employee_id,
            location: location.into(),
        }
    }

    /// The trimmed location, or `NoLocation` if it is blank or still the placeholder.
    pub fn location(&self) -> Result<&str, ValidationError> {
        let location = self.location.trim();
        if location.is_empty() || location == LOCATION_PLACEHOLDER {
            return Err(ValidationError::NoLocation);
        }
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_non_alphanumeric() {
        assert_eq!(sanitize_display_name("Tan Ah-Kow, Jr."), "TanAhKowJr");
    }

    #[test]
    fn test_sample_key() {
        let e = Employee {
            id: EmployeeId(101),
            display_name: "Alice Tan".into(),
            status: EnrollmentStatus::NotEnrolled,
        };
        assert_eq!(e.sample_key().unwrap(), "AliceTan.101");
    }

    #[test]
    fn test_sample_key_rejects_symbol_only_name() {
        let e = Employee {
            id: EmployeeId(7),
            display_name: " -- ".into(),
            status: EnrollmentStatus::NotEnrolled,
        };
        assert_eq!(e.sample_key(), Err(ValidationError::EmptyDisplayName(EmployeeId(7))));
    }

    #[test]
    fn test_status_markers_parse_back() {
        for status in [
            EnrollmentStatus::NotEnrolled,
            EnrollmentStatus::ImagesCaptured,
            EnrollmentStatus::Enrolled,
        ] {
            assert_eq!(status.as_str().parse::<EnrollmentStatus>().unwrap(), status);
        }
        assert!("pending".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn test_attendance_kind_accepts_legacy_casing() {
        assert_eq!("Clock in".parse::<AttendanceKind>().unwrap(), AttendanceKind::ClockIn);
        assert_eq!("CLOCK OUT".parse::<AttendanceKind>().unwrap(), AttendanceKind::ClockOut);
    }

    #[test]
    fn test_location_validation() {
        let ok = SessionContext::new(EmployeeId(1), " SGH ");
        assert_eq!(ok.location().unwrap(), "SGH");

        for bad in ["", "   ", LOCATION_PLACEHOLDER] {
            let ctx = SessionContext::new(EmployeeId(1), bad);
            assert_eq!(ctx.location(), Err(ValidationError::NoLocation));
        }
    }

    #[test]
    fn test_event_formats() {
        let event = AttendanceEvent {
            employee_id: EmployeeId(101),
            kind: AttendanceKind::ClockIn,
            location: "SGH".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            time: NaiveTime::from_hms_opt(8, 5, 9).unwrap(),
        };
        assert_eq!(event.date_string(), "07-03-2024");
        assert_eq!(event.time_string(), "08:05:09");
    }

    #[test]
    fn test_event_now_has_whole_seconds() {
        let event = AttendanceEvent::now(EmployeeId(1), AttendanceKind::ClockOut, "KKH");
        assert_eq!(event.time.nanosecond(), 0);
        assert_eq!(event.date, Local::now().date_naive());
    }
}
