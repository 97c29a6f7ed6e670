use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Name the oracle returns when the probe face matches nobody.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A registered student and their reference face image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolledStudent {
    pub name: String,
    /// `data:image/jpeg;base64,...` payload captured at enrollment.
    #[serde(rename = "faceDataUri")]
    pub face_data_uri: String,
}

impl EnrolledStudent {
    pub fn new(name: impl Into<String>, face_data_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            face_data_uri: face_data_uri.into(),
        }
    }
}

/// A student marked present at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Calendar day of the record in the host's local time zone.
    pub fn local_day(&self) -> NaiveDate {
        self.timestamp.with_timezone(&Local).date_naive()
    }
}

/// Window in which a second recognition of the same student is ignored.
///
/// Deserialized through [`FromStr`](std::str::FromStr), so config files and
/// environment variables accept the same spellings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum DedupScope {
    /// One record per student per local calendar day.
    #[default]
    PerDay,
    /// One record per student until attendance is cleared.
    Ever,
}

impl DedupScope {
    /// Whether `existing` already covers a new mark for the same student at `now`.
    pub fn covers(self, existing: &AttendanceRecord, now: DateTime<Utc>) -> bool {
        match self {
            DedupScope::Ever => true,
            DedupScope::PerDay => existing.local_day() == now.with_timezone(&Local).date_naive(),
        }
    }
}

impl std::str::FromStr for DedupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "per-day" | "daily" => Ok(Self::PerDay),
            "ever" | "global" => Ok(Self::Ever),
            other => Err(format!("unknown dedup scope {other:?} (expected \"day\" or \"ever\")")),
        }
    }
}

impl TryFrom<String> for DedupScope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Result of the enrollment suitability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollVerdict {
    pub success: bool,
    pub message: String,
}

/// Result of a recognition call: an enrolled name or [`UNKNOWN_NAME`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    pub name: String,
}

impl Identification {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
        }
    }

    /// True for the sentinel, blank names, and any casing of "unknown".
    pub fn is_unknown(&self) -> bool {
        let name = self.name.trim();
        name.is_empty() || name.eq_ignore_ascii_case(UNKNOWN_NAME)
    }
}
