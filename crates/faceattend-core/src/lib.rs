//! faceattend-core — attendance bookkeeping and the AI face oracle.
//!
//! Enrollment and recognition are delegated to an external vision model
//! through [`FaceOracle`]; this crate owns the persisted roster, the
//! attendance rules and the single-slot poll scheduler.

pub mod data_uri;
pub mod llm;
pub mod oracle;
pub mod prompt;
pub mod roster;
pub mod schedule;
pub mod store;
pub mod types;

pub use llm::{LlmOracle, LlmSettings};
pub use oracle::{FaceOracle, OracleError};
pub use roster::{MarkOutcome, Roster};
pub use schedule::{spawn_poll, PollTask, SingleSlot, SlotGuard};
pub use store::{KvStore, StoreError};
pub use types::{
    AttendanceRecord, DedupScope, EnrollVerdict, EnrolledStudent, Identification, UNKNOWN_NAME,
};

/// Default location of the attendance database.
pub fn default_db_path() -> std::path::PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        });
    data_dir.join("faceattend").join("attendance.db")
}
