use crate::engine::{AttendanceEngine, EngineError, RecognitionOutcome};
use serde::Serialize;
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "org.faceattend.Attend1";
pub const OBJECT_PATH: &str = "/org/faceattend/Attend1";

/// D-Bus interface for the FaceAttend daemon.
///
/// Bus name: org.faceattend.Attend1 (session bus)
/// Object path: /org/faceattend/Attend1
pub struct AttendService {
    engine: AttendanceEngine,
}

impl AttendService {
    pub fn new(engine: AttendanceEngine) -> Self {
        Self { engine }
    }
}

#[derive(Serialize)]
struct StudentSummary<'a> {
    name: &'a str,
    photo_bytes: usize,
}

fn to_fdo(err: EngineError) -> fdo::Error {
    if err.is_validation() {
        fdo::Error::InvalidArgs(err.user_message())
    } else {
        tracing::warn!(error = %err, "request failed");
        fdo::Error::Failed(err.user_message())
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("encoding reply: {e}")))
}

#[interface(name = "org.faceattend.Attend1")]
impl AttendService {
    /// Open the webcam and, if anyone is enrolled, start recognition polling.
    async fn start_webcam(&self) -> fdo::Result<String> {
        tracing::info!("start_webcam requested");
        self.engine.start_webcam().await.map_err(to_fdo)?;
        Ok(self.engine.status_message())
    }

    /// Stop polling and release the webcam.
    async fn stop_webcam(&self) -> fdo::Result<String> {
        tracing::info!("stop_webcam requested");
        self.engine.stop_webcam().await;
        Ok(self.engine.status_message())
    }

    /// Capture a frame and enroll it under `name` if the photo is accepted.
    async fn enroll(&self, name: &str) -> fdo::Result<(bool, String)> {
        tracing::info!(name, "enroll requested");
        let verdict = self.engine.enroll(name).await.map_err(to_fdo)?;
        Ok((verdict.success, verdict.message))
    }

    /// Run one recognition attempt now and return the resulting status line.
    async fn recognize_now(&self) -> fdo::Result<String> {
        match self.engine.recognize_now().await {
            RecognitionOutcome::Busy => Ok("Recognition already in progress.".to_string()),
            _ => Ok(self.engine.status_message()),
        }
    }

    /// JSON array of `{name, photo_bytes}`.
    async fn list_students(&self) -> fdo::Result<String> {
        let students = self.engine.list_students();
        let summary: Vec<StudentSummary<'_>> = students
            .iter()
            .map(|s| StudentSummary {
                name: &s.name,
                photo_bytes: s.face_data_uri.len(),
            })
            .collect();
        to_json(&summary)
    }

    /// Reference image data URI of the named student.
    async fn student_photo(&self, name: &str) -> fdo::Result<String> {
        self.engine.student_photo(name).map_err(to_fdo)
    }

    /// Remove every student with this exact name. Returns the number removed.
    async fn delete_student(&self, name: &str) -> fdo::Result<u32> {
        tracing::info!(name, "delete_student requested");
        let removed = self.engine.delete_student(name).map_err(to_fdo)?;
        Ok(removed as u32)
    }

    /// JSON array of `{name, timestamp}`, newest first.
    async fn list_attendance(&self, today_only: bool) -> fdo::Result<String> {
        to_json(&self.engine.list_attendance(today_only))
    }

    /// Remove all attendance records. Returns the number removed.
    async fn clear_attendance(&self) -> fdo::Result<u32> {
        tracing::info!("clear_attendance requested");
        let cleared = self.engine.clear_attendance().map_err(to_fdo)?;
        Ok(cleared as u32)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        to_json(&self.engine.status())
    }
}
