//! Attendance engine: webcam lifecycle, enrollment and the recognition loop.
//!
//! The engine owns every piece of mutable state the daemon has. The webcam
//! and the poll task are held as owned resources and released on stop and
//! on shutdown. Recognition attempts share one [`SingleSlot`], so a tick
//! that lands while an attempt is in flight is dropped.

use crate::webcam::{CameraOpener, Webcam, WebcamError};
use chrono::{Local, Utc};
use faceattend_core::{
    data_uri, spawn_poll, AttendanceRecord, DedupScope, EnrollVerdict, EnrolledStudent,
    FaceOracle, MarkOutcome, OracleError, PollTask, Roster, SingleSlot, StoreError,
};
use faceattend_hw::FrameError;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;

pub const STATUS_INITIALIZING: &str = "Initializing...";
pub const STATUS_WEBCAM_ACTIVE: &str = "Webcam active. Point your face to the camera.";
pub const STATUS_WEBCAM_FAILED: &str = "Could not access webcam.";
pub const STATUS_WEBCAM_OFF: &str = "Webcam off.";
pub const STATUS_NO_STUDENTS: &str = "No students enrolled. Please register students.";
pub const STATUS_DETECTING: &str = "Detecting face...";
pub const STATUS_NOT_RECOGNIZED: &str = "Face not recognized. Please try again.";
pub const STATUS_NO_FRAME: &str = "Could not capture a frame. Please ensure the webcam is on.";
pub const STATUS_RECOGNITION_ERROR: &str = "An error occurred during recognition.";
pub const CAPTURE_FAILED: &str = "Could not capture image. Please ensure the webcam is on.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Please enter a student name.")]
    EmptyName,
    #[error("Could not capture image. Please ensure the webcam is on.")]
    WebcamOff,
    #[error("webcam error: {0}")]
    Webcam(#[from] WebcamError),
    #[error("capture failed: {0}")]
    Capture(#[source] WebcamError),
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),
    #[error("oracle call failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no enrolled student named {0:?}")]
    UnknownStudent(String),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Errors caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyName | EngineError::WebcamOff | EngineError::UnknownStudent(_)
        )
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Oracle(_) | EngineError::Join(_) => {
                "An unexpected error occurred.".to_string()
            }
            EngineError::Webcam(_) => STATUS_WEBCAM_FAILED.to_string(),
            EngineError::Capture(_) => CAPTURE_FAILED.to_string(),
            other => other.to_string(),
        }
    }
}

/// What a single recognition attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Marked(AttendanceRecord),
    AlreadyMarked(String),
    Unrecognized,
    NoStudents,
    NoFrame,
    /// Another attempt was in flight; nothing was done.
    Busy,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub recognition_interval: Duration,
    pub warmup_frames: usize,
    pub capture_attempts: usize,
    pub jpeg_quality: u8,
    pub dedup_scope: DedupScope,
}

/// Point-in-time view of the engine, serialized for `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub webcam: Option<String>,
    pub polling: bool,
    pub processing: bool,
    pub message: String,
    pub enrolled: usize,
    pub records: usize,
    pub present_today: usize,
    pub dedup_scope: DedupScope,
}

/// Clone-safe handle to the engine.
#[derive(Clone)]
pub struct AttendanceEngine {
    inner: Arc<Inner>,
}

struct Inner {
    roster: Mutex<Roster>,
    oracle: Arc<dyn FaceOracle>,
    opener: Arc<dyn CameraOpener>,
    settings: EngineSettings,
    webcam: Mutex<Option<Arc<Webcam>>>,
    poll: Mutex<Option<PollTask>>,
    slot: SingleSlot,
    status: Mutex<String>,
    /// Serializes webcam start/stop.
    lifecycle: tokio::sync::Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AttendanceEngine {
    pub fn new(
        roster: Roster,
        oracle: Arc<dyn FaceOracle>,
        opener: Arc<dyn CameraOpener>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                roster: Mutex::new(roster),
                oracle,
                opener,
                settings,
                webcam: Mutex::new(None),
                poll: Mutex::new(None),
                slot: SingleSlot::new(),
                status: Mutex::new(STATUS_INITIALIZING.to_string()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(status = %message, "status changed");
        *lock(&self.inner.status) = message;
    }

    pub fn status_message(&self) -> String {
        lock(&self.inner.status).clone()
    }

    pub fn webcam_on(&self) -> bool {
        lock(&self.inner.webcam).is_some()
    }

    pub fn polling(&self) -> bool {
        lock(&self.inner.poll).is_some()
    }

    // --- webcam lifecycle ---

    /// Open the webcam. A no-op if it is already running.
    pub async fn start_webcam(&self) -> Result<(), EngineError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.webcam_on() {
            return Ok(());
        }

        let opener = Arc::clone(&self.inner.opener);
        let warmup = self.inner.settings.warmup_frames;
        let opened =
            tokio::task::spawn_blocking(move || Webcam::start(opener.as_ref(), warmup)).await?;

        match opened {
            Ok(cam) => {
                tracing::info!(device = %cam.device(), "webcam started");
                *lock(&self.inner.webcam) = Some(Arc::new(cam));
                self.set_status(STATUS_WEBCAM_ACTIVE);
                self.sync_polling();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, device = %self.inner.opener.describe(), "could not access webcam");
                self.set_status(STATUS_WEBCAM_FAILED);
                Err(e.into())
            }
        }
    }

    /// Stop polling and release the webcam. A no-op if it is not running.
    pub async fn stop_webcam(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let cam = lock(&self.inner.webcam).take();
        self.sync_polling();

        let Some(cam) = cam else {
            return;
        };
        // An attempt may still hold a handle; release closes the device regardless.
        cam.release().await;
        tracing::info!("webcam stopped");
        self.set_status(STATUS_WEBCAM_OFF);
    }

    /// Forced release of every owned resource.
    pub async fn shutdown(&self) {
        lock(&self.inner.poll).take();
        self.stop_webcam().await;
        tracing::info!("engine shut down");
    }

    /// Run the poll loop iff the webcam is on and someone is enrolled.
    ///
    /// State is read under the poll lock, so the last caller always sees the
    /// final webcam and roster state.
    fn sync_polling(&self) {
        let mut poll = lock(&self.inner.poll);
        let wanted = self.webcam_on() && lock(&self.inner.roster).has_students();

        match (wanted, poll.is_some()) {
            (true, false) => {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                let period = self.inner.settings.recognition_interval;
                *poll = Some(spawn_poll(period, self.inner.slot.clone(), move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            AttendanceEngine { inner }.attempt().await;
                        }
                    }
                }));
                tracing::info!(period_ms = period.as_millis() as u64, "recognition polling started");
            }
            (false, true) => {
                if let Some(task) = poll.take() {
                    tracing::info!(skipped_ticks = task.skipped(), "recognition polling stopped");
                }
            }
            _ => {}
        }
    }

    async fn capture_photo(&self) -> Result<String, EngineError> {
        let cam = lock(&self.inner.webcam)
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::WebcamOff)?;
        let frame = cam
            .frame(self.inner.settings.capture_attempts)
            .await
            .map_err(EngineError::Capture)?;
        let jpeg = frame.encode_jpeg(self.inner.settings.jpeg_quality)?;
        Ok(data_uri::from_jpeg(&jpeg))
    }

    // --- recognition ---

    /// One recognition attempt outside the poll loop.
    ///
    /// Returns [`RecognitionOutcome::Busy`] if an attempt is already running.
    pub async fn recognize_now(&self) -> RecognitionOutcome {
        let Some(_guard) = self.inner.slot.try_acquire() else {
            return RecognitionOutcome::Busy;
        };
        self.attempt().await
    }

    /// Body of a recognition attempt. The caller holds the slot.
    async fn attempt(&self) -> RecognitionOutcome {
        let students: Vec<EnrolledStudent> = {
            let roster = lock(&self.inner.roster);
            if !roster.has_students() {
                drop(roster);
                self.set_status(STATUS_NO_STUDENTS);
                return RecognitionOutcome::NoStudents;
            }
            roster.students().to_vec()
        };

        self.set_status(STATUS_DETECTING);
        let photo = match self.capture_photo().await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "no frame for recognition");
                self.set_status(STATUS_NO_FRAME);
                return RecognitionOutcome::NoFrame;
            }
        };

        let identification = match self.inner.oracle.identify(&photo, &students).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "recognition call failed");
                self.set_status(STATUS_RECOGNITION_ERROR);
                return RecognitionOutcome::Failed(e.to_string());
            }
        };

        let marked = {
            let mut roster = lock(&self.inner.roster);
            let name = if identification.is_unknown() {
                None
            } else {
                roster.resolve_name(&identification.name).map(str::to_string)
            };
            match name {
                None => None,
                Some(name) => Some((
                    roster.mark_present(&name, Utc::now(), self.inner.settings.dedup_scope),
                    name,
                )),
            }
        };

        match marked {
            None => {
                if !identification.is_unknown() {
                    tracing::warn!(returned = %identification.name, "oracle named someone not enrolled");
                }
                self.set_status(STATUS_NOT_RECOGNIZED);
                RecognitionOutcome::Unrecognized
            }
            Some((Ok(MarkOutcome::Marked(record)), name)) => {
                tracing::info!(name = %name, at = %record.timestamp, "attendance marked");
                self.set_status(format!("Welcome, {name}! Attendance marked."));
                RecognitionOutcome::Marked(record)
            }
            Some((Ok(MarkOutcome::AlreadyMarked), name)) => {
                tracing::debug!(name = %name, "already marked present");
                self.set_status(format!("Hi {name}, you are already marked present."));
                RecognitionOutcome::AlreadyMarked(name)
            }
            Some((Err(e), name)) => {
                tracing::warn!(name = %name, error = %e, "failed to persist attendance");
                self.set_status(STATUS_RECOGNITION_ERROR);
                RecognitionOutcome::Failed(e.to_string())
            }
        }
    }

    // --- enrollment & bookkeeping ---

    /// Capture a frame, have the oracle judge it, and enroll `name` on success.
    ///
    /// A rejected photo is returned as `Ok` with `success == false`.
    pub async fn enroll(&self, name: &str) -> Result<EnrollVerdict, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }

        let photo = self.capture_photo().await?;

        let verdict = match self.inner.oracle.assess_enrollment(&photo, name).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(name, error = %e, "enrollment call failed");
                return Err(e.into());
            }
        };

        if !verdict.success {
            tracing::info!(name, reason = %verdict.message, "enrollment photo rejected");
            return Ok(verdict);
        }

        lock(&self.inner.roster).enroll(EnrolledStudent::new(name, photo))?;
        tracing::info!(name, "student enrolled");
        self.sync_polling();
        Ok(verdict)
    }

    /// Remove every student named `name`. Returns how many were removed.
    pub fn delete_student(&self, name: &str) -> Result<usize, EngineError> {
        let removed = lock(&self.inner.roster).delete_student(name)?;
        tracing::info!(name, removed, "students deleted");
        self.sync_polling();
        Ok(removed)
    }

    pub fn list_students(&self) -> Vec<EnrolledStudent> {
        lock(&self.inner.roster).students().to_vec()
    }

    /// Reference image of the first student named `name`.
    pub fn student_photo(&self, name: &str) -> Result<String, EngineError> {
        lock(&self.inner.roster)
            .student(name)
            .map(|s| s.face_data_uri.clone())
            .ok_or_else(|| EngineError::UnknownStudent(name.to_string()))
    }

    /// Attendance records, newest first; `today_only` keeps the local day.
    pub fn list_attendance(&self, today_only: bool) -> Vec<AttendanceRecord> {
        let roster = lock(&self.inner.roster);
        if today_only {
            roster.present_on(Local::now().date_naive())
        } else {
            roster.attendance().to_vec()
        }
    }

    pub fn clear_attendance(&self) -> Result<usize, EngineError> {
        let cleared = lock(&self.inner.roster).clear_attendance()?;
        tracing::info!(cleared, "attendance cleared");
        Ok(cleared)
    }

    pub fn status(&self) -> EngineStatus {
        let webcam = lock(&self.inner.webcam)
            .as_ref()
            .map(|c| c.device().to_string());
        let (enrolled, records, present_today) = {
            let roster = lock(&self.inner.roster);
            (
                roster.students().len(),
                roster.attendance().len(),
                roster.present_on(Local::now().date_naive()).len(),
            )
        };
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            webcam,
            polling: self.polling(),
            processing: self.inner.slot.is_busy(),
            message: self.status_message(),
            enrolled,
            records,
            present_today,
            dedup_scope: self.inner.settings.dedup_scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webcam::testing::FakeOpener;
    use async_trait::async_trait;
    use faceattend_core::{Identification, KvStore};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedOracle {
        verdicts: Mutex<VecDeque<Result<EnrollVerdict, String>>>,
        names: Mutex<VecDeque<Result<String, String>>>,
        enroll_calls: AtomicUsize,
        identify_calls: AtomicUsize,
        delay: Option<Duration>,
        /// Holds enrollment calls until notified.
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl ScriptedOracle {
        fn verdict(self, success: bool, message: &str) -> Self {
            lock(&self.verdicts).push_back(Ok(EnrollVerdict {
                success,
                message: message.into(),
            }));
            self
        }

        fn enroll_fails(self) -> Self {
            lock(&self.verdicts).push_back(Err("provider down".into()));
            self
        }

        fn name(self, name: &str) -> Self {
            lock(&self.names).push_back(Ok(name.into()));
            self
        }

        fn identify_fails(self) -> Self {
            lock(&self.names).push_back(Err("provider down".into()));
            self
        }
    }

    #[async_trait]
    impl FaceOracle for ScriptedOracle {
        async fn assess_enrollment(
            &self,
            photo: &str,
            _student_name: &str,
        ) -> Result<EnrollVerdict, OracleError> {
            self.enroll_calls.fetch_add(1, Ordering::SeqCst);
            assert!(photo.starts_with("data:image/jpeg;base64,"));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = lock(&self.verdicts).pop_front();
            match next {
                Some(Ok(v)) => Ok(v),
                Some(Err(e)) => Err(OracleError::Malformed(e)),
                None => Ok(EnrollVerdict {
                    success: true,
                    message: "ok".into(),
                }),
            }
        }

        async fn identify(
            &self,
            _photo: &str,
            enrolled: &[EnrolledStudent],
        ) -> Result<Identification, OracleError> {
            self.identify_calls.fetch_add(1, Ordering::SeqCst);
            assert!(!enrolled.is_empty());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            let next = lock(&self.names).pop_front();
            match next {
                Some(Ok(name)) => Ok(Identification { name }),
                Some(Err(e)) => Err(OracleError::Malformed(e)),
                None => Ok(Identification::unknown()),
            }
        }
    }

    fn settings(interval: Duration) -> EngineSettings {
        EngineSettings {
            recognition_interval: interval,
            warmup_frames: 0,
            capture_attempts: 2,
            jpeg_quality: 80,
            dedup_scope: DedupScope::PerDay,
        }
    }

    fn engine_with(
        oracle: ScriptedOracle,
        interval: Duration,
    ) -> (AttendanceEngine, Arc<ScriptedOracle>, Arc<FakeOpener>) {
        let roster = Roster::load(KvStore::open_in_memory().unwrap()).unwrap();
        let oracle = Arc::new(oracle);
        let opener = Arc::new(FakeOpener::default());
        let engine = AttendanceEngine::new(
            roster,
            oracle.clone(),
            opener.clone(),
            settings(interval),
        );
        (engine, oracle, opener)
    }

    fn engine(oracle: ScriptedOracle) -> (AttendanceEngine, Arc<ScriptedOracle>, Arc<FakeOpener>) {
        engine_with(oracle, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_enroll_recognize_delete_scenario() {
        let (engine, _, _) = engine(ScriptedOracle::default().name("Alice").name("Alice"));
        assert_eq!(engine.status_message(), STATUS_INITIALIZING);

        engine.start_webcam().await.unwrap();
        assert_eq!(engine.status_message(), STATUS_WEBCAM_ACTIVE);

        let verdict = engine.enroll("Alice").await.unwrap();
        assert!(verdict.success);
        let students = engine.list_students();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Alice");
        assert!(students[0].face_data_uri.starts_with("data:image/jpeg;base64,"));

        let before = Utc::now();
        let first = engine.recognize_now().await;
        let RecognitionOutcome::Marked(record) = first else {
            panic!("expected a mark, got {first:?}");
        };
        assert_eq!(record.name, "Alice");
        assert!(record.timestamp >= before);
        assert_eq!(engine.status_message(), "Welcome, Alice! Attendance marked.");

        let second = engine.recognize_now().await;
        assert_eq!(second, RecognitionOutcome::AlreadyMarked("Alice".into()));
        assert!(engine.status_message().contains("already marked present"));
        assert_eq!(engine.list_attendance(false).len(), 1);

        assert_eq!(engine.delete_student("Alice").unwrap(), 1);
        assert!(engine.list_students().is_empty());
        let attendance = engine.list_attendance(false);
        assert_eq!(attendance.len(), 1);
        assert_eq!(attendance[0].name, "Alice");

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_enroll_validates_before_external_call() {
        let (engine, oracle, _) = engine(ScriptedOracle::default());

        let err = engine.enroll("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyName));
        assert!(err.is_validation());

        // webcam off → no frame
        let err = engine.enroll("Alice").await.unwrap_err();
        assert!(matches!(err, EngineError::WebcamOff));
        assert_eq!(oracle.enroll_calls.load(Ordering::SeqCst), 0);
        assert!(engine.list_students().is_empty());
    }

    #[tokio::test]
    async fn test_enroll_trims_name() {
        let (engine, _, _) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        engine.enroll("  Jane Doe ").await.unwrap();
        assert_eq!(engine.list_students()[0].name, "Jane Doe");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_photo_is_not_stored() {
        let (engine, _, _) = engine(ScriptedOracle::default().verdict(false, "Too dark, add light."));
        engine.start_webcam().await.unwrap();
        let verdict = engine.enroll("Bob").await.unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.message, "Too dark, add light.");
        assert!(engine.list_students().is_empty());
        assert!(!engine.polling());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_enroll_oracle_failure() {
        let (engine, _, _) = engine(ScriptedOracle::default().enroll_fails());
        engine.start_webcam().await.unwrap();
        let err = engine.enroll("Bob").await.unwrap_err();
        assert!(matches!(err, EngineError::Oracle(_)));
        assert_eq!(err.user_message(), "An unexpected error occurred.");
        assert!(engine.list_students().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_and_unenrolled_names_add_nothing() {
        let (engine, _, _) = engine(ScriptedOracle::default().name("Unknown").name("Mallory"));
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();

        assert_eq!(engine.recognize_now().await, RecognitionOutcome::Unrecognized);
        assert_eq!(engine.status_message(), STATUS_NOT_RECOGNIZED);
        assert_eq!(engine.recognize_now().await, RecognitionOutcome::Unrecognized);
        assert!(engine.list_attendance(false).is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_case_insensitive_match_marks_enrolled_name() {
        let (engine, _, _) = engine(ScriptedOracle::default().name("alice"));
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();
        let outcome = engine.recognize_now().await;
        assert!(matches!(outcome, RecognitionOutcome::Marked(ref r) if r.name == "Alice"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_recognize_without_students() {
        let (engine, oracle, _) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        assert_eq!(engine.recognize_now().await, RecognitionOutcome::NoStudents);
        assert_eq!(engine.status_message(), STATUS_NO_STUDENTS);
        assert_eq!(oracle.identify_calls.load(Ordering::SeqCst), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_recognize_with_webcam_off() {
        let (engine, oracle, _) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();
        engine.stop_webcam().await;
        assert_eq!(engine.status_message(), STATUS_WEBCAM_OFF);

        assert_eq!(engine.recognize_now().await, RecognitionOutcome::NoFrame);
        assert_eq!(oracle.identify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recognition_failure_is_absorbed() {
        let (engine, _, _) = engine(ScriptedOracle::default().identify_fails().name("Alice"));
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();

        assert!(matches!(engine.recognize_now().await, RecognitionOutcome::Failed(_)));
        assert_eq!(engine.status_message(), STATUS_RECOGNITION_ERROR);
        assert!(engine.list_attendance(false).is_empty());

        // no automatic retry, but the next attempt works
        assert!(matches!(engine.recognize_now().await, RecognitionOutcome::Marked(_)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_webcam_failure_blocks_recognition() {
        let (engine, _, opener) = engine(ScriptedOracle::default());
        opener.fail.store(true, Ordering::SeqCst);
        let err = engine.start_webcam().await.unwrap_err();
        assert!(matches!(err, EngineError::Webcam(_)));
        assert_eq!(engine.status_message(), STATUS_WEBCAM_FAILED);
        assert!(!engine.webcam_on());
        assert!(!engine.polling());
    }

    #[tokio::test]
    async fn test_polling_follows_webcam_and_roster() {
        let (engine, _, opener) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        assert!(!engine.polling(), "no students yet");

        engine.enroll("Alice").await.unwrap();
        assert!(engine.polling());

        engine.delete_student("Alice").unwrap();
        assert!(!engine.polling());

        engine.enroll("Alice").await.unwrap();
        assert!(engine.polling());
        engine.stop_webcam().await;
        assert!(!engine.polling());
        assert_eq!(opener.open.load(Ordering::SeqCst), 0);

        // restarting reopens the device once
        engine.start_webcam().await.unwrap();
        engine.start_webcam().await.unwrap();
        assert_eq!(opener.opened_total.load(Ordering::SeqCst), 2);
        assert!(engine.polling());

        engine.shutdown().await;
        assert!(!engine.polling());
        assert!(!engine.webcam_on());
        assert_eq!(opener.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enroll_finishing_after_stop_leaves_polling_off() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let oracle = ScriptedOracle {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedOracle::default()
        };
        let (engine, oracle, _) = engine(oracle);
        engine.start_webcam().await.unwrap();

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enroll("Alice").await })
        };
        while oracle.enroll_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine.stop_webcam().await;
        gate.notify_one();

        assert!(pending.await.unwrap().unwrap().success);
        assert_eq!(engine.list_students().len(), 1);
        assert!(!engine.polling());
        assert_eq!(engine.status_message(), STATUS_WEBCAM_OFF);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_polling_tracks_state_under_concurrent_changes() {
        let (engine, _, opener) = engine(ScriptedOracle::default());
        for round in 0..25 {
            engine.start_webcam().await.unwrap();
            let enroll = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.enroll(&format!("S{round}")).await })
            };
            let stop = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.stop_webcam().await })
            };
            // the enrollment may lose the race for the webcam
            let _ = enroll.await.unwrap();
            stop.await.unwrap();

            assert!(!engine.webcam_on());
            assert!(!engine.polling(), "polling left on in round {round}");
        }
        assert_eq!(opener.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_device_while_an_attempt_holds_it() {
        let (engine, _, opener) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        let held = lock(&engine.inner.webcam).as_ref().map(Arc::clone).unwrap();

        engine.stop_webcam().await;
        assert_eq!(opener.open.load(Ordering::SeqCst), 0);
        assert!(matches!(held.frame(1).await, Err(WebcamError::ChannelClosed)));

        engine.start_webcam().await.unwrap();
        assert_eq!(opener.open.load(Ordering::SeqCst), 1);
        engine.shutdown().await;
        assert_eq!(opener.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_capture_failure_with_webcam_on() {
        let (engine, oracle, opener) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        opener.dark.store(true, Ordering::SeqCst);

        let err = engine.enroll("Alice").await.unwrap_err();
        assert!(matches!(err, EngineError::Capture(_)));
        assert!(!err.is_validation());
        assert_eq!(err.user_message(), CAPTURE_FAILED);
        assert_eq!(oracle.enroll_calls.load(Ordering::SeqCst), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_loop_marks_attendance() {
        let (engine, _, _) = engine_with(
            ScriptedOracle::default().name("Alice"),
            Duration::from_millis(20),
        );
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while engine.list_attendance(true).is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "poll loop never marked");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.list_attendance(true)[0].name, "Alice");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_attempt_is_busy_while_one_is_in_flight() {
        let oracle = ScriptedOracle {
            delay: Some(Duration::from_millis(300)),
            ..ScriptedOracle::default()
        }
        .name("Alice");
        let (engine, oracle, _) = engine(oracle);
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.recognize_now().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.status().processing);
        assert_eq!(engine.recognize_now().await, RecognitionOutcome::Busy);

        assert!(matches!(first.await.unwrap(), RecognitionOutcome::Marked(_)));
        assert_eq!(oracle.identify_calls.load(Ordering::SeqCst), 1);
        assert!(!engine.status().processing);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_attendance_keeps_students() {
        let (engine, _, _) = engine(ScriptedOracle::default().name("Alice"));
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();
        engine.recognize_now().await;

        assert_eq!(engine.clear_attendance().unwrap(), 1);
        assert!(engine.list_attendance(false).is_empty());
        assert_eq!(engine.list_students().len(), 1);
        let status = engine.status();
        assert_eq!(status.enrolled, 1);
        assert_eq!(status.records, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_student_photo() {
        let (engine, _, _) = engine(ScriptedOracle::default());
        engine.start_webcam().await.unwrap();
        engine.enroll("Alice").await.unwrap();
        assert!(engine
            .student_photo("Alice")
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
        assert!(matches!(
            engine.student_photo("Bob"),
            Err(EngineError::UnknownStudent(_))
        ));
        engine.shutdown().await;
    }
}
