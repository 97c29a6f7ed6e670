//! The external judge that enrollment and recognition are delegated to.
//!
//! Implementations are non-deterministic and have no latency guarantee.
//! Callers treat every error as transient and never retry automatically.

use crate::types::{EnrollVerdict, EnrolledStudent, Identification};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider reply had no message content")]
    EmptyReply,
    #[error("provider reply was not the expected JSON: {0}")]
    Malformed(String),
    #[error("invalid photo: {0}")]
    InvalidPhoto(#[from] crate::data_uri::DataUriError),
    #[error("oracle misconfigured: {0}")]
    Config(String),
}

/// Judges enrollment photos and identifies faces against reference images.
#[async_trait]
pub trait FaceOracle: Send + Sync {
    /// Decide whether `photo` is good enough to enroll `student_name`.
    async fn assess_enrollment(
        &self,
        photo: &str,
        student_name: &str,
    ) -> Result<EnrollVerdict, OracleError>;

    /// Compare `photo` against every enrolled reference image.
    ///
    /// Returns a student name or [`crate::UNKNOWN_NAME`].
    async fn identify(
        &self,
        photo: &str,
        enrolled: &[EnrolledStudent],
    ) -> Result<Identification, OracleError>;
}
