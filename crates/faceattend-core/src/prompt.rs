//! Prompt text and multimodal content parts for the two oracle calls.

use crate::types::{EnrolledStudent, UNKNOWN_NAME};
use serde::Serialize;

/// One element of a chat message's `content` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data_uri: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: data_uri.into(),
            },
        }
    }
}

pub const ENROLL_SYSTEM: &str = "You help teachers register students for face-based attendance \
by checking whether a photo is usable as a reference image. Reply with JSON only.";

pub const RECOGNIZE_SYSTEM: &str = "You compare faces. Given one photo and a set of labelled \
reference photos, you decide which person, if any, appears in the photo. Reply with JSON only.";

/// Content for the enrollment suitability check.
pub fn enrollment(student_name: &str, photo: &str) -> Vec<ContentPart> {
    vec![
        ContentPart::text(format!(
            "A teacher wants to enroll a new student named {student_name:?}. \
             Here is the photo taken from the webcam:"
        )),
        ContentPart::image(photo),
        ContentPart::text(
            "Decide whether this photo is suitable as a reference image for facial recognition. \
             Check:\n\
             - clarity: the image is sharp and in focus\n\
             - visibility: the whole face is visible, not hidden by hair, shadow or objects\n\
             - lighting: light is sufficient and even\n\
             - expression: the expression is neutral\n\
             - quality: resolution is adequate with no visible pixelation\n\n\
             Respond with a JSON object {\"success\": boolean, \"message\": string}. \
             If suitable, set success to true with a short confirmation. \
             If not, set success to false and explain what is wrong and how to fix it.",
        ),
    ]
}

/// Content for identifying `photo` among `enrolled`.
///
/// Every reference image is included on every call.
pub fn recognition(photo: &str, enrolled: &[EnrolledStudent]) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(enrolled.len() * 2 + 3);
    parts.push(ContentPart::text("Photo of the face to identify:"));
    parts.push(ContentPart::image(photo));
    parts.push(ContentPart::text("Enrolled students:"));
    for student in enrolled {
        parts.push(ContentPart::text(format!("Name: {}", student.name)));
        parts.push(ContentPart::image(student.face_data_uri.as_str()));
    }
    parts.push(ContentPart::text(format!(
        "If the face matches one of the enrolled students, respond with \
         {{\"name\": \"<their name exactly as listed>\"}}. \
         Otherwise respond with {{\"name\": \"{UNKNOWN_NAME}\"}}."
    )));
    parts
}
