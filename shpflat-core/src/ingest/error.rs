use serde::Serialize;

use crate::decode::DecodeError;

const REQUIRED_EXTENSIONS: [&str; 2] = [
    "The uploaded file must be a zip file containing, at minimum, the following extensions:",
    "shp, dbf, prj.",
];

/// Category of an upload failure, reported as the integer `errorType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u8")]
pub enum UploadErrorKind {
    Unknown = 0,
    CorruptBuffer = 1,
    UnsupportedShapeType = 2,
    MissingLayers = 3,
    NotAZip = 4,
    Transient = 5,
    RetriesExceeded = 6,
    Unreadable = 7,
}

impl From<UploadErrorKind> for u8 {
    fn from(kind: UploadErrorKind) -> u8 {
        kind as u8
    }
}

/// A failure ready to show to a user: kind, message lines, and whether the
/// file should be given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub kind: UploadErrorKind,
    pub messages: Vec<String>,
    pub fatal: bool,
}

fn lines<const N: usize>(lines: [&str; N]) -> Vec<String> {
    lines.iter().map(|s| s.to_string()).collect()
}

impl ClassifiedError {
    pub fn classify(err: &DecodeError) -> Self {
        let (kind, messages, fatal) = match err {
            DecodeError::MissingBuffer => (
                UploadErrorKind::CorruptBuffer,
                lines(["Could not open the file. Is it corrupt?"]),
                true,
            ),
            DecodeError::UnknownShapeType(_) => (
                UploadErrorKind::UnsupportedShapeType,
                lines([
                    "Tried to parse an invalid or unsupported shape type.",
                    "Please upload a shapefile with only features of the supported types:",
                    "Point, MultiPoint, LineString, MultiLineString, Polygon, or MultiPolygon.",
                ]),
                true,
            ),
            DecodeError::NoLayers => (UploadErrorKind::MissingLayers, lines(REQUIRED_EXTENSIONS), true),
            DecodeError::NotAZip(_) | DecodeError::Syntax(_) => {
                let mut messages = lines(["This file does not look like a zip file or it is corrupt."]);
                messages.extend(lines(REQUIRED_EXTENSIONS));
                (UploadErrorKind::NotAZip, messages, true)
            }
            DecodeError::Transient(message) => (UploadErrorKind::Transient, vec![message.clone()], false),
            DecodeError::Other(message) => (
                UploadErrorKind::Unknown,
                vec![
                    "Unable to parse the file. Unknown Error.".to_string(),
                    format!("Additional information: {}", message),
                ],
                false,
            ),
        };
        ClassifiedError { kind, messages, fatal }
    }

    pub fn unreadable(reason: &std::io::Error) -> Self {
        ClassifiedError {
            kind: UploadErrorKind::Unreadable,
            messages: vec![
                "Could not read the file.".to_string(),
                format!("Additional information: {}", reason),
            ],
            fatal: true,
        }
    }

    /// Replaces this error with the fatal "too many errors" report.
    pub fn exhausted(self) -> Self {
        let mut messages = lines(["Exceeded maximum number of errors while parsing this file."]);
        messages.extend(lines(REQUIRED_EXTENSIONS));
        ClassifiedError {
            kind: UploadErrorKind::RetriesExceeded,
            messages,
            fatal: true,
        }
    }
}

/// Per-file allowance of failed decode attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(attempts: u32) -> Self {
        Self { remaining: attempts }
    }

    /// Records one failure; `true` once the budget is used up.
    pub fn consume(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}
