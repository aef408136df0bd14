//! Wire types for the worker's inbound requests and outbound events.
//!
//! Both are internally tagged on `"type"`, matching the message shapes a
//! browser worker exchanges with its host page.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{flatten::FlattenParams, ingest::UploadErrorKind, shape::Feature};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages into the worker. `F` is the file handle type of the host
/// (in-memory bytes in a browser, paths on a server).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request<F> {
    /// Decode and reproject uploaded shapefile archives
    ProcessUpload {
        #[serde(default)]
        id: RequestId,
        #[serde(default = "Vec::new")]
        files: Vec<F>,
    },
    /// Merge and simplify features into one
    Flatten {
        #[serde(default)]
        id: RequestId,
        shapes: JsonValue,
        /// Missing fields fall back to the configured defaults
        #[serde(default)]
        params: Option<FlattenParams>,
        /// Passed back untouched on the `flattened` event
        #[serde(default)]
        source: Option<JsonValue>,
    },
    /// Any other `type`; ignored
    #[serde(other)]
    Unknown,
}

impl<F> Request<F> {
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Request::ProcessUpload { id, .. } | Request::Flatten { id, .. } => Some(*id),
            Request::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
}

/// Messages out of the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    OpeningFile {
        id: RequestId,
    },
    ProcessingFile {
        id: RequestId,
    },
    ProcessingFeatures {
        id: RequestId,
    },
    /// One file fully decoded
    UploadProcessed {
        id: RequestId,
        features: Vec<Feature>,
        #[serde(rename = "fileInfo")]
        file_info: FileInfo,
    },
    /// One decode attempt failed
    UploadError {
        id: RequestId,
        error: Vec<String>,
        #[serde(rename = "errorType")]
        error_type: UploadErrorKind,
        fatal: bool,
    },
    Flattened {
        id: RequestId,
        #[serde(rename = "geoJSON")]
        geo_json: Option<Feature>,
        source: Option<JsonValue>,
    },
    Log {
        msg: String,
    },
    /// A request failed outside the classified upload errors
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        msg: String,
        error: String,
    },
}

impl Event {
    pub fn log(msg: impl Into<String>) -> Self {
        Event::Log { msg: msg.into() }
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            Event::OpeningFile { id }
            | Event::ProcessingFile { id }
            | Event::ProcessingFeatures { id }
            | Event::UploadProcessed { id, .. }
            | Event::UploadError { id, .. }
            | Event::Flattened { id, .. } => Some(*id),
            Event::Error { id, .. } => *id,
            Event::Log { .. } => None,
        }
    }
}

/// Receives the worker's outbound events.
pub trait EventSink {
    fn emit(&self, event: Event);
}

impl<F: Fn(Event)> EventSink for F {
    fn emit(&self, event: Event) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_flatten_request() {
        let request: Request<String> = serde_json::from_value(json!({
            "type": "flatten",
            "id": 4,
            "shapes": [],
            "params": { "vertexCutoff": 250 },
            "source": { "layer": "parcels" }
        }))
        .unwrap();
        let Request::Flatten { id, params, source, .. } = request else { panic!("expected flatten") };
        assert_eq!(id, RequestId(4));
        assert_eq!(params, Some(FlattenParams::with_cutoff(250)));
        assert_eq!(source, Some(json!({ "layer": "parcels" })));
    }

    #[test]
    fn flatten_params_are_optional() {
        let request: Request<String> = serde_json::from_value(json!({ "type": "flatten", "shapes": [] })).unwrap();
        let Request::Flatten { params, source, .. } = request else { panic!("expected flatten") };
        assert_eq!(params, None);
        assert_eq!(source, None);
    }

    #[test]
    fn empty_params_leave_cutoff_unset() {
        let request: Request<String> =
            serde_json::from_value(json!({ "type": "flatten", "shapes": [], "params": {} })).unwrap();
        let Request::Flatten { params, .. } = request else { panic!("expected flatten") };
        assert_eq!(params, Some(FlattenParams { vertex_cutoff: None }));
    }

    #[test]
    fn unknown_types_parse_as_unknown() {
        let request: Request<String> = serde_json::from_value(json!({ "type": "initEncoding", "encoding": {} })).unwrap();
        assert!(matches!(request, Request::Unknown));
        assert_eq!(request.id(), None);
    }

    #[test]
    fn upload_without_files_parses() {
        let request: Request<String> = serde_json::from_value(json!({ "type": "processUpload", "id": 1 })).unwrap();
        let Request::ProcessUpload { files, .. } = request else { panic!("expected upload") };
        assert!(files.is_empty());
    }

    #[test]
    fn events_serialize_with_wire_names() {
        let event = Event::UploadError {
            id: RequestId(2),
            error: vec!["bad".to_string()],
            error_type: UploadErrorKind::MissingLayers,
            fatal: true,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "uploadError", "id": 2, "error": ["bad"], "errorType": 3, "fatal": true })
        );

        let event = Event::Flattened { id: RequestId(3), geo_json: None, source: None };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "flattened", "id": 3, "geoJSON": null, "source": null })
        );

        assert_eq!(
            serde_json::to_value(Event::OpeningFile { id: RequestId(1) }).unwrap(),
            json!({ "type": "openingFile", "id": 1 })
        );
    }

    #[test]
    fn error_event_omits_missing_id() {
        let event = Event::Error { id: None, msg: "boom".to_string(), error: "details".to_string() };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "error", "msg": "boom", "error": "details" })
        );
    }
}
