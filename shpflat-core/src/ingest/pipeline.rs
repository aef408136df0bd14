use std::future::Future;

use log::{debug, info, warn};
use serde::Deserialize;

use super::error::{ClassifiedError, RetryBudget};
use crate::{
    classify::is_collection_geographic,
    config::IngestConfig,
    decode::{ArchiveDecoder, ZipShapefileDecoder},
    protocol::{Event, EventSink, FileInfo, RequestId},
    reproject::{Reprojector, WebMercator},
    shape::Feature,
};

/// An uploaded file whose bytes may take a while to arrive.
pub trait FileSource {
    fn name(&self) -> &str;
    fn mime_type(&self) -> &str;
    fn read(&self) -> impl Future<Output = std::io::Result<Vec<u8>>> + Send;
}

/// A file already held in memory.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryFile {
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read(&self) -> impl Future<Output = std::io::Result<Vec<u8>>> + Send {
        std::future::ready(Ok(self.bytes.clone()))
    }
}

/// Terminal state of one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed { features: usize },
    Failed(ClassifiedError),
}

pub struct Ingestor {
    decoder: Box<dyn ArchiveDecoder>,
    reprojector: Box<dyn Reprojector>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            decoder: Box::new(ZipShapefileDecoder),
            reprojector: Box::new(WebMercator),
            config,
        }
    }

    pub fn with_decoder(mut self, decoder: impl ArchiveDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn with_reprojector(mut self, reprojector: impl Reprojector + 'static) -> Self {
        self.reprojector = Box::new(reprojector);
        self
    }

    /// Decodes `bytes` and reprojects every geographic layer.
    pub fn decode_features(&self, bytes: &[u8]) -> Result<Vec<Feature>, ClassifiedError> {
        let collections = self
            .decoder
            .decode(bytes)
            .map_err(|e| ClassifiedError::classify(&e))?;
        let mut features = Vec::new();
        for collection in collections {
            let collection = if is_collection_geographic(&collection, self.config.geographic_threshold) {
                debug!("layer {:?} looks geographic, reprojecting", collection.name);
                self.reprojector.reproject(collection)
            } else {
                collection
            };
            features.extend(collection.features);
        }
        Ok(features)
    }

    /// Runs one file to its terminal event, retrying non-fatal failures until
    /// the file's retry budget runs out.
    pub async fn process_file<F: FileSource>(&self, id: RequestId, file: &F, sink: &impl EventSink) -> FileOutcome {
        let mut budget = RetryBudget::new(self.config.max_retries);
        loop {
            sink.emit(Event::OpeningFile { id });
            let bytes = match file.read().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("{}: could not read {}: {}", id, file.name(), e);
                    let error = ClassifiedError::unreadable(&e);
                    emit_error(sink, id, &error);
                    return FileOutcome::Failed(error);
                }
            };
            sink.emit(Event::ProcessingFile { id });
            sink.emit(Event::ProcessingFeatures { id });

            let error = match self.decode_features(&bytes) {
                Ok(features) => {
                    info!("{}: {} yielded {} features", id, file.name(), features.len());
                    let count = features.len();
                    sink.emit(Event::UploadProcessed {
                        id,
                        features,
                        file_info: FileInfo {
                            name: file.name().to_string(),
                            mime_type: file.mime_type().to_string(),
                            size: bytes.len() as u64,
                        },
                    });
                    return FileOutcome::Processed { features: count };
                }
                Err(error) if budget.consume() => error.exhausted(),
                Err(error) => error,
            };
            emit_error(sink, id, &error);
            if error.fatal {
                warn!("{}: giving up on {}: {:?}", id, file.name(), error.kind);
                return FileOutcome::Failed(error);
            }
            debug!("{}: retrying {} ({} attempts left)", id, file.name(), budget.remaining());
        }
    }

    /// Processes `files` one after another; each reaches its terminal event
    /// before the next is opened.
    pub async fn process_batch<F: FileSource>(&self, id: RequestId, files: &[F], sink: &impl EventSink) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());
        for (idx, file) in files.iter().enumerate() {
            debug!("{}: processing file {} ({})", id, idx, file.name());
            outcomes.push(self.process_file(id, file, sink).await);
        }
        outcomes
    }
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

fn emit_error(sink: &impl EventSink, id: RequestId, error: &ClassifiedError) {
    sink.emit(Event::UploadError {
        id,
        error: error.messages.clone(),
        error_type: error.kind,
        fatal: error.fatal,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::{
        decode::{
            tests::{point_shp, zip_of},
            DecodeError,
        },
        ingest::UploadErrorKind,
        shape::{FeatureCollection, Shape},
    };

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventSink for Recorder {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }

        fn kinds(&self) -> Vec<&'static str> {
            self.events()
                .iter()
                .map(|e| match e {
                    Event::OpeningFile { .. } => "openingFile",
                    Event::ProcessingFile { .. } => "processingFile",
                    Event::ProcessingFeatures { .. } => "processingFeatures",
                    Event::UploadProcessed { .. } => "uploadProcessed",
                    Event::UploadError { .. } => "uploadError",
                    Event::Flattened { .. } => "flattened",
                    Event::Log { .. } => "log",
                    Event::Error { .. } => "error",
                })
                .collect()
        }
    }

    /// Fails with the given error a fixed number of times, then decodes a
    /// single projected point.
    struct FlakyDecoder {
        error: DecodeError,
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyDecoder {
        fn new(error: DecodeError, failures: usize) -> Self {
            Self { error, failures, calls: AtomicUsize::new(0) }
        }
    }

    impl ArchiveDecoder for FlakyDecoder {
        fn decode(&self, _bytes: &[u8]) -> Result<Vec<FeatureCollection>, DecodeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(self.error.clone());
            }
            Ok(vec![FeatureCollection {
                name: None,
                features: vec![Feature::new(geo_types::point!(x: 500_000., y: 4_000_000.))],
            }])
        }
    }

    struct Unreadable;

    impl FileSource for Unreadable {
        fn name(&self) -> &str {
            "locked.zip"
        }

        fn mime_type(&self) -> &str {
            "application/zip"
        }

        fn read(&self) -> impl Future<Output = std::io::Result<Vec<u8>>> + Send {
            std::future::ready(Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")))
        }
    }

    fn upload(bytes: Vec<u8>) -> MemoryFile {
        MemoryFile::new("parcels.zip", "application/zip", bytes)
    }

    #[test_log::test(tokio::test)]
    async fn geographic_point_is_reprojected() {
        let bytes = zip_of(&[("stops.shp", &point_shp(-122.4, 37.7))]);
        let size = bytes.len() as u64;
        let recorder = Recorder::default();
        let outcome = Ingestor::default().process_file(RequestId(1), &upload(bytes), &recorder).await;
        assert_eq!(outcome, FileOutcome::Processed { features: 1 });
        assert_eq!(recorder.kinds(), ["openingFile", "processingFile", "processingFeatures", "uploadProcessed"]);

        let Event::UploadProcessed { features, file_info, .. } = &recorder.events()[3] else { unreachable!() };
        assert_eq!(file_info, &FileInfo { name: "parcels.zip".to_string(), mime_type: "application/zip".to_string(), size });
        let Shape::Point(p) = &features[0].shape else { panic!("expected a point") };
        assert!(p.x().abs() > 180.);
        assert!(p.y().abs() > 90.);
    }

    #[tokio::test]
    async fn projected_point_is_left_alone() {
        let bytes = zip_of(&[("stops.shp", &point_shp(500_000., 4_100_000.))]);
        let recorder = Recorder::default();
        Ingestor::default().process_file(RequestId(1), &upload(bytes), &recorder).await;
        let Event::UploadProcessed { features, .. } = &recorder.events()[3] else { panic!("expected uploadProcessed") };
        assert_eq!(features[0].shape.first_coord().unwrap().x, 500_000.);
    }

    #[tokio::test]
    async fn missing_layers_fail_immediately() {
        let bytes = zip_of(&[("parcels.prj", b"GEOGCS[]")]);
        let recorder = Recorder::default();
        let outcome = Ingestor::default().process_file(RequestId(2), &upload(bytes), &recorder).await;
        let FileOutcome::Failed(error) = outcome else { panic!("expected failure") };
        assert_eq!(error.kind, UploadErrorKind::MissingLayers);
        assert!(error.fatal);
        assert_eq!(recorder.kinds(), ["openingFile", "processingFile", "processingFeatures", "uploadError"]);
    }

    #[test_log::test(tokio::test)]
    async fn non_fatal_errors_are_retried() {
        let decoder = FlakyDecoder::new(DecodeError::Other("hiccup".to_string()), 2);
        let ingestor = Ingestor::default().with_decoder(decoder);
        let recorder = Recorder::default();
        let outcome = ingestor.process_file(RequestId(3), &upload(vec![1]), &recorder).await;
        assert_eq!(outcome, FileOutcome::Processed { features: 1 });
        let kinds = recorder.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == "uploadError").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "openingFile").count(), 3);
        assert_eq!(kinds.last(), Some(&"uploadProcessed"));
    }

    #[tokio::test]
    async fn exhausted_budget_forces_fatal() {
        let decoder = FlakyDecoder::new(DecodeError::Transient("again".to_string()), usize::MAX);
        let ingestor = Ingestor::new(IngestConfig { max_retries: 4, ..IngestConfig::default() }).with_decoder(decoder);
        let recorder = Recorder::default();
        let outcome = ingestor.process_file(RequestId(4), &upload(vec![1]), &recorder).await;

        let errors: Vec<(UploadErrorKind, bool)> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::UploadError { error_type, fatal, .. } => Some((error_type, fatal)),
                _ => None,
            })
            .collect();
        assert_eq!(
            errors,
            vec![
                (UploadErrorKind::Transient, false),
                (UploadErrorKind::Transient, false),
                (UploadErrorKind::Transient, false),
                (UploadErrorKind::RetriesExceeded, true),
            ]
        );
        assert!(matches!(outcome, FileOutcome::Failed(ClassifiedError { kind: UploadErrorKind::RetriesExceeded, .. })));
    }

    #[tokio::test]
    async fn read_failure_is_fatal() {
        let recorder = Recorder::default();
        let outcome = Ingestor::default().process_file(RequestId(5), &Unreadable, &recorder).await;
        assert!(matches!(outcome, FileOutcome::Failed(ClassifiedError { kind: UploadErrorKind::Unreadable, fatal: true, .. })));
        assert_eq!(recorder.kinds(), ["openingFile", "uploadError"]);
    }

    /// Fails three times out of every four calls.
    #[derive(Default)]
    struct EveryFourth(AtomicUsize);

    impl ArchiveDecoder for EveryFourth {
        fn decode(&self, bytes: &[u8]) -> Result<Vec<FeatureCollection>, DecodeError> {
            if self.0.fetch_add(1, Ordering::SeqCst) % 4 != 3 {
                return Err(DecodeError::Other("hiccup".to_string()));
            }
            FlakyDecoder::new(DecodeError::MissingBuffer, 0).decode(bytes)
        }
    }

    #[tokio::test]
    async fn retry_budgets_are_per_file() {
        // Each file fails 3 times before succeeding; a shared budget of 4 would
        // run out during the second file.
        let ingestor = Ingestor::new(IngestConfig { max_retries: 4, ..IngestConfig::default() })
            .with_decoder(EveryFourth::default());
        let recorder = Recorder::default();
        let files = vec![upload(vec![1]), upload(vec![2])];
        let outcomes = ingestor.process_batch(RequestId(6), &files, &recorder).await;
        assert_eq!(outcomes, vec![FileOutcome::Processed { features: 1 }; 2]);
    }

    #[tokio::test]
    async fn batch_files_run_in_order() {
        let good = zip_of(&[("a.shp", &point_shp(1., 1.))]);
        let bad = zip_of(&[("readme.txt", b"nothing here")]);
        let files = vec![upload(bad), upload(good)];
        let recorder = Recorder::default();
        let outcomes = Ingestor::default().process_batch(RequestId(7), &files, &recorder).await;
        assert!(matches!(outcomes[0], FileOutcome::Failed(_)));
        assert_eq!(outcomes[1], FileOutcome::Processed { features: 1 });
        assert_eq!(
            recorder.kinds(),
            [
                "openingFile", "processingFile", "processingFeatures", "uploadError",
                "openingFile", "processingFile", "processingFeatures", "uploadProcessed",
            ]
        );
    }
}
