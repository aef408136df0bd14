//! Upload files referenced by local path.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use shpflat_core::FileSource;

/// A file on the machine running the worker. Deserializes from either a bare
/// path string or `{ "path": ..., "name"?: ..., "type"?: ... }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawLocalFile")]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLocalFile {
    Path(PathBuf),
    Described {
        path: PathBuf,
        name: Option<String>,
        #[serde(rename = "type")]
        mime_type: Option<String>,
    },
}

impl From<RawLocalFile> for LocalFile {
    fn from(raw: RawLocalFile) -> Self {
        match raw {
            RawLocalFile::Path(path) => LocalFile::new(path),
            RawLocalFile::Described { path, name, mime_type } => {
                let mut file = LocalFile::new(path);
                if let Some(name) = name {
                    file.name = name;
                }
                if let Some(mime_type) = mime_type {
                    file.mime_type = mime_type;
                }
                file
            }
        }
    }
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("zip") => "application/zip",
        Some("shp") => "application/x-esri-shape",
        Some("json") | Some("geojson") => "application/geo+json",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_type_for(&path).to_string();
        Self { path, name, mime_type }
    }
}

impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read(&self) -> impl Future<Output = std::io::Result<Vec<u8>>> + Send {
        tokio::fs::read(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn name_and_type_come_from_path() {
        let file = LocalFile::new("/data/Parcels.ZIP");
        assert_eq!(file.name, "Parcels.ZIP");
        assert_eq!(file.mime_type, "application/zip");
        assert_eq!(LocalFile::new("roads").mime_type, "application/octet-stream");
    }

    #[test]
    fn deserializes_from_string_or_object() {
        let from_str: LocalFile = serde_json::from_value(json!("/tmp/a.shp")).unwrap();
        assert_eq!(from_str, LocalFile::new("/tmp/a.shp"));

        let from_obj: LocalFile =
            serde_json::from_value(json!({ "path": "/tmp/upload-1", "name": "lots.zip", "type": "application/zip" }))
                .unwrap();
        assert_eq!(from_obj.path, PathBuf::from("/tmp/upload-1"));
        assert_eq!(from_obj.name, "lots.zip");
        assert_eq!(from_obj.mime_type, "application/zip");
    }

    #[tokio::test]
    async fn reads_bytes_from_disk() {
        let path = std::env::temp_dir().join(format!("shpflat-files-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let bytes = LocalFile::new(&path).read().await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
