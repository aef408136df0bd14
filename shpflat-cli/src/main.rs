//! CLI and server for shapefile ingestion and flattening.
//!
//! Provides:
//! - Batch ingestion of shapefile archives into one GeoJSON FeatureCollection
//! - Flattening a GeoJSON file into a single simplified feature
//! - WebSocket server speaking the worker protocol

mod client;
mod files;
mod server;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flate2::read::GzDecoder;
use log::{info, warn};
use serde_json::Value as JsonValue;
use shpflat_core::{parse_log_level, protocol::Event, Config, FeatureCollection, FlattenParams, Worker};

use crate::{client::WorkerClient, files::LocalFile};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SHPFLAT_BUILD_SHA"), ")");

#[derive(Parser)]
#[command(name = "shpflat", version = VERSION)]
#[command(about = "Shapefile ingestion and flattening", long_about = None)]
struct Cli {
    /// JSON config file (see `Config`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// error, warn, info, debug or trace; overrides RUST_LOG and the config
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode shapefile archives into one FeatureCollection
    Ingest {
        /// Zipped shapefiles (or bare .shp files)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge and simplify a FeatureCollection (or array of features) into one feature
    Flatten {
        /// GeoJSON input, optionally gzip-compressed (.gz)
        input: PathBuf,

        /// Vertex count the result should stay below
        #[arg(short = 'c', long)]
        vertex_cutoff: Option<usize>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start WebSocket server speaking the worker protocol
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Config::from_json(&text).with_context(|| format!("parsing {}", path.display()))
}

fn init_logging(cli_level: Option<&str>, config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli_level.or(config.log_level.as_deref()) {
        builder.filter_level(parse_log_level(Some(level))?);
    }
    builder.init();
    Ok(())
}

fn read_geojson(path: &Path) -> Result<JsonValue> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut text = String::new();
    reader.read_to_string(&mut text).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn write_output(output: Option<&Path>, json: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Collects the features of every processed file, reporting files that failed.
///
/// Files run in order and each ends with either `uploadProcessed` or a fatal
/// `uploadError`, so terminal events line up with `names`.
fn collect_features(names: &[String], events: Vec<Event>) -> (FeatureCollection, usize) {
    let mut features = Vec::new();
    let mut failed = 0;
    let mut idx = 0;
    for event in events {
        let name = names.get(idx).map(String::as_str).unwrap_or("?");
        match event {
            Event::UploadProcessed { features: mut batch, file_info, .. } => {
                info!("{}: {} features ({} bytes)", file_info.name, batch.len(), file_info.size);
                features.append(&mut batch);
                idx += 1;
            }
            Event::UploadError { error, error_type, fatal, .. } => {
                let level = if fatal { log::Level::Error } else { log::Level::Warn };
                log::log!(level, "{} (errorType {}): {}", name, u8::from(error_type), error.join(" "));
                if fatal {
                    failed += 1;
                    idx += 1;
                }
            }
            Event::Error { msg, error, .. } => warn!("{}: {}", msg, error),
            _ => {}
        }
    }
    (FeatureCollection { name: None, features }, failed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref(), &config)?;

    match cli.command {
        Commands::Ingest { files, output } => {
            let files: Vec<LocalFile> = files.into_iter().map(LocalFile::new).collect();
            let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
            let client = WorkerClient::spawn(config);
            let events = client.upload(files).await?;
            let (collection, failed) = collect_features(&names, events);
            if failed > 0 {
                warn!("{}/{} files could not be processed", failed, names.len());
            }
            let json = serde_json::to_string_pretty(&collection.into_geojson())?;
            write_output(output.as_deref(), &json)?;
        }
        Commands::Flatten { input, vertex_cutoff, output } => {
            let shapes = read_geojson(&input)?;
            let params = vertex_cutoff.map(FlattenParams::with_cutoff);
            let client = WorkerClient::spawn(config);
            let flattened = client.flatten(shapes, params).await?;
            if flattened.is_none() {
                warn!("{} has no features", input.display());
            }
            write_output(output.as_deref(), &serde_json::to_string_pretty(&flattened)?)?;
        }
        Commands::Serve { port } => {
            server::run_server(port, Worker::new(config)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shpflat_core::{ingest::UploadErrorKind, protocol::FileInfo, Feature, RequestId};

    use super::*;

    #[test]
    fn failed_files_are_counted_once() {
        let names = vec!["a.zip".to_string(), "b.zip".to_string()];
        let id = RequestId(1);
        let point: Feature = serde_json::from_value(json!({
            "type": "Feature",
            "properties": {},
            "geometry": { "type": "Point", "coordinates": [1., 2.] }
        }))
        .unwrap();
        let events = vec![
            Event::OpeningFile { id },
            Event::UploadError { id, error: vec!["hiccup".into()], error_type: UploadErrorKind::Unknown, fatal: false },
            Event::UploadError { id, error: vec!["bad".into()], error_type: UploadErrorKind::NotAZip, fatal: true },
            Event::OpeningFile { id },
            Event::UploadProcessed {
                id,
                features: vec![point.clone()],
                file_info: FileInfo { name: "b.zip".into(), mime_type: "application/zip".into(), size: 10 },
            },
        ];
        let (collection, failed) = collect_features(&names, events);
        assert_eq!(failed, 1);
        assert_eq!(collection.features, vec![point]);
    }

    #[test]
    fn reads_gzipped_geojson() {
        use std::io::Write;

        let path = std::env::temp_dir().join(format!("shpflat-main-{}.geojson.gz", std::process::id()));
        let mut encoder = flate2::write::GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
        encoder.write_all(br#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        encoder.finish().unwrap();
        let value = read_geojson(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
    }
}
