//! Reference-instrument (Teledyne) exports: pick the newest export, clean it
//! onto the 5-minute grid, publish by day.

use std::path::PathBuf;
use std::time::SystemTime;

use aircal_parser::parse_reference_export;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use tokio::fs;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::normalize::{normalize_frame, NormalizeSpec};
use crate::object_store::{get_text, ObjectStore, TEXT_CONTENT_TYPE};
use crate::publish::{publish_daily, PublishConfig, PublishedDay};
use crate::resample::{clean_and_resample, CleanConfig, CleanReport};
use crate::table::{Segment, TimeSeriesTable};

pub const MARKER_KEY: &str = "latest_folder.txt";
pub const EXPORT_FILE_MARKER: &str = "PUCP";

/// One export file and the upload folder it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceExport {
    pub folder: String,
    pub file_name: String,
    pub contents: String,
}

#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// The newest export, if any folder holds one.
    async fn latest(&self) -> Result<Option<ReferenceExport>, PipelineError>;
}

/// Upload time encoded in a folder name ending in `MMDDYY_HHMMSS`.
pub fn folder_timestamp(name: &str) -> Option<NaiveDateTime> {
    let start = name.len().checked_sub(13)?;
    let tail = name.get(start..)?;
    let well_formed = tail.char_indices().all(|(position, c)| match position {
        6 => c == '_',
        _ => c.is_ascii_digit(),
    });
    if !well_formed {
        return None;
    }
    NaiveDateTime::parse_from_str(tail, "%m%d%y_%H%M%S").ok()
}

/// Local mirror of the instrument's upload drive: one subfolder per upload,
/// export files inside.
#[derive(Debug, Clone)]
pub struct FsReferenceSource {
    root: PathBuf,
    file_marker: String,
}

impl FsReferenceSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_marker: EXPORT_FILE_MARKER.to_string(),
        }
    }

    pub fn with_file_marker(mut self, marker: impl Into<String>) -> Self {
        self.file_marker = marker.into();
        self
    }
}

fn unavailable(context: &str, err: std::io::Error) -> PipelineError {
    PipelineError::UpstreamUnavailable(format!("{context}: {err}"))
}

#[async_trait]
impl ReferenceSource for FsReferenceSource {
    async fn latest(&self) -> Result<Option<ReferenceExport>, PipelineError> {
        let mut newest_folder: Option<(NaiveDateTime, String, PathBuf)> = None;
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| unavailable(&self.root.display().to_string(), err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| unavailable("reading export root", err))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            let Some(uploaded) = folder_timestamp(&name).filter(|_| is_dir) else {
                continue;
            };
            if newest_folder.as_ref().is_none_or(|(best, _, _)| uploaded > *best) {
                newest_folder = Some((uploaded, name, entry.path()));
            }
        }

        let Some((_, folder, folder_path)) = newest_folder else {
            return Ok(None);
        };

        let mut newest_file: Option<(SystemTime, String, PathBuf)> = None;
        let mut files = fs::read_dir(&folder_path)
            .await
            .map_err(|err| unavailable(&folder, err))?;
        while let Some(entry) = files
            .next_entry()
            .await
            .map_err(|err| unavailable(&folder, err))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.contains(&self.file_marker) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let newer = newest_file
                .as_ref()
                .is_none_or(|(best, best_name, _)| (modified, &name) > (*best, best_name));
            if newer {
                newest_file = Some((modified, name, entry.path()));
            }
        }

        let Some((_, file_name, file_path)) = newest_file else {
            debug!(folder = %folder, "newest folder has no export file");
            return Ok(None);
        };

        let raw = fs::read(&file_path)
            .await
            .map_err(|err| unavailable(&file_name, err))?;
        Ok(Some(ReferenceExport {
            folder,
            file_name,
            contents: String::from_utf8_lossy(&raw).into_owned(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub normalize: NormalizeSpec,
    pub clean: CleanConfig,
    pub publish: PublishConfig,
    pub marker_key: String,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            normalize: NormalizeSpec::reference(),
            clean: CleanConfig::default(),
            publish: PublishConfig::reference(),
            marker_key: MARKER_KEY.to_string(),
        }
    }
}

/// Parses an export and runs it through the cleaning chain.
pub fn clean_reference(
    contents: &str,
    config: &ReferenceConfig,
) -> Result<(TimeSeriesTable, CleanReport), PipelineError> {
    let frame = parse_reference_export(contents)?;
    let table = normalize_frame(&frame, &config.normalize)?;
    Ok(clean_and_resample(&table, &config.clean)?)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceOutcome {
    NoExport,
    /// The newest folder was already processed by an earlier run.
    UpToDate { folder: String },
    Published {
        folder: String,
        file_name: String,
        report: CleanReport,
        published: Vec<PublishedDay>,
    },
}

pub async fn run_reference_ingest(
    source: &dyn ReferenceSource,
    store: &dyn ObjectStore,
    config: &ReferenceConfig,
) -> Result<ReferenceOutcome, PipelineError> {
    let Some(export) = source.latest().await? else {
        info!("no reference export available");
        return Ok(ReferenceOutcome::NoExport);
    };

    let previous = get_text(store, &config.marker_key).await?;
    if previous.as_deref() == Some(export.folder.as_str()) {
        info!(folder = %export.folder, "reference export already processed");
        return Ok(ReferenceOutcome::UpToDate {
            folder: export.folder,
        });
    }

    info!(folder = %export.folder, file = %export.file_name, "processing reference export");
    let (table, report) = clean_reference(&export.contents, config)?;
    let published = publish_daily(&[Segment::unlabeled(table)], store, &config.publish).await?;

    store
        .put(
            &config.marker_key,
            Bytes::from(export.folder.clone()),
            TEXT_CONTENT_TYPE,
        )
        .await?;

    Ok(ReferenceOutcome::Published {
        folder: export.folder,
        file_name: export.file_name,
        report,
        published,
    })
}
