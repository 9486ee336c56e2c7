//! Export of a project's tasks and task runs as downloadable ZIP archives.
//!
//! Archives are cached in the upload storage under the project owner's
//! container (`user_{owner_id}`) and rebuilt on demand when missing. Any change
//! to a project's task runs invalidates its cached archives. An archive built
//! while an invalidation ran is removed again right after upload, so a stale
//! snapshot never outlives the change that made it stale.
//!
//! | Export type | Format | Storage key                                | Entry inside the ZIP    |
//! |-------------|--------|--------------------------------------------|-------------------------|
//! | `task`      | json   | `user_{owner}/{short_name}_task_json.zip`  | `{short_name}_task.json`|
//! | `task_run`  | csv    | `user_{owner}/{short_name}_task_run_csv.zip` | `{short_name}_task_run.csv` |

pub mod render;

use std::fmt;
use std::io::{Cursor, Seek, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AppError, Result};
use crate::models::project::Project;
use crate::services::event_bus::{DomainEvent, EventBus};
use crate::storage::StorageBackend;
use crate::store::Datastore;

/// What to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    Task,
    TaskRun,
}

impl ExportType {
    pub const ALL: [ExportType; 2] = [ExportType::Task, ExportType::TaskRun];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::TaskRun => "task_run",
        }
    }

    /// Parse a client-supplied type; unknown values are a bad request.
    pub fn parse(ty: &str) -> Result<Self> {
        match ty {
            "task" => Ok(Self::Task),
            "task_run" => Ok(Self::TaskRun),
            other => Err(AppError::BadRequest(format!(
                "Unknown export type '{}' (expected task or task_run)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File format of the archived entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Json, ExportFormat::Csv];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn parse(format: &str) -> Result<Self> {
        match format {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(AppError::BadRequest(format!(
                "Unknown export format '{}' (expected json or csv)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of pregenerating every archive of a project.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PregenerateResult {
    pub project: String,
    /// Directory or key prefix the archives were written to
    pub location: String,
    pub archives: Vec<String>,
}

pub struct Exporter {
    store: Arc<dyn Datastore>,
    storage: Arc<dyn StorageBackend>,
    /// Upload folder when archives live on the local filesystem.
    local_root: Option<PathBuf>,
    /// Bumped by every invalidation.
    generation: AtomicU64,
}

impl Exporter {
    pub fn new(store: Arc<dyn Datastore>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            store,
            storage,
            local_root: None,
            generation: AtomicU64::new(0),
        }
    }

    /// Builder: report download paths under a local upload folder.
    pub fn with_local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_root = Some(root.into());
        self
    }

    /// Project short name as a Latin-1 file name: every UTF-8 byte becomes
    /// the Latin-1 character of the same value. Path separators, `%` and
    /// control bytes are written as `%XX`, so distinct names never collide.
    pub fn app_name_encoded(project: &Project) -> String {
        let mut encoded = String::with_capacity(project.short_name.len());
        for byte in project.short_name.bytes() {
            match byte {
                b'%' | b'/' | b'\\' | 0x00..=0x1f | 0x7f..=0x9f => {
                    encoded.push_str(&format!("%{:02X}", byte))
                }
                _ => encoded.push(char::from(byte)),
            }
        }
        encoded
    }

    /// A ZIP writer and the entry options every export uses: Deflate
    /// compression with Zip64 enabled so large exports are not truncated.
    pub fn zip_factory<W: Write + Seek>(writer: W) -> (ZipWriter<W>, SimpleFileOptions) {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        (ZipWriter::new(writer), options)
    }

    /// Storage container of a project's archives.
    pub fn container(project: &Project) -> String {
        format!("user_{}", project.owner_id)
    }

    /// Directory holding the project's archives: a filesystem path for local
    /// storage, the container key prefix otherwise.
    pub fn download_path(&self, project: &Project) -> String {
        let container = Self::container(project);
        match &self.local_root {
            Some(root) => root.join(container).to_string_lossy().into_owned(),
            None => container,
        }
    }

    /// File name of the archive to download. Does not check that it exists.
    pub fn download_name(project: &Project, ty: ExportType, format: ExportFormat) -> String {
        format!("{}_{}_{}.zip", Self::app_name_encoded(project), ty, format)
    }

    /// Name of the single file inside the archive.
    pub fn entry_name(project: &Project, ty: ExportType, format: ExportFormat) -> String {
        format!("{}_{}.{}", Self::app_name_encoded(project), ty, format)
    }

    fn storage_key(project: &Project, ty: ExportType, format: ExportFormat) -> String {
        format!(
            "{}/{}",
            Self::container(project),
            Self::download_name(project, ty, format)
        )
    }

    /// Whether the archive has already been generated.
    pub async fn zip_existing(
        &self,
        project: &Project,
        ty: ExportType,
        format: ExportFormat,
    ) -> Result<bool> {
        self.storage
            .exists(&Self::storage_key(project, ty, format))
            .await
    }

    /// Render the export, pack it into a ZIP and upload it. Returns the archive.
    pub async fn make_zip(
        &self,
        project: &Project,
        ty: ExportType,
        format: ExportFormat,
    ) -> Result<Bytes> {
        let generation = self.generation.load(Ordering::SeqCst);
        let content = match ty {
            ExportType::Task => {
                let tasks = self.store.list_tasks(project.id).await?;
                render::render(&tasks, format)?
            }
            ExportType::TaskRun => {
                let runs = self.store.list_project_task_runs(project.id).await?;
                render::render(&runs, format)?
            }
        };

        let entry = Self::entry_name(project, ty, format);
        let archive = tokio::task::spawn_blocking(move || build_archive(&entry, &content))
            .await
            .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))??;

        let key = Self::storage_key(project, ty, format);
        self.storage.put(&key, archive.clone()).await?;
        if self.discard_if_stale(&key, generation).await? {
            return Ok(archive);
        }
        tracing::info!(
            project = %project.short_name,
            key = %key,
            bytes = archive.len(),
            backend = self.storage.backend_name(),
            "Export archive generated"
        );
        Ok(archive)
    }

    /// The archive bytes, generating and uploading them first if missing.
    pub async fn get_zip(
        &self,
        project: &Project,
        ty: ExportType,
        format: ExportFormat,
    ) -> Result<Bytes> {
        let key = Self::storage_key(project, ty, format);
        if self.zip_existing(project, ty, format).await? {
            match self.storage.get(&key).await {
                Ok(bytes) => return Ok(bytes),
                // Deleted between the existence check and the read
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.make_zip(project, ty, format).await
    }

    /// HTTP attachment response carrying the archive.
    pub async fn response_zip(
        &self,
        project: &Project,
        ty: ExportType,
        format: ExportFormat,
    ) -> Result<Response> {
        let archive = self.get_zip(project, ty, format).await?;
        let disposition = format!(
            "attachment; filename={}",
            Self::download_name(project, ty, format)
        );
        Ok((
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            archive,
        )
            .into_response())
    }

    /// Generate every export type in every format concurrently.
    pub async fn pregenerate_zip_files(&self, project: &Project) -> Result<PregenerateResult> {
        let combos: Vec<(ExportType, ExportFormat)> = ExportType::ALL
            .into_iter()
            .flat_map(|ty| ExportFormat::ALL.into_iter().map(move |format| (ty, format)))
            .collect();

        try_join_all(
            combos
                .iter()
                .map(|&(ty, format)| self.make_zip(project, ty, format)),
        )
        .await?;

        let archives = combos
            .iter()
            .map(|&(ty, format)| Self::download_name(project, ty, format))
            .collect();
        Ok(PregenerateResult {
            project: project.short_name.clone(),
            location: self.download_path(project),
            archives,
        })
    }

    /// Remove a freshly uploaded archive when an invalidation ran since
    /// `generation` was read. Returns whether it was removed.
    async fn discard_if_stale(&self, key: &str, generation: u64) -> Result<bool> {
        if self.generation.load(Ordering::SeqCst) == generation {
            return Ok(false);
        }
        self.storage.delete(key).await?;
        tracing::debug!(key = %key, "Discarded archive built during invalidation");
        Ok(true)
    }

    /// Drop every cached archive of the project.
    pub async fn invalidate(&self, project: &Project) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for ty in ExportType::ALL {
            for format in ExportFormat::ALL {
                self.storage
                    .delete(&Self::storage_key(project, ty, format))
                    .await?;
            }
        }
        tracing::debug!(project = %project.short_name, "Export archives invalidated");
        Ok(())
    }

    /// Drop the cached archives of every project.
    pub async fn invalidate_all(&self) -> Result<()> {
        let projects = self.store.list_projects().await?;
        for project in &projects {
            self.invalidate(project).await?;
        }
        tracing::info!(projects = projects.len(), "All export archives invalidated");
        Ok(())
    }

    /// React to one delivery from the event bus. Returns `false` once the bus
    /// is closed.
    async fn handle_event(&self, delivery: std::result::Result<DomainEvent, RecvError>) -> bool {
        match delivery {
            Ok(event) => {
                let project = match self.store.get_project(event.project_id).await {
                    Ok(Some(project)) => project,
                    Ok(None) => return true,
                    Err(e) => {
                        tracing::warn!("Failed to load project {}: {}", event.project_id, e);
                        return true;
                    }
                };
                if let Err(e) = self.invalidate(&project).await {
                    tracing::warn!(
                        "Failed to invalidate exports of {}: {}",
                        project.short_name,
                        e
                    );
                }
                true
            }
            Err(RecvError::Lagged(missed)) => {
                // The missed events are unknown, so every project may be stale
                tracing::warn!("Export invalidation lagged, {} events missed", missed);
                if let Err(e) = self.invalidate_all().await {
                    tracing::error!("Failed to invalidate exports after lag: {}", e);
                }
                true
            }
            Err(RecvError::Closed) => false,
        }
    }

    /// Invalidate a project's archives whenever its task runs change.
    pub fn spawn_invalidation_listener(self: Arc<Self>, bus: &EventBus) {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while self.handle_event(rx.recv().await).await {}
        });
    }
}

fn build_archive(entry: &str, content: &[u8]) -> Result<Bytes> {
    let (mut zip, options) = Exporter::zip_factory(Cursor::new(Vec::new()));
    zip.start_file(entry, options)?;
    zip.write_all(content)?;
    let cursor = zip.finish()?;
    Ok(Bytes::from(cursor.into_inner()))
}
