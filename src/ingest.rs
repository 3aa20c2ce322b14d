//! Data ingest, download, metadata and deployment.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Method;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::client::{Client, read_error};
use crate::error::{Error, Result};
use crate::job::get_job_id;
use crate::model::{
    ClassType, DataDesc, DataResult, DataType, Envelope, IngestRequest, ResourceMetadata,
};
use crate::transport::RequestBody;
use crate::multipart::MultipartForm;
use crate::util::{filename_from_disposition, path_segment};

/// What kind of data is being ingested. Decides how the bytes travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestKind {
    /// Uploaded as a file part.
    Raster,
    /// Uploaded as a file part.
    GeoJson,
    /// Sent inline as the data type's content.
    Text,
}

impl IngestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::GeoJson => "geojson",
            Self::Text => "text",
        }
    }

    fn mime_type(&self) -> Option<&'static str> {
        match self {
            Self::Raster => None,
            Self::GeoJson => Some("application/vnd.geo+json"),
            Self::Text => Some("application/text"),
        }
    }
}

/// Everything about an ingest except the bytes.
#[derive(Debug, Clone)]
pub struct IngestRequestOptions {
    pub file_name: String,
    pub kind: IngestKind,
    /// Who is ingesting; ends up in the description.
    pub source_name: String,
    pub version: String,
    pub properties: BTreeMap<String, String>,
}

impl IngestRequestOptions {
    pub fn new(file_name: impl Into<String>, kind: IngestKind) -> Self {
        Self {
            file_name: file_name.into(),
            kind,
            source_name: env!("CARGO_PKG_NAME").to_string(),
            version: String::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source_name: impl Into<String>, version: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self.version = version.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    fn describe(&self, content: Option<String>) -> DataDesc {
        DataDesc {
            data_id: None,
            data_type: DataType {
                kind: self.kind.as_str().to_string(),
                mime_type: self.kind.mime_type().map(str::to_string),
                content,
                ..Default::default()
            },
            metadata: ResourceMetadata {
                name: self.file_name.clone(),
                description: format!("{} uploaded by {}.", self.kind.as_str(), self.source_name),
                class_type: Some(ClassType::unclassified()),
                version: self.version.clone(),
                metadata: self.properties.clone(),
                ..Default::default()
            },
            spatial_metadata: None,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn required<'a>(value: &'a Option<String>, expected: &'static str, result: &Value) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::UnexpectedResult {
            expected,
            result: result.clone(),
        })
}

impl Client {
    /// Ingests `data`, waits for the ingest job, and returns the new data id.
    pub fn ingest(&self, opts: &IngestRequestOptions, data: &[u8]) -> Result<String> {
        let resp = match opts.kind {
            IngestKind::Text => {
                let content = String::from_utf8_lossy(data).into_owned();
                let desc = opts.describe(Some(content));
                let req = IngestRequest {
                    kind: "ingest",
                    host: true,
                    data: &desc,
                };
                self.send_json(Method::POST, &self.endpoint("data"), &req)?
            }
            IngestKind::Raster | IngestKind::GeoJson => {
                let desc = opts.describe(None);
                let req = IngestRequest {
                    kind: "ingest",
                    host: true,
                    data: &desc,
                };
                let body = serde_json::to_string(&req).map_err(|e| {
                    Error::InvalidArgument(format!("ingest request is not serializable: {e}"))
                })?;
                let mut form = MultipartForm::new()
                    .text("data", body)?
                    .file("file", &opts.file_name, data)?;
                if let Some(mime) = opts.kind.mime_type() {
                    form = form.with_file_type(mime);
                }
                self.submit_form(&self.endpoint("data/file"), form)?
            }
        };

        let job_id = get_job_id(&resp)?;
        info!(job_id = %job_id, file = %opts.file_name, "ingest submitted");
        let result = self.get_job_response(job_id.as_str())?;
        let data_id = required(&DataResult::from_value(&result).data_id, "dataId", &result)?.to_string();
        info!(data_id = %data_id, file = %opts.file_name, "ingest complete");
        Ok(data_id)
    }

    /// Reads `path` and ingests it. The file name in `opts` is what the
    /// gateway will record; `path` is only where the bytes come from.
    pub fn ingest_file(&self, path: &Path, opts: &IngestRequestOptions) -> Result<String> {
        let mut file = File::open(path).map_err(io_err(path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(io_err(path))?;
        if data.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "file \"{}\" read as empty",
                path.display()
            )));
        }
        self.ingest(opts, &data)
    }

    /// Fetches a stored file into memory.
    pub fn download_bytes(&self, data_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("file/{}", path_segment(non_empty(data_id, "data id")?)));
        let resp = self.send(Method::GET, &url, RequestBody::Empty)?;
        Ok(resp.body)
    }

    /// Downloads a stored file into `dir`, named as the gateway names it.
    /// Returns the path written.
    ///
    /// The body is streamed to disk; it is never held in memory whole.
    pub fn download(&self, data_id: &str, dir: &Path) -> Result<PathBuf> {
        let url = self.endpoint(&format!("file/{}", path_segment(non_empty(data_id, "data id")?)));
        let mut resp = self.get_streaming(&url)?;

        let Some(file_name) = resp
            .header(CONTENT_DISPOSITION.as_str())
            .and_then(filename_from_disposition)
        else {
            let mut head = Vec::new();
            // Best effort; the missing name is the error worth reporting.
            let _ = resp.body.by_ref().take(100).read_to_end(&mut head);
            return Err(Error::UnnamedFile {
                data_id: data_id.to_string(),
                preview: String::from_utf8_lossy(&head).into_owned(),
            });
        };

        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        let target = dir.join(&file_name);
        let total = resp
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<u64>().ok());

        let pb = match total {
            Some(total) if self.progress() && total > 0 => {
                let pb = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::with_template(
                    "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
                ) {
                    pb.set_style(style.progress_chars("=>-"));
                }
                Some(pb)
            }
            _ => None,
        };

        let mut out = File::create(&target).map_err(io_err(&target))?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut written: u64 = 0;
        loop {
            let n = match resp.body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_error(Method::GET, &url, e)),
            };
            out.write_all(&buf[..n]).map_err(io_err(&target))?;
            written += n as u64;
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }
        out.flush().map_err(io_err(&target))?;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        debug!(data_id, bytes = written, path = %target.display(), "download complete");
        Ok(target)
    }

    /// Metadata the gateway holds for a data id.
    pub fn get_file_meta(&self, data_id: &str) -> Result<DataDesc> {
        let url = self.endpoint(&format!("data/{}", path_segment(non_empty(data_id, "data id")?)));
        Ok(self.get_json::<Envelope<DataDesc>>(&url)?.value.data)
    }

    /// Replaces the free-form metadata map of a data id.
    pub fn update_file_meta(&self, data_id: &str, metadata: &BTreeMap<String, String>) -> Result<()> {
        let url = self.endpoint(&format!("data/{}", path_segment(non_empty(data_id, "data id")?)));
        self.send_json(Method::POST, &url, &serde_json::json!({ "metadata": metadata }))?;
        Ok(())
    }

    /// Deploys a data id to GeoServer and returns the deployment id.
    pub fn deploy_to_geoserver(&self, data_id: &str) -> Result<String> {
        let body = serde_json::json!({
            "dataId": non_empty(data_id, "data id")?,
            "deploymentType": "geoserver",
            "type": "access",
        });
        let resp = self.send_json(Method::POST, &self.endpoint("deployment"), &body)?;
        let job_id = get_job_id(&resp)?;
        let result = self.get_job_response(job_id.as_str())?;

        let deployment = DataResult::from_value(&result).deployment.unwrap_or_default();
        Ok(required(&deployment.deployment_id, "deployment.deploymentId", &result)?.to_string())
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{what} is empty")));
    }
    Ok(value)
}
