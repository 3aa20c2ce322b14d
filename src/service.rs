use reqwest::Method;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::client::Client;
use crate::decode::decode_json;
use crate::error::{Error, Result};
use crate::model::{ClassType, Envelope, ExecOutput, ResourceMetadata, Service};
use crate::transport::RequestBody;
use crate::util::{append_query, path_segment};

/// A service as its owner wants it registered.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistration {
    pub name: String,
    pub description: String,
    /// Where the gateway should send execution requests.
    pub url: String,
    pub version: String,
    pub attributes: BTreeMap<String, String>,
}

/// What [`Client::manage_registration`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered,
    Updated { service_id: String },
}

/// A command for a pzsvc-exec instance.
///
/// File lists travel comma-separated; the exec service fetches `in_files`
/// (data ids) before running `cmd` and ingests the named outputs afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Address of the exec instance, not of the gateway.
    pub url: String,
    pub cmd: String,
    pub in_files: Vec<String>,
    pub out_geojson: Vec<String>,
    pub out_tiffs: Vec<String>,
    pub out_txt: Vec<String>,
    /// Gateway credential the exec service uses on the caller's behalf.
    pub auth_key: String,
}

impl ExecRequest {
    fn form(&self) -> Vec<(String, String)> {
        [
            ("cmd", self.cmd.clone()),
            ("inFiles", self.in_files.join(",")),
            ("outGeoJson", self.out_geojson.join(",")),
            ("outTiffs", self.out_tiffs.join(",")),
            ("outTxt", self.out_txt.join(",")),
            ("authKey", self.auth_key.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

impl Client {
    /// Runs a command on a pzsvc-exec instance and returns its full report.
    ///
    /// The credential goes in the form, so no `Authorization` header is sent.
    pub fn run_exec(&self, req: &ExecRequest) -> Result<ExecOutput> {
        if req.url.trim().is_empty() {
            return Err(Error::InvalidArgument("exec service url is empty".to_string()));
        }
        info!(url = %req.url, cmd = %req.cmd, "calling exec service");
        let resp = self.send_as(Method::POST, &req.url, "", RequestBody::Form(req.form()))?;
        let out = decode_json::<ExecOutput>(resp.body)?.value;
        if !out.errors.is_empty() {
            warn!(url = %req.url, errors = ?out.errors, "exec service reported errors");
        }
        Ok(out)
    }

    /// Runs a command on a pzsvc-exec instance and returns the output files
    /// it ingested, by name.
    pub fn call_pzsvc_exec(&self, req: &ExecRequest) -> Result<BTreeMap<String, String>> {
        Ok(self.run_exec(req)?.out_files)
    }

    /// Looks up a service by exact name. `None` when nothing matches.
    pub fn find_service(&self, name: &str) -> Result<Option<String>> {
        let url = append_query(
            &self.endpoint("service"),
            &[("perPage", "1000"), ("keyword", name)],
        );
        let services = self.get_json::<Envelope<Vec<Service>>>(&url)?.value.data;
        Ok(services
            .into_iter()
            .find(|s| s.resource_metadata.name == name)
            .and_then(|s| s.service_id))
    }

    /// Registers the service, or updates it in place when one with the same
    /// name already exists.
    pub fn manage_registration(&self, reg: &ServiceRegistration) -> Result<Registration> {
        if reg.name.trim().is_empty() {
            return Err(Error::InvalidArgument("service name is empty".to_string()));
        }
        if reg.url.trim().is_empty() {
            return Err(Error::InvalidArgument("service url is empty".to_string()));
        }

        let existing = self.find_service(&reg.name)?;
        let service = Service {
            service_id: existing.clone(),
            url: reg.url.clone(),
            contract_url: None,
            method: "POST".to_string(),
            resource_metadata: ResourceMetadata {
                name: reg.name.clone(),
                description: reg.description.clone(),
                class_type: Some(ClassType::unclassified()),
                version: reg.version.clone(),
                metadata: reg.attributes.clone(),
                ..Default::default()
            },
            timeout: None,
        };

        match existing {
            None => {
                info!(service = %reg.name, "registering service");
                self.send_json(Method::POST, &self.endpoint("service"), &service)?;
                Ok(Registration::Registered)
            }
            Some(service_id) => {
                info!(service = %reg.name, %service_id, "updating service");
                let url = self.endpoint(&format!("service/{}", path_segment(&service_id)));
                self.send_json(Method::PUT, &url, &service)?;
                Ok(Registration::Updated { service_id })
            }
        }
    }
}
