use anyhow::{Context, Result};
use pzsvc::{Client, IngestKind, IngestRequestOptions};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure the gateway via env vars or a `.pzsvcrc` file.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: ingest_and_deploy <file.tif>")?;
    let file_name = Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no file name")?
        .to_string();

    let client = Client::from_env()?;
    let opts = IngestRequestOptions::new(file_name, IngestKind::Raster)
        .with_source("ingest_and_deploy", env!("CARGO_PKG_VERSION"))
        .with_property("sensor", "demo");

    let data_id = client.ingest_file(Path::new(&path), &opts)?;
    let layer = client.deploy_to_geoserver(&data_id)?;
    println!("ingested {data_id}, deployed as layer {layer}");
    Ok(())
}
