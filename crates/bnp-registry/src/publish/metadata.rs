//! The publish document sent to the registry.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::Integrity;
use crate::config::Access;
use crate::error::{PublishError, PublishResult};
use crate::package::PackageSpec;
use crate::provenance::ProvenanceBundle;

const TARBALL_CONTENT_TYPE: &str = "application/octet-stream";

/// Body of the registry PUT.
#[derive(Debug, Clone, Serialize)]
pub struct PublishMetadataDocument {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,

    /// Tag -> version.
    #[serde(rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,

    /// Version -> package descriptor.
    pub versions: BTreeMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,

    #[serde(rename = "_attachments")]
    pub attachments: BTreeMap<String, Attachment>,
}

/// Inline attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub content_type: String,
    pub data: String,
    pub length: usize,
}

/// Inputs of [`build_metadata`] besides the package itself.
#[derive(Debug, Clone, Copy)]
pub struct MetadataOptions<'a> {
    pub registry: &'a str,
    pub access: Option<Access>,
    /// Configured tag; the manifest's own `tag` field wins.
    pub tag: &'a str,
    pub provenance: Option<&'a ProvenanceBundle>,
}

/// Assemble the publish document.
///
/// `manifest` is the package descriptor (`package.json`); it is embedded
/// under `versions` with `_id` and `dist` filled in.
pub fn build_metadata(
    spec: &PackageSpec,
    manifest: &Map<String, Value>,
    tarball: &[u8],
    integrity: &Integrity,
    opts: MetadataOptions<'_>,
) -> PublishResult<PublishMetadataDocument> {
    let version = spec.version().to_string();
    let tarball_name = spec.tarball_attachment_name();

    let mut descriptor = manifest.clone();
    descriptor
        .entry("name")
        .or_insert_with(|| Value::String(spec.name().to_string()));
    descriptor
        .entry("version")
        .or_insert_with(|| Value::String(version.clone()));
    descriptor.insert("_id".into(), Value::String(spec.to_string()));

    let mut dist = match descriptor.remove("dist") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    dist.insert("integrity".into(), Value::String(integrity.sri()));
    dist.insert("shasum".into(), Value::String(integrity.shasum()));
    dist.insert(
        "tarball".into(),
        Value::String(tarball_url(opts.registry, spec.name(), &tarball_name)?),
    );
    descriptor.insert("dist".into(), Value::Object(dist));

    let tag = manifest
        .get("tag")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(opts.tag);

    let mut attachments = BTreeMap::new();
    attachments.insert(
        tarball_name,
        Attachment {
            content_type: TARBALL_CONTENT_TYPE.to_string(),
            data: BASE64.encode(tarball),
            length: tarball.len(),
        },
    );

    if let Some(bundle) = opts.provenance {
        let serialized = serde_json::to_string(bundle).map_err(|e| {
            PublishError::provenance(format!("failed to serialize provenance bundle: {e}"))
        })?;
        attachments.insert(
            spec.provenance_attachment_name(),
            Attachment {
                content_type: bundle.media_type.clone(),
                length: serialized.len(),
                data: serialized,
            },
        );
    }

    Ok(PublishMetadataDocument {
        id: spec.name().to_string(),
        name: spec.name().to_string(),
        description: manifest.get("description").cloned(),
        dist_tags: [(tag.to_string(), version.clone())].into(),
        versions: [(version, Value::Object(descriptor))].into(),
        access: opts.access,
        attachments,
    })
}

/// `{registry}/{name}/-/{file}`, resolved like a relative URL and served
/// over plain http.
fn tarball_url(registry: &str, name: &str, file: &str) -> PublishResult<String> {
    let base = url::Url::parse(registry).map_err(|e| PublishError::Config {
        message: format!("invalid registry URL `{registry}`: {e}"),
    })?;
    let joined = base
        .join(&format!("{name}/-/{file}"))
        .map_err(|e| PublishError::Config {
            message: format!("invalid tarball URL for `{name}`: {e}"),
        })?;

    let href = joined.to_string();
    Ok(match href.strip_prefix("https://") {
        Some(rest) => format!("http://{rest}"),
        None => href,
    })
}
