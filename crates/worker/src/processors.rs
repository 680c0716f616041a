//! Processors shipped with the worker binary.

use async_trait::async_trait;
use bytes::Bytes;

use assetflow_core::ObjectKey;
use assetflow_infra::jobs::{Job, ProcessError};
use assetflow_infra::workers::{Artifact, Processor};

const INPUT_PREFIX: &str = "in/";
const OUTPUT_PREFIX: &str = "out/";

/// Map `in/<name>` to `out/<name>`.
pub fn derive_output_key(input: &ObjectKey) -> Result<ObjectKey, ProcessError> {
    let name = input
        .as_str()
        .strip_prefix(INPUT_PREFIX)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProcessError::permanent(format!("input key {input} is not under {INPUT_PREFIX}")))?;

    ObjectKey::parse(format!("{OUTPUT_PREFIX}{name}")).map_err(|e| ProcessError::permanent(e.to_string()))
}

/// Copies the input object unchanged to its output key. Stands in for a real
/// transform (thumbnailing, transcoding) and is deterministic, so reruns
/// overwrite the artifact with identical bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyProcessor;

#[async_trait]
impl Processor for CopyProcessor {
    async fn process(&self, job: &Job, input: Bytes) -> Result<Artifact, ProcessError> {
        let key = derive_output_key(&job.object_key)?;
        tracing::debug!(job_id = %job.id, output = %key, size = input.len(), "copying object");
        Ok(Artifact::new(key, input))
    }
}
