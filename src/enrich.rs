/*!
Metadata enrichment and integrity fields.

Turns caller-supplied partial metadata into the fully stamped
[`CheckpointMetadata`] and computes the size/checksum fields of an
[`EnhancedCheckpoint`]. Size and checksum computation follow a never-throws
contract: on serialization failure they degrade to `0` / empty string and log
a warning, because integrity fields are advisory and must not block a save.
*/

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CompressionTag, EnhancedCheckpoint, MetadataDraft,
    SCHEMA_VERSION,
};

/// Default `source` tag when the workflow engine supplies none.
const DEFAULT_SOURCE: &str = "loop";

/// Fills defaults and stamps timestamps/versions before a checkpoint is
/// handed to a backend. Deterministic given identical inputs and a fixed
/// clock (see [`MetadataEnricher::enrich_at`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataEnricher;

impl MetadataEnricher {
    pub fn new() -> Self {
        Self
    }

    /// Complete a draft into enriched metadata using the current clock.
    pub fn enrich(&self, thread_id: &str, draft: MetadataDraft) -> CheckpointMetadata {
        self.enrich_at(thread_id, draft, Utc::now())
    }

    /// Clock-injected variant; `enrich` delegates here.
    pub fn enrich_at(
        &self,
        thread_id: &str,
        draft: MetadataDraft,
        now: DateTime<Utc>,
    ) -> CheckpointMetadata {
        CheckpointMetadata {
            thread_id: thread_id.to_string(),
            timestamp: now,
            schema_version: SCHEMA_VERSION,
            source: draft.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            step: draft.step.unwrap_or(-1),
            parents: draft.parents.unwrap_or_default(),
            workflow_name: draft.workflow_name,
            step_name: draft.step_name,
            node_type: draft.node_type,
            execution_duration_ms: draft.execution_duration_ms,
            error: draft.error,
            branch_name: draft.branch_name,
            parent_thread_id: draft.parent_thread_id,
            parent_checkpoint_id: draft.parent_checkpoint_id,
            branch_created_at: draft.branch_created_at,
            branch_description: draft.branch_description,
            access_count: 0,
            last_accessed_at: None,
            extra: draft.extra,
        }
    }

    /// Best-effort serialized byte length of a checkpoint. Returns 0 on
    /// serialization failure.
    pub fn compute_size(&self, checkpoint: &Checkpoint) -> u64 {
        match serde_json::to_vec(checkpoint) {
            Ok(bytes) => bytes.len() as u64,
            Err(e) => {
                warn!(checkpoint_id = %checkpoint.id, error = %e, "size computation failed; recording 0");
                0
            }
        }
    }

    /// SHA-256 hex digest over the serialized checkpoint. Returns an empty
    /// string on serialization failure; the checksum is advisory and a
    /// missing one never blocks persistence.
    pub fn compute_checksum(&self, checkpoint: &Checkpoint) -> String {
        match serde_json::to_vec(checkpoint) {
            Ok(bytes) => {
                let digest = Sha256::digest(&bytes);
                format!("{digest:x}")
            }
            Err(e) => {
                warn!(checkpoint_id = %checkpoint.id, error = %e, "checksum computation failed; recording empty");
                String::new()
            }
        }
    }

    /// Assemble the persisted unit from a payload and enriched metadata.
    pub fn enhance(
        &self,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> EnhancedCheckpoint {
        let size_bytes = self.compute_size(&checkpoint);
        let checksum = self.compute_checksum(&checkpoint);
        EnhancedCheckpoint {
            checkpoint,
            metadata,
            size_bytes,
            checksum,
            compression: CompressionTag::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn sample_checkpoint() -> Checkpoint {
        let mut payload = FxHashMap::default();
        payload.insert("x".to_string(), serde_json::json!(1));
        Checkpoint::new("c1", payload)
    }

    #[test]
    fn enrich_fills_defaults_and_stamps() {
        let enricher = MetadataEnricher::new();
        let now = Utc::now();
        let meta = enricher.enrich_at("t1", MetadataDraft::default(), now);
        assert_eq!(meta.thread_id, "t1");
        assert_eq!(meta.timestamp, now);
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert_eq!(meta.source, "loop");
        assert_eq!(meta.step, -1);
        assert!(meta.parents.is_empty());
        assert_eq!(meta.access_count, 0);
    }

    #[test]
    fn enrich_is_deterministic_for_fixed_clock() {
        let enricher = MetadataEnricher::new();
        let now = Utc::now();
        let draft = MetadataDraft {
            source: Some("update".into()),
            step: Some(7),
            ..Default::default()
        };
        let a = enricher.enrich_at("t1", draft.clone(), now);
        let b = enricher.enrich_at("t1", draft, now);
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let enricher = MetadataEnricher::new();
        let cp = sample_checkpoint();
        let first = enricher.compute_checksum(&cp);
        let second = enricher.compute_checksum(&cp);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let mut other = cp.clone();
        other
            .payload
            .insert("x".to_string(), serde_json::json!(2));
        assert_ne!(first, enricher.compute_checksum(&other));
    }

    #[test]
    fn size_matches_serialized_length() {
        let enricher = MetadataEnricher::new();
        let cp = sample_checkpoint();
        let expected = serde_json::to_vec(&cp).unwrap().len() as u64;
        assert_eq!(enricher.compute_size(&cp), expected);
    }
}
