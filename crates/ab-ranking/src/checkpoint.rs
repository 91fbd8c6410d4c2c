//! Self-describing checkpoint container for trained scorers.
//!
//! A checkpoint is a bincode-encoded envelope holding the scorer's binary
//! parameter record (`model_dict`) plus metadata: model type, file path,
//! SHA-256 hex digest of `model_dict` (`model-hash`) and creation date
//! (`YYYY-MM-DD`). Decoding rejects blobs with a wrong magic or version,
//! any missing metadata field, or a digest that does not match.

use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use pair_store::ObjectStore;

use crate::error::RankingError;
use crate::model::scorer::ScoreNetwork;

const CHECKPOINT_MAGIC: [u8; 4] = *b"ABRK";
/// Envelope format version written by this build.
pub const CHECKPOINT_VERSION: u32 = 1;
const DATE_FORMAT: &str = "%Y-%m-%d";

type ParamRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// On-disk layout. Metadata fields are optional so that a blob missing one
/// decodes and is then rejected with a precise message.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    magic: [u8; 4],
    version: u32,
    model_dict: Option<Vec<u8>>,
    model_type: Option<String>,
    file_path: Option<String>,
    model_hash: Option<String>,
    date: Option<String>,
    parameter_shapes: Vec<(String, Vec<usize>)>,
}

/// Identity of a persisted model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_type: String,
    pub file_path: String,
    /// SHA-256 hex digest of the parameter record.
    pub model_hash: String,
    /// Creation date, `YYYY-MM-DD`.
    pub date: String,
}

/// A validated checkpoint whose parameters have not been bound to a scorer yet.
#[derive(Debug, Clone)]
pub struct DecodedCheckpoint {
    pub metadata: ModelMetadata,
    pub parameter_shapes: Vec<(String, Vec<usize>)>,
    model_dict: Vec<u8>,
}

impl DecodedCheckpoint {
    /// Size of the parameter record in bytes.
    pub fn model_dict_len(&self) -> usize {
        self.model_dict.len()
    }
}

/// SHA-256 hex digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Binary parameter record of a module.
pub fn model_dict<B: Backend, M: Module<B>>(model: &M) -> Result<Vec<u8>, RankingError> {
    let recorder = ParamRecorder::default();
    Recorder::<B>::record(&recorder, model.clone().into_record(), ()).map_err(|e| RankingError::Export {
        artifact: "model parameters".to_string(),
        reason: e.to_string(),
    })
}

/// Content hash of a module's current parameters.
pub fn model_hash<B: Backend, M: Module<B>>(model: &M) -> Result<String, RankingError> {
    Ok(content_hash(&model_dict::<B, M>(model)?))
}

/// Today's date in checkpoint format.
pub fn today() -> String {
    chrono::Local::now().format(DATE_FORMAT).to_string()
}

/// Encodes scorers into checkpoint blobs and restores them.
pub struct CheckpointCodec;

impl CheckpointCodec {
    /// Serialize `model` into a checkpoint blob stamped with `file_path` and `date`.
    pub fn encode<B: Backend, M: ScoreNetwork<B>>(
        model: &M,
        file_path: &str,
        date: &str,
    ) -> Result<(Vec<u8>, ModelMetadata), RankingError> {
        let dict = model_dict::<B, M>(model)?;
        let metadata = ModelMetadata {
            model_type: model.model_type().to_string(),
            file_path: file_path.to_string(),
            model_hash: content_hash(&dict),
            date: date.to_string(),
        };
        let envelope = CheckpointEnvelope {
            magic: CHECKPOINT_MAGIC,
            version: CHECKPOINT_VERSION,
            model_dict: Some(dict),
            model_type: Some(metadata.model_type.clone()),
            file_path: Some(metadata.file_path.clone()),
            model_hash: Some(metadata.model_hash.clone()),
            date: Some(metadata.date.clone()),
            parameter_shapes: model.parameter_shapes(),
        };
        let blob = bincode::serialize(&envelope).map_err(|e| RankingError::Export {
            artifact: "checkpoint".to_string(),
            reason: e.to_string(),
        })?;
        Ok((blob, metadata))
    }

    /// Encode `model` and write it to `bucket/path`, dated today.
    pub fn save<B: Backend, M: ScoreNetwork<B>>(
        model: &M,
        store: &dyn ObjectStore,
        bucket: &str,
        path: &str,
    ) -> Result<ModelMetadata, RankingError> {
        Self::save_dated::<B, M>(model, store, bucket, path, &today())
    }

    /// Encode `model` stamped with `date` and write it to `bucket/path`.
    ///
    /// The blob is decoded and its hash re-checked before it is stored.
    pub fn save_dated<B: Backend, M: ScoreNetwork<B>>(
        model: &M,
        store: &dyn ObjectStore,
        bucket: &str,
        path: &str,
        date: &str,
    ) -> Result<ModelMetadata, RankingError> {
        let (blob, metadata) = Self::encode::<B, M>(model, path, date)?;
        Self::decode(&blob)?;
        store.put(bucket, path, &blob)?;
        tracing::info!(
            bucket,
            path,
            bytes = blob.len(),
            model_hash = %metadata.model_hash,
            "Saved checkpoint"
        );
        Ok(metadata)
    }

    /// Validate a blob and extract its metadata, without a scorer.
    pub fn decode(blob: &[u8]) -> Result<DecodedCheckpoint, RankingError> {
        let envelope: CheckpointEnvelope = bincode::deserialize(blob)
            .map_err(|e| RankingError::CorruptCheckpoint(format!("undecodable envelope: {e}")))?;
        if envelope.magic != CHECKPOINT_MAGIC {
            return Err(RankingError::CorruptCheckpoint("bad magic bytes".into()));
        }
        if envelope.version != CHECKPOINT_VERSION {
            return Err(RankingError::CorruptCheckpoint(format!(
                "unsupported format version {} (expected {CHECKPOINT_VERSION})",
                envelope.version
            )));
        }

        let model_dict = required(envelope.model_dict, "model_dict")?;
        let metadata = ModelMetadata {
            model_type: required(envelope.model_type, "model-type")?,
            file_path: required(envelope.file_path, "file-path")?,
            model_hash: required(envelope.model_hash, "model-hash")?,
            date: required(envelope.date, "date")?,
        };

        if NaiveDate::parse_from_str(&metadata.date, DATE_FORMAT).is_err() {
            return Err(RankingError::CorruptCheckpoint(format!(
                "date '{}' is not YYYY-MM-DD",
                metadata.date
            )));
        }
        let actual = content_hash(&model_dict);
        if actual != metadata.model_hash {
            return Err(RankingError::CorruptCheckpoint(format!(
                "model-hash mismatch: stored {}, computed {actual}",
                metadata.model_hash
            )));
        }

        Ok(DecodedCheckpoint {
            metadata,
            parameter_shapes: envelope.parameter_shapes,
            model_dict,
        })
    }

    /// Restore a scorer from a blob.
    ///
    /// Loads into a copy of `model`; on any failure `model` is left as it was.
    /// The checkpoint must match the scorer's model type and parameter shapes.
    pub fn load<B: Backend, M: ScoreNetwork<B>>(
        model: &M,
        blob: &[u8],
        device: &B::Device,
    ) -> Result<(M, ModelMetadata), RankingError> {
        let decoded = Self::decode(blob)?;
        if decoded.metadata.model_type != model.model_type() {
            return Err(RankingError::CorruptCheckpoint(format!(
                "model-type '{}' does not match scorer '{}'",
                decoded.metadata.model_type,
                model.model_type()
            )));
        }

        let expected = model.parameter_shapes();
        if decoded.parameter_shapes != expected {
            return Err(shape_mismatch(&expected, &decoded.parameter_shapes));
        }

        let recorder = ParamRecorder::default();
        let record: M::Record = Recorder::<B>::load(&recorder, decoded.model_dict, device)
            .map_err(|e| RankingError::CorruptCheckpoint(format!("unreadable model_dict: {e}")))?;
        let loaded = model.clone().load_record(record);

        let restored = loaded.parameter_shapes();
        if restored != expected {
            return Err(shape_mismatch(&expected, &restored));
        }
        Ok((loaded, decoded.metadata))
    }

    /// Fetch `bucket/path` from `store` and restore it into a copy of `model`.
    pub fn load_from_store<B: Backend, M: ScoreNetwork<B>>(
        model: &M,
        store: &dyn ObjectStore,
        bucket: &str,
        path: &str,
        device: &B::Device,
    ) -> Result<(M, ModelMetadata), RankingError> {
        let blob = store.get(bucket, path)?;
        Self::load(model, &blob, device)
    }
}

fn required<T>(field: Option<T>, name: &str) -> Result<T, RankingError> {
    field.ok_or_else(|| RankingError::CorruptCheckpoint(format!("missing field '{name}'")))
}

fn shape_mismatch(expected: &[(String, Vec<usize>)], found: &[(String, Vec<usize>)]) -> RankingError {
    RankingError::CorruptCheckpoint(format!(
        "parameter shapes do not match scorer: expected {expected:?}, found {found:?}"
    ))
}
