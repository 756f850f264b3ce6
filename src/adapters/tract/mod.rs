//! tract adapter: ONNX implementation of `LesionClassifier`.
//!
//! The model is a multimodal network with four inputs: the NHWC image, the
//! normalized age, the sex one-hot vector and the anatomic-site index. Inputs
//! are matched by node name and fall back to declared order.
//!
//! # Integrity
//!
//! When `manifest.json` is present next to the model, every file it lists is
//! hashed (SHA-256) and compared before anything is parsed, and the model
//! file chosen must be one of the listed files. With `require_manifest` set,
//! a missing manifest is fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tract_onnx::prelude::*;

use crate::domain::{EncodedMetadata, ImageTensor, PreprocessArtifact};
use crate::ports::{ClassifierError, LesionClassifier};

/// Model files tried in order.
pub const MODEL_CANDIDATES: [&str; 3] = [
    "best_model_checkpoint.onnx",
    "model_multimodal_improved.onnx",
    "model_multimodal.onnx",
];

/// Manifest file name inside the model directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// Content hashes of the files shipped in a model directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: u32,
    /// Unix timestamp (seconds) when the manifest was written
    pub created_at: i64,
    /// Relative file name → lowercase SHA-256 hex digest
    pub files: BTreeMap<String, String>,
}

impl ModelManifest {
    /// Hash `names` inside `dir`, skipping files that do not exist.
    ///
    /// # Errors
    /// Returns error if an existing file cannot be read.
    pub fn build(dir: &Path, names: &[&str], created_at: i64) -> std::io::Result<Self> {
        let mut files = BTreeMap::new();
        for name in names {
            let path = dir.join(name);
            if path.is_file() {
                files.insert((*name).to_string(), sha256_hex(&fs::read(&path)?));
            }
        }
        Ok(Self {
            version: MANIFEST_VERSION,
            created_at,
            files,
        })
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// Constant-time compare for ASCII hex digests.
fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn is_plain_file_name(rel: &str) -> bool {
    let path = Path::new(rel);
    !rel.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Read and check `manifest.json` in `model_dir`.
///
/// Returns `None` when the manifest is absent and not required.
///
/// # Errors
/// Returns `ClassifierError::Integrity` on a missing required manifest, an
/// unreadable or malformed manifest, or any digest mismatch.
pub fn verify_manifest(
    model_dir: &Path,
    require_manifest: bool,
) -> Result<Option<ModelManifest>, ClassifierError> {
    let manifest_path = model_dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        if require_manifest {
            tracing::error!("Model manifest not found at {:?}", manifest_path);
            return Err(ClassifierError::Integrity(format!(
                "{MANIFEST_FILE} is required but missing"
            )));
        }
        tracing::warn!("No model manifest found; loading unverified model files");
        return Ok(None);
    }

    let content = fs::read(&manifest_path)
        .map_err(|e| ClassifierError::Integrity(format!("Failed to read manifest: {e}")))?;
    let manifest: ModelManifest = serde_json::from_slice(&content)
        .map_err(|e| ClassifierError::Integrity(format!("Invalid {MANIFEST_FILE}: {e}")))?;

    if manifest.version != MANIFEST_VERSION {
        return Err(ClassifierError::Integrity(format!(
            "Unsupported manifest version: {}",
            manifest.version
        )));
    }
    if manifest.files.is_empty() {
        return Err(ClassifierError::Integrity(format!(
            "{MANIFEST_FILE} contains no files"
        )));
    }

    for (rel, expected_hex) in &manifest.files {
        if !is_plain_file_name(rel) {
            return Err(ClassifierError::Integrity(format!(
                "Manifest entry {rel:?} is not a plain relative path"
            )));
        }
        let path = model_dir.join(rel);
        let bytes = fs::read(&path).map_err(|e| {
            ClassifierError::Integrity(format!(
                "Manifest references missing/unreadable file {path:?}: {e}"
            ))
        })?;

        if !constant_time_eq_str(&sha256_hex(&bytes), &expected_hex.to_ascii_lowercase()) {
            return Err(ClassifierError::Integrity(format!(
                "File hash mismatch for {rel}"
            )));
        }
    }

    tracing::info!("Verified {} file(s) against {MANIFEST_FILE}", manifest.files.len());
    Ok(Some(manifest))
}

/// Pick the first candidate model file that exists (and, with a manifest,
/// that the manifest lists).
///
/// # Errors
/// Returns `ClassifierError::NotFound` when no candidate qualifies.
pub fn locate_model(
    model_dir: &Path,
    manifest: Option<&ModelManifest>,
) -> Result<PathBuf, ClassifierError> {
    MODEL_CANDIDATES
        .iter()
        .filter(|name| manifest.map_or(true, |m| m.files.contains_key(**name)))
        .map(|name| model_dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ClassifierError::NotFound(format!(
                "No model in {model_dir:?} (expected one of {})",
                MODEL_CANDIDATES.join(", ")
            ))
        })
}

/// What a model input carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputRole {
    Image,
    Age,
    Sex,
    Site,
}

impl InputRole {
    const DECLARED_ORDER: [Self; 4] = [Self::Image, Self::Age, Self::Sex, Self::Site];

    fn from_node_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("image") || name.contains("img") {
            Some(Self::Image)
        } else if name.contains("age") {
            Some(Self::Age)
        } else if name.contains("sex") {
            Some(Self::Sex)
        } else if name.contains("site") {
            Some(Self::Site)
        } else {
            None
        }
    }
}

/// One model input, in model order.
#[derive(Debug, Clone)]
struct InputSlot {
    role: InputRole,
    name: String,
    datum_type: DatumType,
    rank: usize,
}

/// Assign roles by node name; if names don't cover all four roles exactly
/// once, use declared order.
fn assign_roles(names: &[String]) -> Result<Vec<InputRole>, ClassifierError> {
    if names.len() != InputRole::DECLARED_ORDER.len() {
        return Err(ClassifierError::InputMismatch(format!(
            "model declares {} inputs, expected 4 (image, age, sex_ohe, site_idx)",
            names.len()
        )));
    }

    let by_name: Option<Vec<InputRole>> =
        names.iter().map(|n| InputRole::from_node_name(n)).collect();
    if let Some(roles) = by_name {
        if InputRole::DECLARED_ORDER.iter().all(|r| roles.contains(r)) {
            return Ok(roles);
        }
    }

    tracing::warn!(
        "Model input names {:?} not recognised; binding by declared order",
        names
    );
    Ok(InputRole::DECLARED_ORDER.to_vec())
}

/// Shape for a batch-1 input carrying `len` values at the given rank.
fn batch_shape(rank: usize, len: usize) -> Option<Vec<usize>> {
    match rank {
        1 => Some(vec![len]),
        2 => Some(vec![1, len]),
        _ => None,
    }
}

/// Concrete sizes pinned on the model inputs before optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDims {
    pub width: usize,
    pub height: usize,
    pub sex_len: usize,
}

impl From<&PreprocessArtifact> for InputDims {
    fn from(artifact: &PreprocessArtifact) -> Self {
        let (width, height) = artifact.target_size();
        Self {
            width: width as usize,
            height: height as usize,
            sex_len: artifact.sex_categories.len(),
        }
    }
}

/// Batch-1 fact for one input, keeping the datum type the model declares.
fn pinned_fact(
    role: InputRole,
    declared: &InferenceFact,
    dims: &InputDims,
) -> Result<InferenceFact, String> {
    let rank = if declared.shape.is_open() {
        None
    } else {
        Some(declared.shape.dims().count())
    };
    let unsupported = |r: usize| format!("unsupported rank {r}");

    let shape = match role {
        InputRole::Image => match rank {
            None | Some(4) => vec![1, dims.height, dims.width, 3],
            Some(r) => return Err(format!("expected rank 4, model declares {r}")),
        },
        InputRole::Age | InputRole::Site => {
            let r = rank.unwrap_or(2);
            batch_shape(r, 1).ok_or_else(|| unsupported(r))?
        }
        InputRole::Sex => {
            let r = rank.unwrap_or(2);
            batch_shape(r, dims.sex_len).ok_or_else(|| unsupported(r))?
        }
    };

    let datum_type = declared.datum_type().unwrap_or(match role {
        InputRole::Site => i64::datum_type(),
        _ => f32::datum_type(),
    });
    Ok(InferenceFact::dt_shape(datum_type, shape))
}

fn build_input(
    slot: &InputSlot,
    image: &ImageTensor,
    metadata: &EncodedMetadata,
) -> Result<Tensor, ClassifierError> {
    let mismatch = |detail: String| ClassifierError::InputMismatch(format!("{}: {detail}", slot.name));

    let tensor = match slot.role {
        InputRole::Image => {
            if slot.rank != 4 {
                return Err(mismatch(format!("expected rank 4, model declares {}", slot.rank)));
            }
            Tensor::from_shape(&image.shape(), &image.data)
        }
        InputRole::Age => {
            let shape = batch_shape(slot.rank, 1)
                .ok_or_else(|| mismatch(format!("unsupported rank {}", slot.rank)))?;
            Tensor::from_shape(&shape, &[metadata.age_norm])
        }
        InputRole::Sex => {
            let shape = batch_shape(slot.rank, metadata.sex_ohe.len())
                .ok_or_else(|| mismatch(format!("unsupported rank {}", slot.rank)))?;
            Tensor::from_shape(&shape, &metadata.sex_ohe)
        }
        InputRole::Site => {
            let shape = batch_shape(slot.rank, 1)
                .ok_or_else(|| mismatch(format!("unsupported rank {}", slot.rank)))?;
            Tensor::from_shape(&shape, &[metadata.site_idx])
        }
    }
    .map_err(|e| mismatch(format!("{e:#}")))?;

    if tensor.datum_type() == slot.datum_type {
        return Ok(tensor);
    }
    tensor
        .cast_to_dt(slot.datum_type)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| mismatch(format!("cannot convert to {:?}: {e:#}", slot.datum_type)))
}

/// ONNX classifier running on tract.
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
    slots: Vec<InputSlot>,
    model_file: String,
}

impl OnnxClassifier {
    /// Verify the manifest, pick a candidate model and load it.
    ///
    /// # Errors
    /// Returns error if no model exists, integrity checks fail or the model
    /// cannot be loaded.
    pub fn load(
        model_dir: &Path,
        require_manifest: bool,
        dims: Option<&InputDims>,
    ) -> Result<Self, ClassifierError> {
        let manifest = verify_manifest(model_dir, require_manifest)?;
        let path = locate_model(model_dir, manifest.as_ref())?;
        Self::from_path(&path, dims)
    }

    /// Load and optimize an ONNX file.
    ///
    /// With `dims`, every input is pinned to batch 1 and the given sizes
    /// before optimization, so symbolic batch or image dimensions are
    /// resolved once at load time.
    ///
    /// # Errors
    /// Returns `ClassifierError::Load` if tract rejects the model and
    /// `ClassifierError::InputMismatch` if its inputs are not the expected
    /// four.
    pub fn from_path(path: &Path, dims: Option<&InputDims>) -> Result<Self, ClassifierError> {
        let load_err = |e: TractError| ClassifierError::Load(format!("{path:?}: {e:#}"));

        let mut model = tract_onnx::onnx().model_for_path(path).map_err(load_err)?;

        let names: Vec<String> = model
            .input_outlets()
            .map_err(load_err)?
            .iter()
            .map(|o| model.node(o.node).name.clone())
            .collect();
        let roles = assign_roles(&names)?;

        if let Some(dims) = dims {
            for (ix, (role, name)) in roles.iter().zip(&names).enumerate() {
                let declared = model.input_fact(ix).map_err(load_err)?;
                let fact = pinned_fact(*role, declared, dims)
                    .map_err(|detail| ClassifierError::InputMismatch(format!("{name}: {detail}")))?;
                model.set_input_fact(ix, fact).map_err(load_err)?;
            }
        }

        let plan = model
            .into_optimized()
            .and_then(|model| model.into_runnable())
            .map_err(load_err)?;

        let model = plan.model();
        let outlets = model.input_outlets().map_err(load_err)?;

        let slots = outlets
            .iter()
            .zip(names)
            .zip(roles)
            .map(|((outlet, name), role)| {
                let fact = model.outlet_fact(*outlet).map_err(load_err)?;
                Ok(InputSlot {
                    role,
                    name,
                    datum_type: fact.datum_type,
                    rank: fact.rank(),
                })
            })
            .collect::<Result<Vec<_>, ClassifierError>>()?;

        let model_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        tracing::info!(
            "Loaded model {} with inputs [{}]",
            model_file,
            slots
                .iter()
                .map(|s| format!("{}:{:?}/{:?}", s.name, s.role, s.datum_type))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            plan,
            slots,
            model_file,
        })
    }

    /// File name of the loaded model.
    #[must_use]
    pub fn model_file(&self) -> &str {
        &self.model_file
    }
}

impl LesionClassifier for OnnxClassifier {
    fn predict(
        &self,
        image: &ImageTensor,
        metadata: &EncodedMetadata,
    ) -> Result<Vec<f64>, ClassifierError> {
        let inputs = self
            .slots
            .iter()
            .map(|slot| build_input(slot, image, metadata).map(TValue::from))
            .collect::<Result<TVec<TValue>, _>>()?;

        let outputs = self
            .plan
            .run(inputs)
            .map_err(|e| ClassifierError::Inference(format!("{e:#}")))?;

        let first = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".into()))?;
        let probs = first
            .cast_to::<f64>()
            .map_err(|e| ClassifierError::Inference(format!("{e:#}")))?;
        let probs = probs
            .as_slice::<f64>()
            .map_err(|e| ClassifierError::Inference(format!("{e:#}")))?;

        Ok(probs.to_vec())
    }

    fn describe(&self) -> String {
        format!("{} (tract-onnx)", self.model_file)
    }
}
