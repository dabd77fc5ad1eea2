use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::annotate::annotate;
use crate::calibration::calibrate;
use crate::confidence::{ConfidenceInputs, landmark_completeness};
use crate::config::EngineConfig;
use crate::correction::{self, CorrectionModel};
use crate::detection::preprocessing::{self, EnhanceThresholds};
use crate::detection::{ChainOutcome, DetectorRegistry, FallbackController};
use crate::error::{MorphoError, MorphoResult};
use crate::measurement;
use crate::models::{
    DetectorKind, FallbackState, LandmarkSet, MeasurementResult, ProcessingOutcome, Provenance,
    QualityReport, Warning,
};
use crate::uncertainty;
use crate::validation::{self, MeasurementValues, ReferencePopulation};

/// Image handed to the engine
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded bytes (JPEG, PNG, ...), decoded by the engine
    Bytes(Vec<u8>),
    /// Already decoded pixels
    Decoded(DynamicImage),
}

/// Per-invocation inputs
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub source: ImageSource,
    /// Known physical length used for calibration, must be positive
    pub reference_length: Option<f64>,
    pub category: Option<String>,
    pub population: Option<Arc<ReferencePopulation>>,
    pub annotate: bool,
    /// Overrides the engine's default detector variants
    pub detectors: Option<Vec<DetectorKind>>,
    /// Overrides the engine's default max dimension
    pub max_dimension: Option<u32>,
}

impl ProcessingRequest {
    fn with_source(source: ImageSource) -> Self {
        Self {
            source,
            reference_length: None,
            category: None,
            population: None,
            annotate: false,
            detectors: None,
            max_dimension: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::with_source(ImageSource::Bytes(bytes))
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self::with_source(ImageSource::Decoded(image))
    }

    pub fn with_reference_length(mut self, length: f64) -> Self {
        self.reference_length = Some(length);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_population(mut self, population: Arc<ReferencePopulation>) -> Self {
        self.population = Some(population);
        self
    }

    pub fn with_annotation(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    pub fn with_detectors(mut self, detectors: Vec<DetectorKind>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension);
        self
    }

    pub fn validate(&self) -> MorphoResult<()> {
        if let Some(length) = self.reference_length {
            if !(length.is_finite() && length > 0.0) {
                return Err(MorphoError::config(format!(
                    "reference length must be a positive number, got {length}"
                )));
            }
        }
        if self.max_dimension == Some(0) {
            return Err(MorphoError::config("max dimension must be positive"));
        }
        if self.detectors.as_ref().is_some_and(Vec::is_empty) {
            return Err(MorphoError::config("at least one detector variant must be enabled"));
        }
        Ok(())
    }
}

/// Where intermediate images are written when debugging
#[derive(Clone, Debug)]
pub struct DebugConfig {
    pub output_dir: PathBuf,
}

/// The morphometric engine.
///
/// Holds only immutable state (detectors, configuration), so one instance can
/// serve any number of concurrent [`Engine::process`] calls.
pub struct Engine {
    registry: DetectorRegistry,
    config: EngineConfig,
    correction: Option<Arc<dyn CorrectionModel>>,
    debug: Option<DebugConfig>,
}

impl Engine {
    pub fn new(registry: DetectorRegistry, config: EngineConfig) -> MorphoResult<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(MorphoError::config("detector registry is empty"));
        }
        if !config.detectors.iter().any(|kind| registry.contains(*kind)) {
            return Err(MorphoError::config("none of the enabled detector variants is registered"));
        }
        info!(detectors = registry.len(), max_dimension = config.max_dimension, "engine ready");
        Ok(Self {
            registry,
            config,
            correction: None,
            debug: None,
        })
    }

    /// Built-in detectors with default configuration
    pub fn builtin() -> MorphoResult<Self> {
        Self::new(DetectorRegistry::builtin(), EngineConfig::default())
    }

    pub fn with_correction_model(mut self, model: Arc<dyn CorrectionModel>) -> Self {
        self.correction = Some(model);
        self
    }

    /// Save intermediate images of every invocation below `output_dir`.
    /// The directory must be empty or non-existent.
    pub fn with_debug(mut self, output_dir: PathBuf) -> MorphoResult<Self> {
        if output_dir.exists() {
            let mut entries = std::fs::read_dir(&output_dir)
                .map_err(|e| MorphoError::config(format!("cannot read {}: {e}", output_dir.display())))?;
            if entries.next().is_some() {
                return Err(MorphoError::config(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)
                .map_err(|e| MorphoError::config(format!("cannot create {}: {e}", output_dir.display())))?;
        }
        self.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Process one image.
    ///
    /// Undecodable input and detection failure come back as unsuccessful
    /// outcomes; `Err` is reserved for invalid request parameters.
    pub fn process(&self, request: &ProcessingRequest) -> MorphoResult<ProcessingOutcome> {
        request.validate()?;
        let id = Uuid::new_v4();

        let image = match self.decode(&request.source) {
            Ok(image) => image,
            Err(err) => {
                warn!(%id, error = %err, "rejected input");
                return Ok(failure(id, err, QualityReport::default(), None));
            }
        };

        let max_dimension = request.max_dimension.unwrap_or(self.config.max_dimension);
        let image = preprocessing::normalize(&image, max_dimension);
        let quality = preprocessing::assess_quality(&image);
        debug!(%id, width = image.width(), height = image.height(), quality = quality.score, "image prepared");
        self.save_debug(id, "00_input", &image);

        let mut notes = Vec::new();
        let working = if self.config.enhance_input {
            let thresholds = EnhanceThresholds {
                low_contrast: self.config.low_contrast_threshold,
                blur: self.config.blur_threshold,
            };
            let (enhanced, applied) = preprocessing::enhance(&image, thresholds);
            if !applied.is_empty() {
                notes.push(format!("image enhanced before detection ({})", applied.join(", ")));
                self.save_debug(id, "01_enhanced", &enhanced);
            }
            enhanced
        } else {
            image.clone()
        };

        let detectors = request.detectors.as_deref().unwrap_or(self.config.detectors.as_slice());
        let chain = FallbackController::new(&self.registry, detectors, self.config.estimated_confidence).run(&working);
        notes.extend(chain.notes.iter().cloned());

        if !chain.succeeded() {
            warn!(%id, strategies = chain.strategies_used.len(), "no anatomical anchor found");
            let mut outcome = failure(id, MorphoError::detection_failure(), quality, Some(&chain));
            outcome.notes = notes;
            return Ok(outcome);
        }

        let outcome = self.measure(id, request, &image, chain, quality, notes);
        info!(
            %id,
            state = ?outcome.fallback_state,
            measurements = outcome.measurements.iter().filter(|m| m.is_present()).count(),
            confidence = outcome.confidence,
            warnings = outcome.warnings.len(),
            "image processed"
        );
        Ok(outcome)
    }

    /// Calibration onwards, for a chain that produced landmarks
    fn measure(
        &self,
        id: Uuid,
        request: &ProcessingRequest,
        image: &DynamicImage,
        chain: ChainOutcome,
        quality: QualityReport,
        notes: Vec<String>,
    ) -> ProcessingOutcome {
        let landmarks = chain.landmarks;
        let mut warnings = Vec::new();

        let calibration = calibrate(&landmarks, request.reference_length, &self.config.anchor);
        warnings.extend(calibration.warning.clone());
        let scale_factor = calibration.scale_factor;

        let values = measurement::compute(&landmarks, scale_factor);
        let spreads = uncertainty::bootstrap(&landmarks, scale_factor, &self.config.bootstrap);

        let mut measurements: Vec<MeasurementResult> = measurement::catalog()
            .iter()
            .map(|spec| {
                let value = values.get(spec.name).copied().flatten();
                let spread = spreads.get(spec.name).copied().flatten();
                MeasurementResult {
                    name: spec.name.to_string(),
                    value,
                    uncertainty: value.and(spread.map(|s| s.stddev)),
                    provenance: Provenance {
                        landmarks: spec.landmarks.to_vec(),
                        origin: value.map(|_| landmarks.origin),
                        strategy: landmarks.strategy,
                        calibrated: calibration.calibrated,
                        corrected: false,
                        bootstrap_mean: value.and(spread.map(|s| s.mean)),
                    },
                }
            })
            .collect();

        let mut correction_confidence = None;
        if let (Some(model), Some(category)) = (&self.correction, request.category.as_deref()) {
            let applied = correction::apply(model.as_ref(), &mut measurements, category);
            correction_confidence = applied.confidence;
            warnings.extend(applied.warning);
        }

        let present: MeasurementValues = measurements
            .iter()
            .filter_map(|m| m.value.map(|v| (m.name.clone(), v)))
            .collect();
        let report = validation::validate(
            &present,
            calibration.calibrated,
            request.category.as_deref(),
            request.population.as_deref(),
        );
        warnings.extend(report.warnings);

        let inputs = ConfidenceInputs {
            detection: landmarks.mean_confidence(),
            completeness: landmark_completeness(present.len(), measurement::catalog().len()),
            quality: quality.score,
            consistency: report.consistency,
            agreement: chain.agreement,
        };
        let mut confidence = inputs.score();
        if chain.state == FallbackState::Estimated {
            confidence = confidence.min(self.config.estimated_confidence);
        }

        let annotated = request.annotate.then(|| annotate(image, &landmarks));
        if let Some(annotated) = &annotated {
            self.save_debug(id, "02_annotated", &DynamicImage::ImageRgb8(annotated.clone()));
        }

        ProcessingOutcome {
            id,
            processed_at: timestamp(),
            success: true,
            landmarks,
            measurements,
            quality,
            confidence,
            scale_factor,
            calibrated: calibration.calibrated,
            agreement: chain.agreement,
            strategies_used: chain.strategies_used,
            fallback_state: chain.state,
            warnings,
            notes,
            correction_confidence,
            error: None,
            annotated,
        }
    }

    fn decode(&self, source: &ImageSource) -> MorphoResult<DynamicImage> {
        let image = match source {
            ImageSource::Decoded(image) => image.clone(),
            ImageSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(MorphoError::input("empty file"));
                }
                if bytes.len() > self.config.max_input_bytes {
                    return Err(MorphoError::input(format!(
                        "file is {} bytes, limit is {}",
                        bytes.len(),
                        self.config.max_input_bytes
                    )));
                }
                ImageReader::new(Cursor::new(bytes.as_slice()))
                    .with_guessed_format()
                    .map_err(|e| MorphoError::input(format!("cannot read image: {e}")))?
                    .decode()
                    .map_err(|e| MorphoError::input(format!("cannot decode image: {e}")))?
            }
        };
        if image.width() == 0 || image.height() == 0 {
            return Err(MorphoError::input("image has no pixels"));
        }
        Ok(image)
    }

    fn save_debug(&self, id: Uuid, stage: &str, image: &DynamicImage) {
        let Some(debug_config) = &self.debug else {
            return;
        };
        let dir = debug_config.output_dir.join(id.to_string());
        if let Err(e) = save_png(&dir, stage, image) {
            warn!(%id, stage, error = %e, "failed to save debug image");
        }
    }

    /// Release the detectors
    pub fn shutdown(self) {
        self.registry.shutdown();
    }
}

fn save_png(dir: &Path, stage: &str, image: &DynamicImage) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stage}.png"));
    image
        .save(&path)
        .map_err(|e| anyhow::anyhow!("Failed to save {}: {}", path.display(), e))?;
    debug!(path = %path.display(), "saved debug image");
    Ok(())
}

fn timestamp() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

fn failure(id: Uuid, error: MorphoError, quality: QualityReport, chain: Option<&ChainOutcome>) -> ProcessingOutcome {
    ProcessingOutcome {
        id,
        processed_at: timestamp(),
        success: false,
        landmarks: LandmarkSet::empty(),
        measurements: Vec::new(),
        quality,
        confidence: 0.0,
        scale_factor: 1.0,
        calibrated: false,
        agreement: 0.0,
        strategies_used: chain.map(|c| c.strategies_used.clone()).unwrap_or_default(),
        fallback_state: FallbackState::Failed,
        warnings: Vec::<Warning>::new(),
        notes: Vec::new(),
        correction_confidence: None,
        error: Some(error),
        annotated: None,
    }
}
