pub mod annotate;
pub mod batch;
pub mod calibration;
pub mod confidence;
pub mod config;
pub mod correction;
pub mod detection;
pub mod error;
pub mod measurement;
pub mod models;
pub mod pipeline;
pub mod uncertainty;
pub mod validation;

pub use batch::{Batch, BatchItem, BatchProgress, BatchStatus, ImageStatus};
pub use calibration::{Calibration, CalibrationAnchor};
pub use config::EngineConfig;
pub use correction::{CorrectionError, CorrectionModel};
pub use detection::{Detection, Detector, DetectorRegistry};
pub use error::{MorphoError, MorphoResult};
pub use models::{
    AnchorBox, BoundingBox, DetectorKind, FallbackState, Landmark, LandmarkName, LandmarkSet,
    MeasurementResult, Origin, ProcessingOutcome, Provenance, QualityReport, Silhouette, Warning,
};
pub use pipeline::{Engine, ImageSource, ProcessingRequest};
pub use uncertainty::BootstrapConfig;
pub use validation::ReferencePopulation;
