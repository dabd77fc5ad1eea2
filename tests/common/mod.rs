mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from morphometer for tests
pub use morphometer::{
    BootstrapConfig, Detection, DetectorKind, DetectorRegistry, Engine, EngineConfig,
    FallbackState, LandmarkName, MorphoError, Origin, ProcessingRequest, Warning,
};
