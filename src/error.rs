use serde::Serialize;
use thiserror::Error;

/// Remediation text for images where no anatomical anchor could be found
pub const DETECTION_REMEDIATION: &str = "Please try:\n\
    - ensure the animal is clearly visible and well lit\n\
    - photograph from the side (profile view)\n\
    - avoid shadows and occluding objects, keep good contrast with the background\n\
    - make sure the animal is standing upright\n\
    - use a higher resolution image or move closer";

pub type MorphoResult<T> = Result<T, MorphoError>;

/// Terminal failures of the engine
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MorphoError {
    /// Undecodable or oversized image
    #[error("invalid input image: {reason}. {remediation}")]
    Input { reason: String, remediation: String },

    /// No strategy found any anatomical anchor
    #[error("could not detect anatomical features in the image. {remediation}")]
    DetectionFailure { remediation: String },

    /// Invalid engine configuration or request parameters
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl MorphoError {
    pub fn input(reason: impl Into<String>) -> Self {
        Self::Input {
            reason: reason.into(),
            remediation: "Please upload a valid JPEG or PNG photo under the size limit.".to_string(),
        }
    }

    pub fn detection_failure() -> Self {
        Self::DetectionFailure {
            remediation: DETECTION_REMEDIATION.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Human-readable guidance for the failure
    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::Input { remediation, .. } | Self::DetectionFailure { remediation } => {
                Some(remediation)
            }
            Self::Config { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MorphoError::input("not an image");
        assert!(format!("{err}").contains("not an image"));

        let err = MorphoError::detection_failure();
        assert!(format!("{err}").contains("profile view"));

        let err = MorphoError::config("bad value");
        assert!(format!("{err}").contains("bad value"));
        assert!(err.remediation().is_none());
    }

    #[test]
    fn test_detection_failure_mentions_every_remedy() {
        let text = MorphoError::detection_failure()
            .remediation()
            .unwrap_or_default()
            .to_lowercase();
        for remedy in ["lit", "side", "shadows", "standing", "resolution"] {
            assert!(text.contains(remedy), "missing '{remedy}'");
        }
    }
}
