use thiserror::Error;

/// Error taxonomy for the wizard. Everything surfaced to the frontend goes
/// through `user_message`, so a command never leaks a half-formed debug dump.
#[derive(Debug, Error)]
pub enum WizardError {
    #[error("Gemini API key not set. Add it in settings or export GEMINI_API_KEY.")]
    Configuration,

    #[error("could not read image: {0}")]
    Encoding(String),

    #[error("image analysis failed: {0}")]
    Analysis(String),

    #[error("video generation failed: {0}")]
    Generation(String),
}

impl WizardError {
    /// Human-readable message for the error banner. Falls back to a generic
    /// hint when the underlying cause carries no useful text.
    pub fn user_message(&self) -> String {
        let msg = self.to_string();
        match self {
            WizardError::Configuration => msg,
            WizardError::Encoding(cause) if cause.trim().is_empty() => {
                "Could not read the selected image. Please pick another file.".to_string()
            }
            WizardError::Analysis(cause) if cause.trim().is_empty() => {
                "Failed to analyze image. Please check your API key and try again.".to_string()
            }
            WizardError::Generation(cause) if cause.trim().is_empty() => {
                "Video generation failed. Please try again.".to_string()
            }
            _ => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_causes_fall_back_to_generic_text() {
        let e = WizardError::Analysis(String::new());
        assert!(e.user_message().contains("API key"));
        let e = WizardError::Generation("  ".to_string());
        assert!(e.user_message().contains("try again"));
    }

    #[test]
    fn real_causes_are_preserved() {
        let e = WizardError::Generation("HTTP 429".to_string());
        assert!(e.user_message().contains("HTTP 429"));
    }
}
