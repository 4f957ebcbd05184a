//! Units of work and voice settings

/// One chunk of text to turn into one audio artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    /// Fixed sequence number; artifacts are named after it
    pub seq: u32,
    pub text: String,
    /// Disabled units are skipped without reaching the executor
    pub enabled: bool,
}

impl UnitOfWork {
    pub fn new(seq: u32, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Voice and optional style directive applied to every unit of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceConfig {
    pub voice: String,
    /// Free-form directive such as "Say excitedly:"
    pub style: Option<String>,
}

impl VoiceConfig {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            style: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Text sent upstream: the style directive, if any, then the unit text.
    pub fn payload(&self, text: &str) -> String {
        match self.style.as_deref().map(str::trim) {
            Some(style) if !style.is_empty() => format!("{style} {text}"),
            _ => text.to_string(),
        }
    }
}
