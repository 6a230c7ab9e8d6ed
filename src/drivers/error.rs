use thiserror::Error;
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("unsupported channel count {0} (1..={max})", max = crate::types::MAX_CHANNELS)]
    UnsupportedChannelCount(usize),
    #[error("sample value {value} on channel {channel} exceeds ADC range 0..={max}")]
    SampleOutOfRange { channel: usize, value: u16, max: u16 },
    #[error("invalid sampling configuration: {0}")]
    InvalidSampling(String),
    #[error("invalid window: length {window}, step {step}")]
    InvalidWindow { window: usize, step: usize },
    #[error("feature count mismatch: classifier expects {expected}, extractor produces {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },
    #[error("feature layout of the classifier does not match the extractor layout")]
    FeatureLayoutMismatch,
    #[error("feature layout has no {0} entry required by the rule set")]
    MissingFeature(&'static str),
    #[error("invalid classifier parameters: {0}")]
    InvalidModel(String),
    #[error("invalid actuator configuration: {0}")]
    InvalidActuator(String),
    #[error("invalid stabilizer configuration: {0}")]
    InvalidStabilizer(String),
    #[error("actuator {index} command failed: {reason}")]
    Actuator { index: usize, reason: String },
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration parse error: {0}")]
    Config(#[from] serde_json::Error),
}
impl From<ndarray::ShapeError> for PipelineError {
    fn from(value: ndarray::ShapeError) -> Self {
        PipelineError::InvalidModel(value.to_string())
    }
}
