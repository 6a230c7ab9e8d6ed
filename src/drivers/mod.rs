// src/drivers/mod.rs
pub mod actuation;
pub mod buffer;
pub mod classifier;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod servo;
pub mod source;
pub mod spectrum;
pub mod stabilizer;
pub use actuation::{
    ActuationMapper, ActuationSettings, ActuatorSpec, Endpoint, GestureRow, MacroBinding,
};
pub use buffer::{RingBuffer, SampleRing, SampleWindow};
pub use classifier::{
    build_classifier, Classification, ClassifierConfig, GestureClassifier, LinearParams,
    NetworkParams, RuleSet,
};
pub use error::PipelineError;
pub use features::{FeatureExtractor, FeatureKind, FeatureSettings, FeatureVector};
pub use pipeline::{Controller, CycleReport};
pub use servo::{ActuatorDriver, LoggingPwmBus, PwmBus, ServoDriver};
pub use source::{
    ManualSource, SampleHandoff, SampleSource, SerialSource, SimulatedSource, SimulationSettings,
};
pub use spectrum::{SpectrumAnalyzer, SpectralSummary};
pub use stabilizer::{GestureStabilizer, StabilizerSettings, ValidityGate, ValiditySettings};
