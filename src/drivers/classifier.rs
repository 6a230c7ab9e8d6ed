use log::warn;
use ndarray::linalg::general_mat_vec_mul;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::drivers::{FeatureExtractor, FeatureKind, FeatureVector, PipelineError};
use crate::types::GestureLabel;
/// Label plus an optional calibrated probability.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    pub label: GestureLabel,
    pub confidence: Option<f32>,
}
impl Classification {
    pub fn rest() -> Self {
        Self {
            label: GestureLabel::Rest,
            confidence: None,
        }
    }
}
/// One scoring strategy over the shared feature contract.
pub trait GestureClassifier: Send {
    fn name(&self) -> &'static str;
    fn input_len(&self) -> usize;
    /// Degenerate input (wrong length, empty, non-finite) yields REST.
    fn classify(&mut self, features: &FeatureVector) -> Classification;
}
fn degenerate(features: &FeatureVector, expected: usize) -> bool {
    features.is_empty() || features.len() != expected || !features.is_finite()
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ClassifierConfig {
    RuleBased(RuleSet),
    Linear(LinearParams),
    Network(NetworkParams),
}
impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::RuleBased(RuleSet::default())
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// RMS of `channel` >= threshold.
    RmsAbove { channel: usize, threshold: f32 },
    /// RMS of `channel` < threshold.
    RmsBelow { channel: usize, threshold: f32 },
    /// RMS(numerator) / max(RMS(denominator), epsilon) >= ratio.
    RatioAbove {
        numerator: usize,
        denominator: usize,
        ratio: f32,
    },
    /// RMS(numerator) / max(RMS(denominator), epsilon) < ratio.
    RatioBelow {
        numerator: usize,
        denominator: usize,
        ratio: f32,
    },
}
impl Condition {
    fn channels(&self) -> [usize; 2] {
        match *self {
            Condition::RmsAbove { channel, .. } | Condition::RmsBelow { channel, .. } => {
                [channel, channel]
            }
            Condition::RatioAbove {
                numerator,
                denominator,
                ..
            }
            | Condition::RatioBelow {
                numerator,
                denominator,
                ..
            } => [numerator, denominator],
        }
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub label: GestureLabel,
    /// Every condition must hold.
    pub all: Vec<Condition>,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Evaluated in order; the first matching rule wins.
    pub rules: Vec<Rule>,
    pub epsilon: f32,
}
impl Default for RuleSet {
    fn default() -> Self {
        let dominant = |label, main: usize, a: usize, b: usize| Rule {
            label,
            all: vec![
                Condition::RatioAbove {
                    numerator: main,
                    denominator: a,
                    ratio: 1.25,
                },
                Condition::RatioAbove {
                    numerator: main,
                    denominator: b,
                    ratio: 1.25,
                },
            ],
        };
        Self {
            rules: vec![
                dominant(GestureLabel::Rock, 0, 1, 2),
                dominant(GestureLabel::Paper, 2, 0, 1),
                dominant(GestureLabel::Good, 1, 0, 2),
            ],
            epsilon: 1e-3,
        }
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    /// Per-channel feature order the weights were trained on.
    #[serde(default)]
    pub layout: Option<Vec<FeatureKind>>,
    pub classes: Vec<GestureLabel>,
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
    /// classes x features
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    /// outputs x inputs
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
    #[serde(default)]
    pub layout: Option<Vec<FeatureKind>>,
    pub classes: Vec<GestureLabel>,
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
    pub layers: Vec<DenseParams>,
    /// Top probability below this is rejected to REST.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
}
/// Builds the configured strategy and checks it against the extractor's output contract.
pub fn build_classifier(
    config: &ClassifierConfig,
    extractor: &FeatureExtractor,
) -> Result<Box<dyn GestureClassifier>, PipelineError> {
    let classifier: Box<dyn GestureClassifier> = match config {
        ClassifierConfig::RuleBased(rules) => Box::new(RuleBasedClassifier::new(rules, extractor)?),
        ClassifierConfig::Linear(params) => {
            check_layout(params.layout.as_deref(), extractor)?;
            Box::new(LinearClassifier::new(params)?)
        }
        ClassifierConfig::Network(params) => {
            check_layout(params.layout.as_deref(), extractor)?;
            Box::new(NeuralClassifier::new(params)?)
        }
    };
    if classifier.input_len() != extractor.feature_count() {
        return Err(PipelineError::FeatureCountMismatch {
            expected: classifier.input_len(),
            actual: extractor.feature_count(),
        });
    }
    Ok(classifier)
}
fn check_layout(
    layout: Option<&[FeatureKind]>,
    extractor: &FeatureExtractor,
) -> Result<(), PipelineError> {
    match layout {
        Some(layout) if layout != extractor.layout() => Err(PipelineError::FeatureLayoutMismatch),
        _ => Ok(()),
    }
}
fn check_classes(classes: &[GestureLabel]) -> Result<(), PipelineError> {
    if classes.is_empty() {
        return Err(PipelineError::InvalidModel("no classes".into()));
    }
    if classes[0] != GestureLabel::Rest {
        warn!(
            "class 0 is {} rather than REST; argmax ties will not favor REST",
            classes[0]
        );
    }
    Ok(())
}
fn matrix(rows: &[Vec<f32>], what: &str) -> Result<Array2<f32>, PipelineError> {
    let cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.is_empty() || cols == 0 || rows.iter().any(|r| r.len() != cols) {
        return Err(PipelineError::InvalidModel(format!("{what} is empty or ragged")));
    }
    if rows.iter().flatten().any(|v| !v.is_finite()) {
        return Err(PipelineError::InvalidModel(format!("{what} has non-finite entries")));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), cols), flat)?)
}
fn vector(values: &[f32], len: usize, what: &str) -> Result<Array1<f32>, PipelineError> {
    if values.len() != len {
        return Err(PipelineError::InvalidModel(format!(
            "{what} has {} entries, expected {len}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::InvalidModel(format!("{what} has non-finite entries")));
    }
    Ok(Array1::from_vec(values.to_vec()))
}
/// Lowest index wins ties.
pub fn argmax(scores: ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (idx, &score) in scores.iter().enumerate() {
        if score > scores[best] {
            best = idx;
        }
    }
    best
}
pub fn softmax_inplace(logits: &mut Array1<f32>) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    logits.mapv_inplace(|v| (v - max).exp());
    let sum = logits.sum();
    if sum > 0.0 {
        *logits /= sum;
    }
}
struct Normalizer {
    mean: Array1<f32>,
    scale: Array1<f32>,
}
impl Normalizer {
    fn new(mean: &[f32], scale: &[f32]) -> Result<Self, PipelineError> {
        let mean = vector(mean, mean.len(), "mean")?;
        let scale = vector(scale, mean.len(), "scale")?;
        if scale.iter().any(|s| *s == 0.0) {
            return Err(PipelineError::InvalidModel("scale contains zero".into()));
        }
        Ok(Self { mean, scale })
    }
    fn len(&self) -> usize {
        self.mean.len()
    }
    /// (x - mean) / scale
    fn apply(&self, x: &[f32], out: &mut Array1<f32>) {
        for (((dst, &v), &m), &s) in out.iter_mut().zip(x).zip(&self.mean).zip(&self.scale) {
            *dst = (v - m) / s;
        }
    }
}
pub struct RuleBasedClassifier {
    rules: Vec<Rule>,
    epsilon: f32,
    rms_index: Vec<usize>, // channel -> feature index
    input_len: usize,
}
impl RuleBasedClassifier {
    pub fn new(set: &RuleSet, extractor: &FeatureExtractor) -> Result<Self, PipelineError> {
        let num_channels = extractor.num_channels();
        let rms_index = (0..num_channels)
            .map(|ch| extractor.index_of(ch, FeatureKind::Rms))
            .collect::<Option<Vec<_>>>()
            .ok_or(PipelineError::MissingFeature("RMS"))?;
        for rule in &set.rules {
            for cond in &rule.all {
                if let Some(ch) = cond.channels().into_iter().find(|c| *c >= num_channels) {
                    return Err(PipelineError::InvalidModel(format!(
                        "rule for {} references channel {ch} of {num_channels}",
                        rule.label
                    )));
                }
            }
        }
        Ok(Self {
            rules: set.rules.clone(),
            epsilon: set.epsilon.max(f32::MIN_POSITIVE),
            rms_index,
            input_len: extractor.feature_count(),
        })
    }
    fn holds(&self, cond: &Condition, f: &[f32]) -> bool {
        let rms = |ch: usize| f[self.rms_index[ch]];
        let ratio = |num: usize, den: usize| rms(num) / rms(den).max(self.epsilon);
        match *cond {
            Condition::RmsAbove { channel, threshold } => rms(channel) >= threshold,
            Condition::RmsBelow { channel, threshold } => rms(channel) < threshold,
            Condition::RatioAbove {
                numerator,
                denominator,
                ratio: r,
            } => ratio(numerator, denominator) >= r,
            Condition::RatioBelow {
                numerator,
                denominator,
                ratio: r,
            } => ratio(numerator, denominator) < r,
        }
    }
}
impl GestureClassifier for RuleBasedClassifier {
    fn name(&self) -> &'static str {
        "rule_based"
    }
    fn input_len(&self) -> usize {
        self.input_len
    }
    fn classify(&mut self, features: &FeatureVector) -> Classification {
        if degenerate(features, self.input_len) {
            return Classification::rest();
        }
        let f = features.as_slice();
        let label = self
            .rules
            .iter()
            .find(|rule| rule.all.iter().all(|c| self.holds(c, f)))
            .map(|rule| rule.label)
            .unwrap_or(GestureLabel::Rest);
        Classification {
            label,
            confidence: None,
        }
    }
}
pub struct LinearClassifier {
    classes: Vec<GestureLabel>,
    normalizer: Normalizer,
    weights: Array2<f32>,
    bias: Array1<f32>,
    normalized: Array1<f32>,
    logits: Array1<f32>,
}
impl LinearClassifier {
    pub fn new(params: &LinearParams) -> Result<Self, PipelineError> {
        check_classes(&params.classes)?;
        let normalizer = Normalizer::new(&params.mean, &params.scale)?;
        let weights = matrix(&params.weights, "weights")?;
        if weights.dim() != (params.classes.len(), normalizer.len()) {
            return Err(PipelineError::InvalidModel(format!(
                "weights are {:?}, expected ({}, {})",
                weights.dim(),
                params.classes.len(),
                normalizer.len()
            )));
        }
        let bias = vector(&params.bias, params.classes.len(), "bias")?;
        Ok(Self {
            classes: params.classes.clone(),
            normalized: Array1::zeros(normalizer.len()),
            logits: Array1::zeros(params.classes.len()),
            normalizer,
            weights,
            bias,
        })
    }
}
impl GestureClassifier for LinearClassifier {
    fn name(&self) -> &'static str {
        "linear"
    }
    fn input_len(&self) -> usize {
        self.normalizer.len()
    }
    fn classify(&mut self, features: &FeatureVector) -> Classification {
        if degenerate(features, self.input_len()) {
            return Classification::rest();
        }
        self.normalizer.apply(features.as_slice(), &mut self.normalized);
        self.logits.assign(&self.bias);
        general_mat_vec_mul(1.0, &self.weights, &self.normalized, 1.0, &mut self.logits);
        Classification {
            label: self.classes[argmax(self.logits.view())],
            confidence: None,
        }
    }
}
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
}
pub struct NeuralClassifier {
    classes: Vec<GestureLabel>,
    normalizer: Normalizer,
    layers: Vec<DenseLayer>,
    confidence_threshold: Option<f32>,
    normalized: Array1<f32>,
    activations: Vec<Array1<f32>>,
}
impl NeuralClassifier {
    pub fn new(params: &NetworkParams) -> Result<Self, PipelineError> {
        check_classes(&params.classes)?;
        let normalizer = Normalizer::new(&params.mean, &params.scale)?;
        if params.layers.is_empty() {
            return Err(PipelineError::InvalidModel("network has no layers".into()));
        }
        let mut layers = Vec::with_capacity(params.layers.len());
        let mut inputs = normalizer.len();
        for (idx, layer) in params.layers.iter().enumerate() {
            let weights = matrix(&layer.weights, "layer weights")?;
            let (outputs, layer_inputs) = weights.dim();
            if layer_inputs != inputs {
                return Err(PipelineError::InvalidModel(format!(
                    "layer {idx} takes {layer_inputs} inputs, previous stage gives {inputs}"
                )));
            }
            let bias = vector(&layer.bias, outputs, "layer bias")?;
            layers.push(DenseLayer { weights, bias });
            inputs = outputs;
        }
        if inputs != params.classes.len() {
            return Err(PipelineError::InvalidModel(format!(
                "network emits {inputs} logits for {} classes",
                params.classes.len()
            )));
        }
        let activations = layers.iter().map(|l| Array1::zeros(l.bias.len())).collect();
        Ok(Self {
            classes: params.classes.clone(),
            normalized: Array1::zeros(normalizer.len()),
            normalizer,
            layers,
            confidence_threshold: params.confidence_threshold,
            activations,
        })
    }
    /// Softmax probabilities of the last classification.
    pub fn probabilities(&self) -> Option<&Array1<f32>> {
        self.activations.last()
    }
}
impl GestureClassifier for NeuralClassifier {
    fn name(&self) -> &'static str {
        "network"
    }
    fn input_len(&self) -> usize {
        self.normalizer.len()
    }
    fn classify(&mut self, features: &FeatureVector) -> Classification {
        if degenerate(features, self.input_len()) {
            return Classification::rest();
        }
        self.normalizer.apply(features.as_slice(), &mut self.normalized);
        let last = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            let (done, rest) = self.activations.split_at_mut(idx);
            let input = if idx == 0 { &self.normalized } else { &done[idx - 1] };
            let out = &mut rest[0];
            out.assign(&layer.bias);
            general_mat_vec_mul(1.0, &layer.weights, input, 1.0, out);
            if idx < last {
                out.mapv_inplace(|v| v.max(0.0));
            }
        }
        let probs = &mut self.activations[last];
        softmax_inplace(probs);
        let best = argmax(probs.view());
        let confidence = probs[best];
        let label = match self.confidence_threshold {
            Some(threshold) if confidence < threshold => GestureLabel::Rest,
            _ => self.classes[best],
        };
        Classification {
            label,
            confidence: Some(confidence),
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FeatureSettings;
    fn rms_only(num_channels: usize) -> FeatureExtractor {
        FeatureExtractor::new(
            FeatureSettings {
                layout: vec![FeatureKind::Rms],
                ..FeatureSettings::default()
            },
            num_channels,
        )
    }
    fn rules() -> RuleSet {
        RuleSet {
            rules: vec![
                Rule {
                    label: GestureLabel::Rock,
                    all: vec![Condition::RmsAbove {
                        channel: 0,
                        threshold: 100.0,
                    }],
                },
                Rule {
                    label: GestureLabel::Paper,
                    all: vec![Condition::RatioAbove {
                        numerator: 1,
                        denominator: 0,
                        ratio: 2.0,
                    }],
                },
            ],
            epsilon: 1e-3,
        }
    }
    fn fv(values: &[f32]) -> FeatureVector {
        FeatureVector::from_values(values.to_vec())
    }
    #[test]
    fn rules_respect_threshold_boundaries() {
        let mut clf = RuleBasedClassifier::new(&rules(), &rms_only(2)).unwrap();
        assert_eq!(clf.classify(&fv(&[100.0, 0.0])).label, GestureLabel::Rock);
        assert_eq!(clf.classify(&fv(&[99.99, 0.0])).label, GestureLabel::Rest);
        assert_eq!(clf.classify(&fv(&[100.01, 0.0])).label, GestureLabel::Rock);
        assert_eq!(clf.classify(&fv(&[50.0, 100.0])).label, GestureLabel::Paper);
        assert_eq!(clf.classify(&fv(&[50.0, 99.9])).label, GestureLabel::Rest);
        assert_eq!(clf.classify(&fv(&[50.0, 100.1])).label, GestureLabel::Paper);
    }
    #[test]
    fn rules_follow_priority_order() {
        let mut clf = RuleBasedClassifier::new(&rules(), &rms_only(2)).unwrap();
        // Both rules match; the first listed wins.
        assert_eq!(clf.classify(&fv(&[150.0, 400.0])).label, GestureLabel::Rock);
    }
    #[test]
    fn ratio_guards_near_zero_denominator() {
        let mut clf = RuleBasedClassifier::new(&rules(), &rms_only(2)).unwrap();
        assert_eq!(clf.classify(&fv(&[0.0, 1.0])).label, GestureLabel::Paper);
        assert_eq!(clf.classify(&fv(&[0.0, 0.0])).label, GestureLabel::Rest);
    }
    #[test]
    fn rules_need_rms_in_layout() {
        let fx = FeatureExtractor::new(
            FeatureSettings {
                layout: vec![FeatureKind::Mav],
                ..FeatureSettings::default()
            },
            2,
        );
        assert!(matches!(
            RuleBasedClassifier::new(&rules(), &fx),
            Err(PipelineError::MissingFeature("RMS"))
        ));
    }
    fn linear() -> LinearParams {
        LinearParams {
            layout: None,
            classes: vec![GestureLabel::Rest, GestureLabel::Rock, GestureLabel::Paper],
            mean: vec![10.0, 10.0],
            scale: vec![2.0, 2.0],
            weights: vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
            bias: vec![0.5, 0.0, 0.0],
        }
    }
    #[test]
    fn linear_picks_argmax_of_normalized_logits() {
        let mut clf = LinearClassifier::new(&linear()).unwrap();
        // z = (2, 0) -> logits (0.5, 2, 0)
        assert_eq!(clf.classify(&fv(&[14.0, 10.0])).label, GestureLabel::Rock);
        // z = (0, 3) -> logits (0.5, 0, 3)
        assert_eq!(clf.classify(&fv(&[10.0, 16.0])).label, GestureLabel::Paper);
        // z = (0, 0) -> bias keeps REST on top
        assert_eq!(clf.classify(&fv(&[10.0, 10.0])).label, GestureLabel::Rest);
    }
    #[test]
    fn ties_go_to_the_lowest_index() {
        let mut params = linear();
        params.bias = vec![0.0; 3];
        params.weights = vec![vec![0.0, 0.0]; 3];
        let mut clf = LinearClassifier::new(&params).unwrap();
        assert_eq!(clf.classify(&fv(&[42.0, -7.0])).label, GestureLabel::Rest);
    }
    #[test]
    fn degenerate_inputs_fall_back_to_rest() {
        let mut clf = LinearClassifier::new(&linear()).unwrap();
        assert_eq!(clf.classify(&fv(&[])).label, GestureLabel::Rest);
        assert_eq!(clf.classify(&fv(&[14.0])).label, GestureLabel::Rest);
        assert_eq!(clf.classify(&fv(&[f32::NAN, 30.0])).label, GestureLabel::Rest);
    }
    #[test]
    fn zero_scale_is_rejected() {
        let mut params = linear();
        params.scale[1] = 0.0;
        assert!(matches!(
            LinearClassifier::new(&params),
            Err(PipelineError::InvalidModel(_))
        ));
    }
    fn network(threshold: Option<f32>) -> NetworkParams {
        NetworkParams {
            layout: None,
            classes: vec![GestureLabel::Rest, GestureLabel::Rock],
            mean: vec![0.0, 0.0],
            scale: vec![1.0, 1.0],
            layers: vec![
                DenseParams {
                    weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                    bias: vec![0.0, 0.0],
                },
                DenseParams {
                    weights: vec![vec![0.0, 1.0], vec![1.0, 0.0]],
                    bias: vec![0.0, 0.0],
                },
            ],
            confidence_threshold: threshold,
        }
    }
    #[test]
    fn network_applies_relu_and_softmax() {
        let mut clf = NeuralClassifier::new(&network(None)).unwrap();
        // hidden = relu(4, -4) = (4, 0); logits = (0, 4)
        let out = clf.classify(&fv(&[4.0, -4.0]));
        assert_eq!(out.label, GestureLabel::Rock);
        let p = out.confidence.unwrap();
        assert!((p - 1.0 / (1.0 + (-4.0f32).exp())).abs() < 1e-5);
        let probs = clf.probabilities().unwrap();
        assert!((probs.sum() - 1.0).abs() < 1e-5);
    }
    #[test]
    fn network_rejects_low_confidence_to_rest() {
        let mut clf = NeuralClassifier::new(&network(Some(0.9))).unwrap();
        // logits (0, 0.5) -> p(Rock) ~ 0.62
        let out = clf.classify(&fv(&[0.5, 0.0]));
        assert_eq!(out.label, GestureLabel::Rest);
        assert!(out.confidence.unwrap() < 0.9);
        let out = clf.classify(&fv(&[5.0, 0.0]));
        assert_eq!(out.label, GestureLabel::Rock);
    }
    #[test]
    fn network_shapes_are_checked() {
        let mut params = network(None);
        params.layers[1].weights = vec![vec![1.0, 0.0, 0.0]; 2];
        assert!(matches!(
            NeuralClassifier::new(&params),
            Err(PipelineError::InvalidModel(_))
        ));
    }
    #[test]
    fn build_checks_feature_contract() {
        let fx = FeatureExtractor::new(FeatureSettings::default(), 3);
        let err = build_classifier(&ClassifierConfig::Linear(linear()), &fx).err();
        assert!(matches!(
            err,
            Some(PipelineError::FeatureCountMismatch {
                expected: 2,
                actual: 18
            })
        ));
        let mut params = linear();
        params.layout = Some(vec![FeatureKind::Rms]);
        let err = build_classifier(&ClassifierConfig::Linear(params), &fx).err();
        assert!(matches!(err, Some(PipelineError::FeatureLayoutMismatch)));
        assert!(build_classifier(&ClassifierConfig::default(), &fx).is_ok());
    }
}
