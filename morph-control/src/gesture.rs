//! Gesture classification - keypoint sequences in, switch commands out

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use morph_audio::MorphCommand;
use morph_core::Signal;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Features per frame: 33 pose landmarks x 4, two hands x 21 landmarks x 3
pub const FEATURE_DIM: usize = 33 * 4 + 2 * 21 * 3;

/// Frames per classified sequence
pub const SEQUENCE_LENGTH: usize = 30;

/// One frame of keypoint features
pub type Frame = Vec<f32>;

#[derive(Error, Debug)]
pub enum GestureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid template file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Template {label} has {found} features, expected {expected}")]
    Dimension {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("No gesture templates")]
    Empty,
}

/// Ordered frames of keypoints
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeypointSequence {
    frames: Vec<Frame>,
}

impl KeypointSequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Per-feature mean across frames
    pub fn mean_frame(&self) -> Frame {
        let Some(first) = self.frames.first() else {
            return Vec::new();
        };
        let mut mean = vec![0.0f32; first.len()];
        for frame in &self.frames {
            for (m, &v) in mean.iter_mut().zip(frame) {
                *m += v;
            }
        }
        let n = self.frames.len() as f32;
        mean.iter_mut().for_each(|m| *m /= n);
        mean
    }

    /// Shape the sequence for classification
    ///
    /// Longer sequences keep their first `length` frames; shorter ones and
    /// frames of the wrong width are rejected.
    fn prepare(mut self, length: usize, feature_dim: usize) -> Option<Self> {
        if self.frames.len() < length {
            debug!(frames = self.frames.len(), "Sequence too short, skipped");
            return None;
        }
        self.frames.truncate(length);
        if let Some(bad) = self.frames.iter().find(|f| f.len() != feature_dim) {
            warn!(found = bad.len(), expected = feature_dim, "Frame has wrong feature count, skipped");
            return None;
        }
        Some(self)
    }
}

/// Messages on the keypoint queue
#[derive(Debug, Clone, PartialEq)]
pub enum KeypointMessage {
    /// Classification may begin
    Start,
    Sequence(KeypointSequence),
    /// No more sequences this cycle
    End,
}

/// Sliding window over incoming frames
///
/// Once full, emits the window every `sequence_length * latency_factor` frames.
pub struct SequenceWindow {
    frames: VecDeque<Frame>,
    length: usize,
    period: usize,
    since_emit: usize,
}

impl SequenceWindow {
    pub fn new(length: usize, latency_factor: usize) -> Self {
        let length = length.max(1);
        let period = length * latency_factor.max(1);
        Self {
            frames: VecDeque::with_capacity(length + 1),
            length,
            period,
            since_emit: period,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn push(&mut self, frame: Frame) -> Option<KeypointSequence> {
        self.frames.push_back(frame);
        if self.frames.len() > self.length {
            self.frames.pop_front();
        }
        if self.frames.len() < self.length {
            return None;
        }

        if self.since_emit >= self.period {
            self.since_emit = 1;
            Some(KeypointSequence::new(self.frames.iter().cloned().collect()))
        } else {
            self.since_emit += 1;
            None
        }
    }

    pub fn reset(&mut self) {
        self.frames.clear();
        self.since_emit = self.period;
    }
}

/// Classifier output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub confidence: f32,
}

/// Maps a keypoint sequence to a gesture index
pub trait GestureClassifier: Send {
    fn classify(&mut self, sequence: &KeypointSequence) -> Option<Prediction>;

    fn labels(&self) -> &[String];
}

#[derive(Deserialize)]
struct TemplateFile {
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(rename = "gesture")]
    gestures: Vec<TemplateEntry>,
}

#[derive(Deserialize)]
struct TemplateEntry {
    label: String,
    mean: Vec<f32>,
}

fn default_temperature() -> f32 {
    1.0
}

/// Nearest-template classifier over the mean frame
///
/// Confidence is a softmax over negative distances to every template.
#[derive(Debug, Clone)]
pub struct TemplateClassifier {
    labels: Vec<String>,
    templates: Vec<Frame>,
    temperature: f32,
}

impl TemplateClassifier {
    /// One disjoint block of active features per label
    pub fn builtin(labels: &[String]) -> Self {
        let width = FEATURE_DIM / labels.len().max(1);
        let templates = (0..labels.len())
            .map(|k| {
                let mut template = vec![0.0f32; FEATURE_DIM];
                template[k * width..(k + 1) * width].fill(1.0);
                template
            })
            .collect();
        Self {
            labels: labels.to_vec(),
            templates,
            temperature: 1.0,
        }
    }

    /// Load templates from a TOML file of `[[gesture]]` tables
    pub fn from_file(path: &Path) -> Result<Self, GestureError> {
        let content = std::fs::read_to_string(path)?;
        let classifier = Self::parse(&content)?;
        info!(path = %path.display(), gestures = classifier.labels.len(), "Gesture templates loaded");
        Ok(classifier)
    }

    fn parse(content: &str) -> Result<Self, GestureError> {
        let file: TemplateFile = toml::from_str(content)?;
        if file.gestures.is_empty() {
            return Err(GestureError::Empty);
        }
        for entry in &file.gestures {
            if entry.mean.len() != FEATURE_DIM {
                return Err(GestureError::Dimension {
                    label: entry.label.clone(),
                    expected: FEATURE_DIM,
                    found: entry.mean.len(),
                });
            }
        }
        let (labels, templates) = file.gestures.into_iter().map(|e| (e.label, e.mean)).unzip();
        Ok(Self {
            labels,
            templates,
            temperature: file.temperature.max(f32::EPSILON),
        })
    }

    pub fn template(&self, index: usize) -> Option<&[f32]> {
        self.templates.get(index).map(Vec::as_slice)
    }

    /// A sequence that classifies as gesture `index`
    pub fn sequence_for(&self, index: usize, length: usize) -> Option<KeypointSequence> {
        let template = self.template(index)?;
        Some(KeypointSequence::new(vec![template.to_vec(); length]))
    }
}

impl GestureClassifier for TemplateClassifier {
    fn classify(&mut self, sequence: &KeypointSequence) -> Option<Prediction> {
        if self.templates.is_empty() || sequence.is_empty() {
            return None;
        }
        let mean = sequence.mean_frame();

        let scores: Vec<f32> = self
            .templates
            .iter()
            .map(|t| {
                let dist = t.iter().zip(&mean).map(|(a, b)| (a - b) * (a - b)).sum::<f32>().sqrt();
                -dist / self.temperature
            })
            .collect();

        // Softmax with the max subtracted for stability
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f32 = exps.iter().sum();

        let (index, best) = exps
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        Some(Prediction {
            index,
            confidence: best / total,
        })
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Passes only confident predictions that differ from the previous one
#[derive(Debug, Clone)]
pub struct PredictionFilter {
    threshold: f32,
    last: Option<usize>,
}

impl PredictionFilter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last: None,
        }
    }

    pub fn accept(&mut self, prediction: Prediction) -> Option<usize> {
        if prediction.confidence <= self.threshold {
            return None;
        }
        if self.last == Some(prediction.index) {
            return None;
        }
        self.last = Some(prediction.index);
        Some(prediction.index)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Turns gesture indices into morph commands
#[derive(Debug, Clone)]
pub struct SwitchForwarder {
    tx: Sender<MorphCommand>,
    neutral: Option<usize>,
}

impl SwitchForwarder {
    pub fn new(tx: Sender<MorphCommand>, neutral: Option<usize>) -> Self {
        Self { tx, neutral }
    }

    /// Enqueue the command for `index`; false once the engine is gone
    pub fn forward(&self, index: usize) -> bool {
        let command = if self.neutral == Some(index) {
            MorphCommand::Noop
        } else {
            MorphCommand::Switch(index)
        };
        self.tx.send(command).is_ok()
    }
}

pub type SharedClassifier = Arc<Mutex<Box<dyn GestureClassifier>>>;

/// Classification loop run on its own worker
pub struct ClassificationWorker {
    classifier: SharedClassifier,
    filter: PredictionFilter,
    forwarder: SwitchForwarder,
    sequence_length: usize,
    poll_interval: Duration,
}

impl ClassificationWorker {
    pub fn new(classifier: SharedClassifier, filter: PredictionFilter, forwarder: SwitchForwarder) -> Self {
        Self {
            classifier,
            filter,
            forwarder,
            sequence_length: SEQUENCE_LENGTH,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_sequence_length(mut self, sequence_length: usize) -> Self {
        self.sequence_length = sequence_length;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Classify sequences until `End`, cancellation or a closed queue
    ///
    /// Sequences that arrive before `Start` are dropped. Returns the number
    /// of commands forwarded.
    pub fn run(&mut self, keypoints: &Receiver<KeypointMessage>, cancel: &Signal) -> usize {
        let mut started = false;
        let mut forwarded = 0;

        while !cancel.is_set() {
            let message = match keypoints.recv_timeout(self.poll_interval) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match message {
                KeypointMessage::Start => {
                    started = true;
                    self.filter.reset();
                    info!("Gesture classification started");
                }
                KeypointMessage::End => break,
                KeypointMessage::Sequence(_) if !started => {
                    debug!("Sequence before start, dropped");
                }
                KeypointMessage::Sequence(sequence) => {
                    let Some(sequence) = sequence.prepare(self.sequence_length, FEATURE_DIM) else {
                        continue;
                    };
                    let Some(prediction) = self.classifier.lock().classify(&sequence) else {
                        continue;
                    };
                    if let Some(index) = self.filter.accept(prediction) {
                        debug!(index, confidence = prediction.confidence, "Gesture recognized");
                        if !self.forwarder.forward(index) {
                            debug!("Morph queue closed");
                            break;
                        }
                        forwarded += 1;
                    }
                }
            }
        }

        info!(forwarded, "Gesture classification stopped");
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn labels() -> Vec<String> {
        ["left", "right", "up", "rest"].iter().map(|s| s.to_string()).collect()
    }

    fn shared(classifier: TemplateClassifier) -> SharedClassifier {
        Arc::new(Mutex::new(Box::new(classifier) as Box<dyn GestureClassifier>))
    }

    #[test]
    fn test_feature_dim() {
        assert_eq!(FEATURE_DIM, 258);
    }

    #[test]
    fn test_builtin_templates_classify_themselves() {
        let mut classifier = TemplateClassifier::builtin(&labels());
        for index in 0..4 {
            let sequence = classifier.sequence_for(index, SEQUENCE_LENGTH).unwrap();
            let prediction = classifier.classify(&sequence).unwrap();
            assert_eq!(prediction.index, index);
            assert!(prediction.confidence > 0.99);
        }
        assert!(classifier.sequence_for(9, SEQUENCE_LENGTH).is_none());
    }

    #[test]
    fn test_ambiguous_sequence_is_not_confident() {
        let mut classifier = TemplateClassifier::builtin(&labels());
        let a = classifier.template(0).unwrap().to_vec();
        let b = classifier.template(1).unwrap().to_vec();
        let mid: Frame = a.iter().zip(&b).map(|(x, y)| (x + y) / 2.0).collect();

        let prediction = classifier
            .classify(&KeypointSequence::new(vec![mid; SEQUENCE_LENGTH]))
            .unwrap();
        assert!(prediction.confidence <= 0.6);
    }

    #[test]
    fn test_template_file() {
        let mean = vec![0.5f32; FEATURE_DIM];
        let content = format!(
            "temperature = 2.0\n[[gesture]]\nlabel = \"wave\"\nmean = {:?}\n",
            mean
        );
        let classifier = TemplateClassifier::parse(&content).unwrap();
        assert_eq!(classifier.labels(), &["wave".to_string()]);
        assert_eq!(classifier.template(0).unwrap().len(), FEATURE_DIM);

        let short = "[[gesture]]\nlabel = \"wave\"\nmean = [1.0, 2.0]\n";
        assert!(matches!(
            TemplateClassifier::parse(short),
            Err(GestureError::Dimension { found: 2, .. })
        ));
    }

    #[test]
    fn test_filter_threshold_and_dedup() {
        let mut filter = PredictionFilter::new(0.6);
        let p = |index, confidence| Prediction { index, confidence };

        assert_eq!(filter.accept(p(1, 0.6)), None);
        assert_eq!(filter.accept(p(1, 0.9)), Some(1));
        assert_eq!(filter.accept(p(1, 0.95)), None);
        assert_eq!(filter.accept(p(2, 0.3)), None);
        assert_eq!(filter.accept(p(2, 0.7)), Some(2));
        assert_eq!(filter.accept(p(1, 0.7)), Some(1));

        filter.reset();
        assert_eq!(filter.accept(p(1, 0.7)), Some(1));
    }

    #[test]
    fn test_forwarder_maps_neutral() {
        let (tx, rx) = unbounded();
        let forwarder = SwitchForwarder::new(tx, Some(3));
        assert!(forwarder.forward(1));
        assert!(forwarder.forward(3));
        assert_eq!(rx.try_recv().unwrap(), MorphCommand::Switch(1));
        assert_eq!(rx.try_recv().unwrap(), MorphCommand::Noop);

        drop(rx);
        assert!(!forwarder.forward(0));
    }

    #[test]
    fn test_window_cadence() {
        let mut window = SequenceWindow::new(3, 2);
        let emitted: Vec<usize> = (0..16)
            .filter_map(|i| window.push(vec![i as f32]).map(|s| s.frames()[2][0] as usize))
            .collect();
        // First emission when the window fills, then every 6 frames
        assert_eq!(emitted, vec![2, 8, 14]);
    }

    #[test]
    fn test_window_keeps_latest_frames() {
        let mut window = SequenceWindow::new(3, 1);
        for i in 0..3 {
            window.push(vec![i as f32]);
        }
        window.push(vec![3.0]);
        window.push(vec![4.0]);
        let sequence = window.push(vec![5.0]).unwrap();
        let values: Vec<f32> = sequence.frames().iter().map(|f| f[0]).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_prepare_shapes_sequences() {
        let long = KeypointSequence::new(vec![vec![0.0; FEATURE_DIM]; 40]);
        assert_eq!(long.prepare(30, FEATURE_DIM).unwrap().len(), 30);

        let short = KeypointSequence::new(vec![vec![0.0; FEATURE_DIM]; 10]);
        assert!(short.prepare(30, FEATURE_DIM).is_none());

        let narrow = KeypointSequence::new(vec![vec![0.0; 12]; 30]);
        assert!(narrow.prepare(30, FEATURE_DIM).is_none());
    }

    #[test]
    fn test_worker_waits_for_start_and_dedups() {
        let templates = TemplateClassifier::builtin(&labels());
        let seq = |i| KeypointMessage::Sequence(templates.sequence_for(i, SEQUENCE_LENGTH).unwrap());

        let (key_tx, key_rx) = unbounded();
        let (morph_tx, morph_rx) = unbounded();
        for message in [seq(2), KeypointMessage::Start, seq(1), seq(1), seq(3), seq(0), KeypointMessage::End] {
            key_tx.send(message).unwrap();
        }

        let mut worker = ClassificationWorker::new(
            shared(templates.clone()),
            PredictionFilter::new(0.6),
            SwitchForwarder::new(morph_tx, Some(3)),
        );
        let forwarded = worker.run(&key_rx, &Signal::new());

        assert_eq!(forwarded, 3);
        let commands: Vec<_> = morph_rx.try_iter().collect();
        assert_eq!(
            commands,
            vec![MorphCommand::Switch(1), MorphCommand::Noop, MorphCommand::Switch(0)]
        );
    }

    #[test]
    fn test_worker_observes_cancellation() {
        let (_key_tx, key_rx) = unbounded::<KeypointMessage>();
        let (morph_tx, _morph_rx) = unbounded();
        let cancel = Signal::new();
        cancel.set();

        let mut worker = ClassificationWorker::new(
            shared(TemplateClassifier::builtin(&labels())),
            PredictionFilter::new(0.6),
            SwitchForwarder::new(morph_tx, None),
        )
        .with_poll_interval(Duration::from_millis(10));
        assert_eq!(worker.run(&key_rx, &cancel), 0);
    }
}
