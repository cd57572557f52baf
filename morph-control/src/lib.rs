//! Control layer for Morph
//!
//! - Controller: record, process, play and clear cycle over named workers
//! - Gesture: keypoint windows, classification and switch forwarding
//! - Resynth: timbre variants rendered from the recording

mod controller;
mod gesture;
mod resynth;

pub use controller::{
    ControllerError, ControllerPhase, LifecycleController, Outcome, CLASSIFIER_WORKER, KEYPOINTS_QUEUE,
    MORPH_QUEUE, MORPH_WORKER, RESYNTH_WORKER, USER_COMMANDS,
};
pub use gesture::{
    ClassificationWorker, Frame, GestureClassifier, GestureError, KeypointMessage, KeypointSequence, Prediction,
    PredictionFilter, SequenceWindow, SharedClassifier, SwitchForwarder, TemplateClassifier, FEATURE_DIM,
    SEQUENCE_LENGTH,
};
pub use resynth::{FilterBankResynthesizer, ResynthError, Resynthesizer};
