//! Lifecycle controller - drives the record, process, play, clear cycle

use crate::gesture::{
    ClassificationWorker, GestureClassifier, KeypointMessage, PredictionFilter, SharedClassifier,
    SwitchForwarder,
};
use crate::resynth::Resynthesizer;
use crossbeam_channel::{bounded, Sender};
use morph_audio::{
    CaptureBackend, MorphCommand, MorphEngine, MorphEvent, OutputBackend, RecorderError,
    RecordingSession, SharedBank, TrackBank, TrackRecorder,
};
use morph_core::{AudioBuffer, Coordinator, CoordinatorError, Queue, Signal};
use morph_input::UserCommand;
use morph_library::{AudioStore, Config, LoadError, StoreError, TrackLoader};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Worker running the morph engine
pub const MORPH_WORKER: &str = "audio_morphing";
/// Worker running gesture classification
pub const CLASSIFIER_WORKER: &str = "pose_classification";
/// Worker rendering timbre variants
pub const RESYNTH_WORKER: &str = "resynthesis";

pub const USER_COMMANDS: &str = "user_commands";
pub const MORPH_QUEUE: &str = "morphing_data";
pub const KEYPOINTS_QUEUE: &str = "keypoints_data";

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("Morph engine exited before playback started")]
    EngineNotStarted,
}

/// Where the controller is in the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerPhase {
    #[default]
    Idle,
    Recording,
    Playing,
    Paused,
    /// Processing failed; `clear` or a new recording recovers
    Aborted,
}

/// Whether a command changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored,
}

/// Settings the controller reads from the config
#[derive(Debug, Clone)]
struct Settings {
    loops: u32,
    poll_interval: Duration,
    preview_recording: bool,
    sequence_length: usize,
    threshold: f32,
    neutral: Option<usize>,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            loops: config.audio.loops,
            poll_interval: config.audio.poll_interval(),
            preview_recording: config.audio.preview_recording,
            sequence_length: config.gestures.sequence_length,
            threshold: config.gestures.threshold,
            neutral: config.gestures.neutral,
        }
    }
}

/// Owns the recorder, the bank and the worker lifecycle
pub struct LifecycleController {
    coordinator: Arc<Coordinator>,
    settings: Settings,
    recorder: TrackRecorder,
    store: AudioStore,
    loader: TrackLoader,
    resynth: Arc<dyn Resynthesizer>,
    classifier: SharedClassifier,
    output: Arc<dyn OutputBackend>,
    commands: Queue<UserCommand>,
    morph_queue: Queue<MorphCommand>,
    keypoints: Queue<KeypointMessage>,
    morph_events: Option<Sender<MorphEvent>>,
    phase: ControllerPhase,
    session: Option<RecordingSession>,
    bank: Option<SharedBank>,
    processed: bool,
}

impl LifecycleController {
    pub fn new(
        coordinator: Arc<Coordinator>,
        config: &Config,
        capture: Box<dyn CaptureBackend>,
        output: Arc<dyn OutputBackend>,
        classifier: Box<dyn GestureClassifier>,
        resynth: Arc<dyn Resynthesizer>,
    ) -> Result<Self, ControllerError> {
        let commands = coordinator.create_queue(USER_COMMANDS)?;
        let morph_queue = coordinator.create_queue(MORPH_QUEUE)?;
        let keypoints = coordinator.create_queue(KEYPOINTS_QUEUE)?;

        Ok(Self {
            recorder: TrackRecorder::new(capture, config.audio.sample_rate, config.audio.max_duration()),
            store: AudioStore::new(&config.files.audio_dir),
            loader: TrackLoader::with_sample_rate(config.audio.sample_rate),
            settings: Settings::from_config(config),
            coordinator,
            resynth,
            classifier: Arc::new(Mutex::new(classifier)),
            output,
            commands,
            morph_queue,
            keypoints,
            morph_events: None,
            phase: ControllerPhase::Idle,
            session: None,
            bank: None,
            processed: false,
        })
    }

    /// Observe every morph engine transition
    pub fn with_morph_events(mut self, events: Sender<MorphEvent>) -> Self {
        self.morph_events = Some(events);
        self
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Queue the front end pushes user commands onto
    pub fn commands(&self) -> Queue<UserCommand> {
        self.commands.clone()
    }

    /// Queue the keypoint producer pushes onto
    pub fn keypoints(&self) -> Queue<KeypointMessage> {
        self.keypoints.clone()
    }

    pub fn bank_len(&self) -> usize {
        self.bank.as_ref().map(|b| b.lock().len()).unwrap_or(0)
    }

    /// Dispatch one user command
    pub fn handle(&mut self, command: UserCommand) -> Result<Outcome, ControllerError> {
        info!(command = %command, phase = ?self.phase, "User command");
        match (command, self.phase) {
            (UserCommand::StartRecording, ControllerPhase::Recording) => Ok(self.ignore(command)),
            (UserCommand::StartRecording, _) => {
                self.start_recording()?;
                Ok(Outcome::Applied)
            }
            (UserCommand::StopRecording, ControllerPhase::Recording) => {
                self.stop_recording_and_process()?;
                Ok(Outcome::Applied)
            }
            (UserCommand::Play, ControllerPhase::Paused) => {
                self.morph_queue.send(MorphCommand::Resume);
                self.phase = ControllerPhase::Playing;
                Ok(Outcome::Applied)
            }
            (UserCommand::Pause, ControllerPhase::Playing) => {
                self.morph_queue.send(MorphCommand::Pause);
                self.phase = ControllerPhase::Paused;
                Ok(Outcome::Applied)
            }
            (UserCommand::Clear, ControllerPhase::Idle) => Ok(self.ignore(command)),
            (UserCommand::Clear, _) => {
                self.clear();
                Ok(Outcome::Applied)
            }
            _ => Ok(self.ignore(command)),
        }
    }

    fn ignore(&self, command: UserCommand) -> Outcome {
        warn!(command = %command, phase = ?self.phase, "Command not valid now, ignored");
        Outcome::Ignored
    }

    /// Begin a new recording, clearing the previous cycle first
    pub fn start_recording(&mut self) -> Result<(), ControllerError> {
        if self.processed || self.phase != ControllerPhase::Idle {
            self.clear();
        }
        let session = self.recorder.start()?;
        self.session = Some(session);
        self.phase = ControllerPhase::Recording;
        Ok(())
    }

    /// Finish the recording and bring up the morphing pipeline
    ///
    /// Any failure leaves the controller `Aborted` with no workers running.
    pub fn stop_recording_and_process(&mut self) -> Result<(), ControllerError> {
        let Some(session) = self.session.take() else {
            return Err(RecorderError::NotRecording.into());
        };
        self.processed = true;

        let result = self
            .recorder
            .stop(session)
            .map_err(ControllerError::from)
            .and_then(|audio| self.process(audio));

        match result {
            Ok(()) => {
                self.phase = ControllerPhase::Playing;
                Ok(())
            }
            Err(e) => {
                error!("Processing failed: {}", e);
                self.teardown();
                self.phase = ControllerPhase::Aborted;
                Err(e)
            }
        }
    }

    fn process(&mut self, audio: AudioBuffer) -> Result<(), ControllerError> {
        self.store.purge()?;
        self.store.save_recording(&audio)?;

        // Play the take back while the variants render
        let preview = if self.settings.preview_recording {
            self.open_preview(&audio)
        } else {
            None
        };

        let resynth = self.resynth.clone();
        let store = self.store.clone();
        self.coordinator.start_worker(RESYNTH_WORKER, move |_cancel| {
            for (index, variant) in resynth.render(&audio)?.iter().enumerate() {
                store.save_variant(index, variant)?;
            }
            Ok(())
        })?;
        let rendered = self.coordinator.join_worker(RESYNTH_WORKER);
        drop(preview);
        rendered?;

        let bank = Arc::new(Mutex::new(self.loader.load_all(self.store.dir())?));
        self.bank = Some(bank.clone());

        self.drain_queues();
        self.start_classification()?;
        self.start_morphing(bank)?;
        self.keypoints.send(KeypointMessage::Start);

        info!(tracks = self.bank_len(), "Morphing pipeline running");
        Ok(())
    }

    fn open_preview(&self, audio: &AudioBuffer) -> Option<morph_audio::OutputStream> {
        let mut bank = TrackBank::new();
        if let Err(e) = bank.insert("preview", audio) {
            warn!("Preview skipped: {}", e);
            return None;
        }
        bank.play_all(1);
        match self.output.open(Arc::new(Mutex::new(bank))) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Preview skipped: {}", e);
                None
            }
        }
    }

    fn start_classification(&self) -> Result<(), ControllerError> {
        let mut worker = ClassificationWorker::new(
            self.classifier.clone(),
            PredictionFilter::new(self.settings.threshold),
            SwitchForwarder::new(self.morph_queue.sender(), self.settings.neutral),
        )
        .with_sequence_length(self.settings.sequence_length)
        .with_poll_interval(self.settings.poll_interval);
        let keypoints = self.keypoints.receiver();

        self.coordinator.start_worker(CLASSIFIER_WORKER, move |cancel| {
            worker.run(&keypoints, &cancel);
            Ok(())
        })?;
        Ok(())
    }

    /// Start the morph worker and wait until its output device is open
    fn start_morphing(&self, bank: SharedBank) -> Result<(), ControllerError> {
        let (ready_tx, ready_rx) = bounded(1);
        let mut engine = MorphEngine::new(bank, self.settings.loops)
            .with_poll_interval(self.settings.poll_interval)
            .with_ready(ready_tx);
        if let Some(events) = &self.morph_events {
            engine = engine.with_events(events.clone());
        }
        let output = self.output.clone();
        let commands = self.morph_queue.receiver();

        self.coordinator.start_worker(MORPH_WORKER, move |cancel| {
            engine.run(output.as_ref(), &commands, &cancel)?;
            Ok(())
        })?;

        if ready_rx.recv().is_err() {
            self.coordinator.join_worker(MORPH_WORKER)?;
            return Err(ControllerError::EngineNotStarted);
        }
        Ok(())
    }

    /// Tear down the cycle and return to `Idle`
    pub fn clear(&mut self) {
        self.teardown();
        self.recorder.reset();
        self.session = None;
        self.processed = false;
        self.phase = ControllerPhase::Idle;
        info!("Cleared");
    }

    /// Stop the workers, release the bank and drop stale messages
    fn teardown(&mut self) {
        if self.coordinator.is_worker_active(MORPH_WORKER) {
            self.morph_queue.send(MorphCommand::Stop);
        }
        if let Err(e) = self.coordinator.join_worker(MORPH_WORKER) {
            error!("Morph worker ended with an error: {}", e);
        }

        if self.coordinator.is_worker_active(CLASSIFIER_WORKER) {
            self.keypoints.send(KeypointMessage::End);
        }
        if let Err(e) = self.coordinator.stop_worker(CLASSIFIER_WORKER) {
            error!("Classification worker ended with an error: {}", e);
        }

        if let Some(bank) = self.bank.take() {
            bank.lock().clear();
        }
        self.drain_queues();
    }

    fn drain_queues(&self) {
        let stale = self.morph_queue.drain() + self.keypoints.drain();
        if stale > 0 {
            info!(stale, "Dropped stale queue messages");
        }
    }

    /// Serve user commands until `cancel` is raised, then shut down
    pub fn run(&mut self, cancel: &Signal) {
        info!("Controller running");
        while !cancel.is_set() {
            let Some(command) = self.commands.recv_timeout(self.settings.poll_interval) else {
                continue;
            };
            if let Err(e) = self.handle(command) {
                error!(command = %command, "Command failed: {}", e);
            }
        }
        self.shutdown();
    }

    /// Stop every worker and release audio resources
    pub fn shutdown(&mut self) {
        info!("Shutting down");
        self.clear();
        self.coordinator.stop_all();
    }
}
