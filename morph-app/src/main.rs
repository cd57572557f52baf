//! Morph - gesture-driven multi-track audio morphing
//!
//! Record a phrase, render timbre variants of it, then switch between the
//! variants with gestures while they all play in sync.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::info;
use tracing_subscriber::EnvFilter;

use morph_audio::{CpalCapture, CpalOutput};
use morph_control::{
    FilterBankResynthesizer, KeypointMessage, LifecycleController, SequenceWindow, TemplateClassifier,
};
use morph_core::{Coordinator, Queue, Signal};
use morph_input::{InputAction, InputHandler, UserCommand};
use morph_library::Config;

/// Rate of synthetic keypoint frames, matching a webcam
const FPS: u64 = 30;

/// No gesture held
const NO_GESTURE: usize = usize::MAX;

const INPUT_WORKER: &str = "keyboard_input";
const FEEDER_WORKER: &str = "keypoint_feeder";

#[derive(Parser)]
#[command(name = "morph")]
#[command(about = "Gesture-driven multi-track audio morphing", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the recording and its variants
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Passes per track, 0 loops forever
    #[arg(short, long)]
    loops: Option<u32>,

    /// Write the default config and exit
    #[arg(long)]
    write_default_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if cli.write_default_config {
        let path = cli.config.clone().unwrap_or_else(Config::config_path);
        Config::with_defaults()
            .save_to(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let config = load_config(&cli)?;

    enable_raw_mode().context("enabling raw terminal mode")?;
    let result = run(config);
    disable_raw_mode()?;

    result
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    if let Some(dir) = &cli.audio_dir {
        config.files.audio_dir = dir.clone();
    }
    if let Some(loops) = cli.loops {
        config.audio.loops = loops;
    }
    config.validate()?;
    Ok(config)
}

fn run(config: Config) -> anyhow::Result<()> {
    let coordinator = Arc::new(Coordinator::new());

    let classifier = match &config.files.model_path {
        Some(path) => TemplateClassifier::from_file(path)
            .with_context(|| format!("loading gesture templates from {}", path.display()))?,
        None => TemplateClassifier::builtin(&config.gestures.actions),
    };
    let resynth = FilterBankResynthesizer::new(config.variants.clone()).context("building variants")?;

    let mut controller = LifecycleController::new(
        coordinator.clone(),
        &config,
        Box::new(CpalCapture::new()),
        Arc::new(CpalOutput),
        Box::new(classifier.clone()),
        Arc::new(resynth),
    )?;

    let shutdown = coordinator.create_signal("shutdown");
    let gesture = Arc::new(AtomicUsize::new(NO_GESTURE));

    start_keyboard(&coordinator, controller.commands(), gesture.clone(), shutdown.clone(), &config)?;
    start_feeder(&coordinator, controller.keypoints(), gesture, classifier, &config)?;

    info!("{}", InputHandler::help());
    controller.run(&shutdown);

    coordinator.stop_all();
    info!("Bye");
    Ok(())
}

/// Keys to user commands; digits hold a gesture, quit raises `shutdown`
fn start_keyboard(
    coordinator: &Coordinator,
    commands: Queue<UserCommand>,
    gesture: Arc<AtomicUsize>,
    shutdown: Signal,
    config: &Config,
) -> anyhow::Result<()> {
    let handler = InputHandler::new().with_gesture_count(config.gestures.actions.len());

    coordinator.start_worker(INPUT_WORKER, move |cancel| {
        while !cancel.is_set() && !shutdown.is_set() {
            if !event::poll(Duration::from_millis(50))? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match handler.handle_key(key) {
                Some(InputAction::Command(command)) => commands.send(command),
                Some(InputAction::Gesture(index)) => gesture.store(index, Ordering::Relaxed),
                Some(InputAction::Quit) => {
                    info!("Quit requested");
                    shutdown.set();
                }
                None => {}
            }
        }
        Ok(())
    })?;
    Ok(())
}

/// Stand-in camera: streams the held gesture's template at webcam rate
fn start_feeder(
    coordinator: &Coordinator,
    keypoints: Queue<KeypointMessage>,
    gesture: Arc<AtomicUsize>,
    templates: TemplateClassifier,
    config: &Config,
) -> anyhow::Result<()> {
    let mut window = SequenceWindow::new(config.gestures.sequence_length, config.gestures.latency_factor);
    let frame_interval = Duration::from_millis(1000 / FPS);

    coordinator.start_worker(FEEDER_WORKER, move |cancel| {
        let mut held = NO_GESTURE;
        while !cancel.wait_timeout(frame_interval) {
            let current = gesture.load(Ordering::Relaxed);
            if current != held {
                window.reset();
                held = current;
            }
            let Some(frame) = templates.template(held) else {
                continue;
            };
            if let Some(sequence) = window.push(frame.to_vec()) {
                keypoints.send(KeypointMessage::Sequence(sequence));
            }
        }
        Ok(())
    })?;
    Ok(())
}
