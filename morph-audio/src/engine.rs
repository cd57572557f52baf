//! Morph engine - consumes switch commands and moves the audible track

use crate::bank::{SharedBank, TrackId};
use crate::device::{AudioError, OutputBackend};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use morph_core::Signal;
use std::ops::ControlFlow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long the engine waits on its queue before rechecking cancellation
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Commands consumed by the morph engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphCommand {
    /// Make track `k` the audible one
    Switch(usize),
    Pause,
    Resume,
    /// Neutral gesture, no change
    Noop,
    /// Terminate the morphing loop
    Stop,
}

impl MorphCommand {
    /// Decode the integer form used by gesture producers
    ///
    /// Non-negative values select a track, -1 stops, anything else is a no-op.
    pub fn from_wire(value: i64) -> Self {
        match value {
            v if v >= 0 => MorphCommand::Switch(v as usize),
            -1 => MorphCommand::Stop,
            _ => MorphCommand::Noop,
        }
    }
}

/// Lifecycle of one morphing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePhase {
    #[default]
    Idle,
    Playing,
    Morphing,
    Stopped,
}

/// Observable engine transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MorphEvent {
    Started { audible: Option<TrackId> },
    Switched { from: Option<TrackId>, to: TrackId },
    Ignored { index: usize },
    Paused,
    Resumed,
    Stopped,
}

#[derive(Error, Debug)]
pub enum MorphError {
    #[error("Cannot start morphing from {0:?}")]
    InvalidPhase(EnginePhase),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Applies switch commands to a shared track bank
pub struct MorphEngine {
    bank: SharedBank,
    loop_count: u32,
    phase: EnginePhase,
    audible: Option<TrackId>,
    poll_interval: Duration,
    events: Option<Sender<MorphEvent>>,
    ready: Option<Sender<()>>,
}

impl MorphEngine {
    pub fn new(bank: SharedBank, loop_count: u32) -> Self {
        Self {
            bank,
            loop_count,
            phase: EnginePhase::Idle,
            audible: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            events: None,
            ready: None,
        }
    }

    /// Report transitions on `events`
    pub fn with_events(mut self, events: Sender<MorphEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Send one `()` on `ready` once the output is open and morphing started
    ///
    /// The sender is dropped unsent if `run` fails before that point.
    pub fn with_ready(mut self, ready: Sender<()>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn audible(&self) -> Option<TrackId> {
        self.audible
    }

    fn emit(&self, event: MorphEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Start every track with only the first one audible
    pub fn start_morphing(&mut self) -> Result<(), MorphError> {
        if self.phase != EnginePhase::Idle {
            return Err(MorphError::InvalidPhase(self.phase));
        }

        let mut bank = self.bank.lock();
        bank.play_all(self.loop_count);
        self.audible = if bank.is_empty() { None } else { Some(0) };
        drop(bank);

        self.phase = EnginePhase::Playing;
        info!(audible = ?self.audible, loops = self.loop_count, "Morphing started");
        self.emit(MorphEvent::Started {
            audible: self.audible,
        });
        Ok(())
    }

    /// Apply one command
    ///
    /// Returns `Break` once the engine has stopped.
    pub fn handle_command(&mut self, command: MorphCommand) -> ControlFlow<()> {
        if self.phase == EnginePhase::Stopped {
            return ControlFlow::Break(());
        }

        match command {
            MorphCommand::Switch(index) => self.switch_to(index),
            MorphCommand::Pause => {
                self.bank.lock().pause();
                self.emit(MorphEvent::Paused);
            }
            MorphCommand::Resume => {
                self.bank.lock().resume();
                self.emit(MorphEvent::Resumed);
            }
            MorphCommand::Noop => {}
            MorphCommand::Stop => {
                self.stop();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn switch_to(&mut self, index: usize) {
        if self.phase == EnginePhase::Idle {
            debug!(index, "Switch before morphing started");
            return;
        }
        if self.audible == Some(index) {
            return;
        }

        let mut bank = self.bank.lock();
        if index >= bank.len() {
            drop(bank);
            warn!(index, "Switch to a track that does not exist");
            self.emit(MorphEvent::Ignored { index });
            return;
        }

        if let Some(current) = self.audible {
            bank.set_gain(current, 0.0);
        }
        bank.set_gain(index, 1.0);
        drop(bank);

        let from = self.audible.replace(index);
        self.phase = EnginePhase::Morphing;
        debug!(?from, to = index, "Switched audible track");
        self.emit(MorphEvent::Switched { from, to: index });
    }

    /// Halt every track; repeated calls do nothing
    pub fn stop(&mut self) {
        if self.phase == EnginePhase::Stopped {
            return;
        }
        self.bank.lock().stop_all();
        self.phase = EnginePhase::Stopped;
        info!("Morphing stopped");
        self.emit(MorphEvent::Stopped);
    }

    /// Run the morphing loop on the calling thread
    ///
    /// The output stream lives for the duration of the loop. The loop ends on
    /// a `Stop` command, when `cancel` is raised, or when every sender is gone.
    pub fn run(
        &mut self,
        output: &dyn OutputBackend,
        commands: &Receiver<MorphCommand>,
        cancel: &Signal,
    ) -> Result<(), MorphError> {
        let ready = self.ready.take();
        let stream = output.open(self.bank.clone())?;
        self.start_morphing()?;
        if let Some(ready) = ready {
            let _ = ready.send(());
        }

        while !cancel.is_set() {
            match commands.recv_timeout(self.poll_interval) {
                Ok(command) => {
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Command queue closed");
                    break;
                }
            }
        }

        self.stop();
        drop(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::TrackBank;
    use crate::device::NullOutput;
    use crate::device::OutputStream;
    use crossbeam_channel::{bounded, unbounded, TryRecvError};
    use morph_core::AudioBuffer;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct MissingOutput;

    impl OutputBackend for MissingOutput {
        fn open(&self, _bank: SharedBank) -> Result<OutputStream, AudioError> {
            Err(AudioError::NoOutputDevice)
        }
    }

    fn bank(tracks: usize) -> SharedBank {
        let buffers = (0..tracks).map(|i| (format!("{i:02}"), AudioBuffer::new(vec![0.1; 64], 44100)));
        Arc::new(Mutex::new(TrackBank::from_buffers(buffers).unwrap()))
    }

    fn engine_with_events(tracks: usize) -> (MorphEngine, SharedBank, Receiver<MorphEvent>) {
        let bank = bank(tracks);
        let (tx, rx) = unbounded();
        let engine = MorphEngine::new(bank.clone(), 0).with_events(tx);
        (engine, bank, rx)
    }

    #[test]
    fn test_from_wire() {
        assert_eq!(MorphCommand::from_wire(0), MorphCommand::Switch(0));
        assert_eq!(MorphCommand::from_wire(3), MorphCommand::Switch(3));
        assert_eq!(MorphCommand::from_wire(-1), MorphCommand::Stop);
        assert_eq!(MorphCommand::from_wire(-7), MorphCommand::Noop);
    }

    #[test]
    fn test_start_makes_first_track_audible() {
        let (mut engine, bank, events) = engine_with_events(3);
        engine.start_morphing().unwrap();

        assert_eq!(engine.phase(), EnginePhase::Playing);
        assert_eq!(engine.audible(), Some(0));
        assert_eq!(bank.lock().gains(), vec![1.0, 0.0, 0.0]);
        assert!(bank.lock().is_playing());
        assert_eq!(events.try_recv().unwrap(), MorphEvent::Started { audible: Some(0) });
    }

    #[test]
    fn test_start_twice_rejected() {
        let (mut engine, _bank, _events) = engine_with_events(2);
        engine.start_morphing().unwrap();
        assert!(matches!(
            engine.start_morphing(),
            Err(MorphError::InvalidPhase(EnginePhase::Playing))
        ));
    }

    #[test]
    fn test_exactly_one_track_audible_after_switches() {
        let (mut engine, bank, _events) = engine_with_events(4);
        engine.start_morphing().unwrap();

        for index in [2, 1, 3, 0, 3] {
            engine.handle_command(MorphCommand::Switch(index));
            let gains = bank.lock().gains();
            assert_eq!(gains.iter().filter(|&&g| g == 1.0).count(), 1);
            assert_eq!(gains[index], 1.0);
        }
        assert_eq!(engine.phase(), EnginePhase::Morphing);
    }

    #[test]
    fn test_switch_is_idempotent() {
        let (mut engine, bank, events) = engine_with_events(4);
        engine.start_morphing().unwrap();

        for index in 0..4 {
            engine.handle_command(MorphCommand::Switch(index));
            let gains = bank.lock().gains();
            let _ = events.try_iter().count();

            engine.handle_command(MorphCommand::Switch(index));
            assert_eq!(bank.lock().gains(), gains);
            assert_eq!(engine.audible(), Some(index));
            assert!(events.try_iter().next().is_none());
        }
    }

    #[test]
    fn test_out_of_range_switch_ignored() {
        let (mut engine, bank, events) = engine_with_events(2);
        engine.start_morphing().unwrap();
        let _ = events.try_recv();

        assert!(engine.handle_command(MorphCommand::Switch(5)).is_continue());
        assert_eq!(engine.audible(), Some(0));
        assert_eq!(bank.lock().gains(), vec![1.0, 0.0]);
        assert_eq!(events.try_recv().unwrap(), MorphEvent::Ignored { index: 5 });
    }

    #[test]
    fn test_empty_bank_has_no_audible_track() {
        let (mut engine, _bank, events) = engine_with_events(0);
        engine.start_morphing().unwrap();
        assert_eq!(engine.audible(), None);
        let _ = events.try_recv();

        engine.handle_command(MorphCommand::Switch(0));
        assert_eq!(engine.audible(), None);
        assert_eq!(events.try_recv().unwrap(), MorphEvent::Ignored { index: 0 });
    }

    #[test]
    fn test_noop_and_pause() {
        let (mut engine, bank, _events) = engine_with_events(2);
        engine.start_morphing().unwrap();

        engine.handle_command(MorphCommand::Noop);
        assert_eq!(engine.audible(), Some(0));

        engine.handle_command(MorphCommand::Pause);
        assert!(bank.lock().is_paused());
        engine.handle_command(MorphCommand::Resume);
        assert!(!bank.lock().is_paused());
    }

    #[test]
    fn test_stop_halts_all_tracks() {
        let (mut engine, bank, events) = engine_with_events(3);
        engine.start_morphing().unwrap();

        assert!(engine.handle_command(MorphCommand::Stop).is_break());
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert!(!bank.lock().is_playing());
        assert_eq!(events.try_iter().last(), Some(MorphEvent::Stopped));

        // Anything after the sentinel is dropped
        assert!(engine.handle_command(MorphCommand::Switch(1)).is_break());
        assert_eq!(engine.audible(), Some(0));
    }

    #[test]
    fn test_run_applies_commands_in_order() {
        let (mut engine, bank, events) = engine_with_events(3);
        let (tx, rx) = unbounded();
        for command in [
            MorphCommand::Switch(1),
            MorphCommand::Switch(2),
            MorphCommand::Switch(1),
            MorphCommand::Stop,
        ] {
            tx.send(command).unwrap();
        }

        engine.run(&NullOutput, &rx, &Signal::new()).unwrap();

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                MorphEvent::Started { audible: Some(0) },
                MorphEvent::Switched { from: Some(0), to: 1 },
                MorphEvent::Switched { from: Some(1), to: 2 },
                MorphEvent::Switched { from: Some(2), to: 1 },
                MorphEvent::Stopped,
            ]
        );
        assert_eq!(bank.lock().gains(), vec![0.0, 1.0, 0.0]);
        assert_eq!(engine.phase(), EnginePhase::Stopped);
    }

    #[test]
    fn test_run_follows_switch_trace() {
        let (mut engine, bank, events) = engine_with_events(3);
        let (tx, rx) = unbounded();
        for command in [
            MorphCommand::Switch(2),
            MorphCommand::Switch(0),
            MorphCommand::Switch(1),
            MorphCommand::Stop,
        ] {
            tx.send(command).unwrap();
        }

        engine.run(&NullOutput, &rx, &Signal::new()).unwrap();

        let audible: Vec<_> = events
            .try_iter()
            .filter_map(|e| match e {
                MorphEvent::Switched { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(audible, vec![2, 0, 1]);
        assert_eq!(bank.lock().gains(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_run_reports_ready() {
        let (engine, _bank, _events) = engine_with_events(2);
        let (ready_tx, ready_rx) = bounded(1);
        let mut engine = engine.with_ready(ready_tx);
        let (tx, rx) = unbounded();
        tx.send(MorphCommand::Stop).unwrap();

        engine.run(&NullOutput, &rx, &Signal::new()).unwrap();
        assert_eq!(ready_rx.try_recv(), Ok(()));
    }

    #[test]
    fn test_run_without_device_never_ready() {
        let (engine, bank, _events) = engine_with_events(2);
        let (ready_tx, ready_rx) = bounded(1);
        let mut engine = engine.with_ready(ready_tx);
        let (_tx, rx) = unbounded::<MorphCommand>();

        let result = engine.run(&MissingOutput, &rx, &Signal::new());
        assert!(matches!(result, Err(MorphError::Audio(AudioError::NoOutputDevice))));
        assert_eq!(ready_rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(engine.phase(), EnginePhase::Idle);
        assert!(!bank.lock().is_playing());
    }

    #[test]
    fn test_run_observes_cancellation() {
        let (engine, bank, _events) = engine_with_events(2);
        let mut engine = engine.with_poll_interval(Duration::from_millis(10));
        let (_tx, rx) = unbounded::<MorphCommand>();
        let cancel = Signal::new();
        let worker_cancel = cancel.clone();

        let handle = std::thread::spawn(move || {
            engine.run(&NullOutput, &rx, &worker_cancel).unwrap();
            engine.phase()
        });
        std::thread::sleep(Duration::from_millis(30));
        cancel.set();

        assert_eq!(handle.join().unwrap(), EnginePhase::Stopped);
        assert!(!bank.lock().is_playing());
    }

    #[test]
    fn test_run_ends_when_queue_closes() {
        let (mut engine, _bank, _events) = engine_with_events(2);
        let (tx, rx) = unbounded();
        tx.send(MorphCommand::Switch(1)).unwrap();
        drop(tx);

        engine.run(&NullOutput, &rx, &Signal::new()).unwrap();
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(engine.audible(), Some(1));
    }
}
