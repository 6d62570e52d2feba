//! Dedicated processing thread driving a [`Coordinator`].
//!
//! Callers talk to the thread through a [`CoordinatorHandle`]: commands go
//! in over a std channel and never block, status events come back over an
//! async channel so a presentation layer can await them.

use super::coordinator::{Coordinator, CoordinatorConfig};
use super::{PassOutput, PassRunner, PresentationTarget};
use crate::error::{ForensicError, Result};
use crate::forensics::ProcessingParameters;
use crate::raster::RawImage;
use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use std::sync::{Arc, OnceLock, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const EVENT_CAPACITY: usize = 32;
const IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Command {
    Source(RawImage),
    Parameters(ProcessingParameters),
    Target(PresentationTarget),
    Shutdown,
}

#[derive(Debug)]
pub struct PassReport {
    pub pass_id: u64,
    pub params: ProcessingParameters,
    pub elapsed: Duration,
    pub follow_up_scheduled: bool,
    pub outcome: Result<PassOutput>,
}

#[derive(Debug)]
pub enum StatusEvent {
    EngineReady,
    Conditioned {
        description: String,
        source_dimensions: (u32, u32),
        dimensions: (u32, u32),
        was_resized: bool,
    },
    Completed(PassReport),
    Rejected(ForensicError),
}

#[derive(Debug)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    events: AsyncReceiver<StatusEvent>,
    ready: Arc<OnceLock<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// Start the processing thread. `make_runner` builds the transform
    /// engine on that thread; readiness is signalled once it returns.
    pub fn spawn<F, R>(
        config: CoordinatorConfig,
        params: ProcessingParameters,
        target: PresentationTarget,
        make_runner: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> R + Send + 'static,
        R: PassRunner,
    {
        params.validate()?;
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = async_channel::bounded(EVENT_CAPACITY);
        let ready = Arc::new(OnceLock::new());

        let ready_for_thread = Arc::clone(&ready);
        let coordinator = Coordinator::new(config, params, target);
        let thread = thread::Builder::new()
            .name("tracelens-coordinator".into())
            .spawn(move || {
                let runner = make_runner();
                run_coordinator(coordinator, runner, command_rx, event_tx, ready_for_thread)
            })
            .map_err(|err| {
                ForensicError::processing(format!("failed to spawn coordinator thread: {err}"))
            })?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            ready,
            thread: Some(thread),
        })
    }

    pub fn is_engine_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    pub fn events(&self) -> AsyncReceiver<StatusEvent> {
        self.events.clone()
    }

    pub fn submit_source(&self, image: RawImage) -> Result<()> {
        self.ensure_ready()?;
        if image.is_empty() {
            return Err(ForensicError::invalid_input(format!(
                "source image is {}x{}",
                image.width(),
                image.height()
            )));
        }
        self.send(Command::Source(image))
    }

    pub fn request(&self, params: ProcessingParameters) -> Result<()> {
        self.ensure_ready()?;
        params.validate()?;
        self.send(Command::Parameters(params))
    }

    pub fn retarget(&self, target: PresentationTarget) -> Result<()> {
        self.ensure_ready()?;
        self.send(Command::Target(target.sanitized()))
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_engine_ready() {
            Ok(())
        } else {
            Err(ForensicError::EngineUnavailable)
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ForensicError::processing("coordinator thread has stopped"))
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if thread.join().is_err() {
            error!("[coordinator] processing thread panicked");
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish(events: &AsyncSender<StatusEvent>, event: StatusEvent) {
    // Oldest events are dropped when nobody is listening.
    if let Err(err) = events.force_send(event) {
        warn!("[coordinator] status channel closed: {:?}", err.into_inner());
    }
}

// Returns false once the handle asked the thread to stop.
fn apply(
    coordinator: &mut Coordinator,
    command: Command,
    events: &AsyncSender<StatusEvent>,
) -> bool {
    let now = Instant::now();
    let result = match command {
        Command::Shutdown => return false,
        Command::Source(image) => coordinator.set_source(image, now).map(|conditioned| {
            publish(
                events,
                StatusEvent::Conditioned {
                    description: conditioned.describe(),
                    source_dimensions: conditioned.source_dimensions(),
                    dimensions: conditioned.dimensions(),
                    was_resized: conditioned.was_resized(),
                },
            );
        }),
        Command::Parameters(params) => coordinator.request(params, now),
        Command::Target(target) => coordinator.retarget(target, now),
    };
    if let Err(err) = result {
        warn!("[coordinator] request rejected: {err}");
        publish(events, StatusEvent::Rejected(err));
    }
    true
}

fn run_coordinator<R: PassRunner>(
    mut coordinator: Coordinator,
    mut runner: R,
    commands: mpsc::Receiver<Command>,
    events: AsyncSender<StatusEvent>,
    ready: Arc<OnceLock<()>>,
) {
    coordinator.mark_engine_ready();
    let _ = ready.set(());
    publish(&events, StatusEvent::EngineReady);
    info!("[coordinator] transform engine ready");

    let mut running = true;
    while running {
        match coordinator.poll(Instant::now()) {
            Ok(Some(job)) => {
                let started = Instant::now();
                let outcome = runner.run(&job);
                let elapsed = started.elapsed();
                // Requests that queued up during the pass coalesce into the
                // pending slot before the coordinator leaves Processing.
                while let Ok(command) = commands.try_recv() {
                    running &= apply(&mut coordinator, command, &events);
                }
                let follow_up_scheduled = coordinator.complete(job.id, Instant::now());

                match &outcome {
                    Ok(_) => info!(
                        "[coordinator] pass {} finished in {:.1} ms",
                        job.id,
                        elapsed.as_secs_f64() * 1000.0
                    ),
                    Err(err) => error!("[coordinator] pass {} failed: {err}", job.id),
                }
                publish(
                    &events,
                    StatusEvent::Completed(PassReport {
                        pass_id: job.id,
                        params: job.params,
                        elapsed,
                        follow_up_scheduled,
                        outcome,
                    }),
                );
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                error!("[coordinator] could not start pass: {err}");
                publish(&events, StatusEvent::Rejected(err));
            }
        }

        let timeout = coordinator
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);
        match commands.recv_timeout(timeout) {
            Ok(command) => running = apply(&mut coordinator, command, &events),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => running = false,
        }
    }

    info!("[coordinator] processing thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaStats;
    use crate::error::ErrorKind;
    use crate::pipeline::PassJob;
    use crate::raster::DisplayBuffer;

    struct GatedRunner {
        started: mpsc::Sender<(u64, f32)>,
        gate: mpsc::Receiver<()>,
        // Passes that fail before the runner starts succeeding.
        failures: usize,
    }

    impl PassRunner for GatedRunner {
        fn run(&mut self, job: &PassJob) -> Result<PassOutput> {
            let _ = self.started.send((job.id, job.params.gamma));
            let _ = self.gate.recv();
            if self.failures > 0 {
                self.failures -= 1;
                return Err(ForensicError::processing("transform stage failed"));
            }
            let view = DisplayBuffer {
                width: 1,
                height: 1,
                pixels: vec![0],
            };
            Ok(PassOutput {
                residual: view.clone(),
                spectrum: view,
                conditioned_dimensions: job.image.dimensions(),
                elapsed: Duration::from_millis(1),
                arena: ArenaStats::default(),
            })
        }
    }

    // Gate senders are declared first so they drop before the handle joins.
    struct Harness {
        gate: mpsc::Sender<()>,
        init: mpsc::Sender<()>,
        handle: CoordinatorHandle,
        events: AsyncReceiver<StatusEvent>,
        started: mpsc::Receiver<(u64, f32)>,
    }

    fn harness() -> Harness {
        failing_harness(0)
    }

    fn failing_harness(failures: usize) -> Harness {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel::<()>();
        let config = CoordinatorConfig {
            debounce_ms: 20,
            settle_ms: 10,
        };
        let handle = CoordinatorHandle::spawn(
            config,
            ProcessingParameters::default(),
            PresentationTarget::default(),
            move || {
                let _ = init_rx.recv();
                GatedRunner {
                    started: started_tx,
                    gate: gate_rx,
                    failures,
                }
            },
        )
        .unwrap();
        let events = handle.events();
        Harness {
            gate: gate_tx,
            init: init_tx,
            handle,
            events,
            started: started_rx,
        }
    }

    fn image() -> RawImage {
        RawImage::new(16, 16, vec![100u8; 16 * 16 * 4]).unwrap()
    }

    fn with_gamma(gamma: f32) -> ProcessingParameters {
        ProcessingParameters {
            gamma,
            ..ProcessingParameters::default()
        }
    }

    fn wait_ready(harness: &Harness) {
        harness.init.send(()).unwrap();
        match harness.events.recv_blocking().unwrap() {
            StatusEvent::EngineReady => {}
            other => panic!("expected EngineReady, got {other:?}"),
        }
        assert!(harness.handle.is_engine_ready());
    }

    fn next_report(harness: &Harness) -> PassReport {
        loop {
            match harness.events.recv_blocking().unwrap() {
                StatusEvent::Completed(report) => return report,
                StatusEvent::Rejected(err) => panic!("unexpected rejection: {err}"),
                _ => {}
            }
        }
    }

    #[test]
    fn rejects_requests_until_engine_is_ready() {
        let harness = harness();
        let err = harness.handle.request(with_gamma(2.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
        let err = harness.handle.submit_source(image()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineUnavailable);

        wait_ready(&harness);
        assert!(harness.handle.request(with_gamma(2.0)).is_ok());
        harness.handle.shutdown();
    }

    #[test]
    fn rejects_invalid_input_immediately() {
        let harness = harness();
        wait_ready(&harness);
        let empty = RawImage::new(0, 0, Vec::new()).unwrap();
        assert_eq!(
            harness.handle.submit_source(empty).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            harness.handle.request(with_gamma(0.0)).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn failed_pass_still_runs_the_queued_follow_up() {
        let harness = failing_harness(1);
        wait_ready(&harness);

        harness.handle.submit_source(image()).unwrap();
        let (first_id, gamma) = harness.started.recv().unwrap();
        assert_eq!(gamma, ProcessingParameters::default().gamma);

        harness.handle.request(with_gamma(2.0)).unwrap();
        harness.gate.send(()).unwrap();
        let report = next_report(&harness);
        assert_eq!(report.pass_id, first_id);
        assert_eq!(
            report.outcome.as_ref().unwrap_err().kind(),
            ErrorKind::Processing
        );
        assert!(report.follow_up_scheduled);

        let (second_id, gamma) = harness.started.recv().unwrap();
        assert!(second_id > first_id);
        assert_eq!(gamma, 2.0);
        harness.gate.send(()).unwrap();
        let report = next_report(&harness);
        assert_eq!(report.pass_id, second_id);
        assert_eq!(report.params.gamma, 2.0);
        assert!(report.outcome.is_ok());
        assert!(!report.follow_up_scheduled);

        assert!(
            harness
                .started
                .recv_timeout(Duration::from_millis(200))
                .is_err()
        );
    }

    #[test]
    fn requests_during_a_pass_coalesce_into_one_follow_up() {
        let harness = harness();
        wait_ready(&harness);

        harness.handle.submit_source(image()).unwrap();
        let (first_id, _) = harness.started.recv().unwrap();

        for gamma in [1.5, 2.0, 2.5, 3.0] {
            harness.handle.request(with_gamma(gamma)).unwrap();
        }
        harness.gate.send(()).unwrap();
        let report = next_report(&harness);
        assert_eq!(report.pass_id, first_id);
        assert!(report.follow_up_scheduled);
        assert!(report.outcome.is_ok());

        let (second_id, gamma) = harness.started.recv().unwrap();
        assert_eq!(gamma, 3.0);
        harness.gate.send(()).unwrap();
        let report = next_report(&harness);
        assert_eq!(report.pass_id, second_id);
        assert!(!report.follow_up_scheduled);

        assert!(
            harness
                .started
                .recv_timeout(Duration::from_millis(200))
                .is_err()
        );
        harness.handle.shutdown();
    }

    #[test]
    fn source_submission_reports_conditioning() {
        let harness = harness();
        wait_ready(&harness);
        harness.handle.submit_source(image()).unwrap();
        match harness.events.recv_blocking().unwrap() {
            StatusEvent::Conditioned {
                dimensions,
                was_resized,
                ..
            } => {
                assert_eq!(dimensions, (16, 16));
                assert!(!was_resized);
            }
            other => panic!("expected Conditioned, got {other:?}"),
        }
        let _ = harness.started.recv();
        harness.gate.send(()).unwrap();
        assert!(next_report(&harness).outcome.is_ok());
    }
}
