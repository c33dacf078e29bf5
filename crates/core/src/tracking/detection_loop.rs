//! The capture/detection loop.
//!
//! Owns one camera track and one recognition engine, polls the track at a
//! fixed cadence on a dedicated worker thread, and delivers each result
//! with its detection latency to the caller's callback. Tolerates camera
//! disconnection (bounded reacquire with the original constraints) and an
//! external on/off switch (`init`/`stop`, re-entrant).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use thiserror::Error;

use crate::capture::domain::camera_source::{
    CameraConstraints, CameraSource, CameraTrack, CaptureError,
};
use crate::provisioning::domain::asset_provisioner::{AssetBundle, AssetProvisioner};
use crate::recognition::domain::landmark_engine::{EngineOptions, LandmarkEngine};
use crate::recognition::domain::landmarks::LandmarkResult;
use crate::shared::constants::{DETECTION_INTERVAL, REACQUIRE_BACKOFF, REACQUIRE_MAX_ATTEMPTS};
use crate::tracking::tick_telemetry::{NullTickTelemetry, TickTelemetry};

/// One delivered detection: the engine's result and how long the detect
/// call took. The loop never retains results after handing them over.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub result: LandmarkResult,
    /// Duration of the detection call only, not the frame grab.
    pub latency: Duration,
}

pub type ResultCallback = Arc<dyn Fn(DetectionResult) + Send + Sync>;

/// Builds the engine from provisioned assets. Injected so tests and
/// embedders can substitute the recognizer.
pub type EngineFactory = Box<
    dyn Fn(&AssetBundle, &EngineOptions) -> Result<Box<dyn LandmarkEngine>, Box<dyn std::error::Error>>
        + Send
        + Sync,
>;

/// Observable lifecycle of the loop.
///
/// `Reacquiring` is a transient sub-state of `Running` entered when the
/// active track ends; `Stopped` is reachable from every state via `stop()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Initializing,
    Running,
    Reacquiring,
    Stopped,
}

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("camera acquisition failed: {0}")]
    Camera(#[from] CaptureError),
}

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub interval: Duration,
    pub constraints: CameraConstraints,
    pub engine_options: EngineOptions,
    pub reacquire_max_attempts: usize,
    /// Attempt `n` waits `(n - 1) * reacquire_backoff` before reopening;
    /// the first attempt is immediate.
    pub reacquire_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: DETECTION_INTERVAL,
            constraints: CameraConstraints::default(),
            engine_options: EngineOptions::default(),
            reacquire_max_attempts: REACQUIRE_MAX_ATTEMPTS,
            reacquire_backoff: REACQUIRE_BACKOFF,
        }
    }
}

struct SharedState {
    stopped: AtomicBool,
    state: Mutex<LoopState>,
}

impl SharedState {
    fn set_state(&self, state: LoopState) {
        *self.state.lock().unwrap() = state;
    }
}

struct WorkerHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Continuously samples a camera feed at a fixed cadence and reports
/// recognition results with latency.
///
/// All collaborators are injected at construction; there are no process
/// globals. `init` and `stop` may be called from any thread; ticks run on
/// a single worker thread, so the callback is never invoked concurrently
/// with itself. `stop` joins the worker and therefore must not be called
/// from inside the result callback.
pub struct FaceTrackingLoop {
    source: Arc<Mutex<Box<dyn CameraSource>>>,
    provisioner: Box<dyn AssetProvisioner>,
    engine_factory: EngineFactory,
    callback: ResultCallback,
    telemetry: Arc<Mutex<Box<dyn TickTelemetry>>>,
    config: LoopConfig,
    shared: Arc<SharedState>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl FaceTrackingLoop {
    pub fn new(
        source: Box<dyn CameraSource>,
        provisioner: Box<dyn AssetProvisioner>,
        engine_factory: EngineFactory,
        callback: impl Fn(DetectionResult) + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            provisioner,
            engine_factory,
            callback: Arc::new(callback),
            telemetry: Arc::new(Mutex::new(Box::new(NullTickTelemetry))),
            config: LoopConfig::default(),
            shared: Arc::new(SharedState {
                stopped: AtomicBool::new(false),
                state: Mutex::new(LoopState::Uninitialized),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_telemetry(self, telemetry: Box<dyn TickTelemetry>) -> Self {
        *self.telemetry.lock().unwrap() = telemetry;
        self
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.lock().unwrap()
    }

    /// Acquire everything and start ticking.
    ///
    /// Sequentially: provisions assets and builds the engine (failure is
    /// logged and leaves the engine unset, making ticks permanent no-ops),
    /// opens the camera, then starts the tick timer on a worker thread.
    /// Safe to call again after `stop()`; repeats the full sequence.
    ///
    /// Camera failures (permission denial, no device) are the one class of
    /// error that propagates to the caller.
    pub fn init(&self) -> Result<(), LoopError> {
        // A second init must never leave two timers running.
        self.shutdown_worker();
        self.shared.stopped.store(false, Ordering::SeqCst);
        self.shared.set_state(LoopState::Initializing);

        let engine = self.build_engine();

        let mut track = {
            let mut source = self.source.lock().unwrap();
            match source.open_track(&self.config.constraints) {
                Ok(track) => track,
                Err(e) => {
                    self.shared.set_state(LoopState::Stopped);
                    return Err(LoopError::Camera(e));
                }
            }
        };

        let mut worker_slot = self.worker.lock().unwrap();
        // stop() may have raced the camera open; release the track and
        // never enter Running.
        if self.shared.stopped.load(Ordering::SeqCst) {
            track.stop();
            self.shared.set_state(LoopState::Stopped);
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = Worker {
            engine,
            track,
            source: self.source.clone(),
            constraints: self.config.constraints.clone(),
            callback: self.callback.clone(),
            telemetry: self.telemetry.clone(),
            shared: self.shared.clone(),
            reacquire_max_attempts: self.config.reacquire_max_attempts,
            reacquire_backoff: self.config.reacquire_backoff,
        };
        let interval = self.config.interval;

        self.shared.set_state(LoopState::Running);
        let handle = thread::spawn(move || worker.run(interval, stop_rx));
        *worker_slot = Some(WorkerHandle { stop_tx, handle });

        Ok(())
    }

    /// Stop ticking and release everything. Idempotent; callable from any
    /// thread at any point, including while `init()` is still acquiring.
    ///
    /// When this returns, no further frames are captured, the track is
    /// released, and the engine handle is cleared. An in-flight frame grab
    /// is not forcibly aborted; it completes and is discarded.
    pub fn stop(&self) {
        self.shutdown_worker();
        self.shared.set_state(LoopState::Stopped);
    }

    /// Emit the telemetry summary for the run so far.
    pub fn emit_summary(&self) {
        self.telemetry.lock().unwrap().summary();
    }

    fn shutdown_worker(&self) {
        let worker = {
            let mut slot = self.worker.lock().unwrap();
            self.shared.stopped.store(true, Ordering::SeqCst);
            slot.take()
        };
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
        }
    }

    fn build_engine(&self) -> Option<Box<dyn LandmarkEngine>> {
        let assets = match self.provisioner.provision() {
            Ok(assets) => assets,
            Err(e) => {
                log::warn!("asset provisioning failed, detection disabled: {e}");
                return None;
            }
        };
        match (self.engine_factory)(&assets, &self.config.engine_options) {
            Ok(engine) => Some(engine),
            Err(e) => {
                log::warn!("landmark engine construction failed, detection disabled: {e}");
                None
            }
        }
    }
}

impl Drop for FaceTrackingLoop {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

enum TickOutcome {
    Continue,
    Abort,
}

/// Everything the worker thread owns. The track and engine never leave
/// this thread once handed over.
struct Worker {
    engine: Option<Box<dyn LandmarkEngine>>,
    track: Box<dyn CameraTrack>,
    source: Arc<Mutex<Box<dyn CameraSource>>>,
    constraints: CameraConstraints,
    callback: ResultCallback,
    telemetry: Arc<Mutex<Box<dyn TickTelemetry>>>,
    shared: Arc<SharedState>,
    reacquire_max_attempts: usize,
    reacquire_backoff: Duration,
}

impl Worker {
    fn run(mut self, interval: Duration, stop_rx: Receiver<()>) {
        let ticker = tick(interval);
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {
                    if self.shared.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if let TickOutcome::Abort = self.run_tick() {
                        break;
                    }
                }
            }
        }
        self.track.stop();
        self.engine = None;
        self.shared.set_state(LoopState::Stopped);
    }

    fn run_tick(&mut self) -> TickOutcome {
        // Engine unset: provisioning failed upstream, ticks stay no-ops.
        let Some(engine) = self.engine.as_mut() else {
            return TickOutcome::Continue;
        };

        let frame = match self.track.grab_frame() {
            Ok(frame) => frame,
            Err(CaptureError::Ended) => return self.reacquire(),
            Err(e) if e.is_transient() => {
                // Expected occasional condition; skip the tick quietly.
                self.telemetry.lock().unwrap().skipped();
                return TickOutcome::Continue;
            }
            Err(e) => {
                log::warn!("camera error mid-run, treating as track loss: {e}");
                return self.reacquire();
            }
        };

        let started = Instant::now();
        match engine.detect(&frame) {
            Ok(Some(result)) => {
                let latency = started.elapsed();
                self.telemetry
                    .lock()
                    .unwrap()
                    .tick(latency.as_secs_f64() * 1000.0);
                (self.callback)(DetectionResult { result, latency });
            }
            Ok(None) => {
                // No face in frame; nothing to deliver.
                self.telemetry
                    .lock()
                    .unwrap()
                    .tick(started.elapsed().as_secs_f64() * 1000.0);
            }
            Err(e) => {
                log::warn!("detection failed: {e}");
            }
        }
        TickOutcome::Continue
    }

    /// Replace a dead track with a fresh one opened under the original
    /// constraints. The timer and the engine are left untouched.
    fn reacquire(&mut self) -> TickOutcome {
        self.track.stop();
        self.shared.set_state(LoopState::Reacquiring);

        for attempt in 1..=self.reacquire_max_attempts {
            if self.shared.stopped.load(Ordering::SeqCst) {
                return TickOutcome::Abort;
            }
            if attempt > 1 {
                thread::sleep(self.reacquire_backoff * (attempt as u32 - 1));
            }

            let opened = {
                let mut source = self.source.lock().unwrap();
                source.open_track(&self.constraints)
            };
            match opened {
                Ok(mut track) => {
                    if self.shared.stopped.load(Ordering::SeqCst) {
                        track.stop();
                        return TickOutcome::Abort;
                    }
                    self.track = track;
                    self.shared.set_state(LoopState::Running);
                    self.telemetry.lock().unwrap().reacquired(attempt);
                    return TickOutcome::Continue;
                }
                Err(e) => {
                    log::warn!(
                        "camera reopen attempt {attempt}/{} failed: {e}",
                        self.reacquire_max_attempts
                    );
                }
            }
        }

        log::error!(
            "camera could not be reacquired after {} attempts, stopping loop",
            self.reacquire_max_attempts
        );
        TickOutcome::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    use crate::provisioning::domain::asset_provisioner::ProvisionError;
    use crate::recognition::domain::landmarks::FaceLandmarks;
    use crate::shared::frame::Frame;

    // --- fakes -----------------------------------------------------------

    #[derive(Clone)]
    struct TrackScript {
        /// Grabs that succeed before the track reports `Ended`.
        frames_before_end: Option<usize>,
        /// Every Nth grab fails transiently (1-based, None = never).
        transient_every: Option<usize>,
        grab_delay: Duration,
    }

    impl Default for TrackScript {
        fn default() -> Self {
            Self {
                frames_before_end: None,
                transient_every: None,
                grab_delay: Duration::ZERO,
            }
        }
    }

    struct FakeTrack {
        script: TrackScript,
        grabs: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        grab_count: usize,
        index: u64,
    }

    impl CameraTrack for FakeTrack {
        fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
            if !self.script.grab_delay.is_zero() {
                thread::sleep(self.script.grab_delay);
            }
            self.grab_count += 1;
            self.grabs.fetch_add(1, Ordering::SeqCst);

            if let Some(limit) = self.script.frames_before_end {
                if self.grab_count > limit {
                    return Err(CaptureError::Ended);
                }
            }
            if let Some(n) = self.script.transient_every {
                if self.grab_count % n == 0 {
                    return Err(CaptureError::Frame("sensor hiccup".into()));
                }
            }

            self.index += 1;
            Ok(Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, self.index))
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeSource {
        script: TrackScript,
        opens: Arc<AtomicUsize>,
        grabs: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        seen_constraints: Arc<Mutex<Vec<CameraConstraints>>>,
        /// Open numbers (1-based) that fail with `DeviceUnavailable`.
        fail_from_open: Option<usize>,
        /// When set, `open_track` blocks until the gate fires.
        gate: Option<Receiver<()>>,
        deny_permission: bool,
    }

    impl FakeSource {
        fn new(script: TrackScript) -> Self {
            Self {
                script,
                opens: Arc::new(AtomicUsize::new(0)),
                grabs: Arc::new(AtomicUsize::new(0)),
                stops: Arc::new(AtomicUsize::new(0)),
                seen_constraints: Arc::new(Mutex::new(Vec::new())),
                fail_from_open: None,
                gate: None,
                deny_permission: false,
            }
        }

        fn counters(
            &self,
        ) -> (
            Arc<AtomicUsize>,
            Arc<AtomicUsize>,
            Arc<AtomicUsize>,
            Arc<Mutex<Vec<CameraConstraints>>>,
        ) {
            (
                self.opens.clone(),
                self.grabs.clone(),
                self.stops.clone(),
                self.seen_constraints.clone(),
            )
        }
    }

    impl CameraSource for FakeSource {
        fn open_track(
            &mut self,
            constraints: &CameraConstraints,
        ) -> Result<Box<dyn CameraTrack>, CaptureError> {
            if let Some(ref gate) = self.gate {
                let _ = gate.recv();
            }
            if self.deny_permission {
                return Err(CaptureError::PermissionDenied {
                    device: "/dev/video0".into(),
                });
            }
            let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen_constraints.lock().unwrap().push(constraints.clone());
            if let Some(from) = self.fail_from_open {
                if n >= from {
                    return Err(CaptureError::DeviceUnavailable {
                        device: "/dev/video0".into(),
                        reason: "unplugged".into(),
                    });
                }
            }
            Ok(Box::new(FakeTrack {
                script: self.script.clone(),
                grabs: self.grabs.clone(),
                stops: self.stops.clone(),
                grab_count: 0,
                index: 0,
            }))
        }
    }

    struct StubProvisioner {
        calls: Arc<AtomicUsize>,
    }

    impl StubProvisioner {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl AssetProvisioner for StubProvisioner {
        fn provision(&self) -> Result<AssetBundle, ProvisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AssetBundle {
                detector_model: PathBuf::from("/nonexistent/detector.onnx"),
                landmark_model: PathBuf::from("/nonexistent/landmarks.onnx"),
            })
        }
    }

    struct FailingProvisioner;

    impl AssetProvisioner for FailingProvisioner {
        fn provision(&self) -> Result<AssetBundle, ProvisionError> {
            Err(ProvisionError::NoCacheDir)
        }
    }

    struct FakeEngine {
        delay: Duration,
    }

    impl LandmarkEngine for FakeEngine {
        fn detect(
            &mut self,
            _frame: &Frame,
        ) -> Result<Option<LandmarkResult>, Box<dyn std::error::Error>> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok(Some(fixed_result()))
        }
    }

    fn fixed_result() -> LandmarkResult {
        LandmarkResult {
            landmarks: FaceLandmarks::new([
                (440.0, 350.0),
                (560.0, 350.0),
                (500.0, 420.0),
                (460.0, 470.0),
                (540.0, 470.0),
            ]),
            transform: None,
        }
    }

    fn engine_factory(delay: Duration) -> EngineFactory {
        Box::new(move |_assets, _options| Ok(Box::new(FakeEngine { delay }) as Box<dyn LandmarkEngine>))
    }

    fn collecting_callback() -> (
        Arc<Mutex<Vec<DetectionResult>>>,
        impl Fn(DetectionResult) + Send + Sync + 'static,
    ) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        (results, move |r| sink.lock().unwrap().push(r))
    }

    struct RecordingTelemetry {
        ticks: Arc<AtomicUsize>,
        skips: Arc<AtomicUsize>,
        reacquires: Arc<AtomicUsize>,
    }

    impl TickTelemetry for RecordingTelemetry {
        fn tick(&mut self, _latency_ms: f64) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
        fn skipped(&mut self) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }
        fn reacquired(&mut self, _attempt: usize) {
            self.reacquires.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config(interval_ms: u64) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_millis(interval_ms),
            reacquire_max_attempts: 3,
            reacquire_backoff: Duration::from_millis(5),
            ..LoopConfig::default()
        }
    }

    // --- P1: idempotent stop ---------------------------------------------

    #[test]
    fn test_stop_twice_matches_stop_once() {
        let source = FakeSource::new(TrackScript::default());
        let (_, _, stops, _) = source.counters();
        let (results, callback) = collecting_callback();

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::ZERO),
            callback,
        )
        .with_config(fast_config(20));

        tracking.init().unwrap();
        thread::sleep(Duration::from_millis(100));
        tracking.stop();
        let count_after_first = results.lock().unwrap().len();
        let stops_after_first = stops.load(Ordering::SeqCst);

        tracking.stop();
        assert_eq!(tracking.state(), LoopState::Stopped);
        assert_eq!(stops.load(Ordering::SeqCst), stops_after_first);

        // No further deliveries after stop returned
        thread::sleep(Duration::from_millis(80));
        assert_eq!(results.lock().unwrap().len(), count_after_first);
    }

    // --- P2: no ticks before ready ---------------------------------------

    #[test]
    fn test_no_results_when_engine_unset() {
        let source = FakeSource::new(TrackScript::default());
        let (_, grabs, _, _) = source.counters();
        let (results, callback) = collecting_callback();

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(FailingProvisioner),
            engine_factory(Duration::ZERO),
            callback,
        )
        .with_config(fast_config(20));

        tracking.init().unwrap();
        thread::sleep(Duration::from_millis(120));

        // Timer runs, but ticks are no-ops: nothing grabbed, nothing delivered
        assert_eq!(tracking.state(), LoopState::Running);
        assert!(results.lock().unwrap().is_empty());
        assert_eq!(grabs.load(Ordering::SeqCst), 0);

        tracking.stop();
    }

    // --- P3: stop during init races cleanly ------------------------------

    #[test]
    fn test_stop_during_camera_open_releases_track() {
        let (gate_tx, gate_rx) = bounded::<()>(1);
        let mut source = FakeSource::new(TrackScript::default());
        source.gate = Some(gate_rx);
        let (opens, _, stops, _) = source.counters();
        let (results, callback) = collecting_callback();

        let tracking = Arc::new(
            FaceTrackingLoop::new(
                Box::new(source),
                Box::new(StubProvisioner::new()),
                engine_factory(Duration::ZERO),
                callback,
            )
            .with_config(fast_config(20)),
        );

        let tracking_init = tracking.clone();
        let init_thread = thread::spawn(move || tracking_init.init());

        // Let init reach the blocking camera open, then stop underneath it
        thread::sleep(Duration::from_millis(50));
        tracking.stop();
        gate_tx.send(()).unwrap();

        init_thread.join().unwrap().unwrap();

        assert_eq!(tracking.state(), LoopState::Stopped);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        // The resolved track was released without ever running
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        thread::sleep(Duration::from_millis(80));
        assert!(results.lock().unwrap().is_empty());
    }

    // --- P4 + end-to-end scenario ----------------------------------------

    #[test]
    fn test_tick_cadence_and_fixed_results() {
        let source = FakeSource::new(TrackScript::default());
        let (results, callback) = collecting_callback();

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::from_millis(5)),
            callback,
        )
        .with_config(fast_config(60));

        tracking.init().unwrap();
        assert_eq!(tracking.state(), LoopState::Running);
        thread::sleep(Duration::from_millis(600));
        tracking.stop();

        let results = results.lock().unwrap();
        // ~10 intervals; allow scheduling slack either way
        assert!(
            (8..=11).contains(&results.len()),
            "expected ~10 results, got {}",
            results.len()
        );
        for r in results.iter() {
            assert_eq!(r.result, fixed_result());
            assert!(r.latency >= Duration::from_millis(5));
        }
    }

    // --- P5: track-ended recovery ----------------------------------------

    #[test]
    fn test_track_ended_reopens_with_same_constraints() {
        let source = FakeSource::new(TrackScript {
            frames_before_end: Some(3),
            ..TrackScript::default()
        });
        let (opens, _, _, seen) = source.counters();
        let (results, callback) = collecting_callback();
        let reacquires = Arc::new(AtomicUsize::new(0));

        let telemetry = RecordingTelemetry {
            ticks: Arc::new(AtomicUsize::new(0)),
            skips: Arc::new(AtomicUsize::new(0)),
            reacquires: reacquires.clone(),
        };

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::ZERO),
            callback,
        )
        .with_config(fast_config(20))
        .with_telemetry(Box::new(telemetry));

        tracking.init().unwrap();
        // First track dies after 3 grabs; the next one also dies after 3,
        // so expect repeated recoveries while we sleep
        thread::sleep(Duration::from_millis(200));
        tracking.stop();

        assert!(opens.load(Ordering::SeqCst) >= 2, "no reopen happened");
        assert!(reacquires.load(Ordering::SeqCst) >= 1);
        // Results kept flowing past the first track's 3 frames
        assert!(results.lock().unwrap().len() > 3);

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|c| *c == CameraConstraints::default()));
    }

    #[test]
    fn test_reacquire_exhaustion_stops_loop() {
        let mut source = FakeSource::new(TrackScript {
            frames_before_end: Some(1),
            ..TrackScript::default()
        });
        source.fail_from_open = Some(2);
        let (opens, _, _, _) = source.counters();
        let (_, callback) = collecting_callback();

        let mut config = fast_config(20);
        config.reacquire_max_attempts = 2;
        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::ZERO),
            callback,
        )
        .with_config(config);

        tracking.init().unwrap();
        thread::sleep(Duration::from_millis(250));

        assert_eq!(tracking.state(), LoopState::Stopped);
        // Initial open plus two failed reopen attempts
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    // --- P6: latency reflects the detect call only -----------------------

    #[test]
    fn test_latency_excludes_grab_duration() {
        let source = FakeSource::new(TrackScript {
            grab_delay: Duration::from_millis(15),
            ..TrackScript::default()
        });
        let (results, callback) = collecting_callback();

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::from_millis(5)),
            callback,
        )
        .with_config(fast_config(30));

        tracking.init().unwrap();
        thread::sleep(Duration::from_millis(300));
        tracking.stop();

        let results = results.lock().unwrap();
        assert!(!results.is_empty());
        for r in results.iter() {
            assert!(r.latency >= Duration::from_millis(5));
            assert!(
                r.latency < Duration::from_millis(15),
                "latency {:?} includes grab time",
                r.latency
            );
        }
    }

    // --- transient failures ----------------------------------------------

    #[test]
    fn test_transient_grab_failure_skips_tick() {
        let source = FakeSource::new(TrackScript {
            transient_every: Some(2),
            ..TrackScript::default()
        });
        let (opens, _, _, _) = source.counters();
        let (results, callback) = collecting_callback();
        let skips = Arc::new(AtomicUsize::new(0));

        let telemetry = RecordingTelemetry {
            ticks: Arc::new(AtomicUsize::new(0)),
            skips: skips.clone(),
            reacquires: Arc::new(AtomicUsize::new(0)),
        };

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::ZERO),
            callback,
        )
        .with_config(fast_config(20))
        .with_telemetry(Box::new(telemetry));

        tracking.init().unwrap();
        thread::sleep(Duration::from_millis(200));

        // Still running on the original track: transient errors never reopen
        assert_eq!(tracking.state(), LoopState::Running);
        tracking.stop();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(skips.load(Ordering::SeqCst) >= 2);
        assert!(!results.lock().unwrap().is_empty());
    }

    // --- init error propagation and re-init ------------------------------

    #[test]
    fn test_init_rejects_on_permission_denied() {
        let mut source = FakeSource::new(TrackScript::default());
        source.deny_permission = true;
        let (_, callback) = collecting_callback();

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(StubProvisioner::new()),
            engine_factory(Duration::ZERO),
            callback,
        );

        let err = tracking.init().unwrap_err();
        assert!(matches!(
            err,
            LoopError::Camera(CaptureError::PermissionDenied { .. })
        ));
        assert_eq!(tracking.state(), LoopState::Stopped);
    }

    #[test]
    fn test_reinit_after_stop_repeats_acquisition() {
        let source = FakeSource::new(TrackScript::default());
        let (opens, _, _, _) = source.counters();
        let provisioner = StubProvisioner::new();
        let provision_calls = provisioner.calls.clone();
        let (results, callback) = collecting_callback();

        let tracking = FaceTrackingLoop::new(
            Box::new(source),
            Box::new(provisioner),
            engine_factory(Duration::ZERO),
            callback,
        )
        .with_config(fast_config(20));

        tracking.init().unwrap();
        thread::sleep(Duration::from_millis(60));
        tracking.stop();

        tracking.init().unwrap();
        assert_eq!(tracking.state(), LoopState::Running);
        thread::sleep(Duration::from_millis(60));
        tracking.stop();

        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(provision_calls.load(Ordering::SeqCst), 2);
        assert!(!results.lock().unwrap().is_empty());
    }
}
