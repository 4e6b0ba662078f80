//! Running a row-wise fit on a dedicated worker
//!
//! The worker owns the engine session and its own copy of the inputs, and
//! streams results back over a channel. The calling thread polls the channel,
//! reports progress, and watches for cancellation and timeout. An interrupted
//! run returns as soon as it is decided; an engine that does not stop within
//! one poll interval is left to finish in the background, and the worker
//! closes its session when it does.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::data::ExpressionMatrix;
use crate::error::{DiffexError, Result};

use super::engine::{EngineSession, FitRequest, FittingEngine, RawFitResult};

/// Timing knobs for a fit
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// How long to wait on the result channel before re-checking state
    pub poll_interval: Duration,
    /// How often to log elapsed time
    pub progress_interval: Duration,
    /// Give up on the fit after this long
    pub timeout: Option<Duration>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            progress_interval: Duration::from_secs(60),
            timeout: None,
        }
    }
}

/// Shared flag used to interrupt a running fit
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Completed,
    /// Cancelled; results hold whatever arrived before the interrupt
    Interrupted,
}

/// Per-feature fit results, indexed like the expression matrix rows
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub results: Vec<Option<RawFitResult>>,
    pub status: FitStatus,
    pub elapsed: Duration,
}

impl FitOutcome {
    pub fn received(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

/// Closes the session when the worker is done with it, however it ends
struct SessionGuard(Box<dyn EngineSession>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Body of the worker thread. The guard and the sender are dropped before
/// `done` is signalled, so a finished worker has always closed its session.
fn fit_on_worker(
    session: Box<dyn EngineSession>,
    matrix: Arc<ExpressionMatrix>,
    request: Arc<FitRequest>,
    tx: Sender<RawFitResult>,
    done: Sender<()>,
) -> Result<()> {
    let result = {
        let mut guard = SessionGuard(session);
        let mut sink = |row: RawFitResult| match tx.send(row) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        };
        guard
            .0
            .assign_matrix(&matrix)
            .and_then(|handle| guard.0.fit_rows(&handle, &request, &mut sink))
    };
    drop(tx);
    let _ = done.send(());
    result
}

/// Rows collected so far, with the first bad index seen
struct Collected {
    results: Vec<Option<RawFitResult>>,
    invalid_index: Option<usize>,
}

impl Collected {
    fn new(n: usize) -> Self {
        Self {
            results: (0..n).map(|_| None).collect(),
            invalid_index: None,
        }
    }

    fn push(&mut self, row: RawFitResult) {
        let i = row.feature_index;
        if i >= self.results.len() || self.results[i].is_some() {
            self.invalid_index.get_or_insert(i);
        } else {
            self.results[i] = Some(row);
        }
    }

    fn drain(&mut self, rx: &Receiver<RawFitResult>) {
        while let Ok(row) = rx.try_recv() {
            self.push(row);
        }
    }
}

/// Drives a [`FittingEngine`] for one run
pub struct FittingOrchestrator<'a> {
    engine: &'a dyn FittingEngine,
    options: FitOptions,
}

impl<'a> FittingOrchestrator<'a> {
    pub fn new(engine: &'a dyn FittingEngine, options: FitOptions) -> Self {
        Self { engine, options }
    }

    /// Fit every row of `matrix` and collect the results
    pub fn run(
        &self,
        matrix: &ExpressionMatrix,
        request: &FitRequest,
        cancel: &CancellationToken,
    ) -> Result<FitOutcome> {
        let design_samples = request.design.sample_names();
        if design_samples.as_slice() != matrix.sample_names() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} samples in design order", design_samples.len()),
                got: format!("{} matrix columns", matrix.n_samples()),
            });
        }

        let n = matrix.n_features();
        let session = self.engine.connect().map_err(engine_failure)?;
        log::info!(
            "Submitting {} features x {} samples to {}: {}",
            n,
            matrix.n_samples(),
            self.engine.name(),
            request.formula
        );

        let start = Instant::now();
        let (tx, rx) = mpsc::channel::<RawFitResult>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker_matrix = Arc::new(matrix.clone());
        let worker_request = Arc::new(request.clone());
        let worker =
            thread::spawn(move || fit_on_worker(session, worker_matrix, worker_request, tx, done_tx));

        let mut collected = Collected::new(n);
        let mut last_report = start;
        let mut timed_out = false;

        let status = loop {
            if cancel.is_cancelled() {
                log::warn!("Fit interrupted; keeping partial results");
                break FitStatus::Interrupted;
            }
            let mut wait = self.options.poll_interval;
            if let Some(limit) = self.options.timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    timed_out = true;
                    break FitStatus::Interrupted;
                }
                wait = wait.min(limit - elapsed);
            }

            match rx.recv_timeout(wait) {
                Ok(row) => collected.push(row),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break FitStatus::Completed,
            }

            if last_report.elapsed() >= self.options.progress_interval {
                log::info!(
                    "Analysis running, {:.1} minutes elapsed",
                    start.elapsed().as_secs_f64() / 60.0
                );
                last_report = Instant::now();
            }
        };

        let worker_result = match status {
            FitStatus::Completed => Some(worker.join()),
            FitStatus::Interrupted => {
                collected.drain(&rx);
                // Dropping the receiver makes the worker's sink answer Break
                drop(rx);
                match done_rx.recv_timeout(self.options.poll_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        log::warn!(
                            "{} is still busy; its session will be closed when it returns",
                            self.engine.name()
                        );
                        None
                    }
                    _ => Some(worker.join()),
                }
            }
        };

        if let Some(Err(_)) = worker_result {
            return Err(DiffexError::EngineFailure {
                reason: "fitting worker panicked".to_string(),
            });
        }
        if timed_out {
            return Err(DiffexError::FitTimedOut {
                seconds: start.elapsed().as_secs_f64(),
            });
        }
        if let Some(Ok(r)) = worker_result {
            r.map_err(engine_failure)?;
        }

        if let Some(i) = collected.invalid_index {
            return Err(DiffexError::InvariantViolation {
                reason: format!("engine returned an unexpected or duplicate row index {}", i),
            });
        }

        let outcome = FitOutcome {
            results: collected.results,
            status,
            elapsed: start.elapsed(),
        };
        if status == FitStatus::Completed && outcome.received() != n {
            return Err(DiffexError::InvariantViolation {
                reason: format!("expected results for {} features, got {}", n, outcome.received()),
            });
        }
        log::info!(
            "Fit finished ({:?}) with {} of {} rows in {:.1}s",
            status,
            outcome.received(),
            n,
            outcome.elapsed.as_secs_f64()
        );
        Ok(outcome)
    }
}

fn engine_failure(e: DiffexError) -> DiffexError {
    match e {
        DiffexError::EngineFailure { .. } => e,
        other => DiffexError::EngineFailure {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::data::{ExperimentalDesign, FactorKind, QuantitationType};
    use crate::design::DesignMatrixBuilder;
    use crate::fitting::engine::{MatrixHandle, ResultSink, TermFit};
    use crate::fitting::NativeEngine;
    use ndarray::Array2;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn request_and_matrix(n_features: usize) -> (FitRequest, ExpressionMatrix) {
        let mut d = ExperimentalDesign::new();
        let f = d.add_factor("treatment", FactorKind::Categorical);
        let a = d.add_value(f, "control").unwrap();
        let b = d.add_value(f, "drug").unwrap();
        for (i, v) in [a, a, b, b].iter().enumerate() {
            d.add_sample(&format!("s{}", i), &[*v]).unwrap();
        }
        let config = AnalysisConfig::builder().factor(f).build(&d).unwrap();
        let dm = DesignMatrixBuilder::new(&d).build(&config).unwrap();
        let values = Array2::from_shape_fn((n_features, 4), |(i, j)| ((i + 1) * (j + 2)) as f64 % 5.0 + j as f64);
        let matrix = ExpressionMatrix::new(
            values,
            (0..n_features).map(|i| format!("f{}", i)).collect(),
            dm.sample_names(),
            QuantitationType::default(),
        )
        .unwrap();
        (FitRequest::new(dm), matrix)
    }

    /// Scripted engine for exercising orchestration paths
    struct ScriptedEngine {
        rows: usize,
        delay: Duration,
        fail: bool,
        duplicate: bool,
        closed: Arc<AtomicUsize>,
    }

    struct ScriptedSession {
        rows: usize,
        delay: Duration,
        fail: bool,
        duplicate: bool,
        closed: Arc<AtomicUsize>,
    }

    impl FittingEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn connect(&self) -> Result<Box<dyn EngineSession>> {
            Ok(Box::new(ScriptedSession {
                rows: self.rows,
                delay: self.delay,
                fail: self.fail,
                duplicate: self.duplicate,
                closed: self.closed.clone(),
            }))
        }
    }

    impl EngineSession for ScriptedSession {
        fn assign_matrix(&mut self, _matrix: &ExpressionMatrix) -> Result<MatrixHandle> {
            Ok(MatrixHandle("x".to_string()))
        }

        fn fit_rows(&mut self, _h: &MatrixHandle, request: &FitRequest, sink: &mut ResultSink<'_>) -> Result<()> {
            for i in 0..self.rows {
                thread::sleep(self.delay);
                let index = if self.duplicate { 0 } else { i };
                let terms: BTreeMap<String, TermFit> =
                    request.terms.iter().map(|t| (t.clone(), TermFit::unavailable())).collect();
                if sink(RawFitResult { feature_index: index, terms }).is_break() {
                    return Ok(());
                }
            }
            if self.fail {
                return Err(DiffexError::invalid("connection lost"));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scripted(rows: usize, delay_ms: u64) -> ScriptedEngine {
        ScriptedEngine {
            rows,
            delay: Duration::from_millis(delay_ms),
            fail: false,
            duplicate: false,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn fast_options() -> FitOptions {
        FitOptions {
            poll_interval: Duration::from_millis(5),
            progress_interval: Duration::from_millis(20),
            timeout: None,
        }
    }

    #[test]
    fn test_native_run_completes() {
        let (request, matrix) = request_and_matrix(25);
        let engine = NativeEngine::with_chunk_size(4);
        let outcome = FittingOrchestrator::new(&engine, fast_options())
            .run(&matrix, &request, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.status, FitStatus::Completed);
        assert_eq!(outcome.received(), 25);
    }

    #[test]
    fn test_cancel_returns_partial_results() {
        let (request, matrix) = request_and_matrix(200);
        let engine = scripted(200, 2);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        let outcome = FittingOrchestrator::new(&engine, fast_options())
            .run(&matrix, &request, &cancel)
            .unwrap();
        t.join().unwrap();
        assert_eq!(outcome.status, FitStatus::Interrupted);
        assert!(outcome.received() < 200);
        assert_eq!(wait_for_close(&engine.closed), 1);
    }

    #[test]
    fn test_timeout_is_error() {
        let (request, matrix) = request_and_matrix(200);
        let engine = scripted(200, 2);
        let options = FitOptions {
            timeout: Some(Duration::from_millis(30)),
            ..fast_options()
        };
        let result = FittingOrchestrator::new(&engine, options).run(&matrix, &request, &CancellationToken::new());
        assert!(matches!(result, Err(DiffexError::FitTimedOut { .. })));
        assert_eq!(wait_for_close(&engine.closed), 1);
    }

    #[test]
    fn test_engine_error_propagates() {
        let (request, matrix) = request_and_matrix(3);
        let mut engine = scripted(3, 0);
        engine.fail = true;
        let result = FittingOrchestrator::new(&engine, fast_options()).run(&matrix, &request, &CancellationToken::new());
        assert!(matches!(result, Err(DiffexError::EngineFailure { .. })));
        assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_short_result_count_is_invariant_violation() {
        let (request, matrix) = request_and_matrix(5);
        let engine = scripted(3, 0);
        let result = FittingOrchestrator::new(&engine, fast_options()).run(&matrix, &request, &CancellationToken::new());
        assert!(matches!(result, Err(DiffexError::InvariantViolation { .. })));
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let (request, matrix) = request_and_matrix(3);
        let mut engine = scripted(3, 0);
        engine.duplicate = true;
        let result = FittingOrchestrator::new(&engine, fast_options()).run(&matrix, &request, &CancellationToken::new());
        assert!(matches!(result, Err(DiffexError::InvariantViolation { .. })));
    }

    /// Sends some rows, optionally cancels the run itself, then blocks
    struct BlockingEngine {
        rows_before_block: usize,
        block: Duration,
        cancel: Option<CancellationToken>,
        closed: Arc<AtomicUsize>,
    }

    struct BlockingSession {
        rows_before_block: usize,
        block: Duration,
        cancel: Option<CancellationToken>,
        closed: Arc<AtomicUsize>,
    }

    impl FittingEngine for BlockingEngine {
        fn name(&self) -> &str {
            "blocking"
        }

        fn connect(&self) -> Result<Box<dyn EngineSession>> {
            Ok(Box::new(BlockingSession {
                rows_before_block: self.rows_before_block,
                block: self.block,
                cancel: self.cancel.clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    impl EngineSession for BlockingSession {
        fn assign_matrix(&mut self, _matrix: &ExpressionMatrix) -> Result<MatrixHandle> {
            Ok(MatrixHandle("x".to_string()))
        }

        fn fit_rows(&mut self, _h: &MatrixHandle, request: &FitRequest, sink: &mut ResultSink<'_>) -> Result<()> {
            for i in 0..self.rows_before_block {
                let terms: BTreeMap<String, TermFit> =
                    request.terms.iter().map(|t| (t.clone(), TermFit::unavailable())).collect();
                let _ = sink(RawFitResult { feature_index: i, terms });
            }
            if let Some(cancel) = &self.cancel {
                cancel.cancel();
            }
            thread::sleep(self.block);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for_close(closed: &AtomicUsize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(10);
        while closed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        closed.load(Ordering::SeqCst)
    }

    #[test]
    fn test_timeout_does_not_wait_for_blocked_engine() {
        let (request, matrix) = request_and_matrix(10);
        let engine = BlockingEngine {
            rows_before_block: 0,
            block: Duration::from_millis(1500),
            cancel: None,
            closed: Arc::new(AtomicUsize::new(0)),
        };
        let options = FitOptions {
            timeout: Some(Duration::from_millis(50)),
            ..fast_options()
        };
        let started = Instant::now();
        let result = FittingOrchestrator::new(&engine, options).run(&matrix, &request, &CancellationToken::new());
        assert!(matches!(result, Err(DiffexError::FitTimedOut { .. })));
        assert!(started.elapsed() < Duration::from_millis(1000));
        // the worker still closes the session once the engine returns
        assert_eq!(wait_for_close(&engine.closed), 1);
    }

    #[test]
    fn test_cancel_keeps_rows_already_sent() {
        let (request, matrix) = request_and_matrix(10);
        let cancel = CancellationToken::new();
        let engine = BlockingEngine {
            rows_before_block: 6,
            block: Duration::from_millis(1500),
            cancel: Some(cancel.clone()),
            closed: Arc::new(AtomicUsize::new(0)),
        };
        let started = Instant::now();
        let outcome = FittingOrchestrator::new(&engine, fast_options())
            .run(&matrix, &request, &cancel)
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(outcome.status, FitStatus::Interrupted);
        assert_eq!(outcome.received(), 6);
        assert!(outcome.results[..6].iter().all(|r| r.is_some()));
        assert_eq!(wait_for_close(&engine.closed), 1);
    }

    #[test]
    fn test_sample_order_checked() {
        let (request, matrix) = request_and_matrix(3);
        let mut names = matrix.sample_names().to_vec();
        names.reverse();
        let shuffled = matrix.select_samples(&names).unwrap();
        let engine = NativeEngine::new();
        let result = FittingOrchestrator::new(&engine, fast_options()).run(&shuffled, &request, &CancellationToken::new());
        assert!(matches!(result, Err(DiffexError::DimensionMismatch { .. })));
    }
}
