//! Row-wise linear model fitting

mod engine;
mod least_squares;
mod native;
mod orchestrator;

pub use engine::{
    finite, ContrastFit, EngineSession, FitRequest, FittingEngine, MatrixHandle, RawFitResult, ResultSink, TermFit,
};
pub use least_squares::{least_squares, LeastSquaresFit};
pub use native::{NativeEngine, DEFAULT_CHUNK_SIZE};
pub use orchestrator::{CancellationToken, FitOptions, FitOutcome, FitStatus, FittingOrchestrator};
