//! Hosting the tick loop for async collaborators.
//!
//! The engine sits behind a `parking_lot::Mutex`. The runner drives it on a
//! tokio blocking task in batches and drops the lock between batches, so
//! other holders of the handle only ever observe tick-aligned state.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::{self, JoinHandle};
use tracing::debug;

use crate::engine::{ControlHandle, Engine, RunSummary, StopReason};
use crate::error::EngineError;

pub type SharedEngine = Arc<Mutex<Engine>>;

#[derive(Debug, Clone)]
pub struct SimulationRunner {
    engine: SharedEngine,
    control: ControlHandle,
    batch: u64,
}

impl SimulationRunner {
    pub fn new(engine: Engine) -> Self {
        Self::from_shared(Arc::new(Mutex::new(engine)))
    }

    pub fn from_shared(engine: SharedEngine) -> Self {
        let control = engine.lock().control();
        SimulationRunner {
            engine,
            control,
            batch: 1024,
        }
    }

    /// Ticks run per lock acquisition.
    pub fn with_batch(mut self, ticks: u64) -> Self {
        self.batch = ticks.max(1);
        self
    }

    pub fn engine(&self) -> SharedEngine {
        Arc::clone(&self.engine)
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Start running on the blocking pool.
    pub fn spawn(&self) -> JoinHandle<Result<RunSummary, EngineError>> {
        let engine = Arc::clone(&self.engine);
        let batch = self.batch;
        task::spawn_blocking(move || run_batches(&engine, batch))
    }

    /// Run until the engine stops for any reason other than a finished batch.
    pub async fn run(&self) -> Result<RunSummary, EngineError> {
        match self.spawn().await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => {
                let engine = self.engine.lock();
                Ok(RunSummary {
                    ticks: 0,
                    tick: engine.tick(),
                    reason: StopReason::Cancelled,
                })
            }
        }
    }
}

fn run_batches(engine: &Mutex<Engine>, batch: u64) -> Result<RunSummary, EngineError> {
    let mut ticks = 0;
    loop {
        let summary = engine.lock().run_batch(batch)?;
        ticks += summary.ticks;
        if summary.reason != StopReason::Completed {
            debug!(ticks, reason = ?summary.reason, "runner finished");
            return Ok(RunSummary { ticks, ..summary });
        }
        std::thread::yield_now();
    }
}
