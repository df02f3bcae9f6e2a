#![forbid(unsafe_code)]

//! Runs the mutating half of a pass off the caller's thread. The caller
//! prepares the pass (and asks the operator) first; the card session then
//! moves into the worker and comes back from `join`.

use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use simcsv_engines::registry::FieldRegistry;
use simcsv_kernel_contracts::card::CardCommands;
use thiserror::Error;
use tracing::{debug, error};

use crate::provision::{
    PassReport, PreparedPass, Progress, ProvisionConfig, ProvisionError, ProvisionRuntime,
};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("provisioning worker panicked")]
    Panicked,
}

pub type PassResult = Result<PassReport, ProvisionError>;

#[derive(Debug)]
pub struct PassHandle<C> {
    progress: Receiver<Progress>,
    worker: JoinHandle<(C, PassResult)>,
}

impl<C> PassHandle<C> {
    /// Progress events in field order. The channel closes when the pass ends.
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the pass and hands the card session back.
    pub fn join(self) -> Result<(C, PassResult), DriverError> {
        self.worker.join().map_err(|_| {
            error!("provisioning worker panicked");
            DriverError::Panicked
        })
    }
}

/// `config` must be the one `prepared` came out of.
pub fn spawn_execute<C>(
    mut card: C,
    config: ProvisionConfig,
    registry: &'static FieldRegistry,
    prepared: PreparedPass,
) -> PassHandle<C>
where
    C: CardCommands + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let runtime = ProvisionRuntime::new(config, registry);
        let result = runtime.execute(&mut card, prepared, |p| {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(p.clone());
        });
        debug!(ok = result.is_ok(), "provisioning worker finished");
        (card, result)
    });
    PassHandle {
        progress: rx,
        worker,
    }
}
