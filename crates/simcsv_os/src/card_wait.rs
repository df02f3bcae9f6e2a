#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use simcsv_kernel_contracts::card::{CardIoError, CardReader};
use tracing::{debug, info};

/// Shared stop flag for a card wait. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
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
pub struct CardWaitConfig {
    pub poll_interval: Duration,
    /// `None` waits until a card shows up or the wait is cancelled.
    pub timeout: Option<Duration>,
}

impl CardWaitConfig {
    pub fn mvp_v1() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            timeout: None,
        }
    }
}

/// Polls `reader` until a card is inserted. Returns `None` on cancellation or
/// timeout; a session that arrives after cancellation is dropped.
pub fn wait_for_card<R: CardReader>(
    reader: &mut R,
    config: &CardWaitConfig,
    cancel: &CancelToken,
) -> Result<Option<R::Session>, CardIoError> {
    let started = Instant::now();
    info!("waiting for card");
    loop {
        if cancel.is_cancelled() {
            info!("card wait cancelled");
            return Ok(None);
        }
        if let Some(limit) = config.timeout {
            if started.elapsed() >= limit {
                info!(waited_ms = started.elapsed().as_millis() as u64, "card wait timed out");
                return Ok(None);
            }
        }
        if let Some(session) = reader.poll_for_card(config.poll_interval)? {
            if cancel.is_cancelled() {
                debug!("card arrived after cancellation, releasing it");
                return Ok(None);
            }
            info!("card inserted");
            return Ok(Some(session));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcsv_storage::card_image::{CardImage, CardImageReader, SimulatedCard};
    use std::thread;

    const IMAGE: &str = r#"{
        "schema_version": 1,
        "capabilities": { "supports_context_a": true, "supports_context_b": false },
        "adm_pin": "3132333435363738",
        "objects": []
    }"#;

    fn card() -> SimulatedCard {
        SimulatedCard::from_image(&CardImage::from_json(IMAGE).unwrap()).unwrap()
    }

    fn fast() -> CardWaitConfig {
        CardWaitConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn at_card_wait_01_returns_session_once_inserted() {
        let mut reader = CardImageReader::inserted_after(card(), 3);
        let session = wait_for_card(&mut reader, &fast(), &CancelToken::new()).unwrap();
        assert!(session.is_some());
    }

    #[test]
    fn at_card_wait_02_cancelled_wait_yields_no_session() {
        let mut reader = CardImageReader::new(card());
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(wait_for_card(&mut reader, &fast(), &cancel)
            .unwrap()
            .is_none());
    }

    #[test]
    fn at_card_wait_03_cancel_from_another_thread() {
        let mut reader = CardImageReader::inserted_after(card(), usize::MAX);
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let config = CardWaitConfig {
            poll_interval: Duration::from_millis(1),
            timeout: None,
        };
        assert!(wait_for_card(&mut reader, &config, &cancel).unwrap().is_none());
        canceller.join().unwrap();
    }

    #[test]
    fn at_card_wait_04_timeout_yields_no_session() {
        let mut reader = CardImageReader::inserted_after(card(), usize::MAX);
        let config = CardWaitConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_millis(10)),
        };
        assert!(wait_for_card(&mut reader, &config, &CancelToken::new())
            .unwrap()
            .is_none());
    }
}
