//! Progress reporting for the publication saga.
//!
//! The saga emits [`SagaEvent`]s through a [`SagaReporter`], keeping log
//! formatting and metrics collection out of the state machine.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Events emitted while consuming `item.vectorized` and `dataset.publish`.
#[derive(Debug, Clone)]
pub enum SagaEvent<'a> {
    /// Startup finished: token acquired and dataset resolved.
    Started {
        /// Dataset receiving item resources
        dataset_id: &'a str,
        /// Workers on `item.vectorized`
        workers: usize,
        /// Workers on `dataset.publish`
        dataset_workers: usize,
    },

    WorkerStarted {
        worker: usize,
    },

    /// A delivery arrived.
    MessageReceived {
        worker: usize,
        /// 1-based delivery count
        attempt: u32,
    },

    /// The bus failed to hand out the next delivery.
    ReceiveFailed {
        worker: usize,
        /// Failures in a row, this one included
        consecutive: u32,
        /// Failures in a row that halt the consumer
        max_consecutive: u32,
        error: &'a str,
    },

    ItemPublished {
        item_id: &'a str,
        dataset_id: &'a str,
        resource_id: &'a str,
        attempt: u32,
    },

    /// The ledger already held a publication record; no external call made.
    DuplicateSkipped {
        item_id: &'a str,
    },

    /// Ledger bookkeeping failed after a confirmed submission.
    LedgerWriteFailed {
        item_id: &'a str,
        error: &'a str,
    },

    /// A gateway dataset was accepted by the portal.
    DatasetPublished {
        /// Gateway-side id
        dataset_id: &'a str,
        /// Id assigned by the portal
        dane_gov_id: &'a str,
        attempt: u32,
    },

    /// A completion event could not be published after the portal confirmed.
    AnnouncementFailed {
        routing_key: &'a str,
        /// Item or dataset id the event is about
        id: &'a str,
        error: &'a str,
    },

    Requeued {
        /// Item or dataset id, `None` when the payload did not parse
        message_id: Option<&'a str>,
        attempt: u32,
        max_attempts: u32,
        error: &'a str,
    },

    /// Terminal failure: permanent error, or retries exhausted.
    DeadLettered {
        /// Item or dataset id, `None` when the payload did not parse
        message_id: Option<&'a str>,
        attempt: u32,
        error: &'a str,
    },

    /// A fatal error stopped consumption.
    Halted {
        worker: usize,
        error: &'a str,
    },

    WorkerStopped {
        worker: usize,
    },

    Stopped {
        stats: &'a SagaStats,
    },
}

/// Trait for reporting saga progress.
///
/// The default implementation does nothing (silent mode).
pub trait SagaReporter: Send + Sync {
    fn report(&self, event: SagaEvent<'_>) {
        let _ = event;
    }
}

/// A no-op reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl SagaReporter for SilentReporter {}

/// A reporter that logs events using the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SagaReporter for TracingReporter {
    fn report(&self, event: SagaEvent<'_>) {
        use tracing::{debug, error, info, warn};

        match event {
            SagaEvent::Started {
                dataset_id,
                workers,
                dataset_workers,
            } => {
                info!(dataset_id, workers, dataset_workers, "Publisher ready");
            }
            SagaEvent::WorkerStarted { worker } => {
                debug!(worker, "Worker started");
            }
            SagaEvent::MessageReceived { worker, attempt } => {
                debug!(worker, attempt, "Received message");
            }
            SagaEvent::ReceiveFailed {
                worker,
                consecutive,
                max_consecutive,
                error,
            } => {
                warn!(worker, consecutive, max_consecutive, error, "Failed to receive message");
            }
            SagaEvent::ItemPublished {
                item_id,
                dataset_id,
                resource_id,
                attempt,
            } => {
                info!(item_id, dataset_id, resource_id, attempt, "Item published");
            }
            SagaEvent::DuplicateSkipped { item_id } => {
                info!(item_id, "Item already published, re-emitting completion event");
            }
            SagaEvent::LedgerWriteFailed { item_id, error } => {
                warn!(item_id, error, "Failed to record publication in ledger");
            }
            SagaEvent::DatasetPublished {
                dataset_id,
                dane_gov_id,
                attempt,
            } => {
                info!(dataset_id, dane_gov_id, attempt, "Dataset published");
            }
            SagaEvent::AnnouncementFailed {
                routing_key,
                id,
                error,
            } => {
                error!(routing_key, id, error, "Failed to announce publication");
            }
            SagaEvent::Requeued {
                message_id,
                attempt,
                max_attempts,
                error,
            } => {
                warn!(?message_id, attempt, max_attempts, error, "Publication failed, requeued");
            }
            SagaEvent::DeadLettered {
                message_id,
                attempt,
                error,
            } => {
                error!(?message_id, attempt, error, "Message dead-lettered");
            }
            SagaEvent::Halted { worker, error } => {
                error!(worker, error, "Fatal error, consumption halted");
            }
            SagaEvent::WorkerStopped { worker } => {
                debug!(worker, "Worker stopped");
            }
            SagaEvent::Stopped { stats } => {
                info!(
                    published = stats.published,
                    datasets_published = stats.datasets_published,
                    duplicates = stats.duplicates,
                    requeued = stats.requeued,
                    dead_lettered = stats.dead_lettered,
                    "Publisher stopped"
                );
            }
        }
    }
}

/// Counters for one run of the saga.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SagaStats {
    /// Items submitted to the portal
    pub published: usize,
    /// Gateway datasets submitted to the portal
    pub datasets_published: usize,
    /// Redelivered items found in the ledger
    pub duplicates: usize,
    /// Deliveries sent back for another attempt
    pub requeued: usize,
    /// Deliveries dropped or terminated
    pub dead_lettered: usize,
}

impl SagaStats {
    /// Deliveries that reached a terminal state.
    pub fn total(&self) -> usize {
        self.published + self.datasets_published + self.duplicates + self.requeued + self.dead_lettered
    }
}

/// Thread-safe counterpart of [`SagaStats`] shared by workers.
#[derive(Debug, Default)]
pub struct AtomicSagaStats {
    published: AtomicUsize,
    datasets_published: AtomicUsize,
    duplicates: AtomicUsize,
    requeued: AtomicUsize,
    dead_lettered: AtomicUsize,
}

impl AtomicSagaStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dataset_published(&self) {
        self.datasets_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_stats(&self) -> SagaStats {
        SagaStats {
            published: self.published.load(Ordering::Relaxed),
            datasets_published: self.datasets_published.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_reporter_does_nothing() {
        let reporter = SilentReporter;
        reporter.report(SagaEvent::WorkerStarted { worker: 0 });
    }

    #[test]
    fn test_tracing_reporter_handles_all_events() {
        let reporter = TracingReporter;
        let stats = SagaStats::default();

        reporter.report(SagaEvent::Started {
            dataset_id: "ds-1",
            workers: 2,
            dataset_workers: 1,
        });
        reporter.report(SagaEvent::WorkerStarted { worker: 0 });
        reporter.report(SagaEvent::MessageReceived {
            worker: 0,
            attempt: 1,
        });
        reporter.report(SagaEvent::ReceiveFailed {
            worker: 0,
            consecutive: 2,
            max_consecutive: 10,
            error: "consumer not found",
        });
        reporter.report(SagaEvent::ItemPublished {
            item_id: "i-1",
            dataset_id: "ds-1",
            resource_id: "r-1",
            attempt: 1,
        });
        reporter.report(SagaEvent::DuplicateSkipped { item_id: "i-1" });
        reporter.report(SagaEvent::LedgerWriteFailed {
            item_id: "i-1",
            error: "connection reset",
        });
        reporter.report(SagaEvent::DatasetPublished {
            dataset_id: "gw-1",
            dane_gov_id: "pl-1",
            attempt: 1,
        });
        reporter.report(SagaEvent::AnnouncementFailed {
            routing_key: "dataset.published",
            id: "gw-1",
            error: "no responders",
        });
        reporter.report(SagaEvent::Requeued {
            message_id: Some("i-2"),
            attempt: 1,
            max_attempts: 3,
            error: "HTTP 500",
        });
        reporter.report(SagaEvent::DeadLettered {
            message_id: None,
            attempt: 1,
            error: "bad json",
        });
        reporter.report(SagaEvent::Halted {
            worker: 0,
            error: "login failed",
        });
        reporter.report(SagaEvent::WorkerStopped { worker: 0 });
        reporter.report(SagaEvent::Stopped { stats: &stats });
    }

    #[test]
    fn test_atomic_stats() {
        let stats = AtomicSagaStats::new();
        stats.record_published();
        stats.record_published();
        stats.record_duplicate();
        stats.record_dataset_published();
        stats.record_requeued();
        stats.record_dead_lettered();

        let snapshot = stats.to_stats();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.requeued, 1);
        assert_eq!(snapshot.dead_lettered, 1);
        assert_eq!(snapshot.datasets_published, 1);
        assert_eq!(snapshot.total(), 6);
    }
}
