//! Progress reporting and cancellation for concurrent packaging.
//!
//! Packaging jobs never touch shared counters. Each job sends
//! [`PackEvent`]s over a channel and a single aggregator owns the
//! finished/total pair, so reported percentages only ever go up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CollectionError, Result};

/// Message sent by a packaging job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackEvent {
    /// The mod needed no extra work, drop it from the denominator
    Skipped { mod_name: String },
    /// One unit of real work completed
    Finished { mod_name: String },
    /// Something is happening, no count change
    Step { text: String },
}

/// A progress update as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub text: String,
}

/// Callback receiving progress updates
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Owns the finished/total accounting for one operation
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    total: usize,
    finished: usize,
    last_percent: u8,
}

impl ProgressAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            finished: 0,
            last_percent: 0,
        }
    }

    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    /// Fold one event in and return the resulting update
    pub fn apply(&mut self, event: PackEvent) -> ProgressUpdate {
        let text = match event {
            PackEvent::Skipped { mod_name } => {
                self.total = self.total.saturating_sub(1);
                mod_name
            }
            PackEvent::Finished { mod_name } => {
                self.finished += 1;
                mod_name
            }
            PackEvent::Step { text } => text,
        };

        let current = if self.total == 0 {
            100
        } else {
            (self.finished.min(self.total) * 100 / self.total) as u8
        };
        self.last_percent = self.last_percent.max(current);

        ProgressUpdate {
            percent: self.last_percent,
            text,
        }
    }
}

/// Spawn the aggregator task. It ends when every sender is dropped.
pub fn spawn_aggregator(
    mut rx: mpsc::UnboundedReceiver<PackEvent>,
    total: usize,
    on_update: Option<ProgressFn>,
) -> JoinHandle<ProgressAggregator> {
    tokio::spawn(async move {
        let mut aggregator = ProgressAggregator::new(total);
        while let Some(event) = rx.recv().await {
            let update = aggregator.apply(event);
            if let Some(cb) = &on_update {
                cb(update);
            }
        }
        aggregator
    })
}

/// Shared flag telling an operation to stop after the current phase
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(UserCanceled)` once canceled
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(CollectionError::UserCanceled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn finished(name: &str) -> PackEvent {
        PackEvent::Finished {
            mod_name: name.into(),
        }
    }

    fn skipped(name: &str) -> PackEvent {
        PackEvent::Skipped {
            mod_name: name.into(),
        }
    }

    #[test]
    fn test_percentages_are_monotonic() {
        let mut agg = ProgressAggregator::new(4);
        assert_eq!(agg.apply(finished("a")).percent, 25);
        assert_eq!(agg.apply(skipped("b")).percent, 33);
        assert_eq!(agg.apply(PackEvent::Step { text: "x".into() }).percent, 33);
        assert_eq!(agg.apply(finished("c")).percent, 66);
        assert_eq!(agg.apply(finished("d")).percent, 100);
        // a late skip can't push it backwards or past 100
        assert_eq!(agg.apply(skipped("e")).percent, 100);
    }

    #[test]
    fn test_everything_skipped() {
        let mut agg = ProgressAggregator::new(1);
        assert_eq!(agg.apply(skipped("a")).percent, 100);
    }

    #[tokio::test]
    async fn test_aggregator_task() {
        let (tx, rx) = mpsc::unbounded_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = spawn_aggregator(
            rx,
            2,
            Some(Arc::new(move |u: ProgressUpdate| sink.lock().unwrap().push(u.percent))),
        );

        let tx2 = tx.clone();
        tokio::spawn(async move { tx2.send(finished("a")).unwrap() })
            .await
            .unwrap();
        tx.send(finished("b")).unwrap();
        drop(tx);

        let agg = handle.await.unwrap();
        assert_eq!(agg.percent(), 100);
        assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.check().unwrap_err().is_user_canceled());
    }
}
