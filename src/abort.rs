//! Cancellation primitives.
//!
//! Every operation wrapper runs its handler under an *effective signal*:
//! the merge of the caller-supplied signal, an optional timeout, and the
//! per-request signal the dispatcher fires on kernel interrupt or
//! session shutdown. A fired signal surfaces as `ECANCELED`, except for
//! timers which surface as `ETIMEDOUT`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;

use crate::error::{Errno, FsError, FsResult};

/// Why a signal fired. The first reason wins; later aborts are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller-supplied signal was aborted.
    User,
    /// The kernel interrupted the pending request.
    Interrupted,
    /// The session is shutting down.
    Shutdown,
    /// The deadline elapsed.
    Timeout,
}

impl AbortReason {
    /// The error an aborted wrapper fails with.
    pub fn to_error(self) -> FsError {
        match self {
            AbortReason::Timeout => Errno::ETIMEDOUT.into(),
            _ => Errno::ECANCELED.into(),
        }
    }
}

/// The firing side of a cancellation source.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<Option<AbortReason>>,
}

impl AbortHandle {
    /// Creates a fresh source and its observation side.
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(None);
        (AbortHandle { tx }, AbortSignal { rx, _keep: None })
    }

    /// Fires the source. Only the first reason is observed.
    pub fn abort(&self, reason: AbortReason) {
        self.tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Another observation side for the same source.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
            _keep: None,
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        AbortHandle::new().0
    }
}

/// The observation side of a cancellation source.
///
/// Dropping the last `AbortHandle` without firing leaves the signal
/// permanently unfired, matching a caller that forgets its controller.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<AbortReason>>,
    // Keeps a never-firing sender alive for `never()`.
    _keep: Option<Arc<watch::Sender<Option<AbortReason>>>>,
}

impl AbortSignal {
    /// A signal that can never fire.
    pub fn never() -> AbortSignal {
        let (tx, rx) = watch::channel(None);
        AbortSignal {
            rx,
            _keep: Some(Arc::new(tx)),
        }
    }

    /// A signal that fires with [`AbortReason::Timeout`] after `after`.
    pub fn timeout(after: Duration) -> AbortSignal {
        let (handle, signal) = AbortHandle::new();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            handle.abort(AbortReason::Timeout);
        });
        signal
    }

    /// A signal that fires when any of `signals` fires, with the reason
    /// of whichever fired first. No inputs yields [`AbortSignal::never`].
    pub fn merge(signals: impl IntoIterator<Item = AbortSignal>) -> AbortSignal {
        let mut signals: Vec<AbortSignal> = signals.into_iter().collect();
        match signals.len() {
            0 => return AbortSignal::never(),
            1 => return signals.pop().expect("length checked"),
            _ => {}
        }
        if let Some(reason) = signals.iter().find_map(AbortSignal::aborted) {
            let (tx, rx) = watch::channel(Some(reason));
            drop(tx);
            return AbortSignal { rx, _keep: None };
        }
        let (handle, merged) = AbortHandle::new();
        tokio::spawn(async move {
            let futures: Vec<_> = signals
                .iter()
                .map(|signal| Box::pin(signal.fired()))
                .collect();
            let (reason, _, _) = select_all(futures).await;
            handle.abort(reason);
        });
        merged
    }

    /// The reason this signal fired, if it has.
    pub fn aborted(&self) -> Option<AbortReason> {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Never resolves for a signal whose
    /// source was dropped unfired.
    pub async fn fired(&self) -> AbortReason {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = *rx.borrow() {
                return reason;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Fails with the signal's error if it has already fired.
    pub fn check(&self) -> FsResult<()> {
        match self.aborted() {
            Some(reason) => Err(reason.to_error()),
            None => Ok(()),
        }
    }
}

/// Per-invocation cancellation options accepted by every wrapper.
#[derive(Debug, Clone, Default)]
pub struct AbortOptions {
    /// External cancellation source supplied by the caller.
    pub signal: Option<AbortSignal>,
    /// Deadline for this invocation; `None` or zero means no deadline.
    pub timeout: Option<Duration>,
}

impl AbortOptions {
    /// Options with only a timeout, validated from raw milliseconds.
    /// Negative values fail with `EINVAL`.
    pub fn with_timeout_ms(ms: i64) -> FsResult<AbortOptions> {
        if ms < 0 {
            return Err(FsError::with_message(Errno::EINVAL, "negative timeout"));
        }
        Ok(AbortOptions {
            signal: None,
            timeout: Some(Duration::from_millis(ms as u64)),
        })
    }

    /// The merged signal a wrapper runs under: the caller's signal, the
    /// timeout (when non-zero), and the dispatcher's per-request signal.
    pub fn effective_signal(&self, request: AbortSignal) -> AbortSignal {
        let mut inputs = vec![request];
        if let Some(signal) = &self.signal {
            inputs.push(signal.clone());
        }
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => inputs.push(AbortSignal::timeout(timeout)),
            _ => {}
        }
        AbortSignal::merge(inputs)
    }
}

/// Runs `task` to completion unless `signal` fires first.
///
/// A signal that fired before the call fails without polling the task.
pub async fn race_with_abort<T, F>(task: F, signal: &AbortSignal) -> FsResult<T>
where
    F: Future<Output = FsResult<T>>,
{
    signal.check()?;
    tokio::select! {
        biased;
        reason = signal.fired() => Err(reason.to_error()),
        result = task => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_is_observable() {
        let (handle, signal) = AbortHandle::new();
        assert_eq!(signal.aborted(), None);
        handle.abort(AbortReason::User);
        assert_eq!(signal.aborted(), Some(AbortReason::User));
        // First reason wins.
        handle.abort(AbortReason::Timeout);
        assert_eq!(signal.aborted(), Some(AbortReason::User));
    }

    #[tokio::test]
    async fn timeout_signal_fires_with_timeout_reason() {
        let signal = AbortSignal::timeout(Duration::from_millis(10));
        assert_eq!(signal.fired().await, AbortReason::Timeout);
        assert_eq!(signal.check().unwrap_err().errno(), Errno::ETIMEDOUT);
    }

    #[tokio::test]
    async fn merge_of_nothing_never_fires() {
        let signal = AbortSignal::merge([]);
        let raced = race_with_abort(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(7)
            },
            &signal,
        )
        .await;
        assert_eq!(raced.unwrap(), 7);
    }

    #[tokio::test]
    async fn merge_forwards_first_firing_input() {
        let (handle, a) = AbortHandle::new();
        let b = AbortSignal::never();
        let merged = AbortSignal::merge([a, b]);
        handle.abort(AbortReason::Shutdown);
        assert_eq!(merged.fired().await, AbortReason::Shutdown);
    }

    #[tokio::test]
    async fn merge_of_already_fired_input_is_fired() {
        let (handle, a) = AbortHandle::new();
        handle.abort(AbortReason::Interrupted);
        let merged = AbortSignal::merge([AbortSignal::never(), a]);
        assert_eq!(merged.aborted(), Some(AbortReason::Interrupted));
    }

    #[tokio::test]
    async fn race_prefers_abort_over_pending_task() {
        let (handle, signal) = AbortHandle::new();
        handle.abort(AbortReason::Interrupted);
        let raced: FsResult<()> = race_with_abort(
            async {
                std::future::pending::<()>().await;
                unreachable!()
            },
            &signal,
        )
        .await;
        assert_eq!(raced.unwrap_err().errno(), Errno::ECANCELED);
    }

    #[tokio::test]
    async fn effective_signal_times_out() {
        let options = AbortOptions::with_timeout_ms(10).unwrap();
        let signal = options.effective_signal(AbortSignal::never());
        let raced: FsResult<()> = race_with_abort(
            async {
                std::future::pending::<()>().await;
                unreachable!()
            },
            &signal,
        )
        .await;
        assert_eq!(raced.unwrap_err().errno(), Errno::ETIMEDOUT);
    }

    #[tokio::test]
    async fn negative_timeout_is_rejected() {
        assert_eq!(
            AbortOptions::with_timeout_ms(-1).unwrap_err().errno(),
            Errno::EINVAL
        );
    }
}
