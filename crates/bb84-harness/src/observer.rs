//! Timestamped capture of runtime notices.

use std::time::{Duration, Instant};

use bb84_core::{Environment, Generation, SessionAction};
use bb84_runtime::RuntimeNotice;
use tokio::sync::mpsc;

/// A notice and the virtual time it was received.
#[derive(Debug, Clone)]
pub struct TimedNotice {
    /// Receive time.
    pub at: Instant,
    /// The notice.
    pub notice: RuntimeNotice,
}

/// Consumes a runtime's notice stream and keeps everything it saw.
#[derive(Debug)]
pub struct Observer<E> {
    env: E,
    notices: mpsc::UnboundedReceiver<RuntimeNotice>,
    seen: Vec<TimedNotice>,
}

impl<E: Environment> Observer<E> {
    /// Observe `notices`, stamping them with `env`'s clock.
    pub fn new(env: E, notices: mpsc::UnboundedReceiver<RuntimeNotice>) -> Self {
        Self { env, notices, seen: Vec::new() }
    }

    /// Every notice received so far.
    pub fn seen(&self) -> &[TimedNotice] {
        &self.seen
    }

    /// Receive until a notice satisfies `matches`.
    ///
    /// Returns `None` if `limit` elapses or the stream closes first.
    pub async fn wait_for(
        &mut self,
        limit: Duration,
        mut matches: impl FnMut(&RuntimeNotice) -> bool,
    ) -> Option<RuntimeNotice> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notice = tokio::time::timeout_at(deadline, self.notices.recv()).await.ok()??;
            self.seen.push(TimedNotice { at: self.env.now(), notice: notice.clone() });
            if matches(&notice) {
                return Some(notice);
            }
        }
    }

    /// Receive everything that arrives within `duration`.
    pub async fn drain_for(&mut self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        while let Ok(Some(notice)) = tokio::time::timeout_at(deadline, self.notices.recv()).await {
            self.seen.push(TimedNotice { at: self.env.now(), notice });
        }
    }

    /// Append times and indices for `generation`, in receive order.
    pub fn appends(&self, generation: Generation) -> Vec<(Instant, usize)> {
        self.session_actions()
            .filter_map(|(at, action)| match action {
                SessionAction::RecordAppended { generation: g, index, .. } if *g == generation => {
                    Some((at, *index))
                },
                _ => None,
            })
            .collect()
    }

    /// Interception signal changes for `generation`, in receive order.
    pub fn signals(&self, generation: Generation) -> Vec<(Instant, bool)> {
        self.session_actions()
            .filter_map(|(at, action)| match action {
                SessionAction::InterceptionSignal { generation: g, active } if *g == generation => {
                    Some((at, *active))
                },
                _ => None,
            })
            .collect()
    }

    fn session_actions(&self) -> impl Iterator<Item = (Instant, &SessionAction)> {
        self.seen.iter().filter_map(|timed| match &timed.notice {
            RuntimeNotice::Session(action) => Some((timed.at, action)),
            RuntimeNotice::Message(_) | RuntimeNotice::Stopped => None,
        })
    }
}
