use std::{future::pending, pin::Pin, time::Duration};

use tokio::time::{Sleep, sleep};

/// Self-resetting timer for the `info` poll. At most one deadline is ever pending.
#[derive(Debug, Default)]
pub(crate) struct RefreshTimer {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl RefreshTimer {
    /// Schedule the next tick, replacing any pending one.
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Box::pin(sleep(after)));
    }

    /// Drop the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the pending deadline passes; never resolves while disarmed.
    pub async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.await;
                self.deadline = None;
            }
            None => pending().await,
        }
    }
}
