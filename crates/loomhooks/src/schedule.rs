use loomcore::{TriggerMessage, WorkflowId};
use std::future::Future;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Timer trigger: submits a synthetic trigger message on a fixed period
/// until stopped. Submission goes through the same mediator path as
/// every other trigger origin.
pub struct IntervalSchedule {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl IntervalSchedule {
    pub fn spawn<F, Fut>(period: Duration, workflow_id: WorkflowId, submit: F) -> Self
    where
        F: Fn(TriggerMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; consume it so the first
            // submission happens one full period after spawn.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        tracing::debug!(workflow_id = %workflow_id, "interval tick");
                        submit(TriggerMessage::scheduled(workflow_id)).await;
                    }
                }
            }
        });
        Self { token, handle }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for IntervalSchedule {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn submits_one_trigger_per_period() {
        let workflow_id = Uuid::new_v4();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let schedule = IntervalSchedule::spawn(
            Duration::from_secs(60),
            workflow_id,
            move |trigger| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(trigger);
                }
            },
        );

        let first = rx.recv().await.expect("first tick");
        assert_eq!(first.workflow_id, workflow_id);
        assert_eq!(first.method, "SCHEDULE");

        let second = rx.recv().await.expect("second tick");
        assert_eq!(second.workflow_id, workflow_id);

        schedule.stop();
        // Once stopped the task drains and the sender side closes.
        while rx.recv().await.is_some() {}
        assert!(rx.recv().await.is_none());
    }
}
