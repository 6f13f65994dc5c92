//! Timers that drive gossip and anti-entropy rounds.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::content::KnowledgeContent;
use crate::error::{GossipError, GossipResult};
use crate::protocol::KnowledgeGossip;
use crate::transport::RoundKind;

/// Handle to the running round drivers. Dropping it stops them.
#[derive(Debug)]
pub(crate) struct Scheduler {
    stop: watch::Sender<bool>,
}

impl<C: KnowledgeContent> KnowledgeGossip<C> {
    /// Arm the gossip timer and, for kinds that support it, the
    /// anti-entropy timer. The first round fires one interval from now.
    ///
    /// Calling `start` on a running instance does nothing. Must be called
    /// from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> GossipResult<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Ok(());
        }
        let rt = tokio::runtime::Handle::try_current().map_err(GossipError::other)?;
        let (stop, stop_rx) = watch::channel(false);

        rt.spawn(drive(
            Arc::downgrade(self),
            stop_rx.clone(),
            self.tuning().gossip_interval(),
            RoundKind::Gossip,
        ));
        if C::KIND.supports_anti_entropy() {
            rt.spawn(drive(
                Arc::downgrade(self),
                stop_rx,
                self.tuning().anti_entropy_interval(),
                RoundKind::AntiEntropy,
            ));
        }

        *scheduler = Some(Scheduler { stop });
        tracing::info!(agent = %self.agent_id(), kind = %C::KIND, "gossip started");
        Ok(())
    }

    /// Disarm both timers. A round already in flight runs to completion but
    /// no new round is started. Calling `stop` more than once is harmless.
    pub fn stop(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            // receivers may already be gone if the drivers exited
            let _ = scheduler.stop.send(true);
            tracing::info!(agent = %self.agent_id(), kind = %C::KIND, "gossip stopped");
        }
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }
}

async fn drive<C: KnowledgeContent>(
    weak: Weak<KnowledgeGossip<C>>,
    mut stop: watch::Receiver<bool>,
    period: Duration,
    kind: RoundKind,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => (),
            _ = stop.changed() => break,
        }
        let Some(this) = weak.upgrade() else {
            break;
        };
        match kind {
            RoundKind::Gossip => {
                this.run_gossip_round().await;
            }
            RoundKind::AntiEntropy => {
                this.run_anti_entropy_round().await;
            }
        }
    }
    tracing::trace!(%kind, "round driver exited");
}
