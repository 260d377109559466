//! Lifecycle of the consumer loops.

use std::sync::Arc;

use event_bus::{EventBus, Topology};
use fulfillment::{
    EventEmitter, NotificationDispatcher, Notifier, ReservationWorker, ShutdownTrigger,
};
use order_store::OrderStore;
use tokio::task::JoinHandle;

use crate::ServiceError;

/// The running reservation loop and the two notification loops.
pub struct Workers {
    trigger: ShutdownTrigger,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Starts every loop. The topology must already be declared.
    ///
    /// If a loop fails to start, the ones already running are stopped.
    pub async fn start<S, B, N>(
        store: S,
        bus: Arc<B>,
        topology: &Topology,
        notifier: N,
    ) -> Result<Self, ServiceError>
    where
        S: OrderStore + 'static,
        B: EventBus + 'static,
        N: Notifier + 'static,
    {
        let (trigger, shutdown) = ShutdownTrigger::new();
        let emitter = EventEmitter::new(Arc::clone(&bus), topology.exchange.clone());

        let reservations = Arc::new(ReservationWorker::new(store, emitter, topology));
        let mut handles = vec![
            reservations
                .spawn(&*bus, &topology.placed_queue, &shutdown)
                .await?,
        ];

        let notifications = Arc::new(NotificationDispatcher::new(notifier));
        match notifications.spawn(&*bus, topology, &shutdown).await {
            Ok(started) => handles.extend(started),
            Err(e) => {
                Self { trigger, handles }.shutdown().await;
                return Err(e.into());
            }
        }

        tracing::info!(loops = handles.len(), "workers started");
        Ok(Self { trigger, handles })
    }

    /// Returns the number of loops still running.
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Signals every loop and waits for them to finish their current message.
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
        tracing::info!("workers stopped");
    }
}
