use crate::traits::StateObserver;
use crate::types::PlanningSnapshot;

/// Snapshot bus using tokio broadcast channel.
/// All subscribers receive all snapshots, in publication order.
pub struct SnapshotBus {
    tx: tokio::sync::broadcast::Sender<PlanningSnapshot>,
}

impl SnapshotBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, snapshot: PlanningSnapshot) {
        // Ignore error if no receivers
        let _ = self.tx.send(snapshot);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlanningSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for SnapshotBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StateObserver for SnapshotBus {
    fn on_state_update(&self, snapshot: &PlanningSnapshot) {
        self.publish(snapshot.clone());
    }
}
