use std::sync::{Arc, Mutex};

use scriptagent::rpc::{RpcCallMetrics, RpcCallObserver};

/// Keeps every metrics record it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    calls: Arc<Mutex<Vec<RpcCallMetrics>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RpcCallMetrics> {
        self.calls.lock().unwrap().clone()
    }

    /// The only record, panicking if there is not exactly one.
    pub fn single(&self) -> RpcCallMetrics {
        let calls = self.calls();
        assert_eq!(calls.len(), 1, "expected exactly one rpc call, got {calls:?}");
        calls.into_iter().next().unwrap()
    }
}

impl RpcCallObserver for RecordingObserver {
    fn rpc_call_completed(&self, metrics: &RpcCallMetrics) {
        self.calls.lock().unwrap().push(metrics.clone());
    }
}
