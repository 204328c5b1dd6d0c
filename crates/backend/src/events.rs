//! Single-process publish/subscribe for dataset invalidation.
//!
//! Delivery is synchronous and in registration order; a failing subscriber is
//! logged with `subscriber_failed` and never blocks the ones after it.

use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use shared_types::DatasetInvalidated;

type Handler = Arc<dyn Fn(DatasetInvalidated) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(String, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(DatasetInvalidated) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .push((name.into(), Arc::new(handler)));
    }

    pub async fn publish(&self, event: DatasetInvalidated) {
        let snapshot: Vec<(String, Handler)> = self
            .subscribers
            .read()
            .expect("event bus lock poisoned")
            .clone();

        for (name, handler) in snapshot {
            if let Err(error) = handler(event.clone()).await {
                tracing::error!(
                    subscriber = %name,
                    error_code = "subscriber_failed",
                    error = %error,
                    generation_date = %event.generation_date,
                    branch_id = event.branch_id,
                    "event subscriber failed"
                );
            }
        }
    }
}
