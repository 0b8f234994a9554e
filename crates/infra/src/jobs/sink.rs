//! Bridge from the job pipeline to an outcome [`EventBus`].

use std::sync::Arc;

use tracing::warn;

use herald_events::{EventBus, JobEvent};

/// Type-erased, cloneable publisher of [`JobEvent`]s.
///
/// Publishing is best-effort: a failing bus is logged and otherwise ignored,
/// it never changes what happens to the job.
#[derive(Clone)]
pub struct OutcomeSink {
    publish: Arc<dyn Fn(JobEvent) + Send + Sync>,
}

impl OutcomeSink {
    pub fn from_bus<B>(bus: B) -> Self
    where
        B: EventBus + 'static,
    {
        Self {
            publish: Arc::new(move |event: JobEvent| {
                let job_id = event.job_id().clone();
                if let Err(err) = bus.publish(event) {
                    warn!(job_id = %job_id, error = ?err, "failed to publish job outcome");
                }
            }),
        }
    }

    pub fn publish(&self, event: JobEvent) {
        (self.publish)(event)
    }
}

impl core::fmt::Debug for OutcomeSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutcomeSink").finish_non_exhaustive()
    }
}

/// Publish to `sink` if one is configured.
pub(crate) fn emit(sink: Option<&OutcomeSink>, event: JobEvent) {
    if let Some(sink) = sink {
        sink.publish(event);
    }
}
