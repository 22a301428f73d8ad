use hvmon_proto::MonitorEvent;
use tracing::debug;

/// Receiver of worker output. Emission never blocks the worker.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);
}

impl EventSink for crossbeam_channel::Sender<MonitorEvent> {
    fn emit(&self, event: MonitorEvent) {
        if self.try_send(event).is_err() {
            debug!("sink: event dropped (receiver gone or full)");
        }
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<MonitorEvent> {
    fn emit(&self, event: MonitorEvent) {
        if self.send(event).is_err() {
            debug!("sink: event dropped (receiver gone)");
        }
    }
}
