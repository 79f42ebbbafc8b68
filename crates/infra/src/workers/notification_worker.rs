use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use stockflow_orders::OrderPlaced;

use crate::notifications::{NotificationSink, QueuedNotifier};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the worker to drain its queue and stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Delivers queued order-placed notifications to a sink on its own thread.
///
/// Sink failures are logged and never reach the order path.
#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    /// Spawn the worker and return the notifier that feeds it.
    pub fn spawn<K>(name: &'static str, sink: K) -> io::Result<(QueuedNotifier, WorkerHandle)>
    where
        K: NotificationSink + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::channel::<OrderPlaced>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, queue_rx, shutdown_rx, sink))?;

        Ok((
            QueuedNotifier::new(queue_tx),
            WorkerHandle {
                shutdown: shutdown_tx,
                join: Some(join),
            },
        ))
    }
}

fn worker_loop<K: NotificationSink>(
    name: &'static str,
    queue: mpsc::Receiver<OrderPlaced>,
    shutdown_rx: mpsc::Receiver<()>,
    mut sink: K,
) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            while let Ok(event) = queue.try_recv() {
                deliver(name, &mut sink, &event);
            }
            break;
        }

        match queue.recv_timeout(tick) {
            Ok(event) => deliver(name, &mut sink, &event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "notification worker stopped");
}

fn deliver<K: NotificationSink>(name: &'static str, sink: &mut K, event: &OrderPlaced) {
    if let Err(err) = sink.deliver(event) {
        warn!(worker = name, order_id = %event.order_id, error = %err, "notification delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use stockflow_core::{OrderId, UserId};

    use crate::notifications::{NotifyError, OrderNotifier};

    #[derive(Clone, Default)]
    struct Recorder {
        delivered: Arc<Mutex<Vec<OrderId>>>,
        fail_first: bool,
    }

    impl NotificationSink for Recorder {
        fn deliver(&mut self, event: &OrderPlaced) -> Result<(), NotifyError> {
            if self.fail_first {
                self.fail_first = false;
                return Err(NotifyError::Publish("broker unavailable".to_string()));
            }
            self.delivered.lock().unwrap().push(event.order_id);
            Ok(())
        }
    }

    fn placed() -> OrderPlaced {
        OrderPlaced {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            lines: vec![],
            total_amount: "1.00".parse().unwrap(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn shutdown_drains_pending_notifications() {
        let sink = Recorder::default();
        let delivered = sink.delivered.clone();
        let (notifier, handle) = NotificationWorker::spawn("test-notify", sink).unwrap();

        let events: Vec<_> = (0..3).map(|_| placed()).collect();
        for e in &events {
            notifier.order_placed(e.clone());
        }
        handle.shutdown();

        let expected: Vec<_> = events.iter().map(|e| e.order_id).collect();
        assert_eq!(*delivered.lock().unwrap(), expected);
    }

    #[test]
    fn sink_failure_does_not_stop_the_worker() {
        let sink = Recorder {
            fail_first: true,
            ..Recorder::default()
        };
        let delivered = sink.delivered.clone();
        let (notifier, handle) = NotificationWorker::spawn("test-notify-fail", sink).unwrap();

        let first = placed();
        let second = placed();
        notifier.order_placed(first);
        notifier.order_placed(second.clone());
        handle.shutdown();

        assert_eq!(*delivered.lock().unwrap(), vec![second.order_id]);
    }
}
