//! Inbound frame dispatch.
//!
//! One frame, one decision: either a handler runs to completion and the frame
//! is acknowledged, or the frame is rejected without requeue. A failing
//! handler leaves its frame unacknowledged so the broker redelivers it.

use super::handlers::HandlerTable;
use super::SessionCore;
use crate::broker::InboundFrame;
use crate::error::{LiveError, LiveResult};
use fieldlink_core::{classify, RejectReason, Route};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// What happened to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A handler ran and the frame was acknowledged.
    Acked,
    /// The frame was rejected without requeue.
    Rejected(RejectReason),
}

pub(crate) struct Dispatcher {
    mid: String,
    handlers: Arc<HandlerTable>,
    core: Arc<Mutex<SessionCore>>,
}

impl Dispatcher {
    pub(crate) fn new(mid: &str, handlers: Arc<HandlerTable>, core: Arc<Mutex<SessionCore>>) -> Self {
        Self {
            mid: mid.to_string(),
            handlers,
            core,
        }
    }

    /// Route one frame to its handler, then acknowledge or reject it.
    pub(crate) async fn dispatch(&self, frame: &InboundFrame) -> LiveResult<Disposition> {
        match classify(&self.mid, &frame.routing_key, &frame.body) {
            Route::Command(command) => {
                let Some(handler) = self.handlers.commands.first(command.id) else {
                    return self.reject(frame, RejectReason::NoHandler(command.id)).await;
                };
                handler(&self.mid, &command).map_err(|source| LiveError::Handler {
                    subject_id: command.id,
                    source,
                })?;
            }
            Route::Pulse(pulse) => {
                let Some(handler) = self.handlers.pulses.first(pulse.pulse_id) else {
                    return self.reject(frame, RejectReason::NoHandler(pulse.pulse_id)).await;
                };
                handler(&self.mid, &pulse).map_err(|source| LiveError::Handler {
                    subject_id: pulse.pulse_id,
                    source,
                })?;
            }
            Route::Reject(reason) => return self.reject(frame, reason).await,
        }

        let core = self.core.lock().await;
        let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
        channel.ack(frame.delivery_tag).await?;
        tracing::debug!("Acked delivery {} ({})", frame.delivery_tag, frame.routing_key);
        Ok(Disposition::Acked)
    }

    async fn reject(&self, frame: &InboundFrame, reason: RejectReason) -> LiveResult<Disposition> {
        tracing::warn!(
            "Rejecting delivery {} ({}): {}",
            frame.delivery_tag,
            frame.routing_key,
            reason
        );
        let core = self.core.lock().await;
        let channel = core.open_channel().ok_or(LiveError::NotConnected)?;
        channel.nack(frame.delivery_tag, false).await?;
        Ok(Disposition::Rejected(reason))
    }

    /// Dispatch frames as they arrive until the stream ends or a dispatch fails.
    ///
    /// After a failure the session reports `dispatching() == false` until
    /// `resume_incoming()` starts a new consumer.
    pub(crate) async fn run(self, mut frames: mpsc::UnboundedReceiver<InboundFrame>) {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = self.dispatch(&frame).await {
                tracing::error!(
                    "Dispatcher stopped at delivery {} ({}): {}",
                    frame.delivery_tag,
                    frame.routing_key,
                    e
                );
                return;
            }
        }
        tracing::debug!("Delivery stream for {} ended", self.mid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::tests::{manual, session};
    use crate::live::LiveConfig;
    use fieldlink_types::{Command, CommandResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const COMMAND_7: &[u8] = br#"{"Id": 7, "Timestamp": "2024-05-01T12:00:00Z"}"#;
    const PULSE_2: &[u8] = br#"{"Timestamp": "2024-05-01T12:00:00Z", "MID": "DEV001", "PulseId": 2}"#;

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    // ===========================================
    // Manual fetch
    // ===========================================

    #[tokio::test]
    async fn fetch_runs_handler_then_acks() {
        let (session, _control, broker) = session(manual());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        session.register_command_handler(7, move |mid, command: &Command| {
            assert_eq!(mid, "DEV001");
            assert_eq!(command.id, 7);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        session.connect().await.unwrap();
        let tag = broker.deliver("DEV001.C.7", COMMAND_7);

        assert_eq!(session.fetch().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.acked(), vec![tag]);
        assert!(broker.nacked().is_empty());
    }

    #[tokio::test]
    async fn pulse_handler_runs() {
        let (session, _control, broker) = session(manual());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        session.register_pulse_handler(2, move |_, pulse| {
            assert_eq!(pulse.pulse_id, 2);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        session.connect().await.unwrap();
        broker.deliver("DEV001.P.2", PULSE_2);

        session.fetch().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.acked().len(), 1);
    }

    #[tokio::test]
    async fn unknown_subject_is_nacked_silently() {
        let (session, _control, broker) = session(manual());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        session.register_command_handler(8, move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        session.connect().await.unwrap();
        let tag = broker.deliver("DEV001.C.7", COMMAND_7);

        assert_eq!(session.fetch().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.nacked(), vec![(tag, false)]);
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn foreign_empty_and_unroutable_frames_are_nacked() {
        let (session, _control, broker) = session(manual());
        session.register_command_handler(7, |_, _| Ok(()));
        session.connect().await.unwrap();

        broker.deliver("DEV002.C.7", COMMAND_7);
        broker.deliver("DEV001.C.7", b"");
        broker.deliver("DEV001.ZZ.7", COMMAND_7);
        broker.deliver("", COMMAND_7);

        assert_eq!(session.fetch().await.unwrap(), 4);
        assert_eq!(
            broker.nacked(),
            vec![(1, false), (2, false), (3, false), (4, false)]
        );
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn handler_error_propagates_and_leaves_frame_unacked() {
        let (session, _control, broker) = session(manual());
        session.register_command_handler(7, |_, _| Err("actuator jammed".into()));
        session.connect().await.unwrap();
        broker.deliver("DEV001.C.7", COMMAND_7);
        broker.deliver("DEV001.C.7", COMMAND_7);

        let result = session.fetch().await;

        assert!(matches!(
            result,
            Err(LiveError::Handler { subject_id: 7, .. })
        ));
        assert!(broker.acked().is_empty());
        assert!(broker.nacked().is_empty());
        assert_eq!(broker.queued(), 1);
    }

    #[tokio::test]
    async fn fetch_on_empty_queue_returns_zero() {
        let (session, _control, _broker) = session(manual());
        session.connect().await.unwrap();
        assert_eq!(session.fetch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_requires_connection() {
        let (session, _control, _broker) = session(manual());
        assert!(matches!(session.fetch().await, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn unregistered_handler_no_longer_runs() {
        let (session, _control, broker) = session(manual());
        session.register_command_handler(7, |_, _| Ok(()));
        session.register_command_handler(7, |_, _| Ok(()));
        session.connect().await.unwrap();

        assert_eq!(session.unregister_command_handler(7), 2);
        broker.deliver("DEV001.C.7", COMMAND_7);
        session.fetch().await.unwrap();

        assert_eq!(broker.nacked().len(), 1);
    }

    // ===========================================
    // Automatic dispatch
    // ===========================================

    #[tokio::test]
    async fn automatic_dispatch_acks_as_frames_arrive() {
        let (session, _control, broker) = session(LiveConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        session.register_command_handler(7, move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        session.connect().await.unwrap();

        broker.deliver("DEV001.C.7", COMMAND_7);
        broker.deliver("DEV001.C.7", COMMAND_7);

        eventually(|| broker.acked().len() == 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn paused_session_queues_until_resumed() {
        let (session, _control, broker) = session(LiveConfig::default());
        session.register_command_handler(7, |_, _| Ok(()));
        session.connect().await.unwrap();
        session.pause_incoming().await.unwrap();

        broker.deliver("DEV001.C.7", COMMAND_7);
        assert_eq!(broker.queued(), 1);

        session.resume_incoming().await.unwrap();
        eventually(|| broker.acked().len() == 1).await;
    }

    #[tokio::test]
    async fn resume_restarts_dispatch_stopped_by_handler_error() {
        let (session, _control, broker) = session(LiveConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        session.register_command_handler(7, move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("actuator jammed".into())
            } else {
                Ok(())
            }
        });
        session.connect().await.unwrap();
        assert!(session.dispatching().await);

        broker.deliver("DEV001.C.7", COMMAND_7);
        eventually(|| calls.load(Ordering::SeqCst) == 1).await;
        for _ in 0..100 {
            if !session.dispatching().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!session.dispatching().await);
        assert!(session.is_connected().await);

        // Arrives while nothing consumes, so the broker holds it
        let tag = broker.deliver("DEV001.C.7", COMMAND_7);
        assert_eq!(broker.queued(), 1);

        session.resume_incoming().await.unwrap();
        assert!(session.dispatching().await);
        eventually(|| broker.acked() == vec![tag]).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resume_keeps_running_dispatcher() {
        let (session, _control, broker) = session(LiveConfig::default());
        session.register_command_handler(7, |_, _| Ok(()));
        session.connect().await.unwrap();

        session.resume_incoming().await.unwrap();
        broker.deliver("DEV001.C.7", COMMAND_7);

        eventually(|| broker.acked().len() == 1).await;
        assert!(session.dispatching().await);
    }

    #[tokio::test]
    async fn handler_replies_through_spawned_task() {
        let (session, _control, broker) = session(LiveConfig::default());
        let session = Arc::new(session);
        let replier = Arc::clone(&session);
        session.register_command_handler(7, move |_, command| {
            let session = Arc::clone(&replier);
            let response = CommandResponse::accepted(command);
            tokio::spawn(async move { session.publish_command_response(&response).await });
            Ok(())
        });
        session.connect().await.unwrap();

        broker.deliver("DEV001.C.7", COMMAND_7);

        eventually(|| broker.acked().len() == 1).await;
        eventually(|| !broker.published().is_empty()).await;
        assert_eq!(broker.published()[0].routing_key, "DEV001.CR.7");
    }
}
