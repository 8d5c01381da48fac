//! Effect interpreter that drives the state machine.
//!
//! The interpreter is the boundary between the pure state machine and the
//! impure world of I/O. It owns the only copy of the state, executes effects
//! and feeds their results back in as events through a single channel, so
//! every transition happens on one task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::effect::{Effect, LogLevel};
use super::event::{DrainOutcome, DrainTrigger, Event};
use super::state::ConnectionState;
use super::transition::transition;
use crate::config::ReconnectPolicy;
use crate::dispatch::Replay;
use j2m_core::ChatApi;

/// Cloneable way to talk to a running [`ReplayMachine`].
#[derive(Clone)]
pub struct ReplayHandle {
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<ConnectionState>,
}

impl ReplayHandle {
    /// Ask for a drain. Coalesced with any drain already running.
    pub fn request_drain(&self, trigger: DrainTrigger) {
        self.send(Event::DrainRequested { trigger });
    }

    pub fn notify_disconnected(&self) {
        self.send(Event::Disconnected);
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            warn!("Replay machine is not running, event dropped");
        }
    }
}

pub struct ReplayMachine {
    state: ConnectionState,
    chat: Arc<dyn ChatApi>,
    replay: Arc<dyn Replay>,
    reconnect: ReconnectPolicy,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ReplayMachine {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        replay: Arc<dyn Replay>,
        reconnect: ReconnectPolicy,
    ) -> (Self, ReplayHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Init);
        let handle = ReplayHandle {
            events: events_tx.clone(),
            state: state_rx,
        };
        let machine = Self {
            state: ConnectionState::Init,
            chat,
            replay,
            reconnect,
            events_tx,
            events_rx,
            state_tx,
        };
        (machine, handle)
    }

    /// Start connecting and process events until the process exits.
    pub async fn run(mut self) {
        self.process(Event::Start);
        while let Some(event) = self.events_rx.recv().await {
            self.process(event);
        }
    }

    fn process(&mut self, event: Event) {
        let before = self.state;
        let result = transition(before, event);
        if result.state != before {
            debug!("Replay machine: {} -> {}", before, result.state);
            self.state = result.state;
            self.state_tx.send_replace(result.state);
        }
        for effect in result.effects {
            self.execute(effect);
        }
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::Connect { attempt } => {
                let delay = self.reconnect.delay_for(attempt);
                let chat = Arc::clone(&self.chat);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        info!("Waiting {:?} before connecting to chat", delay);
                        tokio::time::sleep(delay).await;
                    }
                    let event = match chat.connect().await {
                        Ok(()) => Event::Connected,
                        Err(e) => Event::ConnectionFailed {
                            error: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                });
            }

            Effect::StartDrain => {
                let _ = self.events_tx.send(Event::DrainStarted);
                let replay = Arc::clone(&self.replay);
                let chat = Arc::clone(&self.chat);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let outcome = match replay.replay().await {
                        Ok(report) => DrainOutcome::Completed(report),
                        Err(e) => DrainOutcome::Failed {
                            error: e.to_string(),
                        },
                    };
                    // Reported first so the machine reconnects once the
                    // drain is over.
                    if !chat.is_connected() {
                        let _ = events.send(Event::Disconnected);
                    }
                    let _ = events.send(Event::DrainFinished { outcome });
                });
            }

            Effect::Log { level, message } => match level {
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            },
        }
    }
}

/// Periodically request a drain so records left behind by failed attempts
/// are retried. A lost connection is reported instead.
pub fn spawn_safety_timer(
    handle: ReplayHandle,
    chat: Arc<dyn ChatApi>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if chat.is_connected() {
                handle.request_drain(DrainTrigger::Timer);
            } else {
                handle.notify_disconnected();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DrainReport;
    use async_trait::async_trait;
    use j2m_core::testing::FakeChat;
    use j2m_core::QueueError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    /// Replay that blocks until the test hands out a permit.
    struct GatedReplay {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedReplay {
        fn closed() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            })
        }

        fn open() -> Arc<Self> {
            let replay = Self::closed();
            replay.release(1000);
            replay
        }

        fn release(&self, count: usize) {
            self.gate.add_permits(count);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Replay for GatedReplay {
        async fn replay(&self) -> Result<DrainReport, QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            Ok(DrainReport::default())
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
        }
    }

    fn start(chat: Arc<FakeChat>, replay: Arc<GatedReplay>) -> ReplayHandle {
        let (machine, handle) = ReplayMachine::new(chat, replay, fast_policy());
        tokio::spawn(machine.run());
        handle
    }

    async fn wait_until(handle: &ReplayHandle, f: impl FnMut(&ConnectionState) -> bool) {
        let mut rx = handle.subscribe();
        timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_connects_then_drains_once() {
        let chat = Arc::new(FakeChat::new());
        let replay = GatedReplay::open();
        let handle = start(chat.clone(), replay.clone());

        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        assert_eq!(replay.calls(), 1);
        assert_eq!(chat.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_connection_retries_until_success() {
        let chat = Arc::new(FakeChat::new());
        chat.fail_next_connects(2);
        let replay = GatedReplay::open();
        let handle = start(chat.clone(), replay.clone());

        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        assert_eq!(chat.connect_attempts(), 3);
        assert_eq!(replay.calls(), 1);
    }

    #[tokio::test]
    async fn test_requests_during_drain_cause_exactly_one_more() {
        let chat = Arc::new(FakeChat::new());
        let replay = GatedReplay::closed();
        let handle = start(chat, replay.clone());

        wait_until(&handle, |s| matches!(s, ConnectionState::HandlingInProgress { .. })).await;
        handle.request_drain(DrainTrigger::Webhook);
        handle.request_drain(DrainTrigger::Webhook);
        handle.request_drain(DrainTrigger::Timer);
        wait_until(&handle, |s| {
            matches!(
                s,
                ConnectionState::HandlingInProgress {
                    drain_pending: true,
                    ..
                }
            )
        })
        .await;
        assert_eq!(replay.calls(), 1);

        replay.release(2);
        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        assert_eq!(replay.calls(), 2);
    }

    #[tokio::test]
    async fn test_request_while_ready_drains() {
        let chat = Arc::new(FakeChat::new());
        let replay = GatedReplay::closed();
        let handle = start(chat, replay.clone());

        wait_until(&handle, |s| s.is_draining()).await;
        replay.release(1);
        wait_until(&handle, |s| *s == ConnectionState::Ready).await;

        handle.request_drain(DrainTrigger::Timer);
        wait_until(&handle, |s| s.is_draining()).await;
        replay.release(1);
        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        assert_eq!(replay.calls(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_while_ready_reconnects() {
        let chat = Arc::new(FakeChat::new());
        let replay = GatedReplay::open();
        let handle = start(chat.clone(), replay.clone());

        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        chat.fail_next_connects(1);
        handle.notify_disconnected();

        timeout(Duration::from_secs(5), async {
            while !(replay.calls() == 2 && handle.current_state() == ConnectionState::Ready) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for reconnect");
        assert_eq!(chat.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_connection_lost_during_drain_reconnects_afterwards() {
        let chat = Arc::new(FakeChat::new());
        let replay = GatedReplay::closed();
        let handle = start(chat.clone(), replay.clone());

        wait_until(&handle, |s| s.is_draining()).await;
        chat.drop_connection();
        replay.release(2);

        timeout(Duration::from_secs(5), async {
            while !(chat.connect_attempts() == 2
                && replay.calls() == 2
                && handle.current_state() == ConnectionState::Ready)
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for reconnect");
        assert!(chat.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_timer_drains_and_detects_lost_connection() {
        let chat = Arc::new(FakeChat::new());
        let replay = GatedReplay::open();
        let handle = start(chat.clone(), replay.clone());
        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        assert_eq!(replay.calls(), 1);

        let timer = spawn_safety_timer(handle.clone(), chat.clone(), Duration::from_secs(60));

        // Connected: each tick asks for a drain.
        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_until(&handle, |s| *s == ConnectionState::Ready).await;
        assert_eq!(replay.calls(), 2);
        assert_eq!(chat.connect_attempts(), 1);

        // Disconnected: the next tick makes the machine reconnect, which
        // drains again.
        chat.drop_connection();
        tokio::time::sleep(Duration::from_secs(60)).await;
        timeout(Duration::from_secs(5), async {
            while !(replay.calls() == 3 && handle.current_state() == ConnectionState::Ready) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for reconnect");
        assert_eq!(chat.connect_attempts(), 2);
        assert!(chat.is_connected());

        timer.abort();
    }
}
