//! Self-rescheduling command loop with jitter.
//!
//! Each execution sends the command and arms a timer for the next one. The
//! timer posts `CommandDue { generation }` back to the bot loop; stopping
//! aborts the timer and bumps the generation so a timer that already fired
//! is ignored on delivery.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::{info, warn};
use xian_store::CommandStats;
use xian_store::time::now_iso;

use crate::client::GameClient;
use crate::supervisor::{BotEvent, schedule};

/// Upper bound (exclusive) of the random delay added to every interval
const JITTER_MS: u64 = 1000;

/// Stats are persisted every this many executions
pub const STATS_EVERY: u64 = 10;

/// Base delay plus `uniform(0..1000ms)`.
pub fn next_delay(base: Duration) -> Duration {
    base + Duration::from_millis(rand::rng().random_range(0..JITTER_MS))
}

/// What a `CommandDue` led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Stale or inactive, nothing happened
    Ignored,
    Sent { count: u64, command: String },
    /// The loop stopped itself
    Halted { reason: String },
}

pub struct CommandScheduler {
    command: String,
    target: String,
    base_delay: Duration,
    active: bool,
    generation: u64,
    count: u64,
    pending: Option<AbortHandle>,
}

impl CommandScheduler {
    pub fn new(command: String, target: String, base_delay: Duration) -> Self {
        Self {
            command,
            target,
            base_delay,
            active: false,
            generation: 0,
            count: 0,
            pending: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Begin a run and queue the first execution immediately. Returns false
    /// when already running or the client is not ready.
    pub fn start(&mut self, client_ready: bool, tx: &UnboundedSender<BotEvent>) -> bool {
        if !client_ready {
            info!("bot not ready, command loop not started");
            return false;
        }
        if self.active {
            info!("command loop already running");
            return false;
        }

        info!(
            command = %self.command,
            target = %self.target,
            base_delay_ms = self.base_delay.as_millis() as u64,
            "starting command loop"
        );
        self.active = true;
        self.generation += 1;
        self.count = 0;
        let _ = tx.send(BotEvent::CommandDue {
            generation: self.generation,
        });
        true
    }

    /// Run one execution if `generation` is current.
    pub fn on_due(
        &mut self,
        generation: u64,
        client: Option<&dyn GameClient>,
        tx: &UnboundedSender<BotEvent>,
    ) -> Execution {
        if !self.active || generation != self.generation {
            return Execution::Ignored;
        }
        self.pending = None;

        let client = match client {
            Some(client) if client.is_connected() && client.is_ready() => client,
            _ => {
                self.stop();
                return Execution::Halted {
                    reason: "client is not connected".to_string(),
                };
            }
        };

        if let Err(e) = client.chat(&self.command) {
            warn!(error = %e, "failed to send command");
            self.stop();
            return Execution::Halted {
                reason: format!("failed to send command: {}", e),
            };
        }

        self.count += 1;
        if self.count % STATS_EVERY == 0 {
            info!(count = self.count, "commands sent");
        }

        let delay = next_delay(self.base_delay);
        self.pending = Some(schedule(
            tx,
            delay,
            BotEvent::CommandDue {
                generation: self.generation,
            },
        ));

        Execution::Sent {
            count: self.count,
            command: self.command.clone(),
        }
    }

    /// Cancel the pending execution. Idempotent; returns whether a run was
    /// in progress.
    pub fn stop(&mut self) -> bool {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.generation += 1;
        let was_active = self.active;
        self.active = false;
        if was_active {
            info!(count = self.count, "command loop stopped");
        }
        was_active
    }

    pub fn stats(&self) -> CommandStats {
        CommandStats {
            last_update: now_iso(),
            total_commands: self.count,
            target_player: self.target.clone(),
            command_delay: self.base_delay.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    /// Longer than any delay the scheduler can pick
    const PAST_NEXT_FIRE: Duration = Duration::from_millis(50 + JITTER_MS + 100);

    fn scheduler() -> CommandScheduler {
        CommandScheduler::new(
            "/kiss Steve".to_string(),
            "Steve".to_string(),
            Duration::from_millis(50),
        )
    }

    fn due_generation(event: BotEvent) -> u64 {
        match event {
            BotEvent::CommandDue { generation } => generation,
            _ => panic!("expected CommandDue"),
        }
    }

    #[test]
    fn test_next_delay_bounds() {
        let base = Duration::from_millis(50);
        for _ in 0..200 {
            let delay = next_delay(base);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_millis(JITTER_MS));
        }
    }

    #[tokio::test]
    async fn test_start_requires_ready_client() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = scheduler();

        assert!(!scheduler.start(false, &tx));
        assert!(!scheduler.is_active());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_twice_is_a_no_op() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = scheduler();

        assert!(scheduler.start(true, &tx));
        assert!(!scheduler.start(true, &tx));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_execution_sends_and_reschedules() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (client, state) = FakeClient::ready();
        let client: &dyn GameClient = &client;
        let mut scheduler = scheduler();

        scheduler.start(true, &tx);
        let generation = due_generation(rx.recv().await.unwrap());
        let first = scheduler.on_due(generation, Some(client), &tx);

        assert_eq!(
            first,
            Execution::Sent {
                count: 1,
                command: "/kiss Steve".to_string()
            }
        );
        assert_eq!(state.sent(), vec!["/kiss Steve"]);

        // The jittered timer posts the next execution for the same generation
        let next = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due_generation(next), generation);
        let second = scheduler.on_due(generation, Some(client), &tx);
        assert!(matches!(second, Execution::Sent { count: 2, .. }));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_execution() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (client, state) = FakeClient::ready();
        let client: &dyn GameClient = &client;
        let mut scheduler = scheduler();

        scheduler.start(true, &tx);
        let generation = due_generation(rx.recv().await.unwrap());
        scheduler.on_due(generation, Some(client), &tx);

        assert!(scheduler.stop());
        assert!(!scheduler.stop());

        // A fire that slipped through is stale
        assert_eq!(
            scheduler.on_due(generation, Some(client), &tx),
            Execution::Ignored
        );
        tokio::time::sleep(PAST_NEXT_FIRE).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(state.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_resets_count_and_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (client, _state) = FakeClient::ready();
        let client: &dyn GameClient = &client;
        let mut scheduler = scheduler();

        scheduler.start(true, &tx);
        let old = due_generation(rx.recv().await.unwrap());
        scheduler.on_due(old, Some(client), &tx);
        scheduler.stop();

        scheduler.start(true, &tx);
        let new = due_generation(rx.recv().await.unwrap());
        assert_ne!(old, new);
        assert_eq!(scheduler.count(), 0);
        assert_eq!(scheduler.on_due(old, Some(client), &tx), Execution::Ignored);
        assert!(matches!(
            scheduler.on_due(new, Some(client), &tx),
            Execution::Sent { count: 1, .. }
        ));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_disconnected_client_halts_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (client, state) = FakeClient::ready();
        let client: &dyn GameClient = &client;
        let mut scheduler = scheduler();

        scheduler.start(true, &tx);
        let generation = due_generation(rx.recv().await.unwrap());
        state.connected.store(false, Ordering::SeqCst);

        let outcome = scheduler.on_due(generation, Some(client), &tx);

        assert!(matches!(outcome, Execution::Halted { .. }));
        assert!(!scheduler.is_active());
        assert!(state.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_halts_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (client, state) = FakeClient::ready();
        let client: &dyn GameClient = &client;
        let mut scheduler = scheduler();
        state.fail_chat.store(true, Ordering::SeqCst);

        scheduler.start(true, &tx);
        let generation = due_generation(rx.recv().await.unwrap());

        assert!(matches!(
            scheduler.on_due(generation, Some(client), &tx),
            Execution::Halted { .. }
        ));
        assert!(!scheduler.is_active());
    }

    #[test]
    fn test_stats_snapshot() {
        let scheduler = scheduler();
        let stats = scheduler.stats();
        assert_eq!(stats.total_commands, 0);
        assert_eq!(stats.target_player, "Steve");
        assert_eq!(stats.command_delay, 50);
    }
}
