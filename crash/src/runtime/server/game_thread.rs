//! Game thread runtime.
//!
//! Responsibilities:
//! - Own the [`RoundController`] and the [`SubscriberRegistry`]; nothing else
//!   mutates either.
//! - Drain session commands from the inbox and answer them.
//! - Drive the round from a timing wheel, keeping exactly one phase timer armed.
//! - Fan out every round event to all subscribers.

use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::broadcast::{SubscriberId, SubscriberRegistry};
use crate::game::{CrashSource, GameTimer, RoundController};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::runtime::timing::{
    Duration as WheelDuration, Millis, MonoInstant, NonZeroDuration, Now, TimerHandle, WheelScope,
    with_wheel,
};
use crate::trace::{debug, error, info};

use super::commands::{Inbox, Inbound};

/// Timing wheel slots at a 1ms tick: the longest timer is 4095ms.
pub(super) const WHEEL_SLOTS: usize = 4096;

/// Only one phase timer is ever pending; the rest is slack.
const WHEEL_CAPACITY: NonZeroUsize = NonZeroUsize::new(8).unwrap();

/// Commands handled per loop turn before timers get a chance to fire.
const MAX_COMMANDS_PER_TURN: usize = 1024;

/// Sleep between loop turns.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

type Wheel<'id> = WheelScope<'id, GameTimer, Millis, WHEEL_SLOTS>;

/// The pending phase timer and the instant it is due.
struct Armed<'id> {
    handle: TimerHandle<'id, GameTimer, Millis>,
    deadline: MonoInstant<Millis>,
}

/// Game thread state and event loop.
pub(super) struct GameThread<S> {
    controller: RoundController<S>,
    registry: SubscriberRegistry,
    inbox: Inbox,
    shutdown_flag: Arc<AtomicBool>,
}

impl<S: CrashSource> GameThread<S> {
    pub(super) fn new(
        controller: RoundController<S>,
        inbox: Inbox,
        shutdown_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            controller,
            registry: SubscriberRegistry::new(),
            inbox,
            shutdown_flag,
        }
    }

    /// Runs until the shutdown flag is set.
    pub(super) fn run(&mut self) {
        let tick = NonZeroDuration::<Millis>::new(NonZeroU64::MIN);
        with_wheel::<GameTimer, Millis, WHEEL_SLOTS, _>(tick, WHEEL_CAPACITY, |wheel| {
            self.run_with_wheel(wheel);
        });
    }

    fn run_with_wheel<'id>(&mut self, wheel: &mut Wheel<'id>) {
        let mut armed = None;
        self.start(wheel, &mut armed, Millis::now());

        while !self.shutdown_flag.load(Ordering::Relaxed) {
            self.turn(wheel, &mut armed, Millis::now());
            std::thread::sleep(IDLE_SLEEP);
        }

        info!(
            round = self.controller.round_id(),
            subscribers = self.registry.len(),
            evicted = self.registry.evicted(),
            "game thread stopping"
        );
    }

    /// Arms the timer of the phase the controller starts in.
    fn start<'id>(
        &mut self,
        wheel: &mut Wheel<'id>,
        armed: &mut Option<Armed<'id>>,
        now: MonoInstant<Millis>,
    ) {
        let (timer, delay) = self.controller.pending_timer();
        info!(
            round = self.controller.round_id(),
            seed_hash = self.controller.seed_hash(),
            "first round open"
        );
        arm(wheel, armed, now, now, timer, delay);
    }

    /// One loop turn: answer queued commands, then fire due timers.
    fn turn<'id>(
        &mut self,
        wheel: &mut Wheel<'id>,
        armed: &mut Option<Armed<'id>>,
        now: MonoInstant<Millis>,
    ) {
        self.drain_inbox();

        let mut fired = Vec::new();
        wheel.tick_at(now, |handle, timer| fired.push((handle, timer)));

        for (handle, timer) in fired {
            // Chain off the deadline, not `now`, so loop latency does not accumulate.
            let base = match armed.take_if(|a| a.handle == handle) {
                Some(previous) => previous.deadline,
                None => now,
            };
            let step = self.controller.on_timer(timer);
            for event in &step.events {
                self.registry.broadcast(event);
            }
            if let Some((next, delay)) = step.next {
                arm(wheel, armed, base, now, next, delay);
            }
        }
    }

    fn drain_inbox(&mut self) {
        for _ in 0..MAX_COMMANDS_PER_TURN {
            let Some(command) = self.inbox.pop() else {
                break;
            };
            self.handle(command);
        }
    }

    fn handle(&mut self, command: Inbound) {
        match command {
            Inbound::Connected { id, outbox } => {
                self.registry.insert(id, outbox);
                let snapshot = self.controller.snapshot();
                self.registry.send_to(id, &snapshot);
                info!(subscriber = %id, subscribers = self.registry.len(), "client connected");
            }
            Inbound::Disconnected { id } => {
                if self.registry.remove(id) {
                    debug!(subscriber = %id, subscribers = self.registry.len(), "client disconnected");
                }
            }
            Inbound::Malformed { id, error } => {
                debug!(subscriber = %id, error = %error, "malformed client message");
                self.registry
                    .send_to(id, &ServerMessage::rejection(error.code(), &error));
            }
            Inbound::Message { id, message } => self.handle_message(id, message),
        }
    }

    fn handle_message(&mut self, id: SubscriberId, message: ClientMessage) {
        let outcome = match message {
            ClientMessage::PlaceBet { wallet, bet } => self
                .controller
                .place_bet(&wallet, bet)
                .map_err(|e| ServerMessage::rejection(e.code(), &e)),
            ClientMessage::CashOut { wallet } => self
                .controller
                .cash_out(&wallet)
                .map_err(|e| ServerMessage::rejection(e.code(), &e)),
        };
        match outcome {
            Ok(event) => {
                self.registry.broadcast(&event);
            }
            Err(reply) => {
                debug!(subscriber = %id, ?reply, "client action rejected");
                self.registry.send_to(id, &reply);
            }
        }
    }
}

/// Replaces the armed phase timer with one due `delay` after `base`.
///
/// A deadline already behind `now` fires on the next tick.
fn arm<'id>(
    wheel: &mut Wheel<'id>,
    armed: &mut Option<Armed<'id>>,
    base: MonoInstant<Millis>,
    now: MonoInstant<Millis>,
    timer: GameTimer,
    delay: Duration,
) {
    if let Some(previous) = armed.take() {
        wheel.cancel(&previous.handle);
    }
    let deadline = base + WheelDuration::from_std(delay);
    match wheel.schedule_after_at(now, deadline.saturating_since(now), timer) {
        Ok(handle) => *armed = Some(Armed { handle, deadline }),
        Err(e) => error!(?timer, error = %e, "failed to arm round timer"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{OutboxReader, outbox};
    use crate::config::GameConfig;
    use crate::game::{Draw, Multiplier, Phase};
    use crate::runtime::server::commands::InboxSender;
    use crate::sync::mpsc;
    use serde_json::Value;

    struct Fixed(Multiplier);

    impl CrashSource for Fixed {
        fn draw(&mut self, _nonce: u64) -> Draw {
            Draw {
                crash_point: self.0,
                proof: None,
            }
        }
    }

    fn game(crash_hundredths: u32) -> (GameThread<Fixed>, InboxSender) {
        let (tx, rx) = mpsc::channel();
        let controller = RoundController::new(
            GameConfig::accelerated(),
            Fixed(Multiplier::from_hundredths(crash_hundredths)),
        );
        (GameThread::new(controller, rx, Arc::new(AtomicBool::new(false))), tx)
    }

    fn connect(tx: &InboxSender, id: u64) -> OutboxReader {
        let (outbox, reader) = outbox();
        assert!(
            tx.push(Inbound::Connected {
                id: SubscriberId::new(id),
                outbox,
            })
            .is_ok()
        );
        reader
    }

    fn received(reader: &OutboxReader) -> Vec<Value> {
        std::iter::from_fn(|| reader.pop())
            .map(|frame| serde_json::from_str(&frame).unwrap())
            .collect()
    }

    fn types(messages: &[Value]) -> Vec<&str> {
        messages.iter().map(|m| m["type"].as_str().unwrap()).collect()
    }

    fn with_game_wheel(f: impl for<'id> FnOnce(&mut Wheel<'id>)) {
        let tick = NonZeroDuration::<Millis>::new(NonZeroU64::MIN);
        with_wheel::<GameTimer, Millis, WHEEL_SLOTS, _>(tick, WHEEL_CAPACITY, f);
    }

    fn at(ms: u64) -> MonoInstant<Millis> {
        MonoInstant::new(ms)
    }

    #[test]
    fn new_client_gets_snapshot_then_countdown() {
        let (mut game, tx) = game(300);
        let reader = connect(&tx, 1);

        with_game_wheel(|wheel| {
            let mut armed = None;
            game.start(wheel, &mut armed, at(0));

            game.turn(wheel, &mut armed, at(1));
            let first = received(&reader);
            assert_eq!(types(&first), ["initial_state"]);
            assert_eq!(first[0]["gameState"]["status"], "waiting");
            assert_eq!(first[0]["gameState"]["countdown"], 3);
            assert_eq!(first[0]["gameState"]["crashPoint"], 0);

            game.turn(wheel, &mut armed, at(20));
            let tick = received(&reader);
            assert_eq!(tick.len(), 1);
            assert_eq!(tick[0]["countdown"], 2);

            game.turn(wheel, &mut armed, at(40));
            game.turn(wheel, &mut armed, at(60));
            assert_eq!(types(&received(&reader)), ["countdown", "countdown", "game_started"]);
            assert_eq!(game.controller.phase(), Phase::Running);
        });
    }

    #[test]
    fn exactly_one_phase_timer_stays_armed() {
        let (mut game, _tx) = game(102);
        with_game_wheel(|wheel| {
            let mut armed = None;
            game.start(wheel, &mut armed, at(0));
            assert_eq!(wheel.pending(), 1);

            for ms in (5..=400).step_by(5) {
                game.turn(wheel, &mut armed, at(ms));
                assert_eq!(wheel.pending(), 1, "at {ms}ms");
                assert!(armed.is_some());
            }
            assert!(game.controller.round_id() > 1, "settle should reopen the table");
        });
    }

    #[test]
    fn late_turns_do_not_push_later_timers_back() {
        let (mut game, tx) = game(300);
        let reader = connect(&tx, 1);

        with_game_wheel(|wheel| {
            let mut armed = None;
            game.start(wheel, &mut armed, at(0));
            game.turn(wheel, &mut armed, at(1));
            received(&reader);

            // The first countdown timer is handled 3ms late.
            game.turn(wheel, &mut armed, at(23));
            assert_eq!(received(&reader)[0]["countdown"], 2);
            assert_eq!(armed.as_ref().map(|a| a.deadline), Some(at(40)));

            game.turn(wheel, &mut armed, at(39));
            assert!(received(&reader).is_empty());
            game.turn(wheel, &mut armed, at(40));
            assert_eq!(received(&reader)[0]["countdown"], 1);

            game.turn(wheel, &mut armed, at(60));
            assert_eq!(types(&received(&reader)), ["countdown", "game_started"]);

            // A turn that misses several tick periods fires once, then the
            // next tick is due at once and the 5ms grid is kept.
            game.turn(wheel, &mut armed, at(77));
            assert_eq!(types(&received(&reader)), ["multiplier_update"]);
            assert_eq!(armed.as_ref().map(|a| a.deadline), Some(at(70)));
            game.turn(wheel, &mut armed, at(78));
            assert_eq!(types(&received(&reader)), ["multiplier_update"]);
            assert_eq!(armed.as_ref().map(|a| a.deadline), Some(at(75)));
        });
    }

    #[test]
    fn accepted_bets_are_broadcast_and_rejections_are_private() {
        let (mut game, tx) = game(300);
        let alice = connect(&tx, 1);
        let bob = connect(&tx, 2);

        with_game_wheel(|wheel| {
            let mut armed = None;
            game.start(wheel, &mut armed, at(0));
            game.turn(wheel, &mut armed, at(1));
            received(&alice);
            received(&bob);

            let send = |id: u64, message: ClientMessage| {
                assert!(
                    tx.push(Inbound::Message {
                        id: SubscriberId::new(id),
                        message,
                    })
                    .is_ok()
                );
            };
            send(1, ClientMessage::PlaceBet { wallet: "A".into(), bet: 10.0 });
            send(2, ClientMessage::CashOut { wallet: "B".into() });
            game.turn(wheel, &mut armed, at(2));

            let to_alice = received(&alice);
            let to_bob = received(&bob);
            assert_eq!(types(&to_alice), ["player_joined"]);
            assert_eq!(to_alice[0]["players"][0]["wallet"], "A");
            assert_eq!(types(&to_bob), ["player_joined", "error"]);
            assert_eq!(to_bob[1]["reason"], "wrong_phase");
        });
    }

    #[test]
    fn malformed_frames_are_answered_and_disconnects_unregister() {
        let (mut game, tx) = game(300);
        let reader = connect(&tx, 7);

        with_game_wheel(|wheel| {
            let mut armed = None;
            game.start(wheel, &mut armed, at(0));
            game.turn(wheel, &mut armed, at(1));
            received(&reader);

            let error = crate::protocol::decode("{oops").unwrap_err();
            assert!(tx.push(Inbound::Malformed { id: SubscriberId::new(7), error }).is_ok());
            game.turn(wheel, &mut armed, at(2));
            let reply = received(&reader);
            assert_eq!(types(&reply), ["error"]);
            assert_eq!(reply[0]["reason"], "malformed_message");

            assert!(tx.push(Inbound::Disconnected { id: SubscriberId::new(7) }).is_ok());
            game.turn(wheel, &mut armed, at(3));
            assert!(game.registry.is_empty());
            assert!(reader.is_disconnected());
        });
    }
}
