//! Stand-in for one game-worker thread (spec.md §6 "Dispatcher API (worker
//! side)"): registers with a `ThreadedDispatcher`, blocks for a control
//! message, and replies. Game logic itself stays a stub (explicitly out of
//! scope per spec.md §1) - `on_reset` below just acknowledges.
//!
//! Reproduces the "Dispatcher round-trip" scenario from spec.md §8: three
//! games register, the orchestrator broadcasts one `Reset` command, and
//! every game replies `{ok: true}` in the same round.

use std::sync::Arc;
use std::thread;

use harness_core::dispatcher::ThreadedDispatcher;
use harness_core::logging;
use harness_core::mailbox::Ctrl;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cmd {
    Reset,
}

#[derive(Debug, Clone)]
struct Ack {
    ok: bool,
}

fn run_game(dispatcher: Arc<ThreadedDispatcher<Cmd, Ack>>, idx: usize, logger: slog::Logger) {
    let addr = dispatcher.reg_game(format!("game_{}", idx));
    slog::debug!(logger, "game registered"; "addr" => format!("{:?}", addr));

    let cmd = dispatcher.check_message();
    slog::info!(logger, "game received control message"; "idx" => idx, "cmd" => format!("{:?}", cmd));
    dispatcher.reply(Ack { ok: true });
}

fn main() {
    let logger = logging::root();
    let ctrl = Ctrl::new();
    let dispatcher: Arc<ThreadedDispatcher<Cmd, Ack>> = Arc::new(ThreadedDispatcher::new(ctrl, "dispatcher"));

    let games: Vec<_> = (0..3)
        .map(|idx| {
            let d = dispatcher.clone();
            let l = logger.clone();
            thread::spawn(move || run_game(d, idx, l))
        })
        .collect();

    // give the game threads a moment to register before the first broadcast
    thread::sleep(std::time::Duration::from_millis(20));

    let replies = dispatcher.start(Cmd::Reset);
    slog::info!(logger, "orchestrator collected replies"; "count" => replies.len());
    assert!(replies.iter().all(|r| r.ok));

    for g in games {
        g.join().expect("game thread panicked");
    }
}
