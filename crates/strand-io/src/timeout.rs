//! Time-limited work
//!
//! [`run_with_timeout`] races a worker task running the body against a
//! sleeper task. Whichever finishes first reports to the caller through a
//! channel; the loser is killed.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use strand_core::{ktrace, TaskResult};

use crate::reactor::Reactor;

/// Run `body` in a new task, giving up after `timeout`
///
/// Returns `Some(value)` if the body finished in time and `None` if it was
/// killed. A bomb raised by the body is re-raised here.
pub fn run_with_timeout<T, F>(reactor: &Reactor, timeout: Duration, body: F) -> TaskResult<Option<T>>
where
    T: 'static,
    F: FnOnce() -> TaskResult<T> + 'static,
{
    let sched = reactor.scheduler();
    let outcome = sched.channel::<Option<T>>();
    let decided = Rc::new(Cell::new(false));

    let (tx, done) = (outcome.clone(), decided.clone());
    let worker = sched.spawn(move || {
        let result = body();
        if done.replace(true) {
            return Ok(());
        }
        match result {
            Ok(value) => tx.send(Some(value)),
            Err(bomb) if bomb.is_task_exit() => Err(bomb),
            Err(bomb) => tx.send_bomb(bomb),
        }
    })?;
    worker.set_name("timeout-worker");

    let (tx, done, r) = (outcome.clone(), decided.clone(), reactor.clone());
    let sleeper = sched.spawn(move || {
        r.sleep(timeout)?;
        if done.replace(true) {
            return Ok(());
        }
        tx.send(None)
    })?;
    sleeper.set_name("timeout-sleeper");

    let result = outcome.receive();
    decided.set(true);

    if sleeper.is_alive() {
        sleeper.kill()?;
    }
    if matches!(result, Ok(None)) && worker.is_alive() {
        ktrace!("{} timed out after {:?}", worker, timeout);
        if !worker.is_blocked() {
            worker.remove()?;
        }
        worker.kill()?;
    }
    result
}
