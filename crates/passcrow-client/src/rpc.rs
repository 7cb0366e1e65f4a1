//! Transport-agnostic RPC plumbing (§9): the `RpcTransport` seam a binary
//! wires to HTTP, and the task-loop retry machinery every multi-server
//! client operation (`protect`/`verify`/`recover`/`delete`) runs on.
//!
//! The task loop is expressed via a small `TaskOp` trait rather than the
//! three ad-hoc closures (prepare/success/failure) a scripted client would
//! pass around, so each operation's state lives in one place instead of
//! being captured piecemeal.

use std::collections::VecDeque;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub const DEFAULT_SLEEP_MIN_SECONDS: u64 = 0;
pub const DEFAULT_SLEEP_MAX_SECONDS: u64 = 600;

/// The network seam: post a JSON request body to `{server}/passcrow/{method}`
/// and return the raw response body. Transports are free to retry at the
/// HTTP level; the task loop above retries at the protocol level.
pub trait RpcTransport: Send + Sync {
    fn call(&self, server: &str, method: &str, body: &[u8]) -> Result<Vec<u8>>;
}

/// Abstracts the delay between task-loop retries so tests can run without
/// real wall-clock waits.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct StdSleeper;

impl Sleeper for StdSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// One item's journey through a task-loop round: build the request
/// (possibly minting a hashcash payment, which is why this runs right
/// after the sleep rather than before it - the proof of work stays fresh),
/// interpret the response, and describe a failure for the caller's retry
/// report.
pub trait TaskOp {
    type Item;
    type Pending;

    fn server_for(&self, item: &Self::Item) -> String;

    /// Build the `(method, body)` to send. `delay_secs` is how long this
    /// attempt already slept, so a hashcash mint can size its own deadline
    /// against the retry budget instead of the absolute one.
    fn prepare(&mut self, item: &Self::Item, delay_secs: u64) -> Result<(String, Vec<u8>, Self::Pending)>;

    fn on_success(&mut self, item: &Self::Item, server: &str, pending: Self::Pending, response: &[u8]) -> Result<()>;

    fn format_failure(&self, item: &Self::Item, server: &str, err: &Error) -> String;
}

/// Run every item in `tasks` through `op`, retrying failures until either
/// the queue drains or the retry budget (`len(tasks) + 3` attempts) is
/// spent. Returns `(all_succeeded, failure_descriptions)`.
///
/// Mirrors the scripted reference client's task loop: sleep first (so a
/// fresh payment can be minted during the wait, not before it), then
/// prepare/call/interpret one item, re-enqueueing it on any failure.
pub fn run_task_loop<T: TaskOp>(
    transport: &dyn RpcTransport,
    sleeper: &dyn Sleeper,
    op: &mut T,
    tasks: Vec<T::Item>,
    quick: bool,
    sleep_min: u64,
    sleep_max: u64,
) -> (bool, Vec<String>) {
    let mut queue: VecDeque<T::Item> = tasks.into_iter().collect();
    let mut failures = Vec::new();
    let max_tries = queue.len() + 3;
    let mut sleep_secs = 0u64;

    while let Some(item) = queue.pop_front() {
        if failures.len() >= max_tries {
            queue.push_front(item);
            break;
        }
        sleeper.sleep(Duration::from_secs(sleep_secs));
        let server = op.server_for(&item);

        let outcome = op.prepare(&item, sleep_secs).and_then(|(method, body, pending)| {
            let response = transport.call(&server, &method, &body)?;
            op.on_success(&item, &server, pending, &response)
        });

        if let Err(err) = outcome {
            failures.push(op.format_failure(&item, &server, &err));
            queue.push_back(item);
        }

        sleep_secs = if quick {
            1
        } else if sleep_max > sleep_min {
            rand::Rng::gen_range(&mut rand::thread_rng(), sleep_min..=sleep_max)
        } else {
            sleep_min
        };
    }

    (queue.is_empty(), failures)
}

/// Fetch and parse a server's advertised `PolicyObject` from its `policy`
/// endpoint.
pub fn fetch_policy(transport: &dyn RpcTransport, server: &str) -> Result<passcrow_proto::PolicyObject> {
    let body = transport.call(server, "policy", b"{}")?;
    parse_response(&body)
}

pub fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::Io(e.to_string()))
}

/// Raise a [`Error::Server`] if the parsed response carries an `error`
/// field - the uniform way every Passcrow response reports a protocol
/// failure instead of relying on HTTP status codes.
pub fn check_error(error: &Option<String>) -> Result<()> {
    match error {
        Some(msg) => Err(Error::Server(msg.clone())),
        None => Ok(()),
    }
}
