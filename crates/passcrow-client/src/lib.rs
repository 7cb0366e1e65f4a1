//! Transport- and storage-agnostic client engine for Passcrow's
//! protect/verify/recover/delete protocol (§4). No HTTP, no CLI, no
//! filesystem beyond [`FsPackStore`] - a binary supplies an [`RpcTransport`]
//! and a [`PackStore`] (`passcrow` wires these to `reqwest` and the local
//! filesystem).

mod engine;
mod error;
mod pack;
mod policy;
mod rpc;
mod store;

pub use engine::{PasscrowClient, ProtectOutcome};
pub use error::{Error, Result};
pub use pack::{
    ephemeral_escrow_id, ephemeral_escrow_key, ephemeral_pack_key, ephemeral_stub_pack,
    generate_ephemeral_user_key, seal_pack, seal_secret, unseal_pack, unseal_secret, EscrowRecord,
    RecoveryPack, MAX_SHARES, VERIFICATION_PREFIXES,
};
pub use policy::{
    format_default_policy, parse_default_policy, ClientPolicy, IdentityPolicy, ServerPolicy,
    DEFAULT_EXPIRATION_DAYS, DEFAULT_M, DEFAULT_N, DEFAULT_TIMEOUT_MINUTES,
};
pub use rpc::{
    check_error, fetch_policy, parse_response, run_task_loop, RpcTransport, Sleeper, StdSleeper,
    TaskOp, DEFAULT_SLEEP_MAX_SECONDS, DEFAULT_SLEEP_MIN_SECONDS,
};
pub use store::{filename_for, path_exists, FsPackStore, PackStore};
