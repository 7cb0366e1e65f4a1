//! passcrow - command-line client for the protect/verify/recover/delete
//! protocol (§4).
//!
//! Talks to one or more escrow servers over `reqwest`'s blocking client -
//! `passcrow-client`'s engine runs its own retry/backoff loop on a plain
//! thread rather than an async runtime, so there's no tokio here.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};

use passcrow_client::{
    ephemeral_stub_pack, fetch_policy, parse_default_policy, Error, FsPackStore, PackStore,
    PasscrowClient, Result, RpcTransport,
};

/// passcrow - protect a secret by splitting it across escrow servers
#[derive(Parser)]
#[command(name = "passcrow")]
#[command(about = "Protect, verify, recover, and delete secrets via passcrow escrow servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// directory holding local recovery packs (default: ~/.passcrow)
    #[arg(long, global = true)]
    pack_dir: Option<String>,

    /// shrink retry backoff to ~1s, for scripted/interactive use
    #[arg(long, global = true)]
    quick: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print a server's advertised policy
    Policy {
        /// server hostname (or host:port for a local dev server)
        server: String,
    },

    /// Split a secret and escrow it per a policy file
    Protect {
        /// name under which to save the local recovery pack
        name: String,

        /// policy file path (see `passcrow_client`'s policy-line grammar)
        #[arg(long)]
        policy_file: PathBuf,

        /// secret text; read from stdin if omitted
        #[arg(long)]
        secret: Option<String>,

        /// human-readable description stored with each escrow row
        #[arg(long, default_value = "Recovery data")]
        description: String,

        /// also reserve one identity to escrow the whole pack, unlockable
        /// by a human-transcribable key with no local state at all (§4.7)
        #[arg(long)]
        ephemeral: bool,
    },

    /// Ask every server holding a share of `name` to send its verification code
    Verify { name: String },

    /// Redeem verification codes and reconstruct the protected secret
    Recover {
        name: String,

        /// one `<prefix>=<code>` pair per verified share, e.g. `A=1234-5678`
        #[arg(long = "code", required = true)]
        codes: Vec<String>,
    },

    /// Recover an ephemeral pack directly from a server, given nothing but
    /// the human-typed key - no local pack file required. Saves the
    /// recovered pack locally under its own name so `verify`/`recover` can
    /// continue as usual.
    RecoverEphemeral {
        /// server the ephemeral upload was escrowed to
        server: String,

        /// the human-transcribable key printed at protect time
        user_key: String,

        /// the verification code for the reserved identity
        #[arg(long)]
        code: String,
    },

    /// Tell every server holding a share of `name` to forget it, then
    /// remove the local pack file
    Delete {
        name: String,

        /// remove only the local pack file, without contacting any server
        #[arg(long)]
        local_only: bool,
    },

    /// List locally-held recovery pack names
    List,
}

struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

/// Dev servers are commonly run over plain HTTP on a bare `host:port`;
/// anything already carrying a scheme is left alone.
fn base_url(server: &str) -> String {
    if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{server}")
    }
}

impl RpcTransport for HttpTransport {
    fn call(&self, server: &str, method: &str, body: &[u8]) -> Result<Vec<u8>> {
        let path = match method {
            "policy" => "policy",
            "escrow" => "escrowrequest",
            "verification" => "verificationrequest",
            "recovery" => "recoveryrequest",
            "deletion" => "deletionrequest",
            other => return Err(Error::Server(format!("unknown rpc method {other}"))),
        };
        let url = format!("{}/passcrow/{path}", base_url(server));
        let resp = self
            .client
            .post(&url)
            .header("Content-type", "application/json")
            .body(body.to_vec())
            .send()
            .map_err(|e| Error::Io(e.to_string()))?;
        resp.bytes().map(|b| b.to_vec()).map_err(|e| Error::Io(e.to_string()))
    }
}

fn pack_dir(cli: &Cli) -> PathBuf {
    match &cli.pack_dir {
        Some(dir) => PathBuf::from(dir),
        None => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".passcrow")
        }
    }
}

fn build_store(cli: &Cli) -> anyhow::Result<Arc<FsPackStore>> {
    Ok(Arc::new(FsPackStore::new(pack_dir(cli))?))
}

fn build_client(cli: &Cli) -> anyhow::Result<PasscrowClient> {
    let transport: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new());
    Ok(PasscrowClient::new(transport, build_store(cli)?))
}

fn read_secret(secret: Option<String>) -> anyhow::Result<Vec<u8>> {
    match secret {
        Some(s) => Ok(s.into_bytes()),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf.trim_end_matches('\n').as_bytes().to_vec())
        }
    }
}

fn parse_codes(raw: &[String]) -> anyhow::Result<std::collections::HashMap<char, String>> {
    let mut codes = std::collections::HashMap::new();
    for entry in raw {
        let (prefix, code) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed --code {entry:?}, expected <prefix>=<code>"))?;
        let prefix = prefix
            .chars()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty prefix in --code {entry:?}"))?
            .to_ascii_uppercase();
        codes.insert(prefix, code.to_string());
    }
    Ok(codes)
}

fn print_secret(secret: &[u8]) {
    match std::str::from_utf8(secret) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{}", BASE64.encode(secret)),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "passcrow=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Policy { server } => {
            let transport = HttpTransport::new();
            let policy = fetch_policy(&transport, server)?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }

        Commands::Protect {
            name,
            policy_file,
            secret,
            description,
            ephemeral,
        } => {
            let client = build_client(&cli)?;
            let policy_text = std::fs::read_to_string(policy_file)?;
            let policy = parse_default_policy(&policy_text)?;
            let secret_bytes = read_secret(secret.clone())?;

            let outcome = client.protect(name, &secret_bytes, description, &policy, *ephemeral, cli.quick)?;
            println!("protected {name:?} across {} escrow rows", outcome.pack.escrow.len());
            if let Some(key) = outcome.ephemeral_user_key {
                println!();
                println!("Ephemeral recovery key (write this down, it is never stored): {key}");
                println!("Recover with: passcrow recover-ephemeral <server> {key} --code <verification-code>");
            }
        }

        Commands::Verify { name } => {
            let client = build_client(&cli)?;
            let pack = client.load_pack(name)?;
            match client.verify(&pack, cli.quick)? {
                Some(hints) => {
                    for (prefix, hint) in hints {
                        println!("{prefix}: code sent, hint={hint}");
                    }
                }
                None => anyhow::bail!("fewer than {} servers responded", pack.min_shares),
            }
        }

        Commands::Recover { name, codes } => {
            let client = build_client(&cli)?;
            let pack = client.load_pack(name)?;
            let codes = parse_codes(codes)?;
            let secret = client.recover(&pack, &codes, cli.quick)?;
            print_secret(&secret);
        }

        Commands::RecoverEphemeral { server, user_key, code } => {
            let client = build_client(&cli)?;
            let stub = ephemeral_stub_pack(server, user_key)?;
            let pack = client.recover_ephemeral(&stub, code, user_key, cli.quick)?;
            build_store(&cli)?.save(&pack.name, &pack)?;
            println!("recovered pack {:?} ({} escrow rows) - saved locally", pack.name, pack.escrow.len());
            println!("continue with: passcrow verify {:?}", pack.name);
        }

        Commands::Delete { name, local_only } => {
            if *local_only {
                let removed = build_store(&cli)?.delete(name)?;
                println!("removed local pack {name:?}: {removed}");
            } else {
                let client = build_client(&cli)?;
                let pack = client.load_pack(name)?;
                let ok = client.delete(&pack, cli.quick)?;
                println!("delete {name:?}: {}", if ok { "ok" } else { "incomplete, local pack kept" });
            }
        }

        Commands::List => {
            let client = build_client(&cli)?;
            for name in client.list_packs()? {
                println!("{name}");
            }
        }
    }

    Ok(())
}
