//!
//! opsconsole CLI binary
//! ---------------------
//! Signs in with a local identity, exchanges its ID token for a backend session cookie,
//! performs one credentialed API request and signs out again. Handy for checking a
//! backend's session endpoints without a browser.

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use opsconsole::identity::{LocalIdentity, LocalIdentityProvider};
use opsconsole::{ClientConfig, Console, HttpMethod, SessionStatus};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--api <base>] --uid <uid> [--name <display name>] [--token <id token>] <GET|POST|PATCH|DELETE> <path> [json-body]\n\nFlags:\n  --api <base>       API base URL (default: $OPSCONSOLE_API_BASE, else $OPSCONSOLE_ORIGIN/api)\n  --uid <uid>        Identity to sign in as\n  --name <name>      Display name for the identity\n  --token <token>    ID token to exchange (default: $OPSCONSOLE_ID_TOKEN)\n  -h, --help         Show this help\n\nExamples:\n  {program} --uid ops1 GET /projects\n  {program} --api http://127.0.0.1:5001/f15-internal/us-central1/api --uid ops1 POST /projects '{{\"name\":\"Roof\"}}'"
    );
}

fn parse_method(s: &str) -> Option<HttpMethod> {
    match s.to_ascii_uppercase().as_str() {
        "GET" => Some(HttpMethod::Get),
        "POST" => Some(HttpMethod::Post),
        "PATCH" => Some(HttpMethod::Patch),
        "DELETE" => Some(HttpMethod::Delete),
        _ => None,
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut api: Option<String> = None;
    let mut uid: Option<String> = None;
    let mut name: Option<String> = None;
    let mut token: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--api" | "--uid" | "--name" | "--token" => {
                if i + 1 >= args.len() { eprintln!("{} requires a value", args[i]); print_usage(&program); std::process::exit(2); }
                let v = Some(args[i + 1].clone());
                match args[i].as_str() {
                    "--api" => api = v,
                    "--uid" => uid = v,
                    "--name" => name = v,
                    _ => token = v,
                }
                i += 2;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    if positional.len() < 2 || positional.len() > 3 {
        print_usage(&program);
        std::process::exit(2);
    }
    let Some(method) = parse_method(&positional[0]) else {
        eprintln!("unsupported method: {}", positional[0]);
        print_usage(&program);
        std::process::exit(2);
    };
    let path = positional[1].clone();
    let body: Option<serde_json::Value> = match positional.get(2) {
        Some(raw) => Some(serde_json::from_str(raw).context("request body must be JSON")?),
        None => None,
    };

    let Some(uid) = uid else {
        eprintln!("--uid is required");
        print_usage(&program);
        std::process::exit(2);
    };
    let token = token
        .or_else(|| env::var("OPSCONSOLE_ID_TOKEN").ok())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("no ID token: pass --token or set OPSCONSOLE_ID_TOKEN"))?;

    let config = match api {
        Some(base) => ClientConfig::from_env()?.with_base(base),
        None => ClientConfig::from_env()?,
    };

    let mut identity = LocalIdentity::new(uid, token);
    if let Some(n) = name {
        identity = identity.with_display_name(n);
    }
    let provider = Arc::new(LocalIdentityProvider::with_pending(identity.shared()));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    rt.block_on(async move {
        let console = Console::new(config, provider)?;
        console.start();
        let view = console.session.sign_in().await?;
        if view.status != SessionStatus::Authenticated {
            let detail = view.last_error.map(|e| e.to_string()).unwrap_or_else(|| view.status.as_str().to_string());
            return Err(anyhow!("session not established: {}", detail));
        }

        let result = console.api.request::<serde_json::Value, serde_json::Value>(method, &path, body.as_ref()).await;
        // always sign out, even when the request failed
        if let Err(e) = console.session.logout().await {
            tracing::warn!("local sign-out failed: {}", e);
        }
        console.session.flush_teardown().await;
        let value = result?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok::<(), anyhow::Error>(())
    })
}
