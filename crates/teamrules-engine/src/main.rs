//! teamrules CLI
//!
//! `teamrules [--metrics] [config.yaml] [request.json]`
//! - Loads the service config and the manifest it points at
//! - Compiles every entity policy and logs the operations it can allow
//! - With a request file, decides it against a store holding the request's
//!   snapshot and prints `allow` or `deny`
//! - `--metrics` prints the metrics registry (Prometheus text) at the end

use std::collections::BTreeMap;
use std::fs;
use std::process::ExitCode;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use teamrules_core::error::{PermError, Result};
use teamrules_core::model::{Actor, Decision, OperationKind, Record};
use teamrules_engine::app_state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Request {
    #[serde(default)]
    actor: Actor,
    entity: String,
    op: OperationKind,
    record: Record,
    /// Entity type -> stored records the rule may traverse.
    #[serde(default)]
    snapshot: BTreeMap<String, Vec<Record>>,
}

fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let (flags, mut args): (Vec<String>, Vec<String>) = std::env::args().skip(1).partition(|a| a.starts_with("--"));
    let show_metrics = flags.iter().any(|f| f == "--metrics");
    if let Some(unknown) = flags.iter().find(|f| *f != "--metrics") {
        eprintln!("teamrules: unknown flag {unknown}");
        return ExitCode::FAILURE;
    }
    let request_path = (args.len() > 1).then(|| args.remove(1));
    let config_path = args.pop().unwrap_or_else(|| "teamrules.yaml".to_string());

    match run(&config_path, request_path.as_deref(), show_metrics) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.client_code().as_str(), "{e}");
            eprintln!("teamrules: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str, request_path: Option<&str>, show_metrics: bool) -> Result<()> {
    let state = AppState::load(config_path)?;

    let policy = state.authorizer().policy();
    for entity in policy.entity_names() {
        if policy.is_quarantined(entity) {
            tracing::warn!(entity, "quarantined (denies every request)");
            continue;
        }
        let ops: Vec<&str> = policy.permitted_ops(entity).into_iter().map(OperationKind::as_str).collect();
        tracing::info!(entity, ops = %ops.join(","), "entity ready");
    }

    if let Some(path) = request_path {
        let decision = decide(&state, path)?;
        println!("{}", decision.as_str());
    }
    if show_metrics {
        print!("{}", state.metrics().render());
    }
    Ok(())
}

fn decide(state: &AppState, path: &str) -> Result<Decision> {
    let raw = fs::read_to_string(path)
        .map_err(|e| PermError::Internal(format!("read request failed ({path}): {e}")))?;
    let req: Request =
        serde_json::from_str(&raw).map_err(|e| PermError::BadRequest(format!("invalid request json: {e}")))?;

    let store = state.store();
    for (entity, records) in req.snapshot {
        for record in records {
            store.import(&entity, record)?;
        }
    }

    store.authorize(&req.actor, &req.entity, req.op, &req.record)
}
