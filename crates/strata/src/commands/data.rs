//! Data command handlers: fetch, write, deploy.

use serde::Serialize;
use serde_json::Value;

use strata_core::{Action, ActionKind, Context, Provider, Query, Source};

use crate::cli::{DeployArgs, FetchArgs, GlobalOpts, WriteArgs};
use crate::error::CliError;
use crate::output;

/// Component id the CLI registers under.
const COMPONENT: &str = "strata-cli";

// ── Output shapes ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct FetchOutput {
    key: String,
    source: Option<Source>,
    revision: Option<u64>,
    data: Value,
}

#[derive(Debug, Serialize)]
struct DeployOutput {
    key: String,
    actions: usize,
    revision: Option<u64>,
    committed: Option<Value>,
}

impl DeployOutput {
    fn from_context(key: String, ctx: Context) -> Self {
        let response = ctx.into_response();
        Self {
            key,
            actions: response.actions.len(),
            revision: response.revision,
            committed: response.data,
        }
    }
}

#[derive(Debug, Serialize)]
struct WriteOutput {
    action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployed: Option<DeployOutput>,
}

fn pretty(value: &Value) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn deploy_detail(out: &DeployOutput) -> Result<String, CliError> {
    if out.actions == 0 {
        return Ok(format!("Nothing pending for '{}'", out.key));
    }
    let mut text = format!("Deployed {} action(s) to '{}'", out.actions, out.key);
    if let Some(committed) = &out.committed {
        text.push_str("\n\n");
        text.push_str(&pretty(committed)?);
    }
    Ok(text)
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn fetch(provider: &Provider, args: FetchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let query: Query = args.query.into_iter().collect();
    let ctx = provider.fetch(args.key.clone(), COMPONENT, query, None).await?;
    let response = ctx.into_response();

    let out = FetchOutput {
        key: args.key,
        source: response.source,
        revision: response.revision,
        data: response.data.unwrap_or(Value::Null),
    };
    let rendered = output::render_single(&global.output, &out, |o| {
        let source = o.source.map_or_else(|| "-".into(), |s| s.to_string());
        Ok(format!("{} ({source})\n\n{}", o.key, pretty(&o.data)?))
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

pub async fn write(provider: &Provider, args: WriteArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let kind = ActionKind::from(args.kind);
    if kind == ActionKind::Delete && args.id.is_none() && args.path.is_none() {
        return Err(CliError::Validation {
            field: "--kind delete".into(),
            reason: "needs --id or --path".into(),
        });
    }

    let value = match args.value.as_deref() {
        Some(raw) => serde_json::from_str(raw).map_err(|e| CliError::Validation {
            field: "--value".into(),
            reason: e.to_string(),
        })?,
        None => Value::Null,
    };

    let mut action = Action::new(kind, args.key.clone()).with_value(value);
    if let Some(id) = args.id {
        action = action.with_id(id);
    }
    if let Some(path) = args.path {
        action = action.with_path(path);
    }

    if let Some(run) = provider.request(action.clone()) {
        run.await?;
    }

    let deployed = if args.deploy {
        let ctx = provider.deploy(args.key.clone(), None).await?;
        Some(DeployOutput::from_context(args.key, ctx))
    } else {
        None
    };

    let out = WriteOutput { action, deployed };
    let rendered = output::render_single(&global.output, &out, |o| match &o.deployed {
        Some(deployed) => deploy_detail(deployed),
        None => Ok(format!(
            "Buffered {} on '{}' (not deployed; pass --deploy to commit)",
            o.action.kind,
            o.action.key()
        )),
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

pub async fn deploy(provider: &Provider, args: DeployArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let ctx = provider.deploy(args.key.clone(), args.id).await?;
    let out = DeployOutput::from_context(args.key, ctx);
    let rendered = output::render_single(&global.output, &out, deploy_detail)?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
