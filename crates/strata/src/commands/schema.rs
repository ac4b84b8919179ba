//! `strata schema`: configured keys, shapes and endpoints.

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use strata_config::{Config, EndpointSpec};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SchemaEntry {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<EndpointSpec>,
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Default")]
    default: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
}

fn to_row(entry: &SchemaEntry) -> SchemaRow {
    SchemaRow {
        key: entry.key.clone(),
        kind: entry.kind.clone(),
        default: entry
            .default
            .as_ref()
            .map_or_else(|| "-".into(), Value::to_string),
        endpoint: match &entry.endpoint {
            Some(EndpointSpec::Http { url, .. }) => format!("http {url}"),
            Some(EndpointSpec::Memory { .. }) => "memory".into(),
            None => "-".into(),
        },
    }
}

pub fn handle(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let entries: Vec<SchemaEntry> = cfg
        .schema
        .iter()
        .map(|(key, shape)| SchemaEntry {
            key: key.clone(),
            kind: shape.kind.to_string(),
            default: shape.default.clone(),
            endpoint: cfg.endpoint.get(key).cloned(),
        })
        .collect();

    let rendered = output::render_list(&global.output, &entries, to_row)?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
