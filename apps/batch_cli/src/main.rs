use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use list_core::{
    load_settings,
    validation::{non_empty_text, non_negative_number, number},
    BatchResult, FieldRules, HttpResourceApi, ListViewController, ListViewSettings,
};
use shared::{
    domain::{EntityId, FieldName, ResourceName},
    protocol::PageQuery,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "batch_cli", about = "Select, delete and edit rows of an ERP resource")]
struct Cli {
    /// Settings file; defaults to ./list_view.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    resource: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one page of rows.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// Delete the given ids in one bulk request.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Stage `<id>:<field>=<value>` edits and commit them together.
    /// Fields without a `--non-negative` or `--text` rule must be numbers.
    Update {
        #[arg(long = "set", required = true, value_parser = parse_assignment)]
        assignments: Vec<Assignment>,
        #[arg(long = "non-negative")]
        non_negative: Vec<String>,
        #[arg(long = "text")]
        text: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Assignment {
    id: EntityId,
    field: FieldName,
    raw: String,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (id, rest) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected <id>:<field>=<value>, got '{raw}'"))?;
    let (field, value) = rest
        .split_once('=')
        .ok_or_else(|| format!("expected <id>:<field>=<value>, got '{raw}'"))?;
    if id.trim().is_empty() || field.trim().is_empty() {
        return Err(format!("id and field must not be empty in '{raw}'"));
    }
    Ok(Assignment {
        id: EntityId::parse_lenient(id),
        field: FieldName::from(field.trim()),
        raw: value.to_string(),
    })
}

fn field_rules(assignments: &[Assignment], non_negative: &[String], text: &[String]) -> FieldRules {
    let mut rules = FieldRules::new();
    let named: BTreeSet<&str> = assignments.iter().map(|a| a.field.as_str()).collect();
    for field in named {
        rules = rules.field(field, number);
    }
    for field in non_negative {
        rules = rules.field(field.as_str(), non_negative_number);
    }
    for field in text {
        rules = rules.field(field.as_str(), non_empty_text);
    }
    rules
}

fn print_outcome(result: &BatchResult) {
    println!(
        "{} of {} succeeded",
        result.succeeded_count(),
        result.total_attempted
    );
    for (id, error) in &result.failed {
        println!("  failed {id}: {error}");
    }
    for invalid in &result.invalid {
        println!(
            "  skipped {}: '{}' {}",
            invalid.key, invalid.raw, invalid.reason
        );
    }
}

fn settings_for(cli: &Cli) -> Result<ListViewSettings> {
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(url) = &cli.server_url {
        settings.server_url = url.clone();
    }
    if let Some(resource) = &cli.resource {
        settings.resource = resource.clone();
    }
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let settings = settings_for(&cli)?;
    info!(
        "batch_cli: using server_url={} resource={}",
        settings.server_url, settings.resource
    );

    let api = HttpResourceApi::new(
        &settings.server_url,
        ResourceName::from(settings.resource.as_str()),
    )
    .context("failed to build resource client")?;
    let api = Arc::new(api);

    match cli.command {
        Command::List {
            page,
            page_size,
            filters,
        } => {
            let view = ListViewController::new(api, Arc::new(FieldRules::new()), &settings);
            let mut query =
                PageQuery::first(page_size.unwrap_or(settings.page_size)).with_page(page);
            for (key, value) in filters {
                query = query.with_filter(key, value);
            }
            let snapshot = view.load_page(query).await?;
            for entity in &snapshot.items {
                println!(
                    "{}\t{}",
                    entity.id,
                    serde_json::to_string(&entity.fields)?
                );
            }
            println!(
                "page {} shows {} of {} rows",
                snapshot.query.page,
                snapshot.items.len(),
                snapshot.total_count
            );
        }
        Command::Delete { ids } => {
            let view = ListViewController::new(api, Arc::new(FieldRules::new()), &settings);
            view.select_ids(ids.iter().map(|raw| EntityId::parse_lenient(raw)));
            view.request_delete()?;
            let result = view.confirm_delete().await?;
            print_outcome(&result);
        }
        Command::Update {
            assignments,
            non_negative,
            text,
        } => {
            let rules = field_rules(&assignments, &non_negative, &text);
            let view = ListViewController::new(api, Arc::new(rules), &settings);
            view.enter_edit_mode()?;
            for assignment in assignments {
                view.update_value(assignment.id, assignment.field, assignment.raw)?;
            }
            let result = view.commit().await?;
            print_outcome(&result);
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/cli_tests.rs"]
mod tests;
