//! Queue command handlers

use anyhow::{bail, Context as _, Result};
use serde_json::Value;
use uuid::Uuid;

use platesync_core::transport::Method;
use platesync_core::{ActionKind, NewAction, PendingAction};

use crate::context::Context;
use crate::output::Output;

/// List pending actions
pub async fn list(ctx: &Context, output: &Output) -> Result<()> {
    let actions = ctx.queue.dequeue_all().await;
    output.print_actions(&actions);
    Ok(())
}

/// Queue a new action
pub async fn add(
    ctx: &Context,
    kind: ActionKind,
    endpoint: String,
    data: Option<String>,
    method: Option<Method>,
    max_retries: Option<u32>,
    output: &Output,
) -> Result<()> {
    let payload = match data {
        Some(raw) => serde_json::from_str(&raw).context("--data must be valid JSON")?,
        None => Value::Null,
    };

    let mut action = NewAction::new(kind, endpoint, payload);
    if let Some(method) = method {
        action = action.with_method(method);
    }
    if let Some(max_retries) = max_retries {
        action = action.with_max_retries(max_retries);
    }

    let id = ctx.queue.enqueue(action).await?;

    if output.is_json() {
        println!("{}", serde_json::json!({ "id": id, "status": "queued" }));
    } else if output.is_quiet() {
        println!("{}", id);
    } else {
        output.success(&format!("Queued action {}", id));
    }
    Ok(())
}

/// Remove a pending action by id or id prefix
pub async fn remove(ctx: &Context, id: String, output: &Output) -> Result<()> {
    let actions = ctx.queue.dequeue_all().await;
    let id = resolve_id(&actions, &id)?;

    if ctx.queue.remove(id).await? {
        output.success(&format!("Removed action {}", id));
    } else {
        output.message(&format!("Action {} was already gone", id));
    }
    Ok(())
}

/// List permanently failed actions
pub async fn dead(ctx: &Context, output: &Output) -> Result<()> {
    let letters = ctx.queue.dead_letters().await;
    output.print_dead_letters(&letters);
    Ok(())
}

/// Forget every failed action
pub async fn clear_dead(ctx: &Context, output: &Output) -> Result<()> {
    let cleared = ctx.queue.clear_dead_letters().await?;
    output.success(&format!("Cleared {} failed action(s)", cleared));
    Ok(())
}

/// Match a full UUID or a unique prefix of one
fn resolve_id(actions: &[PendingAction], input: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(input) {
        return Ok(id);
    }

    let prefix = input.to_ascii_lowercase();
    let matches: Vec<Uuid> = actions
        .iter()
        .map(|a| a.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("No queued action matches '{}'", input),
        _ => bail!(
            "'{}' matches {} actions; use a longer prefix",
            input,
            matches.len()
        ),
    }
}
