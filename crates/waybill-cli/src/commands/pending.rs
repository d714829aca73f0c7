//! Pending queue handlers

use anyhow::{bail, Context, Result};

use waybill_core::{OperationId, OperationKind, PendingOperation};

use crate::output::Output;
use crate::runtime::Runtime;

/// List queued operations, in drain order when no kind is given
pub fn list(runtime: &Runtime, kind: Option<OperationKind>, output: &Output) -> Result<()> {
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => OperationKind::DRAIN_ORDER.to_vec(),
    };

    let mut ops = Vec::new();
    for kind in kinds {
        ops.extend(
            runtime
                .engine
                .list_pending(kind)
                .with_context(|| format!("Failed to read the {} queue", kind))?,
        );
    }

    output.print_pending(&ops)
}

/// Discard a queued operation by full id or unique prefix
pub fn discard(runtime: &Runtime, kind: OperationKind, id: &str, output: &Output) -> Result<()> {
    let id = match id.parse::<OperationId>() {
        Ok(id) => id,
        Err(_) => {
            let queued = runtime
                .engine
                .list_pending(kind)
                .with_context(|| format!("Failed to read the {} queue", kind))?;
            resolve_prefix(&queued, id)?
        }
    };

    let removed = runtime
        .engine
        .discard(kind, id)
        .with_context(|| format!("Failed to discard {} {}", kind, id))?;

    if !removed {
        bail!("No pending {} operation with id {}", kind, id);
    }

    output.success(&format!("Discarded {} {}", kind, id));
    Ok(())
}

fn resolve_prefix(queued: &[PendingOperation], prefix: &str) -> Result<OperationId> {
    let prefix = prefix.trim().to_ascii_lowercase();
    if prefix.is_empty() {
        bail!("Operation id cannot be empty");
    }

    let matches: Vec<_> = queued
        .iter()
        .filter(|op| op.id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [op] => Ok(op.id),
        [] => bail!("No pending operation matches '{}'", prefix),
        _ => bail!(
            "'{}' matches {} operations; use more characters",
            prefix,
            matches.len()
        ),
    }
}
