//! Transfer operation handlers
//!
//! Each command probes the server once, then hands the operation to the
//! engine, which either applies it directly or queues it.

use anyhow::{Context, Result};

use waybill_core::{
    CreatePayload, EngineError, EntityRef, OperationPayload, PendingOperation,
    ProductUpdatePayload, SubmitOutcome, UpdatePayload,
};

use crate::output::{Output, OutputFormat};
use crate::runtime::Runtime;

/// Create a transfer
pub async fn create(runtime: &Runtime, payload: CreatePayload, output: &Output) -> Result<()> {
    let name = payload.name.clone();
    let op = PendingOperation::create(payload);
    let local = op.entity_ref;

    let reachable = runtime.check_reachable().await;
    let outcome = runtime
        .engine
        .submit_operation(op, reachable)
        .await
        .map_err(engine_error)
        .with_context(|| format!("Failed to create transfer '{}'", name))?;

    match outcome {
        SubmitOutcome::Applied { entity } => {
            report(output, &outcome, &format!("Created transfer {} ({})", name, entity))
        }
        SubmitOutcome::Queued { .. } => report(
            output,
            &outcome,
            &format!(
                "Transfer {} saved offline as {}; it will be created on the next sync",
                name, local
            ),
        ),
    }
}

/// Change a line quantity
pub async fn update(
    runtime: &Runtime,
    transfer: EntityRef,
    line_id: i64,
    quantity: f64,
    output: &Output,
) -> Result<()> {
    let payload = OperationPayload::Update(UpdatePayload {
        line_id,
        quantity,
        extra: Default::default(),
    });
    submit(runtime, transfer, payload, "Updated line on", output).await
}

/// Change the product of a line
pub async fn product(
    runtime: &Runtime,
    transfer: EntityRef,
    product_id: i64,
    quantity: Option<f64>,
    output: &Output,
) -> Result<()> {
    let payload = OperationPayload::ProductUpdate(ProductUpdatePayload {
        product_id,
        quantity,
        extra: Default::default(),
    });
    submit(runtime, transfer, payload, "Updated product on", output).await
}

pub async fn cancel(runtime: &Runtime, transfer: EntityRef, output: &Output) -> Result<()> {
    submit(runtime, transfer, OperationPayload::Cancel, "Cancelled", output).await
}

pub async fn validate(runtime: &Runtime, transfer: EntityRef, output: &Output) -> Result<()> {
    submit(runtime, transfer, OperationPayload::Validate, "Validated", output).await
}

async fn submit(
    runtime: &Runtime,
    transfer: EntityRef,
    payload: OperationPayload,
    verb: &str,
    output: &Output,
) -> Result<()> {
    let kind = payload.kind();
    let reachable = runtime.check_reachable().await;
    let outcome = runtime
        .engine
        .submit(transfer, payload, reachable)
        .await
        .map_err(engine_error)
        .with_context(|| format!("Failed to {} transfer {}", kind, transfer))?;

    let message = match outcome {
        SubmitOutcome::Applied { entity } => format!("{} transfer {}", verb, entity),
        SubmitOutcome::Queued { id } => format!(
            "Offline: {} for transfer {} queued ({})",
            kind,
            transfer,
            &id.to_string()[..8]
        ),
    };
    report(output, &outcome, &message)
}

fn report(output: &Output, outcome: &SubmitOutcome, message: &str) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            let value = match outcome {
                SubmitOutcome::Applied { entity } => serde_json::json!({
                    "status": "applied",
                    "entity": entity,
                    "message": message
                }),
                SubmitOutcome::Queued { id } => serde_json::json!({
                    "status": "queued",
                    "id": id,
                    "message": message
                }),
            };
            println!("{}", value);
        }
        OutputFormat::Quiet => match outcome {
            SubmitOutcome::Applied { entity } => println!("{}", entity),
            SubmitOutcome::Queued { id } => println!("{}", id),
        },
        OutputFormat::Human => output.success(message),
    }
    Ok(())
}

/// Attach the refusal notice or a storage recovery hint
fn engine_error(error: EngineError) -> anyhow::Error {
    match error {
        EngineError::Rejected(remote) => {
            anyhow::Error::new(remote).context("The server refused the operation")
        }
        EngineError::Storage(storage) => {
            let hint = storage.recovery_suggestion();
            let err = anyhow::Error::new(storage);
            match hint {
                Some(hint) => err.context(hint),
                None => err,
            }
        }
        lost @ EngineError::LeaseLost => anyhow::Error::new(lost),
    }
}
