//! Parallel mode: every agent answers the original query concurrently

use conclave_core::coordination::{CoordinationOutcome, USER_SENDER};
use futures::future::join_all;

use super::invoke::{RunContext, Step};
use super::synthesis::synthesize;
use crate::error::{CoordinationError, Result};

pub(super) async fn run(ctx: &RunContext<'_>) -> Result<CoordinationOutcome> {
    let request = ctx.request;
    let agents = request.agents();
    ctx.expect(agents.len() as u32);
    ctx.ensure_active()?;

    let messages = request.initial_messages();
    let calls = agents.iter().map(|agent| {
        let step = Step::new(agent, USER_SENDER, &request.query, messages.clone(), &request.context);
        ctx.call(step)
    });
    let results = join_all(calls).await;

    let mut outputs = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(response) => outputs.push(response),
            Err(err) => {
                ctx.degrade(&err).await;
                failures.push(err.to_degraded());
            }
        }
    }

    if outputs.is_empty() {
        return Err(CoordinationError::AllAgentsFailed { failures });
    }

    let response = synthesize(ctx, outputs).await;
    Ok(ctx.finish(response).await)
}
