//! Debate mode: agents refine their positions over several rounds

use conclave_core::agent::{AgentMessage, AgentResponse};
use conclave_core::coordination::{CoordinationOutcome, USER_SENDER};
use futures::future::join_all;
use tracing::debug;

use super::invoke::{RunContext, Step};
use super::synthesis::synthesize;
use crate::error::{CoordinationError, Result};

pub(super) async fn run(ctx: &RunContext<'_>) -> Result<CoordinationOutcome> {
    let request = ctx.request;
    let rounds = request
        .max_rounds
        .unwrap_or(ctx.coordinator.config.debate_rounds)
        .max(1);
    let agents = request.agents();
    ctx.expect(agents.len() as u32 * rounds);

    // Latest position per agent still in the debate, in declared order
    let mut positions: Vec<(&str, Option<AgentResponse>)> =
        agents.iter().map(|agent| (*agent, None)).collect();
    let mut failures = Vec::new();

    for round in 1..=rounds {
        ctx.ensure_active()?;
        debug!("Debate round {}/{} with {} agent(s)", round, rounds, positions.len());

        let calls = positions.iter().map(|(agent, _)| {
            let messages = round_messages(ctx, agent, round, rounds, &positions);
            let step = Step::new(agent, USER_SENDER, &request.query, messages, &request.context)
                .in_round(round);
            ctx.call(step)
        });
        let results = join_all(calls).await;

        let mut next = Vec::with_capacity(positions.len());
        for ((agent, _), result) in positions.iter().zip(results) {
            match result {
                Ok(response) => next.push((*agent, Some(response))),
                Err(err) => {
                    ctx.degrade(&err).await;
                    failures.push(err.to_degraded());
                }
            }
        }
        positions = next;

        if positions.is_empty() {
            return Err(CoordinationError::AllAgentsFailed { failures });
        }
    }

    let finals: Vec<AgentResponse> = positions
        .into_iter()
        .filter_map(|(_, position)| position)
        .collect();
    let response = synthesize(ctx, finals).await;
    Ok(ctx.finish(response).await)
}

/// Round 1 is the bare query. Later rounds add every other agent's previous
/// position and ask for a refined one.
fn round_messages(
    ctx: &RunContext<'_>,
    agent: &str,
    round: u32,
    rounds: u32,
    positions: &[(&str, Option<AgentResponse>)],
) -> Vec<AgentMessage> {
    let mut messages = ctx.request.initial_messages();
    if round == 1 {
        return messages;
    }
    for (other, position) in positions {
        if *other == agent {
            continue;
        }
        if let Some(position) = position {
            messages.push(AgentMessage::agent(format!(
                "{}: {}",
                other,
                position.content.trim()
            )));
        }
    }
    if let Some((_, Some(own))) = positions.iter().find(|(name, _)| *name == agent) {
        messages.push(AgentMessage::system(format!(
            "Your previous position: {}",
            own.content.trim()
        )));
    }
    messages.push(AgentMessage::system(format!(
        "Debate round {} of {}: refine your position in light of the other agents' positions.",
        round, rounds
    )));
    messages
}
