//! Sequential mode: agents answer in turn, each seeing the previous outputs

use conclave_core::agent::{AgentMessage, AgentResponse};
use conclave_core::coordination::{CoordinationOutcome, USER_SENDER};

use super::invoke::{RunContext, Step};
use crate::error::{CoordinationError, Result};

pub(super) async fn run(ctx: &RunContext<'_>) -> Result<CoordinationOutcome> {
    let request = ctx.request;
    let agents = request.agents();
    ctx.expect(agents.len() as u32);

    let mut messages = request.initial_messages();
    let mut last: Option<AgentResponse> = None;
    let mut from = USER_SENDER;

    for (index, agent) in agents.iter().copied().enumerate() {
        ctx.ensure_active()?;
        let step = Step::new(agent, from, &request.query, messages.clone(), &request.context);

        match ctx.call(step).await {
            Ok(response) => {
                messages.push(AgentMessage::agent(response.content.clone()));
                last = Some(response);
                from = agent;
            }
            Err(source) if index == 0 => {
                return Err(CoordinationError::PrimaryFailed {
                    agent: agent.to_string(),
                    step: "sequential".to_string(),
                    source,
                });
            }
            Err(err) => ctx.degrade(&err).await,
        }
    }

    // The primary always answers first, so a result exists at this point
    let response = last.ok_or_else(|| CoordinationError::AllAgentsFailed {
        failures: Vec::new(),
    })?;
    Ok(ctx.finish(response).await)
}
