//! Collaborative mode: the primary answers and consults supporting agents
//! through `consult` tool calls

use conclave_core::agent::{AgentMessage, ConsultRequest};
use conclave_core::coordination::{CoordinationOutcome, USER_SENDER};
use serde_json::json;
use tracing::{debug, info};

use super::invoke::{RunContext, Step};
use crate::error::{AgentError, CoordinationError, Result};

/// Context flag telling the primary whether it may still consult
pub const CONSULTATION_ALLOWED: &str = "consultation_allowed";

pub(super) async fn run(ctx: &RunContext<'_>) -> Result<CoordinationOutcome> {
    let request = ctx.request;
    let primary = request.primary_agent.as_str();
    let supporting = request.supporting();
    let max_consultations = ctx.coordinator.config.max_consultations;

    let mut messages = request.initial_messages();
    let mut consultations = 0u32;
    ctx.expect(1);

    loop {
        ctx.ensure_active()?;
        let allowed = consultations < max_consultations;
        let mut context = request.context.clone();
        context.insert(CONSULTATION_ALLOWED.to_string(), json!(allowed));

        let step = Step::new(primary, USER_SENDER, &request.query, messages.clone(), &context);
        let response = ctx
            .call(step)
            .await
            .map_err(|source| CoordinationError::PrimaryFailed {
                agent: primary.to_string(),
                step: "collaborative".to_string(),
                source,
            })?;

        let consults = response.consult_requests();
        if consults.is_empty() || !allowed {
            if !consults.is_empty() {
                debug!("Ignoring {} consultation(s) past the cap", consults.len());
            }
            return Ok(ctx.finish(response).await);
        }

        if !response.content.trim().is_empty() {
            messages.push(AgentMessage::agent(response.content.clone()));
        }

        for consult in consults {
            if consultations >= max_consultations {
                debug!("Consultation cap of {} reached", max_consultations);
                break;
            }
            consultations += 1;
            ctx.ensure_active()?;
            let note = consult_agent(ctx, primary, &supporting, &consult).await;
            messages.push(note);
        }
        // The primary is invoked once more after its consultations
        ctx.expect(1);
    }
}

/// Run one consultation and return the message folded into the primary's history
async fn consult_agent(
    ctx: &RunContext<'_>,
    primary: &str,
    supporting: &[&str],
    consult: &ConsultRequest,
) -> AgentMessage {
    let request = ctx.request;
    if !supporting.contains(&consult.agent.as_str()) {
        let err = AgentError::capability(
            &consult.agent,
            "not a supporting agent of this request",
        );
        ctx.degrade(&err).await;
        return AgentMessage::system(format!(
            "Consultation with {} was rejected: {}",
            consult.agent, err
        ));
    }

    info!("{} consults {}", primary, consult.agent);
    ctx.expect(1);
    let step = Step::new(
        &consult.agent,
        primary,
        &consult.query,
        vec![AgentMessage::user(consult.query.clone())],
        &request.context,
    )
    .at_step("consultation");

    match ctx.call(step).await {
        Ok(answer) => AgentMessage::agent(format!("{}: {}", consult.agent, answer.content.trim())),
        Err(err) => {
            ctx.degrade(&err).await;
            AgentMessage::system(format!("Consultation with {} failed: {}", consult.agent, err))
        }
    }
}
