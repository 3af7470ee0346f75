//! Merging surviving agent outputs into one response

use conclave_core::agent::{AgentMessage, AgentResponse};
use serde_json::json;
use tracing::warn;

use super::invoke::{RunContext, Step};
use crate::config::SynthesisMode;

/// Sender recorded on interactions the coordinator itself initiates
pub const COORDINATOR_SENDER: &str = "coordinator";

/// Combine `outputs` (declared agent order) into the run's response
pub(super) async fn synthesize(ctx: &RunContext<'_>, outputs: Vec<AgentResponse>) -> AgentResponse {
    let primary = ctx.request.primary_agent.as_str();
    let contributors: Vec<String> = outputs.iter().map(|o| o.agent_name.clone()).collect();
    let degraded: Vec<String> = ctx
        .degraded()
        .await
        .into_iter()
        .map(|d| d.agent)
        .collect();

    let merged = match ctx.coordinator.config.synthesis {
        SynthesisMode::Primary if outputs.len() > 1 => {
            match reconcile(ctx, &outputs).await {
                Some(response) => response,
                None => deterministic(primary, &outputs),
            }
        }
        _ => deterministic(primary, &outputs),
    };

    merged
        .with_metadata("synthesized", json!(true))
        .with_metadata("contributors", json!(contributors))
        .with_metadata("degraded_agents", json!(degraded))
}

/// Labelled sections in declared order. A single output is passed through.
fn deterministic(primary: &str, outputs: &[AgentResponse]) -> AgentResponse {
    if let [only] = outputs {
        let mut response = only.clone();
        response.agent_name = primary.to_string();
        return response;
    }
    let content = outputs
        .iter()
        .map(|o| format!("## {}\n{}", o.agent_name, o.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    AgentResponse::new(primary, content)
}

/// Ask one agent to reconcile the outputs: the primary when it survived,
/// otherwise the first surviving agent
async fn reconcile(ctx: &RunContext<'_>, outputs: &[AgentResponse]) -> Option<AgentResponse> {
    let request = ctx.request;
    let synthesizer = outputs
        .iter()
        .find(|o| o.agent_name == request.primary_agent)
        .or_else(|| outputs.first())?
        .agent_name
        .clone();

    let mut messages = vec![AgentMessage::user(request.query.clone())];
    messages.extend(
        outputs
            .iter()
            .map(|o| AgentMessage::agent(format!("{}: {}", o.agent_name, o.content.trim()))),
    );
    messages.push(AgentMessage::system(
        "Reconcile the positions above into a single answer to the user's question.",
    ));

    if ctx.ensure_active().is_err() {
        return None;
    }
    ctx.expect(1);
    let step = Step::new(
        &synthesizer,
        COORDINATOR_SENDER,
        &request.query,
        messages,
        &request.context,
    )
    .at_step("synthesis");

    match ctx.call(step).await {
        Ok(response) => Some(response),
        Err(e) => {
            warn!("Synthesis by {} failed, merging outputs as-is: {}", synthesizer, e);
            None
        }
    }
}
