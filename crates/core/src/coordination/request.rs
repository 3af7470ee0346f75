//! Coordination request model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentMessage, ContextMap};
use crate::{Error, Result};

/// Strategy used to combine several agents into one answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    #[default]
    Sequential,
    Parallel,
    Collaborative,
    Debate,
}

impl CoordinationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Collaborative => "collaborative",
            Self::Debate => "debate",
        }
    }
}

impl fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "collaborative" => Ok(Self::Collaborative),
            "debate" => Ok(Self::Debate),
            other => Err(Error::InvalidInput(format!(
                "Unknown coordination mode: {}",
                other
            ))),
        }
    }
}

/// One user request to be answered by one or more agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub query: String,
    pub primary_agent: String,
    #[serde(default)]
    pub supporting_agents: Vec<String>,
    #[serde(default)]
    pub coordination_mode: CoordinationMode,
    #[serde(default)]
    pub context: ContextMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

impl CoordinationRequest {
    pub fn new(query: impl Into<String>, primary_agent: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            primary_agent: primary_agent.into(),
            supporting_agents: Vec::new(),
            coordination_mode: CoordinationMode::default(),
            context: ContextMap::new(),
            max_rounds: None,
        }
    }

    pub fn with_mode(mut self, mode: CoordinationMode) -> Self {
        self.coordination_mode = mode;
        self
    }

    pub fn with_supporting<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supporting_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    /// Supporting agents in declared order, without duplicates or the primary
    pub fn supporting(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.supporting_agents.len());
        for agent in &self.supporting_agents {
            let agent = agent.trim();
            if agent.is_empty() || agent == self.primary_agent || seen.contains(&agent) {
                continue;
            }
            seen.push(agent);
        }
        seen
    }

    /// All participating agents: the primary first, then the supporting agents
    pub fn agents(&self) -> Vec<&str> {
        let mut agents = vec![self.primary_agent.as_str()];
        agents.extend(self.supporting());
        agents
    }

    /// Initial message history handed to the first agent(s)
    pub fn initial_messages(&self) -> Vec<AgentMessage> {
        vec![AgentMessage::user(self.query.clone())]
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        if self.primary_agent.trim().is_empty() {
            return Err(Error::InvalidInput(
                "primary_agent must not be empty".to_string(),
            ));
        }
        if self.max_rounds == Some(0) {
            return Err(Error::InvalidInput(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agents_dedup_and_order() {
        let request = CoordinationRequest::new("q", "pm").with_supporting(["ux", "pm", "eng", "ux", " "]);
        assert_eq!(request.agents(), vec!["pm", "ux", "eng"]);
        assert_eq!(request.supporting(), vec!["ux", "eng"]);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "Debate".parse::<CoordinationMode>().unwrap(),
            CoordinationMode::Debate
        );
        assert!("round_robin".parse::<CoordinationMode>().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{"query":"Plan a launch","primary_agent":"pm"}"#;
        let request: CoordinationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.coordination_mode, CoordinationMode::Sequential);
        assert!(request.supporting_agents.is_empty());
        assert!(request.max_rounds.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(CoordinationRequest::new("", "pm").validate().is_err());
        assert!(CoordinationRequest::new("q", "").validate().is_err());
        assert!(CoordinationRequest::new("q", "pm")
            .with_max_rounds(0)
            .validate()
            .is_err());
        assert!(CoordinationRequest::new("q", "pm").validate().is_ok());
    }
}
