//! Agent roster: which images make up each avatar.

use serde::{Deserialize, Serialize};

/// One look for an agent (head and body image references)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentVariant {
    pub head: String,
    pub body: String,
}

impl AgentVariant {
    pub fn new(head: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            body: body.into(),
        }
    }
}

/// An avatar with its ordered visual variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    /// Zero-based roster index
    pub id: usize,
    pub variants: Vec<AgentVariant>,
}

impl AgentProfile {
    /// Variant applied when the agent speaks
    pub fn primary_variant(&self) -> Option<&AgentVariant> {
        self.variants.first()
    }
}

/// Known agents, indexed from 0
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    agents: Vec<Vec<AgentVariant>>,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            agents: vec![vec![
                AgentVariant::new("/static/img/eldrin-2.png", "/static/img/eldrin-1.png"),
                AgentVariant::new("/static/img/head-2.png", "/static/img/body-2.png"),
                AgentVariant::new("/static/img/head-3.png", "/static/img/body-3.png"),
            ]],
        }
    }
}

impl Roster {
    pub fn new(agents: Vec<Vec<AgentVariant>>) -> Self {
        Self { agents }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Look up an agent, clamping unknown ids to agent 0.
    ///
    /// Returns `None` only for an empty roster (rejected by `validate`).
    pub fn resolve(&self, id: i64) -> Option<AgentProfile> {
        let index = usize::try_from(id)
            .ok()
            .filter(|&index| index < self.agents.len())
            .unwrap_or_else(|| {
                log::debug!("Agent id {} outside roster of {}, using agent 0", id, self.len());
                0
            });

        self.agents.get(index).map(|variants| AgentProfile {
            id: index,
            variants: variants.clone(),
        })
    }

    /// Every image reference in the roster (for preloading)
    pub fn image_refs(&self) -> impl Iterator<Item = &str> {
        self.agents
            .iter()
            .flatten()
            .flat_map(|variant| [variant.head.as_str(), variant.body.as_str()])
    }

    /// Validate roster (at least one agent, each with a variant)
    pub fn validate(&self) -> Result<(), String> {
        if self.agents.is_empty() {
            return Err("Roster must contain at least one agent".to_string());
        }
        if let Some(index) = self.agents.iter().position(|variants| variants.is_empty()) {
            return Err(format!("Agent {} has no visual variants", index));
        }
        Ok(())
    }
}
