//! Agent profiles: which persona and which tool capabilities a session gets.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A single tool capability an agent may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read the project context file.
    ContextFile,
    /// Read files under the project root.
    ProjectFiles,
    /// The backend's built-in web search.
    WebSearch,
    /// Push text to the client's clipboard history.
    Clipboard,
    /// Point at a screen location on the client.
    Cursor,
}

impl Capability {
    /// The capability a function tool belongs to, by tool name.
    pub fn for_tool(name: &str) -> Option<Self> {
        match name {
            "read_context_file" => Some(Self::ContextFile),
            "open_project_file" => Some(Self::ProjectFiles),
            "push_clipboard_prompt" => Some(Self::Clipboard),
            "move_visual_cursor" => Some(Self::Cursor),
            _ => None,
        }
    }
}

/// The available agent variants, each a fixed bundle of capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentProfile {
    /// A critical pair-programming partner with every tool.
    #[default]
    PairProgrammer,
    /// Answers questions using web search only.
    SearchAssistant,
}

impl AgentProfile {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::PairProgrammer => &[
                Capability::ContextFile,
                Capability::ProjectFiles,
                Capability::WebSearch,
                Capability::Clipboard,
                Capability::Cursor,
            ],
            Self::SearchAssistant => &[Capability::WebSearch],
        }
    }

    pub fn spec(&self) -> AgentSpec {
        match self {
            Self::PairProgrammer => AgentSpec {
                name: "pair_programmer".to_string(),
                instruction: PAIR_PROGRAMMER_INSTRUCTION.to_string(),
                capabilities: self.capabilities().to_vec(),
            },
            Self::SearchAssistant => AgentSpec {
                name: "search_assistant".to_string(),
                instruction: "Answer the question using the Google Search tool.".to_string(),
                capabilities: self.capabilities().to_vec(),
            },
        }
    }
}

impl FromStr for AgentProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pair_programmer" => Ok(Self::PairProgrammer),
            "search_assistant" => Ok(Self::SearchAssistant),
            other => Err(format!("unknown agent profile '{other}'")),
        }
    }
}

/// Everything a backend needs to know about the agent it is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: String,
    pub instruction: String,
    pub capabilities: Vec<Capability>,
}

impl AgentSpec {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

const PAIR_PROGRAMMER_INSTRUCTION: &str = "\
You are an expert pair programming partner who thinks critically and challenges ideas \
constructively, just like a skilled human colleague would. Ask probing questions, suggest \
better approaches, and catch potential issues before they become problems.

Your available tools:
- read_context_file: Read the project context file to understand current requirements, goals and conventions
- open_project_file: Read and analyze any file in the current project
- google_search: Search the web for current information, documentation and best practices
- push_clipboard_prompt: Send code snippets or text to the user's clipboard for easy pasting
- move_visual_cursor: Point to specific screen locations to guide the user's attention

Start by reading the project context. Be direct but constructive, and keep answers short.";
