//! Scenario files
//!
//! A scenario declares a host tree and a list of steps to replay against a
//! coordinator running on the headless host.
//!
//! ```toml
//! [[nodes]]
//! id = "home"
//! kind = "view"
//!
//! [[nodes]]
//! id = "card"
//! parent = "home"
//!
//! [[steps]]
//! action = "register"
//! owner = "weather-card"
//! host = "card"
//! config = { mode = "manual", effect = "rain" }
//!
//! [[steps]]
//! action = "advance"
//! ms = 100
//!
//! [[steps]]
//! action = "expect"
//! view = "home"
//! effect = "rain"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use atmos_types::ProducerConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write report: {0}")]
    Output(#[from] std::io::Error),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("duplicate node '{0}'")]
    DuplicateNode(String),
    #[error("node '{node}' references '{parent}' before it is declared")]
    ParentNotDeclared { node: String, parent: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Plain element (cards, wrappers)
    #[default]
    Element,
    /// Container of one logical view
    View,
    /// Editing surface; producers inside register as previews
    Preview,
    /// Shadow root attached to `parent`
    Shadow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default)]
    pub kind: NodeKind,
    /// Omitted: child of the document root
    pub parent: Option<String>,
    /// Identity carried by a view container. Defaults to `id`; set to an
    /// empty string to let the resolver synthesize one.
    pub view_id: Option<String>,
    /// Created outside the document
    #[serde(default)]
    pub detached: bool,
}

fn default_producer() -> String {
    "fx".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Register {
        owner: String,
        #[serde(default = "default_producer")]
        producer: String,
        host: String,
        preview: Option<bool>,
        #[serde(default)]
        config: ProducerConfig,
    },
    Unregister {
        owner: String,
        #[serde(default = "default_producer")]
        producer: String,
        preview: Option<bool>,
    },
    /// Remove a node from the document
    Detach { node: String },
    /// Move a node under `parent`
    Attach { node: String, parent: String },
    /// Let virtual time pass
    Advance { ms: u64 },
    /// Run a pass now
    Force,
    Environment {
        constrained_viewport: Option<bool>,
        reduced_motion: Option<bool>,
        /// Empty string clears the condition
        condition: Option<String>,
    },
    /// Set a display-condition fact
    Fact { subject: String, value: String },
    /// Control surface layout
    Layout {
        defer: Option<bool>,
        #[serde(default)]
        complete: bool,
    },
    /// Make renderer creation fail
    FailRenderer {
        #[serde(default = "default_failures")]
        count: u32,
    },
    Expect(Expectation),
    Shutdown,
}

fn default_failures() -> u32 {
    1
}

/// Assertions checked against the coordinator. Unset fields are not checked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Expectation {
    pub active_views: Option<usize>,
    pub registered: Option<usize>,
    pub passes: Option<u64>,
    /// View the remaining fields apply to
    pub view: Option<String>,
    /// Empty string expects no overlay for the view
    pub effect: Option<String>,
    pub winner: Option<String>,
    pub state: Option<String>,
    pub opacity: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: Option<String>,
    pub nodes: Vec<NodeSpec>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ScenarioError> {
        toml::from_str(contents).map_err(|e| ScenarioError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents, path)
    }

    pub fn display_name(&self, path: &Path) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| path.display().to_string())
    }
}
