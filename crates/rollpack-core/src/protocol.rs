use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request per connection on the daemon's local socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlRequest {
    StartExperiment {
        package: String,
        version: String,
    },
    StopExperiment {
        package: String,
    },
    PromoteExperiment {
        package: String,
    },
    SetCatalog {
        catalog: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Install {
        package: String,
        version: String,
    },
    Remove {
        package: String,
    },
    Gc {
        package: String,
    },
    Status,
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartExperiment { .. } => "start-experiment",
            Self::StopExperiment { .. } => "stop-experiment",
            Self::PromoteExperiment { .. } => "promote-experiment",
            Self::SetCatalog { .. } => "set-catalog",
            Self::Install { .. } => "install",
            Self::Remove { .. } => "remove",
            Self::Gc { .. } => "gc",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn success(result: Option<Value>) -> Self {
        Self {
            ok: true,
            result,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}
