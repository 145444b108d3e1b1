use crate::error::{HosterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Every operation a backend can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    Completion,
    Embeddings,
    ModelList,
    ModelInfo,
    HealthCheck,
    Version,
}

impl RequestKind {
    pub const ALL: [RequestKind; 7] = [
        RequestKind::Chat,
        RequestKind::Completion,
        RequestKind::Embeddings,
        RequestKind::ModelList,
        RequestKind::ModelInfo,
        RequestKind::HealthCheck,
        RequestKind::Version,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::Completion => "completion",
            RequestKind::Embeddings => "embeddings",
            RequestKind::ModelList => "model_list",
            RequestKind::ModelInfo => "model_info",
            RequestKind::HealthCheck => "health_check",
            RequestKind::Version => "version",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = HosterError;

    fn from_str(s: &str) -> Result<Self> {
        RequestKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HosterError::UnsupportedRequestType(s.to_string()))
    }
}

/// Everything a dispatcher needs to route one call. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct RequestContext {
    kind: RequestKind,
    base_url: String,
    effective_model: Option<String>,
    path_hint: Option<String>,
    args: Value,
}

impl RequestContext {
    pub fn builder(kind: RequestKind, base_url: impl Into<String>) -> RequestContextBuilder {
        RequestContextBuilder {
            kind,
            base_url: base_url.into(),
            effective_model: None,
            path_hint: None,
            args: Value::Object(Default::default()),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn effective_model(&self) -> Option<&str> {
        self.effective_model.as_deref()
    }

    pub fn path_hint(&self) -> Option<&str> {
        self.path_hint.as_deref()
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Request arguments with `model` replaced by the resolved model, if any.
    pub fn args_with_model(&self) -> Value {
        let mut args = self.args.clone();
        if let (Some(model), Some(obj)) = (&self.effective_model, args.as_object_mut()) {
            obj.insert("model".to_string(), Value::String(model.clone()));
        }
        args
    }

    /// Model name for model-scoped calls such as `ModelInfo`.
    pub fn model_name(&self) -> Option<String> {
        self.effective_model.clone().or_else(|| {
            self.args
                .get("model")
                .or_else(|| self.args.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }
}

pub struct RequestContextBuilder {
    kind: RequestKind,
    base_url: String,
    effective_model: Option<String>,
    path_hint: Option<String>,
    args: Value,
}

impl RequestContextBuilder {
    pub fn effective_model(mut self, model: impl Into<String>) -> Self {
        self.effective_model = Some(model.into());
        self
    }

    pub fn path_hint(mut self, path: impl Into<String>) -> Self {
        self.path_hint = Some(path.into());
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn build(self) -> Result<RequestContext> {
        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(HosterError::Config(format!(
                "No backend base URL configured for {} request",
                self.kind
            )));
        }
        if !self.args.is_object() {
            return Err(HosterError::InvalidRequest(
                "request arguments must be a JSON object".to_string(),
            ));
        }
        Ok(RequestContext {
            kind: self.kind,
            base_url,
            effective_model: self.effective_model,
            path_hint: self.path_hint.filter(|p| !p.is_empty()),
            args: self.args,
        })
    }
}
