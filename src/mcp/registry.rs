use super::schema::{self, SchemaError};
use super::tool::{Tool, ToolFamily, ToolResult};
use crate::error::ToolError;
use crate::params::Arguments;
use crate::session::Session;
use jsonschema::{Draft, Validator};
use ringlog::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool {0:?} is already registered")]
    Duplicate(String),
    #[error("tool {tool:?} has an invalid input schema: {source}")]
    Schema {
        tool: String,
        #[source]
        source: SchemaError,
    },
    #[error("tool {tool:?} input schema does not compile: {reason}")]
    Compile { tool: String, reason: String },
}

/// Name to handler map, frozen once the server starts.
#[derive(Default)]
pub struct Registry {
    tools: Vec<Tool>,
    validators: Vec<Validator>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let has_properties = schema::validate(&tool.metadata.input_schema).map_err(|source| RegistryError::Schema {
            tool: name.clone(),
            source,
        })?;
        if !has_properties {
            warn!("tool {name} declares no input properties");
        }
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&tool.metadata.input_schema)
            .map_err(|e| RegistryError::Compile {
                tool: name.clone(),
                reason: e.to_string(),
            })?;
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        self.validators.push(validator);
        Ok(())
    }

    pub fn register_family(&mut self, family: Arc<dyn ToolFamily>) -> Result<(), RegistryError> {
        let name = family.name();
        let tools = family.tools();
        debug!("registering {} tools from the {name} family", tools.len());
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|i| &self.tools[*i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    /// Entries for `tools/list`, in registration order.
    pub fn list(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.metadata.to_json()).collect()
    }

    /// Check `args` against the tool's input schema. Null entries count as
    /// absent, matching how the parameter binders read them.
    fn check_arguments(&self, index: usize, args: &Arguments) -> Result<(), ToolError> {
        let present: Arguments = args
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let instance = Value::Object(present);
        let errors: Vec<String> = self.validators[index]
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolError::invalid(errors.join("; ")))
        }
    }

    pub async fn call(&self, name: &str, session: Session, args: Arguments) -> Result<ToolResult, ToolError> {
        let index = *self
            .index
            .get(name)
            .ok_or_else(|| ToolError::Unimplemented(format!("unknown tool {name:?}")))?;
        let tool = &self.tools[index];
        if let Err(e) = self.check_arguments(index, &args) {
            warn!("tool {name} rejected its arguments: {e}");
            return Err(e);
        }

        let started = Instant::now();
        let result = tool.call(session, args).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => debug!("tool {name} completed in {elapsed:?}"),
            Err(e) => warn!("tool {name} failed after {elapsed:?}: {e}"),
        }
        result
    }
}
