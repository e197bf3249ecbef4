use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{ToolError, ToolResult};

pub type ToolId = String;

/// The closed set of implementations a tool can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Fetch,
    BatchFetch,
    ExtractTable,
    Translate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
}

impl ParamType {
    fn schema(&self) -> Value {
        match self {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::StringList => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub param_type: ParamType,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type: ParamType::String,
            required,
        }
    }

    pub fn with_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: ToolId,
    pub name: String,
    /// Read by the decision procedure when choosing a tool.
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub kind: ToolKind,
}

/// What the decision procedure is shown for one permitted tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
}

impl ToolDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ToolKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            kind,
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// A definition carrying the standard parameters of its kind.
    pub fn builtin(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ToolKind,
    ) -> Self {
        kind.parameters()
            .into_iter()
            .fold(Self::new(id, name, description, kind), Self::with_parameter)
    }

    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = param.param_type.schema();
            if let Some(obj) = prop.as_object_mut() {
                obj.insert("description".to_string(), json!(param.description));
            }
            properties.insert(param.name.clone(), prop);

            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    pub fn catalog_entry(&self) -> CatalogEntry {
        CatalogEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }

    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
        }
    }

    /// Checks the declared schema against what the bound implementation can accept.
    pub fn check_schema(&self) -> std::result::Result<(), String> {
        let known = self.kind.parameters();

        for param in &self.parameters {
            let Some(expected) = known.iter().find(|k| k.name == param.name) else {
                return Err(format!(
                    "parameter '{}' is not accepted by {:?} tools",
                    param.name, self.kind
                ));
            };
            if expected.param_type != param.param_type {
                return Err(format!(
                    "parameter '{}' must be of type {:?}",
                    param.name, expected.param_type
                ));
            }
        }

        for expected in known.iter().filter(|k| k.required) {
            let declared = self.parameters.iter().find(|p| p.name == expected.name);
            if !declared.map(|p| p.required).unwrap_or(false) {
                return Err(format!("parameter '{}' must be declared as required", expected.name));
            }
        }

        Ok(())
    }

    /// Validates call arguments against [`Self::input_schema`]. A `null` value
    /// counts as an omitted parameter.
    pub fn validate_arguments(&self, arguments: &Value) -> ToolResult<()> {
        let schema = self.input_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            ToolError::InvalidArguments(format!("schema for '{}' is invalid: {}", self.id, e))
        })?;

        let arguments = match arguments {
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        };

        let errors: Vec<String> = validator.iter_errors(&arguments).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolError::InvalidArguments(format!(
                "arguments for '{}' do not match its schema: {}",
                self.id,
                errors.join("; ")
            )))
        }
    }
}

impl ToolKind {
    /// Parameters the typed argument struct for this kind understands.
    pub fn parameters(&self) -> Vec<ToolParameter> {
        match self {
            ToolKind::Fetch => vec![
                ToolParameter::new("url", "Absolute http(s) URL of the page to read", true),
            ],
            ToolKind::BatchFetch => vec![
                ToolParameter::new("urls", "Absolute http(s) URLs to scrape, in order", true)
                    .with_type(ParamType::StringList),
            ],
            ToolKind::ExtractTable => vec![
                ToolParameter::new("url", "Absolute http(s) URL of the page holding the tables", true),
                ToolParameter::new("table_index", "Zero-based index of a single table to export", false)
                    .with_type(ParamType::Integer),
            ],
            ToolKind::Translate => vec![
                ToolParameter::new("text", "Text to translate", true),
                ToolParameter::new("target_language", "Language to translate into, e.g. French", true),
                ToolParameter::new("source_language", "Language of the input text if known", false),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_tool() -> ToolDefinition {
        ToolDefinition::builtin("scrape_web_page", "Scrape web page", "Reads one page", ToolKind::Fetch)
    }

    #[test]
    fn test_input_schema() {
        let tool = ToolDefinition::builtin("extract", "Extract", "Tables", ToolKind::ExtractTable);
        let schema = tool.input_schema();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["url"]["type"], "string");
        assert_eq!(schema["properties"]["table_index"]["type"], "integer");
        assert_eq!(schema["required"], json!(["url"]));
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn test_string_list_schema() {
        let tool = ToolDefinition::builtin("batch", "Batch", "Many pages", ToolKind::BatchFetch);
        let schema = tool.input_schema();
        assert_eq!(schema["properties"]["urls"]["type"], "array");
        assert_eq!(schema["properties"]["urls"]["items"]["type"], "string");
    }

    #[test]
    fn test_validate_arguments() {
        let tool = fetch_tool();

        assert!(tool.validate_arguments(&json!({ "url": "https://example.com" })).is_ok());

        let missing = tool.validate_arguments(&json!({})).unwrap_err();
        assert_eq!(missing.kind(), "invalid_arguments");

        let wrong_type = tool.validate_arguments(&json!({ "url": 42 }));
        assert!(matches!(wrong_type, Err(ToolError::InvalidArguments(_))));

        let unknown = tool.validate_arguments(&json!({ "url": "https://a.b", "depth": 3 }));
        assert!(matches!(unknown, Err(ToolError::InvalidArguments(_))));

        let not_object = tool.validate_arguments(&json!("https://example.com"));
        assert!(matches!(not_object, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn test_catalog_schema_and_validation_agree_on_extra_keys() {
        let tool = fetch_tool();
        let entry = tool.catalog_entry();
        let extra = json!({ "url": "https://a.b", "depth": 3 });

        assert_eq!(entry.input_schema["additionalProperties"], false);
        assert!(!jsonschema::is_valid(&entry.input_schema, &extra));
        match tool.validate_arguments(&extra) {
            Err(ToolError::InvalidArguments(message)) => assert!(message.contains("depth")),
            other => panic!("expected InvalidArguments, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_parameter_may_be_null() {
        let tool = ToolDefinition::builtin("extract", "Extract", "Tables", ToolKind::ExtractTable);
        assert!(tool
            .validate_arguments(&json!({ "url": "https://example.com", "table_index": null }))
            .is_ok());
        assert!(tool
            .validate_arguments(&json!({ "url": "https://example.com", "table_index": 1.5 }))
            .is_err());
    }

    #[test]
    fn test_check_schema() {
        assert!(fetch_tool().check_schema().is_ok());

        let extra = fetch_tool().with_parameter(ToolParameter::new("depth", "Crawl depth", false));
        assert!(extra.check_schema().is_err());

        let missing_required = ToolDefinition::new("t", "T", "Translate", ToolKind::Translate)
            .with_parameter(ToolParameter::new("text", "Text", true));
        assert!(missing_required.check_schema().is_err());

        let wrong_type = ToolDefinition::new("b", "B", "Batch", ToolKind::BatchFetch)
            .with_parameter(ToolParameter::new("urls", "Urls", true));
        assert!(wrong_type.check_schema().is_err());
    }
}
