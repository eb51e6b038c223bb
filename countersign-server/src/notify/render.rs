//! Liquid rendering of email templates over a document context.

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template parse error: {0}")]
    Parse(String),
    #[error("template render error: {0}")]
    Render(String),
}

/// Wraps one `liquid::Parser` built with the standard library of filters.
pub struct TemplateRenderer {
    parser: liquid::Parser,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let parser = liquid::ParserBuilder::with_stdlib()
            .build()
            .map_err(|e| RenderError::Parse(e.to_string()))?;
        Ok(Self { parser })
    }

    pub fn render(&self, template: &str, context: &Map<String, Value>) -> Result<String, RenderError> {
        let template = self
            .parser
            .parse(template)
            .map_err(|e| RenderError::Parse(e.to_string()))?;

        template
            .render(&to_liquid_object(context))
            .map_err(|e| RenderError::Render(e.to_string()))
    }
}

fn to_liquid_object(context: &Map<String, Value>) -> liquid::Object {
    let mut object = liquid::Object::new();
    for (key, value) in context {
        object.insert(
            key.clone().into(),
            liquid::model::to_value(value).unwrap_or(liquid::model::Value::Nil),
        );
    }
    object
}
