//! Mail templates.
//!
//! The core only picks a [`TemplateKind`] and fills a context map; the
//! wording belongs to the [`TemplateService`]. [`BuiltinTemplates`] ships
//! plain-text defaults with `{{key}}` placeholders.

use std::collections::BTreeMap;
use thiserror::Error;

/// Which message to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Draw result for a participant who received at least one seat
    Drawn,
    /// Draw result for a participant who received nothing
    DrawnNoLuck,
    /// Confirmation of a single-seat registration
    FifoConfirmation,
}

/// Values substituted into a template
pub type TemplateContext = BTreeMap<String, String>;

/// Subject and body produced by a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Rendering failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template references a key missing from the context
    #[error("Template {kind:?} references missing key `{key}`")]
    MissingKey {
        /// Template being rendered
        kind: TemplateKind,
        /// Missing key
        key: String,
    },

    /// A `{{` without a matching `}}`
    #[error("Template {0:?} has an unterminated placeholder")]
    Unterminated(TemplateKind),
}

/// Template renderer
pub trait TemplateService: Send + Sync {
    /// Render `kind` with `context`
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template cannot be filled.
    fn render(
        &self,
        kind: TemplateKind,
        context: &TemplateContext,
    ) -> Result<RenderedMail, TemplateError>;
}

/// Built-in plain-text templates
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    const fn source(kind: TemplateKind) -> (&'static str, &'static str) {
        match kind {
            TemplateKind::Drawn => (
                "{{procedure}}: you received a seat",
                "Hello {{name}},\n\n\
                 the draw for {{procedure}} has taken place and you were allocated:\n\
                 {{grants}}\n\n\
                 Your wish lists were:\n{{wish_lists}}\n",
            ),
            TemplateKind::DrawnNoLuck => (
                "{{procedure}}: draw results",
                "Hello {{name}},\n\n\
                 the draw for {{procedure}} has taken place. Unfortunately no seat \
                 could be allocated to you this time.\n\n\
                 Your wish lists were:\n{{wish_lists}}\n",
            ),
            TemplateKind::FifoConfirmation => (
                "Registration confirmed: {{event}}",
                "Hello {{name}},\n\n\
                 you are now registered for {{event}} ({{procedure}}).\n",
            ),
        }
    }
}

impl TemplateService for BuiltinTemplates {
    fn render(
        &self,
        kind: TemplateKind,
        context: &TemplateContext,
    ) -> Result<RenderedMail, TemplateError> {
        let (subject, body) = Self::source(kind);
        Ok(RenderedMail {
            subject: fill(kind, subject, context)?,
            body: fill(kind, body, context)?,
        })
    }
}

/// Replace every `{{key}}` in `template` with its context value
fn fill(
    kind: TemplateKind,
    template: &str,
    context: &TemplateContext,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(TemplateError::Unterminated(kind))?;
        let key = after[..end].trim();
        let value = context.get(key).ok_or_else(|| TemplateError::MissingKey {
            kind,
            key: key.to_string(),
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> TemplateContext {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn fills_placeholders() {
        let rendered = BuiltinTemplates
            .render(
                TemplateKind::FifoConfirmation,
                &context(&[("name", "Alice"), ("event", "Algebra"), ("procedure", "Walk-in")]),
            )
            .unwrap();
        assert_eq!(rendered.subject, "Registration confirmed: Algebra");
        assert!(rendered.body.contains("Hello Alice"));
        assert!(rendered.body.contains("Algebra (Walk-in)"));
    }

    #[test]
    fn missing_key_is_an_error() {
        let error = BuiltinTemplates
            .render(TemplateKind::DrawnNoLuck, &context(&[("name", "Bob")]))
            .unwrap_err();
        assert_eq!(
            error,
            TemplateError::MissingKey {
                kind: TemplateKind::DrawnNoLuck,
                key: "procedure".to_string()
            }
        );
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        let error = fill(TemplateKind::Drawn, "Hi {{name", &context(&[("name", "x")])).unwrap_err();
        assert_eq!(error, TemplateError::Unterminated(TemplateKind::Drawn));
    }
}
