pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// A markup document that could not be read as well-formed XML.
///
/// Positions are 1-indexed and point into the template source as written,
/// not into the `<t>` wrapper the reader adds around it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Invalid XML in template at line {line}, column {column}: {message}")]
pub struct MarkupError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl MarkupError {
    /// Builds an error for the byte `offset` into `source`.
    pub(crate) fn at_offset<M: Into<String>>(source: &str, offset: usize, message: M) -> Self {
        let offset = offset.min(source.len());
        let mut line = 1;
        let mut line_start = 0;
        for (idx, ch) in source.char_indices() {
            if idx >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                line_start = idx + 1;
            }
        }
        let column = source
            .get(line_start..offset)
            .map_or(1, |prefix| prefix.chars().count() + 1);
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CompileError {
    #[error("Tokenizer error: could not tokenize `{expression}`")]
    Tokenize { expression: String },

    #[error(transparent)]
    Markup(#[from] MarkupError),

    #[error(
        "Directive t-foreach should always be used with a t-key! (expression: t-foreach=\"{collection}\" t-as=\"{alias}\")"
    )]
    MissingLoopKey { collection: String, alias: String },

    #[error("t-elif and t-else directives must be preceded by a t-if or t-elif directive")]
    OrphanBranch,

    #[error("Only one conditional branching directive is allowed per node")]
    MultipleBranches,

    #[error("text is not allowed between branching directives")]
    TextBetweenBranches,

    #[error("t-if cannot stay at the same level as t-foreach when using t-elif or t-else")]
    BranchOnLoop,

    #[error("Unknown event modifier: '{modifier}'")]
    UnknownEventModifier { modifier: String },

    #[error("Missing event name with t-on directive")]
    MissingEventName,

    #[error("The t-model directive only works with <input>, <textarea> and <select> (used on a <{tag}>)")]
    ModelOnInvalidElement { tag: String },

    #[error("Invalid t-model expression: \"{expression}\" (it should be assignable)")]
    InvalidModelTarget { expression: String },

    #[error("Invalid tag name: '{tag}'")]
    InvalidTagName { tag: String },

    #[error("Invalid attribute: '{attribute}'")]
    InvalidAttribute { attribute: String },

    #[error("Unknown QWeb directive: '{directive}'")]
    UnknownDirective { directive: String },

    #[error("{message}")]
    UnsupportedComponentDirective { directive: String, message: String },

    #[error("Directive 't-component' can only be used on <t> nodes (used on a <{tag}>)")]
    DynamicComponentOnElement { tag: String },

    #[error("Directive 't-set-slot' can only be used on <t> nodes (used on a <{tag}>)")]
    SetSlotOnElement { tag: String },

    #[error("Cannot have {directive} on a component that already has content")]
    OutputOnComponentWithContent { directive: String },

    #[error("Invalid prop suffix: '{prop}'")]
    InvalidPropSuffix { prop: String },

    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },

    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
}

impl CompileError {
    pub(crate) fn tokenize<E: Into<String>>(expression: E) -> Self {
        Self::Tokenize {
            expression: expression.into(),
        }
    }

    /// Error for a `t-` directive that has no meaning on a component node.
    pub(crate) fn component_directive(directive: &str) -> Self {
        let family: Vec<&str> = directive.splitn(3, '-').take(2).collect();
        let message = match family.join("-").as_str() {
            "t-ref" => "t-ref is no longer supported on components. Consider exposing only the public part of the component's API through a callback prop.".to_string(),
            "t-att" => "t-att makes no sense on component: props are already treated as expressions".to_string(),
            "t-attf" => "t-attf is not supported on components: use template strings for string interpolation in props".to_string(),
            _ => format!("unsupported directive on Component: {directive}"),
        };
        Self::UnsupportedComponentDirective {
            directive: directive.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_markup_error_position() {
        let source = "<div>\n  <span>\n</div>";
        let err = MarkupError::at_offset(source, 16, "mismatch");
        assert_eq!(err.line, 3);
        assert_eq!(err.column, 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_markup_error_offset_past_end() {
        let err = MarkupError::at_offset("ab", 10, "eof");
        assert_eq!((err.line, err.column), (1, 3));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_component_directive_messages() {
        let err = CompileError::component_directive("t-ref");
        assert!(err.to_string().contains("t-ref is no longer supported"));

        let err = CompileError::component_directive("t-attf-class");
        assert!(err.to_string().contains("t-attf is not supported"));

        let err = CompileError::component_directive("t-att-class");
        assert!(err.to_string().contains("t-att makes no sense"));

        let err = CompileError::component_directive("t-whatever");
        assert_eq!(err.to_string(), "unsupported directive on Component: t-whatever");
    }
}
