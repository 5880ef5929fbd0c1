use std::fmt;
use std::sync::Arc;

use crate::error::CompileResult;

/// Translation hook applied to static text and translatable attributes.
pub type TranslateFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Attributes whose static values go through the translation hook.
pub const TRANSLATABLE_ATTRIBUTES: [&str; 4] = ["label", "title", "placeholder", "alt"];

/// Options for one compilation.
///
/// # Examples
///
/// ```
/// use qwebc::CompileOptions;
///
/// let options = CompileOptions::new()
///     .with_name("main")
///     .with_dev(true)
///     .with_translatable_attributes(["data-tooltip", "-alt"]);
///
/// assert!(options.dev);
/// assert!(options.translatable_attributes().contains(&"data-tooltip".to_string()));
/// assert!(!options.translatable_attributes().contains(&"alt".to_string()));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Default)]
pub struct CompileOptions {
    /// Emitted as a comment at the top of the generated code.
    pub name: Option<String>,
    /// Validation mode: duplicate loop keys throw and props are validated.
    pub dev: bool,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub translate_fn: Option<TranslateFn>,
    /// Edits to the default translatable attributes. A leading `-` removes
    /// an attribute from the list.
    pub translatable_attributes: Option<Vec<String>>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    #[must_use]
    pub fn with_translate_fn<F>(mut self, translate_fn: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.translate_fn = Some(Arc::new(translate_fn));
        self
    }

    #[must_use]
    pub fn with_translatable_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.translatable_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// The effective translatable attributes, defaults first.
    pub fn translatable_attributes(&self) -> Vec<String> {
        let mut attributes: Vec<String> = TRANSLATABLE_ATTRIBUTES
            .iter()
            .map(ToString::to_string)
            .collect();
        for attr in self.translatable_attributes.iter().flatten() {
            match attr.strip_prefix('-') {
                Some(removed) => attributes.retain(|a| a != removed),
                None => {
                    if !attributes.contains(attr) {
                        attributes.push(attr.clone());
                    }
                }
            }
        }
        attributes
    }

    pub(crate) fn translate(&self, text: &str) -> String {
        match &self.translate_fn {
            Some(translate) => translate(text),
            None => text.to_string(),
        }
    }
}

impl fmt::Debug for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileOptions")
            .field("name", &self.name)
            .field("dev", &self.dev)
            .field("translate_fn", &self.translate_fn.as_ref().map(|_| "<fn>"))
            .field("translatable_attributes", &self.translatable_attributes)
            .finish()
    }
}

/// Static structure of one block, as passed to `createBlock`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockDefinition {
    /// Constructor variable, `block<N>`.
    pub name: String,
    /// Markup with `block-*` placeholders, backticks escaped.
    pub markup: String,
    /// Whether the constructor takes the tag name as a parameter.
    pub dynamic_tag: bool,
}

/// Output of the code generator.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledTemplate {
    pub name: Option<String>,
    /// Body of the template factory, called with `app`, `bdom` and `helpers`.
    pub code: String,
    /// Runtime helpers the code destructures from `helpers`, in first-use order.
    pub helpers: Vec<String>,
    /// Auxiliary render functions (slots, default content, lazy values).
    pub functions: Vec<String>,
    pub blocks: Vec<BlockDefinition>,
}

impl CompiledTemplate {
    /// The factory as a standalone function declaration.
    pub fn function_source(&self) -> String {
        let ident: String = match self.name.as_deref() {
            Some(name) if !name.is_empty() => name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect(),
            _ => "anonymous".to_string(),
        };
        let ident = if ident.starts_with(|c: char| c.is_ascii_digit()) {
            format!("_{ident}")
        } else {
            ident
        };
        format!("function {ident}(app, bdom, helpers\n) {{\n{}\n}}", self.code)
    }
}

/// `TemplateCompiler` is implemented by registries of named templates that
/// can be compiled on demand.
pub trait TemplateCompiler {
    /// `add_template` registers a template source under `name`.
    ///
    /// # Errors
    /// - If the template name is a duplicate.
    /// - If the source is not well-formed markup.
    fn add_template<N: AsRef<str>, S: Into<String>>(&mut self, name: N, source: S)
    -> CompileResult<()>;

    /// `compile` generates the render code of a registered template.
    ///
    /// # Errors
    /// - If the template name is not found.
    /// - If the template misuses a directive.
    fn compile<N: AsRef<str>>(
        &mut self,
        name: N,
        options: &CompileOptions,
    ) -> CompileResult<CompiledTemplate>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_translatable_attributes() {
        let options = CompileOptions::new();
        assert_eq!(
            options.translatable_attributes(),
            vec!["label", "title", "placeholder", "alt"]
        );
        let options = options.with_translatable_attributes(["-title", "aria-label", "label"]);
        assert_eq!(
            options.translatable_attributes(),
            vec!["label", "placeholder", "alt", "aria-label"]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_translate() {
        let options = CompileOptions::new();
        assert_eq!(options.translate("hello"), "hello");
        let options = options.with_translate_fn(|s| s.to_uppercase());
        assert_eq!(options.translate("hello"), "HELLO");
        assert!(format!("{options:?}").contains("<fn>"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_function_source() {
        let template = CompiledTemplate {
            name: Some("web.main-view".to_string()),
            code: "  return 1;".to_string(),
            helpers: Vec::new(),
            functions: Vec::new(),
            blocks: Vec::new(),
        };
        assert_eq!(
            template.function_source(),
            "function web_main_view(app, bdom, helpers\n) {\n  return 1;\n}"
        );
        let anonymous = CompiledTemplate {
            name: None,
            ..template
        };
        assert!(anonymous.function_source().starts_with("function anonymous("));
    }
}
