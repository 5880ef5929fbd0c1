use std::collections::HashMap;

use crate::codegen;
use crate::dom::{Node, parse_markup};
use crate::error::{CompileError, CompileResult};
use crate::interface::{CompileOptions, CompiledTemplate, TemplateCompiler};
use crate::template::{AstCache, Template};

/// `TemplateSet` is the primary implementation of the `TemplateCompiler`
/// trait: a registry of named templates compiled on demand.
///
/// Parsed templates are cached, so compiling the same template again only
/// runs the code generator.
///
/// # Examples
///
/// ```
/// use qwebc::{CompileOptions, TemplateCompiler, TemplateSet};
///
/// let mut templates = TemplateSet::new();
/// templates.add_template("counter", "<button t-on-click=\"increment\" t-esc=\"state.count\"/>").unwrap();
///
/// let compiled = templates.compile("counter", &CompileOptions::default()).unwrap();
/// assert_eq!(compiled.name.as_deref(), Some("counter"));
/// assert!(compiled.code.contains("// Template name: \"counter\""));
/// assert!(compiled.function_source().starts_with("function counter(app, bdom, helpers"));
/// ```
#[derive(Debug, Default)]
pub struct TemplateSet {
    templates: HashMap<String, Template>,
    cache: AstCache,
}

impl TemplateSet {
    /// Creates a new empty `TemplateSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every template of a `<templates>` document.
    ///
    /// Each child element carrying a `t-name` attribute becomes a template
    /// named after that attribute. Elements without `t-name` are skipped.
    /// Top level elements of a document without a `<templates>` root are
    /// considered directly. Returns the number of templates added.
    ///
    /// # Errors
    ///
    /// - If the document is not well-formed markup.
    /// - If a template name is a duplicate.
    /// - If a template is not a valid template.
    ///
    /// On error no template of the document is registered.
    ///
    /// # Examples
    ///
    /// ```
    /// use qwebc::TemplateSet;
    ///
    /// let mut templates = TemplateSet::new();
    /// let added = templates
    ///     .add_templates(r#"<templates>
    ///         <t t-name="main"><div><t t-call="item"/></div></t>
    ///         <span t-name="item">item</span>
    ///     </templates>"#)
    ///     .unwrap();
    /// assert_eq!(added, 2);
    /// assert_eq!(templates.names(), vec!["item", "main"]);
    /// ```
    pub fn add_templates(&mut self, document: &str) -> CompileResult<usize> {
        let root = parse_markup(document)?;
        let mut candidates = Vec::new();
        for node in root.children {
            let Node::Element(el) = node else { continue };
            if el.tag == "templates" {
                candidates.extend(el.children.into_iter().filter_map(|n| match n {
                    Node::Element(el) => Some(el),
                    Node::Text(_) | Node::Comment(_) => None,
                }));
            } else {
                candidates.push(el);
            }
        }

        // Nothing is registered unless every template of the document is valid.
        let mut pending: Vec<(String, Template)> = Vec::new();
        for mut el in candidates {
            let Some(name) = el.take_attr("t-name") else {
                continue;
            };
            if self.templates.contains_key(&name) || pending.iter().any(|(n, _)| *n == name) {
                return Err(CompileError::TemplateExists { template_name: name });
            }
            let template = Template::new(el.to_xml());
            self.cache.get_or_parse(&template)?;
            pending.push((name, template));
        }

        let added = pending.len();
        self.templates.extend(pending);
        log::debug!("registered {added} templates from document");
        Ok(added)
    }

    /// Compiles every registered template, in name order.
    ///
    /// The template name is used as the `name` option unless one is given.
    ///
    /// # Errors
    ///
    /// Returns the first compilation error.
    pub fn compile_all(&mut self, options: &CompileOptions) -> CompileResult<Vec<CompiledTemplate>> {
        self.names()
            .into_iter()
            .map(|name| self.compile(name, options))
            .collect()
    }

    /// Names of the registered templates, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }
}

impl TemplateCompiler for TemplateSet {
    /// Adds a new template with the given name and source.
    ///
    /// The source is parsed immediately, so a broken template is reported
    /// here rather than on first compile.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the template was successfully added
    /// * `Err(CompileError::TemplateExists)` if a template with the given name already exists
    /// * Any parse error of the template source
    ///
    /// # Examples
    ///
    /// ```
    /// use qwebc::{CompileError, TemplateCompiler, TemplateSet};
    ///
    /// let mut templates = TemplateSet::new();
    /// templates.add_template("greeting", "<p>Hello</p>").unwrap();
    /// assert!(matches!(
    ///     templates.add_template("greeting", "<p>Hi</p>"),
    ///     Err(CompileError::TemplateExists { .. })
    /// ));
    /// ```
    fn add_template<N: AsRef<str>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> CompileResult<()> {
        let name = name.as_ref();

        if self.templates.contains_key(name) {
            return Err(CompileError::TemplateExists {
                template_name: name.to_string(),
            });
        }

        let template = Template::new(source);
        self.cache.get_or_parse(&template)?;
        self.templates.insert(name.to_string(), template);

        Ok(())
    }

    /// Compiles the template with the given name.
    ///
    /// # Returns
    ///
    /// * `Ok(CompiledTemplate)` with the generated code
    /// * `Err(CompileError::MissingTemplate)` if no template with the given name exists
    /// * Any error raised by the code generator
    ///
    /// # Examples
    ///
    /// ```
    /// use qwebc::{CompileError, CompileOptions, TemplateCompiler, TemplateSet};
    ///
    /// let mut templates = TemplateSet::new();
    /// assert!(matches!(
    ///     templates.compile("missing", &CompileOptions::default()),
    ///     Err(CompileError::MissingTemplate { .. })
    /// ));
    /// ```
    fn compile<N: AsRef<str>>(
        &mut self,
        name: N,
        options: &CompileOptions,
    ) -> CompileResult<CompiledTemplate> {
        let name = name.as_ref();
        let template = self
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::MissingTemplate {
                template_name: name.to_string(),
            })?;

        let ast = self.cache.get_or_parse(&template)?;
        if options.name.is_some() {
            return codegen::generate(&ast, template.source(), options);
        }
        let options = options.clone().with_name(name);
        codegen::generate(&ast, template.source(), &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_add_template_parses_eagerly() {
        let mut templates = TemplateSet::new();
        let err = templates.add_template("broken", "<div><span></div>").unwrap_err();
        assert!(matches!(err, CompileError::Markup(_)));
        assert!(!templates.contains("broken"));

        let err = templates
            .add_template("loop", "<t t-foreach=\"items\" t-as=\"item\"/>")
            .unwrap_err();
        assert!(matches!(err, CompileError::MissingLoopKey { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compile_uses_registered_name() {
        let mut templates = TemplateSet::new();
        templates.add_template("main", "<div/>").unwrap();

        let compiled = templates.compile("main", &CompileOptions::default()).unwrap();
        assert_eq!(compiled.name.as_deref(), Some("main"));

        let options = CompileOptions::new().with_name("renamed");
        let compiled = templates.compile("main", &options).unwrap();
        assert_eq!(compiled.name.as_deref(), Some("renamed"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compile_is_repeatable() {
        let mut templates = TemplateSet::new();
        templates
            .add_template("list", "<ul><li t-foreach=\"items\" t-as=\"i\" t-key=\"i\" t-esc=\"i\"/></ul>")
            .unwrap();
        let options = CompileOptions::default();
        let first = templates.compile("list", &options).unwrap();
        let second = templates.compile("list", &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_add_templates_without_wrapper() {
        let mut templates = TemplateSet::new();
        let added = templates
            .add_templates("<div t-name=\"a\">a</div><p>skipped</p><t t-name=\"b\">b</t>")
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(templates.names(), vec!["a", "b"]);
        assert_eq!(templates.get("a").map(Template::source), Some("<div>a</div>"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_add_templates_duplicate() {
        let mut templates = TemplateSet::new();
        let err = templates
            .add_templates("<templates><t t-name=\"a\"/><t t-name=\"a\"/></templates>")
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::TemplateExists {
                template_name: "a".to_string()
            }
        );
        assert!(templates.names().is_empty());

        templates.add_template("b", "<b/>").unwrap();
        let err = templates
            .add_templates("<templates><t t-name=\"c\"/><t t-name=\"b\"/></templates>")
            .unwrap_err();
        assert!(matches!(err, CompileError::TemplateExists { .. }));
        assert_eq!(templates.names(), vec!["b"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compile_all() {
        let mut templates = TemplateSet::new();
        templates.add_template("b", "<b/>").unwrap();
        templates.add_template("a", "<a/>").unwrap();
        let compiled = templates.compile_all(&CompileOptions::default()).unwrap();
        let names: Vec<_> = compiled.iter().filter_map(|c| c.name.as_deref()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
