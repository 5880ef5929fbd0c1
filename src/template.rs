use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::ast::Ast;
use crate::error::CompileResult;
use crate::parser::parse;

/// A template source with an identity.
///
/// Cloning a `Template` is cheap and the clone shares the identity of the
/// original, so an [`AstCache`] recognises it. Two templates created from the
/// same text are distinct.
///
/// # Example
///
/// ```rust
/// use qwebc::{AstCache, Template};
///
/// let template = Template::new("<div t-esc=\"state.value\"/>");
/// let copy = template.clone();
/// assert!(template.ptr_eq(&copy));
/// assert!(!template.ptr_eq(&Template::new(template.source())));
///
/// let mut cache = AstCache::new();
/// let ast = cache.get_or_parse(&template).unwrap();
/// let again = cache.get_or_parse(&copy).unwrap();
/// assert!(std::rc::Rc::ptr_eq(&ast, &again));
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    source: Rc<str>,
}

#[cfg(feature = "serde")]
impl serde::Serialize for Template {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Template", 1)?;
        state.serialize_field("source", &*self.source)?;
        state.end()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            source: String,
        }

        // A deserialized template gets a fresh identity.
        let helper = TemplateHelper::deserialize(deserializer)?;
        Ok(Self::new(helper.source))
    }
}

impl Template {
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            source: Rc::from(source.into()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether both handles refer to the same template.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.source, &other.source)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.source).cast::<u8>().addr()
    }
}

#[derive(Debug)]
struct CacheEntry {
    template: Weak<str>,
    ast: Rc<Ast>,
}

impl CacheEntry {
    fn is_alive(&self) -> bool {
        self.template.strong_count() > 0
    }
}

/// Parsed templates, keyed by template identity.
///
/// The cache never keeps a template alive: entries whose template has been
/// dropped are ignored on lookup and purged on the next insert.
#[derive(Debug, Default)]
pub struct AstCache {
    entries: HashMap<usize, CacheEntry>,
}

impl AstCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the AST of `template`, parsing it on first use.
    ///
    /// # Errors
    ///
    /// Returns the parse error of the template source. Failures are not cached.
    pub fn get_or_parse(&mut self, template: &Template) -> CompileResult<Rc<Ast>> {
        let id = template.id();
        if let Some(entry) = self.entries.get(&id) {
            let same = entry
                .template
                .upgrade()
                .is_some_and(|source| Rc::ptr_eq(&source, &template.source));
            if same {
                log::trace!("ast cache hit for template {id:#x}");
                return Ok(Rc::clone(&entry.ast));
            }
        }

        log::trace!("ast cache miss for template {id:#x}");
        let ast = Rc::new(parse(template.source())?);
        self.purge();
        self.entries.insert(
            id,
            CacheEntry {
                template: Rc::downgrade(&template.source),
                ast: Rc::clone(&ast),
            },
        );
        Ok(ast)
    }

    /// Drops the entries of templates that no longer exist.
    pub fn purge(&mut self) {
        self.entries.retain(|_, entry| entry.is_alive());
    }

    /// Number of entries whose template is alive.
    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| e.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
