use indexmap::IndexMap;

/// Attribute-like name/value pairs, in document order.
pub type AttrMap = IndexMap<String, String>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ast {
    /// Static text, with whitespace already normalised.
    Text(String),
    /// An html comment, kept in the output.
    Comment(String),
    /// A regular element.
    Element(ElementNode),
    /// A group of sibling nodes.
    Multi(Vec<Ast>),
    /// `t-esc`: escaped output of an expression.
    Escape(EscapeNode),
    /// `t-out` (or the deprecated `t-raw`): markup output of an expression.
    RawOutput(RawOutputNode),
    /// `t-if`, with its `t-elif` and `t-else` siblings.
    Conditional(ConditionalNode),
    /// `t-foreach`.
    ForEach(ForEachNode),
    /// `t-key` outside of a loop.
    KeyWrapper { expr: String, content: Box<Ast> },
    /// `t-call`.
    CallTemplate(CallTemplateNode),
    /// `t-call-block`.
    CallBlock { name: String },
    /// `t-set`.
    Assign(AssignNode),
    /// A sub component, static (capitalized tag) or dynamic (`t-component`).
    Component(ComponentNode),
    /// `t-debug`: a breakpoint before the wrapped content.
    Debug { content: Option<Box<Ast>> },
    /// `t-log`: logs an expression before the wrapped content.
    Log {
        expr: String,
        content: Option<Box<Ast>>,
    },
    /// `t-slot`.
    Slot(SlotNode),
    /// `t-translation="off"`.
    Translation { content: Option<Box<Ast>> },
    /// `t-portal`.
    Portal { target: String, content: Box<Ast> },
}

impl Ast {
    /// The empty text node, used where a directive leaves nothing to render.
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub const fn is_assign(&self) -> bool {
        matches!(self, Self::Assign(_))
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementNode {
    pub tag: String,
    /// `t-tag` expression replacing the tag name at render time.
    pub dynamic_tag: Option<String>,
    pub attrs: Option<AttrMap>,
    /// Event name (with modifiers) to handler expression.
    pub on: Option<AttrMap>,
    pub ref_name: Option<String>,
    pub content: Vec<Ast>,
    pub model: Option<ModelSpec>,
    /// Namespace uri, set on the root of an svg subtree.
    pub ns: Option<String>,
}

/// Two-way binding set up by `t-model`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// The object holding the bound property.
    pub base_expr: String,
    /// The property, as an expression (`'name'` for `base.name`).
    pub expr: String,
    pub target_attr: String,
    /// Radio inputs are initialised by comparing with their own value.
    pub special_init_target_attr: Option<String>,
    pub event_type: String,
    /// Set on `<select>` when an option has a dynamic value.
    pub has_dynamic_children: bool,
    pub should_trim: bool,
    pub should_numberize: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeNode {
    pub expr: String,
    /// Inner text of the node, rendered when the expression is empty.
    pub default_value: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutputNode {
    pub expr: String,
    pub body: Option<Vec<Ast>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalNode {
    pub condition: String,
    pub content: Box<Ast>,
    pub elifs: Vec<ElifBranch>,
    pub else_branch: Option<Box<Ast>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElifBranch {
    pub condition: String,
    pub content: Ast,
}

/// Per-iteration helper variables a loop body refers to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopHelpers {
    pub first: bool,
    pub last: bool,
    pub index: bool,
    pub value: bool,
}

impl LoopHelpers {
    pub const fn all() -> Self {
        Self {
            first: true,
            last: true,
            index: true,
            value: true,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForEachNode {
    pub collection: String,
    /// Name bound to the current item (`t-as`).
    pub elem: String,
    pub body: Box<Ast>,
    pub key: String,
    pub memo: Option<String>,
    pub helpers: LoopHelpers,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTemplateNode {
    /// Static name, or a name with `{{ }}` interpolations.
    pub name: String,
    pub body: Option<Vec<Ast>>,
    /// `t-call-context`.
    pub context: Option<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignNode {
    pub name: String,
    pub value: Option<String>,
    pub default_value: Option<String>,
    pub body: Option<Vec<Ast>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentNode {
    /// The tag name, or the `t-component` expression when dynamic.
    pub name: String,
    pub is_dynamic: bool,
    /// `t-props`.
    pub dynamic_props: Option<String>,
    pub props: Option<AttrMap>,
    pub slots: Option<IndexMap<String, SlotDefinition>>,
    pub on: Option<AttrMap>,
}

/// Content passed to one slot of a component.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotDefinition {
    pub content: Option<Box<Ast>>,
    pub on: Option<AttrMap>,
    pub attrs: Option<AttrMap>,
    pub scope: Option<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotNode {
    pub name: String,
    pub attrs: Option<AttrMap>,
    pub on: Option<AttrMap>,
    pub default_content: Option<Box<Ast>>,
}
