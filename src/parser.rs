//! Markup to AST.
//!
//! Every element goes through a fixed chain of directive parsers. A parser
//! either consumes the element (possibly re-entering the chain with the
//! directive attribute removed) or hands it back untouched to the next one.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::ast::{
    AssignNode, Ast, AttrMap, CallTemplateNode, ComponentNode, ConditionalNode, ElementNode,
    ElifBranch, EscapeNode, ForEachNode, LoopHelpers, ModelSpec, RawOutputNode, SlotDefinition,
    SlotNode,
};
use crate::dom::{self, Element, Node};
use crate::error::{CompileError, CompileResult};

type ParseResult<T> = CompileResult<T>;

/// Remaining siblings of the node being parsed. Conditional branches are
/// taken from here.
type Siblings = VecDeque<Node>;

/// Event modifiers accepted after an event name (`t-on-click.stop`).
pub const EVENT_MODIFIERS: [&str; 5] = ["stop", "capture", "prevent", "self", "synthetic"];

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const ROOT_SVG_TAGS: [&str; 3] = ["svg", "g", "path"];
const MODEL_TAGS: [&str; 3] = ["input", "select", "textarea"];

static HAS_DOT_AT_THE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[\w_]+\s*$").expect("valid pattern"));
static HAS_BRACKETS_AT_THE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\[]+\]\s*$").expect("valid pattern"));

#[derive(Debug, Clone, Default)]
struct ParseCtx {
    in_pre_tag: bool,
    in_svg: bool,
    /// Flag of the enclosing `<select t-model>`, raised by dynamic option values.
    select_model: Option<Rc<Cell<bool>>>,
}

/// Outcome of one directive parser.
enum Step {
    Done(Option<Ast>),
    Next(Element),
}

type DirectiveParser = fn(Element, &ParseCtx, &mut Siblings) -> ParseResult<Step>;

/// Directive parsers, in priority order.
const DIRECTIVE_PARSERS: [DirectiveParser; 15] = [
    parse_debug_log,
    parse_for_each,
    parse_if,
    parse_portal,
    parse_call,
    parse_call_block,
    parse_escape,
    parse_key,
    parse_translation,
    parse_slot,
    parse_raw_output,
    parse_component,
    parse_dom_node,
    parse_set,
    parse_t_node,
];

/// Parses a template source into its AST.
///
/// # Errors
/// Fails on malformed markup and on any directive misuse.
pub fn parse(source: &str) -> ParseResult<Ast> {
    let root = dom::parse_markup(source)?;
    parse_tree(root)
}

/// Parses an already-read tree rooted at the `<t>` wrapper.
pub(crate) fn parse_tree(mut root: Element) -> ParseResult<Ast> {
    normalize_branches(&mut root)?;
    normalize_component_output(&mut root)?;
    let ctx = ParseCtx::default();
    Ok(parse_element(root, &ctx, &mut Siblings::new())?.unwrap_or_else(Ast::empty))
}

/// True for tags naming a component (first letter is not lowercase).
pub(crate) fn is_component_tag(tag: &str) -> bool {
    tag.chars().next().is_some_and(|c| !c.is_lowercase())
}

fn is_component_boundary(el: &Element) -> bool {
    el.has_attr("t-component") || is_component_tag(&el.tag)
}

fn parse_node(node: Node, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Option<Ast>> {
    match node {
        Node::Element(el) => parse_element(el, ctx, siblings),
        Node::Text(text) => Ok(parse_text(text, ctx)),
        Node::Comment(comment) => Ok(Some(Ast::Comment(comment))),
    }
}

fn parse_element(el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Option<Ast>> {
    let mut el = el;
    for parser in DIRECTIVE_PARSERS {
        match parser(el, ctx, siblings)? {
            Step::Done(ast) => return Ok(ast),
            Step::Next(next) => el = next,
        }
    }
    Ok(None)
}

fn parse_text(text: String, ctx: &ParseCtx) -> Option<Ast> {
    if ctx.in_pre_tag {
        return Some(Ast::Text(text));
    }
    if text.contains(['\r', '\n']) && text.trim().is_empty() {
        return None;
    }
    let mut collapsed = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                collapsed.push(' ');
            }
            in_space = true;
        } else {
            collapsed.push(ch);
            in_space = false;
        }
    }
    Some(Ast::Text(collapsed))
}

/// Parses a list of nodes, flattening nested `Multi` results.
fn parse_children(children: Vec<Node>, ctx: &ParseCtx) -> ParseResult<Vec<Ast>> {
    let mut siblings: Siblings = children.into();
    let mut result = Vec::new();
    while let Some(child) = siblings.pop_front() {
        match parse_node(child, ctx, &mut siblings)? {
            Some(Ast::Multi(content)) => result.extend(content),
            Some(ast) => result.push(ast),
            None => {}
        }
    }
    Ok(result)
}

/// Like `parse_children`, but wraps several results in a `Multi`.
fn parse_child_nodes(children: Vec<Node>, ctx: &ParseCtx) -> ParseResult<Option<Ast>> {
    let mut children = parse_children(children, ctx)?;
    Ok(match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(Ast::Multi(children)),
    })
}

fn check_event_name(event: &str) -> ParseResult<()> {
    for modifier in event.split('.').skip(1) {
        if !EVENT_MODIFIERS.contains(&modifier) {
            return Err(CompileError::UnknownEventModifier {
                modifier: modifier.to_string(),
            });
        }
    }
    Ok(())
}

fn insert_handler(on: &mut Option<AttrMap>, event: &str, handler: String) -> ParseResult<()> {
    check_event_name(event)?;
    on.get_or_insert_with(IndexMap::new)
        .insert(event.to_string(), handler);
    Ok(())
}

// -----------------------------------------------------------------------------
// t-debug, t-log
// -----------------------------------------------------------------------------

fn parse_debug_log(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    if el.take_attr("t-debug").is_some() {
        let content = parse_element(el, ctx, siblings)?.map(Box::new);
        return Ok(Step::Done(Some(Ast::Debug { content })));
    }
    if let Some(expr) = el.take_attr("t-log") {
        let content = parse_element(el, ctx, siblings)?.map(Box::new);
        return Ok(Step::Done(Some(Ast::Log { expr, content })));
    }
    Ok(Step::Next(el))
}

// -----------------------------------------------------------------------------
// t-foreach, t-key
// -----------------------------------------------------------------------------

fn parse_for_each(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    if !el.has_attr("t-foreach") {
        return Ok(Step::Next(el));
    }
    let html = el.to_xml();
    let collection = el.take_attr("t-foreach").unwrap_or_default();
    let elem = el.take_attr("t-as").unwrap_or_default();
    let key = match el.take_attr("t-key") {
        Some(key) if !key.is_empty() => key,
        _ => {
            return Err(CompileError::MissingLoopKey {
                collection,
                alias: elem,
            });
        }
    };
    let memo = el.take_attr("t-memo").filter(|m| !m.is_empty());
    let Some(body) = parse_element(el, ctx, siblings)? else {
        return Ok(Step::Done(None));
    };

    // A called template may use any helper, so their presence forces them all.
    let helpers = if html.contains("t-call") {
        LoopHelpers::all()
    } else {
        LoopHelpers {
            first: html.contains(&format!("{elem}_first")),
            last: html.contains(&format!("{elem}_last")),
            index: html.contains(&format!("{elem}_index")),
            value: html.contains(&format!("{elem}_value")),
        }
    };

    Ok(Step::Done(Some(Ast::ForEach(ForEachNode {
        collection,
        elem,
        body: Box::new(body),
        key,
        memo,
        helpers,
    }))))
}

fn parse_key(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    let Some(expr) = el.take_attr("t-key") else {
        return Ok(Step::Next(el));
    };
    let Some(content) = parse_element(el, ctx, siblings)? else {
        return Ok(Step::Done(None));
    };
    Ok(Step::Done(Some(Ast::KeyWrapper {
        expr,
        content: Box::new(content),
    })))
}

// -----------------------------------------------------------------------------
// t-if, t-elif, t-else
// -----------------------------------------------------------------------------

fn take_branch(siblings: &mut Siblings, directive: &str) -> Option<(Element, String)> {
    let is_branch = siblings
        .front()
        .and_then(Node::as_element)
        .is_some_and(|el| el.has_attr(directive));
    if !is_branch {
        return None;
    }
    match siblings.pop_front() {
        Some(Node::Element(mut el)) => {
            let value = el.take_attr(directive).unwrap_or_default();
            Some((el, value))
        }
        _ => None,
    }
}

fn parse_if(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    let Some(condition) = el.take_attr("t-if") else {
        return Ok(Step::Next(el));
    };
    let content = parse_element(el, ctx, siblings)?.unwrap_or_else(Ast::empty);

    let mut elifs = Vec::new();
    while let Some((branch, condition)) = take_branch(siblings, "t-elif") {
        if let Some(content) = parse_element(branch, ctx, &mut Siblings::new())? {
            elifs.push(ElifBranch { condition, content });
        }
    }

    let else_branch = match take_branch(siblings, "t-else") {
        Some((branch, _)) => parse_element(branch, ctx, &mut Siblings::new())?.map(Box::new),
        None => None,
    };

    Ok(Step::Done(Some(Ast::Conditional(ConditionalNode {
        condition,
        content: Box::new(content),
        elifs,
        else_branch,
    }))))
}

// -----------------------------------------------------------------------------
// t-portal
// -----------------------------------------------------------------------------

fn parse_portal(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    let Some(target) = el.take_attr("t-portal") else {
        return Ok(Step::Next(el));
    };
    let ast = match parse_element(el, ctx, siblings)? {
        Some(content) => Ast::Portal {
            target,
            content: Box::new(content),
        },
        None => Ast::empty(),
    };
    Ok(Step::Done(Some(ast)))
}

// -----------------------------------------------------------------------------
// t-call, t-call-block
// -----------------------------------------------------------------------------

fn parse_call(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    let Some(name) = el.take_attr("t-call") else {
        return Ok(Step::Next(el));
    };
    let context = el.take_attr("t-call-context");

    if el.tag != "t" {
        let children = el.children.clone();
        let call = Ast::CallTemplate(CallTemplateNode {
            name: name.clone(),
            body: None,
            context: context.clone(),
        });
        match parse_element(el, ctx, siblings)? {
            Some(Ast::Element(mut node)) => {
                node.content = vec![call];
                return Ok(Step::Done(Some(Ast::Element(node))));
            }
            Some(Ast::Component(mut node)) => {
                let mut slots = IndexMap::new();
                slots.insert(
                    "default".to_string(),
                    SlotDefinition {
                        content: Some(Box::new(call)),
                        ..SlotDefinition::default()
                    },
                );
                node.slots = Some(slots);
                return Ok(Step::Done(Some(Ast::Component(node))));
            }
            _ => {
                let body = parse_children(children, ctx)?;
                return Ok(Step::Done(Some(call_node(name, body, context))));
            }
        }
    }

    let body = parse_children(std::mem::take(&mut el.children), ctx)?;
    Ok(Step::Done(Some(call_node(name, body, context))))
}

fn call_node(name: String, body: Vec<Ast>, context: Option<String>) -> Ast {
    Ast::CallTemplate(CallTemplateNode {
        name,
        body: (!body.is_empty()).then_some(body),
        context,
    })
}

fn parse_call_block(mut el: Element, _: &ParseCtx, _: &mut Siblings) -> ParseResult<Step> {
    match el.take_attr("t-call-block") {
        Some(name) => Ok(Step::Done(Some(Ast::CallBlock { name }))),
        None => Ok(Step::Next(el)),
    }
}

// -----------------------------------------------------------------------------
// t-esc, t-out
// -----------------------------------------------------------------------------

fn parse_escape(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    let Some(expr) = el.take_attr("t-esc") else {
        return Ok(Step::Next(el));
    };
    let escape = Ast::Escape(EscapeNode {
        expr,
        default_value: el.text_content(),
    });
    let ref_name = el.take_attr("t-ref");
    match parse_element(el, ctx, siblings)? {
        Some(Ast::Element(mut node)) => {
            node.ref_name = ref_name;
            node.content = vec![escape];
            Ok(Step::Done(Some(Ast::Element(node))))
        }
        Some(Ast::Component(_)) => Err(CompileError::OutputOnComponentWithContent {
            directive: "t-esc".to_string(),
        }),
        _ => Ok(Step::Done(Some(escape))),
    }
}

fn parse_raw_output(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    let out = el.take_attr("t-out");
    let raw = el.take_attr("t-raw");
    if raw.is_some() {
        log::warn!(
            "t-raw has been deprecated in favor of t-out. If the value to render is not wrapped by the \"markup\" function, it will be escaped"
        );
    }
    let expr = match (out, raw) {
        (Some(out), _) if !out.is_empty() => out,
        (_, Some(raw)) => raw,
        (Some(out), None) => out,
        (None, None) => return Ok(Step::Next(el)),
    };
    let ref_name = el.take_attr("t-ref");
    match parse_element(el, ctx, siblings)? {
        Some(Ast::Element(mut node)) => {
            let body = std::mem::take(&mut node.content);
            node.ref_name = ref_name;
            node.content = vec![Ast::RawOutput(RawOutputNode {
                expr,
                body: (!body.is_empty()).then_some(body),
            })];
            Ok(Step::Done(Some(Ast::Element(node))))
        }
        _ => Ok(Step::Done(Some(Ast::RawOutput(RawOutputNode { expr, body: None })))),
    }
}

// -----------------------------------------------------------------------------
// t-translation
// -----------------------------------------------------------------------------

fn parse_translation(mut el: Element, ctx: &ParseCtx, siblings: &mut Siblings) -> ParseResult<Step> {
    if el.attr("t-translation") != Some("off") {
        return Ok(Step::Next(el));
    }
    el.take_attr("t-translation");
    let content = parse_element(el, ctx, siblings)?.map(Box::new);
    Ok(Step::Done(Some(Ast::Translation { content })))
}

// -----------------------------------------------------------------------------
// Slots
// -----------------------------------------------------------------------------

fn parse_slot(mut el: Element, ctx: &ParseCtx, _: &mut Siblings) -> ParseResult<Step> {
    let Some(name) = el.take_attr("t-slot") else {
        return Ok(Step::Next(el));
    };
    let mut attrs: Option<AttrMap> = None;
    let mut on = None;
    for (attr, value) in el.take_attrs() {
        match attr.strip_prefix("t-on-") {
            Some(event) => insert_handler(&mut on, event, value)?,
            None => {
                attrs.get_or_insert_with(IndexMap::new).insert(attr, value);
            }
        }
    }
    let default_content = parse_child_nodes(el.children, ctx)?.map(Box::new);
    Ok(Step::Done(Some(Ast::Slot(SlotNode {
        name,
        attrs,
        on,
        default_content,
    }))))
}

/// Removes the `t-set-slot` nodes owned by a component, in document order.
/// Nodes below a nested component belong to that component and stay.
fn extract_slot_nodes(el: &mut Element, found: &mut Vec<Element>) -> ParseResult<()> {
    let mut idx = 0;
    while idx < el.children.len() {
        let Some(Node::Element(child)) = el.children.get_mut(idx) else {
            idx += 1;
            continue;
        };
        if child.has_attr("t-set-slot") {
            if child.tag != "t" {
                return Err(CompileError::SetSlotOnElement {
                    tag: child.tag.clone(),
                });
            }
            if let Node::Element(slot) = el.children.remove(idx) {
                found.push(slot);
            }
            continue;
        }
        if !is_component_boundary(child) {
            extract_slot_nodes(child, found)?;
        }
        idx += 1;
    }
    Ok(())
}

fn parse_slot_definition(mut slot: Element, ctx: &ParseCtx) -> ParseResult<(String, SlotDefinition)> {
    let name = slot.take_attr("t-set-slot").unwrap_or_default();
    let mut definition = SlotDefinition::default();
    let mut directives = Vec::new();
    for (attr, value) in slot.take_attrs() {
        if attr == "t-slot-scope" {
            definition.scope = Some(value);
        } else if let Some(event) = attr.strip_prefix("t-on-") {
            insert_handler(&mut definition.on, event, value)?;
        } else if attr.starts_with("t-") {
            directives.push((attr, value));
        } else {
            definition
                .attrs
                .get_or_insert_with(IndexMap::new)
                .insert(attr, value);
        }
    }
    for (attr, value) in directives {
        slot.set_attr(attr, value);
    }
    definition.content = parse_element(slot, ctx, &mut Siblings::new())?.map(Box::new);
    Ok((name, definition))
}

// -----------------------------------------------------------------------------
// Components
// -----------------------------------------------------------------------------

fn parse_component(mut el: Element, ctx: &ParseCtx, _: &mut Siblings) -> ParseResult<Step> {
    let is_dynamic = el.has_attr("t-component");
    if is_dynamic && el.tag != "t" {
        return Err(CompileError::DynamicComponentOnElement { tag: el.tag });
    }
    if !(is_dynamic || is_component_tag(&el.tag)) {
        return Ok(Step::Next(el));
    }
    let name = match el.take_attr("t-component") {
        Some(expr) => expr,
        None => el.tag.clone(),
    };
    let dynamic_props = el.take_attr("t-props");
    let default_slot_scope = el.take_attr("t-slot-scope");

    let mut on = None;
    let mut props: Option<AttrMap> = None;
    for (attr, value) in el.take_attrs() {
        if !attr.starts_with("t-") {
            props.get_or_insert_with(IndexMap::new).insert(attr, value);
            continue;
        }
        match attr.strip_prefix("t-on-") {
            Some(event) => insert_handler(&mut on, event, value)?,
            None => return Err(CompileError::component_directive(&attr)),
        }
    }

    let mut slots = None;
    if !el.children.is_empty() {
        let mut slot_nodes = Vec::new();
        extract_slot_nodes(&mut el, &mut slot_nodes)?;
        let mut named: IndexMap<String, SlotDefinition> = IndexMap::new();
        for slot in slot_nodes {
            let (name, definition) = parse_slot_definition(slot, ctx)?;
            named.insert(name, definition);
        }
        // an explicit default slot wins over the remaining content
        let default_content = parse_child_nodes(el.children, ctx)?;
        if let Some(content) = default_content {
            if !named.contains_key("default") {
                named.insert(
                    "default".to_string(),
                    SlotDefinition {
                        content: Some(Box::new(content)),
                        on: on.clone(),
                        attrs: None,
                        scope: default_slot_scope,
                    },
                );
            }
        }
        slots = Some(named);
    }

    Ok(Step::Done(Some(Ast::Component(ComponentNode {
        name,
        is_dynamic,
        dynamic_props,
        props,
        slots,
        on,
    }))))
}

// -----------------------------------------------------------------------------
// Regular dom nodes
// -----------------------------------------------------------------------------

fn parse_model(attr: &str, value: &str, tag: &str, type_attr: Option<&str>) -> ParseResult<ModelSpec> {
    if !MODEL_TAGS.contains(&tag) {
        return Err(CompileError::ModelOnInvalidElement {
            tag: tag.to_string(),
        });
    }
    let invalid = || CompileError::InvalidModelTarget {
        expression: value.to_string(),
    };
    let (base_expr, expr) = if HAS_DOT_AT_THE_END.is_match(value) {
        let idx = value.rfind('.').ok_or_else(invalid)?;
        let property = value.get(idx + 1..).unwrap_or_default();
        (value.get(..idx).unwrap_or_default(), format!("'{property}'"))
    } else if HAS_BRACKETS_AT_THE_END.is_match(value) {
        let idx = value.rfind('[').ok_or_else(invalid)?;
        let end = value.len().saturating_sub(1).max(idx + 1);
        let inner = value.get(idx + 1..end).unwrap_or_default();
        (value.get(..idx).unwrap_or_default(), inner.to_string())
    } else {
        return Err(invalid());
    };

    let is_input = tag == "input";
    let is_select = tag == "select";
    let is_textarea = tag == "textarea";
    let is_checkbox = is_input && type_attr == Some("checkbox");
    let is_radio = is_input && type_attr == Some("radio");
    let is_other_input = is_input && !is_checkbox && !is_radio;
    let has_lazy = attr.contains(".lazy");
    let has_number = attr.contains(".number");
    let has_trim = attr.contains(".trim");
    let event_type = if is_radio {
        "click"
    } else if is_select || has_lazy {
        "change"
    } else {
        "input"
    };

    Ok(ModelSpec {
        base_expr: base_expr.to_string(),
        expr,
        target_attr: if is_checkbox { "checked" } else { "value" }.to_string(),
        special_init_target_attr: is_radio.then(|| "checked".to_string()),
        event_type: event_type.to_string(),
        has_dynamic_children: false,
        should_trim: has_trim && (is_other_input || is_textarea),
        should_numberize: has_number && (is_other_input || is_textarea),
    })
}

fn parse_dom_node(mut el: Element, ctx: &ParseCtx, _: &mut Siblings) -> ParseResult<Step> {
    let dynamic_tag = el.take_attr("t-tag").filter(|t| !t.is_empty());
    if el.tag == "t" && dynamic_tag.is_none() {
        return Ok(Step::Next(el));
    }
    if el.tag.starts_with("block-") {
        return Err(CompileError::InvalidTagName { tag: el.tag });
    }

    let mut ctx = ctx.clone();
    if el.tag == "pre" {
        ctx.in_pre_tag = true;
    }
    let should_add_svg_ns = ROOT_SVG_TAGS.contains(&el.tag.as_str()) && !ctx.in_svg;
    ctx.in_svg = ctx.in_svg || should_add_svg_ns;
    let ns = should_add_svg_ns.then(|| SVG_NAMESPACE.to_string());

    let ref_name = el.take_attr("t-ref");
    let type_attr = el.attr("type").map(str::to_string);
    let mut attrs: Option<AttrMap> = None;
    let mut on = None;
    let mut model = None;
    let mut model_flag = None;

    for (attr, value) in el.take_attrs() {
        if attr.starts_with("t-on") {
            if attr == "t-on" {
                return Err(CompileError::MissingEventName);
            }
            let event = attr.get(5..).unwrap_or_default();
            insert_handler(&mut on, event, value)?;
        } else if attr.starts_with("t-model") {
            model = Some(parse_model(&attr, &value, &el.tag, type_attr.as_deref())?);
            if el.tag == "select" {
                let flag = Rc::new(Cell::new(false));
                ctx.select_model = Some(Rc::clone(&flag));
                model_flag = Some(flag);
            }
        } else if attr.starts_with("block-") {
            return Err(CompileError::InvalidAttribute { attribute: attr });
        } else if attr != "t-name" {
            if attr.starts_with("t-") && !attr.starts_with("t-att") {
                return Err(CompileError::UnknownDirective { directive: attr });
            }
            if let Some(flag) = &ctx.select_model {
                if attr == "t-att-value" || attr == "t-attf-value" {
                    flag.set(true);
                }
            }
            attrs.get_or_insert_with(IndexMap::new).insert(attr, value);
        }
    }

    let content = parse_children(std::mem::take(&mut el.children), &ctx)?;
    if let (Some(model), Some(flag)) = (model.as_mut(), model_flag) {
        model.has_dynamic_children = flag.get();
    }

    Ok(Step::Done(Some(Ast::Element(ElementNode {
        tag: el.tag,
        dynamic_tag,
        attrs,
        on,
        ref_name,
        content,
        model,
        ns,
    }))))
}

// -----------------------------------------------------------------------------
// t-set
// -----------------------------------------------------------------------------

fn parse_set(mut el: Element, ctx: &ParseCtx, _: &mut Siblings) -> ParseResult<Step> {
    let Some(name) = el.take_attr("t-set") else {
        return Ok(Step::Next(el));
    };
    let value = el.take_attr("t-value").filter(|v| !v.is_empty());
    let text = el.text_content();
    let inner = el.inner_xml();
    let (default_value, body) = if inner == text {
        ((!text.is_empty()).then_some(text), None)
    } else {
        (None, Some(parse_children(el.children, ctx)?))
    };
    Ok(Step::Done(Some(Ast::Assign(AssignNode {
        name,
        value,
        default_value,
        body,
    }))))
}

// -----------------------------------------------------------------------------
// <t> passthrough
// -----------------------------------------------------------------------------

fn parse_t_node(el: Element, ctx: &ParseCtx, _: &mut Siblings) -> ParseResult<Step> {
    if el.tag != "t" {
        return Ok(Step::Done(None));
    }
    Ok(Step::Done(parse_child_nodes(el.children, ctx)?))
}

// -----------------------------------------------------------------------------
// Normalization
// -----------------------------------------------------------------------------

const BRANCH_DIRECTIVES: [&str; 3] = ["t-if", "t-elif", "t-else"];

/// Makes every `t-elif`/`t-else` element immediately follow its previous
/// branch by dropping blank text and comments in between.
fn normalize_branches(el: &mut Element) -> ParseResult<()> {
    let mut idx = 0;
    while idx < el.children.len() {
        let is_branch = el
            .children
            .get(idx)
            .and_then(Node::as_element)
            .is_some_and(|c| c.has_attr("t-elif") || c.has_attr("t-else"));
        if is_branch {
            let prev_idx = (0..idx)
                .rev()
                .find(|j| el.children.get(*j).and_then(Node::as_element).is_some());
            let prev = prev_idx.and_then(|j| el.children.get(j)).and_then(Node::as_element);
            let (Some(prev_idx), Some(prev)) = (prev_idx, prev) else {
                return Err(CompileError::OrphanBranch);
            };
            if !(prev.has_attr("t-if") || prev.has_attr("t-elif")) {
                return Err(CompileError::OrphanBranch);
            }
            if prev.has_attr("t-foreach") {
                return Err(CompileError::BranchOnLoop);
            }
            let count = el
                .children
                .get(idx)
                .and_then(Node::as_element)
                .map_or(0, |c| BRANCH_DIRECTIVES.iter().filter(|d| c.has_attr(d)).count());
            if count > 1 {
                return Err(CompileError::MultipleBranches);
            }
            for between in (prev_idx + 1..idx).rev() {
                if let Some(Node::Text(text)) = el.children.get(between) {
                    if !text.trim().is_empty() {
                        return Err(CompileError::TextBetweenBranches);
                    }
                }
                el.children.remove(between);
            }
            idx = prev_idx + 1;
        }
        idx += 1;
    }
    for child in &mut el.children {
        if let Node::Element(child) = child {
            normalize_branches(child)?;
        }
    }
    Ok(())
}

/// Moves `t-esc`/`t-out` from a component into a `<t>` child, which then
/// becomes the component's default slot.
fn normalize_component_output(el: &mut Element) -> ParseResult<()> {
    for child in &mut el.children {
        let Node::Element(child) = child else {
            continue;
        };
        if is_component_boundary(child) {
            for directive in ["t-esc", "t-out", "t-raw"] {
                if !child.has_attr(directive) {
                    continue;
                }
                if !child.children.is_empty() {
                    return Err(CompileError::OutputOnComponentWithContent {
                        directive: directive.to_string(),
                    });
                }
                let value = child.take_attr(directive).unwrap_or_default();
                let mut output = Element::new("t");
                output.set_attr(directive, value);
                child.children.push(Node::Element(output));
            }
        }
        normalize_component_output(child)?;
    }
    Ok(())
}
