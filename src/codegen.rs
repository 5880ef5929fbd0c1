//! AST to render code.
//!
//! The generator walks the AST once and emits the body of a template
//! factory: it destructures the runtime (`bdom`, `helpers`), declares the
//! static block constructors, then returns the main render function. Nested
//! render functions (slot content, default content, lazy `t-set` bodies) are
//! emitted in between, in creation order.
//!
//! Static markup accumulates into the structure of the current block. Each
//! dynamic piece (attribute, text, handler, ref) is appended to the block data
//! and referenced by index from `block-*` placeholders in that structure.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::{NoExpand, Regex};

use crate::ast::{
    AssignNode, Ast, AttrMap, CallTemplateNode, ComponentNode, ConditionalNode, ElementNode,
    EscapeNode, ForEachNode, RawOutputNode, SlotNode,
};
use crate::block::{BlockDescription, BlockKind, var_name};
use crate::dom::{Element, Node};
use crate::error::{CompileError, CompileResult};
use crate::expression::{
    compile_expr, compile_expr_to_tokens, has_interpolation, interpolate, replace_dynamic_parts,
};
use crate::interface::{BlockDefinition, CompileOptions, CompiledTemplate};
use crate::parser::EVENT_MODIFIERS;
use crate::target::CodeTarget;

type BlockId = usize;

const BDOM_IMPORTS: &str = "let { text, createBlock, list, multi, html, toggler, comment } = bdom;";
const MAIN_TARGET: &str = "template";

static TRANSLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)([\s\S]+?)(\s*)$").expect("valid pattern"));
static TAG_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<\w+").expect("valid pattern"));
static TAG_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+>$").expect("valid pattern"));
static PLAIN_PROP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z_]+$").expect("valid pattern"));

/// A template is context-safe when it can not alter its rendering context.
pub(crate) fn has_safe_context(source: &str) -> bool {
    !source.contains("t-set") && !source.contains("t-call")
}

/// Generates the render code of a parsed template. `source` is the template
/// text, scanned for directives that can alter the rendering context.
pub(crate) fn generate(
    ast: &Ast,
    source: &str,
    options: &CompileOptions,
) -> CompileResult<CompiledTemplate> {
    log::debug!(
        "compiling template {:?} ({} bytes)",
        options.name.as_deref().unwrap_or_default(),
        source.len()
    );
    let compiled = CodeGenerator::new(options, has_safe_context(source)).generate(ast)?;
    log::debug!(
        "compiled template {:?}: {} helpers, {} blocks, {} functions",
        options.name.as_deref().unwrap_or_default(),
        compiled.helpers.len(),
        compiled.blocks.len(),
        compiled.functions.len()
    );
    Ok(compiled)
}

/// Attributes patched as dom properties. Their values are boxed so the
/// runtime never skips an update on an unchanged value.
fn is_prop(tag: &str, key: &str) -> bool {
    match tag {
        "input" => matches!(key, "checked" | "indeterminate" | "value" | "readonly" | "disabled"),
        "option" => matches!(key, "selected" | "disabled"),
        "textarea" => matches!(key, "value" | "readonly" | "disabled"),
        "select" => matches!(key, "value" | "disabled"),
        "button" | "optgroup" => key == "disabled",
        _ => false,
    }
}

fn or_undefined(value: &str) -> &str {
    if value.is_empty() { "undefined" } else { value }
}

/// Compilation state of one AST node.
#[derive(Debug, Clone)]
struct Ctx {
    block: Option<BlockId>,
    /// Position in the parent block, or the loop index variable.
    index: String,
    force_new_block: bool,
    is_last: bool,
    translate: bool,
    t_key_expr: Option<String>,
    name_space: Option<String>,
    t_model_selected_expr: Option<String>,
    prevent_root: bool,
    ctx_var: Option<String>,
}

impl Ctx {
    fn root() -> Self {
        Self {
            block: None,
            index: "0".to_string(),
            force_new_block: false,
            is_last: true,
            translate: true,
            t_key_expr: None,
            name_space: None,
            t_model_selected_expr: None,
            prevent_root: false,
            ctx_var: None,
        }
    }

    /// A fresh context for a child node. Only translation, namespace and the
    /// selected `t-model` value are inherited.
    fn child(&self) -> Self {
        Self {
            block: None,
            index: "0".to_string(),
            force_new_block: true,
            is_last: false,
            translate: self.translate,
            t_key_expr: None,
            name_space: self.name_space.clone(),
            t_model_selected_expr: self.t_model_selected_expr.clone(),
            prevent_root: false,
            ctx_var: None,
        }
    }
}

pub(crate) struct CodeGenerator<'o> {
    options: &'o CompileOptions,
    translatable_attributes: Vec<String>,
    has_safe_context: bool,
    blocks: Vec<BlockDescription>,
    /// Blocks with a static structure, in creation order.
    block_defs: Vec<BlockId>,
    target: CodeTarget,
    targets: Vec<CodeTarget>,
    static_defs: Vec<(String, String)>,
    slot_names: HashSet<String>,
    helpers: IndexSet<String>,
    next_ids: HashMap<String, usize>,
}

impl<'o> CodeGenerator<'o> {
    pub(crate) fn new(options: &'o CompileOptions, has_safe_context: bool) -> Self {
        Self {
            options,
            translatable_attributes: options.translatable_attributes(),
            has_safe_context,
            blocks: Vec::new(),
            block_defs: Vec::new(),
            target: CodeTarget::new(MAIN_TARGET, None),
            targets: Vec::new(),
            static_defs: Vec::new(),
            slot_names: HashSet::new(),
            helpers: IndexSet::new(),
            next_ids: HashMap::new(),
        }
    }

    /// Generates the factory code of `ast`. Consumes the generator: all
    /// numbering starts over with the next one.
    pub(crate) fn generate(mut self, ast: &Ast) -> CompileResult<CompiledTemplate> {
        let is_debug = matches!(ast, Ast::Debug { .. });
        self.compile_ast(ast, &Ctx::root())?;

        let mut main_code = vec![format!("  {BDOM_IMPORTS}")];
        if !self.helpers.is_empty() {
            let helpers: Vec<&str> = self.helpers.iter().map(String::as_str).collect();
            main_code.push(format!("let {{ {} }} = helpers;", helpers.join(", ")));
        }
        let name = self.options.name.clone().filter(|n| !n.is_empty());
        if let Some(name) = &name {
            main_code.push(format!("// Template name: \"{name}\""));
        }
        for (id, expr) in &self.static_defs {
            main_code.push(format!("const {id} = {expr};"));
        }

        let mut blocks = Vec::new();
        if !self.block_defs.is_empty() {
            main_code.push(String::new());
            for id in &self.block_defs {
                let block = self.block(*id);
                let Some(dom) = &block.dom else { continue };
                let mut markup = dom.to_xml().replace('`', "\\`");
                let block_name = block.block_name();
                let dynamic_tag = block.dynamic_tag_name.is_some();
                if dynamic_tag {
                    let tag = dom.as_element().map(|el| el.tag.as_str()).unwrap_or_default();
                    let placeholder = format!("${{tag || '{tag}'}}");
                    markup = TAG_START
                        .replace(&markup, NoExpand(&format!("<{placeholder}")))
                        .into_owned();
                    markup = TAG_END
                        .replace(&markup, NoExpand(&format!("{placeholder}>")))
                        .into_owned();
                    main_code.push(format!("let {block_name} = tag => createBlock(`{markup}`);"));
                } else {
                    main_code.push(format!("let {block_name} = createBlock(`{markup}`);"));
                }
                blocks.push(BlockDefinition {
                    name: block_name,
                    markup,
                    dynamic_tag,
                });
            }
        }

        for target in &self.targets {
            main_code.push(String::new());
            main_code.push(target.generate_code());
        }
        main_code.push(String::new());
        main_code.push(format!("return {}", self.target.generate_code()));

        let code = main_code.join("\n  ");
        if is_debug {
            log::info!("generated code of template {name:?}:\n{code}");
        }
        Ok(CompiledTemplate {
            name,
            code,
            helpers: self.helpers.into_iter().collect(),
            functions: self.targets.iter().map(|t| t.name.clone()).collect(),
            blocks,
        })
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    fn generate_id(&mut self, prefix: &str) -> String {
        let counter = self.next_ids.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{prefix}{counter}")
    }

    fn use_helper(&mut self, helper: &str) {
        self.helpers.insert(helper.to_string());
    }

    fn add_static_def_once(&mut self, id: &str, expr: &str) {
        if !self.static_defs.iter().any(|(def, _)| def == id) {
            self.static_defs.push((id.to_string(), expr.to_string()));
        }
    }

    fn add_line(&mut self, line: &str) {
        self.target.add_line(line);
    }

    fn define(&mut self, var: &str, expr: &str) {
        self.add_line(&format!("const {var} = {expr};"));
    }

    fn block(&self, id: BlockId) -> &BlockDescription {
        self.blocks
            .get(id.saturating_sub(1))
            .expect("block ids are handed out by create_block")
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BlockDescription {
        self.blocks
            .get_mut(id.saturating_sub(1))
            .expect("block ids are handed out by create_block")
    }

    fn create_block(&mut self, parent: Option<BlockId>, kind: BlockKind, ctx: &Ctx) -> BlockId {
        let id = self.blocks.len().saturating_add(1);
        let mut block = BlockDescription::new(id, kind);
        if !self.target.has_root && !ctx.prevent_root {
            self.target.has_root = true;
            block.is_root = true;
        }
        if let Some(parent_id) = parent {
            let parent = self.block_mut(parent_id);
            parent.children.push(id);
            if parent.kind == BlockKind::List {
                block.parent_var = Some(format!("c_block{parent_id}"));
            }
        }
        self.blocks.push(block);
        id
    }

    fn insert_block(&mut self, expression: &str, block: BlockId, ctx: &Ctx) -> CompileResult<()> {
        let (mut block_expr, parent_var, is_root, var) = {
            let block = self.block(block);
            (
                block.generate_expr(expression),
                block.parent_var.clone(),
                block.is_root,
                block.var_name(),
            )
        };
        if let Some(parent_var) = parent_var {
            let key = self.target.current_key(ctx.t_key_expr.as_deref());
            self.use_helper("withKey");
            self.add_line(&format!(
                "{parent_var}[{}] = withKey({block_expr}, {key});",
                ctx.index
            ));
            return Ok(());
        }
        if let Some(t_key) = &ctx.t_key_expr {
            block_expr = format!("toggler({t_key}, {block_expr})");
        }
        if is_root && !ctx.prevent_root {
            if let Some(on) = self.target.on.clone() {
                block_expr = self.wrap_with_event_catcher(&block_expr, &on)?;
            }
            self.add_line(&format!("return {block_expr};"));
        } else {
            self.define(&var, &block_expr);
        }
        Ok(())
    }

    /// Declares `expr` as the next data slot of `block`, returning its index.
    fn insert_data(&mut self, block: BlockId, expr: &str, prefix: &str) -> usize {
        let id = self.generate_id(prefix);
        self.add_line(&format!("let {id} = {expr};"));
        self.push_data(block, id)
    }

    fn push_data(&mut self, block: BlockId, value: String) -> usize {
        let data = &mut self.block_mut(block).data;
        data.push(value);
        data.len().saturating_sub(1)
    }

    fn insert_anchor(&mut self, block: BlockId, index: Option<usize>) {
        let block = self.block_mut(block);
        let index = index.unwrap_or(block.children.len());
        block.insert(Node::Element(Element::new(format!("block-child-{index}"))));
    }

    /// Child blocks may be assigned from several branches. Their `const`
    /// declarations emitted since `code_idx` become assignments to variables
    /// declared once at `code_idx`.
    fn hoist_child_declarations(&mut self, block: BlockId, code_idx: usize) {
        let vars = self.block(block).child_vars();
        if vars.is_empty() {
            return;
        }
        let mut pending = vars.iter();
        let mut current = pending.next();
        for line in self.target.code.iter_mut().skip(code_idx) {
            let Some(var) = current else { break };
            if line.trim_start().starts_with(&format!("const {var} ")) {
                *line = line.replacen(&format!("const {var}"), var, 1);
                current = pending.next();
            }
        }
        self.target
            .insert_line(code_idx, &format!("let {};", vars.join(",")));
    }

    fn compile_in_new_target(
        &mut self,
        prefix: &str,
        ast: &Ast,
        ctx: &Ctx,
        on: Option<AttrMap>,
    ) -> CompileResult<String> {
        let name = self.generate_id(prefix);
        let slot = self.targets.len();
        self.targets.push(CodeTarget::new(name.clone(), None));
        let previous = std::mem::replace(&mut self.target, CodeTarget::new(name.clone(), on));
        let result = self.compile_ast(ast, &ctx.child());
        let finished = std::mem::replace(&mut self.target, previous);
        if let Some(entry) = self.targets.get_mut(slot) {
            *entry = finished;
        }
        result?;
        Ok(name)
    }

    /// Compiles `expr`, hoisting every free variable into a `const` when the
    /// expression defines a function (or when `force_capture` is set), so
    /// that the function sees the values of the current render.
    fn capture_expression(&mut self, expr: &str, force_capture: bool) -> CompileResult<String> {
        if !force_capture && !expr.contains("=>") {
            return compile_expr(expr);
        }
        let mut mapping: HashMap<String, String> = HashMap::new();
        let mut result = String::new();
        for token in compile_expr_to_tokens(expr)? {
            let Some(var) = token.var_name().filter(|_| !token.is_local()) else {
                result.push_str(&token.value);
                continue;
            };
            let id = match mapping.get(var) {
                Some(id) => id.clone(),
                None => {
                    let id = self.generate_id("v");
                    self.define(&id, &token.value);
                    mapping.insert(var.to_string(), id.clone());
                    id
                }
            };
            result.push_str(&id);
        }
        Ok(result)
    }

    fn generate_handler_code(&mut self, event: &str, handler: &str) -> CompileResult<String> {
        let mut modifiers = Vec::new();
        for modifier in event.split('.').skip(1) {
            if !EVENT_MODIFIERS.contains(&modifier) {
                return Err(CompileError::UnknownEventModifier {
                    modifier: modifier.to_string(),
                });
            }
            modifiers.push(format!("\"{modifier}\""));
        }
        let mut code = String::from("[");
        if !modifiers.is_empty() {
            let _ = write!(code, "{}, ", modifiers.join(","));
        }
        let handler = self.capture_expression(handler, false)?;
        let _ = write!(code, "{handler}, ctx]");
        Ok(code)
    }

    /// Key suffix of a component, slot or call: a fresh id plus the key of
    /// every enclosing loop.
    fn generate_component_key(&mut self) -> String {
        let mut parts = vec![self.generate_id("__")];
        for level in 1..=self.target.loop_level {
            parts.push(format!("${{key{level}}}"));
        }
        parts.join("__")
    }

    /// The context handed to slot content rendered elsewhere.
    fn captured_context(&mut self) -> String {
        if self.target.loop_level == 0 && self.has_safe_context {
            return "ctx".to_string();
        }
        let id = self.generate_id("ctx");
        self.use_helper("capture");
        self.define(&id, "capture(ctx)");
        id
    }

    fn wrap_with_event_catcher(&mut self, expr: &str, on: &AttrMap) -> CompileResult<String> {
        self.use_helper("createCatcher");
        let name = self.generate_id("catcher");
        let mut spec = Vec::new();
        let mut handlers = Vec::new();
        for (idx, (event, handler)) in on.iter().enumerate() {
            let handler_id = self.generate_id("hdlr");
            spec.push(format!("\"{event}\":{idx}"));
            let code = self.generate_handler_code(event, handler)?;
            self.define(&handler_id, &code);
            handlers.push(handler_id);
        }
        self.static_defs
            .push((name.clone(), format!("createCatcher({{{}}})", spec.join(","))));
        Ok(format!("{name}({expr}, [{}])", handlers.join(",")))
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    /// Compiles one node, returning the variable of the block it produced.
    fn compile_ast(&mut self, ast: &Ast, ctx: &Ctx) -> CompileResult<Option<String>> {
        match ast {
            Ast::Text(value) => Ok(Some(self.compile_text(value, ctx)?)),
            Ast::Comment(value) => Ok(Some(self.compile_comment(value, ctx)?)),
            Ast::Element(node) => Ok(Some(self.compile_element(node, ctx)?)),
            Ast::Multi(content) => self.compile_multi(content, ctx),
            Ast::Escape(node) => Ok(Some(self.compile_escape(node, ctx)?)),
            Ast::RawOutput(node) => Ok(Some(self.compile_raw_output(node, ctx)?)),
            Ast::Conditional(node) => Ok(Some(self.compile_conditional(node, ctx)?)),
            Ast::ForEach(node) => Ok(Some(self.compile_for_each(node, ctx)?)),
            Ast::KeyWrapper { expr, content } => self.compile_key(expr, content, ctx),
            Ast::CallTemplate(node) => Ok(Some(self.compile_call(node, ctx)?)),
            Ast::CallBlock { name } => Ok(Some(self.compile_call_block(name, ctx)?)),
            Ast::Assign(node) => {
                self.compile_assign(node, ctx)?;
                Ok(None)
            }
            Ast::Component(node) => Ok(Some(self.compile_component(node, ctx)?)),
            Ast::Debug { content } => {
                self.add_line("debugger;");
                match content {
                    Some(content) => self.compile_ast(content, ctx),
                    None => Ok(None),
                }
            }
            Ast::Log { expr, content } => {
                self.add_line(&format!("console.log({});", compile_expr(expr)?));
                match content {
                    Some(content) => self.compile_ast(content, ctx),
                    None => Ok(None),
                }
            }
            Ast::Slot(node) => Ok(Some(self.compile_slot(node, ctx)?)),
            Ast::Translation { content } => match content {
                Some(content) => {
                    let ctx = Ctx {
                        translate: false,
                        ..ctx.clone()
                    };
                    self.compile_ast(content, &ctx)
                }
                None => Ok(None),
            },
            Ast::Portal { target, content } => Ok(Some(self.compile_portal(target, content, ctx)?)),
        }
    }

    fn compile_comment(&mut self, value: &str, ctx: &Ctx) -> CompileResult<String> {
        if let Some(block) = ctx.block.filter(|_| !ctx.force_new_block) {
            self.block_mut(block).insert(Node::Comment(value.to_string()));
            return Ok(var_name(block));
        }
        let block = self.create_block(ctx.block, BlockKind::Comment, ctx);
        self.insert_block(&format!("comment(`{value}`)"), block, ctx)?;
        Ok(var_name(block))
    }

    /// Translates the text between leading and trailing whitespace.
    fn translate_text(&self, value: &str) -> String {
        match TRANSLATION.captures(value) {
            Some(caps) => {
                let part = |i: usize| caps.get(i).map_or("", |m| m.as_str());
                format!("{}{}{}", part(1), self.options.translate(part(2)), part(3))
            }
            None => value.to_string(),
        }
    }

    fn compile_text(&mut self, value: &str, ctx: &Ctx) -> CompileResult<String> {
        let value = if !value.is_empty() && ctx.translate {
            self.translate_text(value)
        } else {
            value.to_string()
        };
        if let Some(block) = ctx.block.filter(|_| !ctx.force_new_block) {
            self.block_mut(block).insert(Node::Text(value));
            return Ok(var_name(block));
        }
        let block = self.create_block(ctx.block, BlockKind::Text, ctx);
        self.insert_block(&format!("text(`{value}`)"), block, ctx)?;
        Ok(var_name(block))
    }

    fn compile_element(&mut self, node: &ElementNode, ctx: &Ctx) -> CompileResult<String> {
        let is_new_block = ctx.block.is_none()
            || ctx.force_new_block
            || node.dynamic_tag.is_some()
            || node.ns.is_some();
        let code_idx = self.target.code.len();

        let block = match ctx.block.filter(|_| !is_new_block) {
            Some(block) => block,
            None => {
                if let Some(parent) = ctx.block {
                    if node.dynamic_tag.is_some() || ctx.t_key_expr.is_some() || node.ns.is_some() {
                        self.insert_anchor(parent, None);
                    }
                }
                let block = self.create_block(ctx.block, BlockKind::Block, ctx);
                self.block_defs.push(block);
                if let Some(tag) = &node.dynamic_tag {
                    let tag_expr = self.generate_id("tag");
                    self.define(&tag_expr, &compile_expr(tag)?);
                    self.block_mut(block).dynamic_tag_name = Some(tag_expr);
                }
                block
            }
        };

        // attributes
        let mut attrs: IndexMap<String, String> = IndexMap::new();
        let name_space = node.ns.clone().or_else(|| ctx.name_space.clone());
        if let Some(ns) = name_space.as_ref().filter(|_| is_new_block) {
            attrs.insert("block-ns".to_string(), ns.clone());
        }
        for (key, value) in node.attrs.iter().flatten() {
            let mut attr_name = None;
            let mut expr = String::new();
            if key.starts_with("t-attf") {
                expr = interpolate(value)?;
                let idx = self.insert_data(block, &expr, "attr");
                let name = key.get(7..).unwrap_or_default().to_string();
                attrs.insert(format!("block-attribute-{idx}"), name.clone());
                attr_name = Some(name);
            } else if key.starts_with("t-att") {
                let name = (key != "t-att").then(|| key.get(6..).unwrap_or_default().to_string());
                expr = compile_expr(value)?;
                if let Some(prop) = name.as_deref().filter(|n| is_prop(&node.tag, n)) {
                    expr = if prop == "value" {
                        format!("new String(({expr}) || \"\")")
                    } else {
                        format!("new Boolean({expr})")
                    };
                }
                let idx = self.insert_data(block, &expr, "attr");
                match &name {
                    Some(name) => attrs.insert(format!("block-attribute-{idx}"), name.clone()),
                    None => attrs.insert("block-attributes".to_string(), idx.to_string()),
                };
                attr_name = name;
            } else if self.translatable_attributes.contains(key) {
                attrs.insert(key.clone(), self.options.translate(value));
            } else {
                expr = format!("\"{value}\"");
                attr_name = Some(key.clone());
                attrs.insert(key.clone(), value.clone());
            }
            if attr_name.as_deref() == Some("value") {
                if let Some(selected) = ctx.t_model_selected_expr.as_deref() {
                    let idx = self.insert_data(block, &format!("{selected} === {expr}"), "attr");
                    attrs.insert(format!("block-attribute-{idx}"), "selected".to_string());
                }
            }
        }

        // event handlers
        for (event, handler) in node.on.iter().flatten() {
            let code = self.generate_handler_code(event, handler)?;
            let idx = self.insert_data(block, &code, "hdlr");
            attrs.insert(format!("block-handler-{idx}"), event.clone());
        }

        // t-ref
        if let Some(ref_name) = &node.ref_name {
            self.target.has_ref = true;
            let idx = if has_interpolation(ref_name) {
                let name = replace_dynamic_parts(ref_name, |expr| self.capture_expression(expr, true))?;
                self.insert_data(block, &format!("(el) => refs[{name}] = el"), "ref")
            } else if let Some(info) = self.target.ref_info.get_mut(ref_name) {
                info.1 = format!("multiRefSetter(refs, `{ref_name}`)");
                let var = info.0.clone();
                self.use_helper("multiRefSetter");
                self.push_data(block, var)
            } else {
                let id = self.generate_id("ref");
                self.target.ref_info.insert(
                    ref_name.clone(),
                    (id.clone(), format!("(el) => refs[`{ref_name}`] = el")),
                );
                self.push_data(block, id)
            };
            attrs.insert("block-ref".to_string(), idx.to_string());
        }

        // t-model
        let mut t_model_selected_expr = None;
        if let Some(model) = &node.model {
            let base_expr = compile_expr(&model.base_expr)?;
            let base_id = self.generate_id("bExpr");
            self.define(&base_id, &base_expr);
            let expression = compile_expr(&model.expr)?;
            let expr_id = self.generate_id("expr");
            self.define(&expr_id, &expression);
            let full_expression = format!("{base_id}[{expr_id}]");

            if let Some(special) = &model.special_init_target_attr {
                let current = attrs
                    .get(&model.target_attr)
                    .map_or("undefined", String::as_str)
                    .to_string();
                let idx = self.insert_data(block, &format!("{full_expression} === '{current}'"), "attr");
                attrs.insert(format!("block-attribute-{idx}"), special.clone());
            } else if model.has_dynamic_children {
                let value_id = self.generate_id("bValue");
                self.define(&value_id, &full_expression);
                t_model_selected_expr = Some(value_id);
            } else {
                let idx = self.insert_data(block, &full_expression, "attr");
                attrs.insert(format!("block-attribute-{idx}"), model.target_attr.clone());
            }

            self.use_helper("toNumber");
            let mut value_code = format!("ev.target.{}", model.target_attr);
            if model.should_trim {
                value_code.push_str(".trim()");
            }
            if model.should_numberize {
                value_code = format!("toNumber({value_code})");
            }
            let handler = format!("[(ev) => {{ {full_expression} = {value_code}; }}]");
            let idx = self.insert_data(block, &handler, "hdlr");
            attrs.insert(format!("block-handler-{idx}"), model.event_type.clone());
        }

        let mut element = Element::new(node.tag.clone());
        for (attr, value) in attrs {
            if !(attr == "class" && value.is_empty()) {
                element.set_attr(attr, value);
            }
        }
        let path = self.block_mut(block).insert(Node::Element(element));

        if !node.content.is_empty() {
            let initial_dom = self.block_mut(block).current_dom.replace(path);
            let last = node.content.len().saturating_sub(1);
            for (i, child) in node.content.iter().enumerate() {
                let sub_ctx = Ctx {
                    block: Some(block),
                    force_new_block: false,
                    is_last: ctx.is_last && i == last,
                    t_key_expr: ctx.t_key_expr.clone(),
                    name_space: name_space.clone(),
                    t_model_selected_expr: t_model_selected_expr.clone(),
                    ..ctx.child()
                };
                self.compile_ast(child, &sub_ctx)?;
            }
            self.block_mut(block).current_dom = initial_dom;
        }

        if is_new_block {
            let expr = format!("{}(ddd)", self.block(block).block_name());
            self.insert_block(&expr, block, ctx)?;
            if self.block(block).has_dynamic_children {
                self.hoist_child_declarations(block, code_idx);
            }
        }
        Ok(var_name(block))
    }

    fn compile_escape(&mut self, node: &EscapeNode, ctx: &Ctx) -> CompileResult<String> {
        let expr = if node.expr == "0" {
            self.use_helper("zero");
            "ctx[zero]".to_string()
        } else {
            let expr = compile_expr(&node.expr)?;
            if node.default_value.is_empty() {
                expr
            } else {
                self.use_helper("withDefault");
                format!("withDefault({expr}, `{}`)", node.default_value)
            }
        };
        if let Some(block) = ctx.block.filter(|_| !ctx.force_new_block) {
            let idx = self.insert_data(block, &expr, "txt");
            self.block_mut(block)
                .insert(Node::Element(Element::new(format!("block-text-{idx}"))));
            return Ok(var_name(block));
        }
        let block = self.create_block(ctx.block, BlockKind::Text, ctx);
        self.insert_block(&format!("text({expr})"), block, ctx)?;
        Ok(var_name(block))
    }

    fn compile_raw_output(&mut self, node: &RawOutputNode, ctx: &Ctx) -> CompileResult<String> {
        if let Some(parent) = ctx.block {
            self.insert_anchor(parent, None);
        }
        let block = self.create_block(ctx.block, BlockKind::Html, ctx);
        let block_str = if node.expr == "0" {
            self.use_helper("zero");
            "ctx[zero]".to_string()
        } else if let Some(body) = &node.body {
            let body_block = self.blocks.len().saturating_add(1);
            self.compile_multi(body, &ctx.child())?;
            self.use_helper("safeOutput");
            format!("safeOutput({}, {})", compile_expr(&node.expr)?, var_name(body_block))
        } else {
            self.use_helper("safeOutput");
            format!("safeOutput({})", compile_expr(&node.expr)?)
        };
        self.insert_block(&block_str, block, ctx)?;
        Ok(var_name(block))
    }

    fn compile_branch(&mut self, content: &Ast, block: BlockId, ctx: &Ctx) -> CompileResult<()> {
        self.target.indent_level += 1;
        let child_count = self.block(block).children.len();
        let sub_ctx = Ctx {
            block: Some(block),
            index: ctx.index.clone(),
            ..ctx.child()
        };
        self.compile_ast(content, &sub_ctx)?;
        if self.block(block).children.len() > child_count {
            self.insert_anchor(block, Some(child_count));
        }
        self.target.indent_level -= 1;
        Ok(())
    }

    fn compile_conditional(&mut self, node: &ConditionalNode, ctx: &Ctx) -> CompileResult<String> {
        let code_idx = self.target.code.len();
        let is_new_block = match ctx.block {
            Some(block) => self.block(block).kind != BlockKind::Multi && ctx.force_new_block,
            None => true,
        };
        if let Some(block) = ctx.block {
            self.block_mut(block).has_dynamic_children = true;
        }
        let block = match ctx.block.filter(|_| !is_new_block) {
            Some(block) => block,
            None => self.create_block(ctx.block, BlockKind::Multi, ctx),
        };

        self.add_line(&format!("if ({}) {{", compile_expr(&node.condition)?));
        self.compile_branch(&node.content, block, ctx)?;
        for elif in &node.elifs {
            self.add_line(&format!("}} else if ({}) {{", compile_expr(&elif.condition)?));
            self.compile_branch(&elif.content, block, ctx)?;
        }
        if let Some(else_branch) = &node.else_branch {
            self.add_line("} else {");
            self.compile_branch(else_branch, block, ctx)?;
        }
        self.add_line("}");

        if is_new_block {
            self.hoist_child_declarations(block, code_idx);
            let args = self.block(block).child_vars().join(", ");
            self.insert_block(&format!("multi([{args}])"), block, ctx)?;
        }
        Ok(var_name(block))
    }

    fn compile_for_each(&mut self, node: &ForEachNode, ctx: &Ctx) -> CompileResult<String> {
        if let Some(parent) = ctx.block {
            self.insert_anchor(parent, None);
        }
        let block = self.create_block(ctx.block, BlockKind::List, ctx);
        self.target.loop_level += 1;
        let level = self.target.loop_level;
        let loop_var = format!("i{level}");
        let elem = &node.elem;

        self.add_line("ctx = Object.create(ctx);");
        let vals = format!("v_block{block}");
        let keys = format!("k_block{block}");
        let length = format!("l_block{block}");
        let children = format!("c_block{block}");
        self.use_helper("prepareList");
        self.define(
            &format!("[{keys}, {vals}, {length}, {children}]"),
            &format!("prepareList({});", compile_expr(&node.collection)?),
        );
        if self.options.dev {
            self.define(&format!("keys{block}"), "new Set()");
        }
        self.add_line(&format!(
            "for (let {loop_var} = 0; {loop_var} < {length}; {loop_var}++) {{"
        ));
        self.target.indent_level += 1;
        self.add_line(&format!("ctx[`{elem}`] = {vals}[{loop_var}];"));
        if node.helpers.first {
            self.add_line(&format!("ctx[`{elem}_first`] = {loop_var} === 0;"));
        }
        if node.helpers.last {
            self.add_line(&format!(
                "ctx[`{elem}_last`] = {loop_var} === {vals}.length - 1;"
            ));
        }
        if node.helpers.index {
            self.add_line(&format!("ctx[`{elem}_index`] = {loop_var};"));
        }
        if node.helpers.value {
            self.add_line(&format!("ctx[`{elem}_value`] = {keys}[{loop_var}];"));
        }
        self.define(&format!("key{level}"), &compile_expr(&node.key)?);
        if self.options.dev {
            self.use_helper("OwlError");
            self.add_line(&format!(
                "if (keys{block}.has(String(key{level}))) {{ throw new OwlError(`Got duplicate key in t-foreach: ${{key{level}}}`)}}"
            ));
            self.add_line(&format!("keys{block}.add(String(key{level}));"));
        }

        let memo_id = match &node.memo {
            Some(memo) => {
                self.target.has_cache = true;
                let id = self.generate_id("");
                self.define(&format!("memo{id}"), &compile_expr(memo)?);
                self.define(&format!("vnode{id}"), &format!("cache[key{level}];"));
                self.add_line(&format!("if (vnode{id}) {{"));
                self.target.indent_level += 1;
                self.add_line(&format!("if (shallowEqual(vnode{id}.memo, memo{id})) {{"));
                self.target.indent_level += 1;
                self.add_line(&format!("{children}[{loop_var}] = vnode{id};"));
                self.add_line(&format!("nextCache[key{level}] = vnode{id};"));
                self.add_line("continue;");
                self.target.indent_level -= 1;
                self.add_line("}");
                self.target.indent_level -= 1;
                self.add_line("}");
                Some(id)
            }
            None => None,
        };

        let sub_ctx = Ctx {
            block: Some(block),
            index: loop_var.clone(),
            ..ctx.child()
        };
        self.compile_ast(&node.body, &sub_ctx)?;
        if let Some(id) = memo_id {
            self.add_line(&format!(
                "nextCache[key{level}] = Object.assign({children}[{loop_var}], {{memo: memo{id}}});"
            ));
        }
        self.target.indent_level -= 1;
        self.target.loop_level -= 1;
        self.add_line("}");
        if !ctx.is_last {
            self.add_line("ctx = ctx.__proto__;");
        }
        self.insert_block("l", block, ctx)?;
        Ok(var_name(block))
    }

    fn compile_key(&mut self, expr: &str, content: &Ast, ctx: &Ctx) -> CompileResult<Option<String>> {
        let t_key_expr = self.generate_id("tKey_");
        self.define(&t_key_expr, &compile_expr(expr)?);
        let sub_ctx = Ctx {
            t_key_expr: Some(t_key_expr),
            block: ctx.block,
            index: ctx.index.clone(),
            ..ctx.child()
        };
        self.compile_ast(content, &sub_ctx)
    }

    fn compile_multi(&mut self, content: &[Ast], ctx: &Ctx) -> CompileResult<Option<String>> {
        let code_idx = self.target.code.len();
        let (block, is_new_block) = match ctx.block.filter(|_| !ctx.force_new_block) {
            Some(block) => (block, false),
            None => {
                let rendered = content.iter().filter(|c| !c.is_assign()).count();
                if rendered <= 1 {
                    let mut result = None;
                    for child in content {
                        let name = self.compile_ast(child, ctx)?;
                        result = result.or(name);
                    }
                    return Ok(result);
                }
                (self.create_block(ctx.block, BlockKind::Multi, ctx), true)
            }
        };

        let mut index = 0usize;
        let last = content.len().saturating_sub(1);
        for (i, child) in content.iter().enumerate() {
            let is_assign = child.is_assign();
            let sub_ctx = Ctx {
                block: Some(block),
                index: index.to_string(),
                force_new_block: !is_assign,
                prevent_root: ctx.prevent_root,
                is_last: ctx.is_last && i == last,
                ..ctx.child()
            };
            self.compile_ast(child, &sub_ctx)?;
            if !is_assign {
                index += 1;
            }
        }

        if is_new_block {
            if self.block(block).has_dynamic_children {
                self.hoist_child_declarations(block, code_idx);
            }
            let args = self.block(block).child_vars().join(", ");
            self.insert_block(&format!("multi([{args}])"), block, ctx)?;
        }
        Ok(Some(var_name(block)))
    }

    fn compile_call(&mut self, node: &CallTemplateNode, ctx: &Ctx) -> CompileResult<String> {
        let mut ctx_var = ctx.ctx_var.clone().unwrap_or_else(|| "ctx".to_string());
        if let Some(context) = &node.context {
            ctx_var = self.generate_id("ctx");
            self.add_line(&format!("let {ctx_var} = {};", compile_expr(context)?));
        }
        if let Some(body) = &node.body {
            self.add_line(&format!("{ctx_var} = Object.create({ctx_var});"));
            self.add_line(&format!("{ctx_var}[isBoundary] = 1;"));
            self.use_helper("isBoundary");
            let sub_ctx = Ctx {
                prevent_root: true,
                ctx_var: Some(ctx_var.clone()),
                ..ctx.child()
            };
            if let Some(body_block) = self.compile_multi(body, &sub_ctx)? {
                self.use_helper("zero");
                self.add_line(&format!("{ctx_var}[zero] = {body_block};"));
            }
        }

        let is_dynamic = has_interpolation(&node.name);
        let sub_template = if is_dynamic {
            interpolate(&node.name)?
        } else {
            format!("`{}`", node.name)
        };
        if let Some(parent) = ctx.block.filter(|_| !ctx.force_new_block) {
            self.insert_anchor(parent, None);
        }
        let key = format!("key + `{}`", self.generate_component_key());
        let block = if is_dynamic {
            let template_var = self.generate_id("template");
            self.add_static_def_once("call", "app.callTemplate.bind(app)");
            self.define(&template_var, &sub_template);
            let block = self.create_block(ctx.block, BlockKind::Multi, ctx);
            self.insert_block(
                &format!("call(this, {template_var}, {ctx_var}, node, {key})"),
                block,
                ctx,
            )?;
            block
        } else {
            let id = self.generate_id("callTemplate_");
            self.static_defs
                .push((id.clone(), format!("app.getTemplate({sub_template})")));
            let block = self.create_block(ctx.block, BlockKind::Multi, ctx);
            self.insert_block(&format!("{id}.call(this, {ctx_var}, node, {key})"), block, ctx)?;
            block
        };
        if node.body.is_some() && !ctx.is_last {
            self.add_line(&format!("{ctx_var} = {ctx_var}.__proto__;"));
        }
        Ok(var_name(block))
    }

    fn compile_call_block(&mut self, name: &str, ctx: &Ctx) -> CompileResult<String> {
        if let Some(parent) = ctx.block.filter(|_| !ctx.force_new_block) {
            self.insert_anchor(parent, None);
        }
        let block = self.create_block(ctx.block, BlockKind::Multi, ctx);
        self.insert_block(&compile_expr(name)?, block, ctx)?;
        Ok(var_name(block))
    }

    fn compile_assign(&mut self, node: &AssignNode, ctx: &Ctx) -> CompileResult<()> {
        self.target.should_protect_scope = true;
        self.use_helper("isBoundary");
        self.use_helper("withDefault");
        let expr = match &node.value {
            Some(value) => compile_expr(value)?,
            None => "null".to_string(),
        };
        if let Some(body) = &node.body {
            self.use_helper("LazyValue");
            let body = Ast::Multi(body.clone());
            let name = self.compile_in_new_target("value", &body, ctx, None)?;
            let key = self.target.current_key(ctx.t_key_expr.as_deref());
            let mut value = format!("new LazyValue({name}, ctx, this, node, {key})");
            if node.value.is_some() {
                value = format!("withDefault({expr}, {value})");
            }
            self.add_line(&format!("ctx[`{}`] = {value};", node.name));
        } else {
            let value = match (&node.default_value, &node.value) {
                (Some(default), Some(_)) => format!("withDefault({expr}, `{default}`)"),
                (Some(default), None) => format!("`{default}`"),
                (None, _) => expr,
            };
            self.use_helper("setContextValue");
            let ctx_var = ctx.ctx_var.as_deref().unwrap_or("ctx");
            self.add_line(&format!("setContextValue({ctx_var}, \"{}\", {value});", node.name));
        }
        Ok(())
    }

    /// Formats one prop as an object literal entry:
    ///
    /// | name           | value     | result                                 |
    /// |----------------|-----------|----------------------------------------|
    /// | `number`       | `state`   | `number: ctx['state']`                 |
    /// | `something`    | ``        | `something: undefined`                 |
    /// | `some-prop`    | `state`   | `'some-prop': ctx['state']`            |
    /// | `onClick.bind` | `onClick` | `onClick: bind(ctx, ctx['onClick'])`   |
    fn format_prop(&mut self, name: &str, value: &str) -> CompileResult<String> {
        let mut value = self.capture_expression(value, false)?;
        let mut name = name.to_string();
        if let Some((base, rest)) = name.split_once('.') {
            let suffix = rest.split('.').next().unwrap_or_default();
            if suffix != "bind" {
                return Err(CompileError::InvalidPropSuffix { prop: name });
            }
            let base = base.to_string();
            self.use_helper("bind");
            value = format!("bind(ctx, {})", or_undefined(&value));
            name = base;
        }
        if !PLAIN_PROP_NAME.is_match(&name) {
            name = format!("'{name}'");
        }
        Ok(format!("{name}: {}", or_undefined(&value)))
    }

    fn format_prop_object(&mut self, props: &AttrMap) -> CompileResult<Vec<String>> {
        props
            .iter()
            .map(|(name, value)| self.format_prop(name, value))
            .collect()
    }

    fn get_prop_string(props: &[String], dynamic_props: Option<&str>) -> CompileResult<String> {
        let prop_string = format!("{{{}}}", props.join(","));
        let Some(dynamic_props) = dynamic_props else {
            return Ok(prop_string);
        };
        let dynamic = compile_expr(dynamic_props)?;
        if props.is_empty() {
            Ok(format!("Object.assign({{}}, {dynamic})"))
        } else {
            Ok(format!("Object.assign({{}}, {dynamic}, {prop_string})"))
        }
    }

    fn compile_component(&mut self, node: &ComponentNode, ctx: &Ctx) -> CompileResult<String> {
        let has_slots_prop = node.props.as_ref().is_some_and(|p| p.contains_key("slots"));
        let mut props = match &node.props {
            Some(props) => self.format_prop_object(props)?,
            None => Vec::new(),
        };

        let mut slot_def = None;
        if let Some(slots) = &node.slots {
            let ctx_str = self.captured_context();
            let mut slot_entries = Vec::new();
            for (slot_name, slot) in slots {
                let mut params = Vec::new();
                if let Some(content) = &slot.content {
                    let name = self.compile_in_new_target("slot", content, ctx, slot.on.clone())?;
                    params.push(format!("__render: {name}, __ctx: {ctx_str}"));
                }
                if let Some(scope) = &slot.scope {
                    params.push(format!("__scope: \"{scope}\""));
                }
                if let Some(attrs) = &slot.attrs {
                    params.extend(self.format_prop_object(attrs)?);
                }
                slot_entries.push(format!("'{slot_name}': {{{}}}", params.join(", ")));
            }
            slot_def = Some(format!("{{{}}}", slot_entries.join(", ")));
        }

        let merges_slots = node.dynamic_props.is_some() || has_slots_prop;
        if let Some(slot_def) = slot_def.as_ref().filter(|_| !merges_slots) {
            self.use_helper("markRaw");
            props.push(format!("slots: markRaw({slot_def})"));
        }
        let mut prop_string = Self::get_prop_string(&props, node.dynamic_props.as_deref())?;
        let mut prop_var = None;
        if (slot_def.is_some() && merges_slots) || self.options.dev {
            let id = self.generate_id("props");
            self.define(&id, &prop_string);
            prop_string.clone_from(&id);
            prop_var = Some(id);
        }
        if let (Some(slot_def), Some(prop_var)) = (slot_def.as_ref().filter(|_| merges_slots), &prop_var) {
            self.use_helper("markRaw");
            self.add_line(&format!(
                "{prop_var}.slots = markRaw(Object.assign({slot_def}, {prop_var}.slots))"
            ));
        }

        let key = self.generate_component_key();
        let expr = if node.is_dynamic {
            let id = self.generate_id("Comp");
            self.define(&id, &compile_expr(&node.name)?);
            id
        } else {
            format!("`{}`", node.name)
        };
        if self.options.dev {
            let prop_var = prop_var.as_deref().unwrap_or("undefined");
            self.add_line(&format!("helpers.validateProps({expr}, {prop_var}, this);"));
        }
        if let Some(parent) = ctx.block {
            if !ctx.force_new_block || ctx.t_key_expr.is_some() {
                self.insert_anchor(parent, None);
            }
        }
        let mut key_arg = format!("key + `{key}`");
        if let Some(t_key) = &ctx.t_key_expr {
            key_arg = format!("{t_key} + {key_arg}");
        }
        let id = self.generate_id("comp");
        let static_name = if node.is_dynamic { "null" } else { expr.as_str() };
        self.static_defs.push((
            id.clone(),
            format!(
                "app.createComponent({static_name}, {}, {}, {}, {})",
                !node.is_dynamic,
                node.slots.is_some(),
                node.dynamic_props.is_some(),
                node.props.is_none() && node.dynamic_props.is_none(),
            ),
        ));
        let dynamic_name = if node.is_dynamic { expr.as_str() } else { "null" };
        let mut block_expr = format!("{id}({prop_string}, {key_arg}, node, this, {dynamic_name})");
        if node.is_dynamic {
            block_expr = format!("toggler({expr}, {block_expr})");
        }
        if let Some(on) = &node.on {
            block_expr = self.wrap_with_event_catcher(&block_expr, on)?;
        }
        let block = self.create_block(ctx.block, BlockKind::Multi, ctx);
        self.insert_block(&block_expr, block, ctx)?;
        Ok(var_name(block))
    }

    fn compile_slot(&mut self, node: &SlotNode, ctx: &Ctx) -> CompileResult<String> {
        self.use_helper("callSlot");
        let dynamic = has_interpolation(&node.name);
        let (slot_name, is_multiple) = if dynamic {
            (interpolate(&node.name)?, true)
        } else {
            let is_multiple = !self.slot_names.insert(node.name.clone());
            (format!("'{}'", node.name), is_multiple)
        };

        let mut attrs = node.attrs.clone();
        let dynamic_props = attrs.as_mut().and_then(|a| a.shift_remove("t-props"));
        let mut key = self.target.current_key(None);
        if is_multiple {
            key = format!("{key} + `{}`", self.generate_component_key());
        }
        let props = match &attrs {
            Some(attrs) => self.format_prop_object(attrs)?,
            None => Vec::new(),
        };
        let scope = Self::get_prop_string(&props, dynamic_props.as_deref())?;

        let mut block_string = if let Some(default_content) = &node.default_content {
            let name = self.compile_in_new_target("defaultContent", default_content, ctx, None)?;
            format!("callSlot(ctx, node, {key}, {slot_name}, {dynamic}, {scope}, {name})")
        } else if dynamic {
            let name = self.generate_id("slot");
            self.define(&name, &slot_name);
            format!("toggler({name}, callSlot(ctx, node, {key}, {name}, {dynamic}, {scope}))")
        } else {
            format!("callSlot(ctx, node, {key}, {slot_name}, {dynamic}, {scope})")
        };
        if let Some(on) = &node.on {
            block_string = self.wrap_with_event_catcher(&block_string, on)?;
        }
        if let Some(parent) = ctx.block {
            self.insert_anchor(parent, None);
        }
        let block = self.create_block(ctx.block, BlockKind::Multi, ctx);
        let insert_ctx = Ctx {
            force_new_block: false,
            ..ctx.clone()
        };
        self.insert_block(&block_string, block, &insert_ctx)?;
        Ok(var_name(block))
    }

    fn compile_portal(&mut self, target: &str, content: &Ast, ctx: &Ctx) -> CompileResult<String> {
        self.add_static_def_once("Portal", "app.Portal");
        let name = self.compile_in_new_target("slot", content, ctx, None)?;
        let key = self.generate_component_key();
        let ctx_str = self.captured_context();
        let id = self.generate_id("comp");
        self.static_defs.push((
            id.clone(),
            "app.createComponent(null, false, true, false, false)".to_string(),
        ));
        let target = compile_expr(target)?;
        let block_string = format!(
            "{id}({{target: {target},slots: {{'default': {{__render: {name}, __ctx: {ctx_str}}}}}}}, key + `{key}`, node, ctx, Portal)"
        );
        if let Some(parent) = ctx.block {
            self.insert_anchor(parent, None);
        }
        let block = self.create_block(ctx.block, BlockKind::Multi, ctx);
        let insert_ctx = Ctx {
            force_new_block: false,
            ..ctx.clone()
        };
        self.insert_block(&block_string, block, &insert_ctx)?;
        Ok(var_name(block))
    }
}
