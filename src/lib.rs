//! A compiler for directive-annotated markup templates.
//!
//! Templates are compiled to the source of a render function factory for a
//! block-tree runtime: static structure is declared once per block, and the
//! render function only computes the dynamic data patched into it.
//!
//! ```
//! use qwebc::{CompileOptions, compile};
//!
//! let compiled = compile("<p t-esc=\"state.text\"/>", &CompileOptions::default()).unwrap();
//! assert!(compiled.code.contains("let block1 = createBlock(`<p><block-text-0/></p>`);"));
//! assert!(compiled.code.contains("let txt1 = ctx['state'].text;"));
//! ```

mod ast;
mod block;
mod codegen;
mod dom;
mod engine;
mod error;
mod expression;
mod interface;
mod parser;
mod target;
mod template;

// Public exports.
pub use ast::{
    AssignNode, Ast, AttrMap, CallTemplateNode, ComponentNode, ConditionalNode, ElementNode,
    ElifBranch, EscapeNode, ForEachNode, LoopHelpers, ModelSpec, RawOutputNode, SlotDefinition,
    SlotNode,
};
pub use dom::{Element, Node, parse_markup};
pub use engine::TemplateSet;
pub use error::{CompileError, CompileResult, MarkupError};
pub use expression::{Token, TokenKind, compile_expr, tokenize};
pub use interface::{
    BlockDefinition, CompileOptions, CompiledTemplate, TRANSLATABLE_ATTRIBUTES, TemplateCompiler,
    TranslateFn,
};
pub use parser::parse;
pub use template::{AstCache, Template};

/// Compiles a template source in one go, without caching.
///
/// # Errors
///
/// Returns the first markup, directive or expression error of the template.
pub fn compile(source: &str, options: &CompileOptions) -> CompileResult<CompiledTemplate> {
    let ast = parse(source)?;
    codegen::generate(&ast, source, options)
}
