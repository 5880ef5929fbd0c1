mod fixtures;

use fixtures::{generate_random_whitespace, generate_random_whitespace_at_least_one, get_compiler};
use qwebc::{
    Ast, CompileError, CompileOptions, TemplateCompiler, TemplateSet, compile, compile_expr, parse,
    parse_markup,
};

// No runtime is involved here: the block markup is what the runtime clones,
// so a static template must come out of the compiler as its own markup.
#[test]
#[ntest::timeout(100)]
fn test_static_markup_round_trip() {
    let source = "<section class=\"card\"><h1>Title</h1><p>Some <b>bold</b> text</p></section>";
    let compiled = compile(source, &CompileOptions::default()).unwrap();

    assert_eq!(compiled.blocks.len(), 1, "static markup fits in one block");
    assert_eq!(compiled.blocks[0].markup, source);
    assert!(
        !compiled.blocks[0].markup.contains("block-"),
        "static markup has no placeholders"
    );
    assert!(compiled.helpers.is_empty());
    assert!(compiled.code.ends_with("return block1();\n  }"));
}

#[test]
#[ntest::timeout(100)]
fn test_static_markup_structure_survives() {
    let source = concat!(
        "<section class=\"card\" data-x=\"&lt;1&gt;\">",
        "<h1>Title &amp; more</h1><p>Some <b>bold</b> text<br/></p>",
        "</section>"
    );
    let compiled = compile(source, &CompileOptions::default()).unwrap();
    assert_eq!(compiled.blocks.len(), 1);

    // The emitted markup reads back as the same tree as the template.
    let emitted = parse_markup(&compiled.blocks[0].markup).unwrap();
    let expected = parse_markup(source).unwrap();
    assert_eq!(emitted, expected);
}

#[test]
#[ntest::timeout(100)]
fn test_compilation_is_deterministic() {
    let source = concat!(
        "<div t-on-click=\"ev => state.toggle(ev)\">",
        "<t t-foreach=\"items\" t-as=\"item\" t-key=\"item.id\"><Item value=\"item\"/></t>",
        "<t t-if=\"state.open\"><t t-slot=\"default\"/></t>",
        "</div>"
    );
    let options = CompileOptions::new().with_dev(true);
    let first = compile(source, &options).unwrap();
    let second = compile(source, &options).unwrap();
    assert_eq!(first, second, "numbering restarts with every compilation");

    // The same holds for a registry compiling a cached template.
    let mut compiler = get_compiler();
    compiler.add_template("main", source).unwrap();
    let named = compiler.compile("main", &options).unwrap();
    let again = compiler.compile("main", &options).unwrap();
    assert_eq!(named, again);
    assert_eq!(named.blocks, first.blocks);
}

#[test]
#[ntest::timeout(100)]
fn test_expression_rewriting() {
    let expr = "state.items.filter(item => item.done && filter).length";
    assert_eq!(compile_expr(expr).unwrap(), compile_expr(expr).unwrap());
    assert_eq!(
        compile_expr(expr).unwrap(),
        "ctx['state'].items.filter(_item=>_item.done&&ctx['filter']).length"
    );

    // Object literal shorthand.
    assert_eq!(compile_expr("{a}").unwrap(), "{a:ctx['a']}");

    // Lambda parameters stay local, the same names outside do not.
    assert_eq!(
        compile_expr("(a, b) => a + b + c").unwrap(),
        "(_a,_b)=>_a+_b+ctx['c']"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_loop_requires_key() {
    let without_key = "<ul><li t-foreach=\"items\" t-as=\"item\" t-esc=\"item\"/></ul>";
    let err = compile(without_key, &CompileOptions::default()).unwrap_err();
    assert_eq!(
        err,
        CompileError::MissingLoopKey {
            collection: "items".to_string(),
            alias: "item".to_string(),
        }
    );
    assert!(err.to_string().contains("t-key"));

    let with_key = format!(
        "<ul><li t-foreach=\"items\" t-as=\"item\" t-key=\"{}item.id{}\" t-esc=\"item\"/></ul>",
        generate_random_whitespace(),
        generate_random_whitespace(),
    );
    let compiled = compile(&with_key, &CompileOptions::default()).unwrap();
    assert!(compiled.code.contains("const key1 = ctx['item'].id;"));
}

#[test]
#[ntest::timeout(100)]
fn test_elif_siblings() {
    let source = format!(
        "<div><t t-if=\"a\">A</t>{}<t t-elif=\"b\">B</t>{}<t t-elif=\"c\">C</t></div>",
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
    );
    let compiled = compile(&source, &CompileOptions::default()).unwrap();
    assert!(compiled.code.contains("} else if (ctx['b']) {"));
    assert!(compiled.code.contains("} else if (ctx['c']) {"));
    assert!(compiled.code.contains("let b2,b3,b4;"));

    let with_text = "<div><t t-if=\"a\">A</t>text<t t-elif=\"b\">B</t></div>";
    assert_eq!(
        compile(with_text, &CompileOptions::default()).unwrap_err(),
        CompileError::TextBetweenBranches
    );
}

#[test]
#[ntest::timeout(100)]
fn test_output_on_component_with_content() {
    let source = "<Child t-out=\"value\"><p>content</p></Child>";
    let err = compile(source, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::OutputOnComponentWithContent { .. }));

    let source = "<Child t-out=\"value\"/>";
    let compiled = compile(source, &CompileOptions::default()).unwrap();
    assert!(compiled.code.contains("safeOutput(ctx['value'])"));
    assert_eq!(compiled.functions, vec!["slot1"]);
}

// Duplicate keys are a render-time error. Without a runtime, the check is
// asserted on the generated loop body: it throws on a repeated key, so the
// first pass over distinct keys succeeds and a later pass with a duplicate fails.
#[test]
#[ntest::timeout(100)]
fn test_duplicate_key_check_in_dev_mode() {
    let source = "<div><p t-foreach=\"rows\" t-as=\"row\" t-key=\"row.id\" t-esc=\"row.id\"/></div>";

    let dev = compile(source, &CompileOptions::new().with_dev(true)).unwrap();
    assert!(dev.code.contains("const keys2 = new Set();"));
    assert!(dev.code.contains(
        "if (keys2.has(String(key1))) { throw new OwlError(`Got duplicate key in t-foreach: ${key1}`)}"
    ));
    assert!(dev.code.contains("keys2.add(String(key1));"));
    assert!(dev.helpers.contains(&"OwlError".to_string()));

    let production = compile(source, &CompileOptions::default()).unwrap();
    assert!(!production.code.contains("keys2"));
    assert!(!production.helpers.contains(&"OwlError".to_string()));
}

#[test]
#[ntest::timeout(100)]
fn test_unknown_event_modifier() {
    let err = compile("<button t-on-click.once=\"f\"/>", &CompileOptions::default()).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownEventModifier {
            modifier: "once".to_string()
        }
    );
}

#[test]
#[ntest::timeout(100)]
fn test_grammar_errors() {
    let options = CompileOptions::default();
    let cases = [
        ("<block-div/>", "Invalid tag name"),
        ("<div block-x=\"1\"/>", "Invalid attribute"),
        ("<div t-foo=\"1\"/>", "Unknown QWeb directive"),
        ("<div t-model=\"state.x\"/>", "t-model directive only works"),
        ("<input t-model=\"state\"/>", "Invalid t-model expression"),
        ("<t t-else=\"\">x</t>", "must be preceded by a t-if"),
        ("<Comp t-ref=\"r\"/>", "t-ref is no longer supported"),
        ("<div t-component=\"C\"/>", "can only be used on <t> nodes"),
        ("<Comp a.foo=\"x\"/>", "Invalid prop suffix"),
        ("<div><p></div>", "Invalid XML"),
    ];
    for (source, message) in cases {
        let err = compile(source, &options).unwrap_err();
        assert!(
            err.to_string().contains(message),
            "{source}: expected `{message}` in `{err}`"
        );
    }
}

#[test]
#[ntest::timeout(100)]
fn test_component_with_slots_and_events() {
    let source = concat!(
        "<Dialog title=\"state.title\" t-on-close=\"() => state.open = false\">",
        "<t t-set-slot=\"footer\"><button t-on-click=\"save\">Save</button></t>",
        "<p t-esc=\"state.body\"/>",
        "</Dialog>"
    );
    let compiled = compile(source, &CompileOptions::default()).unwrap();
    let code = &compiled.code;

    assert_eq!(compiled.functions, vec!["slot1", "slot2"]);
    assert!(code.contains("const comp1 = app.createComponent(`Dialog`, true, true, false, false);"));
    assert!(code.contains("const catcher1 = createCatcher({\"close\":0});"));
    assert!(code.contains("const v1 = ctx['state'];"));
    assert!(code.contains("const hdlr2 = [()=>v1.open=false, ctx];"));
    // `t-set-slot` can not alter the context, but the source scan is textual.
    assert!(code.contains("const ctx1 = capture(ctx);"));
    assert!(code.contains(concat!(
        "return catcher1(comp1({title: ctx['state'].title,slots: markRaw({",
        "'footer': {__render: slot1, __ctx: ctx1}, 'default': {__render: slot2, __ctx: ctx1}})}, ",
        "key + `__1`, node, this, null), [hdlr2]);"
    )));
    assert_eq!(compiled.helpers, vec!["capture", "markRaw", "createCatcher"]);
}

#[test]
#[ntest::timeout(100)]
fn test_sub_templates() {
    let mut templates = TemplateSet::new();
    let added = templates
        .add_templates(concat!(
            "<templates>\n",
            "  <t t-name=\"page\"><main><t t-call=\"row\"><b>inner</b></t></main></t>\n",
            "  <div t-name=\"row\" class=\"row\"><t t-esc=\"0\"/></div>\n",
            "</templates>"
        ))
        .unwrap();
    assert_eq!(added, 2);

    let compiled = templates.compile_all(&CompileOptions::default()).unwrap();
    let page = &compiled[0];
    assert_eq!(page.name.as_deref(), Some("page"));
    assert!(page.code.contains("const callTemplate_1 = app.getTemplate(`row`);"));
    assert!(page.code.contains("ctx[zero] = b2;"));
    assert_eq!(page.helpers, vec!["isBoundary", "zero"]);

    let row = &compiled[1];
    assert_eq!(row.blocks[0].markup, "<div class=\"row\"><block-text-0/></div>");
    assert!(row.code.contains("let txt1 = ctx[zero];"));
}

#[test]
#[ntest::timeout(100)]
fn test_translation_hook() {
    let options = CompileOptions::new()
        .with_translate_fn(|text| format!("[{text}]"))
        .with_translatable_attributes(["aria-label", "-alt"]);
    let source = "<div aria-label=\"Close\" alt=\"x\">\n  Hello world\n<span t-translation=\"off\">raw</span></div>";
    let compiled = compile(source, &options).unwrap();
    assert_eq!(
        compiled.blocks[0].markup,
        "<div aria-label=\"[Close]\" alt=\"x\"> [Hello world] <span>raw</span></div>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_parse_is_public() {
    let ast = parse("<t t-esc=\"a\"/>").unwrap();
    assert!(matches!(ast, Ast::Escape(_)));
    assert_eq!(parse("").unwrap(), Ast::Text(String::new()));
}

#[test]
#[ntest::timeout(100)]
fn test_function_source() {
    let options = CompileOptions::new().with_name("web.Counter");
    let compiled = compile("<span t-esc=\"props.value\"/>", &options).unwrap();
    let source = compiled.function_source();
    assert!(source.starts_with("function web_Counter(app, bdom, helpers\n) {\n"));
    assert!(source.contains("// Template name: \"web.Counter\""));
    assert!(source.ends_with("return block1([txt1]);\n  }\n}"));
}

#[test]
#[ntest::timeout(100)]
fn test_add_templates_is_atomic() {
    let mut templates = TemplateSet::new();
    templates.add_template("base", "<div/>").unwrap();

    let broken = "<templates><div t-name=\"a\">ok</div><div t-name=\"b\" t-foo=\"1\"/></templates>";
    let err = templates.add_templates(broken).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownDirective {
            directive: "t-foo".to_string()
        }
    );
    assert_eq!(templates.names(), vec!["base"]);

    // The corrected document registers cleanly.
    let fixed = "<templates><div t-name=\"a\">ok</div><div t-name=\"b\" t-esc=\"1\"/></templates>";
    assert_eq!(templates.add_templates(fixed).unwrap(), 2);
    assert_eq!(templates.names(), vec!["a", "b", "base"]);

    // A name clash with the registry rejects the whole document.
    let clash = "<templates><p t-name=\"c\"/><p t-name=\"base\"/></templates>";
    assert!(matches!(
        templates.add_templates(clash),
        Err(CompileError::TemplateExists { .. })
    ));
    assert!(!templates.contains("c"));
}
