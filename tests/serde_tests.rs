#[cfg(feature = "serde")]
mod serde_tests {
    use qwebc::{
        Ast, CompileError, CompileOptions, CompiledTemplate, MarkupError, Template,
        TemplateCompiler, TemplateSet, compile, parse,
    };
    use serde_json;

    #[test]
    #[ntest::timeout(100)]
    fn test_ast_serialization() {
        let ast = Ast::Text("hello".to_string());
        let serialized = serde_json::to_string(&ast).unwrap();
        assert_eq!(serialized, r#"{"Text":"hello"}"#);

        let ast = parse(concat!(
            "<ul class=\"list\">",
            "<li t-foreach=\"items\" t-as=\"item\" t-key=\"item.id\" t-on-click.stop=\"select\">",
            "<t t-if=\"item.done\">done</t><t t-else=\"\" t-esc=\"item.label\"/>",
            "</li></ul>"
        ))
        .unwrap();
        let serialized = serde_json::to_string(&ast).unwrap();
        let deserialized: Ast = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, ast);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attribute_order_survives_serialization() {
        let ast = parse("<div id=\"a\" class=\"b\" title=\"c\" data-x=\"d\"/>").unwrap();
        let serialized = serde_json::to_string(&ast).unwrap();
        let id = serialized.find("\"id\"").unwrap();
        let class = serialized.find("\"class\"").unwrap();
        let data = serialized.find("\"data-x\"").unwrap();
        assert!(id < class && class < data);

        let deserialized: Ast = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, ast);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_serialization() {
        let template = Template::new("<p t-esc=\"state.text\"/>");

        let serialized = serde_json::to_string(&template).unwrap();
        assert_eq!(serialized, r#"{"source":"<p t-esc=\"state.text\"/>"}"#);

        let deserialized: Template = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.source(), template.source());
        // A deserialized template is a new template.
        assert!(!deserialized.ptr_eq(&template));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compiled_template_serialization() {
        let source = "<div><t t-foreach=\"rows\" t-as=\"row\" t-key=\"row_index\"><Row row=\"row\"/></t></div>";
        let compiled = compile(source, &CompileOptions::new().with_name("table")).unwrap();

        let serialized = serde_json::to_string(&compiled).unwrap();
        let deserialized: CompiledTemplate = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, compiled);
        assert_eq!(deserialized.function_source(), compiled.function_source());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_options_serialization() {
        let options = CompileOptions::new()
            .with_name("main")
            .with_dev(true)
            .with_translate_fn(|text| text.to_uppercase())
            .with_translatable_attributes(["-alt"]);

        let serialized = serde_json::to_string(&options).unwrap();
        assert!(!serialized.contains("translate_fn"));

        let deserialized: CompileOptions = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.name.as_deref(), Some("main"));
        assert!(deserialized.dev);
        // The translation function does not survive serialization.
        assert!(deserialized.translate_fn.is_none());
        assert_eq!(
            deserialized.translatable_attributes(),
            options.translatable_attributes()
        );

        // Both option sets produce the same code for untranslated templates.
        let mut templates = TemplateSet::new();
        templates.add_template("main", "<p t-esc=\"a\"/>").unwrap();
        assert_eq!(
            templates.compile("main", &options).unwrap(),
            templates.compile("main", &deserialized).unwrap()
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_serialization() {
        let err = CompileError::OrphanBranch;
        let serialized = serde_json::to_string(&err).unwrap();
        assert_eq!(serialized, r#""OrphanBranch""#);

        let err = compile("<div>\n  <p></div>", &CompileOptions::default()).unwrap_err();
        let serialized = serde_json::to_string(&err).unwrap();
        let deserialized: CompileError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, err);
        assert_eq!(deserialized.to_string(), err.to_string());

        let markup = MarkupError {
            line: 2,
            column: 5,
            message: "unexpected end tag".to_string(),
        };
        let serialized = serde_json::to_string(&markup).unwrap();
        assert_eq!(
            serialized,
            r#"{"line":2,"column":5,"message":"unexpected end tag"}"#
        );
    }
}
