use jsmutator::parser_js::{self, JsDialect, ParseError};

#[test]
fn parses_each_dialect() {
    assert!(parser_js::parse("var a = 1;", JsDialect::JavaScript).is_ok());
    assert!(parser_js::parse("let a: number = 1;", JsDialect::TypeScript).is_ok());
    assert!(parser_js::parse("const el = <div>{a}</div>;", JsDialect::Tsx).is_ok());
}

#[test]
fn type_annotations_are_rejected_as_javascript() {
    let result = parser_js::parse("let a: number = 1;", JsDialect::JavaScript);
    assert!(matches!(result, Err(ParseError::Syntax { .. })), "got {result:?}");
}

#[test]
fn syntax_error_reports_one_based_position() {
    let source = "function ok() {}\nvar x = ;\n";
    match parser_js::parse(source, JsDialect::JavaScript) {
        Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn empty_source_parses() {
    let tree = parser_js::parse("", JsDialect::JavaScript).unwrap();
    assert_eq!(tree.root_node().kind(), "program");
}

#[test]
fn node_text_slices_source() {
    let source = "var answer = 42;";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let statement = tree.root_node().named_child(0).unwrap();
    assert_eq!(parser_js::node_text(statement, source), source);
}

#[test]
fn named_children_include_comments() {
    let source = "// header\nvar a = 1;\n";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let kinds: Vec<_> = parser_js::named_children(tree.root_node()).iter().map(|n| n.kind()).collect();
    assert_eq!(kinds, vec!["comment", "variable_declaration"]);
}

#[test]
fn context_lines_around_target() {
    let lines = vec!["a", "b", "c", "d", "e"];
    let (before, after) = parser_js::get_context(&lines, 2, 1);
    assert_eq!(before, vec!["b"]);
    assert_eq!(after, vec!["d"]);
}

#[test]
fn context_is_clamped_at_edges() {
    let lines = vec!["only"];
    let (before, after) = parser_js::get_context(&lines, 0, 3);
    assert!(before.is_empty());
    assert!(after.is_empty());
}
