use jsmutator::operators::{self, Exclusions, Operator, REGISTRY};
use jsmutator::parser_js::{self, JsDialect};
use tree_sitter::Node;

fn find_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(|child| find_kind(child, kind))
}

fn select_for(source: &str, kind: &str) -> Option<Operator> {
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let node = find_kind(tree.root_node(), kind).unwrap_or_else(|| panic!("no {kind} node in {source:?}"));
    operators::select_operator(node, source)
}

// --- Replacement tables ---

#[test]
fn comparison_lt_produces_boundary_and_negate() {
    assert_eq!(operators::comparison_replacements("<"), &["<=", ">="]);
}

#[test]
fn comparison_lte_produces_boundary_and_negate() {
    assert_eq!(operators::comparison_replacements("<="), &["<", ">"]);
}

#[test]
fn comparison_gt_produces_boundary_and_negate() {
    assert_eq!(operators::comparison_replacements(">"), &[">=", "<="]);
}

#[test]
fn comparison_gte_produces_boundary_and_negate() {
    assert_eq!(operators::comparison_replacements(">="), &[">", "<"]);
}

#[test]
fn equality_is_negated() {
    assert_eq!(operators::comparison_replacements("=="), &["!="]);
    assert_eq!(operators::comparison_replacements("!="), &["=="]);
    assert_eq!(operators::comparison_replacements("==="), &["!=="]);
    assert_eq!(operators::comparison_replacements("!=="), &["==="]);
}

#[test]
fn non_comparison_operator_has_no_replacements() {
    assert!(operators::comparison_replacements("+").is_empty());
    assert!(operators::comparison_replacements("instanceof").is_empty());
}

#[test]
fn arithmetic_operators_swap() {
    assert_eq!(operators::arithmetic_replacements("+"), &["-"]);
    assert_eq!(operators::arithmetic_replacements("-"), &["+"]);
    assert_eq!(operators::arithmetic_replacements("*"), &["/"]);
    assert_eq!(operators::arithmetic_replacements("/"), &["*"]);
    assert_eq!(operators::arithmetic_replacements("%"), &["*"]);
    assert_eq!(operators::arithmetic_replacements("**"), &["*"]);
    assert!(operators::arithmetic_replacements("<<").is_empty());
}

#[test]
fn logical_operators_swap() {
    assert_eq!(operators::logical_replacements("&&"), &["||"]);
    assert_eq!(operators::logical_replacements("||"), &["&&"]);
    assert_eq!(operators::logical_replacements("??"), &["||"]);
}

#[test]
fn increment_integer() {
    assert_eq!(operators::increment_number("42").as_deref(), Some("43"));
    assert_eq!(operators::increment_number("0").as_deref(), Some("1"));
    assert_eq!(operators::increment_number("1_000").as_deref(), Some("1001"));
}

#[test]
fn increment_float() {
    assert_eq!(operators::increment_number("1.5").as_deref(), Some("2.5"));
}

#[test]
fn increment_skips_hex_and_bigint() {
    assert_eq!(operators::increment_number("0xff"), None);
    assert_eq!(operators::increment_number("10n"), None);
}

// --- Registry ---

#[test]
fn registry_codes_are_unique_and_round_trip() {
    let mut codes: Vec<&str> = REGISTRY.iter().map(|op| op.code()).collect();
    for code in &codes {
        assert_eq!(Operator::from_code(code).map(|op| op.code()), Some(*code));
    }
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), REGISTRY.len(), "duplicate operator code in registry");
}

#[test]
fn base_is_not_registered() {
    assert!(!REGISTRY.contains(&Operator::Base));
    assert_eq!(Operator::from_code("BASE"), Some(Operator::Base));
    assert_eq!(Operator::from_code("NOPE"), None);
}

#[test]
fn only_update_expressions_are_excluded_by_default() {
    let defaults = operators::default_excludes();
    assert_eq!(defaults.len(), 1);
    assert!(defaults.contains("UPDATE_EXPRESSION"));
    assert!(!defaults.contains("STRING_LITERAL"));
}

#[test]
fn exclusions_combine_defaults_excludes_and_includes() {
    let exclude = vec!["MATH".to_string()];
    let include = vec!["UPDATE_EXPRESSION".to_string()];

    let defaults = Exclusions::default();
    assert!(defaults.contains("UPDATE_EXPRESSION"));
    assert!(!defaults.contains("STRING_LITERAL"));

    let custom = Exclusions::new(&exclude, &include);
    assert!(custom.contains("MATH"));
    assert!(!custom.contains("UPDATE_EXPRESSION"));
    assert_eq!(custom.codes().collect::<Vec<_>>(), vec!["MATH"]);
}

// --- Selection ---

#[test]
fn selects_block_statement_for_program() {
    let source = "x = 1;";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    assert_eq!(
        operators::select_operator(tree.root_node(), source),
        Some(Operator::BlockStatement)
    );
}

#[test]
fn selects_operator_by_binary_operator_text() {
    assert_eq!(select_for("a < b;", "binary_expression"), Some(Operator::ComparisonOperator));
    assert_eq!(select_for("a * b;", "binary_expression"), Some(Operator::ArithmeticOperator));
    assert_eq!(select_for("a && b;", "binary_expression"), Some(Operator::LogicalOperator));
}

#[test]
fn bitwise_operator_selects_nothing() {
    assert_eq!(select_for("a << b;", "binary_expression"), None);
}

#[test]
fn selects_literal_operators() {
    assert_eq!(select_for("x = 42;", "number"), Some(Operator::Literal));
    assert_eq!(select_for("x = true;", "true"), Some(Operator::Literal));
    assert_eq!(select_for("x = 'hi';", "string"), Some(Operator::StringLiteral));
}

#[test]
fn directive_is_not_a_string_literal() {
    assert_eq!(select_for("'use strict';", "string"), None);
}

#[test]
fn selects_collection_and_call_operators() {
    assert_eq!(select_for("x = {a: 1};", "object"), Some(Operator::ObjectLiteral));
    assert_eq!(select_for("x = [1];", "array"), Some(Operator::ArrayLiteral));
    assert_eq!(select_for("f(1);", "call_expression"), Some(Operator::MethodCall));
}

#[test]
fn selects_unary_and_update_operators() {
    assert_eq!(select_for("x = !y;", "unary_expression"), Some(Operator::UnaryOperator));
    assert_eq!(select_for("i++;", "update_expression"), Some(Operator::UpdateOperator));
    assert_eq!(select_for("typeof y;", "unary_expression"), None);
}

// --- Inert nodes ---

#[test]
fn console_calls_and_comments_are_inert() {
    let source = "console.log(a + b); // note\n";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let root = tree.root_node();
    let statement = find_kind(root, "expression_statement").unwrap();
    let comment = find_kind(root, "comment").unwrap();
    assert!(operators::is_inert(statement, source));
    assert!(operators::is_inert(comment, source));
}

#[test]
fn ordinary_statement_is_not_inert() {
    let source = "total(a + b);";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let statement = find_kind(tree.root_node(), "expression_statement").unwrap();
    assert!(!operators::is_inert(statement, source));
}

#[test]
fn type_annotations_are_inert() {
    let source = "let n: number = 1;";
    let tree = parser_js::parse(source, JsDialect::TypeScript).unwrap();
    let annotation = find_kind(tree.root_node(), "type_annotation").unwrap();
    assert!(operators::is_inert(annotation, source));
}

// --- Expansion ---

#[test]
fn unary_expansion_drops_operator_and_descends() {
    let source = "x = !ready;";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let node = find_kind(tree.root_node(), "unary_expression").unwrap();
    let exp = Operator::UnaryOperator.expand(node, source);
    assert_eq!(exp.edits.len(), 1);
    assert_eq!(exp.edits[0].replacement, "ready");
    assert_eq!(exp.descents.len(), 1);
    assert!(exp.descents[0].within.is_none());
}

#[test]
fn base_expansion_descends_into_every_named_child() {
    let source = "if (a) { b(); } else { c(); }";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let node = find_kind(tree.root_node(), "if_statement").unwrap();
    let exp = Operator::Base.expand(node, source);
    assert!(exp.edits.is_empty());
    assert_eq!(exp.descents.len(), node.named_child_count());
}

#[test]
fn repeated_call_replacement_is_recorded_once() {
    let source = "f(a, a);";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let node = find_kind(tree.root_node(), "call_expression").unwrap();
    let exp = Operator::MethodCall.expand(node, source);
    let replacements: Vec<&str> = exp.edits.iter().map(|e| e.replacement.as_str()).collect();
    assert_eq!(replacements, vec!["\"MUTATION!\"", "\"MUTATION!\"", "a"]);
}

#[test]
fn literal_call_arguments_are_replaced_without_descending() {
    let source = "persons.pluck('name');";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let node = find_kind(tree.root_node(), "call_expression").unwrap();
    let exp = Operator::MethodCall.expand(node, source);
    let replacements: Vec<&str> = exp.edits.iter().map(|e| e.replacement.as_str()).collect();
    assert_eq!(replacements, vec!["\"MUTATION!\"", "persons"]);
    assert!(exp.descents.iter().all(|d| d.node.kind() != "string"));
}

#[test]
fn string_already_mutated_is_left_alone() {
    let source = "x = \"MUTATION!\";";
    let tree = parser_js::parse(source, JsDialect::JavaScript).unwrap();
    let node = find_kind(tree.root_node(), "string").unwrap();
    let exp = Operator::StringLiteral.expand(node, source);
    assert!(exp.edits.is_empty());
}
