/// Mutation operators for JavaScript / TypeScript syntax trees.
/// Each operator recognizes a node shape and proposes byte-range edits.
use std::collections::BTreeSet;

use tree_sitter::{Node, Point};

use crate::parser_js::{named_children, node_text};

pub const MUTATION_STRING: &str = "\"MUTATION!\"";

/// Calls that are logging noise, never business logic.
const CONSOLE_CALLS: &[&str] = &[
    "console.log",
    "console.warn",
    "console.error",
    "console.info",
    "console.debug",
    "console.trace",
];

/// Type-level syntax has no runtime behaviour to mutate.
const TYPE_LEVEL_KINDS: &[&str] = &[
    "type_annotation",
    "type_alias_declaration",
    "interface_declaration",
    "type_arguments",
    "type_parameters",
    "ambient_declaration",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    BlockStatement,
    ObjectLiteral,
    ArrayLiteral,
    MethodCall,
    ComparisonOperator,
    ArithmeticOperator,
    LogicalOperator,
    UnaryOperator,
    UpdateOperator,
    Literal,
    StringLiteral,
    /// Produces nothing and descends into every named child.
    Base,
}

/// Registered operators in priority order. `Base` is the fallback and is not listed.
pub const REGISTRY: [Operator; 11] = [
    Operator::BlockStatement,
    Operator::ObjectLiteral,
    Operator::ArrayLiteral,
    Operator::MethodCall,
    Operator::ComparisonOperator,
    Operator::ArithmeticOperator,
    Operator::LogicalOperator,
    Operator::UnaryOperator,
    Operator::UpdateOperator,
    Operator::Literal,
    Operator::StringLiteral,
];

/// A single proposed replacement, in byte offsets of the original source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEdit {
    pub start_byte: usize,
    pub end_byte: usize,
    pub position: Point,
    pub replacement: String,
}

/// A subtree to scan next. `within` names the edit (by index) whose replaced
/// range contains the subtree; `None` keeps the caller's parent mutation.
#[derive(Debug, Clone, Copy)]
pub struct Descent<'t> {
    pub node: Node<'t>,
    pub within: Option<usize>,
}

#[derive(Debug, Default)]
pub struct Expansion<'t> {
    pub edits: Vec<RawEdit>,
    pub descents: Vec<Descent<'t>>,
}

impl<'t> Expansion<'t> {
    /// Record an edit unless it would leave the source unchanged or repeats an
    /// earlier edit of this expansion. Returns the edit's index.
    fn edit(
        &mut self,
        start_byte: usize,
        end_byte: usize,
        position: Point,
        replacement: &str,
        source: &str,
    ) -> Option<usize> {
        if &source[start_byte..end_byte] == replacement {
            return None;
        }
        if let Some(existing) = self.edits.iter().position(|e| {
            e.start_byte == start_byte && e.end_byte == end_byte && e.replacement == replacement
        }) {
            return Some(existing);
        }
        self.edits.push(RawEdit {
            start_byte,
            end_byte,
            position,
            replacement: replacement.to_string(),
        });
        Some(self.edits.len() - 1)
    }

    fn replace_node(&mut self, node: Node<'t>, replacement: &str, source: &str) -> Option<usize> {
        self.edit(node.start_byte(), node.end_byte(), node.start_position(), replacement, source)
    }

    fn descend(&mut self, node: Node<'t>, within: Option<usize>) {
        self.descents.push(Descent { node, within });
    }
}

impl Operator {
    pub fn code(self) -> &'static str {
        match self {
            Operator::BlockStatement => "BLOCK_STATEMENT",
            Operator::ObjectLiteral => "OBJECT",
            Operator::ArrayLiteral => "ARRAY",
            Operator::MethodCall => "METHOD_CALL",
            Operator::ComparisonOperator => "COMPARISON",
            Operator::ArithmeticOperator => "MATH",
            Operator::LogicalOperator => "LOGICAL_EXPRESSION",
            Operator::UnaryOperator => "UNARY_EXPRESSION",
            Operator::UpdateOperator => "UPDATE_EXPRESSION",
            Operator::Literal => "LITERAL",
            Operator::StringLiteral => "STRING_LITERAL",
            Operator::Base => "BASE",
        }
    }

    pub fn from_code(code: &str) -> Option<Operator> {
        REGISTRY
            .iter()
            .copied()
            .chain(std::iter::once(Operator::Base))
            .find(|op| op.code() == code)
    }

    pub fn description(self) -> &'static str {
        match self {
            Operator::BlockStatement => "remove each statement of a block",
            Operator::ObjectLiteral => "remove each property of an object literal",
            Operator::ArrayLiteral => "remove each element of an array literal",
            Operator::MethodCall => "replace call arguments, or the call with its receiver or an argument",
            Operator::ComparisonOperator => "shift comparison boundaries and negate equality",
            Operator::ArithmeticOperator => "swap arithmetic operators",
            Operator::LogicalOperator => "swap && and ||",
            Operator::UnaryOperator => "drop a unary operator",
            Operator::UpdateOperator => "swap ++ and --",
            Operator::Literal => "increment numbers, flip booleans",
            Operator::StringLiteral => "replace string literals",
            Operator::Base => "no mutation",
        }
    }

    // Flipping a loop counter mostly yields a loop that never ends.
    pub fn excluded_by_default(self) -> bool {
        matches!(self, Operator::UpdateOperator)
    }

    pub fn matches(self, node: Node, source: &str) -> bool {
        match self {
            Operator::BlockStatement => matches!(node.kind(), "program" | "statement_block"),
            Operator::ObjectLiteral => node.kind() == "object",
            Operator::ArrayLiteral => node.kind() == "array",
            Operator::MethodCall => node.kind() == "call_expression",
            Operator::ComparisonOperator => {
                binary_operator(node, source).is_some_and(|op| !comparison_replacements(op).is_empty())
            }
            Operator::ArithmeticOperator => {
                binary_operator(node, source).is_some_and(|op| !arithmetic_replacements(op).is_empty())
            }
            Operator::LogicalOperator => {
                binary_operator(node, source).is_some_and(|op| !logical_replacements(op).is_empty())
            }
            Operator::UnaryOperator => {
                node.kind() == "unary_expression"
                    && node
                        .child_by_field_name("operator")
                        .is_some_and(|op| matches!(node_text(op, source), "!" | "-" | "+" | "~"))
            }
            Operator::UpdateOperator => node.kind() == "update_expression",
            Operator::Literal => matches!(node.kind(), "number" | "true" | "false"),
            Operator::StringLiteral => node.kind() == "string" && !is_directive(node),
            Operator::Base => true,
        }
    }

    pub fn expand<'t>(self, node: Node<'t>, source: &str) -> Expansion<'t> {
        let mut exp = Expansion::default();
        match self {
            Operator::BlockStatement => expand_block(node, source, &mut exp),
            Operator::ObjectLiteral => expand_object(node, source, &mut exp),
            Operator::ArrayLiteral => expand_array(node, source, &mut exp),
            Operator::MethodCall => expand_call(node, source, &mut exp),
            Operator::ComparisonOperator => {
                expand_binary(node, source, comparison_replacements, &mut exp)
            }
            Operator::ArithmeticOperator => {
                if !is_string_concatenation(node, source) {
                    expand_binary(node, source, arithmetic_replacements, &mut exp);
                } else {
                    descend_operands(node, &mut exp);
                }
            }
            Operator::LogicalOperator => expand_binary(node, source, logical_replacements, &mut exp),
            Operator::UnaryOperator => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    exp.replace_node(node, node_text(argument, source), source);
                    exp.descend(argument, None);
                }
            }
            Operator::UpdateOperator => {
                if let Some(op) = node.child_by_field_name("operator") {
                    let replacement = match node_text(op, source) {
                        "++" => Some("--"),
                        "--" => Some("++"),
                        _ => None,
                    };
                    if let Some(replacement) = replacement {
                        exp.replace_node(op, replacement, source);
                    }
                }
            }
            Operator::Literal => {
                let replacement = match node.kind() {
                    "true" => Some("false".to_string()),
                    "false" => Some("true".to_string()),
                    _ => increment_number(node_text(node, source)),
                };
                if let Some(replacement) = replacement {
                    exp.replace_node(node, &replacement, source);
                }
            }
            Operator::StringLiteral => {
                if !is_mutation_string(node, source) {
                    exp.replace_node(node, MUTATION_STRING, source);
                }
            }
            Operator::Base => {
                for child in named_children(node) {
                    exp.descend(child, None);
                }
            }
        }
        exp
    }
}

/// First registered operator whose shape matches `node`.
pub fn select_operator(node: Node, source: &str) -> Option<Operator> {
    REGISTRY.iter().copied().find(|op| op.matches(node, source))
}

pub fn default_excludes() -> BTreeSet<&'static str> {
    REGISTRY
        .iter()
        .filter(|op| op.excluded_by_default())
        .map(|op| op.code())
        .collect()
}

/// Operator codes switched off for a discovery pass: the default excludes
/// plus `exclude`, minus every code listed in `include`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusions {
    codes: BTreeSet<String>,
}

impl Exclusions {
    pub fn new<'a>(
        exclude: impl IntoIterator<Item = &'a String>,
        include: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        let mut codes: BTreeSet<String> = default_excludes().into_iter().map(String::from).collect();
        codes.extend(exclude.into_iter().cloned());
        for code in include {
            codes.remove(code);
        }
        Self { codes }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

impl Default for Exclusions {
    fn default() -> Self {
        Self::new(std::iter::empty(), std::iter::empty())
    }
}

/// Nodes that are neither mutated nor scanned for nested mutations.
pub fn is_inert(node: Node, source: &str) -> bool {
    match node.kind() {
        "comment" | "import_statement" | "empty_statement" | "debugger_statement"
        | "hash_bang_line" => true,
        "call_expression" => is_console_call(node, source),
        "expression_statement" => {
            let children = named_children(node);
            children.len() == 1
                && (is_directive(children[0]) || is_console_call(children[0], source))
        }
        kind => TYPE_LEVEL_KINDS.contains(&kind),
    }
}

pub fn comparison_replacements(op: &str) -> &'static [&'static str] {
    match op {
        "<" => &["<=", ">="],
        "<=" => &["<", ">"],
        ">" => &[">=", "<="],
        ">=" => &[">", "<"],
        "==" => &["!="],
        "!=" => &["=="],
        "===" => &["!=="],
        "!==" => &["==="],
        _ => &[],
    }
}

pub fn arithmetic_replacements(op: &str) -> &'static [&'static str] {
    match op {
        "+" => &["-"],
        "-" => &["+"],
        "*" => &["/"],
        "/" => &["*"],
        "%" => &["*"],
        "**" => &["*"],
        _ => &[],
    }
}

pub fn logical_replacements(op: &str) -> &'static [&'static str] {
    match op {
        "&&" => &["||"],
        "||" => &["&&"],
        "??" => &["||"],
        _ => &[],
    }
}

/// `42` -> `43`, `1.5` -> `2.5`. Hex, octal and bigint literals are left alone.
pub fn increment_number(text: &str) -> Option<String> {
    let digits = text.replace('_', "");
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return digits.parse::<u64>().ok()?.checked_add(1).map(|n| n.to_string());
    }
    if digits.starts_with("0x") || digits.starts_with("0o") || digits.starts_with("0b") {
        return None;
    }
    match digits.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(format!("{}", value + 1.0)),
        _ => None,
    }
}

fn expand_block<'t>(node: Node<'t>, source: &str, exp: &mut Expansion<'t>) {
    for statement in members(node) {
        if is_inert(statement, source) {
            continue;
        }
        let removal = exp.replace_node(statement, "", source);
        exp.descend(statement, removal);
    }
}

fn expand_object<'t>(node: Node<'t>, source: &str, exp: &mut Expansion<'t>) {
    let properties = members(node);
    for (i, property) in properties.iter().enumerate() {
        let removal = remove_member(&properties, i, source, exp);
        match property.kind() {
            "pair" => {
                if let Some(value) = property.child_by_field_name("value") {
                    exp.descend(value, removal);
                }
            }
            "shorthand_property_identifier" => {}
            _ => exp.descend(*property, removal),
        }
    }
}

fn expand_array<'t>(node: Node<'t>, source: &str, exp: &mut Expansion<'t>) {
    let elements = members(node);
    for (i, element) in elements.iter().enumerate() {
        let removal = remove_member(&elements, i, source, exp);
        exp.descend(*element, removal);
    }
}

/// A member followed by a sibling is removed up to that sibling's start, so
/// its separator goes with it.
fn remove_member<'t>(
    members: &[Node<'t>],
    i: usize,
    source: &str,
    exp: &mut Expansion<'t>,
) -> Option<usize> {
    let member = members[i];
    let end = members
        .get(i + 1)
        .map(|next| next.start_byte())
        .unwrap_or(member.end_byte());
    exp.edit(member.start_byte(), end, member.start_position(), "", source)
}

fn expand_call<'t>(node: Node<'t>, source: &str, exp: &mut Expansion<'t>) {
    let Some(callee) = node.child_by_field_name("function") else {
        return;
    };
    let arguments: Vec<Node<'t>> = node
        .child_by_field_name("arguments")
        .filter(|args| args.kind() == "arguments")
        .map(members)
        .unwrap_or_default();

    for argument in &arguments {
        if is_mutation_string(*argument, source) {
            continue;
        }
        let replaced = exp.replace_node(*argument, MUTATION_STRING, source);
        // A literal argument has nothing nested, and its own literal
        // mutation would repeat the replacement above.
        if !is_literal(*argument) {
            exp.descend(*argument, replaced);
        }
    }

    match callee.kind() {
        "member_expression" => {
            if let Some(object) = callee.child_by_field_name("object") {
                let replaced = exp.replace_node(node, node_text(object, source), source);
                exp.descend(object, replaced);
            }
        }
        // `super(x)` and `import(x)` cannot be replaced by their argument.
        "super" | "import" => {}
        _ => {
            for argument in arguments.iter().filter(|a| a.kind() != "spread_element") {
                exp.replace_node(node, node_text(*argument, source), source);
            }
            exp.descend(callee, None);
        }
    }
}

fn expand_binary<'t>(
    node: Node<'t>,
    source: &str,
    table: fn(&str) -> &'static [&'static str],
    exp: &mut Expansion<'t>,
) {
    if let Some(op) = node.child_by_field_name("operator") {
        for replacement in table(node_text(op, source)) {
            exp.replace_node(op, replacement, source);
        }
    }
    descend_operands(node, exp);
}

fn descend_operands<'t>(node: Node<'t>, exp: &mut Expansion<'t>) {
    for field in ["left", "right"] {
        if let Some(operand) = node.child_by_field_name(field) {
            exp.descend(operand, None);
        }
    }
}

fn binary_operator<'s>(node: Node, source: &'s str) -> Option<&'s str> {
    if node.kind() != "binary_expression" {
        return None;
    }
    node.child_by_field_name("operator")
        .map(|op| node_text(op, source))
}

fn is_string_concatenation(node: Node, source: &str) -> bool {
    binary_operator(node, source) == Some("+")
        && ["left", "right"].iter().any(|field| {
            node.child_by_field_name(field)
                .is_some_and(|operand| matches!(operand.kind(), "string" | "template_string"))
        })
}

fn is_literal(node: Node) -> bool {
    matches!(
        node.kind(),
        "string" | "template_string" | "number" | "true" | "false" | "null" | "undefined" | "regex"
    )
}

fn is_console_call(node: Node, source: &str) -> bool {
    node.kind() == "call_expression"
        && node
            .child_by_field_name("function")
            .is_some_and(|f| CONSOLE_CALLS.contains(&node_text(f, source)))
}

/// A string that is an expression statement on its own, like `'use strict'`.
fn is_directive(node: Node) -> bool {
    node.kind() == "string"
        && node
            .parent()
            .is_some_and(|p| p.kind() == "expression_statement")
}

fn string_content(text: &str) -> &str {
    if text.len() >= 2 { &text[1..text.len() - 1] } else { text }
}

fn is_mutation_string(node: Node, source: &str) -> bool {
    node.kind() == "string" && string_content(node_text(node, source)) == "MUTATION!"
}

/// Named children that carry code, comments excluded.
fn members(node: Node) -> Vec<Node> {
    named_children(node)
        .into_iter()
        .filter(|child| child.kind() != "comment")
        .collect()
}
