use tracing::debug;
use tree_sitter::Node;

use crate::mutants::{Mutation, MutationId};
use crate::operators::{self, Exclusions, Operator, RawEdit};
use crate::parser_js::{self, get_context, JsDialect, ParseError};

/// Discover every mutation in `source`, in document order with outer
/// mutations before the ones nested inside them.
///
/// A node whose operator is excluded is still scanned for nested mutations.
pub fn find_mutations(
    source: &str,
    excludes: &Exclusions,
    dialect: JsDialect,
) -> Result<Vec<Mutation>, ParseError> {
    let tree = parser_js::parse(source, dialect)?;
    let mut finder = MutationFinder::new(source, excludes);
    finder.walk(tree.root_node(), MutationId::ROOT);
    debug!(count = finder.mutations.len(), "mutation discovery finished");
    Ok(finder.mutations)
}

/// State of one discovery pass. Ids are allocated from a counter owned by the
/// pass, so concurrent passes over different sources never interfere.
struct MutationFinder<'s> {
    source: &'s str,
    lines: Vec<&'s str>,
    excludes: &'s Exclusions,
    next_id: u64,
    mutations: Vec<Mutation>,
}

impl<'s> MutationFinder<'s> {
    fn new(source: &'s str, excludes: &'s Exclusions) -> Self {
        Self {
            source,
            lines: source.lines().collect(),
            excludes,
            next_id: MutationId::ROOT.0 + 1,
            mutations: Vec::new(),
        }
    }

    fn select(&self, node: Node) -> Operator {
        match operators::select_operator(node, self.source) {
            Some(op) if self.excludes.contains(op.code()) => Operator::Base,
            Some(op) => op,
            None => Operator::Base,
        }
    }

    fn walk(&mut self, node: Node, parent: MutationId) {
        if operators::is_inert(node, self.source) {
            return;
        }

        let operator = self.select(node);
        let expansion = operator.expand(node, self.source);

        let ids: Vec<MutationId> = expansion
            .edits
            .into_iter()
            .map(|edit| self.emit(edit, parent, operator))
            .collect();

        for descent in expansion.descents {
            let parent = descent.within.map(|i| ids[i]).unwrap_or(parent);
            self.walk(descent.node, parent);
        }
    }

    fn emit(&mut self, edit: RawEdit, parent: MutationId, operator: Operator) -> MutationId {
        let id = MutationId(self.next_id);
        self.next_id += 1;

        let row = edit.position.row;
        let (context_before, context_after) = get_context(&self.lines, row, 2);
        self.mutations.push(Mutation {
            id,
            parent_id: parent,
            line: row + 1,
            column: edit.position.column + 1,
            start_byte: edit.start_byte,
            end_byte: edit.end_byte,
            operator: operator.code().to_string(),
            original: self.source[edit.start_byte..edit.end_byte].to_string(),
            replacement: edit.replacement,
            context_before,
            context_after,
        });
        id
    }
}
