pub mod config;
pub mod copy_tree;
pub mod engine;
pub mod mutants;
pub mod operators;
pub mod output;
pub mod parser_js;
pub mod pool;
pub mod process;
pub mod runner;
pub mod safety;
pub mod state;

use parser_js::JsDialect;

/// Grammar for a source file, by extension. `.jsx` is parsed with the TSX grammar.
pub fn detect_language(path: &std::path::Path) -> Option<JsDialect> {
    match path.extension()?.to_str()? {
        "js" | "mjs" | "cjs" => Some(JsDialect::JavaScript),
        "ts" | "mts" | "cts" => Some(JsDialect::TypeScript),
        "tsx" | "jsx" => Some(JsDialect::Tsx),
        _ => None,
    }
}
