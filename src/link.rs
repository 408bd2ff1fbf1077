// link.rs — turn assembled program text into plain WGSL.
//
// WGSL itself has neither imports nor a preprocessor, so both are resolved
// here before naga ever sees the source:
//
//   1. Directives. `#define NAME` adds a flag; `#ifdef NAME` / `#ifndef NAME`
//      / `#else` / `#endif` keep or drop the lines between them. Flags defined
//      at the top of the program are visible inside every imported module,
//      which is how a `ConditionSet` reaches the library's branches.
//
//   2. Imports. `import a::b::module::item;` pulls in library module
//      `a::b::module` (once, however many times it is imported) and is removed
//      from the output. Modules may import other modules. Whether `item`
//      actually exists in the module is left to naga.
//
//   3. Results alias. `test::results` in the kernel itself is rewritten to
//      the plain binding name. Library modules are left untouched.
//
// Directives are processed before imports are collected, so an import inside
// a disabled `#ifdef` block is never followed.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::trace;

use crate::assemble::{QUALIFIED_RESULTS_NAME, RESULTS_NAME};
use crate::error::CompileError;
use crate::library::ShaderLibrary;

/// Label used for the root program in diagnostics.
pub const ROOT_UNIT: &str = "<kernel>";

/// Output of [`link`]: plain WGSL plus what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedSource {
    /// WGSL with every directive and import resolved.
    pub source: String,
    /// Library modules included, in inclusion order.
    pub modules: Vec<String>,
    /// Flags that were defined while linking.
    pub defines: BTreeSet<String>,
}

/// Resolve directives and imports of `program` against `library`.
pub fn link(program: &str, library: &ShaderLibrary) -> Result<LinkedSource, CompileError> {
    let mut pre = Preprocessor::default();
    let root = pre.process(program)?;
    let (root_body, root_imports) = split_imports(&root, ROOT_UNIT)?;

    let mut pending: VecDeque<(String, String)> = root_imports
        .into_iter()
        .map(|m| (m, ROOT_UNIT.to_string()))
        .collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut modules = Vec::new();
    let mut module_text = String::new();

    while let Some((module, imported_by)) = pending.pop_front() {
        if !seen.insert(module.clone()) {
            continue;
        }
        let src = library.get(&module).ok_or_else(|| CompileError::UnresolvedImport {
            module: module.clone(),
            imported_by: imported_by.clone(),
        })?;
        let processed = pre.process(src)?;
        let (body, imports) = split_imports(&processed, &module)?;
        for dep in imports {
            pending.push_back((dep, module.clone()));
        }

        module_text.push_str(&format!("// ---- module {module} ----\n"));
        module_text.push_str(body.trim());
        module_text.push_str("\n\n");
        modules.push(module);
    }

    let mut source = module_text;
    source.push_str(&format!("// ---- {ROOT_UNIT} ----\n"));
    source.push_str(&rewrite_results_alias(root_body.trim()));
    source.push('\n');

    trace!(modules = ?modules, "linked WGSL:\n{source}");

    Ok(LinkedSource {
        source,
        modules,
        defines: pre.defines,
    })
}

/// Line-based `#define` / `#ifdef` evaluator.
///
/// The define set persists across calls, so flags from the root program are
/// seen by every module processed afterwards.
#[derive(Debug, Default)]
pub struct Preprocessor {
    pub defines: BTreeSet<String>,
}

/// One open `#ifdef` / `#ifndef` block.
#[derive(Debug, Clone, Copy)]
struct Block {
    /// Whether the enclosing context is emitting lines.
    parent_active: bool,
    /// Whether the current branch condition holds.
    taken: bool,
    /// `#else` already seen.
    in_else: bool,
    /// Line the block opened on (for unterminated-block errors).
    opened_at: usize,
}

impl Block {
    fn active(&self) -> bool {
        self.parent_active && self.taken
    }
}

impl Preprocessor {
    pub fn with_defines<I, S>(defines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Preprocessor {
            defines: defines.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate directives in `text`; directive lines and dropped lines are
    /// replaced by empty lines so line numbers stay stable.
    pub fn process(&mut self, text: &str) -> Result<String, CompileError> {
        let mut stack: Vec<Block> = Vec::new();
        let mut out = String::with_capacity(text.len());

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let active = stack.last().map_or(true, Block::active);
            let trimmed = line.trim_start();

            let Some(directive) = trimmed.strip_prefix('#') else {
                if active {
                    out.push_str(line);
                }
                out.push('\n');
                continue;
            };

            let mut parts = directive.split_whitespace();
            let keyword = parts.next().unwrap_or("");
            let arg = parts.next();
            if let Some(extra) = parts.next() {
                return Err(preprocess_error(line_no, format!("unexpected `{extra}` after #{keyword}")));
            }

            match (keyword, arg) {
                ("define", Some(name)) => {
                    if active {
                        self.defines.insert(name.to_string());
                    }
                }
                ("undef", Some(name)) => {
                    if active {
                        self.defines.remove(name);
                    }
                }
                ("ifdef", Some(name)) | ("ifndef", Some(name)) => {
                    let defined = self.defines.contains(name);
                    stack.push(Block {
                        parent_active: active,
                        taken: if keyword == "ifdef" { defined } else { !defined },
                        in_else: false,
                        opened_at: line_no,
                    });
                }
                ("else", None) => {
                    let block = stack
                        .last_mut()
                        .ok_or_else(|| preprocess_error(line_no, "#else without #ifdef".into()))?;
                    if block.in_else {
                        return Err(preprocess_error(line_no, "duplicate #else".into()));
                    }
                    block.in_else = true;
                    block.taken = !block.taken;
                }
                ("endif", None) => {
                    stack
                        .pop()
                        .ok_or_else(|| preprocess_error(line_no, "#endif without #ifdef".into()))?;
                }
                ("define" | "undef" | "ifdef" | "ifndef", None) => {
                    return Err(preprocess_error(line_no, format!("#{keyword} needs a name")));
                }
                ("else" | "endif", Some(a)) => {
                    return Err(preprocess_error(line_no, format!("unexpected `{a}` after #{keyword}")));
                }
                _ => {
                    return Err(preprocess_error(line_no, format!("unknown directive `#{keyword}`")));
                }
            }
            out.push('\n');
        }

        if let Some(open) = stack.last() {
            return Err(preprocess_error(open.opened_at, "unterminated #ifdef".into()));
        }
        Ok(out)
    }
}

fn preprocess_error(line: usize, message: String) -> CompileError {
    CompileError::Preprocess { line, message }
}

/// Replace `test::results` with the binding name wherever it stands as a
/// whole path, not as the tail of a longer one (`latest::results`,
/// `a::test::results`) or the head of a longer name.
fn rewrite_results_alias(text: &str) -> String {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(QUALIFIED_RESULTS_NAME) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + QUALIFIED_RESULTS_NAME.len()..];

        let starts_token = out.chars().next_back().map_or(true, |c| !is_ident(c) && c != ':');
        let ends_token = rest.chars().next().map_or(true, |c| !is_ident(c));
        if starts_token && ends_token {
            out.push_str(RESULTS_NAME);
        } else {
            out.push_str(QUALIFIED_RESULTS_NAME);
        }
    }
    out.push_str(rest);
    out
}

/// Remove `import ...;` statements, returning the remaining text and the
/// module path of each import (everything before the final `::item`).
///
/// Anything after the `;` stays in place on its line.
fn split_imports(text: &str, unit: &str) -> Result<(String, Vec<String>), CompileError> {
    let mut body = String::with_capacity(text.len());
    let mut imports = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let Some(rest) = line.trim_start().strip_prefix("import ") else {
            body.push_str(line);
            body.push('\n');
            continue;
        };
        let Some((path, tail)) = rest.split_once(';') else {
            return Err(preprocess_error(idx + 1, "import is missing its closing `;`".into()));
        };
        let path = path.trim();
        if !path.chars().all(|c| c.is_alphanumeric() || c == '_' || c == ':') {
            return Err(preprocess_error(idx + 1, format!("malformed import path `{path}`")));
        }
        let module = match path.rsplit_once("::") {
            Some((module, _item)) if !module.is_empty() => module,
            _ => {
                return Err(CompileError::UnresolvedImport {
                    module: path.to_string(),
                    imported_by: unit.to_string(),
                })
            }
        };
        if !imports.iter().any(|m| m == module) {
            imports.push(module.to_string());
        }
        body.push_str(tail);
        body.push('\n');
    }
    Ok((body, imports))
}
