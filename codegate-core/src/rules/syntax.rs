//! Tree-sitter parsing and lowering into [`Construct`]s.
//!
//! Rules never look at raw text. The parse tree is walked once in source
//! order and reduced to calls and imports, with local aliases resolved
//! (`import subprocess as sp`, `const { exec } = require("child_process")`)
//! so a rule written against `subprocess.run` also sees `sp.run(...)`.

use std::collections::HashMap;

use serde::Serialize;
use tree_sitter::{Node, Parser, Tree};

use crate::artifact::Language;
use crate::finding::Location;

/// A syntactic construct a rule can match against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Construct {
    Call { callee: String, location: Location },
    Import { module: String, location: Location },
}

impl Construct {
    pub fn location(&self) -> Location {
        match self {
            Self::Call { location, .. } | Self::Import { location, .. } => *location,
        }
    }
}

/// Why the source could not be turned into constructs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxFailure {
    pub message: String,
    pub location: Option<Location>,
}

pub fn parse(source: &str, language: Language) -> Result<Vec<Construct>, SyntaxFailure> {
    let tree = parse_tree(source, language)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(describe_error(root, source));
    }
    if let Some(failure) = reject_foreign_syntax(root, source, language) {
        return Err(failure);
    }

    let mut lowering = Lowering::new(source, language);
    walk(root, |node| lowering.visit(node));
    Ok(lowering.finish())
}

fn parse_tree(source: &str, language: Language) -> Result<Tree, SyntaxFailure> {
    let grammar: tree_sitter::Language = match language {
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
    };
    let mut parser = Parser::new();
    parser.set_language(&grammar).map_err(|err| SyntaxFailure {
        message: format!("failed to load {language} grammar: {err}"),
        location: None,
    })?;
    parser.parse(source, None).ok_or_else(|| SyntaxFailure {
        message: format!("{language} parser produced no tree"),
        location: None,
    })
}

/// Pre-order walk, which visits nodes in source order.
fn walk<'tree>(root: Node<'tree>, mut visit: impl FnMut(Node<'tree>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// 1-based line and character column. Tree-sitter columns count bytes.
fn location_of(node: Node<'_>, source: &str) -> Location {
    let point = node.start_position();
    let start = node.start_byte();
    let column = source
        .get(start.saturating_sub(point.column)..start)
        .map_or(point.column, |prefix| prefix.chars().count());
    Location::new(point.row + 1, column + 1)
}

/// Grammar extensions the real interpreters reject: Python 2 statements
/// in tree-sitter-python and JSX in tree-sitter-javascript.
fn foreign_construct(kind: &str, language: Language) -> Option<&'static str> {
    match (language, kind) {
        (Language::Python, "print_statement") => Some("Python 2 print statement"),
        (Language::Python, "exec_statement") => Some("Python 2 exec statement"),
        (Language::JavaScript, "jsx_element" | "jsx_self_closing_element") => {
            Some("JSX element")
        }
        (Language::JavaScript, "jsx_fragment") => Some("JSX fragment"),
        _ => None,
    }
}

fn reject_foreign_syntax(
    root: Node<'_>,
    source: &str,
    language: Language,
) -> Option<SyntaxFailure> {
    let mut failure = None;
    walk(root, |node| {
        if failure.is_none()
            && let Some(what) = foreign_construct(node.kind(), language)
        {
            let location = location_of(node, source);
            failure = Some(SyntaxFailure {
                message: format!("syntax error: {what} at {location}"),
                location: Some(location),
            });
        }
    });
    failure
}

fn describe_error(root: Node<'_>, source: &str) -> SyntaxFailure {
    let mut first = None;
    walk(root, |node| {
        if first.is_none() && (node.is_error() || node.is_missing()) {
            first = Some(node);
        }
    });

    let Some(node) = first else {
        return SyntaxFailure {
            message: "syntax error".to_string(),
            location: None,
        };
    };

    let location = location_of(node, source);
    let message = if node.is_missing() {
        format!("syntax error: missing `{}` at {location}", node.kind())
    } else {
        let snippet = text(node, source);
        let snippet = snippet.lines().next().unwrap_or_default().trim();
        if snippet.is_empty() {
            format!("syntax error at {location}")
        } else {
            let shown: String = snippet.chars().take(40).collect();
            format!("syntax error: unexpected `{shown}` at {location}")
        }
    };
    SyntaxFailure {
        message,
        location: Some(location),
    }
}

fn text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

fn unquote(literal: &str) -> String {
    literal
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

fn normalize_module(module: &str) -> String {
    module.strip_prefix("node:").unwrap_or(module).to_string()
}

fn compact(path: &str) -> String {
    path.chars().filter(|c| !c.is_whitespace()).collect()
}

struct Lowering<'src> {
    source: &'src str,
    language: Language,
    /// Local name to fully qualified path.
    aliases: HashMap<String, String>,
    constructs: Vec<Construct>,
}

impl<'src> Lowering<'src> {
    fn new(source: &'src str, language: Language) -> Self {
        Self {
            source,
            language,
            aliases: HashMap::new(),
            constructs: Vec::new(),
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        match self.language {
            Language::Python => self.visit_python(node),
            Language::JavaScript => self.visit_javascript(node),
        }
    }

    /// Resolve call aliases once every binding in the file is known.
    fn finish(mut self) -> Vec<Construct> {
        let aliases = std::mem::take(&mut self.aliases);
        for construct in &mut self.constructs {
            if let Construct::Call { callee, .. } = construct {
                *callee = resolve(&aliases, callee);
            }
        }
        self.constructs
    }

    fn push_call(&mut self, callee: String, node: Node<'_>) {
        if !callee.is_empty() {
            self.constructs.push(Construct::Call {
                callee,
                location: location_of(node, self.source),
            });
        }
    }

    fn push_import(&mut self, module: String, node: Node<'_>) {
        if !module.is_empty() {
            self.constructs.push(Construct::Import {
                module,
                location: location_of(node, self.source),
            });
        }
    }

    fn alias(&mut self, local: &str, target: String) {
        if !local.is_empty() && local != target {
            self.aliases.insert(local.to_string(), target);
        }
    }

    fn visit_python(&mut self, node: Node<'_>) {
        match node.kind() {
            "call" => {
                if let Some(function) = node.child_by_field_name("function") {
                    self.push_call(compact(text(function, self.source)), node);
                }
            }
            "import_statement" => {
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> =
                    node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    if name.kind() == "aliased_import" {
                        let Some(target) = name.child_by_field_name("name") else {
                            continue;
                        };
                        let module = compact(text(target, self.source));
                        if let Some(alias) = name.child_by_field_name("alias") {
                            self.alias(text(alias, self.source), module.clone());
                        }
                        self.push_import(module, node);
                    } else {
                        self.push_import(compact(text(name, self.source)), node);
                    }
                }
            }
            "import_from_statement" => {
                let Some(module_node) = node.child_by_field_name("module_name") else {
                    return;
                };
                let module = compact(text(module_node, self.source));
                self.push_import(module.clone(), node);
                // Relative imports cannot shadow a top-level module path.
                if module.starts_with('.') {
                    return;
                }
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> =
                    node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    let (imported, local) = if name.kind() == "aliased_import" {
                        let imported = name
                            .child_by_field_name("name")
                            .map(|n| compact(text(n, self.source)))
                            .unwrap_or_default();
                        let local = name
                            .child_by_field_name("alias")
                            .map(|n| text(n, self.source).to_string())
                            .unwrap_or_else(|| imported.clone());
                        (imported, local)
                    } else {
                        let imported = compact(text(name, self.source));
                        (imported.clone(), imported)
                    };
                    if !imported.is_empty() {
                        self.alias(&local, format!("{module}.{imported}"));
                    }
                }
            }
            _ => {}
        }
    }

    fn visit_javascript(&mut self, node: Node<'_>) {
        match node.kind() {
            "call_expression" => {
                let Some(function) = node.child_by_field_name("function") else {
                    return;
                };
                match function.kind() {
                    // Dynamic `import("x")`.
                    "import" => {
                        if let Some(module) = self.first_string_argument(node) {
                            self.push_import(module, node);
                        }
                    }
                    "identifier" if text(function, self.source) == "require" => {
                        if let Some(module) = self.first_string_argument(node) {
                            self.push_import(module, node);
                        }
                    }
                    _ => self.push_call(compact(text(function, self.source)), node),
                }
            }
            "new_expression" => {
                if let Some(constructor) = node.child_by_field_name("constructor") {
                    self.push_call(compact(text(constructor, self.source)), node);
                }
            }
            "import_statement" => {
                let Some(source_node) = node.child_by_field_name("source") else {
                    return;
                };
                let module = normalize_module(&unquote(text(source_node, self.source)));
                self.push_import(module.clone(), node);
                self.bind_import_clause(node, &module);
            }
            "variable_declarator" => self.bind_require(node),
            _ => {}
        }
    }

    fn first_string_argument(&self, call: Node<'_>) -> Option<String> {
        let arguments = call.child_by_field_name("arguments")?;
        let mut cursor = arguments.walk();
        let first = arguments.named_children(&mut cursor).next()?;
        (first.kind() == "string" || first.kind() == "template_string")
            .then(|| normalize_module(&unquote(text(first, self.source))))
    }

    fn bind_import_clause(&mut self, statement: Node<'_>, module: &str) {
        let mut cursor = statement.walk();
        let clauses: Vec<Node<'_>> = statement
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "import_clause")
            .collect();
        for clause in clauses {
            let mut clause_cursor = clause.walk();
            let parts: Vec<Node<'_>> = clause.named_children(&mut clause_cursor).collect();
            for part in parts {
                match part.kind() {
                    "identifier" => self.alias(text(part, self.source), module.to_string()),
                    "namespace_import" => {
                        let mut ns_cursor = part.walk();
                        let local = part
                            .named_children(&mut ns_cursor)
                            .find(|child| child.kind() == "identifier");
                        if let Some(local) = local {
                            self.alias(text(local, self.source), module.to_string());
                        }
                    }
                    "named_imports" => {
                        let mut spec_cursor = part.walk();
                        let specifiers: Vec<Node<'_>> = part
                            .named_children(&mut spec_cursor)
                            .filter(|child| child.kind() == "import_specifier")
                            .collect();
                        for specifier in specifiers {
                            let Some(name) = specifier.child_by_field_name("name") else {
                                continue;
                            };
                            let imported = unquote(text(name, self.source));
                            let local = specifier
                                .child_by_field_name("alias")
                                .map(|alias| text(alias, self.source).to_string())
                                .unwrap_or_else(|| imported.clone());
                            self.alias(&local, format!("{module}.{imported}"));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// `const cp = require("child_process")` and
    /// `const { exec: run } = require("child_process")`.
    fn bind_require(&mut self, declarator: Node<'_>) {
        let (Some(name), Some(value)) = (
            declarator.child_by_field_name("name"),
            declarator.child_by_field_name("value"),
        ) else {
            return;
        };
        if value.kind() != "call_expression" {
            return;
        }
        let is_require = value
            .child_by_field_name("function")
            .is_some_and(|function| text(function, self.source) == "require");
        if !is_require {
            return;
        }
        let Some(module) = self.first_string_argument(value) else {
            return;
        };

        match name.kind() {
            "identifier" => self.alias(text(name, self.source), module),
            "object_pattern" => {
                let mut cursor = name.walk();
                let properties: Vec<Node<'_>> = name.named_children(&mut cursor).collect();
                for property in properties {
                    match property.kind() {
                        "shorthand_property_identifier_pattern" => {
                            let local = text(property, self.source);
                            self.alias(local, format!("{module}.{local}"));
                        }
                        "pair_pattern" => {
                            let (Some(key), Some(value)) = (
                                property.child_by_field_name("key"),
                                property.child_by_field_name("value"),
                            ) else {
                                continue;
                            };
                            let imported = text(key, self.source);
                            self.alias(text(value, self.source), format!("{module}.{imported}"));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

fn resolve(aliases: &HashMap<String, String>, callee: &str) -> String {
    let (head, rest) = match callee.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (callee, None),
    };
    match (aliases.get(head), rest) {
        (Some(target), Some(rest)) => format!("{target}.{rest}"),
        (Some(target), None) => target.clone(),
        (None, _) => callee.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn calls(source: &str, language: Language) -> Vec<String> {
        parse(source, language)
            .expect("source parses")
            .into_iter()
            .filter_map(|construct| match construct {
                Construct::Call { callee, .. } => Some(callee),
                Construct::Import { .. } => None,
            })
            .collect()
    }

    fn imports(source: &str, language: Language) -> Vec<String> {
        parse(source, language)
            .expect("source parses")
            .into_iter()
            .filter_map(|construct| match construct {
                Construct::Import { module, .. } => Some(module),
                Construct::Call { .. } => None,
            })
            .collect()
    }

    #[test]
    fn python_calls_are_lowered_in_source_order() {
        let source = "import os\nos.system('ls')\nprint(eval('1+1'))\n";
        assert_eq!(
            calls(source, Language::Python),
            vec!["os.system", "print", "eval"]
        );
    }

    #[test]
    fn python_aliases_resolve_to_module_paths() {
        let source = "import subprocess as sp\nfrom os import system as run\nsp.check_output(['ls'])\nrun('id')\n";
        assert_eq!(
            calls(source, Language::Python),
            vec!["subprocess.check_output", "os.system"]
        );
        assert_eq!(imports(source, Language::Python), vec!["subprocess", "os"]);
    }

    #[test]
    fn python_call_location_is_one_based() {
        let constructs = parse("x = 1\nif x:\n    eval('x')\n", Language::Python).expect("parses");
        assert_eq!(constructs[0].location(), Location::new(3, 5));
    }

    #[test]
    fn python_syntax_error_reports_location() {
        let failure = parse("def broken(:\n    pass\n", Language::Python).expect_err("invalid");
        assert!(failure.message.starts_with("syntax error"));
        assert_eq!(failure.location.map(|l| l.line), Some(1));
    }

    #[test]
    fn javascript_require_becomes_import() {
        let source = "const cp = require('child_process');\ncp.execSync('ls');\n";
        assert_eq!(imports(source, Language::JavaScript), vec!["child_process"]);
        assert_eq!(
            calls(source, Language::JavaScript),
            vec!["child_process.execSync"]
        );
    }

    #[test]
    fn javascript_destructured_and_es_imports_resolve() {
        let source = "import { chmodSync as chmod } from 'node:fs';\nconst { exec } = require(\"child_process\");\nchmod('/tmp/x', 0o777);\nexec('id');\nnew Function('return 1')();\n";
        assert_eq!(
            imports(source, Language::JavaScript),
            vec!["fs", "child_process"]
        );
        let lowered = calls(source, Language::JavaScript);
        assert!(lowered.contains(&"fs.chmodSync".to_string()));
        assert!(lowered.contains(&"child_process.exec".to_string()));
        assert!(lowered.contains(&"Function".to_string()));
    }

    #[test]
    fn javascript_syntax_error_is_detected() {
        let failure = parse("function (", Language::JavaScript).expect_err("invalid");
        assert!(failure.location.is_some());
    }

    #[test]
    fn python2_statements_are_syntax_errors() {
        let failure = parse("x = 1\nprint 'hello'\n", Language::Python).expect_err("print");
        assert_eq!(failure.message, "syntax error: Python 2 print statement at 2:1");
        assert_eq!(failure.location, Some(Location::new(2, 1)));

        let failure = parse("exec \"import os; os.system('id')\"\n", Language::Python)
            .expect_err("exec");
        assert!(failure.message.contains("Python 2 exec statement"), "{}", failure.message);
    }

    #[test]
    fn jsx_is_a_syntax_error() {
        let failure = parse("const x = <div/>;\n", Language::JavaScript).expect_err("jsx");
        assert_eq!(failure.message, "syntax error: JSX element at 1:11");

        let failure =
            parse("const y = <><span>hi</span></>;\n", Language::JavaScript).expect_err("fragment");
        assert!(failure.message.contains("JSX"), "{}", failure.message);
    }

    #[test]
    fn python3_print_call_still_parses() {
        assert_eq!(calls("print('hello')\n", Language::Python), vec!["print"]);
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        let constructs = parse("s = 'héllo'; eval(s)\n", Language::Python).expect("parses");
        assert_eq!(constructs[0].location(), Location::new(1, 14));
    }

    #[test]
    fn empty_source_has_no_constructs() {
        assert!(parse("", Language::Python).expect("parses").is_empty());
        assert!(parse("", Language::JavaScript).expect("parses").is_empty());
    }
}
