//! Declarative forbidden-construct rules.

use serde::Serialize;

use crate::artifact::Language;
use crate::finding::{FindingKind, Severity};
use crate::rules::syntax::Construct;

/// What a rule matches in the lowered construct list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Pattern {
    /// A call whose resolved callee equals the path, e.g. `os.system`.
    Call(&'static str),
    /// A call whose resolved callee starts with the prefix, e.g. `subprocess.`.
    CallPrefix(&'static str),
    /// An import of the module or one of its submodules.
    Import(&'static str),
}

impl Pattern {
    pub fn matches(&self, construct: &Construct) -> bool {
        match (self, construct) {
            (Self::Call(path), Construct::Call { callee, .. }) => callee == path,
            (Self::CallPrefix(prefix), Construct::Call { callee, .. }) => {
                callee.starts_with(prefix)
            }
            (Self::Import(module), Construct::Import { module: imported, .. }) => {
                imported == module
                    || imported
                        .strip_prefix(module)
                        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('/'))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub id: &'static str,
    pub kind: FindingKind,
    pub severity: Severity,
    pub pattern: Pattern,
    /// Only the first occurrence in an artifact is reported.
    pub report_once: bool,
    pub message: &'static str,
}

impl Rule {
    const fn new(
        id: &'static str,
        kind: FindingKind,
        severity: Severity,
        pattern: Pattern,
        message: &'static str,
    ) -> Self {
        Self {
            id,
            kind,
            severity,
            pattern,
            report_once: false,
            message,
        }
    }

    const fn once(mut self) -> Self {
        self.report_once = true;
        self
    }
}

use FindingKind::{ExcessivePermission, UnsafeConstruct};
use Pattern::{Call, CallPrefix, Import};
use Severity::{Critical, Info, Warning};

const PYTHON_RULES: &[Rule] = &[
    Rule::new("python.eval", UnsafeConstruct, Critical, Call("eval"), "call to eval() executes arbitrary code"),
    Rule::new("python.exec", UnsafeConstruct, Critical, Call("exec"), "call to exec() executes arbitrary code"),
    Rule::new("python.shell-exec", UnsafeConstruct, Critical, Call("os.system"), "os.system() runs a shell command"),
    Rule::new("python.os-popen", UnsafeConstruct, Critical, Call("os.popen"), "os.popen() runs a shell command"),
    Rule::new("python.subprocess", UnsafeConstruct, Critical, CallPrefix("subprocess."), "subprocess call spawns an external process"),
    Rule::new("python.dynamic-import", UnsafeConstruct, Warning, Call("__import__"), "__import__() loads modules dynamically"),
    Rule::new("python.pickle-loads", UnsafeConstruct, Warning, Call("pickle.loads"), "pickle.loads() deserializes untrusted data"),
    Rule::new("python.input", UnsafeConstruct, Warning, Call("input"), "input() reads unvalidated user input").once(),
    Rule::new("python.chmod", ExcessivePermission, Warning, Call("os.chmod"), "os.chmod() changes file permissions"),
    Rule::new("python.chown", ExcessivePermission, Warning, Call("os.chown"), "os.chown() changes file ownership"),
    Rule::new("python.access", ExcessivePermission, Info, Call("os.access"), "os.access() probes filesystem permissions"),
    Rule::new("python.open", ExcessivePermission, Info, Call("open"), "open() accesses the filesystem").once(),
    Rule::new("python.socket", ExcessivePermission, Warning, Import("socket"), "socket module opens network connections").once(),
];

const JAVASCRIPT_RULES: &[Rule] = &[
    Rule::new("js.eval", UnsafeConstruct, Critical, Call("eval"), "call to eval() executes arbitrary code"),
    Rule::new("js.function-constructor", UnsafeConstruct, Critical, Call("Function"), "Function constructor compiles arbitrary code"),
    Rule::new("js.child-process-exec", UnsafeConstruct, Critical, CallPrefix("child_process."), "child_process call spawns an external process"),
    Rule::new("js.child-process", UnsafeConstruct, Warning, Import("child_process"), "child_process module can spawn external processes").once(),
    Rule::new("js.fs-chmod", ExcessivePermission, Warning, CallPrefix("fs.chmod"), "fs.chmod changes file permissions"),
    Rule::new("js.fs-chown", ExcessivePermission, Warning, CallPrefix("fs.chown"), "fs.chown changes file ownership"),
    Rule::new("js.net", ExcessivePermission, Warning, Import("net"), "net module opens network connections").once(),
];

/// An ordered rule table for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    language: Language,
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn defaults(language: Language) -> Self {
        let rules = match language {
            Language::Python => PYTHON_RULES,
            Language::JavaScript => JAVASCRIPT_RULES,
        };
        Self {
            language,
            rules: rules.to_vec(),
        }
    }

    pub fn new(language: Language, rules: Vec<Rule>) -> Self {
        Self { language, rules }
    }

    /// Drop rules by id, keeping the order of the rest.
    #[must_use]
    pub fn without<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        self.rules
            .retain(|rule| !ids.iter().any(|id| id.as_ref() == rule.id));
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == id)
    }
}
