//! Static analysis: syntax validity plus a declarative forbidden-construct
//! table evaluated over the parsed representation.

mod syntax;
mod table;

pub use syntax::{Construct, SyntaxFailure, parse};
pub use table::{Pattern, Rule, RuleTable};

use codegate_config::RulesConfig;

use crate::artifact::Language;
use crate::finding::{Finding, FindingKind, Severity};

/// Finding code for unparseable source, prefixed like the rule ids.
fn syntax_code(language: Language) -> &'static str {
    match language {
        Language::Python => "python.syntax",
        Language::JavaScript => "js.syntax",
    }
}

/// Stateless rule evaluator. Holds one table per language.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    python: RuleTable,
    javascript: RuleTable,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            python: RuleTable::defaults(Language::Python),
            javascript: RuleTable::defaults(Language::JavaScript),
        }
    }
}

impl RuleEngine {
    pub fn new(python: RuleTable, javascript: RuleTable) -> Self {
        Self { python, javascript }
    }

    /// Default tables minus the ids listed in `[rules] disabled`.
    pub fn from_config(config: &RulesConfig) -> Self {
        Self {
            python: RuleTable::defaults(Language::Python).without(&config.disabled),
            javascript: RuleTable::defaults(Language::JavaScript).without(&config.disabled),
        }
    }

    pub fn table(&self, language: Language) -> &RuleTable {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
        }
    }

    /// Check source text. An unparseable source yields exactly one
    /// critical syntax finding and no rule evaluation.
    pub fn check(&self, source: &str, language: Language) -> Vec<Finding> {
        let constructs = match parse(source, language) {
            Ok(constructs) => constructs,
            Err(failure) => {
                tracing::debug!(%language, message = %failure.message, "source failed to parse");
                let mut finding =
                    Finding::new(FindingKind::Syntax, Severity::Critical, failure.message)
                        .with_code(syntax_code(language));
                finding.location = failure.location;
                return vec![finding];
            }
        };

        let mut findings = Vec::new();
        for rule in self.table(language).rules() {
            let matches = constructs
                .iter()
                .filter(|construct| rule.pattern.matches(construct));
            let matches: Vec<&Construct> = if rule.report_once {
                matches.take(1).collect()
            } else {
                matches.collect()
            };
            for construct in matches {
                findings.push(
                    Finding::new(rule.kind, rule.severity, rule.message)
                        .at(construct.location())
                        .with_code(rule.id),
                );
            }
        }

        tracing::debug!(
            %language,
            constructs = constructs.len(),
            findings = findings.len(),
            "rule evaluation finished"
        );
        findings
    }
}
