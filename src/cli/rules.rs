use anyhow::Result;
use codegate_config::CodegateConfig;
use codegate_core::rules::Pattern;
use codegate_core::{Language, Rule, RuleEngine};
use serde::Serialize;

use super::print_json;

#[derive(Serialize)]
struct LanguageRules<'a> {
    language: Language,
    rules: &'a [Rule],
}

/// Print the rule tables after `[rules] disabled` is applied.
pub fn handle_rules_command(
    config: &CodegateConfig,
    language: Option<Language>,
    json: bool,
) -> Result<()> {
    let engine = RuleEngine::from_config(&config.rules);
    let languages: Vec<Language> = match language {
        Some(language) => vec![language],
        None => Language::ALL.to_vec(),
    };

    if json {
        let tables: Vec<LanguageRules<'_>> = languages
            .iter()
            .map(|&language| LanguageRules {
                language,
                rules: engine.table(language).rules(),
            })
            .collect();
        return print_json(&tables, true);
    }

    for language in languages {
        println!("{language}:");
        for rule in engine.table(language).rules() {
            println!("{}", render_rule(rule));
        }
    }
    if !config.rules.disabled.is_empty() {
        println!("disabled: {}", config.rules.disabled.join(", "));
    }
    Ok(())
}

fn render_rule(rule: &Rule) -> String {
    let pattern = match rule.pattern {
        Pattern::Call(path) => format!("call {path}"),
        Pattern::CallPrefix(prefix) => format!("call {prefix}*"),
        Pattern::Import(module) => format!("import {module}"),
    };
    format!(
        "  {:<28} {:<8} {:<20} {:<28} {}{}",
        rule.id,
        rule.severity.as_str(),
        rule.kind.as_str(),
        pattern,
        rule.message,
        if rule.report_once { " (once)" } else { "" }
    )
}
