use std::path::PathBuf;

use clap::{Parser, Subcommand};
use codegate_config::RuntimeKind;
use codegate_core::Language;

#[derive(Debug, Parser)]
#[command(name = "codegate")]
#[command(about = "Validate machine-generated code before trusting it")]
#[command(version)]
pub struct Cli {
    /// Configuration file layered over ~/.codegate/codegate.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Isolation runtime (container or process), overriding [sandbox] runtime
    #[arg(long, global = true, value_parser = parse_runtime)]
    pub runtime: Option<RuntimeKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate one artifact and print its report as JSON
    ///
    /// The artifact is either a JSON document
    /// (`{"source", "language", "dependencies", "metadata"}`) or a plain
    /// `.py` / `.js` source file.
    ///
    /// Examples:
    ///   codegate validate artifact.json
    ///   codegate --runtime process validate main.py
    Validate {
        /// Artifact JSON or source file
        artifact: PathBuf,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Run a bounded validate/regenerate session
    ///
    /// The regeneration command receives `{"artifact", "findings"}` JSON on
    /// stdin and must print the replacement artifact JSON on stdout.
    ///
    /// Examples:
    ///   codegate session artifact.json --regenerate-cmd ./fix.sh
    ///   codegate session main.py --regenerate-cmd python3 --regenerate-arg fixer.py --max-attempts 5
    Session {
        /// Artifact JSON or source file
        artifact: PathBuf,

        /// Program that produces a replacement artifact
        #[arg(long, value_name = "PROGRAM")]
        regenerate_cmd: String,

        /// Extra argument for the regeneration program (repeatable)
        #[arg(long = "regenerate-arg", value_name = "ARG")]
        regenerate_args: Vec<String>,

        /// Seconds the regeneration program may run per attempt
        #[arg(long, default_value_t = 120)]
        regenerate_timeout_secs: u64,

        /// Validation budget, overriding [retry] max_attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Append session events as JSON lines to this file
        #[arg(long, value_name = "PATH")]
        events: Option<PathBuf>,

        /// Print a human-readable summary to stderr
        #[arg(long)]
        summary: bool,

        /// Pretty-print the outcome
        #[arg(long)]
        pretty: bool,
    },

    /// List the active forbidden-construct rules
    Rules {
        /// Only show rules for this language
        #[arg(long)]
        language: Option<Language>,

        /// Print rules as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_runtime(value: &str) -> Result<RuntimeKind, String> {
    RuntimeKind::parse(value)
        .ok_or_else(|| format!("unknown runtime '{value}' (expected container or process)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_arguments_parse() {
        let cli = Cli::try_parse_from([
            "codegate",
            "--runtime",
            "local",
            "session",
            "artifact.json",
            "--regenerate-cmd",
            "python3",
            "--regenerate-arg",
            "fix.py",
            "--max-attempts",
            "4",
        ])
        .expect("parse");

        assert_eq!(cli.runtime, Some(RuntimeKind::Process));
        match cli.command {
            Commands::Session {
                regenerate_cmd,
                regenerate_args,
                max_attempts,
                regenerate_timeout_secs,
                ..
            } => {
                assert_eq!(regenerate_cmd, "python3");
                assert_eq!(regenerate_args, vec!["fix.py".to_string()]);
                assert_eq!(max_attempts, Some(4));
                assert_eq!(regenerate_timeout_secs, 120);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_runtime_is_rejected() {
        let error = Cli::try_parse_from(["codegate", "--runtime", "vm", "rules"])
            .expect_err("bad runtime");
        assert!(error.to_string().contains("unknown runtime"));
    }

    #[test]
    fn language_filter_accepts_aliases() {
        let cli = Cli::try_parse_from(["codegate", "rules", "--language", "js"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Rules {
                language: Some(Language::JavaScript),
                ..
            }
        ));
    }
}
