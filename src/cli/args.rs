// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and the run and validate subcommands

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Runs declarative YAML workflows as trees of task instances")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow from a YAML file
    Run {
        #[arg(help = "Path to workflow YAML file")]
        workflow: PathBuf,

        #[arg(short, long, help = "Workflow input as a JSON document")]
        input: Option<String>,

        #[arg(long, conflicts_with = "input", help = "Read the workflow input from a JSON file")]
        input_file: Option<PathBuf>,

        #[arg(short, long, help = "Write the workflow result as JSON to this file")]
        output: Option<PathBuf>,

        #[arg(long, help = "Maximum number of concurrently running call and run tasks")]
        max_concurrent: Option<usize>,
    },

    /// Validate a workflow file without executing
    Validate {
        #[arg(help = "Path to workflow YAML file")]
        workflow: PathBuf,

        #[arg(long, help = "Treat unresolved calls as errors")]
        strict: bool,
    },
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse the inline input document; no input means `null`.
    pub fn parse_input(input: Option<&str>) -> anyhow::Result<Value> {
        match input {
            Some(text) => serde_json::from_str(text)
                .map_err(|e| anyhow::anyhow!("Invalid --input JSON: {}", e)),
            None => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_input() {
        assert_eq!(
            Args::parse_input(Some(r#"{"order": 7}"#)).unwrap(),
            json!({"order": 7})
        );
        assert_eq!(Args::parse_input(None).unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_input_invalid() {
        assert!(Args::parse_input(Some("{not json")).is_err());
    }

    #[test]
    fn test_run_arguments() {
        let args = Args::try_parse_from([
            "skein",
            "run",
            "order.yaml",
            "--input",
            "{}",
            "--max-concurrent",
            "2",
        ])
        .unwrap();
        match args.command {
            Commands::Run {
                workflow,
                input,
                max_concurrent,
                ..
            } => {
                assert_eq!(workflow, PathBuf::from("order.yaml"));
                assert_eq!(input.as_deref(), Some("{}"));
                assert_eq!(max_concurrent, Some(2));
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_input_sources_conflict() {
        let parsed = Args::try_parse_from([
            "skein",
            "run",
            "order.yaml",
            "--input",
            "{}",
            "--input-file",
            "input.json",
        ]);
        assert!(parsed.is_err());
    }
}
