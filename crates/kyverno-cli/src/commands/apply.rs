//! Apply command

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use kyverno_engine::yaml::{parse_yaml, to_yaml_string};
use kyverno_engine::{EngineConfig, Policy, PolicyResponse, PolicyRunner};
use serde_json::Value;
use tracing::{info, warn};

use super::read_file;
use crate::variables::{parse_key_val, StaticResolver};
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Policy file; may hold several YAML documents
    #[arg(long, short)]
    pub policy: PathBuf,

    /// Resource manifest to mutate
    #[arg(long, short)]
    pub resource: PathBuf,

    /// Engine configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Variable for `{{key}}` substitution, as key=value (repeatable)
    #[arg(long = "set", value_parser = parse_key_val)]
    pub set: Vec<(String, String)>,

    /// Output format for the mutated resource
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}

/// Result of an apply run
#[derive(Debug)]
pub struct ApplyOutcome {
    pub response: PolicyResponse,
    /// Mutated resource rendered in the requested format
    pub rendered: String,
}

pub fn run(args: ApplyArgs) -> Result<()> {
    let outcome = apply(&args)?;

    for rule in &outcome.response.rules {
        eprintln!(
            "{:<5} {} ({:?}): {}",
            rule.status, rule.name, rule.processing_time, rule.message
        );
    }
    print!("{}", outcome.rendered);

    let failed = outcome.response.failure_count();
    if failed > 0 {
        return Err(Error::RulesFailed { count: failed });
    }
    Ok(())
}

/// Load inputs, run every rule and render the result
pub fn apply(args: &ApplyArgs) -> Result<ApplyOutcome> {
    let policies = Policy::from_yaml(&read_file(&args.policy)?)?;
    if policies.iter().all(|p| p.rules.is_empty()) {
        warn!(path = %args.policy.display(), "no mutate rules found");
    }

    let resource = parse_yaml(&read_file(&args.resource)?)?;
    if !resource.is_object() {
        return Err(Error::validation(format!(
            "{}: resource must be a YAML or JSON object",
            args.resource.display()
        )));
    }

    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml(&read_file(path)?)?,
        None => EngineConfig::default(),
    };

    let resolver = StaticResolver::new(args.set.iter().cloned());
    let response = PolicyRunner::new(config).run(&policies, &resource, &resolver);

    let patches = response.patches().len();
    info!(rules = response.rules.len(), patches, "policies applied");

    let rendered = render(&response.patched_resource, args.output)?;
    Ok(ApplyOutcome { response, rendered })
}

fn render(resource: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(resource)?;
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Yaml => Ok(to_yaml_string(resource)?),
    }
}
