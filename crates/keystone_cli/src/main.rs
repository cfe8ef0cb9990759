//! Keystone CLI
//!
//! Validates and compiles JSON configuration models.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use keystone_model::{Model, Validator};
use keystone_runtime::{CompileReport, Engine, EngineConfig, Registry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "Keystone - declarative configuration model compiler", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a model and print the resolved instances
    Compile {
        /// Path to the model file (JSON)
        #[arg(short, long)]
        file: PathBuf,
        /// Maximum driver rounds
        #[arg(long, default_value_t = EngineConfig::default().max_iterations)]
        max_iterations: usize,
        /// Report statements that never ran instead of failing
        #[arg(long)]
        allow_unexecuted: bool,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Check a model without compiling it
    Check {
        /// Path to the model file (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env("KEYSTONE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("keystone=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_model(path: &Path) -> Result<Model> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    Model::from_json(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

fn check(model: &Model, registry: &Registry) -> Result<()> {
    Validator::new()
        .with_functions(registry.plugin_names())
        .validate(model)
        .map_err(|errors| {
            let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
            eyre!("model is invalid:\n{}", lines.join("\n"))
        })
}

fn render_text(report: &CompileReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "compiled in {} iterations: {} instances, {} units executed, {} variables frozen\n",
        report.iterations,
        report.instances.len(),
        report.metrics.units_executed,
        report.metrics.variables_frozen,
    ));
    for instance in &report.instances {
        out.push_str(&format!("{} {} ({})\n", instance.entity, instance.handle, instance.location));
        for (name, value) in &instance.attributes {
            out.push_str(&format!("    {name} = {value}\n"));
        }
    }
    for statement in &report.unfinished {
        out.push_str(&format!("not executed: {statement}\n"));
    }
    out
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let registry = Registry::with_builtins();
    match cli.command {
        Commands::Check { file } => {
            let model = load_model(&file)?;
            check(&model, &registry)?;
            println!("{}: ok", file.display());
            Ok(())
        }
        Commands::Compile {
            file,
            max_iterations,
            allow_unexecuted,
            format,
        } => {
            let model = load_model(&file)?;
            check(&model, &registry)?;
            let config = EngineConfig::new()
                .with_max_iterations(max_iterations)
                .with_fail_on_unexecuted(!allow_unexecuted);
            info!(file = %file.display(), max_iterations, "compiling model");
            let report = Engine::new(config).compile(&model, Arc::new(registry))?;
            if !report.unfinished.is_empty() {
                warn!(count = report.unfinished.len(), "statements were never executed");
            }
            match format {
                Format::Text => print!("{}", render_text(&report)),
                Format::Json => println!("{}", report.to_json()?),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MODEL: &str = r#"{
        "entities": [
            {"name": "Host", "attributes": [{"name": "name", "type": "string"}]}
        ],
        "blocks": [
            {"statements": [
                {"kind": "assign", "name": "h", "value": {"kind": "constructor", "entity": "Host",
                    "attributes": {"name": {"kind": "literal", "value": "web"}}}}
            ]}
        ]
    }"#;

    fn model_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_compile_and_render() {
        let file = model_file(MODEL);
        let model = load_model(file.path()).unwrap();
        let registry = Registry::with_builtins();
        check(&model, &registry).unwrap();

        let report = Engine::default().compile(&model, Arc::new(registry)).unwrap();
        let text = render_text(&report);
        assert!(text.contains("Host instance_00"));
        assert!(text.contains("name = \"web\""));
    }

    #[test]
    fn test_check_rejects_unknown_entity() {
        let file = model_file(&MODEL.replace("\"entity\": \"Host\"", "\"entity\": \"Nope\""));
        let model = load_model(file.path()).unwrap();
        let err = check(&model, &Registry::with_builtins()).unwrap_err();
        assert!(err.to_string().contains("model is invalid"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let file = model_file("{not json");
        assert!(load_model(file.path()).is_err());
    }
}
