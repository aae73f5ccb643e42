//! docqa application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Build `DocqaService` (document store, persisted index, providers)
//! 4. Run the requested command: serve the API, ingest, ask, clear, or
//!    write the config file with `init`

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use docqa_api::{start_server, AppState};
use docqa_core::config::DocqaConfig;
use docqa_core::error::{DocqaError, Result};
use docqa_rag::DocqaService;

use cli::{CliArgs, Command};

/// Load the config file if present. A file that exists but does not parse
/// is fatal rather than silently replaced by defaults.
fn load_config(path: &Path) -> Result<DocqaConfig> {
    if path.exists() {
        DocqaConfig::load(path)
    } else {
        Ok(DocqaConfig::default())
    }
}

/// Write `config` to `path`, refusing to replace an existing file unless
/// `force` is set.
fn init_config(config: &DocqaConfig, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(DocqaError::InvalidInput(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        )));
    }
    config.validate()?;
    config.save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn ingest(service: &DocqaService, files: &[std::path::PathBuf]) -> Result<()> {
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DocqaError::InvalidInput(format!("bad file name: {}", file.display())))?;
        let bytes = std::fs::read(file)?;
        service.upload(name, &bytes)?;
    }

    let report = service.ingest().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_partial() {
        tracing::warn!(
            failed = ?report.failed_documents(),
            "Some documents were not ingested"
        );
    }
    Ok(())
}

async fn ask(
    service: &DocqaService,
    question: &str,
    top_k: Option<usize>,
    schema: Option<&Path>,
) -> Result<()> {
    let answer = match schema {
        Some(path) => {
            let schema: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            service.query_structured(question, &schema, top_k).await?
        }
        None => service.query(question, top_k).await?,
    };
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = load_config(&config_file)?;
    args.apply_overrides(&mut config);

    init_tracing(&config.general.log_level);
    tracing::info!(
        path = %config_file.display(),
        exists = config_file.exists(),
        "Starting docqa v{}",
        env!("CARGO_PKG_VERSION")
    );

    let command = args.command();
    if let Command::Init { force } = command {
        init_config(&config, &config_file, force)?;
        return Ok(());
    }

    let service = DocqaService::from_config(config)?;

    match command {
        Command::Init { .. } => {}
        Command::Serve => start_server(AppState::from_arc(Arc::new(service))).await?,
        Command::Ingest { files } => ingest(&service, &files).await?,
        Command::Ask {
            question,
            top_k,
            schema,
        } => ask(&service, &question, top_k, schema.as_deref()).await?,
        Command::Clear => {
            let removed = service.clear_index().await?;
            println!("Removed {} vectors", removed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".docqa").join("config.toml");
        let mut config = DocqaConfig::default();
        config.api.port = 9100;

        init_config(&config, &path, false).unwrap();
        assert_eq!(load_config(&path).unwrap().api.port, 9100);
    }

    #[test]
    fn test_init_keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\nport = 7000\n").unwrap();

        let config = DocqaConfig::default();
        assert!(matches!(
            init_config(&config, &path, false),
            Err(DocqaError::InvalidInput(_))
        ));
        assert_eq!(load_config(&path).unwrap().api.port, 7000);

        init_config(&config, &path, true).unwrap();
        assert_eq!(load_config(&path).unwrap().api.port, 8000);
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(load_config(&path).is_err());
        assert_eq!(
            load_config(&dir.path().join("absent.toml")).unwrap().api.port,
            8000
        );
    }
}
