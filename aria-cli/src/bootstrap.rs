//! Composition root: wires secrets, scrubber, store, registry, providers,
//! router, and kernel from the resolved configuration. No globals; every
//! collaborator is constructed here and passed down explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use rig::client::CompletionClient;
use tracing::warn;

use aria_agent::provider::{EchoProvider, ModelProvider};
use aria_agent::rig_provider::RigProvider;
use aria_agent::{AgentKernel, ModelRouter, RouterConfig};
use aria_core::config::KernelConfig;
use aria_core::error::AriaError;
use aria_secrets::{Scrubber, SecretsLoader};
use aria_store::SqliteStore;
use aria_tools::ToolRegistry;

pub struct Runtime {
    pub kernel: AgentKernel,
    pub store: Arc<SqliteStore>,
}

/// Build the scrubber and store only: enough for the read-side audit
/// commands, which never talk to a model.
pub async fn build_store(config: &KernelConfig) -> Result<Arc<SqliteStore>, AriaError> {
    let loader = SecretsLoader::new();
    let scrubber = Arc::new(
        Scrubber::build(&loader.known_secrets())
            .map_err(|e| AriaError::Config(e.to_string()))?,
    );
    Ok(Arc::new(SqliteStore::open(&config.db_path, scrubber).await?))
}

pub fn build_registry(config: &KernelConfig) -> Result<ToolRegistry, AriaError> {
    std::fs::create_dir_all(&config.workspace_dir).map_err(|e| {
        AriaError::Config(format!(
            "cannot create workspace dir '{}': {e}",
            config.workspace_dir.display()
        ))
    })?;

    let runner = std::env::current_exe()
        .map_err(|e| AriaError::Config(format!("cannot resolve own executable: {e}")))?;

    let mut registry = ToolRegistry::new();
    registry.register_builtins(&runner, &config.workspace_dir)?;
    for dir in &config.plugin_dirs {
        for (path, err) in registry.load_plugin_dir(dir) {
            warn!(path = %path.display(), error = %err, "plugin rejected at startup");
        }
    }
    Ok(registry)
}

pub async fn build_runtime(config: &KernelConfig) -> Result<Runtime, AriaError> {
    let mut loader = SecretsLoader::new();
    let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();

    let mut wanted: Vec<(String, String)> = vec![(
        config.primary_provider.clone(),
        config.primary_model.clone(),
    )];
    if let Some(fallback) = &config.fallback_provider {
        let model = config
            .fallback_model
            .clone()
            .unwrap_or_else(|| config.primary_model.clone());
        wanted.push((fallback.clone(), model));
    }

    for (name, model) in &wanted {
        if !providers.contains_key(name) {
            providers.insert(name.clone(), build_provider(name, model, config, &mut loader)?);
        }
    }
    providers
        .entry("mock".into())
        .or_insert_with(|| Arc::new(EchoProvider));

    // Everything the loader handed out is a redaction pattern from now on.
    let scrubber = Arc::new(
        Scrubber::build(&loader.known_secrets())
            .map_err(|e| AriaError::Config(e.to_string()))?,
    );
    let store = Arc::new(SqliteStore::open(&config.db_path, scrubber).await?);
    let registry = Arc::new(build_registry(config)?);

    let router = ModelRouter::new(
        providers,
        RouterConfig {
            fallback_provider: config.fallback_provider.clone(),
            fallback_model: config.fallback_model.clone(),
            ..RouterConfig::default()
        },
    )?;

    Ok(Runtime {
        kernel: AgentKernel::new(router, registry, store.clone(), config.clone()),
        store,
    })
}

fn build_provider(
    name: &str,
    model: &str,
    config: &KernelConfig,
    loader: &mut SecretsLoader,
) -> Result<Arc<dyn ModelProvider>, AriaError> {
    match name {
        "mock" => Ok(Arc::new(EchoProvider)),
        "anthropic" => {
            let key = loader
                .require("ANTHROPIC_API_KEY")
                .map_err(|e| AriaError::Config(e.to_string()))?;
            let client = rig::providers::anthropic::ClientBuilder::new(&key).build();
            Ok(Arc::new(RigProvider::new(
                "anthropic",
                client.completion_model(model),
                true,
            )))
        }
        "ollama" => {
            let client = rig::providers::ollama::Client::from_url(&config.ollama_base_url);
            Ok(Arc::new(RigProvider::new(
                "ollama",
                client.completion_model(model),
                false,
            )))
        }
        other => Err(AriaError::Config(format!(
            "unknown provider '{other}' (expected anthropic|ollama|mock)"
        ))),
    }
}
