//! Provider configuration CLI commands: set, show.
//!
//! `parley provider set` writes a user's chat task configuration (primary
//! provider and model, optional fallback) to the database. Running servers
//! pick the change up once their provider cache entry expires.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use console::style;
use serde_json::json;

use parley_core::repository::task_config::TaskConfigRepository;
use parley_types::provider::{ChatTaskConfig, StoredProvider, validate_endpoint};

use crate::state::AppState;

/// Provider configuration subcommands.
#[derive(Subcommand)]
pub enum ProviderCommand {
    /// Set a user's chat provider and model.
    Set(SetArgs),

    /// Show a user's chat provider configuration (API keys masked).
    Show {
        /// User id.
        #[arg(long)]
        user: String,
    },
}

#[derive(Args)]
pub struct SetArgs {
    /// User id.
    #[arg(long)]
    pub user: String,

    /// Provider name (e.g., "openai", "groq", "mistral").
    #[arg(long)]
    pub name: String,

    /// OpenAI-compatible base URL (e.g., https://api.openai.com/v1).
    #[arg(long)]
    pub base_url: String,

    /// API key for the provider.
    #[arg(long, env = "PARLEY_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Model id (e.g., gpt-4o-mini).
    #[arg(long)]
    pub model: String,

    /// Fallback provider name, used when the primary overflows its context.
    #[arg(long, requires_all = ["fallback_base_url", "fallback_api_key", "fallback_model"])]
    pub fallback_name: Option<String>,

    /// Fallback provider base URL.
    #[arg(long)]
    pub fallback_base_url: Option<String>,

    /// Fallback provider API key.
    #[arg(long, env = "PARLEY_FALLBACK_API_KEY", hide_env_values = true)]
    pub fallback_api_key: Option<String>,

    /// Fallback model id.
    #[arg(long)]
    pub fallback_model: Option<String>,
}

/// Handle a provider configuration subcommand.
pub async fn handle_provider_command(
    cmd: ProviderCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ProviderCommand::Set(args) => provider_set(state, &args, json).await,
        ProviderCommand::Show { user } => provider_show(state, &user, json).await,
    }
}

async fn provider_set(state: &AppState, args: &SetArgs, json: bool) -> Result<()> {
    let config = build_task_config(args)?;
    state
        .task_configs
        .save_chat_config(&config)
        .await
        .context("failed to save chat configuration")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&describe(&config))?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Chat provider for '{}' set to {} ({})",
        style("✓").green().bold(),
        style(&config.user_id).cyan(),
        style(&args.name).bold(),
        args.model.trim()
    );
    if let Some(fallback) = &config.fallback_provider {
        println!(
            "    fallback: {} ({})",
            fallback.name,
            config.fallback_model_id.as_deref().unwrap_or_default()
        );
    }
    println!(
        "  {}",
        style(format!(
            "Running servers pick this up within {}s.",
            state.config.provider_cache.ttl_secs
        ))
        .dim()
    );
    println!();
    Ok(())
}

async fn provider_show(state: &AppState, user: &str, json: bool) -> Result<()> {
    let config = state
        .task_configs
        .get_chat_config(user)
        .await
        .context("failed to load chat configuration")?;

    let Some(config) = config else {
        if json {
            println!("{}", json!({"user_id": user, "provider": null}));
        } else {
            println!();
            println!("  No chat provider configured for '{}'.", style(user).cyan());
            println!(
                "  Set one with: {}",
                style("parley provider set --user <id> --name <name> --base-url <url> --api-key <key> --model <model>").dim()
            );
            println!();
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&describe(&config))?);
        return Ok(());
    }

    let valid = validate_endpoint(config.provider.as_ref(), config.model_id.as_deref());
    println!();
    println!("  Chat provider for '{}'", style(user).cyan());
    println!();
    print_provider("primary", config.provider.as_ref(), config.model_id.as_deref());
    if config.fallback_provider.is_some() || config.fallback_model_id.is_some() {
        print_provider(
            "fallback",
            config.fallback_provider.as_ref(),
            config.fallback_model_id.as_deref(),
        );
    }
    if let Err(e) = valid {
        println!();
        println!("  {} {e}", style("✗").red());
    }
    println!();
    Ok(())
}

fn print_provider(label: &str, provider: Option<&StoredProvider>, model: Option<&str>) {
    match provider {
        Some(p) => {
            println!("  {:<9} {} ({})", style(label).bold(), p.name, model.unwrap_or("no model"));
            println!("  {:<9} {}", "", style(&p.base_url).dim());
            println!("  {:<9} key {}", "", mask_key(&p.api_key));
        }
        None => println!("  {:<9} {}", style(label).bold(), style("missing").red()),
    }
}

/// Validate the arguments into a storable configuration.
fn build_task_config(args: &SetArgs) -> Result<ChatTaskConfig> {
    let primary = stored_provider(&args.user, &args.name, &args.base_url, &args.api_key)?;
    validate_endpoint(Some(&primary), Some(&args.model))?;

    let (fallback_provider, fallback_model_id) = match &args.fallback_name {
        None => (None, None),
        Some(name) => {
            let (Some(base_url), Some(api_key), Some(model)) = (
                args.fallback_base_url.as_deref(),
                args.fallback_api_key.as_deref(),
                args.fallback_model.as_deref(),
            ) else {
                bail!("--fallback-name needs --fallback-base-url, --fallback-api-key and --fallback-model");
            };
            let provider = stored_provider(&args.user, name, base_url, api_key)?;
            validate_endpoint(Some(&provider), Some(model))?;
            (Some(provider), Some(model.trim().to_string()))
        }
    };

    Ok(ChatTaskConfig {
        user_id: args.user.trim().to_string(),
        provider: Some(primary),
        model_id: Some(args.model.trim().to_string()),
        fallback_provider,
        fallback_model_id,
    })
}

/// Provider rows are keyed per user so two users never share a stored key.
fn stored_provider(user: &str, name: &str, base_url: &str, api_key: &str) -> Result<StoredProvider> {
    let (user, name, base_url) = (user.trim(), name.trim(), base_url.trim());
    if user.is_empty() || name.is_empty() {
        bail!("user and provider name must not be empty");
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        bail!("base URL for '{name}' must start with http:// or https://");
    }
    if api_key.trim().is_empty() {
        bail!("API key for '{name}' must not be empty");
    }
    Ok(StoredProvider {
        id: format!("{user}:{name}"),
        name: name.to_string(),
        api_key: api_key.trim().to_string(),
        base_url: base_url.trim_end_matches('/').to_string(),
    })
}

fn describe(config: &ChatTaskConfig) -> serde_json::Value {
    let provider = |p: Option<&StoredProvider>, model: Option<&str>| {
        p.map(|p| {
            json!({
                "name": p.name,
                "base_url": p.base_url,
                "api_key": mask_key(&p.api_key),
                "model_id": model,
            })
        })
    };
    json!({
        "user_id": config.user_id,
        "provider": provider(config.provider.as_ref(), config.model_id.as_deref()),
        "fallback": provider(config.fallback_provider.as_ref(), config.fallback_model_id.as_deref()),
    })
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SetArgs {
        SetArgs {
            user: "u1".to_string(),
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
            api_key: "sk-abcdefghijkl".to_string(),
            model: "gpt-4o-mini".to_string(),
            fallback_name: None,
            fallback_base_url: None,
            fallback_api_key: None,
            fallback_model: None,
        }
    }

    #[test]
    fn test_build_task_config() {
        let config = build_task_config(&args()).unwrap();
        let provider = config.provider.unwrap();
        assert_eq!(provider.id, "u1:openai");
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
        assert_eq!(config.model_id.as_deref(), Some("gpt-4o-mini"));
        assert!(config.fallback_provider.is_none());
    }

    #[test]
    fn test_numeric_model_and_bad_url_rejected() {
        let mut numeric = args();
        numeric.model = "42".to_string();
        assert!(build_task_config(&numeric).is_err());

        let mut bad_url = args();
        bad_url.base_url = "api.openai.com".to_string();
        assert!(build_task_config(&bad_url).is_err());
    }

    #[test]
    fn test_fallback_needs_all_fields() {
        let mut partial = args();
        partial.fallback_name = Some("groq".to_string());
        partial.fallback_model = Some("llama-3.1-70b".to_string());
        assert!(build_task_config(&partial).is_err());

        partial.fallback_base_url = Some("https://api.groq.com/openai/v1".to_string());
        partial.fallback_api_key = Some("gsk-abcdefghijkl".to_string());
        let config = build_task_config(&partial).unwrap();
        assert_eq!(config.fallback_provider.unwrap().id, "u1:groq");
        assert_eq!(config.fallback_model_id.as_deref(), Some("llama-3.1-70b"));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-...ijkl");
        assert_eq!(mask_key("short"), "****");
        let described = describe(&build_task_config(&args()).unwrap());
        assert_eq!(described["provider"]["api_key"], "sk-...ijkl");
        assert!(described["fallback"].is_null());
    }
}
