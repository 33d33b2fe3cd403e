use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokengate_http::HttpError;
use tokengate_session::{
    AuthenticatedHttpClient, InvalidationOutcome, JsonFileStore, LoggingMetrics,
    NoopCacheInvalidator, NoopNavigator, Session, SessionError, SessionInvalidator, TokenStore,
};

use crate::config::AppConfig;

async fn open_store(path: &Path) -> Result<Arc<TokenStore>> {
    let kv = JsonFileStore::open(path)
        .await
        .with_context(|| format!("cannot open session file {}", path.display()))?;
    let store = TokenStore::load(Arc::new(kv))
        .await
        .with_context(|| format!("cannot read session file {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Validate configuration and print the effective values.
pub fn check(config: &AppConfig) -> Result<()> {
    tracing::info!("checking configuration");
    config.session.validate()?;
    println!("Configuration is valid");
    println!("{}", config.to_pretty_json()?);
    Ok(())
}

#[derive(Args)]
pub struct SignInArgs {
    /// Access token issued by the backend
    #[arg(long)]
    access_token: String,
    /// Refresh token issued by the backend
    #[arg(long)]
    refresh_token: String,
    /// Optional user profile JSON to keep alongside the session
    #[arg(long)]
    user: Option<String>,
}

impl SignInArgs {
    pub async fn run(&self, config: &AppConfig) -> Result<()> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            anyhow::bail!("tokens must not be empty");
        }
        let user = self
            .user
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .context("--user is not valid JSON")?;

        let store = open_store(&config.session_file).await?;
        store
            .set_session(&Session::new(
                self.access_token.as_str(),
                self.refresh_token.as_str(),
            ))
            .await?;
        if let Some(user) = user {
            store.set_user(&user).await?;
        }

        tracing::info!(path = %config.session_file.display(), "session stored");
        println!("Signed in (session stored in {})", config.session_file.display());
        Ok(())
    }
}

pub async fn sign_out(config: &AppConfig) -> Result<()> {
    let store = open_store(&config.session_file).await?;
    let invalidator = SessionInvalidator::new(
        store,
        Arc::new(NoopCacheInvalidator),
        Arc::new(NoopNavigator),
    );

    match invalidator.sign_out().await? {
        InvalidationOutcome::Invalidated => println!("Signed out"),
        InvalidationOutcome::AlreadyCleared | InvalidationOutcome::Superseded => {
            println!("Already signed out");
        }
    }
    Ok(())
}

pub async fn status(config: &AppConfig) -> Result<()> {
    let store = open_store(&config.session_file).await?;
    let snapshot = store.snapshot();

    if snapshot.is_empty() {
        println!("Signed out");
        return Ok(());
    }

    println!("Signed in");
    println!(
        "  access token:  {}",
        if snapshot.access_token.is_some() { "present" } else { "missing" }
    );
    println!(
        "  refresh token: {}",
        if snapshot.refresh_token.is_some() { "present" } else { "missing" }
    );
    if let Some(user) = store.user().await? {
        println!("  user: {user}");
    }
    Ok(())
}

#[derive(Args)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...)
    method: String,
    /// Path relative to `session.base_url`, or an absolute URL
    path: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
    /// Extra request header as `Name: value`; may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
}

impl RequestArgs {
    pub async fn run(&self, config: &AppConfig) -> Result<()> {
        let method = http::Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", self.method))?;

        let headers = self
            .headers
            .iter()
            .map(|raw| {
                raw.split_once(':')
                    .map(|(name, value)| (name.trim(), value.trim()))
                    .with_context(|| format!("header '{raw}' is not `Name: value`"))
            })
            .collect::<Result<Vec<_>>>()?;

        let body = self
            .body
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .context("--body is not valid JSON")?;

        let store = open_store(&config.session_file).await?;
        let client = AuthenticatedHttpClient::builder(config.session.clone())
            .token_store(store)
            .metrics(Arc::new(LoggingMetrics))
            .build()?;

        let mut request = client.request(method, &self.path).headers(headers);
        if let Some(body) = &body {
            request = request.json(body)?;
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(explain(e)),
        };

        let status = response.status();
        let bytes = response.bytes().await?;

        println!("{status}");
        if !bytes.is_empty() {
            println!("{}", String::from_utf8_lossy(&bytes));
        }

        if !status.is_success() {
            anyhow::bail!("request failed with HTTP {status}");
        }
        Ok(())
    }
}

fn explain(err: HttpError) -> anyhow::Error {
    if let Some(cause) = err.auth_cause::<SessionError>() {
        return anyhow::anyhow!("session ended ({cause}); run `tokengate sign-in` again");
    }
    anyhow::Error::new(err).context("request failed")
}
