use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bay_config::{BaySettings, DriverBackend, ProfileCatalog};
use bay_driver::{ClusterDriver, ClusterDriverConfig, DockerDriver, Driver, StubDriver};
use bay_orchestrator::Bay;
use bay_store::{InMemoryStore, PostgresStore, StateStore};
use tracing::{info, warn};

pub async fn serve(config: Option<PathBuf>) -> Result<()> {
    let settings = match config {
        Some(path) => BaySettings::load(&path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => BaySettings::default(),
    };
    if settings.auth.token.is_none() && !settings.auth.dev_mode {
        return Err(anyhow!(
            "auth.token is required unless auth.dev_mode is enabled"
        ));
    }

    let store: Arc<dyn StateStore> = match &settings.database.url {
        Some(url) => {
            info!("connecting to postgres");
            Arc::new(PostgresStore::connect(url).await?)
        }
        None => {
            warn!("no database configured; state is in-memory and lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let driver: Arc<dyn Driver> = match settings.driver.backend {
        DriverBackend::Stub => {
            warn!("stub driver selected; no real containers will run");
            Arc::new(StubDriver::new())
        }
        DriverBackend::Docker => Arc::new(DockerDriver::connect().await?),
        DriverBackend::Cluster => {
            let cluster = settings
                .driver
                .cluster
                .as_ref()
                .ok_or_else(|| anyhow!("driver.cluster settings required for cluster backend"))?;
            Arc::new(ClusterDriver::new(ClusterDriverConfig {
                api_server: cluster.api_server.clone(),
                namespace: cluster.namespace.clone(),
                token: cluster.token.clone(),
                storage_class: cluster.storage_class.clone(),
                volume_size: cluster.volume_size.clone(),
                insecure: cluster.insecure,
            })?)
        }
    };

    let catalog = match &settings.profiles_path {
        Some(path) => ProfileCatalog::load(path, settings.defaults.idle_timeout_secs)?,
        None => ProfileCatalog::builtin(settings.defaults.idle_timeout_secs),
    };

    let bay = Arc::new(Bay::new(store, driver, catalog, &settings));
    let _gc_tasks = bay.gc.spawn();

    let app = bay_api::build_app(bay, settings.auth.clone());
    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(listen = %settings.listen, instance = %settings.instance, "bay listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Remote subcommands ────────────────────────────────────────────────────────

fn client(token: &Option<String>) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = token {
        if let Ok(value) =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
    }
    reqwest::Client::builder().default_headers(headers).build().unwrap_or_default()
}

pub async fn status(remote: String, token: Option<String>) -> Result<()> {
    let sandboxes: serde_json::Value = client(&token)
        .get(format!("{remote}/v1/sandboxes"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let list = sandboxes.as_array().cloned().unwrap_or_default();
    let mut by_status: HashMap<String, usize> = HashMap::new();
    for s in &list {
        let status = s["status"].as_str().unwrap_or("unknown").to_string();
        *by_status.entry(status).or_default() += 1;
    }

    println!("sandboxes: {}", list.len());
    let mut statuses: Vec<_> = by_status.into_iter().collect();
    statuses.sort();
    for (status, count) in statuses {
        println!("  {status}: {count}");
    }
    Ok(())
}

pub async fn profiles(remote: String, token: Option<String>) -> Result<()> {
    let profiles: serde_json::Value = client(&token)
        .get(format!("{remote}/v1/profiles"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for p in profiles.as_array().cloned().unwrap_or_default() {
        let caps: Vec<&str> = p["capabilities"]
            .as_array()
            .map(|a| a.iter().filter_map(|c| c.as_str()).collect())
            .unwrap_or_default();
        println!(
            "{}  ({} containers)  [{}]",
            p["id"].as_str().unwrap_or("?"),
            p["containers"].as_array().map_or(0, |c| c.len()),
            caps.join(", "),
        );
    }
    Ok(())
}

pub async fn gc(remote: String, token: Option<String>) -> Result<()> {
    client(&token)
        .post(format!("{remote}/v1/admin/gc"))
        .send()
        .await?
        .error_for_status()?;
    println!("gc pass completed");
    Ok(())
}
