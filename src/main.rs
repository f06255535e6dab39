use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use inquire::error::InquireResult;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

mod browser;
#[cfg(feature = "headless")]
mod chrome;
mod cli;
mod config;
mod eid;
mod engine;
mod links;
mod lock;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use browser::{Browser, DetachedBrowser};
use config::Config;
use engine::{message::SyncMessage, Engine};
use links::LinkRecord;
use storage::{FileStore, LocalStore, KEY_LINKS, KEY_PENDING_UPSERTS};

const DEFAULT_DAEMON_ADDR: &str = "http://127.0.0.1:8787";

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("LINKDROP_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/linkdrop"))
}

fn daemon_addr() -> String {
    std::env::var("LINKDROP_ADDR")
        .unwrap_or_else(|_| DEFAULT_DAEMON_ADDR.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn open_store(base_path: &std::path::Path) -> anyhow::Result<Arc<dyn LocalStore>> {
    let store = FileStore::new(base_path.join("store"))
        .with_context(|| format!("failed to open store in {}", base_path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(feature = "headless")]
fn attach_chrome(ws_url: &str) -> Option<Arc<dyn Browser>> {
    match tokio::task::block_in_place(|| chrome::ChromeBrowser::connect(ws_url)) {
        Ok(browser) => Some(Arc::new(browser)),
        Err(err) => {
            log::error!("failed to attach to chrome at {ws_url}: {err}");
            None
        }
    }
}

#[cfg(not(feature = "headless"))]
fn attach_chrome(_ws_url: &str) -> Option<Arc<dyn Browser>> {
    log::warn!("built without the headless feature, ignoring chrome_ws_url");
    None
}

fn connect_browser(config: &Config) -> Arc<dyn Browser> {
    let ws_url = std::env::var("LINKDROP_CHROME_WS")
        .ok()
        .or_else(|| config.chrome_ws_url.clone());

    if let Some(browser) = ws_url.as_deref().and_then(attach_chrome) {
        return browser;
    }

    log::warn!("no browser attached, sync messages will queue");
    Arc::new(DetachedBrowser)
}

async fn run_daemon(config: Config, listen: Option<String>) -> anyhow::Result<()> {
    let _lock = lock::DaemonLock::acquire(config.base_path())?;

    let store = open_store(config.base_path())?;
    let browser = connect_browser(&config);
    let listen = listen.unwrap_or_else(|| config.listen.clone());

    let engine = Arc::new(Engine::new(config, store, browser).await?);
    let handles = engine.spawn_background();
    engine.router().refresh_badge().await;

    let result = web::serve(engine.clone(), &listen).await;

    engine.shutdown().await;
    for handle in handles {
        if let Err(err) = handle.await {
            log::error!("background task panicked: {err:?}");
        }
    }

    result
}

async fn send_message(message: Value) -> anyhow::Result<Value> {
    let addr = daemon_addr();
    let response = reqwest::Client::new()
        .post(format!("{addr}/api/message"))
        .json(&message)
        .send()
        .await
        .with_context(|| format!("is the daemon running at {addr}?"))?;

    Ok(response.error_for_status()?.json().await?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: cli::Args) -> anyhow::Result<()> {
    let base_path = base_path()?;

    match args.command {
        cli::Command::Daemon { listen } => {
            let config = Config::load_with(&base_path)?;
            run_daemon(config, listen).await
        }

        cli::Command::Save {
            url,
            title,
            description,
            label,
            priority,
            board,
            text_file,
        } => {
            let page_text = match text_file {
                Some(path) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };

            let response = send_message(json!({
                "type": "SAVE_LINK",
                "payload": {
                    "url": url,
                    "title": title,
                    "description": description,
                    "label": (!label.is_empty()).then(|| label.join(",")),
                    "priority": priority,
                    "boardId": board,
                    "pageText": page_text,
                },
            }))
            .await?;

            print_json(&response)?;
            if response["success"] != json!(true) {
                bail!("link was not saved");
            }
            Ok(())
        }

        cli::Command::Queue {} => {
            let store = open_store(&base_path)?;
            let pending: Vec<SyncMessage> = storage::load(store.as_ref(), KEY_PENDING_UPSERTS)
                .await?
                .unwrap_or_default();
            print_json(&pending)
        }

        cli::Command::Links {} => {
            let store = open_store(&base_path)?;
            let links: Vec<LinkRecord> = storage::load(store.as_ref(), KEY_LINKS)
                .await?
                .unwrap_or_default();
            print_json(&links)
        }

        cli::Command::Clear { yes } => {
            if !yes {
                match inquire::prompt_confirmation(
                    "You are about to remove every saved link and pending sync message. Are you really sure?",
                ) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            let response = send_message(json!({"type": "CLEAR_ALL_LINKS"})).await?;
            print_json(&response)
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("linkdrop=info")),
        )
        .init();

    let args = cli::Args::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}
