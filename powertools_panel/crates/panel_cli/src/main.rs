use anyhow::Context;
use clap::Parser;
use panel_core::config::{CatalogMode, PanelConfig};
use panel_core::host::{AppOverview, HostEvent, HostHub, LoginUser};
use panel_core::panel::{CatalogView, Panel};
use panel_core::protocol::VariantInfo;
use panel_core::store::keys;
use panel_core::transport::Transport;
use panel_core::variants::SelectorState;
use panel_core::ws::WsTransport;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Headless PowerTools panel: mirrors backend state and reads host events and
/// user actions as JSON lines on stdin.
#[derive(Parser, Debug)]
#[command(name = "powertools_panel")]
struct Args {
    #[arg(long)]
    backend_url: Option<String>,

    #[arg(long)]
    catalog_url: Option<String>,

    /// "backend" or "http"
    #[arg(long)]
    catalog: Option<String>,

    #[arg(long)]
    poll_ms: Option<u64>,

    #[arg(long)]
    main_app_id: Option<String>,

    /// Known game, as `GAME_ID=Display Name`. Repeatable.
    #[arg(long = "app", value_name = "ID=NAME")]
    apps: Vec<String>,

    /// Logged-in user, as `account` or `account:Persona`. Repeatable.
    #[arg(long = "user", value_name = "ACCOUNT[:PERSONA]")]
    users: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Input {
    Event(HostEvent),
    Action(Action),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "snake_case", tag = "action")]
enum Action {
    SelectVariant { id: u64, name: String },
    CreateVariant { name: String },
    Reapply,
    Defaults,
    Persistent { enabled: bool },
    Reload,
    Upload,
    Download { id: String },
    Dump,
    Status,
    Quit,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    let url = Url::parse(&config.backend_url)
        .with_context(|| format!("invalid backend url {:?}", config.backend_url))?;

    let host = HostHub::new();
    for app in &args.apps {
        let (game_id, name) = app
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--app expects ID=NAME, got {app:?}"))?;
        host.add_app(
            game_id,
            AppOverview {
                app_id: game_id.to_string(),
                display_name: name.to_string(),
            },
        );
    }
    for user in &args.users {
        let (account, persona) = match user.split_once(':') {
            Some((a, p)) => (a, Some(p.to_string())),
            None => (user.as_str(), None),
        };
        host.add_login_user(LoginUser {
            account_name: account.to_string(),
            persona_name: persona,
        });
    }
    let host = Arc::new(host);

    let transport = Arc::new(WsTransport::spawn(url));
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let panel = Arc::new(Panel::new(config, dyn_transport, host.clone())?);
    panel.install_observer(Arc::new(|cause| info!("render: {cause:?}")));

    match tokio::time::timeout(START_TIMEOUT, panel.start()).await {
        Ok(Ok(())) => info!("panel ready: {:?}", panel.startup_status()),
        Ok(Err(e)) => warn!("panel start failed: {e}; send {{\"action\":\"reload\"}} to retry"),
        Err(_) => warn!("backend did not answer within {START_TIMEOUT:?}; send {{\"action\":\"reload\"}} to retry"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Input>(line) {
            Ok(Input::Event(event)) => {
                let delivered = host.emit(event);
                if delivered == 0 {
                    warn!("no subscriber for host event");
                }
            }
            Ok(Input::Action(Action::Quit)) => break,
            Ok(Input::Action(action)) => {
                let panel = Arc::clone(&panel);
                tokio::spawn(async move {
                    if let Err(e) = run_action(&panel, action).await {
                        error!("{e:#}");
                    }
                });
            }
            Err(e) => warn!("ignoring input line: {e}"),
        }
    }

    panel.shutdown();
    transport.shutdown();
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<PanelConfig> {
    let mut config = PanelConfig::from_env();
    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(url) = &args.catalog_url {
        config.catalog_url = url.clone();
    }
    if let Some(mode) = &args.catalog {
        config.catalog_mode = CatalogMode::parse(mode)
            .ok_or_else(|| anyhow::anyhow!("unknown catalog mode {mode:?}"))?;
    }
    if let Some(ms) = args.poll_ms.filter(|ms| *ms > 0) {
        config.poll_period = Duration::from_millis(ms);
    }
    if let Some(id) = &args.main_app_id {
        config.main_app_id = id.clone();
    }
    Ok(config)
}

async fn run_action(panel: &Panel, action: Action) -> anyhow::Result<()> {
    match action {
        Action::SelectVariant { id, name } => {
            let switched = panel.variants().select(&VariantInfo { id, name }).await?;
            info!("variant switch: {switched}");
        }
        Action::CreateVariant { name } => panel.variants().create(&name, None).await?,
        Action::Reapply => panel.reapply_settings().await?,
        Action::Defaults => panel.load_defaults().await?,
        Action::Persistent { enabled } => {
            let persistent = panel.set_persistent(enabled).await?;
            info!("persistent: {persistent}");
        }
        Action::Reload => {
            panel.manual_reload().await?;
            info!("reloaded: {:?}", panel.startup_status());
        }
        Action::Upload => {
            if !panel.upload_current_variant().await? {
                warn!("upload skipped, no logged-in user");
            }
        }
        Action::Download { id } => {
            let CatalogView::Results(results) = panel.catalog_view() else {
                anyhow::bail!("no catalog results to download from");
            };
            let meta = results
                .iter()
                .find(|m| m.id == id)
                .with_context(|| format!("catalog entry {id} not in current results"))?;
            let variants = panel.download_catalog_entry(meta).await?;
            info!("downloaded {}; {} variant(s) now", meta.name, variants.len());
        }
        Action::Dump => println!("{}", serde_json::to_string_pretty(&panel.store().snapshot())?),
        Action::Status => {
            let selector = match panel.variants().selector_state() {
                SelectorState::Busy => serde_json::json!("busy"),
                SelectorState::Ready {
                    options,
                    selected,
                    default_label,
                } => serde_json::json!({
                    "options": options,
                    "selected": selected,
                    "label": default_label,
                }),
            };
            let catalog = match panel.catalog_view() {
                CatalogView::Failed => serde_json::json!("failed"),
                CatalogView::Empty => serde_json::json!([]),
                CatalogView::Results(results) => serde_json::json!(results),
            };
            let status = serde_json::json!({
                "startup": format!("{:?}", panel.startup_status()),
                "path": panel.store().get(keys::PATH_GEN),
                "variants": selector,
                "catalog": catalog,
            });
            println!("{status}");
        }
        Action::Quit => {}
    }
    Ok(())
}
