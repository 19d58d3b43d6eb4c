use anyhow::Result;
use rand::Rng;
use siren_action::PluginRegistry;
use siren_server::config::CoreConfig;
use siren_server::state::CoreRuntime;
use siren_server::{seed, workers};
use siren_storage::Stores;
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  siren-server [config.toml]                                        Start the core");
    eprintln!("  siren-server init-assign-groups <config.toml> <seed.json>         Seed assignment groups");
    eprintln!("  siren-server init-action-configs <config.toml> <seed.json>        Seed action configs");
    eprintln!("  siren-server check-plugin-status <config.toml> --plugin-id=GLOB   Report plugin health");
    eprintln!("  siren-server default-calendar-sync <config.toml> list             List calendars");
    eprintln!("  siren-server default-calendar-sync <config.toml> create_calendar \\");
    eprintln!("      --id=N --kind=active|rest                                     Create an empty calendar");
    eprintln!("  siren-server default-calendar-sync <config.toml> create_calendar_item \\");
    eprintln!("      --year=Y --holiday_calendar_id=H --working_calendar_id=W      Generate a year's items");
    eprintln!("  siren-server add-extend-dimensions <config.toml> --bk_data_id=ID \\");
    eprintln!("      --proxy_cluster_id=ID --duration_time=90d                     Register extension dims");
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("--{name}=");
    args.iter()
        .find_map(|arg| arg.strip_prefix(prefix.as_str()))
}

fn required_arg<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("missing {what} argument")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    siren_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("siren=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-assign-groups") => {
            let config_path = required_arg(&args, 2, "<config.toml>")?;
            let seed_path = required_arg(&args, 3, "<seed.json>")?;
            let stores = open_stores(config_path)?;
            let written = seed::init_assign_groups(&stores.config, seed_path)?;
            tracing::info!(written, "assign group seeding finished");
            Ok(())
        }
        Some("init-action-configs") => {
            let config_path = required_arg(&args, 2, "<config.toml>")?;
            let seed_path = required_arg(&args, 3, "<seed.json>")?;
            let stores = open_stores(config_path)?;
            let written = seed::init_action_configs(&stores.config, seed_path)?;
            tracing::info!(written, "action config seeding finished");
            Ok(())
        }
        Some("check-plugin-status") => {
            let config_path = required_arg(&args, 2, "<config.toml>")?;
            let pattern = flag_value(&args, "plugin-id").ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("check-plugin-status requires --plugin-id=GLOB")
            })?;
            run_check_plugin_status(config_path, pattern)
        }
        Some("default-calendar-sync") => {
            let config_path = required_arg(&args, 2, "<config.toml>")?;
            let verb = required_arg(&args, 3, "list|create_calendar|create_calendar_item")?;
            run_calendar_sync(config_path, verb, &args)
        }
        Some("add-extend-dimensions") => {
            let config_path = required_arg(&args, 2, "<config.toml>")?;
            run_add_extend_dimensions(config_path, &args)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/siren.toml");
            run_server(config_path).await
        }
    }
}

fn open_stores(config_path: &str) -> Result<Stores> {
    let config = CoreConfig::load(config_path)?;
    std::fs::create_dir_all(&config.data_dir)?;
    Ok(Stores::open(Path::new(&config.data_dir))?)
}

/// Reports registration, config and store reachability for the plugins
/// matching the glob. Exits non-zero when anything is amiss.
fn run_check_plugin_status(config_path: &str, pattern: &str) -> Result<()> {
    let config = CoreConfig::load(config_path)?;
    let registry = PluginRegistry::with_builtins();
    let mut kinds: Vec<&str> = registry
        .kinds()
        .into_iter()
        .filter(|kind| glob_match::glob_match(pattern, kind))
        .collect();
    kinds.sort_unstable();
    if kinds.is_empty() {
        anyhow::bail!("no registered plugin matches '{pattern}'");
    }

    let stores = Stores::open(Path::new(&config.data_dir))
        .map_err(|e| anyhow::anyhow!("store at '{}' unreachable: {e}", config.data_dir))?;
    let configs = stores.config.list_action_configs()?;

    let mut all_green = true;
    for kind in kinds {
        let config_count = configs.iter().filter(|c| c.plugin_id == kind).count();
        let green = config_count > 0;
        all_green &= green;
        println!(
            "{kind}: registered=yes configs={config_count} store=ok {}",
            if green { "OK" } else { "NO-CONFIGS" }
        );
    }
    if !all_green {
        anyhow::bail!("one or more plugins have no action configs");
    }
    Ok(())
}

fn run_calendar_sync(config_path: &str, verb: &str, args: &[String]) -> Result<()> {
    let stores = open_stores(config_path)?;
    match verb {
        "list" => {
            for row in stores.config.calendars()? {
                let items: Vec<serde_json::Value> =
                    serde_json::from_str(&row.items_json).unwrap_or_default();
                println!("calendar {} kind={} items={}", row.id, row.kind, items.len());
            }
            Ok(())
        }
        "create_calendar" => {
            let id: i64 = flag_value(args, "id")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("create_calendar requires --id=N"))?;
            let kind = flag_value(args, "kind").unwrap_or("active");
            if kind != "active" && kind != "rest" {
                anyhow::bail!("--kind must be 'active' or 'rest', got '{kind}'");
            }
            stores.config.upsert_calendar(&siren_storage::config_store::CalendarRow {
                id,
                kind: kind.to_string(),
                items_json: "[]".to_string(),
            })?;
            tracing::info!(calendar_id = id, kind, "calendar created");
            Ok(())
        }
        "create_calendar_item" => {
            let year: i32 = flag_value(args, "year")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("create_calendar_item requires --year=Y"))?;
            let holiday_id: i64 = flag_value(args, "holiday_calendar_id")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("--holiday_calendar_id=H is required"))?;
            let working_id: i64 = flag_value(args, "working_calendar_id")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("--working_calendar_id=W is required"))?;
            let (rest, active) =
                seed::sync_year_calendars(&stores.config, year, holiday_id, working_id)?;
            tracing::info!(year, rest, active, "calendar items generated");
            Ok(())
        }
        other => {
            print_usage();
            anyhow::bail!("unknown default-calendar-sync verb '{other}'")
        }
    }
}

/// Registers extension dimensions for a data source. The core consumes
/// these when the access stage enriches raw records; the registration
/// itself lives in a JSON file next to the store.
fn run_add_extend_dimensions(config_path: &str, args: &[String]) -> Result<()> {
    let config = CoreConfig::load(config_path)?;
    let bk_data_id: i64 = flag_value(args, "bk_data_id")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("add-extend-dimensions requires --bk_data_id=ID"))?;
    let proxy_cluster_id: i64 = flag_value(args, "proxy_cluster_id")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("--proxy_cluster_id=ID is required"))?;
    let duration_secs = parse_duration_secs(flag_value(args, "duration_time").unwrap_or("90d"))
        .ok_or_else(|| anyhow::anyhow!("--duration_time accepts e.g. 90d, 12h, 30m or seconds"))?;

    std::fs::create_dir_all(&config.data_dir)?;
    let path = Path::new(&config.data_dir).join("extend_dimensions.json");
    let mut entries: Vec<serde_json::Value> = match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    entries.retain(|e| e.get("bk_data_id").and_then(|v| v.as_i64()) != Some(bk_data_id));
    entries.push(serde_json::json!({
        "bk_data_id": bk_data_id,
        "proxy_cluster_id": proxy_cluster_id,
        "duration_secs": duration_secs,
        "created_at": chrono::Utc::now().timestamp(),
    }));
    std::fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
    tracing::info!(bk_data_id, proxy_cluster_id, duration_secs, "extension dimensions registered");
    Ok(())
}

fn parse_duration_secs(value: &str) -> Option<i64> {
    if let Ok(secs) = value.parse::<i64>() {
        return (secs > 0).then_some(secs);
    }
    let (number, unit) = value.split_at(value.len().checked_sub(1)?);
    let number: i64 = number.parse().ok()?;
    if number <= 0 {
        return None;
    }
    match unit {
        "d" => Some(number * 86_400),
        "h" => Some(number * 3_600),
        "m" => Some(number * 60),
        "s" => Some(number),
        _ => None,
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let mut config = CoreConfig::load(config_path)?;
    if config.signature_secret.is_empty() {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        config.signature_secret = hex::encode(bytes);
        tracing::warn!(
            "No signature_secret configured. A random secret was generated and will change on restart. Set signature_secret in config for production use."
        );
    }

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        detect_workers = config.detect_workers,
        "siren core starting"
    );

    let runtime = CoreRuntime::build(config)?;

    // instances stranded in RUNNING by a crash go back on the queue
    let requeued = runtime.actions.requeue_interrupted()?;
    if requeued > 0 {
        tracing::info!(requeued, "interrupted action instances requeued");
    }

    let handles = workers::spawn_all(runtime.clone());

    let http_addr: SocketAddr = format!("0.0.0.0:{}", runtime.config.http_port).parse()?;
    let app = siren_server::callback::router(runtime.clone());
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "siren core started");

    tokio::select! {
        result = axum::serve(listener, app)
            .with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) =>
        {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    for handle in handles {
        handle.abort();
    }
    runtime.selfmon.flush();
    tracing::info!("Core stopped");

    Ok(())
}
