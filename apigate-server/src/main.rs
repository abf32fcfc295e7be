use apigate_admin::server::{AdminServer, AppState};
use apigate_core::clock::{Clock, SystemClock};
use apigate_core::config::GatewayConfig;
use apigate_core::crypto::DeploymentKey;
use apigate_core::router::Router;
use apigate_hooks::{EventBus, EventBusConfig, FunctionRegistry, HookDispatcher};
use apigate_modules::{Module, ModuleRuntime};
use apigate_observability::{AnalyticsSubscriber, MetricsCollector};
use apigate_proxy::{Orchestrator, OrchestratorConfig, RecorderConfig, UpstreamClients, UsageRecorder};
use apigate_ratelimit::{QuotaChecker, RateLimiter};
use apigate_store::cache::ConfigCache;
use apigate_store::{ConfigHolder, SqliteStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Checked by the signal handler; the wait loop below polls it instead of
/// blocking a thread, since the whole process is now one tokio runtime.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static RELOAD: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "apigate", version, about = "APIGate — self-hosted API gateway")]
struct Cli {
    /// Path to configuration file (overrides `APIGATE_CONFIG`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level fallback when `RUST_LOG` is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory of declarative module YAML definitions
    #[arg(long, default_value = "modules")]
    modules_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the proxy and admin planes
    Serve,
    /// Module registry operations
    Modules {
        #[command(subcommand)]
        action: ModulesCommand,
    },
    /// `<module-plural> <action> [--field=value…]`, dispatched through the
    /// generic module runtime exactly as the HTTP channel would.
    #[command(external_subcommand)]
    Module(Vec<String>),
}

#[derive(Subcommand, Debug)]
enum ModulesCommand {
    /// List every loaded module's name
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    match runtime.block_on(run(cli)) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "apigate exited with an error");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "APIGate starting");

    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let config = match GatewayConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to parse configuration");
            std::process::exit(2);
        }
    };

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("apigate.db");
    let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let store = Arc::new(SqliteStore::connect(&database_url).await?);

    let events = Arc::new(EventBus::new(tokio::runtime::Handle::current(), EventBusConfig::default()));
    let analytics = Arc::new(AnalyticsSubscriber::new());
    events.subscribe("analytics", analytics.clone());

    let module_runtime = Arc::new(
        ModuleRuntime::new(
            &database_url,
            Arc::new(HookDispatcher::new()),
            Arc::new(FunctionRegistry::new()),
            events.clone(),
        )
        .await?,
    );
    load_modules(&module_runtime, &cli.modules_dir).await;

    match cli.command {
        Command::Serve => serve(config, store, module_runtime, events, analytics).await?,
        Command::Modules { action: ModulesCommand::List } => {
            for name in module_runtime.module_names() {
                println!("{name}");
            }
        }
        Command::Module(args) => run_module_cli(&module_runtime, &args).await?,
    }

    Ok(())
}

/// Loads every `*.yaml`/`*.yml` file in `dir` as a module definition (§4.8,
/// §6). A missing directory is not an error — a deployment may run with no
/// custom modules loaded yet.
async fn load_modules(runtime: &ModuleRuntime, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not read modules directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if !is_yaml {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|yaml| Module::from_yaml(&yaml));
        match parsed {
            Ok(module) => {
                let name = module.name.clone();
                if let Err(e) = runtime.load_module(module).await {
                    error!(module = %name, error = %e, "failed to load module");
                } else {
                    info!(module = %name, path = %path.display(), "module loaded");
                }
            }
            Err(e) => error!(path = %path.display(), error = %e, "failed to parse module definition"),
        }
    }
}

async fn run_module_cli(runtime: &ModuleRuntime, args: &[String]) -> anyhow::Result<()> {
    let Some((module_plural, rest)) = args.split_first() else {
        anyhow::bail!("usage: apigate <module-plural> <action> [--field=value…]");
    };
    let Some((action, field_args)) = rest.split_first() else {
        anyhow::bail!("usage: apigate <module-plural> <action> [--field=value…]");
    };

    let result = apigate_modules::channel_cli::run(runtime, module_plural, action, field_args).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn serve(
    config: GatewayConfig,
    store: Arc<SqliteStore>,
    module_runtime: Arc<ModuleRuntime>,
    events: Arc<EventBus>,
    analytics: Arc<AnalyticsSubscriber>,
) -> anyhow::Result<()> {
    let cache = ConfigCache::new();
    let router = Arc::new(Router::new());
    let config_holder = Arc::new(ConfigHolder::new(
        router.clone(),
        cache.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    ));
    config_holder.reload().await?;

    let deployment_key = match &config.server.deployment_key_base64 {
        Some(encoded) => {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
            Some(Arc::new(DeploymentKey::new(&bytes)?))
        }
        None => None,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rate_limiter = Arc::new(RateLimiter::new(
        clock.clone(),
        Duration::from_secs(config.rate_limit.bucket_idle_ttl_secs),
    ));
    let quota_checker = Arc::new(QuotaChecker::new(clock.clone(), config.plans.overage_enabled));
    let recorder = Arc::new(UsageRecorder::spawn(
        store.clone(),
        RecorderConfig {
            batch_size: config.usage.batch_size,
            flush_interval: Duration::from_secs(config.usage.flush_interval_secs),
            bounded_capacity: config.usage.bounded_capacity,
            close_deadline: Duration::from_secs(config.usage.close_deadline_secs),
        },
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        router.clone(),
        cache.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        rate_limiter,
        quota_checker,
        store.clone(),
        Arc::new(UpstreamClients::new()),
        recorder.clone(),
        events.clone(),
        deployment_key,
        clock,
        OrchestratorConfig {
            api_key_header: config.auth.api_key_header.clone(),
            default_burst_tokens: config.rate_limit.burst_tokens,
        },
    ));

    let admin_state = AppState {
        config_holder: config_holder.clone(),
        module_runtime,
        metrics: Arc::new(MetricsCollector::default()),
        analytics,
        events,
        admin_token: std::env::var("APIGATE_ADMIN_TOKEN").ok(),
    };
    let admin = AdminServer::new(config.endpoints.clone(), admin_state);

    setup_signal_handlers();
    spawn_reload_watch(&config, config_holder.clone());
    let reload_poll = tokio::spawn(poll_reload_signal(config_holder));

    let proxy_addr = config.server.http_addr;
    info!(%proxy_addr, admin_addr = %config.endpoints.admin_addr, "APIGate is ready — serving traffic");

    let proxy_task = tokio::spawn(async move { apigate_proxy::serve(proxy_addr, orchestrator).await });
    let admin_task = tokio::spawn(async move { admin.start().await });

    wait_for_shutdown().await;
    info!("shutdown signal received, flushing usage recorder");
    recorder.flush().await;
    reload_poll.abort();
    proxy_task.abort();
    admin_task.abort();

    info!("APIGate stopped");
    Ok(())
}

/// Watches the loaded config file's mtime (when one was used) and folds
/// changes into the same `ConfigHolder::reload()` call SIGHUP and the admin
/// endpoint use (§4.12).
fn spawn_reload_watch(config: &GatewayConfig, holder: Arc<ConfigHolder>) {
    let candidate = std::env::var("APIGATE_CONFIG").unwrap_or_else(|_| "apigate.yaml".to_string());
    if !Path::new(&candidate).exists() {
        return;
    }
    let watcher = apigate_store::FileWatcher::new(
        candidate,
        Duration::from_secs(config.server.config_reload_interval_secs),
    );
    let notify = watcher.notifier();
    // The sender is held inside this task for its lifetime: dropping it
    // would make every `shutdown.changed()` poll resolve immediately and
    // spin the watcher's select loop with no actual sleep.
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(watcher.run(rx));
    tokio::spawn(async move {
        let _tx = tx;
        loop {
            notify.notified().await;
            if let Err(e) = holder.reload().await {
                error!(error = %e, "config reload from file watch failed");
            }
        }
    });
}

async fn poll_reload_signal(holder: Arc<ConfigHolder>) {
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if RELOAD.swap(false, Ordering::Relaxed) {
            if let Err(e) = holder.reload().await {
                error!(error = %e, "config reload from SIGHUP failed");
            }
        }
    }
}

async fn wait_for_shutdown() {
    while !SHUTDOWN.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Traps SIGTERM/SIGINT (shutdown) and SIGHUP (reload), extending the
/// teacher's `libc::signal` handler (§4.12, §6).
fn setup_signal_handlers() {
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, shutdown_handler as libc::sighandler_t);
        }
    }
    unsafe {
        libc::signal(libc::SIGHUP, reload_handler as libc::sighandler_t);
    }
}

extern "C" fn shutdown_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

extern "C" fn reload_handler(_sig: libc::c_int) {
    RELOAD.store(true, Ordering::Relaxed);
}
