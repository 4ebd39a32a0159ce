//! `listkeeper` — moderation list daemon binary: CLI front end,
//! startup wiring, and the three one-shot subcommands.

mod bootstrap;
mod cli;
mod loaders;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lk_api::ApiClient;
use lk_cache::Cache;
use lk_domain::{Did, RuntimeConfig};
use lk_registry::MembershipApi as _;
use lk_pipeline::queues::{listadd_queue, query_queue, schedule_queue, shared};
use lk_pipeline::SchedulerConfig;
use lk_supervisor::{QueueHandles, Supervisor, SupervisorConfig, WorkerPool};
use tokio_util::sync::CancellationToken;

use cli::{init_tracing, load_config, Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Run {
            config,
            cache,
            expire_cache,
            no_expire_cache,
            verbose,
        } => {
            init_tracing(verbose);
            run(config, cache, expire_cache, no_expire_cache).await
        }
        Command::RemoveUser { user, list, config } => {
            init_tracing(false);
            remove_user(config, &user, &list).await
        }
        Command::DeleteList { list, config } => {
            init_tracing(false);
            delete_list(config, &list).await
        }
    };

    std::process::exit(exit_code);
}

async fn run(
    config_path: Option<PathBuf>,
    cache_override: Option<PathBuf>,
    expire_cache_flag: bool,
    no_expire_cache_flag: bool,
) -> i32 {
    let mut config = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "startup: failed to load config");
            return 1;
        }
    };
    if let Some(path) = cache_override {
        config.cache_path = path.to_string_lossy().into_owned();
    }
    if expire_cache_flag {
        config.expire_cache = true;
    }
    if no_expire_cache_flag {
        config.expire_cache = false;
    }

    let issues = config.validate();
    for issue in &issues {
        if issue.severity == lk_domain::config::ConfigSeverity::Error {
            tracing::error!("{}", issue);
        } else {
            tracing::warn!("{}", issue);
        }
    }
    if RuntimeConfig::has_errors(&issues) {
        tracing::error!("startup: configuration invalid, refusing to start");
        return 1;
    }

    let credentials = match loaders::load_credentials(std::path::Path::new(&config.credentials_path)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "startup: failed to load credentials");
            return 1;
        }
    };

    let cache = match Cache::open(&config.cache_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "startup: failed to open cache");
            return 1;
        }
    };
    let gz_path = format!("{}.json.gz", config.cache_path.trim_end_matches(".db"));
    match cache.import_gzipped_json(&gz_path) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "startup: imported bootstrap cache entries"),
        Err(e) => tracing::warn!(error = %e, "startup: bootstrap cache import failed"),
    }

    let bootstrap_api = match ApiClient::new(config.api_host.clone(), Some(credentials.clone())) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "startup: failed to build bootstrap API client");
            return 1;
        }
    };
    let bootstrap::BootstrapOutput {
        registry,
        rules,
        word_lists,
        seed_dids,
    } = match bootstrap::bootstrap(&config, &bootstrap_api).await {
        Ok(out) => out,
        Err(e) => {
            tracing::error!(error = %e, "startup: bootstrap failed");
            return 1;
        }
    };

    let (schedule_tx, schedule_rx) = schedule_queue();
    let (query_tx, query_rx) = query_queue();
    let (listadd_tx, listadd_rx) = listadd_queue();
    let schedule_rx = shared(schedule_rx);
    let query_rx = shared(query_rx);
    let listadd_rx = shared(listadd_rx);

    for did in seed_dids {
        let _ = schedule_tx.send(did);
    }
    if config.expire_cache {
        for did in cache.scan() {
            let _ = schedule_tx.send(did);
        }
    }

    let shutdown = CancellationToken::new();

    let host = config.api_host.clone();
    let creds = credentials.clone();
    let scheduler_config = Arc::new(SchedulerConfig {
        cache_life: std::time::Duration::from_secs(config.cache_hours * 3600),
        expire_enabled: config.expire_cache,
    });

    let scheduler_pool = {
        let schedule_rx = schedule_rx.clone();
        let cache = cache.clone();
        let query_tx = query_tx.clone();
        let listadd_tx = listadd_tx.clone();
        let scheduler_config = scheduler_config.clone();
        let shutdown = shutdown.clone();
        WorkerPool::new("scheduler", config.num_schedulers, move |slot| {
            let schedule_rx = schedule_rx.clone();
            let cache = cache.clone();
            let query_tx = query_tx.clone();
            let listadd_tx = listadd_tx.clone();
            let scheduler_config = scheduler_config.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                lk_pipeline::run_scheduler_worker(
                    slot,
                    schedule_rx,
                    cache,
                    query_tx,
                    listadd_tx,
                    scheduler_config,
                    shutdown,
                )
                .await
            })
        })
    };

    let resolver_pool = {
        let query_rx = query_rx.clone();
        let cache = cache.clone();
        let registry = registry.clone();
        let listadd_tx = listadd_tx.clone();
        let query_tx = query_tx.clone();
        let shutdown = shutdown.clone();
        let host = host.clone();
        let creds = creds.clone();
        let scheduler_config = scheduler_config.clone();
        WorkerPool::new("resolver", config.num_resolvers, move |slot| {
            let query_rx = query_rx.clone();
            let cache = cache.clone();
            let registry = registry.clone();
            let listadd_tx = listadd_tx.clone();
            let query_tx = query_tx.clone();
            let shutdown = shutdown.clone();
            let scheduler_config = scheduler_config.clone();
            let api = Arc::new(
                ApiClient::new(host.clone(), Some(creds.clone()))
                    .expect("resolver worker: building API client"),
            );
            tokio::spawn(async move {
                lk_pipeline::run_resolver_worker(
                    slot, query_rx, cache, registry, api, listadd_tx, query_tx, scheduler_config, shutdown,
                )
                .await
            })
        })
    };

    let reconciler_pool = {
        let listadd_rx = listadd_rx.clone();
        let registry = registry.clone();
        let rules = rules.clone();
        let word_lists = word_lists.clone();
        let shutdown = shutdown.clone();
        let host = host.clone();
        let creds = creds.clone();
        WorkerPool::new("reconciler", config.num_reconcilers, move |slot| {
            let listadd_rx = listadd_rx.clone();
            let registry = registry.clone();
            let rules = rules.clone();
            let word_lists = word_lists.clone();
            let shutdown = shutdown.clone();
            let api = Arc::new(
                ApiClient::new(host.clone(), Some(creds.clone()))
                    .expect("reconciler worker: building API client"),
            );
            tokio::spawn(async move {
                lk_pipeline::run_reconciler_worker(
                    slot, listadd_rx, registry, api, rules, word_lists, shutdown,
                )
                .await
            })
        })
    };

    let (firehose_raw_tx, mut firehose_raw_rx) = tokio::sync::mpsc::unbounded_channel::<Did>();
    let forward_schedule_tx = schedule_tx.clone();
    let forward_shutdown = shutdown.clone();
    let forward_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                item = firehose_raw_rx.recv() => match item {
                    Some(did) => { let _ = forward_schedule_tx.send(did); }
                    None => return,
                },
                _ = forward_shutdown.cancelled() => return,
            }
        }
    });

    let firehose = lk_firehose::FirehoseIngestor::new(config.firehose_host.clone());
    let firehose_shutdown = shutdown.clone();
    let firehose_handle = tokio::spawn(async move {
        firehose.run(firehose_raw_tx, firehose_shutdown).await;
    });

    let supervisor = Supervisor::new(
        vec![scheduler_pool, resolver_pool, reconciler_pool],
        QueueHandles {
            schedule_tx: schedule_tx.clone(),
            query_tx: query_tx.clone(),
            query_rx: query_rx.clone(),
            listadd_tx: listadd_tx.clone(),
        },
        cache.clone(),
        SupervisorConfig {
            health_scan_interval: std::time::Duration::from_secs(config.health_scan_secs),
            telemetry_interval: std::time::Duration::from_secs(config.telemetry_secs),
            compaction_interval: std::time::Duration::from_secs(config.compaction_secs),
            schedule_quiet_threshold: 100,
            compaction_watermark: config.compaction_watermark,
        },
        shutdown.clone(),
    );

    let supervisor_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown: interrupt received");
        supervisor_shutdown.cancel();
    });

    supervisor.run().await;
    let _ = firehose_handle.await;
    let _ = forward_handle.await;
    0
}

async fn remove_user(config_path: Option<PathBuf>, user: &str, list_name: &str) -> i32 {
    let config = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "remove-user: failed to load config");
            return 1;
        }
    };
    let credentials = match loaders::load_credentials(std::path::Path::new(&config.credentials_path)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "remove-user: failed to load credentials");
            return 1;
        }
    };
    let api = match ApiClient::new(config.api_host.clone(), Some(credentials)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "remove-user: failed to build API client");
            return 1;
        }
    };

    let lists = match api.list_my_lists().await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "remove-user: failed to list remote lists");
            return 1;
        }
    };
    let Some((_, uri)) = lists.iter().find(|(name, _)| name == list_name) else {
        tracing::error!(list = list_name, "remove-user: list not found");
        return 2;
    };

    let profile = match api.get_profile(&Did::from(user)).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(user, error = %e, "remove-user: failed to resolve user");
            return 2;
        }
    };

    let members = match api.list_members(uri).await {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "remove-user: failed to list members");
            return 1;
        }
    };
    let Some((_, rkey)) = members.iter().find(|(did, _)| did == &profile.did) else {
        tracing::error!(user, list = list_name, "remove-user: user not present in list");
        return 2;
    };

    match api.delete_member(rkey).await {
        Ok(()) => {
            tracing::info!(user, list = list_name, "remove-user: removed");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "remove-user: delete failed");
            1
        }
    }
}

async fn delete_list(config_path: Option<PathBuf>, list_name: &str) -> i32 {
    let config = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "delete-list: failed to load config");
            return 1;
        }
    };
    let credentials = match loaders::load_credentials(std::path::Path::new(&config.credentials_path)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "delete-list: failed to load credentials");
            return 1;
        }
    };
    let api = match ApiClient::new(config.api_host.clone(), Some(credentials)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "delete-list: failed to build API client");
            return 1;
        }
    };

    let lists = match api.list_my_lists().await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "delete-list: failed to list remote lists");
            return 1;
        }
    };
    let Some((_, uri)) = lists.iter().find(|(name, _)| name == list_name) else {
        tracing::error!(list = list_name, "delete-list: list not found");
        return 2;
    };

    match api.delete_list(uri).await {
        Ok(()) => {
            tracing::info!(list = list_name, "delete-list: deleted");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "delete-list: delete failed");
            1
        }
    }
}
