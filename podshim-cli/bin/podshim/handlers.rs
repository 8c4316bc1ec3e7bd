use std::{path::PathBuf, sync::Arc};

use podshim_cli::{AnsiStyles, PodshimArgs, PodshimCliResult};
use podshim_core::{
    config::RuntimeConfig,
    management::PodSandboxService,
    models::{ContainerState, SandboxState},
    network::CniPlugin,
    runtime::ProcessTaskService,
    store::{ContainerStore, SandboxStore, StateFile},
};
use podshim_utils::{CHECKMARK, CROSS};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const SHORT_ID_LEN: usize = 12;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub fn log_level(args: &PodshimArgs) {
    let level = if args.trace {
        Some("trace")
    } else if args.debug {
        Some("debug")
    } else if args.info {
        Some("info")
    } else if args.warn {
        Some("warn")
    } else if args.error {
        Some("error")
    } else {
        None
    };

    // Set RUST_LOG environment variable only if a level is specified
    if let Some(level) = level {
        std::env::set_var(
            "RUST_LOG",
            format!("podshim={},podshim_core={}", level, level),
        );
    }
}

pub async fn stop_subcommand(config_path: Option<PathBuf>, id: String) -> PodshimCliResult<()> {
    let config = RuntimeConfig::load(config_path.as_deref()).await?;
    let state_path = config.state_file_path();
    let (sandbox_store, container_store) = StateFile::load(&state_path).await?.into_stores().await?;

    let task_service = Arc::new(ProcessTaskService::new());
    register_tasks(&task_service, &sandbox_store, &container_store).await;

    let mut service = PodSandboxService::new(
        config.clone(),
        Arc::new(sandbox_store),
        Arc::new(container_store),
        task_service,
    );
    if let Some(network) = config.get_network() {
        service = service.with_network_plugin(Arc::new(CniPlugin::new(network.clone())));
    }

    service.recover().await?;

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling stop");
            interrupt.cancel();
        }
    });

    let result = service.stop_pod_sandbox(&ctx, &id).await;
    service.shutdown();

    // Whatever got done is persisted, so a retry picks up from there.
    StateFile::from_stores(service.sandbox_store(), service.container_store())
        .await
        .save(&state_path)
        .await?;

    match result {
        Ok(()) => {
            println!("{} stopped sandbox {}", &*CHECKMARK, id.literal());
            Ok(())
        }
        Err(e) => {
            println!("{} failed to stop sandbox {}", &*CROSS, id.literal());
            Err(e.into())
        }
    }
}

pub async fn status_subcommand(config_path: Option<PathBuf>) -> PodshimCliResult<()> {
    let config = RuntimeConfig::load(config_path.as_deref()).await?;
    let state = StateFile::load(config.state_file_path()).await?;

    if state.sandboxes.is_empty() {
        println!("no sandboxes");
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<14}{:<24}{:<18}{:>8}", "ID", "NAME", "STATE", "PID").header()
    );
    for sandbox in &state.sandboxes {
        println!(
            "{:<14}{:<24}{:<18}{:>8}",
            short_id(&sandbox.id),
            sandbox.name,
            sandbox.status.state.to_string(),
            sandbox.status.pid
        );

        for container in state
            .containers
            .iter()
            .filter(|container| container.sandbox_id == sandbox.id)
        {
            println!(
                "  {:<12}{:<24}{:<18}{:>8}",
                short_id(&container.id),
                container.name,
                format!("{:?}", container.status.state),
                container.status.pid
            );
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn register_tasks(
    task_service: &ProcessTaskService,
    sandbox_store: &SandboxStore,
    container_store: &ContainerStore,
) {
    for sandbox in sandbox_store.list().await {
        let status = sandbox.status().await;
        if status.state != SandboxState::NotReady && status.pid != 0 {
            task_service.register(sandbox.id(), status.pid).await;
        }
    }

    for container in container_store.list().await {
        let status = container.status().await;
        if matches!(
            status.state,
            ContainerState::Running | ContainerState::Unknown
        ) && status.pid != 0
        {
            task_service.register(container.id(), status.pid).await;
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}
