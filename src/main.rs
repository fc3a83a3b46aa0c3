use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use netdiag::{
    checks::CheckSettings,
    cli::Cli,
    config::Config,
    k8s::K8sClient,
    orchestrator::{Orchestrator, EXIT_SETUP_FAILURE},
    registry::TestRegistry,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Tracing is configured from the loaded config, so this failure can only go to stderr
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {e}");
            std::process::exit(EXIT_SETUP_FAILURE);
        }
    };
    init_tracing(config.json_logs());

    let code = match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Diagnostic run aborted");
            eprintln!("Error: {e:#}");
            EXIT_SETUP_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<i32> {
    let registry = Arc::new(TestRegistry::builtin()?);
    if cli.list_tests {
        print_catalogue(&registry);
        return Ok(0);
    }

    let options = cli.run_options(config.results_dir.clone());
    let client = K8sClient::new(options.kubeconfig.as_deref())
        .await
        .context("failed to create Kubernetes client")?
        .with_exec_timeout(config.exec_timeout());
    tracing::info!(namespace = %cli.namespace, "Connected to Kubernetes");

    // Ctrl-C stops the run before the next test starts
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(client),
        registry,
        CheckSettings::from(&config),
        cancel,
    );
    let outcome = orchestrator.run(&options).await?;

    println!("{}", outcome.render(cli.verbose));
    Ok(outcome.exit_code(cli.fail_on_test_failure))
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    );

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_catalogue(registry: &TestRegistry) {
    println!("Tests:");
    for id in registry.ids() {
        if let Some(entry) = registry.get(&id) {
            println!("  {:<16} {}", id, entry.display_name);
        }
    }
    println!("Groups:");
    for name in registry.group_names() {
        let members = registry.group(name).unwrap_or_default();
        println!("  {:<16} {}", name, members.join(", "));
    }
    println!("Default: {}", registry.default_ids().join(", "));
}
