//! Thin ambient process runner.
//!
//! This module is explicitly *not* a CLI or config loader — those stay out
//! of scope (see the crate's top-level docs). It only wires a root
//! [`Context`] to [`start_component`] and a process shutdown signal, the way
//! a binary built on this crate is expected to. Grounded on
//! `r2e_core::builder::AppBuilder::run`'s own `shutdown_signal` /
//! `tokio::select!` pattern.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::component::PluginContainer;
use crate::context::Context;
use crate::error::{ApplicationExit, OrchestratorError, TeardownError};
use crate::orchestrator::start_component;

/// How the component tree stopped running.
#[derive(Debug)]
pub enum RunOutcome {
    /// The process shutdown signal fired after a clean startup. Carries
    /// whatever [`Context::close`] returned while tearing the root context
    /// down.
    ShutdownSignal(Result<(), TeardownError>),
    /// A component raised [`ApplicationExit`] during startup, requesting an
    /// ordered exit instead of reporting a failure. The root context is
    /// still torn down before this variant is returned.
    Exit(ApplicationExit),
}

/// Installs a default `tracing_subscriber` fmt layer if no global subscriber
/// is set yet. Best-effort: a binary that already configured its own
/// subscriber is left untouched.
pub fn init_default_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Creates a root [`Context`], builds and starts the component tree rooted
/// at `root_type`, then waits for a shutdown signal (Ctrl-C, or SIGTERM on
/// Unix) before closing the root context in reverse registration order.
///
/// If a component raises [`ApplicationExit`] during startup, this function
/// tears the root context down immediately and returns
/// [`RunOutcome::Exit`] instead of waiting for the shutdown signal. Any
/// other startup failure is returned unwrapped — the caller decides how to
/// report it; the root context is left open in that case since it never
/// finished starting (there is nothing well-defined to tear down).
pub async fn run_application(
    plugins: &PluginContainer,
    root_type: &str,
    config: Value,
    startup_timeout: Duration,
) -> Result<RunOutcome, OrchestratorError> {
    let ctx = Context::new();

    match start_component(&ctx, plugins, root_type, config, startup_timeout).await {
        Ok(()) => {}
        Err(OrchestratorError::Exit(exit)) => {
            info!(code = exit.code, "component requested an ordered exit during startup");
            if let Err(e) = ctx.close(None).await {
                warn!(error = %e, "teardown after ApplicationExit reported failures");
            }
            return Ok(RunOutcome::Exit(exit));
        }
        Err(err) => return Err(err),
    }

    info!("component tree started; waiting for shutdown signal");
    shutdown_signal().await;
    info!("shutdown signal received; closing root context");

    let result = ctx.close(None).await;
    if let Err(ref e) = result {
        warn!(error = %e, "one or more teardown callbacks failed");
    }
    Ok(RunOutcome::ShutdownSignal(result))
}

/// Resolves once Ctrl-C, or (on Unix) SIGTERM, is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
