/*
 * Kubeflow Workloads - Notebook test driver for Kubeflow deployments
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! kubeflow-workloads - run the notebook test battery against a Kubeflow cluster
//!
//! Exit codes: 0 when the tests pass, 1 when they fail or setup fails,
//! 2 when the Job does not finish before the deadline.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kubeflow_workloads::{KubeCluster, RunConfig, Suite};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run Kubeflow notebook tests as a Kubernetes Job
#[derive(Parser)]
#[command(name = "kubeflow-workloads")]
#[command(about = "Run Kubeflow notebook tests as a Kubernetes Job")]
#[command(version)]
struct Cli {
    /// YAML run configuration; flags below override its values
    #[arg(long, env = "KUBEFLOW_WORKLOADS_CONFIG")]
    config: Option<PathBuf>,

    /// Env file whose entries are loaded into a ConfigMap for the Job
    #[arg(long)]
    env: Option<PathBuf>,

    /// Only run notebook tests matching this pytest -k expression
    #[arg(long)]
    filter: Option<String>,

    /// Profile (and namespace) to create for the run
    #[arg(long)]
    namespace: Option<String>,

    /// Container image running the notebook tests
    #[arg(long)]
    image: Option<String>,

    /// Directory with the notebook tests, mounted into the Job
    #[arg(long)]
    tests_dir: Option<PathBuf>,

    /// Directory with the Profile and Job templates
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// Maximum seconds to wait for the Job to finish
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Seconds between Job status polls
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json_report: bool,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(env) = &self.env {
            config.env_file = Some(env.clone());
        }
        if let Some(filter) = &self.filter {
            config.filter = Some(filter.clone());
        }
        if let Some(namespace) = &self.namespace {
            config.namespace.clone_from(namespace);
        }
        if let Some(image) = &self.image {
            config.tests_image.clone_from(image);
        }
        if let Some(dir) = &self.tests_dir {
            config.tests_dir.clone_from(dir);
        }
        if let Some(dir) = &self.assets_dir {
            config.assets_dir.clone_from(dir);
        }
        if let Some(secs) = self.timeout_secs {
            config.wait.job_timeout_seconds = secs;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.wait.poll_interval_seconds = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kubeflow_workloads=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(
        "Starting kubeflow-workloads v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = cli.run_config().context("Invalid run configuration")?;
    let cluster = KubeCluster::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let suite = Suite::new(&cluster, config);
    match suite.run().await {
        Ok(report) => {
            if cli.json_report {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            info!(
                namespace = %report.namespace,
                outcome = %report.workload.outcome,
                "Run finished"
            );
            Ok(ExitCode::from(report.exit_code()))
        }
        Err(e) => {
            let config = suite.config();
            error!(
                namespace = %config.namespace,
                job = %config.job_name,
                error = %e,
                "Run aborted"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
