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

//! Kubeflow workloads driver
//!
//! Provisions a Kubeflow Profile, optionally seeds a ConfigMap from an env
//! file, runs the notebook test battery as a Kubernetes Job, collects its
//! logs and tears everything down again.

pub mod cluster;
pub mod config;
pub mod configmap;
pub mod error;
pub mod probe;
pub mod profile;
pub mod suite;
pub mod templates;
pub mod workload;

// Re-export commonly used types
pub use cluster::{Cluster, KubeCluster, PodLog, ResourceKey};
pub use config::RunConfig;
pub use error::{Error, Result};
pub use probe::Probe;
pub use suite::{Suite, SuiteReport};
pub use workload::{
    TerminalStatus, WorkloadCoordinator, WorkloadHandle, WorkloadOutcome, WorkloadReport,
    WorkloadStatus,
};
