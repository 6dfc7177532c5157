use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{Manifest, OperatorConfig};

#[derive(Parser, Debug)]
#[command(name = "oot-operator")]
#[command(
    about = "Deploy out-of-tree kernel modules, building and signing driver images per kernel"
)]
#[command(version)]
pub struct Args {
    /// Path to the operator configuration file (YAML)
    #[arg(short, long, env = "OOT_OPERATOR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Manifest files (multi-document YAML of Targets, Nodes, Secrets) to seed the store with
    #[arg(short, long = "manifest", value_name = "FILE")]
    pub manifests: Vec<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: validate config and manifests, print a summary and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Override the control plane bind address
    #[arg(long, env = "OOT_OPERATOR_BIND_ADDR", value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Override the control plane port
    #[arg(short, long, env = "OOT_OPERATOR_PORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the node label holding the kernel version
    #[arg(long, env = "OOT_OPERATOR_KERNEL_LABEL", value_name = "LABEL")]
    pub kernel_label: Option<String>,

    /// Override the number of concurrent reconcile passes
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Path to a .env file
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

impl Args {
    /// Command-line values win over file values
    pub fn apply_overrides(&self, config: &mut OperatorConfig) {
        if let Some(ref addr) = self.bind_addr {
            config.control_plane.bind_addr = addr.clone();
        }
        if let Some(port) = self.port {
            config.control_plane.port = port;
        }
        if let Some(ref label) = self.kernel_label {
            config.kernel_label = label.clone();
        }
        if let Some(workers) = self.workers {
            config.orchestrator.workers = workers;
        }
    }
}

// ============================================================================
// Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format a dry-run summary of the effective configuration and manifests
pub fn format_dry_run(config: &OperatorConfig, manifests: &[Manifest]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "oot-operator v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    output.push_str("Configuration:\n");
    output.push_str(&format!("  Kernel label:  {}\n", config.kernel_label));
    output.push_str(&format!("  Builder image: {}\n", config.builder_image));
    output.push_str(&format!("  Signer image:  {}\n", config.signer_image));
    output.push_str(&format!(
        "  Control plane: {}:{}\n",
        config.control_plane.bind_addr, config.control_plane.port
    ));
    output.push_str(&format!(
        "  Workers:       {}\n\n",
        config.orchestrator.workers
    ));

    output.push_str(&format!("Manifests ({}):\n", manifests.len()));
    for manifest in manifests {
        match manifest {
            Manifest::Target(target) => {
                output.push_str(&format!(
                    "  - Target {}/{} ({} kernel mapping(s){}{})\n",
                    target.namespace(),
                    target.name(),
                    target.spec.kernel_mappings.len(),
                    if target.spec.build.is_some() { ", build" } else { "" },
                    if target.spec.sign.is_some() { ", sign" } else { "" },
                ));
            }
            Manifest::Node(node) => {
                let kernel = node
                    .kernel_version(&config.kernel_label)
                    .unwrap_or("<no kernel label>");
                output.push_str(&format!("  - Node {} [{}]\n", node.name(), kernel));
            }
            Manifest::Secret(secret) => {
                output.push_str(&format!(
                    "  - Secret {}\n",
                    secret.metadata.qualified_name()
                ));
            }
        }
    }

    output
}
