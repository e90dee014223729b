//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kubectl-image")]
#[command(about = "Moves container images between a cluster image service and local storage")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Only print errors"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pulls current image version
    #[command(after_help = PULL_EXAMPLES)]
    Pull(PullArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PullArgs {
    /// Image to pull
    #[arg(value_name = "SERVER:PORT/NAMESPACE/NAME")]
    pub coordinate: String,

    #[arg(long = "insecure", help = "don't verify certificate when connecting")]
    pub insecure: bool,

    #[arg(long = "kubeconfig", value_name = "PATH", help = "Path to the kubeconfig file")]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long = "store-dir", value_name = "PATH", help = "Local image store directory")]
    pub store_dir: Option<PathBuf>,

    #[arg(long = "tmp-dir", value_name = "PATH", help = "Directory for in-flight transfers")]
    pub tmp_dir: Option<PathBuf>,

    #[arg(long = "timeout", value_name = "SECS", help = "Connect timeout in seconds")]
    pub timeout: Option<u64>,
}

const PULL_EXAMPLES: &str = "\
Examples:
  # Pull the current version of team-a/app
  kubectl image pull imgctrl.shipwright.svc:8083/team-a/app

  # Skip certificate validation against a self-signed service
  kubectl image pull --insecure 10.0.0.10:8083/team-a/app";
