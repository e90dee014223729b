//! Command runner wiring parsed arguments to the pull pipeline

use crate::cli::args::{Args, Command, PullArgs};
use crate::cli::config::AppConfig;
use crate::config::KubeconfigProvider;
use crate::error::Result;
use crate::image::policy::InsecureAcceptAnything;
use crate::image::store::LocalImageStore;
use crate::logging::Logger;
use crate::pipeline::Pipeline;
use crate::transfer::channel::SecureChannelFactory;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        Self { args, output }
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        match &self.args.command {
            Command::Pull(pull) => self.pull(pull, &cancel).await,
        }
    }

    async fn pull(&self, args: &PullArgs, cancel: &CancellationToken) -> Result<()> {
        let config = AppConfig::from_env().merge(&AppConfig::from_pull_args(args, self.args.verbose));
        config.validate()?;

        // the environment may ask for verbosity the flags did not
        let output = if self.args.quiet || !config.verbose {
            self.output.clone()
        } else {
            Logger::new(true)
        };

        output.section("kubectl image pull");
        output.summary_kv(
            "Configuration",
            &[
                ("Store", config.store_dir.display().to_string()),
                ("Temp", config.tmp_dir.display().to_string()),
                ("Timeout", format!("{}s", config.timeout)),
                ("Insecure", config.insecure.to_string()),
            ],
        );

        let store = LocalImageStore::open(&config.store_dir)?;
        let pipeline = Pipeline::new(
            Box::new(KubeconfigProvider::from_env(config.kubeconfig.clone())),
            Box::new(SecureChannelFactory::new(config.channel_options(), output.clone())),
            store,
            Arc::new(InsecureAcceptAnything),
            config.tmp_dir.clone(),
            output.clone(),
        );

        pipeline.run(&args.coordinate, cancel).await?;
        Ok(())
    }
}
