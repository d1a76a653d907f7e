use anyhow::Context;
use bridge::server::ChartBridge;
use clap::Parser;
use generator::source::SyntheticSource;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use windowcore::patient_interface::BasicReshaper;
use windowcore::TimeWindowLoader;
use workflow::config::ReplayConfig;
use workflow::runner::Runner;

mod bridge;
mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Replay driver for the chart window loader")]
struct Args {
    /// Run the scripted navigation once and print a summary. This is the
    /// default; the flag only matters together with --serve
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a replay config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 60)]
    days: u32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// 1-based record fetch numbers that fail; repeatable
    #[arg(long = "fail-fetch")]
    fail_fetch: Vec<usize>,
    /// Write the offline summary as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
    /// Keep a loader alive behind the HTTP bridge. Skips the replay unless
    /// --offline is also given
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: SocketAddr,
}

impl Args {
    fn runs_replay(&self) -> bool {
        self.offline || !self.serve
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = if let Some(path) = args.workflow.as_ref() {
        ReplayConfig::load(path)?
    } else {
        ReplayConfig::from_args(args.days, args.seed, args.fail_fetch.clone())
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    runtime.block_on(run(args, config))
}

async fn run(args: Args, config: ReplayConfig) -> anyhow::Result<()> {
    if args.runs_replay() {
        let result = Runner::new(config.clone()).execute().await?;
        println!(
            "Replay {} -> fetches {}, from memory {}, retries {}, events {}, coverage {:?}",
            result.patient,
            result.fetches,
            result.windows_from_memory,
            result.retries,
            result.events,
            result
                .coverage
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        );

        if let Some(report_path) = args.report.as_ref() {
            if let Some(parent) = report_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let report = serde_json::to_string_pretty(&result)?;
            fs::write(report_path, report)
                .with_context(|| format!("writing report {}", report_path.display()))?;
        }
    }

    if args.serve {
        let source = SyntheticSource::new(&config.patient, config.faults.clone())?;
        if let Some(outer) = source.outer() {
            log::info!("patient {} history spans {}", config.patient.patient, outer);
        }
        let handle = TimeWindowLoader::spawn(source, BasicReshaper::new(), config.loader.clone());
        handle
            .initialize(config.patient.patient.as_str())
            .await
            .with_context(|| format!("initializing patient {}", config.patient.patient))?;
        log::info!("HTTP bridge running on {} (Ctrl+C to stop)", args.bind);
        ChartBridge::new(handle.clone()).serve(args.bind).await?;
        handle.shutdown();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(flags: &[&str]) -> Args {
        let argv = std::iter::once("simulator").chain(flags.iter().copied());
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn replay_runs_unless_only_serving() {
        assert!(parse(&[]).runs_replay());
        assert!(parse(&["--offline"]).runs_replay());
        assert!(!parse(&["--serve"]).runs_replay());
        assert!(parse(&["--serve", "--offline"]).runs_replay());
    }

    #[test]
    fn bind_address_and_faults_parse() {
        let args = parse(&["--bind", "0.0.0.0:8080", "--fail-fetch", "2", "--fail-fetch", "5"]);
        assert_eq!(args.bind.port(), 8080);
        assert_eq!(args.fail_fetch, vec![2, 5]);
    }
}
