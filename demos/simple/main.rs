// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use autoprofile::{
    profiler::{AutoProfiler, AutoProfilerOptions},
    reporter::{http::HttpReporter, local::LocalReporter, multi::MultiReporter, Reporter},
    scheduler::SamplerConfig,
};
use std::time::Duration;

use clap::{ArgGroup, Parser};

mod slow;

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer().pretty();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Simple program to test the profiler
#[derive(Parser, Debug)]
#[command(group(
    ArgGroup::new("options")
        .required(true)
        .multiple(true)
        .args(["output_dir", "url"]),
))]
struct Args {
    /// Directory the profiles are written to.
    #[arg(long)]
    output_dir: Option<String>,
    /// Collector endpoint the profiles are POSTed to.
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration)]
    duration: Option<Duration>,
    #[arg(long, default_value = "2m")]
    #[clap(value_parser = humantime::parse_duration)]
    report_interval: Duration,
    #[arg(long, default_value = "5s")]
    #[clap(value_parser = humantime::parse_duration)]
    flush_interval: Duration,
    #[arg(long)]
    worker_threads: Option<usize>,
    /// Keep the profiler's own frames in the call trees.
    #[arg(long)]
    include_profiler_frames: bool,
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut rt: tokio::runtime::Builder = tokio::runtime::Builder::new_multi_thread();
    rt.enable_all();
    if let Some(worker_threads) = args.worker_threads {
        rt.worker_threads(worker_threads);
    }
    let rt = rt.build().unwrap();
    rt.block_on(main_internal(args))
}

async fn main_internal(args: Args) -> Result<(), anyhow::Error> {
    set_up_tracing();
    tracing::info!("main started");

    let mut reporters: Vec<Box<dyn Reporter + Send + Sync>> = Vec::new();
    if let Some(output_dir) = args.output_dir {
        tokio::fs::create_dir_all(&output_dir).await?;
        reporters.push(Box::new(LocalReporter::new(output_dir)));
    }
    if let Some(url) = args.url {
        reporters.push(Box::new(HttpReporter::new(url)));
    }

    let profiler = AutoProfiler::builder()
        .with_reporter(MultiReporter::new(reporters))
        .with_options(AutoProfilerOptions {
            include_profiler_frames: args.include_profiler_frames,
            ..Default::default()
        })
        .with_flush_interval(args.flush_interval)
        .with_cpu_config(SamplerConfig {
            report_interval: args.report_interval,
            ..SamplerConfig::cpu()
        })
        .build()?;

    tracing::info!("starting profiler");
    profiler.enable()?;
    tracing::info!("profiler started");

    if let Some(timeout) = args.duration {
        tokio::time::timeout(timeout, slow::run())
            .await
            .unwrap_err();
    } else {
        slow::run().await;
    }

    profiler.disable();
    profiler.recorder().flush().await;
    Ok(())
}
