// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::io;
use std::process::ExitCode;

use raksh_hook::configuration::{HookConfig, HookOptions};
use raksh_hook::pipeline::HookPipeline;
use raksh_hook::{constants, logging};

fn main() -> ExitCode {
    let options = HookOptions::parse_normalized(std::env::args_os());

    if options.version {
        println!("{}", constants::VERSION);
        return ExitCode::SUCCESS;
    }

    match logging::init(&logging::log_dir()) {
        Ok(Some(path)) => tracing::info!("[hook] log file: {}", path.display()),
        Ok(None) => tracing::info!("[hook] failed to log to file, using stderr"),
        Err(err) => eprintln!("[hook] {err:?}"),
    }

    tracing::info!("[hook] started Raksh OCI hook version {}", constants::VERSION);
    tracing::debug!("[hook] {:?}", &options);

    if !options.start {
        return ExitCode::SUCCESS;
    }

    tracing::info!("[hook] starting Raksh OCI pre-start hook");

    let mut pipeline = HookPipeline::from_config(HookConfig::default());
    match pipeline.run(io::stdin().lock()) {
        Ok(outcome) => tracing::info!(
            "[hook] provisioned container {} ({} containers, {} user secrets)",
            outcome.container_id,
            outcome.spec.spec.containers.len(),
            outcome.user_secrets.len()
        ),
        // a failed hook must not block the container from starting
        Err(err) => tracing::error!("[hook] {:?}: {}", pipeline.state(), err),
    }

    ExitCode::SUCCESS
}
