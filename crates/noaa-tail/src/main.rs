// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::io::{self, Write};
use std::process::ExitCode;

use noaa_consumer::{
    sort_by_timestamp, Consumer, ConsumerEnv, ConsumerError, EnvelopeStream, StreamEnd, TailMode,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> ExitCode {
    let env = ConsumerEnv::from_os_env();

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", env.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(err) => {
            eprintln!("could not parse log level {:?}: {err}", env.log_level);
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match env.to_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let consumer = match Consumer::new(config) {
        Ok(consumer) => consumer,
        Err(err) => {
            error!("Unable to create consumer: {err}");
            return ExitCode::FAILURE;
        }
    };

    let token = env.auth_token.clone().unwrap_or_default();
    let app_id = env.app_id.clone().unwrap_or_default();
    info!(mode = %env.tail_mode, endpoint = %consumer.config().endpoint, "Starting noaa-tail");

    let result = match env.tail_mode {
        TailMode::Tail => match consumer.tailing_logs(&app_id, &token).await {
            Ok(stream) => follow(stream).await,
            Err(err) => Err(err),
        },
        TailMode::Stream => match consumer.stream(&app_id, &token).await {
            Ok(stream) => follow(stream).await,
            Err(err) => Err(err),
        },
        TailMode::Firehose => {
            let subscription_id = env.subscription_id.clone().unwrap_or_default();
            match consumer.firehose(&subscription_id, &token).await {
                Ok(stream) => follow(stream).await,
                Err(err) => Err(err),
            }
        }
        TailMode::Recent => print_recent(&consumer, &app_id, &token).await,
        TailMode::ContainerMetrics => match consumer.container_metrics(&app_id, &token).await {
            Ok(metrics) => metrics.iter().try_for_each(print_json),
            Err(err) => Err(err),
        },
    };

    info!(counters = %consumer.counters(), "noaa-tail finished");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Prints envelopes until the stream ends or the process is interrupted.
async fn follow(mut stream: EnvelopeStream) -> Result<(), ConsumerError> {
    let closer = stream.closer();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing stream");
            closer.close();
        }
    });

    while let Some(envelope) = stream.recv().await {
        if let Err(err) = print_json(&envelope) {
            stream.close();
            return Err(err);
        }
    }

    match stream.finish().await {
        StreamEnd::Failed(err) => Err(err),
        end => {
            debug!(?end, "stream ended");
            Ok(())
        }
    }
}

async fn print_recent(consumer: &Consumer, app_id: &str, token: &str) -> Result<(), ConsumerError> {
    let mut batch = consumer.recent_logs(app_id, token).await?;
    if let Some(err) = &batch.interrupted {
        warn!("Recent logs were cut short: {err}");
    }
    sort_by_timestamp(&mut batch.envelopes);
    batch.envelopes.iter().try_for_each(print_json)
}

/// Writes one JSON document per line to stdout.
fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ConsumerError> {
    let line = to_json_line(value)?;
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(line.as_bytes())
        .map_err(|err| ConsumerError::Transport(format!("writing to stdout: {err}")))
}

fn to_json_line<T: serde::Serialize>(value: &T) -> Result<String, ConsumerError> {
    let mut line = serde_json::to_string(value)
        .map_err(|err| ConsumerError::Transport(format!("encoding envelope: {err}")))?;
    line.push('\n');
    Ok(line)
}
