//! `watch` handler: poll one source through a coordinator and print
//! every update until interrupted.

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use coordly_core::{Coordinator, CoordinatorSensor, NumericState, Update};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::http::HttpFetcher;

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    for pointer in &args.field {
        validate_pointer(pointer)?;
    }

    let target = config::resolve_watch_target(&args, global)?;
    let fetcher = HttpFetcher::new(target.url.clone(), target.token.clone())?;
    let mut builder = Coordinator::builder(target.coordinator.clone(), fetcher);
    if target.skip_unchanged {
        builder = builder.skip_unchanged();
    }
    let coordinator = builder.build();

    // Subscribing arms the interval timer; output is driven by the update stream.
    let sensors: Vec<_> = args
        .field
        .iter()
        .map(|pointer| field_sensor(&coordinator, pointer))
        .collect();
    let keepalive = sensors
        .is_empty()
        .then(|| coordinator.add_listener(|| {}));
    for sensor in &sensors {
        sensor.entity().added(|| {});
    }

    info!(source = %coordinator.name(), url = %target.url, "watching");
    coordinator.first_refresh().await?;

    if args.once {
        print_snapshot(&coordinator, &sensors, args.compact)?;
        coordinator.shutdown();
        return Ok(());
    }
    if coordinator.update_interval().is_none() {
        warn!("no poll interval configured, nothing will refresh");
    }

    // The first item is the snapshot from the initial refresh.
    let mut updates = coordinator.updates().into_stream();
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
            update = updates.next() => {
                let Some(update) = update else { break };
                report(&coordinator, &sensors, &update, args.compact)?;
            }
        }
    }

    for sensor in &sensors {
        sensor.entity().will_remove();
    }
    if let Some(handle) = keepalive {
        handle.unsubscribe();
    }
    coordinator.shutdown();
    Ok(())
}

fn validate_pointer(pointer: &str) -> Result<(), CliError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(CliError::Validation {
            field: "field".into(),
            reason: format!("'{pointer}' is not a JSON pointer (try '/{pointer}')"),
        })
    }
}

fn field_sensor(coordinator: &Coordinator<Value>, pointer: &str) -> CoordinatorSensor<Value> {
    let path = pointer.to_owned();
    CoordinatorSensor::new(coordinator.clone(), pointer, move |data: &Value| {
        data.pointer(&path).and_then(Value::as_f64)
    })
}

fn report(
    coordinator: &Coordinator<Value>,
    sensors: &[CoordinatorSensor<Value>],
    update: &Update<Value>,
    compact: bool,
) -> Result<(), CliError> {
    if update.is_available() {
        return print_snapshot(coordinator, sensors, compact);
    }

    let reason = coordinator
        .last_exception()
        .map_or_else(|| "unknown error".to_owned(), |err| err.to_string());
    let since = coordinator.last_update_success_time().map_or_else(
        || "never".to_owned(),
        |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    eprintln!(
        "{} is {}: {reason} (last good update: {since})",
        coordinator.name(),
        update.state
    );
    Ok(())
}

fn print_snapshot(
    coordinator: &Coordinator<Value>,
    sensors: &[CoordinatorSensor<Value>],
    compact: bool,
) -> Result<(), CliError> {
    let value = if sensors.is_empty() {
        match coordinator.data() {
            Some(data) => Value::clone(&data),
            None => return Ok(()),
        }
    } else {
        let readings: Map<String, Value> = sensors
            .iter()
            .map(|sensor| {
                let reading = sensor.native_value().map_or(Value::Null, Value::from);
                (sensor.unique_id().to_owned(), reading)
            })
            .collect();
        Value::Object(readings)
    };

    let text = if compact {
        serde_json::to_string(&value)?
    } else {
        serde_json::to_string_pretty(&value)?
    };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_must_be_rooted() {
        assert!(validate_pointer("/power").is_ok());
        assert!(validate_pointer("").is_ok());
        assert!(matches!(
            validate_pointer("power"),
            Err(CliError::Validation { .. })
        ));
    }
}
