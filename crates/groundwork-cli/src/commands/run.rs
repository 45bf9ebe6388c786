use super::{
    colorize_level, json_pretty, load_settings, spin_fail, spin_ok, spinner, EXIT_STAGE_FAILED,
    EXIT_SUCCESS,
};
use crate::Overrides;
use console::Style;
use groundwork_core::{LogRecord, LogSink, Services, Workflow, WorkflowOutcome};
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::thread;
use tracing::debug;

pub fn run(
    config_path: &Path,
    overrides: &Overrides,
    destroy: bool,
    json: bool,
) -> Result<u8, String> {
    let mut config = load_settings(config_path, overrides)?;
    config.destroy |= destroy;

    let sink = LogSink::open(&config.log.file, config.log.observer_capacity)
        .map_err(|e| format!("failed to open log file {}: {e}", config.log.file.display()))?;
    debug!(
        log = %config.log.file.display(),
        capacity = sink.capacity(),
        destroy = config.destroy,
        "log sink opened"
    );
    let services = Services::system(&config);
    let workflow = Workflow::new(config, &services);

    let pb = if json {
        None
    } else {
        Some(spinner("starting workflow..."))
    };
    let printer = pb.clone().map(|pb| {
        let records = sink.subscribe();
        thread::spawn(move || relay(&records, &pb))
    });

    let outcome = workflow.run(&sink);
    let dropped = sink.dropped_count();
    let log_path = sink.path().map(Path::to_path_buf);
    // Closes the observer channel so the printer thread ends.
    drop(sink);
    if let Some(handle) = printer {
        let _ = handle.join();
    }
    debug!(
        status = ?outcome.status,
        dropped,
        duration_ms = outcome.duration_ms(),
        "workflow finished"
    );

    if json {
        println!("{}", json_pretty(&outcome)?);
    } else if let Some(pb) = &pb {
        report(pb, &outcome);
        if dropped > 0 {
            println!("{dropped} log event(s) not shown on the console");
        }
        if let Some(path) = log_path {
            println!("log: {}", path.display());
        }
    }

    Ok(if outcome.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_STAGE_FAILED
    })
}

/// Keep the spinner message on the latest progress event. Console log lines
/// come from the global subscriber, which the sink forwards to.
fn relay(records: &Receiver<LogRecord>, pb: &ProgressBar) {
    while let Ok(record) = records.recv() {
        match record.level.as_str() {
            "INFO" => pb.set_message(record.message),
            "WARN" | "ERROR" => pb.set_message(format!(
                "{} {}",
                colorize_level(&record.level),
                record.message
            )),
            _ => {}
        }
    }
}

fn report(pb: &ProgressBar, outcome: &WorkflowOutcome) {
    let action = if outcome.destroy { "destroy" } else { "apply" };
    if let (Some(stage), Some(error)) = (outcome.failed_stage(), outcome.error()) {
        spin_fail(pb, &format!("{action} failed at stage {stage}"));
        eprintln!("{}", Style::new().red().apply_to(error));
        return;
    }

    spin_ok(
        pb,
        &format!("{action} completed for project {}", outcome.project_id),
    );
    if let Some(bucket) = &outcome.bucket {
        let state = match outcome.bucket_created {
            Some(true) => "created",
            _ => "existing",
        };
        match &outcome.bucket_region {
            Some(region) => println!("state bucket: {bucket} ({state}, {region})"),
            None => println!("state bucket: {bucket} ({state})"),
        }
    }
    if let Some(init) = &outcome.init {
        println!("init tier: {} after {} attempt(s)", init.tier, init.attempts);
    }
    if let Some(teardown) = &outcome.teardown {
        if teardown.storage_removed {
            println!(
                "state bucket removed ({} object(s) deleted)",
                teardown.objects_deleted
            );
        } else {
            let detail = teardown
                .failing_object
                .as_deref()
                .map_or_else(String::new, |o| format!(" (failed on object '{o}')"));
            println!(
                "{}",
                Style::new()
                    .yellow()
                    .apply_to(format!("state bucket was not removed{detail}"))
            );
        }
    }
}
