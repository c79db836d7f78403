//! Translation of a `spark-submit` command line into a [`BatchRequest`].
//!
//! Tokens are scanned left to right. Options before the application jar feed
//! the request's configuration, the jar becomes the request's file, and every
//! token after it is passed through as an application argument.

use std::collections::BTreeMap;
use std::path::Path;

use crate::batch::models::BatchRequest;
use crate::error::{EmrError, Result};

pub const SUBMIT_PROGRAM: &str = "spark-submit";

/// Substring identifying the application artifact.
pub const ARTIFACT_MARKER: &str = ".jar";

const OPTION_PREFIX: &str = "--";

/// Options carried over as configuration keys.
const CONF_OPTIONS: &[(&str, &str)] = &[
    ("--name", "spark.app.name"),
    ("--jars", "spark.jars"),
    ("--packages", "spark.jars.packages"),
    ("--exclude-packages", "spark.jars.excludes"),
    ("--repositories", "spark.jars.repositories"),
    ("--py-files", "spark.submit.pyFiles"),
    ("--files", "spark.files"),
    ("--driver-library-path", "spark.driver.extraLibraryPath"),
    ("--driver-class-path", "spark.driver.extraClassPath"),
];

/// Sizing and placement options. Their value is skipped.
pub const DISCARDED_OPTIONS: &[&str] = &[
    "--master",
    "--deploy-mode",
    "--num-executors",
    "--executor-memory",
    "--driver-memory",
    "--driver-cores",
    "--executor-cores",
    "--total-executor-cores",
    "--driver-java-options",
    "--queue",
    "--principal",
    "--keytab",
    "--archives",
    "--properties-file",
];

/// Configuration keys never forwarded to the batch service.
pub const CONF_DENYLIST: &[&str] = &[
    "spark.master",
    "spark.submit.deployMode",
    "spark.driver.memory",
    "spark.executor.memory",
    "spark.driver.cores",
    "spark.executor.cores",
    "spark.driver.defaultJavaOptions",
    "spark.driver.extraJavaOptions",
    "spark.executor.extraJavaOptions",
];

fn conf_key_for(option: &str) -> Option<&'static str> {
    CONF_OPTIONS
        .iter()
        .find(|(name, _)| *name == option)
        .map(|(_, key)| *key)
}

fn is_denied(key: &str) -> bool {
    CONF_DENYLIST.contains(&key)
}

pub fn is_submit_program(program: &str) -> bool {
    Path::new(program)
        .file_name()
        .is_some_and(|name| name == SUBMIT_PROGRAM)
}

fn split_conf(value: &str) -> Result<(&str, &str)> {
    value
        .split_once('=')
        .ok_or_else(|| EmrError::Validation(format!("spark --conf `{}` is badly formatted", value)))
}

/// Translate a full command line, program included.
pub fn translate(command_line: &[String]) -> Result<BatchRequest> {
    let (program, args) = command_line
        .split_first()
        .ok_or_else(|| EmrError::Validation("Empty step command line".to_string()))?;
    if !is_submit_program(program) {
        return Err(EmrError::Validation(format!(
            "Unsupported command `{}`",
            program
        )));
    }
    parse_submit_args(args)
}

/// Translate the arguments following the submission program.
pub fn parse_submit_args(args: &[String]) -> Result<BatchRequest> {
    let mut conf = BTreeMap::new();
    let mut class_name = None;
    let mut proxy_user = None;

    let mut tokens = args.iter();
    while let Some(token) = tokens.next() {
        if token.starts_with(OPTION_PREFIX) {
            let value = tokens.next().ok_or_else(|| {
                EmrError::Validation(format!("Option `{}` is missing its value", token))
            })?;
            match token.as_str() {
                "--conf" => {
                    let (key, val) = split_conf(value)?;
                    if is_denied(key) {
                        tracing::debug!(key, "Dropping denied configuration");
                    } else {
                        conf.insert(key.to_string(), val.to_string());
                    }
                }
                "--class" => class_name = Some(value.clone()),
                "--proxy-user" => proxy_user = Some(value.clone()),
                option => {
                    if let Some(key) = conf_key_for(option) {
                        conf.insert(key.to_string(), value.clone());
                    } else if DISCARDED_OPTIONS.contains(&option) {
                        tracing::debug!(option, "Discarding sizing option");
                    } else {
                        return Err(EmrError::Validation(format!(
                            "Unknown spark-submit option `{}`",
                            option
                        )));
                    }
                }
            }
        } else if token.contains(ARTIFACT_MARKER) {
            return Ok(BatchRequest {
                file: token.clone(),
                class_name,
                proxy_user,
                args: tokens.cloned().collect(),
                conf,
            });
        } else {
            return Err(EmrError::Validation(format!(
                "Step is not of expected format: unexpected `{}` before the application jar",
                token
            )));
        }
    }

    Err(EmrError::Validation(format!(
        "No application jar found in step arguments {:?}",
        args
    )))
}

/// Strip sizing options and denied `--conf` pairs from a `spark-submit` command line
/// so it runs against a local runtime. Other command lines are returned unchanged.
pub fn clean_for_local_run(command_line: &[String]) -> Vec<String> {
    match command_line.first() {
        Some(program) if is_submit_program(program) => {}
        _ => return command_line.to_vec(),
    }

    let mut cleaned = vec![command_line[0].clone()];
    let mut tokens = command_line[1..].iter().peekable();
    while let Some(token) = tokens.next() {
        if token.contains(ARTIFACT_MARKER) && !token.starts_with(OPTION_PREFIX) {
            cleaned.push(token.clone());
            cleaned.extend(tokens.cloned());
            break;
        }
        if DISCARDED_OPTIONS.contains(&token.as_str()) {
            tokens.next();
            continue;
        }
        if token == "--conf" {
            if let Some(value) = tokens.peek() {
                let denied = value
                    .split_once('=')
                    .is_some_and(|(key, _)| is_denied(key));
                if denied {
                    tokens.next();
                    continue;
                }
            }
        }
        cleaned.push(token.clone());
    }
    cleaned
}
