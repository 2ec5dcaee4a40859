//! Standalone, unit-tested validation rules, kept separate from the option
//! structs that use them (mirrors the source's own `validations.go` split).

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::ValidationError;

fn job_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_]{1,48}[a-z0-9]$").expect("static regex"))
}

pub fn validate_job_name(name: &str) -> Result<(), ValidationError> {
    if job_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidJobName(name.to_string()))
    }
}

pub fn validate_retries(retries: i64) -> Result<(), ValidationError> {
    if retries < 0 {
        Err(ValidationError::InvalidRetries(retries))
    } else {
        Ok(())
    }
}

pub fn validate_pool_size(size: i64) -> Result<(), ValidationError> {
    if size < 1 {
        Err(ValidationError::InvalidPoolSize(size))
    } else {
        Ok(())
    }
}

pub fn validate_timeout(timeout: Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() {
        Err(ValidationError::InvalidTimeout(timeout))
    } else {
        Ok(())
    }
}

pub fn validate_start_at(start_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if start_at <= now {
        Err(ValidationError::InvalidStartTime)
    } else {
        Ok(())
    }
}

pub fn validate_task_body(body: &[u8]) -> Result<(), ValidationError> {
    if body.is_empty() {
        Err(ValidationError::InvalidTaskBody)
    } else {
        Ok(())
    }
}
