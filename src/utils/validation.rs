use crate::config::Config;
use crate::error::{RecError, Result};

fn invalid(message: impl Into<String>) -> RecError {
    RecError::Validation(message.into())
}

/// Bounds check for the HTTP read endpoint. The ranking service itself accepts
/// any page size.
pub fn validate_page_size(size: usize, max_page_size: usize) -> Result<()> {
    if size == 0 {
        return Err(invalid("Page size cannot be zero"));
    }

    if size > max_page_size {
        return Err(invalid(format!(
            "Page size too large: {} (max {})",
            size, max_page_size
        )));
    }

    Ok(())
}

pub fn validate_batch_size(batch_size: usize, max_batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(invalid("Batch size cannot be zero"));
    }

    if batch_size > max_batch_size {
        return Err(invalid(format!(
            "Batch size too large: {} (max {})",
            batch_size, max_batch_size
        )));
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.batch.candidate_pool_size == 0 {
        return Err(invalid("Candidate pool size cannot be zero"));
    }

    if config.batch.lock_ttl_secs == 0 || config.batch.group_ttl_secs == 0 {
        return Err(invalid("Batch TTLs must be positive"));
    }

    if config.batch.worker_threads == 0 {
        return Err(invalid("Batch worker pool needs at least one thread"));
    }

    if config.profile.ttl_secs == 0 {
        return Err(invalid("Profile TTL must be positive"));
    }

    if !(-12..=14).contains(&config.scheduler.utc_offset_hours) {
        return Err(invalid(format!(
            "UTC offset out of range: {}",
            config.scheduler.utc_offset_hours
        )));
    }

    if config.scheduler.hour > 23 || config.scheduler.minute > 59 {
        return Err(invalid(format!(
            "Invalid schedule time {:02}:{:02}",
            config.scheduler.hour, config.scheduler.minute
        )));
    }

    if config.read.default_page_size == 0
        || config.read.default_page_size > config.read.max_page_size
    {
        return Err(invalid("Default page size must be within 1..=max_page_size"));
    }

    let alpha = config.read.personal_boost_alpha;
    if !alpha.is_finite() || alpha < 0.0 {
        return Err(invalid(format!("Personal boost alpha must be >= 0, got {}", alpha)));
    }

    Ok(())
}
