//! Liveness summary of the service's storage and executor.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Health probe result.
///
/// `Down` as soon as one probed component fails; the failing component's
/// error is kept under `<component>.error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    pub fn up() -> Self {
        Self {
            status: HealthStatus::Up,
            details: BTreeMap::new(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }

    pub fn detail(&mut self, key: impl Into<String>, value: impl Display) {
        self.details.insert(key.into(), value.to_string());
    }

    pub fn fail(&mut self, component: &str, error: impl Display) {
        self.status = HealthStatus::Down;
        self.details.insert(format!("{component}.error"), error.to_string());
    }

    /// Record `value` under `key`, or mark the report down.
    pub fn probe<T: Display, E: Display>(&mut self, key: &str, result: Result<T, E>) {
        match result {
            Ok(value) => self.detail(key, value),
            Err(e) => self.fail(key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_probe_marks_down() {
        let mut report = HealthReport::up();
        report.probe::<usize, &str>("organizations", Ok(3));
        assert!(report.is_up());

        report.probe::<usize, &str>("flags", Err("connection refused"));

        assert_eq!(report.status, HealthStatus::Down);
        assert_eq!(report.details["organizations"], "3");
        assert_eq!(report.details["flags.error"], "connection refused");
    }

    #[test]
    fn serializes_status_upper_case() {
        let json = serde_json::to_value(HealthReport::up()).unwrap();
        assert_eq!(json["status"], "UP");
    }
}
