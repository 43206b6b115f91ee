//! Synthetic device reports.
//!
//! Each user owns a fixed set of devices whose identifiers are derived from
//! the user's subject, so the same caller always sees the same devices. Report
//! identifiers and values are fresh on every call.

use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ReportsConfig;

/// Subject used when the token's `sub` is empty.
pub const UNKNOWN_SUBJECT: &str = "unknown";

/// One reading for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub device: Uuid,
    pub report_id: Uuid,
    pub value: u32,
}

/// Body of `GET /reports`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportsResponse {
    pub reports: Vec<DeviceReport>,
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    devices_per_user: usize,
    min_value: u32,
    max_value: u32,
}

impl ReportGenerator {
    /// Creates a generator from validated settings.
    pub fn new(settings: &ReportsConfig) -> Self {
        Self {
            devices_per_user: settings.devices_per_user,
            min_value: settings.min_value,
            max_value: settings.max_value.max(settings.min_value),
        }
    }

    /// Stable identifier of the `index`-th device of `user_id`.
    ///
    /// The first 16 bytes of `SHA-256("{user_id}-{index}")`, taken as-is.
    pub fn device_id(user_id: &str, index: usize) -> Uuid {
        let digest = Sha256::digest(format!("{user_id}-{index}").as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }

    /// Generates one report per device of `user_id`.
    pub fn generate(&self, user_id: &str) -> ReportsResponse {
        let user_id = if user_id.is_empty() {
            UNKNOWN_SUBJECT
        } else {
            user_id
        };
        let mut rng = rand::thread_rng();

        let reports = (0..self.devices_per_user)
            .map(|i| DeviceReport {
                device: Self::device_id(user_id, i),
                report_id: Uuid::new_v4(),
                value: rng.gen_range(self.min_value..=self.max_value),
            })
            .collect();

        ReportsResponse { reports }
    }
}
