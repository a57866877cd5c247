//! Filter and paging flags shared by the query commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};

use crate::core::{ActivePeriod, FilterRequest, ManualTimeRequest, TimeFilterRequest, TimeOffset};
use crate::domain::{InstanceStatus, PageRequest, SortOrder, StorageStatus};

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Read a JSON filter request from a file (flags below are merged on top)
    #[arg(long, value_name = "FILE")]
    pub filter_file: Option<PathBuf>,

    /// Rolling window: days back from now
    #[arg(long)]
    pub offset_days: Option<u32>,

    /// Rolling window: hours back from now
    #[arg(long)]
    pub offset_hours: Option<u32>,

    /// Rolling window: minutes back from now
    #[arg(long)]
    pub offset_minutes: Option<u32>,

    /// Calendar period containing now (today, this-week, this-month, this-year)
    #[arg(long)]
    pub period: Option<ActivePeriod>,

    /// Lower bound on latest update (RFC 3339, inclusive)
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Upper bound on latest update (RFC 3339, exclusive)
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    /// IANA time zone for calendar periods
    #[arg(long)]
    pub time_zone: Option<String>,

    #[arg(long = "source-application-id", value_delimiter = ',')]
    pub source_application_ids: Vec<i64>,

    #[arg(long = "source-integration-id", value_delimiter = ',')]
    pub source_application_integration_ids: Vec<String>,

    #[arg(long = "source-instance-id", value_delimiter = ',')]
    pub source_application_instance_ids: Vec<String>,

    #[arg(long = "integration-id", value_delimiter = ',')]
    pub integration_ids: Vec<i64>,

    /// Lifecycle status (IN_PROGRESS, TRANSFERRED, ABORTED, FAILED)
    #[arg(long = "status", value_delimiter = ',')]
    pub statuses: Vec<InstanceStatus>,

    #[arg(long = "latest-status-event", value_delimiter = ',')]
    pub latest_status_events: Vec<String>,

    /// Storage status (STORED, STORED_AND_DELETED, NEVER_STORED)
    #[arg(long = "storage-status", value_delimiter = ',')]
    pub storage_statuses: Vec<StorageStatus>,

    #[arg(long = "associated-event", value_delimiter = ',')]
    pub associated_events: Vec<String>,

    #[arg(long = "destination-id", value_delimiter = ',')]
    pub destination_ids: Vec<String>,
}

impl FilterArgs {
    /// Build the raw request. Conflicts are left for validation to report.
    pub fn into_request(self) -> Result<FilterRequest> {
        let mut request = match self.filter_file {
            Some(ref path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read filter file: {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse filter file: {}", path.display()))?
            }
            None => FilterRequest::default(),
        };

        let offset = if self.offset_days.is_some()
            || self.offset_hours.is_some()
            || self.offset_minutes.is_some()
        {
            Some(TimeOffset {
                days: self.offset_days.unwrap_or(0),
                hours: self.offset_hours.unwrap_or(0),
                minutes: self.offset_minutes.unwrap_or(0),
            })
        } else {
            None
        };
        let manual = (self.from.is_some() || self.to.is_some()).then_some(ManualTimeRequest {
            min: self.from,
            max: self.to,
        });
        if offset.is_some() || self.period.is_some() || manual.is_some() {
            request.time = Some(TimeFilterRequest {
                offset,
                current_period: self.period,
                manual,
            });
        }

        if self.time_zone.is_some() {
            request.time_zone = self.time_zone;
        }
        merge(&mut request.source_application_ids, self.source_application_ids);
        merge(
            &mut request.source_application_integration_ids,
            self.source_application_integration_ids,
        );
        merge(
            &mut request.source_application_instance_ids,
            self.source_application_instance_ids,
        );
        merge(&mut request.integration_ids, self.integration_ids);
        merge(&mut request.statuses, self.statuses);
        merge(&mut request.latest_status_events, self.latest_status_events);
        merge(&mut request.storage_statuses, self.storage_statuses);
        merge(&mut request.associated_events, self.associated_events);
        merge(&mut request.destination_ids, self.destination_ids);

        Ok(request)
    }
}

fn merge<T>(target: &mut Option<Vec<T>>, values: Vec<T>) {
    if !values.is_empty() {
        *target = Some(values);
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum SortArg {
    /// Most recently updated first
    #[default]
    Newest,
    /// Least recently updated first
    Oldest,
}

#[derive(Args, Debug, Clone)]
pub struct PageArgs {
    /// Page number (0-based)
    #[arg(long, default_value = "0")]
    pub page: u32,

    /// Page size (defaults to the configured page size)
    #[arg(long)]
    pub size: Option<u32>,

    #[arg(long, value_enum, default_value = "newest")]
    pub sort: SortArg,

    /// Also count every match
    #[arg(long)]
    pub total: bool,
}

impl PageArgs {
    pub fn into_request(self, default_size: u32) -> PageRequest {
        let sort = match self.sort {
            SortArg::Newest => SortOrder::LatestUpdateDesc,
            SortArg::Oldest => SortOrder::LatestUpdateAsc,
        };
        let mut request = PageRequest::new(self.page, self.size.unwrap_or(default_size)).sorted(sort);
        if self.total {
            request = request.with_total();
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_become_request_fields() {
        let args = FilterArgs {
            offset_hours: Some(6),
            statuses: vec![InstanceStatus::Failed],
            source_application_ids: vec![1, 2],
            ..Default::default()
        };
        let request = args.into_request().unwrap();

        let time = request.time.unwrap();
        assert_eq!(
            time.offset,
            Some(TimeOffset {
                days: 0,
                hours: 6,
                minutes: 0
            })
        );
        assert_eq!(request.statuses, Some(vec![InstanceStatus::Failed]));
        assert_eq!(request.source_application_ids, Some(vec![1, 2]));
        assert_eq!(request.destination_ids, None);
    }

    #[test]
    fn test_conflicting_time_flags_are_kept_for_validation() {
        let args = FilterArgs {
            period: Some(ActivePeriod::Today),
            from: Some("2024-01-01T00:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        let time = args.into_request().unwrap().time.unwrap();
        assert!(time.current_period.is_some());
        assert!(time.manual.is_some());
    }

    #[test]
    fn test_flags_override_filter_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"integrationIds": [4], "destinationIds": ["D1"]}}"#
        )
        .unwrap();

        let args = FilterArgs {
            filter_file: Some(file.path().to_path_buf()),
            integration_ids: vec![9],
            ..Default::default()
        };
        let request = args.into_request().unwrap();
        assert_eq!(request.integration_ids, Some(vec![9]));
        assert_eq!(request.destination_ids, Some(vec!["D1".to_string()]));
    }

    #[test]
    fn test_page_defaults() {
        let args = PageArgs {
            page: 2,
            size: None,
            sort: SortArg::Oldest,
            total: true,
        };
        let request = args.into_request(20);
        assert_eq!(request.size, 20);
        assert_eq!(request.sort, SortOrder::LatestUpdateAsc);
        assert!(request.include_total);
    }
}
