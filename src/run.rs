//! One provisioning run, from descriptor paths to platform calls

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::{Catalog, RecordFailure};
use crate::config::{ProvisionConfig, RunMode};
use crate::error::AggregatedError;
use crate::loader::load_paths;
use crate::platform::{HttpPlatform, Platform};
use crate::pool::DispatchPool;
use crate::provision::Provisioner;
use crate::report::render_markdown;

/// Outcome of a run. A run can finish with both unresolved records and a
/// dispatch failure; either one makes it unsuccessful.
#[derive(Debug, Default)]
pub struct RunReport {
    pub groups: usize,
    pub entities: usize,
    pub unresolved: Vec<RecordFailure>,
    pub dispatch: Option<AggregatedError>,
    /// Rendered catalog in markdown mode
    pub markdown: Option<String>,
}

impl RunReport {
    fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            groups: catalog.groups.len(),
            entities: catalog.entities.len(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.unresolved.is_empty() && self.dispatch.is_none()
    }
}

/// Load, resolve and dispatch (or render) everything under `config.paths`.
///
/// Configuration, file and authentication problems are returned as errors;
/// per-record and per-chunk failures end up in the report.
pub async fn execute(config: &ProvisionConfig) -> Result<RunReport> {
    config.validate().context("Invalid configuration")?;
    let records = load_paths(&config.paths, &config.default_protocol)
        .context("Failed to load descriptors")?;
    let mut catalog = Catalog::build(records);

    if config.mode == RunMode::Markdown {
        let mut report = RunReport::from_catalog(&catalog);
        report.markdown = Some(
            render_markdown(&catalog.groups, &catalog.entities)
                .context("Failed to render markdown")?,
        );
        report.unresolved = std::mem::take(&mut catalog.failures);
        return Ok(report);
    }

    let endpoints = config.endpoints.clone();
    let platform = HttpPlatform::connect(endpoints, &config.credentials, &config.http)
        .await
        .context("Failed to authenticate")?;
    let pool = DispatchPool::new(config.pool);
    Ok(dispatch(catalog, platform, pool, config.mode).await)
}

/// Create or delete the resolved catalog through `platform`
pub async fn dispatch<P: Platform>(
    mut catalog: Catalog,
    platform: P,
    pool: DispatchPool,
    mode: RunMode,
) -> RunReport {
    let mut report = RunReport::from_catalog(&catalog);
    report.unresolved = std::mem::take(&mut catalog.failures);
    let provisioner = Provisioner::new(platform, pool);
    let result = match mode {
        RunMode::Delete => provisioner.delete(&catalog.groups, &catalog.entities).await,
        RunMode::Create => provisioner.create(&catalog.groups, &catalog.entities).await,
        RunMode::Markdown => Ok(()),
    };
    match result {
        Ok(()) => info!(
            groups = report.groups,
            entities = report.entities,
            "Dispatch complete"
        ),
        Err(err) => report.dispatch = Some(err),
    }
    report
}
