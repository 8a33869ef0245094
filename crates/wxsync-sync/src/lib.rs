//! Weather sync orchestration: fetch → normalize → persist, plus the range filter job.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;
use wxsync_core::CityId;
use wxsync_fetch::{fetch_all, ObservationSource, OpenWeatherClient};
use wxsync_normalize::{catalogue::resolve_selectors, normalize, CityCatalogue};
use wxsync_store::{ConflictPolicy, RangePredicate};

pub mod config;

pub use config::{ConfigError, ScheduleConfig, SyncConfig};

pub const CRATE_NAME: &str = "wxsync-sync";

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requested: usize,
    pub fetched: usize,
    pub normalized: usize,
    pub rows_written: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_table: String,
    pub destination_table: String,
    pub low: f64,
    pub high: f64,
    pub predicate: RangePredicate,
    pub on_conflict: ConflictPolicy,
    pub rows_copied: u64,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch complete: run_id={} requested={} fetched={} rows_written={}",
            self.run_id, self.requested, self.fetched, self.rows_written
        )
    }
}

impl fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "filter complete: run_id={} source={} destination={} rows_copied={}",
            self.run_id, self.source_table, self.destination_table, self.rows_copied
        )
    }
}

pub struct WeatherPipeline {
    config: SyncConfig,
    source: Box<dyn ObservationSource>,
    catalogue: Option<CityCatalogue>,
}

impl WeatherPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let source = OpenWeatherClient::new(config.api.clone())?;
        Ok(Self {
            config,
            source: Box::new(source),
            catalogue: None,
        })
    }

    pub fn with_source(mut self, source: Box<dyn ObservationSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_catalogue(mut self, catalogue: CityCatalogue) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Configured cities as ids. `catalogue_path` is read here, on each call,
    /// unless a catalogue was supplied with [`WeatherPipeline::with_catalogue`].
    pub fn city_ids(&self) -> Result<Vec<CityId>> {
        let loaded;
        let catalogue = match (&self.catalogue, &self.config.catalogue_path) {
            (Some(catalogue), _) => Some(catalogue),
            (None, Some(path)) if self.config.needs_catalogue() => {
                loaded = CityCatalogue::load(path)?;
                Some(&loaded)
            }
            _ => None,
        };
        Ok(resolve_selectors(&self.config.cities, catalogue)?)
    }

    /// One full pass. Fetch failures only shrink the batch; a rejected
    /// document or any store failure aborts the run with nothing committed.
    pub async fn run_once(&self) -> Result<PipelineSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("weather_sync", %run_id);
        async {
            let started_at = Utc::now();
            self.config
                .validate_fetch()
                .context("invalid fetch configuration")?;
            let ids = self.city_ids().context("resolving configured cities")?;

            let docs = fetch_all(self.source.as_ref(), &ids).await;
            let records = normalize(&docs).context("weather batch rejected, nothing written")?;
            let rows_written = wxsync_store::persist(&self.config.store, &records)
                .await
                .context("writing weather rows")?;

            let summary = PipelineSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                requested: ids.len(),
                fetched: docs.len(),
                normalized: records.len(),
                rows_written,
            };
            info!(
                requested = summary.requested,
                fetched = summary.fetched,
                rows_written = summary.rows_written,
                "weather sync finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    pub async fn run_filter_once(&self) -> Result<FilterSummary> {
        run_filter_once(&self.config).await
    }

    /// Cron jobs for both stages, or `None` when scheduling is disabled.
    pub async fn maybe_build_scheduler(pipeline: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !pipeline.config.schedule.enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let fetch_pipeline = Arc::clone(pipeline);
        let fetch_cron = pipeline.config.schedule.fetch_cron.as_str();
        let job = Job::new_async(fetch_cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&fetch_pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        rows_written = summary.rows_written,
                        "scheduled weather sync complete"
                    ),
                    Err(err) => error!(error = ?err, "scheduled weather sync failed"),
                }
            })
        })
        .with_context(|| format!("creating fetch job for cron {fetch_cron}"))?;
        sched.add(job).await.context("adding fetch job")?;

        let filter_pipeline = Arc::clone(pipeline);
        let filter_cron = pipeline.config.schedule.filter_cron.as_str();
        let job = Job::new_async(filter_cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&filter_pipeline);
            Box::pin(async move {
                match pipeline.run_filter_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        rows_copied = summary.rows_copied,
                        "scheduled range filter complete"
                    ),
                    Err(err) => error!(error = ?err, "scheduled range filter failed"),
                }
            })
        })
        .with_context(|| format!("creating filter job for cron {filter_cron}"))?;
        sched.add(job).await.context("adding filter job")?;

        Ok(Some(sched))
    }
}

pub async fn run_pipeline_once(config: SyncConfig) -> Result<PipelineSummary> {
    WeatherPipeline::new(config)?.run_once().await
}

/// The range filter job on its own. Only the store and range sections of
/// `config` are read; no HTTP client or city catalogue is involved.
pub async fn run_filter_once(config: &SyncConfig) -> Result<FilterSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("range_filter", %run_id);
    async {
        let started_at = Utc::now();
        config
            .validate_filter()
            .context("invalid range filter configuration")?;
        let store = &config.store;
        let filter = config.range_filter;
        let rows_copied = wxsync_store::run_range_filter(store, &filter)
            .await
            .context("copying rows by temperature range")?;

        let summary = FilterSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_table: store.unsorted_ref()?.to_string(),
            destination_table: store.sorted_ref()?.to_string(),
            low: filter.low,
            high: filter.high,
            predicate: filter.predicate,
            on_conflict: filter.on_conflict,
            rows_copied,
        };
        info!(rows_copied = summary.rows_copied, "range filter finished");
        Ok(summary)
    }
    .instrument(span)
    .await
}

/// Run both stages on their cron schedules until Ctrl-C.
pub async fn run_scheduler(config: SyncConfig) -> Result<()> {
    let pipeline = Arc::new(WeatherPipeline::new(config)?);
    let Some(mut sched) = WeatherPipeline::maybe_build_scheduler(&pipeline).await? else {
        anyhow::bail!("scheduling is disabled; set schedule.enabled in the config file");
    };

    sched.start().await.context("starting scheduler")?;
    info!(
        fetch_cron = %pipeline.config().schedule.fetch_cron,
        filter_cron = %pipeline.config().schedule.filter_cron,
        "scheduler running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use serde_json::{json, Value as JsonValue};
    use wxsync_core::{RawObservation, RecordField};
    use wxsync_fetch::FetchError;
    use wxsync_normalize::{CatalogueEntry, CitySelector, ValidationError};
    use wxsync_store::StoreConfig;

    struct StubSource {
        docs: HashMap<i64, JsonValue>,
    }

    #[async_trait]
    impl ObservationSource for StubSource {
        async fn fetch_one(&self, city_id: CityId) -> Result<RawObservation, FetchError> {
            self.docs
                .get(&city_id.get())
                .cloned()
                .map(|doc| RawObservation::new(city_id, doc))
                .ok_or(FetchError::HttpStatus { status: 502 })
        }
    }

    fn doc(id: i64) -> JsonValue {
        json!({
            "id": id,
            "name": format!("City {id}"),
            "weather": [{"description": "light rain"}],
            "main": {"temp": 12.5, "pressure": 1009, "humidity": 81},
            "visibility": 9000,
            "wind": {"speed": 6.2, "deg": 310},
            "clouds": {"all": 90}
        })
    }

    fn unreachable_store_config(ids: &[i64]) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.api.api_key = "test".into();
        config.cities = ids.iter().map(|&id| CitySelector::Id(CityId(id))).collect();
        config.store = StoreConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        };
        config
    }

    #[tokio::test]
    async fn incomplete_document_aborts_before_touching_store() {
        let mut broken = doc(2);
        broken["wind"].as_object_mut().unwrap().remove("speed");
        let source = StubSource {
            docs: HashMap::from([(1, doc(1)), (2, broken)]),
        };
        let pipeline = WeatherPipeline::new(unreachable_store_config(&[1, 2]))
            .unwrap()
            .with_source(Box::new(source));

        let err = pipeline.run_once().await.unwrap_err();
        let validation = err
            .downcast_ref::<ValidationError>()
            .expect("validation error in chain");
        assert_eq!(validation.index, 1);
        assert_eq!(validation.field, RecordField::WindSpeed);
    }

    #[tokio::test]
    async fn store_connection_failure_is_fatal() {
        let source = StubSource {
            docs: HashMap::from([(1, doc(1))]),
        };
        let pipeline = WeatherPipeline::new(unreachable_store_config(&[1]))
            .unwrap()
            .with_source(Box::new(source));

        let err = pipeline.run_once().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<wxsync_store::StoreError>(),
            Some(wxsync_store::StoreError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected_up_front() {
        let mut config = unreachable_store_config(&[1]);
        config.api.api_key.clear();
        let pipeline = WeatherPipeline::new(config).unwrap();
        let err = pipeline.run_once().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn named_cities_resolve_through_catalogue() {
        let mut config = unreachable_store_config(&[524901]);
        config.cities.push(CitySelector::Named {
            name: "istanbul".into(),
            country: "TR".into(),
        });
        let catalogue = CityCatalogue::new(vec![CatalogueEntry {
            id: CityId(745042),
            name: "Istanbul".into(),
            state: String::new(),
            country: "TR".into(),
            coord: None,
        }]);
        let pipeline = WeatherPipeline::new(config)
            .unwrap()
            .with_catalogue(catalogue);
        assert_eq!(
            pipeline.city_ids().unwrap(),
            vec![CityId(524901), CityId(745042)]
        );
    }

    #[test]
    fn summaries_share_one_line_format() {
        let at = Utc::now();
        let fetch = PipelineSummary {
            run_id: Uuid::nil(),
            started_at: at,
            finished_at: at,
            requested: 3,
            fetched: 2,
            normalized: 2,
            rows_written: 2,
        };
        assert_eq!(
            fetch.to_string(),
            "fetch complete: run_id=00000000-0000-0000-0000-000000000000 requested=3 fetched=2 rows_written=2"
        );

        let filter = FilterSummary {
            run_id: Uuid::nil(),
            started_at: at,
            finished_at: at,
            source_table: "\"public\".\"unsorted_weather\"".into(),
            destination_table: "\"public\".\"sorted_weather\"".into(),
            low: 14.0,
            high: 21.0,
            predicate: RangePredicate::Between,
            on_conflict: ConflictPolicy::Overwrite,
            rows_copied: 1,
        };
        assert_eq!(
            filter.to_string(),
            "filter complete: run_id=00000000-0000-0000-0000-000000000000 \
             source=\"public\".\"unsorted_weather\" destination=\"public\".\"sorted_weather\" rows_copied=1"
        );
    }

    fn config_with_missing_catalogue() -> SyncConfig {
        let mut config = unreachable_store_config(&[524901]);
        config.cities.push(CitySelector::Named {
            name: "New York City".into(),
            country: "US".into(),
        });
        config.catalogue_path = Some("/nonexistent/city.list.json".into());
        config
    }

    #[tokio::test]
    async fn filter_job_ignores_fetch_only_settings() {
        let mut config = config_with_missing_catalogue();
        config.api.api_key.clear();

        let err = run_filter_once(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<wxsync_store::StoreError>(),
            Some(wxsync_store::StoreError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn missing_catalogue_only_fails_the_fetch_run() {
        let pipeline = WeatherPipeline::new(config_with_missing_catalogue()).unwrap();

        let err = pipeline.run_once().await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/city.list.json"));

        let err = pipeline.run_filter_once().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<wxsync_store::StoreError>(),
            Some(wxsync_store::StoreError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn scheduler_is_skipped_when_disabled() {
        let pipeline = Arc::new(WeatherPipeline::new(unreachable_store_config(&[1])).unwrap());
        assert!(WeatherPipeline::maybe_build_scheduler(&pipeline)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn scheduler_registers_jobs_when_enabled() {
        let mut config = unreachable_store_config(&[1]);
        config.schedule.enabled = true;
        let pipeline = Arc::new(WeatherPipeline::new(config).unwrap());
        assert!(WeatherPipeline::maybe_build_scheduler(&pipeline)
            .await
            .unwrap()
            .is_some());

        let mut config = unreachable_store_config(&[1]);
        config.schedule.enabled = true;
        config.schedule.fetch_cron = "whenever".into();
        let pipeline = Arc::new(WeatherPipeline::new(config).unwrap());
        assert!(WeatherPipeline::maybe_build_scheduler(&pipeline).await.is_err());
    }
}
