//! Command handlers. Each one prints its result as JSON on stdout.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use tupa_core::{DateRange, DaySpan, PushReport, SyncReport};
use tupa_db::{Database, DbConfig};
use tupa_sync::{
    AdapterRegistry, ClientConfig, ConsumptionAggregator, ConsumptionProcessor, ConsumptionStore,
    EngineConfig, ErpClient, OrchestratorSettings, PushSettings, PushSyncService,
    SyncOrchestrator, SyncRequest,
};

/// Outcome of one client's `sync` task.
#[derive(Debug, Serialize)]
struct ClientOutcome {
    client_id: String,
    sync: SyncReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    push: Option<PushReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    push_error: Option<String>,
}

impl ClientOutcome {
    fn succeeded(&self) -> bool {
        self.sync.success
            && self.push_error.is_none()
            && self.push.as_ref().map_or(true, |p| p.success)
    }
}

#[derive(Debug, Serialize)]
struct CleanupOutcome {
    days_old: u32,
    erp_records_deleted: usize,
    sync_logs_deleted: u64,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub struct Engine {
    config: EngineConfig,
    database: Database,
    registry: Arc<AdapterRegistry>,
}

impl Engine {
    pub async fn open(config: EngineConfig) -> anyhow::Result<Self> {
        let database = Database::new(DbConfig::new(&config.database.path))
            .await
            .with_context(|| format!("opening database {}", config.database.path.display()))?;

        Ok(Engine {
            config,
            database,
            registry: Arc::new(AdapterRegistry::builtin()),
        })
    }

    pub async fn close(&self) {
        self.database.close().await;
    }

    fn orchestrator(&self) -> SyncOrchestrator {
        let aggregator = ConsumptionAggregator::new(Arc::new(self.database.consumption()));
        SyncOrchestrator::new(
            self.registry.clone(),
            Arc::new(ConsumptionProcessor::new(aggregator)),
        )
        .with_settings(OrchestratorSettings::from(&self.config.sync))
        .with_log_store(Arc::new(self.database.sync_logs()))
    }

    /// The push service, or `None` when no ERP is configured.
    fn push_service(&self) -> anyhow::Result<Option<PushSyncService>> {
        let Some(erp) = &self.config.erp else {
            return Ok(None);
        };
        let client = ErpClient::new(erp).context("building ERP client")?;
        Ok(Some(PushSyncService::new(
            Arc::new(client),
            PushSettings::from(erp),
        )))
    }

    fn require_push_service(&self) -> anyhow::Result<PushSyncService> {
        self.push_service()?
            .ok_or_else(|| anyhow!("no [erp] section in the engine configuration"))
    }

    fn clients(&self, only: Option<&str>) -> anyhow::Result<Vec<ClientConfig>> {
        let clients = match only {
            Some(id) => vec![self
                .config
                .client(id)
                .cloned()
                .ok_or_else(|| anyhow!("client '{}' is not configured", id))?],
            None => self.config.clients.clone(),
        };
        if clients.is_empty() {
            bail!("no clients configured");
        }
        Ok(clients)
    }

    pub async fn sync(
        &self,
        only: Option<&str>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        push: bool,
    ) -> anyhow::Result<()> {
        let range = window
            .map(|(from, to)| DateRange::new(from, to))
            .transpose()
            .context("invalid --from/--to window")?;

        let push_service = if push {
            self.push_service()?.map(Arc::new)
        } else {
            None
        };
        if push && push_service.is_none() {
            warn!("No ERP configured, records stay local");
        }

        let orchestrator = Arc::new(self.orchestrator());
        let store: Arc<dyn ConsumptionStore> = Arc::new(self.database.consumption());

        let mut tasks = JoinSet::new();
        for client in self.clients(only)? {
            let mut request = SyncRequest::from_client(&client);
            if let Some(range) = range {
                request = request.with_range(range);
            }
            let orchestrator = orchestrator.clone();
            let push_service = push_service.clone();
            let store = store.clone();

            tasks.spawn(async move {
                let sync = orchestrator.run(&request).await;
                let mut outcome = ClientOutcome {
                    client_id: request.client_id.clone(),
                    sync,
                    push: None,
                    push_error: None,
                };

                if let (Some(push), true) = (&push_service, outcome.sync.success) {
                    let span = touched_days(&outcome.sync);
                    match push
                        .push_for_client(store.as_ref(), &request.client_id, Some(span))
                        .await
                    {
                        Ok(report) => outcome.push = Some(report),
                        Err(err) => outcome.push_error = Some(err.to_string()),
                    }
                }
                outcome
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "Client sync task panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        print_json(&outcomes)?;

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        info!(clients = outcomes.len(), failed, "Sync finished");
        if failed > 0 {
            bail!("{} of {} client runs failed", failed, outcomes.len());
        }
        Ok(())
    }

    pub async fn push(&self, client_id: &str, days: u32) -> anyhow::Result<()> {
        if self.config.client(client_id).is_none() {
            warn!(client_id, "Client is not in the configuration, pushing stored records anyway");
        }
        let service = self.require_push_service()?;
        let span = DaySpan::last_days(Utc::now().date_naive(), days.max(1));
        let store = self.database.consumption();

        let report = service.push_for_client(&store, client_id, Some(span)).await?;
        print_json(&report)?;
        if !report.success {
            bail!("ERP push failed");
        }
        Ok(())
    }

    pub async fn cleanup(&self, days: Option<u32>) -> anyhow::Result<()> {
        let days_old = days
            .or_else(|| self.config.erp.as_ref().and_then(|e| e.cleanup_after_days))
            .ok_or_else(|| anyhow!("pass --days or set erp.cleanup_after_days"))?;
        let service = self.require_push_service()?;

        let erp_records_deleted = service.cleanup_old_records(days_old).await?;
        let sync_logs_deleted = self.database.sync_logs().cleanup_old_entries(days_old).await?;

        print_json(&CleanupOutcome {
            days_old,
            erp_records_deleted,
            sync_logs_deleted,
        })
    }

    pub async fn history(&self, client_id: &str, limit: u32) -> anyhow::Result<()> {
        let entries = self.database.sync_logs().recent(client_id, limit).await?;
        print_json(&entries)
    }
}

/// Days whose consumption records a run may have written: the fetched
/// window plus the run's own date, which stamps the records.
fn touched_days(report: &SyncReport) -> DaySpan {
    let today: NaiveDate = report.timestamp.date_naive();
    match report.range {
        Some(range) => {
            let days = range.days();
            DaySpan {
                from: days.from.min(today),
                to: days.to.max(today),
            }
        }
        None => DaySpan::single(today),
    }
}
