use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::BrowserDriver;
use crate::cart::{CartExecutor, ThresholdMonitor};
use crate::catalog::{merge_catalog, CatalogScraper, ProductCache};
use crate::config::AppConfig;
use crate::models::{
    Bucket, CartLineResult, CartState, LineOrigin, Product, ProductId, ProductSource, RunMode, RunOutcome,
    RunStatus, RunSummary,
};
use crate::plugins::{validate_buckets, BucketPlanner, PluginManager};
use crate::session::{LoginGate, LoginProbe, LoginStatus, ManualLogin, SessionStore, Unattended};
use crate::utils::cancel::Cancellation;
use crate::utils::error::AppError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    SessionRestoring,
    Scraping,
    Planning,
    Adding,
    Monitoring,
    Finalizing,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::SessionRestoring => "session-restoring",
            RunPhase::Scraping => "scraping",
            RunPhase::Planning => "planning",
            RunPhase::Adding => "adding",
            RunPhase::Monitoring => "monitoring",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// What the fill loop observed before handing over to finalization.
#[derive(Debug, Default)]
struct FillResult {
    threshold_met: bool,
    shortfall_reason: Option<String>,
    total_error: Option<String>,
}

/// Everything a run accumulates, kept outside the phase methods so a failure
/// at any point still leaves the lines recorded so far.
struct RunContext {
    lines: Vec<CartLineResult>,
    warnings: Vec<String>,
    state: Option<CartState>,
}

/// Sequences one shopping run from session restore to the final summary.
pub struct RunOrchestrator {
    config: AppConfig,
    driver: Arc<dyn BrowserDriver>,
    sessions: SessionStore,
    probe: LoginProbe,
    login_gate: Box<dyn LoginGate>,
    scraper: CatalogScraper,
    planner: Arc<dyn BucketPlanner>,
    plugins: PluginManager,
    phases: Vec<RunPhase>,
}

impl RunOrchestrator {
    pub fn new(
        config: AppConfig,
        driver: Arc<dyn BrowserDriver>,
        sessions: SessionStore,
        cache: ProductCache,
        planner: Arc<dyn BucketPlanner>,
        plugins: PluginManager,
    ) -> Result<Self> {
        let scraper = CatalogScraper::new(driver.clone(), cache, &config)?;
        let login_gate: Box<dyn LoginGate> = match config.run.mode {
            RunMode::Auto => Box::new(Unattended),
            RunMode::Interactive => Box::new(ManualLogin::new(
                config.site.login_url.clone(),
                Duration::from_secs(config.session.login_timeout_secs),
                Duration::from_millis(config.session.login_poll_ms),
            )),
        };

        Ok(Self {
            probe: LoginProbe::from_config(&config.site),
            config,
            driver,
            sessions,
            login_gate,
            scraper,
            planner,
            plugins,
            phases: vec![RunPhase::Init],
        })
    }

    pub fn with_login_gate(mut self, login_gate: Box<dyn LoginGate>) -> Self {
        self.login_gate = login_gate;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Init)
    }

    /// Every phase the last run passed through, in order.
    pub fn phase_history(&self) -> &[RunPhase] {
        &self.phases
    }

    pub fn cache(&self) -> &ProductCache {
        self.scraper.cache()
    }

    fn transition(&mut self, next: RunPhase) {
        let previous = self.phase();
        if previous != next {
            info!(from = %previous, to = %next, "Run phase");
            self.phases.push(next);
        }
    }

    /// Run to completion. Always produces a summary, whatever went wrong.
    pub async fn run(&mut self, requirement: &str, use_cache: bool, cancel: &Cancellation) -> RunSummary {
        let mode = self.config.run.mode;
        let cancel = match mode {
            RunMode::Auto => cancel.with_budget(self.config.run.time_budget()),
            RunMode::Interactive => cancel.clone(),
        };
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.phases = vec![RunPhase::Init];
        info!(%run_id, %mode, "Starting shopping run");

        let mut ctx = RunContext {
            lines: Vec::new(),
            warnings: Vec::new(),
            state: None,
        };
        let result = self.drive(requirement, use_cache, &cancel, &mut ctx).await;
        if result.is_err() {
            self.refresh_total(&mut ctx).await;
        }

        self.transition(RunPhase::Finalizing);
        let summary = self.finalize(run_id, mode, started_at, result, ctx);

        self.plugins.notify_all(&summary).await;

        if mode.is_auto() || cancel.is_cancelled() {
            match self.driver.close().await {
                Ok(()) => debug!("Browser released"),
                Err(e) => warn!("Could not close the browser: {}", e),
            }
        }
        if self.config.run.clear_cache_after_fill && summary.status() == RunStatus::Success {
            if let Err(e) = self.scraper.cache().clear(None).await {
                warn!("Could not clear the product cache: {}", e);
            }
        }

        self.transition(RunPhase::Done);
        summary
    }

    fn finalize(
        &self,
        run_id: Uuid,
        mode: RunMode,
        started_at: DateTime<Utc>,
        result: Result<FillResult>,
        ctx: RunContext,
    ) -> RunSummary {
        let failed = ctx.lines.iter().filter(|l| l.is_failed()).count();
        let (status, reason) = match result {
            Err(e) => (RunStatus::Aborted, Some(e.to_string())),
            Ok(fill) => {
                if let Some(error) = fill.total_error {
                    (RunStatus::Partial, Some(error))
                } else if !fill.threshold_met {
                    (RunStatus::Partial, fill.shortfall_reason)
                } else if failed > 0 {
                    (RunStatus::Partial, Some(format!("{} item(s) could not be added", failed)))
                } else {
                    (RunStatus::Success, None)
                }
            }
        };

        let final_state = match ctx.state {
            Some(state) => CartState::observed(state.total, state.currency, &ctx.lines),
            None => CartState::observed(Decimal::ZERO, self.config.cart.currency.clone(), &ctx.lines),
        };

        metrics::counter!("runs_total", "status" => status.to_string()).increment(1);
        match &reason {
            Some(reason) => info!(%run_id, %status, total = %final_state.total, reason = %reason, "Run finished"),
            None => info!(%run_id, %status, total = %final_state.total, "Run finished"),
        }

        RunSummary::finalize(RunOutcome {
            run_id,
            mode,
            started_at,
            final_state,
            lines: ctx.lines,
            status,
            reason,
            warnings: ctx.warnings,
        })
    }

    /// Re-read the live total after a run that stopped outside the fill loop.
    /// Keeps the last observed state when the cart cannot be read.
    async fn refresh_total(&self, ctx: &mut RunContext) {
        if !ctx.lines.iter().any(|l| l.is_added()) {
            return;
        }
        let monitor = ThresholdMonitor::from_config(self.driver.clone(), &self.config);
        let bound = Duration::from_millis(self.config.browser.action_timeout_ms);
        match tokio::time::timeout(bound, monitor.current_state(&ctx.lines)).await {
            Ok(Ok(state)) => {
                debug!(total = %state.total, "Re-read cart total for the summary");
                ctx.state = Some(state);
            }
            Ok(Err(e)) => warn!("Keeping last observed cart total: {}", e),
            Err(_) => warn!("Keeping last observed cart total: no reading within {}ms", bound.as_millis()),
        }
    }

    async fn drive(
        &mut self,
        requirement: &str,
        use_cache: bool,
        cancel: &Cancellation,
        ctx: &mut RunContext,
    ) -> Result<FillResult> {
        self.transition(RunPhase::SessionRestoring);
        self.restore_session(cancel).await?;

        self.transition(RunPhase::Scraping);
        let (catalog, history) = self.scrape_catalog(use_cache, cancel, ctx).await?;

        self.transition(RunPhase::Planning);
        let buckets = self.plan(&catalog, requirement, &history, cancel, ctx).await?;

        self.transition(RunPhase::Adding);
        let mut executor = CartExecutor::from_config(self.driver.clone(), &self.config);
        let result = self.fill(&mut executor, &catalog, &buckets, cancel, ctx).await;
        ctx.lines = executor.into_lines();
        result
    }

    async fn restore_session(&self, cancel: &Cancellation) -> Result<()> {
        if let Some(record) = self.sessions.load().await {
            self.driver.import_state(&record.state).await?;
            self.driver.navigate(&self.config.site.account_url).await?;
            match self.probe.probe(self.driver.as_ref()).await {
                LoginStatus::LoggedOut => {
                    warn!(profile = %self.sessions.profile(), "Stored session was rejected by the site");
                    if let Err(e) = self.sessions.invalidate().await {
                        warn!("Could not invalidate the rejected session: {}", e);
                    }
                }
                status => {
                    if status == LoginStatus::Unknown {
                        debug!("Could not confirm the restored session, continuing with it");
                    }
                    info!(profile = %self.sessions.profile(), "Restored session");
                    // the site may have rotated cookies; keep the record current
                    self.persist_session().await?;
                    return Ok(());
                }
            }
        }
        self.login(cancel).await
    }

    /// Get a fresh login through the gate and persist it.
    async fn login(&self, cancel: &Cancellation) -> Result<()> {
        self.login_gate
            .await_login(self.driver.as_ref(), &self.probe, cancel)
            .await?;
        self.persist_session().await
    }

    async fn persist_session(&self) -> Result<()> {
        let state = self.driver.export_state().await?;
        if state.cookies.is_empty() {
            warn!("Browser exported no cookies, session not saved");
            return Ok(());
        }
        if let Err(e) = self.sessions.save_state(state).await {
            warn!("Could not save the session: {}", e);
        }
        Ok(())
    }

    async fn scrape_catalog(
        &self,
        use_cache: bool,
        cancel: &Cancellation,
        ctx: &mut RunContext,
    ) -> Result<(Vec<Product>, Vec<Product>)> {
        let mut listings: HashMap<ProductSource, Vec<Product>> = HashMap::new();
        for source in ProductSource::ALL {
            let products = match guarded(cancel, self.scraper.scrape(source, use_cache)).await? {
                Ok(products) => products,
                Err(e) => {
                    warn!(%source, "Listing incomplete: {}", e);
                    ctx.warnings.push(format!("{} listing: {}", source, e));
                    e.partial_results
                }
            };
            listings.insert(source, products);
        }

        let bonus = listings.remove(&ProductSource::Bonus).unwrap_or_default();
        let history = listings.remove(&ProductSource::History).unwrap_or_default();
        let catalog = merge_catalog(bonus, history.clone());
        info!(products = catalog.len(), history = history.len(), "Catalog ready");
        if catalog.is_empty() {
            return Err(AppError::Planner("no products found on any listing".to_string()));
        }
        Ok((catalog, history))
    }

    async fn plan(
        &self,
        catalog: &[Product],
        requirement: &str,
        history: &[Product],
        cancel: &Cancellation,
        ctx: &mut RunContext,
    ) -> Result<Vec<Bucket>> {
        let timeout = Duration::from_secs(self.config.planner.timeout_secs);
        let planned = guarded(
            cancel,
            tokio::time::timeout(timeout, self.planner.plan(catalog, requirement, history)),
        )
        .await?
        .map_err(|_| AppError::Planner(format!("no plan within {}s", timeout.as_secs())))?
        .map_err(|e| match e {
            AppError::Planner(_) => e,
            other => AppError::Planner(other.to_string()),
        })?;

        let (buckets, warnings) = validate_buckets(planned, catalog);
        for warning in warnings {
            warn!("Planner output: {}", warning);
            ctx.warnings.push(warning);
        }
        if buckets.is_empty() {
            return Err(AppError::Planner("plan contains no usable items".to_string()));
        }
        info!(
            planner = %self.planner.name(),
            buckets = buckets.len(),
            items = buckets.iter().map(|b| b.items.len()).sum::<usize>(),
            "Shopping list planned"
        );
        Ok(buckets)
    }

    async fn fill(
        &mut self,
        executor: &mut CartExecutor,
        catalog: &[Product],
        buckets: &[Bucket],
        cancel: &Cancellation,
        ctx: &mut RunContext,
    ) -> Result<FillResult> {
        let by_id: HashMap<&ProductId, &Product> = catalog.iter().map(|p| (&p.id, p)).collect();
        for bucket in buckets {
            debug!(bucket = %bucket.name, items = bucket.items.len(), "Adding bucket");
            for item in &bucket.items {
                let Some(product) = by_id.get(&item.product_id) else {
                    continue;
                };
                self.add(executor, product, item.quantity, LineOrigin::Planned, cancel).await?;
            }
        }

        let monitor = ThresholdMonitor::from_config(self.driver.clone(), &self.config);
        let minimum = self.config.cart.minimum_total;
        let round_limit = self.config.cart.top_up_rounds;
        let mut rounds = 0;

        loop {
            self.transition(RunPhase::Monitoring);
            check(cancel)?;

            let state = match guarded(cancel, monitor.current_state(executor.lines())).await? {
                Ok(state) => state,
                Err(e) => {
                    warn!("{}", e);
                    return Ok(FillResult {
                        total_error: Some(e.to_string()),
                        ..FillResult::default()
                    });
                }
            };
            info!(total = %state.total, minimum = %minimum, "Cart total");
            ctx.state = Some(state.clone());

            if !ThresholdMonitor::needs_top_up(&state, minimum) {
                return Ok(FillResult {
                    threshold_met: true,
                    ..FillResult::default()
                });
            }

            let unreachable = AppError::ThresholdUnreachable {
                total: state.total.to_string(),
                minimum: minimum.to_string(),
                rounds,
            };
            if rounds >= round_limit {
                warn!("{}", unreachable);
                return Ok(FillResult {
                    shortfall_reason: Some(unreachable.to_string()),
                    ..FillResult::default()
                });
            }

            let attempted = executor.attempted();
            let remaining: Vec<Product> = catalog
                .iter()
                .filter(|p| !attempted.contains(&p.id))
                .cloned()
                .collect();
            let picks = ThresholdMonitor::select_top_up(&remaining, state.shortfall(minimum));
            if picks.is_empty() {
                warn!("Catalog exhausted: {}", unreachable);
                return Ok(FillResult {
                    shortfall_reason: Some(format!("catalog exhausted; {}", unreachable)),
                    ..FillResult::default()
                });
            }

            rounds += 1;
            self.transition(RunPhase::Adding);
            info!(round = rounds, items = picks.len(), "Topping up cart");
            for (product, quantity) in picks {
                self.add(executor, &product, quantity, LineOrigin::TopUp, cancel).await?;
            }
        }
    }

    /// One add, with a single re-login when the site drops the session mid-run.
    async fn add(
        &self,
        executor: &mut CartExecutor,
        product: &Product,
        quantity: u32,
        origin: LineOrigin,
        cancel: &Cancellation,
    ) -> Result<()> {
        check(cancel)?;
        match guarded(cancel, executor.add_item(product, quantity, origin)).await? {
            Ok(_) => Ok(()),
            Err(AppError::SessionInvalidated(reason)) => {
                warn!(%reason, "Session dropped while adding items");
                if let Err(e) = self.sessions.invalidate().await {
                    warn!("Could not invalidate the session: {}", e);
                }
                self.login(cancel).await?;
                guarded(cancel, executor.add_item(product, quantity, origin)).await??;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn check(cancel: &Cancellation) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled(cancel.reason().to_string()));
    }
    Ok(())
}

/// Race `future` against cancellation.
async fn guarded<T>(cancel: &Cancellation, future: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled(cancel.reason().to_string())),
        value = future => Ok(value),
    }
}
