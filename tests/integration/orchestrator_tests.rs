use super::*;
use cartwright::models::{LineOrigin, LineOutcome, ProductSource, RunStatus};
use cartwright::RunPhase;

const BONUS: [Item; 2] = [item("wi1", "AH Kipfilet", "5.49"), item("wi2", "AH Halfvolle melk", "1.19")];
const HISTORY: [Item; 1] = [item("wi3", "AH Volkoren brood", "2.50")];

fn shop() -> Shop {
    Shop::new(&BONUS, &HISTORY)
}

#[tokio::test]
async fn test_restored_session_fills_cart() -> anyhow::Result<()> {
    let browser = shop().build();
    let sessions = stored_sessions().await;
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 2), ("wi3", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "10"), browser.clone(), sessions.clone(), planner.clone()).await;

    let summary = run.run("kip en brood", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    assert_eq!(summary.final_state().total, d("13.48"));
    assert_eq!(summary.added().count(), 2);
    assert_eq!(browser.cart_count(), 3);
    assert_eq!(planner.calls(), 1);
    assert_eq!(
        run.phase_history(),
        &[
            RunPhase::Init,
            RunPhase::SessionRestoring,
            RunPhase::Scraping,
            RunPhase::Planning,
            RunPhase::Adding,
            RunPhase::Monitoring,
            RunPhase::Finalizing,
            RunPhase::Done,
        ]
    );
    // unattended runs release the browser
    assert!(browser.is_closed());
    assert!(sessions.load().await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_top_up_reaches_minimum() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("dairy", &[("wi2", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    let top_ups: Vec<&str> = summary
        .lines()
        .iter()
        .filter(|l| l.origin == LineOrigin::TopUp)
        .map(|l| l.product_id.as_str())
        .collect();
    // cheapest first until the 3.81 shortfall is covered
    assert_eq!(top_ups, vec!["wi3", "wi1"]);
    assert_eq!(summary.final_state().total, d("9.18"));
    assert!(run.phase_history().ends_with(&[
        RunPhase::Adding,
        RunPhase::Monitoring,
        RunPhase::Adding,
        RunPhase::Monitoring,
        RunPhase::Finalizing,
        RunPhase::Done,
    ]));
    Ok(())
}

#[tokio::test]
async fn test_exhausted_catalog_is_partial() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("dairy", &[("wi2", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "50"), browser.clone(), stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Partial);
    assert!(summary.reason().unwrap().contains("catalog exhausted"));
    // every catalog product was tried exactly once
    assert_eq!(summary.lines().len(), 3);
    assert_eq!(summary.final_state().total, d("9.18"));
    Ok(())
}

#[tokio::test]
async fn test_top_up_rounds_are_bounded() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("dairy", &[("wi2", 1)])]));
    let mut config = test_config(RunMode::Auto, "50");
    config.cart.top_up_rounds = 0;
    let mut run = orchestrator(config, browser.clone(), stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Partial);
    assert!(summary.reason().unwrap().contains("stayed below minimum"));
    assert_eq!(summary.lines().len(), 1);
    assert_eq!(browser.cart_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_line_makes_run_partial() -> anyhow::Result<()> {
    let browser = shop().with_broken_page("wi3").build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 2), ("wi3", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "10"), browser.clone(), stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Partial);
    assert!(summary.reason().unwrap().contains("could not be added"));
    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].product_id.as_str(), "wi3");
    assert_eq!(failed[0].attempts, 2);
    assert_eq!(summary.final_state().lines_failed, 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_across_buckets_added_once() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![
        bucket("meat", &[("wi1", 1)]),
        bucket("favourites", &[("wi1", 1)]),
    ]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    let outcomes: Vec<LineOutcome> = summary.lines().iter().map(|l| l.outcome).collect();
    assert_eq!(outcomes, vec![LineOutcome::Added, LineOutcome::SkippedDuplicate]);
    assert_eq!(browser.cart_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_auto_mode_without_session_aborts_before_scraping() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), memory_sessions(), planner.clone()).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(summary.reason().unwrap().contains("Authentication required"));
    assert!(summary.lines().is_empty());
    assert_eq!(planner.calls(), 0);
    assert!(!browser.navigations().iter().any(|url| url == BONUS_URL));
    assert!(!run.phase_history().contains(&RunPhase::Scraping));
    assert_eq!(run.phase(), RunPhase::Done);
    Ok(())
}

#[tokio::test]
async fn test_rejected_session_is_invalidated() -> anyhow::Result<()> {
    let browser = shop().build();
    let sessions = memory_sessions();
    let mut stale = session_cookie();
    stale.value = "expired-token".into();
    sessions
        .save_state(BrowserState {
            cookies: vec![stale],
            ..BrowserState::default()
        })
        .await?;
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser, sessions.clone(), planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(sessions.load().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_interactive_login_is_persisted() -> anyhow::Result<()> {
    let browser = shop().build();
    let sessions = memory_sessions();
    let human = ScriptedHuman::new(browser.clone());
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Interactive, "5"), browser.clone(), sessions.clone(), planner)
        .await
        .with_login_gate(Box::new(human.clone()));

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    assert_eq!(human.logins(), 1);
    let record = sessions.load().await.expect("session saved after login");
    assert!(!record.state.cookies.is_empty());
    // the browser stays open for checkout
    assert!(!browser.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_session_lost_mid_run_recovers_once() -> anyhow::Result<()> {
    let browser = shop().build();
    let human = ScriptedHuman::new(browser.clone());
    let site = browser.clone();
    let planner = Arc::new(
        FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])])
            .with_hook(Box::new(move || site.set_authenticated(false))),
    );
    let mut run = orchestrator(test_config(RunMode::Interactive, "5"), browser.clone(), stored_sessions().await, planner)
        .await
        .with_login_gate(Box::new(human.clone()));

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    assert_eq!(human.logins(), 1);
    assert_eq!(summary.lines().len(), 1);
    assert!(summary.lines()[0].is_added());
    assert_eq!(browser.cart_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_session_lost_in_auto_mode_aborts_with_lines_kept() -> anyhow::Result<()> {
    let browser = shop().build();
    let site = browser.clone();
    let planner = Arc::new(
        FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])])
            .with_hook(Box::new(move || site.set_authenticated(false))),
    );
    let sessions = stored_sessions().await;
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), sessions.clone(), planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(summary.reason().unwrap().contains("Authentication required"));
    assert!(sessions.load().await.is_none());
    assert_eq!(browser.cart_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_planner_failure_aborts() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::failing());
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), stored_sessions().await, planner.clone()).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(summary.reason().unwrap().contains("Planner error"));
    assert_eq!(planner.calls(), 1);
    assert!(summary.lines().is_empty());
    assert_eq!(browser.cart_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_plan_with_only_unknown_items_aborts() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("ghosts", &[("wi404", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser, stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(summary.reason().unwrap().contains("no usable items"));
    assert!(!summary.warnings().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_empty_catalog_aborts_before_planning() -> anyhow::Result<()> {
    let browser = Shop::new(&[], &[]).build();
    let planner = Arc::new(FixedPlanner::new(vec![]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser, stored_sessions().await, planner.clone()).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert_eq!(planner.calls(), 0);
    // one warning per listing
    assert_eq!(summary.warnings().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_aborts_and_closes_browser() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Interactive, "5"), browser.clone(), stored_sessions().await, planner.clone()).await;

    let cancel = Cancellation::new();
    cancel.cancel();
    let summary = run.run("", true, &cancel).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(summary.reason().unwrap().contains("cancelled"));
    assert_eq!(planner.calls(), 0);
    assert!(browser.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_total_is_partial() -> anyhow::Result<()> {
    let browser = shop().build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut config = test_config(RunMode::Auto, "5");
    config.site.cart_total = vec!["#no-such-widget".into()];
    let mut run = orchestrator(config, browser.clone(), stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Partial);
    assert!(summary.reason().unwrap().contains("Cart total unavailable"));
    assert_eq!(summary.added().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_total_comes_from_the_live_cart() -> anyhow::Result<()> {
    // items left over from an earlier session count towards the minimum
    let browser = shop().with_cart(4, "40.00").build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 2)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "50"), browser, stored_sessions().await, planner).await;

    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    assert_eq!(summary.final_state().total, d("50.98"));
    assert!(summary.lines().iter().all(|l| l.origin == LineOrigin::Planned));
    Ok(())
}

#[tokio::test]
async fn test_successful_fill_can_clear_cache() -> anyhow::Result<()> {
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));

    let mut keep = orchestrator(test_config(RunMode::Auto, "5"), shop().build(), stored_sessions().await, planner.clone()).await;
    keep.run("", true, &Cancellation::new()).await;
    assert!(keep.cache().get(ProductSource::Bonus, chrono::Duration::hours(1)).await.is_some());

    let mut config = test_config(RunMode::Auto, "5");
    config.run.clear_cache_after_fill = true;
    let mut clear = orchestrator(config, shop().build(), stored_sessions().await, planner).await;
    let summary = clear.run("", true, &Cancellation::new()).await;
    assert_eq!(summary.status(), RunStatus::Success);
    assert!(clear.cache().get(ProductSource::Bonus, chrono::Duration::hours(1)).await.is_none());
    Ok(())
}

/// Passes everything through to the shop and trips `cancel` when `url` is visited.
struct InterruptAt {
    inner: Arc<ScriptedBrowser>,
    url: String,
    cancel: Cancellation,
}

#[async_trait]
impl BrowserDriver for InterruptAt {
    async fn navigate(&self, url: &str) -> std::result::Result<(), DriverError> {
        if url == self.url {
            self.cancel.cancel();
        }
        self.inner.navigate(url).await
    }

    async fn current_url(&self) -> std::result::Result<String, DriverError> {
        self.inner.current_url().await
    }

    async fn locate(&self, selector: &Selector) -> std::result::Result<ElementHandle, DriverError> {
        self.inner.locate(selector).await
    }

    async fn locate_all(&self, selector: &Selector) -> std::result::Result<Vec<ElementHandle>, DriverError> {
        self.inner.locate_all(selector).await
    }

    async fn click(&self, element: &ElementHandle) -> std::result::Result<(), DriverError> {
        self.inner.click(element).await
    }

    async fn read_text(&self, element: &ElementHandle) -> std::result::Result<String, DriverError> {
        self.inner.read_text(element).await
    }

    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> std::result::Result<Option<String>, DriverError> {
        self.inner.read_attribute(element, name).await
    }

    async fn page_source(&self) -> std::result::Result<String, DriverError> {
        self.inner.page_source().await
    }

    async fn scroll_to_bottom(&self) -> std::result::Result<(), DriverError> {
        self.inner.scroll_to_bottom().await
    }

    async fn export_state(&self) -> std::result::Result<BrowserState, DriverError> {
        self.inner.export_state().await
    }

    async fn import_state(&self, state: &BrowserState) -> std::result::Result<(), DriverError> {
        self.inner.import_state(state).await
    }

    async fn close(&self) -> std::result::Result<(), DriverError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_cancelled_run_reports_live_total() -> anyhow::Result<()> {
    let browser = shop().build();
    let cancel = Cancellation::new();
    let driver = Arc::new(InterruptAt {
        inner: browser.clone(),
        url: product_url("wi2"),
        cancel: cancel.clone(),
    });
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1), ("wi2", 1)])]));
    let mut run = RunOrchestrator::new(
        test_config(RunMode::Interactive, "50"),
        driver,
        stored_sessions().await,
        ProductCache::in_memory().await?,
        planner,
        PluginManager::new(),
    )?;

    let summary = run.run("", true, &cancel).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(summary.added().count() >= 1);
    // the summary carries what the cart shows, not what the loop last saw
    assert_eq!(summary.final_state().total, browser.cart_total());
    assert!(summary.final_state().total >= d("5.49"));
    assert_eq!(summary.final_state().lines_added, summary.added().count());
    assert!(browser.is_closed());
    Ok(())
}
