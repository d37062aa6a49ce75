use super::*;
use cartwright::cart::{CartExecutor, ThresholdMonitor};
use cartwright::catalog::{merge_catalog, CatalogScraper};
use cartwright::models::{LineOrigin, ProductSource};
use tokio_test::assert_ok;

const BONUS: [Item; 2] = [item("wi1", "AH Kipfilet", "5.49"), item("wi2", "AH Halfvolle melk", "1.19")];
const HISTORY: [Item; 2] = [item("wi2", "AH Halfvolle melk", "1.19"), item("wi3", "AH Volkoren brood", "2.50")];

async fn scraped_catalog(browser: Arc<ScriptedBrowser>, config: &AppConfig) -> Vec<Product> {
    let cache = ProductCache::in_memory().await.unwrap();
    let scraper = CatalogScraper::new(browser, cache, config).unwrap();
    let bonus = scraper.scrape(ProductSource::Bonus, true).await.unwrap();
    let history = scraper.scrape(ProductSource::History, true).await.unwrap();
    merge_catalog(bonus, history)
}

#[tokio::test]
async fn test_scraped_products_can_be_added() -> anyhow::Result<()> {
    let config = test_config(RunMode::Auto, "5");
    let browser = Shop::new(&BONUS, &HISTORY).build();
    browser.set_authenticated(true);

    let catalog = scraped_catalog(browser.clone(), &config).await;
    // wi2 appears on both listings but only once in the catalog
    assert_eq!(catalog.len(), 3);

    let mut executor = CartExecutor::from_config(browser.clone(), &config);
    for product in &catalog {
        let line = assert_ok!(executor.add_item(product, 1, LineOrigin::Planned).await);
        assert!(line.is_added(), "{:?}", line.failure_reason);
    }

    let monitor = ThresholdMonitor::from_config(browser.clone(), &config);
    let state = monitor.current_state(executor.lines()).await?;
    assert_eq!(state.total, d("9.18"));
    assert_eq!(state.lines_added, 3);
    assert_eq!(browser.cart_count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_top_up_skips_products_already_tried() -> anyhow::Result<()> {
    let config = test_config(RunMode::Auto, "10");
    let browser = Shop::new(&BONUS, &HISTORY).with_broken_page("wi2").build();
    browser.set_authenticated(true);
    let catalog = scraped_catalog(browser.clone(), &config).await;

    let mut executor = CartExecutor::from_config(browser.clone(), &config);
    let milk = catalog.iter().find(|p| p.id.as_str() == "wi2").unwrap();
    let line = executor.add_item(milk, 1, LineOrigin::Planned).await?;
    assert!(line.is_failed());

    let monitor = ThresholdMonitor::from_config(browser.clone(), &config);
    let state = monitor.current_state(executor.lines()).await?;
    assert!(ThresholdMonitor::needs_top_up(&state, config.cart.minimum_total));

    let attempted = executor.attempted();
    let remaining: Vec<Product> = catalog.into_iter().filter(|p| !attempted.contains(&p.id)).collect();
    let picks = ThresholdMonitor::select_top_up(&remaining, state.shortfall(config.cart.minimum_total));
    let ids: Vec<&str> = picks.iter().map(|(p, _)| p.id.as_str()).collect();
    // the failed product is not retried by the top-up
    assert_eq!(ids, vec!["wi3", "wi1"]);
    Ok(())
}
