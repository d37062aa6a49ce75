use super::*;
use cartwright::models::{RunStatus, SessionRecord};
use cartwright::session::FileSessionBackend;
use tempfile::TempDir;

fn file_sessions(dir: &TempDir) -> SessionStore {
    SessionStore::new(
        Arc::new(FileSessionBackend::new(dir.path())),
        "household",
        chrono::Duration::days(14),
    )
}

const BONUS: [Item; 1] = [item("wi1", "AH Kipfilet", "5.49")];

#[tokio::test]
async fn test_login_survives_restart() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));

    // first run: a human logs in once
    let browser = Shop::new(&BONUS, &[]).build();
    let human = ScriptedHuman::new(browser.clone());
    let mut first = orchestrator(test_config(RunMode::Interactive, "5"), browser, file_sessions(&dir), planner.clone())
        .await
        .with_login_gate(Box::new(human.clone()));
    assert_eq!(first.run("", true, &Cancellation::new()).await.status(), RunStatus::Success);
    assert_eq!(human.logins(), 1);

    // second run: fresh browser and store, unattended, no login needed
    let browser = Shop::new(&BONUS, &[]).build();
    let mut second = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), file_sessions(&dir), planner).await;
    let summary = second.run("", false, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());
    assert!(browser.is_authenticated());
    assert!(!browser.navigations().iter().any(|url| url == LOGIN_URL));
    Ok(())
}

#[tokio::test]
async fn test_expired_file_session_is_not_used() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let sessions = file_sessions(&dir);
    let expired = SessionRecord::new(
        "household",
        BrowserState {
            cookies: vec![session_cookie()],
            ..BrowserState::default()
        },
        chrono::Duration::seconds(-60),
    );
    sessions.save(&expired).await?;
    assert!(sessions.load().await.is_none());

    let browser = Shop::new(&BONUS, &[]).build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser.clone(), sessions, planner).await;
    let summary = run.run("", true, &Cancellation::new()).await;

    assert_eq!(summary.status(), RunStatus::Aborted);
    assert!(!browser.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn test_profiles_are_isolated() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let household = file_sessions(&dir);
    household
        .save_state(BrowserState {
            cookies: vec![session_cookie()],
            ..BrowserState::default()
        })
        .await?;

    let work = SessionStore::new(Arc::new(FileSessionBackend::new(dir.path())), "work", chrono::Duration::days(14));
    assert!(work.load().await.is_none());
    assert!(household.load().await.is_some());

    household.invalidate().await?;
    assert!(household.load().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_restored_session_is_saved_again() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let sessions = file_sessions(&dir);
    let mut aging = SessionRecord::new(
        "household",
        BrowserState {
            cookies: vec![session_cookie()],
            ..BrowserState::default()
        },
        chrono::Duration::days(14),
    );
    aging.created_at -= chrono::Duration::days(10);
    aging.expires_at -= chrono::Duration::days(10);
    sessions.save(&aging).await?;

    let browser = Shop::new(&BONUS, &[]).build();
    let planner = Arc::new(FixedPlanner::new(vec![bucket("basics", &[("wi1", 1)])]));
    let mut run = orchestrator(test_config(RunMode::Auto, "5"), browser, sessions.clone(), planner).await;
    let summary = run.run("", true, &Cancellation::new()).await;
    assert_eq!(summary.status(), RunStatus::Success, "{:?}", summary.reason());

    let renewed = sessions.load().await.expect("session still stored");
    assert!(renewed.created_at > aging.created_at);
    assert!(renewed.expires_at > aging.expires_at);
    assert_eq!(renewed.state.cookies, vec![session_cookie()]);
    Ok(())
}
