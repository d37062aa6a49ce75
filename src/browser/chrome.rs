use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::{BrowserDriver, ElementHandle, Selector};
use crate::config::BrowserConfig;
use crate::models::{BrowserState, StoredCookie};
use crate::utils::error::DriverError;

/// Real browser session backed by a local Chrome/Chromium process.
///
/// `headless_chrome` is synchronous, so every call runs on the blocking pool.
pub struct ChromeDriver {
    session: Mutex<Option<(Browser, Arc<Tab>)>>,
    navigation_timeout: Duration,
    origin: String,
}

impl ChromeDriver {
    pub fn launch(config: &BrowserConfig, origin: &str) -> Result<Self, DriverError> {
        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-extensions"),
            OsStr::new("--disable-background-timer-throttling"),
            OsStr::new("--disable-backgrounding-occluded-windows"),
            OsStr::new("--disable-renderer-backgrounding"),
        ];
        if !config.headless {
            args.push(OsStr::new("--start-maximized"));
        }

        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .window_size(Some((config.window_width, config.window_height)))
            .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
            .args(args)
            .build()
            .map_err(|e| DriverError::Unavailable(format!("invalid launch options: {}", e)))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| DriverError::Unavailable(format!("failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| DriverError::Unavailable(format!("failed to open tab: {}", e)))?;
        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| DriverError::Unavailable(format!("failed to set user agent: {}", e)))?;
        tab.set_default_timeout(Duration::from_millis(config.action_timeout_ms));

        info!(headless = config.headless, "Launched Chrome");

        Ok(Self {
            session: Mutex::new(Some((browser, tab))),
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            origin: origin.to_string(),
        })
    }

    fn tab(&self) -> Result<Arc<Tab>, DriverError> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, tab)| tab.clone())
            .ok_or_else(|| DriverError::Unavailable("browser was closed".to_string()))
    }

    /// Run a blocking closure against the tab.
    async fn with_tab<T, F>(&self, op: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, DriverError> + Send + 'static,
    {
        let tab = self.tab()?;
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| DriverError::Unavailable(format!("browser task failed: {}", e)))?
    }
}

fn find_all<'a>(tab: &'a Tab, selector: &Selector) -> Vec<Element<'a>> {
    let found = match selector {
        Selector::Css(query) => tab.find_elements(query),
        Selector::XPath(query) => tab.find_elements_by_xpath(query),
    };
    // headless_chrome reports "no match" as an error
    found.unwrap_or_default()
}

fn nth<'a>(tab: &'a Tab, handle: &ElementHandle) -> Result<Element<'a>, DriverError> {
    find_all(tab, &handle.selector)
        .into_iter()
        .nth(handle.index)
        .ok_or_else(|| DriverError::ElementNotFound {
            selector: handle.selector.to_string(),
        })
}

fn interaction(handle: &ElementHandle, e: impl std::fmt::Display) -> DriverError {
    DriverError::Interaction {
        selector: handle.selector.to_string(),
        message: e.to_string(),
    }
}

fn to_stored(cookie: &headless_chrome::protocol::cdp::Network::Cookie) -> StoredCookie {
    StoredCookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        // CDP reports -1 for session cookies
        expires: (cookie.expires > 0.0).then_some(cookie.expires),
        secure: cookie.secure,
        http_only: cookie.http_only,
    }
}

fn to_param(cookie: &StoredCookie) -> Result<CookieParam, DriverError> {
    let mut value = serde_json::json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "secure": cookie.secure,
        "httpOnly": cookie.http_only,
    });
    if let Some(expires) = cookie.expires {
        value["expires"] = serde_json::json!(expires);
    }
    serde_json::from_value(value)
        .map_err(|e| DriverError::Unavailable(format!("cookie {} rejected: {}", cookie.name, e)))
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        let timeout = self.navigation_timeout;
        debug!(url = %url, "Navigating");
        self.with_tab(move |tab| {
            let failed = |e: anyhow::Error| DriverError::Navigation {
                url: url.clone(),
                message: e.to_string(),
            };
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url).map_err(failed)?;
            tab.wait_until_navigated().map_err(failed)?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.with_tab(|tab| Ok(tab.get_url())).await
    }

    async fn locate(&self, selector: &Selector) -> Result<ElementHandle, DriverError> {
        let selector = selector.clone();
        self.with_tab(move |tab| {
            if find_all(tab, &selector).is_empty() {
                Err(DriverError::ElementNotFound {
                    selector: selector.to_string(),
                })
            } else {
                Ok(ElementHandle::new(selector, 0))
            }
        })
        .await
    }

    async fn locate_all(&self, selector: &Selector) -> Result<Vec<ElementHandle>, DriverError> {
        let selector = selector.clone();
        self.with_tab(move |tab| {
            let count = find_all(tab, &selector).len();
            Ok((0..count)
                .map(|i| ElementHandle::new(selector.clone(), i))
                .collect())
        })
        .await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let handle = element.clone();
        self.with_tab(move |tab| {
            let target = nth(tab, &handle)?;
            target
                .scroll_into_view()
                .and_then(|el| el.click())
                .map_err(|e| interaction(&handle, e))?;
            Ok(())
        })
        .await
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String, DriverError> {
        let handle = element.clone();
        self.with_tab(move |tab| {
            nth(tab, &handle)?
                .get_inner_text()
                .map_err(|e| interaction(&handle, e))
        })
        .await
    }

    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let handle = element.clone();
        let name = name.to_string();
        self.with_tab(move |tab| {
            let result = nth(tab, &handle)?
                .call_js_fn(
                    "function(name) { return this.getAttribute(name); }",
                    vec![serde_json::json!(name)],
                    false,
                )
                .map_err(|e| interaction(&handle, e))?;
            Ok(result
                .value
                .and_then(|v| v.as_str().map(str::to_string)))
        })
        .await
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        self.with_tab(|tab| {
            tab.get_content()
                .map_err(|e| DriverError::Unavailable(format!("failed to read page: {}", e)))
        })
        .await
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        self.with_tab(|tab| {
            tab.evaluate("window.scrollTo(0, document.body.scrollHeight)", false)
                .map_err(|e| DriverError::Interaction {
                    selector: "window".to_string(),
                    message: e.to_string(),
                })?;
            Ok(())
        })
        .await
    }

    async fn export_state(&self) -> Result<BrowserState, DriverError> {
        self.with_tab(|tab| {
            let cookies = tab
                .get_cookies()
                .map_err(|e| DriverError::Unavailable(format!("failed to read cookies: {}", e)))?;
            let storage = tab
                .evaluate("JSON.stringify(Object.assign({}, window.localStorage))", false)
                .ok()
                .and_then(|obj| obj.value)
                .and_then(|v| v.as_str().map(str::to_string))
                .and_then(|raw| serde_json::from_str::<BTreeMap<String, String>>(&raw).ok())
                .unwrap_or_default();

            Ok(BrowserState {
                cookies: cookies.iter().map(to_stored).collect(),
                local_storage: storage,
            })
        })
        .await
    }

    async fn import_state(&self, state: &BrowserState) -> Result<(), DriverError> {
        let params = state
            .cookies
            .iter()
            .map(to_param)
            .collect::<Result<Vec<_>, _>>()?;
        let storage = state.local_storage.clone();
        let origin = self.origin.clone();

        self.with_tab(move |tab| {
            // local storage is per origin, so land on the site first
            if !storage.is_empty() {
                tab.navigate_to(&origin)
                    .and_then(|t| t.wait_until_navigated())
                    .map_err(|e| DriverError::Navigation {
                        url: origin.clone(),
                        message: e.to_string(),
                    })?;
                for (key, value) in &storage {
                    let script = format!(
                        "window.localStorage.setItem({}, {})",
                        serde_json::Value::from(key.as_str()),
                        serde_json::Value::from(value.as_str())
                    );
                    tab.evaluate(&script, false).map_err(|e| {
                        DriverError::Unavailable(format!("failed to restore storage: {}", e))
                    })?;
                }
            }
            tab.set_cookies(params)
                .map_err(|e| DriverError::Unavailable(format!("failed to set cookies: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), DriverError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((browser, tab)) = session {
            tokio::task::spawn_blocking(move || {
                let _ = tab.close(true);
                drop(browser);
            })
            .await
            .map_err(|e| DriverError::Unavailable(format!("browser task failed: {}", e)))?;
            info!("Closed Chrome");
        }
        Ok(())
    }
}
