//! In-process page model implementing [`BrowserDriver`].
//!
//! Pages are registered up front with the elements they expose. Clicking an element
//! runs its [`ClickEffect`] against a small cart and login model, so flows like
//! "click add, watch the badge increment" behave the way they do on the live site.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BrowserDriver, ElementHandle, Selector};
use crate::models::{BrowserState, StoredCookie};
use crate::utils::error::DriverError;

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Always,
    Authenticated,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClickEffect {
    #[default]
    None,
    /// One unit of a product lands in the cart.
    AddToCart { price: Decimal },
    /// Advance the listing to its next stage, like a "load more" button.
    RevealMore,
    Navigate(String),
    Login,
    /// The element disappears after the click (consent banners).
    Dismiss,
}

#[derive(Debug, Clone, PartialEq)]
enum Content {
    Static(String),
    CartCount,
    CartTotal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedElement {
    content: Content,
    attributes: HashMap<String, String>,
    visibility: Visibility,
    effect: ClickEffect,
    click_fails: bool,
    blocks_clicks: bool,
    dismissed: bool,
}

impl ScriptedElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            content: Content::Static(text.into()),
            attributes: HashMap::new(),
            visibility: Visibility::Always,
            effect: ClickEffect::None,
            click_fails: false,
            blocks_clicks: false,
            dismissed: false,
        }
    }

    /// Badge showing the number of units in the cart.
    pub fn cart_count() -> Self {
        Self {
            content: Content::CartCount,
            ..Self::new("")
        }
    }

    /// Element whose text is the cart total, rendered like `€ 21,70`.
    pub fn cart_total() -> Self {
        Self {
            content: Content::CartTotal,
            ..Self::new("")
        }
    }

    /// Attribute values may contain `{total}` and `{count}` placeholders.
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn visible_when(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn adds_to_cart(self, price: Decimal) -> Self {
        self.on_click(ClickEffect::AddToCart { price })
    }

    pub fn failing_click(mut self) -> Self {
        self.click_fails = true;
        self
    }

    /// A popup: while visible, clicks on anything but itself are intercepted.
    pub fn blocks_clicks(mut self) -> Self {
        self.blocks_clicks = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedPage {
    url: String,
    stages: Vec<String>,
    stage: usize,
    elements: Vec<(Selector, ScriptedElement)>,
    protected: bool,
    scroll_fails_at: Option<usize>,
}

impl ScriptedPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stages: Vec::new(),
            stage: 0,
            elements: Vec::new(),
            protected: false,
            scroll_fails_at: None,
        }
    }

    /// Append an HTML snapshot. Scrolling or a `RevealMore` click moves to the next one.
    pub fn with_stage(mut self, html: impl Into<String>) -> Self {
        self.stages.push(html.into());
        self
    }

    pub fn with_element(mut self, selector: Selector, element: ScriptedElement) -> Self {
        self.elements.push((selector, element));
        self
    }

    /// Anonymous visitors get redirected to the login page.
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn failing_scroll_at(mut self, stage: usize) -> Self {
        self.scroll_fails_at = Some(stage);
        self
    }

    fn advance(&mut self) {
        if self.stage + 1 < self.stages.len() {
            self.stage += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Page(usize),
    Global(usize),
}

#[derive(Debug)]
struct Inner {
    pages: HashMap<String, ScriptedPage>,
    globals: Vec<(Selector, ScriptedElement)>,
    current: Option<String>,
    /// Page that bounced to the login form; logging in returns there.
    return_to: Option<String>,
    login_url: String,
    authenticated: bool,
    session_cookie: Option<StoredCookie>,
    local_storage: BTreeMap<String, String>,
    failing_urls: HashSet<String>,
    cart_count: u32,
    cart_total: Decimal,
    clicks: Vec<Selector>,
    navigations: Vec<String>,
    operations: usize,
    closed: bool,
}

impl Inner {
    fn visible(&self, element: &ScriptedElement) -> bool {
        if element.dismissed {
            return false;
        }
        match element.visibility {
            Visibility::Always => true,
            Visibility::Authenticated => self.authenticated,
            Visibility::Anonymous => !self.authenticated,
        }
    }

    fn matching(&self, selector: &Selector) -> Vec<Slot> {
        let mut slots = Vec::new();
        if let Some(page) = self.current.as_ref().and_then(|url| self.pages.get(url)) {
            for (i, (sel, el)) in page.elements.iter().enumerate() {
                if sel == selector && self.visible(el) {
                    slots.push(Slot::Page(i));
                }
            }
        }
        for (i, (sel, el)) in self.globals.iter().enumerate() {
            if sel == selector && self.visible(el) {
                slots.push(Slot::Global(i));
            }
        }
        slots
    }

    fn resolve(&self, handle: &ElementHandle) -> Result<Slot, DriverError> {
        self.matching(&handle.selector)
            .get(handle.index)
            .copied()
            .ok_or_else(|| DriverError::ElementNotFound {
                selector: handle.selector.to_string(),
            })
    }

    fn element(&self, slot: Slot) -> Option<&ScriptedElement> {
        match slot {
            Slot::Page(i) => self
                .current
                .as_ref()
                .and_then(|url| self.pages.get(url))
                .and_then(|page| page.elements.get(i))
                .map(|(_, el)| el),
            Slot::Global(i) => self.globals.get(i).map(|(_, el)| el),
        }
    }

    fn element_mut(&mut self, slot: Slot) -> Option<&mut ScriptedElement> {
        match slot {
            Slot::Page(i) => {
                let url = self.current.clone()?;
                self.pages
                    .get_mut(&url)
                    .and_then(|page| page.elements.get_mut(i))
                    .map(|(_, el)| el)
            }
            Slot::Global(i) => self.globals.get_mut(i).map(|(_, el)| el),
        }
    }

    fn overlay_open(&self) -> bool {
        let page_elements = self
            .current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .map(|page| page.elements.as_slice())
            .unwrap_or_default();
        page_elements
            .iter()
            .chain(self.globals.iter())
            .any(|(_, el)| el.blocks_clicks && self.visible(el))
    }

    fn current_page_mut(&mut self) -> Option<&mut ScriptedPage> {
        let url = self.current.clone()?;
        self.pages.get_mut(&url)
    }

    fn load(&mut self, url: &str) -> Result<(), DriverError> {
        if self.failing_urls.contains(url) {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        let target = match self.pages.get(url) {
            Some(page) if page.protected && !self.authenticated => {
                self.return_to = Some(url.to_string());
                self.login_url.clone()
            }
            _ => url.to_string(),
        };
        if let Some(page) = self.pages.get_mut(&target) {
            page.stage = 0;
        }
        self.navigations.push(url.to_string());
        self.current = Some(target);
        Ok(())
    }

    fn rendered_total(&self) -> String {
        format!("€ {}", format!("{:.2}", self.cart_total).replace('.', ","))
    }

    fn render(&self, template: &str) -> String {
        template
            .replace("{total}", &self.rendered_total())
            .replace("{count}", &self.cart_count.to_string())
    }

    fn default_cookie() -> StoredCookie {
        StoredCookie {
            name: "session".to_string(),
            value: "scripted-login".to_string(),
            domain: "shop.test".to_string(),
            path: "/".to_string(),
            expires: None,
            secure: true,
            http_only: true,
        }
    }
}

/// Scripted stand-in for a real browser session.
#[derive(Debug)]
pub struct ScriptedBrowser {
    inner: Mutex<Inner>,
}

impl Default for ScriptedBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pages: HashMap::new(),
                globals: Vec::new(),
                current: None,
                return_to: None,
                login_url: "https://shop.test/login".to_string(),
                authenticated: false,
                session_cookie: None,
                local_storage: BTreeMap::new(),
                failing_urls: HashSet::new(),
                cart_count: 0,
                cart_total: Decimal::ZERO,
                clicks: Vec::new(),
                navigations: Vec::new(),
                operations: 0,
                closed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_state(&self) -> Result<MutexGuard<'_, Inner>, DriverError> {
        let mut state = self.state();
        if state.closed {
            return Err(DriverError::Unavailable("browser was closed".to_string()));
        }
        state.operations += 1;
        Ok(state)
    }

    pub fn with_page(self, page: ScriptedPage) -> Self {
        self.state().pages.insert(page.url.clone(), page);
        self
    }

    /// Element present on every page (header widgets, banners).
    pub fn with_global(self, selector: Selector, element: ScriptedElement) -> Self {
        self.state().globals.push((selector, element));
        self
    }

    pub fn with_login_url(self, url: impl Into<String>) -> Self {
        self.state().login_url = url.into();
        self
    }

    /// The cookie the site accepts as a valid login.
    pub fn with_accepted_session(self, cookie: StoredCookie) -> Self {
        self.state().session_cookie = Some(cookie);
        self
    }

    pub fn logged_in(self) -> Self {
        self.set_authenticated(true);
        self
    }

    /// Site data kept in local storage whether or not anyone is logged in.
    pub fn with_local_storage(self, key: &str, value: &str) -> Self {
        self.state().local_storage.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_failing_url(self, url: impl Into<String>) -> Self {
        self.state().failing_urls.insert(url.into());
        self
    }

    pub fn with_cart(self, count: u32, total: Decimal) -> Self {
        {
            let mut state = self.state();
            state.cart_count = count;
            state.cart_total = total;
        }
        self
    }

    /// Log in or out, as a human would in the visible browser window.
    pub fn set_authenticated(&self, authenticated: bool) {
        let mut state = self.state();
        if authenticated {
            state.set_logged_in();
        } else {
            state.authenticated = false;
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    pub fn cart_count(&self) -> u32 {
        self.state().cart_count
    }

    pub fn cart_total(&self) -> Decimal {
        self.state().cart_total
    }

    pub fn clicks(&self) -> Vec<Selector> {
        self.state().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    /// Number of driver calls made so far.
    pub fn operations(&self) -> usize {
        self.state().operations
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

#[async_trait]
impl BrowserDriver for ScriptedBrowser {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.open_state()?.load(url)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .open_state()?
            .current
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn locate(&self, selector: &Selector) -> Result<ElementHandle, DriverError> {
        let state = self.open_state()?;
        if state.matching(selector).is_empty() {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(ElementHandle::new(selector.clone(), 0))
    }

    async fn locate_all(&self, selector: &Selector) -> Result<Vec<ElementHandle>, DriverError> {
        let state = self.open_state()?;
        Ok((0..state.matching(selector).len())
            .map(|i| ElementHandle::new(selector.clone(), i))
            .collect())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let mut state = self.open_state()?;
        let slot = state.resolve(element)?;
        let (effect, fails, overlay) = match state.element(slot) {
            Some(el) => (el.effect.clone(), el.click_fails, el.blocks_clicks),
            None => {
                return Err(DriverError::ElementNotFound {
                    selector: element.selector.to_string(),
                })
            }
        };
        if fails {
            return Err(DriverError::Interaction {
                selector: element.selector.to_string(),
                message: "element is not clickable".to_string(),
            });
        }
        if !overlay && state.overlay_open() {
            return Err(DriverError::Interaction {
                selector: element.selector.to_string(),
                message: "click intercepted by an overlay".to_string(),
            });
        }
        state.clicks.push(element.selector.clone());

        match effect {
            ClickEffect::None => {}
            ClickEffect::AddToCart { price } => {
                state.cart_count += 1;
                state.cart_total += price;
            }
            ClickEffect::RevealMore => {
                if let Some(page) = state.current_page_mut() {
                    page.advance();
                }
            }
            ClickEffect::Navigate(url) => state.load(&url)?,
            ClickEffect::Login => state.set_logged_in(),
            ClickEffect::Dismiss => {
                if let Some(el) = state.element_mut(slot) {
                    el.dismissed = true;
                }
            }
        }
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String, DriverError> {
        let state = self.open_state()?;
        let slot = state.resolve(element)?;
        let text = match state.element(slot).map(|el| &el.content) {
            Some(Content::Static(text)) => text.clone(),
            Some(Content::CartCount) => state.cart_count.to_string(),
            Some(Content::CartTotal) => state.rendered_total(),
            None => String::new(),
        };
        Ok(text)
    }

    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let state = self.open_state()?;
        let slot = state.resolve(element)?;
        Ok(state
            .element(slot)
            .and_then(|el| el.attributes.get(name))
            .map(|value| state.render(value)))
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        let state = self.open_state()?;
        let source = state
            .current
            .as_ref()
            .and_then(|url| state.pages.get(url))
            .and_then(|page| page.stages.get(page.stage))
            .cloned()
            .unwrap_or_else(|| BLANK_PAGE.to_string());
        Ok(source)
    }

    async fn scroll_to_bottom(&self) -> Result<(), DriverError> {
        let mut state = self.open_state()?;
        if let Some(page) = state.current_page_mut() {
            if page.scroll_fails_at == Some(page.stage) {
                return Err(DriverError::Interaction {
                    selector: "window".to_string(),
                    message: "page stopped responding while scrolling".to_string(),
                });
            }
            page.advance();
        }
        Ok(())
    }

    async fn export_state(&self) -> Result<BrowserState, DriverError> {
        let state = self.open_state()?;
        let cookies = match (&state.session_cookie, state.authenticated) {
            (Some(cookie), true) => vec![cookie.clone()],
            _ => Vec::new(),
        };
        Ok(BrowserState {
            cookies,
            local_storage: state.local_storage.clone(),
        })
    }

    async fn import_state(&self, imported: &BrowserState) -> Result<(), DriverError> {
        let mut state = self.open_state()?;
        let accepted = state.session_cookie.as_ref().is_some_and(|expected| {
            imported
                .cookies
                .iter()
                .any(|c| c.name == expected.name && c.value == expected.value)
        });
        if accepted {
            state.authenticated = true;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut state = self.state();
        state.closed = true;
        state.current = None;
        Ok(())
    }
}

impl Inner {
    fn set_logged_in(&mut self) {
        self.authenticated = true;
        if self.session_cookie.is_none() {
            self.session_cookie = Some(Inner::default_cookie());
        }
        // the site redirects away from the login form once it is submitted
        if self.current.as_deref() == Some(self.login_url.as_str()) {
            let back = self.return_to.take().unwrap_or_else(|| "about:blank".to_string());
            if let Some(page) = self.pages.get_mut(&back) {
                page.stage = 0;
            }
            self.current = Some(back);
        }
    }
}
