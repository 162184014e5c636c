//! iPhone automation over the network
//!
//! Drives a physical iPhone through a WebDriverAgent server (taps, swipes,
//! text, accessibility tree) and reads personal data from the companion app
//! found over multicast DNS. [`Phone`] bundles both behind one handle.

use serde_json::Value;
use tracing::{debug, instrument};

pub mod companion;
pub mod config;
pub mod context;
pub mod driver;
pub mod errors;
pub mod locator;
pub mod tree;
pub mod wda;

pub use companion::{CompanionClient, CompanionDiscovery, CompanionService, Reply};
pub use config::ClientConfig;
pub use context::ScreenContext;
pub use driver::{AutomationDriver, TextMatch};
pub use errors::AutomationError;
pub use locator::{ScrollOutcome, TextLocator};
pub use tree::{ElementList, InteractiveElement, Rect, UiNode};
pub use wda::{ScreenSize, WdaClient};

/// One phone: the automation server plus, on first use, the companion app.
pub struct Phone {
    config: ClientConfig,
    wda: WdaClient,
    companion: Option<CompanionClient>,
    last_result: Option<TextMatch>,
}

impl Phone {
    #[instrument(skip(config), fields(wda_url = %config.wda_url))]
    pub fn new(config: ClientConfig) -> Result<Self, AutomationError> {
        let wda = WdaClient::from_config(&config)?;
        Ok(Self {
            config,
            wda,
            companion: None,
            last_result: None,
        })
    }

    /// Connects with [`ClientConfig::from_env`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use iphone::Phone;
    /// let mut phone = Phone::from_env()?;
    /// phone.tap(200, 450)?;
    /// phone.type_text("hello world")?;
    /// # Ok::<(), iphone::AutomationError>(())
    /// ```
    pub fn from_env() -> Result<Self, AutomationError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Direct access to the automation client for anything not wrapped here.
    pub fn wda(&mut self) -> &mut WdaClient {
        &mut self.wda
    }

    /// The companion client, discovered or connected on first call.
    pub fn companion(&mut self) -> Result<&CompanionClient, AutomationError> {
        let client = match self.companion.take() {
            Some(client) => client,
            None => CompanionClient::connect(&self.config)?,
        };
        Ok(self.companion.insert(client))
    }

    // Observation

    pub fn screenshot_base64(&self) -> Result<String, AutomationError> {
        self.wda.screenshot_base64()
    }

    pub fn context(&mut self, include_screenshot: bool) -> Result<ScreenContext, AutomationError> {
        ScreenContext::capture(&mut self.wda, include_screenshot)
    }

    pub fn elements(&self, accessible_only: bool) -> Result<UiNode, AutomationError> {
        self.wda.source(accessible_only)
    }

    /// Tappable elements in tree order, addressable by 1-based ordinal.
    pub fn interactive_elements(&self) -> Result<ElementList, AutomationError> {
        let source = self.wda.source(true)?;
        Ok(ElementList::new(tree::flatten(&source)))
    }

    /// Elements containing `text`. The first match becomes the last result.
    pub fn find(&mut self, text: &str) -> Result<Vec<TextMatch>, AutomationError> {
        let matches = self.wda.find_by_text(text)?;
        if let Some(first) = matches.first() {
            self.last_result = Some(first.clone());
        }
        Ok(matches)
    }

    /// Scrolls `text` into view, tapping it when `tap` is set.
    pub fn scroll_to(&mut self, text: &str, tap: bool) -> Result<ScrollOutcome, AutomationError> {
        let outcome = TextLocator::new(&mut self.wda, text).tap(tap).run()?;
        if let Some(found) = outcome.last_result() {
            debug!(center = ?found.center, "caching located element");
            self.last_result = Some(found.clone());
        }
        Ok(outcome)
    }

    /// A locator for custom scroll limits or bands.
    pub fn locator(&mut self, text: &str) -> TextLocator<'_, WdaClient> {
        TextLocator::new(&mut self.wda, text)
    }

    /// The element most recently located.
    pub fn last_result(&self) -> Option<&TextMatch> {
        self.last_result.as_ref()
    }

    /// Taps the center of the element most recently located.
    pub fn tap_last(&mut self) -> Result<Value, AutomationError> {
        let (x, y) = self
            .last_result
            .as_ref()
            .map(|m| m.center)
            .ok_or_else(|| AutomationError::NotFound("no element has been located yet".into()))?;
        self.wda.tap(x, y)
    }

    // Touch

    pub fn tap(&mut self, x: i64, y: i64) -> Result<Value, AutomationError> {
        self.wda.tap(x, y)
    }

    /// Taps the center of the `ordinal`-th (1-based) interactive element.
    pub fn tap_element(&mut self, ordinal: usize) -> Result<Value, AutomationError> {
        let elements = self.interactive_elements()?;
        let (x, y) = elements.get(ordinal)?.center;
        self.wda.tap(x, y)
    }

    pub fn double_tap(&mut self, x: i64, y: i64) -> Result<Value, AutomationError> {
        self.wda.double_tap(x, y)
    }

    pub fn long_press(&mut self, x: i64, y: i64, duration_secs: f64) -> Result<Value, AutomationError> {
        self.wda.long_press(x, y, duration_secs)
    }

    pub fn swipe(
        &mut self,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        duration_secs: f64,
    ) -> Result<Value, AutomationError> {
        self.wda.swipe(x1, y1, x2, y2, duration_secs)
    }

    pub fn scroll_down(&mut self, amount: i64) -> Result<Value, AutomationError> {
        self.wda.scroll_down(amount)
    }

    pub fn scroll_up(&mut self, amount: i64) -> Result<Value, AutomationError> {
        self.wda.scroll_up(amount)
    }

    // Text

    pub fn type_text(&mut self, text: &str) -> Result<Value, AutomationError> {
        self.wda.type_text(text)
    }

    pub fn clear(&mut self) -> Result<Value, AutomationError> {
        self.wda.clear_text()
    }

    // Apps and hardware

    pub fn launch(&mut self, bundle_id: &str) -> Result<Value, AutomationError> {
        self.wda.launch_app(bundle_id)
    }

    pub fn kill(&mut self, bundle_id: &str) -> Result<Value, AutomationError> {
        self.wda.kill_app(bundle_id)
    }

    pub fn open_url(&mut self, url: &str) -> Result<Value, AutomationError> {
        self.wda.open_url(url)
    }

    pub fn home(&self) -> Result<Value, AutomationError> {
        self.wda.press_home()
    }

    pub fn lock(&self) -> Result<Value, AutomationError> {
        self.wda.press_lock()
    }

    pub fn unlock(&self) -> Result<Value, AutomationError> {
        self.wda.press_unlock()
    }

    // Clipboard and alerts

    pub fn get_clipboard(&mut self) -> Result<String, AutomationError> {
        self.wda.get_clipboard()
    }

    pub fn set_clipboard(&mut self, text: &str) -> Result<Value, AutomationError> {
        self.wda.set_clipboard(text)
    }

    pub fn alert_text(&mut self) -> Result<Option<String>, AutomationError> {
        self.wda.alert_text()
    }

    pub fn alert_accept(&mut self) -> Result<Value, AutomationError> {
        self.wda.alert_accept()
    }

    pub fn alert_dismiss(&mut self) -> Result<Value, AutomationError> {
        self.wda.alert_dismiss()
    }
}
