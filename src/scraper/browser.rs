use crate::config::ScreenerConfig;
use headless_chrome::util::{Timeout, Wait};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::ScrapeError;

/// A headless Chrome session with one tab. Dropping it shuts the browser down.
pub struct BrowserSession {
    // Held for its Drop: the Chrome process lives as long as this handle.
    _browser: Browser,
    tab: Arc<Tab>,
    jitter_ms: u64,
}

impl BrowserSession {
    pub fn launch(config: &ScreenerConfig) -> Result<Self, ScrapeError> {
        let options = LaunchOptions {
            headless: config.headless,
            sandbox: false,
            window_size: Some((config.window_width, config.window_height)),
            idle_browser_timeout: Duration::from_secs(config.idle_browser_timeout_secs),
            args: vec![
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
            ],
            ..Default::default()
        };

        let browser = Browser::new(options)
            .map_err(|e| browser_error("launch Chrome (is Chrome/Chromium installed?)", e))?;
        let tab = browser
            .new_tab()
            .map_err(|e| browser_error("open tab", e))?;

        Ok(Self {
            _browser: browser,
            tab,
            jitter_ms: config.jitter_ms,
        })
    }

    pub fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        debug!("GET {}", url);
        self.tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| classify(format!("navigation to {}", url), e))?;
        Ok(())
    }

    pub fn content(&self) -> Result<String, ScrapeError> {
        self.tab
            .get_content()
            .map_err(|e| browser_error("read page content", e))
    }

    pub fn wait_css(&self, selector: &str, timeout: Duration) -> Result<Element<'_>, ScrapeError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|e| classify(format!("element {}", selector), e))
    }

    pub fn wait_xpath(&self, xpath: &str, timeout: Duration) -> Result<Element<'_>, ScrapeError> {
        self.tab
            .wait_for_xpath_with_custom_timeout(xpath, timeout)
            .map_err(|e| classify(format!("element {}", xpath), e))
    }

    pub fn find_css(&self, selector: &str) -> Result<Element<'_>, ScrapeError> {
        self.tab
            .find_element(selector)
            .map_err(|e| classify(format!("element {}", selector), e))
    }

    pub fn find_xpath(&self, xpath: &str) -> Result<Element<'_>, ScrapeError> {
        self.tab
            .find_element_by_xpath(xpath)
            .map_err(|e| classify(format!("element {}", xpath), e))
    }

    /// Sleep for `base_ms` plus random jitter.
    pub fn settle(&self, base_ms: u64) {
        let jitter = rand::random_range(0..=self.jitter_ms);
        std::thread::sleep(Duration::from_millis(base_ms + jitter));
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            debug!("Tab close failed: {:#}", e);
        }
        info!("🧹 Browser closed.");
    }
}

// ── Element helpers ───────────────────────────────────────────────────────────

pub fn click(element: &Element<'_>, what: &str) -> Result<(), ScrapeError> {
    element
        .click()
        .map_err(|e| browser_error(format!("click {}", what), e))?;
    Ok(())
}

/// Click through JS, which works on elements covered by overlays.
pub fn js_click(element: &Element<'_>, what: &str) -> Result<(), ScrapeError> {
    element
        .call_js_fn("function() { this.click(); }", vec![], false)
        .map_err(|e| browser_error(format!("click {}", what), e))?;
    Ok(())
}

pub fn scroll_to_center(element: &Element<'_>) -> Result<(), ScrapeError> {
    element
        .call_js_fn(
            "function() { this.scrollIntoView({block: 'center'}); }",
            vec![],
            false,
        )
        .map_err(|e| browser_error("scroll into view", e))?;
    Ok(())
}

pub fn type_text(element: &Element<'_>, text: &str, what: &str) -> Result<(), ScrapeError> {
    element
        .type_into(text)
        .map_err(|e| browser_error(format!("type into {}", what), e))?;
    Ok(())
}

pub fn js_bool(element: &Element<'_>, function: &str) -> Result<bool, ScrapeError> {
    let object = element
        .call_js_fn(function, vec![], false)
        .map_err(|e| browser_error("evaluate element state", e))?;
    Ok(object.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

pub fn is_checked(element: &Element<'_>) -> Result<bool, ScrapeError> {
    js_bool(element, "function() { return this.checked === true; }")
}

pub fn is_disabled(element: &Element<'_>) -> Result<bool, ScrapeError> {
    js_bool(
        element,
        "function() { return this.disabled === true || this.getAttribute('aria-disabled') === 'true'; }",
    )
}

/// Wait until `element` is detached from the document.
pub fn wait_until_stale(element: &Element<'_>, timeout: Duration) -> Result<(), ScrapeError> {
    Wait::with_timeout(timeout)
        .until(|| {
            let attached = element
                .call_js_fn("function() { return this.isConnected; }", vec![], false)
                .ok()
                .and_then(|o| o.value)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            (!attached).then_some(())
        })
        .map_err(|_| ScrapeError::Timeout("previous page to go stale".to_string()))
}

// ── Error mapping ─────────────────────────────────────────────────────────────

fn classify(what: String, err: anyhow::Error) -> ScrapeError {
    if err.downcast_ref::<Timeout>().is_some() {
        ScrapeError::Timeout(what)
    } else {
        ScrapeError::Browser { step: what, source: err }
    }
}

fn browser_error(step: impl Into<String>, err: anyhow::Error) -> ScrapeError {
    ScrapeError::Browser {
        step: step.into(),
        source: err,
    }
}
