pub mod browser;
pub mod cleaner;
pub mod parsers;

use crate::config::ScreenerConfig;
use crate::models::{RawRow, Tab};
use crate::utils::{self, Timer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use self::browser::BrowserSession;
use self::parsers::parse_pattern_rows;

const ROW_SELECTOR: &str = "mat-row, tr.mat-mdc-row";
const NEXT_PAGE_SELECTOR: &str = "button.mat-mdc-paginator-navigation-next";
const PATTERN_FILTER_SELECTOR: &str = "#pattern-filter";
const EMAIL_XPATH: &str = r#"//input[@type="email"]"#;
const PASSWORD_XPATH: &str = r#"//input[@type="password"]"#;
const LOGIN_BUTTON_XPATH: &str = r#"//button[contains(@class,"login-btn")]"#;
const WHATS_NEW_CLOSE_XPATH: &str = r#"//*[@id="whatsnewModal"]/div/div/div[1]/button/span"#;
const APPLY_BUTTON_XPATH: &str = r#"//button[contains(text(), "Apply")]"#;

// Fixed pauses after UI actions; jitter is added on top.
const LOGIN_PAUSE_MS: u64 = 3000;
const PAGE_LOAD_PAUSE_MS: u64 = 5000;
const TAB_PAUSE_MS: u64 = 3000;
const FILTER_PAUSE_MS: u64 = 1000;
const PAGE_TURN_PAUSE_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("{step}: {source:#}")]
    Browser { step: String, source: anyhow::Error },
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable source of raw chart-pattern rows.
#[async_trait]
pub trait PatternSource: Send + Sync {
    /// Rows for the current run. Empty on total failure; never errors.
    async fn fetch_rows(&self) -> Vec<RawRow>;
}

// ── Pagination ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTurn {
    Next,
    LastPage,
}

/// The paginated results table of the currently selected tab.
pub trait ResultsTable {
    /// Waits for the current page to render and returns its rows' cell text.
    fn visible_rows(&self) -> Result<Vec<Vec<String>>, ScrapeError>;

    /// Moves to the next page, or reports that this is the last one.
    fn advance(&self) -> Result<PageTurn, ScrapeError>;
}

/// Read every page of `table` into `out`. A timeout while turning the page
/// means there are no more pages. Returns the number of rows added.
pub fn collect_tab<T: ResultsTable + ?Sized>(
    table: &T,
    tab: Tab,
    max_pages: u32,
    out: &mut Vec<RawRow>,
) -> Result<usize, ScrapeError> {
    let mut added = 0usize;
    let mut page = 1u32;

    loop {
        let rows = table.visible_rows()?;
        debug!(%tab, page, "{} rows", rows.len());
        added += rows.len();
        out.extend(rows.into_iter().map(|cells| RawRow::new(cells, tab)));

        if page >= max_pages {
            warn!(%tab, "Reached page limit ({}), stopping", max_pages);
            break;
        }

        match table.advance() {
            Ok(PageTurn::Next) => page += 1,
            Ok(PageTurn::LastPage) => {
                info!("Reached last page for tab {}.", tab);
                break;
            }
            Err(ScrapeError::Timeout(what)) => {
                info!("No more pages for tab {} ({}).", tab, what);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(added)
}

/// Run `scrape_tab` for each tab in order. A failing tab keeps the rows it
/// produced before the failure; the next tab still runs.
pub fn collect_all_tabs<F>(mut scrape_tab: F) -> Vec<RawRow>
where
    F: FnMut(Tab, &mut Vec<RawRow>) -> Result<(), ScrapeError>,
{
    let mut rows = Vec::new();
    for tab in Tab::ALL {
        info!("--- Processing {} tab ---", tab);
        let before = rows.len();
        if let Err(e) = scrape_tab(tab, &mut rows) {
            error!(%tab, "Tab scrape failed: {}", e);
        }
        info!("{}: {} rows", tab, rows.len() - before);
    }
    rows
}

// ── intradayscreener.com ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct IntradayScreener {
    config: ScreenerConfig,
    base_url: Url,
}

impl IntradayScreener {
    pub fn new(config: &ScreenerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid screener base URL {:?}", config.base_url))?;

        if config.email.is_none() || config.password.is_none() {
            warn!("Screener credentials not set; login will likely time out");
        }

        Ok(Self {
            config: config.clone(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<String, ScrapeError> {
        self.base_url
            .join(path)
            .map(String::from)
            .map_err(|e| ScrapeError::Browser {
                step: format!("build URL for {}", path),
                source: e.into(),
            })
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// One full run. The browser is closed when `session` drops, on every path.
    fn scrape_blocking(&self) -> Vec<RawRow> {
        let _t = Timer::start("Chart patterns scrape");
        info!("🚀 Launching browser...");

        let session = match BrowserSession::launch(&self.config) {
            Ok(s) => s,
            Err(e) => {
                error!("An error occurred during scraping: {}", e);
                return Vec::new();
            }
        };

        let rows = match self.open_patterns_page(&session) {
            Ok(()) => collect_all_tabs(|tab, out| self.scrape_tab(&session, tab, out)),
            Err(e) => {
                error!("An error occurred during scraping: {}", e);
                Vec::new()
            }
        };

        info!("Scraping run completed at {}", utils::now_ist_string());
        rows
    }

    fn open_patterns_page(&self, session: &BrowserSession) -> Result<(), ScrapeError> {
        let cfg = &self.config;

        session.goto(&self.url("login")?)?;
        info!("🌐 Opened login page.");

        let email = session.wait_xpath(EMAIL_XPATH, Self::secs(cfg.login_timeout_secs))?;
        browser::type_text(&email, cfg.email.as_deref().unwrap_or_default(), "email")?;
        let password = session.find_xpath(PASSWORD_XPATH)?;
        browser::type_text(&password, cfg.password.as_deref().unwrap_or_default(), "password")?;
        browser::click(&session.find_xpath(LOGIN_BUTTON_XPATH)?, "login button")?;
        info!("🔐 Login submitted.");
        session.settle(LOGIN_PAUSE_MS);

        match session.wait_xpath(WHATS_NEW_CLOSE_XPATH, Self::secs(cfg.popup_timeout_secs)) {
            Ok(close) => browser::click(&close, "What's New close")?,
            Err(ScrapeError::Timeout(_)) => info!("No 'What's New' pop-up found, continuing."),
            Err(e) => return Err(e),
        }

        info!("Navigating to EOD Chart Patterns page.");
        session.goto(&self.url("scans/eod-chart-patterns")?)?;
        session.settle(PAGE_LOAD_PAUSE_MS);
        Ok(())
    }

    fn scrape_tab(
        &self,
        session: &BrowserSession,
        tab: Tab,
        out: &mut Vec<RawRow>,
    ) -> Result<(), ScrapeError> {
        let cfg = &self.config;

        let tab_xpath = format!(r#"//button[contains(text(), "{}")]"#, tab.ui_label());
        let button = session.wait_xpath(&tab_xpath, Self::secs(cfg.element_timeout_secs))?;
        browser::js_click(&button, tab.ui_label())?;
        session.settle(TAB_PAUSE_MS);

        self.apply_pattern_filters(session)?;

        let table = BrowserTable { session, config: cfg };
        collect_tab(&table, tab, cfg.max_pages, out)?;
        Ok(())
    }

    /// Deselect the excluded categories and apply. Safe to repeat.
    fn apply_pattern_filters(&self, session: &BrowserSession) -> Result<(), ScrapeError> {
        let cfg = &self.config;

        match session.wait_css(PATTERN_FILTER_SELECTOR, Self::secs(cfg.popup_timeout_secs)) {
            Ok(dropdown) => {
                browser::click(&dropdown, "pattern filter")?;
                session.settle(FILTER_PAUSE_MS);
            }
            Err(ScrapeError::Timeout(_)) => debug!("No pattern filter dropdown, using inline checkboxes"),
            Err(e) => return Err(e),
        }

        for category in &cfg.excluded_categories {
            let xpath = format!(
                r#"//label[contains(text(), "{}")]/preceding-sibling::input[@type="checkbox"]"#,
                category
            );
            let checkbox = session.wait_xpath(&xpath, Self::secs(cfg.filter_timeout_secs))?;
            if browser::is_checked(&checkbox)? {
                browser::js_click(&checkbox, category)?;
                info!("Unselected '{}'.", category);
            }
        }

        let apply = session.wait_xpath(APPLY_BUTTON_XPATH, Self::secs(cfg.filter_timeout_secs))?;
        browser::click(&apply, "Apply")?;
        info!("Applied pattern filters.");
        session.settle(TAB_PAUSE_MS);
        Ok(())
    }
}

#[async_trait]
impl PatternSource for IntradayScreener {
    async fn fetch_rows(&self) -> Vec<RawRow> {
        let screener = self.clone();
        match tokio::task::spawn_blocking(move || screener.scrape_blocking()).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Scrape task failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Results table backed by the live browser tab.
struct BrowserTable<'a> {
    session: &'a BrowserSession,
    config: &'a ScreenerConfig,
}

impl ResultsTable for BrowserTable<'_> {
    fn visible_rows(&self) -> Result<Vec<Vec<String>>, ScrapeError> {
        self.session.wait_css(
            ROW_SELECTOR,
            Duration::from_secs(self.config.element_timeout_secs),
        )?;
        let html = self.session.content()?;
        parse_pattern_rows(&html).map_err(|e| ScrapeError::Browser {
            step: "parse results table".to_string(),
            source: e,
        })
    }

    fn advance(&self) -> Result<PageTurn, ScrapeError> {
        let next = self.session.wait_css(
            NEXT_PAGE_SELECTOR,
            Duration::from_secs(self.config.pager_timeout_secs),
        )?;
        if browser::is_disabled(&next)? {
            return Ok(PageTurn::LastPage);
        }

        let first_row = self.session.find_css(ROW_SELECTOR)?;
        browser::scroll_to_center(&next)?;
        browser::js_click(&next, "next page")?;
        browser::wait_until_stale(
            &first_row,
            Duration::from_secs(self.config.page_turn_timeout_secs),
        )?;
        self.session.settle(PAGE_TURN_PAUSE_MS);
        Ok(PageTurn::Next)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Serves canned pages; `turns` scripts each `advance` call.
    struct FakeTable {
        pages: RefCell<VecDeque<Result<Vec<Vec<String>>, ScrapeError>>>,
        turns: RefCell<VecDeque<Result<PageTurn, ScrapeError>>>,
        advances: Cell<usize>,
    }

    impl FakeTable {
        fn new(
            pages: Vec<Result<Vec<Vec<String>>, ScrapeError>>,
            turns: Vec<Result<PageTurn, ScrapeError>>,
        ) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                turns: RefCell::new(turns.into()),
                advances: Cell::new(0),
            }
        }
    }

    impl ResultsTable for FakeTable {
        fn visible_rows(&self) -> Result<Vec<Vec<String>>, ScrapeError> {
            self.pages
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ScrapeError::Timeout("rows".into())))
        }

        fn advance(&self) -> Result<PageTurn, ScrapeError> {
            self.advances.set(self.advances.get() + 1);
            self.turns
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(PageTurn::LastPage))
        }
    }

    fn page(symbols: &[&str]) -> Result<Vec<Vec<String>>, ScrapeError> {
        Ok(symbols
            .iter()
            .map(|s| {
                vec![
                    s.to_string(),
                    "100.00 (+1.00%)".to_string(),
                    "05 Jan 2024".to_string(),
                    "Flag".to_string(),
                ]
            })
            .collect())
    }

    fn symbols(rows: &[RawRow]) -> Vec<&str> {
        rows.iter().map(|r| r.cells[0].as_str()).collect()
    }

    #[test]
    fn test_collect_tab_stops_on_last_page() {
        let table = FakeTable::new(
            vec![page(&["A", "B"]), page(&["C"])],
            vec![Ok(PageTurn::Next), Ok(PageTurn::LastPage)],
        );
        let mut out = Vec::new();

        let added = collect_tab(&table, Tab::Cash, 50, &mut out).unwrap();
        assert_eq!(added, 3);
        assert_eq!(symbols(&out), vec!["A", "B", "C"]);
        assert!(out.iter().all(|r| r.tab == Tab::Cash));
    }

    #[test]
    fn test_collect_tab_treats_pager_timeout_as_end() {
        let table = FakeTable::new(
            vec![page(&["A"]), page(&["B"])],
            vec![Ok(PageTurn::Next), Err(ScrapeError::Timeout("next".into()))],
        );
        let mut out = Vec::new();

        assert_eq!(collect_tab(&table, Tab::Fno, 50, &mut out).unwrap(), 2);
        assert_eq!(symbols(&out), vec!["A", "B"]);
    }

    #[test]
    fn test_collect_tab_respects_page_limit() {
        let table = FakeTable::new(
            vec![page(&["A"]), page(&["B"]), page(&["C"])],
            vec![Ok(PageTurn::Next), Ok(PageTurn::Next), Ok(PageTurn::Next)],
        );
        let mut out = Vec::new();

        collect_tab(&table, Tab::Cash, 2, &mut out).unwrap();
        assert_eq!(symbols(&out), vec!["A", "B"]);
        assert_eq!(table.advances.get(), 1);
    }

    #[test]
    fn test_collect_tab_propagates_browser_errors() {
        let table = FakeTable::new(
            vec![page(&["A"])],
            vec![Err(ScrapeError::Browser {
                step: "click next page".into(),
                source: anyhow::anyhow!("target closed"),
            })],
        );
        let mut out = Vec::new();

        assert!(matches!(
            collect_tab(&table, Tab::Cash, 50, &mut out),
            Err(ScrapeError::Browser { .. })
        ));
        assert_eq!(symbols(&out), vec!["A"]);
    }

    #[test]
    fn test_collect_tab_row_timeout_is_an_error() {
        let table = FakeTable::new(vec![Err(ScrapeError::Timeout("rows".into()))], vec![]);
        let mut out = Vec::new();

        assert!(matches!(
            collect_tab(&table, Tab::Cash, 50, &mut out),
            Err(ScrapeError::Timeout(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_failing_tab_keeps_other_tab_rows() {
        let rows = collect_all_tabs(|tab, out| match tab {
            Tab::Cash => {
                let table = FakeTable::new(vec![page(&["A"]), page(&["B"])], vec![Ok(PageTurn::Next)]);
                collect_tab(&table, tab, 50, out).map(|_| ())
            }
            Tab::Fno => {
                let table = FakeTable::new(
                    vec![page(&["F1"]), Err(ScrapeError::Timeout("rows".into()))],
                    vec![Ok(PageTurn::Next)],
                );
                collect_tab(&table, tab, 50, out).map(|_| ())
            }
        });

        assert_eq!(symbols(&rows), vec!["A", "B", "F1"]);
        assert_eq!(rows[2].tab, Tab::Fno);
    }

    #[test]
    fn test_screener_rejects_bad_base_url() {
        let mut cfg = ScreenerConfig::default();
        cfg.base_url = "not a url".into();
        assert!(IntradayScreener::new(&cfg).is_err());
    }

    #[test]
    fn test_screener_urls() {
        let screener = IntradayScreener::new(&ScreenerConfig::default()).unwrap();
        assert_eq!(screener.url("login").unwrap(), "https://intradayscreener.com/login");
        assert_eq!(
            screener.url("scans/eod-chart-patterns").unwrap(),
            "https://intradayscreener.com/scans/eod-chart-patterns"
        );
    }
}
