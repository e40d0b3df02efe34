//! Headless Chrome implementation of the driver traits, over CDP.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zero_common::{ScreenerBrowserConfig, ScreenerConfig, ScreenerSelectors};

use super::cookies::CookieJar;
use super::driver::{BrowserLauncher, BrowserPage, ScrapedTable};
use crate::error::{Result, ScreenerError};

/// Switches applied to every launch before user-supplied extras.
const BASE_ARGS: &[&str] = &[
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--disable-blink-features=AutomationControlled",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
];

/// Launches Chrome with the configured options.
pub struct ChromeLauncher {
    browser: ScreenerBrowserConfig,
    selectors: ScreenerSelectors,
    home_url: String,
}

impl ChromeLauncher {
    pub fn new(config: &ScreenerConfig) -> Self {
        Self {
            browser: config.browser.clone(),
            selectors: config.selectors.clone(),
            home_url: config.home_url.clone(),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(self.browser.window_width, self.browser.window_height)
            .args(BASE_ARGS.iter().copied())
            .args(self.browser.extra_args.iter().map(String::as_str));

        if !self.browser.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &self.browser.chrome_executable {
            builder = builder.chrome_executable(exe);
        }

        builder.build().map_err(ScreenerError::Browser)
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, cookies: &CookieJar) -> Result<Box<dyn BrowserPage>> {
        let (browser, mut handler) = Browser::launch(self.browser_config()?).await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let page = match browser.new_page(self.home_url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(e.into());
            }
        };

        let mut chrome = ChromePage {
            browser,
            page,
            handler,
            selectors: self.selectors.clone(),
        };

        if let Err(e) = chrome.inject_cookies(cookies, &self.home_url).await {
            let _ = chrome.close().await;
            return Err(e);
        }

        info!(cookies = cookies.len(), home = %self.home_url, "Browser launched");
        Ok(Box::new(chrome))
    }
}

/// A live Chrome instance with one page.
pub struct ChromePage {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    selectors: ScreenerSelectors,
}

impl ChromePage {
    async fn inject_cookies(&mut self, cookies: &CookieJar, home_url: &str) -> Result<()> {
        let params = cookies
            .cookies()
            .iter()
            .map(|c| {
                let mut builder = CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only);
                if let Some(exp) = c.expiration_date {
                    builder = builder.expires(TimeSinceEpoch::new(exp));
                }
                builder.build().map_err(ScreenerError::Browser)
            })
            .collect::<Result<Vec<_>>>()?;

        self.page.set_cookies(params).await?;
        // Reload so the site picks up the session.
        self.page.goto(home_url).await?;
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ScreenerError::Browser)?;

        self.page
            .evaluate_expression(params)
            .await?
            .into_value::<T>()
            .map_err(|e| ScreenerError::Browser(format!("unexpected script result: {e}")))
    }
}

/// JSON-encode a value for splicing into a script.
fn js(value: impl serde::Serialize) -> String {
    serde_json::to_string(&value).unwrap_or_else(|_| "null".into())
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn is_logged_in(&mut self) -> Result<bool> {
        let script = format!(
            "document.querySelector({}) !== null",
            js(&self.selectors.logged_in)
        );
        self.eval(script).await
    }

    async fn grid_ready(&mut self) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                if (document.readyState !== 'complete') return false;
                const loading = Array.from(document.querySelectorAll("[class*='spinner'], [class*='loader']"))
                    .some(el => el.offsetParent !== null);
                if (loading) return false;
                const rows = {rows};
                if (rows.some(sel => document.querySelectorAll(sel).length > 0)) return true;
                return document.querySelectorAll({headers}).length > 0;
            }})()"#,
            rows = js(&self.selectors.rows),
            headers = js(&self.selectors.header_cells),
        );
        self.eval(script).await
    }

    async fn trigger_export(&mut self, download_dir: &Path) -> Result<bool> {
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().to_string())
            .build()
            .map_err(ScreenerError::Browser)?;
        self.browser.execute(behavior).await?;

        let script = format!(
            r#"(async () => {{
                const sleep = (ms) => new Promise(r => setTimeout(r, ms));
                const byText = (text) => Array.from(document.querySelectorAll("div, span, button, [role='menuitem']"))
                    .filter(el => el.offsetParent !== null && el.textContent && el.textContent.trim().includes(text))
                    .pop();
                const menu = document.evaluate({xpath}, document, null,
                    XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                if (menu) {{
                    menu.click();
                    await sleep(1000);
                    const item = byText({menu_item});
                    if (item) {{ item.click(); return true; }}
                }}
                const button = document.querySelector({button});
                if (button) {{
                    button.click();
                    await sleep(1000);
                    const item = byText({button_item});
                    if (item) {{ item.click(); return true; }}
                }}
                return false;
            }})()"#,
            xpath = js(&self.selectors.export_menu_xpath),
            menu_item = js(&self.selectors.export_menu_item_text),
            button = js(&self.selectors.export_button),
            button_item = js(&self.selectors.export_button_item_text),
        );

        let triggered: bool = self.eval(script).await?;
        if !triggered {
            warn!("No export control found on screener page");
        }
        Ok(triggered)
    }

    async fn scrape_grid(&mut self, row_limit: Option<usize>) -> Result<ScrapedTable> {
        let script = format!(
            r#"(() => {{
                let rows = [];
                for (const sel of {rows}) {{
                    const found = document.querySelectorAll(sel);
                    if (found.length > 0) {{ rows = Array.from(found); break; }}
                }}
                const limit = {limit};
                if (limit !== null) rows = rows.slice(0, limit);
                const headers = Array.from(document.querySelectorAll({headers}))
                    .map(h => (h.innerText || '').trim());
                const data = rows.map(row => {{
                    const cells = Array.from(row.querySelectorAll("td, [data-role='cell'], [role='cell']"))
                        .map(c => (c.innerText || '').trim());
                    const link = row.querySelector({symbol});
                    if (link) {{
                        const symbol = (link.innerText || '').trim().split('\n')[0];
                        if (cells.length > 0) cells[0] = symbol; else cells.push(symbol);
                    }}
                    return cells;
                }});
                return {{ headers, rows: data }};
            }})()"#,
            rows = js(&self.selectors.rows),
            limit = js(row_limit),
            headers = js(&self.selectors.header_cells),
            symbol = js(&self.selectors.symbol_link),
        );
        self.eval(script).await
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        closed?;
        info!("Browser closed");
        Ok(())
    }
}
