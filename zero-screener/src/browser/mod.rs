//! Browser session: authentication artifact, driver seam, Chrome driver and
//! the persistent session manager.

mod chrome;
mod cookies;
mod driver;
#[cfg(test)]
pub(crate) mod mock;
mod session;

pub use chrome::{ChromeLauncher, ChromePage};
pub use cookies::{BrowserCookie, CookieJar};
pub use driver::{BrowserLauncher, BrowserPage, ScrapedTable};
pub use session::{
    ReleaseOutcome, SessionHandle, SessionHealth, SessionManager, SessionSettings, SessionState,
};
