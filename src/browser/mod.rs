//! Rendered-page strategy built on headless Chrome.
//!
//! One Chrome process, one tab, one [`Navigator`] in front of it. Login,
//! scraping and in-page AJAX all run on that tab.
//!
//! # Example
//!
//! ```no_run
//! use hmcpl_scraper::browser::{BrowserConfig, BrowserTransport};
//! use hmcpl_scraper::transport::Transport;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut transport = BrowserTransport::launch("https://catalog.hmcpl.org", &BrowserConfig::default())?;
//! let html = transport.navigator()?.go_to("https://catalog.hmcpl.org/MyAccount/Home")?;
//! println!("Loaded {} bytes of HTML", html.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod navigator;
pub mod page;
pub mod transport;

pub use config::BrowserConfig;
pub use navigator::{classify_challenge, ChallengeState, ClearanceError, Navigator, RoutePolicy};
pub use page::{ChromePage, PageDriver};
pub use transport::BrowserTransport;
