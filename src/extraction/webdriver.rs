//! # Adaptador WebDriver
//! src/extraction/webdriver.rs
//!
//! Extrae reseñas de una ficha de lugar controlando un navegador real a
//! través del protocolo W3C WebDriver (chromedriver, geckodriver, Selenium).
//!
//! Flujo de un intento:
//! 1. Abrir sesión propia y navegar a la URL
//! 2. Detectar bloqueo (captcha) y rechazar el banner de consentimiento
//! 3. Leer nombre y teléfono del lugar
//! 4. Abrir la pestaña de reseñas y hacer scroll hasta que no aparezcan nuevas
//! 5. Expandir textos truncados y recolectar las reseñas
//! 6. Cerrar la sesión

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::session::{BrowserPool, BrowserSession};
use super::{ExtractionAdapter, ExtractionError, ExtractionOptions, ReviewRecord};
use crate::config::Config;
use crate::error::ConfigError;

/// Rondas seguidas sin reseñas nuevas antes de dejar de hacer scroll
const MAX_STALE_ROUNDS: u32 = 6;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// ==================== SCRIPTS ====================

const PAGE_PROBE_SCRIPT: &str = r#"
return { href: window.location.href, title: document.title || '' };
"#;

const DISMISS_CONSENT_SCRIPT: &str = r#"
const reject = Array.from(document.querySelectorAll('button'))
  .find(b => (b.innerText || '').includes('Reject all'));
if (reject) { reject.click(); return true; }
return false;
"#;

const PLACE_INFO_SCRIPT: &str = r#"
const title = document.querySelector('h1.DUwDvf');
const selectors = [
  'button[aria-label*="Phone"]',
  'button[data-item-id*="phone:tel"]',
  'button[aria-label*="Call"]',
  'a[href^="tel:"]'
];
let phone = '';
for (const sel of selectors) {
  const el = document.querySelector(sel);
  if (!el) continue;
  phone = (el.innerText || '').trim();
  if (!phone) phone = (el.getAttribute('href') || '').replace('tel:', '').trim();
  if (phone) break;
}
return { name: title ? title.innerText.trim() : '', phone: phone };
"#;

const OPEN_REVIEWS_SCRIPT: &str = r#"
const buttons = Array.from(document.querySelectorAll('button'));
const tab = buttons.find(b => (b.getAttribute('aria-label') || '').toLowerCase().includes('reviews'))
  || buttons.find(b => /Reviews|Rating/.test(b.innerText || ''));
if (!tab) return false;
tab.click();
return true;
"#;

const SCROLL_SCRIPT: &str = r#"
const panel = document.querySelector('div.m6QErb.DxyBCb');
if (!panel) return false;
panel.scrollTop = panel.scrollHeight;
return true;
"#;

const COUNT_SCRIPT: &str = r#"
return new Set(Array.from(document.querySelectorAll('div[data-review-id]'))
  .map(e => e.getAttribute('data-review-id'))
  .filter(Boolean)).size;
"#;

const EXPAND_SCRIPT: &str = r#"
const more = document.querySelectorAll('button[aria-label="See more"]');
more.forEach(b => { try { b.click(); } catch (e) {} });
return more.length;
"#;

const COLLECT_SCRIPT: &str = r#"
const text = (root, sel) => { const el = root.querySelector(sel); return el ? el.innerText.trim() : ''; };
return Array.from(document.querySelectorAll('div[data-review-id]')).map(r => {
  const star = r.querySelector('[aria-label*="star"]');
  return {
    review_id: r.getAttribute('data-review-id') || '',
    reviewer: text(r, 'div.d4r55'),
    rating: star ? (star.getAttribute('aria-label') || '') : '',
    review_text: text(r, 'span.wiI7pd'),
    date: text(r, 'span.rsqaWe')
  };
});
"#;

// ==================== CONFIGURACIÓN ====================

/// Ajustes del adaptador WebDriver
#[derive(Debug, Clone)]
pub struct WebDriverSettings {
    pub webdriver_url: Url,
    pub headless: bool,
    pub max_sessions: usize,
    pub max_scrolls: u32,
    pub scroll_pause: Duration,
    pub page_load_wait: Duration,
}

impl WebDriverSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let webdriver_url = Url::parse(&config.webdriver_url).map_err(|e| {
            ConfigError::Validation(format!("Invalid WebDriver URL '{}': {}", config.webdriver_url, e))
        })?;

        Ok(Self {
            webdriver_url,
            headless: config.headless,
            max_sessions: config.workers,
            max_scrolls: config.max_scrolls,
            scroll_pause: Duration::from_millis(config.scroll_pause_ms),
            page_load_wait: Duration::from_millis(config.page_load_wait_ms),
        })
    }

    /// Capabilities de Chrome para una sesión nueva
    pub fn capabilities(&self) -> Value {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1920,1080".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--lang=en-US".to_string(),
            format!("--user-agent={}", USER_AGENT),
        ];
        if self.headless {
            args.insert(0, "--headless=new".to_string());
        }

        json!({
            "browserName": "chrome",
            "goog:chromeOptions": {
                "args": args,
                "excludeSwitches": ["enable-automation"],
                "useAutomationExtension": false
            }
        })
    }
}

// ==================== ADAPTADOR ====================

#[derive(Debug, Deserialize)]
struct PageProbe {
    href: String,
    title: String,
}

impl PageProbe {
    fn is_blocked(&self) -> bool {
        self.href.contains("/sorry/") || self.title.to_lowercase().contains("unusual traffic")
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlaceInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    phone: String,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    review_id: String,
    #[serde(default)]
    reviewer: String,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    review_text: String,
    #[serde(default)]
    date: String,
}

pub struct WebDriverAdapter {
    pool: BrowserPool,
    settings: WebDriverSettings,
}

impl WebDriverAdapter {
    pub fn new(settings: WebDriverSettings) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                ExtractionError::DriverUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        let pool = BrowserPool::new(
            client,
            settings.webdriver_url.clone(),
            settings.capabilities(),
            settings.max_sessions,
        );

        Ok(Self { pool, settings })
    }

    async fn collect(
        &self,
        session: &BrowserSession,
        location_reference: &str,
        options: &ExtractionOptions,
    ) -> Result<Vec<ReviewRecord>, ExtractionError> {
        session.navigate(location_reference).await?;
        sleep(self.settings.page_load_wait).await;

        let page: PageProbe = session.execute(PAGE_PROBE_SCRIPT, vec![]).await?;
        if page.is_blocked() {
            return Err(ExtractionError::Blocked(format!(
                "upstream served a verification page ({})",
                page.href
            )));
        }

        let dismissed: bool = session.execute(DISMISS_CONSENT_SCRIPT, vec![]).await?;
        if dismissed {
            debug!(session_id = session.id(), "consent banner dismissed");
            sleep(Duration::from_secs(2)).await;
        }

        let place: PlaceInfo = session.execute(PLACE_INFO_SCRIPT, vec![]).await?;

        let opened: bool = session.execute(OPEN_REVIEWS_SCRIPT, vec![]).await?;
        if !opened {
            return Err(if place.name.is_empty() {
                ExtractionError::NotFound(format!("no place page at {}", location_reference))
            } else {
                ExtractionError::ParseError("reviews tab not found".to_string())
            });
        }
        sleep(Duration::from_secs(3)).await;

        let max_scrolls = options.max_scrolls.unwrap_or(self.settings.max_scrolls);
        let scroll_pause = options
            .scroll_pause_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.scroll_pause);
        let loaded = scroll_reviews(session, max_scrolls, scroll_pause).await?;
        debug!(session_id = session.id(), loaded, "review list loaded");

        let expanded: u64 = session.execute(EXPAND_SCRIPT, vec![]).await?;
        if expanded > 0 {
            sleep(Duration::from_secs(2)).await;
        }

        let raw: Vec<RawReview> = session.execute(COLLECT_SCRIPT, vec![]).await?;
        let records = build_records(raw, &place);

        if records.is_empty() {
            return Err(ExtractionError::NotFound(
                "no reviews were extracted from this location".to_string(),
            ));
        }

        info!(
            company = %place.name,
            reviews = records.len(),
            "reviews extracted"
        );
        Ok(records)
    }
}

#[async_trait]
impl ExtractionAdapter for WebDriverAdapter {
    async fn extract(
        &self,
        location_reference: &str,
        options: &ExtractionOptions,
    ) -> Result<Vec<ReviewRecord>, ExtractionError> {
        let session = self.pool.checkout().await?;
        let outcome = self.collect(&session, location_reference, options).await;

        let session_id = session.id().to_string();
        if let Err(e) = session.release().await {
            warn!(session_id = %session_id, error = %e, "failed to close browser session");
        }

        outcome
    }

    async fn probe(&self) -> bool {
        self.pool.ready().await
    }

    fn describe(&self) -> String {
        format!(
            "webdriver {} ({}/{} sessions free)",
            self.pool.base_url(),
            self.pool.available(),
            self.pool.max_sessions()
        )
    }
}

/// Hace scroll del panel de reseñas hasta agotar rondas o dejar de ver reseñas nuevas
async fn scroll_reviews(
    session: &BrowserSession,
    max_scrolls: u32,
    pause: Duration,
) -> Result<usize, ExtractionError> {
    let mut seen = 0usize;
    let mut stale = 0u32;
    let mut scrolls = 0u32;

    while stale < MAX_STALE_ROUNDS && scrolls < max_scrolls {
        let scrolled: bool = session.execute(SCROLL_SCRIPT, vec![]).await?;
        if !scrolled {
            return Err(ExtractionError::ParseError(
                "review list container not found".to_string(),
            ));
        }
        sleep(pause).await;

        let count: usize = session.execute(COUNT_SCRIPT, vec![]).await?;
        if count > seen {
            seen = count;
            stale = 0;
        } else {
            stale += 1;
        }

        scrolls += 1;
        if scrolls % 10 == 0 {
            debug!(session_id = session.id(), scrolls, seen, "scrolling reviews");
        }
    }

    Ok(seen)
}

/// Convierte las reseñas crudas en registros, sin duplicados ni entradas sin id
fn build_records(raw: Vec<RawReview>, place: &PlaceInfo) -> Vec<ReviewRecord> {
    let mut seen = HashSet::new();

    raw.into_iter()
        .filter(|r| !r.review_id.is_empty())
        .filter(|r| seen.insert(r.review_id.clone()))
        .map(|r| ReviewRecord {
            review_id: r.review_id,
            reviewer: r.reviewer,
            rating: if r.rating.is_empty() {
                "No rating".to_string()
            } else {
                r.rating
            },
            review_text: r.review_text,
            date: r.date,
            company_name: place.name.clone(),
            phone_number: place.phone.clone(),
        })
        .collect()
}
