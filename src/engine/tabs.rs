use std::sync::Arc;

use regex::Regex;

use crate::browser::{Browser, TabInfo};

/// Finds dashboard tabs by matching their url against a fixed allowlist.
pub struct TabLocator {
    browser: Arc<dyn Browser>,
    patterns: Vec<Regex>,
}

impl TabLocator {
    pub fn new(browser: Arc<dyn Browser>, patterns: &[String]) -> anyhow::Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { browser, patterns })
    }

    pub fn is_dashboard(&self, url: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(url))
    }

    /// Open dashboard tabs. A failing tab query counts as "no tabs".
    pub async fn locate(&self) -> Vec<TabInfo> {
        match self.browser.query_tabs().await {
            Ok(tabs) => tabs
                .into_iter()
                .filter(|tab| self.is_dashboard(&tab.url))
                .collect(),
            Err(err) => {
                log::warn!("tab query failed: {err}");
                vec![]
            }
        }
    }
}

/// `http://localhost:3000/*` style pattern to an anchored regex.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    // "origin/*" also covers the bare origin without the trailing slash
    let body = match body.strip_suffix("/.*") {
        Some(origin) => format!("{origin}(/.*)?"),
        None => body,
    };

    Regex::new(&format!("^{body}$"))
}
