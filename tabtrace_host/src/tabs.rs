//! What each browser tab currently shows

use dashmap::DashMap;
use reqwest::Url;
use tabtrace_common::{TabId, TabInfo};

/// Hostname of an absolute URL, `None` for anything unparseable or hostless
pub fn hostname(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}

/// Only http(s) pages get sessions; `chrome://`, `about:` and friends do not
pub fn is_web_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Tab id to last known URL and title, fed by tab lifecycle events
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: DashMap<TabId, TabInfo>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tab's URL, keeping the previous title when none is given
    pub fn update(&self, tab_id: TabId, url: &str, title: Option<&str>) -> TabInfo {
        let mut entry = self.tabs.entry(tab_id).or_insert_with(|| TabInfo {
            tab_id,
            url: url.to_string(),
            title: None,
        });
        if entry.url != url {
            entry.url = url.to_string();
            entry.title = None;
        }
        if let Some(title) = title {
            entry.title = Some(title.to_string());
        }
        entry.clone()
    }

    pub fn get(&self, tab_id: TabId) -> Option<TabInfo> {
        self.tabs.get(&tab_id).map(|info| info.clone())
    }

    /// Hostname of the tab's current page, if it is a web page
    pub fn current_domain(&self, tab_id: TabId) -> Option<String> {
        let info = self.tabs.get(&tab_id)?;
        if !is_web_url(&info.url) {
            return None;
        }
        hostname(&info.url)
    }

    pub fn remove(&self, tab_id: TabId) -> Option<TabInfo> {
        self.tabs.remove(&tab_id).map(|(_, info)| info)
    }
}
