use std::{collections::HashMap, fs};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub gateway_url: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8080".into(),
            log_filter: "info".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("medilink.toml") {
        apply_file(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("MEDILINK__GATEWAY_URL") {
        settings.gateway_url = v;
    }
    if let Ok(v) = std::env::var("MEDILINK__LOG_FILTER") {
        settings.log_filter = v;
    }

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
        if let Some(v) = file_cfg.get("gateway_url") {
            settings.gateway_url = v.clone();
        }
        if let Some(v) = file_cfg.get("log_filter") {
            settings.log_filter = v.clone();
        }
    }
}
