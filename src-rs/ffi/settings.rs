use napi_derive::napi;

use crate::config::{AppConfig, WindowPosition, WindowSize};

/// Persisted credential, if one has been saved.
#[napi]
pub fn get_api_key() -> Option<String> {
    crate::init_logger();
    match AppConfig::load() {
        Ok(config) => config.runtime.api_key.filter(|key| !key.trim().is_empty()),
        Err(e) => {
            log::error!("Failed to load config: {:#}", e);
            None
        }
    }
}

#[napi]
pub fn save_api_key(api_key: String) -> bool {
    crate::init_logger();
    persist_runtime(|config| config.runtime.api_key = Some(api_key))
}

#[napi]
pub fn save_window_position(x: i32, y: i32) -> bool {
    crate::init_logger();
    persist_runtime(|config| config.runtime.window_position = Some(WindowPosition { x, y }))
}

#[napi]
pub fn save_window_size(width: u32, height: u32) -> bool {
    crate::init_logger();
    persist_runtime(|config| config.runtime.window_size = Some(WindowSize { width, height }))
}

fn persist_runtime(update: impl FnOnce(&mut AppConfig)) -> bool {
    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config: {:#}", e);
            return false;
        }
    };
    update(&mut config);
    match config.save_runtime() {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to persist runtime config: {:#}", e);
            false
        }
    }
}
