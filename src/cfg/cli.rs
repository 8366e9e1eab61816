// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

const DEFAULT_PORT: u16 = 3000;

/// Resolves the listen port: `PORT` env var if set and parseable, otherwise
/// `DEFAULT_PORT`.
pub fn resolve_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn falls_back_to_default_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::remove_var("PORT");
        }
        assert_eq!(resolve_port(), DEFAULT_PORT);
    }

    #[test]
    fn reads_valid_env_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("PORT", "8080");
        }
        assert_eq!(resolve_port(), 8080);
        unsafe {
            std::env::remove_var("PORT");
        }
    }

    #[test]
    fn falls_back_on_garbage_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("PORT", "not-a-port");
        }
        assert_eq!(resolve_port(), DEFAULT_PORT);
        unsafe {
            std::env::remove_var("PORT");
        }
    }
}
