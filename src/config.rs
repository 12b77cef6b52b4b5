// src/config.rs

use std::{env, str::FromStr};

use dotenvy::dotenv;

use crate::error::AppError;

/// Upper bound for any daily message quota.
pub const MAX_DAILY_QUOTA: i64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Admin token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub http_port: u16,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    /// Chat learner ids allowed to run privileged chat commands.
    pub chat_admins: Vec<String>,
    pub default_quota: i64,
    pub schedule: ScheduleConfig,
    pub matrix: Option<MatrixConfig>,
}

/// Pacing scheduler settings.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// First local hour (inclusive) in which questions are pushed.
    pub active_start_hour: u32,
    /// Local hour (exclusive) at which pushing stops.
    pub active_end_hour: u32,
    pub cycle_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            active_start_hour: 9,
            active_end_hour: 20,
            cycle_interval_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub homeserver: String,
    pub user_id: String,
    pub password: String,
    pub sync_token_file: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://quizbot.db?mode=rwc".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Validation("JWT_SECRET must be set".to_string()))?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let chat_admins = env::var("QUIZBOT_ADMINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let default_quota = parse_var("DEFAULT_DAILY_QUOTA", 1i64)?;
        if !(0..=MAX_DAILY_QUOTA).contains(&default_quota) {
            return Err(AppError::Validation(format!(
                "DEFAULT_DAILY_QUOTA must be between 0 and {}",
                MAX_DAILY_QUOTA
            )));
        }

        let schedule = ScheduleConfig {
            active_start_hour: parse_var("ACTIVE_START_HOUR", 9u32)?,
            active_end_hour: parse_var("ACTIVE_END_HOUR", 20u32)?,
            cycle_interval_secs: parse_var("CYCLE_INTERVAL_SECS", 15 * 60u64)?,
        };
        if schedule.active_start_hour >= schedule.active_end_hour || schedule.active_end_hour > 24 {
            return Err(AppError::Validation(
                "ACTIVE_START_HOUR must be before ACTIVE_END_HOUR (hours 0-24)".to_string(),
            ));
        }

        let matrix = match (
            env::var("MATRIX_HOMESERVER"),
            env::var("MATRIX_USER_ID"),
            env::var("MATRIX_PASSWORD"),
        ) {
            (Ok(homeserver), Ok(user_id), Ok(password)) => Some(MatrixConfig {
                homeserver,
                user_id,
                password,
                sync_token_file: env::var("MATRIX_SYNC_TOKEN_FILE")
                    .unwrap_or_else(|_| "next_batch_token.json".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration: parse_var("JWT_EXPIRATION", 3600u64)?,
            rust_log,
            http_port: parse_var("HTTP_PORT", 3000u16)?,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            chat_admins,
            default_quota,
            schedule,
            matrix,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Validation(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
