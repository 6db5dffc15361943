use serde::Deserialize;
use std::env;

/// Counting window for the tutor's monthly session cap.
///
/// `AllTime` reproduces the historical behavior: every session the tutor has
/// ever created counts against the cap, regardless of month or academic
/// level. `CalendarMonth` scopes the count to the current calendar month and
/// the booked academic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    AllTime,
    CalendarMonth,
}

impl QuotaWindow {
    pub fn parse(value: &str) -> Self {
        match value {
            "calendar_month" => QuotaWindow::CalendarMonth,
            _ => QuotaWindow::AllTime,
        }
    }
}

/// Booking-time policy knobs consumed by the session scheduler.
#[derive(Debug, Clone, Copy)]
pub struct BookingPolicy {
    pub quota_window: QuotaWindow,
    /// When false (historical default) session creation trusts the hire
    /// acceptance step and dashboards alone warn about unpaid access; when
    /// true a valid payment window is a hard precondition and one session is
    /// consumed from it per booking.
    pub require_payment_at_booking: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub gateway_url: String,
    pub gateway_secret: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub require_payment_at_booking: bool,
    pub quota_window: QuotaWindow,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            // Fallback to current directory .env for backward compatibility
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            // Load base config from TOML file
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/tutorlink".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "tutorlink".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: JWT_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            });

        let gateway_url = settings
            .get_string("payment.gateway_url")
            .or_else(|_| env::var("PAYMENT_GATEWAY_URL"))
            .unwrap_or_else(|_| "http://localhost:9090".to_string());

        let gateway_secret = settings
            .get_string("payment.gateway_secret")
            .or_else(|_| env::var("PAYMENT_GATEWAY_SECRET"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: PAYMENT_GATEWAY_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default gateway secret (dev mode only!)");
                "whsec-dev-only".to_string()
            });

        let checkout_success_url = settings
            .get_string("payment.checkout_success_url")
            .or_else(|_| env::var("CHECKOUT_SUCCESS_URL"))
            .unwrap_or_else(|_| "http://localhost:3000/payment/success".to_string());

        let checkout_cancel_url = settings
            .get_string("payment.checkout_cancel_url")
            .or_else(|_| env::var("CHECKOUT_CANCEL_URL"))
            .unwrap_or_else(|_| "http://localhost:3000/payment/cancelled".to_string());

        let require_payment_at_booking = settings
            .get_bool("booking.require_payment_at_booking")
            .ok()
            .or_else(|| {
                env::var("REQUIRE_PAYMENT_AT_BOOKING")
                    .ok()
                    .map(|v| v == "1" || v == "true")
            })
            .unwrap_or(false);

        let quota_window = settings
            .get_string("booking.quota_window")
            .or_else(|_| env::var("QUOTA_WINDOW"))
            .map(|v| QuotaWindow::parse(&v))
            .unwrap_or(QuotaWindow::AllTime);

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            gateway_url,
            gateway_secret,
            checkout_success_url,
            checkout_cancel_url,
            require_payment_at_booking,
            quota_window,
        })
    }

    pub fn booking_policy(&self) -> BookingPolicy {
        BookingPolicy {
            quota_window: self.quota_window,
            require_payment_at_booking: self.require_payment_at_booking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_window_defaults_to_all_time() {
        assert_eq!(QuotaWindow::parse("calendar_month"), QuotaWindow::CalendarMonth);
        assert_eq!(QuotaWindow::parse("all_time"), QuotaWindow::AllTime);
        assert_eq!(QuotaWindow::parse("nonsense"), QuotaWindow::AllTime);
    }
}
