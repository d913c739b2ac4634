// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory for the redb database (unset = in-memory stores) | unset |
//! | `MASTER_KEY_SECRET` | HMAC secret for API key derivation | Required for production |
//! | `ADMIN_TOKEN` | Bearer token for admin endpoints | Required for admin API |
//! | `CREDITS_PER_BATCH` | Credits granted per batch of minor units | `100` |
//! | `MINOR_UNITS_PER_BATCH` | Minor units (cents) per credit batch | `100` |
//! | `GENERATION_COST` | Credits debited per accepted generation | `1` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

/// Environment variable name for the server bind address.
pub const HOST_ENV: &str = "HOST";

/// Environment variable name for the server bind port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable name for the data directory.
///
/// When set, the key registry and ledger are backed by a redb database at
/// `$DATA_DIR/credit-gate.redb`. When unset, both fall back to in-memory
/// stores (useful for local development; all state is lost on restart).
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the API key derivation secret.
///
/// Key material for the HMAC that derives opaque API keys. Must be set to a
/// high-entropy value in production; a development fallback is used when
/// unset so the server can start locally.
pub const MASTER_KEY_SECRET_ENV: &str = "MASTER_KEY_SECRET";

/// Environment variable name for the admin bearer token.
///
/// Admin endpoints (key issuance, credit adjustments, ledger inspection)
/// return 503 when this is unset rather than silently allowing access.
pub const ADMIN_TOKEN_ENV: &str = "ADMIN_TOKEN";

/// Environment variable name for the credits side of the exchange rate.
pub const CREDITS_PER_BATCH_ENV: &str = "CREDITS_PER_BATCH";

/// Environment variable name for the minor-units side of the exchange rate.
pub const MINOR_UNITS_PER_BATCH_ENV: &str = "MINOR_UNITS_PER_BATCH";

/// Environment variable name for the per-generation credit cost.
pub const GENERATION_COST_ENV: &str = "GENERATION_COST";

/// Environment variable name for the logging format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default credits granted per batch of minor units (100 credits / 100¢).
pub const DEFAULT_CREDITS_PER_BATCH: u64 = 100;

/// Default minor units per credit batch.
pub const DEFAULT_MINOR_UNITS_PER_BATCH: u64 = 100;

/// Default credits debited per accepted image generation.
pub const DEFAULT_GENERATION_COST: i64 = 1;

/// Development-only fallback for `MASTER_KEY_SECRET`.
pub const DEV_MASTER_KEY_SECRET: &str = "credit-gate-dev-secret";

/// Filename of the redb database under `DATA_DIR`.
pub const DB_FILENAME: &str = "credit-gate.redb";
