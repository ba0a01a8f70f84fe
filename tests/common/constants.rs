//! Shared constants for end-to-end tests

// ============================================================================
// Test Data
// ============================================================================

/// Code of the catalog most tests operate on
pub const CATALOG_CODE: &str = "finance/ledger";

/// Index document id derived from [`CATALOG_CODE`]
#[allow(dead_code)]
pub const CATALOG_DOC_ID: &str = "finance-ledger";

/// Owner of the test catalogs
pub const OWNER_ID: &str = "owner-1";

/// Requesting user for audits and downloads
#[allow(dead_code)]
pub const TEST_USER: &str = "analyst-1";

/// Process definition every catalog audit type is bound to
pub const CATALOG_PROC_DEF: &str = "proc-catalog-v1";

/// Process definition the download audit type is bound to
pub const DOWNLOAD_PROC_DEF: &str = "proc-download-v1";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Request timeout for HTTP client
pub const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Maximum time to wait for asynchronous index delivery to settle
#[allow(dead_code)]
pub const SETTLE_TIMEOUT_MS: u64 = 3000;
