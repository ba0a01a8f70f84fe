//! Time-boxed download access derived from approved download audits.

mod coordinator;

pub use coordinator::{
    AccessStatus, DownloadGrantCoordinator, DownloadSettings, CATALOG_WITHDRAWN_REASON,
    DOWNLOAD_AUDIT_TYPE,
};
