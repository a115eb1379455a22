//! MISP plugin constants.

pub const PLATFORM_NAME: &str = "MISP";
pub const PLUGIN_NAME: &str = "MISP";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MODULE_NAME: &str = "CTE";

/// Attributes requested per `attributes/restSearch` page.
pub const PULL_PAGE_SIZE: u64 = 1000;

/// Attributes sent per `events/add` or `events/edit` call.
pub const BATCH_SIZE: usize = 1000;

/// Upper bound of the look-back window, in hours (one year).
pub const MAX_LOOK_BACK: i64 = 8760;

/// Upper bound for integer configuration parameters.
pub const INTEGER_THRESHOLD: i64 = 4_611_686_018_427_387_904;

/// Log prefix suffix used by the retraction flows.
pub const RETRACTION: &str = "Retraction";

/// Tag attached to every attribute shared to MISP. Pulls exclude it.
pub const DEFAULT_IOC_TAG: &str = "ioc-bridge";

/// Prefix of the per-source tag attached to shared attributes.
pub const SHARING_TAG_CONSTANT: &str = "ioc-bridge source";

/// Maximum tag length accepted by MISP.
pub const MISP_MAX_TAG_LENGTH: usize = 255;

/// Colour of tags created on MISP by the push flow.
pub const MISP_TAG_COLOUR: &str = "#ff0000";

/// Prefix of the host tag derived from an attribute category.
pub const CATEGORY_TAG_PREFIX: &str = "MISPCATEGORY-";

pub const ATTRIBUTE_TYPES: &[&str] = &[
    "md5",
    "sha256",
    "ip-src",
    "ip-dst",
    "url",
    "domain",
    "domain|ip",
    "hostname",
    "ip-src|port",
    "ip-dst|port",
    "hostname|port",
];

pub const ATTRIBUTE_CATEGORIES: &[&str] = &[
    "Internal reference",
    "Targeting data",
    "Antivirus detection",
    "Payload delivery",
    "Artifacts dropped",
    "Payload installation",
    "Persistence mechanism",
    "Network activity",
    "Payload type",
    "Attribution",
    "External analysis",
    "Financial fraud",
    "Support Tool",
    "Social network",
    "Person",
    "Other",
];

/// Host types shared as an IP attribute when the value is an IP, else as `url`.
pub const BIFURCATE_INDICATOR_TYPES: &[&str] = &["url", "ipv4", "ipv6"];

/// Allowed values of the `ip_ioc_type` action parameter.
pub const IP_IOC_TYPES: &[&str] = &["ip-src", "ip-dst"];

pub const PULLING_MECHANISMS: &[&str] = &["incremental", "look_back"];
