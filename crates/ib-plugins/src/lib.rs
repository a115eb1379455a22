//! # ib-plugins
//!
//! Threat-intelligence integration plugins for the ioc-bridge host.
//!
//! Each plugin connects the host's indicator store to one vendor platform:
//!
//! - [`misp`]: pulls MISP attributes as indicators, shares indicators into
//!   MISP events and retracts attributes that are no longer active.
//! - [`forescout`]: pulls device records from Forescout.
//! - [`syslog`]: forwards indicators to a syslog collector as CEF events.
//! - [`viso_trust`]: reads and creates VISO TRUST relationships.
//!
//! The plugins share the HTTP plumbing in [`http`] and the trait seams in
//! [`traits`].

pub mod forescout;
pub mod http;
pub mod misp;
pub mod redact;
pub mod secure_string;
pub mod syslog;
pub mod tags;
pub mod testing;
pub mod traits;
pub mod validators;
pub mod viso_trust;

pub use secure_string::SecureString;

pub use traits::{
    Action, ActionField, ApplicationRecord, DeviceRecord, FieldChoice, Indicator, IndicatorSink,
    IndicatorType, ModifiedIndicators, Plugin, PluginError, PluginResult, PullCheckpoint, PullPage,
    PushResult, RecordSource, Retractable, Severity, ValidationResult,
};

pub use forescout::{ForescoutConfig, ForescoutPlugin};
pub use http::{HostSettings, RetryPolicy};
pub use misp::{MispConfig, MispPlugin};
pub use syslog::{SyslogConfig, SyslogPlugin};
pub use tags::{InMemoryTagStore, TagStore};
pub use viso_trust::{VisoTrustConfig, VisoTrustPlugin};
