//! Data models for linkbio

mod link;
mod status;

pub use link::{compare_links, normalize_url, LinkEntry, LinkFields, LinkId, RawCollection};
pub use status::{StatusKind, StatusMessage};
