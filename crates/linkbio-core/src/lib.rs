//! linkbio-core - Core library for linkbio
//!
//! This crate contains the link models, the synchronized link-list view
//! model, and the Firebase auth and Realtime Database clients used by the
//! linkbio interfaces.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod subscription;
pub mod util;
pub mod view;

pub use error::{Error, Result};
pub use models::{LinkEntry, LinkId};
pub use view::{LinkListViewModel, ViewEffect, ViewEvent};
