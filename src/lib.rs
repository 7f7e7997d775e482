//! Storage and credential core for OpenID Connect providers: sessions, one-time session keys,
//! opaque refresh tokens, client secrets, encrypted signing keys, and users, all enforced the same
//! way over interchangeable storage backends.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod clock;
pub mod config;
pub mod connector;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod id;
pub mod key;
pub mod obs;
pub mod refresh;
pub mod session;
pub mod store;
pub mod token;
pub mod user;

pub use driver::Driver;
pub use error::{Error, Result};

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use url;
