//! A typed, lazily populated object model for the GitHub REST API.
//!
//! A [`Session`] owns an HTTP client and one identity cache per entity
//! kind, so looking up the same user, repository, or issue twice
//! returns the same shared instance. Entities start out as bare keys:
//! reading an unpopulated property returns `None` and schedules a
//! background fetch, while [`refresh`](model::User::refresh) methods
//! revalidate explicitly with `ETag`/`If-Modified-Since` conditional
//! requests. Collections reconcile against server snapshots and
//! broadcast minimal change notifications instead of being rebuilt.
//!
//! ```no_run
//! use hubkit_core::{CancellationToken, Session};
//!
//! # async fn demo() -> Result<(), hubkit_core::Error> {
//! let session = Session::anonymous()?;
//! let user = session.user("octocat", &CancellationToken::new()).await?;
//! println!("{:?}", user.name());
//! # Ok(())
//! # }
//! ```

mod error;
mod mapping;
mod session;

pub mod list;
pub mod model;
pub mod store;

pub use error::Error;
pub use session::Session;

pub use hubkit_api::{ApiConfig, CancellationToken, Url};
