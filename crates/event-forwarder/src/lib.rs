//! Server-side forwarder for storefront tracking events.
//!
//! Receives events from page trackers, validates them against the event
//! schema, enriches them with request-derived fields and relays each one to
//! the Retail `userEvents:write` API using the deployment's ambient
//! credential.
//!
//! ```text
//! POST /v1/events        -> validate -> enrich -> IngestionClient -> Retail API
//! POST /v1/events/batch  -> the same, per entry, partial success reported
//! ```
//!
//! Status mapping for `POST /v1/events`:
//!
//! | Outcome | HTTP | `status` |
//! |---------|------|----------|
//! | relayed | 200 | `delivered` |
//! | schema violation, bad JSON | 400 | `invalid` |
//! | body over the byte limit | 413 | `rejected` |
//! | upload cut off, network error, 5xx, 429, no token | 503 | `retryable` |
//! | other 4xx from the API | 422 | `rejected` |

pub mod config;
pub mod credentials;
pub mod enrich;
pub mod error;
pub mod forwarder;
pub mod ingestion;
pub mod server;

pub use config::{CredentialSource, ForwarderConfig, RetailTarget};
pub use credentials::{CredentialProvider, MetadataServerCredentials, StaticCredentials};
pub use enrich::{EnrichedEvent, EnrichmentPolicy, RequestContext, UserEvent, UserInfo};
pub use error::{ForwarderError, ForwarderResult};
pub use forwarder::{
    BatchRequest, BatchResponse, EntryResult, Forwarder, IngressResponse, IngressStatus,
};
pub use ingestion::{IngestionClient, UserEventWriter};
pub use server::{router, serve, AppState};
