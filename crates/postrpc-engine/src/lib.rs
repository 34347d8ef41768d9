//! postrpc engines — run JSON-RPC calls through middleware stacks.
//!
//! Two engines live here: the structural [`JsonRpcEngine`], whose middleware
//! see an immutable call and return results, and the callback-style
//! [`LegacyEngine`], whose middleware edit draft requests and responses and
//! signal completion through a [`Flow`]. Adapters let either run inside the
//! other. [`JsonRpcServer`] and [`Provider`] are the front doors collaborators
//! use.

pub mod compat;
pub mod context;
pub mod engine;
pub mod error;
pub mod ids;
pub mod legacy;
pub mod middleware;
pub mod provider;
pub mod scaffold;
pub mod server;

pub use compat::{LegacyAdapter, legacy_as_v2};
pub use context::{Context, ContextKey, ValueKind};
pub use engine::{EngineBuilder, HandleOptions, JsonRpcEngine, Next};
pub use error::{ContextError, EngineError, ProtocolError};
pub use ids::{IdGenerator, unique_id};
pub use legacy::{Flow, LegacyEngine, LegacyMiddleware, PendingRequest, PendingResponse};
pub use middleware::{BoxedMiddleware, Middleware, MiddlewareResult, boxed, from_fn};
pub use provider::{Provider, RequestArgs};
pub use scaffold::Scaffold;
pub use server::{JsonRpcServer, RequestHandler};
