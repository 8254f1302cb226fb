//! Auth endpoint protection pipeline.
//!
//! Every POST under the auth namespace is classified, fingerprinted and
//! evaluated against one rule chain before it reaches the identity service:
//!
//! ```text
//! request -> route::classify -> identity::resolve_fingerprint
//!         -> compose::select_chain -> evaluator -> decision::reduce
//!         -> forward | deny
//! ```
//!
//! Denials are JSON `{ "message": ... }` bodies with 400, 403, 413 or 429.
//! Evaluator failures fail closed with 403.

pub mod body;
pub mod compose;
pub mod decision;
pub mod dispatch;
pub mod evaluator;
pub mod identity;
pub mod local;
pub mod remote;
pub mod route;
pub mod rules;
pub mod session;

pub use body::{BodyIntent, MalformedBodyPolicy};
pub use decision::{EvaluationOutcome, Reason, ResponseDescriptor};
pub use dispatch::{protect, ProtectionConfig, ProtectionState};
pub use evaluator::{EvaluationRequest, EvaluatorError, ProtectionEvaluator};
pub use identity::Fingerprint;
pub use local::LocalEvaluator;
pub use remote::HttpEvaluator;
pub use route::{RouteClassifier, RouteIntent};
pub use rules::RuleChain;
pub use session::{HttpSessionProvider, NoSessionProvider, SessionInfo, SessionProvider};
