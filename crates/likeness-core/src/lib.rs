//! likeness-core — face verification engine.
//!
//! Compares the face in an uploaded photo with a live-captured one. Faces are
//! found with SCRFD and embedded with ArcFace on ONNX Runtime; the rest of the
//! crate (guidance, retries, sessions, the match decision) only sees the
//! [`EmbeddingProvider`] trait.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod error;
pub mod guidance;
pub mod models;
pub mod policy;
pub mod provider;
pub mod recognizer;
pub mod retry;
pub mod session;
pub mod types;
pub mod verify;

pub use engine::{spawn_engine, EngineHandle};
pub use error::{ErrorKind, FaceError, ProviderError};
pub use guidance::{FrameObservation, GuideEllipse, Guidance, GuidanceTask};
pub use policy::{DetectorOptions, RetryPolicy};
pub use provider::{EmbeddingProvider, OnnxProvider};
pub use session::VerificationSession;
pub use types::{BoundingBox, Descriptor, FaceDetection, Image, ImageOrigin, VerificationResult};
