//! Backend collaborators: exercise list provider, completion recorder and streak provider.

mod client;

pub use client::{ApiClient, ApiError};
