//! Video provider boundary.
//!
//! The engine only creates or joins a room for a session and ends it. The provider's
//! end-of-call event is what drives session completion.

use crate::types::UserId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Boxed future returned by provider calls
pub type VideoFuture<T> = Pin<Box<dyn Future<Output = Result<T, VideoError>> + Send>>;

/// Video provider error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VideoError {
    /// The room does not exist or already ended
    #[error("Call {0} not found")]
    CallNotFound(String),
    /// The provider could not be reached
    #[error("Video provider unavailable: {0}")]
    Unavailable(String),
}

/// What a participant needs to enter a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    /// Room reference, stable for the session
    pub call_ref: String,
    /// Participant-specific join URL
    pub join_url: String,
    /// Participant
    pub user_id: UserId,
}

/// Abstraction over video/streaming SDKs.
pub trait VideoProvider: Send + Sync {
    /// Create the room `room_ref` if needed and join it as `user_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the provider is unavailable
    fn create_or_join_call(&self, room_ref: &str, user_id: UserId) -> VideoFuture<CallHandle>;

    /// Close the room.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError::CallNotFound`] if the room is not active
    fn end_call(&self, call_ref: &str) -> VideoFuture<()>;
}

/// In-process provider tracking active rooms and their participants.
#[derive(Clone, Debug, Default)]
pub struct MockVideoProvider {
    rooms: Arc<Mutex<HashMap<String, Vec<UserId>>>>,
}

impl MockVideoProvider {
    /// Provider with no active rooms
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `call_ref` is an active room
    #[must_use]
    pub fn is_active(&self, call_ref: &str) -> bool {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(call_ref)
    }

    /// Participants who joined `call_ref`
    #[must_use]
    pub fn participants(&self, call_ref: &str) -> Vec<UserId> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_ref)
            .cloned()
            .unwrap_or_default()
    }
}

impl VideoProvider for MockVideoProvider {
    fn create_or_join_call(&self, room_ref: &str, user_id: UserId) -> VideoFuture<CallHandle> {
        let rooms = Arc::clone(&self.rooms);
        let call_ref = room_ref.to_string();
        Box::pin(async move {
            {
                let mut rooms = rooms.lock().unwrap_or_else(PoisonError::into_inner);
                let participants = rooms.entry(call_ref.clone()).or_default();
                if !participants.contains(&user_id) {
                    participants.push(user_id);
                }
            }
            let join_url = format!("https://video.mentorly.local/{call_ref}?user={user_id}");
            Ok(CallHandle {
                call_ref,
                join_url,
                user_id,
            })
        })
    }

    fn end_call(&self, call_ref: &str) -> VideoFuture<()> {
        let rooms = Arc::clone(&self.rooms);
        let call_ref = call_ref.to_string();
        Box::pin(async move {
            let removed = rooms
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&call_ref);
            removed
                .map(|_| ())
                .ok_or(VideoError::CallNotFound(call_ref))
        })
    }
}
