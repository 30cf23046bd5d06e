//! Live-session entry and wrap-up.
//!
//! Joining goes through the access gate (confirmed, paid, inside the time window). The
//! room reference is derived from the session id, so both participants land in the
//! same room even when they join at the same moment. Ending a call stores the transcript
//! and notes when the provider hands them over, then completes the session.

use super::orchestrator::BookingOrchestrator;
use crate::aggregates::payment;
use crate::aggregates::session::SessionAction;
use crate::error::{BookingError, Result};
use crate::metrics;
use crate::types::{
    Session, SessionId, SessionStatus, SessionTrigger, UserId, VideoCall, VideoCallId,
    VideoCallStatus,
};
use crate::video::CallHandle;

impl BookingOrchestrator {
    /// Enter the live call of a session.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Unauthorized`]: user is not a participant
    /// - [`BookingError::LiveSessionUnavailable`]: not confirmed, not paid or outside
    ///   the scheduled window
    /// - [`BookingError::Video`] / [`BookingError::Timeout`]: provider failure
    #[tracing::instrument(skip(self))]
    pub async fn join_live_session(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<CallHandle> {
        let session = self.load_session(session_id).await?;
        if !session.is_participant(user_id) {
            return Err(BookingError::Unauthorized {
                actor_id: user_id,
                action: "join this session",
            });
        }

        let now = self.clock.now();
        if let Err(reason) = payment::check_live_access(&session, now) {
            metrics::record_live_join("denied");
            tracing::info!(session_id = %session_id, user_id = %user_id, %reason, "Live session access denied");
            return Err(BookingError::LiveSessionUnavailable { session_id, reason });
        }

        let room_ref = session
            .video_call_ref
            .clone()
            .unwrap_or_else(|| format!("session-{session_id}"));
        let handle = self
            .bounded("video join", self.video.create_or_join_call(&room_ref, user_id))
            .await?
            .map_err(|e| BookingError::Video(e.to_string()))?;

        if session.video_call_ref.is_none() {
            self.run_session_command(
                session_id,
                SessionAction::LinkVideoCall {
                    session_id,
                    call_ref: handle.call_ref.clone(),
                },
            )
            .await?;
            self.save_call_best_effort(VideoCall {
                id: VideoCallId::new(),
                session_id,
                call_ref: handle.call_ref.clone(),
                status: VideoCallStatus::Started,
                recording_url: None,
                started_at: Some(now),
                ended_at: None,
            })
            .await;
        }

        metrics::record_live_join("granted");
        tracing::info!(session_id = %session_id, user_id = %user_id, call_ref = %handle.call_ref, "Joined live session");
        Ok(handle)
    }

    /// Close the call of a confirmed session and complete it.
    ///
    /// Ending the room and storing the transcript, notes and call record are best
    /// effort; only the completion itself can fail the operation.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Unauthorized`]: actor is not a participant
    /// - [`BookingError::IllegalTransition`]: session is not `confirmed`
    #[tracing::instrument(skip(self, transcript, notes))]
    pub async fn end_live_session(
        &self,
        session_id: SessionId,
        actor_id: UserId,
        transcript: Option<String>,
        notes: Option<String>,
    ) -> Result<Session> {
        let session = self.load_session(session_id).await?;
        if !session.is_participant(actor_id) {
            return Err(BookingError::Unauthorized {
                actor_id,
                action: "end this session",
            });
        }
        if session.status != SessionStatus::Confirmed {
            return Err(BookingError::IllegalTransition {
                session_id,
                from: session.status,
                trigger: SessionTrigger::Complete,
            });
        }

        if let Some(call_ref) = session.video_call_ref.as_deref() {
            let ended = self
                .bounded("video end", self.video.end_call(call_ref))
                .await
                .and_then(|r| r.map_err(|e| BookingError::Video(e.to_string())));
            if let Err(e) = ended {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to end video call");
            }
        }

        if let Some(transcript) = transcript {
            let stored = self
                .run_session_command(
                    session_id,
                    SessionAction::RecordTranscript {
                        session_id,
                        actor_id,
                        transcript,
                    },
                )
                .await;
            if let Err(e) = stored {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to store transcript");
            }
        }
        if notes.is_some() {
            let stored = self
                .run_session_command(
                    session_id,
                    SessionAction::UpdateNotes {
                        session_id,
                        actor_id,
                        notes,
                    },
                )
                .await;
            if let Err(e) = stored {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to store notes");
            }
        }

        if let Some(call_ref) = session.video_call_ref.clone() {
            let now = self.clock.now();
            let record = match self.sessions.video_call_for(session_id).await {
                Ok(Some(call)) => VideoCall {
                    status: VideoCallStatus::Ended,
                    ended_at: Some(now),
                    ..call
                },
                Ok(None) => VideoCall {
                    id: VideoCallId::new(),
                    session_id,
                    call_ref,
                    status: VideoCallStatus::Ended,
                    recording_url: None,
                    started_at: None,
                    ended_at: Some(now),
                },
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to load video call record");
                    return self.complete_session(session_id).await;
                },
            };
            self.save_call_best_effort(record).await;
        }

        self.complete_session(session_id).await
    }

    async fn save_call_best_effort(&self, call: VideoCall) {
        let session_id = call.session_id;
        if let Err(e) = self.sessions.save_video_call(call).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to save video call record");
        }
    }
}
