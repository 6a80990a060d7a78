//! Wire formats for the command queue and the transport exchange

use crate::error::{MatchmakingError, Result};
use crate::service::Command;
use crate::transport::{Notice, SessionHandle};
use crate::types::UserId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COMMAND_QUEUE: &str = "ladder.commands";
pub const DEFAULT_TRANSPORT_EXCHANGE: &str = "ladder.transport";

/// Outbound request for the chat gateway
///
/// The engine names external sessions itself; the gateway maps `handle.id`
/// to whatever channel or thread it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TransportRequest {
    CreateSession {
        handle: SessionHandle,
        participants: Vec<UserId>,
    },
    SendToSession {
        handle: SessionHandle,
        notice: Notice,
    },
    EphemeralReply {
        user_id: UserId,
        #[serde(default)]
        correlation_id: Option<String>,
        notice: Notice,
    },
    GrantRole {
        user_id: UserId,
        role: String,
    },
    RevokeRole {
        user_id: UserId,
        role: String,
    },
    DeleteSession {
        handle: SessionHandle,
    },
    AlertStaff {
        notice: Notice,
    },
}

impl TransportRequest {
    /// Topic routing key, `transport.<operation>`
    pub fn routing_key(&self) -> &'static str {
        match self {
            TransportRequest::CreateSession { .. } => "transport.create_session",
            TransportRequest::SendToSession { .. } => "transport.send_to_session",
            TransportRequest::EphemeralReply { .. } => "transport.ephemeral_reply",
            TransportRequest::GrantRole { .. } => "transport.grant_role",
            TransportRequest::RevokeRole { .. } => "transport.revoke_role",
            TransportRequest::DeleteSession { .. } => "transport.delete_session",
            TransportRequest::AlertStaff { .. } => "transport.alert_staff",
        }
    }
}

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: crate::utils::generate_correlation_id(),
            timestamp: crate::utils::current_timestamp(),
            routing_key: routing_key.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Decode and validate a command body
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let command: Command =
        serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidRequest {
            reason: format!("Failed to deserialize command: {}", e),
        })?;
    validate_command(&command)?;
    Ok(command)
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    validate_command(command)?;
    serde_json::to_vec(command).map_err(|e| {
        MatchmakingError::InternalError {
            message: format!("Failed to serialize command: {}", e),
        }
        .into()
    })
}

/// Reject commands naming an empty user
pub fn validate_command(command: &Command) -> Result<()> {
    let users: Vec<&str> = match command {
        Command::RegisterUser { user_id, game_id, .. } => vec![user_id.as_str(), game_id.as_str()],
        Command::SelectClasses { user_id, .. }
        | Command::RequestAdmission { user_id, .. }
        | Command::LeaveQueue { user_id }
        | Command::ReportResult { user_id, .. }
        | Command::WithdrawResult { user_id, .. }
        | Command::RequestCancellation { user_id, .. }
        | Command::RespondCancellation { user_id, .. }
        | Command::ReportDispute { user_id, .. }
        | Command::Stay { user_id }
        | Command::AdminAdjustTrust { user_id, .. } => vec![user_id.as_str()],
        Command::AdminSetResult {
            player1, player2, ..
        } => vec![player1.as_str(), player2.as_str()],
        Command::AdminAdjustWinLoss { winner, loser } => vec![winner.as_str(), loser.as_str()],
        Command::AdminOpenSeason { name } => vec![name.as_str()],
        Command::QueryMatchHistory { .. }
        | Command::AdminCloseSeason
        | Command::AdminCancelSession { .. } => Vec::new(),
    };

    if users.iter().any(|value| value.trim().is_empty()) {
        return Err(MatchmakingError::InvalidRequest {
            reason: format!("Command {} has an empty identifier", command.name()),
        }
        .into());
    }
    Ok(())
}
