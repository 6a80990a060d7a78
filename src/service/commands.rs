//! Command table: every exposed operation as one serde-tagged enum

use crate::error::{classify, ErrorKind};
use crate::service::engine::MatchService;
use crate::types::{GameClass, HistoryFilter, RequestContext, SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

/// Inbound command, as carried on the command queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RegisterUser {
        user_id: UserId,
        #[serde(default)]
        display_name: String,
        game_id: String,
    },
    SelectClasses {
        user_id: UserId,
        first: GameClass,
        second: GameClass,
    },
    RequestAdmission {
        user_id: UserId,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    LeaveQueue {
        user_id: UserId,
    },
    ReportResult {
        user_id: UserId,
        #[serde(default)]
        session_id: Option<SessionId>,
        wins: u8,
    },
    WithdrawResult {
        user_id: UserId,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    RequestCancellation {
        user_id: UserId,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    RespondCancellation {
        user_id: UserId,
        #[serde(default)]
        session_id: Option<SessionId>,
        accept: bool,
    },
    ReportDispute {
        user_id: UserId,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    Stay {
        user_id: UserId,
    },
    QueryMatchHistory {
        #[serde(default)]
        filter: HistoryFilter,
    },
    AdminSetResult {
        player1: UserId,
        player1_wins: u8,
        player2: UserId,
        player2_wins: u8,
    },
    AdminOpenSeason {
        name: String,
    },
    AdminCloseSeason,
    AdminCancelSession {
        session_id: SessionId,
    },
    AdminAdjustTrust {
        user_id: UserId,
        delta: i32,
    },
    AdminAdjustWinLoss {
        winner: UserId,
        loser: UserId,
    },
}

impl Command {
    /// Metric and log label
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterUser { .. } => "register_user",
            Command::SelectClasses { .. } => "select_classes",
            Command::RequestAdmission { .. } => "request_admission",
            Command::LeaveQueue { .. } => "leave_queue",
            Command::ReportResult { .. } => "report_result",
            Command::WithdrawResult { .. } => "withdraw_result",
            Command::RequestCancellation { .. } => "request_cancellation",
            Command::RespondCancellation { .. } => "respond_cancellation",
            Command::ReportDispute { .. } => "report_dispute",
            Command::Stay { .. } => "stay",
            Command::QueryMatchHistory { .. } => "query_match_history",
            Command::AdminSetResult { .. } => "admin_set_result",
            Command::AdminOpenSeason { .. } => "admin_open_season",
            Command::AdminCloseSeason => "admin_close_season",
            Command::AdminCancelSession { .. } => "admin_cancel_session",
            Command::AdminAdjustTrust { .. } => "admin_adjust_trust",
            Command::AdminAdjustWinLoss { .. } => "admin_adjust_win_loss",
        }
    }

    pub fn is_admin(&self) -> bool {
        self.name().starts_with("admin_")
    }
}

/// Outcome of a dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandReply {
    Ok { message: String, data: Value },
    Rejected { kind: ErrorKind, message: String },
    Failed { message: String },
}

impl CommandReply {
    fn ok(message: impl Into<String>, data: impl Serialize) -> anyhow::Result<Self> {
        Ok(CommandReply::Ok {
            message: message.into(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandReply::Ok { .. })
    }

    fn status(&self) -> &'static str {
        match self {
            CommandReply::Ok { .. } => "ok",
            CommandReply::Rejected { .. } => "rejected",
            CommandReply::Failed { .. } => "failed",
        }
    }
}

impl MatchService {
    /// Run one command and turn its result into a reply
    ///
    /// Validation, conflict and not-found errors are shown to the caller;
    /// everything else is logged and answered with a generic failure.
    pub async fn dispatch(&self, command: Command) -> CommandReply {
        let name = command.name();
        if command.is_admin() {
            info!("Staff command received - command: {}", name);
        } else {
            debug!("Dispatching command - command: {}", name);
        }

        let reply = match self.execute(command).await {
            Ok(reply) => reply,
            Err(e) => {
                let kind = classify(&e);
                if kind.is_user_visible() {
                    debug!("Command rejected - command: {}, kind: {}, error: {}", name, kind, e);
                    CommandReply::Rejected {
                        kind,
                        message: e.to_string(),
                    }
                } else {
                    error!("Command failed - command: {}, kind: {}, error: {:#}", name, kind, e);
                    CommandReply::Failed {
                        message: "The request could not be completed, please try again later"
                            .to_string(),
                    }
                }
            }
        };

        self.metrics().record_command(name, reply.status());
        reply
    }

    async fn execute(&self, command: Command) -> anyhow::Result<CommandReply> {
        match command {
            Command::RegisterUser {
                user_id,
                display_name,
                game_id,
            } => {
                let user = self.register_user(&user_id, &display_name, &game_id).await?;
                CommandReply::ok("Registered", user)
            }
            Command::SelectClasses {
                user_id,
                first,
                second,
            } => {
                let user = self.select_classes(&user_id, first, second).await?;
                CommandReply::ok("Classes selected", user.classes)
            }
            Command::RequestAdmission {
                user_id,
                correlation_id,
            } => {
                let mut context = RequestContext::new(user_id);
                if let Some(id) = correlation_id {
                    context = context.with_correlation_id(id);
                }
                let enqueued_at = self.request_admission(context).await?;
                CommandReply::ok("Queued, looking for an opponent", json!({ "enqueued_at": enqueued_at }))
            }
            Command::LeaveQueue { user_id } => {
                let removed = self.leave_queue(&user_id).await?;
                let message = if removed { "Left the queue" } else { "Not in the queue" };
                CommandReply::ok(message, json!({ "removed": removed }))
            }
            Command::ReportResult {
                user_id,
                session_id,
                wins,
            } => {
                let receipt = self.report_result(session_id, &user_id, wins).await?;
                CommandReply::ok("Result recorded", receipt)
            }
            Command::WithdrawResult {
                user_id,
                session_id,
            } => {
                self.withdraw_result(session_id, &user_id).await?;
                CommandReply::ok("Result withdrawn", Value::Null)
            }
            Command::RequestCancellation {
                user_id,
                session_id,
            } => {
                self.request_cancellation(session_id, &user_id).await?;
                CommandReply::ok("Cancellation proposed", Value::Null)
            }
            Command::RespondCancellation {
                user_id,
                session_id,
                accept,
            } => {
                let decision = self.respond_cancellation(session_id, &user_id, accept).await?;
                CommandReply::ok("Cancellation answered", decision)
            }
            Command::ReportDispute {
                user_id,
                session_id,
            } => {
                self.report_dispute(session_id, &user_id).await?;
                CommandReply::ok("Dispute reported to staff", Value::Null)
            }
            Command::Stay { user_id } => {
                let user = self.stay(&user_id).await?;
                CommandReply::ok("Stay recorded", user)
            }
            Command::QueryMatchHistory { filter } => {
                let records = self.query_match_history(&filter).await?;
                CommandReply::ok(format!("{} matches", records.len()), records)
            }
            Command::AdminSetResult {
                player1,
                player1_wins,
                player2,
                player2_wins,
            } => {
                let resolution = self
                    .admin_set_result(&player1, player1_wins, &player2, player2_wins)
                    .await?;
                CommandReply::ok("Result recorded", resolution)
            }
            Command::AdminOpenSeason { name } => {
                let season = self.admin_open_season(&name).await?;
                CommandReply::ok("Season opened", season)
            }
            Command::AdminCloseSeason => {
                let report = self.admin_close_season().await?;
                CommandReply::ok("Season closed", report)
            }
            Command::AdminCancelSession { session_id } => {
                self.admin_cancel_session(session_id).await?;
                CommandReply::ok("Session cancelled", Value::Null)
            }
            Command::AdminAdjustTrust { user_id, delta } => {
                let user = self.admin_adjust_trust(&user_id, delta).await?;
                CommandReply::ok("Trust adjusted", json!({ "trust_points": user.trust_points }))
            }
            Command::AdminAdjustWinLoss { winner, loser } => {
                let users = self.admin_adjust_win_loss(&winner, &loser).await?;
                CommandReply::ok("Win/loss adjusted", users)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let command: Command = serde_json::from_str(
            r#"{"command":"report_result","user_id":"alice","wins":2}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::ReportResult {
                user_id: "alice".to_string(),
                session_id: None,
                wins: 2,
            }
        );
        assert_eq!(command.name(), "report_result");

        let command: Command = serde_json::from_str(r#"{"command":"admin_close_season"}"#).unwrap();
        assert!(command.is_admin());

        let command: Command = serde_json::from_str(
            r#"{"command":"query_match_history","filter":{"user_id":"alice","class":"Runecraft","limit":5}}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::QueryMatchHistory {
                filter: HistoryFilter {
                    user_id: Some("alice".to_string()),
                    season_name: None,
                    class: Some(GameClass::Runecraft),
                    limit: Some(5),
                },
            }
        );

        let command: Command = serde_json::from_str(
            r#"{"command":"select_classes","user_id":"bob","first":"Runecraft","second":"Havencraft"}"#,
        )
        .unwrap();
        assert!(!command.is_admin());
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"command":"fly"}"#).is_err());
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = CommandReply::Rejected {
            kind: ErrorKind::Conflict,
            message: "User already queued: alice".to_string(),
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["kind"], "Conflict");
    }
}
