//! Operator commands and roles
//!
//! Commands arrive as JSON over a session's WebSocket, e.g.
//! `{"command": "update_controls", "module": "gaze", "enabled": false}`.

use crate::control_state::ControlState;
use crate::error::{Error, Result};
use crate::realtime_hub::HubMessage;
use crate::session_manager::SessionManager;
use serde::{Deserialize, Serialize};

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Invigilator,
}

impl Role {
    /// Admin iff an admin token is configured and `token` matches it
    pub fn resolve(token: Option<&str>, admin_token: Option<&str>) -> Self {
        match (token, admin_token) {
            (Some(token), Some(admin)) if !admin.is_empty() && token == admin => Role::Admin,
            _ => Role::Invigilator,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Inbound operator command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
    UpdateControls { module: String, enabled: bool },
}

impl Command {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Validation(format!("Invalid command: {}", e)))
    }
}

/// What a command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Started,
    AlreadyRunning,
    StopRequested,
    NotRunning,
    ControlsChanged(ControlState),
    ControlsUnchanged(ControlState),
    Rejected,
}

/// Execute `command` on `session_key` for a caller with `role`
///
/// Accepted control changes are broadcast to every subscriber of the session.
pub async fn execute(
    manager: &SessionManager,
    session_key: &str,
    role: Role,
    command: Command,
) -> CommandOutcome {
    match command {
        Command::Start => {
            if manager.start(session_key).await {
                CommandOutcome::Started
            } else {
                tracing::debug!(session_key = %session_key, "Start ignored; session already live");
                CommandOutcome::AlreadyRunning
            }
        }
        Command::Stop => {
            if manager.stop(session_key).await {
                CommandOutcome::StopRequested
            } else {
                CommandOutcome::NotRunning
            }
        }
        Command::UpdateControls { module, enabled } => {
            if !role.is_admin() {
                tracing::warn!(
                    session_key = %session_key,
                    module = %module,
                    role = ?role,
                    "Unauthorized control update attempt"
                );
                return CommandOutcome::Rejected;
            }

            let store = manager.controls(session_key).await;
            // Broadcasts go out in write order
            let writer = store.writer().await;
            let update = writer.set(&module, enabled);
            if update.changed {
                manager
                    .hub()
                    .broadcast(session_key, HubMessage::ControlsUpdate(update.snapshot))
                    .await;
                CommandOutcome::ControlsChanged(update.snapshot)
            } else {
                CommandOutcome::ControlsUnchanged(update.snapshot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::ScriptedSource;
    use crate::session_manager::testing::manager;
    use std::sync::Arc;

    #[test]
    fn test_role_resolution() {
        assert_eq!(Role::resolve(Some("s3cret"), Some("s3cret")), Role::Admin);
        assert_eq!(Role::resolve(Some("guess"), Some("s3cret")), Role::Invigilator);
        assert_eq!(Role::resolve(None, Some("s3cret")), Role::Invigilator);
        assert_eq!(Role::resolve(Some(""), Some("")), Role::Invigilator);
        assert_eq!(Role::resolve(Some("x"), None), Role::Invigilator);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(r#"{"command":"start"}"#).unwrap(), Command::Start);
        assert_eq!(Command::parse(r#"{"command":"stop"}"#).unwrap(), Command::Stop);
        assert_eq!(
            Command::parse(r#"{"command":"update_controls","module":"gaze","enabled":false}"#)
                .unwrap(),
            Command::UpdateControls {
                module: "gaze".to_string(),
                enabled: false
            }
        );
        assert!(matches!(
            Command::parse(r#"{"command":"reboot"}"#),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_invigilator_cannot_update_controls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedSource::frames()), dir.path()).await;
        let (_id, mut rx) = manager.hub().register("supervision", Role::Invigilator).await;

        let outcome = execute(
            &manager,
            "supervision",
            Role::Invigilator,
            Command::UpdateControls {
                module: "gaze".to_string(),
                enabled: false,
            },
        )
        .await;

        assert_eq!(outcome, CommandOutcome::Rejected);
        assert!(manager.controls("supervision").await.get().gaze);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_admin_update_broadcasts_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedSource::frames()), dir.path()).await;
        let (_a, mut rx_a) = manager.hub().register("supervision", Role::Admin).await;
        let (_b, mut rx_b) = manager.hub().register("supervision", Role::Invigilator).await;

        let update = Command::UpdateControls {
            module: "gaze".to_string(),
            enabled: false,
        };
        let outcome = execute(&manager, "supervision", Role::Admin, update.clone()).await;
        assert!(matches!(outcome, CommandOutcome::ControlsChanged(s) if !s.gaze));

        for rx in [&mut rx_a, &mut rx_b] {
            let value: serde_json::Value =
                serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(value["type"], "controls_update");
            assert_eq!(value["data"]["gaze"], false);
        }

        // Same value again: no broadcast
        let outcome = execute(&manager, "supervision", Role::Admin, update).await;
        assert!(matches!(outcome, CommandOutcome::ControlsUnchanged(_)));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_controls_update_matches_store_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(manager(Arc::new(ScriptedSource::frames()), dir.path()).await);
        let (_id, mut rx) = manager.hub().register("supervision", Role::Admin).await;
        let modules = ["audio", "gaze", "object", "posture"];

        for round in 0..300 {
            let mut tasks = Vec::new();
            for i in 0..4 {
                let manager = manager.clone();
                let command = Command::UpdateControls {
                    module: modules[(round + i) % 4].to_string(),
                    enabled: (round / 4 + i) % 2 == 0,
                };
                tasks.push(tokio::spawn(async move {
                    execute(&manager, "supervision", Role::Admin, command).await
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            let mut last = None;
            while let Ok(json) = rx.try_recv() {
                last = Some(json);
            }
            if let Some(json) = last {
                let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                assert_eq!(value["type"], "controls_update");
                let broadcast: ControlState = serde_json::from_value(value["data"].clone()).unwrap();
                let stored = manager.controls("supervision").await.get();
                assert_eq!(broadcast, stored, "round {}", round);
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_module_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedSource::frames()), dir.path()).await;
        let outcome = execute(
            &manager,
            "supervision",
            Role::Admin,
            Command::UpdateControls {
                module: "identity".to_string(),
                enabled: false,
            },
        )
        .await;
        assert_eq!(outcome, CommandOutcome::ControlsUnchanged(ControlState::default()));
    }

    #[tokio::test]
    async fn test_start_stop_commands() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedSource::frames()), dir.path()).await;

        assert_eq!(
            execute(&manager, "registration", Role::Invigilator, Command::Stop).await,
            CommandOutcome::NotRunning
        );
        assert_eq!(
            execute(&manager, "registration", Role::Invigilator, Command::Start).await,
            CommandOutcome::Started
        );
        assert_eq!(
            execute(&manager, "registration", Role::Invigilator, Command::Start).await,
            CommandOutcome::AlreadyRunning
        );
        assert_eq!(
            execute(&manager, "registration", Role::Invigilator, Command::Stop).await,
            CommandOutcome::StopRequested
        );
        manager.shutdown_all().await;
    }
}
