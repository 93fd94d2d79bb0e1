//! Eagle Eye Library
//!
//! Exam supervision core
//!
//! ## Architecture
//!
//! 1. Capture - frame acquisition seam (ffmpeg backend)
//! 2. Detectors - identity/object/gaze/posture/audio adapters
//! 3. ControlStateStore - runtime detector toggles
//! 4. AlertEngine - per-frame fusion rules (+ optional cooldown)
//! 5. ViolationLedger - durable high-severity violations with evidence
//! 6. AttendanceLog - daily attendance CSV
//! 7. SessionWorker - one capture loop per session key
//! 8. SessionManager - idempotent start/stop, at most one worker per key
//! 9. RealtimeHub - per-session WebSocket distribution
//! 10. Operator - roles and commands
//! 11. WebAPI - REST + WebSocket endpoints
//!
//! ## Data flow
//!
//! Manager spawns Worker -> Worker pulls frame -> snapshots controls -> runs enabled
//! detectors -> fusion -> high alerts to the ledger (with evidence) -> alerts and frame
//! published -> loop until stop -> release capture -> `terminated`.

pub mod alert_engine;
pub mod attendance_log;
pub mod capture;
pub mod control_state;
pub mod detectors;
pub mod operator;
pub mod realtime_hub;
pub mod session_manager;
pub mod session_worker;
pub mod violation_ledger;
pub mod web_api;
pub mod models;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
