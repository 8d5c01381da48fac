//! Pure state transition function.
//!
//! The transition function takes the current state and an event, and returns
//! the new state and a list of effects. It has no side effects.

use super::effect::{Effect, LogLevel};
use super::event::{DrainOutcome, Event};
use super::state::ConnectionState;

/// Result of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    /// The new state after the transition.
    pub state: ConnectionState,
    /// Effects to execute.
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConnectionState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }

    pub fn no_change(state: ConnectionState) -> Self {
        Self {
            state,
            effects: vec![],
        }
    }
}

fn reconnect(reason: &str) -> TransitionResult {
    TransitionResult::new(
        ConnectionState::StartConnection { attempt: 0 },
        vec![
            Effect::log(LogLevel::Warn, format!("Reconnecting to chat: {}", reason)),
            Effect::Connect { attempt: 0 },
        ],
    )
}

fn start_drain(reason: &str) -> TransitionResult {
    TransitionResult::new(
        ConnectionState::StartHandling {
            drain_pending: false,
            reconnect_required: false,
        },
        vec![
            Effect::log(LogLevel::Debug, format!("Starting drain: {}", reason)),
            Effect::StartDrain,
        ],
    )
}

fn outcome_log(outcome: &DrainOutcome) -> Effect {
    match outcome {
        DrainOutcome::Completed(report) if report.is_empty() => {
            Effect::log(LogLevel::Debug, "Drain finished with nothing to do")
        }
        DrainOutcome::Completed(report) if report.interrupted => Effect::log(
            LogLevel::Warn,
            format!(
                "Drain stopped early, a backend is unavailable: {} actions done, {} kept for the next drain",
                report.actions_done, report.actions_retained,
            ),
        ),
        DrainOutcome::Completed(report) => Effect::log(
            LogLevel::Info,
            format!(
                "Drain finished: {} rooms ensured, {} deferred, {} dropped; {} actions done, {} retained, {} dropped; {} corrupt records dropped",
                report.rooms_ensured,
                report.rooms_deferred,
                report.rooms_dropped,
                report.actions_done,
                report.actions_retained,
                report.actions_dropped,
                report.corrupt_dropped,
            ),
        ),
        DrainOutcome::Failed { error } => Effect::log(
            LogLevel::Error,
            format!("Drain failed, records stay queued: {}", error),
        ),
    }
}

/// Pure state transition function.
///
/// Given the current state and an event, returns the new state and effects to execute.
/// Pairs not listed here leave the state unchanged.
pub fn transition(state: ConnectionState, event: Event) -> TransitionResult {
    use ConnectionState::*;

    match (&state, event) {
        // =====================================================================
        // Connection
        // =====================================================================
        (Init, Event::Start) => TransitionResult::new(
            StartConnection { attempt: 0 },
            vec![
                Effect::log(LogLevel::Info, "Connecting to chat"),
                Effect::Connect { attempt: 0 },
            ],
        ),

        (StartConnection { .. }, Event::Connected) => {
            let mut result = start_drain("connected to chat");
            result
                .effects
                .insert(0, Effect::log(LogLevel::Info, "Connected to chat"));
            result
        }

        (StartConnection { attempt }, Event::ConnectionFailed { error }) => {
            let next = attempt.saturating_add(1);
            TransitionResult::new(
                StartConnection { attempt: next },
                vec![
                    Effect::log(
                        LogLevel::Warn,
                        format!("Chat connection attempt {} failed: {}", attempt + 1, error),
                    ),
                    Effect::Connect { attempt: next },
                ],
            )
        }

        // Queued records are kept until a connection exists.
        (Init | StartConnection { .. }, Event::DrainRequested { trigger }) => {
            TransitionResult::new(
                state,
                vec![Effect::log(
                    LogLevel::Debug,
                    format!("Drain request ({:?}) withheld until connected", trigger),
                )],
            )
        }

        // =====================================================================
        // Ready
        // =====================================================================
        (Ready, Event::DrainRequested { trigger }) => {
            start_drain(&format!("{:?} request", trigger).to_lowercase())
        }

        (Ready, Event::Disconnected) => reconnect("connection lost"),

        // =====================================================================
        // Draining
        // =====================================================================
        (
            StartHandling {
                drain_pending,
                reconnect_required,
            },
            Event::DrainStarted,
        ) => TransitionResult::no_change(HandlingInProgress {
            drain_pending: *drain_pending,
            reconnect_required: *reconnect_required,
        }),

        (
            StartHandling {
                reconnect_required,
                ..
            },
            Event::DrainRequested { .. },
        ) => TransitionResult::new(
            StartHandling {
                drain_pending: true,
                reconnect_required: *reconnect_required,
            },
            vec![Effect::log(
                LogLevel::Debug,
                "Drain already running, another one will follow",
            )],
        ),

        (
            HandlingInProgress {
                reconnect_required,
                ..
            },
            Event::DrainRequested { .. },
        ) => TransitionResult::new(
            HandlingInProgress {
                drain_pending: true,
                reconnect_required: *reconnect_required,
            },
            vec![Effect::log(
                LogLevel::Debug,
                "Drain already running, another one will follow",
            )],
        ),

        (StartHandling { drain_pending, .. }, Event::Disconnected) => TransitionResult::new(
            StartHandling {
                drain_pending: *drain_pending,
                reconnect_required: true,
            },
            vec![Effect::log(
                LogLevel::Warn,
                "Chat connection lost during drain, reconnecting afterwards",
            )],
        ),

        (HandlingInProgress { drain_pending, .. }, Event::Disconnected) => TransitionResult::new(
            HandlingInProgress {
                drain_pending: *drain_pending,
                reconnect_required: true,
            },
            vec![Effect::log(
                LogLevel::Warn,
                "Chat connection lost during drain, reconnecting afterwards",
            )],
        ),

        (
            StartHandling {
                drain_pending,
                reconnect_required,
            }
            | HandlingInProgress {
                drain_pending,
                reconnect_required,
            },
            Event::DrainFinished { outcome },
        ) => {
            let log = outcome_log(&outcome);
            let mut result = if *reconnect_required {
                reconnect("connection was lost during drain")
            } else if *drain_pending {
                start_drain("requested while previous drain was running")
            } else {
                TransitionResult::no_change(Ready)
            };
            result.effects.insert(0, log);
            result
        }

        // =====================================================================
        // Everything else
        // =====================================================================
        _ => TransitionResult::no_change(state),
    }
}
