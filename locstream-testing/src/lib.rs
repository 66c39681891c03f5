use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use locstream_logic::{
    AuthorizationStatus, HeadingFix, LocationDelegate, LocationError, LocationErrorKind,
    LocationProvider, LocationService, PermissionLevel, PositionFix, ProviderCallbacks,
    ServiceSettings, Subscription,
};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// A recorded (or hand written) sequence of provider events to play back
pub struct Script {
    #[serde(default)]
    pub settings: ServiceSettings,
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    /// Consumer enables the service
    Enable,
    /// Consumer disables the service
    Disable,
    /// Provider delivers a batch of position fixes
    Positions(Vec<PositionFix>),
    /// Provider delivers a compass reading
    Heading(HeadingFix),
    /// Provider reports a permission change
    Authorization(AuthorizationStatus),
    /// Provider fails with the given message
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCommand {
    StartPosition,
    StopPosition,
    StartHeading,
    StopHeading,
    RequestPermission(PermissionLevel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Position,
    Heading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Everything observable during a replay, in the order it happened
pub enum ReplayOutput {
    Command {
        command: ProviderCommand,
    },
    Position {
        fix: PositionFix,
    },
    Heading {
        fix: HeadingFix,
    },
    Terminated {
        stream: StreamName,
        kind: LocationErrorKind,
        message: String,
    },
}

impl ReplayOutput {
    fn terminated(stream: StreamName, err: &LocationError) -> Self {
        Self::Terminated {
            stream,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Provider whose callbacks are driven by a [Script], commands it receives are reported
/// as [ReplayOutput::Command].
pub struct ScriptedProvider {
    delegate: LocationDelegate,
    output: mpsc::UnboundedSender<ReplayOutput>,
    heading_running: AtomicBool,
}

impl ScriptedProvider {
    fn command(&self, command: ProviderCommand) {
        debug!("Provider got {command:?}");
        self.output.send(ReplayOutput::Command { command }).ok();
    }

    /// Whether heading updates were started and not stopped since
    pub fn heading_running(&self) -> bool {
        self.heading_running.load(Ordering::Acquire)
    }

    pub fn callbacks(&self) -> &LocationDelegate {
        &self.delegate
    }
}

impl LocationProvider for ScriptedProvider {
    fn start_updating_position(&self) {
        self.command(ProviderCommand::StartPosition);
    }

    fn stop_updating_position(&self) {
        self.command(ProviderCommand::StopPosition);
    }

    fn request_permission(&self, level: PermissionLevel) {
        self.command(ProviderCommand::RequestPermission(level));
    }

    fn start_updating_heading(&self) {
        self.heading_running.store(true, Ordering::Release);
        self.command(ProviderCommand::StartHeading);
    }

    fn stop_updating_heading(&self) {
        self.heading_running.store(false, Ordering::Release);
        self.command(ProviderCommand::StopHeading);
    }
}

/// A [LocationService] wired to a [ScriptedProvider], with both streams observed
pub struct Replay {
    service: LocationService<ScriptedProvider>,
    output: mpsc::UnboundedReceiver<ReplayOutput>,
    _position: Subscription<PositionFix, LocationError>,
    _heading: Subscription<HeadingFix, LocationError>,
}

impl Replay {
    pub fn new(settings: ServiceSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let service = LocationService::new(settings, {
            let tx = tx.clone();
            move |delegate| ScriptedProvider {
                delegate,
                output: tx,
                heading_running: AtomicBool::new(false),
            }
        });

        let position = service.position_stream().subscribe_fn(
            {
                let tx = tx.clone();
                move |fix| {
                    tx.send(ReplayOutput::Position { fix: *fix }).ok();
                }
            },
            {
                let tx = tx.clone();
                move |err| {
                    tx.send(ReplayOutput::terminated(StreamName::Position, err))
                        .ok();
                }
            },
        );

        let heading = service.heading_stream().subscribe_fn(
            {
                let tx = tx.clone();
                move |fix| {
                    tx.send(ReplayOutput::Heading { fix: *fix }).ok();
                }
            },
            move |err| {
                tx.send(ReplayOutput::terminated(StreamName::Heading, err))
                    .ok();
            },
        );

        Self {
            service,
            output: rx,
            _position: position,
            _heading: heading,
        }
    }

    pub fn service(&self) -> &LocationService<ScriptedProvider> {
        &self.service
    }

    /// Perform one step, its output is available from [Self::drain] right after
    pub fn apply(&self, step: &ScriptStep) {
        let callbacks = self.service.provider().callbacks();
        match step {
            ScriptStep::Enable => self.service.enable_service(),
            ScriptStep::Disable => self.service.disable_service(),
            ScriptStep::Positions(fixes) => callbacks.positions_updated(fixes),
            ScriptStep::Heading(fix) => callbacks.heading_updated(*fix),
            ScriptStep::Authorization(status) => callbacks.authorization_changed(*status),
            ScriptStep::Error(msg) => callbacks.failed(anyhow!("{msg}")),
        }
    }

    /// Everything that happened since the last drain
    pub fn drain(&mut self) -> Vec<ReplayOutput> {
        let mut out = Vec::new();
        while let Ok(item) = self.output.try_recv() {
            out.push(item);
        }
        out
    }
}

/// Play `script` back, waiting `pacing` before each step and handing every output to
/// `emit` as it's produced. Returns `false` if `cancel` fired before the end.
pub async fn run_script(
    script: &Script,
    pacing: Duration,
    cancel: &CancellationToken,
    mut emit: impl FnMut(ReplayOutput) -> Result,
) -> Result<bool> {
    let mut replay = Replay::new(script.settings.clone());

    for (i, step) in script.steps.iter().enumerate() {
        if !pacing.is_zero() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return Ok(false);
                }

                _ = tokio::time::sleep(pacing) => {}
            }
        } else if cancel.is_cancelled() {
            return Ok(false);
        }

        debug!("Step {i}: {step:?}");
        replay.apply(step);

        for output in replay.drain() {
            emit(output).with_context(|| format!("Failed to emit output of step {i}"))?;
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tokio::test;

    use super::*;

    fn fix_at(secs: i64) -> PositionFix {
        PositionFix::new(1.0, 2.0, Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn collect(script: &Script) -> Vec<ReplayOutput> {
        let mut replay = Replay::new(script.settings.clone());
        let mut out = Vec::new();
        for step in script.steps.iter() {
            replay.apply(step);
            out.extend(replay.drain());
        }
        out
    }

    #[test]
    async fn test_parse_script() {
        let raw = r#"{
            "settings": { "permission": "always" },
            "steps": [
                { "authorization": "undetermined" },
                { "authorization": "granted_always" },
                "enable",
                { "positions": [
                    { "coords": { "lat": 1.0, "long": 2.0 }, "accuracy": 5.0, "timestamp": "2024-05-01T10:00:00Z" },
                    { "coords": { "lat": 3.0, "long": 4.0, "altitude": 12.5 }, "accuracy": 5.0, "timestamp": "2024-05-01T10:00:05Z" }
                ] },
                { "heading": { "direction": 270.0, "accuracy": 3.0, "timestamp": "2024-05-01T10:00:06Z" } },
                { "error": "antenna unplugged" },
                "disable"
            ]
        }"#;
        let script: Script = serde_json::from_str(raw).expect("Failed to parse script");
        assert_eq!(script.settings.permission, PermissionLevel::Always);
        assert!(script.settings.track_heading);
        assert_eq!(script.steps.len(), 7);

        let out = collect(&script);
        let kinds = out
            .iter()
            .map(|o| match o {
                ReplayOutput::Command { .. } => "command",
                ReplayOutput::Position { .. } => "position",
                ReplayOutput::Heading { .. } => "heading",
                ReplayOutput::Terminated { .. } => "terminated",
            })
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                "command", "command", "command", "position", "heading", "terminated",
                "command", "command"
            ]
        );

        assert_eq!(
            out[0],
            ReplayOutput::Command {
                command: ProviderCommand::RequestPermission(PermissionLevel::Always)
            }
        );
        match &out[3] {
            ReplayOutput::Position { fix } => assert_eq!(fix.coords.altitude, Some(12.5)),
            other => panic!("Expected position, got {other:?}"),
        }
        match &out[5] {
            ReplayOutput::Terminated {
                stream,
                kind,
                message,
            } => {
                assert_eq!(*stream, StreamName::Position);
                assert_eq!(*kind, LocationErrorKind::Wrapped);
                assert!(message.contains("antenna unplugged"), "Got {message}");
            }
            other => panic!("Expected termination, got {other:?}"),
        }
    }

    #[test]
    async fn test_bundled_revoked_script() {
        let script: Script = serde_json::from_str(include_str!("../scripts/revoked.json"))
            .expect("Failed to parse bundled script");
        let out = collect(&script);

        let count = |f: fn(&ReplayOutput) -> bool| out.iter().filter(|o| f(o)).count();
        assert_eq!(count(|o| matches!(o, ReplayOutput::Position { .. })), 1);
        assert_eq!(count(|o| matches!(o, ReplayOutput::Heading { .. })), 2);
        assert_eq!(
            count(|o| matches!(
                o,
                ReplayOutput::Terminated {
                    stream: StreamName::Position,
                    ..
                }
            )),
            1
        );
        assert_eq!(
            out.last(),
            Some(&ReplayOutput::Command {
                command: ProviderCommand::StopHeading
            })
        );
    }

    #[test]
    async fn test_denied_only_closes_position() {
        let script = Script {
            settings: ServiceSettings::default(),
            steps: vec![
                ScriptStep::Authorization(AuthorizationStatus::Denied),
                ScriptStep::Positions(vec![fix_at(1)]),
                ScriptStep::Heading(HeadingFix {
                    direction: 5.0,
                    accuracy: 1.0,
                    timestamp: Utc.timestamp_opt(2, 0).unwrap(),
                }),
            ],
        };

        let out = collect(&script);
        assert_eq!(out.len(), 2, "Got {out:?}");
        assert!(matches!(
            out[0],
            ReplayOutput::Terminated {
                stream: StreamName::Position,
                kind: LocationErrorKind::NotAuthorized,
                ..
            }
        ));
        assert!(matches!(out[1], ReplayOutput::Heading { .. }));
    }

    #[test]
    async fn test_heading_lifecycle_follows_service() {
        let replay = Replay::new(ServiceSettings::default());
        replay.apply(&ScriptStep::Enable);
        assert!(replay.service().provider().heading_running());
        replay.apply(&ScriptStep::Disable);
        assert!(!replay.service().provider().heading_running());
    }

    #[test]
    async fn test_run_script_paced() {
        tokio::time::pause();
        let script = Script {
            settings: ServiceSettings::default(),
            steps: vec![
                ScriptStep::Positions(vec![fix_at(1)]),
                ScriptStep::Positions(vec![fix_at(2)]),
            ],
        };
        let cancel = CancellationToken::new();
        let mut out = Vec::new();

        let finished = run_script(&script, Duration::from_secs(1), &cancel, |o| {
            out.push(o);
            Ok(())
        })
        .await
        .expect("Replay failed");

        assert!(finished);
        assert_eq!(
            out,
            vec![
                ReplayOutput::Position { fix: fix_at(1) },
                ReplayOutput::Position { fix: fix_at(2) },
            ]
        );
    }

    #[test]
    async fn test_run_script_cancelled() {
        let script = Script {
            settings: ServiceSettings::default(),
            steps: vec![ScriptStep::Enable],
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let finished = run_script(&script, Duration::ZERO, &cancel, |o| {
            panic!("Emitted {o:?} after cancel")
        })
        .await
        .expect("Replay failed");

        assert!(!finished);
    }

    #[test]
    async fn test_emit_error_stops_replay() {
        let script = Script {
            settings: ServiceSettings::default(),
            steps: vec![ScriptStep::Enable, ScriptStep::Disable],
        };
        let cancel = CancellationToken::new();
        let mut seen = 0;

        let res = run_script(&script, Duration::ZERO, &cancel, |_| {
            seen += 1;
            bail!("stdout closed")
        })
        .await;

        assert!(res.is_err());
        assert_eq!(seen, 1);
    }
}
